// tests/tasks_roles.rs
//
// Role-gated task dispatch against a sample-backed router.

use serde_json::json;

use fin_insights_router::adapter::AdapterDeps;
use fin_insights_router::dataset::{default_sources, DatasetSource, Resolver};
use fin_insights_router::selector::KeywordSelector;
use fin_insights_router::session::{Role, SessionContext};
use fin_insights_router::tasks::{
    dispatch, menu_for, Method, Task, TaskError, TaskKind, TaskOutcome, UserAction,
};
use fin_insights_router::QueryRouter;

async fn router() -> QueryRouter {
    let sources: Vec<DatasetSource> = default_sources()
        .into_iter()
        .map(|mut s| {
            s.local_path = None;
            s
        })
        .collect();
    let mut r = QueryRouter::new(Box::new(KeywordSelector));
    r.initialize(&sources, &Resolver::offline(), &AdapterDeps::offline(64))
        .await
        .unwrap();
    r
}

fn session(role: Role) -> SessionContext {
    SessionContext::new("alice", "alice@example.com", role)
}

#[tokio::test]
async fn financial_query_stores_last_result_for_view_and_evaluation() {
    let r = router().await;
    let mut s = session(Role::Expert);

    assert!(matches!(
        dispatch(Task::ViewResults, &mut s, &r).await,
        Err(TaskError::NoResult)
    ));

    let out = dispatch(
        Task::FinancialQuery {
            query: "Apple close on 2025-01-02".into(),
            criteria: Some("Date > 2025-01-01".into()),
        },
        &mut s,
        &r,
    )
    .await
    .unwrap();
    let expected = "Close on 2025-01-02: 151.3 (Filtered by: Date > 2025-01-01)";
    assert!(matches!(out, TaskOutcome::Answer { ref text } if text == expected));
    assert_eq!(s.last_result.as_deref(), Some(expected));

    let TaskOutcome::Request(req) =
        dispatch(Task::EvaluateReportQuality { quality: 8 }, &mut s, &r)
            .await
            .unwrap()
    else {
        panic!("expected backend request");
    };
    assert_eq!(req.method, Method::Post);
    assert_eq!(req.path, "/evaluations");
    assert_eq!(
        req.body,
        Some(json!({"username": "alice", "report": expected, "quality": 8}))
    );

    assert!(matches!(
        dispatch(Task::EvaluateReportQuality { quality: 11 }, &mut s, &r).await,
        Err(TaskError::QualityOutOfRange(11))
    ));
}

#[tokio::test]
async fn edit_report_replaces_last_result() {
    let r = router().await;
    let mut s = session(Role::Administrator);
    assert!(matches!(
        dispatch(Task::EditReport { text: "x".into() }, &mut s, &r).await,
        Err(TaskError::NoResult)
    ));
    s.last_result = Some("draft".into());
    dispatch(Task::EditReport { text: "final".into() }, &mut s, &r)
        .await
        .unwrap();
    let out = dispatch(Task::ViewResults, &mut s, &r).await.unwrap();
    assert!(matches!(out, TaskOutcome::Report { ref text } if text == "final"));
}

#[tokio::test]
async fn regular_user_is_limited_to_their_menu() {
    let r = router().await;
    let mut s = session(Role::RegularUser);
    for task in [
        Task::CleanedData,
        Task::FinancialPhrasebank,
        Task::EditReport { text: "x".into() },
        Task::UserManagement(UserAction::List),
        Task::QueryInterface { query: "apple".into() },
    ] {
        let kind = task.kind();
        assert!(!menu_for(Role::RegularUser).contains(&kind));
        match dispatch(task, &mut s, &r).await {
            Err(TaskError::Forbidden { task, role }) => {
                assert_eq!(task, kind);
                assert_eq!(role, Role::RegularUser);
            }
            other => panic!("{kind:?} should be forbidden, got {other:?}"),
        }
    }

    let out = dispatch(Task::VerifyPermissions, &mut s, &r).await.unwrap();
    let TaskOutcome::Permissions { role, tasks } = out else {
        panic!("expected permissions");
    };
    assert_eq!(role, Role::RegularUser);
    assert_eq!(tasks.len(), 6);
    assert!(tasks.contains(&TaskKind::StockComparison));
}

#[tokio::test]
async fn suggestions_and_user_management_become_backend_requests() {
    let r = router().await;
    let mut s = session(Role::Administrator);

    assert!(matches!(
        dispatch(
            Task::SuggestImprovement {
                suggestion: "  ".into()
            },
            &mut s,
            &r
        )
        .await,
        Err(TaskError::BlankInput(_))
    ));

    let TaskOutcome::Request(req) = dispatch(
        Task::SuggestImprovement {
            suggestion: " add dividends ".into(),
        },
        &mut s,
        &r,
    )
    .await
    .unwrap() else {
        panic!("expected request");
    };
    assert_eq!(req.path, "/suggestions");
    assert_eq!(
        req.body,
        Some(json!({"username": "alice", "suggestion": "add dividends"}))
    );

    let TaskOutcome::Request(req) = dispatch(
        Task::UserManagement(UserAction::SetRole {
            username: "bob".into(),
            role: Role::Expert,
        }),
        &mut s,
        &r,
    )
    .await
    .unwrap() else {
        panic!("expected request");
    };
    assert_eq!((req.method, req.path.as_str()), (Method::Put, "/users/bob"));
    assert_eq!(req.body, Some(json!({"role": "Expert"})));

    let TaskOutcome::Request(req) = dispatch(
        Task::UserManagement(UserAction::Delete {
            username: "bob".into(),
        }),
        &mut s,
        &r,
    )
    .await
    .unwrap() else {
        panic!("expected request");
    };
    assert_eq!(req.method, Method::Delete);
    assert!(req.body.is_none());

    assert!(matches!(
        dispatch(
            Task::UserManagement(UserAction::Delete {
                username: "".into()
            }),
            &mut s,
            &r
        )
        .await,
        Err(TaskError::BlankInput(_))
    ));
}

#[tokio::test]
async fn dataset_views() {
    let r = router().await;
    let mut s = session(Role::Expert);

    let TaskOutcome::Stock(k) = dispatch(
        Task::StockAnalysis {
            company: "Microsoft".into(),
        },
        &mut s,
        &r,
    )
    .await
    .unwrap() else {
        panic!("expected stock kpis");
    };
    assert_eq!(k.dataset, "microsoft");
    assert_eq!(k.recent.len(), 31);

    assert!(matches!(
        dispatch(
            Task::StockAnalysis {
                company: "Tesla".into()
            },
            &mut s,
            &r
        )
        .await,
        Err(TaskError::UnknownDataset(_))
    ));

    assert!(matches!(
        dispatch(Task::CleanedData, &mut s, &r).await,
        Ok(TaskOutcome::Credit(c)) if c.rows == 3
    ));
    assert!(matches!(
        dispatch(Task::FinancialPhrasebank, &mut s, &r).await,
        Ok(TaskOutcome::Sentiment(p)) if p.total == 2
    ));
    assert!(matches!(
        dispatch(Task::StockComparison, &mut s, &r).await,
        Ok(TaskOutcome::Comparison(c)) if c.series.len() == 3
    ));
}
