// tests/resolver_tiers.rs
//
// Tiered resolution against a real in-process data API (axum on 127.0.0.1:0)
// and local files in a temp dir.
//
// Covered:
// - healthy remote wins, local file untouched
// - remote failure -> valid local file
// - remote + local failure -> built-in sample
// - local rows with gaps are kept, wrongly typed rows are skipped
// - identical payloads on repeated resolution
// - required dataset without any tier -> SourceUnavailable

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::Path,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;

use fin_insights_router::dataset::{
    default_sources, DatasetSource, Freshness, HttpSource, Payload, Resolver,
};
use fin_insights_router::error::RouterError;

async fn data(Path(id): Path<String>) -> impl IntoResponse {
    match id.as_str() {
        "apple" => (
            StatusCode::OK,
            Json(json!({"Apple": [
                {"Date": "2024-06-14", "Open": 210.0, "High": 215.0, "Low": 209.0, "Close": 212.49, "Volume": 70000000},
                {"Date": "2024-06-13", "Open": 214.0, "High": 216.8, "Low": 211.6, "Close": 214.24, "Volume": 97000000}
            ]})),
        )
            .into_response(),
        "cleaned" => (
            StatusCode::OK,
            Json(json!([{"Credit Expiration": 10, "DPD": 5, "Current Stage": 3}])),
        )
            .into_response(),
        _ => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Spawn the fake data API; returns its base URL.
async fn spawn_data_api() -> String {
    let app = Router::new().route("/data/{id}", get(data));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    format!("http://{addr}")
}

fn http_resolver(base: &str) -> Resolver {
    let src = HttpSource::new(base, Duration::from_secs(5), Duration::from_secs(2)).expect("client");
    Resolver::new(Arc::new(src))
}

fn source(id: &str) -> DatasetSource {
    default_sources()
        .into_iter()
        .find(|s| s.id == id)
        .expect("default source")
}

#[tokio::test]
async fn healthy_remote_wins_and_local_is_untouched() {
    let base = spawn_data_api().await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("apple.json");
    std::fs::write(&local, "not even json").unwrap();

    let ds = http_resolver(&base)
        .resolve(&source("apple").with_local_path(&local))
        .await
        .unwrap();

    assert_eq!(ds.freshness, Freshness::Remote);
    assert!(ds.warnings.is_empty());
    let rows = ds.payload.records().unwrap();
    assert_eq!(rows.len(), 2);
    // sorted by date ascending
    assert_eq!(rows[1]["Close"], json!(212.49));
    assert_eq!(std::fs::read_to_string(&local).unwrap(), "not even json");
}

#[tokio::test]
async fn remote_failure_falls_back_to_local_file() {
    let base = spawn_data_api().await;
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("meta.json");
    std::fs::write(
        &local,
        json!([{"Date": "2024-06-14", "Open": 1.0, "High": 2.0, "Low": 0.5, "Close": 501.7, "Volume": 10}])
            .to_string(),
    )
    .unwrap();

    let ds = http_resolver(&base)
        .resolve(&source("meta").with_local_path(&local))
        .await
        .unwrap();

    assert_eq!(ds.freshness, Freshness::Local);
    assert_eq!(ds.warnings.len(), 1);
    assert!(ds.warnings[0].starts_with("remote: "), "{:?}", ds.warnings);
    assert_eq!(ds.payload.records().unwrap()[0]["Close"], json!(501.7));
}

#[tokio::test]
async fn unreachable_remote_and_bad_local_fall_back_to_sample() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("cleaned.json");
    std::fs::write(&local, json!([{"DPD": 1}]).to_string()).unwrap();

    // nothing listens on port 9
    let ds = http_resolver("http://127.0.0.1:9")
        .resolve(&source("cleaned").with_local_path(&local))
        .await
        .unwrap();

    assert_eq!(ds.freshness, Freshness::Sample);
    assert_eq!(ds.warnings.len(), 2);
    assert!(ds.warnings[1].starts_with("local: "));
    assert!(ds.warnings[1].contains("Credit Expiration"));
    assert_eq!(ds.payload.len(), 3);
}

#[tokio::test]
async fn local_rows_with_null_cells_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("cleaned.json");
    std::fs::write(
        &local,
        json!([
            {"Credit Expiration": 92, "DPD": 0, "Current Stage": 1},
            {"Credit Expiration": 245, "DPD": 3, "Current Stage": 1},
            {"Credit Expiration": 7, "DPD": null, "Current Stage": 2}
        ])
        .to_string(),
    )
    .unwrap();

    let ds = Resolver::offline()
        .resolve(&source("cleaned").with_local_path(&local))
        .await
        .unwrap();

    assert_eq!(ds.freshness, Freshness::Local);
    assert!(ds.warnings.is_empty(), "{:?}", ds.warnings);
    let rows = ds.payload.records().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2]["DPD"], json!(null));
    assert_eq!(rows[2]["Credit Expiration"], json!(7));
}

#[tokio::test]
async fn wrongly_typed_stock_rows_are_skipped_not_replaced_by_sample() {
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("apple.json");
    std::fs::write(
        &local,
        json!([
            {"Date": "2024-06-12", "Open": 207.4, "High": 220.2, "Low": 206.9, "Close": 213.07, "Volume": null},
            {"Date": "2024-06-13", "Open": 214.7, "High": 216.8, "Low": 211.6, "Close": "n/a", "Volume": 97000000},
            {"Date": "2024-06-14", "Open": 213.9, "High": 215.2, "Low": 211.3, "Close": 212.49, "Volume": 70000000}
        ])
        .to_string(),
    )
    .unwrap();

    let ds = Resolver::offline()
        .resolve(&source("apple").with_local_path(&local))
        .await
        .unwrap();

    assert_eq!(ds.freshness, Freshness::Local);
    assert_eq!(ds.warnings, vec!["local: skipped 1 invalid rows".to_string()]);
    let rows = ds.payload.records().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["Date"], json!("2024-06-12"));
    assert_eq!(rows[1]["Close"], json!(212.49));
}

#[tokio::test]
async fn resolving_twice_gives_identical_payloads() {
    let base = spawn_data_api().await;
    let r = http_resolver(&base);
    let a = r.resolve(&source("cleaned")).await.unwrap();
    let b = r.resolve(&source("cleaned")).await.unwrap();
    assert_eq!(a.freshness, Freshness::Remote);
    assert_eq!(*a.payload, *b.payload);
    assert!(matches!(*a.payload, Payload::Records(ref rows) if rows.len() == 1));
}

#[tokio::test]
async fn required_dataset_without_tiers_is_unavailable() {
    let mut s = source("financial_phrasebank").without_sample().required();
    s.local_path = None;
    let err = Resolver::offline().resolve(&s).await.unwrap_err();
    match err {
        RouterError::SourceUnavailable { dataset, reason } => {
            assert_eq!(dataset, "financial_phrasebank");
            assert_eq!(reason, "no resolution tier configured");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}
