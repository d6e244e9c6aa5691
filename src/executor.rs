// src/executor.rs
//! Runs the selected adapter and turns its response into answer text.

use serde_json::Value;

use crate::adapter::QueryResponse;
use crate::error::RouterError;
use crate::router::Tool;

/// Invoke the tool's adapter; adapter errors become `ExecutionFailure`.
pub async fn execute(tool: &Tool, query: &str, criteria: Option<&str>) -> Result<String, RouterError> {
    let resp = tool
        .adapter
        .query(query)
        .await
        .map_err(|e| RouterError::ExecutionFailure {
            tool: tool.descriptor.name.clone(),
            reason: format!("{e:#}"),
        })?;
    Ok(annotate(render(&resp), criteria))
}

/// Append `" (Filtered by: <criteria>)"` for non-blank criteria.
pub fn annotate(text: String, criteria: Option<&str>) -> String {
    match criteria.map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => format!("{text} (Filtered by: {c})"),
        None => text,
    }
}

fn show(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "n/a".to_string(),
        other => other.to_string(),
    }
}

fn more(total: usize, shown: usize) -> String {
    if total > shown {
        format!("\n… {} more", total - shown)
    } else {
        String::new()
    }
}

pub fn render(resp: &QueryResponse) -> String {
    match resp {
        QueryResponse::Text(t) => t.clone(),
        QueryResponse::Values { total: 0, .. } | QueryResponse::Records { total: 0, .. } => {
            "No records matched the query.".to_string()
        }
        QueryResponse::Values {
            field,
            values,
            total: 1,
        } if values.len() == 1 => match &values[0] {
            (Some(key), v) => format!("{field} on {key}: {}", show(v)),
            (None, v) => format!("{field}: {}", show(v)),
        },
        QueryResponse::Values {
            field,
            values,
            total,
        } => {
            let mut out = format!("{field} ({total} matching rows):");
            for (key, v) in values {
                match key {
                    Some(k) => out.push_str(&format!("\n- {k}: {}", show(v))),
                    None => out.push_str(&format!("\n- {}", show(v))),
                }
            }
            out + &more(*total, values.len())
        }
        QueryResponse::Records { rows, total } => {
            let mut out = format!("{total} matching records:");
            for r in rows {
                let cells: Vec<String> = r.iter().map(|(k, v)| format!("{k}: {}", show(v))).collect();
                out.push_str(&format!("\n- {}", cells.join(", ")));
            }
            out + &more(*total, rows.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_value_mentions_key() {
        let r = QueryResponse::Values {
            field: "Close".into(),
            values: vec![(Some("2024-06-14".into()), json!(212.49))],
            total: 1,
        };
        assert_eq!(render(&r), "Close on 2024-06-14: 212.49");
    }

    #[test]
    fn truncated_records_have_trailer() {
        let row = json!({"DPD": 0, "Current Stage": 1}).as_object().cloned().unwrap();
        let r = QueryResponse::Records {
            rows: vec![row; 20],
            total: 23,
        };
        let text = render(&r);
        assert!(text.starts_with("23 matching records:"));
        assert!(text.ends_with("… 3 more"));
        assert_eq!(text.lines().count(), 22);
    }

    #[test]
    fn empty_result_is_explicit() {
        let r = QueryResponse::Records {
            rows: vec![],
            total: 0,
        };
        assert_eq!(render(&r), "No records matched the query.");
    }

    #[test]
    fn criteria_annotation() {
        assert_eq!(
            annotate("42".into(), Some("Expert")),
            "42 (Filtered by: Expert)"
        );
        assert_eq!(annotate("42".into(), Some("   ")), "42");
        assert_eq!(annotate("42".into(), None), "42");
    }
}
