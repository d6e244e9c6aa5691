// tests/config_load.rs
//
// Config loading: shipped file, env path override, malformed input.
// Env-mutating tests run serially.

use std::path::Path;

use serial_test::serial;

use fin_insights_router::config::{AppConfig, ENV_API_URL, ENV_CONFIG_PATH};
use fin_insights_router::dataset::DatasetKind;

fn clear_env() {
    std::env::remove_var(ENV_API_URL);
    std::env::remove_var(ENV_CONFIG_PATH);
}

#[test]
#[serial]
fn shipped_config_matches_default_datasets() {
    clear_env();
    let cfg = AppConfig::load_from(Path::new("config/router.toml")).expect("shipped config");
    assert_eq!(cfg.datasets.len(), 5);
    assert_eq!(cfg.datasets[3].kind, DatasetKind::Phrasebank);
    assert_eq!(cfg.datasets[4].tool_name, "Stage_Tool");
    assert!(!cfg.llm.enabled);
    assert_eq!(cfg.embedding.provider, "hashing");
    assert!(cfg.selector.keyword_fallback);
}

#[test]
#[serial]
fn env_path_override_and_api_url() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("router.toml");
    std::fs::write(
        &path,
        r#"
[data]
api_url = "http://ignored:1"

[selector]
keyword_fallback = false
"#,
    )
    .unwrap();
    std::env::set_var(ENV_CONFIG_PATH, &path);
    std::env::set_var(ENV_API_URL, "http://127.0.0.1:8111/");

    let cfg = AppConfig::load().expect("load via env path");
    assert!(!cfg.selector.keyword_fallback);
    assert_eq!(cfg.data.api_url.as_deref(), Some("http://127.0.0.1:8111"));
    assert_eq!(cfg.datasets.len(), 5);
    clear_env();
}

#[test]
#[serial]
fn missing_env_path_and_malformed_file_are_errors() {
    clear_env();
    std::env::set_var(ENV_CONFIG_PATH, "/definitely/not/here.toml");
    assert!(AppConfig::load().is_err());
    clear_env();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[data\napi_url = ").unwrap();
    let err = AppConfig::load_from(&path).unwrap_err();
    assert!(format!("{err:#}").contains("parsing config"));
}

#[test]
#[serial]
fn duplicate_dataset_ids_are_rejected() {
    clear_env();
    let toml = r#"
[[datasets]]
id = "apple"
kind = "stock"
label = "Apple"
tool_name = "A"
description = "a"

[[datasets]]
id = "apple"
kind = "stock"
label = "Apple again"
tool_name = "B"
description = "b"
"#;
    let err = AppConfig::from_toml_str(toml).unwrap_err();
    assert!(err.to_string().contains("duplicate dataset id"));
}
