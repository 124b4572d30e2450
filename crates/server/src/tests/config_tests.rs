use super::{apply_env, apply_file, normalize_database_url, prepare_database_url, Settings};

use std::{
    collections::HashMap,
    env, fs,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
}

#[test]
fn empty_database_url_falls_back_to_default() {
    assert_eq!(normalize_database_url("  "), "sqlite://./data/ceremony.db");
}

#[test]
fn keeps_windows_absolute_path_with_single_sqlite_colon() {
    assert_eq!(
        normalize_database_url("sqlite:C:\\Users\\alice\\test.db"),
        "sqlite:C:/Users/alice/test.db"
    );
}

#[test]
fn converts_sqlite_double_slash_windows_path() {
    assert_eq!(
        normalize_database_url("sqlite://C:/Users/alice/test.db"),
        "sqlite:C:/Users/alice/test.db"
    );
}

#[test]
fn creates_parent_dir_for_sqlite_file() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();

    let temp_root = env::temp_dir().join(format!("ceremony_server_test_{suffix}"));
    let db_path = temp_root.join("data").join("test.db");

    prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare db url");
    assert!(temp_root.join("data").exists());

    fs::remove_dir_all(temp_root).expect("cleanup");
}

#[test]
fn file_values_override_defaults() {
    let mut settings = Settings::default();
    let file_cfg = HashMap::from([
        ("bind_addr".to_string(), "0.0.0.0:9000".to_string()),
        ("upcoming_limit".to_string(), "4".to_string()),
        ("event_buffer".to_string(), "not-a-number".to_string()),
    ]);
    apply_file(&mut settings, &file_cfg);

    assert_eq!(settings.server_bind, "0.0.0.0:9000");
    assert_eq!(settings.upcoming_limit, 4);
    assert_eq!(settings.event_buffer, 256);
}

#[test]
fn app_prefixed_env_wins_over_plain_env() {
    let mut settings = Settings::default();
    let vars = HashMap::from([
        ("DATABASE_URL", "sqlite://plain.db"),
        ("APP__DATABASE_URL", "sqlite://app.db"),
        ("APP__REQUEST_TIMEOUT_MS", "250"),
        ("APP__AUTH_SECRET", ""),
    ]);
    apply_env(&mut settings, |key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(settings.database_url, "sqlite://app.db");
    assert_eq!(settings.request_timeout(), Duration::from_millis(250));
    assert_eq!(settings.auth_secret, None);
}

#[tokio::test]
async fn prepared_database_url_creates_openable_sqlite_file() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();

    let temp_root = env::temp_dir().join(format!("ceremony_server_open_test_{suffix}"));
    let db_path = temp_root.join("nested").join("ceremony.db");

    let prepared = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare");
    let storage = storage::Storage::new(&prepared).await.expect("open sqlite");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should be created: {}",
        db_path.display()
    );

    fs::remove_dir_all(temp_root).expect("cleanup");
}
