use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub request_timeout_ms: u64,
    pub event_buffer: usize,
    pub upcoming_limit: usize,
    pub auth_secret: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:3002".into(),
            database_url: "sqlite://./data/ceremony.db".into(),
            request_timeout_ms: 5_000,
            event_buffer: 256,
            upcoming_limit: 10,
            auth_secret: None,
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.max(1))
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("server.toml") {
        match toml::from_str::<HashMap<String, String>>(&raw) {
            Ok(file_cfg) => apply_file(&mut settings, &file_cfg),
            Err(error) => tracing::warn!(%error, "ignoring unreadable server.toml"),
        }
    }

    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings
}

fn apply_file(settings: &mut Settings, file_cfg: &HashMap<String, String>) {
    if let Some(v) = file_cfg.get("bind_addr") {
        settings.server_bind = v.clone();
    }
    if let Some(v) = file_cfg.get("database_url") {
        settings.database_url = v.clone();
    }
    if let Some(v) = file_cfg.get("request_timeout_ms").and_then(|v| v.parse().ok()) {
        settings.request_timeout_ms = v;
    }
    if let Some(v) = file_cfg.get("event_buffer").and_then(|v| v.parse().ok()) {
        settings.event_buffer = v;
    }
    if let Some(v) = file_cfg.get("upcoming_limit").and_then(|v| v.parse().ok()) {
        settings.upcoming_limit = v;
    }
    if let Some(v) = file_cfg.get("auth_secret") {
        settings.auth_secret = Some(v.clone()).filter(|s| !s.is_empty());
    }
}

/// Later keys win over earlier ones.
fn apply_env(settings: &mut Settings, var: impl Fn(&str) -> Option<String>) {
    for key in ["SERVER_BIND", "APP__BIND_ADDR"] {
        if let Some(v) = var(key) {
            settings.server_bind = v;
        }
    }
    for key in ["DATABASE_URL", "APP__DATABASE_URL"] {
        if let Some(v) = var(key) {
            settings.database_url = v;
        }
    }
    if let Some(v) = var("APP__REQUEST_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
        settings.request_timeout_ms = v;
    }
    if let Some(v) = var("APP__EVENT_BUFFER").and_then(|v| v.parse().ok()) {
        settings.event_buffer = v;
    }
    if let Some(v) = var("APP__UPCOMING_LIMIT").and_then(|v| v.parse().ok()) {
        settings.upcoming_limit = v;
    }
    if let Some(v) = var("APP__AUTH_SECRET") {
        settings.auth_secret = Some(v).filter(|s| !s.is_empty());
    }
}

pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    ensure_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

/// Accepts `sqlite:` URLs, URLs of other schemes, or bare file paths.
fn normalize_database_url(raw_database_url: &str) -> String {
    let raw = raw_database_url.trim();
    if raw.is_empty() {
        return Settings::default().database_url;
    }
    if raw.starts_with("sqlite::memory:") {
        return raw.to_string();
    }

    let path = match raw
        .strip_prefix("sqlite://")
        .or_else(|| raw.strip_prefix("sqlite:"))
    {
        Some(path) => path,
        None if raw.contains("://") => return raw.to_string(),
        None => raw,
    };
    let path = path.replace('\\', "/");
    if is_windows_drive_path(&path) {
        format!("sqlite:{path}")
    } else {
        format!("sqlite://{path}")
    }
}

fn is_windows_drive_path(path: &str) -> bool {
    matches!(path.as_bytes(), [drive, b':', b'/', ..] if drive.is_ascii_alphabetic())
}

fn ensure_parent_dir_exists(database_url: &str) -> anyhow::Result<()> {
    let Some(parent) = sqlite_path(database_url)
        .and_then(|path| path.parent().map(Path::to_path_buf))
        .filter(|parent| !parent.as_os_str().is_empty())
    else {
        return Ok(());
    };

    fs::create_dir_all(&parent).with_context(|| {
        format!(
            "cannot create '{}' for database url '{database_url}'",
            parent.display()
        )
    })
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") {
        return None;
    }
    let rest = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))?;
    rest.split('?')
        .next()
        .filter(|path| !path.is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
