use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use opsdesk_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let source = |key_path: &str, env_key: &str| {
        field_source(key_path, Some(env_key), config_file_doc.as_ref(), config_file_path.as_deref())
    };

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    lines.push(render_line(
        "database.url",
        &config.database.url,
        source("database.url", "OPSDESK_DATABASE_URL"),
    ));
    lines.push(render_line(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        source("database.max_connections", "OPSDESK_DATABASE_MAX_CONNECTIONS"),
    ));
    lines.push(render_line(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        source("database.timeout_secs", "OPSDESK_DATABASE_TIMEOUT_SECS"),
    ));

    lines.push(render_line(
        "server.bind_address",
        &config.server.bind_address,
        source("server.bind_address", "OPSDESK_SERVER_BIND_ADDRESS"),
    ));
    lines.push(render_line(
        "server.port",
        &config.server.port.to_string(),
        source("server.port", "OPSDESK_SERVER_PORT"),
    ));
    lines.push(render_line(
        "server.health_check_port",
        &config.server.health_check_port.to_string(),
        source("server.health_check_port", "OPSDESK_SERVER_HEALTH_CHECK_PORT"),
    ));
    lines.push(render_line(
        "server.graceful_shutdown_secs",
        &config.server.graceful_shutdown_secs.to_string(),
        source("server.graceful_shutdown_secs", "OPSDESK_SERVER_GRACEFUL_SHUTDOWN_SECS"),
    ));

    lines.push(render_line(
        "email.enabled",
        &config.email.enabled.to_string(),
        source("email.enabled", "OPSDESK_EMAIL_ENABLED"),
    ));
    lines.push(render_line(
        "email.smtp_host",
        if config.email.smtp_host.is_empty() { "<unset>" } else { &config.email.smtp_host },
        source("email.smtp_host", "OPSDESK_EMAIL_SMTP_HOST"),
    ));
    lines.push(render_line(
        "email.smtp_port",
        &config.email.smtp_port.to_string(),
        source("email.smtp_port", "OPSDESK_EMAIL_SMTP_PORT"),
    ));
    lines.push(render_line(
        "email.username",
        config.email.username.as_deref().unwrap_or("<unset>"),
        source("email.username", "OPSDESK_EMAIL_USERNAME"),
    ));
    let email_password = if config.email.password.is_some() { "<redacted>" } else { "<unset>" };
    lines.push(render_line(
        "email.password",
        email_password,
        source("email.password", "OPSDESK_EMAIL_PASSWORD"),
    ));
    lines.push(render_line(
        "email.from_address",
        &config.email.from_address,
        source("email.from_address", "OPSDESK_EMAIL_FROM_ADDRESS"),
    ));
    lines.push(render_line(
        "email.notify_address",
        config.email.notify_address.as_deref().unwrap_or("<unset>"),
        source("email.notify_address", "OPSDESK_EMAIL_NOTIFY_ADDRESS"),
    ));
    lines.push(render_line(
        "email.renewal_window_days",
        &config.email.renewal_window_days.to_string(),
        source("email.renewal_window_days", "OPSDESK_EMAIL_RENEWAL_WINDOW_DAYS"),
    ));

    lines.push(render_line(
        "uploads.dir",
        &config.uploads.dir.display().to_string(),
        source("uploads.dir", "OPSDESK_UPLOADS_DIR"),
    ));
    lines.push(render_line(
        "uploads.max_size_mb",
        &config.uploads.max_size_mb.to_string(),
        source("uploads.max_size_mb", "OPSDESK_UPLOADS_MAX_SIZE_MB"),
    ));

    lines.push(render_line(
        "logging.level",
        &config.logging.level,
        source("logging.level", "OPSDESK_LOGGING_LEVEL"),
    ));
    lines.push(render_line(
        "logging.format",
        &format!("{:?}", config.logging.format),
        source("logging.format", "OPSDESK_LOGGING_FORMAT"),
    ));

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("opsdesk.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/opsdesk.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
