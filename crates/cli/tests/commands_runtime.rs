use std::env;
use std::io::Write as _;
use std::sync::{Mutex, OnceLock};

use opsdesk_cli::commands::{import_products, migrate, notify_renewals, seed, smoke, start};
use serde_json::Value;

const MEMORY_DB_ENV: &[(&str, &str)] =
    &[("OPSDESK_DATABASE_URL", "sqlite::memory:"), ("OPSDESK_DATABASE_MAX_CONNECTIONS", "1")];

#[test]
fn start_returns_success_with_valid_env() {
    with_env(MEMORY_DB_ENV, || {
        let result = start::run();
        assert_eq!(result.exit_code, 0, "expected successful start preflight");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn start_returns_config_failure_with_bad_database_url() {
    with_env(&[("OPSDESK_DATABASE_URL", "postgres://nope")], || {
        let result = start::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "start");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(MEMORY_DB_ENV, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn seed_returns_success_with_valid_env() {
    with_env(MEMORY_DB_ENV, || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected demo seed success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "seed");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn seed_reports_a_deterministic_module_summary() {
    with_env(MEMORY_DB_ENV, || {
        let result = seed::run();
        assert_eq!(result.exit_code, 0, "expected demo seed success");

        let payload = parse_payload(&result.output);
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains(
            "  - crm: Two customers, an open pipeline, and an accepted proposal with July goals"
        ));
        assert!(message.contains(
            "  - purchasing: An approved requisition converted into a fully received purchase order"
        ));
        assert!(message.contains(
            "  - inventory: Stock levels fed by the order receipts, with the router below its minimum"
        ));
    });
}

#[test]
fn seed_is_idempotent_across_runs() {
    with_env(MEMORY_DB_ENV, || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed invocation success");
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["status"], "ok");

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed invocation success");
        let second_payload = parse_payload(&second.output);
        assert_eq!(second_payload["status"], "ok");

        assert_eq!(first_payload["message"], second_payload["message"]);
    });
}

#[test]
fn smoke_returns_success_report_with_valid_env() {
    with_env(MEMORY_DB_ENV, || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 0, "expected successful smoke report");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "pass");
    });
}

#[test]
fn smoke_returns_failure_when_config_invalid() {
    with_env(&[("OPSDESK_LOGGING_LEVEL", "verbose")], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 6, "expected smoke failure code");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "fail");
    });
}

#[test]
fn notify_renewals_dry_run_reports_empty_window() {
    with_env(MEMORY_DB_ENV, || {
        let result = notify_renewals::run(true);
        assert_eq!(result.exit_code, 0, "expected dry run success on empty database");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "notify-renewals");
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("no contracts due for renewal"));
    });
}

#[test]
fn notify_renewals_refuses_live_run_without_notify_address() {
    with_env(MEMORY_DB_ENV, || {
        let result = notify_renewals::run(false);
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "notify-renewals");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn import_products_rejects_missing_file() {
    with_env(MEMORY_DB_ENV, || {
        let result = import_products::run("no-such-file.csv".as_ref());
        assert_eq!(result.exit_code, 2, "expected file access failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "import-products");
        assert_eq!(payload["error_class"], "file_access");
    });
}

#[test]
fn import_products_loads_a_small_csv() {
    with_env(MEMORY_DB_ENV, || {
        let mut file = tempfile::NamedTempFile::new().expect("temp csv");
        writeln!(file, "sku,name,kind,pricing_method,standard_cost,markup_pct,unit")
            .expect("header");
        writeln!(file, "NET-100,24-port switch,good,markup,\"1.234,56\",35,un").expect("row");
        writeln!(file, "SVC-100,Install labor,service,fixed,0,0,h").expect("row");
        file.flush().expect("flush");

        let result = import_products::run(file.path());
        assert_eq!(result.exit_code, 0, "expected import success");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "import-products");
        assert_eq!(payload["status"], "ok");
        let message = payload["message"].as_str().unwrap_or("");
        assert!(message.contains("2 created, 0 updated, 0 failed"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "OPSDESK_DATABASE_URL",
        "OPSDESK_DATABASE_MAX_CONNECTIONS",
        "OPSDESK_DATABASE_TIMEOUT_SECS",
        "OPSDESK_SERVER_BIND_ADDRESS",
        "OPSDESK_SERVER_PORT",
        "OPSDESK_SERVER_HEALTH_CHECK_PORT",
        "OPSDESK_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "OPSDESK_EMAIL_ENABLED",
        "OPSDESK_EMAIL_SMTP_HOST",
        "OPSDESK_EMAIL_SMTP_PORT",
        "OPSDESK_EMAIL_USERNAME",
        "OPSDESK_EMAIL_PASSWORD",
        "OPSDESK_EMAIL_FROM_ADDRESS",
        "OPSDESK_EMAIL_FROM_NAME",
        "OPSDESK_EMAIL_NOTIFY_ADDRESS",
        "OPSDESK_EMAIL_RENEWAL_WINDOW_DAYS",
        "OPSDESK_UPLOADS_DIR",
        "OPSDESK_UPLOADS_MAX_SIZE_MB",
        "OPSDESK_LOGGING_LEVEL",
        "OPSDESK_LOGGING_FORMAT",
        "OPSDESK_LOG_LEVEL",
        "OPSDESK_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
