use std::fs::File;
use std::path::Path;

use chrono::Utc;
use opsdesk_core::config::{AppConfig, LoadOptions};
use opsdesk_core::imports::parse_product_rows;
use opsdesk_db::repositories::{OperationContext, SqlProductRepository};
use opsdesk_db::{connect_with_settings, migrations};

use crate::commands::CommandResult;

/// CSV product import against the live database. Rows are matched on SKU:
/// known SKUs are updated, unknown SKUs created, and bad rows are reported
/// without blocking the rest of the file.
pub fn run(file: &Path) -> CommandResult {
    let reader = match File::open(file) {
        Ok(reader) => reader,
        Err(error) => {
            return CommandResult::failure(
                "import-products",
                "file_access",
                format!("cannot open `{}`: {error}", file.display()),
                2,
            );
        }
    };

    let parsed = match parse_product_rows(reader) {
        Ok(parsed) => parsed,
        Err(error) => {
            return CommandResult::failure("import-products", "csv_parse", error.to_string(), 2);
        }
    };

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "import-products",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "import-products",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let ctx =
            OperationContext::new("cli", format!("import-{}", Utc::now().timestamp_millis()));
        let report = SqlProductRepository::new(pool.clone())
            .import(parsed, &ctx)
            .await
            .map_err(|error| ("import_execution", error.to_string(), 5u8))?;

        pool.close().await;
        Ok::<_, (&'static str, String, u8)>(report)
    });

    match result {
        Ok(report) => {
            let mut message = format!("product import finished: {}", report.summary());
            if !report.errors.is_empty() {
                let error_lines: Vec<String> =
                    report.errors.iter().map(|error| format!("  - {error}")).collect();
                message.push_str("\nrejected rows:\n");
                message.push_str(&error_lines.join("\n"));
            }
            CommandResult::success("import-products", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("import-products", error_class, message, exit_code)
        }
    }
}
