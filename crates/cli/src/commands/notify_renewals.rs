use chrono::Utc;
use opsdesk_core::config::{AppConfig, LoadOptions};
use opsdesk_db::repositories::SqlContractRepository;
use opsdesk_db::{connect_with_settings, migrations};
use opsdesk_mail::{Mailer, OutboundMessage, SmtpMailer};

use crate::commands::CommandResult;

/// Sends one reminder per contract whose renewal date falls inside the
/// configured window. `--dry-run` lists the due contracts without touching
/// the relay.
pub fn run(dry_run: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "notify-renewals",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let notify_address = config.email.notify_address.clone();
    if !dry_run && notify_address.is_none() {
        return CommandResult::failure(
            "notify-renewals",
            "config_validation",
            "email.notify_address is not set; use --dry-run to list due contracts",
            2,
        );
    }

    let mailer = if dry_run {
        None
    } else {
        match SmtpMailer::from_config(&config.email) {
            Ok(mailer) if mailer.is_enabled() => Some(mailer),
            Ok(_) => {
                return CommandResult::failure(
                    "notify-renewals",
                    "config_validation",
                    "email delivery is disabled; enable [email] or use --dry-run",
                    2,
                );
            }
            Err(error) => {
                return CommandResult::failure(
                    "notify-renewals",
                    "mail_transport",
                    error.to_string(),
                    2,
                );
            }
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "notify-renewals",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let window_days = config.email.renewal_window_days;
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

        let contracts = SqlContractRepository::new(pool.clone());
        let notices = contracts
            .renewal_notices(Utc::now().date_naive(), window_days)
            .await
            .map_err(|error| ("renewal_lookup", error.to_string(), 5u8))?;

        let mut sent = 0usize;
        if let (Some(mailer), Some(to)) = (mailer.as_ref(), notify_address.as_deref()) {
            for notice in &notices {
                mailer.send(&OutboundMessage::renewal(to, notice)).await.map_err(|error| {
                    (
                        "mail_delivery",
                        format!("delivery failed for {}: {error}", notice.contract_number),
                        6u8,
                    )
                })?;
                sent += 1;
            }
        }

        pool.close().await;
        Ok::<_, (&'static str, String, u8)>((notices, sent))
    });

    match result {
        Ok((notices, sent)) => {
            if notices.is_empty() {
                return CommandResult::success(
                    "notify-renewals",
                    format!("no contracts due for renewal within {window_days} days"),
                );
            }

            let listing: Vec<String> = notices
                .iter()
                .map(|notice| {
                    format!(
                        "  - {} ({}) renews {}",
                        notice.contract_number, notice.counterparty, notice.renewal_date
                    )
                })
                .collect();
            let message = if dry_run {
                format!(
                    "{} contracts due within {window_days} days (dry run, nothing sent):\n{}",
                    notices.len(),
                    listing.join("\n")
                )
            } else {
                format!(
                    "sent {sent} renewal reminders for {} due contracts:\n{}",
                    notices.len(),
                    listing.join("\n")
                )
            };
            CommandResult::success("notify-renewals", message)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("notify-renewals", error_class, message, exit_code)
        }
    }
}
