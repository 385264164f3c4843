pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "opsdesk",
    about = "OpsDesk operator CLI",
    long_about = "Operate OpsDesk runtime readiness, migrations, demo data, config inspection, \
                  renewal notifications, and catalog imports.",
    after_help = "Examples:\n  opsdesk doctor --json\n  opsdesk seed\n  opsdesk notify-renewals --dry-run\n  opsdesk import-products --file products.csv"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run startup preflight checks and return structured status output")]
    Start,
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Load the idempotent demo dataset and verify it against its contract")]
    Seed,
    #[command(about = "Run end-to-end readiness checks with per-check timing details")]
    Smoke,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, mail transport readiness, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(
        name = "notify-renewals",
        about = "Email renewal reminders for contracts inside the renewal window"
    )]
    NotifyRenewals {
        #[arg(long, help = "List due contracts without sending anything")]
        dry_run: bool,
    },
    #[command(
        name = "import-products",
        about = "Import or update products from a CSV file"
    )]
    ImportProducts {
        #[arg(long, help = "Path to the CSV file")]
        file: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start => commands::start::run(),
        Command::Migrate => commands::migrate::run(),
        Command::Seed => commands::seed::run(),
        Command::Smoke => commands::smoke::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::NotifyRenewals { dry_run } => commands::notify_renewals::run(dry_run),
        Command::ImportProducts { file } => commands::import_products::run(&file),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
