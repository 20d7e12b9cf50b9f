use anyhow::Context;
use clap::{Parser, Subcommand};
use shelf_app::circulation::{fine, FinePolicy};
use shelf_kernel::settings::Settings;
use shelf_kernel::SystemClock;
use std::process::ExitCode;
use std::sync::Arc;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

#[derive(Parser)]
#[command(name = "shelf", version, about = "Physical book lending service")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service
    Serve,
    /// Print the fine owed for a loan under the configured policy
    Fine {
        /// Issue date, RFC 3339
        #[arg(long, value_parser = parse_rfc3339)]
        issued: OffsetDateTime,
        /// Evaluation instant, RFC 3339; defaults to now
        #[arg(long, value_parser = parse_rfc3339)]
        at: Option<OffsetDateTime>,
    },
    /// Report copies whose issued flag disagrees with the loan log
    Audit,
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|err| format!("expected RFC 3339: {err}"))
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let settings = Settings::load().with_context(|| "failed to load shelf settings")?;

    match cli.command {
        Command::Fine { issued, at } => {
            let policy = FinePolicy::from_settings(&settings.circulation);
            let at = at.unwrap_or_else(OffsetDateTime::now_utc);
            println!("{}", fine(issued, at, &policy));
            Ok(ExitCode::SUCCESS)
        }
        Command::Serve => {
            shelf_telemetry::init(&settings.telemetry)?;
            runtime()?.block_on(shelf_app::run(settings))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Audit => {
            shelf_telemetry::init(&settings.telemetry)?;
            runtime()?.block_on(audit(settings))
        }
    }
}

fn runtime() -> anyhow::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")
}

async fn audit(settings: Settings) -> anyhow::Result<ExitCode> {
    let store = shelf_app::open_store(&settings).await?;
    let services = shelf_app::Services::new(store, Arc::new(SystemClock), &settings.circulation);
    let violations = services.ledger.audit().await?;

    for violation in &violations {
        println!("{}\t{:?}", violation.copy_id, violation.kind);
    }
    if violations.is_empty() {
        println!("no integrity violations");
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::error!(violations = violations.len(), "integrity audit failed");
        Ok(ExitCode::FAILURE)
    }
}
