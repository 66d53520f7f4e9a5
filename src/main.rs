use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

use reviewdigest::app::service::{ReviewService, TriggerOutcome};
use reviewdigest::cli::{Cli, Command};
use reviewdigest::config::{AppConfig, Secrets};
use reviewdigest::formats::{ScrapeState, ScrapeStatus};
use reviewdigest::store::reviews::ReviewRepository;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    reviewdigest::logging::init().context("init logging")?;

    let cli = Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    let config = AppConfig::load(cli.config.as_deref()).context("load config")?;
    let secrets = Secrets::from_env();

    match cli.command {
        Command::Scrape(args) => {
            let service = ReviewService::from_config(&config, &secrets)?;
            let outcome = service
                .scrape_now(&args.subject, args.force)
                .await
                .context("scrape")?;
            report_outcome(outcome)?;
        }
        Command::Distill(args) => {
            let service = ReviewService::from_config(&config, &secrets)?;
            let outcome = service
                .redistill(&args.subject, true)
                .await
                .context("distill")?;
            report_outcome(outcome)?;
        }
        Command::Check(args) => {
            let repository = open_repository(&config, &secrets)?;
            let subject = args.subject.trim();
            if subject.is_empty() {
                anyhow::bail!("--subject must not be empty");
            }
            let due = reviewdigest::freshness::should_scrape(
                &repository,
                subject,
                config.freshness.cooldown_days,
            )
            .await
            .context("check")?;
            print_json(&serde_json::json!({ "subject": subject, "due": due }))?;
        }
        Command::Reviews(args) => {
            let repository = open_repository(&config, &secrets)?;
            let reviews = repository
                .list_reviews(args.subject.trim())
                .await
                .context("reviews")?;
            print_json(&reviews)?;
        }
        Command::Analysis(args) => {
            let repository = open_repository(&config, &secrets)?;
            let subject = args.subject.trim();
            let analysis = repository
                .get_analysis(subject)
                .await
                .context("analysis")?
                .ok_or_else(|| anyhow::anyhow!("no analysis stored for {subject}"))?;
            print_json(&analysis)?;
        }
    }

    Ok(())
}

fn open_repository(config: &AppConfig, secrets: &Secrets) -> anyhow::Result<ReviewRepository> {
    let store = reviewdigest::store::open(&config.store, secrets).context("open document store")?;
    Ok(ReviewRepository::new(store, &config.store))
}

fn report_outcome(outcome: TriggerOutcome) -> anyhow::Result<()> {
    match outcome {
        TriggerOutcome::Started(status) => {
            print_json(&status)?;
            fail_on_error(&status)
        }
        TriggerOutcome::NotDue => print_json(&serde_json::json!({
            "status": "not_required",
            "message": "scraping not needed at this time",
        })),
        TriggerOutcome::AlreadyRunning(status) => {
            print_json(&status)?;
            anyhow::bail!("a run for {} is already in progress", status.subject)
        }
    }
}

fn fail_on_error(status: &ScrapeStatus) -> anyhow::Result<()> {
    if status.status == ScrapeState::Error {
        anyhow::bail!(
            "{}: {}",
            status.message,
            status.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{rendered}");
    Ok(())
}
