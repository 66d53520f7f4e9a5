use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// YAML config file (falls back to `REVIEWDIGEST_CONFIG`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Collect, persist and analyze reviews for a subject in the foreground.
    Scrape(ScrapeArgs),
    /// Rebuild the analysis from already stored reviews.
    Distill(SubjectArgs),
    /// Report whether a scrape is due.
    Check(SubjectArgs),
    /// Print stored reviews as JSON.
    Reviews(SubjectArgs),
    /// Print the stored analysis as JSON.
    Analysis(SubjectArgs),
}

#[derive(Debug, Args)]
pub struct SubjectArgs {
    /// Search term identifying the venue.
    #[arg(long)]
    pub subject: String,
}

#[derive(Debug, Args)]
pub struct ScrapeArgs {
    /// Search term identifying the venue.
    #[arg(long)]
    pub subject: String,

    /// Scrape even when the last analysis is within the cooldown window.
    #[arg(long, default_value_t = false)]
    pub force: bool,
}
