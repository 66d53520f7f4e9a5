use anyhow::Context as _;
use chrono::{DateTime, Utc};

use crate::store::reviews::ReviewRepository;

pub const DEFAULT_COOLDOWN_DAYS: u32 = 7;

/// Returns true when `subject` has never been analyzed or its watermark is at
/// least `cooldown_days` whole days old.
pub async fn should_scrape(
    repo: &ReviewRepository,
    subject: &str,
    cooldown_days: u32,
) -> anyhow::Result<bool> {
    let watermark = repo
        .watermark(subject)
        .await
        .with_context(|| format!("read watermark: {subject}"))?;
    let due = is_due(watermark, Utc::now(), cooldown_days);
    tracing::debug!(subject, ?watermark, cooldown_days, due, "freshness check");
    Ok(due)
}

pub fn is_due(watermark: Option<DateTime<Utc>>, now: DateTime<Utc>, cooldown_days: u32) -> bool {
    let Some(watermark) = watermark else {
        return true;
    };
    let elapsed_days = now.signed_duration_since(watermark).num_days();
    elapsed_days >= i64::from(cooldown_days)
}
