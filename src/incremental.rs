use chrono::{DateTime, Utc};

use crate::formats::ReviewRecord;

/// Drops reviews authored strictly before `watermark`.
///
/// Records without a parsed authored time always pass: a duplicate is cheaper
/// than a lost review. Relative order is preserved.
pub fn filter_new(
    records: Vec<ReviewRecord>,
    watermark: Option<DateTime<Utc>>,
) -> Vec<ReviewRecord> {
    let Some(watermark) = watermark else {
        return records;
    };

    let before = records.len();
    let kept = records
        .into_iter()
        .filter(|record| match record.authored_at {
            Some(authored_at) if authored_at < watermark => {
                tracing::debug!(
                    index = record.index,
                    %authored_at,
                    %watermark,
                    "skip review older than watermark"
                );
                false
            }
            _ => true,
        })
        .collect::<Vec<_>>();

    tracing::info!(before, after = kept.len(), %watermark, "incremental filter");
    kept
}
