use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Rating label stored when a review node carries no rating element.
pub const NO_RATING: &str = "no rating";

/// One review as collected from the reviews panel, before persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    /// 1-based position in the DOM at scrape time. Unique within one run only.
    pub index: usize,
    pub reviewer: String,
    pub rating: String,
    pub comment: String,
    pub subject: String,
    /// Raw UI text the authored time was parsed from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authored_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authored_at: Option<DateTime<Utc>>,
}

/// A review as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredReview {
    pub index: usize,
    pub reviewer: String,
    pub rating: String,
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authored_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authored_at: Option<DateTime<Utc>>,
    /// Store write time; used for ordering, not part of the public shape.
    #[serde(default, skip_serializing)]
    pub collected_at: Option<DateTime<Utc>>,
}

/// The three categorized lists produced by distillation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Findings {
    #[serde(default)]
    pub positives: Vec<String>,
    #[serde(default)]
    pub negatives: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl Findings {
    pub fn is_empty(&self) -> bool {
        self.positives.is_empty() && self.negatives.is_empty() && self.recommendations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub subject: String,
    #[serde(default)]
    pub findings: Findings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scraped: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScrapeState {
    Initializing,
    Processing,
    Completed,
    Error,
}

impl ScrapeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeStatus {
    pub subject: String,
    pub run_id: String,
    pub status: ScrapeState,
    pub message: String,
    pub total_reviews: usize,
    pub processed_reviews: usize,
    /// Set when the reveal loop hit its iteration cap while the list was still growing.
    #[serde(default)]
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary_error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}
