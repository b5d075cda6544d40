use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schedule::ScheduleConfig;

/// A user-owned monitoring configuration: what to search for and how often.
#[derive(Debug, Clone)]
pub struct Agent {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Free-text description of the business, used to steer relevance judgment.
    pub description: String,
    pub active: bool,
    /// Minimum relevance score (0-100, inclusive) for a candidate to be stored.
    pub relevance_threshold: i32,
    pub keywords: Vec<String>,
    pub schedule: ScheduleConfig,
    pub last_run_at: Option<DateTime<Utc>>,
    pub run_count: i64,
    pub runs_today: i32,
}

/// A single piece of content returned by a platform search, not yet analyzed.
/// Transient — never persisted directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidatePost {
    /// Platform-native post id.
    pub id: String,
    pub title: String,
    pub body: String,
    pub author: String,
    pub subreddit: String,
    /// Platform engagement score (upvotes).
    pub score: i64,
    pub num_comments: u32,
    pub permalink: String,
    pub created_at: DateTime<Utc>,
}

/// Ordered reply bodies for a candidate post. Transient.
#[derive(Debug, Clone, Default)]
pub struct CommentThread {
    pub replies: Vec<String>,
}

impl CommentThread {
    pub fn top_reply(&self) -> Option<&str> {
        self.replies.first().map(String::as_str)
    }
}

/// Output of one relevance analysis. A zero-valued result is the fail-safe
/// for unparseable model output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// 0-100 estimate of topical match to the business.
    pub relevance_score: i32,
    pub matched_keywords: Vec<String>,
    /// Signed sentiment estimate (negative = critical, positive = favorable).
    pub sentiment_score: i32,
}

/// A lead about to be stored, keyed by `(agent_id, platform_post_id)`.
#[derive(Debug, Clone)]
pub struct NewLead {
    pub agent_id: Uuid,
    pub platform_post_id: String,
    pub content: String,
    pub author: String,
    pub engagement_score: i64,
    pub matched_keywords: Vec<String>,
    pub relevance_score: i32,
    pub sentiment_score: i32,
}

/// Lifecycle of a scheduled run. Transitions are monotonic:
/// pending → processing → {completed | failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = crate::LeadScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "processing" => Ok(RunStatus::Processing),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(crate::LeadScoutError::Validation(format!(
                "unknown run status '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued/executing/finished invocation of an agent's pipeline across
/// all its keywords.
#[derive(Debug, Clone)]
pub struct ScheduledRun {
    pub id: Uuid,
    pub agent_id: Uuid,
    pub scheduled_for: DateTime<Utc>,
    pub status: RunStatus,
    pub result_summary: Option<String>,
}

/// One entry in a run's ordered step log, persisted as JSONB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStep {
    pub seq: u32,
    pub ts: DateTime<Utc>,
    pub message: String,
}
