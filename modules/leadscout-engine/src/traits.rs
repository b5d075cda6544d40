// Capability traits the pipeline and dispatcher run against.
//
// ContentSource — platform search + thread fetch (RedditClient in prod).
// RelevanceAnalyzer — content scoring (ClaudeAnalyzer in prod).
// LeadStore — all persistence reads/writes (PgStore in prod).
//
// These enable deterministic testing with the doubles in `testing`:
// no network, no database. `cargo test` in seconds.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use leadscout_common::{
    Agent, AnalysisResult, CandidatePost, CommentThread, NewLead, RunStatus, ScheduledRun,
};
use leadscout_store::{ClosedRunHistory, PgStore};
use reddit_client::RedditClient;

// ---------------------------------------------------------------------------
// ContentSource
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Search the platform for candidate posts matching a query.
    async fn search(&self, query: &str, limit: u32, timeframe: &str) -> Result<Vec<CandidatePost>>;

    /// Fetch the reply thread for a post, in platform order.
    async fn fetch_replies(&self, post_id: &str) -> Result<CommentThread>;
}

#[async_trait]
impl ContentSource for RedditClient {
    async fn search(&self, query: &str, limit: u32, timeframe: &str) -> Result<Vec<CandidatePost>> {
        let posts = self.search(query, limit, timeframe).await?;
        Ok(posts
            .into_iter()
            .map(|p| CandidatePost {
                created_at: Utc
                    .timestamp_opt(p.created_utc as i64, 0)
                    .single()
                    .unwrap_or_else(Utc::now),
                id: p.id,
                title: p.title,
                body: p.selftext,
                author: p.author,
                subreddit: p.subreddit,
                score: p.score,
                num_comments: p.num_comments,
                permalink: p.permalink,
            })
            .collect())
    }

    async fn fetch_replies(&self, post_id: &str) -> Result<CommentThread> {
        let comments = self.fetch_comments(post_id, 20).await?;
        Ok(CommentThread {
            replies: comments.into_iter().map(|c| c.body).collect(),
        })
    }
}

// ---------------------------------------------------------------------------
// RelevanceAnalyzer
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RelevanceAnalyzer: Send + Sync {
    /// Score content against the business's keywords and description.
    /// Implementations must downgrade unparseable model output to a
    /// zero-valued result rather than an error; only transport/API failures
    /// propagate.
    async fn analyze(
        &self,
        content: &str,
        keywords: &[String],
        business_description: &str,
    ) -> Result<AnalysisResult>;
}

// ---------------------------------------------------------------------------
// LeadStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait LeadStore: Send + Sync {
    // --- Agents ---
    async fn active_agents(&self) -> Result<Vec<Agent>>;
    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>>;
    async fn increment_agent_run_stats(&self, agent_id: Uuid, now: DateTime<Utc>) -> Result<()>;
    async fn reset_daily_counters(&self) -> Result<u64>;

    // --- Leads (dedup gate + store step) ---
    async fn lead_exists(&self, agent_id: Uuid, platform_post_id: &str) -> Result<bool>;
    async fn insert_lead(&self, lead: &NewLead) -> Result<Uuid>;

    // --- Scheduled runs ---
    async fn pending_run_exists(
        &self,
        agent_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool>;
    async fn insert_scheduled_run(&self, agent_id: Uuid, scheduled_for: DateTime<Utc>)
        -> Result<Uuid>;
    /// Atomic pending→processing claim of up to `batch` due runs.
    async fn claim_pending_runs(&self, now: DateTime<Utc>, batch: u32) -> Result<Vec<ScheduledRun>>;
    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        summary: Option<&str>,
    ) -> Result<()>;

    // --- Run history ---
    async fn insert_run_history(&self, agent_id: Uuid, started_at: DateTime<Utc>) -> Result<Uuid>;
    async fn update_run_history(&self, history_id: Uuid, closed: &ClosedRunHistory) -> Result<()>;
}

#[async_trait]
impl LeadStore for PgStore {
    async fn active_agents(&self) -> Result<Vec<Agent>> {
        PgStore::active_agents(self).await
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>> {
        PgStore::get_agent(self, id).await
    }

    async fn increment_agent_run_stats(&self, agent_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        PgStore::increment_agent_run_stats(self, agent_id, now).await
    }

    async fn reset_daily_counters(&self) -> Result<u64> {
        PgStore::reset_daily_counters(self).await
    }

    async fn lead_exists(&self, agent_id: Uuid, platform_post_id: &str) -> Result<bool> {
        PgStore::lead_exists(self, agent_id, platform_post_id).await
    }

    async fn insert_lead(&self, lead: &NewLead) -> Result<Uuid> {
        PgStore::insert_lead(self, lead).await
    }

    async fn pending_run_exists(
        &self,
        agent_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool> {
        PgStore::pending_run_exists(self, agent_id, from, to).await
    }

    async fn insert_scheduled_run(
        &self,
        agent_id: Uuid,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Uuid> {
        PgStore::insert_scheduled_run(self, agent_id, scheduled_for).await
    }

    async fn claim_pending_runs(&self, now: DateTime<Utc>, batch: u32) -> Result<Vec<ScheduledRun>> {
        PgStore::claim_pending_runs(self, now, batch).await
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        summary: Option<&str>,
    ) -> Result<()> {
        PgStore::update_run_status(self, run_id, status, summary).await
    }

    async fn insert_run_history(&self, agent_id: Uuid, started_at: DateTime<Utc>) -> Result<Uuid> {
        PgStore::insert_run_history(self, agent_id, started_at).await
    }

    async fn update_run_history(&self, history_id: Uuid, closed: &ClosedRunHistory) -> Result<()> {
        PgStore::update_run_history(self, history_id, closed).await
    }
}
