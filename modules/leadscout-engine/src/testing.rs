//! In-memory doubles for the capability traits. Deterministic: no network,
//! no database.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use leadscout_common::{
    Agent, AnalysisResult, CandidatePost, CommentThread, NewLead, ProgressEvent, ProgressSink,
    RunStatus, ScheduleConfig, ScheduleInterval, ScheduledRun,
};
use leadscout_store::ClosedRunHistory;

use crate::dispatcher::RunOutcome;
use crate::notify::backend::NotifyBackend;
use crate::traits::{ContentSource, LeadStore, RelevanceAnalyzer};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn make_agent(keywords: &[&str], relevance_threshold: i32) -> Agent {
    Agent {
        id: Uuid::new_v4(),
        owner_id: Uuid::new_v4(),
        description: "We sell project tracking software for small teams".to_string(),
        active: true,
        relevance_threshold,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        schedule: ScheduleConfig {
            enabled: true,
            interval: ScheduleInterval::Hourly,
            start_time: "00:00".parse().unwrap(),
        },
        last_run_at: None,
        run_count: 0,
        runs_today: 0,
    }
}

pub fn make_post(id: &str, title: &str, body: &str) -> CandidatePost {
    CandidatePost {
        id: id.to_string(),
        title: title.to_string(),
        body: body.to_string(),
        author: "poster".to_string(),
        subreddit: "smallbusiness".to_string(),
        score: 10,
        num_comments: 2,
        permalink: format!("/r/smallbusiness/comments/{id}/"),
        created_at: Utc::now(),
    }
}

// ---------------------------------------------------------------------------
// StaticSource
// ---------------------------------------------------------------------------

/// Canned search results and reply threads, keyed by query and post id.
#[derive(Default)]
pub struct StaticSource {
    pub posts: HashMap<String, Vec<CandidatePost>>,
    pub replies: HashMap<String, Vec<String>>,
    pub fail_queries: HashSet<String>,
    pub fail_replies: HashSet<String>,
}

#[async_trait]
impl ContentSource for StaticSource {
    async fn search(&self, query: &str, _limit: u32, _timeframe: &str) -> Result<Vec<CandidatePost>> {
        if self.fail_queries.contains(query) {
            return Err(anyhow!("search failed for '{query}'"));
        }
        Ok(self.posts.get(query).cloned().unwrap_or_default())
    }

    async fn fetch_replies(&self, post_id: &str) -> Result<CommentThread> {
        if self.fail_replies.contains(post_id) {
            return Err(anyhow!("reply fetch failed for '{post_id}'"));
        }
        Ok(CommentThread {
            replies: self.replies.get(post_id).cloned().unwrap_or_default(),
        })
    }
}

/// Source whose search never resolves. For timeout tests.
pub struct StalledSource;

#[async_trait]
impl ContentSource for StalledSource {
    async fn search(&self, _query: &str, _limit: u32, _timeframe: &str) -> Result<Vec<CandidatePost>> {
        futures::future::pending().await
    }

    async fn fetch_replies(&self, _post_id: &str) -> Result<CommentThread> {
        futures::future::pending().await
    }
}

// ---------------------------------------------------------------------------
// ScriptedAnalyzer
// ---------------------------------------------------------------------------

/// Returns the scripted result whose needle appears in the analyzed content;
/// anything unscripted scores zero (the parse fail-safe shape).
#[derive(Default)]
pub struct ScriptedAnalyzer {
    pub scripts: Vec<(String, AnalysisResult)>,
    pub fail: bool,
}

impl ScriptedAnalyzer {
    pub fn scoring(needle: &str, relevance_score: i32) -> Self {
        Self {
            scripts: vec![(
                needle.to_string(),
                AnalysisResult {
                    relevance_score,
                    matched_keywords: vec![needle.to_string()],
                    sentiment_score: 0,
                },
            )],
            fail: false,
        }
    }
}

#[async_trait]
impl RelevanceAnalyzer for ScriptedAnalyzer {
    async fn analyze(
        &self,
        content: &str,
        _keywords: &[String],
        _business_description: &str,
    ) -> Result<AnalysisResult> {
        if self.fail {
            return Err(anyhow!("analyzer unavailable"));
        }
        Ok(self
            .scripts
            .iter()
            .find(|(needle, _)| content.contains(needle))
            .map(|(_, result)| result.clone())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryState {
    pub agents: HashMap<Uuid, Agent>,
    pub leads: Vec<(Uuid, NewLead)>,
    pub runs: HashMap<Uuid, ScheduledRun>,
    pub history: HashMap<Uuid, (Uuid, DateTime<Utc>, Option<ClosedRunHistory>)>,
}

/// In-memory `LeadStore` enforcing the same invariants as the schema: the
/// `(agent_id, platform_post_id)` unique key and monotonic run status.
#[derive(Default)]
pub struct MemoryStore {
    pub state: Mutex<MemoryState>,
    pub fail_increment: bool,
}

impl MemoryStore {
    pub fn with_agent(agent: Agent) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().agents.insert(agent.id, agent);
        store
    }

    pub fn lead_count(&self) -> usize {
        self.state.lock().unwrap().leads.len()
    }

    pub fn run_status(&self, run_id: Uuid) -> Option<RunStatus> {
        self.state.lock().unwrap().runs.get(&run_id).map(|r| r.status)
    }

    pub fn agent_run_count(&self, agent_id: Uuid) -> i64 {
        self.state.lock().unwrap().agents[&agent_id].run_count
    }

    pub fn history_count(&self) -> usize {
        self.state.lock().unwrap().history.len()
    }

    pub fn closed_history(&self) -> Vec<ClosedRunHistory> {
        self.state
            .lock()
            .unwrap()
            .history
            .values()
            .filter_map(|(_, _, closed)| closed.clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .runs
            .values()
            .filter(|r| r.status == RunStatus::Pending)
            .count()
    }
}

#[async_trait]
impl LeadStore for MemoryStore {
    async fn active_agents(&self) -> Result<Vec<Agent>> {
        let state = self.state.lock().unwrap();
        Ok(state.agents.values().filter(|a| a.active).cloned().collect())
    }

    async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>> {
        Ok(self.state.lock().unwrap().agents.get(&id).cloned())
    }

    async fn increment_agent_run_stats(&self, agent_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        if self.fail_increment {
            return Err(anyhow!("agent update unavailable"));
        }
        let mut state = self.state.lock().unwrap();
        let agent = state
            .agents
            .get_mut(&agent_id)
            .ok_or_else(|| anyhow!("agent {agent_id} not found"))?;
        agent.run_count += 1;
        agent.runs_today += 1;
        agent.last_run_at = Some(now);
        Ok(())
    }

    async fn reset_daily_counters(&self) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let mut changed = 0;
        for agent in state.agents.values_mut() {
            if agent.runs_today != 0 {
                agent.runs_today = 0;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn lead_exists(&self, agent_id: Uuid, platform_post_id: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state
            .leads
            .iter()
            .any(|(_, l)| l.agent_id == agent_id && l.platform_post_id == platform_post_id))
    }

    async fn insert_lead(&self, lead: &NewLead) -> Result<Uuid> {
        let mut state = self.state.lock().unwrap();
        if state
            .leads
            .iter()
            .any(|(_, l)| l.agent_id == lead.agent_id && l.platform_post_id == lead.platform_post_id)
        {
            return Err(anyhow!(
                "duplicate lead ({}, {})",
                lead.agent_id,
                lead.platform_post_id
            ));
        }
        let id = Uuid::new_v4();
        state.leads.push((id, lead.clone()));
        Ok(id)
    }

    async fn pending_run_exists(
        &self,
        agent_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(state.runs.values().any(|r| {
            r.agent_id == agent_id
                && r.status == RunStatus::Pending
                && r.scheduled_for >= from
                && r.scheduled_for < to
        }))
    }

    async fn insert_scheduled_run(
        &self,
        agent_id: Uuid,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Uuid> {
        let mut state = self.state.lock().unwrap();
        let id = Uuid::new_v4();
        state.runs.insert(
            id,
            ScheduledRun {
                id,
                agent_id,
                scheduled_for,
                status: RunStatus::Pending,
                result_summary: None,
            },
        );
        Ok(id)
    }

    async fn claim_pending_runs(&self, now: DateTime<Utc>, batch: u32) -> Result<Vec<ScheduledRun>> {
        let mut state = self.state.lock().unwrap();
        let mut due: Vec<Uuid> = state
            .runs
            .values()
            .filter(|r| r.status == RunStatus::Pending && r.scheduled_for <= now)
            .map(|r| r.id)
            .collect();
        due.sort_by_key(|id| state.runs[id].scheduled_for);
        due.truncate(batch as usize);

        let mut claimed = Vec::new();
        for id in due {
            let run = state.runs.get_mut(&id).unwrap();
            run.status = RunStatus::Processing;
            claimed.push(run.clone());
        }
        Ok(claimed)
    }

    async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        summary: Option<&str>,
    ) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(run) = state.runs.get_mut(&run_id) {
            // Same guard as the SQL: only a processing run may move on.
            if run.status == RunStatus::Processing {
                run.status = status;
                run.result_summary = summary.map(|s| s.to_string());
            }
        }
        Ok(())
    }

    async fn insert_run_history(&self, agent_id: Uuid, started_at: DateTime<Utc>) -> Result<Uuid> {
        let mut state = self.state.lock().unwrap();
        let id = Uuid::new_v4();
        state.history.insert(id, (agent_id, started_at, None));
        Ok(id)
    }

    async fn update_run_history(&self, history_id: Uuid, closed: &ClosedRunHistory) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .history
            .get_mut(&history_id)
            .ok_or_else(|| anyhow!("run history {history_id} not found"))?;
        entry.2 = Some(closed.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecordingNotifier / CollectingSink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    pub outcomes: Mutex<Vec<RunOutcome>>,
    pub fail: bool,
}

#[async_trait]
impl NotifyBackend for RecordingNotifier {
    async fn notify_run_outcome(&self, outcome: &RunOutcome) -> Result<()> {
        self.outcomes.lock().unwrap().push(outcome.clone());
        if self.fail {
            return Err(anyhow!("webhook unreachable"));
        }
        Ok(())
    }
}

/// Progress sink that records every emitted event.
#[derive(Default)]
pub struct CollectingSink {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}
