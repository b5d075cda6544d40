//! Claims due scheduled runs and drives the pipeline once per keyword.
//!
//! Failure containment, smallest unit first: a bad candidate is skipped by
//! the pipeline, a bad keyword is recorded and the remaining keywords still
//! run, and only an error outside the keyword loop fails the whole run.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future;
use tracing::{error, info, warn};
use uuid::Uuid;

use leadscout_common::{LeadScoutError, ProgressSink, RunStatus, RunStep, ScheduledRun};
use leadscout_store::ClosedRunHistory;

use crate::notify::backend::NotifyBackend;
use crate::pipeline::{DiscoveryPipeline, PipelineRequest};
use crate::traits::LeadStore;

/// What happened to one keyword within a run.
#[derive(Debug, Clone)]
pub struct KeywordOutcome {
    pub keyword: String,
    pub success: bool,
    pub stored_lead_ids: Vec<Uuid>,
    pub error: Option<String>,
}

/// Terminal report for one dispatched run, handed to the notifier.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub agent_id: Uuid,
    pub success: bool,
    pub summary: String,
    pub results_count: u32,
    pub processed_keywords: u32,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct DispatchStats {
    pub claimed: u32,
    pub completed: u32,
    pub failed: u32,
    pub leads_stored: u32,
}

impl std::fmt::Display for DispatchStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} claimed, {} completed, {} failed, {} leads stored",
            self.claimed, self.completed, self.failed, self.leads_stored
        )
    }
}

/// Ordered step log accumulated during a run, persisted on the history row.
struct StepLog {
    steps: Vec<RunStep>,
    seq: u32,
}

impl StepLog {
    fn new() -> Self {
        Self {
            steps: Vec::new(),
            seq: 0,
        }
    }

    fn push(&mut self, message: String) {
        self.steps.push(RunStep {
            seq: self.seq,
            ts: Utc::now(),
            message,
        });
        self.seq += 1;
    }
}

struct CompletedRun {
    keyword_outcomes: Vec<KeywordOutcome>,
    leads_stored: u32,
    processed_keywords: u32,
    failed_keywords: u32,
}

impl CompletedRun {
    fn summary(&self) -> String {
        let mut text = format!(
            "{} leads stored across {} keywords",
            self.leads_stored, self.processed_keywords
        );
        if self.failed_keywords > 0 {
            let failed: Vec<&str> = self
                .keyword_outcomes
                .iter()
                .filter(|k| !k.success)
                .map(|k| k.keyword.as_str())
                .collect();
            text.push_str(&format!(" (failed: {})", failed.join(", ")));
        }
        text
    }
}

pub struct RunDispatcher {
    store: Arc<dyn LeadStore>,
    pipeline: DiscoveryPipeline,
    notifier: Arc<dyn NotifyBackend>,
    progress: Arc<dyn ProgressSink>,
    batch_size: u32,
    keyword_timeout: Duration,
    search_limit: u32,
    search_timeframe: String,
}

impl RunDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn LeadStore>,
        pipeline: DiscoveryPipeline,
        notifier: Arc<dyn NotifyBackend>,
        progress: Arc<dyn ProgressSink>,
        batch_size: u32,
        keyword_timeout: Duration,
        search_limit: u32,
        search_timeframe: String,
    ) -> Self {
        Self {
            store,
            pipeline,
            notifier,
            progress,
            batch_size,
            keyword_timeout,
            search_limit,
            search_timeframe,
        }
    }

    /// Claim and execute one batch of due runs. Runs within the batch
    /// execute concurrently; each run's keyword loop is strictly sequential.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<DispatchStats> {
        let runs = self.store.claim_pending_runs(now, self.batch_size).await?;
        let mut stats = DispatchStats {
            claimed: runs.len() as u32,
            ..Default::default()
        };
        if runs.is_empty() {
            return Ok(stats);
        }
        info!(claimed = runs.len(), "Dispatching scheduled runs");

        let outcomes = future::join_all(runs.into_iter().map(|run| self.dispatch_one(run))).await;
        for outcome in outcomes {
            if outcome.success {
                stats.completed += 1;
                stats.leads_stored += outcome.results_count;
            } else {
                stats.failed += 1;
            }
        }
        info!(%stats, "Dispatch tick complete");
        Ok(stats)
    }

    /// Execute one claimed run to its terminal status. Never returns an
    /// error: run-level failures become a `failed` status plus a
    /// notification.
    async fn dispatch_one(&self, run: ScheduledRun) -> RunOutcome {
        let outcome = match self.execute(&run).await {
            Ok(completed) => {
                let summary = completed.summary();
                if let Err(e) = self
                    .store
                    .update_run_status(run.id, RunStatus::Completed, Some(&summary))
                    .await
                {
                    error!(run_id = %run.id, error = %e, "Failed to mark run completed");
                }
                RunOutcome {
                    run_id: run.id,
                    agent_id: run.agent_id,
                    success: true,
                    summary,
                    results_count: completed.leads_stored,
                    processed_keywords: completed.processed_keywords,
                    error: None,
                }
            }
            Err(e) => {
                error!(run_id = %run.id, agent_id = %run.agent_id, error = %e, "Run failed");
                let message = e.to_string();
                if let Err(e2) = self
                    .store
                    .update_run_status(run.id, RunStatus::Failed, Some(&message))
                    .await
                {
                    error!(run_id = %run.id, error = %e2, "Failed to mark run failed");
                }
                RunOutcome {
                    run_id: run.id,
                    agent_id: run.agent_id,
                    success: false,
                    summary: format!("Run failed: {message}"),
                    results_count: 0,
                    processed_keywords: 0,
                    error: Some(message),
                }
            }
        };

        // Notifier failures are logged, never escalated.
        if let Err(e) = self.notifier.notify_run_outcome(&outcome).await {
            warn!(run_id = %run.id, error = %e, "Run notification failed");
        }
        outcome
    }

    async fn execute(&self, run: &ScheduledRun) -> Result<CompletedRun> {
        let agent = self
            .store
            .get_agent(run.agent_id)
            .await?
            .ok_or(LeadScoutError::AgentNotFound(run.agent_id))?;
        if agent.keywords.is_empty() {
            return Err(LeadScoutError::NoKeywords(agent.id).into());
        }

        let history_id = self.store.insert_run_history(agent.id, Utc::now()).await?;
        let mut log = StepLog::new();
        let mut keyword_outcomes = Vec::with_capacity(agent.keywords.len());
        let mut leads_stored = 0u32;
        let mut failed_keywords = 0u32;

        for keyword in &agent.keywords {
            log.push(format!("Processing keyword '{keyword}'"));
            let request = PipelineRequest {
                agent_id: agent.id,
                query: keyword.clone(),
                relevance_threshold: agent.relevance_threshold,
                keywords: agent.keywords.clone(),
                business_context: agent.description.clone(),
                search_limit: self.search_limit,
                search_timeframe: self.search_timeframe.clone(),
            };

            let attempt = tokio::time::timeout(
                self.keyword_timeout,
                self.pipeline.run(&request, self.progress.as_ref()),
            )
            .await;

            match attempt {
                Ok(Ok(outcome)) => {
                    leads_stored += outcome.stored_lead_ids.len() as u32;
                    log.push(format!(
                        "Keyword '{keyword}': {} of {} candidates stored",
                        outcome.stored_lead_ids.len(),
                        outcome.results.len()
                    ));
                    keyword_outcomes.push(KeywordOutcome {
                        keyword: keyword.clone(),
                        success: true,
                        stored_lead_ids: outcome.stored_lead_ids,
                        error: None,
                    });
                }
                Ok(Err(e)) => {
                    warn!(agent_id = %agent.id, keyword, error = %e, "Keyword pipeline failed");
                    log.push(format!("Keyword '{keyword}' failed: {e}"));
                    failed_keywords += 1;
                    keyword_outcomes.push(KeywordOutcome {
                        keyword: keyword.clone(),
                        success: false,
                        stored_lead_ids: Vec::new(),
                        error: Some(e.to_string()),
                    });
                }
                Err(_) => {
                    let secs = self.keyword_timeout.as_secs();
                    warn!(agent_id = %agent.id, keyword, timeout_secs = secs, "Keyword pipeline timed out");
                    log.push(format!("Keyword '{keyword}' timed out after {secs}s"));
                    failed_keywords += 1;
                    keyword_outcomes.push(KeywordOutcome {
                        keyword: keyword.clone(),
                        success: false,
                        stored_lead_ids: Vec::new(),
                        error: Some(format!("timed out after {secs}s")),
                    });
                }
            }
        }

        let processed_keywords = agent.keywords.len() as u32;
        // Exactly once per dispatched run, however many keywords failed.
        // A history row opened above must always be closed, so a store
        // failure here still records a failed closure before propagating.
        if let Err(e) = self
            .store
            .increment_agent_run_stats(agent.id, Utc::now())
            .await
        {
            log.push(format!("Run aborted: {e}"));
            self.close_history(
                history_id,
                false,
                leads_stored as i32,
                processed_keywords as i32,
                log.steps,
            )
            .await;
            return Err(e);
        }
        self.store
            .update_run_history(
                history_id,
                &ClosedRunHistory {
                    completed_at: Utc::now(),
                    success: true,
                    results_count: leads_stored as i32,
                    processed_keywords: processed_keywords as i32,
                    steps: log.steps,
                },
            )
            .await?;

        Ok(CompletedRun {
            keyword_outcomes,
            leads_stored,
            processed_keywords,
            failed_keywords,
        })
    }

    /// Best-effort failed closure of a history row on an abort path.
    async fn close_history(
        &self,
        history_id: Uuid,
        success: bool,
        results_count: i32,
        processed_keywords: i32,
        steps: Vec<RunStep>,
    ) {
        let closed = ClosedRunHistory {
            completed_at: Utc::now(),
            success,
            results_count,
            processed_keywords,
            steps,
        };
        if let Err(e) = self.store.update_run_history(history_id, &closed).await {
            warn!(history_id = %history_id, error = %e, "Failed to close run history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadscout_common::NoopSink;

    use crate::testing::{
        make_agent, make_post, MemoryStore, RecordingNotifier, ScriptedAnalyzer, StalledSource,
        StaticSource,
    };
    use crate::traits::{ContentSource, RelevanceAnalyzer};

    fn dispatcher_with(
        store: Arc<MemoryStore>,
        source: Arc<dyn ContentSource>,
        analyzer: Arc<dyn RelevanceAnalyzer>,
        notifier: Arc<RecordingNotifier>,
    ) -> RunDispatcher {
        let pipeline = DiscoveryPipeline::new(source, analyzer, store.clone());
        RunDispatcher::new(
            store,
            pipeline,
            notifier,
            Arc::new(NoopSink),
            5,
            Duration::from_secs(120),
            10,
            "day".to_string(),
        )
    }

    async fn enqueue(store: &MemoryStore, agent_id: Uuid) -> Uuid {
        store
            .insert_scheduled_run(agent_id, Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn successful_run_completes_and_counts() {
        let agent = make_agent(&["pricing"], 70);
        let agent_id = agent.id;
        let store = Arc::new(MemoryStore::with_agent(agent));
        let run_id = enqueue(&store, agent_id).await;

        let mut source = StaticSource::default();
        source
            .posts
            .insert("pricing".to_string(), vec![make_post("p1", "pricing question", "")]);
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher_with(
            store.clone(),
            Arc::new(source),
            Arc::new(ScriptedAnalyzer::scoring("pricing", 85)),
            notifier.clone(),
        );

        let stats = dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(stats.claimed, 1);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.leads_stored, 1);

        assert_eq!(store.run_status(run_id), Some(RunStatus::Completed));
        assert_eq!(store.agent_run_count(agent_id), 1);
        assert_eq!(store.lead_count(), 1);

        let outcomes = notifier.outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].results_count, 1);
    }

    #[tokio::test]
    async fn duplicate_candidate_completes_with_zero_results() {
        let agent = make_agent(&["pricing"], 70);
        let agent_id = agent.id;
        let store = Arc::new(MemoryStore::with_agent(agent));

        let mut source = StaticSource::default();
        source
            .posts
            .insert("pricing".to_string(), vec![make_post("p1", "pricing question", "")]);
        let source = Arc::new(source);
        let analyzer = Arc::new(ScriptedAnalyzer::scoring("pricing", 85));
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher_with(store.clone(), source, analyzer, notifier.clone());

        // First dispatch stores the lead.
        enqueue(&store, agent_id).await;
        dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(store.lead_count(), 1);

        // Second dispatch sees the same post and stores nothing, no error.
        let run_id = enqueue(&store, agent_id).await;
        let stats = dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.leads_stored, 0);
        assert_eq!(store.run_status(run_id), Some(RunStatus::Completed));
        assert_eq!(store.lead_count(), 1);
    }

    #[tokio::test]
    async fn keyword_failure_does_not_abort_remaining_keywords() {
        let agent = make_agent(&["a", "b", "c"], 70);
        let agent_id = agent.id;
        let store = Arc::new(MemoryStore::with_agent(agent));
        let run_id = enqueue(&store, agent_id).await;

        let mut source = StaticSource::default();
        source.fail_queries.insert("b".to_string());
        source
            .posts
            .insert("a".to_string(), vec![make_post("p1", "about a", "")]);
        source
            .posts
            .insert("c".to_string(), vec![make_post("p2", "about c", "")]);
        let analyzer = ScriptedAnalyzer {
            scripts: vec![
                (
                    "about a".to_string(),
                    leadscout_common::AnalysisResult {
                        relevance_score: 90,
                        matched_keywords: vec!["a".to_string()],
                        sentiment_score: 0,
                    },
                ),
                (
                    "about c".to_string(),
                    leadscout_common::AnalysisResult {
                        relevance_score: 90,
                        matched_keywords: vec!["c".to_string()],
                        sentiment_score: 0,
                    },
                ),
            ],
            fail: false,
        };
        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher =
            dispatcher_with(store.clone(), Arc::new(source), Arc::new(analyzer), notifier.clone());

        let stats = dispatcher.tick(Utc::now()).await.unwrap();

        // The run completes despite keyword "b" failing; "a" and "c" leads land.
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(store.run_status(run_id), Some(RunStatus::Completed));
        assert_eq!(store.lead_count(), 2);
        assert_eq!(store.agent_run_count(agent_id), 1);

        let outcomes = notifier.outcomes.lock().unwrap();
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].processed_keywords, 3);
    }

    #[tokio::test]
    async fn agent_with_no_keywords_fails_the_run() {
        let agent = make_agent(&[], 70);
        let agent_id = agent.id;
        let store = Arc::new(MemoryStore::with_agent(agent));
        let run_id = enqueue(&store, agent_id).await;

        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher_with(
            store.clone(),
            Arc::new(StaticSource::default()),
            Arc::new(ScriptedAnalyzer::default()),
            notifier.clone(),
        );

        let stats = dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(store.run_status(run_id), Some(RunStatus::Failed));
        // Run count only moves for runs that reach the keyword loop's end.
        assert_eq!(store.agent_run_count(agent_id), 0);

        let outcomes = notifier.outcomes.lock().unwrap();
        assert!(!outcomes[0].success);
        assert!(outcomes[0].error.as_deref().unwrap().contains("no keywords"));
    }

    #[tokio::test]
    async fn missing_agent_fails_the_run() {
        let store = Arc::new(MemoryStore::default());
        let orphan_agent = Uuid::new_v4();
        let run_id = enqueue(&store, orphan_agent).await;

        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher_with(
            store.clone(),
            Arc::new(StaticSource::default()),
            Arc::new(ScriptedAnalyzer::default()),
            notifier.clone(),
        );

        dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(store.run_status(run_id), Some(RunStatus::Failed));
        assert!(!notifier.outcomes.lock().unwrap()[0].success);
    }

    #[tokio::test]
    async fn notifier_failure_does_not_change_run_status() {
        let agent = make_agent(&["pricing"], 70);
        let agent_id = agent.id;
        let store = Arc::new(MemoryStore::with_agent(agent));
        let run_id = enqueue(&store, agent_id).await;

        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let dispatcher = dispatcher_with(
            store.clone(),
            Arc::new(StaticSource::default()),
            Arc::new(ScriptedAnalyzer::default()),
            notifier.clone(),
        );

        let stats = dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(store.run_status(run_id), Some(RunStatus::Completed));
        assert_eq!(notifier.outcomes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn store_failure_after_open_still_closes_history() {
        let agent = make_agent(&["pricing"], 70);
        let agent_id = agent.id;
        let mut store = MemoryStore::with_agent(agent);
        store.fail_increment = true;
        let store = Arc::new(store);
        let run_id = enqueue(&store, agent_id).await;

        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher_with(
            store.clone(),
            Arc::new(StaticSource::default()),
            Arc::new(ScriptedAnalyzer::default()),
            notifier.clone(),
        );

        let stats = dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(store.run_status(run_id), Some(RunStatus::Failed));

        // The history row opened for the run is closed as unsuccessful,
        // never left dangling with open-ended bookkeeping.
        assert_eq!(store.history_count(), 1);
        let closed = store.closed_history();
        assert_eq!(closed.len(), 1);
        assert!(!closed[0].success);
        assert_eq!(closed[0].processed_keywords, 1);
    }

    #[tokio::test]
    async fn terminal_runs_are_never_reclaimed() {
        let agent = make_agent(&["pricing"], 70);
        let agent_id = agent.id;
        let store = Arc::new(MemoryStore::with_agent(agent));
        enqueue(&store, agent_id).await;

        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher_with(
            store.clone(),
            Arc::new(StaticSource::default()),
            Arc::new(ScriptedAnalyzer::default()),
            notifier.clone(),
        );

        dispatcher.tick(Utc::now()).await.unwrap();
        // A second tick finds nothing to claim: the run is terminal.
        let stats = dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(stats.claimed, 0);
        assert_eq!(store.agent_run_count(agent_id), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_keyword_times_out_as_a_keyword_failure() {
        let agent = make_agent(&["pricing"], 70);
        let agent_id = agent.id;
        let store = Arc::new(MemoryStore::with_agent(agent));
        let run_id = enqueue(&store, agent_id).await;

        let notifier = Arc::new(RecordingNotifier::default());
        let dispatcher = dispatcher_with(
            store.clone(),
            Arc::new(StalledSource),
            Arc::new(ScriptedAnalyzer::default()),
            notifier.clone(),
        );

        // Paused clock auto-advances past the 120s keyword timeout.
        let stats = dispatcher.tick(Utc::now()).await.unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(store.run_status(run_id), Some(RunStatus::Completed));
        assert_eq!(store.agent_run_count(agent_id), 1);
        assert_eq!(store.lead_count(), 0);
    }
}
