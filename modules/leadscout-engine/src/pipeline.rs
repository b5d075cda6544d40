//! The discovery state machine: search → dedup → fetch thread → analyze →
//! relevance gate → store, one keyword at a time.
//!
//! The "pick next candidate" loop is an index cursor over the in-memory
//! candidate arena, not recursion, so memory is bounded and each transition
//! is a plain loop iteration.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use leadscout_common::{
    AnalysisResult, CandidatePost, CommentThread, NewLead, PipelineStep, ProgressEvent,
    ProgressSink, StepStatus,
};

use crate::traits::{ContentSource, LeadStore, RelevanceAnalyzer};

/// One pipeline invocation: a single keyword for a single agent.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub agent_id: Uuid,
    pub query: String,
    pub relevance_threshold: i32,
    /// The agent's full keyword set, handed to the analyzer for matching.
    pub keywords: Vec<String>,
    /// Free-text business description steering the relevance judgment.
    pub business_context: String,
    pub search_limit: u32,
    pub search_timeframe: String,
}

#[derive(Debug, Default)]
pub struct PipelineOutcome {
    pub results: Vec<CandidateOutcome>,
    pub stored_lead_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CandidateOutcome {
    pub platform_post_id: String,
    pub title: String,
    pub disposition: Disposition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Disposition {
    Stored { lead_id: Uuid, relevance_score: i32 },
    Duplicate,
    BelowThreshold { relevance_score: i32 },
}

enum State {
    SearchPosts,
    PickPost,
    FetchComments { post: CandidatePost },
    Analyze { post: CandidatePost, thread: CommentThread },
    CheckRelevance { post: CandidatePost, analysis: AnalysisResult },
    StoreLead { post: CandidatePost, analysis: AnalysisResult },
    End,
}

fn emit(
    progress: &dyn ProgressSink,
    step: PipelineStep,
    status: StepStatus,
    message: String,
    progress_percent: u8,
) {
    progress.emit(ProgressEvent {
        step,
        status,
        message,
        detail: None,
        progress_percent,
    });
}

pub struct DiscoveryPipeline {
    source: Arc<dyn ContentSource>,
    analyzer: Arc<dyn RelevanceAnalyzer>,
    store: Arc<dyn LeadStore>,
}

impl DiscoveryPipeline {
    pub fn new(
        source: Arc<dyn ContentSource>,
        analyzer: Arc<dyn RelevanceAnalyzer>,
        store: Arc<dyn LeadStore>,
    ) -> Self {
        Self {
            source,
            analyzer,
            store,
        }
    }

    /// Drive the state machine to completion for one keyword. Adapter
    /// errors propagate to the caller; the dispatcher isolates them per
    /// keyword.
    pub async fn run(
        &self,
        request: &PipelineRequest,
        progress: &dyn ProgressSink,
    ) -> Result<PipelineOutcome> {
        let mut candidates: Vec<CandidatePost> = Vec::new();
        let mut cursor = 0usize;
        let mut outcome = PipelineOutcome::default();
        let mut state = State::SearchPosts;

        loop {
            state = match state {
                State::SearchPosts => {
                    emit(
                        progress,
                        PipelineStep::SearchPosts,
                        StepStatus::Running,
                        format!("Searching for \"{}\"", request.query),
                        0,
                    );
                    candidates = match self
                        .source
                        .search(&request.query, request.search_limit, &request.search_timeframe)
                        .await
                    {
                        Ok(posts) => posts,
                        Err(e) => {
                            emit(
                                progress,
                                PipelineStep::SearchPosts,
                                StepStatus::Error,
                                format!("Search failed: {e}"),
                                0,
                            );
                            return Err(e.context(format!("search failed for '{}'", request.query)));
                        }
                    };
                    emit(
                        progress,
                        PipelineStep::SearchPosts,
                        StepStatus::Completed,
                        format!("Found {} candidate posts", candidates.len()),
                        5,
                    );
                    if candidates.is_empty() {
                        State::End
                    } else {
                        State::PickPost
                    }
                }

                State::PickPost => {
                    if cursor >= candidates.len() {
                        State::End
                    } else {
                        let post = candidates[cursor].clone();
                        cursor += 1;
                        if self.store.lead_exists(request.agent_id, &post.id).await? {
                            // Dedup hit is a normal skip, not an error.
                            debug!(post_id = post.id.as_str(), "Already stored, skipping");
                            emit(
                                progress,
                                PipelineStep::PickPost,
                                StepStatus::Skipped,
                                format!("Already saved: \"{}\"", post.title),
                                self.percent(cursor, candidates.len()),
                            );
                            outcome.results.push(CandidateOutcome {
                                platform_post_id: post.id,
                                title: post.title,
                                disposition: Disposition::Duplicate,
                            });
                            State::PickPost
                        } else {
                            emit(
                                progress,
                                PipelineStep::PickPost,
                                StepStatus::Completed,
                                format!("Examining \"{}\"", post.title),
                                self.percent(cursor, candidates.len()),
                            );
                            State::FetchComments { post }
                        }
                    }
                }

                State::FetchComments { post } => {
                    emit(
                        progress,
                        PipelineStep::FetchComments,
                        StepStatus::Running,
                        format!("Fetching replies for \"{}\"", post.title),
                        self.percent(cursor, candidates.len()),
                    );
                    let thread = match self.source.fetch_replies(&post.id).await {
                        Ok(thread) => thread,
                        Err(e) => {
                            emit(
                                progress,
                                PipelineStep::FetchComments,
                                StepStatus::Error,
                                format!("Reply fetch failed: {e}"),
                                self.percent(cursor, candidates.len()),
                            );
                            return Err(
                                e.context(format!("reply fetch failed for post '{}'", post.id))
                            );
                        }
                    };
                    emit(
                        progress,
                        PipelineStep::FetchComments,
                        StepStatus::Completed,
                        format!("Fetched {} replies", thread.replies.len()),
                        self.percent(cursor, candidates.len()),
                    );
                    State::Analyze { post, thread }
                }

                State::Analyze { post, thread } => {
                    emit(
                        progress,
                        PipelineStep::Analyze,
                        StepStatus::Running,
                        "Scoring relevance".to_string(),
                        self.percent(cursor, candidates.len()),
                    );
                    let mut content = format!("{}\n\n{}", post.title, post.body);
                    if let Some(top) = thread.top_reply() {
                        content.push_str("\n\nTop reply: ");
                        content.push_str(top);
                    }
                    // The analyzer downgrades unparseable model output to a
                    // zero-valued result; only transport failures reach here.
                    let analysis = match self
                        .analyzer
                        .analyze(&content, &request.keywords, &request.business_context)
                        .await
                    {
                        Ok(analysis) => analysis,
                        Err(e) => {
                            emit(
                                progress,
                                PipelineStep::Analyze,
                                StepStatus::Error,
                                format!("Analysis failed: {e}"),
                                self.percent(cursor, candidates.len()),
                            );
                            return Err(e.context(format!("analysis failed for post '{}'", post.id)));
                        }
                    };
                    emit(
                        progress,
                        PipelineStep::Analyze,
                        StepStatus::Completed,
                        format!("Relevance {}", analysis.relevance_score),
                        self.percent(cursor, candidates.len()),
                    );
                    State::CheckRelevance { post, analysis }
                }

                State::CheckRelevance { post, analysis } => {
                    // Threshold-inclusive gate.
                    if analysis.relevance_score >= request.relevance_threshold {
                        emit(
                            progress,
                            PipelineStep::CheckRelevance,
                            StepStatus::Completed,
                            format!(
                                "Relevant ({} >= {})",
                                analysis.relevance_score, request.relevance_threshold
                            ),
                            self.percent(cursor, candidates.len()),
                        );
                        State::StoreLead { post, analysis }
                    } else {
                        emit(
                            progress,
                            PipelineStep::CheckRelevance,
                            StepStatus::Skipped,
                            format!(
                                "Below threshold ({} < {})",
                                analysis.relevance_score, request.relevance_threshold
                            ),
                            self.percent(cursor, candidates.len()),
                        );
                        outcome.results.push(CandidateOutcome {
                            platform_post_id: post.id,
                            title: post.title,
                            disposition: Disposition::BelowThreshold {
                                relevance_score: analysis.relevance_score,
                            },
                        });
                        State::PickPost
                    }
                }

                State::StoreLead { post, analysis } => {
                    let lead = NewLead {
                        agent_id: request.agent_id,
                        platform_post_id: post.id.clone(),
                        content: format!("{}\n\n{}", post.title, post.body),
                        author: post.author.clone(),
                        engagement_score: post.score,
                        matched_keywords: analysis.matched_keywords.clone(),
                        relevance_score: analysis.relevance_score,
                        sentiment_score: analysis.sentiment_score,
                    };
                    let lead_id = match self.store.insert_lead(&lead).await {
                        Ok(id) => id,
                        Err(e) => {
                            emit(
                                progress,
                                PipelineStep::StoreLead,
                                StepStatus::Error,
                                format!("Store failed: {e}"),
                                self.percent(cursor, candidates.len()),
                            );
                            return Err(
                                e.context(format!("failed to store lead for post '{}'", post.id))
                            );
                        }
                    };
                    info!(
                        agent_id = %request.agent_id,
                        post_id = post.id.as_str(),
                        relevance = analysis.relevance_score,
                        "Lead stored"
                    );
                    emit(
                        progress,
                        PipelineStep::StoreLead,
                        StepStatus::Completed,
                        format!("Saved lead: \"{}\"", post.title),
                        self.percent(cursor, candidates.len()),
                    );
                    outcome.stored_lead_ids.push(lead_id);
                    outcome.results.push(CandidateOutcome {
                        platform_post_id: post.id,
                        title: post.title,
                        disposition: Disposition::Stored {
                            lead_id,
                            relevance_score: analysis.relevance_score,
                        },
                    });
                    State::PickPost
                }

                State::End => {
                    emit(
                        progress,
                        PipelineStep::End,
                        StepStatus::Completed,
                        format!(
                            "Done: {} stored out of {} candidates",
                            outcome.stored_lead_ids.len(),
                            candidates.len()
                        ),
                        100,
                    );
                    return Ok(outcome);
                }
            };
        }
    }

    /// Map cursor position into the 5-95% band between search and end.
    fn percent(&self, cursor: usize, total: usize) -> u8 {
        if total == 0 {
            return 5;
        }
        (5 + (cursor * 90) / total) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadscout_common::NoopSink;

    use crate::testing::{make_agent, make_post, CollectingSink, ScriptedAnalyzer, StaticSource};
    use crate::testing::MemoryStore;

    fn request(agent_id: Uuid, query: &str, threshold: i32) -> PipelineRequest {
        PipelineRequest {
            agent_id,
            query: query.to_string(),
            relevance_threshold: threshold,
            keywords: vec![query.to_string()],
            business_context: "We sell project tracking software".to_string(),
            search_limit: 10,
            search_timeframe: "day".to_string(),
        }
    }

    fn pipeline(
        source: StaticSource,
        analyzer: ScriptedAnalyzer,
        store: Arc<MemoryStore>,
    ) -> DiscoveryPipeline {
        DiscoveryPipeline::new(Arc::new(source), Arc::new(analyzer), store)
    }

    #[tokio::test]
    async fn relevant_post_becomes_a_lead() {
        let agent = make_agent(&["pricing"], 70);
        let store = Arc::new(MemoryStore::with_agent(agent.clone()));

        let mut source = StaticSource::default();
        source.posts.insert(
            "pricing".to_string(),
            vec![make_post("p1", "What should pricing look like?", "Comparing tools")],
        );
        let analyzer = ScriptedAnalyzer::scoring("pricing", 85);

        let pipeline = pipeline(source, analyzer, store.clone());
        let outcome = pipeline
            .run(&request(agent.id, "pricing", 70), &NoopSink)
            .await
            .unwrap();

        assert_eq!(outcome.stored_lead_ids.len(), 1);
        assert_eq!(outcome.results.len(), 1);
        assert!(matches!(
            outcome.results[0].disposition,
            Disposition::Stored { relevance_score: 85, .. }
        ));
        assert_eq!(store.lead_count(), 1);
    }

    #[tokio::test]
    async fn threshold_is_inclusive() {
        let agent = make_agent(&["pricing"], 70);

        for (score, should_store) in [(70, true), (69, false)] {
            let store = Arc::new(MemoryStore::with_agent(agent.clone()));
            let mut source = StaticSource::default();
            source
                .posts
                .insert("pricing".to_string(), vec![make_post("p1", "pricing question", "")]);
            let analyzer = ScriptedAnalyzer::scoring("pricing", score);

            let pipeline = pipeline(source, analyzer, store.clone());
            let outcome = pipeline
                .run(&request(agent.id, "pricing", 70), &NoopSink)
                .await
                .unwrap();

            assert_eq!(store.lead_count(), usize::from(should_store), "score {score}");
            assert_eq!(outcome.stored_lead_ids.len(), usize::from(should_store));
        }
    }

    #[tokio::test]
    async fn duplicate_post_is_skipped_without_error() {
        let agent = make_agent(&["pricing"], 70);
        let store = Arc::new(MemoryStore::with_agent(agent.clone()));

        let mut source = StaticSource::default();
        source
            .posts
            .insert("pricing".to_string(), vec![make_post("p1", "pricing question", "")]);
        let analyzer = ScriptedAnalyzer::scoring("pricing", 85);
        let pipeline = pipeline(source, analyzer, store.clone());

        // First run stores the lead, second run skips the same post.
        let first = pipeline
            .run(&request(agent.id, "pricing", 70), &NoopSink)
            .await
            .unwrap();
        assert_eq!(first.stored_lead_ids.len(), 1);

        let second = pipeline
            .run(&request(agent.id, "pricing", 70), &NoopSink)
            .await
            .unwrap();
        assert!(second.stored_lead_ids.is_empty());
        assert_eq!(second.results[0].disposition, Disposition::Duplicate);
        assert_eq!(store.lead_count(), 1, "dedup invariant: stored at most once");
    }

    #[tokio::test]
    async fn empty_search_ends_immediately() {
        let agent = make_agent(&["pricing"], 70);
        let store = Arc::new(MemoryStore::with_agent(agent.clone()));
        let pipeline = pipeline(StaticSource::default(), ScriptedAnalyzer::default(), store.clone());

        let sink = CollectingSink::default();
        let outcome = pipeline
            .run(&request(agent.id, "pricing", 70), &sink)
            .await
            .unwrap();

        assert!(outcome.results.is_empty());
        assert_eq!(store.lead_count(), 0);

        let events = sink.events.lock().unwrap();
        assert_eq!(events.last().unwrap().step, PipelineStep::End);
        assert_eq!(events.last().unwrap().progress_percent, 100);
    }

    #[tokio::test]
    async fn zero_comments_still_analyzes() {
        let agent = make_agent(&["pricing"], 70);
        let store = Arc::new(MemoryStore::with_agent(agent.clone()));

        let mut source = StaticSource::default();
        // No replies registered for p1 — thread comes back empty.
        source
            .posts
            .insert("pricing".to_string(), vec![make_post("p1", "pricing question", "body")]);
        let analyzer = ScriptedAnalyzer::scoring("pricing", 90);

        let pipeline = pipeline(source, analyzer, store.clone());
        let outcome = pipeline
            .run(&request(agent.id, "pricing", 70), &NoopSink)
            .await
            .unwrap();
        assert_eq!(outcome.stored_lead_ids.len(), 1);
    }

    #[tokio::test]
    async fn search_failure_propagates() {
        let agent = make_agent(&["pricing"], 70);
        let store = Arc::new(MemoryStore::with_agent(agent.clone()));

        let mut source = StaticSource::default();
        source.fail_queries.insert("pricing".to_string());
        let pipeline = pipeline(source, ScriptedAnalyzer::default(), store);

        let sink = CollectingSink::default();
        let result = pipeline.run(&request(agent.id, "pricing", 70), &sink).await;
        assert!(result.is_err());

        // The failure is announced on the progress channel before it propagates.
        let events = sink.events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.step, PipelineStep::SearchPosts);
        assert_eq!(last.status, StepStatus::Error);
    }

    #[tokio::test]
    async fn reply_fetch_failure_propagates() {
        let agent = make_agent(&["pricing"], 70);
        let store = Arc::new(MemoryStore::with_agent(agent.clone()));

        let mut source = StaticSource::default();
        source
            .posts
            .insert("pricing".to_string(), vec![make_post("p1", "pricing question", "")]);
        source.fail_replies.insert("p1".to_string());
        let pipeline = pipeline(source, ScriptedAnalyzer::scoring("pricing", 85), store.clone());

        let sink = CollectingSink::default();
        let result = pipeline.run(&request(agent.id, "pricing", 70), &sink).await;
        assert!(result.is_err());
        assert_eq!(store.lead_count(), 0);

        let events = sink.events.lock().unwrap();
        let last = events.last().unwrap();
        assert_eq!(last.step, PipelineStep::FetchComments);
        assert_eq!(last.status, StepStatus::Error);
    }

    #[tokio::test]
    async fn zero_relevance_failsafe_rejects_candidate() {
        let agent = make_agent(&["pricing"], 70);
        let store = Arc::new(MemoryStore::with_agent(agent.clone()));

        let mut source = StaticSource::default();
        source
            .posts
            .insert("pricing".to_string(), vec![make_post("p1", "unrelated title", "")]);
        // Nothing scripted for this content — analyzer returns the
        // zero-valued default, mirroring the unparseable-output fail-safe.
        let pipeline = pipeline(source, ScriptedAnalyzer::default(), store.clone());

        let outcome = pipeline
            .run(&request(agent.id, "pricing", 70), &NoopSink)
            .await
            .unwrap();
        assert!(outcome.stored_lead_ids.is_empty());
        assert!(matches!(
            outcome.results[0].disposition,
            Disposition::BelowThreshold { relevance_score: 0 }
        ));
    }

    #[tokio::test]
    async fn mixed_batch_processes_in_order() {
        let agent = make_agent(&["pricing"], 70);
        let store = Arc::new(MemoryStore::with_agent(agent.clone()));

        let mut source = StaticSource::default();
        source.posts.insert(
            "pricing".to_string(),
            vec![
                make_post("p1", "pricing question one", ""),
                make_post("p2", "unrelated chatter", ""),
                make_post("p3", "pricing question two", ""),
            ],
        );
        let analyzer = ScriptedAnalyzer::scoring("pricing", 80);

        let pipeline = pipeline(source, analyzer, store.clone());
        let outcome = pipeline
            .run(&request(agent.id, "pricing", 70), &NoopSink)
            .await
            .unwrap();

        assert_eq!(store.lead_count(), 2);
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.results[0].platform_post_id, "p1");
        assert_eq!(outcome.results[1].platform_post_id, "p2");
        assert_eq!(outcome.results[2].platform_post_id, "p3");
        assert!(matches!(outcome.results[1].disposition, Disposition::BelowThreshold { .. }));
    }
}
