use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use leadscout_common::{Config, NoopSink};
use leadscout_engine::{
    analyzer::ClaudeAnalyzer,
    dispatcher::RunDispatcher,
    notify::{backend::NotifyBackend, noop::NoopBackend, slack::SlackWebhook},
    pipeline::DiscoveryPipeline,
    scheduler::ScheduleTick,
    service::SchedulerService,
    traits::{ContentSource, LeadStore, RelevanceAnalyzer},
};
use leadscout_store::{migrate::migrate, PgStore};
use reddit_client::RedditClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("leadscout=info".parse()?))
        .init();

    info!("Lead Scout starting...");

    // Load config
    let config = Config::from_env();
    config.log_redacted();

    // Connect to Postgres and run migrations (idempotent)
    let pool = leadscout_store::connect(&config.database_url).await?;
    migrate(&pool).await?;

    let store: Arc<dyn LeadStore> = Arc::new(PgStore::new(pool));
    let source: Arc<dyn ContentSource> = Arc::new(RedditClient::new(&config.reddit_user_agent));
    let analyzer: Arc<dyn RelevanceAnalyzer> = Arc::new(ClaudeAnalyzer::new(
        &config.anthropic_api_key,
        &config.anthropic_model,
    ));

    // Build notification backend: Slack if configured, otherwise Noop
    let notifier: Arc<dyn NotifyBackend> = match &config.slack_webhook_url {
        Some(url) => {
            info!("Slack notifications enabled");
            Arc::new(SlackWebhook::new(url.clone()))
        }
        None => {
            info!("No SLACK_WEBHOOK_URL set, notifications disabled");
            Arc::new(NoopBackend)
        }
    };

    let pipeline = DiscoveryPipeline::new(source, analyzer, store.clone());
    let dispatcher = RunDispatcher::new(
        store.clone(),
        pipeline,
        notifier,
        Arc::new(NoopSink),
        config.dispatch_batch_size,
        Duration::from_secs(config.keyword_timeout_secs),
        config.search_limit,
        config.search_timeframe.clone(),
    );
    let scheduler = ScheduleTick::new(store.clone());

    let mut service = SchedulerService::new(
        scheduler,
        dispatcher,
        store,
        Duration::from_secs(config.tick_interval_secs),
    );
    service.initialize();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    service.shutdown().await?;

    Ok(())
}
