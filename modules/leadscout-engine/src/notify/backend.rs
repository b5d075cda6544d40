use async_trait::async_trait;

use crate::dispatcher::RunOutcome;

/// Pluggable notification backend for run outcomes.
#[async_trait]
pub trait NotifyBackend: Send + Sync {
    /// Report the terminal outcome of one dispatched run.
    async fn notify_run_outcome(&self, outcome: &RunOutcome) -> anyhow::Result<()>;
}
