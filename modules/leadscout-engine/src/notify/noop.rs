use async_trait::async_trait;

use super::backend::NotifyBackend;
use crate::dispatcher::RunOutcome;

/// No-op notification backend for deployments without a webhook.
pub struct NoopBackend;

#[async_trait]
impl NotifyBackend for NoopBackend {
    async fn notify_run_outcome(&self, _outcome: &RunOutcome) -> anyhow::Result<()> {
        Ok(())
    }
}
