use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use super::backend::NotifyBackend;
use crate::dispatcher::RunOutcome;

/// Slack incoming webhook notification backend.
pub struct SlackWebhook {
    webhook_url: String,
    http: reqwest::Client,
}

impl SlackWebhook {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            http: reqwest::Client::new(),
        }
    }

    async fn post(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        let resp = self
            .http
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Slack webhook returned non-success");
            anyhow::bail!("Slack webhook returned {status}");
        }

        Ok(())
    }
}

#[async_trait]
impl NotifyBackend for SlackWebhook {
    async fn notify_run_outcome(&self, outcome: &RunOutcome) -> anyhow::Result<()> {
        let emoji = if outcome.success {
            ":mag:"
        } else {
            ":rotating_light:"
        };
        let mut text = format!(
            "{emoji} *Lead Scout Run {}*\n\
             *Agent:* `{}`\n\
             *Run:* `{}`\n\
             {}\n\
             _{} leads stored across {} keywords_",
            if outcome.success { "Complete" } else { "Failed" },
            outcome.agent_id,
            outcome.run_id,
            outcome.summary,
            outcome.results_count,
            outcome.processed_keywords,
        );
        if let Some(error) = &outcome.error {
            text.push_str(&format!("\n*Error:* {error}"));
        }

        let payload = json!({
            "text": text,
            "unfurl_links": false,
        });

        self.post(payload).await
    }
}
