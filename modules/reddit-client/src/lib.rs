//! Client for Reddit's public JSON endpoints: keyword search over
//! submissions and top-level comment fetch for a thread. No OAuth — the
//! read-only `.json` endpoints only require a descriptive User-Agent.

pub mod error;
pub mod types;

pub use error::{RedditError, Result};
pub use types::{RedditComment, RedditPost};

use types::Listing;

const BASE_URL: &str = "https://www.reddit.com";

pub struct RedditClient {
    client: reqwest::Client,
    user_agent: String,
    base_url: String,
}

impl RedditClient {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            user_agent: user_agent.into(),
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Search submissions site-wide, newest first.
    /// `timeframe` is Reddit's `t` parameter: hour, day, week, month, year, all.
    pub async fn search(&self, query: &str, limit: u32, timeframe: &str) -> Result<Vec<RedditPost>> {
        let url = format!("{}/search.json", self.base_url);
        let limit = limit.to_string();
        let resp = self
            .client
            .get(&url)
            .header("User-Agent", &self.user_agent)
            .query(&[
                ("q", query),
                ("limit", limit.as_str()),
                ("sort", "new"),
                ("t", timeframe),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RedditError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let listing: Listing<RedditPost> = resp.json().await?;
        let posts: Vec<RedditPost> = listing.data.children.into_iter().map(|t| t.data).collect();
        tracing::debug!(query, count = posts.len(), "Reddit search complete");
        Ok(posts)
    }

    /// Fetch a submission's top-level comments in listing order.
    pub async fn fetch_comments(&self, post_id: &str, limit: u32) -> Result<Vec<RedditComment>> {
        let url = format!("{}/comments/{}.json", self.base_url, post_id);
        let limit = limit.to_string();
        let resp = self
            .client
            .get(&url)
            .header("User-Agent", &self.user_agent)
            .query(&[("limit", limit.as_str()), ("depth", "1")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RedditError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        // The endpoint returns [submission listing, comment listing].
        let payload: serde_json::Value = resp.json().await?;
        let comment_listing = payload
            .get(1)
            .cloned()
            .ok_or_else(|| RedditError::Parse("missing comment listing".to_string()))?;
        let listing: Listing<RedditComment> = serde_json::from_value(comment_listing)?;

        let comments: Vec<RedditComment> = listing
            .data
            .children
            .into_iter()
            .map(|t| t.data)
            .filter(|c| !c.body.is_empty())
            .collect();
        tracing::debug!(post_id, count = comments.len(), "Fetched comments");
        Ok(comments)
    }
}
