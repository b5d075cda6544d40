use anyhow::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{info, warn};

use leadscout_common::AnalysisResult;
use llm_client::{Claude, LlmError};

use crate::traits::RelevanceAnalyzer;

/// What the LLM returns for one analyzed post.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct AnalysisResponse {
    /// 0-100 estimate of how relevant this content is to the business.
    #[serde(default)]
    pub relevance_score: i32,
    /// Business keywords actually present or paraphrased in the content.
    #[serde(default)]
    pub matched_keywords: Vec<String>,
    /// Signed sentiment: negative = critical, 0 = neutral, positive = favorable.
    #[serde(default)]
    pub sentiment_score: i32,
}

const ANALYSIS_SYSTEM_PROMPT: &str = r#"You score social-content posts for a business doing lead discovery.

You are given a business description, the business's keywords, and the text of one post (title, body, and its top reply).

Report:
- relevance_score: 0-100. How likely is the post author (or thread) a potential customer or a conversation the business should join? 0 = unrelated, 100 = an explicit request for exactly what the business offers. Mentioning a keyword in passing is low relevance; asking for recommendations, complaining about a competitor, or describing the exact problem the business solves is high relevance.
- matched_keywords: the subset of the business keywords the content actually touches (verbatim or close paraphrase). Empty if none.
- sentiment_score: the post's sentiment toward the topic, as a signed integer (roughly -100 to 100).

Score the content as given. Do not invent keywords that are not in the list."#;

pub struct ClaudeAnalyzer {
    claude: Claude,
}

impl ClaudeAnalyzer {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            claude: Claude::new(api_key, model),
        }
    }
}

#[async_trait]
impl RelevanceAnalyzer for ClaudeAnalyzer {
    async fn analyze(
        &self,
        content: &str,
        keywords: &[String],
        business_description: &str,
    ) -> Result<AnalysisResult> {
        // Truncate content to avoid token limits
        let content = if content.len() > 30_000 {
            let mut end = 30_000;
            while !content.is_char_boundary(end) {
                end -= 1;
            }
            &content[..end]
        } else {
            content
        };

        let user_prompt = format!(
            "Business description: {business_description}\n\nKeywords: {}\n\n---\n\n{content}",
            keywords.join(", ")
        );

        match self
            .claude
            .extract::<AnalysisResponse>(ANALYSIS_SYSTEM_PROMPT, &user_prompt)
            .await
        {
            Ok(response) => {
                let result = AnalysisResult {
                    relevance_score: response.relevance_score.clamp(0, 100),
                    matched_keywords: response.matched_keywords,
                    sentiment_score: response.sentiment_score,
                };
                info!(
                    relevance = result.relevance_score,
                    sentiment = result.sentiment_score,
                    matched = result.matched_keywords.len(),
                    "Content analyzed"
                );
                Ok(result)
            }
            // Malformed model output is a fail-safe zero-relevance result,
            // not an error: the relevance gate rejects the candidate.
            Err(LlmError::Parse(e)) => {
                warn!(error = %e, "Unparseable analyzer output, treating as zero relevance");
                Ok(AnalysisResult::default())
            }
            Err(e) => Err(e.into()),
        }
    }
}
