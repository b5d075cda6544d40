use thiserror::Error;

#[derive(Error, Debug)]
pub enum LeadScoutError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Agent {0} not found")]
    AgentNotFound(uuid::Uuid),

    #[error("Agent {0} has no keywords configured")]
    NoKeywords(uuid::Uuid),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
