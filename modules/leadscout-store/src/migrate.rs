//! Idempotent schema setup, run at process start.

use anyhow::Result;
use sqlx::PgPool;
use tracing::info;

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id UUID PRIMARY KEY,
        owner_id UUID NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        active BOOLEAN NOT NULL DEFAULT TRUE,
        relevance_threshold INTEGER NOT NULL DEFAULT 70,
        keywords TEXT[] NOT NULL DEFAULT '{}',
        schedule JSONB NOT NULL,
        last_run_at TIMESTAMPTZ,
        run_count BIGINT NOT NULL DEFAULT 0,
        runs_today INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS leads (
        id UUID PRIMARY KEY,
        agent_id UUID NOT NULL,
        platform_post_id TEXT NOT NULL,
        content TEXT NOT NULL,
        author TEXT NOT NULL DEFAULT '',
        engagement_score BIGINT NOT NULL DEFAULT 0,
        matched_keywords TEXT[] NOT NULL DEFAULT '{}',
        relevance_score INTEGER NOT NULL,
        sentiment_score INTEGER NOT NULL DEFAULT 0,
        archived BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    // Dedup invariant: at most one lead per (agent, platform post).
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS leads_agent_post_key
        ON leads (agent_id, platform_post_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS scheduled_runs (
        id UUID PRIMARY KEY,
        agent_id UUID NOT NULL,
        scheduled_for TIMESTAMPTZ NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        result_summary TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS scheduled_runs_due
        ON scheduled_runs (status, scheduled_for)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS run_history (
        id UUID PRIMARY KEY,
        agent_id UUID NOT NULL,
        started_at TIMESTAMPTZ NOT NULL,
        completed_at TIMESTAMPTZ,
        success BOOLEAN,
        results_count INTEGER NOT NULL DEFAULT 0,
        processed_keywords INTEGER NOT NULL DEFAULT 0,
        steps JSONB NOT NULL DEFAULT '[]'
    )
    "#,
];

pub async fn migrate(pool: &PgPool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Database migrations complete");
    Ok(())
}
