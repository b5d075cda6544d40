use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use leadscout_common::{Agent, NewLead, RunStatus, RunStep, ScheduleConfig, ScheduledRun};

/// Terminal bookkeeping for a run history row.
#[derive(Debug, Clone)]
pub struct ClosedRunHistory {
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    pub results_count: i32,
    pub processed_keywords: i32,
    pub steps: Vec<RunStep>,
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    // --- Agents ---

    pub async fn active_agents(&self) -> Result<Vec<Agent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner_id, description, active, relevance_threshold,
                   keywords, schedule, last_run_at, run_count, runs_today
            FROM agents
            WHERE active = TRUE
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_agent).collect()
    }

    pub async fn get_agent(&self, id: Uuid) -> Result<Option<Agent>> {
        let row = sqlx::query(
            r#"
            SELECT id, owner_id, description, active, relevance_threshold,
                   keywords, schedule, last_run_at, run_count, runs_today
            FROM agents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(row_to_agent).transpose()
    }

    /// Bump run counters exactly once per dispatched run reaching a
    /// terminal status.
    pub async fn increment_agent_run_stats(&self, agent_id: Uuid, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE agents
            SET run_count = run_count + 1,
                runs_today = runs_today + 1,
                last_run_at = $2
            WHERE id = $1
            "#,
        )
        .bind(agent_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Daily bookkeeping: zero the per-day run counters. Returns how many
    /// agent rows changed.
    pub async fn reset_daily_counters(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE agents SET runs_today = 0 WHERE runs_today <> 0")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    // --- Leads ---

    pub async fn lead_exists(&self, agent_id: Uuid, platform_post_id: &str) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM leads WHERE agent_id = $1 AND platform_post_id = $2)",
        )
        .bind(agent_id)
        .bind(platform_post_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<bool, _>(0))
    }

    pub async fn insert_lead(&self, lead: &NewLead) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO leads (id, agent_id, platform_post_id, content, author,
                               engagement_score, matched_keywords, relevance_score, sentiment_score)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(id)
        .bind(lead.agent_id)
        .bind(&lead.platform_post_id)
        .bind(&lead.content)
        .bind(&lead.author)
        .bind(lead.engagement_score)
        .bind(&lead.matched_keywords)
        .bind(lead.relevance_score)
        .bind(lead.sentiment_score)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    // --- Scheduled runs ---

    /// Any pending run for this agent scheduled inside `[from, to)`.
    pub async fn pending_run_exists(
        &self,
        agent_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM scheduled_runs
                WHERE agent_id = $1 AND status = 'pending'
                  AND scheduled_for >= $2 AND scheduled_for < $3
            )
            "#,
        )
        .bind(agent_id)
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<bool, _>(0))
    }

    pub async fn insert_scheduled_run(
        &self,
        agent_id: Uuid,
        scheduled_for: DateTime<Utc>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO scheduled_runs (id, agent_id, scheduled_for, status) VALUES ($1, $2, $3, 'pending')",
        )
        .bind(id)
        .bind(agent_id)
        .bind(scheduled_for)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    /// Atomically claim up to `batch` due pending runs, transitioning each
    /// to `processing`. `SKIP LOCKED` keeps two dispatcher ticks from
    /// claiming the same row.
    pub async fn claim_pending_runs(&self, now: DateTime<Utc>, batch: u32) -> Result<Vec<ScheduledRun>> {
        let rows = sqlx::query(
            r#"
            UPDATE scheduled_runs
            SET status = 'processing'
            WHERE id IN (
                SELECT id FROM scheduled_runs
                WHERE status = 'pending' AND scheduled_for <= $1
                ORDER BY scheduled_for
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, agent_id, scheduled_for, status, result_summary
            "#,
        )
        .bind(now)
        .bind(batch as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_scheduled_run).collect()
    }

    /// Move a claimed run to a terminal status. The status guard makes the
    /// transition monotonic at the database: a run that already reached
    /// `completed` or `failed` is never rewritten.
    pub async fn update_run_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        summary: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scheduled_runs
            SET status = $2, result_summary = $3
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(run_id)
        .bind(status.as_str())
        .bind(summary)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // --- Run history ---

    pub async fn insert_run_history(&self, agent_id: Uuid, started_at: DateTime<Utc>) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO run_history (id, agent_id, started_at) VALUES ($1, $2, $3)")
            .bind(id)
            .bind(agent_id)
            .bind(started_at)
            .execute(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn update_run_history(&self, history_id: Uuid, closed: &ClosedRunHistory) -> Result<()> {
        let steps = serde_json::to_value(&closed.steps)?;
        sqlx::query(
            r#"
            UPDATE run_history
            SET completed_at = $2, success = $3, results_count = $4,
                processed_keywords = $5, steps = $6
            WHERE id = $1
            "#,
        )
        .bind(history_id)
        .bind(closed.completed_at)
        .bind(closed.success)
        .bind(closed.results_count)
        .bind(closed.processed_keywords)
        .bind(steps)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_agent(row: sqlx::postgres::PgRow) -> Result<Agent> {
    let id: Uuid = row.get("id");
    let schedule: serde_json::Value = row.get("schedule");
    let schedule: ScheduleConfig = serde_json::from_value(schedule)
        .with_context(|| format!("agent {id} has a malformed schedule config"))?;

    Ok(Agent {
        id,
        owner_id: row.get("owner_id"),
        description: row.get("description"),
        active: row.get("active"),
        relevance_threshold: row.get("relevance_threshold"),
        keywords: row.get("keywords"),
        schedule,
        last_run_at: row.get("last_run_at"),
        run_count: row.get("run_count"),
        runs_today: row.get("runs_today"),
    })
}

fn row_to_scheduled_run(row: sqlx::postgres::PgRow) -> Result<ScheduledRun> {
    let status: String = row.get("status");
    Ok(ScheduledRun {
        id: row.get("id"),
        agent_id: row.get("agent_id"),
        scheduled_for: row.get("scheduled_for"),
        status: status.parse().map_err(anyhow::Error::from)?,
        result_summary: row.get("result_summary"),
    })
}
