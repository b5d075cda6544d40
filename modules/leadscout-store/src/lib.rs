//! Postgres persistence for agents, leads, scheduled runs, and run history.

pub mod migrate;
mod store;

pub use store::{ClosedRunHistory, PgStore};

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}
