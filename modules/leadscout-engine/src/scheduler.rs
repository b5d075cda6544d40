//! The once-per-minute schedule tick: decide which active agents are due
//! and enqueue a pending run for each, at most one per agent per minute.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{debug, info};

use crate::traits::LeadStore;

#[derive(Debug, Default)]
pub struct ScheduleTickStats {
    pub scheduled: u32,
    pub skipped: u32,
    pub already_queued: u32,
}

impl std::fmt::Display for ScheduleTickStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} scheduled, {} not due, {} already queued",
            self.scheduled, self.skipped, self.already_queued
        )
    }
}

pub struct ScheduleTick {
    store: Arc<dyn LeadStore>,
}

impl ScheduleTick {
    pub fn new(store: Arc<dyn LeadStore>) -> Self {
        Self { store }
    }

    pub async fn tick(&self, now: DateTime<Utc>) -> Result<ScheduleTickStats> {
        let agents = self.store.active_agents().await?;
        let (window_start, window_end) = minute_window(now);
        let mut stats = ScheduleTickStats::default();

        for agent in agents {
            if !agent.schedule.should_run(now) {
                stats.skipped += 1;
                continue;
            }
            // At most one pending run per agent per minute window.
            if self
                .store
                .pending_run_exists(agent.id, window_start, window_end)
                .await?
            {
                debug!(agent_id = %agent.id, "Run already queued this minute");
                stats.already_queued += 1;
                continue;
            }
            let run_id = self.store.insert_scheduled_run(agent.id, now).await?;
            info!(agent_id = %agent.id, run_id = %run_id, "Scheduled run enqueued");
            stats.scheduled += 1;
        }

        if stats.scheduled > 0 {
            info!(
                scheduled = stats.scheduled,
                skipped = stats.skipped,
                already_queued = stats.already_queued,
                "Schedule tick complete"
            );
        }
        Ok(stats)
    }
}

/// The minute bucket containing `now`: `[start, start + 1 min)`.
pub(crate) fn minute_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start_secs = now.timestamp() - now.timestamp().rem_euclid(60);
    let start = DateTime::from_timestamp(start_secs, 0).unwrap_or(now);
    (start, start + Duration::minutes(1))
}

/// Tracks UTC day rollover for the daily counter-reset tick.
pub struct DailyReset {
    last_day: NaiveDate,
}

impl DailyReset {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_day: now.date_naive(),
        }
    }

    /// True exactly once per UTC day rollover.
    pub fn due(&mut self, now: DateTime<Utc>) -> bool {
        let today = now.date_naive();
        if today == self.last_day {
            return false;
        }
        self.last_day = today;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use leadscout_common::ScheduleInterval;

    use crate::testing::{make_agent, MemoryStore};

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, 0).unwrap()
    }

    #[tokio::test]
    async fn hourly_agent_scheduled_once_per_minute_window() {
        let mut agent = make_agent(&["pricing"], 70);
        agent.schedule.start_time = "09:00".parse().unwrap();
        let store = Arc::new(MemoryStore::with_agent(agent));
        let tick = ScheduleTick::new(store.clone());

        // 09:00 with an hourly schedule starting 09:00 → exactly one run.
        let stats = tick.tick(at(9, 0)).await.unwrap();
        assert_eq!(stats.scheduled, 1);
        assert_eq!(store.pending_count(), 1);

        // Second tick in the same minute window → no duplicate.
        let stats = tick.tick(at(9, 0) + Duration::seconds(30)).await.unwrap();
        assert_eq!(stats.scheduled, 0);
        assert_eq!(stats.already_queued, 1);
        assert_eq!(store.pending_count(), 1);
    }

    #[tokio::test]
    async fn agent_not_due_before_start_time() {
        let mut agent = make_agent(&["pricing"], 70);
        agent.schedule.start_time = "09:00".parse().unwrap();
        let store = Arc::new(MemoryStore::with_agent(agent));
        let tick = ScheduleTick::new(store.clone());

        let stats = tick.tick(at(8, 0)).await.unwrap();
        assert_eq!(stats.scheduled, 0);
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn disabled_schedule_is_skipped() {
        let mut agent = make_agent(&["pricing"], 70);
        agent.schedule.enabled = false;
        let store = Arc::new(MemoryStore::with_agent(agent));
        let tick = ScheduleTick::new(store.clone());

        let stats = tick.tick(at(9, 0)).await.unwrap();
        assert_eq!(stats.scheduled, 0);
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn interval_bucket_respected() {
        let mut agent = make_agent(&["pricing"], 70);
        agent.schedule.interval = ScheduleInterval::Every15Min;
        agent.schedule.start_time = "00:00".parse().unwrap();
        let store = Arc::new(MemoryStore::with_agent(agent));
        let tick = ScheduleTick::new(store.clone());

        assert_eq!(tick.tick(at(9, 14)).await.unwrap().scheduled, 0);
        assert_eq!(tick.tick(at(9, 15)).await.unwrap().scheduled, 1);
        // Next bucket is a different minute window, so a new run queues.
        assert_eq!(tick.tick(at(9, 30)).await.unwrap().scheduled, 1);
        assert_eq!(store.pending_count(), 2);
    }

    #[test]
    fn minute_window_bounds() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 42).unwrap();
        let (start, end) = minute_window(now);
        assert_eq!(start, at(9, 0));
        assert_eq!(end, at(9, 1));
    }

    #[test]
    fn daily_reset_fires_once_per_rollover() {
        let mut reset = DailyReset::new(at(23, 59));
        assert!(!reset.due(at(23, 59)));
        let next_day = Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap();
        assert!(reset.due(next_day));
        assert!(!reset.due(next_day + Duration::minutes(1)));
    }
}
