use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How often an agent's pipeline should run. Buckets are evaluated against
/// wall-clock minutes on a one-minute scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleInterval {
    #[serde(rename = "15-min")]
    Every15Min,
    #[serde(rename = "30-min")]
    Every30Min,
    #[serde(rename = "hourly")]
    Hourly,
    #[serde(rename = "every-2-hours")]
    Every2Hours,
}

impl ScheduleInterval {
    /// Whether this wall-clock hour/minute falls in the interval's bucket.
    pub fn matches(&self, hour: u32, minute: u32) -> bool {
        match self {
            ScheduleInterval::Every15Min => minute % 15 == 0,
            ScheduleInterval::Every30Min => minute % 30 == 0,
            ScheduleInterval::Hourly => minute == 0,
            ScheduleInterval::Every2Hours => minute == 0 && hour % 2 == 0,
        }
    }
}

/// A validated "HH:MM" time of day. Malformed values are rejected when the
/// schedule is deserialized, not deep in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTime {
    pub hour: u32,
    pub minute: u32,
}

impl std::str::FromStr for StartTime {
    type Err = crate::LeadScoutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid =
            || crate::LeadScoutError::Validation(format!("invalid start time '{s}', expected HH:MM"));
        let (h, m) = s.split_once(':').ok_or_else(invalid)?;
        let hour: u32 = h.parse().map_err(|_| invalid())?;
        let minute: u32 = m.parse().map_err(|_| invalid())?;
        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok(StartTime { hour, minute })
    }
}

impl std::fmt::Display for StartTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl Serialize for StartTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StartTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-agent schedule configuration, stored as JSONB on the agent row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub interval: ScheduleInterval,
    pub start_time: StartTime,
}

impl ScheduleConfig {
    /// Whether a run is due at `now`: the schedule is enabled, the current
    /// time of day is at or after the configured start, and the interval
    /// bucket matches the current minute.
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        if !self.enabled {
            return false;
        }
        let (hour, minute) = (now.hour(), now.minute());
        if (hour, minute) < (self.start_time.hour, self.start_time.minute) {
            return false;
        }
        self.interval.matches(hour, minute)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, hour, minute, 0).unwrap()
    }

    fn config(interval: ScheduleInterval, start: &str) -> ScheduleConfig {
        ScheduleConfig {
            enabled: true,
            interval,
            start_time: start.parse().unwrap(),
        }
    }

    #[test]
    fn interval_buckets() {
        assert!(ScheduleInterval::Every15Min.matches(9, 45));
        assert!(!ScheduleInterval::Every15Min.matches(9, 44));

        assert!(ScheduleInterval::Every30Min.matches(9, 30));
        assert!(!ScheduleInterval::Every30Min.matches(9, 15));

        assert!(ScheduleInterval::Hourly.matches(9, 0));
        assert!(!ScheduleInterval::Hourly.matches(9, 30));

        assert!(ScheduleInterval::Every2Hours.matches(8, 0));
        assert!(!ScheduleInterval::Every2Hours.matches(9, 0));
        assert!(!ScheduleInterval::Every2Hours.matches(8, 30));
    }

    #[test]
    fn not_due_before_start_time() {
        let config = config(ScheduleInterval::Hourly, "09:00");
        assert!(!config.should_run(at(8, 0)));
        assert!(config.should_run(at(9, 0)));
        assert!(config.should_run(at(10, 0)));
    }

    #[test]
    fn start_time_is_inclusive() {
        let config = config(ScheduleInterval::Every15Min, "09:15");
        assert!(config.should_run(at(9, 15)));
        assert!(!config.should_run(at(9, 0)));
    }

    #[test]
    fn disabled_schedule_never_runs() {
        let mut config = config(ScheduleInterval::Hourly, "00:00");
        config.enabled = false;
        assert!(!config.should_run(at(9, 0)));
    }

    #[test]
    fn start_time_parsing_rejects_malformed_values() {
        assert!("09:00".parse::<StartTime>().is_ok());
        assert!("9:5".parse::<StartTime>().is_ok());
        assert!("24:00".parse::<StartTime>().is_err());
        assert!("09:60".parse::<StartTime>().is_err());
        assert!("0900".parse::<StartTime>().is_err());
        assert!("morning".parse::<StartTime>().is_err());
    }

    #[test]
    fn schedule_config_deserializes_wire_shape() {
        let json = r#"{"enabled": true, "interval": "every-2-hours", "start_time": "08:30"}"#;
        let config: ScheduleConfig = serde_json::from_str(json).unwrap();
        assert!(config.enabled);
        assert_eq!(config.interval, ScheduleInterval::Every2Hours);
        assert_eq!(config.start_time, StartTime { hour: 8, minute: 30 });

        let bad = r#"{"enabled": true, "interval": "daily", "start_time": "08:30"}"#;
        assert!(serde_json::from_str::<ScheduleConfig>(bad).is_err());
    }
}
