//! Schedule descriptor (schema.org `Schedule`)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// When and how often a scheduled action should run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    /// ISO 8601 duration between repetitions (e.g. `PT1H`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_frequency: Option<String>,

    /// Number of repetitions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,

    /// Days of week (schema.org day names)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub by_day: Vec<String>,

    /// IANA timezone name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_timezone: Option<String>,

    /// Cron expression (extension field, not part of schema.org)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

impl Schedule {
    /// Whether the schedule describes a single run
    pub fn is_one_shot(&self) -> bool {
        self.repeat_frequency.is_none() && self.cron.is_none() && self.repeat_count.unwrap_or(1) <= 1
    }
}
