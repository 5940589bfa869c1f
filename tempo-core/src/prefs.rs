//! Per-run scheduler preferences supplied by the host.

use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::time::{self, hhmm};

pub const DEFAULT_HORIZON_DAYS: u32 = 7;
pub const DEFAULT_MAX_DAILY_MINUTES: u32 = 480;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerPreferences {
    #[serde(with = "hhmm")]
    pub working_hours_start: NaiveTime,
    #[serde(with = "hhmm")]
    pub working_hours_end: NaiveTime,
    #[serde(default = "default_horizon_days")]
    pub scheduling_horizon_days: u32,
    /// Falls back to `DEFAULT_MAX_DAILY_MINUTES` when absent.
    #[serde(default)]
    pub max_daily_minutes: Option<u32>,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_horizon_days() -> u32 {
    DEFAULT_HORIZON_DAYS
}

fn default_timezone() -> String {
    "UTC".to_string()
}

impl Default for SchedulerPreferences {
    fn default() -> Self {
        Self {
            working_hours_start: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default(),
            working_hours_end: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
            scheduling_horizon_days: DEFAULT_HORIZON_DAYS,
            max_daily_minutes: None,
            timezone: default_timezone(),
        }
    }
}

impl SchedulerPreferences {
    pub fn with_working_hours(mut self, start: NaiveTime, end: NaiveTime) -> Self {
        self.working_hours_start = start;
        self.working_hours_end = end;
        self
    }

    pub fn with_horizon_days(mut self, days: u32) -> Self {
        self.scheduling_horizon_days = days;
        self
    }

    pub fn with_max_daily_minutes(mut self, minutes: u32) -> Self {
        self.max_daily_minutes = Some(minutes);
        self
    }

    pub fn with_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = tz.into();
        self
    }

    pub fn daily_cap(&self) -> u32 {
        self.max_daily_minutes.unwrap_or(DEFAULT_MAX_DAILY_MINUTES)
    }

    pub fn tz(&self) -> Result<Tz> {
        time::parse_tz(&self.timezone)
    }

    /// Last day (inclusive) the engine considers for a run starting at `target`.
    pub fn horizon_end(&self, target: NaiveDate) -> NaiveDate {
        target + chrono::Duration::days(self.scheduling_horizon_days.into())
    }

    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.working_hours_end <= self.working_hours_start {
            return Err("preferences.working_hours_end must be after working_hours_start".to_string());
        }
        if self.max_daily_minutes == Some(0) {
            return Err("preferences.max_daily_minutes must be > 0".to_string());
        }
        if time::parse_tz(&self.timezone).is_err() {
            return Err(format!("preferences.timezone is not a known IANA zone: {}", self.timezone));
        }
        Ok(())
    }
}
