//! Task model consumed and produced by the scheduler.
//!
//! Tasks arrive already materialized (recurrence expansion happens upstream)
//! and already filtered to one owner.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PriorityLevel {
    /// Most urgent.
    P1 = 1,
    P2 = 2,
    P3 = 3,
    /// Background.
    P4 = 4,
}

impl PriorityLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "P1" | "1" => Some(Self::P1),
            "P2" | "2" => Some(Self::P2),
            "P3" | "3" => Some(Self::P3),
            "P4" | "4" => Some(Self::P4),
            _ => None,
        }
    }
}

impl std::fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", *self as u8)
    }
}

/// Typed scheduling bookkeeping.
///
/// Never the source of truth for placement; `Task::scheduled_block_id` is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingMetadata {
    pub at_risk: bool,
    pub at_risk_reason: Option<String>,
    pub schedule_attempts: u32,
    pub defer_count: u32,
    pub last_scheduled_at: Option<DateTime<Utc>>,
    pub last_deferred_at: Option<DateTime<Utc>>,
    pub defer_reason: Option<String>,
    pub last_rescheduled_at: Option<DateTime<Utc>>,
    pub reschedule_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub owner: String,
    pub title: String,

    pub status: TaskStatus,
    pub priority_level: PriorityLevel,

    /// Minutes. The only required time-extent field.
    pub duration_minutes: u32,

    /// Hard deadline: nothing later is acceptable.
    pub due_date: Option<NaiveDate>,
    /// Day the owner intends to work it. Advisory; the engine treats it as an earliest day.
    pub do_date: Option<NaiveDate>,
    /// Day it was actually placed or committed.
    pub committed_date: Option<NaiveDate>,

    pub auto_schedule: bool,
    pub scheduled_block_id: Option<String>,

    /// Grouping/colouring tag only.
    #[serde(default)]
    pub context: String,

    #[serde(default)]
    pub scheduling_metadata: SchedulingMetadata,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: "default".to_string(),
            title: title.into(),
            status: TaskStatus::Todo,
            priority_level: PriorityLevel::P3,
            duration_minutes: 30,
            due_date: None,
            do_date: None,
            committed_date: None,
            auto_schedule: true,
            scheduled_block_id: None,
            context: String::new(),
            scheduling_metadata: SchedulingMetadata::default(),
        }
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_priority(mut self, priority: PriorityLevel) -> Self {
        self.priority_level = priority;
        self
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = minutes;
        self
    }

    pub fn with_due_date(mut self, due: NaiveDate) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn with_do_date(mut self, day: NaiveDate) -> Self {
        self.do_date = Some(day);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn manual(mut self) -> Self {
        self.auto_schedule = false;
        self
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    pub fn is_placed(&self) -> bool {
        self.scheduled_block_id.is_some()
    }

    pub fn is_at_risk(&self) -> bool {
        self.scheduling_metadata.at_risk
    }

    /// Candidate for an allocation pass.
    pub fn is_schedulable(&self) -> bool {
        self.auto_schedule && !self.is_done() && !self.is_placed()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("task.id must be non-empty".to_string());
        }
        if self.duration_minutes == 0 {
            return Err(format!("task {}: duration_minutes must be > 0", self.id));
        }
        if self.is_placed() && self.is_at_risk() {
            return Err(format!(
                "task {}: a placed task cannot be flagged at-risk",
                self.id
            ));
        }
        Ok(())
    }
}
