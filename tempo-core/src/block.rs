//! Focus blocks: concrete calendar intervals a task is assigned to.
//!
//! The task owns the relationship; a block only back-references it through
//! `metadata.task_id` and may be deleted and recreated freely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::intervals::Interval;
use crate::task::Task;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub task_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusBlock {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub context: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub timezone: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub metadata: BlockMetadata,
}

impl FocusBlock {
    /// Draft a block for `task` starting at `start`, sized to the task's duration.
    ///
    /// Ids are derived from the task and start instant so identical runs yield
    /// identical drafts.
    pub fn draft_for(task: &Task, start: DateTime<Utc>, timezone: &str) -> Self {
        let end = start + chrono::Duration::minutes(task.duration_minutes.into());
        Self {
            id: format!("blk-{}-{}", task.id, start.format("%Y%m%dT%H%MZ")),
            title: task.title.clone(),
            context: task.context.clone(),
            start_time: start,
            end_time: end,
            timezone: timezone.to_string(),
            completed: false,
            metadata: BlockMetadata {
                task_id: Some(task.id.clone()),
            },
        }
    }

    pub fn interval(&self) -> Interval {
        Interval::new(self.start_time, self.end_time)
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes()
    }

    pub fn belongs_to(&self, task_id: &str) -> bool {
        self.metadata.task_id.as_deref() == Some(task_id)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("block.id must be non-empty".to_string());
        }
        if self.end_time <= self.start_time {
            return Err(format!("block {}: end_time must be after start_time", self.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn draft_spans_task_duration_and_back_references_task() {
        let task = Task::new("t1", "Draft memo").with_duration(45).with_context("work");
        let start = Utc.with_ymd_and_hms(2026, 2, 23, 9, 0, 0).unwrap();
        let b = FocusBlock::draft_for(&task, start, "UTC");

        assert_eq!(b.id, "blk-t1-20260223T0900Z");
        assert_eq!(b.duration_minutes(), 45);
        assert_eq!(b.title, "Draft memo");
        assert_eq!(b.context, "work");
        assert!(b.belongs_to("t1"));
        assert!(!b.belongs_to("t2"));
        b.validate().unwrap();
    }

    #[test]
    fn inverted_block_fails_validation() {
        let task = Task::new("t1", "x");
        let start = Utc.with_ymd_and_hms(2026, 2, 23, 9, 0, 0).unwrap();
        let mut b = FocusBlock::draft_for(&task, start, "UTC");
        b.end_time = b.start_time;
        assert!(b.validate().is_err());
    }
}
