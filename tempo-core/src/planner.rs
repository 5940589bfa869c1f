//! Allocate: engine + at-risk assessment, without touching persistence.
//!
//! The plan is complete before anything is written, so a caller may show it
//! (dry run) or discard it wholesale.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::allocator::allocate;
use crate::block::FocusBlock;
use crate::error::Result;
use crate::lifecycle::{schedule, ScheduleOutcome};
use crate::prefs::SchedulerPreferences;
use crate::risk::{assess, AtRiskTask};
use crate::task::Task;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateRequest {
    pub tasks: Vec<Task>,
    pub existing_blocks: Vec<FocusBlock>,
    pub preferences: SchedulerPreferences,
    pub target_date: NaiveDate,
    /// Earliest instant a block may start (usually "now").
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledTask {
    /// Task as it will look once the placement is committed.
    pub task: Task,
    pub scheduled_start: DateTime<Utc>,
    pub scheduled_end: DateTime<Utc>,
    pub block: FocusBlock,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationSummary {
    pub total_scheduled: usize,
    pub total_unscheduled: usize,
    pub total_at_risk: usize,
    pub total_minutes_scheduled: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub scheduled_tasks: Vec<ScheduledTask>,
    pub created_blocks: Vec<FocusBlock>,
    pub at_risk_tasks: Vec<AtRiskTask>,
    /// Unplaced and not at risk.
    pub unscheduled_tasks: Vec<Task>,
    pub summary: AllocationSummary,
}

/// Plan an allocation. `now` stamps `last_scheduled_at` on placed tasks.
pub fn plan_allocation(req: &AllocateRequest, now: DateTime<Utc>) -> Result<AllocationPlan> {
    let alloc = allocate(
        &req.tasks,
        &req.existing_blocks,
        &req.preferences,
        req.target_date,
        req.not_before,
    )?;

    let mut scheduled_tasks = Vec::with_capacity(alloc.placements.len());
    for p in &alloc.placements {
        match schedule(&p.task, p.block.clone(), p.day, now)? {
            ScheduleOutcome::Applied(cs) => scheduled_tasks.push(ScheduledTask {
                task: cs.task,
                scheduled_start: p.interval.start,
                scheduled_end: p.interval.end,
                block: p.block.clone(),
            }),
            ScheduleOutcome::AlreadyScheduled(w) => warn!(task_id = %w.task_id, "{}", w.message),
        }
    }

    let horizon_end = req.preferences.horizon_end(req.target_date);
    let risk = assess(&alloc.residual, req.target_date, horizon_end);

    let summary = AllocationSummary {
        total_scheduled: scheduled_tasks.len(),
        total_unscheduled: alloc.residual.len(),
        total_at_risk: risk.at_risk.len(),
        total_minutes_scheduled: alloc.minutes_scheduled(),
    };

    Ok(AllocationPlan {
        created_blocks: alloc.created_blocks(),
        scheduled_tasks,
        at_risk_tasks: risk.at_risk,
        unscheduled_tasks: risk.unscheduled,
        summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::PriorityLevel;
    use chrono::TimeZone;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, day).unwrap()
    }

    fn request(tasks: Vec<Task>) -> AllocateRequest {
        AllocateRequest {
            tasks,
            existing_blocks: vec![],
            preferences: SchedulerPreferences::default().with_horizon_days(2),
            target_date: d(2),
            not_before: None,
        }
    }

    #[test]
    fn plan_partitions_backlog() {
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 7, 0, 0).unwrap();
        let tasks = vec![
            Task::new("fits", "a").with_priority(PriorityLevel::P1).with_duration(60),
            Task::new("huge-due", "b").with_duration(600).with_due_date(d(3)),
            Task::new("huge-undated", "c").with_duration(600),
        ];
        let plan = plan_allocation(&request(tasks), now).unwrap();

        assert_eq!(plan.summary, AllocationSummary {
            total_scheduled: 1,
            total_unscheduled: 2,
            total_at_risk: 1,
            total_minutes_scheduled: 60,
        });
        assert_eq!(plan.created_blocks.len(), 1);
        assert_eq!(plan.scheduled_tasks[0].block, plan.created_blocks[0]);

        let placed = &plan.scheduled_tasks[0].task;
        assert_eq!(placed.scheduled_block_id.as_deref(), Some(plan.created_blocks[0].id.as_str()));
        assert_eq!(placed.committed_date, Some(d(2)));
        assert_eq!(placed.scheduling_metadata.last_scheduled_at, Some(now));

        assert_eq!(plan.at_risk_tasks[0].task.id, "huge-due");
        assert_eq!(plan.unscheduled_tasks[0].id, "huge-undated");
    }
}
