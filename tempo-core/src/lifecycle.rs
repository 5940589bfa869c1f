//! Commitment lifecycle: the state machine tying a task to its focus block
//! and to its due / do / committed dates.
//!
//! Transitions are pure. Each returns a [`Changeset`] (at most one block
//! change plus the updated task) that the store applies as one logical
//! transaction. Bookkeeping is cumulative: applying the same defer twice
//! counts two defers.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::block::FocusBlock;
use crate::error::{Result, SchedulerError};
use crate::task::{Task, TaskStatus};
use crate::time::parse_date;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitmentState {
    Unscheduled,
    Scheduled,
    Rescheduled,
    Deferred,
    Done,
}

/// Derive the lifecycle state from task fields. At-risk is orthogonal and
/// read from `scheduling_metadata.at_risk`.
pub fn state_of(task: &Task) -> CommitmentState {
    if task.is_done() {
        return CommitmentState::Done;
    }
    let m = &task.scheduling_metadata;
    if task.is_placed() {
        if m.last_rescheduled_at.is_some() && m.last_rescheduled_at >= m.last_scheduled_at {
            CommitmentState::Rescheduled
        } else {
            CommitmentState::Scheduled
        }
    } else if m.last_deferred_at.is_some()
        && m.last_deferred_at >= m.last_scheduled_at
        && m.last_deferred_at >= m.last_rescheduled_at
    {
        CommitmentState::Deferred
    } else {
        CommitmentState::Unscheduled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Schedule,
    Reschedule,
    Defer,
    Complete,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Reschedule => "reschedule",
            Self::Defer => "defer",
            Self::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BlockChange {
    None,
    Create { block: FocusBlock },
    Update { previous: FocusBlock, updated: FocusBlock },
    Delete { block: FocusBlock },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    pub kind: TransitionKind,
    pub block: BlockChange,
    pub task: Task,
}

/// Non-fatal condition reported alongside a successful response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub task_id: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Applied(Changeset),
    /// Desired end-state already holds; nothing to write.
    AlreadyScheduled(Warning),
}

fn reject_done(task: &Task, action: &str) -> Result<()> {
    if task.status == TaskStatus::Done {
        return Err(SchedulerError::Validation(format!(
            "cannot {action} task {}: it is done",
            task.id
        )));
    }
    Ok(())
}

fn mark_placed(task: &mut Task, block: &FocusBlock, day: NaiveDate, now: DateTime<Utc>) {
    task.scheduled_block_id = Some(block.id.clone());
    task.committed_date = Some(day);
    let m = &mut task.scheduling_metadata;
    m.at_risk = false;
    m.at_risk_reason = None;
    m.last_scheduled_at = Some(now);
    m.schedule_attempts += 1;
}

/// Schedule: attach `block` (placed on `day`) to an unscheduled task.
pub fn schedule(
    task: &Task,
    block: FocusBlock,
    day: NaiveDate,
    now: DateTime<Utc>,
) -> Result<ScheduleOutcome> {
    if let Some(existing) = &task.scheduled_block_id {
        return Ok(ScheduleOutcome::AlreadyScheduled(Warning {
            task_id: task.id.clone(),
            message: format!("task {} is already scheduled in block {existing}", task.id),
        }));
    }
    reject_done(task, "schedule")?;
    block.validate()?;
    if !block.belongs_to(&task.id) {
        return Err(SchedulerError::Validation(format!(
            "block {} does not reference task {}",
            block.id, task.id
        )));
    }

    let mut updated = task.clone();
    mark_placed(&mut updated, &block, day, now);
    Ok(ScheduleOutcome::Applied(Changeset {
        kind: TransitionKind::Schedule,
        block: BlockChange::Create { block },
        task: updated,
    }))
}

/// Reschedule to `new_date`.
///
/// With `new_start`: move the existing block in place (identity kept), or
/// create one when the task has none. Without: drop the block and leave the
/// task for the next allocation pass.
pub fn reschedule(
    task: &Task,
    current_block: Option<&FocusBlock>,
    new_date: NaiveDate,
    new_start: Option<DateTime<Utc>>,
    timezone: &str,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<Changeset> {
    reject_done(task, "reschedule")?;
    task.validate()?;

    let mut updated = task.clone();
    let block = match (new_start, current_block) {
        (Some(start), Some(existing)) => {
            let mut moved = existing.clone();
            moved.start_time = start;
            moved.end_time = start + Duration::minutes(task.duration_minutes.into());
            moved.validate()?;
            BlockChange::Update {
                previous: existing.clone(),
                updated: moved,
            }
        }
        (Some(start), None) => {
            let created = FocusBlock::draft_for(task, start, timezone);
            mark_placed(&mut updated, &created, new_date, now);
            BlockChange::Create { block: created }
        }
        (None, Some(existing)) => {
            updated.scheduled_block_id = None;
            BlockChange::Delete {
                block: existing.clone(),
            }
        }
        (None, None) => BlockChange::None,
    };

    updated.do_date = Some(new_date);
    updated.committed_date = Some(new_date);
    updated.scheduling_metadata.last_rescheduled_at = Some(now);
    updated.scheduling_metadata.reschedule_reason = reason;

    Ok(Changeset {
        kind: TransitionKind::Reschedule,
        block,
        task: updated,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferTarget {
    Tomorrow,
    NextWeek,
    Someday,
    Date(NaiveDate),
}

impl FromStr for DeferTarget {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tomorrow" => Ok(Self::Tomorrow),
            "next_week" | "next-week" => Ok(Self::NextWeek),
            "someday" => Ok(Self::Someday),
            other => parse_date(other).map(Self::Date).ok_or_else(|| {
                SchedulerError::Validation(format!(
                    "invalid defer target '{s}': expected tomorrow, next_week, someday or YYYY-MM-DD"
                ))
            }),
        }
    }
}

impl DeferTarget {
    /// Concrete date for this target relative to `today`; `None` for someday.
    ///
    /// `next_week` is the Monday of the following week.
    pub fn resolve(&self, today: NaiveDate) -> Result<Option<NaiveDate>> {
        match self {
            Self::Tomorrow => Ok(Some(today + Duration::days(1))),
            Self::NextWeek => {
                let offset = 7 - i64::from(today.weekday().num_days_from_monday());
                Ok(Some(today + Duration::days(offset)))
            }
            Self::Someday => Ok(None),
            Self::Date(d) if *d <= today => Err(SchedulerError::Validation(format!(
                "cannot defer to {d}: a defer must move past {today}"
            ))),
            Self::Date(d) => Ok(Some(*d)),
        }
    }
}

/// Defer: release any block and push the task's dates out to `target`.
pub fn defer(
    task: &Task,
    current_block: Option<&FocusBlock>,
    target: DeferTarget,
    today: NaiveDate,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<Changeset> {
    reject_done(task, "defer")?;
    let date = target.resolve(today)?;

    let mut updated = task.clone();
    updated.scheduled_block_id = None;
    updated.do_date = date;
    updated.committed_date = date;
    let m = &mut updated.scheduling_metadata;
    m.defer_count += 1;
    m.last_deferred_at = Some(now);
    m.defer_reason = reason;

    let block = match current_block {
        Some(b) => BlockChange::Delete { block: b.clone() },
        None => BlockChange::None,
    };

    Ok(Changeset {
        kind: TransitionKind::Defer,
        block,
        task: updated,
    })
}

/// Complete: excluded from future passes; block and block reference are kept.
pub fn complete(task: &Task) -> Changeset {
    let mut updated = task.clone();
    updated.status = TaskStatus::Done;
    Changeset {
        kind: TransitionKind::Complete,
        block: BlockChange::None,
        task: updated,
    }
}
