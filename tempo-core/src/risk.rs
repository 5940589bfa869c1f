//! At-risk assessment of tasks the engine could not place.
//!
//! Classification only ever touches task metadata, never blocks.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::task::Task;

pub const INSUFFICIENT_TIME: &str = "insufficient free time before due date";
pub const DEADLINE_PASSED: &str = "deadline already passed";

pub const SUGGEST_FREE_TIME: &str = "shorten duration, reschedule due date, or manually free a slot";
pub const SUGGEST_PAST_DUE: &str = "reschedule due date or mark the task done";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtRiskReason {
    InsufficientFreeTime,
    DeadlinePassed,
}

impl AtRiskReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientFreeTime => INSUFFICIENT_TIME,
            Self::DeadlinePassed => DEADLINE_PASSED,
        }
    }

    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::InsufficientFreeTime => SUGGEST_FREE_TIME,
            Self::DeadlinePassed => SUGGEST_PAST_DUE,
        }
    }
}

impl std::fmt::Display for AtRiskReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Assessment {
    AtRisk(AtRiskReason),
    /// Unplaced, but no deadline inside the horizon is violated.
    Unscheduled,
}

/// Classify a single unplaced task for a run over `[target, horizon_end]`.
pub fn classify(task: &Task, target: NaiveDate, horizon_end: NaiveDate) -> Assessment {
    match task.due_date {
        Some(due) if due < target => Assessment::AtRisk(AtRiskReason::DeadlinePassed),
        Some(due) if due <= horizon_end => Assessment::AtRisk(AtRiskReason::InsufficientFreeTime),
        _ => Assessment::Unscheduled,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtRiskTask {
    pub task: Task,
    pub reason: String,
    pub suggested_action: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskReport {
    pub at_risk: Vec<AtRiskTask>,
    /// Residual tasks not at risk; any stale at-risk flag is cleared on these.
    pub unscheduled: Vec<Task>,
}

/// Assess the engine's residual backlog, returning tasks with updated metadata.
pub fn assess(residual: &[Task], target: NaiveDate, horizon_end: NaiveDate) -> RiskReport {
    let mut report = RiskReport::default();
    for task in residual {
        let mut t = task.clone();
        match classify(task, target, horizon_end) {
            Assessment::AtRisk(reason) => {
                t.scheduling_metadata.at_risk = true;
                t.scheduling_metadata.at_risk_reason = Some(reason.to_string());
                report.at_risk.push(AtRiskTask {
                    task: t,
                    reason: reason.to_string(),
                    suggested_action: reason.suggested_action().to_string(),
                });
            }
            Assessment::Unscheduled => {
                t.scheduling_metadata.at_risk = false;
                t.scheduling_metadata.at_risk_reason = None;
                report.unscheduled.push(t);
            }
        }
    }
    report
}
