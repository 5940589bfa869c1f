//! Allocation engine: greedy, day-by-day placement of the backlog into free time.
//!
//! Deterministic by construction: a stable total order over the backlog, a
//! single sequential pass per day, and no wall-clock reads beyond the
//! supplied target date and optional `not_before` instant.
//!
//! Per day:
//! 1) compute the working window (clipped by `not_before` on the first day)
//! 2) compute free intervals against everything occupied so far
//! 3) walk the ordered backlog; place each eligible task into the earliest
//!    free interval long enough for it, while the daily cap allows
//! 4) placed tasks leave the backlog; the rest carry to the next day

use std::cmp::Ordering;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::block::FocusBlock;
use crate::error::{Result, SchedulerError};
use crate::intervals::{free_intervals, merge_intervals, Interval};
use crate::prefs::SchedulerPreferences;
use crate::task::Task;
use crate::time::{ceil_to_quarter_hour, day_window};

/// One committed placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub task: Task,
    pub day: NaiveDate,
    pub interval: Interval,
    pub block: FocusBlock,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub placements: Vec<Placement>,
    /// Backlog tasks never placed within the horizon, in backlog order.
    pub residual: Vec<Task>,
}

impl Allocation {
    pub fn created_blocks(&self) -> Vec<FocusBlock> {
        self.placements.iter().map(|p| p.block.clone()).collect()
    }

    pub fn minutes_scheduled(&self) -> u64 {
        self.placements
            .iter()
            .map(|p| u64::from(p.task.duration_minutes))
            .sum()
    }
}

/// Total order used by the engine: priority (P1 first), then due date with
/// undated tasks last. `sort_by` is stable, so remaining ties keep input order.
pub fn backlog_order(a: &Task, b: &Task) -> Ordering {
    a.priority_level
        .cmp(&b.priority_level)
        .then_with(|| match (a.due_date, b.due_date) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

/// Schedulable tasks (auto-scheduled, not done, not placed) in engine order.
pub fn ordered_backlog(tasks: &[Task]) -> Vec<&Task> {
    let mut backlog: Vec<&Task> = tasks.iter().filter(|t| t.is_schedulable()).collect();
    backlog.sort_by(|a, b| backlog_order(a, b));
    backlog
}

/// A task may land on `day` only if its deadline has not passed and its
/// intended work day has arrived.
pub fn eligible_on(task: &Task, day: NaiveDate) -> bool {
    task.due_date.is_none_or(|due| due >= day) && task.do_date.is_none_or(|d| d <= day)
}

pub(crate) fn occupied_minutes(occupied: &[FocusBlock], window: &Interval) -> u64 {
    let clipped: Vec<Interval> = occupied
        .iter()
        .filter_map(|b| b.interval().clip(window))
        .collect();
    merge_intervals(clipped)
        .iter()
        .map(|i| i.minutes().max(0) as u64)
        .sum()
}

/// Run the engine. Inputs are never mutated; the result is safe to discard.
pub fn allocate(
    tasks: &[Task],
    existing_blocks: &[FocusBlock],
    prefs: &SchedulerPreferences,
    target_date: NaiveDate,
    not_before: Option<DateTime<Utc>>,
) -> Result<Allocation> {
    prefs.validate()?;
    let tz = prefs.tz()?;
    let cap = u64::from(prefs.daily_cap());

    let mut pending = ordered_backlog(tasks);
    for t in &pending {
        t.validate()?;
    }

    let not_before = not_before.map(ceil_to_quarter_hour);
    let mut occupied: Vec<FocusBlock> = existing_blocks.to_vec();
    let mut placements = Vec::new();

    for offset in 0..=i64::from(prefs.scheduling_horizon_days) {
        if pending.is_empty() {
            break;
        }
        let day = target_date + Duration::days(offset);
        let (ws, we) = match day_window(day, prefs.working_hours_start, prefs.working_hours_end, tz) {
            Ok(w) => w,
            Err(e) => {
                warn!(%day, error = %e, "skipping day without a valid working window");
                continue;
            }
        };
        let full_window = Interval::new(ws, we);

        let mut window = full_window;
        if let Some(nb) = not_before {
            if nb > window.start {
                window.start = nb.min(window.end);
            }
        }
        if window.is_empty() {
            debug!(%day, "working window already elapsed");
            continue;
        }

        let mut free = free_intervals(window, &occupied);
        let mut used = occupied_minutes(&occupied, &full_window);
        let mut carried = Vec::with_capacity(pending.len());

        for task in pending {
            let minutes = task.duration_minutes;
            if !eligible_on(task, day) || used + u64::from(minutes) > cap {
                carried.push(task);
                continue;
            }
            let Some(idx) = free.iter().position(|i| i.fits(minutes)) else {
                carried.push(task);
                continue;
            };

            let start = free[idx].start;
            let block = FocusBlock::draft_for(task, start, &prefs.timezone);
            let interval = block.interval();

            free[idx].start = interval.end;
            if free[idx].is_empty() {
                free.remove(idx);
            }
            used += u64::from(minutes);
            occupied.push(block.clone());

            debug!(task_id = %task.id, %day, start = %interval.start, minutes, "placed task");
            placements.push(Placement {
                task: task.clone(),
                day,
                interval,
                block,
            });
        }
        pending = carried;
    }

    Ok(Allocation {
        placements,
        residual: pending.into_iter().cloned().collect(),
    })
}

/// Earliest slot on `day` that fits `minutes`, honouring the daily cap.
///
/// Used by manual commit-to-day; shares the engine's window and cap rules.
pub fn earliest_slot_on(
    day: NaiveDate,
    minutes: u32,
    occupied: &[FocusBlock],
    prefs: &SchedulerPreferences,
    not_before: Option<DateTime<Utc>>,
) -> Result<Option<DateTime<Utc>>> {
    if minutes == 0 {
        return Err(SchedulerError::Validation("duration_minutes must be > 0".to_string()));
    }
    let tz = prefs.tz()?;
    let (ws, we) = day_window(day, prefs.working_hours_start, prefs.working_hours_end, tz)?;
    let full_window = Interval::new(ws, we);
    let mut window = full_window;
    if let Some(nb) = not_before.map(ceil_to_quarter_hour) {
        if nb > window.start {
            window.start = nb.min(window.end);
        }
    }
    if occupied_minutes(occupied, &full_window) + u64::from(minutes) > u64::from(prefs.daily_cap()) {
        return Ok(None);
    }
    Ok(free_intervals(window, occupied)
        .into_iter()
        .find(|i| i.fits(minutes))
        .map(|i| i.start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{PriorityLevel, TaskStatus};
    use chrono::TimeZone;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, d).unwrap()
    }

    fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, d, h, m, 0).unwrap()
    }

    fn prefs(horizon: u32) -> SchedulerPreferences {
        SchedulerPreferences::default().with_horizon_days(horizon)
    }

    fn existing(id: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> FocusBlock {
        let mut b = FocusBlock::draft_for(&Task::new(id, id), start, "UTC");
        b.end_time = end;
        b
    }

    #[test]
    fn ordering_priority_then_due_then_input_order() {
        let tasks = vec![
            Task::new("p3-undated", "a").with_priority(PriorityLevel::P3),
            Task::new("p1-undated", "b").with_priority(PriorityLevel::P1),
            Task::new("p1-late", "c").with_priority(PriorityLevel::P1).with_due_date(day(10)),
            Task::new("p1-early", "d").with_priority(PriorityLevel::P1).with_due_date(day(5)),
            Task::new("p3-undated-2", "e").with_priority(PriorityLevel::P3),
        ];
        let ids: Vec<&str> = ordered_backlog(&tasks).iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["p1-early", "p1-late", "p1-undated", "p3-undated", "p3-undated-2"]);
    }

    #[test]
    fn backlog_skips_done_manual_and_placed() {
        let mut done = Task::new("done", "x");
        done.status = TaskStatus::Done;
        let mut placed = Task::new("placed", "x");
        placed.scheduled_block_id = Some("blk".into());
        let tasks = vec![done, placed, Task::new("manual", "x").manual(), Task::new("ok", "x")];

        let alloc = allocate(&tasks, &[], &prefs(0), day(2), None).unwrap();
        assert_eq!(alloc.placements.len(), 1);
        assert_eq!(alloc.placements[0].task.id, "ok");
        assert!(alloc.residual.is_empty());
    }

    #[test]
    fn same_day_tasks_pack_back_to_back() {
        let tasks = vec![
            Task::new("low", "x").with_priority(PriorityLevel::P3).with_duration(30),
            Task::new("high", "x").with_priority(PriorityLevel::P1).with_duration(60),
        ];
        let alloc = allocate(&tasks, &[], &prefs(0), day(2), None).unwrap();
        let got: Vec<(&str, DateTime<Utc>)> = alloc
            .placements
            .iter()
            .map(|p| (p.task.id.as_str(), p.interval.start))
            .collect();
        assert_eq!(got, vec![("high", at(2, 9, 0)), ("low", at(2, 10, 0))]);
    }

    #[test]
    fn smaller_task_fills_gap_a_larger_one_skips() {
        let blocks = vec![existing("meeting", at(2, 10, 0), at(2, 17, 0))];
        let tasks = vec![
            Task::new("big", "x").with_priority(PriorityLevel::P1).with_duration(90),
            Task::new("small", "x").with_priority(PriorityLevel::P2).with_duration(45),
        ];
        let alloc = allocate(&tasks, &blocks, &prefs(1), day(2), None).unwrap();

        let small = alloc.placements.iter().find(|p| p.task.id == "small").unwrap();
        assert_eq!(small.interval, Interval::new(at(2, 9, 0), at(2, 9, 45)));
        let big = alloc.placements.iter().find(|p| p.task.id == "big").unwrap();
        assert_eq!(big.interval.start, at(3, 9, 0));
    }

    #[test]
    fn due_date_blocks_later_days() {
        let blocks = vec![existing("busy", at(2, 9, 0), at(2, 17, 0))];
        let tasks = vec![Task::new("t", "x").with_due_date(day(2)).with_duration(30)];
        let alloc = allocate(&tasks, &blocks, &prefs(5), day(2), None).unwrap();
        assert!(alloc.placements.is_empty());
        assert_eq!(alloc.residual.len(), 1);
    }

    #[test]
    fn do_date_is_earliest_day() {
        let tasks = vec![Task::new("t", "x").with_do_date(day(4)).with_duration(30)];
        let alloc = allocate(&tasks, &[], &prefs(5), day(2), None).unwrap();
        assert_eq!(alloc.placements[0].day, day(4));
    }

    #[test]
    fn daily_cap_moves_overflow_to_next_day() {
        let p = prefs(2).with_max_daily_minutes(90);
        let tasks = vec![
            Task::new("a", "x").with_duration(60),
            Task::new("b", "x").with_duration(60),
            Task::new("c", "x").with_duration(30),
        ];
        let alloc = allocate(&tasks, &[], &p, day(2), None).unwrap();
        let days: Vec<(&str, NaiveDate)> = alloc
            .placements
            .iter()
            .map(|pl| (pl.task.id.as_str(), pl.day))
            .collect();
        assert_eq!(days, vec![("a", day(2)), ("c", day(2)), ("b", day(3))]);
    }

    #[test]
    fn cap_counts_existing_blocks() {
        let p = prefs(0).with_max_daily_minutes(120);
        let blocks = vec![existing("prior", at(2, 9, 0), at(2, 10, 30))];
        let tasks = vec![Task::new("a", "x").with_duration(60)];
        let alloc = allocate(&tasks, &blocks, &p, day(2), None).unwrap();
        assert!(alloc.placements.is_empty());
    }

    #[test]
    fn not_before_clips_first_day_to_quarter_hour() {
        let tasks = vec![Task::new("a", "x").with_duration(30)];
        let now = at(2, 13, 7);
        let alloc = allocate(&tasks, &[], &prefs(1), day(2), Some(now)).unwrap();
        assert_eq!(alloc.placements[0].interval.start, at(2, 13, 15));

        let after_hours = at(2, 18, 0);
        let alloc = allocate(&tasks, &[], &prefs(1), day(2), Some(after_hours)).unwrap();
        assert_eq!(alloc.placements[0].interval.start, at(3, 9, 0));
    }

    #[test]
    fn zero_duration_is_rejected_before_placing_anything() {
        let tasks = vec![Task::new("ok", "x"), Task::new("bad", "x").with_duration(0)];
        let err = allocate(&tasks, &[], &prefs(1), day(2), None).unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[test]
    fn horizon_is_inclusive() {
        let blocks = vec![
            existing("d2", at(2, 9, 0), at(2, 17, 0)),
            existing("d3", at(3, 9, 0), at(3, 17, 0)),
        ];
        let tasks = vec![Task::new("a", "x").with_duration(30)];
        let alloc = allocate(&tasks, &blocks, &prefs(2), day(2), None).unwrap();
        assert_eq!(alloc.placements[0].day, day(4));

        let alloc = allocate(&tasks, &blocks, &prefs(1), day(2), None).unwrap();
        assert!(alloc.placements.is_empty());
    }

    #[test]
    fn dst_gap_day_is_skipped_not_fatal() {
        // 2026-03-08: New York clocks jump from 02:00 to 03:00.
        let p = SchedulerPreferences::default()
            .with_working_hours(
                chrono::NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
                chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            )
            .with_horizon_days(1)
            .with_timezone("America/New_York");
        let tasks = vec![Task::new("a", "x").with_duration(30)];

        let alloc = allocate(&tasks, &[], &p, day(8), None).unwrap();
        assert_eq!(alloc.placements.len(), 1);
        assert_eq!(alloc.placements[0].day, day(9));
        assert_eq!(alloc.placements[0].interval.start, at(9, 6, 30));
    }

    #[test]
    fn earliest_slot_respects_blocks_and_cap() {
        let blocks = vec![existing("m", at(2, 9, 0), at(2, 11, 0))];
        let p = prefs(0);
        assert_eq!(
            earliest_slot_on(day(2), 60, &blocks, &p, None).unwrap(),
            Some(at(2, 11, 0))
        );
        let tight = prefs(0).with_max_daily_minutes(150);
        assert_eq!(earliest_slot_on(day(2), 60, &blocks, &tight, None).unwrap(), None);
    }
}
