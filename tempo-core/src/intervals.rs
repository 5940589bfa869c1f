//! Free-interval computation for a single working window.
//!
//! Pure: inputs are borrowed and never mutated, so the allocator can call
//! this as often as it likes while it commits placements.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::block::FocusBlock;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn fits(&self, minutes: u32) -> bool {
        self.start + Duration::minutes(minutes.into()) <= self.end
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Clip to `window`; `None` when nothing of positive length remains.
    pub fn clip(&self, window: &Interval) -> Option<Interval> {
        if self.end <= window.start || self.start >= window.end {
            return None;
        }
        let clipped = Interval {
            start: self.start.max(window.start),
            end: self.end.min(window.end),
        };
        (!clipped.is_empty()).then_some(clipped)
    }
}

/// Sort and coalesce overlapping or touching intervals.
pub fn merge_intervals(mut intervals: Vec<Interval>) -> Vec<Interval> {
    intervals.retain(|i| !i.is_empty());
    intervals.sort_unstable();

    let mut merged: Vec<Interval> = Vec::with_capacity(intervals.len());
    for interval in intervals {
        match merged.last_mut() {
            Some(last) if interval.start <= last.end => {
                if interval.end > last.end {
                    last.end = interval.end;
                }
            }
            _ => merged.push(interval),
        }
    }
    merged
}

/// Subtract `busy` from `window`, returning ordered, disjoint, non-empty gaps.
pub fn subtract(window: Interval, busy: &[Interval]) -> Vec<Interval> {
    if window.is_empty() {
        return Vec::new();
    }

    let clipped: Vec<Interval> = busy.iter().filter_map(|b| b.clip(&window)).collect();

    let mut free = Vec::new();
    let mut cursor = window.start;
    for b in merge_intervals(clipped) {
        if b.start > cursor {
            free.push(Interval::new(cursor, b.start));
        }
        if b.end > cursor {
            cursor = b.end;
        }
    }
    if cursor < window.end {
        free.push(Interval::new(cursor, window.end));
    }
    free
}

/// Free sub-intervals of a working window given the blocks already occupying it.
///
/// Blocks entirely outside the window are ignored; partial overlaps are
/// clipped to the window boundary.
pub fn free_intervals(window: Interval, occupied: &[FocusBlock]) -> Vec<Interval> {
    let busy: Vec<Interval> = occupied.iter().map(FocusBlock::interval).collect();
    subtract(window, &busy)
}
