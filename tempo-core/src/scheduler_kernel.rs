//! Scheduler Kernel: ties the pure engine and lifecycle to a store, an audit
//! sink and an optional external mirror.
//!
//! Write rules:
//! - every transition goes through [`apply_changeset`] (one logical transaction)
//! - Allocate commits each placement independently; failures are collected,
//!   never thrown, so sibling commits still land
//! - scheduling an already-placed task is a no-op with a warning
//! - audit and mirror failures are logged and never fail the operation

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::allocator::{earliest_slot_on, occupied_minutes};
use crate::audit::{AuditEvent, AuditSink};
use crate::block::FocusBlock;
use crate::error::{Result, SchedulerError};
use crate::intervals::Interval;
use crate::lifecycle::{
    self, BlockChange, Changeset, CommitmentState, DeferTarget, ScheduleOutcome, Warning,
};
use crate::mirror::{NoMirror, TaskMirror};
use crate::planner::{plan_allocation, AllocateRequest, AllocationPlan, AllocationSummary, ScheduledTask};
use crate::prefs::SchedulerPreferences;
use crate::risk::AtRiskTask;
use crate::store::{apply_changeset, Store};
use crate::task::Task;
use crate::time::{day_window, local_date, local_to_utc};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistFailure {
    pub task_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateResponse {
    pub scheduled_tasks: Vec<ScheduledTask>,
    pub created_blocks: Vec<FocusBlock>,
    pub at_risk_tasks: Vec<AtRiskTask>,
    pub unscheduled_tasks: Vec<Task>,
    pub summary: AllocationSummary,
    pub warnings: Vec<Warning>,
    pub failures: Vec<PersistFailure>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub task_id: String,
    pub new_date: NaiveDate,
    #[serde(default)]
    pub new_time: Option<NaiveTime>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleResponse {
    pub task: Task,
    pub message: String,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferRequest {
    pub task_id: String,
    pub defer_to: DeferTarget,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferResponse {
    pub task: Task,
    pub defer_count: u32,
    pub message: String,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub task_id: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub time: Option<NaiveTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResponse {
    pub task: Task,
    pub block: Option<FocusBlock>,
    pub warnings: Vec<Warning>,
}

pub struct SchedulerKernel<S: Store, A: AuditSink, M: TaskMirror = NoMirror> {
    store: S,
    audit: A,
    mirror: M,
    prefs: SchedulerPreferences,
}

impl<S: Store, A: AuditSink> SchedulerKernel<S, A, NoMirror> {
    pub fn new(store: S, audit: A, prefs: SchedulerPreferences) -> Self {
        Self {
            store,
            audit,
            mirror: NoMirror,
            prefs,
        }
    }
}

impl<S: Store, A: AuditSink, M: TaskMirror> SchedulerKernel<S, A, M> {
    pub fn with_mirror<M2: TaskMirror>(self, mirror: M2) -> SchedulerKernel<S, A, M2> {
        SchedulerKernel {
            store: self.store,
            audit: self.audit,
            mirror,
            prefs: self.prefs,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn preferences(&self) -> &SchedulerPreferences {
        &self.prefs
    }

    pub fn audit(&self) -> &A {
        &self.audit
    }

    /// Build the request and plan without writing anything.
    pub fn plan(&self, owner: &str, target_date: Option<NaiveDate>, now: DateTime<Utc>) -> Result<AllocationPlan> {
        let req = self.allocate_request(owner, target_date, now)?;
        plan_allocation(&req, now)
    }

    /// Allocate the owner's backlog over the horizon and commit placements.
    pub fn allocate(
        &mut self,
        owner: &str,
        target_date: Option<NaiveDate>,
        now: DateTime<Utc>,
    ) -> Result<AllocateResponse> {
        let tz = self.prefs.tz()?;
        let plan = self.plan(owner, target_date, now)?;

        let mut resp = AllocateResponse {
            at_risk_tasks: plan.at_risk_tasks.clone(),
            unscheduled_tasks: plan.unscheduled_tasks.clone(),
            ..AllocateResponse::default()
        };

        let mut unsaved = 0;
        for st in &plan.scheduled_tasks {
            let day = local_date(st.scheduled_start, tz);
            match self.commit_placement(owner, &st.task.id, st.block.clone(), day, now) {
                Ok(Committed::Saved(task)) => {
                    if let Some(w) = self.mirror_task(&task, Some(&st.block)) {
                        resp.warnings.push(w);
                    }
                    resp.created_blocks.push(st.block.clone());
                    resp.scheduled_tasks.push(ScheduledTask {
                        task,
                        scheduled_start: st.scheduled_start,
                        scheduled_end: st.scheduled_end,
                        block: st.block.clone(),
                    });
                }
                Ok(Committed::Skipped(w)) => resp.warnings.push(w),
                Err(e) => {
                    unsaved += 1;
                    warn!(task_id = %st.task.id, error = %e, "failed to persist placement");
                    resp.failures.push(PersistFailure {
                        task_id: st.task.id.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        for r in &plan.at_risk_tasks {
            if let Err(e) = self.persist_risk_flag(owner, &r.task) {
                resp.failures.push(PersistFailure {
                    task_id: r.task.id.clone(),
                    error: e.to_string(),
                });
            }
        }
        for t in &plan.unscheduled_tasks {
            if let Err(e) = self.persist_risk_flag(owner, t) {
                resp.failures.push(PersistFailure {
                    task_id: t.id.clone(),
                    error: e.to_string(),
                });
            }
        }

        resp.summary = AllocationSummary {
            total_scheduled: resp.scheduled_tasks.len(),
            total_unscheduled: plan.summary.total_unscheduled + unsaved,
            total_at_risk: plan.summary.total_at_risk,
            total_minutes_scheduled: resp
                .scheduled_tasks
                .iter()
                .map(|s| u64::from(s.task.duration_minutes))
                .sum(),
        };

        info!(
            owner,
            scheduled = resp.summary.total_scheduled,
            at_risk = resp.summary.total_at_risk,
            unscheduled = resp.summary.total_unscheduled,
            failures = resp.failures.len(),
            "allocation committed"
        );
        Ok(resp)
    }

    /// Reschedule a task to a new date and, optionally, a new local start time.
    pub fn reschedule(&mut self, owner: &str, req: RescheduleRequest, now: DateTime<Utc>) -> Result<RescheduleResponse> {
        require_task_id(&req.task_id)?;
        let tz = self.prefs.tz()?;
        let task = self.store.read_task(owner, &req.task_id)?;
        let current = self.owned_block(&task)?;

        let new_start = req
            .new_time
            .map(|t| local_to_utc(req.new_date, t, tz))
            .transpose()?;
        if let Some(start) = new_start {
            let slot = Interval::new(start, start + Duration::minutes(task.duration_minutes.into()));
            self.ensure_in_window(req.new_date, slot, now)?;
            self.ensure_free(slot, current.as_ref().map(|b| b.id.as_str()))?;
        }

        let cs = lifecycle::reschedule(
            &task,
            current.as_ref(),
            req.new_date,
            new_start,
            &self.prefs.timezone,
            req.reason.clone(),
            now,
        )?;
        let saved = apply_changeset(&mut self.store, &cs)?;

        let message = match (&cs.block, req.new_time) {
            (BlockChange::Update { .. } | BlockChange::Create { .. }, Some(t)) => format!(
                "Rescheduled \"{}\" to {} at {}",
                saved.title,
                req.new_date,
                t.format("%H:%M")
            ),
            _ => format!(
                "Rescheduled \"{}\" to {}; it will be placed on the next allocation pass",
                saved.title, req.new_date
            ),
        };

        self.emit(&cs, &message, json!({
            "task_id": saved.id,
            "new_date": req.new_date,
            "new_time": req.new_time.map(|t| t.format("%H:%M").to_string()),
            "reason": req.reason,
            "block_id": saved.scheduled_block_id,
        }));
        let warnings = self.mirror_changeset(&saved, &cs).into_iter().collect();
        info!(task_id = %saved.id, new_date = %req.new_date, "task rescheduled");

        Ok(RescheduleResponse {
            task: saved,
            message,
            warnings,
        })
    }

    /// Defer a task to a symbolic or explicit target, releasing any block.
    pub fn defer(&mut self, owner: &str, req: DeferRequest, now: DateTime<Utc>) -> Result<DeferResponse> {
        require_task_id(&req.task_id)?;
        let tz = self.prefs.tz()?;
        let today = local_date(now, tz);
        let task = self.store.read_task(owner, &req.task_id)?;
        let current = self.owned_block(&task)?;

        let cs = lifecycle::defer(&task, current.as_ref(), req.defer_to, today, req.reason.clone(), now)?;
        let saved = apply_changeset(&mut self.store, &cs)?;

        let defer_count = saved.scheduling_metadata.defer_count;
        let message = match saved.do_date {
            Some(d) => format!("Deferred \"{}\" to {d} (deferred {defer_count}x)", saved.title),
            None => format!("Deferred \"{}\" to someday (deferred {defer_count}x)", saved.title),
        };

        self.emit(&cs, &message, json!({
            "task_id": saved.id,
            "defer_to": req.defer_to,
            "resolved_date": saved.do_date,
            "defer_count": defer_count,
            "reason": req.reason,
        }));
        let warnings = self.mirror_changeset(&saved, &cs).into_iter().collect();
        info!(task_id = %saved.id, defer_count, "task deferred");

        Ok(DeferResponse {
            task: saved,
            defer_count,
            message,
            warnings,
        })
    }

    /// Manual commit-to-day: place one task on `date`, at `time` if given,
    /// otherwise in the earliest free slot of that day's working window.
    ///
    /// `date` must fall within today ..= horizon end and not after the due date.
    /// An explicit time must be upcoming, inside working hours, free and under
    /// the daily cap.
    pub fn commit(&mut self, owner: &str, req: CommitRequest, now: DateTime<Utc>) -> Result<CommitResponse> {
        require_task_id(&req.task_id)?;
        let tz = self.prefs.tz()?;
        let task = self.store.read_task(owner, &req.task_id)?;

        if task.is_placed() {
            let current = self.owned_block(&task)?;
            let w = already_scheduled(&task);
            warn!(task_id = %task.id, "{}", w.message);
            return Ok(CommitResponse {
                task,
                block: current,
                warnings: vec![w],
            });
        }
        task.validate()?;
        self.ensure_committable(&task, req.date, now)?;

        let start = match req.time {
            Some(t) => {
                let start = local_to_utc(req.date, t, tz)?;
                let slot = Interval::new(start, start + Duration::minutes(task.duration_minutes.into()));
                self.ensure_in_window(req.date, slot, now)?;
                self.ensure_free(slot, None)?;
                self.ensure_under_cap(req.date, task.duration_minutes)?;
                start
            }
            None => {
                let (ws, we) = day_window(req.date, self.prefs.working_hours_start, self.prefs.working_hours_end, tz)?;
                let occupied = self.store.read_blocks_in_range(ws, we)?;
                earliest_slot_on(req.date, task.duration_minutes, &occupied, &self.prefs, Some(now))?
                    .ok_or_else(|| {
                        SchedulerError::Validation(format!(
                            "no free slot of {} minutes on {}",
                            task.duration_minutes, req.date
                        ))
                    })?
            }
        };

        let block = FocusBlock::draft_for(&task, start, &self.prefs.timezone);
        match self.commit_placement(owner, &task.id, block.clone(), req.date, now)? {
            Committed::Saved(saved) => {
                let warnings = self.mirror_task(&saved, Some(&block)).into_iter().collect();
                Ok(CommitResponse {
                    task: saved,
                    block: Some(block),
                    warnings,
                })
            }
            Committed::Skipped(w) => Ok(CommitResponse {
                task,
                block: None,
                warnings: vec![w],
            }),
        }
    }

    /// Mark a task done. Its block and block reference are left as history.
    pub fn complete(&mut self, owner: &str, task_id: &str, _now: DateTime<Utc>) -> Result<Task> {
        require_task_id(task_id)?;
        let task = self.store.read_task(owner, task_id)?;
        let cs = lifecycle::complete(&task);
        let saved = apply_changeset(&mut self.store, &cs)?;
        let message = format!("Completed \"{}\"", saved.title);
        self.emit(&cs, &message, json!({ "task_id": saved.id }));
        Ok(saved)
    }

    pub fn commitment_state(&self, owner: &str, task_id: &str) -> Result<(Task, CommitmentState)> {
        let task = self.store.read_task(owner, task_id)?;
        let state = lifecycle::state_of(&task);
        Ok((task, state))
    }

    fn allocate_request(&self, owner: &str, target_date: Option<NaiveDate>, now: DateTime<Utc>) -> Result<AllocateRequest> {
        self.prefs.validate()?;
        let tz = self.prefs.tz()?;
        let target = target_date.unwrap_or_else(|| local_date(now, tz));
        let horizon_end = self.prefs.horizon_end(target);

        // UTC day bounds padded by one day cover every local working window.
        let range_start = Utc.from_utc_datetime(&(target - Duration::days(1)).and_time(NaiveTime::MIN));
        let range_end = Utc.from_utc_datetime(&(horizon_end + Duration::days(2)).and_time(NaiveTime::MIN));

        Ok(AllocateRequest {
            tasks: self.store.read_tasks_for_owner(owner)?,
            existing_blocks: self.store.read_blocks_in_range(range_start, range_end)?,
            preferences: self.prefs.clone(),
            target_date: target,
            not_before: Some(now),
        })
    }

    /// Schedule one task against the store's current view of it.
    fn commit_placement(
        &mut self,
        owner: &str,
        task_id: &str,
        block: FocusBlock,
        day: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<Committed> {
        let fresh = self.store.read_task(owner, task_id)?;
        match lifecycle::schedule(&fresh, block, day, now)? {
            ScheduleOutcome::AlreadyScheduled(w) => {
                warn!(task_id, "{}", w.message);
                Ok(Committed::Skipped(w))
            }
            ScheduleOutcome::Applied(cs) => {
                let saved = apply_changeset(&mut self.store, &cs)?;
                let description = format!("Scheduled \"{}\" on {day}", saved.title);
                let (start, end) = match &cs.block {
                    BlockChange::Create { block } => (Some(block.start_time), Some(block.end_time)),
                    _ => (None, None),
                };
                self.emit(&cs, &description, json!({
                    "task_id": saved.id,
                    "block_id": saved.scheduled_block_id,
                    "start_time": start,
                    "end_time": end,
                }));
                Ok(Committed::Saved(saved))
            }
        }
    }

    /// Write the at-risk flag carried by `assessed`, if it differs from the store.
    fn persist_risk_flag(&mut self, owner: &str, assessed: &Task) -> Result<()> {
        let mut fresh = self.store.read_task(owner, &assessed.id)?;
        if fresh.is_placed() {
            return Ok(());
        }
        let want = &assessed.scheduling_metadata;
        let have = &fresh.scheduling_metadata;
        if have.at_risk == want.at_risk && have.at_risk_reason == want.at_risk_reason {
            return Ok(());
        }
        fresh.scheduling_metadata.at_risk = want.at_risk;
        fresh.scheduling_metadata.at_risk_reason = want.at_risk_reason.clone();
        self.store.update_task(&fresh)?;
        if want.at_risk {
            warn!(task_id = %fresh.id, reason = ?want.at_risk_reason, "task at risk");
        }
        Ok(())
    }

    /// The task's block, verifying it exists and back-references the task.
    fn owned_block(&self, task: &Task) -> Result<Option<FocusBlock>> {
        let Some(id) = &task.scheduled_block_id else {
            return Ok(None);
        };
        match self.store.read_block(id)? {
            Some(b) if b.belongs_to(&task.id) => Ok(Some(b)),
            _ => Err(SchedulerError::block_not_found(id)),
        }
    }

    /// A manual commit lands between today and the horizon end, and not after the deadline.
    fn ensure_committable(&self, task: &Task, date: NaiveDate, now: DateTime<Utc>) -> Result<()> {
        let today = local_date(now, self.prefs.tz()?);
        let horizon_end = self.prefs.horizon_end(today);
        if let Some(due) = task.due_date.filter(|due| *due < date) {
            return Err(SchedulerError::Validation(format!(
                "cannot commit task {} to {date}: it is due {due}",
                task.id
            )));
        }
        if date < today || date > horizon_end {
            return Err(SchedulerError::Validation(format!(
                "cannot commit task {} to {date}: outside {today} ..= {horizon_end}",
                task.id
            )));
        }
        Ok(())
    }

    /// An explicit slot starts no earlier than `now` and sits inside `date`'s working window.
    fn ensure_in_window(&self, date: NaiveDate, slot: Interval, now: DateTime<Utc>) -> Result<()> {
        if slot.start < now {
            return Err(SchedulerError::Validation(format!(
                "requested start {} is in the past",
                slot.start
            )));
        }
        let (ws, we) = day_window(date, self.prefs.working_hours_start, self.prefs.working_hours_end, self.prefs.tz()?)?;
        if slot.start < ws || slot.end > we {
            return Err(SchedulerError::Validation(format!(
                "requested slot {} - {} is outside working hours {} - {}",
                slot.start, slot.end, ws, we
            )));
        }
        Ok(())
    }

    fn ensure_under_cap(&self, date: NaiveDate, minutes: u32) -> Result<()> {
        let (ws, we) = day_window(date, self.prefs.working_hours_start, self.prefs.working_hours_end, self.prefs.tz()?)?;
        let occupied = self.store.read_blocks_in_range(ws, we)?;
        let used = occupied_minutes(&occupied, &Interval::new(ws, we));
        let cap = u64::from(self.prefs.daily_cap());
        if used + u64::from(minutes) > cap {
            return Err(SchedulerError::Validation(format!(
                "committing {minutes} minutes on {date} exceeds the daily cap ({used} of {cap} used)"
            )));
        }
        Ok(())
    }

    fn ensure_free(&self, slot: Interval, ignore_block: Option<&str>) -> Result<()> {
        let clash = self
            .store
            .read_blocks_in_range(slot.start, slot.end)?
            .into_iter()
            .find(|b| Some(b.id.as_str()) != ignore_block && b.interval().overlaps(&slot));
        match clash {
            Some(b) => Err(SchedulerError::Validation(format!(
                "requested slot overlaps block {} ({} - {})",
                b.id, b.start_time, b.end_time
            ))),
            None => Ok(()),
        }
    }

    fn emit(&self, cs: &Changeset, description: &str, metadata: serde_json::Value) {
        let ev = AuditEvent::new(cs.kind.as_str(), description, metadata);
        if let Err(e) = self.audit.record(&ev) {
            warn!(transition = cs.kind.as_str(), error = %e, "audit sink failed; continuing");
        }
    }

    fn mirror_changeset(&self, task: &Task, cs: &Changeset) -> Option<Warning> {
        let block = match &cs.block {
            BlockChange::Create { block } => Some(block),
            BlockChange::Update { updated, .. } => Some(updated),
            BlockChange::Delete { .. } | BlockChange::None => None,
        };
        self.mirror_task(task, block)
    }

    fn mirror_task(&self, task: &Task, block: Option<&FocusBlock>) -> Option<Warning> {
        match self.mirror.mirror(task, block) {
            Ok(()) => None,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "mirror write-through failed");
                Some(Warning {
                    task_id: task.id.clone(),
                    message: format!("external mirror failed: {e}"),
                })
            }
        }
    }
}

enum Committed {
    Saved(Task),
    Skipped(Warning),
}

fn require_task_id(task_id: &str) -> Result<()> {
    if task_id.trim().is_empty() {
        return Err(SchedulerError::Validation("task_id is required".to_string()));
    }
    Ok(())
}

fn already_scheduled(task: &Task) -> Warning {
    Warning {
        task_id: task.id.clone(),
        message: format!(
            "task {} is already scheduled in block {}",
            task.id,
            task.scheduled_block_id.as_deref().unwrap_or_default()
        ),
    }
}
