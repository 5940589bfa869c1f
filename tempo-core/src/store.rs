//! Persistence gateway seam.
//!
//! Each gateway call is assumed atomic on its own. [`apply_changeset`] turns a
//! lifecycle transition (block change + task update) into one logical
//! transaction by compensating the block change if the task write fails.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::error;

use crate::block::FocusBlock;
use crate::error::{Result, SchedulerError};
use crate::lifecycle::{BlockChange, Changeset};
use crate::task::Task;

pub trait Store {
    fn read_tasks_for_owner(&self, owner: &str) -> Result<Vec<Task>>;

    /// Blocks overlapping `[start, end)`, ordered by start time.
    fn read_blocks_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<FocusBlock>>;

    fn read_block(&self, id: &str) -> Result<Option<FocusBlock>>;

    fn create_block(&mut self, block: &FocusBlock) -> Result<FocusBlock>;

    fn update_block(&mut self, block: &FocusBlock) -> Result<FocusBlock>;

    fn delete_block(&mut self, id: &str) -> Result<()>;

    fn update_task(&mut self, task: &Task) -> Result<Task>;

    /// A task in `owner`'s scope, or NotFound.
    fn read_task(&self, owner: &str, task_id: &str) -> Result<Task> {
        self.read_tasks_for_owner(owner)?
            .into_iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| SchedulerError::task_not_found(task_id))
    }
}

fn compensate<S: Store + ?Sized>(store: &mut S, change: &BlockChange) -> Result<()> {
    match change {
        BlockChange::None => Ok(()),
        BlockChange::Create { block } => store.delete_block(&block.id),
        BlockChange::Update { previous, .. } => store.update_block(previous).map(|_| ()),
        BlockChange::Delete { block } => store.create_block(block).map(|_| ()),
    }
}

/// Apply a transition as a single logical transaction.
///
/// On task-write failure the block change is undone and the original error
/// returned. A failed undo is logged; the task was never written.
pub fn apply_changeset<S: Store + ?Sized>(store: &mut S, cs: &Changeset) -> Result<Task> {
    match &cs.block {
        BlockChange::None => {}
        BlockChange::Create { block } => {
            store.create_block(block)?;
        }
        BlockChange::Update { updated, .. } => {
            store.update_block(updated)?;
        }
        BlockChange::Delete { block } => store.delete_block(&block.id)?,
    }

    match store.update_task(&cs.task) {
        Ok(task) => Ok(task),
        Err(e) => {
            if let Err(undo) = compensate(store, &cs.block) {
                error!(
                    task_id = %cs.task.id,
                    transition = cs.kind.as_str(),
                    error = %undo,
                    "failed to undo block change after task write failure"
                );
            }
            Err(e)
        }
    }
}

/// In-memory store. Insertion-ordered so reads are deterministic.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    tasks: Vec<Task>,
    blocks: Vec<FocusBlock>,
    failing_task_writes: HashSet<String>,
    failing_block_creates: HashSet<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: impl IntoIterator<Item = Task>) -> Self {
        let mut s = Self::new();
        for t in tasks {
            s.upsert_task(t);
        }
        s
    }

    pub fn upsert_task(&mut self, task: Task) {
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(slot) => *slot = task,
            None => self.tasks.push(task),
        }
    }

    pub fn insert_block(&mut self, block: FocusBlock) {
        self.blocks.retain(|b| b.id != block.id);
        self.blocks.push(block);
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn blocks(&self) -> &[FocusBlock] {
        &self.blocks
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Make every `update_task` for `task_id` fail.
    pub fn fail_task_writes_for(&mut self, task_id: impl Into<String>) {
        self.failing_task_writes.insert(task_id.into());
    }

    /// Make every `create_block` referencing `task_id` fail.
    pub fn fail_block_creates_for(&mut self, task_id: impl Into<String>) {
        self.failing_block_creates.insert(task_id.into());
    }
}

impl Store for MemoryStore {
    fn read_tasks_for_owner(&self, owner: &str) -> Result<Vec<Task>> {
        Ok(self.tasks.iter().filter(|t| t.owner == owner).cloned().collect())
    }

    fn read_blocks_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<FocusBlock>> {
        let mut out: Vec<FocusBlock> = self
            .blocks
            .iter()
            .filter(|b| b.start_time < end && b.end_time > start)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(out)
    }

    fn read_block(&self, id: &str) -> Result<Option<FocusBlock>> {
        Ok(self.blocks.iter().find(|b| b.id == id).cloned())
    }

    fn create_block(&mut self, block: &FocusBlock) -> Result<FocusBlock> {
        if let Some(task_id) = &block.metadata.task_id {
            if self.failing_block_creates.contains(task_id) {
                return Err(SchedulerError::Store(format!("create_block rejected for task {task_id}")));
            }
        }
        if self.blocks.iter().any(|b| b.id == block.id) {
            return Err(SchedulerError::Store(format!("block {} already exists", block.id)));
        }
        self.blocks.push(block.clone());
        Ok(block.clone())
    }

    fn update_block(&mut self, block: &FocusBlock) -> Result<FocusBlock> {
        let slot = self
            .blocks
            .iter_mut()
            .find(|b| b.id == block.id)
            .ok_or_else(|| SchedulerError::block_not_found(&block.id))?;
        *slot = block.clone();
        Ok(block.clone())
    }

    fn delete_block(&mut self, id: &str) -> Result<()> {
        let before = self.blocks.len();
        self.blocks.retain(|b| b.id != id);
        if self.blocks.len() == before {
            return Err(SchedulerError::block_not_found(id));
        }
        Ok(())
    }

    fn update_task(&mut self, task: &Task) -> Result<Task> {
        if self.failing_task_writes.contains(&task.id) {
            return Err(SchedulerError::Store(format!("update_task rejected for task {}", task.id)));
        }
        let slot = self
            .tasks
            .iter_mut()
            .find(|t| t.id == task.id)
            .ok_or_else(|| SchedulerError::task_not_found(&task.id))?;
        *slot = task.clone();
        Ok(task.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{defer, reschedule, DeferTarget, TransitionKind};
    use chrono::{NaiveDate, TimeZone};

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, 0, 0).unwrap()
    }

    fn seeded() -> (MemoryStore, Task, FocusBlock) {
        let mut task = Task::new("t1", "write").with_duration(60);
        let block = FocusBlock::draft_for(&task, at(9), "UTC");
        task.scheduled_block_id = Some(block.id.clone());
        let mut store = MemoryStore::with_tasks([task.clone()]);
        store.insert_block(block.clone());
        (store, task, block)
    }

    #[test]
    fn range_read_is_ordered_and_overlap_based() {
        let mut store = MemoryStore::new();
        let a = FocusBlock::draft_for(&Task::new("a", "a"), at(13), "UTC");
        let b = FocusBlock::draft_for(&Task::new("b", "b"), at(9), "UTC");
        store.insert_block(a.clone());
        store.insert_block(b.clone());

        let got = store.read_blocks_in_range(at(9), at(14)).unwrap();
        assert_eq!(got, vec![b.clone(), a]);
        assert_eq!(store.read_blocks_in_range(at(10), at(12)).unwrap().len(), 0);
        assert_eq!(store.read_blocks_in_range(at(8), at(10)).unwrap(), vec![b]);
    }

    #[test]
    fn read_task_is_owner_scoped() {
        let store = MemoryStore::with_tasks([Task::new("t1", "x").with_owner("alice")]);
        assert!(store.read_task("alice", "t1").is_ok());
        assert!(store.read_task("bob", "t1").unwrap_err().is_not_found());
    }

    #[test]
    fn changeset_applies_block_then_task() {
        let (mut store, task, block) = seeded();
        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let cs = defer(&task, Some(&block), DeferTarget::Tomorrow, today, None, at(8)).unwrap();
        assert_eq!(cs.kind, TransitionKind::Defer);

        let saved = apply_changeset(&mut store, &cs).unwrap();
        assert!(store.blocks().is_empty());
        assert_eq!(saved.scheduling_metadata.defer_count, 1);
        assert_eq!(store.task("t1").unwrap(), &saved);
    }

    #[test]
    fn failed_task_write_restores_deleted_block() {
        let (mut store, task, block) = seeded();
        store.fail_task_writes_for("t1");
        let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let cs = defer(&task, Some(&block), DeferTarget::Someday, today, None, at(8)).unwrap();

        assert!(apply_changeset(&mut store, &cs).is_err());
        assert_eq!(store.blocks(), &[block]);
        assert_eq!(store.task("t1").unwrap(), &task);
    }

    #[test]
    fn failed_task_write_restores_moved_block() {
        let (mut store, task, block) = seeded();
        store.fail_task_writes_for("t1");
        let new_day = NaiveDate::from_ymd_opt(2026, 3, 3).unwrap();
        let new_start = Utc.with_ymd_and_hms(2026, 3, 3, 14, 0, 0).unwrap();
        let cs = reschedule(&task, Some(&block), new_day, Some(new_start), "UTC", None, at(8)).unwrap();

        assert!(apply_changeset(&mut store, &cs).is_err());
        assert_eq!(store.read_block(&block.id).unwrap(), Some(block));
    }

    #[test]
    fn missing_rows_are_not_found() {
        let mut store = MemoryStore::new();
        assert!(store.delete_block("nope").unwrap_err().is_not_found());
        assert!(store.update_task(&Task::new("ghost", "x")).unwrap_err().is_not_found());
    }
}
