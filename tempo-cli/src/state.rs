use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempo_core::{AuditEvent, AuditSink, FocusBlock, MemoryStore, SchedulerError, Store, Task};

/// `$TEMPO_HOME`, or `~/.tempo`.
pub fn tempo_home() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("TEMPO_HOME") {
        return Ok(PathBuf::from(dir));
    }
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home).join(".tempo"))
}

pub fn ensure_tempo_home() -> Result<PathBuf> {
    let dir = tempo_home()?;
    fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    Ok(dir)
}

pub fn store_path() -> Result<PathBuf> {
    Ok(ensure_tempo_home()?.join("store.json"))
}

pub fn events_path() -> Result<PathBuf> {
    Ok(ensure_tempo_home()?.join("events.jsonl"))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    blocks: Vec<FocusBlock>,
}

/// Tasks and blocks in one JSON document, rewritten after every successful write.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    inner: MemoryStore,
}

impl JsonFileStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut inner = MemoryStore::new();
        if path.exists() {
            let s = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
            let file: StoreFile =
                serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
            for t in file.tasks {
                inner.upsert_task(t);
            }
            for b in file.blocks {
                inner.insert_block(b);
            }
        }
        Ok(Self { path, inner })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tasks(&self) -> &[Task] {
        self.inner.tasks()
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.inner.task(id)
    }

    /// Insert a new task; ids must be unique.
    pub fn add_task(&mut self, task: Task) -> Result<Task> {
        if self.inner.task(&task.id).is_some() {
            anyhow::bail!("task {} already exists", task.id);
        }
        task.validate().map_err(anyhow::Error::msg)?;
        self.inner.upsert_task(task.clone());
        self.save()?;
        Ok(task)
    }

    /// Next free `t<n>` id.
    pub fn next_task_id(&self) -> String {
        let max = self
            .inner
            .tasks()
            .iter()
            .filter_map(|t| t.id.strip_prefix('t').and_then(|n| n.parse::<u64>().ok()))
            .max()
            .unwrap_or(0);
        format!("t{}", max + 1)
    }

    pub fn save(&self) -> Result<()> {
        let file = StoreFile {
            tasks: self.inner.tasks().to_vec(),
            blocks: self.inner.blocks().to_vec(),
        };
        let json = serde_json::to_string_pretty(&file).context("serialize store")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path).with_context(|| format!("replace {}", self.path.display()))?;
        Ok(())
    }

    fn persist(&self) -> tempo_core::Result<()> {
        self.save().map_err(|e| SchedulerError::Store(format!("{e:#}")))
    }
}

impl Store for JsonFileStore {
    fn read_tasks_for_owner(&self, owner: &str) -> tempo_core::Result<Vec<Task>> {
        self.inner.read_tasks_for_owner(owner)
    }

    fn read_blocks_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> tempo_core::Result<Vec<FocusBlock>> {
        self.inner.read_blocks_in_range(start, end)
    }

    fn read_block(&self, id: &str) -> tempo_core::Result<Option<FocusBlock>> {
        self.inner.read_block(id)
    }

    fn create_block(&mut self, block: &FocusBlock) -> tempo_core::Result<FocusBlock> {
        let out = self.inner.create_block(block)?;
        self.persist()?;
        Ok(out)
    }

    fn update_block(&mut self, block: &FocusBlock) -> tempo_core::Result<FocusBlock> {
        let out = self.inner.update_block(block)?;
        self.persist()?;
        Ok(out)
    }

    fn delete_block(&mut self, id: &str) -> tempo_core::Result<()> {
        self.inner.delete_block(id)?;
        self.persist()
    }

    fn update_task(&mut self, task: &Task) -> tempo_core::Result<Task> {
        let out = self.inner.update_task(task)?;
        self.persist()?;
        Ok(out)
    }
}

#[derive(Serialize)]
struct AuditLine<'a> {
    at: DateTime<Utc>,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

/// Appends one JSON object per audit event.
#[derive(Debug, Clone)]
pub struct JsonlAuditSink {
    path: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: &AuditEvent) -> tempo_core::Result<()> {
        let line = serde_json::to_string(&AuditLine { at: Utc::now(), event })
            .map_err(|e| SchedulerError::Store(format!("serialize audit event: {e}")))?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| SchedulerError::Store(format!("open {}: {e}", self.path.display())))?;
        writeln!(f, "{line}").map_err(|e| SchedulerError::Store(format!("append {}: {e}", self.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn writes_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let mut store = JsonFileStore::open(&path).unwrap();
        assert!(store.tasks().is_empty());
        let task = store.add_task(Task::new(store.next_task_id(), "write report")).unwrap();
        assert_eq!(task.id, "t1");

        let start = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let block = FocusBlock::draft_for(&task, start, "UTC");
        store.create_block(&block).unwrap();

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.task("t1"), Some(&task));
        assert_eq!(reopened.read_block(&block.id).unwrap(), Some(block));
        assert_eq!(reopened.next_task_id(), "t2");
    }

    #[test]
    fn duplicate_and_invalid_tasks_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonFileStore::open(dir.path().join("store.json")).unwrap();
        store.add_task(Task::new("t1", "a")).unwrap();
        assert!(store.add_task(Task::new("t1", "b")).is_err());
        assert!(store.add_task(Task::new("t2", "zero").with_duration(0)).is_err());
        assert_eq!(store.tasks().len(), 1);
    }

    #[test]
    fn failed_write_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let mut store = JsonFileStore::open(&path).unwrap();
        store.add_task(Task::new("t1", "a")).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        assert!(store.update_task(&Task::new("ghost", "x")).unwrap_err().is_not_found());
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn audit_lines_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let sink = JsonlAuditSink::new(&path);
        sink.record(&AuditEvent::new("schedule", "Scheduled \"a\"", json!({ "task_id": "t1" })))
            .unwrap();
        sink.record(&AuditEvent::new("defer", "Deferred \"a\"", json!({ "task_id": "t1" })))
            .unwrap();

        let lines: Vec<serde_json::Value> = fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["type"], "schedule");
        assert_eq!(lines[1]["metadata"]["task_id"], "t1");
        assert!(lines[1]["at"].is_string());
    }
}
