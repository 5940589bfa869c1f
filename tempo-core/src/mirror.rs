//! Best-effort write-through of scheduled tasks to an external tracker.
//!
//! Failures never roll back scheduler state; they surface as warnings.

use crate::block::FocusBlock;
use crate::task::Task;

pub trait TaskMirror {
    fn mirror(&self, task: &Task, block: Option<&FocusBlock>) -> Result<(), String>;
}

/// No external tracker configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMirror;

impl TaskMirror for NoMirror {
    fn mirror(&self, _task: &Task, _block: Option<&FocusBlock>) -> Result<(), String> {
        Ok(())
    }
}
