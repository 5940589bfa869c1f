//! tempo-core: task auto-scheduler and commitment lifecycle.
//!
//! Pure pieces (`intervals`, `allocator`, `risk`, `lifecycle`, `planner`) hold
//! no ambient state; `scheduler_kernel` binds them to a [`Store`] and an
//! [`AuditSink`].

pub mod allocator;
pub mod audit;
pub mod block;
pub mod error;
pub mod intervals;
pub mod lifecycle;
pub mod mirror;
pub mod planner;
pub mod prefs;
pub mod risk;
pub mod scheduler_kernel;
pub mod store;
pub mod task;
pub mod time;

pub use allocator::{allocate, backlog_order, ordered_backlog, Allocation, Placement};
pub use audit::{AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use block::{BlockMetadata, FocusBlock};
pub use error::{Result, SchedulerError};
pub use intervals::{free_intervals, merge_intervals, Interval};
pub use lifecycle::{
    state_of, BlockChange, Changeset, CommitmentState, DeferTarget, ScheduleOutcome, TransitionKind,
    Warning,
};
pub use mirror::{NoMirror, TaskMirror};
pub use planner::{plan_allocation, AllocateRequest, AllocationPlan, AllocationSummary, ScheduledTask};
pub use prefs::SchedulerPreferences;
pub use risk::{assess, AtRiskReason, AtRiskTask, RiskReport};
pub use scheduler_kernel::{
    AllocateResponse, CommitRequest, CommitResponse, DeferRequest, DeferResponse, PersistFailure,
    RescheduleRequest, RescheduleResponse, SchedulerKernel,
};
pub use store::{apply_changeset, MemoryStore, Store};
pub use task::{PriorityLevel, SchedulingMetadata, Task, TaskStatus};
