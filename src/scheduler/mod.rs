//! # Execution Scheduling
//!
//! The claim-based work queue that turns a backlog of requested executions
//! into admitted work exactly-once per entry, across multiple concurrently
//! running scheduler processes. Coordination happens entirely through the
//! store's compare-and-update writes; there is no shared-memory mutable
//! state between instances.
//!
//! ## Components
//!
//! - [`ExecutionQueue`] — enqueue / claim / GC primitives over queue entries
//! - [`ScheduleResolver`] — turns a claimed entry into a terminal scheduling
//!   decision via the policy layer
//! - [`SchedulerService`] — the timer-driven poll and GC loops with a
//!   bounded resolution pool

pub mod handler;
pub mod queue;
pub mod service;

pub use handler::{ExecutionDispatcher, ResolutionOutcome, ScheduleResolver};
pub use queue::ExecutionQueue;
pub use service::{run_one_tick, SchedulerMetrics, SchedulerService};
