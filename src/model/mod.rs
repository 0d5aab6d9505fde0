//! # Shared Data Model
//!
//! The durable records the claim queue, policy layer, and orchestration
//! engine read and write through the store:
//!
//! - [`LiveAction`] — one requested invocation of an action (leaf or workflow)
//! - [`ActionExecution`] — the durable execution record with parent/child links
//! - [`ExecutionQueueEntry`] — a scheduling ticket with an optimistic claim flag
//! - [`Policy`] — a declarative admission-control rule bound to an action
//!
//! Every record carries a `revision` used by the store's compare-and-update
//! contract; a stale revision makes the write fail (not error) and the caller
//! retries later.

pub mod execution;
pub mod liveaction;
pub mod policy;
pub mod queue_entry;
pub mod status;

pub use execution::ActionExecution;
pub use liveaction::{ActionRef, ExecutionContext, LiveAction};
pub use policy::{OverflowAction, Policy};
pub use queue_entry::ExecutionQueueEntry;
pub use status::LiveActionStatus;
