//! Status event bus for execution lifecycle transitions.
//!
//! Every durable status change on a LiveAction, WorkflowExecution, or
//! TaskExecution is published here after (never before) the store write that
//! made it durable. Delivery to subscribers is at-least-once; consumers that
//! need exactly-once observation dedupe by (id, revision).

pub mod publisher;

pub use publisher::{EventSubject, PublishError, StatusEvent, StatusEventPublisher};
