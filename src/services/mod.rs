//! # Execution Services
//!
//! The glue between the durable records and the moving parts: request
//! intake, LiveAction lifecycle transitions, and the coordinator that routes
//! admitted work to runners or the orchestration engine.

pub mod coordinator;
pub mod lifecycle;
pub mod request;

pub use coordinator::ExecutionCoordinator;
pub use lifecycle::transition_liveaction;
pub use request::ExecutionRequestService;
