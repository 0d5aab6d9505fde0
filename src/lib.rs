#![allow(clippy::doc_markdown)] // Allow technical terms like LiveAction, GC in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Conductor Core
//!
//! Core of a claim-based automation execution platform: a scheduling queue
//! with optimistic claims, policy-driven admission control, and a workflow
//! orchestration engine, all coordinating through a shared document store's
//! compare-and-update writes.
//!
//! ## Overview
//!
//! Every requested action invocation becomes a `LiveAction` plus a claim
//! queue ticket. Scheduler instances race to claim tickets with a
//! compare-and-update on the entry revision, so an arbitrary number of
//! concurrently running processes admit each execution exactly once without
//! any shared-memory coordination. Admission runs the action's bound
//! policies (concurrency thresholds with delay or cancel overflow handling),
//! and admitted work is dispatched to a leaf runner or, for workflow-typed
//! actions, to the orchestration engine.
//!
//! The engine statically inspects each workflow definition before any task
//! starts, drives the task graph through child completion events, fans out
//! with-items tasks under a concurrency cap with slot backfill, and cascades
//! pause, resume, and cancel over the whole execution tree from whichever
//! node the request was issued at.
//!
//! ## Module Organization
//!
//! - [`model`] - LiveActions, executions, queue entries, and policies
//! - [`store`] - The compare-and-update store contract and in-memory impl
//! - [`scheduler`] - Claim queue, resolution, and service loops
//! - [`policy`] - Admission-control drivers and their registry
//! - [`workflow`] - Definitions, inspection, and the orchestration engine
//! - [`services`] - Request intake, lifecycle, and the dispatch coordinator
//! - [`runner`] - The leaf runner contract
//! - [`registry`] - The action catalog
//! - [`events`] - Status event publishing
//! - [`config`] - Configuration loading
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use conductor_core::config::ConductorConfig;
//! use conductor_core::store::InMemoryStore;
//!
//! # async fn example() -> conductor_core::Result<()> {
//! conductor_core::logging::init_structured_logging();
//! let config = ConductorConfig::load()?;
//! let store = Arc::new(InMemoryStore::new());
//! println!(
//!     "scheduler polling every {}ms",
//!     config.scheduler.poll_interval_ms
//! );
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod model;
pub mod policy;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod services;
pub mod store;
pub mod workflow;

pub use config::ConductorConfig;
pub use error::{ConductorError, Result};
pub use events::{EventSubject, StatusEvent, StatusEventPublisher};
pub use model::{
    ActionExecution, ActionRef, ExecutionContext, ExecutionQueueEntry, LiveAction,
    LiveActionStatus, OverflowAction, Policy,
};
pub use registry::ActionCatalog;
pub use runner::{ActionRunner, NoopRunner, RunnerOutcome};
pub use scheduler::{ExecutionQueue, ScheduleResolver, SchedulerService};
pub use services::{ExecutionCoordinator, ExecutionRequestService};
pub use store::{CasOutcome, ExecutionStore, InMemoryStore};
pub use workflow::{
    OrchestrationState, SimpleEvaluator, WorkflowDefinition, WorkflowEngine, WorkflowError,
    WorkflowErrorKind, WorkflowExecution,
};
