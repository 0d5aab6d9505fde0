//! # Workflow Orchestration
//!
//! Evaluates workflow-typed LiveActions: a declarative task graph is
//! statically inspected, then driven task by task, with every child action
//! scheduled back through the claim queue. Control legs (pause, resume,
//! cancel) cascade over the execution tree and converge the whole subtree
//! to a single state regardless of which node they were issued at.
//!
//! - [`WorkflowDefinition`] — the declarative task graph
//! - [`inspect`] — static inspection producing structured [`WorkflowError`]s
//! - [`WorkflowEngine`] — the orchestration engine
//! - [`ExpressionEvaluator`] — pluggable expression seam

pub mod definition;
pub mod engine;
pub mod execution;
pub mod expression;
pub mod inspection;
pub mod states;
pub mod tree;

pub use definition::{
    InputSpec, OutputSpec, PublishSpec, TaskSpec, TransitionSpec, VarSpec, WithItemsSpec,
    WorkflowDefinition,
};
pub use engine::WorkflowEngine;
pub use execution::{ItemsState, TaskExecution, WorkflowExecution};
pub use expression::{
    is_truthy, render_param, ExpressionEvaluator, SimpleEvaluator, ITEM_KEY, TASK_STATUS_KEY,
};
pub use inspection::{inspect, WorkflowError, WorkflowErrorKind};
pub use states::{OrchestrationState, StateError};
pub use tree::ExecutionTree;
