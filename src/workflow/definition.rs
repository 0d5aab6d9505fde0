use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::ActionRef;

/// Declarative workflow definition: a named task graph with typed input,
/// context variables, and an output mapping.
///
/// The expression language itself is pluggable (see
/// [`crate::workflow::expression::ExpressionEvaluator`]); definitions carry
/// expressions as opaque strings that are validated during static inspection
/// and evaluated at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub input: Vec<InputSpec>,
    #[serde(default)]
    pub vars: Vec<VarSpec>,
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskSpec>,
    #[serde(default)]
    pub output: Vec<OutputSpec>,
}

/// One declared workflow input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

fn default_true() -> bool {
    true
}

/// One context variable initialized from an expression before tasks start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarSpec {
    pub name: String,
    pub expression: String,
}

/// One entry of the workflow output mapping, rendered at completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    pub expression: String,
}

/// One task in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub action: ActionRef,
    /// Action parameters. String values of the form `{{ expr }}` are rendered
    /// through the expression evaluator against the workflow context; all
    /// other values pass through as literals.
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub with_items: Option<WithItemsSpec>,
    /// Outgoing transitions, evaluated in order when the task completes.
    #[serde(default)]
    pub next: Vec<TransitionSpec>,
}

impl TaskSpec {
    pub fn new(action: ActionRef) -> Self {
        Self {
            action,
            params: Map::new(),
            with_items: None,
            next: Vec::new(),
        }
    }

    /// Append an unconditional on-success transition to `next_task`.
    pub fn on_success(mut self, next_task: impl Into<String>) -> Self {
        self.next.push(TransitionSpec {
            when: None,
            publish: Vec::new(),
            next: vec![next_task.into()],
        });
        self
    }
}

/// Fan-out specification for a with-items task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithItemsSpec {
    /// Expression yielding the item collection.
    pub items: String,
    /// Maximum number of items running simultaneously; `None` is unbounded.
    #[serde(default)]
    pub concurrency: Option<usize>,
}

/// One outgoing transition from a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionSpec {
    /// Guard expression; `None` means "on success" (`succeeded()`).
    #[serde(default)]
    pub when: Option<String>,
    /// Task-local values published into the workflow context when the
    /// transition fires.
    #[serde(default)]
    pub publish: Vec<PublishSpec>,
    /// Follow-on task names.
    #[serde(default)]
    pub next: Vec<String>,
}

/// One published key/expression pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSpec {
    pub name: String,
    pub expression: String,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Tasks with no inbound transition; these start as soon as the workflow
    /// passes inspection.
    pub fn start_tasks(&self) -> Vec<&str> {
        let mut referenced: std::collections::BTreeSet<&str> = std::collections::BTreeSet::new();
        for task in self.tasks.values() {
            for transition in &task.next {
                for next_name in &transition.next {
                    referenced.insert(next_name.as_str());
                }
            }
        }
        self.tasks
            .keys()
            .map(String::as_str)
            .filter(|name| !referenced.contains(name))
            .collect()
    }
}
