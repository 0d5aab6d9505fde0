//! Static workflow inspection.
//!
//! A workflow-typed LiveAction is inspected before any task starts. Any
//! failure here is fatal for that workflow instance only: it transitions
//! straight to FAILED carrying the full structured error list, and no task
//! is ever dispatched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::definition::WorkflowDefinition;
use super::expression::ExpressionEvaluator;
use crate::registry::ActionCatalog;

/// Fixed set of workflow error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowErrorKind {
    /// Definition content problem (unknown action, bad concurrency, ...)
    Content,
    /// Malformed or failing expression
    Expression,
    /// Workflow input problem
    Input,
    /// Context variable initialization problem
    Vars,
    /// No task can start
    StartTask,
    /// Transition evaluation or target problem
    TaskTransition,
    /// Publish clause problem
    TaskPublish,
    /// Output rendering problem
    Output,
}

/// One structured workflow error, carrying enough context to localize the
/// fault in the definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowError {
    #[serde(rename = "type")]
    pub kind: WorkflowErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spec_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl WorkflowError {
    pub fn new(kind: WorkflowErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            spec_path: None,
            schema_path: None,
            task_id: None,
        }
    }

    pub fn at(mut self, spec_path: impl Into<String>) -> Self {
        self.spec_path = Some(spec_path.into());
        self
    }

    pub fn with_schema_path(mut self, schema_path: impl Into<String>) -> Self {
        self.schema_path = Some(schema_path.into());
        self
    }

    pub fn for_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// Statically inspect a workflow definition against the action catalog.
///
/// Returns the complete error list; an empty list means the definition is
/// safe to start.
pub fn inspect(
    definition: &WorkflowDefinition,
    catalog: &ActionCatalog,
    evaluator: &dyn ExpressionEvaluator,
) -> Vec<WorkflowError> {
    let mut errors = Vec::new();

    inspect_input(definition, &mut errors);
    inspect_vars(definition, evaluator, &mut errors);
    inspect_tasks(definition, catalog, evaluator, &mut errors);
    inspect_output(definition, evaluator, &mut errors);

    errors
}

fn inspect_input(definition: &WorkflowDefinition, errors: &mut Vec<WorkflowError>) {
    let mut seen = std::collections::BTreeSet::new();
    for (index, input) in definition.input.iter().enumerate() {
        if !seen.insert(input.name.as_str()) {
            errors.push(
                WorkflowError::new(
                    WorkflowErrorKind::Input,
                    format!("duplicate input declaration: {}", input.name),
                )
                .at(format!("input[{index}]")),
            );
        }
    }
}

fn inspect_vars(
    definition: &WorkflowDefinition,
    evaluator: &dyn ExpressionEvaluator,
    errors: &mut Vec<WorkflowError>,
) {
    for (index, var) in definition.vars.iter().enumerate() {
        if let Err(reason) = evaluator.validate(&var.expression) {
            errors.push(
                WorkflowError::new(
                    WorkflowErrorKind::Vars,
                    format!("invalid expression for var {}: {reason}", var.name),
                )
                .at(format!("vars[{index}].{}", var.name)),
            );
        }
    }
}

fn inspect_tasks(
    definition: &WorkflowDefinition,
    catalog: &ActionCatalog,
    evaluator: &dyn ExpressionEvaluator,
    errors: &mut Vec<WorkflowError>,
) {
    if definition.tasks.is_empty() {
        errors.push(
            WorkflowError::new(WorkflowErrorKind::Content, "workflow defines no tasks")
                .at("tasks"),
        );
        return;
    }

    for (task_name, task) in &definition.tasks {
        let task_path = format!("tasks.{task_name}");

        match catalog.get(&task.action) {
            None => {
                errors.push(
                    WorkflowError::new(
                        WorkflowErrorKind::Content,
                        format!("unregistered action reference: {}", task.action),
                    )
                    .at(format!("{task_path}.action"))
                    .for_task(task_name.clone()),
                );
            }
            Some(entry) => {
                for required in &entry.required_parameters {
                    if !task.params.contains_key(required) {
                        errors.push(
                            WorkflowError::new(
                                WorkflowErrorKind::Input,
                                format!(
                                    "missing required parameter {required} for action {}",
                                    task.action
                                ),
                            )
                            .at(format!("{task_path}.params"))
                            .with_schema_path(format!("{}.parameters.{required}", task.action))
                            .for_task(task_name.clone()),
                        );
                    }
                }
            }
        }

        for (key, value) in &task.params {
            validate_param_templates(
                evaluator,
                value,
                &format!("{task_path}.params.{key}"),
                task_name,
                errors,
            );
        }

        if let Some(with_items) = &task.with_items {
            if let Err(reason) = evaluator.validate(&with_items.items) {
                errors.push(
                    WorkflowError::new(
                        WorkflowErrorKind::Expression,
                        format!("invalid with-items expression: {reason}"),
                    )
                    .at(format!("{task_path}.with_items.items"))
                    .for_task(task_name.clone()),
                );
            }
            if with_items.concurrency == Some(0) {
                errors.push(
                    WorkflowError::new(
                        WorkflowErrorKind::Content,
                        "with-items concurrency must be at least 1",
                    )
                    .at(format!("{task_path}.with_items.concurrency"))
                    .for_task(task_name.clone()),
                );
            }
        }

        for (index, transition) in task.next.iter().enumerate() {
            if let Some(when) = &transition.when {
                if let Err(reason) = evaluator.validate(when) {
                    errors.push(
                        WorkflowError::new(
                            WorkflowErrorKind::Expression,
                            format!("invalid transition expression: {reason}"),
                        )
                        .at(format!("{task_path}.next[{index}].when"))
                        .for_task(task_name.clone()),
                    );
                }
            }
            for publish in &transition.publish {
                if let Err(reason) = evaluator.validate(&publish.expression) {
                    errors.push(
                        WorkflowError::new(
                            WorkflowErrorKind::TaskPublish,
                            format!("invalid publish expression for {}: {reason}", publish.name),
                        )
                        .at(format!("{task_path}.next[{index}].publish.{}", publish.name))
                        .for_task(task_name.clone()),
                    );
                }
            }
            for next_name in &transition.next {
                if !definition.tasks.contains_key(next_name) {
                    errors.push(
                        WorkflowError::new(
                            WorkflowErrorKind::TaskTransition,
                            format!("transition references unknown task: {next_name}"),
                        )
                        .at(format!("{task_path}.next[{index}]"))
                        .for_task(task_name.clone()),
                    );
                }
            }
        }
    }

    if definition.start_tasks().is_empty() {
        errors.push(
            WorkflowError::new(
                WorkflowErrorKind::StartTask,
                "every task has an inbound transition; nothing can start",
            )
            .at("tasks"),
        );
    }
}

fn validate_param_templates(
    evaluator: &dyn ExpressionEvaluator,
    value: &Value,
    path: &str,
    task_name: &str,
    errors: &mut Vec<WorkflowError>,
) {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if let Some(inner) = trimmed
                .strip_prefix("{{")
                .and_then(|rest| rest.strip_suffix("}}"))
            {
                if let Err(reason) = evaluator.validate(inner.trim()) {
                    errors.push(
                        WorkflowError::new(
                            WorkflowErrorKind::Expression,
                            format!("invalid parameter expression: {reason}"),
                        )
                        .at(path.to_string())
                        .for_task(task_name.to_string()),
                    );
                }
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                validate_param_templates(
                    evaluator,
                    item,
                    &format!("{path}[{index}]"),
                    task_name,
                    errors,
                );
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                validate_param_templates(
                    evaluator,
                    item,
                    &format!("{path}.{key}"),
                    task_name,
                    errors,
                );
            }
        }
        _ => {}
    }
}

fn inspect_output(
    definition: &WorkflowDefinition,
    evaluator: &dyn ExpressionEvaluator,
    errors: &mut Vec<WorkflowError>,
) {
    for (index, output) in definition.output.iter().enumerate() {
        if let Err(reason) = evaluator.validate(&output.expression) {
            errors.push(
                WorkflowError::new(
                    WorkflowErrorKind::Output,
                    format!("invalid output expression for {}: {reason}", output.name),
                )
                .at(format!("output[{index}].{}", output.name)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ActionRef;
    use crate::workflow::definition::{TaskSpec, TransitionSpec};
    use crate::workflow::expression::SimpleEvaluator;

    fn catalog() -> ActionCatalog {
        let catalog = ActionCatalog::new();
        catalog.register(ActionRef::from("core.local"), vec!["cmd".to_string()]);
        catalog
    }

    #[test]
    fn test_clean_definition_passes() {
        let mut definition = WorkflowDefinition::new("wf");
        let mut task = TaskSpec::new(ActionRef::from("core.local"));
        task.params
            .insert("cmd".to_string(), serde_json::json!("date"));
        definition.tasks.insert("only".to_string(), task);

        let errors = inspect(&definition, &catalog(), &SimpleEvaluator);
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn test_unregistered_action_is_content_error_at_spec_path() {
        let mut definition = WorkflowDefinition::new("wf");
        definition
            .tasks
            .insert("bad".to_string(), TaskSpec::new(ActionRef::from("no.such")));

        let errors = inspect(&definition, &catalog(), &SimpleEvaluator);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, WorkflowErrorKind::Content);
        assert_eq!(errors[0].spec_path.as_deref(), Some("tasks.bad.action"));
        assert_eq!(errors[0].task_id.as_deref(), Some("bad"));
    }

    #[test]
    fn test_missing_required_parameter_is_input_error() {
        let mut definition = WorkflowDefinition::new("wf");
        definition.tasks.insert(
            "noargs".to_string(),
            TaskSpec::new(ActionRef::from("core.local")),
        );

        let errors = inspect(&definition, &catalog(), &SimpleEvaluator);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, WorkflowErrorKind::Input);
        assert!(errors[0].schema_path.as_deref().unwrap().contains("cmd"));
    }

    #[test]
    fn test_unknown_transition_target_and_bad_when() {
        let mut definition = WorkflowDefinition::new("wf");
        let mut task = TaskSpec::new(ActionRef::from("core.local"));
        task.params
            .insert("cmd".to_string(), serde_json::json!("date"));
        task.next.push(TransitionSpec {
            when: Some("not an expression at all".to_string()),
            publish: Vec::new(),
            next: vec!["ghost".to_string()],
        });
        definition.tasks.insert("first".to_string(), task);

        let errors = inspect(&definition, &catalog(), &SimpleEvaluator);
        let kinds: Vec<_> = errors.iter().map(|e| e.kind).collect();
        assert!(kinds.contains(&WorkflowErrorKind::Expression));
        assert!(kinds.contains(&WorkflowErrorKind::TaskTransition));
    }

    #[test]
    fn test_empty_tasks_is_content_error() {
        let definition = WorkflowDefinition::new("wf");
        let errors = inspect(&definition, &catalog(), &SimpleEvaluator);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, WorkflowErrorKind::Content);
        assert_eq!(errors[0].spec_path.as_deref(), Some("tasks"));
    }

    #[test]
    fn test_cycle_without_entry_is_start_task_error() {
        let mut definition = WorkflowDefinition::new("wf");
        let mut a = TaskSpec::new(ActionRef::from("core.local")).on_success("b");
        a.params.insert("cmd".to_string(), serde_json::json!("x"));
        let mut b = TaskSpec::new(ActionRef::from("core.local")).on_success("a");
        b.params.insert("cmd".to_string(), serde_json::json!("y"));
        definition.tasks.insert("a".to_string(), a);
        definition.tasks.insert("b".to_string(), b);

        let errors = inspect(&definition, &catalog(), &SimpleEvaluator);
        assert!(errors
            .iter()
            .any(|e| e.kind == WorkflowErrorKind::StartTask));
    }
}
