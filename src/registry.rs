//! # Action Catalog
//!
//! Registry of known actions, consulted by static workflow inspection and by
//! execution dispatch. Leaf actions are registered with their required
//! parameter names; workflow-typed actions additionally carry their
//! definition. Registration happens at startup (the declarative resource
//! loaders that feed it are external collaborators).

use dashmap::DashMap;
use tracing::debug;

use crate::model::ActionRef;
use crate::workflow::WorkflowDefinition;

/// One registered action.
#[derive(Debug, Clone)]
pub struct RegisteredAction {
    pub reference: ActionRef,
    pub required_parameters: Vec<String>,
    /// Present when the action is workflow-typed.
    pub workflow: Option<WorkflowDefinition>,
}

impl RegisteredAction {
    pub fn is_workflow(&self) -> bool {
        self.workflow.is_some()
    }
}

/// Thread-safe action catalog.
#[derive(Debug, Default)]
pub struct ActionCatalog {
    entries: DashMap<ActionRef, RegisteredAction>,
}

impl ActionCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a leaf action.
    pub fn register(&self, reference: ActionRef, required_parameters: Vec<String>) {
        debug!(action = %reference, "📚 CATALOG: Registered leaf action");
        self.entries.insert(
            reference.clone(),
            RegisteredAction {
                reference,
                required_parameters,
                workflow: None,
            },
        );
    }

    /// Register a workflow-typed action with its definition.
    pub fn register_workflow(&self, reference: ActionRef, definition: WorkflowDefinition) {
        debug!(action = %reference, workflow = %definition.name, "📚 CATALOG: Registered workflow action");
        self.entries.insert(
            reference.clone(),
            RegisteredAction {
                reference,
                required_parameters: Vec::new(),
                workflow: Some(definition),
            },
        );
    }

    pub fn get(&self, reference: &ActionRef) -> Option<RegisteredAction> {
        self.entries.get(reference).map(|entry| entry.clone())
    }

    pub fn contains(&self, reference: &ActionRef) -> bool {
        self.entries.contains_key(reference)
    }

    pub fn is_workflow(&self, reference: &ActionRef) -> bool {
        self.entries
            .get(reference)
            .map(|entry| entry.is_workflow())
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let catalog = ActionCatalog::new();
        catalog.register(ActionRef::from("core.local"), vec!["cmd".to_string()]);

        assert!(catalog.contains(&ActionRef::from("core.local")));
        assert!(!catalog.is_workflow(&ActionRef::from("core.local")));
        assert!(!catalog.contains(&ActionRef::from("core.remote")));

        let entry = catalog.get(&ActionRef::from("core.local")).unwrap();
        assert_eq!(entry.required_parameters, vec!["cmd".to_string()]);
    }

    #[test]
    fn test_workflow_registration() {
        let catalog = ActionCatalog::new();
        catalog.register_workflow(
            ActionRef::from("pack.deploy"),
            WorkflowDefinition::new("deploy"),
        );
        assert!(catalog.is_workflow(&ActionRef::from("pack.deploy")));
    }
}
