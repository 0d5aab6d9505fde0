//! Workflow orchestration engine.
//!
//! Drives workflow-typed LiveActions from REQUESTED to a terminal state.
//! Every child action a task spawns goes back through the claim queue as its
//! own LiveAction, so admission policies apply uniformly at every level of
//! the execution tree. The engine advances the graph in response to child
//! completion events; it never polls.
//!
//! All graph advancement for one engine instance is serialized behind an
//! internal mutex. Cross-process safety still comes from the store's
//! compare-and-update writes.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::definition::TaskSpec;
use super::execution::{ItemsState, TaskExecution, WorkflowExecution};
use super::expression::{is_truthy, render_param, ExpressionEvaluator, ITEM_KEY, TASK_STATUS_KEY};
use super::inspection::{inspect, WorkflowError, WorkflowErrorKind};
use super::states::OrchestrationState;
use super::tree::ExecutionTree;
use crate::error::{ConductorError, Result};
use crate::events::{EventSubject, StatusEventPublisher};
use crate::model::{ExecutionContext, LiveAction, LiveActionStatus};
use crate::registry::ActionCatalog;
use crate::services::lifecycle::transition_liveaction;
use crate::services::ExecutionRequestService;
use crate::store::{CasOutcome, ExecutionStore};

const MAX_SAVE_ATTEMPTS: usize = 5;

/// Outcome of starting one task.
enum StartResult {
    /// Task created; children are in flight.
    Started,
    /// A task with this name already exists in the workflow.
    Skipped,
    /// Task reached a terminal state with no children (empty fan-out).
    CompletedImmediately(TaskExecution),
    /// Starting the task surfaced workflow errors; the workflow must fail.
    Faulted(Vec<WorkflowError>),
}

/// The orchestration engine.
pub struct WorkflowEngine {
    store: Arc<dyn ExecutionStore>,
    catalog: Arc<ActionCatalog>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    publisher: StatusEventPublisher,
    requests: Arc<ExecutionRequestService>,
    /// Serializes graph advancement within this instance.
    advance: Mutex<()>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn ExecutionStore>,
        catalog: Arc<ActionCatalog>,
        evaluator: Arc<dyn ExpressionEvaluator>,
        publisher: StatusEventPublisher,
        requests: Arc<ExecutionRequestService>,
    ) -> Self {
        Self {
            store,
            catalog,
            evaluator,
            publisher,
            requests,
            advance: Mutex::new(()),
        }
    }

    /// Evaluate a workflow-typed LiveAction: build the initial context,
    /// statically inspect the definition, and either fail fast with the full
    /// error list or start every start task.
    #[instrument(skip(self, liveaction), fields(liveaction_id = %liveaction.id, action = %liveaction.action))]
    pub async fn request(&self, liveaction: &LiveAction) -> Result<WorkflowExecution> {
        let _guard = self.advance.lock().await;

        let registered = self.catalog.get(&liveaction.action).ok_or_else(|| {
            ConductorError::Workflow(format!("action not registered: {}", liveaction.action))
        })?;
        let Some(definition) = registered.workflow else {
            return Err(ConductorError::Workflow(format!(
                "action is not workflow-typed: {}",
                liveaction.action
            )));
        };
        let execution = self
            .store
            .get_execution_for_liveaction(liveaction.id)
            .await?
            .ok_or_else(|| {
                ConductorError::Workflow(format!(
                    "no execution record for liveaction {}",
                    liveaction.id
                ))
            })?;

        let mut errors = Vec::new();
        let mut context = Map::new();
        for input in &definition.input {
            match liveaction.parameters.get(&input.name) {
                Some(value) => {
                    context.insert(input.name.clone(), value.clone());
                }
                None => match &input.default {
                    Some(default) => {
                        context.insert(input.name.clone(), default.clone());
                    }
                    None if input.required => errors.push(
                        WorkflowError::new(
                            WorkflowErrorKind::Input,
                            format!("missing required input: {}", input.name),
                        )
                        .at(format!("input.{}", input.name)),
                    ),
                    None => {
                        context.insert(input.name.clone(), Value::Null);
                    }
                },
            }
        }

        let mut workflow = WorkflowExecution::new(
            liveaction.id,
            execution.id,
            definition.clone(),
            Value::Object(context),
        );

        errors.extend(inspect(&definition, &self.catalog, &*self.evaluator));
        if !errors.is_empty() {
            return self.fail_before_start(workflow, errors).await;
        }

        for (index, var) in definition.vars.iter().enumerate() {
            match self.evaluator.evaluate(&var.expression, &workflow.context) {
                Ok(value) => publish_into(&mut workflow.context, &var.name, value),
                Err(reason) => {
                    let error = WorkflowError::new(
                        WorkflowErrorKind::Vars,
                        format!("initializing var {} failed: {reason}", var.name),
                    )
                    .at(format!("vars[{index}]"));
                    return self.fail_before_start(workflow, vec![error]).await;
                }
            }
        }

        workflow.status = OrchestrationState::Running;
        let mut workflow = self.store.insert_workflow(workflow).await?;
        self.publish_workflow(&workflow);
        info!(
            workflow_id = %workflow.id,
            workflow = %workflow.definition.name,
            "🚀 WORKFLOW: Evaluation started"
        );

        let start_tasks: Vec<String> = workflow
            .definition
            .start_tasks()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut propagated = Vec::new();
        for name in start_tasks {
            match self.start_task(&workflow, &name).await? {
                StartResult::Started | StartResult::Skipped => {}
                StartResult::CompletedImmediately(task) => {
                    if let Some(parent) = self.complete_task(workflow.id, task.id).await? {
                        propagated.push(parent);
                    }
                    workflow = self.load_workflow(workflow.id).await?;
                    if workflow.status.is_terminal() {
                        break;
                    }
                }
                StartResult::Faulted(errors) => {
                    if let Some(parent) = self.fail_workflow(workflow, errors).await? {
                        propagated.push(parent);
                    }
                    break;
                }
            }
        }
        for parent in propagated {
            self.drain(parent).await?;
        }

        self.load_workflow_for_liveaction(liveaction.id).await
    }

    /// React to a child LiveAction reaching a terminal status: record it on
    /// the owning task, backfill with-items slots, apply transitions, and
    /// ripple completion up the execution tree.
    pub async fn on_child_complete(&self, child: &LiveAction) -> Result<()> {
        let _guard = self.advance.lock().await;
        self.drain(child.clone()).await
    }

    /// Pause a workflow and every workflow underneath it. Running leaf
    /// actions are never interrupted; each workflow settles to PAUSED once
    /// no descendant remains active.
    #[instrument(skip(self))]
    pub async fn pause(&self, liveaction_id: Uuid) -> Result<()> {
        let _guard = self.advance.lock().await;

        let mut marked = Vec::new();
        let mut frontier = VecDeque::from([liveaction_id]);
        while let Some(id) = frontier.pop_front() {
            let Some(liveaction) = self.store.get_liveaction(id).await? else {
                continue;
            };
            if liveaction.status.is_terminal() || !liveaction.workflow {
                continue;
            }
            let Some(mut workflow) = self.store.get_workflow_for_liveaction(id).await? else {
                continue;
            };
            if workflow.status != OrchestrationState::Running {
                continue;
            }

            workflow.status = OrchestrationState::Pausing;
            let workflow = self.save_workflow(workflow).await?;
            transition_liveaction(
                &*self.store,
                &self.publisher,
                id,
                LiveActionStatus::Pausing,
                |_| {},
            )
            .await?;
            info!(workflow_id = %workflow.id, "WORKFLOW: Pausing");

            for task in self.store.list_tasks(workflow.id).await? {
                for child_id in &task.child_liveactions {
                    frontier.push_back(*child_id);
                }
            }
            marked.push(workflow.id);
        }

        // Settle children before parents; each settle walks further up on
        // its own once the whole chain is quiescent.
        for workflow_id in marked.iter().rev() {
            let workflow = self.load_workflow(*workflow_id).await?;
            self.settle_pausing_chain(workflow).await?;
        }
        Ok(())
    }

    /// Resume a paused workflow tree and apply every transition deferred
    /// while it was pausing.
    #[instrument(skip(self))]
    pub async fn resume(&self, liveaction_id: Uuid) -> Result<()> {
        let _guard = self.advance.lock().await;

        let mut marked = Vec::new();
        let mut frontier = VecDeque::from([liveaction_id]);
        while let Some(id) = frontier.pop_front() {
            let Some(liveaction) = self.store.get_liveaction(id).await? else {
                continue;
            };
            if !liveaction.workflow {
                continue;
            }
            let Some(mut workflow) = self.store.get_workflow_for_liveaction(id).await? else {
                continue;
            };
            if workflow.status != OrchestrationState::Paused {
                continue;
            }

            workflow.status = OrchestrationState::Resuming;
            let mut workflow = self.save_workflow(workflow).await?;
            transition_liveaction(
                &*self.store,
                &self.publisher,
                id,
                LiveActionStatus::Resuming,
                |_| {},
            )
            .await?;
            workflow.status = OrchestrationState::Running;
            let workflow = self.save_workflow(workflow).await?;
            transition_liveaction(
                &*self.store,
                &self.publisher,
                id,
                LiveActionStatus::Running,
                |_| {},
            )
            .await?;
            info!(workflow_id = %workflow.id, "WORKFLOW: Resumed");

            for task in self.store.list_tasks(workflow.id).await? {
                for child_id in &task.child_liveactions {
                    frontier.push_back(*child_id);
                }
            }
            marked.push(workflow.id);
        }

        // Children first, so a deferred sub-workflow completion is visible
        // when the parent replays its own deferred transitions.
        let mut propagated = Vec::new();
        for workflow_id in marked.iter().rev() {
            let workflow = self.load_workflow(*workflow_id).await?;
            if workflow.status != OrchestrationState::Running {
                continue;
            }

            // Restart stalled with-items fan-out.
            for mut task in self.store.list_tasks(workflow.id).await? {
                if task.status != OrchestrationState::Running {
                    continue;
                }
                let stalled = task
                    .items
                    .as_ref()
                    .map(|items| items.dispatchable() > 0)
                    .unwrap_or(false);
                if stalled {
                    if let Some(spec) = workflow.definition.tasks.get(&task.task_name).cloned() {
                        let faults = self.dispatch_items(&workflow, &mut task, &spec).await?;
                        self.save_task(task).await?;
                        if !faults.is_empty() {
                            let workflow = self.load_workflow(*workflow_id).await?;
                            if let Some(parent) = self.fail_workflow(workflow, faults).await? {
                                propagated.push(parent);
                            }
                        }
                    }
                }
            }

            // Replay deferred transitions.
            let workflow = self.load_workflow(*workflow_id).await?;
            if workflow.status != OrchestrationState::Running {
                continue;
            }
            for task in self.store.list_tasks(workflow.id).await? {
                if task.status.is_terminal() && !task.transitions_handled {
                    if let Some(parent) = self.complete_task(workflow.id, task.id).await? {
                        propagated.push(parent);
                    }
                }
            }
        }
        for parent in propagated {
            self.drain(parent).await?;
        }
        Ok(())
    }

    /// Cancel the execution tree containing `liveaction_id`. The request is
    /// first walked up to the tree root, then cascaded down over every
    /// descendant, so cancelling a child and cancelling its ancestor converge
    /// the same subtree to the same terminal state.
    #[instrument(skip(self))]
    pub async fn cancel(&self, liveaction_id: Uuid) -> Result<()> {
        let _guard = self.advance.lock().await;

        let tree = ExecutionTree::new(&*self.store);
        let root = tree.root_of(liveaction_id).await?;
        let Some(root_execution) = self.store.get_execution_for_liveaction(root.id).await? else {
            return Err(ConductorError::Workflow(format!(
                "no execution record for liveaction {}",
                root.id
            )));
        };

        let mut nodes = vec![root.id];
        for descendant in tree.descendants(root_execution.id).await? {
            nodes.push(descendant.liveaction_id);
        }

        for id in &nodes {
            self.mark_canceling(*id).await?;
        }

        // Converge children before parents; nodes still waiting on running
        // leaves settle later through their completion events.
        for id in nodes.iter().rev() {
            let Some(liveaction) = self.store.get_liveaction(*id).await? else {
                continue;
            };
            if !liveaction.workflow {
                continue;
            }
            if let Some(workflow) = self.store.get_workflow_for_liveaction(*id).await? {
                self.try_settle_canceling(workflow).await?;
            }
        }
        Ok(())
    }

    async fn mark_canceling(&self, liveaction_id: Uuid) -> Result<()> {
        let Some(liveaction) = self.store.get_liveaction(liveaction_id).await? else {
            return Ok(());
        };
        if liveaction.status.is_terminal() {
            return Ok(());
        }

        if liveaction.workflow {
            if let Some(mut workflow) = self.store.get_workflow_for_liveaction(liveaction_id).await?
            {
                if !workflow.status.is_terminal()
                    && workflow.status != OrchestrationState::Canceling
                {
                    workflow.status = OrchestrationState::Canceling;
                    let workflow = self.save_workflow(workflow).await?;
                    info!(workflow_id = %workflow.id, "WORKFLOW: Canceling");
                }
                transition_liveaction(
                    &*self.store,
                    &self.publisher,
                    liveaction_id,
                    LiveActionStatus::Canceling,
                    |_| {},
                )
                .await?;
                return Ok(());
            }
        }

        // Leaf actions and workflows that never started evaluating. Anything
        // still waiting in the claim queue cancels outright; the stale queue
        // entry is dropped at resolution. Running work cancels cooperatively.
        let target = if liveaction.status.is_schedulable() {
            LiveActionStatus::Canceled
        } else {
            LiveActionStatus::Canceling
        };
        transition_liveaction(&*self.store, &self.publisher, liveaction_id, target, |_| {}).await?;
        Ok(())
    }

    /// Process a queue of completion notifications, following each workflow
    /// that reaches a terminal state up to its parent.
    async fn drain(&self, seed: LiveAction) -> Result<()> {
        let mut pending = VecDeque::from([seed]);
        while let Some(liveaction) = pending.pop_front() {
            if let Some(next) = self.advance_for_child(&liveaction).await? {
                pending.push_back(next);
            }
        }
        Ok(())
    }

    /// Record one child completion on its owning task and advance the
    /// workflow. Returns the workflow's own LiveAction when the workflow
    /// itself reached a terminal state, for upward propagation.
    async fn advance_for_child(&self, child: &LiveAction) -> Result<Option<LiveAction>> {
        let Some(child_state) = terminal_state_of(child.status) else {
            return Ok(None);
        };
        let Some(mut task) = self.store.find_task_for_child(child.id).await? else {
            return Ok(None);
        };
        let Some(workflow) = self.store.get_workflow(task.workflow_id).await? else {
            return Ok(None);
        };

        let task_terminal = if task.items.is_some() {
            let index = {
                let items = task.items.as_ref().filter(|items| {
                    items.child_item.contains_key(&child.id)
                });
                match items.and_then(|items| items.child_item.get(&child.id).copied()) {
                    Some(index) => index,
                    None => return Ok(None),
                }
            };
            {
                let Some(items) = task.items.as_mut() else {
                    return Ok(None);
                };
                if items.item_status[index].is_some() {
                    // Duplicate completion event; already recorded.
                    return Ok(None);
                }
                items.item_status[index] = Some(child_state);
                items.item_results[index] = child.result.clone();
            }

            if workflow.status == OrchestrationState::Running {
                if let Some(spec) = workflow.definition.tasks.get(&task.task_name).cloned() {
                    let faults = self.dispatch_items(&workflow, &mut task, &spec).await?;
                    if !faults.is_empty() {
                        task.status = OrchestrationState::Failed;
                        task.transitions_handled = true;
                        self.save_task(task).await?;
                        return self.fail_workflow(workflow, faults).await;
                    }
                }
            }

            match task.items.as_ref() {
                Some(items) if items.all_terminal() => {
                    task.status = aggregate_state(items);
                    task.result = Some(Value::Array(
                        items
                            .item_results
                            .iter()
                            .map(|result| result.clone().unwrap_or(Value::Null))
                            .collect(),
                    ));
                    true
                }
                _ => false,
            }
        } else {
            if task.status.is_terminal() {
                return Ok(None);
            }
            task.status = child_state;
            task.result = child.result.clone();
            true
        };

        let task = self.save_task(task).await?;
        if !task_terminal {
            return Ok(None);
        }

        match workflow.status {
            OrchestrationState::Running => self.complete_task(workflow.id, task.id).await,
            OrchestrationState::Pausing => {
                // Transition handling is deferred until resume; only check
                // whether the workflow is quiescent now.
                self.settle_pausing_chain(workflow).await?;
                Ok(None)
            }
            OrchestrationState::Canceling => self.try_settle_canceling(workflow).await,
            // Terminal or paused: the completion is recorded, nothing moves.
            _ => Ok(None),
        }
    }

    /// Apply a terminal task's outgoing transitions and check the workflow
    /// for completion. Boxed because chains of immediately-terminal tasks
    /// recurse through task starting.
    fn complete_task(
        &self,
        workflow_id: Uuid,
        task_id: Uuid,
    ) -> BoxFuture<'_, Result<Option<LiveAction>>> {
        async move {
            let mut workflow = self.load_workflow(workflow_id).await?;
            if workflow.status != OrchestrationState::Running {
                return Ok(None);
            }
            let mut task = self.load_task(task_id).await?;
            if task.transitions_handled {
                return Ok(None);
            }
            task.transitions_handled = true;
            let task = self.save_task(task).await?;

            let mut eval_ctx = workflow.context.clone();
            publish_into(&mut eval_ctx, TASK_STATUS_KEY, json!(task.status.to_string()));

            let transitions = workflow
                .definition
                .tasks
                .get(&task.task_name)
                .map(|spec| spec.next.clone())
                .unwrap_or_default();

            let mut fired_any = false;
            for (t_index, transition) in transitions.iter().enumerate() {
                let when = transition.when.as_deref().unwrap_or("succeeded()");
                let fired = match self.evaluator.evaluate(when, &eval_ctx) {
                    Ok(value) => is_truthy(&value),
                    Err(reason) => {
                        let error = WorkflowError::new(
                            WorkflowErrorKind::Expression,
                            format!("transition guard failed: {reason}"),
                        )
                        .at(format!("tasks.{}.next[{t_index}].when", task.task_name))
                        .for_task(&task.task_name);
                        return self.fail_workflow(workflow, vec![error]).await;
                    }
                };
                if !fired {
                    continue;
                }
                fired_any = true;

                for (p_index, publish) in transition.publish.iter().enumerate() {
                    match self.evaluator.evaluate(&publish.expression, &eval_ctx) {
                        Ok(value) => {
                            publish_into(&mut workflow.context, &publish.name, value.clone());
                            publish_into(&mut eval_ctx, &publish.name, value);
                        }
                        Err(reason) => {
                            let error = WorkflowError::new(
                                WorkflowErrorKind::TaskPublish,
                                format!("publishing {} failed: {reason}", publish.name),
                            )
                            .at(format!(
                                "tasks.{}.next[{t_index}].publish[{p_index}]",
                                task.task_name
                            ))
                            .for_task(&task.task_name);
                            return self.fail_workflow(workflow, vec![error]).await;
                        }
                    }
                }
                workflow = self.save_workflow(workflow).await?;

                for next_name in &transition.next {
                    match self.start_task(&workflow, next_name).await? {
                        StartResult::Started | StartResult::Skipped => {}
                        StartResult::CompletedImmediately(next_task) => {
                            if let Some(parent) =
                                self.complete_task(workflow.id, next_task.id).await?
                            {
                                return Ok(Some(parent));
                            }
                            workflow = self.load_workflow(workflow_id).await?;
                            if workflow.status != OrchestrationState::Running {
                                return Ok(None);
                            }
                        }
                        StartResult::Faulted(errors) => {
                            return self.fail_workflow(workflow, errors).await;
                        }
                    }
                }
            }

            if task.status == OrchestrationState::Failed && !fired_any {
                let error = WorkflowError::new(
                    WorkflowErrorKind::TaskTransition,
                    format!(
                        "task {} failed and no transition handled the failure",
                        task.task_name
                    ),
                )
                .for_task(&task.task_name);
                return self.fail_workflow(workflow, vec![error]).await;
            }

            let workflow = self.load_workflow(workflow_id).await?;
            if workflow.status != OrchestrationState::Running {
                return Ok(None);
            }
            self.check_workflow_complete(workflow).await
        }
        .boxed()
    }

    /// Start one task by name. Duplicate starts (a task targeted by two
    /// fired transitions) are skipped.
    async fn start_task(&self, workflow: &WorkflowExecution, name: &str) -> Result<StartResult> {
        let existing = self.store.list_tasks(workflow.id).await?;
        if existing.iter().any(|task| task.task_name == name) {
            return Ok(StartResult::Skipped);
        }
        let Some(spec) = workflow.definition.tasks.get(name).cloned() else {
            return Ok(StartResult::Faulted(vec![WorkflowError::new(
                WorkflowErrorKind::TaskTransition,
                format!("transition targets unknown task: {name}"),
            )
            .for_task(name)]));
        };

        let mut task = TaskExecution::new(workflow.id, name);
        task.status = OrchestrationState::Running;

        if let Some(with_items) = &spec.with_items {
            let items_value = match self.evaluator.evaluate(&with_items.items, &workflow.context) {
                Ok(value) => value,
                Err(reason) => {
                    return Ok(StartResult::Faulted(vec![WorkflowError::new(
                        WorkflowErrorKind::Expression,
                        format!("with-items expression failed: {reason}"),
                    )
                    .at(format!("tasks.{name}.with_items.items"))
                    .for_task(name)]));
                }
            };
            let Value::Array(items) = items_value else {
                return Ok(StartResult::Faulted(vec![WorkflowError::new(
                    WorkflowErrorKind::Expression,
                    "with-items expression did not yield a list".to_string(),
                )
                .at(format!("tasks.{name}.with_items.items"))
                .for_task(name)]));
            };

            if items.is_empty() {
                task.items = Some(ItemsState::new(Vec::new(), with_items.concurrency));
                task.status = OrchestrationState::Succeeded;
                task.result = Some(json!([]));
                let task = self.store.insert_task(task).await?;
                self.publish_task(&task);
                info!(
                    workflow_id = %workflow.id,
                    task = name,
                    "Empty fan-out; task succeeded with no children"
                );
                return Ok(StartResult::CompletedImmediately(task));
            }

            task.items = Some(ItemsState::new(items, with_items.concurrency));
            let mut task = self.store.insert_task(task).await?;
            let faults = self.dispatch_items(workflow, &mut task, &spec).await?;
            if !faults.is_empty() {
                task.status = OrchestrationState::Failed;
                task.transitions_handled = true;
                self.save_task(task).await?;
                return Ok(StartResult::Faulted(faults));
            }
            self.save_task(task).await?;
            return Ok(StartResult::Started);
        }

        let rendered =
            match render_param(&*self.evaluator, &Value::Object(spec.params), &workflow.context) {
                Ok(rendered) => rendered,
                Err(reason) => {
                    return Ok(StartResult::Faulted(vec![WorkflowError::new(
                        WorkflowErrorKind::Expression,
                        format!("rendering params failed: {reason}"),
                    )
                    .at(format!("tasks.{name}.params"))
                    .for_task(name)]));
                }
            };
        let child = self
            .requests
            .request(
                spec.action.clone(),
                rendered,
                ExecutionContext::child_of(workflow.liveaction_id),
            )
            .await?;
        task.child_liveactions.push(child.id);
        let task = self.store.insert_task(task).await?;
        self.publish_task(&task);
        Ok(StartResult::Started)
    }

    /// Dispatch as many pending items as the concurrency cap allows. Returns
    /// workflow errors when item param rendering fails.
    async fn dispatch_items(
        &self,
        workflow: &WorkflowExecution,
        task: &mut TaskExecution,
        spec: &TaskSpec,
    ) -> Result<Vec<WorkflowError>> {
        loop {
            let Some((index, item)) = task.items.as_ref().and_then(|items| {
                if items.dispatchable() == 0 {
                    None
                } else {
                    Some((items.next_index, items.items[items.next_index].clone()))
                }
            }) else {
                return Ok(Vec::new());
            };

            let mut item_ctx = workflow.context.clone();
            publish_into(&mut item_ctx, ITEM_KEY, item);
            let rendered =
                match render_param(&*self.evaluator, &Value::Object(spec.params.clone()), &item_ctx)
                {
                    Ok(rendered) => rendered,
                    Err(reason) => {
                        return Ok(vec![WorkflowError::new(
                            WorkflowErrorKind::Expression,
                            format!("rendering item {index} params failed: {reason}"),
                        )
                        .at(format!("tasks.{}.params", task.task_name))
                        .for_task(&task.task_name)]);
                    }
                };

            let child = self
                .requests
                .request(
                    spec.action.clone(),
                    rendered,
                    ExecutionContext::child_of(workflow.liveaction_id),
                )
                .await?;

            if let Some(items) = task.items.as_mut() {
                items.child_item.insert(child.id, index);
                items.next_index = index + 1;
            }
            task.child_liveactions.push(child.id);
        }
    }

    /// Check whether every task is terminal and conclude the workflow.
    async fn check_workflow_complete(
        &self,
        mut workflow: WorkflowExecution,
    ) -> Result<Option<LiveAction>> {
        let tasks = self.store.list_tasks(workflow.id).await?;
        if tasks.iter().any(|task| !task.status.is_terminal()) {
            return Ok(None);
        }
        if !tasks
            .iter()
            .all(|task| task.status == OrchestrationState::Succeeded)
        {
            let error = WorkflowError::new(
                WorkflowErrorKind::TaskTransition,
                "one or more tasks did not succeed".to_string(),
            );
            return self.fail_workflow(workflow, vec![error]).await;
        }

        let mut output = Map::new();
        for (index, spec) in workflow.definition.output.clone().iter().enumerate() {
            match self.evaluator.evaluate(&spec.expression, &workflow.context) {
                Ok(value) => {
                    output.insert(spec.name.clone(), value);
                }
                Err(reason) => {
                    let error = WorkflowError::new(
                        WorkflowErrorKind::Output,
                        format!("rendering output {} failed: {reason}", spec.name),
                    )
                    .at(format!("output[{index}]"));
                    return self.fail_workflow(workflow, vec![error]).await;
                }
            }
        }
        let output = Value::Object(output);

        workflow.output = Some(output.clone());
        workflow.status = OrchestrationState::Succeeded;
        let workflow = self.save_workflow(workflow).await?;
        info!(
            workflow_id = %workflow.id,
            workflow = %workflow.definition.name,
            "✅ WORKFLOW: Succeeded"
        );
        transition_liveaction(
            &*self.store,
            &self.publisher,
            workflow.liveaction_id,
            LiveActionStatus::Succeeded,
            move |liveaction| liveaction.result = Some(output.clone()),
        )
        .await
    }

    /// Fail a workflow, recording the structured error list on both the
    /// workflow document and the LiveAction result.
    async fn fail_workflow(
        &self,
        mut workflow: WorkflowExecution,
        errors: Vec<WorkflowError>,
    ) -> Result<Option<LiveAction>> {
        workflow.errors.extend(errors);
        if !workflow.status.is_terminal() {
            workflow.status = OrchestrationState::Failed;
            workflow = self.save_workflow(workflow).await?;
        }
        warn!(
            workflow_id = %workflow.id,
            workflow = %workflow.definition.name,
            errors = workflow.errors.len(),
            "WORKFLOW: Failed"
        );
        let result = json!({
            "errors": workflow.errors,
            "output": Value::Null,
        });
        transition_liveaction(
            &*self.store,
            &self.publisher,
            workflow.liveaction_id,
            LiveActionStatus::Failed,
            move |liveaction| liveaction.result = Some(result.clone()),
        )
        .await
    }

    /// Fail a workflow that never started evaluating (inspection or context
    /// initialization failure). The workflow document is inserted already
    /// FAILED; no task is ever dispatched.
    async fn fail_before_start(
        &self,
        mut workflow: WorkflowExecution,
        errors: Vec<WorkflowError>,
    ) -> Result<WorkflowExecution> {
        workflow.status = OrchestrationState::Failed;
        workflow.errors = errors;
        let workflow = self.store.insert_workflow(workflow).await?;
        self.publish_workflow(&workflow);
        warn!(
            workflow_id = %workflow.id,
            workflow = %workflow.definition.name,
            errors = workflow.errors.len(),
            "WORKFLOW: Rejected by inspection"
        );
        let result = json!({
            "errors": workflow.errors,
            "output": Value::Null,
        });
        if let Some(failed) = transition_liveaction(
            &*self.store,
            &self.publisher,
            workflow.liveaction_id,
            LiveActionStatus::Failed,
            move |liveaction| liveaction.result = Some(result.clone()),
        )
        .await?
        {
            // Propagate to a parent workflow if this one was spawned as a
            // task child.
            self.drain(failed).await?;
        }
        Ok(workflow)
    }

    /// Settle a PAUSING workflow to PAUSED once quiescent, then walk up the
    /// parent chain settling ancestors that were waiting on it.
    async fn settle_pausing_chain(&self, mut workflow: WorkflowExecution) -> Result<()> {
        loop {
            if workflow.status != OrchestrationState::Pausing {
                return Ok(());
            }
            if !self.pause_quiescent(&workflow).await? {
                return Ok(());
            }

            workflow.status = OrchestrationState::Paused;
            let workflow_doc = self.save_workflow(workflow).await?;
            let liveaction = transition_liveaction(
                &*self.store,
                &self.publisher,
                workflow_doc.liveaction_id,
                LiveActionStatus::Paused,
                |_| {},
            )
            .await?;
            info!(workflow_id = %workflow_doc.id, "WORKFLOW: Paused");

            let Some(parent_id) = liveaction.and_then(|la| la.context.parent) else {
                return Ok(());
            };
            let Some(parent) = self.store.get_workflow_for_liveaction(parent_id).await? else {
                return Ok(());
            };
            workflow = parent;
        }
    }

    /// A pausing workflow is quiescent once no child LiveAction is still
    /// active: every child is terminal or itself paused.
    async fn pause_quiescent(&self, workflow: &WorkflowExecution) -> Result<bool> {
        for task in self.store.list_tasks(workflow.id).await? {
            for child_id in &task.child_liveactions {
                let Some(child) = self.store.get_liveaction(*child_id).await? else {
                    continue;
                };
                if !child.status.is_terminal() && child.status != LiveActionStatus::Paused {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Settle a CANCELING workflow to CANCELED once every dispatched child
    /// is terminal. Tasks left mid-flight (including undispatched with-items
    /// backlog) are marked CANCELED. Returns the workflow's LiveAction for
    /// upward propagation.
    async fn try_settle_canceling(
        &self,
        mut workflow: WorkflowExecution,
    ) -> Result<Option<LiveAction>> {
        if workflow.status != OrchestrationState::Canceling {
            return Ok(None);
        }

        let tasks = self.store.list_tasks(workflow.id).await?;
        for task in &tasks {
            for child_id in &task.child_liveactions {
                let Some(child) = self.store.get_liveaction(*child_id).await? else {
                    continue;
                };
                if !child.status.is_terminal() {
                    return Ok(None);
                }
            }
        }

        for mut task in tasks {
            if task.status.is_terminal() {
                continue;
            }
            task.status = OrchestrationState::Canceled;
            task.transitions_handled = true;
            self.save_task(task).await?;
        }

        workflow.status = OrchestrationState::Canceled;
        let workflow = self.save_workflow(workflow).await?;
        info!(workflow_id = %workflow.id, "WORKFLOW: Canceled");
        transition_liveaction(
            &*self.store,
            &self.publisher,
            workflow.liveaction_id,
            LiveActionStatus::Canceled,
            |_| {},
        )
        .await
    }

    async fn load_workflow(&self, id: Uuid) -> Result<WorkflowExecution> {
        self.store
            .get_workflow(id)
            .await?
            .ok_or_else(|| ConductorError::Workflow(format!("workflow not found: {id}")))
    }

    async fn load_workflow_for_liveaction(&self, liveaction_id: Uuid) -> Result<WorkflowExecution> {
        self.store
            .get_workflow_for_liveaction(liveaction_id)
            .await?
            .ok_or_else(|| {
                ConductorError::Workflow(format!(
                    "no workflow record for liveaction {liveaction_id}"
                ))
            })
    }

    async fn load_task(&self, id: Uuid) -> Result<TaskExecution> {
        self.store
            .get_task(id)
            .await?
            .ok_or_else(|| ConductorError::Workflow(format!("task not found: {id}")))
    }

    /// Compare-and-update write with reload-retry; the engine serializes its
    /// own writes, so a conflict means a stale read, not a competing intent.
    async fn save_workflow(&self, mut workflow: WorkflowExecution) -> Result<WorkflowExecution> {
        for _ in 0..MAX_SAVE_ATTEMPTS {
            match self.store.update_workflow(workflow.clone()).await? {
                CasOutcome::Applied(applied) => {
                    self.publish_workflow(&applied);
                    return Ok(applied);
                }
                CasOutcome::Conflict => {
                    let fresh = self.load_workflow(workflow.id).await?;
                    workflow.revision = fresh.revision;
                }
            }
        }
        Err(ConductorError::Store(format!(
            "persistent revision conflict on workflow {}",
            workflow.id
        )))
    }

    async fn save_task(&self, mut task: TaskExecution) -> Result<TaskExecution> {
        for _ in 0..MAX_SAVE_ATTEMPTS {
            match self.store.update_task(task.clone()).await? {
                CasOutcome::Applied(applied) => {
                    self.publish_task(&applied);
                    return Ok(applied);
                }
                CasOutcome::Conflict => {
                    let fresh = self.load_task(task.id).await?;
                    task.revision = fresh.revision;
                }
            }
        }
        Err(ConductorError::Store(format!(
            "persistent revision conflict on task {}",
            task.id
        )))
    }

    fn publish_workflow(&self, workflow: &WorkflowExecution) {
        let _ = self.publisher.publish(
            EventSubject::WorkflowExecution,
            workflow.id,
            workflow.revision,
            workflow.status.to_string(),
        );
    }

    fn publish_task(&self, task: &TaskExecution) {
        let _ = self.publisher.publish(
            EventSubject::TaskExecution,
            task.id,
            task.revision,
            task.status.to_string(),
        );
    }
}

fn publish_into(context: &mut Value, name: &str, value: Value) {
    if let Value::Object(map) = context {
        map.insert(name.to_string(), value);
    }
}

fn terminal_state_of(status: LiveActionStatus) -> Option<OrchestrationState> {
    match status {
        LiveActionStatus::Succeeded => Some(OrchestrationState::Succeeded),
        LiveActionStatus::Failed => Some(OrchestrationState::Failed),
        LiveActionStatus::Canceled => Some(OrchestrationState::Canceled),
        _ => None,
    }
}

fn aggregate_state(items: &ItemsState) -> OrchestrationState {
    if items.all_succeeded() {
        OrchestrationState::Succeeded
    } else if items
        .item_status
        .iter()
        .any(|status| *status == Some(OrchestrationState::Failed))
    {
        OrchestrationState::Failed
    } else {
        OrchestrationState::Canceled
    }
}
