//! Composition walker.
//!
//! The executor runs a composition tree depth-first and commits every step
//! result through a [`Ledger`] before requesting the next step. It never
//! touches storage directly, so the same walk drives the invocation engine
//! and the in-memory ledger used by the tests below.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::InvocationId;
use cadence_events::{Event, EventPayload, LoopOutcome, SessionKey, StateMap};
use cadence_settings::OrchestrationSettings;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::composition::{Composition, Decider, Directive, ExitCondition, ParallelPolicy};
use super::journal::{Entry, Journal};
use super::step::{BranchResult, Step, StepContext, StepOutcome};
use crate::errors::{Result, RuntimeError};

/// One event the executor wants committed.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Commit {
    /// Node path the event commits.
    pub node: String,
    /// Producer.
    pub actor: String,
    /// Payload.
    pub payload: EventPayload,
    /// State patch.
    pub delta: StateMap,
}

/// Where the executor persists results.
#[async_trait]
pub(crate) trait Ledger: Send {
    /// Session being driven.
    fn session(&self) -> &SessionKey;
    /// Invocation being driven.
    fn invocation_id(&self) -> &InvocationId;
    /// State as of the last commit.
    fn state(&self) -> &StateMap;
    /// Token handed to steps.
    fn cancel_token(&self) -> CancellationToken;
    /// Step boundary: fail with `Cancelled` if the turn was cancelled.
    async fn checkpoint(&mut self, node: &str) -> Result<()>;
    /// Persist one event and fold its delta into [`state`](Self::state).
    async fn commit(&mut self, commit: Commit) -> Result<Event>;
}

/// A suspension request raised by a step.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Suspension {
    pub node: String,
    pub hint: String,
    pub payload: Value,
}

/// How a node finished.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Flow {
    Done(Value),
    Suspend(Suspension),
}

/// How a loop or dynamic node stopped, reported in the turn result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopReport {
    /// Node path.
    pub node: String,
    /// Satisfied or capped.
    pub outcome: LoopOutcome,
    /// Iterations (or manager rounds) completed.
    pub iterations: u32,
}

/// How a plain step's result is recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordAs {
    Output,
    ToolResult,
}

/// Drives one pass over a composition.
pub(crate) struct Executor<'a, L: Ledger> {
    ledger: &'a mut L,
    journal: Journal,
    settings: &'a OrchestrationSettings,
    loops: Vec<LoopReport>,
    last: Option<Event>,
}

impl<'a, L: Ledger> Executor<'a, L> {
    pub fn new(ledger: &'a mut L, journal: Journal, settings: &'a OrchestrationSettings) -> Self {
        Self {
            ledger,
            journal,
            settings,
            loops: Vec::new(),
            last: None,
        }
    }

    /// Walk the tree from the root.
    pub async fn run(&mut self, root: &Composition) -> Result<Flow> {
        let path = root.name().to_string();
        self.run_node(root, path).await
    }

    /// Loop reports gathered during the walk, in completion order.
    pub fn into_loops(self) -> Vec<LoopReport> {
        self.loops
    }

    fn run_node<'b>(&'b mut self, node: &'b Composition, path: String) -> BoxFuture<'b, Result<Flow>> {
        async move {
            match node {
                Composition::Step(step) => {
                    self.run_step(step, &path, RecordAs::Output, BTreeMap::new()).await
                }
                Composition::Sequential { children, .. } => {
                    let mut output = Value::Null;
                    for (i, child) in children.iter().enumerate() {
                        let child_path = format!("{path}/{i}:{}", child.name());
                        match self.run_node(child, child_path).await? {
                            Flow::Done(value) => output = value,
                            suspended @ Flow::Suspend(_) => return Ok(suspended),
                        }
                    }
                    Ok(Flow::Done(output))
                }
                Composition::Parallel {
                    name,
                    branches,
                    combiner,
                    policy,
                } => self.run_parallel(name, branches, combiner, *policy, &path).await,
                Composition::Loop {
                    name,
                    body,
                    exit,
                    max_iterations,
                } => {
                    let cap = max_iterations.unwrap_or(self.settings.loop_iteration_cap);
                    self.run_loop(name, body, exit.as_ref(), cap, &path).await
                }
                Composition::Dynamic {
                    name,
                    decider,
                    steps,
                } => self.run_dynamic(name, decider.as_ref(), steps, &path).await,
            }
        }
        .boxed()
    }

    fn context(&self, node: &str, state: StateMap, branches: BTreeMap<String, BranchResult>) -> StepContext {
        StepContext {
            session: self.ledger.session().clone(),
            invocation_id: self.ledger.invocation_id().clone(),
            node: node.to_string(),
            state,
            input: self.journal.input().clone(),
            branches,
            cancel: self.ledger.cancel_token(),
        }
    }

    fn step_failure(&self, node: &str, message: String) -> RuntimeError {
        RuntimeError::StepFailure {
            invocation_id: self.ledger.invocation_id().to_string(),
            node: node.to_string(),
            message,
        }
    }

    /// Record a step failure, unless the turn was cancelled under it.
    async fn fail(&mut self, node: &str, actor: &str, message: String) -> RuntimeError {
        if self.ledger.cancel_token().is_cancelled() {
            return RuntimeError::Cancelled(self.ledger.invocation_id().to_string());
        }
        let commit = Commit {
            node: node.to_string(),
            actor: actor.to_string(),
            payload: EventPayload::StepFailure {
                message: message.clone(),
            },
            delta: StateMap::new(),
        };
        if let Err(e) = self.ledger.commit(commit).await {
            return e;
        }
        self.step_failure(node, message)
    }

    async fn run_step(
        &mut self,
        step: &Arc<dyn Step>,
        path: &str,
        record: RecordAs,
        branches: BTreeMap<String, BranchResult>,
    ) -> Result<Flow> {
        match self.journal.get(path) {
            Some(Entry::Output { value, event }) => {
                debug!(node = path, "replayed committed step");
                self.last = Some((**event).clone());
                return Ok(Flow::Done(value.clone()));
            }
            Some(Entry::Failed(message)) => return Err(self.step_failure(path, message.clone())),
            _ => {}
        }

        self.ledger.checkpoint(path).await?;
        let ctx = self.context(path, self.ledger.state().clone(), branches);
        match step.run(&ctx).await {
            Ok(StepOutcome::Done(out)) => {
                let payload = match record {
                    RecordAs::Output => EventPayload::Output {
                        content: out.output.clone(),
                    },
                    RecordAs::ToolResult => EventPayload::ToolResult {
                        name: step.name().to_string(),
                        result: out.output.clone(),
                    },
                };
                let event = self
                    .ledger
                    .commit(Commit {
                        node: path.to_string(),
                        actor: step.name().to_string(),
                        payload,
                        delta: out.state_delta,
                    })
                    .await?;
                self.last = Some(event);
                Ok(Flow::Done(out.output))
            }
            Ok(StepOutcome::RequestConfirmation { hint, payload }) => Ok(Flow::Suspend(Suspension {
                node: path.to_string(),
                hint,
                payload,
            })),
            Err(e) => Err(self.fail(path, step.name(), e.message).await),
        }
    }

    async fn run_parallel(
        &mut self,
        name: &str,
        branches: &[Arc<dyn Step>],
        combiner: &Arc<dyn Step>,
        policy: ParallelPolicy,
        path: &str,
    ) -> Result<Flow> {
        let tolerate = policy
            .tolerate_partial_failure
            .unwrap_or(self.settings.tolerate_partial_failure);
        let timeout = policy
            .branch_timeout
            .unwrap_or_else(|| self.settings.branch_timeout());

        let mut results = BTreeMap::new();
        let mut pending = FuturesUnordered::new();
        self.ledger.checkpoint(path).await?;
        let snapshot = self.ledger.state().clone();

        for branch in branches {
            let branch_name = branch.name().to_string();
            let branch_path = format!("{path}/{branch_name}");
            match self.journal.get(&branch_path) {
                Some(Entry::Output { value, .. }) => {
                    let _ = results.insert(branch_name, BranchResult::Present { value: value.clone() });
                    continue;
                }
                Some(Entry::Failed(reason)) if tolerate => {
                    let _ = results.insert(branch_name, BranchResult::Absent { reason: reason.clone() });
                    continue;
                }
                Some(Entry::Failed(message)) => {
                    return Err(self.step_failure(&branch_path, message.clone()));
                }
                _ => {}
            }
            let ctx = self.context(&branch_path, snapshot.clone(), BTreeMap::new());
            let step = Arc::clone(branch);
            pending.push(async move {
                let result = tokio::time::timeout(timeout, step.run(&ctx)).await;
                (branch_name, branch_path, result)
            });
        }

        while let Some((branch_name, branch_path, result)) = pending.next().await {
            let reason = match result {
                Ok(Ok(StepOutcome::Done(out))) => {
                    let mut delta = out.state_delta;
                    let _ = delta.insert(format!("{name}.{branch_name}"), out.output.clone());
                    let event = self
                        .ledger
                        .commit(Commit {
                            node: branch_path,
                            actor: branch_name.clone(),
                            payload: EventPayload::Output {
                                content: out.output.clone(),
                            },
                            delta,
                        })
                        .await?;
                    self.last = Some(event);
                    let _ = results.insert(branch_name, BranchResult::Present { value: out.output });
                    continue;
                }
                Ok(Ok(StepOutcome::RequestConfirmation { .. })) => {
                    "confirmation requests are not supported inside parallel branches".to_string()
                }
                Ok(Err(e)) => e.message,
                Err(_) => format!("branch timed out after {}ms", timeout.as_millis()),
            };

            warn!(node = %branch_path, reason = %reason, tolerate, "parallel branch failed");
            let err = self.fail(&branch_path, &branch_name, reason.clone()).await;
            if !tolerate || !matches!(err, RuntimeError::StepFailure { .. }) {
                return Err(err);
            }
            let _ = results.insert(branch_name, BranchResult::Absent { reason });
        }
        drop(pending);

        let combiner_path = format!("{path}/{}", combiner.name());
        self.run_step(combiner, &combiner_path, RecordAs::Output, results)
            .await
    }

    async fn run_loop(
        &mut self,
        name: &str,
        body: &Composition,
        exit: &dyn ExitCondition,
        cap: u32,
        path: &str,
    ) -> Result<Flow> {
        let recorded = match self.journal.get(path) {
            Some(Entry::Finished {
                outcome,
                iterations,
            }) => Some((*outcome, *iterations)),
            _ => None,
        };

        let mut output = Value::Null;
        let mut finished = (LoopOutcome::Capped, cap);
        for iteration in 1..=cap {
            let body_path = format!("{path}/{}@{iteration}", body.name());
            match self.run_node(body, body_path).await? {
                Flow::Done(value) => output = value,
                suspended @ Flow::Suspend(_) => return Ok(suspended),
            }

            let stop = if let Some((outcome, iterations)) = recorded {
                (iteration >= iterations).then_some(outcome)
            } else if self
                .journal
                .has_prefix(&format!("{path}/{}@{}", body.name(), iteration + 1))
            {
                None
            } else {
                exit.satisfied(self.ledger.state(), self.last.as_ref())
                    .then_some(LoopOutcome::Satisfied)
            };
            if let Some(outcome) = stop {
                finished = (outcome, iteration);
                break;
            }
        }

        self.finish(name, path, finished.0, finished.1, recorded.is_some())
            .await?;
        Ok(Flow::Done(output))
    }

    async fn run_dynamic(
        &mut self,
        name: &str,
        decider: &dyn Decider,
        steps: &[Composition],
        path: &str,
    ) -> Result<Flow> {
        let cap = self.settings.max_manager_rounds;
        let recorded = match self.journal.get(path) {
            Some(Entry::Finished {
                outcome,
                iterations,
            }) => Some((*outcome, *iterations)),
            _ => None,
        };

        let mut output = Value::Null;
        let mut round_results: BTreeMap<String, BranchResult> = BTreeMap::new();
        let mut finished = (LoopOutcome::Capped, cap);
        for round in 1..=cap {
            let round_path = format!("{path}/r{round}");
            let names = match self.journal.get(&round_path) {
                Some(Entry::Round(names)) => names.clone(),
                Some(Entry::Failed(message)) => {
                    return Err(self.step_failure(&round_path, message.clone()));
                }
                _ if recorded.is_some_and(|(_, rounds)| round > rounds) => {
                    finished = (LoopOutcome::Satisfied, round - 1);
                    break;
                }
                _ => {
                    self.ledger.checkpoint(&round_path).await?;
                    let ctx = self.context(path, self.ledger.state().clone(), round_results.clone());
                    match decider.decide(&ctx).await {
                        Ok(Directive::Done) => {
                            finished = (LoopOutcome::Satisfied, round - 1);
                            break;
                        }
                        Ok(Directive::Run(names)) => {
                            let event = self
                                .ledger
                                .commit(Commit {
                                    node: round_path.clone(),
                                    actor: name.to_string(),
                                    payload: EventPayload::ToolCall {
                                        name: name.to_string(),
                                        arguments: json!({ "round": round, "steps": names }),
                                    },
                                    delta: StateMap::new(),
                                })
                                .await?;
                            self.last = Some(event);
                            names
                        }
                        Err(e) => return Err(self.fail(&round_path, name, e.message).await),
                    }
                }
            };

            round_results.clear();
            for (i, step_name) in names.iter().enumerate() {
                let step_path = format!("{round_path}/{i}:{step_name}");
                let flow = match steps.iter().find(|c| c.name() == step_name) {
                    Some(Composition::Step(step)) => {
                        self.run_step(step, &step_path, RecordAs::ToolResult, BTreeMap::new())
                            .await?
                    }
                    Some(sub) => self.run_node(sub, step_path).await?,
                    None => {
                        let message = format!("unknown step '{step_name}'");
                        return Err(match self.journal.get(&step_path) {
                            Some(Entry::Failed(_)) => self.step_failure(&step_path, message),
                            _ => self.fail(&step_path, name, message).await,
                        });
                    }
                };
                match flow {
                    Flow::Done(value) => {
                        let _ = round_results.insert(
                            step_name.clone(),
                            BranchResult::Present {
                                value: value.clone(),
                            },
                        );
                        output = value;
                    }
                    suspended @ Flow::Suspend(_) => return Ok(suspended),
                }
            }
        }

        if let Some((outcome, rounds)) = recorded {
            finished = (outcome, rounds);
        }
        self.finish(name, path, finished.0, finished.1, recorded.is_some())
            .await?;
        Ok(Flow::Done(output))
    }

    /// Commit (or replay) a `LoopFinished` and report it.
    async fn finish(
        &mut self,
        name: &str,
        path: &str,
        outcome: LoopOutcome,
        iterations: u32,
        replayed: bool,
    ) -> Result<()> {
        if !replayed {
            let event = self
                .ledger
                .commit(Commit {
                    node: path.to_string(),
                    actor: name.to_string(),
                    payload: EventPayload::LoopFinished {
                        outcome,
                        iterations,
                    },
                    delta: StateMap::new(),
                })
                .await?;
            self.last = Some(event);
        }
        debug!(node = path, %outcome, iterations, "loop finished");
        self.loops.push(LoopReport {
            node: path.to_string(),
            outcome,
            iterations,
        });
        Ok(())
    }
}
