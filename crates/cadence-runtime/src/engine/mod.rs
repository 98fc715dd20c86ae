//! Invocation engine: turn lifecycle over the session store.
//!
//! ## State machine
//!
//! ```text
//! Running ──suspend──▶ AwaitingConfirmation ──resume──▶ Running ──▶ … ──▶ Completed | Failed
//!                              │
//!                              └──deadline──▶ Expired
//! ```
//!
//! Everything needed to continue a turn lives in the store: the event log
//! (replayed through the journal) and the invocation record (status,
//! pending confirmation, cancel flag). A resume or `recover` may therefore
//! run in a different process from the one that started the turn.
//!
//! In-process bookkeeping is limited to a `DashMap` of cancellation tokens
//! for the invocations this engine is currently driving.

mod expiry;
mod ledger;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use cadence_compaction::{CompactionOutcome, CompactionService, Summarizer, context_view};
use cadence_core::{ConfirmationToken, InvocationId};
use cadence_events::{
    AppendEvent, Event, EventPayload, InvocationRecord, InvocationStatus, PendingConfirmation,
    Session, SessionKey, SessionStatus, SessionStore, StateMap, StoreError, open_store,
    value_text,
};
use cadence_hooks::{HookRegistry, LifecycleEvent, LifecycleHook, LifecyclePoint};
use cadence_memory::{IngestReport, MemoryService, ScoredFact, open_fact_store};
use cadence_settings::{MemoryMode, RuntimeSettings};
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use self::ledger::TurnLedger;
use crate::errors::{Result, RuntimeError};
use crate::orchestrator::executor::{Executor, Flow, Ledger, Suspension};
use crate::orchestrator::journal::Journal;
use crate::orchestrator::step::confirmation_keys;
use crate::orchestrator::{Composition, LoopReport, confirmation_key};
use crate::types::{ResumeTurn, StartTurn, TurnOutcome, TurnResult};

/// Actor recorded on events the engine writes itself.
pub const ENGINE_ACTOR: &str = "engine";

/// Actor recorded on caller-supplied events.
pub const USER_ACTOR: &str = "user";

/// State key holding facts retrieved in proactive memory mode.
pub const MEMORY_STATE_KEY: &str = "__memory";

/// Runs turns of registered compositions against a session store.
pub struct InvocationEngine {
    store: Arc<dyn SessionStore>,
    compositions: RwLock<HashMap<String, Arc<Composition>>>,
    hooks: Arc<HookRegistry>,
    compaction: CompactionService,
    memory: Option<Arc<MemoryService>>,
    settings: RuntimeSettings,
    live: DashMap<InvocationId, CancellationToken>,
}

impl fmt::Debug for InvocationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationEngine")
            .field("compositions", &self.compositions.read().len())
            .field("hooks", &self.hooks.count())
            .field("memory", &self.memory.is_some())
            .field("live", &self.live.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`InvocationEngine`].
pub struct EngineBuilder {
    store: Arc<dyn SessionStore>,
    settings: RuntimeSettings,
    hooks: HookRegistry,
    summarizer: Option<Arc<dyn Summarizer>>,
    memory: Option<Arc<MemoryService>>,
    compositions: Vec<Composition>,
}

impl EngineBuilder {
    /// Register a lifecycle hook.
    #[must_use]
    pub fn hook(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.hooks.register(hook);
        self
    }

    /// Replace the default extractive summarizer.
    #[must_use]
    pub fn summarizer(mut self, summarizer: Arc<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    /// Enable memory retrieval and ingestion.
    #[must_use]
    pub fn memory(mut self, memory: Arc<MemoryService>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Register a composition at build time.
    #[must_use]
    pub fn composition(mut self, composition: Composition) -> Self {
        self.compositions.push(composition);
        self
    }

    /// Validate settings and compositions, then build the engine.
    pub fn build(self) -> Result<InvocationEngine> {
        self.settings.validate()?;
        let compaction = match self.summarizer {
            Some(summarizer) => CompactionService::with_summarizer(
                Arc::clone(&self.store),
                summarizer,
                self.settings.compaction.clone(),
            ),
            None => CompactionService::new(Arc::clone(&self.store), self.settings.compaction.clone()),
        };
        let engine = InvocationEngine {
            store: self.store,
            compositions: RwLock::new(HashMap::new()),
            hooks: Arc::new(self.hooks),
            compaction,
            memory: self.memory,
            settings: self.settings,
            live: DashMap::new(),
        };
        for composition in self.compositions {
            engine.register_composition(composition)?;
        }
        Ok(engine)
    }
}

/// Marks an invocation as driven by this engine until dropped.
struct LiveGuard<'a> {
    live: &'a DashMap<InvocationId, CancellationToken>,
    id: InvocationId,
    token: CancellationToken,
}

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        let _ = self.live.remove(&self.id);
    }
}

impl InvocationEngine {
    /// Start building an engine over `store`.
    #[must_use]
    pub fn builder(store: Arc<dyn SessionStore>, settings: RuntimeSettings) -> EngineBuilder {
        EngineBuilder {
            store,
            settings,
            hooks: HookRegistry::new(),
            summarizer: None,
            memory: None,
            compositions: Vec::new(),
        }
    }

    /// Engine with the store and memory backends selected by `settings`.
    pub fn from_settings(settings: RuntimeSettings) -> Result<Self> {
        let store = open_store(&settings.storage)?;
        let facts = open_fact_store(&settings.storage)?;
        let memory = MemoryService::new(facts, settings.memory.clone());
        Self::builder(store, settings).memory(Arc::new(memory)).build()
    }

    /// Active settings.
    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    /// The underlying session store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Validate and register a composition under its root name, replacing
    /// any previous registration.
    pub fn register_composition(&self, composition: Composition) -> Result<()> {
        composition.validate()?;
        let name = composition.name().to_string();
        debug!(composition = %name, "registering composition");
        let _ = self.compositions.write().insert(name, Arc::new(composition));
        Ok(())
    }

    /// Names of registered compositions, sorted.
    pub fn composition_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.compositions.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether this engine is currently driving `id`.
    pub fn is_live(&self, id: &InvocationId) -> bool {
        self.live.contains_key(id)
    }

    fn composition(&self, name: &str) -> Result<Arc<Composition>> {
        self.compositions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnknownComposition(name.to_string()))
    }

    fn acquire(&self, record: &InvocationRecord) -> Result<LiveGuard<'_>> {
        match self.live.entry(record.id.clone()) {
            Entry::Occupied(_) => Err(RuntimeError::SessionBusy(record.session.to_string())),
            Entry::Vacant(slot) => {
                let token = CancellationToken::new();
                let _ = slot.insert(token.clone());
                Ok(LiveGuard {
                    live: &self.live,
                    id: record.id.clone(),
                    token,
                })
            }
        }
    }

    fn ledger(&self, session: &Session, id: &InvocationId, cancel: CancellationToken) -> TurnLedger {
        TurnLedger::new(
            Arc::clone(&self.store),
            Arc::clone(&self.hooks),
            session,
            id.clone(),
            self.settings.invocation.conflict_retries,
            cancel,
        )
    }

    /// Apply `update` to the stored record if it is still in `expected`.
    fn transition(
        &self,
        id: &InvocationId,
        expected: InvocationStatus,
        update: impl FnOnce(&mut InvocationRecord),
    ) -> Result<InvocationRecord> {
        let mut record = self.store.get_invocation(id)?;
        if record.status != expected {
            return Err(StoreError::StaleInvocation(format!(
                "{id} is {}, expected {expected}",
                record.status
            ))
            .into());
        }
        update(&mut record);
        record.updated_at = Utc::now();
        self.store.update_invocation(&record, expected)?;
        Ok(record)
    }

    async fn emit(&self, event: LifecycleEvent) {
        let _ = self.hooks.dispatch(&event).await;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Turns
    // ─────────────────────────────────────────────────────────────────────

    /// Begin a turn and run it until it completes or suspends.
    #[instrument(skip(self, turn), fields(app = %turn.app, user = %turn.user, composition = %turn.composition))]
    pub async fn start(&self, turn: StartTurn) -> Result<TurnResult> {
        let composition = self.composition(&turn.composition)?;
        let key = match turn.session_id {
            Some(session_id) => SessionKey::new(turn.app, turn.user, session_id),
            None => SessionKey::generate(turn.app, turn.user),
        };
        let session = match self.store.get(&key) {
            Ok(session) => session,
            Err(StoreError::SessionNotFound(_)) => match self.store.create(&key) {
                Ok(session) => session,
                Err(StoreError::AlreadyExists(_)) => self.store.get(&key)?,
                Err(e) => return Err(e.into()),
            },
            Err(e) => return Err(e.into()),
        };

        let record = InvocationRecord::start(key.clone(), turn.composition.as_str());
        self.store.begin_invocation(&record)?;
        let guard = self.acquire(&record)?;
        let id = record.id.clone();
        info!(session = %key, invocation = %id, "turn started");

        let mut delta = StateMap::new();
        if self.settings.memory.mode == MemoryMode::Proactive {
            if let Some(facts) = self.proactive_recall(&key, &turn.input).await {
                let _ = delta.insert(MEMORY_STATE_KEY.to_string(), facts);
            }
        }

        let mut ledger = self.ledger(&session, &id, guard.token.clone());
        let input = AppendEvent::new(0, USER_ACTOR, EventPayload::Input { content: turn.input })
            .invocation(&id)
            .state_delta(delta)
            .status(SessionStatus::Active);
        let input = match ledger.append(input) {
            Ok(event) => event,
            Err(e) => {
                warn!(invocation = %id, error = %e, "input not recorded, abandoning turn");
                if let Err(abandon) = self.transition(&id, InvocationStatus::Running, |r| {
                    r.status = InvocationStatus::Failed;
                }) {
                    warn!(invocation = %id, error = %abandon, "failed to abandon invocation");
                }
                return Err(e);
            }
        };

        self.emit(
            LifecycleEvent::new(LifecyclePoint::TurnStarted, key.clone())
                .invocation(&id)
                .detail(json!({ "composition": turn.composition })),
        )
        .await;

        let journal = Journal::from_events([&input]);
        self.drive(ledger, journal, &composition, guard).await
    }

    async fn proactive_recall(&self, key: &SessionKey, input: &Value) -> Option<Value> {
        let memory = self.memory.as_ref()?;
        let query = value_text(input)?;
        let top_k = self.settings.memory.top_k;
        match memory.search(&key.app, &key.user, &query, top_k).await {
            Ok(facts) => match serde_json::to_value(&facts) {
                Ok(value) => {
                    debug!(session = %key, recalled = facts.len(), "proactive memory recall");
                    Some(value)
                }
                Err(e) => {
                    warn!(session = %key, error = %e, "recalled facts not serializable");
                    None
                }
            },
            Err(e) => {
                warn!(session = %key, error = %e, "proactive memory recall failed");
                None
            }
        }
    }

    /// Continue a suspended turn with the caller's decision.
    #[instrument(skip(self, turn), fields(session = %turn.session, invocation = %turn.invocation_id))]
    pub async fn resume(&self, turn: ResumeTurn) -> Result<TurnResult> {
        let ResumeTurn {
            session: key,
            invocation_id: id,
            token,
            decision,
        } = turn;

        let session = self.store.get(&key)?;
        let record = match self.store.get_invocation(&id) {
            Ok(record) if record.session == key => record,
            Ok(_) | Err(StoreError::InvocationNotFound(_)) => {
                return Err(RuntimeError::InvocationNotFound(id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if record.status == InvocationStatus::Expired {
            return Err(RuntimeError::InvocationExpired(id.to_string()));
        }
        if record.status == InvocationStatus::AwaitingConfirmation
            && record.expires_at().is_some_and(|deadline| deadline <= Utc::now())
        {
            if let Err(e) = self.expire(record).await {
                warn!(invocation = %id, error = %e, "eager expiry failed");
            }
            return Err(RuntimeError::InvocationExpired(id.to_string()));
        }
        let pending = match &record.pending {
            Some(pending)
                if record.status == InvocationStatus::AwaitingConfirmation
                    && pending.token.matches(&token) =>
            {
                pending.clone()
            }
            _ => return Err(RuntimeError::InvalidToken),
        };
        let composition = self.composition(&record.composition)?;
        let guard = self.acquire(&record)?;

        // Consume the token; a concurrent resume loses here.
        match self.transition(&id, InvocationStatus::AwaitingConfirmation, |r| {
            r.status = InvocationStatus::Running;
            r.pending = None;
        }) {
            Ok(_) => {}
            Err(RuntimeError::Store(StoreError::StaleInvocation(_))) => {
                return Err(RuntimeError::InvalidToken);
            }
            Err(e) => return Err(e),
        }

        let mut delta = StateMap::new();
        let _ = delta.insert(
            confirmation_key(&id, &pending.node),
            json!({ "approved": decision.approved, "payload": decision.payload }),
        );
        let approved = decision.approved;
        let mut ledger = self.ledger(&session, &id, guard.token.clone());
        let _ = ledger.append(
            AppendEvent::new(0, USER_ACTOR, EventPayload::ConfirmationDecision { decision })
                .invocation(&id)
                .node(pending.node.clone())
                .state_delta(delta)
                .status(SessionStatus::Active),
        )?;
        info!(node = %pending.node, approved, "turn resumed");
        self.emit(
            LifecycleEvent::new(LifecyclePoint::TurnResumed, key.clone())
                .invocation(&id)
                .node(pending.node)
                .detail(json!({ "approved": approved })),
        )
        .await;

        let journal = Journal::from_events(session.events_for(&id));
        self.drive(ledger, journal, &composition, guard).await
    }

    /// Re-enter a `Running` invocation nobody is driving. Committed steps
    /// are replayed from the log, not re-executed.
    #[instrument(skip(self, id), fields(invocation = %id))]
    pub async fn recover(&self, id: &InvocationId) -> Result<TurnResult> {
        let record = self.store.get_invocation(id)?;
        if self.is_live(id) {
            return Err(RuntimeError::SessionBusy(record.session.to_string()));
        }
        if record.status != InvocationStatus::Running {
            return Err(RuntimeError::NotRecoverable {
                invocation_id: id.to_string(),
                status: record.status,
            });
        }
        let composition = self.composition(&record.composition)?;
        let guard = self.acquire(&record)?;
        let session = self.store.get(&record.session)?;
        let journal = Journal::from_events(session.events_for(id));
        info!(session = %record.session, replayable = journal.len(), "recovering invocation");

        let mut ledger = self.ledger(&session, id, guard.token.clone());
        if let Some(output) = journal.completion().cloned() {
            info!(session = %record.session, "completion already committed, finalizing");
            let loops = journal.loops();
            let result = self.finalize(&mut ledger, output, loops).await;
            drop(guard);
            return result;
        }
        self.drive(ledger, journal, &composition, guard).await
    }

    async fn drive(
        &self,
        mut ledger: TurnLedger,
        journal: Journal,
        composition: &Composition,
        guard: LiveGuard<'_>,
    ) -> Result<TurnResult> {
        let walked = {
            let mut executor = Executor::new(&mut ledger, journal, &self.settings.orchestration);
            let flow = executor.run(composition).await;
            flow.map(|flow| (flow, executor.into_loops()))
        };
        let result = match walked {
            Ok((Flow::Done(output), loops)) => self.complete(&mut ledger, output, loops).await,
            Ok((Flow::Suspend(suspension), _)) => self.suspend(&mut ledger, suspension).await,
            Err(e) => Err(self.abort(&mut ledger, e).await),
        };
        drop(guard);
        result
    }

    async fn complete(
        &self,
        ledger: &mut TurnLedger,
        output: Value,
        loops: Vec<LoopReport>,
    ) -> Result<TurnResult> {
        let id = ledger.invocation_id().clone();
        let cleared = cleared_decisions(ledger.state(), &id);
        let _ = ledger.append(
            AppendEvent::new(0, ENGINE_ACTOR, EventPayload::Completion { output: output.clone() })
                .invocation(&id)
                .state_delta(cleared)
                .status(SessionStatus::Completed),
        )?;
        self.finalize(ledger, output, loops).await
    }

    /// Post-completion work once the `Completion` event is committed.
    /// Safe to repeat: compaction is idempotent and the CAS only moves a
    /// `Running` invocation.
    async fn finalize(
        &self,
        ledger: &mut TurnLedger,
        output: Value,
        loops: Vec<LoopReport>,
    ) -> Result<TurnResult> {
        let key = ledger.session().clone();
        let id = ledger.invocation_id().clone();

        match self.compaction.maybe_compact(&key, Some(&id)).await {
            Ok(CompactionOutcome::Compacted(record)) => {
                self.emit(
                    LifecycleEvent::new(LifecyclePoint::SessionCompacted, key.clone())
                        .invocation(&id)
                        .detail(json!({
                            "start": record.start_sequence,
                            "end": record.end_sequence,
                            "summary": record.summary_sequence,
                        })),
                )
                .await;
            }
            Ok(CompactionOutcome::Skipped(reason)) => {
                debug!(session = %key, ?reason, "compaction skipped");
            }
            Err(e) => warn!(session = %key, error = %e, "compaction failed, retrying next turn"),
        }

        let _ = self.transition(&id, InvocationStatus::Running, |r| {
            r.status = InvocationStatus::Completed;
        })?;

        if self.settings.memory.ingest_on_completion {
            if let Some(memory) = &self.memory {
                match self.ingest_with(memory, &key).await {
                    Ok(report) => {
                        self.emit(
                            LifecycleEvent::new(LifecyclePoint::MemoryIngested, key.clone())
                                .invocation(&id)
                                .detail(json!({
                                    "stored": report.stored,
                                    "duplicates": report.duplicates,
                                })),
                        )
                        .await;
                    }
                    Err(e) => warn!(session = %key, error = %e, "memory ingestion failed"),
                }
            }
        }

        info!(session = %key, invocation = %id, loops = loops.len(), "turn completed");
        self.emit(LifecycleEvent::new(LifecyclePoint::TurnCompleted, key.clone()).invocation(&id))
            .await;
        Ok(TurnResult {
            session: key,
            invocation_id: id,
            outcome: TurnOutcome::Completed { output, loops },
        })
    }

    async fn suspend(&self, ledger: &mut TurnLedger, suspension: Suspension) -> Result<TurnResult> {
        let key = ledger.session().clone();
        let id = ledger.invocation_id().clone();
        if self.store.get_invocation(&id)?.cancel_requested {
            let err = RuntimeError::Cancelled(id.to_string());
            return Err(self.abort(ledger, err).await);
        }
        let Suspension {
            node,
            hint,
            payload,
        } = suspension;

        let _ = ledger.append(
            AppendEvent::new(
                0,
                ENGINE_ACTOR,
                EventPayload::ConfirmationRequest {
                    hint: hint.clone(),
                    payload: payload.clone(),
                },
            )
            .invocation(&id)
            .node(node.clone())
            .status(SessionStatus::Paused),
        )?;

        let requested_at = Utc::now();
        let pending = PendingConfirmation {
            token: ConfirmationToken::generate(),
            node: node.clone(),
            hint,
            payload,
            requested_at,
            expires_at: deadline(requested_at, self.settings.invocation.confirmation_timeout_ms),
        };
        let _ = self.transition(&id, InvocationStatus::Running, |r| {
            r.status = InvocationStatus::AwaitingConfirmation;
            r.cursor = Some(node.clone());
            r.pending = Some(pending.clone());
        })?;

        info!(session = %key, invocation = %id, node = %node, "turn awaiting confirmation");
        self.emit(
            LifecycleEvent::new(LifecyclePoint::ConfirmationRequested, key.clone())
                .invocation(&id)
                .node(node)
                .detail(json!({ "expiresAt": pending.expires_at })),
        )
        .await;
        Ok(TurnResult {
            session: key,
            invocation_id: id,
            outcome: TurnOutcome::AwaitingConfirmation(pending),
        })
    }

    /// Record a failed turn and hand the error back. Storage failures are
    /// returned untouched so the invocation stays `Running` for `recover`.
    async fn abort(&self, ledger: &mut TurnLedger, err: RuntimeError) -> RuntimeError {
        if err.is_storage() {
            warn!(invocation = %ledger.invocation_id(), error = %err, "storage failure, invocation left for recover");
            return err;
        }
        let cancelled = matches!(err, RuntimeError::Cancelled(_));
        let node = match &err {
            RuntimeError::StepFailure { node, .. } => Some(node.clone()),
            _ => None,
        };
        if let Err(e) = self
            .finish_failed(ledger, InvocationStatus::Running, err.to_string(), cancelled, node)
            .await
        {
            warn!(invocation = %ledger.invocation_id(), error = %e, "failed to record turn failure");
        }
        err
    }

    /// Move the invocation to `Failed`, then append the terminal event.
    async fn finish_failed(
        &self,
        ledger: &mut TurnLedger,
        expected: InvocationStatus,
        reason: String,
        cancelled: bool,
        node: Option<String>,
    ) -> Result<()> {
        let key = ledger.session().clone();
        let id = ledger.invocation_id().clone();
        let _ = self.transition(&id, expected, |r| {
            r.status = InvocationStatus::Failed;
            r.pending = None;
            if node.is_some() {
                r.cursor.clone_from(&node);
            }
        })?;
        let cleared = cleared_decisions(ledger.state(), &id);
        let _ = ledger.append(
            AppendEvent::new(
                0,
                ENGINE_ACTOR,
                EventPayload::Failure {
                    reason: reason.clone(),
                    cancelled,
                },
            )
            .invocation(&id)
            .state_delta(cleared)
            .status(SessionStatus::Failed),
        )?;

        info!(session = %key, invocation = %id, cancelled, reason = %reason, "turn failed");
        let mut event = LifecycleEvent::new(LifecyclePoint::TurnFailed, key)
            .invocation(&id)
            .detail(json!({ "reason": reason, "cancelled": cancelled }));
        if let Some(node) = node {
            event = event.node(node);
        }
        self.emit(event).await;
        Ok(())
    }

    /// Request cancellation. Returns `false` when the invocation is no
    /// longer active.
    ///
    /// A suspended turn is failed immediately. A running one is flagged in
    /// the store (visible to whichever process drives it) and, when driven
    /// here, its token fires; it stops at the next step boundary.
    #[instrument(skip(self, id), fields(invocation = %id))]
    pub async fn cancel(&self, id: &InvocationId) -> Result<bool> {
        for _ in 0..=self.settings.invocation.conflict_retries {
            let record = self.store.get_invocation(id)?;
            match record.status {
                InvocationStatus::AwaitingConfirmation => {
                    let session = self.store.get(&record.session)?;
                    let mut ledger = self.ledger(&session, id, CancellationToken::new());
                    let reason = RuntimeError::Cancelled(id.to_string()).to_string();
                    match self
                        .finish_failed(&mut ledger, InvocationStatus::AwaitingConfirmation, reason, true, None)
                        .await
                    {
                        Ok(()) => return Ok(true),
                        Err(RuntimeError::Store(StoreError::StaleInvocation(_))) => {}
                        Err(e) => return Err(e),
                    }
                }
                InvocationStatus::Running => {
                    match self.transition(id, InvocationStatus::Running, |r| {
                        r.cancel_requested = true;
                    }) {
                        Ok(_) => {
                            if let Some(token) = self.live.get(id) {
                                token.value().cancel();
                            }
                            info!("cancellation requested");
                            return Ok(true);
                        }
                        Err(RuntimeError::Store(StoreError::StaleInvocation(_))) => {}
                        Err(e) => return Err(e),
                    }
                }
                _ => return Ok(false),
            }
        }
        Err(RuntimeError::Busy(format!("invocation {id} kept changing during cancel")))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────

    /// Full history and current state of a session.
    pub fn query(&self, key: &SessionKey) -> Result<Session> {
        Ok(self.store.get(key)?)
    }

    /// Live reading of a session: compacted ranges replaced by their
    /// summaries.
    pub fn context_view(&self, key: &SessionKey) -> Result<Vec<Event>> {
        let session = self.store.get(key)?;
        let records = self.store.compaction_records(key)?;
        Ok(context_view(&session, &records))
    }

    /// Sessions of one (app, user) scope.
    pub fn list_sessions(&self, app: &str, user: &str) -> Result<Vec<SessionKey>> {
        Ok(self.store.list_sessions(app, user)?)
    }

    /// An invocation record.
    pub fn invocation(&self, id: &InvocationId) -> Result<InvocationRecord> {
        Ok(self.store.get_invocation(id)?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Memory
    // ─────────────────────────────────────────────────────────────────────

    /// Facts relevant to `query` in one (app, user) scope, best first.
    pub async fn search_memory(
        &self,
        app: &str,
        user: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredFact>> {
        let memory = self.memory.as_ref().ok_or(RuntimeError::MemoryDisabled)?;
        Ok(memory.search(app, user, query, top_k).await?)
    }

    /// Ingest a completed session into memory.
    pub async fn ingest_session(&self, key: &SessionKey) -> Result<IngestReport> {
        let memory = self.memory.as_ref().ok_or(RuntimeError::MemoryDisabled)?;
        let report = self.ingest_with(memory, key).await?;
        self.emit(
            LifecycleEvent::new(LifecyclePoint::MemoryIngested, key.clone()).detail(json!({
                "stored": report.stored,
                "duplicates": report.duplicates,
            })),
        )
        .await;
        Ok(report)
    }

    async fn ingest_with(&self, memory: &MemoryService, key: &SessionKey) -> Result<IngestReport> {
        let session = self.store.get(key)?;
        Ok(memory.ingest(&session).await?)
    }
}

/// A patch deleting the decisions recorded for `id`.
fn cleared_decisions(state: &StateMap, id: &InvocationId) -> StateMap {
    confirmation_keys(state, id)
        .into_iter()
        .map(|key| (key, Value::Null))
        .collect()
}

/// Confirmation deadline, saturating on overflow.
fn deadline(from: DateTime<Utc>, timeout_ms: u64) -> DateTime<Utc> {
    i64::try_from(timeout_ms)
        .ok()
        .and_then(TimeDelta::try_milliseconds)
        .and_then(|delta| from.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
