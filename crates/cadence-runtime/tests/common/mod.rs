#![allow(dead_code, missing_docs, unused_results)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use cadence_events::{MemorySessionStore, Session, SessionStore};
use cadence_runtime::{
    Composition, FnStep, InvocationEngine, StepError, StepOutcome, StepOutput,
};
use cadence_settings::RuntimeSettings;
use serde_json::{Value, json};

/// Engine over a fresh in-memory store.
pub fn engine(settings: RuntimeSettings, compositions: Vec<Composition>) -> InvocationEngine {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
    engine_on(store, settings, compositions)
}

pub fn engine_on(
    store: Arc<dyn SessionStore>,
    settings: RuntimeSettings,
    compositions: Vec<Composition>,
) -> InvocationEngine {
    let mut builder = InvocationEngine::builder(store, settings);
    for composition in compositions {
        builder = builder.composition(composition);
    }
    builder.build().unwrap()
}

/// Payload kinds of a session log, in order.
pub fn kinds(session: &Session) -> Vec<&'static str> {
    session.events.iter().map(|e| e.payload.kind()).collect()
}

/// Position of the first event of `kind`.
pub fn position(session: &Session, kind: &str) -> usize {
    kinds(session)
        .iter()
        .position(|k| *k == kind)
        .unwrap_or_else(|| panic!("no {kind} event in {:?}", kinds(session)))
}

/// A step that counts its executions and outputs its own name.
pub fn counted(name: &str, runs: &Arc<AtomicUsize>) -> Composition {
    let runs = Arc::clone(runs);
    let output = name.to_string();
    Composition::step(FnStep::new(name, move |_| {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok(StepOutcome::done(json!(output.clone())))
    }))
}

/// `checkout`: parse the unit count, confirm large orders, then place it.
pub fn checkout() -> Composition {
    let parse = FnStep::new("parse", |ctx| {
        let text = ctx.input.as_str().unwrap_or_default();
        let units = text
            .split_whitespace()
            .find_map(|w| w.parse::<u64>().ok())
            .ok_or_else(|| StepError::new(format!("no unit count in {text:?}")))?;
        Ok(StepOutcome::Done(
            StepOutput::new(json!(units)).with_state("units", json!(units)),
        ))
    });
    let confirm = FnStep::new("confirm", |ctx| {
        let units = ctx.get("units").and_then(Value::as_u64).unwrap_or(0);
        if units <= 10 {
            return Ok(StepOutcome::done(json!("auto-approved")));
        }
        match ctx.confirmation() {
            None => Ok(StepOutcome::confirm(
                format!("order {units} units?"),
                json!({ "units": units }),
            )),
            Some(decision) if decision.approved => Ok(StepOutcome::Done(
                StepOutput::new(json!("approved")).with_state("approved", json!(true)),
            )),
            Some(_) => Ok(StepOutcome::Done(
                StepOutput::new(json!("rejected")).with_state("approved", json!(false)),
            )),
        }
    });
    let place = FnStep::new("place", |ctx| {
        let units = ctx.get("units").cloned().unwrap_or(Value::Null);
        if ctx.get("approved") == Some(&json!(false)) {
            return Ok(StepOutcome::done(json!({ "placed": false, "units": units })));
        }
        Ok(StepOutcome::done(json!({ "placed": true, "units": units })))
    });
    Composition::sequential(
        "checkout",
        vec![
            Composition::step(parse),
            Composition::step(confirm),
            Composition::step(place),
        ],
    )
}
