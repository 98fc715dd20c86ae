//! Behavioral contract every [`SessionStore`] backend must satisfy.

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use serde_json::json;

use super::SessionStore;
use crate::errors::StoreError;
use crate::types::{
    AppendEvent, EventPayload, InvocationRecord, InvocationStatus, PendingConfirmation,
    SessionKey, SessionStatus, StateMap,
};
use cadence_core::ConfirmationToken;

fn output(seq: u64, n: i64) -> AppendEvent {
    AppendEvent::new(seq, "agent", EventPayload::Output { content: json!(n) })
}

fn delta(key: &str, value: serde_json::Value) -> StateMap {
    let mut map = StateMap::new();
    let _ = map.insert(key.into(), value);
    map
}

/// Run every contract check against `store`. Each check uses its own app
/// name so the checks do not interfere.
pub(crate) fn contract_suite(store: &dyn SessionStore) {
    create_and_get(store);
    gapless_append(store);
    scope_isolation(store);
    state_updates(store);
    single_active_invocation(store);
    invocation_compare_and_swap(store);
    expired_confirmations(store);
    compaction_ranges(store);
}

fn create_and_get(store: &dyn SessionStore) {
    let key = SessionKey::new("create", "u1", "s1");
    let created = store.create(&key).unwrap();
    assert_eq!(created.status, SessionStatus::Active);
    assert!(created.events.is_empty());
    assert_matches!(store.create(&key), Err(StoreError::AlreadyExists(_)));

    let missing = SessionKey::new("create", "u1", "nope");
    assert_matches!(store.get(&missing), Err(StoreError::SessionNotFound(_)));
    assert_matches!(
        store.append_event(&missing, output(1, 0)),
        Err(StoreError::SessionNotFound(_))
    );
    assert_eq!(store.list_sessions("create", "u1").unwrap(), vec![key]);
}

fn gapless_append(store: &dyn SessionStore) {
    let key = SessionKey::new("append", "u1", "s1");
    let _ = store.create(&key).unwrap();
    for seq in 1..=3 {
        let event = store.append_event(&key, output(seq, 0)).unwrap();
        assert_eq!(event.sequence, seq);
    }
    assert_matches!(
        store.append_event(&key, output(3, 0)),
        Err(StoreError::Conflict { expected: 3, actual: 4 })
    );
    assert_matches!(
        store.append_event(&key, output(6, 0)),
        Err(StoreError::Conflict { expected: 6, actual: 4 })
    );
    let sequences: Vec<u64> = store.get(&key).unwrap().events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(store.last_sequence(&key).unwrap(), 3);
    assert_eq!(store.events_after(&key, 1).unwrap().len(), 2);

    let paused = store
        .append_event(&key, output(4, 0).status(SessionStatus::Paused))
        .unwrap();
    assert_eq!(paused.sequence, 4);
    assert_eq!(store.get(&key).unwrap().status, SessionStatus::Paused);
}

fn scope_isolation(store: &dyn SessionStore) {
    let mine = SessionKey::new("iso", "u1", "shared");
    let theirs = SessionKey::new("iso", "u2", "shared");
    let other_app = SessionKey::new("iso-b", "u1", "shared");
    let _ = store.create(&mine).unwrap();
    let _ = store
        .append_event(&mine, output(1, 1).state_delta(delta("secret", json!("blue"))))
        .unwrap();

    assert_matches!(store.get(&theirs), Err(StoreError::SessionNotFound(_)));
    assert_matches!(store.get(&other_app), Err(StoreError::SessionNotFound(_)));
    let _ = store.create(&theirs).unwrap();
    let theirs_loaded = store.get(&theirs).unwrap();
    assert!(theirs_loaded.events.is_empty());
    assert!(theirs_loaded.state.is_empty());
    assert!(store.list_sessions("iso", "u3").unwrap().is_empty());
}

fn state_updates(store: &dyn SessionStore) {
    let key = SessionKey::new("state", "u1", "s1");
    let _ = store.create(&key).unwrap();
    let _ = store
        .append_event(&key, output(1, 1).state_delta(delta("units", json!(50))))
        .unwrap();
    let state = store.update_state(&key, &delta("note", json!("rush"))).unwrap();
    assert_eq!(state["units"], 50);
    assert_eq!(state["note"], "rush");
    let state = store.update_state(&key, &delta("note", json!(null))).unwrap();
    assert!(!state.contains_key("note"));
    assert_eq!(store.get(&key).unwrap().state, state);
}

fn single_active_invocation(store: &dyn SessionStore) {
    let key = SessionKey::new("busy", "u1", "s1");
    let _ = store.create(&key).unwrap();
    let first = InvocationRecord::start(key.clone(), "pipeline");
    store.begin_invocation(&first).unwrap();
    assert_matches!(
        store.begin_invocation(&InvocationRecord::start(key.clone(), "pipeline")),
        Err(StoreError::SessionBusy(_))
    );
    assert_eq!(store.active_invocation(&key).unwrap().map(|r| r.id), Some(first.id.clone()));

    store
        .update_invocation(&first.with_status(InvocationStatus::Completed), InvocationStatus::Running)
        .unwrap();
    assert!(store.active_invocation(&key).unwrap().is_none());
    store
        .begin_invocation(&InvocationRecord::start(key.clone(), "pipeline"))
        .unwrap();

    let orphan = InvocationRecord::start(SessionKey::new("busy", "u1", "missing"), "pipeline");
    assert_matches!(store.begin_invocation(&orphan), Err(StoreError::SessionNotFound(_)));
}

fn invocation_compare_and_swap(store: &dyn SessionStore) {
    let key = SessionKey::new("cas", "u1", "s1");
    let _ = store.create(&key).unwrap();
    let record = InvocationRecord::start(key, "pipeline");
    store.begin_invocation(&record).unwrap();

    let failed = record.with_status(InvocationStatus::Failed);
    store.update_invocation(&failed, InvocationStatus::Running).unwrap();
    assert_matches!(
        store.update_invocation(&failed, InvocationStatus::Running),
        Err(StoreError::StaleInvocation(_))
    );
    assert_eq!(
        store.get_invocation(&record.id).unwrap().status,
        InvocationStatus::Failed
    );
    assert_matches!(
        store.get_invocation(&"inv_missing".into()),
        Err(StoreError::InvocationNotFound(_))
    );
}

fn expired_confirmations(store: &dyn SessionStore) {
    let now = Utc::now();
    let mut ids = Vec::new();
    for (name, offset) in [("late", -10), ("soon", 3600)] {
        let key = SessionKey::new("expiry", "u1", name);
        let _ = store.create(&key).unwrap();
        let mut record = InvocationRecord::start(key, "pipeline");
        store.begin_invocation(&record).unwrap();
        record = record.with_status(InvocationStatus::AwaitingConfirmation);
        record.pending = Some(PendingConfirmation {
            token: ConfirmationToken::generate(),
            node: "pipeline/0:approve".into(),
            hint: "approve?".into(),
            payload: json!({}),
            requested_at: now,
            expires_at: now + Duration::seconds(offset),
        });
        store.update_invocation(&record, InvocationStatus::Running).unwrap();
        ids.push(record.id);
    }
    let expired: Vec<_> = store
        .expired_confirmations(now)
        .unwrap()
        .into_iter()
        .filter(|r| r.session.app == "expiry")
        .map(|r| r.id)
        .collect();
    assert_eq!(expired, vec![ids[0].clone()]);
}

fn compaction_ranges(store: &dyn SessionStore) {
    let key = SessionKey::new("compact", "u1", "s1");
    let _ = store.create(&key).unwrap();
    for seq in 1..=6 {
        let _ = store.append_event(&key, output(seq, 0)).unwrap();
    }
    let summary = |seq| {
        AppendEvent::new(
            seq,
            "compactor",
            EventPayload::Summary {
                start_sequence: 1,
                end_sequence: 4,
                text: "six outputs".into(),
            },
        )
    };

    assert_matches!(
        store.record_compaction(&key, output(7, 0), 1, 4),
        Err(StoreError::InvalidOperation(_))
    );
    let record = store.record_compaction(&key, summary(7), 1, 4).unwrap();
    assert_eq!(record.summary_sequence, 7);
    assert_eq!(store.last_sequence(&key).unwrap(), 7);
    assert_matches!(
        store.record_compaction(&key, summary(8), 3, 6),
        Err(StoreError::InvalidOperation(_))
    );
    assert_eq!(store.last_sequence(&key).unwrap(), 7);
    assert_matches!(
        store.record_compaction(&key, summary(7), 5, 6),
        Err(StoreError::Conflict { .. })
    );
    assert_eq!(store.compaction_records(&key).unwrap().len(), 1);
}
