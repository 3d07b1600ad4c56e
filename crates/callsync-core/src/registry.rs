//! Call registry
//!
//! Single owner of every call the orchestrator knows about: live calls, invites
//! still waiting for a decision, and outgoing intents waiting for the transport.
//! All three maps and the focus marker sit behind one lock, so each operation
//! observes and mutates them atomically. The lock is never held across an
//! `.await`; callers get cloned snapshots back.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::call::{CallId, CallRecord, CallSignal, CallState, DisconnectReason, TransitionError};
use crate::transport::InviteHandle;

/// An incoming call waiting to be answered, rejected or cancelled
#[derive(Debug, Clone)]
pub struct PendingInvite {
    /// Record in the `Invited` state
    pub record: CallRecord,
    /// What the transport needs to answer or reject it
    pub handle: InviteHandle,
}

/// Who asked for an outgoing call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallSource {
    /// The application UI
    App,
    /// The system call authority (recents list, car kit, ...)
    System,
}

/// Bridges "start call approved" and "transport dialing"
#[derive(Debug, Clone)]
pub struct PendingOutgoingIntent {
    pub call_id: CallId,
    pub to: String,
    pub display_name: Option<String>,
    pub source: CallSource,
    pub created_at: DateTime<Utc>,
}

impl PendingOutgoingIntent {
    pub fn new(
        call_id: CallId,
        to: impl Into<String>,
        display_name: Option<String>,
        source: CallSource,
    ) -> Self {
        Self {
            call_id,
            to: to.into(),
            display_name,
            source,
            created_at: Utc::now(),
        }
    }
}

/// Result of driving a live call with a signal
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The transition happened; `record` is the state after it
    Applied {
        previous: CallState,
        record: CallRecord,
    },
    /// No live call with that id
    NotFound,
    /// The call exists but refused the signal
    Rejected(TransitionError),
}

/// Everything removed from the registry in one sweep
#[derive(Debug, Default)]
pub struct DrainedCalls {
    pub live: Vec<CallRecord>,
    pub invites: Vec<PendingInvite>,
    pub intents: Vec<PendingOutgoingIntent>,
}

/// Registry statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub live_calls: usize,
    pub pending_invites: usize,
    pub pending_intents: usize,
    pub total_created: usize,
    pub total_ended: usize,
    pub failed_calls: usize,
}

#[derive(Debug, Default)]
struct RegistryInner {
    live: HashMap<CallId, CallRecord>,
    invites: HashMap<CallId, PendingInvite>,
    intents: HashMap<CallId, PendingOutgoingIntent>,
    focus: Option<CallId>,
    total_created: usize,
    total_ended: usize,
    failed_calls: usize,
}

impl RegistryInner {
    /// Explicit focus if set, otherwise the only live call
    fn focused(&self) -> Option<&CallRecord> {
        if let Some(id) = &self.focus {
            return self.live.get(id);
        }
        if self.live.len() == 1 {
            return self.live.values().next();
        }
        None
    }

    fn finish(&mut self, record: &CallRecord) {
        self.live.remove(&record.id);
        self.intents.remove(&record.id);
        if self.focus.as_ref() == Some(&record.id) {
            self.focus = None;
        }
        self.total_ended += 1;
        if matches!(record.disconnect_reason, Some(DisconnectReason::Failure(_))) {
            self.failed_calls += 1;
        }
    }
}

/// Authoritative per-call state shared by every component
#[derive(Debug, Clone, Default)]
pub struct CallRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ===== Outgoing intents =====

    pub fn insert_intent(&self, intent: PendingOutgoingIntent) {
        let mut inner = self.inner.lock();
        tracing::debug!(call_id = %intent.call_id, to = %intent.to, "Recorded outgoing intent");
        inner.intents.insert(intent.call_id.clone(), intent);
    }

    pub fn take_intent(&self, call_id: &CallId) -> Option<PendingOutgoingIntent> {
        self.inner.lock().intents.remove(call_id)
    }

    pub fn intent(&self, call_id: &CallId) -> Option<PendingOutgoingIntent> {
        self.inner.lock().intents.get(call_id).cloned()
    }

    /// Create the live record for an approved outgoing call and move it to
    /// `Connecting`, focusing it.
    pub fn start_outgoing(&self, mut record: CallRecord) -> Result<CallRecord, TransitionError> {
        let mut inner = self.inner.lock();
        if inner.live.contains_key(&record.id) || inner.invites.contains_key(&record.id) {
            return Err(TransitionError::Invalid {
                call_id: record.id.clone(),
                from: record.state,
                signal: "duplicate call id".to_string(),
            });
        }
        record.apply(CallSignal::StartApproved)?;
        inner.focus = Some(record.id.clone());
        inner.total_created += 1;
        inner.live.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    // ===== Pending invites =====

    /// Add an invite; returns false if the id is already known
    pub fn insert_invite(&self, invite: PendingInvite) -> bool {
        let mut inner = self.inner.lock();
        let id = invite.record.id.clone();
        if inner.invites.contains_key(&id) || inner.live.contains_key(&id) {
            return false;
        }
        inner.total_created += 1;
        inner.invites.insert(id, invite);
        true
    }

    pub fn has_invite(&self, call_id: &CallId) -> bool {
        self.inner.lock().invites.contains_key(call_id)
    }

    pub fn invite(&self, call_id: &CallId) -> Option<PendingInvite> {
        self.inner.lock().invites.get(call_id).cloned()
    }

    pub fn pending_invites(&self) -> Vec<PendingInvite> {
        let inner = self.inner.lock();
        let mut invites: Vec<_> = inner.invites.values().cloned().collect();
        invites.sort_by(|a, b| a.record.created_at.cmp(&b.record.created_at));
        invites
    }

    /// Move an invite into the live set as `Answering` and focus it
    pub fn promote_invite(&self, call_id: &CallId) -> Option<(CallRecord, InviteHandle)> {
        let mut inner = self.inner.lock();
        let mut invite = inner.invites.remove(call_id)?;
        if let Err(e) = invite.record.apply(CallSignal::AnswerApproved) {
            tracing::warn!(call_id = %call_id, error = %e, "Invite refused answer");
            inner.invites.insert(call_id.clone(), invite);
            return None;
        }
        inner.focus = Some(call_id.clone());
        inner.live.insert(call_id.clone(), invite.record.clone());
        Some((invite.record, invite.handle))
    }

    /// Remove an invite and close its record with `reason`
    pub fn decline_invite(
        &self,
        call_id: &CallId,
        reason: DisconnectReason,
    ) -> Option<(CallRecord, InviteHandle)> {
        let mut inner = self.inner.lock();
        let mut invite = inner.invites.remove(call_id)?;
        // Invited always accepts a disconnect
        let _ = invite.record.apply(CallSignal::Disconnect(reason));
        inner.total_ended += 1;
        Some((invite.record, invite.handle))
    }

    // ===== Live calls =====

    pub fn get(&self, call_id: &CallId) -> Option<CallRecord> {
        self.inner.lock().live.get(call_id).cloned()
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.inner.lock().live.contains_key(call_id)
    }

    pub fn live_calls(&self) -> Vec<CallRecord> {
        let inner = self.inner.lock();
        let mut calls: Vec<_> = inner.live.values().cloned().collect();
        calls.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        calls
    }

    pub fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    /// Compare-and-transition a live call. Disconnected records leave the
    /// registry in the same step.
    pub fn transition(&self, call_id: &CallId, signal: CallSignal) -> TransitionOutcome {
        let mut inner = self.inner.lock();
        let Some(record) = inner.live.get_mut(call_id) else {
            return TransitionOutcome::NotFound;
        };

        let previous = match record.apply(signal) {
            Ok(previous) => previous,
            Err(e) => return TransitionOutcome::Rejected(e),
        };
        let record = record.clone();

        tracing::debug!(
            call_id = %call_id,
            from = %previous,
            to = %record.state,
            "Call state transition"
        );

        if record.state.is_terminated() {
            inner.finish(&record);
        }
        TransitionOutcome::Applied { previous, record }
    }

    /// Flag a live call as being hung up from this device. Returns false if the
    /// call is unknown or a local hangup is already underway.
    pub fn mark_ending(&self, call_id: &CallId) -> bool {
        let mut inner = self.inner.lock();
        match inner.live.get_mut(call_id) {
            Some(record) if !record.ending_locally => {
                record.ending_locally = true;
                true
            }
            _ => false,
        }
    }

    pub fn set_muted(&self, call_id: &CallId, muted: bool) -> Option<CallRecord> {
        let mut inner = self.inner.lock();
        let record = inner.live.get_mut(call_id)?;
        record.muted = muted;
        Some(record.clone())
    }

    /// Update the hold flag and move focus. Holding the focused call hands focus
    /// to the only other unheld call, if there is exactly one; resuming a call
    /// focuses it.
    pub fn set_on_hold(&self, call_id: &CallId, on_hold: bool) -> Option<CallRecord> {
        let mut inner = self.inner.lock();
        let record = {
            let record = inner.live.get_mut(call_id)?;
            record.on_hold = on_hold;
            record.clone()
        };

        if on_hold {
            if inner.focus.as_ref() == Some(call_id) {
                let next_focus = {
                    let mut others = inner
                        .live
                        .values()
                        .filter(|r| &r.id != call_id && !r.on_hold);
                    match (others.next(), others.next()) {
                        (Some(only), None) => Some(only.id.clone()),
                        _ => None,
                    }
                };
                inner.focus = next_focus;
            }
        } else {
            inner.focus = Some(call_id.clone());
        }
        Some(record)
    }

    // ===== Focus =====

    /// The call UI actions apply to when no id is given
    pub fn active_call(&self) -> Option<CallRecord> {
        self.inner.lock().focused().cloned()
    }

    pub fn set_focus(&self, call_id: Option<CallId>) {
        self.inner.lock().focus = call_id;
    }

    /// Remove everything, for logout and authority resets
    pub fn drain(&self) -> DrainedCalls {
        let mut inner = self.inner.lock();
        inner.focus = None;
        DrainedCalls {
            live: inner.live.drain().map(|(_, r)| r).collect(),
            invites: inner.invites.drain().map(|(_, i)| i).collect(),
            intents: inner.intents.drain().map(|(_, i)| i).collect(),
        }
    }

    pub fn stats(&self) -> RegistryStats {
        let inner = self.inner.lock();
        RegistryStats {
            live_calls: inner.live.len(),
            pending_invites: inner.invites.len(),
            pending_intents: inner.intents.len(),
            total_created: inner.total_created,
            total_ended: inner.total_ended,
            failed_calls: inner.failed_calls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite(id: &str) -> PendingInvite {
        let record = CallRecord::incoming(CallId::from(id), "alice", "bob", None, HashMap::new());
        PendingInvite {
            handle: InviteHandle::new(record.id.clone(), HashMap::new()),
            record,
        }
    }

    fn start(registry: &CallRegistry, to: &str) -> CallId {
        let record = CallRecord::outgoing(CallId::new(), to, None);
        registry.start_outgoing(record).unwrap().id
    }

    #[test]
    fn test_single_live_call_is_focused() {
        let registry = CallRegistry::new();
        assert!(registry.active_call().is_none());

        let id = start(&registry, "+15551234567");
        registry.set_focus(None);
        assert_eq!(registry.active_call().unwrap().id, id);
    }

    #[test]
    fn test_two_live_calls_without_focus_report_none() {
        let registry = CallRegistry::new();
        let first = start(&registry, "+15550000001");
        let second = start(&registry, "+15550000002");

        // The newest approved call holds focus
        assert_eq!(registry.active_call().unwrap().id, second);

        registry.set_focus(None);
        assert!(registry.active_call().is_none());

        registry.set_focus(Some(first.clone()));
        assert_eq!(registry.active_call().unwrap().id, first);
    }

    #[test]
    fn test_disconnect_removes_record_and_focus() {
        let registry = CallRegistry::new();
        let id = start(&registry, "+15551234567");

        let outcome = registry.transition(
            &id,
            CallSignal::Disconnect(DisconnectReason::Failure("31005".into())),
        );
        match outcome {
            TransitionOutcome::Applied { previous, record } => {
                assert_eq!(previous, CallState::Connecting);
                assert_eq!(record.state, CallState::Disconnected);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        assert!(!registry.contains(&id));
        assert!(registry.active_call().is_none());
        assert!(matches!(
            registry.transition(&id, CallSignal::Disconnect(DisconnectReason::RemoteEnded)),
            TransitionOutcome::NotFound
        ));
        assert_eq!(registry.stats().failed_calls, 1);
    }

    #[test]
    fn test_invite_promotion_and_decline() {
        let registry = CallRegistry::new();
        assert!(registry.insert_invite(invite("CA1")));
        assert!(!registry.insert_invite(invite("CA1")));
        assert!(registry.insert_invite(invite("CA2")));

        let (record, _) = registry.promote_invite(&CallId::from("CA1")).unwrap();
        assert_eq!(record.state, CallState::Answering);
        assert!(!registry.has_invite(&CallId::from("CA1")));
        assert_eq!(registry.active_call().unwrap().id, CallId::from("CA1"));

        let (record, _) = registry
            .decline_invite(&CallId::from("CA2"), DisconnectReason::RemoteEnded)
            .unwrap();
        assert_eq!(record.state, CallState::Disconnected);
        assert!(registry
            .decline_invite(&CallId::from("CA2"), DisconnectReason::RemoteEnded)
            .is_none());
        assert!(registry.pending_invites().is_empty());
    }

    #[test]
    fn test_mark_ending_only_once() {
        let registry = CallRegistry::new();
        let id = start(&registry, "+15551234567");
        assert!(registry.mark_ending(&id));
        assert!(!registry.mark_ending(&id));
        assert!(!registry.mark_ending(&CallId::from("missing")));
    }

    #[test]
    fn test_hold_moves_focus() {
        let registry = CallRegistry::new();
        let first = start(&registry, "+15550000001");
        let second = start(&registry, "+15550000002");

        registry.set_on_hold(&second, true);
        assert_eq!(registry.active_call().unwrap().id, first);

        registry.set_on_hold(&second, false);
        assert_eq!(registry.active_call().unwrap().id, second);
    }

    #[test]
    fn test_drain_empties_everything() {
        let registry = CallRegistry::new();
        start(&registry, "+15551234567");
        registry.insert_invite(invite("CA9"));
        registry.insert_intent(PendingOutgoingIntent::new(
            CallId::new(),
            "+15550000000",
            None,
            CallSource::App,
        ));

        let drained = registry.drain();
        assert_eq!(drained.live.len(), 1);
        assert_eq!(drained.invites.len(), 1);
        assert_eq!(drained.intents.len(), 1);
        assert_eq!(registry.stats().live_calls, 0);
        assert!(registry.active_call().is_none());
    }
}
