// Interception Gate (spec §4.5).
//
// Suspends a request awaiting a human decision; resumes with possibly
// edited content or drops it. Grounded on the teacher's `PendingApprovals`
// (`engine/state.rs`): a map of id → single-shot oneshot sender protected by
// a short-lived mutex, with the suspended task awaiting its receiver
// outside the lock.
//
// Guarantees: at most one outstanding `suspend` per tx id; every `suspend`
// returns exactly once, with one of {approved+edits, dropped, timeout}.

use crate::atoms::constants::{GATE_SWEEP_INTERVAL_SECS, INTERCEPTION_SUSPEND_TIMEOUT_SECS};
use crate::atoms::types::{ApprovalResponse, DropReason};
use log::{info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use uuid::Uuid;

/// What `suspend` resolves to.
pub enum GateDecision {
    Approved(ApprovalResponse),
    Dropped(DropReason),
}

struct PendingSuspension {
    tx: oneshot::Sender<GateDecision>,
    created_at: Instant,
}

/// Holds no enabled/disabled state of its own — `Environment.interception_enabled`
/// is the single source of truth for that flag; `set_enabled` only reacts to
/// a transition the caller already decided on.
pub struct InterceptionGate {
    pending: Mutex<HashMap<Uuid, PendingSuspension>>,
}

impl Default for InterceptionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl InterceptionGate {
    pub fn new() -> Self {
        InterceptionGate { pending: Mutex::new(HashMap::new()) }
    }

    /// Called whenever interception is toggled; `enabled` is the new value.
    /// Turning it off auto-approves every pending suspension.
    pub fn set_enabled(&self, enabled: bool) {
        if !enabled {
            self.drain_as_approved_unedited();
        }
    }

    /// Called by the pipeline: suspend `id`, and await the UI's decision (or
    /// a timeout). Only one suspension per id may be outstanding at a time.
    pub async fn suspend(&self, id: Uuid) -> GateDecision {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            pending.insert(id, PendingSuspension { tx, created_at: Instant::now() });
        }
        match rx.await {
            Ok(decision) => decision,
            // Sender dropped without a send — treat as a drop (shutdown path).
            Err(_) => GateDecision::Dropped(DropReason::Timeout),
        }
    }

    /// Called by the UI command handler: resolve a pending suspension exactly once.
    pub fn resolve(&self, id: Uuid, response: ApprovalResponse) -> bool {
        let slot = self.pending.lock().remove(&id);
        match slot {
            Some(slot) => {
                let decision = if response.approved {
                    GateDecision::Approved(response)
                } else {
                    GateDecision::Dropped(DropReason::User)
                };
                // Non-blocking send: if the awaiting task already gave up
                // (e.g. client disconnected), this is a harmless no-op.
                let _ = slot.tx.send(decision);
                true
            }
            None => false,
        }
    }

    /// Toggling interception off resolves all pending suspensions as
    /// approved with their original unedited content and drains the set.
    /// Since the gate only holds the oneshot slot (not the original
    /// request), callers that need to resend the original body must do so
    /// via the `approved` flag with an empty edit set — the pipeline
    /// interprets that as "use what it already captured".
    fn drain_as_approved_unedited(&self) {
        let mut pending = self.pending.lock();
        let count = pending.len();
        for (_, slot) in pending.drain() {
            let _ = slot.tx.send(GateDecision::Approved(ApprovalResponse {
                approved: true,
                method: String::new(),
                protocol: String::new(),
                url: String::new(),
                headers: Default::default(),
                body: Vec::new(),
            }));
        }
        if count > 0 {
            info!("[gate] Interception disabled — auto-approved {count} pending suspensions");
        }
    }

    /// Background sweep: any suspension older than the timeout is resolved
    /// as dropped. Run every `GATE_SWEEP_INTERVAL_SECS` by the caller.
    pub fn sweep(&self) {
        let cutoff = Instant::now() - std::time::Duration::from_secs(INTERCEPTION_SUSPEND_TIMEOUT_SECS);
        let mut pending = self.pending.lock();
        let expired: Vec<Uuid> = pending
            .iter()
            .filter(|(_, slot)| slot.created_at <= cutoff)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(slot) = pending.remove(&id) {
                let _ = slot.tx.send(GateDecision::Dropped(DropReason::Timeout));
                warn!("[gate] Suspension {id} timed out and was dropped");
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Spawn the periodic sweep task. Returns immediately; the task runs until
/// the process-wide cancellation flag is set.
pub fn spawn_sweeper(gate: Arc<InterceptionGate>, cancel: Arc<AtomicBool>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(std::time::Duration::from_secs(GATE_SWEEP_INTERVAL_SECS)).await;
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            gate.sweep();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approval(approved: bool) -> ApprovalResponse {
        ApprovalResponse {
            approved,
            method: "GET".into(),
            protocol: "HTTP/1.1".into(),
            url: "http://example.test/".into(),
            headers: Default::default(),
            body: Vec::new(),
        }
    }

    #[tokio::test]
    async fn resolve_approved_unblocks_suspend() {
        let gate = Arc::new(InterceptionGate::new());
        let id = Uuid::now_v7();
        let g = gate.clone();
        let handle = tokio::spawn(async move { g.suspend(id).await });
        // give the suspend call a moment to register
        tokio::task::yield_now().await;
        assert!(gate.resolve(id, approval(true)));
        let decision = handle.await.unwrap();
        assert!(matches!(decision, GateDecision::Approved(_)));
    }

    #[tokio::test]
    async fn resolve_dropped_unblocks_suspend_as_dropped() {
        let gate = Arc::new(InterceptionGate::new());
        let id = Uuid::now_v7();
        let g = gate.clone();
        let handle = tokio::spawn(async move { g.suspend(id).await });
        tokio::task::yield_now().await;
        assert!(gate.resolve(id, approval(false)));
        let decision = handle.await.unwrap();
        assert!(matches!(decision, GateDecision::Dropped(DropReason::User)));
    }

    #[test]
    fn resolve_unknown_id_returns_false() {
        let gate = InterceptionGate::new();
        assert!(!gate.resolve(Uuid::now_v7(), approval(true)));
    }

    #[tokio::test]
    async fn sweep_drops_expired_suspensions() {
        let gate = InterceptionGate::new();
        let id = Uuid::now_v7();
        {
            let mut pending = gate.pending.lock();
            let (tx, rx) = oneshot::channel();
            pending.insert(
                id,
                PendingSuspension {
                    tx,
                    created_at: Instant::now()
                        - std::time::Duration::from_secs(INTERCEPTION_SUSPEND_TIMEOUT_SECS + 1),
                },
            );
            drop(rx); // receiver dropped is fine, we only assert the slot clears
        }
        gate.sweep();
        assert_eq!(gate.pending_count(), 0);
    }

    #[tokio::test]
    async fn disabling_drains_pending_suspensions_as_approved() {
        let gate = Arc::new(InterceptionGate::new());
        let id = Uuid::now_v7();
        let g = gate.clone();
        let handle = tokio::spawn(async move { g.suspend(id).await });
        tokio::task::yield_now().await;
        assert_eq!(gate.pending_count(), 1);

        gate.set_enabled(false);
        let decision = handle.await.unwrap();
        assert!(matches!(decision, GateDecision::Approved(_)));
        assert_eq!(gate.pending_count(), 0);
    }

    #[test]
    fn enabling_with_nothing_pending_is_a_no_op() {
        let gate = InterceptionGate::new();
        gate.set_enabled(true);
        assert_eq!(gate.pending_count(), 0);
    }
}
