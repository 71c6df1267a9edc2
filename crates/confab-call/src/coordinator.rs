//! Call session lifecycle.
//!
//! Each session's state lives in a single [`AtomicU8`]; every transition is
//! one compare-and-swap keyed by call id.  When accept, decline, and timeout
//! race on the same ring, exactly one CAS wins and the losers observe the
//! state the winner installed.  Unrelated calls never contend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use confab_shared::{CallActor, CallId, CallState, CallType, UserId};

use crate::error::{CallError, Result};

// Atomic encoding of CallState.
const RINGING: u8 = 0;
const ACTIVE: u8 = 1;
const COMPLETED: u8 = 2;
const DECLINED: u8 = 3;
const MISSED: u8 = 4;

fn decode(raw: u8) -> CallState {
    match raw {
        RINGING => CallState::Ringing,
        ACTIVE => CallState::Active,
        COMPLETED => CallState::Completed,
        DECLINED => CallState::Declined,
        _ => CallState::Missed,
    }
}

/// Point-in-time view of a session, returned from every transition so the
/// gateway can fan it out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallSnapshot {
    pub id: CallId,
    pub caller_id: UserId,
    pub receiver_id: UserId,
    pub call_type: CallType,
    pub state: CallState,
    pub ended_by: Option<CallActor>,
    pub started_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallSnapshot {
    /// Talk time in whole seconds.  Zero unless the call was answered.
    pub fn duration_secs(&self) -> u32 {
        match (self.answered_at, self.ended_at) {
            (Some(answered), Some(ended)) => {
                u32::try_from((ended - answered).num_seconds().max(0)).unwrap_or(u32::MAX)
            }
            _ => 0,
        }
    }
}

struct CallSlot {
    id: CallId,
    caller_id: UserId,
    receiver_id: UserId,
    call_type: CallType,
    state: AtomicU8,
    started_at: DateTime<Utc>,
    // Written only by the CAS winner of the transition that sets them.
    outcome: Mutex<SlotOutcome>,
}

#[derive(Default, Clone, Copy)]
struct SlotOutcome {
    ended_by: Option<CallActor>,
    answered_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl CallSlot {
    fn snapshot(&self) -> CallSnapshot {
        let outcome = *lock(&self.outcome);
        CallSnapshot {
            id: self.id,
            caller_id: self.caller_id,
            receiver_id: self.receiver_id,
            call_type: self.call_type,
            state: decode(self.state.load(Ordering::Acquire)),
            ended_by: outcome.ended_by,
            started_at: self.started_at,
            answered_at: outcome.answered_at,
            ended_at: outcome.ended_at,
        }
    }
}

/// Shared registry of live call sessions.  Cheap to clone behind an `Arc` in
/// the gateway's application state.
#[derive(Default)]
pub struct CallCoordinator {
    calls: RwLock<HashMap<CallId, Arc<CallSlot>>>,
    // At most one live call per user; value is the call holding the user.
    busy: Mutex<HashMap<UserId, CallId>>,
}

impl CallCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ringing the receiver.  Fails while either party has a live
    /// session.
    pub fn place_call(
        &self,
        caller_id: UserId,
        receiver_id: UserId,
        call_type: CallType,
    ) -> Result<CallSnapshot> {
        let mut busy = lock(&self.busy);
        if busy.contains_key(&caller_id) {
            return Err(CallError::CallerBusy(caller_id));
        }
        if receiver_id == caller_id || busy.contains_key(&receiver_id) {
            return Err(CallError::ReceiverBusy(receiver_id));
        }

        let slot = Arc::new(CallSlot {
            id: CallId::new(),
            caller_id,
            receiver_id,
            call_type,
            state: AtomicU8::new(RINGING),
            started_at: Utc::now(),
            outcome: Mutex::new(SlotOutcome::default()),
        });
        busy.insert(caller_id, slot.id);
        busy.insert(receiver_id, slot.id);
        drop(busy);

        let snapshot = slot.snapshot();
        write_lock(&self.calls).insert(slot.id, slot);
        info!(
            call = %snapshot.id,
            caller = %caller_id.short(),
            receiver = %receiver_id.short(),
            kind = call_type.as_str(),
            "call placed"
        );
        Ok(snapshot)
    }

    /// `Ringing -> Active`.
    pub fn accept_call(&self, call_id: CallId) -> Result<CallSnapshot> {
        let slot = self.slot(call_id)?;
        match slot
            .state
            .compare_exchange(RINGING, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                lock(&slot.outcome).answered_at = Some(Utc::now());
                debug!(call = %call_id, "call accepted");
                Ok(slot.snapshot())
            }
            Err(observed) => Err(CallError::InvalidTransition {
                from: decode(observed),
            }),
        }
    }

    /// `Ringing -> Declined`.  A caller-side decline is a cancellation,
    /// recorded through the actor tag rather than a separate state.
    pub fn decline_call(&self, call_id: CallId, actor: CallActor) -> Result<CallSnapshot> {
        self.finish_ring(call_id, DECLINED, Some(actor))
    }

    /// `Ringing -> Missed`, driven by the gateway's ring-timeout timer.
    pub fn timeout_call(&self, call_id: CallId) -> Result<CallSnapshot> {
        self.finish_ring(call_id, MISSED, None)
    }

    /// `Active -> Completed`.  Hanging up a ring is `InvalidTransition`;
    /// hanging up an already-terminal call is `CallAlreadyEnded`.
    pub fn end_call(&self, call_id: CallId, actor: CallActor) -> Result<CallSnapshot> {
        let slot = self.slot(call_id)?;
        match slot
            .state
            .compare_exchange(ACTIVE, COMPLETED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                {
                    let mut outcome = lock(&slot.outcome);
                    outcome.ended_by = Some(actor);
                    outcome.ended_at = Some(Utc::now());
                }
                self.release(&slot);
                let snapshot = slot.snapshot();
                info!(call = %call_id, duration = snapshot.duration_secs(), "call completed");
                Ok(snapshot)
            }
            Err(observed) => {
                let from = decode(observed);
                if from.is_terminal() {
                    Err(CallError::CallAlreadyEnded { outcome: from })
                } else {
                    Err(CallError::InvalidTransition { from })
                }
            }
        }
    }

    pub fn snapshot(&self, call_id: CallId) -> Result<CallSnapshot> {
        Ok(self.slot(call_id)?.snapshot())
    }

    /// Drop a terminal session from the registry once its outcome has been
    /// persisted.  Live sessions are kept.
    pub fn forget(&self, call_id: CallId) -> Result<()> {
        let slot = self.slot(call_id)?;
        if !decode(slot.state.load(Ordering::Acquire)).is_terminal() {
            return Err(CallError::InvalidTransition {
                from: decode(slot.state.load(Ordering::Acquire)),
            });
        }
        write_lock(&self.calls).remove(&call_id);
        Ok(())
    }

    // ------------------------------------------------------------------

    fn slot(&self, call_id: CallId) -> Result<Arc<CallSlot>> {
        read_lock(&self.calls)
            .get(&call_id)
            .cloned()
            .ok_or(CallError::NotFound)
    }

    fn finish_ring(
        &self,
        call_id: CallId,
        target: u8,
        actor: Option<CallActor>,
    ) -> Result<CallSnapshot> {
        let slot = self.slot(call_id)?;
        match slot
            .state
            .compare_exchange(RINGING, target, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                {
                    let mut outcome = lock(&slot.outcome);
                    outcome.ended_by = actor;
                    outcome.ended_at = Some(Utc::now());
                }
                self.release(&slot);
                let snapshot = slot.snapshot();
                info!(call = %call_id, outcome = %snapshot.state, "ring finished");
                Ok(snapshot)
            }
            // Another party won the ring, or the call left Ringing earlier.
            Err(observed) => Err(CallError::InvalidTransition {
                from: decode(observed),
            }),
        }
    }

    /// Free both parties for new calls.  Only the entries still pointing at
    /// this call are removed.
    fn release(&self, slot: &CallSlot) {
        let mut busy = lock(&self.busy);
        for user in [slot.caller_id, slot.receiver_id] {
            if busy.get(&user) == Some(&slot.id) {
                busy.remove(&user);
            }
        }
    }
}

// Poisoning only happens if a holder panicked mid-update; the data is a
// plain map/outcome struct, still coherent enough to continue.
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;

    #[test]
    fn busy_parties_cannot_place_calls() {
        let coord = CallCoordinator::new();
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());

        let call = coord.place_call(a, b, CallType::Audio).unwrap();
        assert_eq!(call.state, CallState::Ringing);

        assert_eq!(
            coord.place_call(a, c, CallType::Audio),
            Err(CallError::CallerBusy(a))
        );
        assert_eq!(
            coord.place_call(c, b, CallType::Video),
            Err(CallError::ReceiverBusy(b))
        );
        assert_eq!(
            coord.place_call(c, c, CallType::Audio),
            Err(CallError::ReceiverBusy(c))
        );
    }

    #[test]
    fn accepted_call_completes_with_duration() {
        let coord = CallCoordinator::new();
        let (a, b) = (UserId::new(), UserId::new());

        let call = coord.place_call(a, b, CallType::Video).unwrap();
        let active = coord.accept_call(call.id).unwrap();
        assert_eq!(active.state, CallState::Active);
        assert!(active.answered_at.is_some());

        let done = coord.end_call(call.id, CallActor::Receiver).unwrap();
        assert_eq!(done.state, CallState::Completed);
        assert_eq!(done.ended_by, Some(CallActor::Receiver));
        assert!(done.ended_at.is_some());

        // Both parties are free again.
        coord.place_call(a, b, CallType::Audio).unwrap();
    }

    #[test]
    fn declined_and_missed_rings_release_parties() {
        let coord = CallCoordinator::new();
        let (a, b) = (UserId::new(), UserId::new());

        let call = coord.place_call(a, b, CallType::Audio).unwrap();
        let declined = coord.decline_call(call.id, CallActor::Receiver).unwrap();
        assert_eq!(declined.state, CallState::Declined);
        assert_eq!(declined.ended_by, Some(CallActor::Receiver));
        assert_eq!(declined.duration_secs(), 0);

        let call = coord.place_call(a, b, CallType::Audio).unwrap();
        let missed = coord.timeout_call(call.id).unwrap();
        assert_eq!(missed.state, CallState::Missed);
        assert_eq!(missed.ended_by, None);
    }

    #[test]
    fn caller_cancellation_is_a_tagged_decline() {
        let coord = CallCoordinator::new();
        let call = coord
            .place_call(UserId::new(), UserId::new(), CallType::Audio)
            .unwrap();

        let canceled = coord.decline_call(call.id, CallActor::Caller).unwrap();
        assert_eq!(canceled.state, CallState::Declined);
        assert_eq!(canceled.ended_by, Some(CallActor::Caller));
    }

    #[test]
    fn hangup_errors_distinguish_ring_from_terminal() {
        let coord = CallCoordinator::new();
        let call = coord
            .place_call(UserId::new(), UserId::new(), CallType::Audio)
            .unwrap();

        // Hanging up a ring is not a valid transition.
        assert_eq!(
            coord.end_call(call.id, CallActor::Caller),
            Err(CallError::InvalidTransition {
                from: CallState::Ringing
            })
        );

        coord.accept_call(call.id).unwrap();
        coord.end_call(call.id, CallActor::Caller).unwrap();
        assert_eq!(
            coord.end_call(call.id, CallActor::Caller),
            Err(CallError::CallAlreadyEnded {
                outcome: CallState::Completed
            })
        );

        assert_eq!(
            coord.end_call(CallId::new(), CallActor::Caller),
            Err(CallError::NotFound)
        );
    }

    #[test]
    fn terminal_transitions_are_immutable() {
        let coord = CallCoordinator::new();
        let call = coord
            .place_call(UserId::new(), UserId::new(), CallType::Audio)
            .unwrap();
        coord.timeout_call(call.id).unwrap();

        assert_eq!(
            coord.accept_call(call.id),
            Err(CallError::InvalidTransition {
                from: CallState::Missed
            })
        );
        assert_eq!(
            coord.decline_call(call.id, CallActor::Receiver),
            Err(CallError::InvalidTransition {
                from: CallState::Missed
            })
        );
        assert_eq!(
            coord.timeout_call(call.id),
            Err(CallError::InvalidTransition {
                from: CallState::Missed
            })
        );
    }

    #[test]
    fn forget_only_evicts_terminal_sessions() {
        let coord = CallCoordinator::new();
        let call = coord
            .place_call(UserId::new(), UserId::new(), CallType::Audio)
            .unwrap();

        assert!(matches!(
            coord.forget(call.id),
            Err(CallError::InvalidTransition { .. })
        ));
        coord.timeout_call(call.id).unwrap();
        coord.forget(call.id).unwrap();
        assert_eq!(coord.snapshot(call.id), Err(CallError::NotFound));
    }

    #[test]
    fn racing_ring_resolutions_have_exactly_one_winner() {
        for _ in 0..50 {
            let coord = Arc::new(CallCoordinator::new());
            let call = coord
                .place_call(UserId::new(), UserId::new(), CallType::Audio)
                .unwrap();

            let barrier = Arc::new(Barrier::new(3));
            let ops: Vec<Box<dyn FnOnce() -> crate::error::Result<CallSnapshot> + Send>> = vec![
                {
                    let coord = Arc::clone(&coord);
                    Box::new(move || coord.accept_call(call.id))
                },
                {
                    let coord = Arc::clone(&coord);
                    Box::new(move || coord.decline_call(call.id, CallActor::Receiver))
                },
                {
                    let coord = Arc::clone(&coord);
                    Box::new(move || coord.timeout_call(call.id))
                },
            ];

            let handles: Vec<_> = ops
                .into_iter()
                .map(|op| {
                    let barrier = Arc::clone(&barrier);
                    std::thread::spawn(move || {
                        barrier.wait();
                        op()
                    })
                })
                .collect();

            let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
            let winners = results.iter().filter(|r| r.is_ok()).count();
            assert_eq!(winners, 1, "exactly one transition wins the race");
            for result in results {
                if let Err(err) = result {
                    assert!(matches!(err, CallError::InvalidTransition { .. }));
                }
            }
        }
    }
}
