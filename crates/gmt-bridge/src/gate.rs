//! Admission control for native sessions.
//!
//! A [`SessionGate`] hands out a bounded number of permits. With a library
//! that cannot run independent sessions the bound is one, and every engine
//! over that library takes its permits from the same gate, which serializes
//! all session use in the process.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::error::{BridgeError, BridgeResult, SessionFailure};

/// Single-slot gates of serialized libraries, keyed by library identity.
static SERIALIZED_GATES: Lazy<Mutex<HashMap<usize, Weak<SessionGate>>>> = Lazy::new(Default::default);

#[derive(Debug, Default)]
struct GateState {
    open: usize,
    holders: HashMap<ThreadId, usize>,
}

/// Counting gate over session slots.
#[derive(Debug)]
pub struct SessionGate {
    capacity: usize,
    state: Mutex<GateState>,
    released: Condvar,
}

impl SessionGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(GateState::default()),
            released: Condvar::new(),
        }
    }

    /// The single-slot gate shared by every engine over one library.
    ///
    /// `library` identifies the native code, not the loader instance, so
    /// two handles onto the same library meet at the same gate.
    pub fn serialized(library: usize) -> Arc<Self> {
        let mut gates = SERIALIZED_GATES.lock();
        gates.retain(|_, gate| gate.strong_count() > 0);
        if let Some(gate) = gates.get(&library).and_then(Weak::upgrade) {
            return gate;
        }
        let gate = Arc::new(Self::new(1));
        gates.insert(library, Arc::downgrade(&gate));
        gate
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of permits currently held.
    pub fn open(&self) -> usize {
        self.state.lock().open
    }

    /// Waits for a free slot.
    ///
    /// Fails instead of waiting when every slot is held by the calling
    /// thread, since nothing could ever release one.
    pub fn acquire(self: &Arc<Self>, timeout: Option<Duration>) -> BridgeResult<GatePermit> {
        let me = thread::current().id();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();

        while state.open >= self.capacity {
            let mine = state.holders.get(&me).copied().unwrap_or(0);
            if mine >= state.open {
                return Err(BridgeError::SessionCreation {
                    reason: SessionFailure::WouldDeadlock { open: state.open },
                    native_message: String::new(),
                });
            }
            debug!(open = state.open, capacity = self.capacity, "Waiting for a session slot");
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut state, deadline).timed_out() && state.open >= self.capacity {
                        let waited_ms = timeout.map_or(0, |t| t.as_millis() as u64);
                        return Err(BridgeError::SessionCreation {
                            reason: SessionFailure::GateTimeout { waited_ms },
                            native_message: String::new(),
                        });
                    }
                }
                None => self.released.wait(&mut state),
            }
        }

        state.open += 1;
        *state.holders.entry(me).or_insert(0) += 1;
        Ok(GatePermit {
            gate: Arc::clone(self),
            holder: me,
        })
    }

    fn release(&self, holder: ThreadId) {
        let mut state = self.state.lock();
        state.open = state.open.saturating_sub(1);
        if let Some(count) = state.holders.get_mut(&holder) {
            *count -= 1;
            if *count == 0 {
                state.holders.remove(&holder);
            }
        }
        drop(state);
        self.released.notify_one();
    }
}

/// One held session slot; released on drop.
#[derive(Debug)]
pub struct GatePermit {
    gate: Arc<SessionGate>,
    holder: ThreadId,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release(self.holder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_permits_are_counted() {
        let gate = Arc::new(SessionGate::new(2));
        let first = gate.acquire(None).unwrap();
        let second = gate.acquire(None).unwrap();
        assert_eq!(gate.open(), 2);
        drop(first);
        assert_eq!(gate.open(), 1);
        drop(second);
        assert_eq!(gate.open(), 0);
    }

    #[test]
    fn test_same_thread_refused_instead_of_deadlock() {
        let gate = Arc::new(SessionGate::new(1));
        let _held = gate.acquire(None).unwrap();
        let err = gate.acquire(None).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::SessionCreation {
                reason: SessionFailure::WouldDeadlock { open: 1 },
                ..
            }
        ));
    }

    #[test]
    fn test_other_thread_waits_for_release() {
        let gate = Arc::new(SessionGate::new(1));
        let held = gate.acquire(None).unwrap();
        let (tx, rx) = mpsc::channel();

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let permit = gate.acquire(None).unwrap();
                tx.send(()).unwrap();
                drop(permit);
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        drop(held);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
        assert_eq!(gate.open(), 0);
    }

    #[test]
    fn test_serialized_gate_is_shared_per_library() {
        let first = SessionGate::serialized(0x5eed_0001);
        let second = SessionGate::serialized(0x5eed_0001);
        let other = SessionGate::serialized(0x5eed_0002);
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(first.capacity(), 1);

        let _held = first.acquire(None).unwrap();
        assert_eq!(second.open(), 1);
        assert!(second.acquire(None).is_err());
        assert_eq!(other.open(), 0);
    }

    #[test]
    fn test_timeout() {
        let gate = Arc::new(SessionGate::new(1));
        let (tx, rx) = mpsc::channel();
        let holder = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let _permit = gate.acquire(None).unwrap();
                rx.recv().unwrap();
            })
        };
        while gate.open() == 0 {
            thread::yield_now();
        }

        let err = gate.acquire(Some(Duration::from_millis(20))).unwrap_err();
        assert!(matches!(
            err,
            BridgeError::SessionCreation {
                reason: SessionFailure::GateTimeout { waited_ms: 20 },
                ..
            }
        ));

        tx.send(()).unwrap();
        holder.join().unwrap();
    }
}
