//! Reusable abortable barriers for superstep coordination.

use std::num::NonZero;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Condvar, Mutex};

/// How many times [`MixedBarrier::wait`] polls the generation counter
/// before falling back to the condition-variable path.
///
/// Tightly synchronized kernels release well within this bound; anything
/// slower is better off parked than burning a core.
const SPIN_LIMIT: u32 = 1_000;

/// The result of waiting on a barrier.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// Every participant arrived and the barrier released them together.
    Released,

    /// The abort flag was observed; the waiter was released early so the
    /// abort can propagate.
    Aborted,
}

/// Arrival count and generation, guarded by the barrier mutex.
///
/// The generation flip is serialized under the mutex so that no thread can
/// enter generation G+1 until every waiter has logically left generation G.
#[derive(Debug)]
struct BarrierState {
    arrived: usize,
    generation: u64,
}

/// A reusable N-way barrier built on a mutex and a condition variable.
///
/// [`wait`][Self::wait] returns [`WaitOutcome::Released`] only once all
/// participants have arrived. Waiters compare the generation counter on
/// every wake, so a spurious wake-up never releases a participant early.
///
/// If the abort flag becomes true while participants are blocked, a call to
/// [`wake_all`][Self::wake_all] releases them all with
/// [`WaitOutcome::Aborted`]. After an abort the arrival count is
/// indeterminate; create a fresh barrier for the next run.
#[derive(Debug)]
pub struct CondvarBarrier {
    participants: usize,
    state: Mutex<BarrierState>,
    condvar: Condvar,
}

impl CondvarBarrier {
    #[must_use]
    pub fn new(participants: NonZero<usize>) -> Self {
        Self {
            participants: participants.get(),
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until all participants have arrived, or until `abort` is
    /// observed true.
    #[must_use]
    pub fn wait(&self, abort: &AtomicBool) -> WaitOutcome {
        // Acquire pairs with the Release store in the aborting thread.
        if abort.load(Ordering::Acquire) {
            return WaitOutcome::Aborted;
        }

        let mut state = self.state.lock();
        state.arrived += 1;

        if state.arrived == self.participants {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            drop(state);
            self.condvar.notify_all();
            return WaitOutcome::Released;
        }

        let generation = state.generation;
        loop {
            // The abort check happens under the mutex: an aborter stores the
            // flag and then takes this mutex in `wake_all`, so either we see
            // the flag here or the notification reaches us once we park.
            if abort.load(Ordering::Acquire) {
                return WaitOutcome::Aborted;
            }

            self.condvar.wait(&mut state);

            if state.generation != generation {
                return WaitOutcome::Released;
            }
        }
    }

    /// Wakes every parked waiter so it can re-check the abort flag.
    #[cfg_attr(test, mutants::skip)] // Removing the wake deadlocks aborted runs.
    pub fn wake_all(&self) {
        // Taking the mutex serializes with waiters between their abort check
        // and parking; notifying without it could be missed.
        drop(self.state.lock());
        self.condvar.notify_all();
    }
}

/// A spin-then-block barrier.
///
/// Arrival is registered under the same mutex scheme as [`CondvarBarrier`],
/// but waiters first poll an atomic mirror of the generation counter for a
/// bounded number of iterations before parking. This trims release latency
/// for tightly synchronized supersteps while still yielding the core when a
/// peer is slow.
#[derive(Debug)]
pub struct MixedBarrier {
    participants: usize,
    /// Mirror of `BarrierState::generation` for the lock-free spin phase.
    generation: AtomicU64,
    state: Mutex<BarrierState>,
    condvar: Condvar,
}

impl MixedBarrier {
    #[must_use]
    pub fn new(participants: NonZero<usize>) -> Self {
        Self {
            participants: participants.get(),
            generation: AtomicU64::new(0),
            state: Mutex::new(BarrierState {
                arrived: 0,
                generation: 0,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until all participants have arrived, or until `abort` is
    /// observed true.
    #[must_use]
    pub fn wait(&self, abort: &AtomicBool) -> WaitOutcome {
        if abort.load(Ordering::Acquire) {
            return WaitOutcome::Aborted;
        }

        let mut state = self.state.lock();
        state.arrived += 1;

        if state.arrived == self.participants {
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            // Release pairs with the Acquire poll in spinning waiters.
            self.generation.store(state.generation, Ordering::Release);
            drop(state);
            self.condvar.notify_all();
            return WaitOutcome::Released;
        }

        let generation = state.generation;
        drop(state);

        for _ in 0..SPIN_LIMIT {
            if self.generation.load(Ordering::Acquire) != generation {
                return WaitOutcome::Released;
            }
            if abort.load(Ordering::Acquire) {
                return WaitOutcome::Aborted;
            }
            std::hint::spin_loop();
        }

        let mut state = self.state.lock();
        loop {
            if state.generation != generation {
                return WaitOutcome::Released;
            }
            if abort.load(Ordering::Acquire) {
                return WaitOutcome::Aborted;
            }

            self.condvar.wait(&mut state);
        }
    }

    /// Wakes every parked waiter so it can re-check the abort flag.
    /// Spinning waiters observe the flag on their next poll.
    #[cfg_attr(test, mutants::skip)] // Removing the wake deadlocks aborted runs.
    pub fn wake_all(&self) {
        drop(self.state.lock());
        self.condvar.notify_all();
    }
}
