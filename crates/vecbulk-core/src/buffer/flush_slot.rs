//! Single-flight gate for chunk commits.
//!
//! Each hand-off acquires the slot and gets a ticket. The slot stays taken
//! until the commit worker releases that ticket, so at most one sealed chunk
//! is in flight per writer. Waiters block on a condition variable.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct SlotState {
    in_flight: bool,
    issued: u64,
    finished: u64,
}

/// Admits one in-flight commit at a time.
#[derive(Debug, Default)]
pub struct FlushSlot {
    state: Mutex<SlotState>,
    changed: Condvar,
}

impl FlushSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until no commit is in flight, then take the slot.
    ///
    /// Returns the ticket to release once the commit completes.
    pub fn acquire(&self) -> u64 {
        let mut state = self.state.lock();
        while state.in_flight {
            self.changed.wait(&mut state);
        }
        state.in_flight = true;
        state.issued += 1;
        state.issued
    }

    /// Mark the commit for `ticket` finished and free the slot.
    pub fn release(&self, ticket: u64) {
        let mut state = self.state.lock();
        state.in_flight = false;
        state.finished = state.finished.max(ticket);
        self.changed.notify_all();
    }

    /// Block until the commit for `ticket` has finished.
    pub fn wait_for(&self, ticket: u64) {
        let mut state = self.state.lock();
        while state.finished < ticket {
            self.changed.wait(&mut state);
        }
    }

    /// Block until nothing is in flight.
    pub fn wait_idle(&self) {
        let mut state = self.state.lock();
        while state.in_flight {
            self.changed.wait(&mut state);
        }
    }

    pub fn in_flight(&self) -> bool {
        self.state.lock().in_flight
    }

    /// Number of tickets handed out so far.
    pub fn issued(&self) -> u64 {
        self.state.lock().issued
    }
}
