//! Baud-transition handshake between the two directions of one cable

use parking_lot::Mutex;

/// What a reader arriving at a baud transition must do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// Configure both ports. `release_peer` is set when the peer is blocked
    /// waiting and must be woken afterwards.
    Initialize { release_peer: bool },
    /// Block until the peer has configured both ports
    Wait,
}

#[derive(Debug, Default)]
struct CableState {
    waiting: Option<usize>,
    sweeping: [bool; 2],
}

/// Shared state of the two port pairs wired across the same two ports
///
/// The check of the peer's waiting flag and the registration of our own
/// happen under one lock, so exactly one side configures the ports at every
/// transition and the two sides can never both block.
#[derive(Debug)]
pub struct Cable {
    ends: [usize; 2],
    state: Mutex<CableState>,
}

impl Cable {
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            ends: [a, b],
            state: Mutex::new(CableState::default()),
        }
    }

    pub fn ends(&self) -> [usize; 2] {
        self.ends
    }

    fn slot(&self, id: usize) -> usize {
        if self.ends[0] == id { 0 } else { 1 }
    }

    pub fn peer_of(&self, id: usize) -> usize {
        self.ends[1 - self.slot(id)]
    }

    /// Called for both ends before a monitor cycle releases the readers
    pub fn begin_sweep(&self, id: usize) {
        let mut state = self.state.lock();
        let slot = self.slot(id);
        state.sweeping[slot] = true;
    }

    /// Called by a reader when its sweep is over, for whatever reason
    pub fn end_sweep(&self, id: usize) {
        let mut state = self.state.lock();
        let slot = self.slot(id);
        state.sweeping[slot] = false;
        if state.waiting == Some(id) {
            state.waiting = None;
        }
    }

    /// Decide the role of reader `id` at a baud transition
    pub fn arrive(&self, id: usize) -> Arrival {
        let mut state = self.state.lock();
        let peer = self.peer_of(id);
        if state.waiting == Some(peer) {
            state.waiting = None;
            Arrival::Initialize { release_peer: true }
        } else if !state.sweeping[self.slot(peer)] {
            Arrival::Initialize {
                release_peer: false,
            }
        } else {
            state.waiting = Some(id);
            Arrival::Wait
        }
    }

    /// For a waiting reader: true if the peer finished its sweep without
    /// coming back to release us. Our waiting mark is withdrawn and the
    /// caller configures the ports itself.
    pub fn abandoned(&self, id: usize) -> bool {
        let mut state = self.state.lock();
        let peer = self.peer_of(id);
        if state.waiting == Some(id) && !state.sweeping[self.slot(peer)] {
            state.waiting = None;
            true
        } else {
            false
        }
    }
}
