//! Prediction Buffers
//!
//! Parallel rings of sent inputs and the states they produced, keyed by
//! `seq`. Both rings always hold the same sequence numbers.

use std::collections::VecDeque;

use crate::movement::state::ActorMotionState;
use crate::network::protocol::InputCommand;

/// Default ring length.
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

/// Unacknowledged inputs and their predicted results.
#[derive(Debug, Clone)]
pub struct PredictionBuffer {
    inputs: VecDeque<(u32, InputCommand)>,
    states: VecDeque<(u32, ActorMotionState)>,
    capacity: usize,
}

impl Default for PredictionBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl PredictionBuffer {
    /// Empty buffer holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inputs: VecDeque::with_capacity(capacity),
            states: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a sent input and its result. Evicts the oldest pair when full.
    pub fn push(&mut self, seq: u32, input: InputCommand, state: ActorMotionState) {
        if self.inputs.len() == self.capacity {
            self.inputs.pop_front();
            self.states.pop_front();
        }
        self.inputs.push_back((seq, input));
        self.states.push_back((seq, state));
    }

    fn index_of(&self, seq: u32) -> Option<usize> {
        self.states.binary_search_by_key(&seq, |(s, _)| *s).ok()
    }

    /// Predicted state recorded for `seq`.
    pub fn state_at(&self, seq: u32) -> Option<&ActorMotionState> {
        self.index_of(seq).map(|i| &self.states[i].1)
    }

    /// Overwrite the state recorded for `seq`. Returns false if absent.
    pub fn replace_state(&mut self, seq: u32, state: ActorMotionState) -> bool {
        match self.index_of(seq) {
            Some(i) => {
                self.states[i].1 = state;
                true
            }
            None => false,
        }
    }

    /// Drop every entry with `seq <= ack`.
    pub fn discard_through(&mut self, ack: u32) {
        while self.inputs.front().is_some_and(|(s, _)| *s <= ack) {
            self.inputs.pop_front();
            self.states.pop_front();
        }
    }

    /// Buffered inputs, oldest first.
    pub fn inputs(&self) -> impl Iterator<Item = &(u32, InputCommand)> + '_ {
        self.inputs.iter()
    }

    /// Oldest buffered seq.
    pub fn oldest_seq(&self) -> Option<u32> {
        self.inputs.front().map(|(s, _)| *s)
    }

    /// Number of buffered pairs.
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    /// True if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.inputs.clear();
        self.states.clear();
    }
}
