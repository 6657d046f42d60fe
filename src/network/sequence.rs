//! Monotonic Sequence Filter
//!
//! Receivers run every incoming input through one of these so reordered or
//! duplicated datagrams are dropped before they reach the simulation.

/// Accepts only strictly increasing sequence numbers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceFilter {
    last: Option<u32>,
}

impl SequenceFilter {
    /// Filter that has accepted nothing yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `seq` if it is newer than everything accepted so far.
    pub fn accept(&mut self, seq: u32) -> bool {
        match self.last {
            Some(last) if seq <= last => false,
            _ => {
                self.last = Some(seq);
                true
            }
        }
    }

    /// Highest accepted sequence number.
    pub fn last_accepted(&self) -> Option<u32> {
        self.last
    }

    /// Forget history (reconnect).
    pub fn reset(&mut self) {
        self.last = None;
    }
}
