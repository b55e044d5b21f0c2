//! Remote ICE candidates received before the remote description

use std::collections::VecDeque;

use crate::signaling::IceCandidate;

/// FIFO of early remote candidates
///
/// Drained exactly once, when the remote description has been applied.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: VecDeque<IceCandidate>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, candidate: IceCandidate) {
        self.pending.push_back(candidate);
    }

    /// Take every buffered candidate in arrival order
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_keeps_arrival_order_and_empties() {
        let mut buffer = CandidateBuffer::new();
        for c in ["c1", "c2", "c3"] {
            buffer.push(IceCandidate::new(c));
        }
        assert_eq!(buffer.len(), 3);

        let drained: Vec<_> = buffer.drain().into_iter().map(|c| c.candidate).collect();
        assert_eq!(drained, vec!["c1", "c2", "c3"]);
        assert!(buffer.is_empty());
        assert!(buffer.drain().is_empty());
    }
}
