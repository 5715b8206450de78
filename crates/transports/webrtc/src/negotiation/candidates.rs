//! Bounded holding area for ICE candidates that cannot be used yet

use crate::signaling::IceCandidate;
use std::collections::VecDeque;

/// FIFO candidate buffer that evicts the oldest entry when full
#[derive(Debug)]
pub struct CandidateBuffer {
    capacity: usize,
    items: VecDeque<IceCandidate>,
}

impl CandidateBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// Store a candidate; returns the evicted one when the buffer was full
    pub fn push(&mut self, candidate: IceCandidate) -> Option<IceCandidate> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(candidate);
        evicted
    }

    /// Take every buffered candidate in arrival order
    pub fn drain(&mut self) -> Vec<IceCandidate> {
        self.items.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: u32) -> IceCandidate {
        IceCandidate::new(format!("candidate:{} 1 udp 1 10.0.0.{} 5000 typ host", n, n))
    }

    #[test]
    fn test_drain_preserves_order() {
        let mut buffer = CandidateBuffer::new(4);
        buffer.push(candidate(1));
        buffer.push(candidate(2));

        let drained = buffer.drain();
        assert_eq!(drained, vec![candidate(1), candidate(2)]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_full_buffer_evicts_oldest() {
        let mut buffer = CandidateBuffer::new(2);
        assert!(buffer.push(candidate(1)).is_none());
        assert!(buffer.push(candidate(2)).is_none());
        assert_eq!(buffer.push(candidate(3)), Some(candidate(1)));

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.drain(), vec![candidate(2), candidate(3)]);
    }
}
