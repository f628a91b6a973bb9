//! Zombie queue: operations held while a remote connection is down

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::ArrayQueue;

use crate::queue::CacheEvent;

/// Bounded ring of pending remote operations. When full, the oldest entry is
/// dropped so callers never block.
pub struct ZombieQueue {
    queue: ArrayQueue<CacheEvent>,
    dropped: AtomicU64,
}

impl ZombieQueue {
    /// Create a queue; a capacity of zero is raised to one
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn push(&self, event: CacheEvent) {
        if self.queue.force_push(event).is_some() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn pop(&self) -> Option<CacheEvent> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Entries lost to overflow
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remove(key: &str) -> CacheEvent {
        CacheEvent::Remove(key.to_string())
    }

    fn key(event: CacheEvent) -> String {
        match event {
            CacheEvent::Remove(key) => key,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_fifo() {
        let zombies = ZombieQueue::new(4);
        zombies.push(remove("a"));
        zombies.push(remove("b"));
        assert_eq!(key(zombies.pop().unwrap()), "a");
        assert_eq!(key(zombies.pop().unwrap()), "b");
        assert!(zombies.pop().is_none());
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let zombies = ZombieQueue::new(2);
        for k in ["a", "b", "c", "d"] {
            zombies.push(remove(k));
        }
        assert_eq!(zombies.len(), 2);
        assert_eq!(zombies.dropped(), 2);
        assert_eq!(key(zombies.pop().unwrap()), "c");
        assert_eq!(key(zombies.pop().unwrap()), "d");
    }

    #[test]
    fn test_zero_capacity_holds_latest() {
        let zombies = ZombieQueue::new(0);
        assert_eq!(zombies.capacity(), 1);
        zombies.push(remove("a"));
        zombies.push(remove("b"));
        assert_eq!(key(zombies.pop().unwrap()), "b");

        zombies.push(remove("c"));
        zombies.clear();
        assert!(zombies.is_empty());
    }
}
