use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;

use crate::UiEvent;

/// Bounded lossy event queue between the network worker (producer) and the
/// UI thread (consumer).
///
/// Capacity is fixed at construction and rounded up to a power of two; no
/// allocation happens after that. `try_push` never blocks: when the UI is
/// not draining fast enough the event is dropped and counted.
#[derive(Debug)]
pub struct EventQueue {
    queue: ArrayQueue<UiEvent>,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(2).next_power_of_two()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Attempts to publish an event without blocking.
    ///
    /// Returns `false` when the queue is full; the event is dropped and the
    /// drop counter advances.
    pub fn try_push(&self, event: UiEvent) -> bool {
        match self.queue.push(event) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Pops events in FIFO order until the queue is empty.
    pub fn drain(&self, mut visitor: impl FnMut(UiEvent)) {
        while let Some(event) = self.queue.pop() {
            visitor(event);
        }
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

    /// Number of events lost to a full queue since construction.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
