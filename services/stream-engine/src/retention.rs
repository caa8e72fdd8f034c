//! Bounded inbound queue with priority retention
//!
//! The socket drivers enqueue faster than the dispatcher drains under
//! load, so the queue is bounded and prunes on overflow instead of
//! blocking the socket read loop. Pruning drops the oldest half of the
//! normal-priority backlog in place; strong buy/sell notifications are
//! only sacrificed when nothing else remains. Survivor order is never
//! reordered.

use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::events::{ChannelRef, PriorityClass, StreamMessage};

/// One buffered inbound frame.
#[derive(Debug, Clone)]
pub struct QueuedItem {
    pub payload: StreamMessage,
    pub priority: PriorityClass,
    /// Channel the frame arrived on.
    pub origin: ChannelRef,
    /// Monotonic arrival sequence, unique per queue.
    pub seq: u64,
    pub arrived_at_ms: i64,
}

/// What one enqueue displaced to make room.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    /// Items dropped in total.
    pub dropped: usize,
    /// How many of those were critical.
    pub critical: usize,
}

/// FIFO queue that prunes by priority when full.
#[derive(Debug)]
pub struct RetentionQueue {
    items: VecDeque<QueuedItem>,
    capacity: usize,
    next_seq: u64,
    items_pruned: u64,
    critical_pruned: u64,
}

impl RetentionQueue {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            items: VecDeque::with_capacity(config.capacity),
            capacity: config.capacity,
            next_seq: 0,
            items_pruned: 0,
            critical_pruned: 0,
        }
    }

    /// Buffer one frame, pruning first if the queue is at capacity.
    ///
    /// Returns what was dropped to make room so the caller can feed the
    /// engine-level counters.
    pub fn enqueue(
        &mut self,
        payload: StreamMessage,
        origin: ChannelRef,
        arrived_at_ms: i64,
    ) -> PruneOutcome {
        let mut outcome = PruneOutcome::default();
        if self.items.len() >= self.capacity {
            outcome = self.prune();
        }

        let priority = payload.priority();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.items.push_back(QueuedItem {
            payload,
            priority,
            origin,
            seq,
            arrived_at_ms,
        });
        outcome
    }

    /// Pop the oldest buffered frame.
    pub fn dequeue(&mut self) -> Option<QueuedItem> {
        self.items.pop_front()
    }

    /// Drop every buffered frame from one channel. Called on teardown so
    /// a dead channel cannot deliver after termination.
    pub fn clear_origin(&mut self, origin: &ChannelRef) -> usize {
        let before = self.items.len();
        self.items.retain(|item| &item.origin != origin);
        let removed = before - self.items.len();
        if removed > 0 {
            debug!(channel = %origin, removed, "Cleared buffered items for channel");
        }
        removed
    }

    /// Drop items to make room, preferring normal-priority frames.
    ///
    /// With normal frames present, the oldest `ceil(n/2)` of them are
    /// removed in place; critical frames and the surviving normals keep
    /// their relative order. A queue of nothing but critical frames
    /// gives up its single oldest item.
    fn prune(&mut self) -> PruneOutcome {
        let normal_count = self
            .items
            .iter()
            .filter(|item| item.priority == PriorityClass::Normal)
            .count();

        if normal_count == 0 {
            if self.items.pop_front().is_some() {
                self.items_pruned += 1;
                self.critical_pruned += 1;
                warn!("Queue full of critical items, dropped oldest");
                return PruneOutcome {
                    dropped: 1,
                    critical: 1,
                };
            }
            return PruneOutcome::default();
        }

        let to_drop = normal_count.div_ceil(2);
        let mut remaining = to_drop;
        self.items.retain(|item| {
            if remaining > 0 && item.priority == PriorityClass::Normal {
                remaining -= 1;
                false
            } else {
                true
            }
        });
        self.items_pruned += to_drop as u64;
        debug!(
            dropped = to_drop,
            retained = self.items.len(),
            "Pruned queue under overload"
        );
        PruneOutcome {
            dropped: to_drop,
            critical: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total items ever pruned.
    pub fn items_pruned(&self) -> u64 {
        self.items_pruned
    }

    /// Pruned items that were critical.
    pub fn critical_pruned(&self) -> u64 {
        self.critical_pruned
    }
}
