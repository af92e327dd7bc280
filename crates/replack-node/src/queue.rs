use std::sync::{Mutex, MutexGuard, PoisonError};

use replack_core::CorrelationToken;

use crate::error::QueueError;
use crate::wait_node::{NodeResult, WaitNode};

/// Head node removed by [`SequencedQueue::pop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popped {
    /// The head had already been resolved.
    Resolved(CorrelationToken, WaitNode),
    /// The head was pending past its deadline and was resolved as timed out.
    Expired(CorrelationToken, WaitNode),
}

impl Popped {
    pub fn node(&self) -> &WaitNode {
        match self {
            Popped::Resolved(_, node) | Popped::Expired(_, node) => node,
        }
    }

    pub fn into_node(self) -> WaitNode {
        match self {
            Popped::Resolved(_, node) | Popped::Expired(_, node) => node,
        }
    }
}

#[derive(Debug)]
enum Slot {
    Vacant,
    Occupied { generation: u64, node: WaitNode },
}

/// Allocation bookkeeping: `head..tail` are the live allocations.
#[derive(Debug, Default)]
struct Cursor {
    head: u64,
    tail: u64,
}

/// Fixed-capacity ring of wait nodes, pushed and popped in allocation order
/// and resolved out of order through generational tokens.
///
/// Push and pop are serialized on the cursor lock; `done` only takes the
/// lock of the slot it touches, so completions never wait on the cursor.
#[derive(Debug)]
pub struct SequencedQueue {
    cursor: Mutex<Cursor>,
    slots: Box<[Mutex<Slot>]>,
}

impl SequencedQueue {
    pub fn with_capacity(capacity: usize) -> Result<Self, QueueError> {
        if capacity == 0 {
            return Err(QueueError::InvalidArgument("queue capacity must be > 0"));
        }
        let slots = (0..capacity).map(|_| Mutex::new(Slot::Vacant)).collect();
        Ok(Self {
            cursor: Mutex::new(Cursor::default()),
            slots,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of pushed but not yet popped nodes.
    pub fn len(&self) -> usize {
        let cursor = self.lock_cursor();
        (cursor.tail - cursor.head) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores `node` in the next slot and returns its token.
    ///
    /// Fails with `CapacityExceeded` while the slot's previous occupant is
    /// still unpopped.
    pub fn push(&self, node: WaitNode) -> Result<CorrelationToken, QueueError> {
        let mut cursor = self.lock_cursor();
        if cursor.tail - cursor.head >= self.capacity() as u64 {
            return Err(QueueError::CapacityExceeded);
        }
        let token = self.token_for(cursor.tail);
        *self.lock_slot(token.slot) = Slot::Occupied {
            generation: token.generation,
            node,
        };
        cursor.tail += 1;
        Ok(token)
    }

    /// Removes the head node if it is resolved or has expired at `now_us`.
    ///
    /// Never looks past the head: a pending, unexpired head yields `NotReady`.
    pub fn pop(&self, now_us: u64) -> Result<Popped, QueueError> {
        let mut cursor = self.lock_cursor();
        if cursor.head == cursor.tail {
            return Err(QueueError::Empty);
        }
        let token = self.token_for(cursor.head);
        let mut slot = self.lock_slot(token.slot);
        let expired = match &mut *slot {
            Slot::Occupied { node, .. } if !node.result.is_pending() => false,
            Slot::Occupied { node, .. } if node.is_expired(now_us) => {
                node.resolve(NodeResult::TimedOut, now_us);
                true
            }
            Slot::Occupied { .. } => return Err(QueueError::NotReady),
            // head < tail always points at an occupied slot
            Slot::Vacant => return Err(QueueError::Empty),
        };
        let Slot::Occupied { node, .. } = std::mem::replace(&mut *slot, Slot::Vacant) else {
            return Err(QueueError::Empty);
        };
        cursor.head += 1;
        Ok(if expired {
            Popped::Expired(token, node)
        } else {
            Popped::Resolved(token, node)
        })
    }

    /// Resolves the node behind `token` and returns a snapshot of it.
    ///
    /// `AlreadyDone` if the node is resolved already, or if the slot no
    /// longer holds the token's generation (popped or recycled).
    pub fn done(
        &self,
        token: CorrelationToken,
        result: NodeResult,
        now_us: u64,
    ) -> Result<WaitNode, QueueError> {
        if result.is_pending() {
            return Err(QueueError::InvalidArgument("cannot resolve a node as pending"));
        }
        if token.slot >= self.capacity() {
            return Err(QueueError::InvalidArgument("token slot out of range"));
        }
        let mut slot = self.lock_slot(token.slot);
        match &mut *slot {
            Slot::Occupied { generation, node } if *generation == token.generation => {
                if node.resolve(result, now_us) {
                    Ok(node.clone())
                } else {
                    Err(QueueError::AlreadyDone)
                }
            }
            _ => Err(QueueError::AlreadyDone),
        }
    }

    fn token_for(&self, alloc: u64) -> CorrelationToken {
        let capacity = self.capacity() as u64;
        CorrelationToken {
            slot: (alloc % capacity) as usize,
            generation: alloc / capacity,
        }
    }

    fn lock_cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_slot(&self, slot: usize) -> MutexGuard<'_, Slot> {
        self.slots[slot].lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{Popped, SequencedQueue};
    use crate::error::QueueError;
    use crate::wait_node::{NodeResult, Target, WaitNode};
    use replack_core::{CorrelationToken, SeqRange};
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn node(seq: u64) -> WaitNode {
        WaitNode::new(SeqRange::single(seq), Target::Sentinel, 0, 1_000)
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = SequencedQueue::with_capacity(0).expect_err("capacity 0 should fail");
        assert_eq!(err, QueueError::InvalidArgument("queue capacity must be > 0"));
    }

    #[test]
    fn pop_on_empty_queue_fails() {
        let queue = SequencedQueue::with_capacity(2).expect("queue");
        assert_eq!(queue.pop(0), Err(QueueError::Empty));
        assert!(queue.is_empty());
    }

    #[test]
    fn pending_head_blocks_resolved_successor() {
        let queue = SequencedQueue::with_capacity(4).expect("queue");
        let a = queue.push(node(1)).expect("push a");
        let b = queue.push(node(2)).expect("push b");

        queue.done(b, NodeResult::Success, 10).expect("resolve b");
        assert_eq!(queue.pop(10), Err(QueueError::NotReady));

        queue.done(a, NodeResult::Remote(-5), 20).expect("resolve a");
        let first = queue.pop(20).expect("a is ready");
        assert_eq!(first.node().range.start(), 1);
        assert_eq!(first.node().result, NodeResult::Remote(-5));
        let second = queue.pop(20).expect("b is ready");
        assert!(matches!(second, Popped::Resolved(token, _) if token == b));
        assert_eq!(queue.pop(20), Err(QueueError::Empty));
    }

    #[test]
    fn expired_head_is_resolved_as_timeout_on_pop() {
        let queue = SequencedQueue::with_capacity(2).expect("queue");
        let token = queue.push(node(7)).expect("push");
        assert_eq!(queue.pop(1_000), Err(QueueError::NotReady));

        let popped = queue.pop(1_001).expect("deadline passed");
        let Popped::Expired(popped_token, expired) = popped else {
            panic!("head should expire");
        };
        assert_eq!(popped_token, token);
        assert_eq!(expired.result, NodeResult::TimedOut);
        assert_eq!(expired.receive_time_us, 1_001);

        // late network completion for the popped slot
        assert_eq!(
            queue.done(token, NodeResult::Success, 1_002),
            Err(QueueError::AlreadyDone)
        );
    }

    #[test]
    fn double_done_reports_already_done() {
        let queue = SequencedQueue::with_capacity(2).expect("queue");
        let token = queue.push(node(1)).expect("push");
        let snapshot = queue
            .done(token, NodeResult::Success, 5)
            .expect("first completion wins");
        assert_eq!(snapshot.result, NodeResult::Success);
        assert_eq!(
            queue.done(token, NodeResult::TimedOut, 6),
            Err(QueueError::AlreadyDone)
        );
        let popped = queue.pop(6).expect("resolved head");
        assert_eq!(popped.into_node().result, NodeResult::Success);
    }

    #[test]
    fn full_ring_rejects_push_until_head_pops() {
        let queue = SequencedQueue::with_capacity(2).expect("queue");
        let a = queue.push(node(1)).expect("push a");
        queue.push(node(2)).expect("push b");
        assert_eq!(queue.push(node(3)), Err(QueueError::CapacityExceeded));

        queue.done(a, NodeResult::Success, 1).expect("resolve a");
        queue.pop(1).expect("pop a");

        let c = queue.push(node(3)).expect("one slot freed");
        assert_eq!(queue.push(node(4)), Err(QueueError::CapacityExceeded));
        assert_eq!(c.slot, a.slot);
        assert_eq!(c.generation, a.generation + 1);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn stale_generation_does_not_touch_recycled_slot() {
        let queue = SequencedQueue::with_capacity(1).expect("queue");
        let old = queue.push(node(1)).expect("push");
        queue.done(old, NodeResult::Success, 1).expect("resolve");
        queue.pop(1).expect("pop");

        let fresh = queue.push(node(2)).expect("push into recycled slot");
        assert_eq!(
            queue.done(old, NodeResult::Remote(-1), 2),
            Err(QueueError::AlreadyDone)
        );
        let snapshot = queue
            .done(fresh, NodeResult::Success, 3)
            .expect("fresh token resolves");
        assert_eq!(snapshot.range.start(), 2);
    }

    #[test]
    fn done_validates_token_and_result() {
        let queue = SequencedQueue::with_capacity(2).expect("queue");
        let token = queue.push(node(1)).expect("push");
        assert!(matches!(
            queue.done(token, NodeResult::Pending, 0),
            Err(QueueError::InvalidArgument(_))
        ));
        let bogus = CorrelationToken {
            slot: 9,
            generation: 0,
        };
        assert!(matches!(
            queue.done(bogus, NodeResult::Success, 0),
            Err(QueueError::InvalidArgument(_))
        ));
    }

    #[test]
    fn concurrent_pushes_never_share_a_token() {
        let queue = Arc::new(SequencedQueue::with_capacity(256).expect("queue"));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    (0..32)
                        .map(|i| queue.push(node(t * 32 + i)).expect("room for all"))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for token in handle.join().expect("pusher thread") {
                assert!(seen.insert(token), "duplicate token {token}");
            }
        }
        assert_eq!(seen.len(), 256);
        assert_eq!(queue.len(), 256);
    }

    #[test]
    fn racing_done_calls_have_one_winner() {
        let queue = Arc::new(SequencedQueue::with_capacity(4).expect("queue"));
        let token = queue.push(node(1)).expect("push");
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || queue.done(token, NodeResult::Remote(i), 1).is_ok())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().expect("done thread"))
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
