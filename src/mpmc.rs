//! Lock-free multi-producer / multi-consumer queue over a fixed node pool.
//!
//! The shape is the classic two-pointer linked queue: enqueue links at the
//! tail, dequeue unlinks at the head, and a sentinel node keeps the head
//! non-null at all times. All nodes come from a pool allocated at
//! construction and recycled through a lock-free LIFO free list, so the
//! queue never allocates after startup and `try_enqueue` reports pool
//! exhaustion instead of growing.
//!
//! # ABA protection
//!
//! Recycling nodes makes raw-pointer CAS unsound: a cursor can swing from
//! node A to B and back to A between a read and the compare-exchange, and
//! the stale CAS would succeed against a node that now means something
//! else. Every node reference here is therefore a packed
//! `(index: u32, tag: u32)` word ([`Link`]), and every mutation of `head`,
//! `tail`, the free-list head and each node's `next` increments the tag.
//! A recycled node reappears with a different tag and the stale
//! compare-exchange fails. Pool indices instead of pointers are what let
//! the tagged reference fit one `AtomicU64`.
//!
//! Lagging-tail states are repaired cooperatively: whichever operation
//! observes `tail` trailing the last linked node helps swing it forward
//! before retrying, so a stalled peer never wedges the queue.
//!
//! Contended loops back off through [`Backoff`]: an exponentially growing
//! run of CPU pause instructions, then scheduler yields. Each operation
//! carries its own backoff state.

use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

/// Index value marking the end of a chain.
const NIL: u32 = u32::MAX;

/// A tagged node reference: pool index in the low half, version tag in the
/// high half.
#[derive(Clone, Copy, PartialEq, Eq)]
struct Link(u64);

impl Link {
    #[inline(always)]
    fn new(index: u32, tag: u32) -> Self {
        Self(((tag as u64) << 32) | index as u64)
    }

    #[inline(always)]
    fn index(self) -> u32 {
        self.0 as u32
    }

    #[inline(always)]
    fn tag(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline(always)]
    fn is_nil(self) -> bool {
        self.index() == NIL
    }

    /// The successor value for a compare-exchange: new index, tag bumped.
    #[inline(always)]
    fn bump(self, index: u32) -> Self {
        Self::new(index, self.tag().wrapping_add(1))
    }
}

struct Node<T> {
    next: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded lock-free MPMC queue of `Copy` records.
pub struct MpmcQueue<T> {
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    free: CachePadded<AtomicU64>,
    nodes: Box<[Node<T>]>,
}

unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T: Copy> MpmcQueue<T> {
    /// Builds a queue backed by `pool_size` preallocated nodes.
    ///
    /// One node is the permanent sentinel, so at most `pool_size - 1`
    /// records can be queued at once.
    ///
    /// # Panics
    ///
    /// Panics if `pool_size < 2` or the pool does not fit a `u32` index
    /// space.
    pub fn with_pool(pool_size: usize) -> Self {
        assert!(pool_size >= 2, "node pool needs a sentinel plus at least one record slot");
        assert!(pool_size < NIL as usize, "node pool exceeds the index space");

        let mut nodes: Vec<Node<T>> = Vec::with_capacity(pool_size);
        // Node 0 is the sentinel; nodes 1.. are chained into the free list.
        nodes.push(Node {
            next: AtomicU64::new(Link::new(NIL, 0).0),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        });
        for i in 1..pool_size {
            let succ = if i + 1 < pool_size { (i + 1) as u32 } else { NIL };
            nodes.push(Node {
                next: AtomicU64::new(Link::new(succ, 0).0),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            });
        }

        Self {
            head: CachePadded::new(AtomicU64::new(Link::new(0, 0).0)),
            tail: CachePadded::new(AtomicU64::new(Link::new(0, 0).0)),
            free: CachePadded::new(AtomicU64::new(Link::new(1, 0).0)),
            nodes: nodes.into_boxed_slice(),
        }
    }

    /// Records the queue can hold at once.
    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Attempts to enqueue one record; gives the record back in `Err` when
    /// the node pool is exhausted.
    pub fn try_enqueue(&self, value: T) -> Result<(), T> {
        let Some(idx) = self.alloc_node() else {
            return Err(value);
        };

        let node = self.node(idx);
        unsafe {
            (*node.value.get()).write(value);
        }
        // Terminate the chain at this node; bump the link tag so a stale
        // compare-exchange from its previous life cannot land here.
        let stale = Link(node.next.load(Ordering::Relaxed));
        node.next.store(Link::new(NIL, stale.tag().wrapping_add(1)).0, Ordering::Release);

        let backoff = Backoff::new();
        loop {
            let tail = Link(self.tail.load(Ordering::Acquire));
            let next = Link(self.node(tail.index()).next.load(Ordering::Acquire));

            if tail.0 != self.tail.load(Ordering::Acquire) {
                backoff.snooze();
                continue;
            }

            if next.is_nil() {
                if self
                    .node(tail.index())
                    .next
                    .compare_exchange_weak(next.0, next.bump(idx).0, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
                {
                    // Linked; swinging the tail is best effort, a later
                    // operation repairs it if this loses.
                    let _ = self.tail.compare_exchange(
                        tail.0,
                        tail.bump(idx).0,
                        Ordering::Release,
                        Ordering::Relaxed,
                    );
                    return Ok(());
                }
            } else {
                // Tail lags behind the last linked node; help it forward.
                let _ = self.tail.compare_exchange(
                    tail.0,
                    tail.bump(next.index()).0,
                    Ordering::Release,
                    Ordering::Relaxed,
                );
            }
            backoff.snooze();
        }
    }

    /// Dequeues the oldest record, if any.
    pub fn try_dequeue(&self) -> Option<T> {
        let backoff = Backoff::new();
        loop {
            let head = Link(self.head.load(Ordering::Acquire));
            let tail = Link(self.tail.load(Ordering::Acquire));
            let next = Link(self.node(head.index()).next.load(Ordering::Acquire));

            if head.0 != self.head.load(Ordering::Acquire) {
                backoff.snooze();
                continue;
            }

            if head.index() == tail.index() {
                if next.is_nil() {
                    return None;
                }
                // Tail lags; help before retrying.
                let _ = self.tail.compare_exchange(
                    tail.0,
                    tail.bump(next.index()).0,
                    Ordering::Release,
                    Ordering::Relaxed,
                );
            } else {
                if next.is_nil() {
                    // Transient inconsistency between the two cursors.
                    backoff.snooze();
                    continue;
                }

                // Copy out before the swing; if the CAS loses, the copy is
                // discarded.
                let value = unsafe { (*self.node(next.index()).value.get()).assume_init_read() };

                if self
                    .head
                    .compare_exchange_weak(
                        head.0,
                        head.bump(next.index()).0,
                        Ordering::Release,
                        Ordering::Relaxed,
                    )
                    .is_ok()
                {
                    // The old sentinel is ours to recycle; `next` is the
                    // new sentinel.
                    self.free_node(head.index());
                    return Some(value);
                }
            }
            backoff.snooze();
        }
    }

    /// Dequeues up to `out.len()` records, stopping at the first empty
    /// observation. Returns how many were written.
    pub fn try_dequeue_bulk(&self, out: &mut [T]) -> usize {
        let mut count = 0;
        for slot in out.iter_mut() {
            match self.try_dequeue() {
                Some(value) => {
                    *slot = value;
                    count += 1;
                }
                None => break,
            }
        }
        count
    }

    /// Whether the queue looked empty at the moment of the check.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        let head = Link(self.head.load(Ordering::Acquire));
        Link(self.node(head.index()).next.load(Ordering::Acquire)).is_nil()
    }

    /// Walks the chain and counts linked records. Diagnostics only: the
    /// walk races with concurrent operations and is bounded by the pool
    /// size.
    pub fn len(&self) -> usize {
        let mut count = 0;
        let mut cur = Link(self.head.load(Ordering::Acquire));
        let mut next = Link(self.node(cur.index()).next.load(Ordering::Acquire));

        while !next.is_nil() && count < self.nodes.len() {
            count += 1;
            cur = next;
            next = Link(self.node(cur.index()).next.load(Ordering::Acquire));
        }
        count
    }

    #[inline(always)]
    fn node(&self, index: u32) -> &Node<T> {
        &self.nodes[index as usize]
    }

    /// Pops a node off the free list, or `None` when the pool is drained.
    fn alloc_node(&self) -> Option<u32> {
        let backoff = Backoff::new();
        loop {
            let head = Link(self.free.load(Ordering::Acquire));
            if head.is_nil() {
                return None;
            }

            let next = Link(self.node(head.index()).next.load(Ordering::Acquire));
            if self
                .free
                .compare_exchange_weak(head.0, head.bump(next.index()).0, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return Some(head.index());
            }
            backoff.snooze();
        }
    }

    /// Pushes a retired node back onto the free list.
    fn free_node(&self, index: u32) {
        let node = self.node(index);
        let backoff = Backoff::new();
        loop {
            let head = Link(self.free.load(Ordering::Acquire));
            let stale = Link(node.next.load(Ordering::Relaxed));
            node.next.store(
                Link::new(head.index(), stale.tag().wrapping_add(1)).0,
                Ordering::Relaxed,
            );

            if self
                .free
                .compare_exchange_weak(head.0, head.bump(index).0, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            backoff.snooze();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
    use std::thread;

    #[test]
    fn single_thread_fifo() {
        let q = MpmcQueue::with_pool(64);
        for i in 0..32u64 {
            assert!(q.try_enqueue(i).is_ok());
        }
        for i in 0..32u64 {
            assert_eq!(q.try_dequeue(), Some(i));
        }
        assert_eq!(q.try_dequeue(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn pool_exhaustion_returns_the_record() {
        let q = MpmcQueue::with_pool(8);
        assert_eq!(q.capacity(), 7);

        for i in 0..7u64 {
            assert!(q.try_enqueue(i).is_ok());
        }
        assert_eq!(q.try_enqueue(99), Err(99));

        // Draining one frees one node for reuse.
        assert_eq!(q.try_dequeue(), Some(0));
        assert!(q.try_enqueue(7).is_ok());
        assert_eq!(q.try_enqueue(100), Err(100));
    }

    #[test]
    fn minimal_pool_holds_one_record() {
        let q = MpmcQueue::with_pool(2);
        assert_eq!(q.capacity(), 1);
        assert!(q.try_enqueue(1u64).is_ok());
        assert_eq!(q.try_enqueue(2), Err(2));
        assert_eq!(q.try_dequeue(), Some(1));
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn len_counts_linked_records() {
        let q = MpmcQueue::with_pool(16);
        assert_eq!(q.len(), 0);
        for i in 0..5u64 {
            q.try_enqueue(i).unwrap();
        }
        assert_eq!(q.len(), 5);
        q.try_dequeue().unwrap();
        assert_eq!(q.len(), 4);
    }

    #[test]
    fn bulk_dequeue_stops_at_empty() {
        let q = MpmcQueue::with_pool(32);
        for i in 0..10u64 {
            q.try_enqueue(i).unwrap();
        }

        let mut out = [0u64; 4];
        assert_eq!(q.try_dequeue_bulk(&mut out), 4);
        assert_eq!(out, [0, 1, 2, 3]);
        assert_eq!(q.try_dequeue_bulk(&mut out), 4);
        assert_eq!(out, [4, 5, 6, 7]);
        assert_eq!(q.try_dequeue_bulk(&mut out), 2);
        assert_eq!(&out[..2], &[8, 9]);
        assert_eq!(q.try_dequeue_bulk(&mut out), 0);
    }

    #[test]
    fn nodes_recycle_across_generations() {
        // Far more traffic than the pool holds, forcing every node through
        // many alloc/free cycles.
        let q = MpmcQueue::with_pool(4);
        for round in 0..10_000u64 {
            q.try_enqueue(round).unwrap();
            assert_eq!(q.try_dequeue(), Some(round));
        }
        assert!(q.is_empty());
    }

    #[test]
    fn producer_program_order_is_preserved() {
        let q = Arc::new(MpmcQueue::with_pool(1 << 10));
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..100_000u64 {
                    while q.try_enqueue(i).is_err() {
                        std::hint::spin_loop();
                    }
                }
            })
        };

        let mut expected = 0u64;
        while expected < 100_000 {
            if let Some(v) = q.try_dequeue() {
                assert_eq!(v, expected, "single consumer must see program order");
                expected += 1;
            } else {
                std::hint::spin_loop();
            }
        }
        producer.join().unwrap();
    }

    #[test]
    fn contended_producers_and_consumers_lose_nothing() {
        const PRODUCERS: u64 = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: u64 = 100_000;

        let q = Arc::new(MpmcQueue::with_pool(1 << 20));
        let producing = Arc::new(AtomicBool::new(true));

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|id| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for seq in 0..PER_PRODUCER {
                        let tagged = (id << 32) | seq;
                        while q.try_enqueue(tagged).is_err() {
                            std::hint::spin_loop();
                        }
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..CONSUMERS)
            .map(|_| {
                let q = Arc::clone(&q);
                let producing = Arc::clone(&producing);
                thread::spawn(move || {
                    let mut seen = Vec::new();
                    loop {
                        if let Some(v) = q.try_dequeue() {
                            seen.push(v);
                            continue;
                        }
                        if !producing.load(AtomicOrdering::Acquire) && q.is_empty() {
                            break;
                        }
                        std::hint::spin_loop();
                    }
                    seen
                })
            })
            .collect();

        for p in producers {
            p.join().unwrap();
        }
        producing.store(false, AtomicOrdering::Release);

        let mut all: Vec<u64> = Vec::new();
        for c in consumers {
            all.extend(c.join().unwrap());
        }
        // `is_empty` is approximate, so sweep up anything a consumer's
        // final check raced past.
        while let Some(v) = q.try_dequeue() {
            all.push(v);
        }

        assert_eq!(all.len() as u64, PRODUCERS * PER_PRODUCER, "every record dequeued exactly once");

        let unique: HashSet<u64> = all.iter().copied().collect();
        assert_eq!(unique.len(), all.len(), "no record dequeued twice");

        for id in 0..PRODUCERS {
            for seq in 0..PER_PRODUCER {
                assert!(unique.contains(&((id << 32) | seq)));
            }
        }
        assert!(q.is_empty());
    }

    #[test]
    fn event_records_cross_the_queue_bitwise_intact() {
        use crate::event::{EventType, MarketEvent, Symbol};

        let q = MpmcQueue::with_pool(8);
        let mut ev = MarketEvent::default();
        ev.symbol = Symbol::new("BTCUSD");
        ev.event_type = EventType::Quote;
        ev.sequence_number = u64::MAX;
        ev.price = -1;

        q.try_enqueue(ev).unwrap();
        assert_eq!(q.try_dequeue(), Some(ev));
    }
}
