//! Wait-free single-producer / single-consumer ring.
//!
//! A bounded ring of fixed-size records with one write cursor and one read
//! cursor, each on its own cache line. [`ring`] hands back a
//! [`Producer`]/[`Consumer`] pair over the same storage, so the
//! one-writer/one-reader discipline is enforced by ownership rather than
//! by documentation: each handle is `Send` and its mutating operations
//! take `&mut self`.
//!
//! Both fast paths are wait-free — no CAS loop, no allocation, no OS call.
//! The producer publishes the record store before the release store of the
//! write cursor; the consumer acquires the write cursor before reading the
//! record, and releases its own cursor advance symmetrically.
//!
//! Capacity must be a power of two. One slot stays permanently reserved so
//! that `full` is the single compare `next_write == read`; a ring created
//! with capacity `N` holds at most `N - 1` records.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Creates a ring of the given power-of-two capacity and returns its two
/// endpoint handles.
///
/// # Panics
///
/// Panics unless `capacity` is a power of two and at least 2.
pub fn ring<T: Copy + Default + Send>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(
        capacity.is_power_of_two() && capacity > 1,
        "ring capacity must be a power of two >= 2"
    );

    let mut slots: Vec<UnsafeCell<T>> = Vec::with_capacity(capacity);
    slots.resize_with(capacity, || UnsafeCell::new(T::default()));

    let shared = Arc::new(Shared {
        write: CachePadded::new(AtomicUsize::new(0)),
        read: CachePadded::new(AtomicUsize::new(0)),
        low_watermark: AtomicUsize::new(capacity / 10),
        high_watermark: AtomicUsize::new(capacity * 9 / 10),
        mask: capacity - 1,
        slots: slots.into_boxed_slice(),
    });

    (
        Producer {
            shared: Arc::clone(&shared),
        },
        Consumer { shared },
    )
}

/// Returns the ring to its empty state.
///
/// Taking both halves by `&mut` is what guarantees exclusive access: no
/// push, pop or peek can be in flight while this runs.
///
/// # Panics
///
/// Panics if the two handles do not belong to the same ring.
pub fn reset<T>(producer: &mut Producer<T>, consumer: &mut Consumer<T>) {
    assert!(
        Arc::ptr_eq(&producer.shared, &consumer.shared),
        "reset requires both endpoints of the same ring"
    );
    producer.shared.write.store(0, Ordering::Relaxed);
    producer.shared.read.store(0, Ordering::Relaxed);
}

struct Shared<T> {
    /// Next slot the producer will fill. Always kept in `[0, capacity)`.
    write: CachePadded<AtomicUsize>,
    /// Next slot the consumer will drain. Always kept in `[0, capacity)`.
    read: CachePadded<AtomicUsize>,
    low_watermark: AtomicUsize,
    high_watermark: AtomicUsize,
    mask: usize,
    slots: Box<[UnsafeCell<T>]>,
}

unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    #[inline(always)]
    fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);
        if write >= read {
            write - read
        } else {
            self.mask + 1 - read + write
        }
    }

    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.read.load(Ordering::Acquire) == self.write.load(Ordering::Acquire)
    }

    #[inline(always)]
    fn is_full(&self) -> bool {
        let write = self.write.load(Ordering::Acquire);
        (write + 1) & self.mask == self.read.load(Ordering::Acquire)
    }

    fn set_watermarks(&self, low: usize, high: usize) {
        debug_assert!(low <= high);
        self.low_watermark.store(low, Ordering::Relaxed);
        self.high_watermark.store(high, Ordering::Relaxed);
    }
}

macro_rules! observational_ops {
    () => {
        /// Number of records currently queued. Approximate while the other
        /// endpoint is running.
        #[inline(always)]
        pub fn len(&self) -> usize {
            self.shared.len()
        }

        #[inline(always)]
        pub fn is_empty(&self) -> bool {
            self.shared.is_empty()
        }

        #[inline(always)]
        pub fn is_full(&self) -> bool {
            self.shared.is_full()
        }

        /// Total slot count; one slot is reserved, so at most
        /// `capacity() - 1` records are ever queued.
        #[inline(always)]
        pub fn capacity(&self) -> usize {
            self.shared.mask + 1
        }

        /// Approximate occupancy check against the high watermark.
        #[inline(always)]
        pub fn high_watermark_exceeded(&self) -> bool {
            self.shared.len() >= self.shared.high_watermark.load(Ordering::Relaxed)
        }

        /// Approximate occupancy check against the low watermark.
        #[inline(always)]
        pub fn below_low_watermark(&self) -> bool {
            self.shared.len() <= self.shared.low_watermark.load(Ordering::Relaxed)
        }

        /// Sets the observational watermarks, both in `[0, capacity]`.
        pub fn set_watermarks(&self, low: usize, high: usize) {
            self.shared.set_watermarks(low, high);
        }
    };
}

/// The writing endpoint of a ring. Exactly one exists per ring.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy + Default + Send> Producer<T> {
    /// Attempts to enqueue one record.
    ///
    /// Returns `false` when the ring is full; the record is observable to
    /// the consumer once this returns `true`.
    #[inline(always)]
    pub fn try_push(&mut self, item: T) -> bool {
        let shared = &*self.shared;
        let write = shared.write.load(Ordering::Relaxed);
        let next = (write + 1) & shared.mask;

        if next == shared.read.load(Ordering::Acquire) {
            return false;
        }

        unsafe {
            *shared.slots[write].get() = item;
        }
        shared.write.store(next, Ordering::Release);
        true
    }

    observational_ops!();
}

/// The reading endpoint of a ring. Exactly one exists per ring.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy + Default + Send> Consumer<T> {
    /// Dequeues the oldest record, if any.
    #[inline(always)]
    pub fn try_pop(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let read = shared.read.load(Ordering::Relaxed);

        if read == shared.write.load(Ordering::Acquire) {
            return None;
        }

        let item = unsafe { *shared.slots[read].get() };
        shared.read.store((read + 1) & shared.mask, Ordering::Release);
        Some(item)
    }

    /// Copies the oldest record without consuming it.
    #[inline(always)]
    pub fn try_peek(&self) -> Option<T> {
        let shared = &*self.shared;
        let read = shared.read.load(Ordering::Relaxed);

        if read == shared.write.load(Ordering::Acquire) {
            return None;
        }

        Some(unsafe { *shared.slots[read].get() })
    }

    observational_ops!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fill_to_capacity_then_drain_in_order() {
        let (mut tx, mut rx) = ring::<u64>(16);
        assert_eq!(tx.capacity(), 16);

        for i in 0..15u64 {
            assert!(tx.try_push(i), "push {} must succeed", i);
        }
        assert!(!tx.try_push(15), "16th push must fail on a 16-slot ring");
        assert!(tx.is_full());

        for i in 0..15u64 {
            assert_eq!(rx.try_pop(), Some(i));
        }
        assert_eq!(rx.try_pop(), None);
        assert!(rx.is_empty());
    }

    #[test]
    fn alternating_bursts_leave_ring_empty() {
        let (mut tx, mut rx) = ring::<u64>(16);

        for _cycle in 0..10 {
            for i in 0..10u64 {
                assert!(tx.try_push(i));
            }
            for i in 0..10u64 {
                assert_eq!(rx.try_pop(), Some(i));
            }
            assert!(rx.is_empty());
            assert_eq!(rx.len(), 0);
        }
    }

    #[test]
    fn peek_does_not_consume() {
        let (mut tx, mut rx) = ring::<u64>(8);
        assert_eq!(rx.try_peek(), None);

        tx.try_push(41);
        tx.try_push(42);
        assert_eq!(rx.try_peek(), Some(41));
        assert_eq!(rx.try_peek(), Some(41));
        assert_eq!(rx.try_pop(), Some(41));
        assert_eq!(rx.try_peek(), Some(42));
    }

    #[test]
    fn len_wraps_correctly() {
        let (mut tx, mut rx) = ring::<u64>(8);

        // Walk the cursors most of the way around, then queue across the
        // wrap point.
        for _ in 0..6 {
            assert!(tx.try_push(0));
            assert_eq!(rx.try_pop(), Some(0));
        }
        for i in 0..5u64 {
            assert!(tx.try_push(i));
        }
        assert_eq!(tx.len(), 5);
        assert_eq!(rx.len(), 5);
    }

    #[test]
    fn watermarks_track_occupancy() {
        let (mut tx, rx) = ring::<u64>(16);
        tx.set_watermarks(2, 12);

        assert!(rx.below_low_watermark());
        assert!(!rx.high_watermark_exceeded());

        for i in 0..13u64 {
            assert!(tx.try_push(i));
        }
        assert!(tx.high_watermark_exceeded());
        assert!(!tx.below_low_watermark());
    }

    #[test]
    fn reset_returns_ring_to_empty() {
        let (mut tx, mut rx) = ring::<u64>(8);
        for i in 0..5u64 {
            assert!(tx.try_push(i));
        }

        reset(&mut tx, &mut rx);

        assert!(rx.is_empty());
        assert_eq!(rx.try_pop(), None);
        assert!(tx.try_push(99));
        assert_eq!(rx.try_pop(), Some(99));
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn non_power_of_two_capacity_is_rejected() {
        let _ = ring::<u64>(12);
    }

    #[test]
    #[should_panic(expected = "same ring")]
    fn reset_rejects_mismatched_endpoints() {
        let (mut tx, _rx) = ring::<u64>(8);
        let (_tx2, mut rx2) = ring::<u64>(8);
        reset(&mut tx, &mut rx2);
    }

    #[test]
    fn concurrent_producer_consumer_preserves_fifo() {
        const COUNT: u64 = 200_000;
        let (mut tx, mut rx) = ring::<u64>(1024);

        let producer = thread::spawn(move || {
            for i in 0..COUNT {
                while !tx.try_push(i) {
                    std::hint::spin_loop();
                }
            }
        });

        let consumer = thread::spawn(move || {
            let mut expected = 0u64;
            while expected < COUNT {
                let queued = rx.len();
                assert!(queued <= rx.capacity() - 1, "len {} exceeds usable capacity", queued);
                if let Some(v) = rx.try_pop() {
                    assert_eq!(v, expected, "records arrived out of order");
                    expected += 1;
                } else {
                    std::hint::spin_loop();
                }
            }
            assert_eq!(rx.try_pop(), None);
        });

        producer.join().unwrap();
        consumer.join().unwrap();
    }

    #[test]
    fn event_sized_records_round_trip() {
        use crate::event::{MarketEvent, PRICE_SCALE, Side, Symbol};

        let (mut tx, mut rx) = ring::<MarketEvent>(4);
        let mut ev = MarketEvent::trade(Symbol::new("AAPL"), 150 * PRICE_SCALE, PRICE_SCALE, Side::Ask);
        ev.sequence_number = 31337;
        ev.receive_timestamp = 0xdead_beef;

        assert!(tx.try_push(ev));
        let out = rx.try_pop().unwrap();
        assert_eq!(out, ev);
    }
}
