//! # Ultra-low-latency market-data ingestion runtime
//!
//! Core plumbing for moving fixed-size market events from feed-handling
//! producers to processing consumers with bounded tail latency. The crate
//! is the concurrency substrate of such a system: the queues, the pool
//! allocators, the cycle clock, the latency metrics and the thread
//! configuration — everything the hot path touches, and nothing that
//! blocks on it.
//!
//! # Components
//!
//! * [`event`] — the 64-byte, cache-line-aligned [`MarketEvent`] record
//! * [`clock`] — cycle-counter timestamps and calibrated cycle↔ns conversion
//! * [`spsc`] — wait-free single-producer / single-consumer ring
//! * [`mpmc`] — lock-free multi-producer / multi-consumer queue over a
//!   fixed, ABA-guarded node pool
//! * [`slab`] — cache-aligned lock-free object pool, optionally on huge
//!   pages
//! * [`metrics`] — lock-free latency histogram plus the feed counter panel
//! * [`threads`] — CPU pinning, SCHED_FIFO, thread names, isolated-CPU
//!   discovery, and the join-guaranteed [`ConfiguredThread`]
//! * [`decode`] — the decoder seam and the FIX / binary reference decoders
//!
//! # Design rules
//!
//! * **Zero allocation after startup.** Every container is sized at
//!   construction and never resized; records are plain 64-byte copies.
//! * **No hidden blocking.** `try_*` operations return instead of
//!   waiting. The only sleeps live in clock calibration and in the OS
//!   calls of thread configuration.
//! * **Cache-line discipline.** Producer and consumer cursors, free-list
//!   heads and every panel counter sit on their own line
//!   (`crossbeam_utils::CachePadded`); the event record is exactly one
//!   line.
//! * **Failure is a value.** A full ring, a drained pool or an
//!   unprivileged scheduler call comes back as a return value; sequence
//!   gaps and drops are counters, not errors.
//!
//! # Quick example
//!
//! ```ignore
//! use mdfeed::{clock::CycleClock, event::MarketEvent, spsc};
//!
//! let clock = CycleClock::calibrate();
//! let (mut tx, mut rx) = spsc::ring::<MarketEvent>(1024);
//!
//! let mut ev = MarketEvent::default();
//! ev.receive_timestamp = mdfeed::clock::now_cycles();
//! tx.try_push(ev);
//!
//! if let Some(ev) = rx.try_pop() {
//!     let elapsed = mdfeed::clock::now_cycles() - ev.receive_timestamp;
//!     println!("queue latency: {} ns", clock.cycles_to_nanos(elapsed));
//! }
//! ```

#[cfg(not(unix))]
compile_error!("This crate only supports Unix-like operating systems.");

pub mod clock;
pub mod decode;
pub mod event;
pub mod metrics;
pub mod mpmc;
pub mod slab;
pub mod spsc;
pub mod threads;

pub use clock::CycleClock;
pub use event::{EventType, MarketEvent, Side, Symbol};
pub use metrics::{FeedMetrics, LatencyHistogram};
pub use mpmc::MpmcQueue;
pub use slab::SlabPool;
pub use threads::{ConfiguredThread, ThreadConfig};
