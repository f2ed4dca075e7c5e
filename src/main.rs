//! Synthetic feed driver: one producer, one consumer, one stats printer.
//!
//! Exercises the runtime end to end — calibrated clock, pinned
//! configured threads, the SPSC ring, and the metrics panel — against a
//! synthetic trade stream, then reports percentile latencies and counters.

use clap::Parser;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use mdfeed::clock::{CycleClock, now_cycles, now_nanos};
use mdfeed::event::{MarketEvent, PRICE_SCALE, Side, Symbol};
use mdfeed::metrics::FeedMetrics;
use mdfeed::spsc;
use mdfeed::threads::{self, ConfiguredThread, ThreadConfig};

const RING_CAPACITY: usize = 1 << 20;

#[derive(Parser, Debug)]
#[command(version, about = "Synthetic market-data feed driver", long_about = None)]
struct Args {
    /// How long to run, in seconds.
    #[arg(default_value_t = 10)]
    duration: u64,
}

fn main() {
    tracing_subscriber::fmt().with_target(false).init();
    let args = Args::parse();

    let clock = CycleClock::calibrate();
    println!("cycle counter: {} Hz", clock.cycles_per_second());

    let isolated = threads::isolated_cpus();
    println!("cpus online: {}, isolated: {:?}", threads::num_cpus(), isolated);
    if isolated.is_empty() {
        println!("note: no isolated cpus; pinning onto shared cores (see isolcpus=)");
    }

    let producer_cpu = isolated.first().copied().unwrap_or(0);
    let consumer_cpu = isolated
        .get(1)
        .copied()
        .unwrap_or(if threads::num_cpus() > 1 { 1 } else { 0 });

    let shutdown = Arc::new(AtomicBool::new(false));
    let metrics = Arc::new(FeedMetrics::new());
    let (tx, rx) = spsc::ring::<MarketEvent>(RING_CAPACITY);

    println!("running for {} s...", args.duration);

    let producer = {
        let shutdown = Arc::clone(&shutdown);
        let metrics = Arc::clone(&metrics);
        ConfiguredThread::spawn(ThreadConfig::new("md-producer").pinned(producer_cpu), move || {
            produce(tx, &shutdown, &metrics)
        })
    };

    let consumer = {
        let shutdown = Arc::clone(&shutdown);
        let metrics = Arc::clone(&metrics);
        ConfiguredThread::spawn(ThreadConfig::new("md-consumer").pinned(consumer_cpu), move || {
            consume(rx, &shutdown, &metrics, clock)
        })
    };

    let stats = {
        let shutdown = Arc::clone(&shutdown);
        let metrics = Arc::clone(&metrics);
        ConfiguredThread::spawn(ThreadConfig::new("md-stats"), move || {
            while !shutdown.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_secs(1));
                print_panel(&metrics);
            }
        })
    };

    thread::sleep(Duration::from_secs(args.duration));
    shutdown.store(true, Ordering::Release);

    producer.join();
    consumer.join();
    stats.join();

    println!("\n=== final ===");
    print_panel(&metrics);
}

/// Synthesizes a trade stream at roughly one million events per second.
fn produce(mut tx: spsc::Producer<MarketEvent>, shutdown: &AtomicBool, metrics: &FeedMetrics) {
    let symbol = Symbol::new("AAPL");
    let mut sequence = 0u64;

    while !shutdown.load(Ordering::Relaxed) {
        let mut ev = MarketEvent::trade(symbol, 150 * PRICE_SCALE, 100 * PRICE_SCALE, Side::Bid);
        ev.venue_id = 1;
        ev.sequence_number = sequence;
        ev.exchange_timestamp = now_nanos();
        ev.receive_timestamp = now_cycles();
        sequence += 1;

        while !tx.try_push(ev) {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            metrics.record_queue_full();
            std::hint::spin_loop();
        }
        metrics.record_message_received();

        // Pacing: a burst of 1000, then a millisecond off.
        if sequence % 1000 == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
    println!("[producer] stopped after {} events", sequence);
}

/// Drains the ring, recording end-to-end latency and sequence gaps.
fn consume(
    mut rx: spsc::Consumer<MarketEvent>,
    shutdown: &AtomicBool,
    metrics: &FeedMetrics,
    clock: CycleClock,
) {
    let mut last_sequence = 0u64;
    let mut processed = 0u64;

    loop {
        match rx.try_pop() {
            Some(ev) => {
                let elapsed = now_cycles().wrapping_sub(ev.receive_timestamp);
                metrics.end_to_end_latency.record(clock.cycles_to_nanos(elapsed));

                if processed > 0 && ev.sequence_number != last_sequence.wrapping_add(1) {
                    metrics.record_sequence_gap();
                }
                last_sequence = ev.sequence_number;

                metrics.record_message_processed();
                processed += 1;
            }
            None => {
                // Keep draining whatever the producer managed to queue.
                if shutdown.load(Ordering::Relaxed) && rx.is_empty() {
                    break;
                }
                std::hint::spin_loop();
            }
        }
    }
    println!("[consumer] stopped after {} events", processed);
}

fn print_panel(metrics: &FeedMetrics) {
    println!(
        "received {:>10}  processed {:>10}  dropped {:>6}  gaps {:>6}  queue-full {:>8}",
        metrics.messages_received.load(Ordering::Relaxed),
        metrics.messages_processed.load(Ordering::Relaxed),
        metrics.messages_dropped.load(Ordering::Relaxed),
        metrics.sequence_gaps.load(Ordering::Relaxed),
        metrics.queue_full_events.load(Ordering::Relaxed),
    );

    let e2e = &metrics.end_to_end_latency;
    if e2e.count() > 0 {
        println!(
            "e2e latency (us): min {} p50 {} p99 {} p99.9 {} p99.99 {} max {} mean {}",
            e2e.min() / 1000,
            e2e.p50() / 1000,
            e2e.p99() / 1000,
            e2e.p999() / 1000,
            e2e.p9999() / 1000,
            e2e.max() / 1000,
            e2e.mean() / 1000,
        );
    }
}
