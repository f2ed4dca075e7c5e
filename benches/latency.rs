use criterion::{Criterion, black_box, criterion_group, criterion_main};

use mdfeed::clock::now_cycles;
use mdfeed::event::{MarketEvent, PRICE_SCALE, Side, Symbol};
use mdfeed::metrics::LatencyHistogram;
use mdfeed::mpmc::MpmcQueue;
use mdfeed::slab::SlabPool;
use mdfeed::spsc;

fn sample_event() -> MarketEvent {
    let mut ev = MarketEvent::trade(Symbol::new("AAPL"), 150 * PRICE_SCALE, 100 * PRICE_SCALE, Side::Bid);
    ev.venue_id = 1;
    ev.receive_timestamp = now_cycles();
    ev
}

fn bench_spsc(c: &mut Criterion) {
    let mut group = c.benchmark_group("spsc_ring");

    let (mut tx, mut rx) = spsc::ring::<MarketEvent>(1 << 14);
    let ev = sample_event();

    group.bench_function("push_pop_cycle", |b| {
        b.iter(|| {
            black_box(tx.try_push(black_box(ev)));
            black_box(rx.try_pop());
        });
    });

    group.finish();
}

fn bench_mpmc(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpmc_queue");

    let q = MpmcQueue::with_pool(1 << 14);
    let ev = sample_event();

    group.bench_function("enqueue_dequeue_cycle", |b| {
        b.iter(|| {
            black_box(q.try_enqueue(black_box(ev)).is_ok());
            black_box(q.try_dequeue());
        });
    });

    group.finish();
}

fn bench_slab(c: &mut Criterion) {
    let mut group = c.benchmark_group("slab_pool");

    let pool: SlabPool<MarketEvent> = SlabPool::with_capacity(1 << 12);
    let ev = sample_event();

    group.bench_function("allocate_release_cycle", |b| {
        b.iter(|| {
            let handle = pool.allocate(black_box(ev));
            black_box(&handle);
        });
    });

    group.finish();
}

fn bench_histogram(c: &mut Criterion) {
    let mut group = c.benchmark_group("latency_histogram");

    let h = LatencyHistogram::new();
    group.bench_function("record", |b| {
        b.iter(|| {
            h.record(black_box(1_500));
        });
    });

    h.reset();
    for i in 0..100_000u64 {
        h.record(i % 250_000);
    }
    group.bench_function("percentile", |b| {
        b.iter(|| {
            black_box(h.percentile(black_box(0.99)));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_spsc, bench_mpmc, bench_slab, bench_histogram);
criterion_main!(benches);
