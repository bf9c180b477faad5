use anyhow::Result;
use clap::Parser;
use hdrhistogram::Histogram;
use std::hint::black_box;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use book_mirror::{Engine, EngineConfig, SyntheticFeed};

/// Offline stress run: a synthetic feed churns deltas through the full
/// queue/applier pipeline while reader threads scan both sides, then a
/// read-latency report is printed.
#[derive(Parser)]
#[command(name = "churn", about = "Concurrent read-under-write stress and latency report")]
struct Args {
    /// Number of concurrent reader threads
    #[arg(long, default_value_t = 4)]
    readers: usize,

    /// How long to run, in seconds
    #[arg(long, default_value_t = 5)]
    seconds: u64,

    /// PRNG seed for the synthetic feed
    #[arg(long, default_value_t = 0xC0FFEE)]
    seed: u64,
}

fn reader_loop(
    book: Arc<book_mirror::Book>,
    stop: Arc<AtomicBool>,
) -> Histogram<u64> {
    book_mirror::register_thread();
    let mut histogram = Histogram::<u64>::new_with_bounds(1, 10_000_000, 3).unwrap();

    while !stop.load(Ordering::Acquire) {
        let start = Instant::now();
        black_box(book.best_bid());
        black_box(book.best_ask());
        let mut levels = 0usize;
        for entry in book.iter_bids() {
            black_box(entry);
            levels += 1;
        }
        for entry in book.iter_asks() {
            black_box(entry);
            levels += 1;
        }
        black_box(levels);
        histogram.record(start.elapsed().as_nanos() as u64).unwrap_or(());
    }
    histogram
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    println!(
        "Churning for {}s with {} readers (seed {:#x})...",
        args.seconds, args.readers, args.seed
    );

    let mut feed = SyntheticFeed::new(args.seed);
    feed.throttle = Some(Duration::from_micros(20));

    let mut engine = Engine::with_feed(EngineConfig::new("SYN-USD"), feed)?;
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..args.readers)
        .map(|_| {
            let book = engine.book();
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || reader_loop(book, stop))
        })
        .collect();

    std::thread::sleep(Duration::from_secs(args.seconds));
    stop.store(true, Ordering::Release);

    let mut histogram = Histogram::<u64>::new_with_bounds(1, 10_000_000, 3).unwrap();
    for reader in readers {
        let local = reader.join().expect("reader panicked");
        histogram.add(&local).unwrap();
    }

    let depth = engine.queue_depth();
    let (bid_levels, ask_levels) = {
        let book = engine.book();
        (book.bids().len(), book.asks().len())
    };
    engine.stop();

    println!("\n=== Full-Book Scan Latency (ns) ===");
    println!("Total scans: {}", histogram.len());
    println!("-----------------------------------");
    println!("Min:    {:8} ns", histogram.min());
    println!("P50:    {:8} ns", histogram.value_at_quantile(0.50));
    println!("P90:    {:8} ns", histogram.value_at_quantile(0.90));
    println!("P99:    {:8} ns", histogram.value_at_quantile(0.99));
    println!("P99.9:  {:8} ns", histogram.value_at_quantile(0.999));
    println!("Max:    {:8} ns", histogram.max());
    println!("-----------------------------------");
    println!("Final book: {bid_levels} bid / {ask_levels} ask levels, queue depth {depth}");

    Ok(())
}
