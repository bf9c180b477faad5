use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use book_mirror::{Engine, EngineConfig};

/// Connect to the live level2 feed and print the best of book.
#[derive(Parser)]
#[command(name = "watch", about = "Watch the best of book from the live level2 mirror")]
struct Args {
    /// Product to mirror
    #[arg(default_value = "BTC-USD")]
    product: String,

    /// wss endpoint of the level2 feed
    #[arg(long, default_value = book_mirror::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Seconds between prints
    #[arg(long, default_value_t = 5)]
    interval: u64,

    /// Number of prints before exiting
    #[arg(long, default_value_t = 2)]
    count: u32,
}

fn print_best(engine: &Engine) {
    let bid = engine
        .best_bid()
        .map(|(p, q)| format!("{q} @ ${p}"))
        .unwrap_or_else(|| "<empty>".to_string());
    let ask = engine
        .best_ask()
        .map(|(p, q)| format!("{q} @ ${p}"))
        .unwrap_or_else(|| "<empty>".to_string());
    let spread = engine
        .spread()
        .map(|c| format!("{c}c"))
        .unwrap_or_else(|| "-".to_string());

    println!(
        "best bid: {} ; best ask: {} ; spread: {} ; levels: {}x{} ; queue: {}",
        bid,
        ask,
        spread,
        engine.book().bids().len(),
        engine.book().asks().len(),
        engine.queue_depth(),
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = EngineConfig::new(args.product.as_str());
    config.endpoint = args.endpoint.clone();

    println!("connecting to {} for {} ...", args.endpoint, args.product);
    let mut engine = Engine::connect(config)?;
    book_mirror::register_thread();

    print_best(&engine);
    for _ in 1..args.count {
        println!("sleeping for {} seconds", args.interval);
        std::thread::sleep(Duration::from_secs(args.interval));
        print_best(&engine);
    }

    engine.stop();
    Ok(())
}
