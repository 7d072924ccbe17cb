//! Concurrent cache stress: many threads request overlapping keys through one
//! shared cache and the engine must compute each key at most once.
//!
//! Usage: cargo run --release --bin stress -- [requests_per_thread]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Result};

use hexbranch::cache::cache_key;
use hexbranch::config::EngineConfig;
use hexbranch::engine::{Engine, Request};
use hexbranch::hexagram::{HexagramTable, LinePosition};
use hexbranch::state::State;
use hexbranch::tables::{BaselineEntry, BaselineScoreTable, NarrativeTable};

fn synthetic_baseline(hexes: &HexagramTable) -> BaselineScoreTable {
    let mut table = BaselineScoreTable::new();
    for hex in hexes.iter() {
        for n in 1..=6 {
            let s = State::new(hex.clone(), LinePosition::new(n).unwrap_or(LinePosition::BOTTOM));
            let x = hex.ordinal as f64 * 6.0 + n as f64;
            table.insert(s.key(), BaselineEntry {
                volatility: Some((x * 3.7) % 90.0),
                risk: Some((x * 5.3) % 120.0 - 60.0),
                ..BaselineEntry::with_score(30.0 + (x * 7.1) % 60.0)
            });
        }
    }
    table
}

fn main() -> Result<()> {
    let per_thread: usize = std::env::args().nth(1).and_then(|s| s.parse().ok()).unwrap_or(2_000);
    let n_threads = num_cpus::get().clamp(2, 16);

    let hexes = HexagramTable::king_wen();
    let baseline = synthetic_baseline(&hexes);
    let engine = Arc::new(Engine::new(hexes, baseline, NarrativeTable::new(), EngineConfig::default()));
    let cache = Arc::new(engine.new_cache());

    // A small key space so threads collide constantly.
    let requests: Arc<Vec<Request>> = Arc::new(
        ["地天泰", "乾為天", "坤為地", "水火既済", "火水未済"]
            .iter()
            .flat_map(|name| (1..=6).map(move |n| Request::new(*name, n, "stress")))
            .collect(),
    );
    let mut distinct = HashSet::new();
    for r in requests.iter() {
        let start = engine.validate(&r.hexagram, r.line)?;
        distinct.insert(cache_key(&start, &r.context));
    }

    println!("Threads: {}", n_threads);
    println!("Requests per thread: {}", per_thread);
    println!("Distinct keys: {}", distinct.len());
    println!();

    let served = Arc::new(AtomicU64::new(0));
    let started = Instant::now();
    let mut handles = Vec::with_capacity(n_threads);
    for t in 0..n_threads {
        let engine = Arc::clone(&engine);
        let cache = Arc::clone(&cache);
        let requests = Arc::clone(&requests);
        let served = Arc::clone(&served);
        handles.push(thread::spawn(move || -> Result<()> {
            for i in 0..per_thread {
                let req = &requests[(t * 7 + i) % requests.len()];
                let result = engine.run(req, &cache)?;
                if result.patterns.len() != 8 {
                    return Err(anyhow!("{} {}: {} patterns", req.hexagram, req.line, result.patterns.len()));
                }
                served.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        }));
    }
    for h in handles {
        h.join().map_err(|_| anyhow!("worker thread panicked"))??;
    }

    let elapsed = started.elapsed();
    let stats = cache.stats();
    let total = served.load(Ordering::Relaxed);
    println!("=== Summary ===");
    println!("Total time: {:.2?}", elapsed);
    println!("Requests served: {}", total);
    println!("Throughput: {:.0} req/sec", total as f64 / elapsed.as_secs_f64());
    println!(
        "Cache: {} hits, {} misses, {} computations, {} evictions",
        stats.hits, stats.misses, stats.computations, stats.evictions
    );

    if stats.computations as usize != distinct.len() {
        println!("\n✗ expected {} computations, saw {}", distinct.len(), stats.computations);
        std::process::exit(1);
    }
    println!("\n✓ Each key computed exactly once");
    Ok(())
}
