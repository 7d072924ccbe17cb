//! Exhaustive invariant sweep over all 384 start states.
//!
//! Each round builds a baseline table with seeded random scores and a random
//! fraction of entries removed, then checks every start state.
//!
//! Usage: cargo run --release --bin sweep -- [seed] [gap_fraction] [rounds]

use std::collections::HashSet;
use std::time::Instant;

use anyhow::Result;
use rand::{rngs::StdRng, Rng, SeedableRng};

use hexbranch::cache::WellFormed;
use hexbranch::config::EngineConfig;
use hexbranch::engine::enumerate::PATTERN_COUNT;
use hexbranch::engine::{BranchingResult, Engine};
use hexbranch::hexagram::{HexagramTable, LinePosition};
use hexbranch::state::State;
use hexbranch::tables::{BaselineEntry, BaselineScoreTable, NarrativeTable};

fn random_baseline(hexes: &HexagramTable, rng: &mut StdRng, gap: f64) -> (BaselineScoreTable, usize) {
    let mut table = BaselineScoreTable::new();
    let mut missing = 0;
    for hex in hexes.iter() {
        for n in 1..=6 {
            if rng.gen_bool(gap) {
                missing += 1;
                continue;
            }
            let s = State::new(hex.clone(), LinePosition::new(n).unwrap_or(LinePosition::BOTTOM));
            table.insert(s.key(), BaselineEntry {
                volatility: Some(rng.gen_range(0.0..100.0)),
                risk: Some(rng.gen_range(-80.0..80.0)),
                ..BaselineEntry::with_score(rng.gen_range(0.0..100.0))
            });
        }
    }
    (table, missing)
}

/// Returns a description of each violated property.
fn check(engine: &Engine, start: &State, result: &BranchingResult) -> Vec<String> {
    let mut problems = Vec::new();
    if !result.is_well_formed() {
        problems.push("result not well formed".to_string());
    }
    let ids: HashSet<_> = result.patterns.iter().map(|p| p.pattern.id).collect();
    if ids.len() != PATTERN_COUNT {
        problems.push(format!("{} distinct pattern ids", ids.len()));
    }
    for report in &result.patterns {
        let p = &report.pattern;
        let expected_first = engine.baseline().score(start).unwrap_or(0.0);
        if p.first_score() != expected_first {
            problems.push(format!("{}: first score {} != {}", p.id, p.first_score(), expected_first));
        }
        for step in &p.steps {
            let carried = engine.baseline().score(&step.after).is_none();
            if carried && step.score_after != step.score_before {
                problems.push(format!("{}: step {} did not carry score", p.id, step.index));
            }
        }
        if report.narrative_chain.trim().is_empty() || report.headline.trim().is_empty() {
            problems.push(format!("{}: empty narrative", p.id));
        }
    }
    problems
}

/// `sweep [seed] [gap] [rounds]`; unparsable values fall back to defaults.
fn parse_args(args: &[String]) -> (u64, f64, u64) {
    let seed = args.get(1).and_then(|s| s.parse::<u64>().ok()).unwrap_or(42);
    let gap = args
        .get(2)
        .and_then(|s| s.parse::<f64>().ok())
        .unwrap_or(0.1)
        .clamp(0.0, 1.0);
    let rounds = args.get(3).and_then(|s| s.parse::<u64>().ok()).unwrap_or(5);
    (seed, gap, rounds)
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let (seed, gap, rounds) = parse_args(&args);

    println!("Seed: {}  gap fraction: {:.2}  rounds: {}", seed, gap, rounds);
    println!();
    println!("{:>6} {:>8} {:>10} {:>10} {:>10} {:>10}", "Round", "Missing", "Starts", "Fallbacks", "Failures", "Time");
    println!("{}", "-".repeat(60));

    let started = Instant::now();
    let mut total_failures = 0usize;

    for round in 0..rounds {
        let round_started = Instant::now();
        let hexes = HexagramTable::king_wen();
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(round));
        let (baseline, missing) = random_baseline(&hexes, &mut rng, gap);
        let engine = Engine::new(hexes.clone(), baseline, NarrativeTable::new(), EngineConfig::default());

        let mut starts = 0;
        let mut fallbacks = 0;
        let mut failures = 0;
        for hex in hexes.iter() {
            for n in 1..=6 {
                let start = engine.validate(&hex.name, n)?;
                let first = engine.compute(&start)?;
                let second = engine.compute(&start)?;
                starts += 1;
                fallbacks += first.fallback_count();

                let mut problems = check(&engine, &start, &first);
                if serde_json::to_string(&first)? != serde_json::to_string(&second)? {
                    problems.push("repeated computation differs".to_string());
                }
                for p in &problems {
                    eprintln!("  {} : {}", start.label(), p);
                }
                if !problems.is_empty() {
                    failures += 1;
                }
            }
        }
        total_failures += failures;
        println!(
            "{:>6} {:>8} {:>10} {:>10} {:>10} {:>10}",
            round + 1,
            missing,
            starts,
            fallbacks,
            failures,
            format!("{:.2?}", round_started.elapsed())
        );
    }

    println!("\nTotal time: {:.2?}", started.elapsed());
    if total_failures > 0 {
        println!("✗ {} start states violated an invariant", total_failures);
        std::process::exit(1);
    }
    println!("✓ All invariants held");
    Ok(())
}
