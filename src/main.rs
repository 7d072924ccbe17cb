//! Usage: hexbranch <hexagram> <line> [context...]
//!
//! `<hexagram>` is a name, a King-Wen ordinal or a bottom-first code string;
//! `<line>` is 1..6 or a yao label such as `六五`. Prints the full result as
//! pretty JSON. Tables are read from the `HB_*_PATH` variables.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use hexbranch::config::EngineConfig;
use hexbranch::engine::{Engine, Request};
use hexbranch::hexagram::parse_line_label;
use hexbranch::host::compute_with_timeout;
use hexbranch::logging::{log, obj, v_num, v_str, Domain, Level};

fn parse_line(arg: &str) -> Result<i64> {
    if let Ok(n) = arg.trim().parse::<i64>() {
        return Ok(n);
    }
    parse_line_label(arg)
        .map(|line| line.get() as i64)
        .ok_or_else(|| anyhow!("line must be 1..6 or a yao label, got {:?}", arg))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 {
        eprintln!("usage: hexbranch <hexagram> <line> [context...]");
        return Err(anyhow!("expected at least 2 arguments, got {}", args.len()));
    }
    let line = parse_line(&args[1])?;
    let context = args[2..].join(" ");

    let cfg = EngineConfig::from_env();
    let timeout_ms = cfg.compute_timeout_ms;
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("hexagram", v_str(&args[0])),
            ("line", v_num(line as f64)),
            ("timeout_ms", v_num(timeout_ms as f64)),
        ]),
    );

    let engine = Arc::new(Engine::from_config(cfg)?);
    let cache = Arc::new(engine.new_cache());
    let request = Request::new(args[0].clone(), line, context);
    let result = compute_with_timeout(engine, cache, request, timeout_ms).await?;

    println!("{}", serde_json::to_string_pretty(result.as_ref())?);
    Ok(())
}
