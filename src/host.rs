//! Async embedding: run the synchronous pipeline off the runtime threads
//! under a caller-level deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::cache::ResultCache;
use crate::engine::{BranchingResult, Engine, Request};
use crate::error::{EngineError, EngineResult};
use crate::logging::{log, obj, v_num, v_str, Domain, Level, ProfileScope};

/// Compute `request` on a blocking thread, giving up after `timeout_ms`.
///
/// On expiry the blocking task keeps running to completion and still fills
/// the cache; only the caller stops waiting.
pub async fn compute_with_timeout(
    engine: Arc<Engine>,
    cache: Arc<ResultCache<BranchingResult>>,
    request: Request,
    timeout_ms: u64,
) -> EngineResult<Arc<BranchingResult>> {
    let _scope = ProfileScope::new("host.compute");
    let label = format!("{} {}", request.hexagram, request.line);
    let task = tokio::task::spawn_blocking(move || engine.run(&request, &cache));

    match timeout(Duration::from_millis(timeout_ms), task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_err)) => Err(EngineError::integrity(format!(
            "computation task failed: {}",
            join_err
        ))),
        Err(_) => {
            log(
                Level::Warn,
                Domain::Engine,
                "timeout",
                obj(&[("request", v_str(&label)), ("timeout_ms", v_num(timeout_ms as f64))]),
            );
            Err(EngineError::Timeout { ms: timeout_ms })
        }
    }
}
