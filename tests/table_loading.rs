//! Loading tables from disk and running through the async host.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hexbranch::cache::cache_key;
use hexbranch::config::{EngineConfig, TablePaths};
use hexbranch::engine::enumerate::PatternId;
use hexbranch::engine::narrative::TextSource;
use hexbranch::engine::{Engine, Request};
use hexbranch::error::EngineError;
use hexbranch::host::compute_with_timeout;

const BASELINE: &str = r#"[
    {"卦名": "地天泰", "爻": "六五", "S1_基本スコア": 70, "S4_リスク": -20, "S6_変動性スコア": 30,
     "キーワード": ["調和"], "現代解釈の要約": "Share the gains with those below. Stay open."},
    {"卦名": "地天泰", "爻": "上六", "S1_基本スコア": 50, "S4_リスク": -45, "S6_変動性スコア": 60,
     "キーワード": ["過信"]},
    {"hexagram": "天地否", "line": 1, "score": 35, "risk": -50, "volatility": 40},
    {"hexagram": "地天泰", "line": "用六", "score": 99},
    {"hexagram": "nowhere", "line": 2, "score": 10}
]"#;

const STATES: &str = r#"{
    "地天泰 上六": {"short": "The wall falls back into the moat", "long": "Do not force it; consolidate."},
    "bad key": {"short": "ignored"}
}"#;

const CHAINS: &str = r#"{
    "地天泰 六五 | JJH": {"chain_long": "Authored story for this path."},
    "地天泰 六五 | XYZ": {"chain": "ignored"}
}"#;

fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    path
}

fn config_in(dir: &Path) -> EngineConfig {
    EngineConfig {
        tables: TablePaths {
            hexagrams: None,
            baseline: Some(write(dir, "baseline.json", BASELINE)),
            narratives: Some(write(dir, "states.json", STATES)),
            chains: Some(write(dir, "chains.json", CHAINS)),
        },
        ..Default::default()
    }
}

#[test]
fn test_engine_from_config_loads_all_tables() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::from_config(config_in(dir.path())).unwrap();
    assert_eq!(engine.baseline().len(), 3);
    assert!(!engine.narratives().is_empty());

    let start = engine.validate("地天泰", 5).unwrap();
    let result = engine.compute(&start).unwrap();

    let aat = result.pattern(PatternId::parse("AAT").unwrap()).unwrap();
    assert!(aat.narrative_authored);
    assert_eq!(aat.narrative_chain, "Authored story for this path.");

    let aaa = result.pattern(PatternId::parse("AAA").unwrap()).unwrap();
    assert!(!aaa.narrative_authored);
    assert_eq!(aaa.step_texts[0].source, TextSource::AuthoredState);
    assert!(aaa.narrative_chain.starts_with("First, do not force it; consolidate."));
    assert_eq!(aaa.pattern.score_trajectory, vec![70.0, 50.0, 50.0, 35.0]);
    assert_eq!(aaa.pattern.steps[0].keywords_added, vec!["過信".to_string()]);
    assert_eq!(aaa.pattern.steps[0].keywords_removed, vec!["調和".to_string()]);
    assert_eq!(aaa.metrics.risk_peak, 50.0);
}

#[test]
fn test_missing_table_file_is_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = EngineConfig {
        tables: TablePaths {
            baseline: Some(dir.path().join("absent.json")),
            ..Default::default()
        },
        ..Default::default()
    };
    match Engine::from_config(cfg) {
        Err(EngineError::TableLoad { path, .. }) => assert!(path.ends_with("absent.json")),
        Err(other) => panic!("unexpected error: {}", other),
        Ok(_) => panic!("expected a load error"),
    }
}

#[test]
fn test_malformed_baseline_json_is_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = EngineConfig {
        tables: TablePaths {
            baseline: Some(write(dir.path(), "broken.json", "[{\"hexagram\": ")),
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(matches!(Engine::from_config(cfg), Err(EngineError::TableLoad { .. })));
}

#[test]
fn test_incomplete_hexagram_table_fails_on_transform() {
    let dir = tempfile::tempdir().unwrap();
    let hexagrams = write(
        dir.path(),
        "hexagrams.json",
        r#"[{"name": "乾為天", "code": "111111"}, {"name": "坤為地", "binary": "000000"}]"#,
    );
    let cfg = EngineConfig {
        tables: TablePaths {
            hexagrams: Some(hexagrams),
            ..Default::default()
        },
        ..Default::default()
    };
    let engine = Engine::from_config(cfg).unwrap();
    assert!(!engine.hexagrams().is_complete());
    let start = engine.validate("乾為天", 3).unwrap();
    assert!(matches!(engine.compute(&start), Err(EngineError::DataIntegrity { .. })));
}

#[test]
fn test_duplicate_codes_rejected_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let hexagrams = write(
        dir.path(),
        "hexagrams.json",
        r#"[{"name": "a", "code": "111111"}, {"name": "b", "code": "111111"}]"#,
    );
    let cfg = EngineConfig {
        tables: TablePaths {
            hexagrams: Some(hexagrams),
            ..Default::default()
        },
        ..Default::default()
    };
    assert!(matches!(Engine::from_config(cfg), Err(EngineError::DataIntegrity { .. })));
}

#[tokio::test]
async fn test_host_returns_result() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(Engine::from_config(config_in(dir.path())).unwrap());
    let cache = Arc::new(engine.new_cache());
    let result = compute_with_timeout(engine, cache.clone(), Request::new("地天泰", 5, "ctx"), 5_000)
        .await
        .unwrap();
    assert_eq!(result.patterns.len(), 8);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn test_host_surfaces_validation_errors() {
    let engine = Arc::new(Engine::from_config(EngineConfig::default()).unwrap());
    let cache = Arc::new(engine.new_cache());
    let err = compute_with_timeout(engine, cache, Request::new("地天泰", 0, ""), 5_000)
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_host_times_out_while_key_is_busy() {
    let engine = Arc::new(Engine::from_config(EngineConfig::default()).unwrap());
    let cache = Arc::new(engine.new_cache());
    let start = engine.validate("地天泰", 5).unwrap();
    let key = cache_key(&start, "busy");

    // Hold the slot for this key so the host's computation has to wait.
    let holder = {
        let engine = engine.clone();
        let cache = cache.clone();
        thread::spawn(move || {
            cache
                .get_or_compute(&key, || {
                    thread::sleep(Duration::from_millis(800));
                    engine.compute(&start)
                })
                .map(|_| ())
        })
    };
    thread::sleep(Duration::from_millis(100));

    let err = compute_with_timeout(engine, cache.clone(), Request::new("地天泰", 5, "busy"), 50)
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::Timeout { ms: 50 });

    holder.join().unwrap().unwrap();
    assert_eq!(cache.stats().computations, 1);
}
