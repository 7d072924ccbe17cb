use std::path::PathBuf;
use std::str::FromStr;

use crate::cache::DEFAULT_TTL_MS;
use crate::engine::metrics::ClassifierThresholds;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty()).map(PathBuf::from)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TablePaths {
    /// Overrides the built-in King-Wen table.
    pub hexagrams: Option<PathBuf>,
    pub baseline: Option<PathBuf>,
    /// Per-state authored narratives.
    pub narratives: Option<PathBuf>,
    /// Per (state, pattern) authored chains.
    pub chains: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub thresholds: ClassifierThresholds,
    pub cache_ttl_ms: u64,
    pub headline_max_chars: usize,
    /// Only used by the async host wrapper.
    pub compute_timeout_ms: u64,
    pub tables: TablePaths,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: ClassifierThresholds::default(),
            cache_ttl_ms: DEFAULT_TTL_MS,
            headline_max_chars: 60,
            compute_timeout_ms: 5_000,
            tables: TablePaths::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let t = d.thresholds;
        Self {
            thresholds: ClassifierThresholds {
                effect_large: env_or("HB_EFFECT_LARGE", t.effect_large),
                effect_medium: env_or("HB_EFFECT_MEDIUM", t.effect_medium),
                effect_small: env_or("HB_EFFECT_SMALL", t.effect_small),
                load_medium: env_or("HB_LOAD_MEDIUM", t.load_medium),
                load_high: env_or("HB_LOAD_HIGH", t.load_high),
                risk_medium: env_or("HB_RISK_MEDIUM", t.risk_medium),
                risk_high: env_or("HB_RISK_HIGH", t.risk_high),
                load_structural_weight: env_or("HB_LOAD_STRUCTURAL_WEIGHT", t.load_structural_weight),
                load_transform_weight: env_or("HB_LOAD_TRANSFORM_WEIGHT", t.load_transform_weight),
                load_volatility_divisor: env_or("HB_LOAD_VOLATILITY_DIVISOR", t.load_volatility_divisor),
            },
            cache_ttl_ms: env_or("HB_CACHE_TTL_SECS", d.cache_ttl_ms / 1000).saturating_mul(1000),
            headline_max_chars: env_or("HB_HEADLINE_MAX_CHARS", d.headline_max_chars),
            compute_timeout_ms: env_or("HB_COMPUTE_TIMEOUT_MS", d.compute_timeout_ms),
            tables: TablePaths {
                hexagrams: env_path("HB_HEXAGRAM_PATH"),
                baseline: env_path("HB_BASELINE_PATH"),
                narratives: env_path("HB_NARRATIVE_PATH"),
                chains: env_path("HB_CHAIN_PATH"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Environment is process-wide; keep all env assertions in one test.
    #[test]
    fn test_from_env_overrides_and_defaults() {
        std::env::set_var("HB_EFFECT_LARGE", "25");
        std::env::set_var("HB_RISK_HIGH", "not a number");
        std::env::set_var("HB_CACHE_TTL_SECS", "60");
        std::env::set_var("HB_BASELINE_PATH", "/tmp/baseline.json");
        std::env::set_var("HB_CHAIN_PATH", "  ");
        let cfg = EngineConfig::from_env();
        for k in [
            "HB_EFFECT_LARGE",
            "HB_RISK_HIGH",
            "HB_CACHE_TTL_SECS",
            "HB_BASELINE_PATH",
            "HB_CHAIN_PATH",
        ] {
            std::env::remove_var(k);
        }

        assert_eq!(cfg.thresholds.effect_large, 25.0);
        assert_eq!(cfg.thresholds.risk_high, 55.0);
        assert_eq!(cfg.thresholds.effect_medium, 8.0);
        assert_eq!(cfg.cache_ttl_ms, 60_000);
        assert_eq!(cfg.headline_max_chars, 60);
        assert_eq!(cfg.tables.baseline, Some(PathBuf::from("/tmp/baseline.json")));
        assert_eq!(cfg.tables.chains, None);
    }

    #[test]
    fn test_default_ttl_is_thirty_minutes() {
        assert_eq!(EngineConfig::default().cache_ttl_ms, 1_800_000);
    }
}
