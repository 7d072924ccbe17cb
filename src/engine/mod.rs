//! Branching computation pipeline.
//!
//! ```text
//! Request ──► validate ──► ResultCache ──(miss)──► enumerate ──► classify
//!                                                                  │
//!                          BranchingResult ◄── rank ◄── synthesize ◄┘
//! ```
//!
//! Everything below the cache is a pure function of the start state and the
//! loaded tables: same inputs, same output.

pub mod enumerate;
pub mod metrics;
pub mod narrative;
pub mod rank;
pub mod transition;

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::cache::{cache_key, ResultCache, WellFormed};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::hexagram::{canonical_name, HexagramTable, LinePosition};
use crate::logging::{log, obj, v_num, v_str, Domain, Level, ProfileScope};
use crate::state::State;
use crate::tables::{BaselineScoreTable, NarrativeTable};

use enumerate::{Pattern, PatternId, PATTERN_COUNT, STEPS};
use metrics::{classify, Metrics};
use narrative::{synthesize, Audience, NarrativeSources, StepText};
use rank::{rank, RankedPick};

/// Caller input: a hexagram identifier, a line number and an opaque context.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub hexagram: String,
    pub line: i64,
    pub context: String,
}

impl Request {
    pub fn new(hexagram: impl Into<String>, line: i64, context: impl Into<String>) -> Self {
        Self {
            hexagram: hexagram.into(),
            line,
            context: context.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternReport {
    #[serde(flatten)]
    pub pattern: Pattern,
    pub metrics: Metrics,
    pub narrative_chain: String,
    pub headline: String,
    pub narrative_authored: bool,
    pub step_texts: Vec<StepText>,
    pub audience: Audience,
    /// Situations the authored chain is written for, when it names them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suitability: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchingResult {
    pub start: State,
    pub patterns: Vec<PatternReport>,
    /// Pattern ids best first.
    pub order: Vec<PatternId>,
    pub top3: Vec<RankedPick>,
}

impl BranchingResult {
    pub fn pattern(&self, id: PatternId) -> Option<&PatternReport> {
        self.patterns.iter().find(|p| p.pattern.id == id)
    }

    /// Number of steps (plus starts) that carried a score forward.
    pub fn fallback_count(&self) -> usize {
        self.patterns
            .iter()
            .map(|p| {
                p.pattern.steps.iter().filter(|s| s.used_fallback).count()
                    + usize::from(p.pattern.start_used_fallback)
            })
            .sum()
    }
}

impl WellFormed for BranchingResult {
    fn is_well_formed(&self) -> bool {
        let ids: HashSet<PatternId> = self.patterns.iter().map(|p| p.pattern.id).collect();
        let picks: HashSet<PatternId> = self.top3.iter().map(|p| p.pattern_id).collect();
        let roles: HashSet<_> = self.top3.iter().map(|p| p.role).collect();
        self.patterns.len() == PATTERN_COUNT
            && ids.len() == PATTERN_COUNT
            && self.order.len() == PATTERN_COUNT
            && self.patterns.iter().all(|p| {
                p.pattern.route.len() == STEPS + 1
                    && p.pattern.score_trajectory.len() == STEPS + 1
                    && p.pattern.route[0] == self.start
                    && !p.narrative_chain.trim().is_empty()
            })
            && self.top3.len() == 3
            && picks.len() == 3
            && roles.len() == 3
            && picks.is_subset(&ids)
    }
}

pub struct Engine {
    hexes: HexagramTable,
    baseline: BaselineScoreTable,
    narratives: NarrativeTable,
    config: EngineConfig,
}

impl Engine {
    pub fn new(
        hexes: HexagramTable,
        baseline: BaselineScoreTable,
        narratives: NarrativeTable,
        config: EngineConfig,
    ) -> Self {
        Self {
            hexes,
            baseline,
            narratives,
            config,
        }
    }

    /// Load every table named in `config`. The hexagram table defaults to the
    /// built-in King-Wen order; the others default to empty.
    pub fn from_config(config: EngineConfig) -> EngineResult<Self> {
        let paths = &config.tables;
        let hexes = match &paths.hexagrams {
            Some(path) => HexagramTable::load_json(path)?,
            None => HexagramTable::king_wen(),
        };
        let baseline = match &paths.baseline {
            Some(path) => BaselineScoreTable::load_json(path, &hexes)?,
            None => {
                log(
                    Level::Warn,
                    Domain::Table,
                    "baseline_missing",
                    obj(&[("msg", v_str("no baseline table configured; every score falls back"))]),
                );
                BaselineScoreTable::new()
            }
        };
        let narratives =
            NarrativeTable::load_json(paths.narratives.as_deref(), paths.chains.as_deref(), &hexes)?;
        log(
            Level::Info,
            Domain::System,
            "engine_ready",
            obj(&[
                ("hexagrams", v_num(hexes.len() as f64)),
                ("baseline_entries", v_num(baseline.len() as f64)),
                ("narratives", v_str(if narratives.is_empty() { "empty" } else { "loaded" })),
            ]),
        );
        Ok(Self::new(hexes, baseline, narratives, config))
    }

    pub fn hexagrams(&self) -> &HexagramTable {
        &self.hexes
    }

    pub fn baseline(&self) -> &BaselineScoreTable {
        &self.baseline
    }

    pub fn narratives(&self) -> &NarrativeTable {
        &self.narratives
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Resolve caller input to a start state, or fail before any work is done.
    pub fn validate(&self, hexagram: &str, line: i64) -> EngineResult<State> {
        let ident = canonical_name(hexagram.trim());
        if ident.is_empty() {
            return Err(EngineError::validation("hexagram", "empty identifier"));
        }
        let hex = self.hexes.resolve(&ident).ok_or_else(|| {
            EngineError::validation("hexagram", format!("unknown hexagram {:?}", hexagram))
        })?;
        let line = LinePosition::new(line).ok_or_else(|| {
            EngineError::validation("line", format!("line {} outside 1..6", line))
        })?;
        Ok(State::new(hex.clone(), line))
    }

    /// Run the full pipeline for one start state.
    pub fn compute(&self, start: &State) -> EngineResult<BranchingResult> {
        let _scope = ProfileScope::with_context("engine.compute", &[("state", v_str(&start.label()))]);

        let patterns = enumerate::enumerate(&self.hexes, &self.baseline, start, &self.config.thresholds)?;
        let sources = NarrativeSources {
            baseline: &self.baseline,
            narratives: &self.narratives,
            headline_max_chars: self.config.headline_max_chars,
        };

        let reports: Vec<PatternReport> = patterns
            .into_iter()
            .map(|pattern| {
                let metrics = classify(&pattern, &self.baseline, &self.config.thresholds);
                let chain = synthesize(&pattern, &sources);
                PatternReport {
                    pattern,
                    metrics,
                    narrative_chain: chain.text,
                    headline: chain.headline,
                    narrative_authored: chain.authored,
                    step_texts: chain.steps,
                    audience: chain.audience,
                    suitability: chain.suitability,
                }
            })
            .collect();

        let candidates: Vec<(PatternId, &Metrics)> =
            reports.iter().map(|r| (r.pattern.id, &r.metrics)).collect();
        let ranking = rank(&candidates)?;

        let result = BranchingResult {
            start: start.clone(),
            order: ranking.order,
            top3: ranking.top3,
            patterns: reports,
        };
        log(
            Level::Debug,
            Domain::Engine,
            "computed",
            obj(&[
                ("state", v_str(&start.label())),
                ("patterns", v_num(result.patterns.len() as f64)),
                ("fallbacks", v_num(result.fallback_count() as f64)),
            ]),
        );
        Ok(result)
    }

    /// Validate, then compute through `cache`.
    pub fn run(
        &self,
        request: &Request,
        cache: &ResultCache<BranchingResult>,
    ) -> EngineResult<Arc<BranchingResult>> {
        let start = self.validate(&request.hexagram, request.line)?;
        let key = cache_key(&start, &request.context);
        cache.get_or_compute(&key, || self.compute(&start))
    }

    /// A cache sized by this engine's configured TTL.
    pub fn new_cache(&self) -> ResultCache<BranchingResult> {
        ResultCache::new(self.config.cache_ttl_ms)
    }
}
