//! Exhaustive enumeration of the eight three-step operator sequences.
//!
//! Each walk starts with a fresh [`TopLineVisits`] and a score trajectory
//! seeded from the start state's baseline. A step whose state has no baseline
//! score carries the previous score forward and is flagged.

use std::fmt;

use serde::{Serialize, Serializer};

use super::metrics::ClassifierThresholds;
use super::transition::{transition, Operator, ShiftKind, TopLineVisits};
use crate::error::{EngineError, EngineResult};
use crate::hexagram::HexagramTable;
use crate::logging::log_score_fallback;
use crate::state::State;
use crate::tables::{BaselineEntry, BaselineScoreTable};

pub const STEPS: usize = 3;
pub const PATTERN_COUNT: usize = 8;

/// One of the eight operator sequences, e.g. `AAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternId([Operator; STEPS]);

impl PatternId {
    pub fn new(ops: [Operator; STEPS]) -> Self {
        PatternId(ops)
    }

    /// All sequences in counting order, `Advance` before `Transform` at each position.
    pub fn all() -> [PatternId; PATTERN_COUNT] {
        let pick = |bit: usize| if bit == 0 { Operator::Advance } else { Operator::Transform };
        std::array::from_fn(|i| PatternId([pick((i >> 2) & 1), pick((i >> 1) & 1), pick(i & 1)]))
    }

    pub fn operators(&self) -> [Operator; STEPS] {
        self.0
    }

    pub fn count(&self, op: Operator) -> usize {
        self.0.iter().filter(|o| **o == op).count()
    }

    /// Parse `AAT`-style ids; the legacy `J`/`H` letters are accepted too.
    pub fn parse(text: &str) -> Option<Self> {
        let chars: Vec<char> = text.trim().chars().collect();
        if chars.len() != STEPS {
            return None;
        }
        let mut ops = [Operator::Advance; STEPS];
        for (slot, c) in ops.iter_mut().zip(chars) {
            *slot = Operator::from_code(c)?;
        }
        Some(PatternId(ops))
    }

    /// Descriptive name of the sequence itself.
    pub fn base_label(&self) -> &'static str {
        use Operator::{Advance as A, Transform as T};
        match self.0 {
            [A, A, A] => "Steady deepening",
            [A, A, T] => "Deepen twice, then reframe",
            [A, T, A] => "Deepen, reframe, deepen again",
            [A, T, T] => "Deepen, then reframe twice",
            [T, A, A] => "Reframe, then deepen twice",
            [T, A, T] => "Reframe, deepen, reframe again",
            [T, T, A] => "Reframe twice, then deepen",
            [T, T, T] => "Successive reframes",
        }
    }
}

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in self.0 {
            write!(f, "{}", op.code())?;
        }
        Ok(())
    }
}

impl Serialize for PatternId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepDetail {
    /// 1-based step number.
    pub index: usize,
    pub operator: Operator,
    pub before: State,
    pub after: State,
    pub score_before: f64,
    pub score_after: f64,
    pub score_delta: f64,
    pub shift: ShiftKind,
    pub summary: String,
    pub keywords_added: Vec<String>,
    pub keywords_removed: Vec<String>,
    /// Stability / volatility / potential of `after`; hold steps only.
    pub indicators: Vec<String>,
    /// Recommended stance and risk tendency of `after`.
    pub opportunities: Vec<String>,
    /// Diagnostic only: no baseline for `after`, score carried forward.
    #[serde(skip)]
    pub used_fallback: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Pattern {
    pub id: PatternId,
    pub label: String,
    /// Start plus the state after each step.
    pub route: Vec<State>,
    /// Aligned with `route`.
    pub score_trajectory: Vec<f64>,
    pub steps: Vec<StepDetail>,
    /// Diagnostic only: the start state had no baseline score.
    #[serde(skip)]
    pub start_used_fallback: bool,
}

impl Pattern {
    pub fn start(&self) -> &State {
        &self.route[0]
    }

    pub fn final_state(&self) -> &State {
        &self.route[self.route.len() - 1]
    }

    pub fn first_score(&self) -> f64 {
        self.score_trajectory[0]
    }

    pub fn last_score(&self) -> f64 {
        self.score_trajectory[self.score_trajectory.len() - 1]
    }

    pub fn effect_delta(&self) -> f64 {
        self.last_score() - self.first_score()
    }

    pub fn shift_count(&self, kind: ShiftKind) -> usize {
        self.steps.iter().filter(|s| s.shift == kind).count()
    }

    pub fn has_shift(&self, kind: ShiftKind) -> bool {
        self.shift_count(kind) > 0
    }

    /// Any step or the start fell back to a carried score.
    pub fn used_fallback(&self) -> bool {
        self.start_used_fallback || self.steps.iter().any(|s| s.used_fallback)
    }
}

/// Walk all eight sequences from `start`.
pub fn enumerate(
    hexes: &HexagramTable,
    baseline: &BaselineScoreTable,
    start: &State,
    thresholds: &ClassifierThresholds,
) -> EngineResult<Vec<Pattern>> {
    PatternId::all()
        .into_iter()
        .map(|id| walk_with(hexes, baseline, start, id, thresholds))
        .collect()
}

/// Walk one sequence from `start` with the default risk cut points.
pub fn walk(
    hexes: &HexagramTable,
    baseline: &BaselineScoreTable,
    start: &State,
    id: PatternId,
) -> EngineResult<Pattern> {
    walk_with(hexes, baseline, start, id, &ClassifierThresholds::default())
}

pub fn walk_with(
    hexes: &HexagramTable,
    baseline: &BaselineScoreTable,
    start: &State,
    id: PatternId,
    thresholds: &ClassifierThresholds,
) -> EngineResult<Pattern> {
    let (start_score, start_used_fallback) = match baseline.score(start) {
        Some(score) => (score, false),
        None => {
            log_score_fallback(&id.to_string(), &start.label(), 0, 0.0);
            (0.0, true)
        }
    };

    let mut route = Vec::with_capacity(STEPS + 1);
    let mut scores = Vec::with_capacity(STEPS + 1);
    let mut steps = Vec::with_capacity(STEPS);
    route.push(start.clone());
    scores.push(start_score);

    let mut current = start.clone();
    let mut current_score = start_score;
    let mut visits = TopLineVisits::default();

    for (i, op) in id.operators().into_iter().enumerate() {
        let next = transition(hexes, &current, op, visits)?;
        visits = next.visits;

        let (score, used_fallback) = match baseline.score(&next.state) {
            Some(score) => (score, false),
            None => {
                log_score_fallback(&id.to_string(), &next.state.label(), i + 1, current_score);
                (current_score, true)
            }
        };

        let (keywords_added, keywords_removed) = keyword_changes(baseline, &current, &next.state);
        let entry = baseline.entry(&next.state);
        let indicators = match entry {
            Some(e) if current == next.state => e.indicators(),
            _ => Vec::new(),
        };
        let opportunities = entry.map(|e| opportunities(e, thresholds)).unwrap_or_default();
        steps.push(StepDetail {
            index: i + 1,
            operator: op,
            summary: step_summary(&current, &next.state, next.shift),
            before: current.clone(),
            after: next.state.clone(),
            score_before: current_score,
            score_after: score,
            score_delta: score - current_score,
            shift: next.shift,
            keywords_added,
            keywords_removed,
            indicators,
            opportunities,
            used_fallback,
        });

        route.push(next.state.clone());
        scores.push(score);
        current = next.state;
        current_score = score;
    }

    if route.len() != STEPS + 1 {
        return Err(EngineError::integrity(format!(
            "walk {} produced {} states",
            id,
            route.len()
        )));
    }

    let label = pattern_label(id, start, &current);
    Ok(Pattern {
        id,
        label,
        route,
        score_trajectory: scores,
        steps,
        start_used_fallback,
    })
}

fn step_summary(before: &State, after: &State, shift: ShiftKind) -> String {
    if before == after {
        format!("{} (hold and refine)", after.label())
    } else {
        format!("{} → {} ({})", before.label(), after.label(), shift.as_str())
    }
}

fn opportunities(entry: &BaselineEntry, thresholds: &ClassifierThresholds) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(stance) = &entry.stance {
        out.push(format!("recommended stance: {}", stance));
    }
    if let Some(risk) = entry.risk.filter(|r| r.is_finite() && *r != 0.0) {
        out.push(format!("risk tendency: {}", thresholds.risk_level(risk.abs()).word()));
    }
    out
}

/// Keywords gained and lost between two states, in table order.
fn keyword_changes(
    baseline: &BaselineScoreTable,
    before: &State,
    after: &State,
) -> (Vec<String>, Vec<String>) {
    let empty = Vec::new();
    let b = baseline.entry(before).map(|e| &e.keywords).unwrap_or(&empty);
    let a = baseline.entry(after).map(|e| &e.keywords).unwrap_or(&empty);
    let added = a.iter().filter(|k| !b.contains(k)).cloned().collect();
    let removed = b.iter().filter(|k| !a.contains(k)).cloned().collect();
    (added, removed)
}

fn pattern_label(id: PatternId, start: &State, last: &State) -> String {
    let same_hexagram = start.hexagram.code == last.hexagram.code;
    let suffix = if same_hexagram && id.count(Operator::Transform) == 0 {
        "theme continues"
    } else if same_hexagram {
        "realigned"
    } else {
        "structural shift"
    };
    format!("{} ({})", id.base_label(), suffix)
}
