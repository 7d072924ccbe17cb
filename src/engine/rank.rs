//! Ordering of the eight patterns and the Attack / Defense / Balance picks.

use std::cmp::Ordering;

use serde::Serialize;

use super::enumerate::PatternId;
use super::metrics::{delta_word, Metrics};
use crate::error::{EngineError, EngineResult};
use crate::logging::{log, obj, v_str, Domain, Level};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Role {
    Attack,
    Defense,
    Balance,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Attack => "Attack",
            Role::Defense => "Defense",
            Role::Balance => "Balance",
        }
    }

    fn summary(&self) -> &'static str {
        match self {
            Role::Attack => "Pushes hardest for gains; the largest expected lift.",
            Role::Defense => "Keeps risk and load lowest; protects what already works.",
            Role::Balance => "Trades some upside for steadier footing.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedPick {
    pub role: Role,
    pub pattern_id: PatternId,
    pub summary: String,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Ranking {
    /// Every pattern id, best first.
    pub order: Vec<PatternId>,
    /// Attack, Defense, Balance; always three distinct ids.
    pub top3: Vec<RankedPick>,
}

/// Effect delta descending, then risk level ascending, then load level
/// ascending. Full ties keep input order.
pub fn compare(a: &Metrics, b: &Metrics) -> Ordering {
    b.effect_delta
        .total_cmp(&a.effect_delta)
        .then(a.risk_level.cmp(&b.risk_level))
        .then(a.load_level.cmp(&b.load_level))
}

fn attack_score(m: &Metrics) -> f64 {
    m.effect_level.rank() as f64 * 100.0 + m.effect_delta
}

fn defense_score(m: &Metrics) -> u32 {
    m.risk_level.rank() as u32 * 10 + m.load_level.rank() as u32
}

pub fn rank(candidates: &[(PatternId, &Metrics)]) -> EngineResult<Ranking> {
    if candidates.len() < 3 {
        return Err(EngineError::integrity(format!(
            "ranking needs at least 3 patterns, got {}",
            candidates.len()
        )));
    }

    let mut sorted: Vec<(PatternId, &Metrics)> = candidates.to_vec();
    sorted.sort_by(|a, b| compare(a.1, b.1));

    // Roles are drawn from the three best patterns only; earliest wins ties.
    let finalists = &sorted[..3];
    let mut attack = 0;
    for (i, (_, m)) in finalists.iter().enumerate() {
        if attack_score(m) > attack_score(finalists[attack].1) {
            attack = i;
        }
    }

    let mut defense: Option<usize> = None;
    for (i, (_, m)) in finalists.iter().enumerate() {
        if i == attack {
            continue;
        }
        match defense {
            Some(d) if defense_score(m) >= defense_score(finalists[d].1) => {}
            _ => defense = Some(i),
        }
    }
    let defense = defense.ok_or_else(|| EngineError::integrity("no defense candidate"))?;

    let balance = (0..finalists.len())
        .find(|i| *i != attack && *i != defense)
        .ok_or_else(|| EngineError::integrity("no balance candidate"))?;

    let top3: Vec<RankedPick> = [(Role::Attack, attack), (Role::Defense, defense), (Role::Balance, balance)]
        .into_iter()
        .map(|(role, i)| pick(role, finalists[i].0, finalists[i].1))
        .collect();

    log(
        Level::Debug,
        Domain::Rank,
        "roles_assigned",
        obj(&[
            ("attack", v_str(&top3[0].pattern_id.to_string())),
            ("defense", v_str(&top3[1].pattern_id.to_string())),
            ("balance", v_str(&top3[2].pattern_id.to_string())),
        ]),
    );

    Ok(Ranking {
        order: sorted.iter().map(|(id, _)| *id).collect(),
        top3,
    })
}

fn pick(role: Role, pattern_id: PatternId, m: &Metrics) -> RankedPick {
    RankedPick {
        role,
        pattern_id,
        summary: role.summary().to_string(),
        reasons: reasons(m),
    }
}

/// One line each for effect, load and risk.
pub fn reasons(m: &Metrics) -> Vec<String> {
    vec![
        format!(
            "effect {} ({:+.1}, {})",
            m.effect_level.word(),
            m.effect_delta,
            delta_word(m.effect_delta)
        ),
        format!("load {} ({:.2})", m.load_level.word(), m.load_score),
        format!("risk {} (peak {:.1})", m.risk_level.word(), m.risk_peak),
    ]
}
