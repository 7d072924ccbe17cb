//! Single-step state transitions.
//!
//! `Advance` walks the line pointer upward; `Transform` flips the focused line.
//! The top line has a visited-once rule: the first `Advance` attempted there
//! holds position, later ones move to the King-Wen successor at line 1. The
//! attempt counter lives in a [`TopLineVisits`] value threaded through one
//! walk and never shared between walks.

use serde::Serialize;

use crate::error::{EngineError, EngineResult};
use crate::hexagram::{HexagramTable, LinePosition};
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::state::State;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Operator {
    Advance,
    Transform,
}

impl Operator {
    pub const ALL: [Operator; 2] = [Operator::Advance, Operator::Transform];

    pub fn code(self) -> char {
        match self {
            Operator::Advance => 'A',
            Operator::Transform => 'T',
        }
    }

    /// Accepts canonical `A`/`T` and the legacy `J`/`H` letters.
    pub fn from_code(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'A' | 'J' => Some(Operator::Advance),
            'T' | 'H' => Some(Operator::Transform),
            _ => None,
        }
    }
}

/// Qualitative nature of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ShiftKind {
    Continuation,
    Reframe,
    StructuralShift,
}

impl ShiftKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftKind::Continuation => "continuation",
            ShiftKind::Reframe => "reframe",
            ShiftKind::StructuralShift => "structural shift",
        }
    }
}

/// Advance attempts made on the top line during the current walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TopLineVisits(u8);

impl TopLineVisits {
    pub fn count(self) -> u8 {
        self.0
    }

    fn bump(self) -> Self {
        TopLineVisits(self.0.saturating_add(1))
    }
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub state: State,
    pub shift: ShiftKind,
    pub visits: TopLineVisits,
}

/// Apply `op` to `state`. The returned `visits` must be fed into the next
/// step of the same walk.
pub fn transition(
    table: &HexagramTable,
    state: &State,
    op: Operator,
    visits: TopLineVisits,
) -> EngineResult<Transition> {
    match op {
        Operator::Transform => {
            let flipped = state.hexagram.code.flip(state.line);
            let hexagram = table.by_code(flipped).ok_or_else(|| {
                EngineError::integrity(format!(
                    "no hexagram for code {} (flip of line {} in {})",
                    flipped, state.line, state.hexagram.name
                ))
            })?;
            Ok(Transition {
                state: State::new(hexagram.clone(), state.line),
                shift: ShiftKind::Reframe,
                visits,
            })
        }
        Operator::Advance => match state.line.next() {
            Some(line) => Ok(Transition {
                state: State::new(state.hexagram.clone(), line),
                shift: ShiftKind::Continuation,
                visits,
            }),
            None if visits.count() == 0 => Ok(Transition {
                state: state.clone(),
                shift: ShiftKind::Continuation,
                visits: visits.bump(),
            }),
            None => {
                let next = table.successor(&state.hexagram);
                log(
                    Level::Trace,
                    Domain::Transition,
                    "structural_shift",
                    obj(&[
                        ("from", v_str(&state.hexagram.name)),
                        ("to", v_str(&next.name)),
                    ]),
                );
                Ok(Transition {
                    state: State::new(next.clone(), LinePosition::BOTTOM),
                    shift: ShiftKind::StructuralShift,
                    visits: visits.bump(),
                })
            }
        },
    }
}
