//! Starting and intermediate states of a walk.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::hexagram::{yao_label, Hexagram, LinePosition};

/// Structured table key: `(hexagram ordinal, line)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    pub ordinal: u8,
    pub line: LinePosition,
}

/// A hexagram with the line currently in focus. Equality is by code and line.
#[derive(Debug, Clone)]
pub struct State {
    pub hexagram: Hexagram,
    pub line: LinePosition,
}

impl State {
    pub fn new(hexagram: Hexagram, line: LinePosition) -> Self {
        Self { hexagram, line }
    }

    pub fn key(&self) -> StateKey {
        StateKey {
            ordinal: self.hexagram.ordinal,
            line: self.line,
        }
    }

    pub fn yao_label(&self) -> String {
        yao_label(self.hexagram.code, self.line)
    }

    /// `"地天泰 六五"`
    pub fn label(&self) -> String {
        format!("{} {}", self.hexagram.name, self.yao_label())
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.hexagram.code == other.hexagram.code && self.line == other.line
    }
}

impl Eq for State {}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.hexagram.name, self.line)
    }
}

#[derive(Serialize)]
struct StateView<'a> {
    hexagram: &'a str,
    ordinal: u8,
    code: String,
    line: u8,
    label: String,
}

impl Serialize for State {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StateView {
            hexagram: &self.hexagram.name,
            ordinal: self.hexagram.ordinal,
            code: self.hexagram.code.to_lines(),
            line: self.line.get(),
            label: self.yao_label(),
        }
        .serialize(serializer)
    }
}
