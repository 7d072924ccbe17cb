//! Read-only lookup tables: baseline scores and authored narratives.
//!
//! Rows are keyed by [`StateKey`]. Hexagram names, alternate glyphs and line
//! labels are resolved once while loading, so lookups never touch strings.
//! Malformed rows are skipped and counted rather than failing the load.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::engine::enumerate::PatternId;
use crate::error::{EngineError, EngineResult};
use crate::hexagram::{parse_line_label, HexagramTable, LinePosition};
use crate::logging::{log, log_table_loaded, obj, v_str, Domain, Level};
use crate::state::{State, StateKey};

// =============================================================================
// Baseline score table
// =============================================================================

/// Numeric baseline and auxiliary indicators for one (hexagram, line).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BaselineEntry {
    pub score: Option<f64>,
    pub volatility: Option<f64>,
    pub risk: Option<f64>,
    pub stance: Option<Stance>,
    pub stability: Option<f64>,
    pub potential: Option<f64>,
    pub keywords: Vec<String>,
    pub summary: Option<String>,
}

impl BaselineEntry {
    pub fn with_score(score: f64) -> Self {
        Self {
            score: Some(score),
            ..Default::default()
        }
    }

    /// `stability 60`, `volatility 30`, `potential 75`, for whichever are present.
    pub fn indicators(&self) -> Vec<String> {
        [
            ("stability", self.stability),
            ("volatility", self.volatility),
            ("potential", self.potential),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.filter(|v| v.is_finite()).map(|v| format!("{} {}", name, v)))
        .collect()
    }
}

/// Recommended stance: exports carry either a numeric level or a word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stance {
    Level(f64),
    Label(String),
}

impl fmt::Display for Stance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stance::Level(v) => write!(f, "{}", v),
            Stance::Label(s) => f.write_str(s.trim()),
        }
    }
}

/// Auxiliary columns: a value of the wrong shape reads as absent instead of
/// costing the row its score.
fn lenient<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Value::deserialize(de)?;
    Ok(serde_json::from_value(raw).ok())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum HexRef {
    Ordinal(u8),
    Name(String),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum LineRef {
    Number(i64),
    Label(String),
}

/// One row as exported; both English and original column names are accepted.
#[derive(Debug, Clone, Deserialize)]
struct BaselineRow {
    #[serde(default, alias = "卦名")]
    hexagram: Option<HexRef>,
    #[serde(default, alias = "卦番号")]
    ordinal: Option<u8>,
    #[serde(alias = "爻")]
    line: LineRef,
    #[serde(default, alias = "S1_基本スコア")]
    score: Option<f64>,
    #[serde(default, alias = "S2_ポテンシャル", deserialize_with = "lenient")]
    potential: Option<f64>,
    #[serde(default, alias = "S3_安定性スコア", deserialize_with = "lenient")]
    stability: Option<f64>,
    #[serde(default, alias = "S4_リスク", deserialize_with = "lenient")]
    risk: Option<f64>,
    #[serde(default, alias = "S5_主体性推奨スタンス", deserialize_with = "lenient")]
    stance: Option<Stance>,
    #[serde(default, alias = "S6_変動性スコア", deserialize_with = "lenient")]
    volatility: Option<f64>,
    #[serde(default, alias = "キーワード", deserialize_with = "lenient")]
    keywords: Option<Vec<String>>,
    #[serde(default, alias = "現代解釈の要約", deserialize_with = "lenient")]
    summary: Option<String>,
}

impl BaselineRow {
    fn key(&self, hexes: &HexagramTable) -> Option<StateKey> {
        let hexagram = match (&self.hexagram, self.ordinal) {
            (Some(HexRef::Name(name)), _) => hexes.resolve(name),
            (Some(HexRef::Ordinal(n)), _) => hexes.by_ordinal(*n),
            (None, Some(n)) => hexes.by_ordinal(n),
            (None, None) => None,
        }?;
        let line = match &self.line {
            LineRef::Number(n) => LinePosition::new(*n),
            LineRef::Label(label) => parse_line_label(label),
        }?;
        Some(StateKey {
            ordinal: hexagram.ordinal,
            line,
        })
    }

    fn into_entry(self) -> BaselineEntry {
        BaselineEntry {
            score: self.score,
            volatility: self.volatility,
            risk: self.risk,
            stance: self.stance.filter(|s| match s {
                Stance::Level(v) => v.is_finite(),
                Stance::Label(l) => !l.trim().is_empty(),
            }),
            stability: self.stability,
            potential: self.potential,
            keywords: self.keywords.unwrap_or_default(),
            summary: self.summary.filter(|s| !s.trim().is_empty()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BaselineScoreTable {
    entries: HashMap<StateKey, BaselineEntry>,
}

impl BaselineScoreTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON array of rows. Returns the table and the number of rows skipped.
    pub fn from_json_str(text: &str, hexes: &HexagramTable) -> EngineResult<(Self, usize)> {
        let rows: Vec<Value> = serde_json::from_str(text).map_err(|e| EngineError::TableLoad {
            path: "<inline>".to_string(),
            msg: e.to_string(),
        })?;
        let mut table = Self::new();
        let mut skipped = 0;
        for raw in rows {
            let parsed = serde_json::from_value::<BaselineRow>(raw)
                .ok()
                .and_then(|row| row.key(hexes).map(|key| (key, row)));
            match parsed {
                Some((key, row)) => table.insert(key, row.into_entry()),
                None => skipped += 1,
            }
        }
        Ok((table, skipped))
    }

    pub fn load_json(path: &Path, hexes: &HexagramTable) -> EngineResult<Self> {
        let text = read_table(path)?;
        let (table, skipped) = Self::from_json_str(&text, hexes).map_err(|e| match e {
            EngineError::TableLoad { msg, .. } => EngineError::TableLoad {
                path: path.display().to_string(),
                msg,
            },
            other => other,
        })?;
        log_table_loaded("baseline", &path.display().to_string(), table.len(), skipped);
        Ok(table)
    }

    pub fn insert(&mut self, key: StateKey, entry: BaselineEntry) {
        self.entries.insert(key, entry);
    }

    pub fn remove(&mut self, key: &StateKey) -> Option<BaselineEntry> {
        self.entries.remove(key)
    }

    pub fn get(&self, key: &StateKey) -> Option<&BaselineEntry> {
        self.entries.get(key)
    }

    pub fn entry(&self, state: &State) -> Option<&BaselineEntry> {
        self.entries.get(&state.key())
    }

    /// Baseline score for a state; non-finite values count as missing.
    pub fn score(&self, state: &State) -> Option<f64> {
        self.entry(state)
            .and_then(|e| e.score)
            .filter(|s| s.is_finite())
    }

    pub fn keys(&self) -> impl Iterator<Item = &StateKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Narrative source table
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StateNarrative {
    #[serde(default)]
    pub short: Option<String>,
    #[serde(default)]
    pub long: Option<String>,
}

impl StateNarrative {
    /// Long form preferred; blank strings count as absent.
    pub fn text(&self) -> Option<&str> {
        self.long
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| self.short.as_deref().filter(|s| !s.trim().is_empty()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChainNarrative {
    #[serde(alias = "chain_long")]
    pub chain: String,
    #[serde(default)]
    pub suitability: Option<String>,
}

/// Authored text; may be empty, the synthesizer falls back without it.
#[derive(Debug, Clone, Default)]
pub struct NarrativeTable {
    states: HashMap<StateKey, StateNarrative>,
    chains: HashMap<(StateKey, PatternId), ChainNarrative>,
}

/// Parse `"地天泰 六五"` or `"11 5"` into a key.
pub fn parse_state_key(text: &str, hexes: &HexagramTable) -> Option<StateKey> {
    let text = text.trim();
    let (hex_part, line_part) = text.rsplit_once(char::is_whitespace)?;
    let hexagram = hexes.resolve(hex_part)?;
    let line = parse_line_label(line_part)?;
    Some(StateKey {
        ordinal: hexagram.ordinal,
        line,
    })
}

/// Parse `"地天泰 六五 | AAT"`.
fn parse_chain_key(text: &str, hexes: &HexagramTable) -> Option<(StateKey, PatternId)> {
    let (state_part, pattern_part) = text.split_once('|')?;
    Some((
        parse_state_key(state_part, hexes)?,
        PatternId::parse(pattern_part.trim())?,
    ))
}

impl NarrativeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_state(&mut self, key: StateKey, narrative: StateNarrative) {
        self.states.insert(key, narrative);
    }

    pub fn insert_chain(&mut self, key: StateKey, pattern: PatternId, narrative: ChainNarrative) {
        self.chains.insert((key, pattern), narrative);
    }

    pub fn state(&self, key: &StateKey) -> Option<&StateNarrative> {
        self.states.get(key)
    }

    pub fn chain(&self, key: &StateKey, pattern: PatternId) -> Option<&ChainNarrative> {
        self.chains
            .get(&(*key, pattern))
            .filter(|c| !c.chain.trim().is_empty())
    }

    /// Merge a JSON object of per-state narratives. Returns rows skipped.
    pub fn merge_states_json(&mut self, text: &str, hexes: &HexagramTable) -> EngineResult<usize> {
        let map = parse_object(text)?;
        let mut skipped = 0;
        for (k, v) in map {
            let parsed = parse_state_key(&k, hexes)
                .zip(serde_json::from_value::<StateNarrative>(v).ok());
            match parsed {
                Some((key, narrative)) => self.insert_state(key, narrative),
                None => skipped += 1,
            }
        }
        Ok(skipped)
    }

    /// Merge a JSON object of chain narratives. Returns rows skipped.
    pub fn merge_chains_json(&mut self, text: &str, hexes: &HexagramTable) -> EngineResult<usize> {
        let map = parse_object(text)?;
        let mut skipped = 0;
        for (k, v) in map {
            let parsed = parse_chain_key(&k, hexes)
                .zip(serde_json::from_value::<ChainNarrative>(v).ok());
            match parsed {
                Some(((key, pattern), narrative)) => self.insert_chain(key, pattern, narrative),
                None => skipped += 1,
            }
        }
        Ok(skipped)
    }

    /// Load from optional per-state and per-chain files.
    pub fn load_json(
        states_path: Option<&Path>,
        chains_path: Option<&Path>,
        hexes: &HexagramTable,
    ) -> EngineResult<Self> {
        let mut table = Self::new();
        if let Some(path) = states_path {
            let skipped = table
                .merge_states_json(&read_table(path)?, hexes)
                .map_err(|e| with_path(e, path))?;
            log_table_loaded("narrative_states", &path.display().to_string(), table.states.len(), skipped);
        }
        if let Some(path) = chains_path {
            let skipped = table
                .merge_chains_json(&read_table(path)?, hexes)
                .map_err(|e| with_path(e, path))?;
            log_table_loaded("narrative_chains", &path.display().to_string(), table.chains.len(), skipped);
        }
        if table.is_empty() {
            log(
                Level::Debug,
                Domain::Table,
                "narrative_table_empty",
                obj(&[("msg", v_str("no authored narratives; using synthesized text"))]),
            );
        }
        Ok(table)
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty() && self.chains.is_empty()
    }
}

fn parse_object(text: &str) -> EngineResult<serde_json::Map<String, Value>> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(EngineError::TableLoad {
            path: "<inline>".to_string(),
            msg: "expected a JSON object keyed by state".to_string(),
        }),
        Err(e) => Err(EngineError::TableLoad {
            path: "<inline>".to_string(),
            msg: e.to_string(),
        }),
    }
}

fn read_table(path: &Path) -> EngineResult<String> {
    std::fs::read_to_string(path).map_err(|e| EngineError::TableLoad {
        path: path.display().to_string(),
        msg: e.to_string(),
    })
}

fn with_path(err: EngineError, path: &Path) -> EngineError {
    match err {
        EngineError::TableLoad { msg, .. } => EngineError::TableLoad {
            path: path.display().to_string(),
            msg,
        },
        other => other,
    }
}
