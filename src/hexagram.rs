//! Hexagram table: 6-bit codes, King-Wen ordinals, names and line labels.
//!
//! Bit `i - 1` of a [`HexCode`] is line `i`, so line 1 is the bottom line and
//! line 6 the top. Code strings are written bottom line first.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::logging::{log, log_table_loaded, obj, v_str, Domain, Level};

/// Number of distinct 6-bit codes.
pub const CODE_SPACE: usize = 64;

/// King-Wen order, codes written bottom line first.
const KING_WEN: [(&str, &str); CODE_SPACE] = [
    ("乾為天", "111111"),
    ("坤為地", "000000"),
    ("水雷屯", "100010"),
    ("山水蒙", "010001"),
    ("水天需", "111010"),
    ("天水訟", "010111"),
    ("地水師", "010000"),
    ("水地比", "000010"),
    ("風天小畜", "111011"),
    ("天澤履", "110111"),
    ("地天泰", "111000"),
    ("天地否", "000111"),
    ("天火同人", "101111"),
    ("火天大有", "111101"),
    ("地山謙", "001000"),
    ("雷地豫", "000100"),
    ("澤雷随", "100110"),
    ("山風蠱", "011001"),
    ("地澤臨", "110000"),
    ("風地観", "000011"),
    ("火雷噬嗑", "100101"),
    ("山火賁", "101001"),
    ("山地剥", "000001"),
    ("地雷復", "100000"),
    ("天雷無妄", "100111"),
    ("山天大畜", "111001"),
    ("山雷頤", "100001"),
    ("澤風大過", "011110"),
    ("坎為水", "010010"),
    ("離為火", "101101"),
    ("澤山咸", "001110"),
    ("雷風恒", "011100"),
    ("天山遯", "001111"),
    ("雷天大壮", "111100"),
    ("火地晋", "000101"),
    ("地火明夷", "101000"),
    ("風火家人", "101011"),
    ("火澤睽", "110101"),
    ("水山蹇", "001010"),
    ("雷水解", "010100"),
    ("山澤損", "110001"),
    ("風雷益", "100011"),
    ("澤天夬", "111110"),
    ("天風姤", "011111"),
    ("澤地萃", "000110"),
    ("地風升", "011000"),
    ("澤水困", "010110"),
    ("水風井", "011010"),
    ("澤火革", "101110"),
    ("火風鼎", "011101"),
    ("震為雷", "100100"),
    ("艮為山", "001001"),
    ("風山漸", "001011"),
    ("雷澤帰妹", "110100"),
    ("雷火豊", "101100"),
    ("火山旅", "001101"),
    ("巽為風", "011011"),
    ("兌為澤", "110110"),
    ("風水渙", "010011"),
    ("水澤節", "110010"),
    ("風澤中孚", "110011"),
    ("雷山小過", "001100"),
    ("水火既済", "101010"),
    ("火水未済", "010101"),
];

/// Alternate glyphs folded to one spelling before any name comparison.
const GLYPH_VARIANTS: [(char, char); 5] = [
    ('澤', '沢'),
    ('觀', '観'),
    ('歸', '帰'),
    ('爲', '為'),
    ('隨', '随'),
];

/// Fold alternate glyphs and surrounding whitespace into the canonical key form.
pub fn canonical_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            GLYPH_VARIANTS
                .iter()
                .find(|(alt, _)| *alt == c)
                .map(|(_, canon)| *canon)
                .unwrap_or(c)
        })
        .collect()
}

// =============================================================================
// Codes and line positions
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HexCode(u8);

impl HexCode {
    pub fn new(bits: u8) -> Option<Self> {
        if (bits as usize) < CODE_SPACE {
            Some(HexCode(bits))
        } else {
            None
        }
    }

    /// Parse a bottom-first line string such as `"111000"`.
    pub fn from_lines(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() != 6 {
            return None;
        }
        let mut bits = 0u8;
        for (i, ch) in s.chars().enumerate() {
            match ch {
                '1' => bits |= 1 << i,
                '0' => {}
                _ => return None,
            }
        }
        Some(HexCode(bits))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_yang(self, line: LinePosition) -> bool {
        self.0 & line.mask() != 0
    }

    pub fn flip(self, line: LinePosition) -> HexCode {
        HexCode(self.0 ^ line.mask())
    }

    pub fn to_lines(self) -> String {
        (0..6)
            .map(|i| if self.0 & (1 << i) != 0 { '1' } else { '0' })
            .collect()
    }
}

impl fmt::Display for HexCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_lines())
    }
}

impl Serialize for HexCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_lines())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LinePosition(u8);

impl LinePosition {
    pub const BOTTOM: LinePosition = LinePosition(1);
    pub const TOP: LinePosition = LinePosition(6);

    pub fn new(n: i64) -> Option<Self> {
        if (1..=6).contains(&n) {
            Some(LinePosition(n as u8))
        } else {
            None
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_top(self) -> bool {
        self.0 == 6
    }

    /// Next line up, or `None` at the top.
    pub fn next(self) -> Option<LinePosition> {
        if self.is_top() {
            None
        } else {
            Some(LinePosition(self.0 + 1))
        }
    }

    fn mask(self) -> u8 {
        1 << (self.0 - 1)
    }
}

impl fmt::Display for LinePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

const LINE_NUMERALS: [char; 6] = ['初', '二', '三', '四', '五', '上'];

/// Traditional line label: 初九/初六 at the bottom, 上九/上六 at the top,
/// 九n/六n in between.
pub fn yao_label(code: HexCode, line: LinePosition) -> String {
    let polarity = if code.is_yang(line) { '九' } else { '六' };
    let numeral = LINE_NUMERALS[(line.get() - 1) as usize];
    match line.get() {
        1 | 6 => format!("{}{}", numeral, polarity),
        _ => format!("{}{}", polarity, numeral),
    }
}

/// Parse a traditional label or a plain digit into a line position.
///
/// The polarity glyph is not checked; 用九/用六 have no position and yield `None`.
pub fn parse_line_label(label: &str) -> Option<LinePosition> {
    let label = label.trim();
    if let Ok(n) = label.parse::<i64>() {
        return LinePosition::new(n);
    }
    if label.starts_with('用') {
        return None;
    }
    label
        .chars()
        .find_map(|c| LINE_NUMERALS.iter().position(|n| *n == c))
        .and_then(|idx| LinePosition::new(idx as i64 + 1))
}

// =============================================================================
// Hexagrams and the table
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hexagram {
    pub code: HexCode,
    pub ordinal: u8,
    pub name: String,
}

/// Row shape accepted by [`HexagramTable::load_json`].
#[derive(Debug, Clone, Deserialize)]
pub struct HexagramRecord {
    #[serde(alias = "name_jp")]
    pub name: String,
    #[serde(alias = "binary")]
    pub code: String,
    #[serde(default)]
    pub ordinal: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct HexagramTable {
    /// Index `ordinal - 1`.
    by_ordinal: Vec<Hexagram>,
    by_code: HashMap<HexCode, usize>,
    by_name: HashMap<String, usize>,
}

impl HexagramTable {
    /// The canonical 64-entry King-Wen table.
    pub fn king_wen() -> Self {
        let records = KING_WEN
            .iter()
            .enumerate()
            .map(|(i, (name, code))| HexagramRecord {
                name: name.to_string(),
                code: code.to_string(),
                ordinal: Some(i as u8 + 1),
            })
            .collect();
        match Self::from_records(records) {
            Ok(table) => table,
            // The built-in data is fixed; a failure here is a source edit error.
            Err(err) => unreachable!("built-in King-Wen table is invalid: {}", err),
        }
    }

    /// Build a table from records. Ordinals default to list position and must
    /// form `1..=N`; codes and names must be unique. The table need not cover
    /// all 64 codes, but lookups into missing codes will fail at transition time.
    pub fn from_records(records: Vec<HexagramRecord>) -> EngineResult<Self> {
        if records.is_empty() || records.len() > CODE_SPACE {
            return Err(EngineError::integrity(format!(
                "hexagram table must hold 1..={} records, got {}",
                CODE_SPACE,
                records.len()
            )));
        }

        let n = records.len();
        let mut slots: Vec<Option<Hexagram>> = vec![None; n];
        for (i, rec) in records.into_iter().enumerate() {
            let code = HexCode::from_lines(&rec.code).ok_or_else(|| {
                EngineError::integrity(format!("bad code {:?} for {}", rec.code, rec.name))
            })?;
            let ordinal = rec.ordinal.unwrap_or(i as u8 + 1);
            if ordinal == 0 || ordinal as usize > n {
                return Err(EngineError::integrity(format!(
                    "ordinal {} for {} outside 1..={}",
                    ordinal, rec.name, n
                )));
            }
            let slot = &mut slots[ordinal as usize - 1];
            if slot.is_some() {
                return Err(EngineError::integrity(format!("duplicate ordinal {}", ordinal)));
            }
            *slot = Some(Hexagram {
                code,
                ordinal,
                name: rec.name.trim().to_string(),
            });
        }

        let by_ordinal: Vec<Hexagram> = slots.into_iter().flatten().collect();
        let mut by_code = HashMap::with_capacity(n);
        let mut by_name = HashMap::with_capacity(n);
        for (idx, hex) in by_ordinal.iter().enumerate() {
            if by_code.insert(hex.code, idx).is_some() {
                return Err(EngineError::integrity(format!(
                    "duplicate code {} ({})",
                    hex.code, hex.name
                )));
            }
            if by_name.insert(canonical_name(&hex.name), idx).is_some() {
                return Err(EngineError::integrity(format!("duplicate name {}", hex.name)));
            }
        }

        Ok(Self {
            by_ordinal,
            by_code,
            by_name,
        })
    }

    pub fn load_json(path: &Path) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::TableLoad {
            path: path.display().to_string(),
            msg: e.to_string(),
        })?;
        let records: Vec<HexagramRecord> =
            serde_json::from_str(&text).map_err(|e| EngineError::TableLoad {
                path: path.display().to_string(),
                msg: e.to_string(),
            })?;
        let table = Self::from_records(records)?;
        log_table_loaded("hexagram", &path.display().to_string(), table.len(), 0);
        if !table.is_complete() {
            log(
                Level::Warn,
                Domain::Table,
                "hexagram_table_incomplete",
                obj(&[
                    ("path", v_str(&path.display().to_string())),
                    ("msg", v_str("table does not cover all 64 codes")),
                ]),
            );
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.by_ordinal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ordinal.is_empty()
    }

    /// True when every 6-bit code maps to a hexagram.
    pub fn is_complete(&self) -> bool {
        self.by_code.len() == CODE_SPACE
    }

    pub fn by_code(&self, code: HexCode) -> Option<&Hexagram> {
        self.by_code.get(&code).map(|&i| &self.by_ordinal[i])
    }

    pub fn by_ordinal(&self, ordinal: u8) -> Option<&Hexagram> {
        (ordinal as usize)
            .checked_sub(1)
            .and_then(|i| self.by_ordinal.get(i))
    }

    pub fn by_name(&self, name: &str) -> Option<&Hexagram> {
        self.by_name
            .get(&canonical_name(name))
            .map(|&i| &self.by_ordinal[i])
    }

    /// Resolve a caller-supplied identifier: a name, a King-Wen ordinal, or a
    /// bottom-first code string.
    pub fn resolve(&self, ident: &str) -> Option<&Hexagram> {
        let ident = ident.trim();
        if let Some(hex) = self.by_name(ident) {
            return Some(hex);
        }
        if ident.len() == 6 {
            if let Some(code) = HexCode::from_lines(ident) {
                return self.by_code(code);
            }
        }
        ident.parse::<u8>().ok().and_then(|n| self.by_ordinal(n))
    }

    /// King-Wen successor, wrapping from the last ordinal to the first.
    pub fn successor(&self, hex: &Hexagram) -> &Hexagram {
        let next = hex.ordinal as usize % self.by_ordinal.len();
        &self.by_ordinal[next]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Hexagram> {
        self.by_ordinal.iter()
    }
}
