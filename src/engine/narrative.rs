//! Narrative synthesis for a pattern.
//!
//! An authored chain for `(start, pattern)` wins outright. Otherwise each step
//! is resolved through [`STEP_RESOLVERS`] in order, with a templated sentence
//! as the last resort, so the result is never blank.

use std::collections::HashSet;

use serde::Serialize;

use super::enumerate::{Pattern, StepDetail};
use super::transition::{Operator, ShiftKind};
use crate::logging::{log, obj, v_str, Domain, Level};
use crate::tables::{BaselineScoreTable, NarrativeTable};

/// Where a step's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TextSource {
    AuthoredState,
    BaselineFields,
    Template,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepText {
    pub text: String,
    pub source: TextSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Audience {
    pub fits: String,
    pub avoid: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrativeChain {
    pub text: String,
    pub headline: String,
    /// True when an authored chain was used verbatim.
    pub authored: bool,
    /// Empty when `authored`.
    pub steps: Vec<StepText>,
    pub audience: Audience,
    /// Suitable situations from an authored chain.
    pub suitability: Option<String>,
}

/// Tables and limits the synthesizer reads from.
#[derive(Debug, Clone, Copy)]
pub struct NarrativeSources<'a> {
    pub baseline: &'a BaselineScoreTable,
    pub narratives: &'a NarrativeTable,
    pub headline_max_chars: usize,
}

pub type StepResolver = fn(&NarrativeSources<'_>, &StepDetail) -> Option<String>;

/// Tried in order; the first `Some` wins.
pub const STEP_RESOLVERS: [(TextSource, StepResolver); 2] = [
    (TextSource::AuthoredState, authored_state_text),
    (TextSource::BaselineFields, baseline_fields_text),
];

pub fn synthesize(pattern: &Pattern, sources: &NarrativeSources<'_>) -> NarrativeChain {
    let audience = audience_for(pattern);
    let names = format!(
        "{}→{}",
        pattern.start().hexagram.name,
        pattern.final_state().hexagram.name
    );

    if let Some(authored) = sources.narratives.chain(&pattern.start().key(), pattern.id) {
        let headline = truncate(
            &format!("{}: {}", names, first_sentence(&authored.chain)),
            sources.headline_max_chars,
        );
        return NarrativeChain {
            text: authored.chain.clone(),
            headline,
            authored: true,
            steps: Vec::new(),
            audience,
            suitability: authored
                .suitability
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        };
    }

    let steps: Vec<StepText> = pattern.steps.iter().map(|s| resolve_step(sources, pattern, s)).collect();

    let mut seen = HashSet::new();
    let mut parts = Vec::with_capacity(steps.len() + 1);
    for (detail, step) in pattern.steps.iter().zip(&steps) {
        let body = strip_leading_connector(&step.text);
        if body.is_empty() || !seen.insert(body.to_string()) {
            continue;
        }
        parts.push(format!(
            "{}{}",
            connector(detail.shift, detail.index),
            ensure_period(&lower_first(body))
        ));
    }
    parts.push(closing(pattern));

    let lead = steps
        .iter()
        .find(|s| s.source != TextSource::Template)
        .or_else(|| steps.first())
        .map(|s| first_sentence(strip_leading_connector(&s.text)))
        .unwrap_or_default();
    let headline = truncate(&format!("{}: {}", names, lead), sources.headline_max_chars);

    NarrativeChain {
        text: parts.join(" "),
        headline,
        authored: false,
        steps,
        audience,
        suitability: None,
    }
}

fn resolve_step(sources: &NarrativeSources<'_>, pattern: &Pattern, step: &StepDetail) -> StepText {
    for (source, resolver) in STEP_RESOLVERS {
        if let Some(text) = resolver(sources, step) {
            return StepText { text, source };
        }
    }
    log(
        Level::Debug,
        Domain::Narrative,
        "template_fallback",
        obj(&[
            ("pattern_id", v_str(&pattern.id.to_string())),
            ("state", v_str(&step.after.label())),
        ]),
    );
    StepText {
        text: template_text(step),
        source: TextSource::Template,
    }
}

fn authored_state_text(sources: &NarrativeSources<'_>, step: &StepDetail) -> Option<String> {
    sources
        .narratives
        .state(&step.after.key())
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
}

fn baseline_fields_text(sources: &NarrativeSources<'_>, step: &StepDetail) -> Option<String> {
    let entry = sources.baseline.entry(&step.after)?;
    let lead = entry
        .summary
        .as_deref()
        .map(first_sentence)
        .filter(|s| !s.is_empty())
        .or_else(|| {
            (!step.keywords_added.is_empty())
                .then(|| format!("{} come to the fore", step.keywords_added.join("・")))
        })
        .or_else(|| (!entry.keywords.is_empty()).then(|| format!("Work with {}", entry.keywords.join("・"))));

    let indicators = entry.indicators();
    // A hold step always reports its readings; elsewhere they only stand in.
    let reading = (!indicators.is_empty()).then(|| format!("Key indicators: {}", indicators.join(" / ")));
    match (lead, reading) {
        (Some(lead), Some(reading)) if step.before == step.after => {
            Some(format!("{} {}", ensure_period(&lead), reading))
        }
        (Some(lead), _) => Some(lead),
        (None, Some(reading)) => Some(reading),
        (None, None) => entry.stance.as_ref().map(|s| format!("Recommended stance: {}", s)),
    }
}

/// Built only from shift kind and state identifiers.
pub fn template_text(step: &StepDetail) -> String {
    let label = step.after.label();
    match step.shift {
        ShiftKind::Continuation if step.before == step.after => {
            format!("Hold at {} and refine what is already working", label)
        }
        ShiftKind::Continuation => {
            format!("Carry on into {}, deepening the current theme", label)
        }
        ShiftKind::Reframe => format!(
            "Change the approach at {}, reading line {} from another angle",
            label, step.after.line
        ),
        ShiftKind::StructuralShift => format!("Open a new chapter at {}", label),
    }
}

pub fn connector(shift: ShiftKind, index: usize) -> String {
    let lead = match (index, shift) {
        (1, _) => "First",
        (2, ShiftKind::Continuation) => "Next",
        (2, _) => "Then",
        _ => "Finally",
    };
    match shift {
        ShiftKind::Continuation => format!("{}, ", lead),
        ShiftKind::Reframe => format!("{}, shifting perspective, ", lead),
        ShiftKind::StructuralShift => format!("{}, as a new chapter opens, ", lead),
    }
}

fn closing(pattern: &Pattern) -> String {
    let (fits, caution) = if pattern.has_shift(ShiftKind::StructuralShift) {
        (
            "a turning point or a move into a new chapter",
            "line up the people involved and budget for transition load and risk",
        )
    } else if pattern.has_shift(ShiftKind::Reframe) {
        (
            "breaking through by switching viewpoint or operating style",
            "share intent and build agreement before the switch",
        )
    } else {
        (
            "steadily extending current strengths",
            "guard against complacency and rigidity while things are stable",
        )
    };
    format!("Best fits {}. Caution: {}.", fits, caution)
}

fn audience_for(pattern: &Pattern) -> Audience {
    let net = pattern.effect_delta();
    let has_transform = pattern.id.count(Operator::Transform) > 0;
    let (fits, avoid) = if net < 0.0 {
        (
            "those who first want to regroup and restore stability",
            "those who want to push hard right away",
        )
    } else if has_transform {
        (
            "those who want to switch once and grow while keeping load down",
            "those who prefer small gains on the current course",
        )
    } else {
        (
            "those who want to grow on the current course without adding load",
            "those aiming only for a big short-term pivot",
        )
    };
    Audience {
        fits: fits.to_string(),
        avoid: avoid.to_string(),
    }
}

// =============================================================================
// Text helpers
// =============================================================================

const LEADING_CONNECTORS: [&str; 10] = [
    "First,", "Next,", "Then,", "Finally,", "Meanwhile,", "まず、", "次に、", "そして、", "最後に、", "そこで、",
];

fn strip_leading_connector(text: &str) -> &str {
    let mut t = text.trim();
    for prefix in LEADING_CONNECTORS {
        if let Some(rest) = t.strip_prefix(prefix) {
            t = rest.trim_start();
            break;
        }
    }
    t
}

/// Text up to and including the first sentence terminator.
pub fn first_sentence(text: &str) -> String {
    let t = text.trim();
    let mut chars = t.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let end = match c {
            '。' | '！' | '？' => true,
            '.' | '!' | '?' => chars.peek().map_or(true, |(_, n)| n.is_whitespace()),
            _ => false,
        };
        if end {
            return t[..i + c.len_utf8()].to_string();
        }
    }
    t.to_string()
}

fn ensure_period(text: &str) -> String {
    let t = text.trim();
    match t.chars().last() {
        None => String::new(),
        Some('。' | '.' | '!' | '?' | '！' | '？') => t.to_string(),
        Some(c) if c.is_ascii() => format!("{}.", t),
        Some(_) => format!("{}。", t),
    }
}

/// Lowercase a leading ASCII capital so the text reads after a connector.
fn lower_first(text: &str) -> String {
    let mut chars = text.chars();
    match (chars.next(), chars.clone().next()) {
        (Some(c), Some(n)) if c.is_ascii_uppercase() && !n.is_ascii_uppercase() => {
            format!("{}{}", c.to_ascii_lowercase(), chars.as_str())
        }
        _ => text.to_string(),
    }
}

/// Truncate to `max` characters, marking the cut with an ellipsis.
pub fn truncate(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max || max == 0 {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", kept.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::enumerate::{walk, PatternId};
    use crate::hexagram::{HexagramTable, LinePosition};
    use crate::state::State;
    use crate::tables::{BaselineEntry, ChainNarrative, Stance, StateNarrative};

    fn state(hexes: &HexagramTable, name: &str, line: i64) -> State {
        State::new(
            hexes.by_name(name).unwrap().clone(),
            LinePosition::new(line).unwrap(),
        )
    }

    fn sources<'a>(b: &'a BaselineScoreTable, n: &'a NarrativeTable) -> NarrativeSources<'a> {
        NarrativeSources {
            baseline: b,
            narratives: n,
            headline_max_chars: 60,
        }
    }

    #[test]
    fn test_empty_tables_still_produce_text() {
        let hexes = HexagramTable::king_wen();
        let baseline = BaselineScoreTable::new();
        let narratives = NarrativeTable::new();
        let start = state(&hexes, "地天泰", 5);
        for id in PatternId::all() {
            let p = walk(&hexes, &baseline, &start, id).unwrap();
            let chain = synthesize(&p, &sources(&baseline, &narratives));
            assert!(!chain.text.trim().is_empty());
            assert!(!chain.headline.trim().is_empty());
            assert!(chain.steps.iter().all(|s| s.source == TextSource::Template));
            assert!(chain.text.starts_with("First, "));
        }
    }

    #[test]
    fn test_authored_chain_short_circuits() {
        let hexes = HexagramTable::king_wen();
        let baseline = BaselineScoreTable::new();
        let mut narratives = NarrativeTable::new();
        let start = state(&hexes, "地天泰", 5);
        let id = PatternId::parse("AAT").unwrap();
        narratives.insert_chain(start.key(), id, ChainNarrative {
            chain: "An authored path. It continues.".into(),
            suitability: Some(" when the team is ready ".into()),
        });
        let p = walk(&hexes, &baseline, &start, id).unwrap();
        let chain = synthesize(&p, &sources(&baseline, &narratives));
        assert!(chain.authored);
        assert_eq!(chain.text, "An authored path. It continues.");
        assert!(chain.headline.ends_with("An authored path."));
        assert!(chain.steps.is_empty());
        assert_eq!(chain.suitability.as_deref(), Some("when the team is ready"));
    }

    #[test]
    fn test_numeric_fields_alone_give_baseline_text() {
        let hexes = HexagramTable::king_wen();
        let mut baseline = BaselineScoreTable::new();
        let narratives = NarrativeTable::new();
        let start = state(&hexes, "地天泰", 5);
        baseline.insert(state(&hexes, "地天泰", 6).key(), BaselineEntry {
            stability: Some(40.0),
            potential: Some(80.0),
            ..BaselineEntry::with_score(50.0)
        });
        baseline.insert(state(&hexes, "天地否", 1).key(), BaselineEntry {
            stance: Some(Stance::Level(1.5)),
            ..BaselineEntry::with_score(30.0)
        });
        // AAA from line 5: (泰,6), hold at (泰,6), then (否,1)
        let p = walk(&hexes, &baseline, &start, PatternId::parse("AAA").unwrap()).unwrap();
        let chain = synthesize(&p, &sources(&baseline, &narratives));
        assert!(chain.steps.iter().all(|s| s.source == TextSource::BaselineFields));
        assert_eq!(chain.steps[0].text, "Key indicators: stability 40 / potential 80");
        assert_eq!(chain.steps[2].text, "Recommended stance: 1.5");
        assert!(chain.suitability.is_none());
    }

    #[test]
    fn test_hold_step_appends_indicators_to_summary() {
        let hexes = HexagramTable::king_wen();
        let mut baseline = BaselineScoreTable::new();
        let narratives = NarrativeTable::new();
        let start = state(&hexes, "地天泰", 5);
        baseline.insert(state(&hexes, "地天泰", 6).key(), BaselineEntry {
            summary: Some("Guard the walls".into()),
            volatility: Some(70.0),
            ..BaselineEntry::with_score(50.0)
        });
        let p = walk(&hexes, &baseline, &start, PatternId::parse("AAA").unwrap()).unwrap();
        let chain = synthesize(&p, &sources(&baseline, &narratives));
        assert_eq!(chain.steps[0].text, "Guard the walls");
        assert_eq!(chain.steps[1].text, "Guard the walls. Key indicators: volatility 70");
    }

    #[test]
    fn test_resolution_order_per_step() {
        let hexes = HexagramTable::king_wen();
        let mut baseline = BaselineScoreTable::new();
        let mut narratives = NarrativeTable::new();
        let start = state(&hexes, "地天泰", 4);
        // ATA from line 4: (泰,5), (需,5), (需,6)
        narratives.insert_state(state(&hexes, "地天泰", 5).key(), StateNarrative {
            short: Some("Share the gains fairly".into()),
            long: None,
        });
        baseline.insert(state(&hexes, "水天需", 5).key(), BaselineEntry {
            summary: Some("Wait with confidence. More detail here.".into()),
            ..BaselineEntry::with_score(60.0)
        });
        let p = walk(&hexes, &baseline, &start, PatternId::parse("ATA").unwrap()).unwrap();
        let chain = synthesize(&p, &sources(&baseline, &narratives));
        let kinds: Vec<_> = chain.steps.iter().map(|s| s.source).collect();
        assert_eq!(
            kinds,
            vec![TextSource::AuthoredState, TextSource::BaselineFields, TextSource::Template]
        );
        assert_eq!(chain.steps[1].text, "Wait with confidence.");
        assert!(chain.text.starts_with("First, share the gains fairly."));
        assert!(chain.text.contains("Then, shifting perspective, wait with confidence."));
        assert!(chain.headline.contains("Share the gains fairly"));
    }

    #[test]
    fn test_duplicate_step_text_elided() {
        let hexes = HexagramTable::king_wen();
        let baseline = BaselineScoreTable::new();
        let mut narratives = NarrativeTable::new();
        let start = state(&hexes, "地天泰", 5);
        // AAA from line 5 visits (泰,6) twice
        narratives.insert_state(state(&hexes, "地天泰", 6).key(), StateNarrative {
            short: None,
            long: Some("Guard against excess.".into()),
        });
        let p = walk(&hexes, &baseline, &start, PatternId::parse("AAA").unwrap()).unwrap();
        let chain = synthesize(&p, &sources(&baseline, &narratives));
        assert_eq!(chain.text.matches("uard against excess").count(), 1);
        assert!(chain.text.contains("as a new chapter opens"));
        assert!(chain.text.contains("Best fits a turning point"));
    }

    #[test]
    fn test_closing_by_shift_kind() {
        let hexes = HexagramTable::king_wen();
        let baseline = BaselineScoreTable::new();
        let narratives = NarrativeTable::new();
        let start = state(&hexes, "地天泰", 1);
        let steady = walk(&hexes, &baseline, &start, PatternId::parse("AAA").unwrap()).unwrap();
        let text = synthesize(&steady, &sources(&baseline, &narratives)).text;
        assert!(text.ends_with("Caution: guard against complacency and rigidity while things are stable."));
        let reframe = walk(&hexes, &baseline, &start, PatternId::parse("ATA").unwrap()).unwrap();
        let text = synthesize(&reframe, &sources(&baseline, &narratives)).text;
        assert!(text.contains("Best fits breaking through"));
    }

    #[test]
    fn test_connectors() {
        assert_eq!(connector(ShiftKind::Continuation, 1), "First, ");
        assert_eq!(connector(ShiftKind::Continuation, 2), "Next, ");
        assert_eq!(connector(ShiftKind::Reframe, 2), "Then, shifting perspective, ");
        assert_eq!(connector(ShiftKind::StructuralShift, 3), "Finally, as a new chapter opens, ");
    }

    #[test]
    fn test_first_sentence() {
        assert_eq!(first_sentence("安定を保つ。次へ進む。"), "安定を保つ。");
        assert_eq!(first_sentence("Keep going. Then stop."), "Keep going.");
        assert_eq!(first_sentence("v1.2 release notes"), "v1.2 release notes");
        assert_eq!(first_sentence("  "), "");
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!(truncate("地天泰→天地否", 20), "地天泰→天地否");
        assert_eq!(truncate("地天泰→天地否: 長い説明文", 8), "地天泰→天地否…");
        assert_eq!(truncate("abcdef", 4), "abc…");
    }

    #[test]
    fn test_strip_and_period_helpers() {
        assert_eq!(strip_leading_connector("Finally, rest"), "rest");
        assert_eq!(strip_leading_connector("まず、整える"), "整える");
        assert_eq!(ensure_period("整える"), "整える。");
        assert_eq!(ensure_period("rest"), "rest.");
        assert_eq!(ensure_period("done!"), "done!");
        assert_eq!(lower_first("Hold at X"), "hold at X");
        assert_eq!(lower_first("NASA plan"), "NASA plan");
    }
}
