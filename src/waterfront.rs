//! Waterfront feature analysis over listing description text.
//!
//! A bank of measurement and keyword patterns scans the free text for
//! dock lengths, water frontage, seawall footage, slip counts, lift
//! capacity, depth, bridge clearance, and water-body keywords. Generic
//! footage mentions are disambiguated by the words around them; numbers
//! whose context says nothing land in the `any_length_ft` bucket rather
//! than being guessed into a category.
//!
//! Returns `None` when the text carries no waterfront signal at all, so
//! a missing feature record means "unknown", never "not waterfront".

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::models::{FeatureRecord, PropertyRecord};

static LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(dock\s+length|water\s+frontage|seawall|frontage|depth|bridge\s+clearance|canal\s+width)\s*:\s*(\d{2,4})",
    )
    .unwrap()
});

static DIMENSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{2,3})\s*'\s*[x×]\s*(\d{1,3})\s*'").unwrap());

static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{2,3})\s*(?:-|–|—|to)\s*(\d{2,3})\s*(?:'|ft\.?|feet)\b").unwrap()
});

static HYPHEN_FOOT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{2,3})\s*-\s*foot\b").unwrap());

// A number with a feet suffix, categorized later by surrounding context.
static FOOTAGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{2,3})\s*(?:'|ft\.?\b|feet\b|foot\b)").unwrap());

static SLIP_COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})\s+(?:boat\s+)?slips?\b").unwrap());

static MAX_LENGTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?:up\s*to|accommodates?|accommodated|fits?|for)\s+(\d{2,3})\s*(?:'|ft\.?|feet)\s*(?:boat|vessel|yacht)?",
    )
    .unwrap()
});

static LIFT_K_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,3})\s*k\s*(?:lb|pounds?)\b").unwrap());

static LIFT_LB_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{4,6})\s*(?:lb|pounds?)\b.{0,40}\blift\b").unwrap());

static DEPTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{1,2})\s*(?:'|ft\.?|feet)\s*(?:at\s*)?(?:mlw|mean\s+low\s+water|low\s+tide)\b")
        .unwrap()
});

static NO_FIXED_BRIDGES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bno\b.{0,6}\bfixed\s+bridges?\b").unwrap());

static BRIDGE_CLEARANCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{2,3})\s*(?:'|ft\.?|feet)\s*(?:bridge\s+clearance|clearance)\b").unwrap()
});

static CANAL_WIDTH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{2,3})\s*(?:'|ft\.?|feet)\s*(?:canal\s+width|wide\s+canal|canal\s+wide)\b")
        .unwrap()
});

static HAS_DOCK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bdock(?:age|s)?\b|\bt-?dock\b|\bu-?dock\b").unwrap());
static HAS_LIFT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:boat\s*)?lifts?\b").unwrap());
static HAS_RAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:boat|kayak|canoe)\s+ramps?\b").unwrap());

static DOCK_CONTEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bdock(?:age|s)?\b|\bt-?dock\b|\bu-?dock\b|\bslips?\b").unwrap());
static SEAWALL_CONTEXT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bseawall\b|\bbulkhead\b").unwrap());
static FRONTAGE_CONTEXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bwater\s*front(?:age)?\b|\bwaterfront\b|\bfrontage\b|\bwf\b").unwrap()
});

const WATER_TYPES: &[(&str, &str)] = &[
    ("intracoastal", r"(?i)\bintracoastal\b|\bicw\b"),
    ("bay", r"(?i)\bbay\b"),
    ("ocean", r"(?i)\bocean\b"),
    ("river", r"(?i)\briver\b"),
    ("canal", r"(?i)\bcanal\b"),
    ("lake", r"(?i)\blake\b"),
    ("gulf", r"(?i)\bgulf\b"),
    ("sound", r"(?i)\bsound\b"),
    ("lagoon", r"(?i)\blagoon\b"),
];

static WATER_TYPE_RES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    WATER_TYPES
        .iter()
        .map(|(name, pat)| (*name, Regex::new(pat).unwrap()))
        .collect()
});

pub struct WaterfrontAnalyzer;

impl WaterfrontAnalyzer {
    pub fn new() -> Self {
        Self
    }

    pub fn analyze(&self, record: &PropertyRecord) -> Option<FeatureRecord> {
        let text = record.raw_description.as_deref()?;
        if text.is_empty() {
            return None;
        }

        let mut features = FeatureRecord {
            external_id: record.external_id.clone().unwrap_or_default(),
            ..Default::default()
        };
        let mut notes = String::new();
        let mut signals: BTreeSet<&'static str> = BTreeSet::new();

        // Labeled forms are the most trustworthy, run them first.
        for caps in LABEL_RE.captures_iter(text) {
            let value: i64 = match caps[2].parse() {
                Ok(v) => v,
                Err(_) => continue,
            };
            let label = caps[1].to_lowercase();
            let (slot, name): (&mut Option<i64>, &str) = if label.starts_with("dock") {
                (&mut features.dock_length_ft, "dock_length")
            } else if label.starts_with("seawall") {
                (&mut features.seawall_length_ft, "seawall_length")
            } else if label.contains("frontage") {
                (&mut features.waterfront_length_ft, "waterfront_length")
            } else if label.starts_with("depth") {
                (&mut features.depth_ft, "depth")
            } else if label.starts_with("bridge") {
                (&mut features.bridge_clearance_ft, "bridge_clearance")
            } else {
                (&mut features.canal_width_ft, "canal_width")
            };
            if slot.is_none() {
                *slot = Some(value);
                signals.insert("label");
                let _ = writeln!(notes, "{name}={value} (label)");
            }
        }

        // Specific suffix patterns before the generic footage sweep.
        if let Some(caps) = DEPTH_RE.captures(text) {
            if features.depth_ft.is_none() {
                features.depth_ft = caps[1].parse().ok();
                signals.insert("depth");
                let _ = writeln!(notes, "depth={} (mlw)", &caps[1]);
            }
        }
        if let Some(caps) = BRIDGE_CLEARANCE_RE.captures(text) {
            if features.bridge_clearance_ft.is_none() {
                features.bridge_clearance_ft = caps[1].parse().ok();
                signals.insert("bridge");
                let _ = writeln!(notes, "bridge_clearance={}", &caps[1]);
            }
        }
        if let Some(caps) = CANAL_WIDTH_RE.captures(text) {
            if features.canal_width_ft.is_none() {
                features.canal_width_ft = caps[1].parse().ok();
                signals.insert("canal_width");
                let _ = writeln!(notes, "canal_width={}", &caps[1]);
            }
        }
        if let Some(caps) = SLIP_COUNT_RE.captures(text) {
            features.slip_count = caps[1].parse().ok();
            signals.insert("slips");
            let _ = writeln!(notes, "slip_count={}", &caps[1]);
        }
        if let Some(caps) = MAX_LENGTH_RE.captures(text) {
            features.max_vessel_length_ft = caps[1].parse().ok();
            signals.insert("vessel");
            let _ = writeln!(notes, "max_vessel_length={}", &caps[1]);
        }
        if let Some(caps) = LIFT_K_RE.captures(text) {
            features.lift_capacity_lbs = caps[1].parse::<i64>().ok().map(|k| k * 1000);
            signals.insert("lift");
            let _ = writeln!(notes, "lift_capacity={}k lb", &caps[1]);
        } else if let Some(caps) = LIFT_LB_RE.captures(text) {
            features.lift_capacity_lbs = caps[1].parse().ok();
            signals.insert("lift");
            let _ = writeln!(notes, "lift_capacity={} lb", &caps[1]);
        }
        if NO_FIXED_BRIDGES_RE.is_match(text) {
            features.no_fixed_bridges = Some(true);
            signals.insert("bridge");
            let _ = writeln!(notes, "no_fixed_bridges");
        }

        // Dimension blocks like 25'x135': the longer side is the frontage
        // candidate, attributed by context.
        if let Some(caps) = DIMENSION_RE.captures(text) {
            let a: i64 = caps[1].parse().unwrap_or(0);
            let b: i64 = caps[2].parse().unwrap_or(0);
            let longest = a.max(b);
            if longest > 0 {
                self.assign_by_context(text, caps.get(0).unwrap().start(), longest, &mut features, &mut signals, &mut notes, "dimension");
            }
        }

        // Ranges like "80-100 ft" contribute their mean.
        if let Some(caps) = RANGE_RE.captures(text) {
            let lo: i64 = caps[1].parse().unwrap_or(0);
            let hi: i64 = caps[2].parse().unwrap_or(0);
            if lo > 0 && hi >= lo {
                let mean = (lo + hi) / 2;
                self.assign_by_context(text, caps.get(0).unwrap().start(), mean, &mut features, &mut signals, &mut notes, "range");
            }
        }

        // Hyphenated adjectives ("70-foot dock") and the generic footage
        // sweep, both resolved by surrounding words.
        for caps in HYPHEN_FOOT_RE.captures_iter(text) {
            if let Ok(value) = caps[1].parse::<i64>() {
                self.assign_by_context(text, caps.get(0).unwrap().start(), value, &mut features, &mut signals, &mut notes, "hyphen");
            }
        }
        for caps in FOOTAGE_RE.captures_iter(text) {
            if let Ok(value) = caps[1].parse::<i64>() {
                self.assign_by_context(text, caps.get(0).unwrap().start(), value, &mut features, &mut signals, &mut notes, "footage");
            }
        }

        features.has_dock = HAS_DOCK_RE.is_match(text);
        features.has_lift = HAS_LIFT_RE.is_match(text);
        features.has_ramp = HAS_RAMP_RE.is_match(text);
        if features.has_dock {
            signals.insert("dock_kw");
        }
        if features.has_lift {
            signals.insert("lift");
        }

        let mut types: Vec<&str> = Vec::new();
        for (name, re) in WATER_TYPE_RES.iter() {
            if re.is_match(text) {
                types.push(name);
            }
        }
        if !types.is_empty() {
            signals.insert("water_type");
            features.water_type = Some(types.join(";"));
        }

        if signals.is_empty() {
            return None;
        }

        features.analysis_confidence = confidence(signals.len());
        features.analysis_notes = notes.trim_end().to_string();
        Some(features)
    }

    /// Attribute a footage value to a category based on the words within a
    /// small window around the match; unclassifiable values go to the
    /// ambiguous bucket.
    #[allow(clippy::too_many_arguments)]
    fn assign_by_context(
        &self,
        text: &str,
        at: usize,
        value: i64,
        features: &mut FeatureRecord,
        signals: &mut BTreeSet<&'static str>,
        notes: &mut String,
        origin: &str,
    ) {
        let window = context_window(text, at, 40);
        let (slot, name): (&mut Option<i64>, &str) = if DOCK_CONTEXT_RE.is_match(window) {
            (&mut features.dock_length_ft, "dock_length")
        } else if SEAWALL_CONTEXT_RE.is_match(window) {
            (&mut features.seawall_length_ft, "seawall_length")
        } else if FRONTAGE_CONTEXT_RE.is_match(window) {
            (&mut features.waterfront_length_ft, "waterfront_length")
        } else {
            (&mut features.any_length_ft, "any_length")
        };
        if slot.is_none() {
            *slot = Some(value);
            if name != "any_length" {
                signals.insert("footage");
            }
            let _ = writeln!(notes, "{name}={value} ({origin})");
        }
    }
}

impl Default for WaterfrontAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

/// Distinct corroborating signal categories mapped into [0, 1);
/// each additional category halves the remaining distance to 1.
fn confidence(signal_count: usize) -> f64 {
    1.0 - 0.5f64.powi(signal_count as i32)
}

/// A slice of `text` around byte offset `at`, widened by `pad` on each
/// side and snapped to char boundaries.
fn context_window(text: &str, at: usize, pad: usize) -> &str {
    let mut start = at.saturating_sub(pad);
    let mut end = (at + pad).min(text.len());
    while start > 0 && !text.is_char_boundary(start) {
        start -= 1;
    }
    while end < text.len() && !text.is_char_boundary(end) {
        end += 1;
    }
    &text[start..end]
}
