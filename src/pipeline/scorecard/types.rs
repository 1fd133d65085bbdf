use std::collections::BTreeSet;
use std::fmt;

use image::GrayImage;
use serde::{Deserialize, Serialize, Serializer};

use super::debug::DebugArtifact;
use crate::pipeline_config::{GolfRules, ValueRange};

// ═══════════════════════════════════════════════════════════
// Geometry
// ═══════════════════════════════════════════════════════════

/// Axis-aligned pixel region in normalized-image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Four corners in clockwise order from top-left.
pub type Quad = [(f32, f32); 4];

/// Every correction the normalizer applied, in application order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppliedTransform {
    /// EXIF orientation tag honoured at decode (1 = none).
    pub exif_orientation: u32,
    /// Scale applied to bring the longer side within bounds (1.0 = none).
    pub downscale: f32,
    /// Card region cut out of a darker surround.
    pub card: Option<Region>,
    pub illumination_corrected: bool,
    pub deskew_degrees: f32,
    /// Source quadrilateral warped onto the rectified frame.
    pub perspective: Option<Quad>,
    pub crop: Option<Region>,
    /// Clockwise quarter turns applied by the grid orientation heuristic.
    pub quarter_turns: u8,
    /// Resize bringing the median row to the working height (1.0 = none).
    pub scale: f32,
}

impl Default for AppliedTransform {
    fn default() -> Self {
        Self {
            exif_orientation: 1,
            downscale: 1.0,
            card: None,
            illumination_corrected: false,
            deskew_degrees: 0.0,
            perspective: None,
            crop: None,
            quarter_turns: 0,
            scale: 1.0,
        }
    }
}

/// Corrected grayscale page ready for layout detection.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub image: GrayImage,
    /// Pixels at or below this value are ink.
    pub ink_threshold: u8,
    pub transform: AppliedTransform,
}

// ═══════════════════════════════════════════════════════════
// Layout
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayoutTemplate {
    Known {
        id: String,
        expected_columns: usize,
        expected_rows: usize,
    },
    GenericGrid {
        detected_rows: usize,
        detected_columns: usize,
    },
}

impl LayoutTemplate {
    pub fn is_generic(&self) -> bool {
        matches!(self, LayoutTemplate::GenericGrid { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowRole {
    Header,
    Par,
    Player,
    /// Per-hole distance from a tee.
    Yardage,
    /// Per-hole stroke index.
    Handicap,
    /// Tee names and similar rows with nothing to record.
    Info,
    Unassigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    Label,
    Hole(u32),
    Out,
    In,
    Total,
    Unassigned,
}

/// Characters a cell may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Charset {
    Digits,
    Alphanumeric,
}

impl Charset {
    pub fn chars(self) -> &'static str {
        match self {
            Charset::Digits => "0123456789",
            Charset::Alphanumeric => "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellKind {
    Label,
    Header,
    Par,
    Stroke,
    Total,
    Subtotal,
    /// Numeric cell of a generic grid whose meaning is not yet known.
    Value,
}

impl CellKind {
    pub fn charset(self) -> Charset {
        match self {
            CellKind::Label | CellKind::Header => Charset::Alphanumeric,
            _ => Charset::Digits,
        }
    }

    /// Plausible values for this kind, if the kind is constrained.
    pub fn range(self, rules: &GolfRules) -> Option<ValueRange> {
        match self {
            CellKind::Par => Some(rules.par_range),
            CellKind::Stroke => Some(rules.stroke_range),
            CellKind::Total => Some(rules.total_range),
            CellKind::Subtotal => Some(rules.subtotal_range),
            CellKind::Label | CellKind::Header | CellKind::Value => None,
        }
    }
}

/// One grid cell to be read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellRegion {
    pub index: usize,
    pub row: usize,
    pub column: usize,
    pub region: Region,
    pub kind: CellKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedLayout {
    pub template: LayoutTemplate,
    /// Horizontal rule positions, top to bottom (rows + 1 entries).
    pub row_bounds: Vec<u32>,
    /// Vertical rule positions, left to right (columns + 1 entries).
    pub column_bounds: Vec<u32>,
    pub row_roles: Vec<RowRole>,
    pub column_roles: Vec<ColumnRole>,
    pub cells: Vec<CellRegion>,
}

impl DetectedLayout {
    pub fn rows(&self) -> usize {
        self.row_roles.len()
    }

    pub fn columns(&self) -> usize {
        self.column_roles.len()
    }
}

// ═══════════════════════════════════════════════════════════
// Recognition
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hypothesis {
    pub text: String,
    /// Numeric reading when `text` is all digits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<u32>,
    pub score: f32,
}

impl Hypothesis {
    pub fn new(text: String, score: f32) -> Self {
        let value = if !text.is_empty() && text.len() <= 4 && text.bytes().all(|b| b.is_ascii_digit()) {
            text.parse().ok()
        } else {
            None
        };
        Self { text, value, score }
    }
}

/// Ranked hypotheses for one cell, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Candidates(pub Vec<Hypothesis>);

impl Candidates {
    pub fn top(&self) -> Option<&Hypothesis> {
        self.0.first()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The top hypothesis when its value is in `range`, otherwise the best
    /// in-range hypothesis scoring within `margin` of the top.
    pub fn select_in_range(&self, range: ValueRange, margin: f32) -> Option<&Hypothesis> {
        let top = self.top()?;
        let in_range = |h: &&Hypothesis| h.value.is_some_and(|v| range.contains(v));
        if in_range(&top) {
            return Some(top);
        }
        self.0
            .iter()
            .skip(1)
            .filter(|h| top.score - h.score <= margin)
            .find(in_range)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellState {
    /// No ink beyond noise.
    Empty,
    /// Ink present but no hypothesis clears the legibility floor.
    Illegible,
    Read,
    /// Not attempted because the deadline expired.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    pub index: usize,
    pub row: usize,
    pub column: usize,
    pub region: Region,
    pub kind: CellKind,
    pub state: CellState,
    pub confidence: f32,
    pub candidates: Candidates,
}

impl Cell {
    /// Top hypothesis of a legible cell.
    pub fn best(&self) -> Option<&Hypothesis> {
        match self.state {
            CellState::Read => self.candidates.top(),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.best().map(|h| h.text.as_str())
    }
}

// ═══════════════════════════════════════════════════════════
// Record
// ═══════════════════════════════════════════════════════════

/// A recognized number, or an honest "unknown".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reading {
    Known(u32),
    Unknown,
}

impl Reading {
    pub fn known(self) -> Option<u32> {
        match self {
            Reading::Known(v) => Some(v),
            Reading::Unknown => None,
        }
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, Reading::Unknown)
    }

    /// Sum of all readings, unknown if any term is unknown.
    pub fn sum<'a>(readings: impl IntoIterator<Item = &'a Reading>) -> Reading {
        readings
            .into_iter()
            .try_fold(0u32, |acc, r| r.known().map(|v| acc + v))
            .map_or(Reading::Unknown, Reading::Known)
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reading::Known(v) => serializer.serialize_u32(*v),
            Reading::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Known(v) => write!(f, "{v}"),
            Reading::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hole {
    pub number: u32,
    pub par: Reading,
    /// Only present when the card prints a yardage row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yardage: Option<Reading>,
    /// Stroke index, when the card prints a handicap row.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handicap: Option<Reading>,
}

impl Hole {
    pub fn new(number: u32, par: Reading) -> Self {
        Self {
            number,
            par,
            yardage: None,
            handicap: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerScore {
    pub name: String,
    pub strokes: Vec<Reading>,
    /// Recomputed from `strokes`.
    pub total: Reading,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_total: Option<Reading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_out: Option<Reading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_in: Option<Reading>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScorecardRecord {
    pub hole_count: usize,
    pub holes: Vec<Hole>,
    /// Recomputed from the par row, absent when the card has none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub par_total: Option<Reading>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_par_total: Option<Reading>,
    pub players: Vec<PlayerScore>,
}

impl ScorecardRecord {
    pub fn empty() -> Self {
        Self {
            hole_count: 0,
            holes: Vec::new(),
            par_total: None,
            card_par_total: None,
            players: Vec::new(),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Result surface
// ═══════════════════════════════════════════════════════════

/// Named anomaly. Declared in alphabetical order so a `BTreeSet<Flag>`
/// serializes sorted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Flag {
    HoleCountInferred,
    IncompleteRound,
    LayoutUndetected,
    LowConfidenceCells,
    ModeUnrecognized,
    ParInconsistent,
    PlayerCountZero,
    Timeout,
    TotalsMismatch,
}

impl Flag {
    pub const ALL: [Flag; 9] = [
        Flag::HoleCountInferred,
        Flag::IncompleteRound,
        Flag::LayoutUndetected,
        Flag::LowConfidenceCells,
        Flag::ModeUnrecognized,
        Flag::ParInconsistent,
        Flag::PlayerCountZero,
        Flag::Timeout,
        Flag::TotalsMismatch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Flag::HoleCountInferred => "hole_count_inferred",
            Flag::IncompleteRound => "incomplete_round",
            Flag::LayoutUndetected => "layout_undetected",
            Flag::LowConfidenceCells => "low_confidence_cells",
            Flag::ModeUnrecognized => "mode_unrecognized",
            Flag::ParInconsistent => "par_inconsistent",
            Flag::PlayerCountZero => "player_count_zero",
            Flag::Timeout => "timeout",
            Flag::TotalsMismatch => "totals_mismatch",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rule set selected by the request's mode string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Regulation card: par row required, 9 or 18 holes.
    Course,
    /// No par row expected.
    Practice,
    /// Most permissive: any hole count, par optional.
    Generic,
}

impl Mode {
    /// Parse a request's mode string; `None` for unrecognized values.
    pub fn from_request(mode: &str) -> Option<Mode> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "course" => Some(Mode::Course),
            "practice" => Some(Mode::Practice),
            "generic" => Some(Mode::Generic),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Course => "course",
            Mode::Practice => "practice",
            Mode::Generic => "generic",
        }
    }
}

/// Pipeline output for one image.
#[derive(Debug, Clone, Serialize)]
pub struct ParseResult {
    pub record: ScorecardRecord,
    pub confidence: f32,
    pub flags: BTreeSet<Flag>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugArtifact>,
}

impl ParseResult {
    pub fn has_flag(&self, flag: Flag) -> bool {
        self.flags.contains(&flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hyp(text: &str, score: f32) -> Hypothesis {
        Hypothesis::new(text.to_string(), score)
    }

    #[test]
    fn hypothesis_parses_digit_text() {
        assert_eq!(hyp("12", 0.9).value, Some(12));
        assert_eq!(hyp("ALEX", 0.9).value, None);
        assert_eq!(hyp("", 0.9).value, None);
    }

    #[test]
    fn select_keeps_in_range_top() {
        let c = Candidates(vec![hyp("4", 0.9), hyp("9", 0.8)]);
        let picked = c.select_in_range(ValueRange::new(3, 5), 0.15).unwrap();
        assert_eq!(picked.text, "4");
    }

    #[test]
    fn select_prefers_in_range_runner_up_within_margin() {
        let c = Candidates(vec![hyp("8", 0.80), hyp("3", 0.70), hyp("5", 0.60)]);
        let picked = c.select_in_range(ValueRange::new(3, 5), 0.15).unwrap();
        assert_eq!(picked.text, "3");
    }

    #[test]
    fn select_rejects_runner_up_outside_margin() {
        let c = Candidates(vec![hyp("8", 0.90), hyp("3", 0.50)]);
        assert!(c.select_in_range(ValueRange::new(3, 5), 0.15).is_none());
        assert!(Candidates::default()
            .select_in_range(ValueRange::new(3, 5), 0.15)
            .is_none());
    }

    #[test]
    fn reading_serializes_number_or_unknown() {
        let json = serde_json::to_string(&vec![Reading::Known(4), Reading::Unknown]).unwrap();
        assert_eq!(json, r#"[4,"unknown"]"#);
    }

    #[test]
    fn reading_sum_is_unknown_when_any_term_is() {
        assert_eq!(
            Reading::sum(&[Reading::Known(4), Reading::Known(5)]),
            Reading::Known(9)
        );
        assert_eq!(
            Reading::sum(&[Reading::Known(4), Reading::Unknown]),
            Reading::Unknown
        );
    }

    #[test]
    fn flags_serialize_sorted_snake_case() {
        let flags: BTreeSet<Flag> = Flag::ALL.iter().rev().copied().collect();
        let json = serde_json::to_value(&flags).unwrap();
        let names: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        for flag in Flag::ALL {
            assert_eq!(
                serde_json::to_value(flag).unwrap().as_str().unwrap(),
                flag.as_str()
            );
        }
    }

    #[test]
    fn mode_parsing() {
        assert_eq!(Mode::from_request("course"), Some(Mode::Course));
        assert_eq!(Mode::from_request(" Practice "), Some(Mode::Practice));
        assert_eq!(Mode::from_request("generic"), Some(Mode::Generic));
        assert_eq!(Mode::from_request("stableford"), None);
        assert_eq!(Mode::from_request(""), None);
    }

    #[test]
    fn layout_template_tagged() {
        let t = LayoutTemplate::GenericGrid {
            detected_rows: 5,
            detected_columns: 11,
        };
        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["kind"], "generic_grid");
        assert_eq!(json["detected_rows"], 5);
    }

    #[test]
    fn empty_record_serializes_without_par() {
        let json = serde_json::to_value(ScorecardRecord::empty()).unwrap();
        assert_eq!(json["hole_count"], 0);
        assert!(json.get("par_total").is_none());
    }
}
