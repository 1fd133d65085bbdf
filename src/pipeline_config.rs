//! Pipeline configuration for the scorecard parser.
//!
//! Every threshold, margin and weight used by the pipeline stages lives here so
//! the policy can be tuned against a labeled scorecard corpus without touching
//! stage code. All fields have defaults; a JSON file only needs to name the
//! values it overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{DUMP_DIR_ENV, TIMEOUT_ENV};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {var}: {value}")]
    Env { var: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Inclusive integer range used for golf-domain plausibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: u32,
    pub max: u32,
}

impl ValueRange {
    pub const fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: u32) -> bool {
        (self.min..=self.max).contains(&value)
    }
}

/// Golf-domain priors shared by the recognizer and the assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GolfRules {
    pub par_range: ValueRange,
    pub stroke_range: ValueRange,
    pub total_range: ValueRange,
    pub subtotal_range: ValueRange,
    /// Printed hole length in yards or meters.
    pub yardage_range: ValueRange,
    /// Stroke index of a hole.
    pub handicap_range: ValueRange,
    /// Hole counts a regulation card may have.
    pub hole_counts: Vec<usize>,
}

impl Default for GolfRules {
    fn default() -> Self {
        Self {
            par_range: ValueRange::new(3, 5),
            stroke_range: ValueRange::new(1, 15),
            total_range: ValueRange::new(1, 300),
            subtotal_range: ValueRange::new(1, 150),
            yardage_range: ValueRange::new(50, 700),
            handicap_range: ValueRange::new(1, 18),
            hole_counts: vec![9, 18],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Smallest accepted width/height in pixels.
    pub min_dimension: u32,
    /// Longer side is downscaled to this before any analysis.
    pub max_dimension: u32,
    /// RMS contrast below this is a near-uniform (degenerate) image.
    pub min_contrast: f32,
    pub max_skew_degrees: f32,
    pub skew_step_degrees: f32,
    /// Skew below this is left uncorrected.
    pub min_skew_degrees: f32,
    /// Block size (pixels) for the paper background estimate.
    pub illumination_block: u32,
    /// Background spread (gray levels) above which illumination is flattened.
    pub illumination_variation: f32,
    /// Corner deviation (pixels) above which the frame is warped, not cropped.
    pub perspective_tolerance_px: f32,
    /// White margin kept around the rectified frame.
    pub frame_margin: u32,
    /// Median row height (pixels) the upright card is resized to.
    pub target_row_px: u32,
    /// Relative scale error below which no resize happens.
    pub scale_tolerance: f32,
    /// Upper bound on the longer side after the row-height resize.
    pub max_normalized_dimension: u32,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            min_dimension: 64,
            max_dimension: 2400,
            min_contrast: 6.0,
            max_skew_degrees: 5.0,
            skew_step_degrees: 0.25,
            min_skew_degrees: 0.5,
            illumination_block: 32,
            illumination_variation: 24.0,
            perspective_tolerance_px: 3.0,
            frame_margin: 4,
            target_row_px: 80,
            scale_tolerance: 0.05,
            max_normalized_dimension: 4800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// A scanline is a rule when its long-run coverage reaches this fraction
    /// of the strongest scanline.
    pub line_coverage: f32,
    /// Ink runs shorter than this fraction of the longest run are ignored.
    pub min_run_fraction: f32,
    pub min_segment_px: u32,
    /// Rules closer than this collapse into one boundary.
    pub min_rule_gap_px: u32,
    /// A collapsed boundary thicker than this is a solid slab, not a rule.
    pub max_rule_thickness_px: u32,
    pub template_threshold: f32,
    /// Near-tie margin between the two best templates; ties fall back to a generic grid.
    pub template_epsilon: f32,
    /// Matching tolerance for normalized rule positions.
    pub position_tolerance: f32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            line_coverage: 0.6,
            min_run_fraction: 0.25,
            min_segment_px: 10,
            min_rule_gap_px: 6,
            max_rule_thickness_px: 16,
            template_threshold: 0.9,
            template_epsilon: 0.02,
            position_tolerance: 0.006,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognizerConfig {
    pub top_k: usize,
    /// Ink ratio below which a cell is blank.
    pub empty_ink_ratio: f32,
    /// Confidence below which a non-blank cell is illegible.
    pub illegible_floor: f32,
    /// Raw glyph similarity mapped to zero confidence.
    pub similarity_floor: f32,
    /// Score multiplier for hypotheses failing the cell's plausibility range.
    pub implausible_penalty: f32,
    /// Cell inset (fraction of the shorter side) that keeps rule lines out of crops.
    pub cell_inset_ratio: f32,
    /// Cells beyond this count are recognized on the rayon pool.
    pub parallel_threshold: usize,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            empty_ink_ratio: 0.01,
            illegible_floor: 0.2,
            similarity_floor: 0.6,
            implausible_penalty: 0.5,
            cell_inset_ratio: 0.08,
            parallel_threshold: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssemblerConfig {
    /// An in-range hypothesis within this margin of the top one replaces it.
    pub hypothesis_margin: f32,
    /// Fraction of par-range values that marks an unlabeled first row as the par row.
    pub par_row_ratio: f32,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            hypothesis_margin: 0.15,
            par_row_ratio: 0.8,
        }
    }
}

/// Relative weight of each evidence class in the aggregate confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceWeights {
    pub stroke: f32,
    pub par: f32,
    pub total: f32,
    pub hole_number: f32,
    pub label: f32,
    /// Yardage and handicap cells.
    pub info: f32,
}

impl Default for EvidenceWeights {
    fn default() -> Self {
        Self {
            stroke: 3.0,
            par: 2.0,
            total: 1.5,
            hole_number: 1.0,
            label: 0.25,
            info: 0.5,
        }
    }
}

/// Confidence multiplier applied once per raised flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlagPenalties {
    pub hole_count_inferred: f32,
    pub low_confidence_cells: f32,
    pub par_inconsistent: f32,
    pub player_count_zero: f32,
    pub totals_mismatch: f32,
    pub mode_unrecognized: f32,
    pub incomplete_round: f32,
    pub timeout: f32,
}

impl Default for FlagPenalties {
    fn default() -> Self {
        Self {
            hole_count_inferred: 0.8,
            low_confidence_cells: 0.9,
            par_inconsistent: 0.85,
            player_count_zero: 0.3,
            totals_mismatch: 0.9,
            mode_unrecognized: 0.9,
            incomplete_round: 0.95,
            timeout: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    pub weights: EvidenceWeights,
    pub penalties: FlagPenalties,
    /// Evidence below this raises `low_confidence_cells`.
    pub low_confidence: f32,
    /// Lower clamp for a single cell's confidence inside the geometric mean.
    pub confidence_floor: f32,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            weights: EvidenceWeights::default(),
            penalties: FlagPenalties::default(),
            low_confidence: 0.5,
            confidence_floor: 0.01,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub rules: GolfRules,
    pub normalizer: NormalizerConfig,
    pub layout: LayoutConfig,
    pub recognizer: RecognizerConfig,
    pub assembler: AssemblerConfig,
    pub evaluator: EvaluatorConfig,
    /// Overall deadline for one invocation. `None` disables the deadline.
    pub timeout_ms: Option<u64>,
    /// Debug artifacts are also written below this directory when set.
    pub dump_dir: Option<PathBuf>,
}

// ═══════════════════════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════════════════════

impl PipelineConfig {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SCORECARD_TIMEOUT_MS` and `SCORECARD_DUMP_DIR` on top of this config.
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(raw) = std::env::var(TIMEOUT_ENV) {
            let ms = raw.trim().parse::<u64>().map_err(|_| ConfigError::Env {
                var: TIMEOUT_ENV,
                value: raw.clone(),
            })?;
            self.timeout_ms = Some(ms);
        }
        if let Ok(dir) = std::env::var(DUMP_DIR_ENV) {
            if !dir.trim().is_empty() {
                self.dump_dir = Some(PathBuf::from(dir));
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Reject values that would make a stage misbehave rather than merely tune it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, range) in [
            ("par_range", self.rules.par_range),
            ("stroke_range", self.rules.stroke_range),
            ("total_range", self.rules.total_range),
            ("subtotal_range", self.rules.subtotal_range),
            ("yardage_range", self.rules.yardage_range),
            ("handicap_range", self.rules.handicap_range),
        ] {
            if range.min == 0 || range.min > range.max {
                return Err(ConfigError::Invalid(format!(
                    "{name} must satisfy 0 < min <= max (got {}..={})",
                    range.min, range.max
                )));
            }
        }
        if self.rules.hole_counts.is_empty()
            || self.rules.hole_counts.iter().any(|&n| n == 0 || n > 18)
        {
            return Err(ConfigError::Invalid(
                "hole_counts must list values in 1..=18".into(),
            ));
        }

        for (name, value) in [
            ("layout.line_coverage", self.layout.line_coverage),
            ("layout.min_run_fraction", self.layout.min_run_fraction),
            ("layout.template_threshold", self.layout.template_threshold),
            ("recognizer.empty_ink_ratio", self.recognizer.empty_ink_ratio),
            ("recognizer.illegible_floor", self.recognizer.illegible_floor),
            ("recognizer.implausible_penalty", self.recognizer.implausible_penalty),
            ("assembler.par_row_ratio", self.assembler.par_row_ratio),
            ("evaluator.low_confidence", self.evaluator.low_confidence),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be in (0, 1] (got {value})"
                )));
            }
        }

        if !(0.0..1.0).contains(&self.recognizer.similarity_floor) {
            return Err(ConfigError::Invalid(
                "recognizer.similarity_floor must be in [0, 1)".into(),
            ));
        }
        if !(0.0..0.5).contains(&self.recognizer.cell_inset_ratio) {
            return Err(ConfigError::Invalid(
                "recognizer.cell_inset_ratio must be in [0, 0.5)".into(),
            ));
        }
        if self.recognizer.top_k == 0 {
            return Err(ConfigError::Invalid("recognizer.top_k must be >= 1".into()));
        }
        if self.normalizer.min_dimension == 0
            || self.normalizer.min_dimension > self.normalizer.max_dimension
        {
            return Err(ConfigError::Invalid(
                "normalizer.min_dimension must be in 1..=max_dimension".into(),
            ));
        }
        if self.layout.max_rule_thickness_px == 0 {
            return Err(ConfigError::Invalid(
                "layout.max_rule_thickness_px must be >= 1".into(),
            ));
        }
        if self.normalizer.target_row_px < 8 {
            return Err(ConfigError::Invalid(
                "normalizer.target_row_px must be >= 8".into(),
            ));
        }
        if self.normalizer.max_normalized_dimension < self.normalizer.max_dimension {
            return Err(ConfigError::Invalid(
                "normalizer.max_normalized_dimension must be >= max_dimension".into(),
            ));
        }
        if self.normalizer.skew_step_degrees <= 0.0 {
            return Err(ConfigError::Invalid(
                "normalizer.skew_step_degrees must be positive".into(),
            ));
        }
        if self.normalizer.illumination_block < 4 {
            return Err(ConfigError::Invalid(
                "normalizer.illumination_block must be >= 4".into(),
            ));
        }
        if !(self.evaluator.confidence_floor > 0.0 && self.evaluator.confidence_floor < 1.0) {
            return Err(ConfigError::Invalid(
                "evaluator.confidence_floor must be in (0, 1)".into(),
            ));
        }

        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════
