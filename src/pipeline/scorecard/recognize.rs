//! Per-cell recognition.
//!
//! Each cell is cropped inside its rules, checked for ink, split into glyphs
//! by vertical projection gaps and read glyph-by-glyph with the
//! [`GlyphModel`]. Glyph rankings are combined into top-K string hypotheses
//! by beam search; golf-domain plausibility then re-ranks them.

use std::time::Instant;

use rayon::prelude::*;

use super::glyphs::{GlyphBitmap, GlyphModel};
use super::types::{Candidates, Cell, CellRegion, CellState, Hypothesis, NormalizedImage, Region};
use crate::pipeline_config::{GolfRules, RecognizerConfig, ValueRange};

/// Outer band (pixels) of a crop searched for rule remnants.
const RULE_BAND: u32 = 3;

/// A band line is a rule remnant when at least this fraction of it is ink.
const REMNANT_FILL: f32 = 0.5;

/// Components with less ink than this are specks.
const MIN_GLYPH_INK: usize = 4;

/// Components shorter than this fraction of the tallest one are specks.
const MIN_GLYPH_HEIGHT_RATIO: f32 = 0.35;

/// More segments than this is scribble, not a score.
const MAX_GLYPHS: usize = 12;

/// Strategy for fanning cells out to the worker pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStrategy {
    Sequential,
    Parallel,
    /// Parallel when the cell count exceeds the threshold.
    Auto(usize),
}

impl ProcessingStrategy {
    pub fn should_use_parallel(&self, item_count: usize) -> bool {
        match self {
            ProcessingStrategy::Sequential => false,
            ProcessingStrategy::Parallel => true,
            ProcessingStrategy::Auto(threshold) => item_count > *threshold,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Cell crops
// ═══════════════════════════════════════════════════════════

/// Binarized interior of one cell.
struct CellCrop {
    width: u32,
    height: u32,
    ink: Vec<bool>,
}

impl CellCrop {
    fn from_region(image: &NormalizedImage, region: &Region, inset_ratio: f32) -> Option<Self> {
        let inset = (region.width.min(region.height) as f32 * inset_ratio)
            .round()
            .max(2.0) as u32;
        let x0 = region.x + inset;
        let y0 = region.y + inset;
        let x1 = region.right().saturating_sub(inset).min(image.image.width());
        let y1 = region.bottom().saturating_sub(inset).min(image.image.height());
        if x1 <= x0 + 1 || y1 <= y0 + 1 {
            return None;
        }

        let (width, height) = (x1 - x0, y1 - y0);
        let mut ink = Vec::with_capacity((width * height) as usize);
        for y in y0..y1 {
            for x in x0..x1 {
                ink.push(image.image.get_pixel(x, y).0[0] <= image.ink_threshold);
            }
        }

        let mut crop = Self { width, height, ink };
        crop.strip_rule_remnants();
        Some(crop)
    }

    fn is_ink(&self, x: u32, y: u32) -> bool {
        self.ink[(y * self.width + x) as usize]
    }

    fn ink_ratio(&self) -> f32 {
        let count = self.ink.iter().filter(|&&i| i).count();
        count as f32 / self.ink.len() as f32
    }

    /// Clear nearly-solid lines in the outer band left over from thick or
    /// slightly misplaced rules.
    fn strip_rule_remnants(&mut self) {
        let band = RULE_BAND.min(self.height / 2).min(self.width / 2);
        let (w, h) = (self.width, self.height);

        let rows = (0..band).chain(h - band..h);
        for y in rows {
            let filled = (0..w).filter(|&x| self.is_ink(x, y)).count();
            if filled as f32 >= w as f32 * REMNANT_FILL {
                for x in 0..w {
                    self.ink[(y * w + x) as usize] = false;
                }
            }
        }

        let columns = (0..band).chain(w - band..w);
        for x in columns {
            let filled = (0..h).filter(|&y| self.is_ink(x, y)).count();
            if filled as f32 >= h as f32 * REMNANT_FILL {
                for y in 0..h {
                    self.ink[(y * w + x) as usize] = false;
                }
            }
        }
    }

    /// Split into glyphs at ink-free columns, dropping specks.
    fn segment_glyphs(&self) -> Vec<GlyphBitmap> {
        struct Segment {
            x0: u32,
            x1: u32,
            y0: u32,
            y1: u32,
            ink: usize,
        }

        let mut segments: Vec<Segment> = Vec::new();
        let mut current: Option<Segment> = None;

        for x in 0..=self.width {
            let column: Vec<u32> = if x < self.width {
                (0..self.height).filter(|&y| self.is_ink(x, y)).collect()
            } else {
                Vec::new()
            };

            match (column.is_empty(), current.as_mut()) {
                (false, Some(seg)) => {
                    seg.x1 = x + 1;
                    seg.y0 = seg.y0.min(column[0]);
                    seg.y1 = seg.y1.max(column[column.len() - 1] + 1);
                    seg.ink += column.len();
                }
                (false, None) => {
                    current = Some(Segment {
                        x0: x,
                        x1: x + 1,
                        y0: column[0],
                        y1: column[column.len() - 1] + 1,
                        ink: column.len(),
                    });
                }
                (true, _) => {
                    if let Some(seg) = current.take() {
                        segments.push(seg);
                    }
                }
            }
        }

        let tallest = segments.iter().map(|s| s.y1 - s.y0).max().unwrap_or(0);
        segments
            .into_iter()
            .filter(|s| {
                s.ink >= MIN_GLYPH_INK
                    && (s.y1 - s.y0) as f32 >= tallest as f32 * MIN_GLYPH_HEIGHT_RATIO
            })
            .filter_map(|s| {
                let (w, h) = (s.x1 - s.x0, s.y1 - s.y0);
                let mut ink = Vec::with_capacity((w * h) as usize);
                for y in s.y0..s.y1 {
                    for x in s.x0..s.x1 {
                        ink.push(self.is_ink(x, y));
                    }
                }
                GlyphBitmap::new(w, h, ink)
            })
            .collect()
    }
}

// ═══════════════════════════════════════════════════════════
// Hypothesis ranking
// ═══════════════════════════════════════════════════════════

/// Top `width` strings over per-glyph options, scored by the geometric mean
/// of their glyph scores.
pub fn beam_search(per_glyph: &[Vec<(char, f32)>], width: usize) -> Vec<Hypothesis> {
    if per_glyph.is_empty() {
        return Vec::new();
    }

    let mut beams: Vec<(String, f32)> = vec![(String::new(), 1.0)];
    for options in per_glyph {
        let mut next = Vec::with_capacity(beams.len() * options.len());
        for (text, score) in &beams {
            for &(ch, s) in options {
                let mut extended = text.clone();
                extended.push(ch);
                next.push((extended, score * s));
            }
        }
        next.sort_by(|a, b| b.1.total_cmp(&a.1));
        next.truncate(width);
        beams = next;
    }

    let n = per_glyph.len() as f32;
    beams
        .into_iter()
        .map(|(text, product)| Hypothesis::new(text, product.powf(1.0 / n)))
        .collect()
}

/// Penalize hypotheses outside `range` and re-rank, best first.
pub fn apply_plausibility(hypotheses: &mut [Hypothesis], range: ValueRange, penalty: f32) {
    for h in hypotheses.iter_mut() {
        if !h.value.is_some_and(|v| range.contains(v)) {
            h.score *= penalty;
        }
    }
    hypotheses.sort_by(|a, b| b.score.total_cmp(&a.score));
}

// ═══════════════════════════════════════════════════════════
// Recognizer
// ═══════════════════════════════════════════════════════════

pub struct CellRecognizer<'a> {
    model: &'a dyn GlyphModel,
    config: &'a RecognizerConfig,
    rules: &'a GolfRules,
    strategy: ProcessingStrategy,
}

impl<'a> CellRecognizer<'a> {
    pub fn new(model: &'a dyn GlyphModel, config: &'a RecognizerConfig, rules: &'a GolfRules) -> Self {
        Self {
            model,
            config,
            rules,
            strategy: ProcessingStrategy::Auto(config.parallel_threshold),
        }
    }

    pub fn with_strategy(mut self, strategy: ProcessingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// One cell per region, in region order. Cells reached after `deadline`
    /// are `Skipped`.
    pub fn recognize(
        &self,
        image: &NormalizedImage,
        regions: &[CellRegion],
        deadline: Option<Instant>,
    ) -> Vec<Cell> {
        let read = |region: &CellRegion| -> Cell {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return finish(region, CellState::Skipped, 0.0, Candidates::default());
            }
            self.recognize_cell(image, region)
        };

        if self.strategy.should_use_parallel(regions.len()) {
            regions.par_iter().map(read).collect()
        } else {
            regions.iter().map(read).collect()
        }
    }

    fn recognize_cell(&self, image: &NormalizedImage, region: &CellRegion) -> Cell {
        let Some(crop) = CellCrop::from_region(image, &region.region, self.config.cell_inset_ratio) else {
            return finish(region, CellState::Empty, 1.0, Candidates::default());
        };
        if crop.ink_ratio() < self.config.empty_ink_ratio {
            return finish(region, CellState::Empty, 1.0, Candidates::default());
        }

        let glyphs = crop.segment_glyphs();
        if glyphs.is_empty() {
            return finish(region, CellState::Empty, 1.0, Candidates::default());
        }
        if glyphs.len() > MAX_GLYPHS {
            return finish(region, CellState::Illegible, 0.0, Candidates::default());
        }

        let charset = region.kind.charset();
        let per_glyph: Vec<Vec<(char, f32)>> = glyphs
            .iter()
            .map(|glyph| {
                self.model
                    .classify(glyph, charset)
                    .into_iter()
                    .take(self.config.top_k)
                    .map(|s| (s.ch, self.calibrate(s.score)))
                    .collect()
            })
            .collect();

        let mut hypotheses = beam_search(&per_glyph, self.config.top_k);
        if let Some(range) = region.kind.range(self.rules) {
            apply_plausibility(&mut hypotheses, range, self.config.implausible_penalty);
        }

        let confidence = hypotheses.first().map_or(0.0, |h| h.score);
        let state = if confidence < self.config.illegible_floor {
            CellState::Illegible
        } else {
            CellState::Read
        };
        finish(region, state, confidence, Candidates(hypotheses))
    }

    /// Map raw similarity onto [0, 1] confidence above the similarity floor.
    fn calibrate(&self, similarity: f32) -> f32 {
        let floor = self.config.similarity_floor;
        ((similarity - floor) / (1.0 - floor)).clamp(0.0, 1.0)
    }
}

fn finish(region: &CellRegion, state: CellState, confidence: f32, candidates: Candidates) -> Cell {
    Cell {
        index: region.index,
        row: region.row,
        column: region.column,
        region: region.region,
        kind: region.kind,
        state,
        confidence,
        candidates,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::scorecard::glyphs::BitmapFontModel;
    use crate::pipeline::scorecard::layout::LayoutDetector;
    use crate::pipeline::scorecard::preprocess::ImageNormalizer;
    use crate::pipeline::scorecard::templates::TemplateCatalog;
    use crate::pipeline::scorecard::test_support::{self, compact_18, sample_players_18};
    use crate::pipeline::scorecard::types::{DetectedLayout, Mode};
    use crate::pipeline_config::PipelineConfig;
    use std::time::Duration;

    fn prepared(card: &image::GrayImage) -> (NormalizedImage, DetectedLayout) {
        let config = PipelineConfig::default();
        let image = ImageNormalizer::new(&config)
            .normalize(&test_support::png_bytes(card))
            .unwrap();
        let catalog = TemplateCatalog::builtin();
        let layout = LayoutDetector::new(&catalog, &config.layout)
            .detect(&image, Mode::Course)
            .unwrap();
        (image, layout)
    }

    fn recognize_all(card: &image::GrayImage, strategy: ProcessingStrategy) -> Vec<Cell> {
        let config = PipelineConfig::default();
        let model = BitmapFontModel::new();
        let (image, layout) = prepared(card);
        CellRecognizer::new(&model, &config.recognizer, &config.rules)
            .with_strategy(strategy)
            .recognize(&image, &layout.cells, None)
    }

    #[test]
    fn reads_printed_card() {
        let players = sample_players_18();
        let cells = recognize_all(&compact_18(&players).render(), ProcessingStrategy::Auto(32));
        assert_eq!(cells.len(), 120);

        // Header row: label then hole numbers.
        assert_eq!(cells[0].text(), Some("HOLE"));
        assert_eq!(cells[1].text(), Some("1"));
        assert_eq!(cells[18].text(), Some("18"));
        assert_eq!(cells[19].text(), Some("TOT"));

        // First player row.
        assert_eq!(cells[40].text(), Some(players[0].0));
        assert_eq!(cells[41].best().unwrap().value, Some(players[0].1[0]));
        assert!((cells[41].confidence - 1.0).abs() < 1e-4);
        let total: u32 = players[0].1.iter().sum();
        assert_eq!(cells[59].best().unwrap().value, Some(total));

        // Blank fourth player row.
        assert!(cells[100..120].iter().all(|c| c.state == CellState::Empty));
    }

    #[test]
    fn cells_keep_region_order() {
        let cells = recognize_all(&compact_18(&sample_players_18()).render(), ProcessingStrategy::Parallel);
        for (i, cell) in cells.iter().enumerate() {
            assert_eq!(cell.index, i);
        }
    }

    #[test]
    fn parallel_and_sequential_agree() {
        let card = compact_18(&sample_players_18()).render();
        let sequential = recognize_all(&card, ProcessingStrategy::Sequential);
        let parallel = recognize_all(&card, ProcessingStrategy::Parallel);
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn smudged_cell_is_illegible() {
        let card = compact_18(&sample_players_18()).smudge(2, 5).render();
        let cells = recognize_all(&card, ProcessingStrategy::Sequential);
        let smudged = &cells[2 * 20 + 5];
        assert_eq!(smudged.state, CellState::Illegible);
        assert!(smudged.confidence < 0.2);
        assert!(smudged.best().is_none());
    }

    #[test]
    fn expired_deadline_skips_cells() {
        let config = PipelineConfig::default();
        let model = BitmapFontModel::new();
        let (image, layout) = prepared(&compact_18(&sample_players_18()).render());
        let past = Instant::now() - Duration::from_millis(1);
        let cells = CellRecognizer::new(&model, &config.recognizer, &config.rules)
            .recognize(&image, &layout.cells, Some(past));
        assert!(cells.iter().all(|c| c.state == CellState::Skipped));
        assert!(cells.iter().all(|c| c.confidence == 0.0));
    }

    #[test]
    fn beam_search_ranks_by_geometric_mean() {
        let per_glyph = vec![
            vec![('1', 1.0), ('7', 0.5)],
            vec![('2', 0.81), ('7', 0.64)],
        ];
        let hyps = beam_search(&per_glyph, 3);
        assert_eq!(hyps.len(), 3);
        assert_eq!(hyps[0].text, "12");
        assert!((hyps[0].score - 0.9).abs() < 1e-5);
        assert_eq!(hyps[1].text, "17");
        assert!((hyps[1].score - 0.8).abs() < 1e-5);
        assert_eq!(hyps[2].value, Some(72));
        assert!(beam_search(&[], 3).is_empty());
    }

    #[test]
    fn implausible_values_are_demoted() {
        let mut hyps = vec![
            Hypothesis::new("8".into(), 0.9),
            Hypothesis::new("3".into(), 0.7),
        ];
        apply_plausibility(&mut hyps, ValueRange::new(3, 5), 0.5);
        assert_eq!(hyps[0].text, "3");
        assert!((hyps[1].score - 0.45).abs() < 1e-6);
    }

    #[test]
    fn strategy_threshold() {
        assert!(!ProcessingStrategy::Auto(32).should_use_parallel(32));
        assert!(ProcessingStrategy::Auto(32).should_use_parallel(33));
        assert!(!ProcessingStrategy::Sequential.should_use_parallel(1000));
        assert!(ProcessingStrategy::Parallel.should_use_parallel(1));
    }
}
