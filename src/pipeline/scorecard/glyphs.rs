//! Glyph recognition model.
//!
//! The pipeline reads printed and hand-lettered digits and capitals one glyph
//! at a time through the [`GlyphModel`] trait. The built-in model matches each
//! glyph crop against a 5x7 bitmap font by area sampling: the crop's ink
//! bounding box is divided into the template's cell grid and every template
//! cell is compared with the ink fraction sampled from its interior, away from
//! edges that resampling and print bleed blur.

use super::types::Charset;

/// Template rows are 5 bits wide, bit 4 is the leftmost column.
const FONT_WIDTH: usize = 5;
const FONT_HEIGHT: usize = 7;

/// Sub-samples per template cell along each axis.
const SAMPLES: usize = 3;

/// Sub-samples cover the middle of a template cell, this fraction of its side.
const SAMPLE_SPREAD: f32 = 0.4;

/// Offset of sub-sample `s` within its cell, in cell units.
fn sample_offset(s: usize) -> f32 {
    0.5 + SAMPLE_SPREAD * (s as f32 / (SAMPLES - 1) as f32 - 0.5)
}

/// Per template-column cost of an aspect mismatch, capped at this many columns.
const ASPECT_SPAN: f32 = 5.0;
const ASPECT_WEIGHT: f32 = 0.5;

#[rustfmt::skip]
const FONT: [(char, [u8; FONT_HEIGHT]); 36] = [
    ('0', [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E]),
    ('1', [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E]),
    ('2', [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F]),
    ('3', [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E]),
    ('4', [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02]),
    ('5', [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E]),
    ('6', [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E]),
    ('7', [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08]),
    ('8', [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E]),
    ('9', [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C]),
    ('A', [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11]),
    ('B', [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E]),
    ('C', [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E]),
    ('D', [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C]),
    ('E', [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F]),
    ('F', [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10]),
    ('G', [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F]),
    ('H', [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11]),
    ('I', [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E]),
    ('J', [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C]),
    ('K', [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11]),
    ('L', [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F]),
    ('M', [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11]),
    ('N', [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11]),
    ('O', [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E]),
    ('P', [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10]),
    ('Q', [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D]),
    ('R', [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11]),
    ('S', [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E]),
    ('T', [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04]),
    ('U', [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E]),
    ('V', [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04]),
    ('W', [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A]),
    ('X', [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11]),
    ('Y', [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04]),
    ('Z', [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F]),
];

/// Bitmap rows of a font glyph, if the font has one.
pub fn glyph_rows(c: char) -> Option<[u8; FONT_HEIGHT]> {
    FONT.iter()
        .find(|(ch, _)| *ch == c.to_ascii_uppercase())
        .map(|(_, rows)| *rows)
}

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// Binarized crop of a single glyph.
#[derive(Debug, Clone)]
pub struct GlyphBitmap {
    width: u32,
    height: u32,
    ink: Vec<bool>,
}

impl GlyphBitmap {
    /// `ink` is row-major and must hold `width * height` entries.
    pub fn new(width: u32, height: u32, ink: Vec<bool>) -> Option<Self> {
        (ink.len() == (width * height) as usize && width > 0 && height > 0)
            .then_some(Self { width, height, ink })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.ink[(y * self.width + x) as usize]
    }

    /// Tight bounding box of the ink as `(x0, y0, x1, y1)`, exclusive ends.
    fn ink_bounds(&self) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.is_ink(x, y) {
                    bounds = Some(match bounds {
                        None => (x, y, x + 1, y + 1),
                        Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x + 1), y1.max(y + 1)),
                    });
                }
            }
        }
        bounds
    }
}

/// One ranked glyph guess. `score` is a raw similarity in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphScore {
    pub ch: char,
    pub score: f32,
}

/// Character classifier for single glyph crops.
///
/// Implementations are shared read-only across recognition workers.
pub trait GlyphModel: Send + Sync {
    /// Rank every character of `charset` against the glyph, best first.
    fn classify(&self, glyph: &GlyphBitmap, charset: Charset) -> Vec<GlyphScore>;
}

// ═══════════════════════════════════════════════════════════
// Built-in bitmap font model
// ═══════════════════════════════════════════════════════════

struct Template {
    ch: char,
    /// Ink per cell of the template's own bounding columns.
    cells: Vec<bool>,
    width: usize,
}

impl Template {
    fn from_rows(ch: char, rows: &[u8; FONT_HEIGHT]) -> Self {
        let used = rows.iter().fold(0u8, |acc, r| acc | r);
        let first = (0..FONT_WIDTH)
            .find(|&c| used & (0x10 >> c) != 0)
            .unwrap_or(0);
        let last = (0..FONT_WIDTH)
            .rev()
            .find(|&c| used & (0x10 >> c) != 0)
            .unwrap_or(FONT_WIDTH - 1);
        let width = last - first + 1;

        let mut cells = Vec::with_capacity(width * FONT_HEIGHT);
        for row in rows {
            for c in first..=last {
                cells.push(row & (0x10 >> c) != 0);
            }
        }
        Self { ch, cells, width }
    }
}

/// Template-correlation classifier over the built-in 5x7 font.
pub struct BitmapFontModel {
    templates: Vec<Template>,
}

impl BitmapFontModel {
    pub fn new() -> Self {
        let templates = FONT
            .iter()
            .map(|(ch, rows)| Template::from_rows(*ch, rows))
            .collect();
        Self { templates }
    }

    fn similarity(glyph: &GlyphBitmap, bounds: (u32, u32, u32, u32), template: &Template) -> f32 {
        let (x0, y0, x1, y1) = bounds;
        let gw = (x1 - x0) as f32;
        let gh = (y1 - y0) as f32;
        let cell_w = gw / template.width as f32;
        let cell_h = gh / FONT_HEIGHT as f32;

        let mut cost = 0.0f32;
        for ty in 0..FONT_HEIGHT {
            for tx in 0..template.width {
                let mut hits = 0usize;
                for sy in 0..SAMPLES {
                    for sx in 0..SAMPLES {
                        let px = x0 as f32 + (tx as f32 + sample_offset(sx)) * cell_w;
                        let py = y0 as f32 + (ty as f32 + sample_offset(sy)) * cell_h;
                        if glyph.is_ink(px as u32, py as u32) {
                            hits += 1;
                        }
                    }
                }
                let fraction = hits as f32 / (SAMPLES * SAMPLES) as f32;
                let expected = if template.cells[ty * template.width + tx] { 1.0 } else { 0.0 };
                cost += (fraction - expected).abs();
            }
        }
        let similarity = 1.0 - cost / (template.width * FONT_HEIGHT) as f32;

        // Glyph width in template columns, given its height spans 7 rows.
        let width_units = gw / cell_h;
        let mismatch = ((width_units - template.width as f32).abs() / ASPECT_SPAN).min(1.0);
        similarity * (1.0 - mismatch * ASPECT_WEIGHT)
    }
}

impl Default for BitmapFontModel {
    fn default() -> Self {
        Self::new()
    }
}

impl GlyphModel for BitmapFontModel {
    fn classify(&self, glyph: &GlyphBitmap, charset: Charset) -> Vec<GlyphScore> {
        let Some(bounds) = glyph.ink_bounds() else {
            return Vec::new();
        };
        let allowed = charset.chars();

        let mut scores: Vec<GlyphScore> = self
            .templates
            .iter()
            .filter(|t| allowed.contains(t.ch))
            .map(|t| GlyphScore {
                ch: t.ch,
                score: Self::similarity(glyph, bounds, t).clamp(0.0, 1.0),
            })
            .collect();
        scores.sort_by(|a, b| b.score.total_cmp(&a.score));
        scores
    }
}
