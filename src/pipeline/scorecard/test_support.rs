//! Synthetic scorecards for pipeline tests.
//!
//! Cards are drawn with 2px rules and the built-in 5x7 font at 2x scale, so
//! the recognizer reads clean cells exactly.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::geometric_transformations::{rotate_about_center, warp_into, Interpolation, Projection};
use imageproc::rect::Rect;

use super::glyphs::glyph_rows;

pub const MARGIN: u32 = 20;
pub const LABEL_WIDTH: u32 = 150;
pub const CELL_WIDTH: u32 = 50;
pub const ROW_HEIGHT: u32 = 40;
pub const RULE: u32 = 2;
pub const SCALE: u32 = 2;

const INK: Luma<u8> = Luma([0]);
const SMUDGE: Luma<u8> = Luma([30]);
const PAPER: Luma<u8> = Luma([255]);

/// Smudges start this far inside the cell rules.
const SMUDGE_INSET: u32 = 6;

pub const PAR_18: [u32; 18] = [4, 4, 3, 5, 4, 4, 3, 4, 5, 4, 3, 5, 4, 4, 3, 4, 4, 5];

/// Player rows on every built-in card.
const PLAYER_ROWS: usize = 4;

#[derive(Debug, Clone)]
pub struct CardSpec {
    pub column_widths: Vec<u32>,
    pub rows: Vec<Vec<String>>,
    pub margin: u32,
    pub smudges: Vec<(usize, usize)>,
}

impl CardSpec {
    pub fn with_margin(mut self, margin: u32) -> Self {
        self.margin = margin;
        self
    }

    /// Black out the interior of cell (`row`, `column`).
    pub fn smudge(mut self, row: usize, column: usize) -> Self {
        self.smudges.push((row, column));
        self
    }

    fn column_bounds(&self) -> Vec<u32> {
        let mut bounds = vec![self.margin];
        for w in &self.column_widths {
            let last = bounds[bounds.len() - 1];
            bounds.push(last + w);
        }
        bounds
    }

    fn row_bounds(&self) -> Vec<u32> {
        (0..=self.rows.len() as u32)
            .map(|r| self.margin + r * ROW_HEIGHT)
            .collect()
    }

    pub fn render(&self) -> GrayImage {
        let xs = self.column_bounds();
        let ys = self.row_bounds();
        let (left, right) = (xs[0], xs[xs.len() - 1]);
        let (top, bottom) = (ys[0], ys[ys.len() - 1]);

        let mut img = GrayImage::from_pixel(right + RULE + self.margin, bottom + RULE + self.margin, PAPER);

        for &y in &ys {
            fill(&mut img, left, y, right + RULE - left, RULE, INK);
        }
        for &x in &xs {
            fill(&mut img, x, top, RULE, bottom + RULE - top, INK);
        }

        for (r, row) in self.rows.iter().enumerate() {
            for (c, text) in row.iter().enumerate() {
                if self.smudges.contains(&(r, c)) {
                    let (x0, x1) = (xs[c] + SMUDGE_INSET, xs[c + 1] - SMUDGE_INSET);
                    let (y0, y1) = (ys[r] + SMUDGE_INSET, ys[r + 1] - SMUDGE_INSET);
                    fill(&mut img, x0, y0, x1 - x0, y1 - y0, SMUDGE);
                } else {
                    draw_text(&mut img, text, xs[c], ys[r], xs[c + 1] - xs[c], ROW_HEIGHT);
                }
            }
        }
        img
    }
}

fn fill(img: &mut GrayImage, x: u32, y: u32, w: u32, h: u32, color: Luma<u8>) {
    draw_filled_rect_mut(img, Rect::at(x as i32, y as i32).of_size(w, h), color);
}

/// Center `text` in the box at (`x`, `y`).
fn draw_text(img: &mut GrayImage, text: &str, x: u32, y: u32, w: u32, h: u32) {
    if text.is_empty() {
        return;
    }
    let advance = 6 * SCALE;
    let text_w = text.chars().count() as u32 * advance - SCALE;
    let x0 = x + RULE + (w - RULE - text_w) / 2;
    let y0 = y + RULE + (h - RULE - 7 * SCALE) / 2;

    for (i, ch) in text.chars().enumerate() {
        let Some(rows) = glyph_rows(ch) else { continue };
        let gx = x0 + i as u32 * advance;
        for (ry, bits) in rows.iter().enumerate() {
            for cx in 0..5u32 {
                if bits & (0x10 >> cx) != 0 {
                    fill(img, gx + cx * SCALE, y0 + ry as u32 * SCALE, SCALE, SCALE, INK);
                }
            }
        }
    }
}

// ── Cards ─────────────────────────────────────────────────

fn strings(values: impl IntoIterator<Item = u32>) -> Vec<String> {
    values.into_iter().map(|v| v.to_string()).collect()
}

fn pad_players(rows: &mut Vec<Vec<String>>, columns: usize, players: usize) {
    for _ in players..PLAYER_ROWS {
        rows.push(vec![String::new(); columns]);
    }
}

fn widths(columns: usize) -> Vec<u32> {
    let mut w = vec![LABEL_WIDTH];
    w.extend(std::iter::repeat(CELL_WIDTH).take(columns - 1));
    w
}

fn spec(column_widths: Vec<u32>, rows: Vec<Vec<String>>) -> CardSpec {
    CardSpec {
        column_widths,
        rows,
        margin: MARGIN,
        smudges: Vec::new(),
    }
}

/// Name, 1-18, TOT with a par row.
pub fn compact_18(players: &[(&str, [u32; 18])]) -> CardSpec {
    let line = |label: &str, values: &[u32]| {
        let mut row = vec![label.to_string()];
        row.extend(strings(values.iter().copied()));
        row.push(values.iter().sum::<u32>().to_string());
        row
    };

    let mut header = vec!["HOLE".to_string()];
    header.extend(strings(1..=18));
    header.push("TOT".into());

    let mut rows = vec![header, line("PAR", &PAR_18)];
    rows.extend(players.iter().map(|(name, strokes)| line(name, strokes)));
    pad_players(&mut rows, 20, players.len());
    spec(widths(20), rows)
}

/// Name, 1-9, OUT, 10-18, IN, TOT with a par row.
pub fn classic_18(players: &[(&str, [u32; 18])]) -> CardSpec {
    let line = |label: &str, values: &[u32]| {
        let (front, back) = values.split_at(9);
        let (out, inn) = (front.iter().sum::<u32>(), back.iter().sum::<u32>());
        let mut row = vec![label.to_string()];
        row.extend(strings(front.iter().copied()));
        row.push(out.to_string());
        row.extend(strings(back.iter().copied()));
        row.push(inn.to_string());
        row.push((out + inn).to_string());
        row
    };

    let mut header = vec!["HOLE".to_string()];
    header.extend(strings(1..=9));
    header.push("OUT".into());
    header.extend(strings(10..=18));
    header.push("IN".into());
    header.push("TOT".into());

    let mut rows = vec![header, line("PAR", &PAR_18)];
    rows.extend(players.iter().map(|(name, strokes)| line(name, strokes)));
    pad_players(&mut rows, 22, players.len());
    spec(widths(22), rows)
}

fn nine_hole(players: &[(&str, [u32; 9])], with_par: bool) -> CardSpec {
    let line = |label: &str, values: &[u32]| {
        let mut row = vec![label.to_string()];
        row.extend(strings(values.iter().copied()));
        row.push(values.iter().sum::<u32>().to_string());
        row
    };

    let mut header = vec!["HOLE".to_string()];
    header.extend(strings(1..=9));
    header.push("TOT".into());

    let mut rows = vec![header];
    if with_par {
        rows.push(line("PAR", &PAR_18[..9]));
    }
    rows.extend(players.iter().map(|(name, strokes)| line(name, strokes)));
    pad_players(&mut rows, 11, players.len());
    spec(widths(11), rows)
}

/// Name, 1-9, TOT with a par row.
pub fn classic_9(players: &[(&str, [u32; 9])]) -> CardSpec {
    nine_hole(players, true)
}

/// Name, 1-9, TOT without a par row.
pub fn practice_9(players: &[(&str, [u32; 9])]) -> CardSpec {
    nine_hole(players, false)
}

pub const YARDS_9: [u32; 9] = [385, 402, 165, 510, 370, 390, 150, 420, 530];
pub const HANDICAP_9: [u32; 9] = [7, 3, 9, 1, 5, 8, 2, 6, 4];

/// Name, 1-9, TOT with par, yardage and handicap rows.
pub fn course_info_9(players: &[(&str, [u32; 9])]) -> CardSpec {
    let info = |label: &str, values: &[u32]| {
        let mut row = vec![label.to_string()];
        row.extend(strings(values.iter().copied()));
        row.push(String::new());
        row
    };
    let mut spec = classic_9(players);
    spec.rows.insert(2, info("YDS", &YARDS_9));
    spec.rows.insert(3, info("HCP", &HANDICAP_9));
    spec
}

pub fn sample_players_18() -> Vec<(&'static str, [u32; 18])> {
    vec![
        ("ALEX", [5, 4, 3, 6, 5, 4, 3, 5, 6, 4, 4, 5, 5, 4, 3, 5, 4, 6]),
        ("SAM", [4, 5, 4, 5, 4, 5, 3, 4, 5, 5, 3, 6, 4, 5, 4, 4, 5, 5]),
    ]
}

pub fn sample_players_9() -> Vec<(&'static str, [u32; 9])> {
    vec![
        ("ALEX", [5, 4, 3, 6, 5, 4, 3, 5, 6]),
        ("SAM", [4, 5, 4, 5, 4, 5, 3, 4, 5]),
    ]
}

// ── Photo distortions ─────────────────────────────────────

pub fn png_bytes(img: &GrayImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img.clone())
        .write_to(&mut buf, ImageFormat::Png)
        .expect("PNG encoding of a test card");
    buf.into_inner()
}

/// Rotate clockwise by `degrees` about the center, filling with paper.
pub fn rotate_degrees(img: &GrayImage, degrees: f32) -> GrayImage {
    rotate_about_center(img, degrees.to_radians(), Interpolation::Bilinear, PAPER)
}

/// Narrow the top edge by `inset` pixels on each side.
pub fn keystone(img: &GrayImage, inset: f32) -> GrayImage {
    let (w, h) = (img.width() as f32, img.height() as f32);
    let from = [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)];
    let to = [(inset, 0.0), (w - inset, 0.0), (w, h), (0.0, h)];
    let projection = Projection::from_control_points(from, to).expect("non-degenerate keystone");

    let mut out = GrayImage::from_pixel(img.width(), img.height(), PAPER);
    warp_into(img, &projection, Interpolation::Bilinear, PAPER, &mut out);
    out
}

/// Photograph at a different resolution.
pub fn resized(img: &GrayImage, factor: f32) -> GrayImage {
    let w = (img.width() as f32 * factor).round() as u32;
    let h = (img.height() as f32 * factor).round() as u32;
    image::imageops::resize(img, w, h, FilterType::Triangle)
}

/// Lay the card on a uniform surface `border` pixels wider on every side.
pub fn on_surface(img: &GrayImage, border: u32, level: u8) -> GrayImage {
    let mut out = GrayImage::from_pixel(img.width() + 2 * border, img.height() + 2 * border, Luma([level]));
    image::imageops::replace(&mut out, img, border as i64, border as i64);
    out
}
