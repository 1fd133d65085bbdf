//! Image normalization for scorecard photos.
//!
//! Turns raw upload bytes into an upright, deskewed, rectified grayscale page
//! with a known ink threshold. Each correction is recorded in
//! [`AppliedTransform`] so debug output can explain what was done.
//!
//! Steps, in order:
//! 1. byte-size guard and decode
//! 2. resolution check
//! 3. EXIF orientation
//! 4. grayscale + pre-downscale of oversized photos
//! 5. degeneracy (contrast) check
//! 6. card isolation from a darker surround
//! 7. illumination flattening, only when the paper background is uneven
//! 8. Otsu ink threshold
//! 9. projection-profile deskew
//! 10. frame rectification (projective warp or crop)
//! 11. quarter-turn correction from the ruled grid
//! 12. resize to a fixed median row height

use std::borrow::Cow;
use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use imageproc::geometric_transformations::{rotate_about_center, warp_into, Interpolation, Projection};
use tracing::{debug, warn};

use super::grid::{bands, detect_rules, otsu_threshold, InkMask, Rules};
use super::types::{AppliedTransform, NormalizedImage, Quad, Region};
use super::ScorecardError;
use crate::pipeline_config::{LayoutConfig, NormalizerConfig, PipelineConfig};

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Maximum upload size in bytes.
const MAX_IMAGE_BYTES: usize = 50 * 1024 * 1024; // 50 MB

/// Smallest valid PNG is ~67 bytes.
const MIN_IMAGE_BYTES: usize = 67;

/// Fraction of ink pixels needed for a meaningful skew projection.
const MIN_SKEW_INK_RATIO: f32 = 0.005;

/// Background percentile used as the paper estimate of a block.
const PAPER_PERCENTILE: f32 = 0.95;

/// A band this much wider than the median band is the name column.
const WIDE_BAND_RATIO: f32 = 1.3;

/// Share of a border-connected dark fill that must be solid interior for it
/// to count as a surround.
const MIN_SURROUND_SOLIDITY: f32 = 0.5;

const PAPER: Luma<u8> = Luma([255]);

// ═══════════════════════════════════════════════════════════
// Service traits
// ═══════════════════════════════════════════════════════════

/// Fixes image orientation from embedded metadata.
///
/// Phone photos store rotation in EXIF tag 0x0112 rather than in the pixels.
pub trait OrientationCorrector: Send + Sync {
    /// Returns the corrected image and the orientation value honoured (1 = none).
    fn correct(&self, raw_bytes: &[u8], image: DynamicImage) -> (DynamicImage, u32);
}

// ── ExifOrientationCorrector ──────────────────────────────

pub struct ExifOrientationCorrector;

impl OrientationCorrector for ExifOrientationCorrector {
    fn correct(&self, raw_bytes: &[u8], image: DynamicImage) -> (DynamicImage, u32) {
        let orientation = read_exif_orientation(raw_bytes);
        (apply_orientation(image, orientation), orientation)
    }
}

/// Read EXIF orientation (1-8). Returns 1 when absent or unreadable.
pub fn read_exif_orientation(bytes: &[u8]) -> u32 {
    let mut cursor = Cursor::new(bytes);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// Apply an EXIF orientation transform.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

// ── GridOrientationEstimator ──────────────────────────────

/// Chooses a quarter-turn correction from the ruled grid.
///
/// A scorecard has more columns than rows and its widest column, the player
/// name column, on the left. A sideways card shows more horizontal than
/// vertical rules with the name column as a tall band at the top or bottom.
pub struct GridOrientationEstimator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Start,
    End,
}

impl GridOrientationEstimator {
    /// Clockwise quarter turns (0-3) that bring the card upright.
    pub fn quarter_turns(rules: &Rules) -> u8 {
        let (h, v) = (rules.horizontal.len(), rules.vertical.len());

        if h >= v + 2 && h >= 4 {
            return match wide_band(&rules.horizontal) {
                // Name column on top: turn counter-clockwise.
                Some(Side::Start) | None => 3,
                Some(Side::End) => 1,
            };
        }

        if v >= 3 && wide_band(&rules.vertical) == Some(Side::End) {
            return 2;
        }
        0
    }
}

/// Which half holds the single widest band, if one stands out.
fn wide_band(positions: &[u32]) -> Option<Side> {
    let widths = bands(positions);
    if widths.len() < 2 {
        return None;
    }
    let mut sorted = widths.clone();
    sorted.sort_unstable();
    let median = sorted[sorted.len() / 2] as f32;

    let (index, &widest) = widths
        .iter()
        .enumerate()
        .max_by_key(|(_, &w)| w)?;
    if (widest as f32) < median * WIDE_BAND_RATIO {
        return None;
    }

    let first = *positions.first()? as f32;
    let last = *positions.last()? as f32;
    let center = (positions[index] + positions[index + 1]) as f32 / 2.0;
    if center < (first + last) / 2.0 {
        Some(Side::Start)
    } else {
        Some(Side::End)
    }
}

// ═══════════════════════════════════════════════════════════
// Normalizer
// ═══════════════════════════════════════════════════════════

/// Bytes in, [`NormalizedImage`] out.
pub struct ImageNormalizer {
    config: NormalizerConfig,
    layout: LayoutConfig,
    orientation: Box<dyn OrientationCorrector>,
}

impl ImageNormalizer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            config: config.normalizer.clone(),
            layout: config.layout.clone(),
            orientation: Box::new(ExifOrientationCorrector),
        }
    }

    /// Replace the metadata orientation service.
    pub fn with_orientation_corrector(mut self, corrector: Box<dyn OrientationCorrector>) -> Self {
        self.orientation = corrector;
        self
    }

    pub fn normalize(&self, image_bytes: &[u8]) -> Result<NormalizedImage, ScorecardError> {
        validate_image_bytes(image_bytes)?;

        let decoded = image::load_from_memory(image_bytes)
            .map_err(|e| ScorecardError::ImageDecode(e.to_string()))?;

        let (w, h) = (decoded.width(), decoded.height());
        let min = self.config.min_dimension;
        if w < min || h < min {
            return Err(ScorecardError::ImageTooDegraded(format!(
                "{w}x{h} is below the {min}px minimum"
            )));
        }

        let mut transform = AppliedTransform::default();
        let (oriented, exif_orientation) = self.orientation.correct(image_bytes, decoded);
        transform.exif_orientation = exif_orientation;

        let luma = oriented.to_luma8();
        let scaled = pre_downscale(&luma, self.config.max_dimension);
        transform.downscale = scaled.width() as f32 / luma.width() as f32;
        let mut gray = scaled.into_owned();

        let contrast = compute_contrast_score(&gray);
        if contrast < self.config.min_contrast {
            return Err(ScorecardError::ImageTooDegraded(format!(
                "near-uniform image (contrast {contrast:.1})"
            )));
        }

        if let Some((card, region)) = isolate_card(&gray, self.config.min_dimension) {
            debug!(
                x = region.x,
                y = region.y,
                width = region.width,
                height = region.height,
                "Card isolated from darker surround"
            );
            gray = card;
            transform.card = Some(region);
        }

        if let Some(flat) = flatten_illumination(
            &gray,
            self.config.illumination_block,
            self.config.illumination_variation,
        ) {
            gray = flat;
            transform.illumination_corrected = true;
        }

        let ink_threshold = otsu_threshold(&gray);

        if let Some(angle) = detect_skew_angle(&gray, ink_threshold, &self.config) {
            debug!(angle_degrees = angle, "Deskewing scorecard");
            gray = rotate_about_center(
                &gray,
                -angle.to_radians(),
                Interpolation::Bilinear,
                PAPER,
            );
            transform.deskew_degrees = angle;
        }

        let rules = detect_rules(&InkMask::from_gray(&gray, ink_threshold), &self.layout);
        if let Some(quad) = rules.frame {
            let rectified = rectify_frame(&gray, quad, &self.config);
            transform.perspective = rectified.perspective;
            transform.crop = rectified.crop;
            gray = rectified.image;
        }

        let rules = detect_rules(&InkMask::from_gray(&gray, ink_threshold), &self.layout);
        let turns = GridOrientationEstimator::quarter_turns(&rules);
        if turns > 0 {
            debug!(
                quarter_turns = turns,
                horizontal_rules = rules.horizontal.len(),
                vertical_rules = rules.vertical.len(),
                "Correcting card orientation"
            );
            gray = match turns {
                1 => image::imageops::rotate90(&gray),
                2 => image::imageops::rotate180(&gray),
                _ => image::imageops::rotate270(&gray),
            };
            transform.quarter_turns = turns;
        }

        let row_positions = if turns % 2 == 1 { &rules.vertical } else { &rules.horizontal };
        if let Some((resized, factor)) = normalize_scale(&gray, row_positions, &self.config) {
            gray = resized;
            transform.scale = factor;
        }

        debug!(
            width = gray.width(),
            height = gray.height(),
            ink_threshold,
            scale = transform.scale,
            illumination_corrected = transform.illumination_corrected,
            "Scorecard image normalized"
        );

        Ok(NormalizedImage {
            image: gray,
            ink_threshold,
            transform,
        })
    }
}

// ═══════════════════════════════════════════════════════════
// Image analysis helpers
// ═══════════════════════════════════════════════════════════

/// RMS contrast: standard deviation of the gray levels.
pub fn compute_contrast_score(img: &GrayImage) -> f32 {
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;

    for pixel in img.pixels() {
        let val = pixel.0[0] as f64;
        sum += val;
        sum_sq += val * val;
        count += 1;
    }

    if count == 0 {
        return 0.0;
    }

    let mean = sum / count as f64;
    let variance = (sum_sq / count as f64) - (mean * mean);
    variance.max(0.0).sqrt() as f32
}

/// Cut the card out of a darker surround such as a table top.
///
/// Pixels at or below the Otsu level that connect to the image border form
/// the surround. A fill that is mostly edge pixels is a rule or text touching
/// the border and is left alone. Returns the card's bounding box with any
/// surround left inside it painted as paper.
fn isolate_card(img: &GrayImage, min_dimension: u32) -> Option<(GrayImage, Region)> {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return None;
    }
    let threshold = otsu_threshold(img);
    let dark = |x: u32, y: u32| img.get_pixel(x, y).0[0] <= threshold;
    let index = |x: u32, y: u32| (y * w + x) as usize;

    let mut surround = vec![false; (w * h) as usize];
    let mut stack: Vec<(u32, u32)> = Vec::new();
    let border = (0..w)
        .flat_map(|x| [(x, 0), (x, h - 1)])
        .chain((0..h).flat_map(|y| [(0, y), (w - 1, y)]));
    for (x, y) in border {
        if dark(x, y) && !surround[index(x, y)] {
            surround[index(x, y)] = true;
            stack.push((x, y));
        }
    }

    let mut filled = 0usize;
    while let Some((x, y)) = stack.pop() {
        filled += 1;
        let neighbours = [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ];
        for (nx, ny) in neighbours {
            if nx < w && ny < h && !surround[index(nx, ny)] && dark(nx, ny) {
                surround[index(nx, ny)] = true;
                stack.push((nx, ny));
            }
        }
    }
    if filled == 0 {
        return None;
    }

    let interior = (1..h - 1)
        .flat_map(|y| (1..w - 1).map(move |x| (x, y)))
        .filter(|&(x, y)| {
            surround[index(x, y)]
                && surround[index(x - 1, y)]
                && surround[index(x + 1, y)]
                && surround[index(x, y - 1)]
                && surround[index(x, y + 1)]
        })
        .count();
    if (interior as f32) < filled as f32 * MIN_SURROUND_SOLIDITY {
        return None;
    }

    let mut bounds: Option<(u32, u32, u32, u32)> = None;
    for y in 0..h {
        for x in 0..w {
            if !surround[index(x, y)] {
                bounds = Some(match bounds {
                    None => (x, y, x + 1, y + 1),
                    Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x + 1), y1.max(y + 1)),
                });
            }
        }
    }
    let (x0, y0, x1, y1) = bounds?;
    let region = Region {
        x: x0,
        y: y0,
        width: x1 - x0,
        height: y1 - y0,
    };
    if region.width < min_dimension || region.height < min_dimension {
        warn!(
            width = region.width,
            height = region.height,
            "Card inside dark surround is too small, keeping full photo"
        );
        return None;
    }

    let card = GrayImage::from_fn(region.width, region.height, |cx, cy| {
        let (x, y) = (region.x + cx, region.y + cy);
        if surround[index(x, y)] {
            PAPER
        } else {
            *img.get_pixel(x, y)
        }
    });
    Some((card, region))
}

/// Resize so the median band between `row_positions` is `target_row_px` tall.
///
/// Returns `None` without two rules, or when the card is already within
/// `scale_tolerance` of the working size.
fn normalize_scale(img: &GrayImage, row_positions: &[u32], config: &NormalizerConfig) -> Option<(GrayImage, f32)> {
    let mut rows = bands(row_positions);
    if rows.is_empty() {
        return None;
    }
    rows.sort_unstable();
    let median = rows[rows.len() / 2].max(1) as f32;

    let (w, h) = img.dimensions();
    let factor = (config.target_row_px as f32 / median)
        .min(config.max_normalized_dimension as f32 / w.max(h) as f32);
    if (factor - 1.0).abs() < config.scale_tolerance {
        return None;
    }

    let new_w = ((w as f32 * factor).round() as u32).max(1);
    let new_h = ((h as f32 * factor).round() as u32).max(1);
    debug!(
        median_row_px = median,
        factor,
        to = format!("{new_w}x{new_h}"),
        "Resizing card to working row height"
    );
    Some((image::imageops::resize(img, new_w, new_h, FilterType::Triangle), factor))
}

/// Paper brightness per block: a high percentile of the block's gray levels.
fn block_backgrounds(img: &GrayImage, block: u32) -> (Vec<f32>, u32, u32) {
    let (w, h) = img.dimensions();
    let bw = w.div_ceil(block);
    let bh = h.div_ceil(block);
    let mut backgrounds = Vec::with_capacity((bw * bh) as usize);

    for by in 0..bh {
        for bx in 0..bw {
            let mut hist = [0u32; 256];
            let mut n = 0u32;
            for y in by * block..((by + 1) * block).min(h) {
                for x in bx * block..((bx + 1) * block).min(w) {
                    hist[img.get_pixel(x, y).0[0] as usize] += 1;
                    n += 1;
                }
            }
            let rank = ((n as f32 * PAPER_PERCENTILE).ceil() as u32).max(1);
            let mut seen = 0u32;
            let mut level = 255u8;
            for (value, &count) in hist.iter().enumerate() {
                seen += count;
                if seen >= rank {
                    level = value as u8;
                    break;
                }
            }
            backgrounds.push(level as f32);
        }
    }
    (backgrounds, bw, bh)
}

/// Divide out an uneven paper background.
///
/// Returns `None` when the background varies by no more than `max_variation`
/// gray levels, leaving clean photos untouched.
pub fn flatten_illumination(img: &GrayImage, block: u32, max_variation: f32) -> Option<GrayImage> {
    let (raw, bw, bh) = block_backgrounds(img, block);
    let lo = raw.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if hi - lo <= max_variation {
        return None;
    }

    // 3x3 mean over the block grid.
    let at = |x: i64, y: i64| -> f32 {
        let cx = x.clamp(0, bw as i64 - 1) as u32;
        let cy = y.clamp(0, bh as i64 - 1) as u32;
        raw[(cy * bw + cx) as usize]
    };
    let mut smooth = vec![0.0f32; raw.len()];
    for by in 0..bh as i64 {
        for bx in 0..bw as i64 {
            let mut acc = 0.0;
            for dy in -1..=1 {
                for dx in -1..=1 {
                    acc += at(bx + dx, by + dy);
                }
            }
            smooth[(by as u32 * bw + bx as u32) as usize] = acc / 9.0;
        }
    }

    let (w, h) = img.dimensions();
    let background_at = |x: u32, y: u32| -> f32 {
        let fx = ((x as f32 + 0.5) / block as f32 - 0.5).clamp(0.0, (bw - 1) as f32);
        let fy = ((y as f32 + 0.5) / block as f32 - 0.5).clamp(0.0, (bh - 1) as f32);
        let (x0, y0) = (fx.floor() as u32, fy.floor() as u32);
        let (x1, y1) = ((x0 + 1).min(bw - 1), (y0 + 1).min(bh - 1));
        let (tx, ty) = (fx - x0 as f32, fy - y0 as f32);
        let s = |bx: u32, by: u32| smooth[(by * bw + bx) as usize];
        let top = s(x0, y0) * (1.0 - tx) + s(x1, y0) * tx;
        let bottom = s(x0, y1) * (1.0 - tx) + s(x1, y1) * tx;
        top * (1.0 - ty) + bottom * ty
    };

    let mut out = GrayImage::new(w, h);
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let value = img.get_pixel(x, y).0[0] as f32;
        let paper = background_at(x, y).max(1.0);
        pixel.0[0] = (value * 255.0 / paper).round().min(255.0) as u8;
    }

    debug!(
        background_min = lo,
        background_max = hi,
        "Flattened uneven illumination"
    );
    Some(out)
}

/// Detect skew in degrees by projection profile.
///
/// Every ink pixel is projected onto `y - x * tan(angle)`; the angle whose
/// profile has the sharpest transitions (sum of squared neighbour
/// differences) aligns the rules. Positive angles mean lines descend to the
/// right. Returns `None` for small angles and for pages with too little ink.
pub fn detect_skew_angle(img: &GrayImage, ink_threshold: u8, config: &NormalizerConfig) -> Option<f32> {
    let (w, h) = img.dimensions();
    if w < 50 || h < 50 {
        return None;
    }

    let points: Vec<(f32, f32)> = img
        .enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] <= ink_threshold)
        .map(|(x, y, _)| (x as f32, y as f32))
        .collect();
    if (points.len() as f32) < (w * h) as f32 * MIN_SKEW_INK_RATIO {
        return None;
    }

    let steps = (config.max_skew_degrees / config.skew_step_degrees).round() as i32;
    let mut best_angle = 0.0f32;
    let mut best_score = f64::NEG_INFINITY;

    // Search outward from zero so ties keep the smaller correction.
    for k in 0..=steps {
        let signs: &[f32] = if k == 0 { &[1.0] } else { &[1.0, -1.0] };
        for &sign in signs {
            let angle = sign * k as f32 * config.skew_step_degrees;
            let score = projection_sharpness(&points, w, h, angle);
            if score > best_score {
                best_score = score;
                best_angle = angle;
            }
        }
    }

    if best_angle.abs() < config.min_skew_degrees {
        None
    } else {
        Some(best_angle)
    }
}

fn projection_sharpness(points: &[(f32, f32)], w: u32, h: u32, angle_deg: f32) -> f64 {
    let tan_a = angle_deg.to_radians().tan();
    let offset = (w as f32 * tan_a.abs()).ceil() as i64 + 1;
    let mut profile = vec![0u32; (h as i64 + 2 * offset) as usize];

    for &(x, y) in points {
        let bin = (y - x * tan_a).round() as i64 + offset;
        if bin >= 0 && (bin as usize) < profile.len() {
            profile[bin as usize] += 1;
        }
    }

    profile
        .windows(2)
        .map(|pair| {
            let diff = pair[1] as f64 - pair[0] as f64;
            diff * diff
        })
        .sum()
}

struct Rectified {
    image: GrayImage,
    perspective: Option<Quad>,
    crop: Option<Region>,
}

/// Warp the frame quadrilateral onto an axis-aligned rectangle when it is
/// visibly non-rectangular, otherwise crop to it.
fn rectify_frame(img: &GrayImage, quad: Quad, config: &NormalizerConfig) -> Rectified {
    let [tl, tr, br, bl] = quad;
    let x0 = tl.0.min(bl.0);
    let x1 = tr.0.max(br.0);
    let y0 = tl.1.min(tr.1);
    let y1 = bl.1.max(br.1);
    let frame_w = x1 - x0;
    let frame_h = y1 - y0;

    if frame_w < 2.0 || frame_h < 2.0 {
        return Rectified {
            image: img.clone(),
            perspective: None,
            crop: None,
        };
    }

    let target = [(x0, y0), (x1, y0), (x1, y1), (x0, y1)];
    let deviation = quad
        .iter()
        .zip(target.iter())
        .map(|(a, b)| ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt())
        .fold(0.0f32, f32::max);

    let margin = config.frame_margin as f32;
    if deviation > config.perspective_tolerance_px {
        let to = [
            (margin, margin),
            (margin + frame_w, margin),
            (margin + frame_w, margin + frame_h),
            (margin, margin + frame_h),
        ];
        match Projection::from_control_points(quad, to) {
            Some(projection) => {
                let out_w = (frame_w + 2.0 * margin).ceil() as u32 + 1;
                let out_h = (frame_h + 2.0 * margin).ceil() as u32 + 1;
                let mut out = GrayImage::from_pixel(out_w, out_h, PAPER);
                warp_into(img, &projection, Interpolation::Bilinear, PAPER, &mut out);
                debug!(deviation_px = deviation, "Rectified perspective");
                return Rectified {
                    image: out,
                    perspective: Some(quad),
                    crop: None,
                };
            }
            None => warn!(
                deviation_px = deviation,
                "Degenerate frame quadrilateral, cropping instead"
            ),
        }
    }

    let (w, h) = img.dimensions();
    let cx0 = (x0 - margin).max(0.0) as u32;
    let cy0 = (y0 - margin).max(0.0) as u32;
    let cx1 = ((x1 + margin) as u32 + 1).min(w);
    let cy1 = ((y1 + margin) as u32 + 1).min(h);
    let region = Region {
        x: cx0,
        y: cy0,
        width: cx1.saturating_sub(cx0),
        height: cy1.saturating_sub(cy0),
    };

    Rectified {
        image: image::imageops::crop_imm(img, region.x, region.y, region.width, region.height)
            .to_image(),
        perspective: None,
        crop: Some(region),
    }
}

// ═══════════════════════════════════════════════════════════
// Byte-level helpers
// ═══════════════════════════════════════════════════════════

pub fn validate_image_bytes(bytes: &[u8]) -> Result<(), ScorecardError> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(ScorecardError::ImageDecode(
            "Image data too small to be valid".into(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ScorecardError::ImageDecode(format!(
            "Image data exceeds {}MB limit",
            MAX_IMAGE_BYTES / (1024 * 1024)
        )));
    }
    Ok(())
}

/// Downscale so the longer side is at most `max_dim`; borrows when already small enough.
fn pre_downscale(img: &GrayImage, max_dim: u32) -> Cow<'_, GrayImage> {
    let (w, h) = (img.width(), img.height());
    let largest = w.max(h);

    if largest <= max_dim {
        return Cow::Borrowed(img);
    }

    let scale = max_dim as f32 / largest as f32;
    let new_w = ((w as f32 * scale).round() as u32).max(1);
    let new_h = ((h as f32 * scale).round() as u32).max(1);

    debug!(
        from = format!("{w}x{h}"),
        to = format!("{new_w}x{new_h}"),
        "Pre-downscaling oversized photo"
    );

    Cow::Owned(image::imageops::resize(img, new_w, new_h, FilterType::Triangle))
}

/// Encode a grayscale page as PNG.
pub fn encode_png(img: &GrayImage) -> Result<Vec<u8>, ScorecardError> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img.clone())
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|e| ScorecardError::Internal(format!("PNG encoding failed: {e}")))?;
    Ok(cursor.into_inner())
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::scorecard::test_support::{self, compact_18, sample_players_18, ROW_HEIGHT};

    fn normalizer() -> ImageNormalizer {
        ImageNormalizer::new(&PipelineConfig::default())
    }

    fn rules_of(normalized: &NormalizedImage) -> Rules {
        let mask = InkMask::from_gray(&normalized.image, normalized.ink_threshold);
        detect_rules(&mask, &LayoutConfig::default())
    }

    fn noise(width: u32, height: u32) -> GrayImage {
        let mut state = 0x2545_f491u32;
        GrayImage::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            Luma([(state & 0xFF) as u8])
        })
    }

    #[test]
    fn exif_absent_is_identity() {
        let png = test_support::png_bytes(&noise(80, 80));
        assert_eq!(read_exif_orientation(&png), 1);
    }

    #[test]
    fn apply_orientation_rotations() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(40, 20));
        assert_eq!(apply_orientation(img.clone(), 1).width(), 40);
        assert_eq!(apply_orientation(img.clone(), 6).width(), 20);
        assert_eq!(apply_orientation(img.clone(), 8).height(), 40);
        assert_eq!(apply_orientation(img.clone(), 3).width(), 40);
        assert_eq!(apply_orientation(img, 42).width(), 40);
    }

    #[test]
    fn empty_bytes_are_decode_errors() {
        let err = normalizer().normalize(&[]).unwrap_err();
        assert!(matches!(err, ScorecardError::ImageDecode(_)));
    }

    #[test]
    fn garbage_bytes_are_decode_errors() {
        let garbage = vec![0xA5u8; 4096];
        let err = normalizer().normalize(&garbage).unwrap_err();
        assert!(matches!(err, ScorecardError::ImageDecode(_)));
    }

    #[test]
    fn tiny_image_is_too_degraded() {
        let png = test_support::png_bytes(&noise(40, 40));
        let err = normalizer().normalize(&png).unwrap_err();
        assert!(matches!(err, ScorecardError::ImageTooDegraded(_)));
    }

    #[test]
    fn uniform_image_is_too_degraded() {
        let png = test_support::png_bytes(&GrayImage::from_pixel(400, 300, Luma([128])));
        let err = normalizer().normalize(&png).unwrap_err();
        assert!(matches!(err, ScorecardError::ImageTooDegraded(_)));
    }

    #[test]
    fn contrast_of_two_tone_image() {
        let mut img = GrayImage::from_pixel(10, 10, Luma([255]));
        for x in 0..5 {
            for y in 0..10 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        assert!((compute_contrast_score(&img) - 127.5).abs() < 0.01);
        assert_eq!(compute_contrast_score(&GrayImage::new(0, 0)), 0.0);
    }

    #[test]
    fn clean_card_needs_no_correction() {
        let card = compact_18(&sample_players_18()).render();
        let normalized = normalizer().normalize(&test_support::png_bytes(&card)).unwrap();
        let t = &normalized.transform;

        assert_eq!(t.exif_orientation, 1);
        assert_eq!(t.quarter_turns, 0);
        assert_eq!(t.deskew_degrees, 0.0);
        assert!(!t.illumination_corrected);
        assert!(t.perspective.is_none());
        assert!(t.crop.is_some());
        assert!(t.card.is_none());
        assert_eq!(t.scale, 2.0);
        assert_eq!(normalized.ink_threshold, 127);

        let rules = rules_of(&normalized);
        assert_eq!(rules.columns(), 20);
        assert_eq!(rules.rows(), 6);
    }

    #[test]
    fn sideways_card_is_turned_upright() {
        let card = compact_18(&sample_players_18()).render();
        let upright = normalizer().normalize(&test_support::png_bytes(&card)).unwrap();

        let sideways = image::imageops::rotate90(&card);
        let turned = normalizer().normalize(&test_support::png_bytes(&sideways)).unwrap();

        assert_eq!(turned.transform.quarter_turns, 3);
        assert_eq!(turned.image, upright.image);
    }

    #[test]
    fn card_on_dark_table_is_isolated() {
        let card = compact_18(&sample_players_18()).render();
        let clean = normalizer().normalize(&test_support::png_bytes(&card)).unwrap();

        let photo = test_support::on_surface(&card, 100, 70);
        let normalized = normalizer().normalize(&test_support::png_bytes(&photo)).unwrap();

        assert_eq!(
            normalized.transform.card,
            Some(Region {
                x: 100,
                y: 100,
                width: card.width(),
                height: card.height(),
            })
        );
        assert_eq!(normalized.ink_threshold, clean.ink_threshold);
        assert_eq!(normalized.image, clean.image);
    }

    #[test]
    fn rules_touching_the_border_are_not_a_surround() {
        let card = compact_18(&sample_players_18()).with_margin(0).render();
        assert!(isolate_card(&card, 64).is_none());
    }

    #[test]
    fn rows_are_resized_to_working_height() {
        let config = NormalizerConfig::default();
        for factor in [0.8f32, 1.5] {
            let card = test_support::resized(&compact_18(&sample_players_18()).render(), factor);
            let normalized = normalizer().normalize(&test_support::png_bytes(&card)).unwrap();

            let expected = config.target_row_px as f32 / (ROW_HEIGHT as f32 * factor);
            let scale = normalized.transform.scale;
            assert!((scale - expected).abs() < expected * 0.05, "{factor}: scale {scale}");

            let rows = bands(&rules_of(&normalized).horizontal);
            assert_eq!(rows.len(), 6);
            for row in rows {
                assert!(row.abs_diff(config.target_row_px) <= 4, "{factor}: row {row}px");
            }
        }
    }

    #[test]
    fn working_size_card_is_not_resized() {
        let card = test_support::resized(&compact_18(&sample_players_18()).render(), 2.0);
        let normalized = normalizer().normalize(&test_support::png_bytes(&card)).unwrap();
        assert_eq!(normalized.transform.scale, 1.0);
    }

    #[test]
    fn custom_orientation_corrector_is_used() {
        struct Quarter;
        impl OrientationCorrector for Quarter {
            fn correct(&self, _raw_bytes: &[u8], image: DynamicImage) -> (DynamicImage, u32) {
                (image.rotate90(), 6)
            }
        }

        let card = compact_18(&sample_players_18()).render();
        let upright = normalizer().normalize(&test_support::png_bytes(&card)).unwrap();

        let stored = image::imageops::rotate270(&card);
        let normalized = normalizer()
            .with_orientation_corrector(Box::new(Quarter))
            .normalize(&test_support::png_bytes(&stored))
            .unwrap();

        assert_eq!(normalized.transform.exif_orientation, 6);
        assert_eq!(normalized.transform.quarter_turns, 0);
        assert_eq!(normalized.image, upright.image);
    }

    #[test]
    fn upside_down_card_is_turned() {
        let card = compact_18(&sample_players_18()).render();
        let flipped = image::imageops::rotate180(&card);
        let normalized = normalizer().normalize(&test_support::png_bytes(&flipped)).unwrap();
        assert_eq!(normalized.transform.quarter_turns, 2);
    }

    #[test]
    fn skewed_card_is_deskewed() {
        let card = compact_18(&sample_players_18()).with_margin(50).render();
        let skewed = test_support::rotate_degrees(&card, 3.0);
        let normalized = normalizer().normalize(&test_support::png_bytes(&skewed)).unwrap();

        let angle = normalized.transform.deskew_degrees;
        assert!((angle - 3.0).abs() <= 0.5, "detected {angle}");
        assert_eq!(rules_of(&normalized).columns(), 20);
    }

    #[test]
    fn straight_lines_report_no_skew() {
        let card = compact_18(&sample_players_18()).render();
        assert_eq!(detect_skew_angle(&card, 127, &NormalizerConfig::default()), None);
    }

    #[test]
    fn keystoned_card_is_rectified() {
        let card = compact_18(&sample_players_18()).with_margin(30).render();
        let keystoned = test_support::keystone(&card, 12.0);
        let normalized = normalizer().normalize(&test_support::png_bytes(&keystoned)).unwrap();

        assert!(normalized.transform.perspective.is_some());
        let rules = rules_of(&normalized);
        assert_eq!(rules.columns(), 20);
        assert_eq!(rules.rows(), 6);
    }

    #[test]
    fn uneven_illumination_is_flattened() {
        // Paper fades from white on the left to mid-gray on the right.
        let mut img = GrayImage::from_fn(256, 128, |x, _| Luma([255 - (x / 2) as u8]));
        for y in 60..62 {
            for x in 0..256 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        let flat = flatten_illumination(&img, 32, 24.0).unwrap();
        assert!(flat.get_pixel(250, 20).0[0] > 215);
        assert!(flat.get_pixel(10, 20).0[0] > 235);
        assert!(flat.get_pixel(250, 60).0[0] < 40);
    }

    #[test]
    fn even_illumination_is_left_alone() {
        let card = compact_18(&sample_players_18()).render();
        assert!(flatten_illumination(&card, 32, 24.0).is_none());
    }

    #[test]
    fn orientation_from_rules() {
        let upright = Rules {
            horizontal: vec![0, 40, 80, 120],
            vertical: vec![0, 150, 200, 250, 300],
            frame: None,
        };
        assert_eq!(GridOrientationEstimator::quarter_turns(&upright), 0);

        let flipped = Rules {
            horizontal: vec![0, 40, 80, 120],
            vertical: vec![0, 50, 100, 150, 300],
            frame: None,
        };
        assert_eq!(GridOrientationEstimator::quarter_turns(&flipped), 2);

        let label_on_top = Rules {
            horizontal: vec![0, 150, 200, 250, 300, 350],
            vertical: vec![0, 40, 80],
            frame: None,
        };
        assert_eq!(GridOrientationEstimator::quarter_turns(&label_on_top), 3);

        let label_at_bottom = Rules {
            horizontal: vec![0, 50, 100, 150, 200, 350],
            vertical: vec![0, 40, 80],
            frame: None,
        };
        assert_eq!(GridOrientationEstimator::quarter_turns(&label_at_bottom), 1);
    }

    #[test]
    fn png_encoding_round_trips_dimensions() {
        let png = encode_png(&GrayImage::from_pixel(30, 20, Luma([200]))).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (30, 20));
    }
}
