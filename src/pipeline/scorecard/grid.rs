//! Ink masks and ruled-grid line detection.
//!
//! Rules are found by line-segment aggregation: every scanline is split into
//! ink runs, runs shorter than a fraction of the longest run are discarded as
//! text or noise, and scanlines whose remaining coverage is close to the
//! strongest scanline are rule candidates. Adjacent candidates collapse into
//! one boundary at their centroid. A cluster thicker than a printed rule is a
//! solid slab (a dark table edge, a shadow) and is dropped before the
//! strongest scanline is measured again.

use image::GrayImage;

use super::types::Quad;
use crate::pipeline_config::LayoutConfig;

// ═══════════════════════════════════════════════════════════
// Ink mask
// ═══════════════════════════════════════════════════════════

/// Binarized view of a grayscale image.
#[derive(Debug, Clone)]
pub struct InkMask {
    width: u32,
    height: u32,
    ink: Vec<bool>,
}

impl InkMask {
    pub fn from_gray(img: &GrayImage, threshold: u8) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            ink: img.pixels().map(|p| p.0[0] <= threshold).collect(),
        }
    }

    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.ink[(y * self.width + x) as usize]
    }
}

/// Otsu's threshold. Returns the middle of the optimal plateau so a clean
/// two-tone image splits halfway between its tones.
pub fn otsu_threshold(img: &GrayImage) -> u8 {
    let mut hist = [0u64; 256];
    for p in img.pixels() {
        hist[p.0[0] as usize] += 1;
    }
    let total: u64 = hist.iter().sum();
    let sum_all: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &c)| i as f64 * c as f64)
        .sum();

    let mut w0 = 0u64;
    let mut sum0 = 0.0f64;
    let mut best = f64::NEG_INFINITY;
    let (mut first, mut last) = (127usize, 127usize);

    for t in 0..256 {
        w0 += hist[t];
        sum0 += t as f64 * hist[t] as f64;
        let w1 = total - w0;
        if w0 == 0 || w1 == 0 {
            continue;
        }
        let m0 = sum0 / w0 as f64;
        let m1 = (sum_all - sum0) / w1 as f64;
        let between = w0 as f64 * w1 as f64 * (m0 - m1).powi(2);

        if between > best * (1.0 + 1e-9) {
            best = between;
            first = t;
            last = t;
        } else if between >= best * (1.0 - 1e-9) {
            last = t;
        }
    }

    ((first + last) / 2) as u8
}

// ═══════════════════════════════════════════════════════════
// Rule detection
// ═══════════════════════════════════════════════════════════

/// Detected rule boundaries plus the outer frame they enclose.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rules {
    /// y positions of horizontal rules, ascending.
    pub horizontal: Vec<u32>,
    /// x positions of vertical rules, ascending.
    pub vertical: Vec<u32>,
    /// Corners of the ruled area from long-run extremes.
    pub frame: Option<Quad>,
}

impl Rules {
    pub fn rows(&self) -> usize {
        self.horizontal.len().saturating_sub(1)
    }

    pub fn columns(&self) -> usize {
        self.vertical.len().saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Axis {
    Horizontal,
    Vertical,
}

#[derive(Debug, Clone, Copy)]
struct Run {
    line: u32,
    start: u32,
    len: u32,
}

impl Run {
    fn endpoints(&self, axis: Axis) -> [(f32, f32); 2] {
        let (a, b) = (self.start as f32, (self.start + self.len - 1) as f32);
        let line = self.line as f32;
        match axis {
            Axis::Horizontal => [(a, line), (b, line)],
            Axis::Vertical => [(line, a), (line, b)],
        }
    }
}

fn collect_runs(mask: &InkMask, axis: Axis) -> Vec<Run> {
    let (lines, length) = match axis {
        Axis::Horizontal => (mask.height, mask.width),
        Axis::Vertical => (mask.width, mask.height),
    };

    let mut runs = Vec::new();
    for line in 0..lines {
        let mut start: Option<u32> = None;
        for pos in 0..=length {
            let ink = pos < length
                && match axis {
                    Axis::Horizontal => mask.is_ink(pos, line),
                    Axis::Vertical => mask.is_ink(line, pos),
                };
            match (ink, start) {
                (true, None) => start = Some(pos),
                (false, Some(s)) => {
                    runs.push(Run {
                        line,
                        start: s,
                        len: pos - s,
                    });
                    start = None;
                }
                _ => {}
            }
        }
    }
    runs
}

/// Runs long enough to belong to a rule on this axis.
fn long_runs(runs: Vec<Run>, config: &LayoutConfig) -> Vec<Run> {
    let longest = runs.iter().map(|r| r.len).max().unwrap_or(0);
    let min_run = (config.min_segment_px as f32).max(longest as f32 * config.min_run_fraction);
    runs.into_iter()
        .filter(|r| r.len as f32 >= min_run)
        .collect()
}

/// Adjacent rule scanlines: `first..=last`, reported at `center`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    first: u32,
    last: u32,
    center: u32,
}

impl Span {
    fn thickness(&self) -> u32 {
        self.last - self.first + 1
    }

    fn contains(&self, line: u32) -> bool {
        (self.first..=self.last).contains(&line)
    }
}

fn rule_spans(runs: &[Run], lines: u32, config: &LayoutConfig) -> Vec<Span> {
    let mut coverage = vec![0u32; lines as usize];
    for run in runs {
        coverage[run.line as usize] += run.len;
    }
    let mut excluded = vec![false; lines as usize];

    // Each pass excludes at least one more scanline, so this terminates.
    loop {
        let strongest = coverage
            .iter()
            .zip(&excluded)
            .filter(|(_, &x)| !x)
            .map(|(&c, _)| c)
            .max()
            .unwrap_or(0);
        if strongest == 0 {
            return Vec::new();
        }

        let floor = strongest as f32 * config.line_coverage;
        let candidates: Vec<u32> = coverage
            .iter()
            .zip(&excluded)
            .enumerate()
            .filter(|(_, (&c, &x))| !x && c > 0 && c as f32 >= floor)
            .map(|(line, _)| line as u32)
            .collect();

        let (rules, slabs): (Vec<Span>, Vec<Span>) = cluster(&candidates, config.min_rule_gap_px)
            .into_iter()
            .partition(|s| s.thickness() <= config.max_rule_thickness_px);
        if slabs.is_empty() {
            return rules;
        }
        for slab in slabs {
            excluded[slab.first as usize..=slab.last as usize].fill(true);
        }
    }
}

/// Collapse sorted scanlines closer than `gap` into spans centered on their centroid.
fn cluster(lines: &[u32], gap: u32) -> Vec<Span> {
    let mut out = Vec::new();
    let mut group: Vec<u32> = Vec::new();
    for &line in lines {
        if let Some(&last) = group.last() {
            if line - last > gap {
                out.push(span_of(&group));
                group.clear();
            }
        }
        group.push(line);
    }
    if !group.is_empty() {
        out.push(span_of(&group));
    }
    out
}

fn span_of(group: &[u32]) -> Span {
    let sum: u64 = group.iter().map(|&v| v as u64).sum();
    Span {
        first: group[0],
        last: group[group.len() - 1],
        center: (sum / group.len() as u64) as u32,
    }
}

/// Outer quadrilateral from the extremes of `x + y` and `x - y` over rule endpoints.
fn frame_from_endpoints(points: &[(f32, f32)]) -> Option<Quad> {
    let first = *points.first()?;
    let (mut tl, mut tr, mut br, mut bl) = (first, first, first, first);
    for &(x, y) in points {
        if x + y < tl.0 + tl.1 {
            tl = (x, y);
        }
        if x + y > br.0 + br.1 {
            br = (x, y);
        }
        if x - y > tr.0 - tr.1 {
            tr = (x, y);
        }
        if x - y < bl.0 - bl.1 {
            bl = (x, y);
        }
    }
    Some([tl, tr, br, bl])
}

/// Detect horizontal and vertical rules and the frame they span.
pub fn detect_rules(mask: &InkMask, config: &LayoutConfig) -> Rules {
    let h_runs = long_runs(collect_runs(mask, Axis::Horizontal), config);
    let v_runs = long_runs(collect_runs(mask, Axis::Vertical), config);

    let h_spans = rule_spans(&h_runs, mask.height, config);
    let v_spans = rule_spans(&v_runs, mask.width, config);

    // Only runs on kept rules bound the frame, never slabs or text.
    let frame = if h_spans.len() >= 2 || v_spans.len() >= 2 {
        let on_rule = |spans: &[Span], run: &Run| spans.iter().any(|s| s.contains(run.line));
        let points: Vec<(f32, f32)> = h_runs
            .iter()
            .filter(|r| on_rule(&h_spans, r))
            .flat_map(|r| r.endpoints(Axis::Horizontal))
            .chain(
                v_runs
                    .iter()
                    .filter(|r| on_rule(&v_spans, r))
                    .flat_map(|r| r.endpoints(Axis::Vertical)),
            )
            .collect();
        frame_from_endpoints(&points)
    } else {
        None
    };

    Rules {
        horizontal: h_spans.iter().map(|s| s.center).collect(),
        vertical: v_spans.iter().map(|s| s.center).collect(),
        frame,
    }
}

/// Distance between consecutive positions.
pub fn bands(positions: &[u32]) -> Vec<u32> {
    positions.windows(2).map(|w| w[1] - w[0]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// White canvas with a `rows x cols` grid of 2px rules.
    fn grid_image(rows: u32, cols: u32, cell: u32, margin: u32) -> GrayImage {
        let w = margin * 2 + cols * cell + 2;
        let h = margin * 2 + rows * cell + 2;
        let mut img = GrayImage::from_pixel(w, h, Luma([255]));
        for r in 0..=rows {
            let y = margin + r * cell;
            for x in margin..margin + cols * cell + 2 {
                img.put_pixel(x, y, Luma([0]));
                img.put_pixel(x, y + 1, Luma([0]));
            }
        }
        for c in 0..=cols {
            let x = margin + c * cell;
            for y in margin..margin + rows * cell + 2 {
                img.put_pixel(x, y, Luma([0]));
                img.put_pixel(x + 1, y, Luma([0]));
            }
        }
        img
    }

    #[test]
    fn otsu_splits_two_tone_image_halfway() {
        let img = grid_image(3, 4, 30, 10);
        assert_eq!(otsu_threshold(&img), 127);
    }

    #[test]
    fn otsu_separates_gray_ink_from_paper() {
        let mut img = GrayImage::from_pixel(40, 40, Luma([230]));
        for x in 0..40 {
            for y in 0..10 {
                img.put_pixel(x, y, Luma([40]));
            }
        }
        let t = otsu_threshold(&img);
        assert!(t >= 40 && t < 230, "threshold {t}");
    }

    #[test]
    fn detects_every_rule_of_a_grid() {
        let img = grid_image(4, 6, 40, 15);
        let mask = InkMask::from_gray(&img, 127);
        let rules = detect_rules(&mask, &LayoutConfig::default());

        assert_eq!(rules.horizontal, vec![15, 55, 95, 135, 175]);
        assert_eq!(rules.vertical, vec![15, 55, 95, 135, 175, 215, 255]);
        assert_eq!(rules.rows(), 4);
        assert_eq!(rules.columns(), 6);
    }

    #[test]
    fn frame_matches_grid_corners() {
        let img = grid_image(2, 3, 50, 20);
        let mask = InkMask::from_gray(&img, 127);
        let frame = detect_rules(&mask, &LayoutConfig::default()).frame.unwrap();
        assert_eq!(frame[0], (20.0, 20.0));
        assert_eq!(frame[1], (171.0, 20.0));
        assert_eq!(frame[2], (171.0, 121.0));
        assert_eq!(frame[3], (20.0, 121.0));
    }

    #[test]
    fn short_strokes_are_not_rules() {
        let mut img = GrayImage::from_pixel(200, 100, Luma([255]));
        // One long line and a few short text-like strokes.
        for x in 10..190 {
            img.put_pixel(x, 50, Luma([0]));
        }
        for x in 20..30 {
            img.put_pixel(x, 20, Luma([0]));
        }
        let mask = InkMask::from_gray(&img, 127);
        let rules = detect_rules(&mask, &LayoutConfig::default());
        assert_eq!(rules.horizontal, vec![50]);
        assert!(rules.vertical.is_empty());
    }

    #[test]
    fn blank_page_has_no_rules() {
        let img = GrayImage::from_pixel(100, 100, Luma([255]));
        let rules = detect_rules(&InkMask::from_gray(&img, 127), &LayoutConfig::default());
        assert_eq!(rules, Rules::default());
    }

    #[test]
    fn cluster_merges_adjacent_lines() {
        let spans = cluster(&[10, 11, 12, 40, 41], 6);
        let centers: Vec<u32> = spans.iter().map(|s| s.center).collect();
        assert_eq!(centers, vec![11, 40]);
        assert_eq!(spans[0].thickness(), 3);
        assert_eq!(spans[1].thickness(), 2);
        assert!(cluster(&[], 6).is_empty());
    }

    #[test]
    fn dark_slab_is_not_a_rule() {
        // A grid photographed with a dark table edge across the top.
        let mut img = grid_image(2, 3, 50, 60);
        let width = img.width();
        for y in 0..40 {
            for x in 0..width {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        for x in 0..30 {
            for y in 0..img.height() {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        let rules = detect_rules(&InkMask::from_gray(&img, 127), &LayoutConfig::default());

        assert_eq!(rules.horizontal, vec![60, 110, 160]);
        assert_eq!(rules.vertical, vec![60, 110, 160, 210]);
        let frame = rules.frame.unwrap();
        assert_eq!(frame[0], (60.0, 60.0));
        assert_eq!(frame[2], (211.0, 161.0));
    }

    #[test]
    fn bands_between_positions() {
        assert_eq!(bands(&[0, 150, 200, 250]), vec![150, 50, 50]);
    }
}
