//! Layout detection: ruled grid → template or generic grid → cell regions.

use tracing::debug;

use super::grid::{detect_rules, InkMask};
use super::templates::{ScorecardTemplate, TemplateCatalog};
use super::types::{
    CellKind, CellRegion, ColumnRole, DetectedLayout, LayoutTemplate, Mode, NormalizedImage,
    Region, RowRole,
};
use super::ScorecardError;
use crate::pipeline_config::LayoutConfig;

/// Dice overlap of two sorted position lists, matching one-to-one within `tolerance`.
pub fn structural_correlation(detected: &[f32], expected: &[f32], tolerance: f32) -> f32 {
    let total = detected.len() + expected.len();
    if total == 0 {
        return 0.0;
    }

    let (mut i, mut j, mut matched) = (0usize, 0usize, 0usize);
    while i < detected.len() && j < expected.len() {
        let diff = detected[i] - expected[j];
        if diff.abs() <= tolerance {
            matched += 1;
            i += 1;
            j += 1;
        } else if diff < 0.0 {
            i += 1;
        } else {
            j += 1;
        }
    }
    2.0 * matched as f32 / total as f32
}

fn normalize_positions(positions: &[u32]) -> Vec<f32> {
    let (Some(&first), Some(&last)) = (positions.first(), positions.last()) else {
        return Vec::new();
    };
    let span = (last - first).max(1) as f32;
    positions.iter().map(|&p| (p - first) as f32 / span).collect()
}

fn cell_kind(row: RowRole, column: ColumnRole) -> CellKind {
    match (row, column) {
        (RowRole::Header, _) => CellKind::Header,
        (_, ColumnRole::Label) => CellKind::Label,
        (RowRole::Par, ColumnRole::Hole(_)) => CellKind::Par,
        (RowRole::Player, ColumnRole::Hole(_)) => CellKind::Stroke,
        (RowRole::Par | RowRole::Player, ColumnRole::Out | ColumnRole::In) => CellKind::Subtotal,
        (RowRole::Par | RowRole::Player, ColumnRole::Total) => CellKind::Total,
        _ => CellKind::Value,
    }
}

pub struct LayoutDetector<'a> {
    catalog: &'a TemplateCatalog,
    config: &'a LayoutConfig,
}

impl<'a> LayoutDetector<'a> {
    pub fn new(catalog: &'a TemplateCatalog, config: &'a LayoutConfig) -> Self {
        Self { catalog, config }
    }

    /// Fails with `LayoutNotFound` when fewer than 2 rows or 2 columns are ruled.
    pub fn detect(&self, image: &NormalizedImage, mode: Mode) -> Result<DetectedLayout, ScorecardError> {
        let mask = InkMask::from_gray(&image.image, image.ink_threshold);
        let rules = detect_rules(&mask, self.config);
        let (rows, columns) = (rules.rows(), rules.columns());

        if rows < 2 || columns < 2 {
            return Err(ScorecardError::LayoutNotFound { rows, columns });
        }

        let horizontal = normalize_positions(&rules.horizontal);
        let vertical = normalize_positions(&rules.vertical);
        let chosen = self.match_template(&horizontal, &vertical, rows, columns, mode);

        let (template, row_roles, column_roles) = match chosen {
            Some(t) => (
                LayoutTemplate::Known {
                    id: t.id.clone(),
                    expected_columns: t.column_count(),
                    expected_rows: t.row_count(),
                },
                t.row_roles(),
                t.column_roles(),
            ),
            None => {
                let mut row_roles = vec![RowRole::Unassigned; rows];
                row_roles[0] = RowRole::Header;
                let mut column_roles = vec![ColumnRole::Unassigned; columns];
                column_roles[0] = ColumnRole::Label;
                (
                    LayoutTemplate::GenericGrid {
                        detected_rows: rows,
                        detected_columns: columns,
                    },
                    row_roles,
                    column_roles,
                )
            }
        };

        let mut cells = Vec::with_capacity(rows * columns);
        for (r, row_role) in row_roles.iter().enumerate() {
            for (c, column_role) in column_roles.iter().enumerate() {
                let (x0, x1) = (rules.vertical[c], rules.vertical[c + 1]);
                let (y0, y1) = (rules.horizontal[r], rules.horizontal[r + 1]);
                cells.push(CellRegion {
                    index: r * columns + c,
                    row: r,
                    column: c,
                    region: Region {
                        x: x0,
                        y: y0,
                        width: x1 - x0,
                        height: y1 - y0,
                    },
                    kind: cell_kind(*row_role, *column_role),
                });
            }
        }

        Ok(DetectedLayout {
            template,
            row_bounds: rules.horizontal,
            column_bounds: rules.vertical,
            row_roles,
            column_roles,
            cells,
        })
    }

    /// Best template for the grid, or `None` when no template clearly wins.
    fn match_template(
        &self,
        horizontal: &[f32],
        vertical: &[f32],
        rows: usize,
        columns: usize,
        mode: Mode,
    ) -> Option<&'a ScorecardTemplate> {
        let tolerance = self.config.position_tolerance;
        let mut scored: Vec<(&ScorecardTemplate, f32)> = self
            .catalog
            .for_mode(mode)
            .into_iter()
            .map(|t| {
                let col_score = structural_correlation(vertical, &t.column_rule_positions(), tolerance);
                let row_score = structural_correlation(horizontal, &t.row_rule_positions(), tolerance);
                (t, (col_score + row_score) / 2.0)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        let (&(best, best_score), rest) = scored.split_first()?;
        let runner_up = rest.first().map_or(0.0, |(_, s)| *s);

        debug!(
            template = %best.id,
            score = best_score,
            runner_up,
            rows,
            columns,
            "Template correlation"
        );

        let clear_winner = best_score >= self.config.template_threshold
            && best_score - runner_up > self.config.template_epsilon;
        let same_shape = best.row_count() == rows && best.column_count() == columns;
        (clear_winner && same_shape).then_some(best)
    }
}
