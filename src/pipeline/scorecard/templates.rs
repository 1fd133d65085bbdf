//! Known scorecard layouts.
//!
//! A template is a list of relative column and row widths plus the role of
//! each column and row. Rule positions derived from the widths are what the
//! layout detector correlates against.

use serde::Serialize;

use super::types::{ColumnRole, Mode, RowRole};

/// Width of the player-name column relative to a score column.
const LABEL_UNITS: u32 = 3;

#[derive(Debug, Clone, Serialize)]
pub struct ScorecardTemplate {
    pub id: String,
    /// Modes whose catalog subset includes this template.
    pub modes: Vec<Mode>,
    pub columns: Vec<(ColumnRole, u32)>,
    pub rows: Vec<(RowRole, u32)>,
}

impl ScorecardTemplate {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_roles(&self) -> Vec<ColumnRole> {
        self.columns.iter().map(|(role, _)| *role).collect()
    }

    pub fn row_roles(&self) -> Vec<RowRole> {
        self.rows.iter().map(|(role, _)| *role).collect()
    }

    /// Vertical rule positions normalized to [0, 1].
    pub fn column_rule_positions(&self) -> Vec<f32> {
        normalized_positions(self.columns.iter().map(|(_, units)| *units))
    }

    /// Horizontal rule positions normalized to [0, 1].
    pub fn row_rule_positions(&self) -> Vec<f32> {
        normalized_positions(self.rows.iter().map(|(_, units)| *units))
    }

    pub fn supports(&self, mode: Mode) -> bool {
        self.modes.contains(&mode)
    }
}

fn normalized_positions(widths: impl Iterator<Item = u32>) -> Vec<f32> {
    let mut edges = vec![0u32];
    for width in widths {
        let last = *edges.last().unwrap_or(&0);
        edges.push(last + width);
    }
    let total = *edges.last().unwrap_or(&0) as f32;
    if total == 0.0 {
        return Vec::new();
    }
    edges.into_iter().map(|e| e as f32 / total).collect()
}

// ── Builders ──────────────────────────────────────────────

fn holes(range: std::ops::RangeInclusive<u32>) -> impl Iterator<Item = (ColumnRole, u32)> {
    range.map(|n| (ColumnRole::Hole(n), 1))
}

fn score_rows(with_par: bool, players: usize) -> Vec<(RowRole, u32)> {
    let mut rows = vec![(RowRole::Header, 1)];
    if with_par {
        rows.push((RowRole::Par, 1));
    }
    rows.extend(std::iter::repeat((RowRole::Player, 1)).take(players));
    rows
}

fn template(id: &str, modes: &[Mode], columns: Vec<(ColumnRole, u32)>, rows: Vec<(RowRole, u32)>) -> ScorecardTemplate {
    ScorecardTemplate {
        id: id.to_string(),
        modes: modes.to_vec(),
        columns,
        rows,
    }
}

/// Name, 1-9, OUT, 10-18, IN, TOT.
fn classic_18() -> ScorecardTemplate {
    let mut columns = vec![(ColumnRole::Label, LABEL_UNITS)];
    columns.extend(holes(1..=9));
    columns.push((ColumnRole::Out, 1));
    columns.extend(holes(10..=18));
    columns.push((ColumnRole::In, 1));
    columns.push((ColumnRole::Total, 1));
    template("classic-18", &[Mode::Course, Mode::Generic], columns, score_rows(true, 4))
}

/// Name, 1-18, TOT.
fn compact_18() -> ScorecardTemplate {
    let mut columns = vec![(ColumnRole::Label, LABEL_UNITS)];
    columns.extend(holes(1..=18));
    columns.push((ColumnRole::Total, 1));
    template("compact-18", &[Mode::Course, Mode::Generic], columns, score_rows(true, 4))
}

/// Name, 1-9, TOT.
fn classic_9() -> ScorecardTemplate {
    let mut columns = vec![(ColumnRole::Label, LABEL_UNITS)];
    columns.extend(holes(1..=9));
    columns.push((ColumnRole::Total, 1));
    template("classic-9", &[Mode::Course, Mode::Generic], columns, score_rows(true, 4))
}

/// Name, 1-9, TOT without a par row.
fn practice_9() -> ScorecardTemplate {
    let mut columns = vec![(ColumnRole::Label, LABEL_UNITS)];
    columns.extend(holes(1..=9));
    columns.push((ColumnRole::Total, 1));
    template("practice-9", &[Mode::Practice, Mode::Generic], columns, score_rows(false, 4))
}

// ═══════════════════════════════════════════════════════════
// Catalog
// ═══════════════════════════════════════════════════════════

/// Read-only set of layouts the detector may commit to.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateCatalog {
    templates: Vec<ScorecardTemplate>,
}

impl TemplateCatalog {
    pub fn new(templates: Vec<ScorecardTemplate>) -> Self {
        Self { templates }
    }

    pub fn builtin() -> Self {
        Self::new(vec![classic_18(), compact_18(), classic_9(), practice_9()])
    }

    /// Templates applicable to `mode`.
    pub fn for_mode(&self, mode: Mode) -> Vec<&ScorecardTemplate> {
        self.templates.iter().filter(|t| t.supports(mode)).collect()
    }

    pub fn get(&self, id: &str) -> Option<&ScorecardTemplate> {
        self.templates.iter().find(|t| t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_shapes() {
        let catalog = TemplateCatalog::builtin();
        let shape = |id: &str| {
            let t = catalog.get(id).unwrap();
            (t.column_count(), t.row_count())
        };
        assert_eq!(shape("classic-18"), (22, 6));
        assert_eq!(shape("compact-18"), (20, 6));
        assert_eq!(shape("classic-9"), (11, 6));
        assert_eq!(shape("practice-9"), (11, 5));
    }

    #[test]
    fn mode_subsets() {
        let catalog = TemplateCatalog::builtin();
        let ids = |mode| -> Vec<String> {
            catalog.for_mode(mode).iter().map(|t| t.id.clone()).collect()
        };
        assert_eq!(ids(Mode::Course), vec!["classic-18", "compact-18", "classic-9"]);
        assert_eq!(ids(Mode::Practice), vec!["practice-9"]);
        assert_eq!(ids(Mode::Generic).len(), 4);
    }

    #[test]
    fn rule_positions_are_normalized() {
        let t = classic_9();
        let cols = t.column_rule_positions();
        assert_eq!(cols.len(), 12);
        assert_eq!(cols[0], 0.0);
        assert!((cols[1] - 3.0 / 13.0).abs() < 1e-6);
        assert_eq!(*cols.last().unwrap(), 1.0);

        let rows = t.row_rule_positions();
        assert_eq!(rows.len(), 7);
        assert!((rows[1] - 1.0 / 6.0).abs() < 1e-6);
    }

    #[test]
    fn classic_18_roles() {
        let roles = classic_18().column_roles();
        assert_eq!(roles[0], ColumnRole::Label);
        assert_eq!(roles[1], ColumnRole::Hole(1));
        assert_eq!(roles[10], ColumnRole::Out);
        assert_eq!(roles[11], ColumnRole::Hole(10));
        assert_eq!(roles[20], ColumnRole::In);
        assert_eq!(roles[21], ColumnRole::Total);
        assert_eq!(practice_9().row_roles()[1], RowRole::Player);
    }
}
