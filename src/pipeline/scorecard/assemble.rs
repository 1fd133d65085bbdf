//! Semantic assembly: recognized cells → typed scorecard record.
//!
//! Known templates supply row and column roles directly. Generic grids derive
//! them from what was read in the label column and the header row. Golf
//! priors then decide the hole count and pick plausible values among each
//! cell's hypotheses. Anything that cannot be resolved stays `unknown`.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use super::types::{
    Cell, CellState, ColumnRole, DetectedLayout, Flag, Hole, LayoutTemplate, Mode, PlayerScore,
    Reading, RowRole, ScorecardRecord,
};
use crate::pipeline_config::{AssemblerConfig, GolfRules, ValueRange};

/// Highest hole number a card may print.
const MAX_HOLES: u32 = 18;

static HOLE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:HOLE|HOLES|NO)$").unwrap());
static PAR_LABEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^PAR$").unwrap());
static OUT_LABEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:OUT|FRONT|F9)$").unwrap());
static IN_LABEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:IN|BACK|B9)$").unwrap());
static TOTAL_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:TOT|TOTAL|GROSS|SCORE)$").unwrap());
static YARDAGE_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:YDS|YARDS|YARDAGE|METERS|MTRS)$").unwrap());
static HANDICAP_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:HCP|HDCP|HANDICAP|INDEX|SI)$").unwrap());
static INFO_LABEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:TEE|TEES|RATING|SLOPE)$").unwrap());

// ═══════════════════════════════════════════════════════════
// Output types
// ═══════════════════════════════════════════════════════════

/// Which part of the card a piece of evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceClass {
    Stroke,
    Par,
    Total,
    HoleNumber,
    Label,
    /// Yardage and handicap rows.
    Info,
}

/// One cell's contribution to overall confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evidence {
    pub class: EvidenceClass,
    pub confidence: f32,
    /// False when the cell had to become `unknown`.
    pub resolved: bool,
}

#[derive(Debug, Clone)]
pub struct Assembly {
    pub record: ScorecardRecord,
    pub evidence: Vec<Evidence>,
    /// Flags raised during assembly.
    pub flags: BTreeSet<Flag>,
    /// A par row is required under the rules that were finally applied.
    pub par_expected: bool,
}

// ═══════════════════════════════════════════════════════════
// Grid access
// ═══════════════════════════════════════════════════════════

struct Grid<'c> {
    cells: &'c [Cell],
    rows: usize,
    columns: usize,
}

impl<'c> Grid<'c> {
    fn get(&self, row: usize, column: usize) -> Option<&'c Cell> {
        if row >= self.rows || column >= self.columns {
            return None;
        }
        self.cells
            .get(row * self.columns + column)
            .filter(|c| c.row == row && c.column == column)
    }

    fn text(&self, row: usize, column: usize) -> Option<&'c str> {
        self.get(row, column).and_then(Cell::text)
    }

    fn row_is_blank(&self, row: usize) -> bool {
        (0..self.columns).all(|c| self.get(row, c).map_or(true, |cell| cell.state == CellState::Empty))
    }
}

/// Hole number read from a header cell, with its score.
fn header_number(cell: &Cell, margin: f32) -> Option<(u32, f32)> {
    if cell.state != CellState::Read {
        return None;
    }
    cell.candidates
        .select_in_range(ValueRange::new(1, MAX_HOLES), margin)
        .and_then(|h| h.value.map(|v| (v, h.score)))
}

// ═══════════════════════════════════════════════════════════
// Structure
// ═══════════════════════════════════════════════════════════

struct Structure {
    header: Option<usize>,
    row_roles: Vec<RowRole>,
    column_roles: Vec<ColumnRole>,
}

impl Structure {
    fn from_layout(layout: &DetectedLayout) -> Self {
        Self {
            header: layout.row_roles.iter().position(|r| *r == RowRole::Header),
            row_roles: layout.row_roles.clone(),
            column_roles: layout.column_roles.clone(),
        }
    }

    fn rows_with(&self, role: RowRole) -> impl Iterator<Item = usize> + '_ {
        self.row_roles
            .iter()
            .enumerate()
            .filter(move |(_, r)| **r == role)
            .map(|(i, _)| i)
    }

    fn column_with(&self, role: ColumnRole) -> Option<usize> {
        self.column_roles.iter().position(|c| *c == role)
    }
}

/// A column that may hold per-hole values.
#[derive(Debug, Clone, Copy)]
struct HoleColumn {
    column: usize,
    /// Number from the template, or from the header reading on generic grids.
    number: Option<u32>,
    /// Header reading and its score.
    read: Option<(u32, f32)>,
}

// ═══════════════════════════════════════════════════════════
// Evidence collection
// ═══════════════════════════════════════════════════════════

/// Outcome of reading one value cell.
enum Slot {
    Empty,
    Known(u32, f32),
    Unknown,
}

#[derive(Default)]
struct Collector {
    evidence: Vec<Evidence>,
}

impl Collector {
    /// Record the slot's evidence. `None` means the cell was empty.
    fn take(&mut self, slot: Slot, class: EvidenceClass) -> Option<Reading> {
        let (reading, confidence, resolved) = match slot {
            Slot::Empty => (None, 1.0, true),
            Slot::Known(v, score) => (Some(Reading::Known(v)), score, true),
            Slot::Unknown => (Some(Reading::Unknown), 0.0, false),
        };
        self.evidence.push(Evidence {
            class,
            confidence,
            resolved,
        });
        reading
    }
}

// ═══════════════════════════════════════════════════════════
// Assembler
// ═══════════════════════════════════════════════════════════

pub struct SemanticAssembler<'a> {
    rules: &'a GolfRules,
    config: &'a AssemblerConfig,
}

impl<'a> SemanticAssembler<'a> {
    pub fn new(rules: &'a GolfRules, config: &'a AssemblerConfig) -> Self {
        Self { rules, config }
    }

    /// Never fails; unresolvable values become `unknown`.
    pub fn assemble(&self, cells: &[Cell], layout: &DetectedLayout, mode: Mode) -> Assembly {
        let grid = Grid {
            cells,
            rows: layout.rows(),
            columns: layout.columns(),
        };
        let mut flags = BTreeSet::new();
        let mut collector = Collector::default();

        let mut structure = match layout.template {
            LayoutTemplate::Known { .. } => Structure::from_layout(layout),
            LayoutTemplate::GenericGrid { .. } => self.generic_structure(&grid),
        };
        let hole_columns = self.hole_columns(&grid, &structure, &layout.template);

        let mut rules_mode = mode;
        if mode == Mode::Course && structure.rows_with(RowRole::Par).next().is_none() {
            match self.unlabeled_par_row(&grid, &structure, &hole_columns) {
                Some(row) => structure.row_roles[row] = RowRole::Par,
                None => {
                    debug!("No par row on course card, applying generic rules");
                    flags.insert(Flag::ModeUnrecognized);
                    rules_mode = Mode::Generic;
                }
            }
        }

        for hc in &hole_columns {
            let slot = hc.read.map_or(Slot::Unknown, |(v, s)| Slot::Known(v, s));
            collector.take(slot, EvidenceClass::HoleNumber);
        }

        let observed: BTreeSet<u32> = hole_columns.iter().filter_map(|hc| hc.read.map(|(v, _)| v)).collect();
        let (hole_count, inferred) = self.resolve_hole_count(&observed, hole_columns.len(), rules_mode);
        if inferred {
            debug!(hole_count, observed = observed.len(), "Hole count inferred");
            flags.insert(Flag::HoleCountInferred);
        }
        let columns = map_hole_columns(&hole_columns, hole_count);

        // ── Par ──
        let par_row = structure.rows_with(RowRole::Par).next();
        let total_column = structure.column_with(ColumnRole::Total);
        let mut pars = vec![Reading::Unknown; hole_count];
        let mut par_total = None;
        let mut card_par_total = None;
        if let Some(row) = par_row {
            for (i, column) in columns.iter().enumerate() {
                let slot = self.read_slot(column.and_then(|c| grid.get(row, c)), self.rules.par_range);
                pars[i] = collector
                    .take(slot, EvidenceClass::Par)
                    .unwrap_or(Reading::Unknown);
            }
            par_total = Some(Reading::sum(&pars));
            card_par_total = total_column.and_then(|c| {
                let slot = self.read_slot(grid.get(row, c), self.rules.total_range);
                collector.take(slot, EvidenceClass::Total)
            });
        }

        // ── Yardage and handicap ──
        let mut info = |role: RowRole, range: ValueRange| {
            self.info_row(&grid, &structure, role, &columns, range, &mut collector)
        };
        let yardages = info(RowRole::Yardage, self.rules.yardage_range);
        let handicaps = info(RowRole::Handicap, self.rules.handicap_range);

        // ── Players ──
        let out_column = structure.column_with(ColumnRole::Out);
        let in_column = structure.column_with(ColumnRole::In);
        let label_column = structure.column_with(ColumnRole::Label);
        let mut players: Vec<PlayerScore> = Vec::new();
        let mut incomplete = false;

        for row in structure.rows_with(RowRole::Player) {
            if grid.row_is_blank(row) {
                continue;
            }

            let label = label_column.and_then(|c| grid.get(row, c));
            let name = self.player_name(label, players.len() + 1, &mut collector);

            let strokes: Vec<Reading> = columns
                .iter()
                .map(|column| {
                    let slot = self.read_slot(column.and_then(|c| grid.get(row, c)), self.rules.stroke_range);
                    collector.take(slot, EvidenceClass::Stroke).unwrap_or_else(|| {
                        incomplete = true;
                        Reading::Unknown
                    })
                })
                .collect();

            let mut card_value = |column: Option<usize>, range: ValueRange| {
                column.and_then(|c| {
                    let slot = self.read_slot(grid.get(row, c), range);
                    collector.take(slot, EvidenceClass::Total)
                })
            };
            let card_total = card_value(total_column, self.rules.total_range);
            let card_out = card_value(out_column, self.rules.subtotal_range);
            let card_in = card_value(in_column, self.rules.subtotal_range);

            players.push(PlayerScore {
                name: unique_name(name, &players),
                total: Reading::sum(&strokes),
                strokes,
                card_total,
                card_out,
                card_in,
            });
        }

        if incomplete {
            flags.insert(Flag::IncompleteRound);
        }

        let holes = (1..=hole_count as u32)
            .zip(pars)
            .enumerate()
            .map(|(i, (number, par))| Hole {
                number,
                par,
                yardage: yardages.as_ref().map(|row| row[i]),
                handicap: handicaps.as_ref().map(|row| row[i]),
            })
            .collect();

        Assembly {
            record: ScorecardRecord {
                hole_count,
                holes,
                par_total,
                card_par_total,
                players,
            },
            evidence: collector.evidence,
            flags,
            par_expected: rules_mode == Mode::Course,
        }
    }

    /// Per-hole values of the first row with `role`, or `None` without one.
    /// Blank cells read as `unknown`.
    fn info_row(
        &self,
        grid: &Grid<'_>,
        structure: &Structure,
        role: RowRole,
        columns: &[Option<usize>],
        range: ValueRange,
        collector: &mut Collector,
    ) -> Option<Vec<Reading>> {
        let row = structure.rows_with(role).next()?;
        let values = columns
            .iter()
            .map(|column| {
                let slot = self.read_slot(column.and_then(|c| grid.get(row, c)), range);
                collector
                    .take(slot, EvidenceClass::Info)
                    .unwrap_or(Reading::Unknown)
            })
            .collect();
        Some(values)
    }

    fn read_slot(&self, cell: Option<&Cell>, range: ValueRange) -> Slot {
        let Some(cell) = cell else {
            return Slot::Unknown;
        };
        match cell.state {
            CellState::Empty => Slot::Empty,
            CellState::Read => cell
                .candidates
                .select_in_range(range, self.config.hypothesis_margin)
                .and_then(|h| h.value.map(|v| Slot::Known(v, h.score)))
                .unwrap_or(Slot::Unknown),
            CellState::Illegible | CellState::Skipped => Slot::Unknown,
        }
    }

    fn player_name(&self, label: Option<&Cell>, ordinal: usize, collector: &mut Collector) -> String {
        let fallback = || format!("Player {ordinal}");
        let Some(cell) = label else {
            return fallback();
        };
        let (name, confidence, resolved) = match cell.state {
            CellState::Read => (cell.text().map(str::to_string), cell.confidence, true),
            CellState::Empty => (None, 1.0, true),
            CellState::Illegible | CellState::Skipped => (None, 0.0, false),
        };
        collector.evidence.push(Evidence {
            class: EvidenceClass::Label,
            confidence,
            resolved,
        });
        name.unwrap_or_else(fallback)
    }

    // ── Structure resolution ──

    /// Roles of a generic grid from label and header text.
    fn generic_structure(&self, grid: &Grid<'_>) -> Structure {
        let margin = self.config.hypothesis_margin;
        let numbered = |row: usize| {
            let count = (1..grid.columns)
                .filter(|&c| grid.get(row, c).and_then(|cell| header_number(cell, margin)).is_some())
                .count();
            count * 2 >= grid.columns.saturating_sub(1).max(1)
        };
        let header = (0..grid.rows)
            .find(|&r| grid.text(r, 0).is_some_and(|t| HOLE_LABEL.is_match(t)))
            .or_else(|| (0..grid.rows).find(|&r| numbered(r)))
            .unwrap_or(0);

        let row_roles = (0..grid.rows)
            .map(|r| match grid.text(r, 0) {
                _ if r == header => RowRole::Header,
                Some(t) if PAR_LABEL.is_match(t) => RowRole::Par,
                Some(t) if YARDAGE_LABEL.is_match(t) => RowRole::Yardage,
                Some(t) if HANDICAP_LABEL.is_match(t) => RowRole::Handicap,
                Some(t) if INFO_LABEL.is_match(t) => RowRole::Info,
                _ => RowRole::Player,
            })
            .collect();

        let column_roles = (0..grid.columns)
            .map(|c| {
                if c == 0 {
                    return ColumnRole::Label;
                }
                let Some(cell) = grid.get(header, c) else {
                    return ColumnRole::Unassigned;
                };
                if let Some((n, _)) = header_number(cell, margin) {
                    return ColumnRole::Hole(n);
                }
                match cell.text() {
                    Some(t) if OUT_LABEL.is_match(t) => ColumnRole::Out,
                    Some(t) if IN_LABEL.is_match(t) => ColumnRole::In,
                    Some(t) if TOTAL_LABEL.is_match(t) => ColumnRole::Total,
                    _ => ColumnRole::Unassigned,
                }
            })
            .collect();

        Structure {
            header: Some(header),
            row_roles,
            column_roles,
        }
    }

    fn hole_columns(&self, grid: &Grid<'_>, structure: &Structure, template: &LayoutTemplate) -> Vec<HoleColumn> {
        let margin = self.config.hypothesis_margin;
        structure
            .column_roles
            .iter()
            .enumerate()
            .filter_map(|(column, role)| {
                let number = match (role, template) {
                    (ColumnRole::Hole(n), _) => Some(*n),
                    (ColumnRole::Unassigned, LayoutTemplate::GenericGrid { .. }) => None,
                    _ => return None,
                };
                let read = structure
                    .header
                    .and_then(|h| grid.get(h, column))
                    .and_then(|cell| header_number(cell, margin));
                Some(HoleColumn { column, number, read })
            })
            .collect()
    }

    /// First row below the header when it is unlabeled and reads like pars.
    fn unlabeled_par_row(&self, grid: &Grid<'_>, structure: &Structure, hole_columns: &[HoleColumn]) -> Option<usize> {
        let row = structure.header.map_or(0, |h| h + 1);
        if structure.row_roles.get(row) != Some(&RowRole::Player) || hole_columns.is_empty() {
            return None;
        }
        if let Some(label) = structure.column_with(ColumnRole::Label).and_then(|c| grid.get(row, c)) {
            if label.state == CellState::Read {
                return None;
            }
        }
        let par_like = hole_columns
            .iter()
            .filter(|hc| matches!(self.read_slot(grid.get(row, hc.column), self.rules.par_range), Slot::Known(..)))
            .count();
        (par_like as f32 >= hole_columns.len() as f32 * self.config.par_row_ratio).then_some(row)
    }

    /// Hole count and whether it had to be inferred.
    ///
    /// Observed numbers forming exactly `1..=k` for an allowed `k` are taken
    /// as is. Otherwise every allowed count is scored by the holes it would
    /// leave unread plus twice the readings and columns it cannot place.
    pub fn resolve_hole_count(&self, observed: &BTreeSet<u32>, hole_columns: usize, mode: Mode) -> (usize, bool) {
        let mut allowed = self.rules.hole_counts.clone();
        if mode == Mode::Generic
            && (1..=MAX_HOLES as usize).contains(&hole_columns)
            && !allowed.contains(&hole_columns)
        {
            allowed.push(hole_columns);
        }

        if let Some(&k) = observed.last() {
            let contiguous = observed.len() == k as usize;
            if contiguous && allowed.contains(&(k as usize)) {
                return (k as usize, false);
            }
        }

        let best = allowed.iter().copied().min_by_key(|&n| {
            let missing = (1..=n as u32).filter(|h| !observed.contains(h)).count();
            let extra = observed.iter().filter(|&&h| h as usize > n).count() + hole_columns.saturating_sub(n);
            (missing + 2 * extra, n != hole_columns, Reverse(n))
        });
        (best.unwrap_or_else(|| hole_columns.clamp(1, MAX_HOLES as usize)), true)
    }
}

/// Column of each hole `1..=hole_count`: by printed number first, then by
/// position among unnumbered hole columns.
fn map_hole_columns(hole_columns: &[HoleColumn], hole_count: usize) -> Vec<Option<usize>> {
    let by_number: BTreeMap<u32, usize> = hole_columns
        .iter()
        .rev()
        .filter_map(|hc| hc.number.map(|n| (n, hc.column)))
        .collect();

    (1..=hole_count)
        .map(|hole| {
            by_number.get(&(hole as u32)).copied().or_else(|| {
                hole_columns
                    .get(hole - 1)
                    .filter(|hc| hc.number.is_none())
                    .map(|hc| hc.column)
            })
        })
        .collect()
}

/// Suffix repeated names with their occurrence count.
fn unique_name(name: String, players: &[PlayerScore]) -> String {
    let taken = |candidate: &str| players.iter().any(|p| p.name == candidate);
    if !taken(&name) {
        return name;
    }
    (2..)
        .map(|n| format!("{name} ({n})"))
        .find(|candidate| !taken(candidate))
        .unwrap_or(name)
}
