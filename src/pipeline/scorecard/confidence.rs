use std::collections::BTreeSet;

use super::assemble::{Assembly, Evidence, EvidenceClass};
use super::types::{Flag, PlayerScore, Reading, ScorecardRecord};
use crate::pipeline_config::{EvaluatorConfig, EvidenceWeights, FlagPenalties};

/// Aggregate confidence plus the final flag set.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub confidence: f32,
    pub flags: BTreeSet<Flag>,
}

fn weight(class: EvidenceClass, weights: &EvidenceWeights) -> f32 {
    match class {
        EvidenceClass::Stroke => weights.stroke,
        EvidenceClass::Par => weights.par,
        EvidenceClass::Total => weights.total,
        EvidenceClass::HoleNumber => weights.hole_number,
        EvidenceClass::Label => weights.label,
        EvidenceClass::Info => weights.info,
    }
}

/// Weighted geometric mean of evidence confidences. Each confidence is
/// floored so one unknown cell lowers the result without zeroing it.
pub fn weighted_confidence(evidence: &[Evidence], config: &EvaluatorConfig) -> f32 {
    let (mut log_sum, mut weight_sum) = (0.0f64, 0.0f64);
    for e in evidence {
        let w = weight(e.class, &config.weights) as f64;
        let c = e.confidence.clamp(config.confidence_floor, 1.0) as f64;
        log_sum += w * c.ln();
        weight_sum += w;
    }
    if weight_sum <= 0.0 {
        return 0.0;
    }
    ((log_sum / weight_sum).exp() as f32).clamp(0.0, 1.0)
}

/// Multiplicative penalty of one flag.
pub fn penalty(flag: Flag, penalties: &FlagPenalties) -> f32 {
    match flag {
        Flag::HoleCountInferred => penalties.hole_count_inferred,
        Flag::IncompleteRound => penalties.incomplete_round,
        Flag::LayoutUndetected => 0.0,
        Flag::LowConfidenceCells => penalties.low_confidence_cells,
        Flag::ModeUnrecognized => penalties.mode_unrecognized,
        Flag::ParInconsistent => penalties.par_inconsistent,
        Flag::PlayerCountZero => penalties.player_count_zero,
        Flag::Timeout => penalties.timeout,
        Flag::TotalsMismatch => penalties.totals_mismatch,
    }
}

// ── Cross-checks ──────────────────────────────────────────

/// A card-printed value that is illegible or differs from the computed one.
fn disagrees(card: Option<Reading>, computed: Reading) -> bool {
    match (card, computed) {
        (None, _) => false,
        (Some(Reading::Unknown), _) => true,
        (Some(Reading::Known(c)), Reading::Known(v)) => c != v,
        (Some(Reading::Known(_)), Reading::Unknown) => false,
    }
}

fn player_totals_mismatch(player: &PlayerScore, hole_count: usize) -> bool {
    if disagrees(player.card_total, player.total) {
        return true;
    }
    if hole_count != 18 || player.strokes.len() != 18 {
        return false;
    }
    let (front, back) = player.strokes.split_at(9);
    disagrees(player.card_out, Reading::sum(front)) || disagrees(player.card_in, Reading::sum(back))
}

fn par_inconsistent(record: &ScorecardRecord, par_expected: bool) -> bool {
    if par_expected && record.holes.iter().any(|h| h.par.is_unknown()) {
        return true;
    }
    match record.par_total {
        Some(par_total) => disagrees(record.card_par_total, par_total),
        None => false,
    }
}

/// Final confidence and flags for an assembled record.
///
/// `flags` carries anything raised upstream (mode fallback, timeout); the
/// assembler's own flags are merged in.
pub fn evaluate(assembly: &Assembly, mut flags: BTreeSet<Flag>, config: &EvaluatorConfig) -> Evaluation {
    flags.extend(assembly.flags.iter().copied());
    let record = &assembly.record;

    if assembly
        .evidence
        .iter()
        .any(|e| !e.resolved || e.confidence < config.low_confidence)
    {
        flags.insert(Flag::LowConfidenceCells);
    }
    if record
        .players
        .iter()
        .any(|p| player_totals_mismatch(p, record.hole_count))
    {
        flags.insert(Flag::TotalsMismatch);
    }
    if par_inconsistent(record, assembly.par_expected) {
        flags.insert(Flag::ParInconsistent);
    }
    if record.players.is_empty() {
        flags.insert(Flag::PlayerCountZero);
    }

    let base = weighted_confidence(&assembly.evidence, config);
    let confidence = flags
        .iter()
        .fold(base, |c, &flag| c * penalty(flag, &config.penalties))
        .clamp(0.0, 1.0);

    Evaluation { confidence, flags }
}
