//! Pure folding of per-case results into submission aggregates.
//!
//! Used both live, as case packets stream in, and at finalization. Cases in
//! the same batch score jointly: the batch contributes its minimum points
//! and its maximum total, so one failed member fails the whole batch and
//! inconsistent per-case totals cannot inflate the denominator.

use crate::Verdict;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// One graded test case, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    /// Batch group, None for independently scored cases.
    pub batch: Option<i32>,
    pub points: f64,
    pub total: f64,
    /// Execution time in seconds.
    pub time: f64,
    /// Peak memory in kilobytes.
    pub memory: f64,
    pub verdict: Verdict,
}

/// Aggregates folded from a full case set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingSummary {
    /// Total time across all cases, in seconds.
    pub time: f64,
    /// Peak memory across all cases, in kilobytes.
    pub memory: f64,
    pub case_points: f64,
    pub case_total: f64,
    /// Worst verdict observed.
    pub verdict: Verdict,
}

/// Fold an ordered case set into its aggregates.
///
/// An empty set folds to an all-zero AC summary. A completed submission
/// always has at least one case, so this path indicates a logic error
/// upstream and is logged.
pub fn fold(cases: &[CaseResult]) -> GradingSummary {
    if cases.is_empty() {
        warn!("folding an empty case set");
    }

    let mut time = 0.0;
    let mut memory: f64 = 0.0;
    let mut case_points = 0.0;
    let mut case_total = 0.0;
    let mut verdict = Verdict::AC;
    let mut batches: BTreeMap<i32, (f64, f64)> = BTreeMap::new();

    for case in cases {
        time += case.time;
        memory = memory.max(case.memory);
        verdict = verdict.max(case.verdict);

        match case.batch {
            None => {
                case_points += case.points;
                case_total += case.total;
            }
            Some(id) => {
                batches
                    .entry(id)
                    .and_modify(|(points, total)| {
                        *points = points.min(case.points);
                        *total = total.max(case.total);
                    })
                    .or_insert((case.points, case.total));
            }
        }
    }

    for (points, total) in batches.values() {
        case_points += points;
        case_total += total;
    }

    GradingSummary {
        time,
        memory,
        case_points,
        case_total,
        verdict,
    }
}

/// Compute the awarded points for a folded submission.
///
/// Intermediate sums stay in floating point; only the final value is
/// rounded, to one decimal place. Problems without partial credit award
/// either everything or nothing.
pub fn award_points(case_points: f64, case_total: f64, max_points: f64, partial: bool) -> f64 {
    let awarded = if case_total > 0.0 {
        round_1dp(case_points / case_total * max_points)
    } else {
        0.0
    };
    if !partial && awarded != max_points {
        return 0.0;
    }
    awarded
}

fn round_1dp(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
