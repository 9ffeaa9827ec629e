//! Diversified top-N selection under a per-category concentration cap.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::debug;

use crate::domain::scoring::ScoredInstrument;

/// The first this-many admissions ignore the category cap.
pub const SMALL_N_EXEMPTION: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedInstrument {
    pub code: String,
    pub score: f64,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectionOutcome {
    /// Admitted instruments, descending by score.
    pub selected: Vec<SelectedInstrument>,
    /// Codes passed over because their category was full.
    pub capped: Vec<String>,
}

impl SelectionOutcome {
    pub fn codes(&self) -> Vec<String> {
        self.selected.iter().map(|s| s.code.clone()).collect()
    }
}

/// Descending score, ascending code on ties.
pub fn rank_order(a: &ScoredInstrument, b: &ScoredInstrument) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.code().cmp(b.code()))
}

/// Pick up to `target_count` instruments by score, admitting one only while its
/// category holds less than `max_category_share` of `target_count`, or while
/// fewer than [`SMALL_N_EXEMPTION`] have been admitted.
pub fn select_diversified(
    scored: &[ScoredInstrument],
    target_count: usize,
    max_category_share: f64,
) -> SelectionOutcome {
    let mut ranked: Vec<&ScoredInstrument> = scored.iter().collect();
    ranked.sort_by(|a, b| rank_order(a, b));

    let mut outcome = SelectionOutcome::default();
    let mut per_category: HashMap<&str, usize> = HashMap::new();
    let denominator = target_count.max(1) as f64;

    for candidate in ranked {
        if outcome.selected.len() >= target_count {
            break;
        }
        let held = per_category
            .get(candidate.category.as_str())
            .copied()
            .unwrap_or(0);
        let share = held as f64 / denominator;

        if share < max_category_share || outcome.selected.len() < SMALL_N_EXEMPTION {
            *per_category.entry(candidate.category.as_str()).or_insert(0) += 1;
            outcome.selected.push(SelectedInstrument {
                code: candidate.code().to_string(),
                score: candidate.score,
                category: candidate.category.clone(),
            });
        } else {
            debug!(
                code = candidate.code(),
                category = %candidate.category,
                held,
                "category cap reached"
            );
            outcome.capped.push(candidate.code().to_string());
        }
    }

    outcome
}

/// Codes of [`select_diversified`], in selection order.
pub fn select(
    scored: &[ScoredInstrument],
    target_count: usize,
    max_category_share: f64,
) -> Vec<String> {
    select_diversified(scored, target_count, max_category_share).codes()
}
