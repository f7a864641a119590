//! Variety Distributor
//!
//! Splits a requested candidate total across varieties (or ensemble
//! models). Counts always sum to the total; zero-count entries are dropped.

use crate::core::variety::Variety;
use serde::Serialize;

/// How many candidates one variety should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VarietyAllocation {
    pub variety: Variety,
    pub count: usize,
}

/// Split `total` over `n` slots: the first `total % n` slots get one extra
///
/// When `total < n` this assigns exactly 1 to the first `total` slots.
/// Returns an empty vector when `n == 0`.
pub fn split_evenly(total: usize, n: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let base = total / n;
    let remainder = total % n;
    (0..n).map(|i| base + usize::from(i < remainder)).collect()
}

/// Allocate `total` candidates across `requested` varieties
///
/// An empty `requested` means every variety. Duplicates are ignored and the
/// allocation follows table order regardless of request order.
pub fn distribute(total: usize, requested: &[Variety]) -> Vec<VarietyAllocation> {
    let mut varieties: Vec<Variety> = if requested.is_empty() {
        Variety::ALL.to_vec()
    } else {
        requested.to_vec()
    };
    varieties.sort();
    varieties.dedup();

    split_evenly(total, varieties.len())
        .into_iter()
        .zip(varieties)
        .filter(|(count, _)| *count > 0)
        .map(|(count, variety)| VarietyAllocation { variety, count })
        .collect()
}
