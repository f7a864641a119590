//! Property-based tests for the orchestration core
//!
//! Distribution, filtering, dedupe and key rotation invariants, checked
//! with proptest.

use proptest::prelude::*;
use std::collections::HashSet;
use varietal::core::coordinator::balance;
use varietal::core::dedupe::{jaccard, token_set, Deduplicator};
use varietal::core::distributor::{distribute, split_evenly};
use varietal::core::filter::{GeneratedCopy, LengthFilter, LengthVerdict};
use varietal::core::variety::Variety;
use varietal::llm::KeyPool;

fn variety_subset() -> impl Strategy<Value = Vec<Variety>> {
    prop::sample::subsequence(Variety::ALL.to_vec(), 1..=Variety::ALL.len())
}

fn word() -> impl Strategy<Value = String> {
    prop::sample::select(vec![
        "save", "now", "fresh", "bold", "today", "new", "free", "fast", "real", "taste", "glow",
        "win",
    ])
    .prop_map(str::to_string)
}

fn copy_text() -> impl Strategy<Value = String> {
    prop::collection::vec(word(), 1..8).prop_map(|w| w.join(" "))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Property: allocation counts always sum to the requested total
    #[test]
    fn prop_distribution_sums_to_total(total in 0_usize..500, varieties in variety_subset()) {
        let allocs = distribute(total, &varieties);
        prop_assert_eq!(allocs.iter().map(|a| a.count).sum::<usize>(), total);
        prop_assert!(allocs.iter().all(|a| a.count > 0));
    }

    /// Property: counts differ by at most one across varieties
    #[test]
    fn prop_distribution_is_even(total in 0_usize..500, n in 1_usize..16) {
        let shares = split_evenly(total, n);
        let max = shares.iter().copied().max().unwrap_or(0);
        let min = shares.iter().copied().min().unwrap_or(0);
        prop_assert!(max - min <= 1);
        // Larger shares come first
        prop_assert!(shares.windows(2).all(|w| w[0] >= w[1]));
    }

    /// Property: below one per variety, the first `total` varieties get exactly 1
    #[test]
    fn prop_minimum_coverage(varieties in variety_subset(), seed in any::<usize>()) {
        let total = seed % varieties.len();
        let allocs = distribute(total, &varieties);

        let mut ordered = varieties.clone();
        ordered.sort();
        prop_assert_eq!(allocs.len(), total);
        for (alloc, expected) in allocs.iter().zip(ordered.iter()) {
            prop_assert_eq!(alloc.variety, *expected);
            prop_assert_eq!(alloc.count, 1);
        }
    }

    /// Property: +10% of the band width is tolerated, +25% is rejected
    #[test]
    fn prop_filter_tolerance_boundary(min in 0_usize..400, width in 1_usize..400) {
        let max = min + width;
        let filter = LengthFilter::new(min, max);

        let inside = max + width / 10;
        let outside = max + (width * 25).div_ceil(100);

        prop_assert!(filter.verdict(inside).is_kept());
        prop_assert_eq!(filter.verdict(outside), LengthVerdict::Rejected);
        prop_assert_eq!(filter.verdict(min), LengthVerdict::Accepted);
        prop_assert_eq!(filter.verdict(max), LengthVerdict::Accepted);
    }

    /// Property: dedupe is idempotent and order-stable
    #[test]
    fn prop_dedupe_idempotent(texts in prop::collection::vec(copy_text(), 0..20)) {
        let copies: Vec<GeneratedCopy> = texts
            .into_iter()
            .map(|t| GeneratedCopy::new(t, "gpt", None))
            .collect();
        let dedupe = Deduplicator::default();

        let once = dedupe.dedupe(copies.clone());
        let twice = dedupe.dedupe(once.clone());
        prop_assert_eq!(&once, &twice);

        // Survivors keep their relative input order
        let positions: Vec<usize> = once
            .iter()
            .map(|c| copies.iter().position(|o| o.id == c.id).unwrap_or(usize::MAX))
            .collect();
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    /// Property: no two survivors exceed the similarity threshold
    #[test]
    fn prop_dedupe_survivors_are_dissimilar(texts in prop::collection::vec(copy_text(), 0..20)) {
        let copies: Vec<GeneratedCopy> = texts
            .into_iter()
            .map(|t| GeneratedCopy::new(t, "gpt", None))
            .collect();
        let kept = Deduplicator::new(0.85).dedupe(copies);

        for (i, a) in kept.iter().enumerate() {
            for b in &kept[i + 1..] {
                prop_assert!(jaccard(&token_set(&a.content), &token_set(&b.content)) <= 0.85);
            }
        }
    }

    /// Property: balancing never invents items and never exceeds a target
    #[test]
    fn prop_balance_conserves_items(
        sizes in prop::collection::vec(0_usize..10, 1..5),
        target in 0_usize..6,
    ) {
        let groups: Vec<Vec<(usize, usize)>> = sizes
            .iter()
            .enumerate()
            .map(|(g, &n)| (0..n).map(|i| (g, i)).collect())
            .collect();
        let targets = vec![target; sizes.len()];
        let produced: usize = sizes.iter().sum();

        let out = balance(groups, &targets);
        let kept: usize = out.iter().map(Vec::len).sum();

        prop_assert!(out.iter().all(|g| g.len() <= target));
        prop_assert_eq!(kept, produced.min(target * sizes.len()));
        let unique: HashSet<_> = out.iter().flatten().collect();
        prop_assert_eq!(unique.len(), kept);
    }

    /// Property: concurrent observers of one exhausted key advance the cursor once
    #[test]
    fn prop_key_rotation_single_advance(
        keys in 2_usize..6,
        observers in 1_usize..8,
        rounds in 0_usize..12,
    ) {
        let pool = KeyPool::new((0..keys).map(|i| format!("key-{}", i)));

        for round in 0..rounds {
            let leases: Vec<_> = (0..observers).filter_map(|_| pool.current()).collect();
            let advanced = leases.iter().filter(|l| pool.advance(l.ticket)).count();
            prop_assert_eq!(advanced, 1);
            prop_assert_eq!(pool.current().map(|l| l.index), Some((round + 1) % keys));
        }
    }
}
