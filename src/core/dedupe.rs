//! Near-duplicate removal
//!
//! Token sets are lowercase, whitespace-delimited words. A candidate is
//! dropped when its Jaccard similarity with any already accepted candidate
//! exceeds the threshold. First seen wins and order is preserved.

use crate::core::filter::GeneratedCopy;
use std::collections::HashSet;
use tracing::debug;

/// Default similarity above which two copies are duplicates
pub const DEFAULT_THRESHOLD: f64 = 0.85;

/// Lowercased whitespace tokens
pub fn token_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(str::to_lowercase).collect()
}

/// Intersection over union; two empty sets count as identical
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// A dropped copy and the accepted one it matched
#[derive(Debug, Clone, PartialEq)]
pub struct DroppedDuplicate {
    pub copy: GeneratedCopy,
    pub kept_id: uuid::Uuid,
    pub similarity: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deduplicator {
    pub threshold: f64,
}

impl Default for Deduplicator {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl Deduplicator {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Unique copies in input order
    pub fn dedupe(&self, copies: Vec<GeneratedCopy>) -> Vec<GeneratedCopy> {
        self.partition(copies).0
    }

    /// Unique copies plus what was dropped
    pub fn partition(
        &self,
        copies: Vec<GeneratedCopy>,
    ) -> (Vec<GeneratedCopy>, Vec<DroppedDuplicate>) {
        let mut kept: Vec<(GeneratedCopy, HashSet<String>)> = Vec::with_capacity(copies.len());
        let mut dropped = Vec::new();

        for copy in copies {
            let tokens = token_set(&copy.content);
            let best = kept
                .iter()
                .map(|(k, set)| (k.id, jaccard(&tokens, set)))
                .find(|(_, sim)| *sim > self.threshold);

            match best {
                Some((kept_id, similarity)) => {
                    debug!(
                        model = %copy.source_model,
                        similarity,
                        char_count = copy.char_count,
                        "Dropping near-duplicate"
                    );
                    dropped.push(DroppedDuplicate {
                        copy,
                        kept_id,
                        similarity,
                    });
                }
                None => kept.push((copy, tokens)),
            }
        }

        (kept.into_iter().map(|(c, _)| c).collect(), dropped)
    }
}
