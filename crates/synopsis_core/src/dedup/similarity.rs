//! Composite reference similarity.
//!
//! # Invariants
//! - `similarity(a, b) == similarity(b, a)` bit for bit.
//! - Scores are in `[0, 1]`; weights are normalized by their sum.
//! - Equal source identifiers short-circuit to a certain 1.0.

use crate::config::DedupConfig;
use crate::dedup::DedupRecord;
use std::collections::BTreeSet;

/// Score for one reference pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    pub score: f64,
    pub certain: bool,
}

/// Jaccard index of two token lists; 0.0 when both are empty.
pub fn jaccard(left: &[String], right: &[String]) -> f64 {
    let left: BTreeSet<&str> = left.iter().map(String::as_str).collect();
    let right: BTreeSet<&str> = right.iter().map(String::as_str).collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    let intersection = left.intersection(&right).count();
    intersection as f64 / union as f64
}

/// 1.0 for equal years, partial credit for a one-year gap, else 0.0.
pub fn year_proximity(left: Option<i32>, right: Option<i32>, partial_credit: f64) -> f64 {
    match (left, right) {
        (Some(a), Some(b)) if a == b => 1.0,
        (Some(a), Some(b)) if (a - b).abs() == 1 => partial_credit,
        _ => 0.0,
    }
}

pub fn similarity(left: &DedupRecord, right: &DedupRecord, config: &DedupConfig) -> Similarity {
    if let (Some(a), Some(b)) = (left.source_id.as_ref(), right.source_id.as_ref()) {
        if a == b {
            return Similarity {
                score: 1.0,
                certain: true,
            };
        }
    }

    let total_weight = config.title_weight + config.author_weight + config.year_weight;
    if total_weight <= 0.0 {
        return Similarity {
            score: 0.0,
            certain: false,
        };
    }

    let title = jaccard(&left.title_tokens, &right.title_tokens);
    let authors = jaccard(&left.author_keys, &right.author_keys);
    let year = year_proximity(left.year, right.year, config.year_partial_credit);
    let weighted =
        config.title_weight * title + config.author_weight * authors + config.year_weight * year;

    Similarity {
        score: (weighted / total_weight).clamp(0.0, 1.0),
        certain: false,
    }
}
