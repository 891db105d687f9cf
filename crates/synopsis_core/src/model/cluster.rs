//! Duplicate cluster model.
//!
//! # Invariants
//! - Pair scores are stored with `a < b` so each pair has one canonical form.
//! - `members` is sorted and deduplicated.
//! - Only `unresolved` clusters accept decisions; decided clusters replay.
//! - Unresolved clusters never share a member: when a new reference links
//!   several of them, they are folded into the oldest one and the others are
//!   marked `absorbed` with a link to it.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type ClusterId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Unresolved,
    Merged,
    RejectedAsDistinct,
    /// Folded into another unresolved cluster; see `absorbed_into`.
    Absorbed,
}

impl ClusterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Merged => "merged",
            Self::RejectedAsDistinct => "rejected_as_distinct",
            Self::Absorbed => "absorbed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "unresolved" => Some(Self::Unresolved),
            "merged" => Some(Self::Merged),
            "rejected_as_distinct" => Some(Self::RejectedAsDistinct),
            "absorbed" => Some(Self::Absorbed),
            _ => None,
        }
    }
}

/// Similarity of one reference pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PairScore {
    pub a: Uuid,
    pub b: Uuid,
    pub score: f64,
    /// Exact source-identifier match.
    pub certain: bool,
}

impl PairScore {
    /// Builds a pair in canonical `a < b` order.
    pub fn new(left: Uuid, right: Uuid, score: f64, certain: bool) -> Self {
        let (a, b) = if left <= right {
            (left, right)
        } else {
            (right, left)
        };
        Self {
            a,
            b,
            score,
            certain,
        }
    }

    pub fn involves(&self, id: Uuid) -> bool {
        self.a == id || self.b == id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateCluster {
    pub id: ClusterId,
    pub status: ClusterStatus,
    pub members: Vec<Uuid>,
    pub pairs: Vec<PairScore>,
    pub survivor: Option<Uuid>,
    /// Cluster that took over this one's members and pairs.
    pub absorbed_into: Option<ClusterId>,
    pub decided_by: Option<String>,
    pub decided_at: Option<i64>,
    pub created_at: i64,
}

impl DuplicateCluster {
    /// Creates an unresolved cluster from scored pairs.
    pub fn proposed(pairs: Vec<PairScore>, created_at: i64) -> Self {
        let mut members: Vec<Uuid> = pairs.iter().flat_map(|pair| [pair.a, pair.b]).collect();
        members.sort();
        members.dedup();
        let mut pairs = pairs;
        sort_pairs(&mut pairs);
        Self {
            id: Uuid::new_v4(),
            status: ClusterStatus::Unresolved,
            members,
            pairs,
            survivor: None,
            absorbed_into: None,
            decided_by: None,
            decided_at: None,
            created_at,
        }
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.members.binary_search(&id).is_ok()
    }

    /// Whether any pair in the cluster is an exact identifier match.
    pub fn is_certain(&self) -> bool {
        self.pairs.iter().any(|pair| pair.certain)
    }
}

pub(crate) fn sort_pairs(pairs: &mut [PairScore]) {
    pairs.sort_by(|left, right| (left.a, left.b).cmp(&(right.a, right.b)));
}

/// Result of applying (or replaying) a merge decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    pub cluster_id: ClusterId,
    pub survivor: Uuid,
    /// Non-survivors now pointing at `survivor`, sorted.
    pub merged: Vec<Uuid>,
    /// Summaries moved from a merged-away member to `survivor`, sorted.
    #[serde(default)]
    pub repointed_summaries: Vec<Uuid>,
    /// Revisions appended: one per touched reference in `(survivor, merged..)`
    /// order, then one per re-pointed summary.
    pub revision_ids: Vec<Uuid>,
    pub replayed: bool,
}

#[cfg(test)]
mod tests {
    use super::{DuplicateCluster, PairScore};
    use uuid::Uuid;

    #[test]
    fn pair_order_is_canonical() {
        let x = Uuid::new_v4();
        let y = Uuid::new_v4();
        let first = PairScore::new(x, y, 0.9, false);
        let second = PairScore::new(y, x, 0.9, false);
        assert_eq!(first, second);
        assert!(first.a < first.b);
    }

    #[test]
    fn proposed_cluster_collects_sorted_members() {
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        let cluster = DuplicateCluster::proposed(
            vec![
                PairScore::new(ids[0], ids[1], 0.8, false),
                PairScore::new(ids[1], ids[2], 1.0, true),
            ],
            10,
        );
        assert_eq!(cluster.members.len(), 3);
        assert!(cluster.members.windows(2).all(|w| w[0] < w[1]));
        assert!(cluster.is_certain());
        assert!(ids.iter().all(|id| cluster.contains(*id)));
    }
}
