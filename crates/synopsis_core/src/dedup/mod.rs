//! Duplicate detection and cluster placement.
//!
//! # Responsibility
//! - Score a new reference against an indexed population snapshot.
//! - Place a new reference into one unresolved cluster, folding every
//!   cluster it links.
//! - Recompute proposals for a whole population.
//! - Pick a merge survivor with the documented tie-break.
//!
//! # Invariants
//! - Clusters are proposed, never merged here.
//! - Merged-away references never enter a population snapshot.
//! - Output order depends only on ids, never on hash iteration order.

pub mod index;
pub mod similarity;
pub mod union_find;

use crate::config::DedupConfig;
use crate::model::cluster::{sort_pairs, ClusterId, ClusterStatus, DuplicateCluster, PairScore};
use crate::model::reference::{Reference, SourceId};
use index::PopulationIndex;
use similarity::{similarity, Similarity};
use std::collections::{BTreeMap, BTreeSet};
use union_find::UnionFind;
use uuid::Uuid;

/// Match-relevant projection of a reference.
#[derive(Debug, Clone, PartialEq)]
pub struct DedupRecord {
    pub id: Uuid,
    pub source_id: Option<SourceId>,
    pub title_tokens: Vec<String>,
    pub author_keys: Vec<String>,
    pub year: Option<i32>,
    pub completeness: u8,
    pub imported_at: i64,
}

impl DedupRecord {
    pub fn from_reference(reference: &Reference) -> Self {
        Self {
            id: reference.id,
            source_id: reference.source_id.clone(),
            title_tokens: reference.normalized.title_tokens.clone(),
            author_keys: reference.normalized.author_keys.clone(),
            year: reference.year.best_guess(),
            completeness: reference.completeness(),
            imported_at: reference.provenance.imported_at,
        }
    }
}

/// Where a freshly scanned reference lands.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Placement {
    /// Unresolved cluster holding the reference, with every pair it now
    /// carries; `None` for a standalone reference.
    pub cluster: Option<DuplicateCluster>,
    /// `cluster` is a new proposal rather than an existing one extended.
    pub created: bool,
    /// Other unresolved clusters folded into `cluster`.
    pub absorbed: Vec<ClusterId>,
}

impl Placement {
    pub fn is_standalone(&self) -> bool {
        self.cluster.is_none()
    }

    pub fn cluster_ids(&self) -> Vec<ClusterId> {
        self.cluster.iter().map(|cluster| cluster.id).collect()
    }
}

/// Configured duplicate resolver.
#[derive(Debug, Clone)]
pub struct DuplicateResolver {
    config: DedupConfig,
}

impl DuplicateResolver {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn score(&self, left: &DedupRecord, right: &DedupRecord) -> Similarity {
        similarity(left, right, &self.config)
    }

    fn accepts(&self, result: &Similarity) -> bool {
        result.certain || result.score >= self.config.threshold
    }

    /// Pairs between `incoming` and the population at or above the threshold.
    pub fn scan(&self, incoming: &DedupRecord, population: &PopulationIndex) -> Vec<PairScore> {
        let mut pairs: Vec<PairScore> = population
            .candidates(incoming)
            .into_iter()
            .filter_map(|position| {
                let other = &population.records()[position];
                let result = self.score(incoming, other);
                self.accepts(&result)
                    .then(|| PairScore::new(incoming.id, other.id, result.score, result.certain))
            })
            .collect();
        sort_pairs(&mut pairs);
        pairs
    }

    /// Places an incoming record in exactly one unresolved cluster.
    ///
    /// Unresolved clusters containing a match and the unclustered matches are
    /// all linked through the record, so they fold into one cluster: the oldest
    /// linked cluster keeps its id and takes every pair, the rest are listed
    /// in `absorbed`. Without a linked cluster a new proposal is created.
    pub fn place(
        &self,
        incoming_id: Uuid,
        matches: Vec<PairScore>,
        clusters: &[DuplicateCluster],
        now_ms: i64,
    ) -> Placement {
        if matches.is_empty() {
            return Placement::default();
        }
        let matched: BTreeSet<Uuid> = matches
            .iter()
            .map(|pair| if pair.a == incoming_id { pair.b } else { pair.a })
            .collect();
        let mut linked: Vec<&DuplicateCluster> = clusters
            .iter()
            .filter(|cluster| cluster.status == ClusterStatus::Unresolved)
            .filter(|cluster| cluster.members.iter().any(|member| matched.contains(member)))
            .collect();
        linked.sort_by(|left, right| (left.created_at, left.id).cmp(&(right.created_at, right.id)));

        let mut pairs = matches;
        for cluster in &linked {
            pairs.extend(cluster.pairs.iter().copied());
        }
        sort_pairs(&mut pairs);
        pairs.dedup_by(|left, right| left.a == right.a && left.b == right.b);

        match linked.split_first() {
            None => Placement {
                cluster: Some(DuplicateCluster::proposed(pairs, now_ms)),
                created: true,
                absorbed: Vec::new(),
            },
            Some((target, rest)) => {
                let mut cluster = DuplicateCluster::proposed(pairs, target.created_at);
                cluster.id = target.id;
                Placement {
                    cluster: Some(cluster),
                    created: false,
                    absorbed: rest.iter().map(|cluster| cluster.id).collect(),
                }
            }
        }
    }

    /// Full rescan: transitive closure over all pairs at or above threshold.
    pub fn propose_clusters(&self, population: &PopulationIndex, now_ms: i64) -> Vec<DuplicateCluster> {
        let records = population.records();
        let mut sets = UnionFind::new(records.len());
        let mut pairs = Vec::new();

        for (position, record) in records.iter().enumerate() {
            for other_position in population.candidates(record) {
                if other_position <= position {
                    continue;
                }
                let other = &records[other_position];
                let result = self.score(record, other);
                if self.accepts(&result) {
                    sets.union(position, other_position);
                    pairs.push((
                        position,
                        PairScore::new(record.id, other.id, result.score, result.certain),
                    ));
                }
            }
        }

        let mut groups: BTreeMap<usize, Vec<PairScore>> = BTreeMap::new();
        for (position, pair) in pairs {
            let root = sets.find(position);
            groups.entry(root).or_default().push(pair);
        }

        let mut clusters: Vec<DuplicateCluster> = groups
            .into_values()
            .map(|group| DuplicateCluster::proposed(group, now_ms))
            .collect();
        clusters.sort_by(|left, right| left.members.cmp(&right.members));
        clusters
    }
}

/// Merge survivor: most complete, then earliest import, then smallest id.
pub fn choose_survivor(members: &[DedupRecord]) -> Option<&DedupRecord> {
    members.iter().min_by(|left, right| {
        right
            .completeness
            .cmp(&left.completeness)
            .then_with(|| left.imported_at.cmp(&right.imported_at))
            .then_with(|| left.id.cmp(&right.id))
    })
}
