//! Inverted index over a reference population snapshot.
//!
//! Candidate generation only; scoring happens in `similarity`.

use crate::dedup::DedupRecord;
use crate::model::reference::SourceId;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
pub struct PopulationIndex {
    records: Vec<DedupRecord>,
    by_token: HashMap<String, Vec<usize>>,
    by_source: HashMap<SourceId, Vec<usize>>,
}

impl PopulationIndex {
    /// Builds the index; records are sorted by id so results are stable.
    pub fn build(mut records: Vec<DedupRecord>) -> Self {
        records.sort_by_key(|record| record.id);
        let mut by_token: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_source: HashMap<SourceId, Vec<usize>> = HashMap::new();
        for (position, record) in records.iter().enumerate() {
            for token in &record.title_tokens {
                by_token.entry(token.clone()).or_default().push(position);
            }
            if let Some(source_id) = record.source_id.as_ref() {
                by_source
                    .entry(source_id.clone())
                    .or_default()
                    .push(position);
            }
        }
        Self {
            records,
            by_token,
            by_source,
        }
    }

    pub fn records(&self) -> &[DedupRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Positions of records sharing a title token or the source identifier.
    pub fn candidates(&self, incoming: &DedupRecord) -> BTreeSet<usize> {
        let mut positions = BTreeSet::new();
        for token in &incoming.title_tokens {
            if let Some(hits) = self.by_token.get(token) {
                positions.extend(hits.iter().copied());
            }
        }
        if let Some(hits) = incoming
            .source_id
            .as_ref()
            .and_then(|source_id| self.by_source.get(source_id))
        {
            positions.extend(hits.iter().copied());
        }
        positions.retain(|position| self.records[*position].id != incoming.id);
        positions
    }
}
