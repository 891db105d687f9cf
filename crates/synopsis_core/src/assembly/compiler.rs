//! Content tree construction.
//!
//! # Invariants
//! - Groupings follow outline order, actions follow grouping order.
//! - Entries follow the configured sort key, then reference title, reference
//!   id and summary id.
//! - Eligible: summary `approved`, reference `included` and not merged away.
//! - Summaries of `excluded` references are never gaps or pending; they only
//!   raise an `excluded_reference` warning.
//! - Cancellation and deadlines are checked between groupings.

use crate::assembly::{
    ActionNode, AssemblyWarning, ContentTree, EntryNode, GapMarker, GroupNode, MethodsNode,
};
use crate::config::{AssemblyConfig, IncompletePolicy, SortKey};
use crate::control::OperationControl;
use crate::error::{CoreError, CoreResult};
use crate::model::protocol::Protocol;
use crate::model::reference::Reference;
use crate::model::revision::RevisionId;
use crate::model::summary::Summary;
use crate::model::synopsis::{Constituent, Synopsis};
use crate::model::workflow::{DocumentState, ReferenceState};
use log::warn;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Summary with the reference it describes and its current revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub summary: Summary,
    pub revision_id: RevisionId,
    pub reference: Reference,
}

impl Candidate {
    pub fn is_eligible(&self) -> bool {
        self.summary.state == DocumentState::Approved
            && self.reference.state == ReferenceState::Included
            && self.reference.merged_into.is_none()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolInput {
    pub protocol: Protocol,
    pub revision_id: RevisionId,
}

/// Everything assembly reads, gathered from one consistent snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyInput {
    pub synopsis: Synopsis,
    pub protocol: Option<ProtocolInput>,
    pub candidates: Vec<Candidate>,
}

/// Builds the content tree or fails under the `fail` policy.
pub fn compile_tree(
    input: &AssemblyInput,
    config: &AssemblyConfig,
    control: &OperationControl,
) -> CoreResult<ContentTree> {
    let synopsis = &input.synopsis;
    let mut warnings = Vec::new();
    let mut groups = Vec::with_capacity(synopsis.outline.len());
    let mut empty_groups = Vec::new();
    let mut pending = BTreeSet::new();
    let mut excluded = BTreeSet::new();

    for (processed, grouping) in synopsis.outline.iter().enumerate() {
        control.checkpoint(processed)?;

        let mut actions = Vec::with_capacity(grouping.actions.len());
        for action in &grouping.actions {
            let mut matching: Vec<&Candidate> = input
                .candidates
                .iter()
                .filter(|candidate| candidate.summary.metadata.action == *action)
                .collect();
            matching.sort_by(|left, right| compare_entries(left, right, config.sort_key));

            let mut entries = Vec::new();
            let mut gaps = Vec::new();
            for candidate in matching {
                if candidate.is_eligible() {
                    entries.push(entry_node(candidate));
                    continue;
                }
                if candidate.reference.state == ReferenceState::Excluded {
                    if excluded.insert(candidate.summary.id) {
                        warnings.push(AssemblyWarning::ExcludedReference {
                            summary_id: candidate.summary.id,
                            reference_id: candidate.reference.id,
                        });
                    }
                    continue;
                }
                gaps.push(GapMarker {
                    summary_id: candidate.summary.id,
                    reference_id: candidate.reference.id,
                    summary_state: candidate.summary.state.as_str().to_string(),
                    reference_state: candidate.reference.state.as_str().to_string(),
                });
                if pending.insert(candidate.summary.id) {
                    warnings.push(AssemblyWarning::PendingSummary {
                        summary_id: candidate.summary.id,
                        action: action.clone(),
                    });
                }
            }
            actions.push(ActionNode {
                name: action.clone(),
                entries,
                gaps,
            });
        }

        let empty = actions.iter().all(|action| action.entries.is_empty());
        if empty {
            empty_groups.push(grouping.key.clone());
            warnings.push(AssemblyWarning::EmptyGroup {
                key: grouping.key.clone(),
            });
        }
        groups.push(GroupNode {
            key: grouping.key.clone(),
            title: grouping.title.clone(),
            position: grouping.position,
            empty,
            actions,
        });
    }

    if !(empty_groups.is_empty() && pending.is_empty()) {
        if config.on_incomplete == IncompletePolicy::Fail {
            return Err(CoreError::IncompleteAssembly {
                synopsis_id: synopsis.id,
                empty_groups,
                pending_summaries: pending.into_iter().collect(),
            });
        }
        warn!(
            "event=assembly_compile module=assembly status=incomplete synopsis_id={} empty_groups={} pending_summaries={}",
            synopsis.id,
            empty_groups.len(),
            pending.len()
        );
    }

    let methods = match input.protocol.as_ref() {
        Some(input) if input.protocol.state == DocumentState::Approved => Some(MethodsNode {
            protocol_id: input.protocol.id,
            revision_id: input.revision_id,
            title: input.protocol.title.clone(),
            body: input.protocol.body.clone(),
        }),
        Some(input) => {
            warnings.push(AssemblyWarning::ProtocolNotApproved {
                protocol_id: input.protocol.id,
                state: input.protocol.state.as_str().to_string(),
            });
            None
        }
        None => None,
    };

    Ok(ContentTree {
        synopsis_id: synopsis.id,
        title: synopsis.title.clone(),
        front_matter: config.front_matter.clone(),
        methods,
        groups,
        warnings,
    })
}

fn entry_node(candidate: &Candidate) -> EntryNode {
    EntryNode {
        reference_id: candidate.reference.id,
        summary_id: candidate.summary.id,
        revision_id: candidate.revision_id,
        reference_title: candidate.reference.title.clone(),
        authors: candidate.reference.authors.clone(),
        year: candidate.reference.year.best_guess(),
        evidence_strength: candidate.summary.metadata.evidence_strength,
        body: candidate.summary.body.clone(),
    }
}

fn compare_entries(left: &Candidate, right: &Candidate, key: SortKey) -> Ordering {
    let primary = match key {
        SortKey::EvidenceStrength => descending_some_first(
            left.summary.metadata.evidence_strength,
            right.summary.metadata.evidence_strength,
        ),
        SortKey::Year => ascending_some_first(
            left.reference.year.best_guess(),
            right.reference.year.best_guess(),
        ),
        SortKey::Title => Ordering::Equal,
    };
    primary
        .then_with(|| left.reference.title.cmp(&right.reference.title))
        .then_with(|| left.reference.id.cmp(&right.reference.id))
        .then_with(|| left.summary.id.cmp(&right.summary.id))
}

fn descending_some_first<T: Ord>(left: Option<T>, right: Option<T>) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => right.cmp(&left),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn ascending_some_first<T: Ord>(left: Option<T>, right: Option<T>) -> Ordering {
    match (left, right) {
        (Some(left), Some(right)) => left.cmp(&right),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Distinct `(summary, revision)` pairs a compile right now would record.
pub(crate) fn eligible_constituents(candidates: &[Candidate]) -> Vec<Constituent> {
    candidates
        .iter()
        .filter(|candidate| candidate.is_eligible())
        .map(|candidate| Constituent {
            summary_id: candidate.summary.id,
            revision_id: candidate.revision_id,
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{compile_tree, AssemblyInput, Candidate};
    use crate::assembly::AssemblyWarning;
    use crate::config::{AssemblyConfig, IncompletePolicy, SortKey};
    use crate::control::OperationControl;
    use crate::error::CoreError;
    use crate::model::reference::{NormalizedFields, Reference, ReferenceDraft, YearValue};
    use crate::model::summary::{Summary, SummaryContent, SummaryMetadata};
    use crate::model::synopsis::{ActionGrouping, Synopsis};
    use crate::model::workflow::{DocumentState, ReferenceState};
    use uuid::Uuid;

    fn candidate(action: &str, title: &str, strength: Option<u8>, year: i32) -> Candidate {
        let mut reference = Reference::from_draft(
            ReferenceDraft {
                title: title.to_string(),
                authors: vec!["Doe, J.".to_string()],
                year: YearValue::Exact { year },
                source_id: None,
                journal: None,
                abstract_text: None,
                url: None,
                keywords: Vec::new(),
                normalized: NormalizedFields::default(),
                raw_fields: Vec::new(),
            },
            None,
            0,
            1,
        );
        reference.state = ReferenceState::Included;
        let mut summary = Summary::new_draft(
            reference.id,
            SummaryContent {
                metadata: SummaryMetadata {
                    action: action.to_string(),
                    evidence_strength: strength,
                    ..SummaryMetadata::default()
                },
                body: format!("{title} body"),
            },
            "amy",
        );
        summary.state = DocumentState::Approved;
        Candidate {
            summary,
            revision_id: Uuid::new_v4(),
            reference,
        }
    }

    fn synopsis() -> Synopsis {
        Synopsis::new(
            "Bats",
            vec![
                ActionGrouping {
                    key: "roads".to_string(),
                    title: "Transportation".to_string(),
                    position: 2,
                    actions: vec!["Install bat gantries".to_string()],
                },
                ActionGrouping {
                    key: "farming".to_string(),
                    title: "Agriculture".to_string(),
                    position: 1,
                    actions: vec!["Plant hedgerows".to_string()],
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn groups_follow_outline_and_entries_follow_sort_key() {
        let input = AssemblyInput {
            synopsis: synopsis(),
            protocol: None,
            candidates: vec![
                candidate("Plant hedgerows", "B study", Some(40), 2001),
                candidate("Plant hedgerows", "A study", Some(80), 2010),
                candidate("Install bat gantries", "C study", None, 1999),
            ],
        };
        let mut config = AssemblyConfig::default();
        let tree = compile_tree(&input, &config, &OperationControl::default()).unwrap();
        assert_eq!(tree.groups[0].key, "farming");
        let titles: Vec<&str> = tree.groups[0].actions[0]
            .entries
            .iter()
            .map(|entry| entry.reference_title.as_str())
            .collect();
        assert_eq!(titles, vec!["A study", "B study"]);

        config.sort_key = SortKey::Year;
        let tree = compile_tree(&input, &config, &OperationControl::default()).unwrap();
        assert_eq!(tree.groups[0].actions[0].entries[0].reference_title, "B study");
        assert_eq!(tree.constituents().len(), 3);
        assert!(tree.is_complete());
    }

    #[test]
    fn pending_summary_fails_or_leaves_gap_by_policy() {
        let mut pending = candidate("Plant hedgerows", "Pending", Some(10), 2000);
        pending.summary.state = DocumentState::Submitted;
        let input = AssemblyInput {
            synopsis: synopsis(),
            protocol: None,
            candidates: vec![
                pending.clone(),
                candidate("Install bat gantries", "Ready", None, 1999),
            ],
        };

        let err = compile_tree(&input, &AssemblyConfig::default(), &OperationControl::default())
            .unwrap_err();
        match err {
            CoreError::IncompleteAssembly {
                empty_groups,
                pending_summaries,
                ..
            } => {
                assert_eq!(empty_groups, vec!["farming".to_string()]);
                assert_eq!(pending_summaries, vec![pending.summary.id]);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let config = AssemblyConfig {
            on_incomplete: IncompletePolicy::Warn,
            ..AssemblyConfig::default()
        };
        let tree = compile_tree(&input, &config, &OperationControl::default()).unwrap();
        assert!(tree.groups[0].empty);
        assert_eq!(tree.groups[0].actions[0].gaps[0].summary_id, pending.summary.id);
        assert_eq!(tree.warnings.len(), 2);
    }

    #[test]
    fn excluded_reference_summary_is_neither_gap_nor_pending() {
        let mut screened_out = candidate("Plant hedgerows", "Off topic", Some(10), 2000);
        screened_out.reference.state = ReferenceState::Excluded;
        let input = AssemblyInput {
            synopsis: synopsis(),
            protocol: None,
            candidates: vec![
                screened_out.clone(),
                candidate("Plant hedgerows", "Ready", Some(50), 2004),
                candidate("Install bat gantries", "Crossings", None, 1999),
            ],
        };

        let tree = compile_tree(&input, &AssemblyConfig::default(), &OperationControl::default())
            .unwrap();
        assert!(tree.groups[0].actions[0].gaps.is_empty());
        assert_eq!(tree.groups[0].actions[0].entries.len(), 1);
        assert_eq!(
            tree.warnings,
            vec![AssemblyWarning::ExcludedReference {
                summary_id: screened_out.summary.id,
                reference_id: screened_out.reference.id,
            }]
        );
        assert!(tree.is_complete());
    }
}
