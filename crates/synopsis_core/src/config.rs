//! Core configuration loaded from TOML.
//!
//! # Responsibility
//! - Hold every tunable of the pipeline: dedup weights, the role-capability
//!   table, content guards, assembly policy and time budgets.
//! - Default every section so an empty file is a valid configuration.
//!
//! # Invariants
//! - `validate` accepts only weights that sum to a positive value, thresholds
//!   in `(0, 1]`, and capability rules that name an existing edge.

use crate::logging::default_log_level;
use crate::model::workflow::{roles, EntityKind, Transition, WorkflowState};
use crate::workflow::machine;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
    #[serde(default)]
    pub assembly: AssemblyConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl CoreConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dedup.validate()?;
        self.workflow.validate()?;
        if self.summary.max_words == 0 {
            return Err(ConfigError::Invalid(
                "summary.max_words must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads configuration from `path`; a missing file yields defaults.
pub fn load_config(path: impl AsRef<Path>) -> Result<CoreConfig, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(CoreConfig::default());
    }
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    CoreConfig::from_toml_str(&content)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Minimum composite score for two references to be paired.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default = "default_title_weight")]
    pub title_weight: f64,
    #[serde(default = "default_author_weight")]
    pub author_weight: f64,
    #[serde(default = "default_year_weight")]
    pub year_weight: f64,
    /// Year score for a one-year difference.
    #[serde(default = "default_year_partial_credit")]
    pub year_partial_credit: f64,
    #[serde(default = "default_stop_words")]
    pub stop_words: Vec<String>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            title_weight: default_title_weight(),
            author_weight: default_author_weight(),
            year_weight: default_year_weight(),
            year_partial_credit: default_year_partial_credit(),
            stop_words: default_stop_words(),
        }
    }
}

impl DedupConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let weights = [self.title_weight, self.author_weight, self.year_weight];
        if weights.iter().any(|weight| !weight.is_finite() || *weight < 0.0) {
            return Err(ConfigError::Invalid(
                "dedup weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::Invalid(
                "dedup weights must not all be zero".to_string(),
            ));
        }
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "dedup.threshold must be in (0, 1], got {}",
                self.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.year_partial_credit) {
            return Err(ConfigError::Invalid(
                "dedup.year_partial_credit must be in [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// One row of the role-capability table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRule {
    pub kind: EntityKind,
    pub from: String,
    pub transition: Transition,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<CapabilityRule>,
    #[serde(default = "default_manager_only")]
    pub rollback_roles: Vec<String>,
    #[serde(default = "default_cluster_decision_roles")]
    pub cluster_decision_roles: Vec<String>,
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            capabilities: default_capabilities(),
            rollback_roles: default_manager_only(),
            cluster_decision_roles: default_cluster_decision_roles(),
            lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

impl WorkflowConfig {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for rule in &self.capabilities {
            let Some(from) = WorkflowState::parse(rule.kind, &rule.from) else {
                return Err(ConfigError::Invalid(format!(
                    "capability rule names unknown {} state `{}`",
                    rule.kind, rule.from
                )));
            };
            if machine::next_state(rule.kind, from, rule.transition).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "capability rule names missing edge {} `{}` -> `{}`",
                    rule.kind, rule.from, rule.transition
                )));
            }
            if rule.roles.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "capability rule {} `{}` -> `{}` grants no roles",
                    rule.kind, rule.from, rule.transition
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryConfig {
    #[serde(default = "default_max_words")]
    pub max_words: usize,
    /// Controlled vocabularies keyed by field: `action`, `threat`, `taxon`,
    /// `habitat`, `location`, `research_design`.
    #[serde(default)]
    pub vocabularies: BTreeMap<String, Vec<String>>,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            max_words: default_max_words(),
            vocabularies: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompletePolicy {
    #[default]
    Fail,
    Warn,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    EvidenceStrength,
    Year,
    Title,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontMatterSection {
    pub number: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontMatterChapter {
    pub key: String,
    pub number: String,
    pub title: String,
    #[serde(default)]
    pub sections: Vec<FrontMatterSection>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyConfig {
    #[serde(default)]
    pub on_incomplete: IncompletePolicy,
    #[serde(default)]
    pub sort_key: SortKey,
    #[serde(default = "default_front_matter")]
    pub front_matter: Vec<FrontMatterChapter>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            on_incomplete: IncompletePolicy::default(),
            sort_key: SortKey::default(),
            front_matter: default_front_matter(),
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImportConfig {
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            directory: None,
        }
    }
}

fn default_threshold() -> f64 {
    0.75
}

fn default_title_weight() -> f64 {
    0.5
}

fn default_author_weight() -> f64 {
    0.3
}

fn default_year_weight() -> f64 {
    0.2
}

fn default_year_partial_credit() -> f64 {
    0.5
}

fn default_stop_words() -> Vec<String> {
    [
        "a", "an", "and", "are", "as", "at", "by", "for", "from", "in", "into", "is", "of", "on",
        "or", "the", "to", "with",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_manager_only() -> Vec<String> {
    vec![roles::MANAGER.to_string()]
}

fn default_cluster_decision_roles() -> Vec<String> {
    vec![roles::MANAGER.to_string(), roles::AUTHOR.to_string()]
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_max_words() -> usize {
    400
}

fn default_level() -> String {
    default_log_level().to_string()
}

/// Default role set per transition.
pub fn default_roles_for(transition: Transition) -> Vec<String> {
    let names: &[&str] = match transition {
        Transition::StartScreening | Transition::Include | Transition::Exclude => {
            &[roles::AUTHOR, roles::MANAGER]
        }
        Transition::Reopen => &[roles::MANAGER],
        Transition::Edit | Transition::Submit | Transition::Resubmit | Transition::Revise => {
            &[roles::AUTHOR, roles::MANAGER]
        }
        Transition::StartReview | Transition::Approve => &[roles::MANAGER],
        Transition::RequestChanges => &[roles::MANAGER, roles::EXTERNAL_COLLABORATOR],
        Transition::Compile | Transition::Reassemble => &[roles::MANAGER, roles::AUTHOR],
        Transition::Publish => &[roles::MANAGER],
    };
    names.iter().map(|name| name.to_string()).collect()
}

/// One rule per edge of the state machine, with default roles.
pub fn default_capabilities() -> Vec<CapabilityRule> {
    machine::EDGES
        .iter()
        .map(|edge| CapabilityRule {
            kind: edge.kind,
            from: edge.from.as_str().to_string(),
            transition: edge.transition,
            roles: default_roles_for(edge.transition),
        })
        .collect()
}

fn section(number: &str, title: &str) -> FrontMatterSection {
    FrontMatterSection {
        number: number.to_string(),
        title: title.to_string(),
    }
}

fn chapter(
    key: &str,
    number: &str,
    title: &str,
    sections: Vec<FrontMatterSection>,
) -> FrontMatterChapter {
    FrontMatterChapter {
        key: key.to_string(),
        number: number.to_string(),
        title: title.to_string(),
        sections,
    }
}

/// Standard synopsis front matter.
pub fn default_front_matter() -> Vec<FrontMatterChapter> {
    vec![
        chapter("advisory_board", "0", "Advisory Board", Vec::new()),
        chapter("about_the_authors", "0.1", "About the authors", Vec::new()),
        chapter("acknowledgements", "0.2", "Acknowledgements", Vec::new()),
        chapter(
            "about_this_book",
            "1",
            "About this book",
            vec![
                section("1.1", "The Conservation Evidence project"),
                section("1.2", "The purpose of Conservation Evidence synopses"),
                section("1.3", "Who this synopsis is for"),
                section("1.4", "Background"),
                section("1.5", "Scope"),
                section("1.6", "Methods"),
                section("1.7", "How you can help to change conservation practice"),
                section("1.8", "References"),
            ],
        ),
    ]
}
