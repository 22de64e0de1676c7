//! Core retrieval types for the query pipeline.
//!
//! This module defines the fundamental types threaded through the stages:
//! - `QueryIntent`: What the caller is trying to accomplish
//! - `SearchQuery`: One weighted query variant produced by the rewrite stage
//! - `Stage`: Identifiers for pipeline stages
//! - `SkippedStage`: Why an optional stage did not contribute
//! - `HierarchicalState`: Candidate narrowing produced by the summary hierarchy
//! - `FilteredEntry`: An entry that survived the filter stage
//! - `QueryResponse`: Final ranked output with diagnostics

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use recall_types::{Entry, EntryType, QueryResultItem, ResponseMeta};

use crate::error::CollaboratorError;

/// Query intent classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    /// Procedural questions: "how to run migrations"
    HowTo,
    /// Something is broken: "build fails with E0308"
    Debug,
    /// A specific fact or definition: "what is the deploy command"
    Lookup,
    /// Weighing alternatives: "postgres vs sqlite"
    Compare,
    /// Settings and setup: "configure the database"
    Configure,
    /// Open-ended browsing; the fallback when nothing else matches
    #[default]
    Explore,
}

impl QueryIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryIntent::HowTo => "how_to",
            QueryIntent::Debug => "debug",
            QueryIntent::Lookup => "lookup",
            QueryIntent::Compare => "compare",
            QueryIntent::Configure => "configure",
            QueryIntent::Explore => "explore",
        }
    }
}

impl std::fmt::Display for QueryIntent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a query variant came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuerySource {
    /// The caller's text, unchanged
    Original,
    /// Hypothetical document embedding text
    Hyde,
    /// Synonym / related-term expansion
    Expansion,
    /// Sub-query from decomposing a compound question
    Decomposition,
}

/// One weighted query variant executed by the search stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub text: String,

    /// Weight in (0, 1]; multiplies raw scores before fusion
    pub weight: f32,

    pub source: QuerySource,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, weight: f32, source: QuerySource) -> Self {
        Self {
            text: text.into(),
            weight,
            source,
        }
    }

    /// The caller's text at full weight.
    pub fn original(text: impl Into<String>) -> Self {
        Self::new(text, 1.0, QuerySource::Original)
    }
}

/// How the rewrite stage produced its variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteStrategy {
    /// Original text only
    Direct,
    Hyde,
    Expansion,
    Decomposition,
    /// More than one technique contributed
    Multi,
}

/// Pipeline stage identifiers, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Rewrite,
    Lexical,
    Semantic,
    Hierarchical,
    Fetch,
    Tags,
    Filter,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Rewrite => "rewrite",
            Stage::Lexical => "lexical",
            Stage::Semantic => "semantic",
            Stage::Hierarchical => "hierarchical",
            Stage::Fetch => "fetch",
            Stage::Tags => "tags",
            Stage::Filter => "filter",
        }
    }

    /// Stages whose output is required for a correct result.
    pub fn is_required(&self) -> bool {
        matches!(self, Stage::Fetch | Stage::Filter)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Why an optional stage was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Turned off in the config or per-call overrides
    Disabled,
    /// Nothing to do: no search text, strategy, no backend, no summaries
    Precondition,
    /// The collaborator returned an error
    Unavailable,
    /// The collaborator exceeded its time budget
    Timeout,
    /// The caller's deadline passed before the stage started
    Deadline,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::Precondition => "precondition",
            SkipReason::Unavailable => "unavailable",
            SkipReason::Timeout => "timeout",
            SkipReason::Deadline => "deadline",
        }
    }
}

impl From<&CollaboratorError> for SkipReason {
    fn from(err: &CollaboratorError) -> Self {
        match err {
            CollaboratorError::Timeout(_) => SkipReason::Timeout,
            CollaboratorError::Unavailable(_) | CollaboratorError::Backend(_) => {
                SkipReason::Unavailable
            }
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An optional stage that did not contribute to the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SkippedStage {
    pub stage: Stage,
    pub reason: SkipReason,
}

impl SkippedStage {
    pub fn new(stage: Stage, reason: SkipReason) -> Self {
        Self { stage, reason }
    }
}

/// A scored id returned by a lexical backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

impl ScoredId {
    pub fn new(id: impl Into<String>, score: f32) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// A scored id with its entry type, returned by semantic and hierarchical
/// backends which search across types at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntryRef {
    pub id: String,
    pub entry_type: EntryType,
    pub score: f32,
}

impl ScoredEntryRef {
    pub fn new(id: impl Into<String>, entry_type: EntryType, score: f32) -> Self {
        Self {
            id: id.into(),
            entry_type,
            score,
        }
    }
}

/// Output of the hierarchical stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HierarchicalState {
    pub applied: bool,

    /// Leaf entries the summary hierarchy selected
    pub candidate_ids: HashSet<String>,

    /// Raw leaf similarity per candidate
    pub candidate_scores: HashMap<String, f32>,

    pub levels_traversed: usize,

    pub total_time_ms: u64,
}

/// An entry that survived the filter stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilteredEntry {
    pub entry: Entry,

    pub scope_index: usize,

    pub tags: Vec<String>,

    /// Matched the free text lexically (or by substring fallback)
    pub text_matched: bool,

    /// Number of the entry's tags found in the include list
    pub matching_tag_count: usize,

    /// Survived an explicit `related_to` filter
    pub has_explicit_relation: bool,
}

/// Explanation of how a query was executed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineDiagnostics {
    pub intent: Option<QueryIntent>,

    pub rewrite_strategy: Option<RewriteStrategy>,

    /// Variants the search stages executed
    pub search_queries: Vec<SearchQuery>,

    pub completed_stages: Vec<Stage>,

    /// Optional stages that did not apply, in stage order
    pub skipped_stages: Vec<SkippedStage>,

    /// The caller's deadline passed before every optional stage ran
    pub deadline_exceeded: bool,

    pub hierarchical_levels: usize,

    pub hierarchical_candidates: usize,

    pub total_time_ms: u64,
}

impl PipelineDiagnostics {
    /// Why `stage` was skipped, or None if it ran.
    pub fn skip_reason(&self, stage: Stage) -> Option<SkipReason> {
        self.skipped_stages
            .iter()
            .find(|s| s.stage == stage)
            .map(|s| s.reason)
    }
}

/// Final pipeline output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub results: Vec<QueryResultItem>,
    pub meta: ResponseMeta,
    pub diagnostics: PipelineDiagnostics,
}
