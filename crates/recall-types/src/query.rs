//! Query request and result types.
//!
//! A [`QueryRequest`] combines free text, structural filters and the
//! resolved scope chain. The retrieval pipeline turns it into a ranked
//! list of [`QueryResultItem`]s plus [`ResponseMeta`] paging information.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PipelineOverrides;
use crate::entry::{Entry, EntryType, ScopeRef, ScopeType};
use crate::error::RecallError;

/// How free text is matched against entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Full-text (BM25) matching only
    Fts5,
    /// Full-text plus vector similarity
    #[default]
    Hybrid,
    /// Vector similarity, with substring fallback
    Semantic,
    /// Plain substring matching, no search backends
    Direct,
}

impl SearchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStrategy::Fts5 => "fts5",
            SearchStrategy::Hybrid => "hybrid",
            SearchStrategy::Semantic => "semantic",
            SearchStrategy::Direct => "direct",
        }
    }

    /// Whether the lexical backend participates.
    pub fn uses_lexical(&self) -> bool {
        matches!(self, SearchStrategy::Fts5 | SearchStrategy::Hybrid)
    }

    /// Whether the semantic backend participates.
    pub fn uses_semantic(&self) -> bool {
        matches!(self, SearchStrategy::Semantic | SearchStrategy::Hybrid)
    }
}

/// Tag predicates. All comparisons are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagFilter {
    /// OR semantics: keep entries carrying at least one of these
    #[serde(default)]
    pub include: Vec<String>,

    /// Drop entries carrying any of these (wins over include/require)
    #[serde(default)]
    pub exclude: Vec<String>,

    /// AND semantics: keep entries carrying all of these
    #[serde(default)]
    pub require: Vec<String>,
}

impl TagFilter {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty() && self.require.is_empty()
    }
}

/// Restrict results to entries explicitly related to another entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedTo {
    pub id: String,
    pub entry_type: EntryType,
}

/// Inclusive priority bounds (guidelines only).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityRange {
    #[serde(default)]
    pub min: Option<i32>,
    #[serde(default)]
    pub max: Option<i32>,
}

impl PriorityRange {
    pub fn contains(&self, priority: i32) -> bool {
        self.min.map_or(true, |min| priority >= min) && self.max.map_or(true, |max| priority <= max)
    }
}

/// A retrieval query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Free-text query
    #[serde(default)]
    pub search: Option<String>,

    /// Entry types to return
    pub types: Vec<EntryType>,

    /// Resolved scope chain, most specific first
    #[serde(default)]
    pub scope_chain: Vec<ScopeRef>,

    /// Maximum results to return
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Results to skip (paging)
    #[serde(default)]
    pub offset: usize,

    #[serde(default)]
    pub tags: Option<TagFilter>,

    #[serde(default)]
    pub related_to: Option<RelatedTo>,

    #[serde(default)]
    pub priority: Option<PriorityRange>,

    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,

    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,

    #[serde(default)]
    pub search_strategy: SearchStrategy,

    #[serde(default)]
    pub enable_hyde: Option<bool>,

    #[serde(default)]
    pub enable_expansion: Option<bool>,

    #[serde(default)]
    pub enable_decomposition: Option<bool>,

    /// Skip intent classification and query rewriting entirely
    #[serde(default)]
    pub disable_rewrite: bool,

    /// Per-query configuration overrides
    #[serde(default)]
    pub overrides: PipelineOverrides,
}

fn default_limit() -> usize {
    20
}

impl QueryRequest {
    /// Create a request for the given types and scope chain.
    pub fn new(types: Vec<EntryType>, scope_chain: Vec<ScopeRef>) -> Self {
        Self {
            search: None,
            types,
            scope_chain,
            limit: default_limit(),
            offset: 0,
            tags: None,
            related_to: None,
            priority: None,
            created_after: None,
            created_before: None,
            search_strategy: SearchStrategy::default(),
            enable_hyde: None,
            enable_expansion: None,
            enable_decomposition: None,
            disable_rewrite: false,
            overrides: PipelineOverrides::default(),
        }
    }

    /// Builder: set the free-text query
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    /// Builder: set the search strategy
    pub fn with_strategy(mut self, strategy: SearchStrategy) -> Self {
        self.search_strategy = strategy;
        self
    }

    /// Builder: set limit
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Builder: set offset
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Builder: set tag filter
    pub fn with_tags(mut self, tags: TagFilter) -> Self {
        self.tags = Some(tags);
        self
    }

    /// Builder: restrict to entries related to another entry
    pub fn with_related_to(mut self, id: impl Into<String>, entry_type: EntryType) -> Self {
        self.related_to = Some(RelatedTo {
            id: id.into(),
            entry_type,
        });
        self
    }

    /// Builder: set priority range
    pub fn with_priority(mut self, min: Option<i32>, max: Option<i32>) -> Self {
        self.priority = Some(PriorityRange { min, max });
        self
    }

    /// Builder: set creation date range
    pub fn with_created_range(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    /// One past the last ranked result this request can return.
    ///
    /// Search stages over-fetch relative to this so a deep page sees the
    /// same candidate pool as the first one.
    pub fn page_end(&self) -> usize {
        self.offset.saturating_add(self.limit)
    }

    /// The trimmed search text, if non-empty.
    pub fn search_text(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Reject malformed filter combinations before any work is done.
    pub fn validate(&self) -> Result<(), RecallError> {
        if self.types.is_empty() {
            return Err(RecallError::InvalidInput(
                "at least one entry type is required".to_string(),
            ));
        }
        if self.limit == 0 {
            return Err(RecallError::InvalidInput("limit must be > 0".to_string()));
        }
        if let Some(PriorityRange {
            min: Some(min),
            max: Some(max),
        }) = self.priority
        {
            if min > max {
                return Err(RecallError::InvalidInput(format!(
                    "priority.min ({}) > priority.max ({})",
                    min, max
                )));
            }
        }
        if let (Some(after), Some(before)) = (self.created_after, self.created_before) {
            if after > before {
                return Err(RecallError::InvalidInput(format!(
                    "created_after ({}) is later than created_before ({})",
                    after.to_rfc3339(),
                    before.to_rfc3339()
                )));
            }
        }
        if let Some(threshold) = self.overrides.semantic_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(RecallError::InvalidInput(format!(
                    "semantic_threshold must be 0.0-1.0, got {}",
                    threshold
                )));
            }
        }
        Ok(())
    }
}

/// One ranked result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResultItem {
    pub entry_type: EntryType,
    pub id: String,
    pub scope_type: ScopeType,
    pub scope_id: Option<String>,
    pub tags: Vec<String>,

    /// Final ranking score
    pub score: f32,

    /// Position in the scope chain the entry was found at
    pub scope_index: usize,

    /// Full entry payload
    pub entry: Entry,
}

/// Paging information for a result set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Entries that survived filtering
    pub total_count: usize,

    /// Entries in this page
    pub returned_count: usize,

    /// Fewer entries returned than matched
    pub truncated: bool,

    /// More entries exist beyond this page
    pub has_more: bool,
}

impl ResponseMeta {
    pub fn new(total_count: usize, offset: usize, returned_count: usize) -> Self {
        Self {
            total_count,
            returned_count,
            truncated: returned_count < total_count,
            has_more: offset + returned_count < total_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request() -> QueryRequest {
        QueryRequest::new(vec![EntryType::Tool], vec![ScopeRef::global()])
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_page_end_covers_offset() {
        assert_eq!(request().with_limit(2).with_offset(10).page_end(), 12);
        assert_eq!(request().with_limit(5).page_end(), 5);
        assert_eq!(request().with_offset(usize::MAX).page_end(), usize::MAX);
    }

    #[test]
    fn test_validate_rejects_inverted_priority() {
        let req = request().with_priority(Some(80), Some(10));
        assert!(matches!(req.validate(), Err(RecallError::InvalidInput(_))));

        let req = request().with_priority(Some(10), Some(10));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_negative_date_range() {
        let after = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let before = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let req = request().with_created_range(Some(after), Some(before));
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limit_and_no_types() {
        assert!(request().with_limit(0).validate().is_err());

        let req = QueryRequest::new(vec![], vec![ScopeRef::global()]);
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_search_text_trims() {
        assert_eq!(request().with_search("  db  ").search_text(), Some("db"));
        assert_eq!(request().with_search("   ").search_text(), None);
        assert_eq!(request().search_text(), None);
    }

    #[test]
    fn test_priority_range_inclusive() {
        let range = PriorityRange {
            min: Some(10),
            max: Some(50),
        };
        assert!(range.contains(10));
        assert!(range.contains(50));
        assert!(!range.contains(51));
        assert!(PriorityRange::default().contains(-3));
    }

    #[test]
    fn test_response_meta() {
        let meta = ResponseMeta::new(25, 0, 10);
        assert!(meta.truncated);
        assert!(meta.has_more);

        let meta = ResponseMeta::new(25, 20, 5);
        assert!(meta.truncated);
        assert!(!meta.has_more);

        let meta = ResponseMeta::new(3, 0, 3);
        assert!(!meta.truncated);
        assert!(!meta.has_more);
    }

    #[test]
    fn test_request_deserializes_iso_dates() {
        let json = r#"{
            "search": "db",
            "types": ["guideline", "tool"],
            "created_after": "2024-01-01T00:00:00Z",
            "search_strategy": "fts5",
            "tags": {"exclude": ["deprecated"]}
        }"#;
        let req: QueryRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.limit, 20);
        assert_eq!(req.search_strategy, SearchStrategy::Fts5);
        assert_eq!(
            req.created_after,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(req.tags.unwrap().exclude, vec!["deprecated".to_string()]);
    }
}
