//! Filter stage: dedup, structural filters and text matching.
//!
//! Per type, rows are first deduplicated so the most specific scope wins,
//! then each row must pass, in order: the relation filter, the tag filter,
//! the text match, the priority range (guidelines only) and the creation
//! date range.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use recall_types::{Entry, PipelineConfig, ScopedEntry, SearchStrategy, TagFilter};

use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::stages::lexical::lexical_matches;
use crate::types::{FilteredEntry, Stage};

/// Apply every filter to the fetched rows and populate `ctx.filtered`.
pub fn filter_stage(
    mut ctx: PipelineContext,
    config: &PipelineConfig,
) -> Result<PipelineContext, PipelineError> {
    if ctx.is_complete(Stage::Filter) {
        return Ok(ctx);
    }
    if !ctx.is_complete(Stage::Fetch) {
        return Err(PipelineError::MissingPrerequisite {
            stage: Stage::Filter,
            requires: Stage::Fetch,
        });
    }

    let fetched = std::mem::take(&mut ctx.fetched_entries);
    let needle = ctx.search.as_ref().map(|s| s.to_lowercase());
    let tag_matcher = ctx.params.tags.as_ref().map(TagMatcher::new);
    let strategy = ctx.params.search_strategy;
    let threshold = config.semantic.threshold;

    for (entry_type, rows) in fetched {
        let total = rows.len();
        let rows = dedup_by_scope(rows);
        let deduped = rows.len();

        let lexical = lexical_matches(&ctx, entry_type);
        let related = ctx.related_ids.as_ref().map(|r| r.get(&entry_type));

        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.entry.id.as_str();

            let has_explicit_relation = match related {
                Some(ids) => {
                    if !ids.is_some_and(|ids| ids.contains(id)) {
                        continue;
                    }
                    true
                }
                None => false,
            };

            let tags = ctx.tags_by_entry.get(id).cloned().unwrap_or_default();
            let matching_tag_count = match &tag_matcher {
                Some(matcher) => match matcher.evaluate(&tags) {
                    TagFilterOutcome::Pass { matching_tag_count } => matching_tag_count,
                    _ => continue,
                },
                None => 0,
            };

            let semantic_score = ctx.semantic_scores.get(id).copied();
            let Some(text_matched) = text_match(
                strategy,
                needle.as_deref(),
                &row.entry,
                lexical,
                semantic_score,
                threshold,
            ) else {
                continue;
            };

            if !passes_priority(&ctx, &row.entry) || !passes_dates(&ctx, &row.entry) {
                continue;
            }

            kept.push(FilteredEntry {
                entry: row.entry,
                scope_index: row.scope_index,
                tags,
                text_matched,
                matching_tag_count,
                has_explicit_relation,
            });
        }

        debug!(
            entry_type = %entry_type,
            fetched = total,
            deduped,
            kept = kept.len(),
            "Filtered entries"
        );
        ctx.filtered.insert(entry_type, kept);
    }

    ctx.mark_complete(Stage::Filter);
    Ok(ctx)
}

/// Keep one row per logical entry, preferring the lowest scope index.
///
/// Rows are keyed by `(scope_type, scope_id or "global", name)`. The
/// surviving rows keep the order in which their key was first seen.
pub fn dedup_by_scope(rows: Vec<ScopedEntry>) -> Vec<ScopedEntry> {
    let mut positions: HashMap<_, usize> = HashMap::new();
    let mut result: Vec<ScopedEntry> = Vec::with_capacity(rows.len());

    for row in rows {
        let key = row.entry.dedup_key();
        match positions.get(&key) {
            Some(&pos) => {
                if row.scope_index < result[pos].scope_index {
                    result[pos] = row;
                }
            }
            None => {
                positions.insert(key, result.len());
                result.push(row);
            }
        }
    }
    result
}

/// Text match decision for one entry.
///
/// Returns `None` when the entry must be dropped, otherwise whether it
/// counts as text-matched for ranking.
fn text_match(
    strategy: SearchStrategy,
    needle: Option<&str>,
    entry: &Entry,
    lexical: Option<&HashSet<String>>,
    semantic_score: Option<f32>,
    threshold: f32,
) -> Option<bool> {
    let Some(needle) = needle else {
        return Some(false);
    };
    let semantic_hit = semantic_score.is_some_and(|s| s >= threshold);

    match (strategy, lexical) {
        (SearchStrategy::Fts5, Some(ids)) => ids.contains(&entry.id).then_some(true),
        (SearchStrategy::Hybrid, Some(ids)) => {
            let lexical_hit = ids.contains(&entry.id);
            (lexical_hit || semantic_hit).then_some(lexical_hit)
        }
        (SearchStrategy::Semantic, _) | (SearchStrategy::Hybrid, None) => {
            let substring_hit = substring_match(entry, needle);
            (substring_hit || semantic_hit).then_some(substring_hit)
        }
        (SearchStrategy::Fts5, None) | (SearchStrategy::Direct, _) => {
            substring_match(entry, needle).then_some(true)
        }
    }
}

/// Case-insensitive substring match over name, title and content.
fn substring_match(entry: &Entry, needle_lower: &str) -> bool {
    entry.name.to_lowercase().contains(needle_lower)
        || entry
            .title
            .as_ref()
            .is_some_and(|t| t.to_lowercase().contains(needle_lower))
        || entry.content.to_lowercase().contains(needle_lower)
}

fn passes_priority(ctx: &PipelineContext, entry: &Entry) -> bool {
    if entry.entry_type != recall_types::EntryType::Guideline {
        return true;
    }
    match ctx.params.priority {
        Some(range) => entry.priority.is_some_and(|p| range.contains(p)),
        None => true,
    }
}

fn passes_dates(ctx: &PipelineContext, entry: &Entry) -> bool {
    if let Some(after) = ctx.params.created_after {
        if entry.created_at < after {
            return false;
        }
    }
    if let Some(before) = ctx.params.created_before {
        if entry.created_at > before {
            return false;
        }
    }
    true
}

/// Result of checking an entry's tags against a [`TagFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFilterOutcome {
    Pass { matching_tag_count: usize },
    /// Carries an excluded tag
    Excluded,
    /// Missing at least one required tag
    MissingRequired,
    /// Include list given but none of its tags present
    NoIncludedTag,
}

impl TagFilterOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, TagFilterOutcome::Pass { .. })
    }
}

/// A [`TagFilter`] with its tag lists lowercased once.
#[derive(Debug, Clone)]
pub struct TagMatcher {
    include: HashSet<String>,
    exclude: HashSet<String>,
    require: HashSet<String>,
}

impl TagMatcher {
    pub fn new(filter: &TagFilter) -> Self {
        Self {
            include: lowercase_set(&filter.include),
            exclude: lowercase_set(&filter.exclude),
            require: lowercase_set(&filter.require),
        }
    }

    /// Exclude wins over require and include.
    pub fn evaluate(&self, tags: &[String]) -> TagFilterOutcome {
        let tags = lowercase_set(tags);

        if self.exclude.iter().any(|t| tags.contains(t)) {
            return TagFilterOutcome::Excluded;
        }
        if !self.require.iter().all(|t| tags.contains(t)) {
            return TagFilterOutcome::MissingRequired;
        }
        let matching_tag_count = self.include.iter().filter(|t| tags.contains(*t)).count();
        if !self.include.is_empty() && matching_tag_count == 0 {
            return TagFilterOutcome::NoIncludedTag;
        }
        TagFilterOutcome::Pass { matching_tag_count }
    }
}

fn lowercase_set(tags: &[String]) -> HashSet<String> {
    tags.iter().map(|t| t.to_lowercase()).collect()
}

/// Check one entry's tags against a filter.
pub fn filter_by_tags(tags: &[String], filter: &TagFilter) -> TagFilterOutcome {
    TagMatcher::new(filter).evaluate(tags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use recall_types::{EntryType, QueryRequest, ScopeRef, ScopeType};

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    fn id_set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    fn filter(include: &[&str], exclude: &[&str], require: &[&str]) -> TagFilter {
        TagFilter {
            include: tags(include),
            exclude: tags(exclude),
            require: tags(require),
        }
    }

    fn entry(id: &str, entry_type: EntryType, name: &str) -> Entry {
        Entry::new(
            id,
            entry_type,
            &ScopeRef::global(),
            name,
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
        )
    }

    fn context(request: QueryRequest, rows: Vec<ScopedEntry>) -> PipelineContext {
        let mut ctx = PipelineContext::new(request);
        for row in rows {
            ctx.fetched_entries
                .entry(row.entry.entry_type)
                .or_default()
                .push(row);
        }
        ctx.mark_complete(Stage::Fetch);
        ctx
    }

    fn kept_ids(ctx: &PipelineContext, entry_type: EntryType) -> Vec<String> {
        ctx.filtered
            .get(&entry_type)
            .map(|rows| rows.iter().map(|r| r.entry.id.clone()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_tag_filter_outcomes() {
        let f = filter(&["rust", "go"], &["deprecated"], &["lint"]);

        assert_eq!(
            filter_by_tags(&tags(&["Rust", "LINT"]), &f),
            TagFilterOutcome::Pass {
                matching_tag_count: 1
            }
        );
        assert_eq!(
            filter_by_tags(&tags(&["rust", "lint", "Deprecated"]), &f),
            TagFilterOutcome::Excluded
        );
        assert_eq!(
            filter_by_tags(&tags(&["rust"]), &f),
            TagFilterOutcome::MissingRequired
        );
        assert_eq!(
            filter_by_tags(&tags(&["lint", "python"]), &f),
            TagFilterOutcome::NoIncludedTag
        );
        assert!(filter_by_tags(&[], &TagFilter::default()).passed());
    }

    #[test]
    fn test_exclude_wins_over_include_and_require() {
        let f = filter(&["a"], &["a"], &["a"]);
        assert_eq!(filter_by_tags(&tags(&["a"]), &f), TagFilterOutcome::Excluded);
    }

    #[test]
    fn test_dedup_prefers_lowest_scope_index() {
        let a = entry("dup", EntryType::Tool, "lint");
        let other = entry("other", EntryType::Tool, "fmt");
        let rows = vec![
            ScopedEntry::new(a.clone(), 1),
            ScopedEntry::new(other, 1),
            ScopedEntry::new(a.clone(), 0),
        ];

        let result = dedup_by_scope(rows);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].entry.id, "dup");
        assert_eq!(result[0].scope_index, 0);
        assert_eq!(result[1].entry.id, "other");
    }

    #[test]
    fn test_dedup_keeps_same_name_in_different_scopes() {
        let project = ScopeRef::new(ScopeType::Project, "p1");
        let local = Entry::new("p", EntryType::Tool, &project, "lint", Utc::now());
        let global = entry("g", EntryType::Tool, "lint");
        let rows = vec![ScopedEntry::new(local, 0), ScopedEntry::new(global, 1)];
        assert_eq!(dedup_by_scope(rows).len(), 2);
    }

    #[test]
    fn test_no_search_keeps_everything_unmatched() {
        let request = QueryRequest::new(vec![EntryType::Tool], vec![ScopeRef::global()]);
        let ctx = context(
            request,
            vec![
                ScopedEntry::new(entry("a", EntryType::Tool, "lint"), 0),
                ScopedEntry::new(entry("b", EntryType::Tool, "fmt"), 0),
            ],
        );
        let ctx = filter_stage(ctx, &PipelineConfig::default()).unwrap();

        let rows = &ctx.filtered[&EntryType::Tool];
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| !r.text_matched));
        assert!(ctx.fetched_entries.is_empty());
    }

    #[test]
    fn test_fts5_requires_lexical_hit() {
        let request = QueryRequest::new(vec![EntryType::Tool], vec![ScopeRef::global()])
            .with_search("lint")
            .with_strategy(SearchStrategy::Fts5);
        let mut ctx = context(
            request,
            vec![
                ScopedEntry::new(entry("a", EntryType::Tool, "lint"), 0),
                ScopedEntry::new(entry("b", EntryType::Tool, "cargo"), 0),
            ],
        );
        ctx.fts_match_ids = Some([(EntryType::Tool, id_set(&["b"]))].into_iter().collect());

        let ctx = filter_stage(ctx, &PipelineConfig::default()).unwrap();
        // "a" contains the text but the lexical set is authoritative
        assert_eq!(kept_ids(&ctx, EntryType::Tool), vec!["b".to_string()]);
        assert!(ctx.filtered[&EntryType::Tool][0].text_matched);
    }

    #[test]
    fn test_hybrid_accepts_semantic_hits() {
        let request = QueryRequest::new(vec![EntryType::Tool], vec![ScopeRef::global()])
            .with_search("lint");
        let mut ctx = context(
            request,
            vec![
                ScopedEntry::new(entry("a", EntryType::Tool, "lint"), 0),
                ScopedEntry::new(entry("b", EntryType::Tool, "clippy"), 0),
                ScopedEntry::new(entry("c", EntryType::Tool, "rustfmt"), 0),
            ],
        );
        ctx.fts_match_ids = Some([(EntryType::Tool, id_set(&["a"]))].into_iter().collect());
        ctx.semantic_scores.insert("b".to_string(), 0.85);
        ctx.semantic_scores.insert("c".to_string(), 0.4);

        let ctx = filter_stage(ctx, &PipelineConfig::default()).unwrap();
        assert_eq!(
            kept_ids(&ctx, EntryType::Tool),
            vec!["a".to_string(), "b".to_string()]
        );
        let rows = &ctx.filtered[&EntryType::Tool];
        assert!(rows[0].text_matched);
        assert!(!rows[1].text_matched);
    }

    #[test]
    fn test_substring_fallback_without_lexical_set() {
        let request = QueryRequest::new(vec![EntryType::Knowledge], vec![ScopeRef::global()])
            .with_search("POSTGRES")
            .with_strategy(SearchStrategy::Direct);
        let ctx = context(
            request,
            vec![
                ScopedEntry::new(
                    entry("a", EntryType::Knowledge, "db").with_content("We use Postgres 16"),
                    0,
                ),
                ScopedEntry::new(
                    entry("b", EntryType::Knowledge, "cache").with_title("Redis notes"),
                    0,
                ),
            ],
        );

        let ctx = filter_stage(ctx, &PipelineConfig::default()).unwrap();
        assert_eq!(kept_ids(&ctx, EntryType::Knowledge), vec!["a".to_string()]);
        assert!(ctx.filtered[&EntryType::Knowledge][0].text_matched);
    }

    #[test]
    fn test_semantic_strategy_is_permissive() {
        let request = QueryRequest::new(vec![EntryType::Knowledge], vec![ScopeRef::global()])
            .with_search("postgres")
            .with_strategy(SearchStrategy::Semantic);
        let mut ctx = context(
            request,
            vec![
                ScopedEntry::new(entry("a", EntryType::Knowledge, "postgres tuning"), 0),
                ScopedEntry::new(entry("b", EntryType::Knowledge, "database"), 0),
                ScopedEntry::new(entry("c", EntryType::Knowledge, "frontend"), 0),
            ],
        );
        ctx.semantic_scores.insert("b".to_string(), 0.9);

        let ctx = filter_stage(ctx, &PipelineConfig::default()).unwrap();
        assert_eq!(
            kept_ids(&ctx, EntryType::Knowledge),
            vec!["a".to_string(), "b".to_string()]
        );
    }

    #[test]
    fn test_priority_applies_to_guidelines_only() {
        let request = QueryRequest::new(
            vec![EntryType::Guideline, EntryType::Tool],
            vec![ScopeRef::global()],
        )
        .with_priority(Some(50), Some(90));
        let ctx = context(
            request,
            vec![
                ScopedEntry::new(entry("g-high", EntryType::Guideline, "a").with_priority(80), 0),
                ScopedEntry::new(entry("g-low", EntryType::Guideline, "b").with_priority(10), 0),
                ScopedEntry::new(entry("g-none", EntryType::Guideline, "c"), 0),
                ScopedEntry::new(entry("tool", EntryType::Tool, "d"), 0),
            ],
        );

        let ctx = filter_stage(ctx, &PipelineConfig::default()).unwrap();
        assert_eq!(kept_ids(&ctx, EntryType::Guideline), vec!["g-high".to_string()]);
        assert_eq!(kept_ids(&ctx, EntryType::Tool), vec!["tool".to_string()]);
    }

    #[test]
    fn test_date_range_is_inclusive() {
        let day = |d| Utc.with_ymd_and_hms(2024, 3, d, 0, 0, 0).unwrap();
        let request = QueryRequest::new(vec![EntryType::Tool], vec![ScopeRef::global()])
            .with_created_range(Some(day(1)), Some(day(10)));
        let mut early = entry("early", EntryType::Tool, "a");
        early.created_at = Utc.with_ymd_and_hms(2024, 2, 28, 0, 0, 0).unwrap();
        let mut edge = entry("edge", EntryType::Tool, "b");
        edge.created_at = day(10);

        let ctx = context(
            request,
            vec![ScopedEntry::new(early, 0), ScopedEntry::new(edge, 0)],
        );
        let ctx = filter_stage(ctx, &PipelineConfig::default()).unwrap();
        assert_eq!(kept_ids(&ctx, EntryType::Tool), vec!["edge".to_string()]);
    }

    #[test]
    fn test_relation_filter() {
        let request = QueryRequest::new(vec![EntryType::Tool], vec![ScopeRef::global()])
            .with_related_to("k1", EntryType::Knowledge);
        let mut ctx = context(
            request,
            vec![
                ScopedEntry::new(entry("t1", EntryType::Tool, "a"), 0),
                ScopedEntry::new(entry("t2", EntryType::Tool, "b"), 0),
            ],
        );
        ctx.related_ids = Some([(EntryType::Tool, id_set(&["t2"]))].into_iter().collect());

        let ctx = filter_stage(ctx, &PipelineConfig::default()).unwrap();
        let rows = &ctx.filtered[&EntryType::Tool];
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].entry.id, "t2");
        assert!(rows[0].has_explicit_relation);
    }

    #[test]
    fn test_requires_fetch() {
        let ctx = PipelineContext::new(QueryRequest::new(
            vec![EntryType::Tool],
            vec![ScopeRef::global()],
        ));
        assert!(matches!(
            filter_stage(ctx, &PipelineConfig::default()),
            Err(PipelineError::MissingPrerequisite { .. })
        ));
    }

    #[test]
    fn test_tag_filter_with_missing_tags() {
        let request = QueryRequest::new(vec![EntryType::Tool], vec![ScopeRef::global()])
            .with_tags(filter(&[], &["deprecated"], &[]));
        let mut ctx = context(
            request,
            vec![
                ScopedEntry::new(entry("t1", EntryType::Tool, "a"), 0),
                ScopedEntry::new(entry("t2", EntryType::Tool, "b"), 0),
            ],
        );
        ctx.tags_by_entry
            .insert("t2".to_string(), tags(&["deprecated"]));

        let ctx = filter_stage(ctx, &PipelineConfig::default()).unwrap();
        assert_eq!(kept_ids(&ctx, EntryType::Tool), vec!["t1".to_string()]);
    }
}
