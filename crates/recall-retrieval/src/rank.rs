//! Final scoring and ordering of filtered entries.
//!
//! score = lexical_weight x normalized lexical score
//!       + semantic_weight x semantic similarity
//!       + min(tag_boost x matching tags, max_tag_boost)
//!       + relation_boost (explicit relation only)
//!
//! The lexical component is the fused lexical score divided by the best
//! fused score among the filtered entries. When only a scoreless lexical
//! backend ran (or none at all) it is 1.0 for text-matched entries and 0.0
//! otherwise. Ties break on scope index (more specific first), then newest
//! first, then id.

use std::cmp::Ordering;
use std::collections::HashMap;

use recall_types::{PerType, QueryResultItem, RankingConfig};

use crate::types::FilteredEntry;

/// Score and sort every filtered entry across all types.
pub fn rank_entries(
    filtered: PerType<Vec<FilteredEntry>>,
    fts_scores: Option<&HashMap<String, f32>>,
    semantic_scores: &HashMap<String, f32>,
    config: &RankingConfig,
) -> Vec<QueryResultItem> {
    let max_fts = fts_scores
        .map(|scores| {
            filtered
                .values()
                .flatten()
                .filter_map(|f| scores.get(&f.entry.id).copied())
                .fold(0.0_f32, f32::max)
        })
        .unwrap_or(0.0);

    let mut items: Vec<QueryResultItem> = filtered
        .into_values()
        .flatten()
        .map(|f| {
            let lexical = match fts_scores {
                Some(scores) if max_fts > 0.0 => scores
                    .get(&f.entry.id)
                    .map(|s| (s / max_fts).clamp(0.0, 1.0))
                    .unwrap_or(0.0),
                Some(_) => 0.0,
                None => {
                    if f.text_matched {
                        1.0
                    } else {
                        0.0
                    }
                }
            };
            let semantic = semantic_scores
                .get(&f.entry.id)
                .map(|s| s.clamp(0.0, 1.0))
                .unwrap_or(0.0);
            let tag = (config.tag_boost * f.matching_tag_count as f32).min(config.max_tag_boost);
            let relation = if f.has_explicit_relation {
                config.relation_boost
            } else {
                0.0
            };

            let score =
                config.lexical_weight * lexical + config.semantic_weight * semantic + tag + relation;
            to_item(f, score)
        })
        .collect();

    items.sort_by(compare);
    items
}

fn to_item(f: FilteredEntry, score: f32) -> QueryResultItem {
    QueryResultItem {
        entry_type: f.entry.entry_type,
        id: f.entry.id.clone(),
        scope_type: f.entry.scope_type,
        scope_id: f.entry.scope_id.clone(),
        tags: f.tags,
        score,
        scope_index: f.scope_index,
        entry: f.entry,
    }
}

fn compare(a: &QueryResultItem, b: &QueryResultItem) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.scope_index.cmp(&b.scope_index))
        .then_with(|| b.entry.created_at.cmp(&a.entry.created_at))
        .then_with(|| a.id.cmp(&b.id))
}

/// Apply offset and limit to a ranked list.
pub fn page(items: Vec<QueryResultItem>, offset: usize, limit: usize) -> Vec<QueryResultItem> {
    items.into_iter().skip(offset).take(limit).collect()
}
