//! Fetch stage: load entries across the scope chain.

use tracing::debug;

use recall_types::PerType;

use crate::collaborators::Capabilities;
use crate::context::PipelineContext;
use crate::error::PipelineError;
use crate::types::Stage;

/// Load every entry of the requested types from each scope in the chain.
///
/// This stage is required: a repository failure fails the query. The
/// result always has a (possibly empty) list for every requested type and
/// nothing else. An empty scope chain yields empty lists without calling
/// the repository. When the request has `related_to`, the explicitly
/// related ids are loaded here as well.
pub async fn fetch_stage(
    mut ctx: PipelineContext,
    capabilities: &Capabilities,
) -> Result<PipelineContext, PipelineError> {
    if ctx.is_complete(Stage::Fetch) {
        return Ok(ctx);
    }

    let types = ctx.params.types.clone();
    let mut fetched: PerType<Vec<_>> = types.iter().map(|t| (*t, Vec::new())).collect();

    if ctx.scope_chain.is_empty() {
        debug!("Empty scope chain; nothing to fetch");
    } else {
        let rows = capabilities
            .entries
            .fetch_by_scope_chain(&ctx.scope_chain, &types)
            .await
            .map_err(|source| PipelineError::RequiredStage {
                stage: Stage::Fetch,
                source,
            })?;

        for (entry_type, entries) in rows {
            if let Some(slot) = fetched.get_mut(&entry_type) {
                slot.extend(
                    entries
                        .into_iter()
                        .filter(|row| row.entry.entry_type == entry_type),
                );
            }
        }
    }

    if let Some(target) = ctx.params.related_to.clone() {
        let relations = capabilities.relations.as_ref().ok_or_else(|| {
            PipelineError::Configuration(
                "related_to filter requires a relation repository".to_string(),
            )
        })?;
        let related = relations
            .related_ids(&target, &types)
            .await
            .map_err(|source| PipelineError::RequiredStage {
                stage: Stage::Fetch,
                source,
            })?;
        ctx.related_ids = Some(related);
    }

    debug!(
        scopes = ctx.scope_chain.len(),
        rows = fetched.values().map(Vec::len).sum::<usize>(),
        "Fetched entries"
    );
    ctx.fetched_entries = fetched;
    ctx.mark_complete(Stage::Fetch);
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use recall_types::{Entry, EntryType, QueryRequest, ScopeRef, ScopeType};

    use crate::error::CollaboratorError;
    use crate::mock::{MockEntryRepository, MockRelationRepository};

    fn project() -> ScopeRef {
        ScopeRef::new(ScopeType::Project, "p1")
    }

    fn repo() -> MockEntryRepository {
        MockEntryRepository::default()
            .with_entry(Entry::new("t1", EntryType::Tool, &project(), "lint", Utc::now()))
            .with_entry(Entry::new("t2", EntryType::Tool, &ScopeRef::global(), "fmt", Utc::now()))
            .with_entry(Entry::new("g1", EntryType::Guideline, &project(), "style", Utc::now()))
    }

    #[tokio::test]
    async fn test_fetch_returns_every_requested_type() {
        let request = QueryRequest::new(
            vec![EntryType::Tool, EntryType::Knowledge],
            vec![project(), ScopeRef::global()],
        );
        let ctx = fetch_stage(
            PipelineContext::new(request),
            &Capabilities::new(Arc::new(repo())),
        )
        .await
        .unwrap();

        assert_eq!(ctx.fetched_entries[&EntryType::Tool].len(), 2);
        assert!(ctx.fetched_entries[&EntryType::Knowledge].is_empty());
        assert!(!ctx.fetched_entries.contains_key(&EntryType::Guideline));
        assert!(ctx.is_complete(Stage::Fetch));
    }

    #[tokio::test]
    async fn test_empty_scope_chain_skips_repository() {
        let repo = Arc::new(repo());
        let request = QueryRequest::new(vec![EntryType::Tool], vec![]);
        let ctx = fetch_stage(PipelineContext::new(request), &Capabilities::new(repo.clone()))
            .await
            .unwrap();

        assert!(ctx.fetched_entries[&EntryType::Tool].is_empty());
        assert_eq!(repo.calls(), 0);
    }

    #[tokio::test]
    async fn test_repository_failure_is_fatal() {
        let request = QueryRequest::new(vec![EntryType::Tool], vec![ScopeRef::global()]);
        let result = fetch_stage(
            PipelineContext::new(request),
            &Capabilities::new(Arc::new(MockEntryRepository::default().with_failure())),
        )
        .await;

        match result {
            Err(PipelineError::RequiredStage { stage, source }) => {
                assert_eq!(stage, Stage::Fetch);
                assert!(matches!(source, CollaboratorError::Unavailable(_)));
            }
            other => panic!("expected required stage failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_related_ids_loaded() {
        let request = QueryRequest::new(vec![EntryType::Tool], vec![project()])
            .with_related_to("k1", EntryType::Knowledge);
        let caps = Capabilities::new(Arc::new(repo())).with_relations(Arc::new(
            MockRelationRepository::default().with_relation(
                "k1",
                EntryType::Knowledge,
                EntryType::Tool,
                "t1",
            ),
        ));

        let ctx = fetch_stage(PipelineContext::new(request), &caps).await.unwrap();
        let related = ctx.related_ids.unwrap();
        assert!(related[&EntryType::Tool].contains("t1"));
    }

    #[tokio::test]
    async fn test_related_to_without_repository_is_configuration_error() {
        let request = QueryRequest::new(vec![EntryType::Tool], vec![project()])
            .with_related_to("k1", EntryType::Knowledge);
        let result = fetch_stage(
            PipelineContext::new(request),
            &Capabilities::new(Arc::new(repo())),
        )
        .await;
        assert!(matches!(result, Err(PipelineError::Configuration(_))));
    }
}
