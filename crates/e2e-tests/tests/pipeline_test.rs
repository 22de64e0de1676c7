//! Full-pipeline E2E tests for agent-recall.
//!
//! Every test runs real collaborators: the in-memory entry store, an
//! on-disk Tantivy index, bag-of-words vector search and a summary
//! hierarchy, all seeded from the same fixture entries.

use std::sync::Arc;

use chrono::Duration;
use pretty_assertions::assert_eq;

use e2e_tests::{base_time, project_scope, scope_chain, seeded_harness};
use recall_retrieval::mock::MockRewriteService;
use recall_retrieval::{QueryIntent, QueryResponse, QuerySource, RewriteStrategy, SearchQuery, Stage};
use recall_types::{EntryType, PipelineConfig, QueryRequest, SearchStrategy, TagFilter};

fn ids(response: &QueryResponse) -> Vec<&str> {
    response.results.iter().map(|r| r.id.as_str()).collect()
}

fn sorted_ids(response: &QueryResponse) -> Vec<&str> {
    let mut ids = ids(response);
    ids.sort();
    ids
}

fn request(types: Vec<EntryType>) -> QueryRequest {
    QueryRequest::new(types, scope_chain())
}

#[tokio::test]
async fn test_bm25_query_through_pipeline() {
    let harness = seeded_harness();
    let pipeline = harness.pipeline(PipelineConfig::default());

    let response = pipeline
        .execute(
            request(vec![EntryType::Knowledge])
                .with_search("postgres")
                .with_strategy(SearchStrategy::Fts5),
        )
        .await
        .unwrap();

    assert_eq!(sorted_ids(&response), vec!["k-pg-pool", "k-pg-port"]);
    assert!(response.results[0].score >= response.results[1].score);
    assert!(response
        .diagnostics
        .completed_stages
        .contains(&Stage::Lexical));
    assert_eq!(response.meta.total_count, 2);
}

#[tokio::test]
async fn test_configure_intent_without_rewriter() {
    let harness = seeded_harness();
    let pipeline = harness.pipeline(PipelineConfig::default());
    let text = "how to configure the database";

    let response = pipeline
        .execute(request(vec![EntryType::Knowledge]).with_search(text))
        .await
        .unwrap();

    assert_eq!(response.diagnostics.intent, Some(QueryIntent::Configure));
    assert_eq!(response.diagnostics.rewrite_strategy, Some(RewriteStrategy::Direct));
    assert_eq!(
        response.diagnostics.search_queries,
        vec![SearchQuery::original(text)]
    );
}

#[tokio::test]
async fn test_rewrite_variants_fused_with_bm25() {
    let harness = seeded_harness();
    let rewriter = Arc::new(MockRewriteService::default().with_variant(
        "staging",
        0.5,
        QuerySource::Expansion,
    ));
    let pipeline = recall_retrieval::RetrievalPipeline::new(
        harness.full_capabilities().with_rewriter(rewriter.clone()),
        PipelineConfig::default(),
    );

    let mut req = request(vec![EntryType::Knowledge, EntryType::Tool])
        .with_search("postgres")
        .with_strategy(SearchStrategy::Fts5);
    req.enable_expansion = Some(true);
    let response = pipeline.execute(req).await.unwrap();

    assert_eq!(rewriter.calls(), 1);
    assert_eq!(response.diagnostics.search_queries.len(), 2);
    assert_eq!(
        response.diagnostics.rewrite_strategy,
        Some(RewriteStrategy::Expansion)
    );
    assert_eq!(sorted_ids(&response), vec!["k-pg-pool", "k-pg-port", "t-psql"]);
}

#[tokio::test]
async fn test_scope_order_breaks_ties() {
    let harness = seeded_harness();
    let pipeline = harness.pipeline(PipelineConfig::default());

    let response = pipeline
        .execute(
            request(vec![EntryType::Guideline])
                .with_search("sql")
                .with_strategy(SearchStrategy::Direct),
        )
        .await
        .unwrap();

    // Same name at project and global scope: different logical entries,
    // the more specific scope ranks first.
    assert_eq!(ids(&response), vec!["g-proj-sql", "g-global-sql"]);
}

#[tokio::test]
async fn test_recency_breaks_ties_within_scope() {
    let harness = seeded_harness();
    let pipeline = harness.pipeline(PipelineConfig::default());

    let response = pipeline
        .execute(
            request(vec![EntryType::Knowledge])
                .with_search("database")
                .with_strategy(SearchStrategy::Direct),
        )
        .await
        .unwrap();

    assert_eq!(ids(&response), vec!["k-pg-pool", "k-pg-port"]);
}

#[tokio::test]
async fn test_priority_range_only_constrains_guidelines() {
    let harness = seeded_harness();
    let pipeline = harness.pipeline(PipelineConfig::default());

    let response = pipeline
        .execute(request(vec![EntryType::Guideline, EntryType::Tool]).with_priority(Some(4), None))
        .await
        .unwrap();

    assert_eq!(ids(&response), vec!["t-psql", "g-proj-sql", "g-global-sql"]);
}

#[tokio::test]
async fn test_created_range_is_inclusive() {
    let harness = seeded_harness();
    let pipeline = harness.pipeline(PipelineConfig::default());

    let response = pipeline
        .execute(request(vec![EntryType::Knowledge]).with_created_range(
            Some(base_time() + Duration::days(4)),
            Some(base_time() + Duration::days(5)),
        ))
        .await
        .unwrap();

    assert_eq!(ids(&response), vec!["k-pg-pool", "k-redis"]);
}

#[tokio::test]
async fn test_tag_filters_are_case_insensitive_and_exclude_wins() {
    let harness = seeded_harness();
    let pipeline = harness.pipeline(PipelineConfig::default());

    let response = pipeline
        .execute(
            request(vec![EntryType::Knowledge, EntryType::Experience]).with_tags(TagFilter {
                include: vec!["Postgres".to_string()],
                exclude: vec!["INCIDENT".to_string()],
                require: vec![],
            }),
        )
        .await
        .unwrap();

    assert_eq!(ids(&response), vec!["k-pg-pool", "k-pg-port"]);
    assert!(response.results.iter().all(|r| r.score > 0.0));

    let required = pipeline
        .execute(request(vec![EntryType::Knowledge]).with_tags(TagFilter {
            require: vec!["database".to_string(), "Performance".to_string()],
            ..Default::default()
        }))
        .await
        .unwrap();
    assert_eq!(ids(&required), vec!["k-pg-pool"]);
}

#[tokio::test]
async fn test_related_to_keeps_only_related_entries() {
    let harness = seeded_harness();
    let pipeline = harness.pipeline(PipelineConfig::default());

    let response = pipeline
        .execute(
            request(vec![EntryType::Knowledge, EntryType::Tool])
                .with_related_to("x-outage", EntryType::Experience),
        )
        .await
        .unwrap();

    assert_eq!(ids(&response), vec!["k-pg-pool", "t-psql"]);
    assert_eq!(
        response.results[0].tags,
        vec!["database", "postgres", "performance"]
    );
}

#[tokio::test]
async fn test_hierarchical_narrowing_with_semantic_search() {
    let harness = seeded_harness();
    harness.summarize(
        &project_scope(),
        &[
            ("pg", &["k-pg-port", "k-pg-pool", "x-outage"][..]),
            ("tooling", &["t-psql", "g-proj-sql"][..]),
        ],
    );

    let mut config = PipelineConfig::default();
    config.hierarchical.min_similarity = 0.1;
    config.semantic.threshold = 0.2;
    let pipeline = harness.pipeline(config);

    let response = pipeline
        .execute(
            request(vec![EntryType::Knowledge])
                .with_search("postgres pool size")
                .with_strategy(SearchStrategy::Semantic),
        )
        .await
        .unwrap();

    let diagnostics = &response.diagnostics;
    assert!(diagnostics.completed_stages.contains(&Stage::Hierarchical));
    assert_eq!(diagnostics.hierarchical_levels, 2);
    assert_eq!(ids(&response).first(), Some(&"k-pg-pool"));
    assert!(ids(&response)
        .iter()
        .all(|id| *id == "k-pg-pool" || *id == "k-pg-port"));
}

#[tokio::test]
async fn test_concurrent_queries_share_one_pipeline() {
    let harness = seeded_harness();
    let pipeline = Arc::new(harness.pipeline(PipelineConfig::default()));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move {
                pipeline
                    .execute(
                        QueryRequest::new(vec![EntryType::Knowledge], scope_chain())
                            .with_search("postgres")
                            .with_strategy(SearchStrategy::Fts5),
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert_eq!(sorted_ids(&response), vec!["k-pg-pool", "k-pg-port"]);
    }
}

#[tokio::test]
async fn test_response_serializes_to_json() {
    let harness = seeded_harness();
    let pipeline = harness.pipeline(PipelineConfig::default());

    let response = pipeline
        .execute(request(vec![EntryType::Tool]).with_search("psql"))
        .await
        .unwrap();

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["results"][0]["id"], "t-psql");
    assert_eq!(json["meta"]["total_count"], 1);
}
