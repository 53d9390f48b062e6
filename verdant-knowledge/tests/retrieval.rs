mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeVectorBackend, scenario_corpus};
use verdant_knowledge::search::LexicalQuery;
use verdant_knowledge::{
    KnowledgeError, KnowledgeItem, KnowledgeStore, LocalLexicalStore, RemoteVectorStore,
    RetrievalEngine,
};

const COLLECTION: &str = "plant_care_knowledge";

fn mixed_corpus() -> Vec<KnowledgeItem> {
    vec![
        KnowledgeItem::new("a", "Snake Plant", "watering", "Water sparingly in winter."),
        KnowledgeItem::new("b", "Pothos", "watering", "Water when the top inch is dry."),
        KnowledgeItem::new("c", "Monstera", "lighting", "Bright indirect light."),
        KnowledgeItem::new("d", "Snake Plant", "lighting", "Handles low light well."),
        KnowledgeItem::new("e", "", "general", "Most plants need water and light."),
        KnowledgeItem::new("f", "Fern", "humidity", "Mist daily."),
    ]
}

fn local_engine(items: Vec<KnowledgeItem>) -> RetrievalEngine {
    RetrievalEngine::new(Arc::new(LocalLexicalStore::with_items(items)))
}

async fn remote_with(backend: Arc<FakeVectorBackend>, timeout: Duration) -> RemoteVectorStore {
    let store = RemoteVectorStore::new(backend, COLLECTION, timeout).unwrap();
    store.upsert(&scenario_corpus()).await.unwrap();
    store
}

#[tokio::test]
async fn species_filtered_query_scores_species_and_text() {
    let engine = local_engine(scenario_corpus());

    let retrieval = engine
        .retrieve("water", Some("Snake Plant"), None)
        .await
        .unwrap();

    assert_eq!(retrieval.len(), 1);
    assert_eq!(retrieval.results[0].item.species, "Snake Plant");
    assert_eq!(retrieval.results[0].relevance_score, 5.0);
    assert_eq!(retrieval.results[0].rank, 0);
    assert_eq!(retrieval.backend, "local");
    assert!(!retrieval.degraded);
}

#[tokio::test]
async fn repeated_queries_are_byte_identical() {
    let engine = local_engine(mixed_corpus());

    let first = engine.retrieve("water", None, Some(10)).await.unwrap();
    let second = engine.retrieve("water", None, Some(10)).await.unwrap();

    assert_eq!(
        serde_json::to_string(&first.tips()).unwrap(),
        serde_json::to_string(&second.tips()).unwrap()
    );
    let ids: Vec<&str> = first
        .results
        .iter()
        .map(|result| result.item.id.as_str())
        .collect();
    // Equal scores keep insertion order
    assert_eq!(ids, vec!["a", "b", "e"]);
}

#[test]
fn species_filter_never_lowers_a_score() {
    for item in mixed_corpus() {
        for text in ["water", "light", "mist", "low"] {
            let plain = LexicalQuery::new(text, None).score(&item);
            let filtered = LexicalQuery::new(text, Some(item.species.as_str())).score(&item);
            let other = LexicalQuery::new(text, Some("Cactus")).score(&item);
            assert!(filtered >= plain, "{} with {:?}", item.id, text);
            assert_eq!(other, plain);
        }
    }
}

#[tokio::test]
async fn zero_score_items_are_excluded() {
    let engine = local_engine(mixed_corpus());

    let retrieval = engine.retrieve("mist", None, Some(10)).await.unwrap();
    assert_eq!(retrieval.len(), 1);
    assert_eq!(retrieval.results[0].item.id, "f");

    let nothing = engine.retrieve("repotting", None, None).await.unwrap();
    assert!(nothing.is_empty());
}

#[tokio::test]
async fn results_respect_limit_and_default() {
    let items: Vec<KnowledgeItem> = (0..9)
        .map(|i| KnowledgeItem::new(format!("w{i}"), "", "watering", "Water deeply."))
        .collect();
    let engine = local_engine(items);

    assert_eq!(engine.retrieve("water", None, Some(2)).await.unwrap().len(), 2);
    assert_eq!(engine.retrieve("water", None, None).await.unwrap().len(), 5);
    let engine = engine.with_default_limit(7);
    assert_eq!(engine.retrieve("water", None, None).await.unwrap().len(), 7);
}

#[tokio::test]
async fn invalid_queries_are_rejected() {
    let engine = local_engine(scenario_corpus());

    let zero = engine.retrieve("water", None, Some(0)).await.unwrap_err();
    assert!(matches!(zero, KnowledgeError::InvalidQuery(_)));

    let empty = engine.retrieve("   ", None, None).await.unwrap_err();
    assert!(matches!(empty, KnowledgeError::InvalidQuery(_)));

    let species_only = engine.retrieve("", Some("Pothos"), None).await.unwrap();
    assert_eq!(species_only.len(), 1);
    assert_eq!(species_only.results[0].relevance_score, 3.0);
}

#[tokio::test]
async fn remote_timeout_answers_from_local_fallback() {
    let backend = Arc::new(FakeVectorBackend::new());
    let remote = remote_with(backend.clone(), Duration::from_millis(50)).await;
    backend.set_query_delay(Duration::from_secs(2));

    let engine = RetrievalEngine::new(Arc::new(remote))
        .with_fallback(Arc::new(LocalLexicalStore::with_items(scenario_corpus())));

    let retrieval = engine
        .retrieve("water", Some("Snake Plant"), None)
        .await
        .unwrap();

    assert!(retrieval.degraded);
    assert_eq!(retrieval.backend, "local");
    assert_eq!(retrieval.len(), 1);
    assert_eq!(retrieval.results[0].relevance_score, 5.0);
}

#[tokio::test]
async fn remote_timeout_without_fallback_is_an_error() {
    let backend = Arc::new(FakeVectorBackend::new());
    let remote = remote_with(backend.clone(), Duration::from_millis(50)).await;
    backend.set_query_delay(Duration::from_secs(2));
    let engine = RetrievalEngine::new(Arc::new(remote));

    let err = engine.retrieve("water", None, None).await.unwrap_err();

    assert!(matches!(err, KnowledgeError::Timeout(_)));
    assert!(err.is_unavailable());
}

#[tokio::test]
async fn remote_outage_uses_fallback() {
    let backend = Arc::new(FakeVectorBackend::new());
    let remote = remote_with(backend.clone(), Duration::from_secs(5)).await;
    backend.set_unavailable(true);
    let engine = RetrievalEngine::new(Arc::new(remote))
        .with_fallback(Arc::new(LocalLexicalStore::with_items(scenario_corpus())));

    let retrieval = engine.retrieve("light", None, None).await.unwrap();

    assert!(retrieval.degraded);
    assert_eq!(retrieval.results[0].item.id, "pothos-light");
}

#[tokio::test]
async fn remote_query_prefixes_species_and_maps_distance() {
    let backend = Arc::new(FakeVectorBackend::new());
    let remote = remote_with(backend.clone(), Duration::from_secs(5)).await;
    let engine = RetrievalEngine::new(Arc::new(remote));

    let retrieval = engine
        .retrieve("how often to water", Some("Snake Plant"), Some(2))
        .await
        .unwrap();

    assert_eq!(
        backend.last_query_text().as_deref(),
        Some("Snake Plant how often to water")
    );
    assert_eq!(retrieval.backend, "chroma");
    assert!(!retrieval.degraded);
    assert_eq!(retrieval.len(), 2);
    assert_eq!(retrieval.results[0].item.id, "snake-water");
    assert_eq!(retrieval.results[0].item.category, "watering");
    assert!((retrieval.results[0].relevance_score - 0.9).abs() < 1e-6);
    assert!(retrieval.results[1].relevance_score < retrieval.results[0].relevance_score);
}

#[tokio::test]
async fn remote_reset_recreates_collection_on_next_use() {
    let backend = Arc::new(FakeVectorBackend::new());
    let remote = remote_with(backend.clone(), Duration::from_secs(5)).await;
    assert_eq!(remote.count().await.unwrap(), 2);

    remote.reset().await.unwrap();
    // Resetting twice is harmless
    remote.reset().await.unwrap();

    assert_eq!(remote.count().await.unwrap(), 0);
    assert!(remote.get_all().await.unwrap().is_empty());
    assert_eq!(backend.created(), 1);

    remote.upsert(&scenario_corpus()).await.unwrap();
    assert_eq!(backend.created(), 2);
    assert_eq!(remote.count().await.unwrap(), 2);
}

#[tokio::test]
async fn retrieval_never_creates_a_collection() {
    let backend = Arc::new(FakeVectorBackend::new());
    let remote = RemoteVectorStore::new(backend.clone(), COLLECTION, Duration::from_secs(5))
        .unwrap();
    let engine = RetrievalEngine::new(Arc::new(remote));

    let retrieval = engine.retrieve("water", None, None).await.unwrap();

    assert!(retrieval.is_empty());
    assert!(!retrieval.degraded);
    assert_eq!(backend.created(), 0);
    assert!(backend.last_query_text().is_none());
}

#[tokio::test]
async fn not_found_lookup_reads_empty_and_writes_create_once() {
    let backend = Arc::new(FakeVectorBackend::new());
    backend.set_missing_as_not_found(true);
    let remote = RemoteVectorStore::new(backend.clone(), COLLECTION, Duration::from_secs(5))
        .unwrap();

    assert_eq!(remote.count().await.unwrap(), 0);
    assert!(remote.get_all().await.unwrap().is_empty());
    assert_eq!(backend.created(), 0);

    remote.upsert(&scenario_corpus()).await.unwrap();
    remote.upsert(&scenario_corpus()).await.unwrap();

    assert_eq!(backend.created(), 1);
    assert_eq!(remote.count().await.unwrap(), 2);

    let engine = RetrievalEngine::new(Arc::new(remote));
    assert_eq!(engine.retrieve("water", None, None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn trailing_space_is_part_of_the_query_text() {
    let engine = local_engine(scenario_corpus());

    let spaced = engine.retrieve("water ", None, None).await.unwrap();
    assert_eq!(spaced.len(), 1);
    assert_eq!(spaced.results[0].item.id, "snake-water");

    // "low light." has no space after "light"
    let unmatched = engine.retrieve("light ", None, None).await.unwrap();
    assert!(unmatched.is_empty());
}

#[tokio::test]
async fn remote_get_all_rebuilds_items() {
    let backend = Arc::new(FakeVectorBackend::new());
    let remote = remote_with(backend, Duration::from_secs(5)).await;

    let items = remote.get_all().await.unwrap();

    assert_eq!(items, scenario_corpus());
}
