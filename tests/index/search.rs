// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

use crate::support::{
    page_image, pages_collection, SlowEncoder, StalledBackend, SyntheticEncoder, DIM, SEQ_LEN, SPECIAL,
};
use approx::assert_relative_eq;
use page_index::core::storage::{BackendError, QueryRequest, VectorBackend};
use page_index::core::types::{MultiVector, Representations, VectorField};
use page_index::encoding::{PatchEncoder, PoolingTransformer, QueryRepresentationBuilder, SharedEncoder};
use page_index::index::{AckMode, IndexingPipeline, PhasedSearch, Retriever, SearchError, SearchRequest, UpsertPipeline};
use page_index::storage::InMemoryBackend;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BOOK: &str = "machine_learning";

async fn indexed_backend() -> Arc<InMemoryBackend> {
    let backend = Arc::new(InMemoryBackend::new());
    pages_collection(&backend, "pages").await;
    let upserts = UpsertPipeline::new(backend.clone(), "pages", AckMode::default());
    let mut pipeline = IndexingPipeline::new(SharedEncoder::new(SyntheticEncoder), upserts, "http://minio").unwrap();
    let pages: Vec<_> = (0..5).map(|n| page_image(BOOK, n)).collect();
    pipeline.index_pages(&pages).await.unwrap();
    backend
}

/// Representations of the page stored under id `n`.
fn page_representations(n: usize) -> Representations {
    let grid = SyntheticEncoder.encode_images(&[page_image(BOOK, n)]).unwrap();
    PoolingTransformer::new(SEQ_LEN, grid.dim().2)
        .unwrap()
        .pool(grid.view())
        .unwrap()
        .into_representations()
        .remove(0)
}

#[tokio::test]
async fn test_exact_duplicate_ranks_first_on_every_field() {
    let backend = indexed_backend().await;
    let search = PhasedSearch::new(backend, "pages");
    let reps = page_representations(2);

    for field in VectorField::ALL {
        let query = reps.get(field).clone();
        let tokens = query.len();
        let hits = search.search(SearchRequest::new(field, query, 3)).await.unwrap();

        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id, 2, "field {}", field);
        // MaxSim of a matrix with itself is one per query token
        assert_relative_eq!(hits[0].score, tokens as f32, epsilon = 1e-3);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(hits[0].page().unwrap().page_number, 2);
    }
}

#[tokio::test]
async fn test_search_uses_the_requested_field() {
    let backend = indexed_backend().await;
    let search = PhasedSearch::new(backend, "pages");
    let reps = page_representations(4);

    // pooled rows have no exact counterpart among the grid tokens, so a
    // perfect score is only reachable against the pooled field itself
    let hits = search
        .search(SearchRequest::new(VectorField::MaxPooling, reps.max_pool.clone(), 1))
        .await
        .unwrap();
    assert_relative_eq!(hits[0].score, (4 + SPECIAL) as f32, epsilon = 1e-3);

    let hits = search
        .search(SearchRequest::new(VectorField::Initial, reps.max_pool.clone(), 1))
        .await
        .unwrap();
    assert!(hits[0].score < (4 + SPECIAL) as f32 - 1e-2);
}

#[tokio::test]
async fn test_result_length_is_bounded_by_top_k() {
    let backend = indexed_backend().await;
    let search = PhasedSearch::new(backend, "pages");
    let query = page_representations(0).mean_pool;

    for top_k in [1, 3, 5, 10] {
        let hits = search
            .search(SearchRequest::new(VectorField::MeanPooling, query.clone(), top_k))
            .await
            .unwrap();
        assert_eq!(hits.len(), top_k.min(5));
    }
    let hits = search
        .search(SearchRequest::new(VectorField::MeanPooling, query, 0))
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn test_errors_are_not_empty_results() {
    let backend = indexed_backend().await;
    let search = PhasedSearch::new(backend.clone(), "pages");

    let err = search
        .search(SearchRequest::new(VectorField::Initial, MultiVector::default(), 3))
        .await
        .unwrap_err();
    assert!(matches!(err, SearchError::InvalidQuery(_)));

    let missing = PhasedSearch::new(backend, "no_such_collection");
    let err = missing
        .search(SearchRequest::new(VectorField::Initial, MultiVector::single(vec![1.0; 8]), 3))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SearchError::Backend(BackendError::CollectionNotFound("no_such_collection".to_string()))
    );
}

#[tokio::test]
async fn test_search_many_keeps_request_order() {
    let backend = indexed_backend().await;
    let search = PhasedSearch::new(backend, "pages").with_timeout(Duration::from_secs(5));

    let requests = (0..5)
        .map(|n| SearchRequest::new(VectorField::MeanPooling, page_representations(n).mean_pool, 1))
        .collect();
    let results = search.search_many(requests).await;

    let top: Vec<u64> = results.into_iter().map(|r| r.unwrap()[0].id).collect();
    assert_eq!(top, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_retriever_reports_hits_and_latency() {
    let backend = indexed_backend().await;
    let encoder = SharedEncoder::new(SyntheticEncoder);
    let retriever = Retriever::new(
        QueryRepresentationBuilder::new(encoder),
        PhasedSearch::new(backend.clone(), "pages"),
    );

    for field in VectorField::ALL {
        let retrieval = retriever
            .retrieve("eigenvalues of a symmetric matrix", field, 3)
            .await
            .unwrap();
        assert_eq!(retrieval.hits.len(), 3);
        assert!(retrieval.hits.windows(2).all(|w| w[0].score >= w[1].score));
        assert_eq!(retrieval.total_time(), retrieval.encode_time + retrieval.search_time);
    }

    // the raw backend agrees with the executor
    let query = QueryRepresentationBuilder::new(SharedEncoder::new(SyntheticEncoder))
        .build("eigenvalues")
        .unwrap();
    let direct = backend
        .query(
            "pages",
            &QueryRequest {
                using: VectorField::MeanPooling,
                query: query.for_field(VectorField::MeanPooling),
                limit: 3,
                with_payload: false,
            },
        )
        .await
        .unwrap();
    assert!(direct.iter().all(|h| h.payload.is_none()));
}

#[tokio::test]
async fn test_stalled_backend_times_out() {
    let inner = InMemoryBackend::new();
    pages_collection(&inner, "pages").await;
    let search = PhasedSearch::new(Arc::new(StalledBackend { inner }), "pages")
        .with_timeout(Duration::from_millis(20));
    let query = MultiVector::single(vec![1.0; DIM]);

    let err = search
        .search(SearchRequest::new(VectorField::Initial, query.clone(), 3))
        .await
        .unwrap_err();
    assert_eq!(err, SearchError::Timeout(Duration::from_millis(20)));

    // a per-request bound wins over the executor default
    let err = search
        .search(SearchRequest::new(VectorField::Initial, query, 3).with_timeout(Duration::from_millis(5)))
        .await
        .unwrap_err();
    assert_eq!(err, SearchError::Timeout(Duration::from_millis(5)));
}

#[tokio::test(flavor = "current_thread")]
async fn test_query_encoding_does_not_block_the_runtime() {
    let backend = indexed_backend().await;
    let encoder = SharedEncoder::new(SlowEncoder {
        delay: Duration::from_millis(200),
    });
    let retriever = Retriever::new(QueryRepresentationBuilder::new(encoder), PhasedSearch::new(backend, "pages"));

    let ticks = Arc::new(AtomicUsize::new(0));
    let ticker = {
        let ticks = ticks.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(5)).await;
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let retrieval = retriever
        .retrieve("singular value decomposition", VectorField::MeanPooling, 3)
        .await
        .unwrap();
    ticker.abort();

    assert_eq!(retrieval.hits.len(), 3);
    assert!(retrieval.encode_time >= Duration::from_millis(200));
    // the only runtime thread kept ticking while the encoder ran
    assert!(ticks.load(Ordering::SeqCst) >= 10, "ticks: {}", ticks.load(Ordering::SeqCst));
}
