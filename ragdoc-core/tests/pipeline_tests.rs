//! End-to-end pipeline behavior with deterministic fakes.

mod common;

use common::*;
use futures::StreamExt;
use ragdoc_core::{
    AnswerEvent, END_OF_ANSWER, IngestMode, NOT_FOUND_MESSAGE, QueryResponse, QueryStream,
    RagConfig, RagError, SOURCES_TAG, VectorStore,
};

fn config() -> RagConfig {
    RagConfig::builder()
        .top_k(1)
        .relevance_threshold(0.0)
        .build()
        .unwrap()
}

async fn collect(stream: QueryStream) -> Vec<AnswerEvent> {
    let QueryStream::Answer(stream) = stream else {
        panic!("expected an answer stream, got {stream:?}");
    };
    stream.map(|event| event.unwrap()).collect().await
}

#[tokio::test]
async fn answers_capital_of_france_from_the_indexed_document() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(
        dir.path(),
        &[("france.txt", FRANCE), ("germany.txt", GERMANY)],
    );
    let h = harness(
        config(),
        ScriptedModel::new("Paris is the capital of France."),
    );

    let report = h.pipeline.ingest_directory(dir.path()).await.unwrap();
    assert_eq!(report.files, 2);
    assert_eq!(report.chunks, 2);
    assert!(report.skipped.is_empty());

    let response = h
        .pipeline
        .ask("What is the capital of France?")
        .await
        .unwrap();
    let QueryResponse::Answered(answer) = response else {
        panic!("expected an answer, got {response:?}");
    };
    assert!(answer.text.contains("Paris"));
    assert_eq!(answer.sources.len(), 1);
    assert_eq!(answer.sources[0].index, 1);
    assert!(answer.sources[0].preview.contains("Paris"));
    assert!(
        answer.sources[0]
            .source
            .as_deref()
            .unwrap()
            .ends_with("france.txt")
    );

    let prompt = h.model.last_prompt().unwrap();
    assert!(prompt.contains(FRANCE));
    assert!(!prompt.contains(GERMANY));
    assert!(prompt.contains("What is the capital of France?"));
}

#[tokio::test]
async fn empty_index_yields_not_found_without_calling_the_model() {
    let h = harness(config(), ScriptedModel::new("unused"));

    let response = h
        .pipeline
        .ask("What is the capital of France?")
        .await
        .unwrap();

    match response {
        QueryResponse::NotFound {
            message,
            best_score,
        } => {
            assert_eq!(message, NOT_FOUND_MESSAGE);
            assert_eq!(best_score, None);
        }
        other => panic!("expected not found, got {other:?}"),
    }
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn weak_match_is_gated() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), &[("germany.txt", GERMANY)]);
    let config = RagConfig::builder()
        .relevance_threshold(0.95)
        .build()
        .unwrap();
    let h = harness(config, ScriptedModel::new("unused"));
    h.pipeline.ingest_directory(dir.path()).await.unwrap();

    let response = h
        .pipeline
        .ask("What is the capital of France?")
        .await
        .unwrap();

    assert!(matches!(response, QueryResponse::NotFound { best_score: Some(s), .. } if s < 0.95));
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn blank_question_is_rejected_before_any_call() {
    let h = harness(config(), ScriptedModel::new("unused"));

    let err = h.pipeline.ask("   \n").await.unwrap_err();

    assert!(matches!(err, RagError::EmptyQuery));
    assert_eq!(h.embedder.calls(), 0);
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn empty_directory_fails_and_leaves_the_index_untouched() {
    let corpus = tempfile::tempdir().unwrap();
    write_corpus(corpus.path(), &[("france.txt", FRANCE)]);
    let empty = tempfile::tempdir().unwrap();
    write_corpus(empty.path(), &[("blank.txt", "   \n\n  ")]);
    let h = harness(config(), ScriptedModel::new("Paris"));

    h.pipeline.ingest_directory(corpus.path()).await.unwrap();
    let before = h.pipeline.indexed_chunks().await.unwrap();
    let calls_before = h.embedder.calls();

    let err = h.pipeline.ingest_directory(empty.path()).await.unwrap_err();

    assert!(matches!(err, RagError::NoDocumentsFound { .. }));
    assert_eq!(h.pipeline.indexed_chunks().await.unwrap(), before);
    assert_eq!(h.embedder.calls(), calls_before);
}

#[tokio::test]
async fn reingesting_with_replace_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let long = "Paragraph about rivers and mountains. ".repeat(60);
    write_corpus(
        dir.path(),
        &[("france.txt", FRANCE), ("long/atlas.txt", long.as_str())],
    );
    let config = RagConfig::builder()
        .chunk_size(200)
        .chunk_overlap(40)
        .build()
        .unwrap();
    let h = harness(config, ScriptedModel::new("unused"));

    let first = h.pipeline.ingest_directory(dir.path()).await.unwrap();
    let first_hits = h.pipeline.search("rivers and mountains").await.unwrap();
    let second = h.pipeline.ingest_directory(dir.path()).await.unwrap();
    let second_hits = h.pipeline.search("rivers and mountains").await.unwrap();

    assert!(first.chunks > 2);
    assert_eq!(first.chunks, second.chunks);
    assert_eq!(h.pipeline.indexed_chunks().await.unwrap(), second.chunks);
    let texts = |hits: &[ragdoc_core::SearchResult]| {
        hits.iter()
            .map(|r| r.chunk.text.clone())
            .collect::<Vec<_>>()
    };
    assert_eq!(texts(&first_hits), texts(&second_hits));
}

#[tokio::test]
async fn replace_mode_drops_chunks_of_removed_files() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(
        dir.path(),
        &[("france.txt", FRANCE), ("germany.txt", GERMANY)],
    );
    let h = harness(config(), ScriptedModel::new("unused"));
    h.pipeline.ingest_directory(dir.path()).await.unwrap();

    std::fs::remove_file(dir.path().join("germany.txt")).unwrap();
    h.pipeline.ingest_directory(dir.path()).await.unwrap();

    assert_eq!(h.pipeline.indexed_chunks().await.unwrap(), 1);
}

#[tokio::test]
async fn append_mode_overwrites_unchanged_chunks() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), &[("france.txt", FRANCE)]);
    let config = RagConfig::builder()
        .ingest_mode(IngestMode::Append)
        .build()
        .unwrap();
    let h = harness(config, ScriptedModel::new("unused"));

    h.pipeline.ingest_directory(dir.path()).await.unwrap();
    write_corpus(dir.path(), &[("germany.txt", GERMANY)]);
    let report = h.pipeline.ingest_directory(dir.path()).await.unwrap();

    assert_eq!(report.mode, IngestMode::Append);
    assert_eq!(h.store.count("documents").await.unwrap(), 2);
}

#[tokio::test]
async fn query_text_taken_from_a_chunk_retrieves_that_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let docs = [
        (
            "astronomy.txt",
            "Comets orbit the sun along elongated elliptical paths.",
        ),
        (
            "cooking.txt",
            "Knead sourdough gently before proofing overnight.",
        ),
        (
            "sailing.txt",
            "Reef mainsail early when gusts strengthen offshore.",
        ),
        (
            "geology.txt",
            "Basalt forms when lava cools rapidly near surface.",
        ),
    ];
    write_corpus(dir.path(), &docs);
    let h = harness(config(), ScriptedModel::new("unused"));
    h.pipeline.ingest_directory(dir.path()).await.unwrap();

    for (name, text) in docs {
        let words: Vec<&str> = text.split_whitespace().collect();
        let query = words[1..4].join(" ");
        let hits = h.pipeline.search(&query).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].chunk.text.contains(&query), "{name}: {query}");
    }
}

#[tokio::test]
async fn streamed_payload_is_fragments_then_marker_then_sources() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), &[("france.txt", FRANCE)]);
    let answer = "Paris is the capital of France. ".repeat(4);
    let h = harness(config(), ScriptedModel::new(answer.clone()));
    h.pipeline.ingest_directory(dir.path()).await.unwrap();

    let events = collect(h.pipeline.ask_stream("capital of France").await.unwrap()).await;

    let expected_fragments = answer.chars().count().div_ceil(50);
    assert_eq!(events.len(), expected_fragments + 2);
    let text: String = events[..expected_fragments]
        .iter()
        .map(|e| match e {
            AnswerEvent::Fragment(f) => {
                assert!(f.chars().count() <= 50);
                f.as_str()
            }
            other => panic!("expected a fragment, got {other:?}"),
        })
        .collect();
    assert_eq!(text, answer);
    assert_eq!(events[expected_fragments], AnswerEvent::EndOfAnswer);
    let AnswerEvent::Sources(sources) = &events[expected_fragments + 1] else {
        panic!("expected sources last");
    };
    assert_eq!(sources.len(), 1);

    let wire: String = events.iter().map(AnswerEvent::to_wire).collect();
    assert_eq!(wire.matches(END_OF_ANSWER).count(), 1);
    let marker = wire.find(END_OF_ANSWER).unwrap();
    assert!(wire[marker..].starts_with(&format!("{END_OF_ANSWER}{SOURCES_TAG}Source 1: ")));
    assert!(wire.ends_with('\n'));
}

#[tokio::test]
async fn token_streaming_models_are_forwarded_piecewise() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), &[("france.txt", FRANCE)]);
    let h = harness(
        config(),
        ScriptedModel::new("Paris is the capital.").streaming(),
    );
    h.pipeline.ingest_directory(dir.path()).await.unwrap();

    let events = collect(h.pipeline.ask_stream("capital of France").await.unwrap()).await;

    assert_eq!(
        events[..4],
        [
            AnswerEvent::Fragment("Paris ".into()),
            AnswerEvent::Fragment("is ".into()),
            AnswerEvent::Fragment("the ".into()),
            AnswerEvent::Fragment("capital.".into()),
        ]
    );
    assert_eq!(events[4], AnswerEvent::EndOfAnswer);
    assert!(matches!(events[5], AnswerEvent::Sources(_)));
    assert_eq!(events.len(), 6);
}

#[tokio::test]
async fn stream_not_found_does_not_call_the_model() {
    let h = harness(config(), ScriptedModel::new("unused"));

    let stream = h.pipeline.ask_stream("anything at all").await.unwrap();

    assert!(matches!(stream, QueryStream::NotFound { .. }));
    assert_eq!(h.model.calls(), 0);
}

#[tokio::test]
async fn model_failure_surfaces_as_generation_failed() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), &[("france.txt", FRANCE)]);
    let h = harness(config(), ScriptedModel::new("unused").failing());
    h.pipeline.ingest_directory(dir.path()).await.unwrap();

    let err = h.pipeline.ask("capital of France").await.unwrap_err();

    assert!(matches!(err, RagError::GenerationFailed { .. }));
    assert!(!err.is_client_error());
    assert_eq!(h.model.calls(), 1);
}

#[tokio::test]
async fn embedding_failure_aborts_ingestion_without_clearing_the_index() {
    use std::sync::Arc;

    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), &[("france.txt", FRANCE)]);
    let h = harness(config(), ScriptedModel::new("unused"));
    h.pipeline.ingest_directory(dir.path()).await.unwrap();

    let broken = ragdoc_core::RagPipeline::builder()
        .config(config())
        .embedding_provider(Arc::new(FailingEmbedder))
        .vector_store(h.store.clone())
        .language_model(h.model.clone())
        .loader(ragdoc_core::DirectoryLoader::empty().with_loader(ragdoc_core::TextLoader))
        .build()
        .unwrap();

    let err = broken.ingest_directory(dir.path()).await.unwrap_err();

    assert!(matches!(err, RagError::EmbeddingFailed { .. }));
    assert_eq!(h.pipeline.indexed_chunks().await.unwrap(), 1);
}

fn pipeline_over(
    store: std::sync::Arc<ragdoc_core::InMemoryVectorStore>,
    embedder: std::sync::Arc<dyn ragdoc_core::EmbeddingProvider>,
) -> ragdoc_core::RagPipeline {
    ragdoc_core::RagPipeline::builder()
        .config(config())
        .embedding_provider(embedder)
        .vector_store(store)
        .language_model(std::sync::Arc::new(ScriptedModel::new("unused")))
        .loader(ragdoc_core::DirectoryLoader::empty().with_loader(ragdoc_core::TextLoader))
        .build()
        .unwrap()
}

#[tokio::test]
async fn replace_creates_the_collection_with_the_measured_dimensions() {
    use std::sync::Arc;

    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), &[("france.txt", FRANCE)]);
    let h = harness(config(), ScriptedModel::new("Paris."));
    h.pipeline.ingest_directory(dir.path()).await.unwrap();

    let misreporting = pipeline_over(
        h.store.clone(),
        Arc::new(MisreportingEmbedder { reported: 768 }),
    );
    let report = misreporting.ingest_directory(dir.path()).await.unwrap();

    assert_eq!(report.chunks, 1);
    assert_eq!(h.pipeline.indexed_chunks().await.unwrap(), 1);
    let response = h.pipeline.ask("capital of France").await.unwrap();
    assert!(matches!(response, QueryResponse::Answered(_)));
}

#[tokio::test]
async fn inconsistent_embedding_lengths_leave_the_index_untouched() {
    use std::sync::Arc;

    let dir = tempfile::tempdir().unwrap();
    write_corpus(dir.path(), &[("france.txt", FRANCE)]);
    let h = harness(config(), ScriptedModel::new("unused"));
    h.pipeline.ingest_directory(dir.path()).await.unwrap();

    write_corpus(dir.path(), &[("germany.txt", GERMANY)]);
    let ragged = pipeline_over(h.store.clone(), Arc::new(RaggedEmbedder));
    let err = ragged.ingest_directory(dir.path()).await.unwrap_err();

    assert!(matches!(err, RagError::EmbeddingFailed { .. }));
    assert!(err.to_string().contains("inconsistent embedding lengths"));
    assert_eq!(h.pipeline.indexed_chunks().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn stalled_model_times_out_as_generation_failed() {
    use std::path::Path;
    use std::sync::Arc;

    let config = RagConfig::builder()
        .top_k(1)
        .relevance_threshold(0.0)
        .request_timeout_secs(5)
        .build();
    let pipeline = ragdoc_core::RagPipeline::builder()
        .config(config.unwrap())
        .embedding_provider(Arc::new(BagOfWordsEmbedder::default()))
        .vector_store(Arc::new(ragdoc_core::InMemoryVectorStore::new()))
        .language_model(Arc::new(StalledModel))
        .build()
        .unwrap();
    let documents = [ragdoc_core::Document::new("france.txt", None, FRANCE)];
    pipeline
        .ingest_documents(Path::new("inline"), &documents)
        .await
        .unwrap();

    let err = pipeline.ask("capital of France").await.unwrap_err();

    assert!(matches!(err, RagError::GenerationFailed { .. }));
    assert!(err.to_string().contains("timed out after 5s"));
}

#[tokio::test]
async fn builder_revalidates_a_literal_config() {
    use std::sync::Arc;

    let result = ragdoc_core::RagPipeline::builder()
        .config(RagConfig {
            embedding_batch_size: 0,
            ..RagConfig::default()
        })
        .embedding_provider(Arc::new(BagOfWordsEmbedder::default()))
        .vector_store(Arc::new(ragdoc_core::InMemoryVectorStore::new()))
        .language_model(Arc::new(ScriptedModel::new("unused")))
        .build();

    assert!(matches!(result, Err(RagError::ConfigError(_))));
}

#[tokio::test]
async fn report_counts_only_documents_that_produced_chunks() {
    use std::path::Path;

    let h = harness(config(), ScriptedModel::new("unused"));
    let documents = [
        ragdoc_core::Document::new("atlas.pdf", Some(1), FRANCE),
        ragdoc_core::Document::new("atlas.pdf", Some(2), "   \n  "),
        ragdoc_core::Document::new("atlas.pdf", Some(3), GERMANY),
    ];

    let report = h
        .pipeline
        .ingest_documents(Path::new("atlas.pdf"), &documents)
        .await
        .unwrap();

    assert_eq!(report.documents, 2);
    assert_eq!(report.chunks, 2);
}

#[tokio::test]
async fn search_then_answer_matches_ask() {
    let dir = tempfile::tempdir().unwrap();
    write_corpus(
        dir.path(),
        &[("france.txt", FRANCE), ("germany.txt", GERMANY)],
    );
    let config = RagConfig::builder()
        .top_k(2)
        .relevance_threshold(0.0)
        .build()
        .unwrap();
    let h = harness(config, ScriptedModel::new("Paris."));
    h.pipeline.ingest_directory(dir.path()).await.unwrap();

    let results = h.pipeline.search("capital of France").await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results[0].chunk.text.contains("France"));
    assert!(results[0].score >= results[1].score);

    let retrieval = ragdoc_core::Retrieval::gate(results, h.pipeline.config().relevance_threshold);
    let response = h
        .pipeline
        .answer("capital of France", retrieval)
        .await
        .unwrap();
    let QueryResponse::Answered(answer) = response else {
        panic!("expected an answer, got {response:?}");
    };
    assert_eq!(answer.sources.len(), 2);
    assert_eq!(h.model.calls(), 1);
}
