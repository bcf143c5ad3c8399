//! End-to-end scans against mock collaborators

mod common;

use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

use common::*;
use invoice_ingest::checkpoint::{CheckpointStore, FileCheckpointStore};
use invoice_ingest::store::MemoryRecordStore;
use invoice_ingest::{
    Config, ScanEvent, ScanPipeline, ScanRequest, ScanStatus, SourceLane,
};

struct Harness {
    pipeline: Arc<ScanPipeline>,
    checkpoints: Arc<FileCheckpointStore>,
    store: Arc<MemoryRecordStore>,
    text_extractor: Arc<MockTextExtractor>,
    _dir: TempDir,
}

fn harness(
    provider: MockProvider,
    text_extractor: MockTextExtractor,
    document_pipeline: MockDocumentPipeline,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let checkpoints = Arc::new(FileCheckpointStore::new(dir.path()));
    let store = Arc::new(MemoryRecordStore::new());
    let text_extractor = Arc::new(text_extractor);

    let pipeline = Arc::new(ScanPipeline::new(
        Config::default(),
        "user@example.com",
        Arc::new(provider),
        Arc::new(KeepAllClassifier),
        Arc::clone(&text_extractor) as Arc<_>,
        Arc::new(document_pipeline),
        Arc::clone(&checkpoints) as Arc<_>,
        Arc::clone(&store) as Arc<_>,
    ));

    Harness {
        pipeline,
        checkpoints,
        store,
        text_extractor,
        _dir: dir,
    }
}

fn request(days: u32) -> ScanRequest {
    ScanRequest {
        days,
        resume_scan_id: None,
    }
}

fn terminal(events: &[ScanEvent]) -> &ScanEvent {
    events.last().expect("stream ended without events")
}

#[tokio::test]
async fn fast_lane_success_persists_one_record() {
    let mut results = HashMap::new();
    results.insert("m1".to_string(), extraction("Acme Inc", Some("100"), 50.0));

    let h = harness(
        MockProvider::new(vec![text_message(
            "m1",
            "Invoice #100",
            "Invoice #100, Acme Inc, Total $50.00",
        )]),
        MockTextExtractor::new(results),
        MockDocumentPipeline::broken(),
    );

    let events = collect_events(h.pipeline.run(request(30))).await;

    assert!(matches!(events.first(), Some(ScanEvent::ScanStarted { .. })));
    match terminal(&events) {
        ScanEvent::Complete { stats, records } => {
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].vendor_name, "Acme Inc");
            assert_eq!(records[0].document_number.as_deref(), Some("100"));
            assert_eq!(records[0].total_amount, 50.0);
            assert_eq!(records[0].source_lane, SourceLane::FastText);
            assert_eq!(stats.extracted, 1);
            assert_eq!(stats.rerouted, 0);
            assert_eq!(stats.failed, 0);
        }
        other => panic!("expected complete, got {:?}", other),
    }
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn weak_fast_result_reroutes_into_text_fallback() {
    let mut results = HashMap::new();
    results.insert("m1".to_string(), weak_extraction("Acme Inc", 50.0));

    let h = harness(
        MockProvider::new(vec![text_message("m1", "Invoice", "Total $50.00")]),
        MockTextExtractor::new(results),
        MockDocumentPipeline::broken(),
    );

    let events = collect_events(h.pipeline.run(request(30))).await;

    match terminal(&events) {
        ScanEvent::Complete { stats, records } => {
            // Low confidence re-routes; heavy text fallback then accepts
            // the same result because the amount and vendor are usable
            assert_eq!(stats.rerouted, 1);
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].source_lane, SourceLane::TextFallback);
        }
        other => panic!("expected complete, got {:?}", other),
    }
}

#[tokio::test]
async fn rerouted_candidate_fails_exactly_once() {
    let h = harness(
        MockProvider::new(vec![text_message("m1", "Invoice", "Total $50.00")]),
        MockTextExtractor::empty(),
        MockDocumentPipeline::broken(),
    );

    let events = collect_events(h.pipeline.run(request(30))).await;

    match terminal(&events) {
        ScanEvent::Complete { stats, records } => {
            assert_eq!(records.len(), 0);
            assert_eq!(stats.rerouted, 1);
            assert_eq!(stats.failed, 1);
            // One fast-lane batch call plus one heavy-lane fallback
            // call; no third attempt after the heavy lane fails
            assert_eq!(h.text_extractor.call_count(), 2);
        }
        other => panic!("expected complete, got {:?}", other),
    }
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn duplicate_across_heavy_workers_persists_once() {
    // Two different messages carry the same underlying document
    let h = harness(
        MockProvider::new(vec![
            pdf_message("m1", "Invoice copy"),
            pdf_message("m2", "Fwd: Invoice copy"),
        ]),
        MockTextExtractor::empty(),
        MockDocumentPipeline::fixed(extraction("Acme", Some("100"), 50.0)),
    );

    let events = collect_events(h.pipeline.run(request(30))).await;

    match terminal(&events) {
        ScanEvent::Complete { stats, records } => {
            assert_eq!(records.len(), 1);
            assert_eq!(stats.extracted, 1);
            assert_eq!(stats.duplicates, 1);
            assert_eq!(stats.heavy_lane, 2);
        }
        other => panic!("expected complete, got {:?}", other),
    }
    assert_eq!(h.store.len(), 1);
}

#[tokio::test]
async fn resume_processes_only_unseen_candidates() {
    let mut results = HashMap::new();
    results.insert("a".to_string(), extraction("Acme", Some("1"), 10.0));
    results.insert("b".to_string(), extraction("Acme", Some("2"), 20.0));
    results.insert("c".to_string(), extraction("Acme", Some("3"), 30.0));

    let h = harness(
        MockProvider::new(vec![
            text_message("a", "Invoice 1", "Total $10"),
            text_message("b", "Invoice 2", "Total $20"),
            text_message("c", "Invoice 3", "Total $30"),
        ]),
        MockTextExtractor::new(results),
        MockDocumentPipeline::broken(),
    );

    // A previous attempt already handled a and b
    let previous = h.checkpoints.create("user@example.com", 30).await.unwrap();
    h.checkpoints
        .mark_processed(&previous.scan_id, &["a".to_string(), "b".to_string()])
        .await
        .unwrap();

    let events = collect_events(h.pipeline.run(ScanRequest {
        days: 30,
        resume_scan_id: Some(previous.scan_id.clone()),
    }))
    .await;

    match events.first() {
        Some(ScanEvent::ScanStarted { scan_id }) => assert_eq!(scan_id, &previous.scan_id),
        other => panic!("expected scan_started, got {:?}", other),
    }
    match terminal(&events) {
        ScanEvent::Complete { stats, records } => {
            assert_eq!(stats.classified, 1);
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].document_number.as_deref(), Some("3"));
        }
        other => panic!("expected complete, got {:?}", other),
    }
}

#[tokio::test]
async fn auth_failure_emits_resumable_error_and_fails_checkpoint() {
    let mut provider = MockProvider::new(vec![text_message("m1", "Invoice", "x")]);
    provider.auth_fail = true;

    let h = harness(
        provider,
        MockTextExtractor::empty(),
        MockDocumentPipeline::broken(),
    );

    let events = collect_events(h.pipeline.run(request(30))).await;

    let scan_id = match events.first() {
        Some(ScanEvent::ScanStarted { scan_id }) => scan_id.clone(),
        other => panic!("expected scan_started, got {:?}", other),
    };
    match terminal(&events) {
        ScanEvent::Error {
            message,
            can_resume,
            scan_id: event_scan_id,
        } => {
            assert!(message.contains("Authentication failed"));
            assert!(*can_resume);
            assert_eq!(event_scan_id.as_deref(), Some(scan_id.as_str()));
        }
        other => panic!("expected error, got {:?}", other),
    }

    let checkpoint = h.checkpoints.load(&scan_id).await.unwrap();
    assert_eq!(checkpoint.status, ScanStatus::Failed);
    assert!(checkpoint.error_message.is_some());
}

#[tokio::test]
async fn mid_scan_auth_expiry_aborts_with_resumable_error() {
    let mut provider = MockProvider::new(vec![text_message("m1", "Invoice", "Total $50")]);
    provider.fetch_auth_fail = true;

    let h = harness(
        provider,
        MockTextExtractor::empty(),
        MockDocumentPipeline::broken(),
    );

    let events = collect_events(h.pipeline.run(request(30))).await;

    let scan_id = match events.first() {
        Some(ScanEvent::ScanStarted { scan_id }) => scan_id.clone(),
        other => panic!("expected scan_started, got {:?}", other),
    };
    match terminal(&events) {
        ScanEvent::Error {
            message,
            can_resume,
            ..
        } => {
            assert!(message.contains("Authentication failed"));
            assert!(*can_resume);
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert!(h.store.is_empty());

    let checkpoint = h.checkpoints.load(&scan_id).await.unwrap();
    assert_eq!(checkpoint.status, ScanStatus::Failed);
}

#[tokio::test]
async fn completed_scan_finalizes_checkpoint() {
    let mut results = HashMap::new();
    results.insert("m1".to_string(), extraction("Acme", Some("100"), 50.0));

    let h = harness(
        MockProvider::new(vec![
            text_message("m1", "Invoice", "Total $50"),
            text_message("m2", "Invoice", "no extraction"),
        ]),
        MockTextExtractor::new(results),
        MockDocumentPipeline::broken(),
    );

    let events = collect_events(h.pipeline.run(request(30))).await;

    let scan_id = match events.first() {
        Some(ScanEvent::ScanStarted { scan_id }) => scan_id.clone(),
        other => panic!("expected scan_started, got {:?}", other),
    };
    assert!(matches!(terminal(&events), ScanEvent::Complete { .. }));
    assert_eq!(
        events.iter().filter(|e| e.is_terminal()).count(),
        1,
        "exactly one terminal event"
    );

    let checkpoint = h.checkpoints.load(&scan_id).await.unwrap();
    assert_eq!(checkpoint.status, ScanStatus::Completed);
    assert_eq!(checkpoint.total_candidates, 2);
    assert_eq!(checkpoint.extracted_count, 1);
    // m2 re-routed, failed in the heavy lane
    assert_eq!(checkpoint.failed_count, 1);
    assert_eq!(checkpoint.processed_count, 2);
    assert!(checkpoint.processed_message_ids.contains("m1"));
    assert!(checkpoint.processed_message_ids.contains("m2"));
}

#[tokio::test]
async fn finished_scan_cannot_be_resumed() {
    let h = harness(
        MockProvider::new(Vec::new()),
        MockTextExtractor::empty(),
        MockDocumentPipeline::broken(),
    );

    let first = collect_events(h.pipeline.run(request(30))).await;
    let scan_id = match first.first() {
        Some(ScanEvent::ScanStarted { scan_id }) => scan_id.clone(),
        other => panic!("expected scan_started, got {:?}", other),
    };
    assert!(matches!(terminal(&first), ScanEvent::Complete { .. }));

    let second = collect_events(h.pipeline.run(ScanRequest {
        days: 30,
        resume_scan_id: Some(scan_id),
    }))
    .await;

    match terminal(&second) {
        ScanEvent::Error { can_resume, .. } => assert!(!can_resume),
        other => panic!("expected error, got {:?}", other),
    }
}
