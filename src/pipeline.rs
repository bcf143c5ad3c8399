//! End-to-end scan orchestration and the streaming caller interface

use async_stream::stream;
use futures::Stream;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::checkpoint::{CheckpointStore, CheckpointUpdate, ScanStatus};
use crate::classification::{ClassificationGate, ClassifierModel};
use crate::config::Config;
use crate::dedup::DedupRegistry;
use crate::discovery::CandidateDiscovery;
use crate::error::IngestError;
use crate::events::{spawn_keepalive, EventSink, FunnelStats, ScanEvent};
use crate::fast_lane::{BulkTextExtractor, FastLaneExtractor};
use crate::heavy_lane::{DocumentPipeline, HeavyLaneExtractor};
use crate::models::ExtractedRecord;
use crate::provider::InboxProvider;
use crate::router::route_lanes;
use crate::store::DurableStore;

/// Caller request opening one scan connection
#[derive(Debug, Clone)]
pub struct ScanRequest {
    /// Trailing window in days; 0 means all time
    pub days: u32,
    /// Pick up a previous scan instead of starting fresh
    pub resume_scan_id: Option<String>,
}

/// Best-effort checkpoint writer.
///
/// Write failures are logged and counted, never propagated: the scan's
/// value is forward progress even when bookkeeping lags. `scan_id` is
/// None when the initial create failed and the run is degraded to
/// no-resume.
struct BestEffortCheckpoint {
    store: Arc<dyn CheckpointStore>,
    scan_id: Option<String>,
    write_failures: AtomicUsize,
}

impl BestEffortCheckpoint {
    async fn update(&self, update: CheckpointUpdate) {
        let Some(scan_id) = &self.scan_id else {
            return;
        };
        if let Err(e) = self.store.update(scan_id, update).await {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Checkpoint update failed for {}: {}", scan_id, e);
        }
    }

    async fn mark_processed(&self, message_ids: &[String]) {
        let Some(scan_id) = &self.scan_id else {
            return;
        };
        if message_ids.is_empty() {
            return;
        }
        if let Err(e) = self.store.mark_processed(scan_id, message_ids).await {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            warn!("Checkpoint id tracking failed for {}: {}", scan_id, e);
        }
    }

    /// Pause is signalled by an external status mutation and only takes
    /// effect at these coarse checkpoint boundaries
    async fn is_paused(&self) -> bool {
        let Some(scan_id) = &self.scan_id else {
            return false;
        };
        match self.store.load(scan_id).await {
            Ok(checkpoint) => checkpoint.status == ScanStatus::Paused,
            Err(_) => false,
        }
    }
}

/// How a scan run ended short of completion
struct ScanFailure {
    message: String,
    can_resume: bool,
    /// Leave the checkpoint as-is (pause) instead of finalizing failed
    mark_failed: bool,
}

/// The streaming document-ingestion pipeline.
///
/// Collaborators are injected as trait objects; all of them are
/// specified only at their interface boundary.
pub struct ScanPipeline {
    config: Config,
    subject_identity: String,
    provider: Arc<dyn InboxProvider>,
    classifier: Arc<dyn ClassifierModel>,
    text_extractor: Arc<dyn BulkTextExtractor>,
    document_pipeline: Arc<dyn DocumentPipeline>,
    checkpoints: Arc<dyn CheckpointStore>,
    store: Arc<dyn DurableStore>,
}

impl ScanPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        subject_identity: impl Into<String>,
        provider: Arc<dyn InboxProvider>,
        classifier: Arc<dyn ClassifierModel>,
        text_extractor: Arc<dyn BulkTextExtractor>,
        document_pipeline: Arc<dyn DocumentPipeline>,
        checkpoints: Arc<dyn CheckpointStore>,
        store: Arc<dyn DurableStore>,
    ) -> Self {
        Self {
            config,
            subject_identity: subject_identity.into(),
            provider,
            classifier,
            text_extractor,
            document_pipeline,
            checkpoints,
            store,
        }
    }

    /// Open a scan and stream its events until the terminal one.
    ///
    /// The scan itself runs on a spawned task: dropping the returned
    /// stream does not cancel it, so progress keeps being checkpointed
    /// for a later resume.
    pub fn run(self: &Arc<Self>, request: ScanRequest) -> impl Stream<Item = ScanEvent> {
        let (sink, mut rx) = EventSink::new();
        let pipeline = Arc::clone(self);

        tokio::spawn(async move {
            pipeline.run_detached(request, sink).await;
        });

        stream! {
            while let Some(event) = rx.recv().await {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    break;
                }
            }
        }
    }

    async fn run_detached(&self, request: ScanRequest, sink: EventSink) {
        let keepalive = spawn_keepalive(
            sink.clone(),
            Duration::from_secs(self.config.events.keepalive_secs),
        );

        match self.execute(&request, &sink).await {
            Ok((checkpoint, stats, records)) => {
                checkpoint
                    .update(CheckpointUpdate::status(ScanStatus::Completed))
                    .await;
                let failures = checkpoint.write_failures.load(Ordering::Relaxed);
                if failures > 0 {
                    info!("Scan finished with {} checkpoint write failures", failures);
                }
                sink.emit(ScanEvent::Complete { stats, records });
            }
            Err((checkpoint, failure)) => {
                if failure.mark_failed {
                    if let Some(checkpoint) = &checkpoint {
                        checkpoint
                            .update(CheckpointUpdate::failed(&failure.message))
                            .await;
                    }
                }
                sink.emit(ScanEvent::Error {
                    message: failure.message,
                    can_resume: failure.can_resume,
                    scan_id: checkpoint.and_then(|c| c.scan_id),
                });
            }
        }

        keepalive.abort();
    }

    /// The staged scan. Sequential through routing, concurrent only in
    /// the heavy lane. Errors below the scan-fatal tier are absorbed
    /// into counters; auth failures abort with a resumable error.
    #[allow(clippy::type_complexity)]
    async fn execute(
        &self,
        request: &ScanRequest,
        sink: &EventSink,
    ) -> std::result::Result<
        (BestEffortCheckpoint, FunnelStats, Vec<ExtractedRecord>),
        (Option<BestEffortCheckpoint>, ScanFailure),
    > {
        // Stage 0: checkpoint create or resume
        let (checkpoint, processed_ids) = match self.open_checkpoint(request, sink).await {
            Ok(pair) => pair,
            Err(failure) => return Err((None, failure)),
        };

        let mut stats = FunnelStats::default();
        let dedup = DedupRegistry::new();
        let discovery = CandidateDiscovery;

        // Stage 1: full enumeration for the funnel total
        stats.total_candidates = match discovery
            .enumerate_total(self.provider.as_ref(), request.days, sink)
            .await
        {
            Ok(total) => total,
            Err(e) => return Err(self.abort(checkpoint, e)),
        };
        checkpoint
            .update(CheckpointUpdate {
                total_candidates: Some(stats.total_candidates),
                ..Default::default()
            })
            .await;
        sink.funnel(&stats);

        // Stage 2: relevance-filtered candidates with metadata
        let (mut candidates, hints) = match discovery
            .fetch_candidates(
                self.provider.as_ref(),
                request.days,
                &self.config.discovery.relevance_query,
                sink,
            )
            .await
        {
            Ok(pair) => pair,
            Err(e) => return Err(self.abort(checkpoint, e)),
        };

        // Resume: skip candidates a previous attempt already handled
        if !processed_ids.is_empty() {
            let before = candidates.len();
            candidates.retain(|c| !processed_ids.contains(&c.message_id));
            sink.info(format!(
                "Resuming: skipped {} already-processed candidates",
                before - candidates.len()
            ));
        }

        // Stage 3: classification gate
        let gate = ClassificationGate::new(
            self.config.classification.batch_size,
            self.config.classification.confidence_threshold,
        );
        let gated = gate
            .run(&candidates, self.classifier.as_ref(), &hints)
            .await;
        stats.classified = candidates.len();
        stats.kept = gated.kept.len();
        stats.discarded = gated.discarded;
        stats.failed += gated.failed;
        stats.processed += gated.discarded + gated.failed;

        let discarded_ids: Vec<String> = candidates
            .iter()
            .filter(|c| !gated.kept.iter().any(|k| k.candidate.message_id == c.message_id))
            .map(|c| c.message_id.clone())
            .collect();
        checkpoint.mark_processed(&discarded_ids).await;
        self.write_progress(&checkpoint, &stats).await;
        sink.info(format!(
            "Classified {} candidates: {} kept, {} discarded",
            stats.classified, stats.kept, stats.discarded
        ));
        sink.funnel(&stats);

        if checkpoint.is_paused().await {
            return Err((
                Some(checkpoint),
                ScanFailure {
                    message: "Scan paused".to_string(),
                    can_resume: true,
                    mark_failed: false,
                },
            ));
        }

        // Stage 4: lane routing
        let lanes = match route_lanes(
            gated.kept,
            self.provider.as_ref(),
            &self.config.extraction.document_extensions,
        )
        .await
        {
            Ok(lanes) => lanes,
            Err(e) => return Err(self.abort(checkpoint, e)),
        };
        stats.fast_lane = lanes.fast.len();
        stats.heavy_lane = lanes.heavy.len();
        sink.info(format!(
            "Routed {} to fast lane, {} to heavy lane",
            stats.fast_lane, stats.heavy_lane
        ));
        sink.funnel(&stats);

        // Stage 5: fast lane, snapshotting the batch before re-routes
        let fast = FastLaneExtractor::new(
            self.config.extraction.fast_lane_batch_size,
            self.config.extraction.body_truncation_chars,
        );
        let fast_outcome = match fast
            .run(
                &lanes.fast,
                self.provider.as_ref(),
                self.text_extractor.as_ref(),
                &dedup,
                self.store.as_ref(),
                sink,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.abort(checkpoint, e)),
        };

        let rerouted_ids: HashSet<String> = fast_outcome
            .rerouted
            .iter()
            .map(|h| h.candidate.message_id.clone())
            .collect();
        let fast_terminal_ids: Vec<String> = lanes
            .fast
            .iter()
            .map(|c| c.message_id.clone())
            .filter(|id| !rerouted_ids.contains(id))
            .collect();

        let mut records = fast_outcome.records;
        stats.extracted = records.len();
        stats.duplicates += fast_outcome.duplicates;
        stats.failed += fast_outcome.failed;
        stats.rerouted = fast_outcome.rerouted.len();
        stats.processed += fast_terminal_ids.len();
        checkpoint.mark_processed(&fast_terminal_ids).await;
        self.write_progress(&checkpoint, &stats).await;
        sink.funnel(&stats);

        if checkpoint.is_paused().await {
            return Err((
                Some(checkpoint),
                ScanFailure {
                    message: "Scan paused".to_string(),
                    can_resume: true,
                    mark_failed: false,
                },
            ));
        }

        // Stage 6: heavy lane worker pool, fed the re-routes exactly once
        let mut heavy_queue = lanes.heavy;
        heavy_queue.extend(fast_outcome.rerouted);
        let heavy_ids: Vec<String> = heavy_queue
            .iter()
            .map(|h| h.candidate.message_id.clone())
            .collect();

        let heavy = HeavyLaneExtractor::new(
            self.config.extraction.heavy_lane_workers,
            self.config.extraction.max_inline_links,
            self.config.extraction.body_truncation_chars,
        );
        let heavy_outcome = match heavy
            .run(
                heavy_queue,
                self.provider.as_ref(),
                self.document_pipeline.as_ref(),
                self.text_extractor.as_ref(),
                &dedup,
                self.store.as_ref(),
                sink,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.abort(checkpoint, e)),
        };

        records.extend(heavy_outcome.records);
        stats.extracted = records.len();
        stats.duplicates += heavy_outcome.duplicates;
        stats.failed += heavy_outcome.failed;
        stats.processed += heavy_ids.len();
        checkpoint.mark_processed(&heavy_ids).await;
        self.write_progress(&checkpoint, &stats).await;
        sink.funnel(&stats);

        info!(
            "Scan finished: {} extracted, {} duplicates, {} failed",
            stats.extracted, stats.duplicates, stats.failed
        );
        Ok((checkpoint, stats, records))
    }

    async fn open_checkpoint(
        &self,
        request: &ScanRequest,
        sink: &EventSink,
    ) -> std::result::Result<(BestEffortCheckpoint, HashSet<String>), ScanFailure> {
        if let Some(resume_id) = &request.resume_scan_id {
            let loaded = self.checkpoints.load(resume_id).await.map_err(|e| ScanFailure {
                message: format!("Cannot load checkpoint {}: {}", resume_id, e),
                can_resume: false,
                mark_failed: false,
            })?;
            if !loaded.can_resume() {
                return Err(ScanFailure {
                    message: format!("Scan {} already finished and cannot resume", resume_id),
                    can_resume: false,
                    mark_failed: false,
                });
            }

            let processed = loaded.processed_message_ids.clone();
            let checkpoint = BestEffortCheckpoint {
                store: Arc::clone(&self.checkpoints),
                scan_id: Some(loaded.scan_id.clone()),
                write_failures: AtomicUsize::new(0),
            };
            if loaded.status != ScanStatus::Running {
                checkpoint
                    .update(CheckpointUpdate::status(ScanStatus::Running))
                    .await;
            }
            sink.emit(ScanEvent::ScanStarted {
                scan_id: loaded.scan_id.clone(),
            });
            info!(
                "Resuming scan {}: {} candidates already processed",
                loaded.scan_id,
                processed.len()
            );
            Ok((checkpoint, processed))
        } else {
            match self
                .checkpoints
                .create(&self.subject_identity, request.days)
                .await
            {
                Ok(created) => {
                    let checkpoint = BestEffortCheckpoint {
                        store: Arc::clone(&self.checkpoints),
                        scan_id: Some(created.scan_id.clone()),
                        write_failures: AtomicUsize::new(0),
                    };
                    checkpoint
                        .update(CheckpointUpdate::status(ScanStatus::Running))
                        .await;
                    sink.emit(ScanEvent::ScanStarted {
                        scan_id: created.scan_id,
                    });
                    Ok((checkpoint, HashSet::new()))
                }
                Err(e) => {
                    // Degrade to no-resume rather than aborting the run
                    warn!("Checkpoint creation failed, resume disabled: {}", e);
                    sink.warning("Checkpoint unavailable; this scan cannot be resumed");
                    let scan_id = uuid::Uuid::new_v4().to_string();
                    sink.emit(ScanEvent::ScanStarted { scan_id });
                    Ok((
                        BestEffortCheckpoint {
                            store: Arc::clone(&self.checkpoints),
                            scan_id: None,
                            write_failures: AtomicUsize::new(0),
                        },
                        HashSet::new(),
                    ))
                }
            }
        }
    }

    async fn write_progress(&self, checkpoint: &BestEffortCheckpoint, stats: &FunnelStats) {
        checkpoint
            .update(CheckpointUpdate {
                processed_count: Some(stats.processed),
                extracted_count: Some(stats.extracted),
                duplicate_count: Some(stats.duplicates),
                failed_count: Some(stats.failed),
                ..Default::default()
            })
            .await;
    }

    fn abort(
        &self,
        checkpoint: BestEffortCheckpoint,
        error: IngestError,
    ) -> (Option<BestEffortCheckpoint>, ScanFailure) {
        let can_resume = checkpoint.scan_id.is_some();
        (
            Some(checkpoint),
            ScanFailure {
                message: error.to_string(),
                can_resume,
                mark_failed: true,
            },
        )
    }
}
