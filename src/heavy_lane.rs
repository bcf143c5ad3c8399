//! Concurrent worker pool with the attachment -> link -> text fallback chain

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use futures::stream::{self, StreamExt};
use std::time::Duration;
use tracing::{debug, warn};

use crate::dedup::{DedupRegistry, Fingerprint};
use crate::error::{IngestError, Result};
use crate::events::EventSink;
use crate::fast_lane::{BulkTextExtractor, TextExtractionInput};
use crate::models::{ExtractedRecord, RawExtraction, SourceLane};
use crate::provider::{extract_inline_links, select_body_text, InboxProvider, MessageBody};
use crate::router::HeavyCandidate;
use crate::store::{DurableStore, InsertOutcome};

/// Result of following one inline link through the document pipeline
#[derive(Debug, Clone)]
pub struct LinkExtraction {
    pub raw: RawExtraction,
    /// True when the pipeline had to screenshot the target instead of
    /// fetching a document from it
    pub via_screenshot: bool,
}

/// Trait defining the opaque document-extraction pipeline
/// (structure extraction, contextual retrieval, semantic validation)
#[async_trait]
pub trait DocumentPipeline: Send + Sync {
    /// Run the full pipeline over a binary document
    async fn extract(&self, file_bytes: &[u8], mime_type: &str) -> Result<RawExtraction>;

    /// Classify a link's intent, fetch or screenshot the target, then
    /// run the same pipeline over the result
    async fn extract_from_url(&self, url: &str) -> Result<LinkExtraction>;
}

/// Self-contained result of one worker, merged only by the orchestrator
#[derive(Debug)]
pub struct WorkerOutcome {
    pub message_id: String,
    pub record: Option<ExtractedRecord>,
    /// The fingerprint registered for the accepted record, released by
    /// the orchestrator if the persist fails
    pub fingerprint: Option<Fingerprint>,
    /// Every fallback step either failed or produced an already-seen
    /// fingerprint
    pub duplicate: bool,
    pub failed: bool,
}

/// Aggregate heavy-lane result after merging all workers
#[derive(Debug, Default)]
pub struct HeavyLaneOutcome {
    pub records: Vec<ExtractedRecord>,
    pub duplicates: usize,
    pub failed: usize,
}

pub struct HeavyLaneExtractor {
    worker_cap: usize,
    max_inline_links: usize,
    body_truncation_chars: usize,
}

impl HeavyLaneExtractor {
    pub fn new(worker_cap: usize, max_inline_links: usize, body_truncation_chars: usize) -> Self {
        Self {
            worker_cap,
            max_inline_links,
            body_truncation_chars,
        }
    }

    /// Drain the heavy-lane queue with a bounded worker pool.
    ///
    /// Workers run independently and return a self-contained outcome;
    /// counters, persistence and events are merged here in completion
    /// order. The dedup registry is the only state the workers share.
    /// A scan-fatal provider error from any worker aborts the drain.
    pub async fn run(
        &self,
        queue: Vec<HeavyCandidate>,
        provider: &dyn InboxProvider,
        pipeline: &dyn DocumentPipeline,
        text_extractor: &dyn BulkTextExtractor,
        dedup: &DedupRegistry,
        store: &dyn DurableStore,
        sink: &EventSink,
    ) -> Result<HeavyLaneOutcome> {
        let mut outcome = HeavyLaneOutcome::default();
        if queue.is_empty() {
            return Ok(outcome);
        }

        let workers = self.worker_cap.max(1).min(queue.len());
        debug!(
            "Heavy lane: {} candidates across {} workers",
            queue.len(),
            workers
        );

        let mut completions = stream::iter(queue)
            .map(|item| self.process_candidate(item, provider, pipeline, text_extractor, dedup))
            .buffer_unordered(workers);

        while let Some(worker) = completions.next().await {
            let worker = worker?;
            match worker.record {
                Some(record) => match store.insert_record(&record).await {
                    Ok(InsertOutcome::Inserted) => {
                        sink.info(format!(
                            "Extracted {} {} from {} ({})",
                            record.total_amount,
                            record.currency,
                            record.vendor_name,
                            worker.message_id
                        ));
                        outcome.records.push(record);
                    }
                    Ok(InsertOutcome::Duplicate) => outcome.duplicates += 1,
                    Err(e) => {
                        warn!("Persist failed for {}: {}", worker.message_id, e);
                        // Release the fingerprint so the document can
                        // still be captured later in the run
                        if let Some(fingerprint) = &worker.fingerprint {
                            dedup.unregister(fingerprint);
                        }
                        sink.error(format!(
                            "Could not persist record from {}",
                            worker.message_id
                        ));
                        outcome.failed += 1;
                    }
                },
                None if worker.duplicate => {
                    outcome.duplicates += 1;
                    sink.info(format!("Duplicate document in {}", worker.message_id));
                }
                None => {
                    outcome.failed += 1;
                    sink.warning(format!("No record extracted from {}", worker.message_id));
                }
            }
        }

        Ok(outcome)
    }

    /// One worker: ordered fallback chain until a usable, non-duplicate
    /// record is found. Any step error is candidate-local except a
    /// scan-fatal provider error, which propagates.
    async fn process_candidate(
        &self,
        item: HeavyCandidate,
        provider: &dyn InboxProvider,
        pipeline: &dyn DocumentPipeline,
        text_extractor: &dyn BulkTextExtractor,
        dedup: &DedupRegistry,
    ) -> Result<WorkerOutcome> {
        let id = item.candidate.message_id.clone();
        let mut saw_duplicate = false;

        // Step 1: binary attachments through the full document pipeline
        for attachment in &item.attachments {
            match extract_with_retry(pipeline, &attachment.data, &attachment.mime_type).await {
                Ok(raw) => {
                    let record = ExtractedRecord::from_raw(
                        &raw,
                        SourceLane::HeavyAttachment,
                        format!("message:{}/attachment:{}", id, attachment.filename),
                    );
                    match self.try_accept(record, &item, dedup) {
                        Accept::Taken(record, fingerprint) => {
                            return Ok(WorkerOutcome {
                                message_id: id,
                                record: Some(record),
                                fingerprint: Some(fingerprint),
                                duplicate: false,
                                failed: false,
                            })
                        }
                        Accept::Duplicate => saw_duplicate = true,
                        Accept::Unusable => {}
                    }
                }
                Err(e) => {
                    debug!("Attachment extraction failed for {}: {}", id, e);
                }
            }
        }

        // Steps 2 and 3 both need the body; fetch it once
        let body = match provider.fetch_body(&id).await {
            Ok(body) => body,
            Err(e) if e.is_scan_fatal() => return Err(e),
            Err(e) => {
                debug!("Body fetch failed for {}: {}", id, e);
                MessageBody::default()
            }
        };

        // Step 2: inline links, bounded
        for url in extract_inline_links(&body, self.max_inline_links) {
            match pipeline.extract_from_url(&url).await {
                Ok(link) => {
                    let lane = if link.via_screenshot {
                        SourceLane::HeavyScreenshot
                    } else {
                        SourceLane::HeavyLink
                    };
                    let record = ExtractedRecord::from_raw(
                        &link.raw,
                        lane,
                        format!("message:{}/link:{}", id, url),
                    );
                    match self.try_accept(record, &item, dedup) {
                        Accept::Taken(record, fingerprint) => {
                            return Ok(WorkerOutcome {
                                message_id: id,
                                record: Some(record),
                                fingerprint: Some(fingerprint),
                                duplicate: false,
                                failed: false,
                            })
                        }
                        Accept::Duplicate => saw_duplicate = true,
                        Accept::Unusable => {}
                    }
                }
                Err(e) => {
                    debug!("Link extraction failed for {} ({}): {}", id, url, e);
                }
            }
        }

        // Step 3: plain-text fallback, bypassing the document pipeline
        let text = select_body_text(&body, &item.candidate.snippet, self.body_truncation_chars);
        if !text.is_empty() {
            let input = TextExtractionInput {
                message_id: id.clone(),
                subject: item.candidate.subject.clone(),
                sender: item.candidate.sender.clone(),
                date: item.candidate.date_received,
                body: text,
            };
            match text_extractor.extract_batch(std::slice::from_ref(&input)).await {
                Ok(results) => {
                    if let Some(raw) = results.get(&id) {
                        let record = ExtractedRecord::from_raw(
                            raw,
                            SourceLane::TextFallback,
                            format!("message:{}", id),
                        );
                        match self.try_accept(record, &item, dedup) {
                            Accept::Taken(record, fingerprint) => {
                                return Ok(WorkerOutcome {
                                    message_id: id,
                                    record: Some(record),
                                    fingerprint: Some(fingerprint),
                                    duplicate: false,
                                    failed: false,
                                })
                            }
                            Accept::Duplicate => saw_duplicate = true,
                            Accept::Unusable => {}
                        }
                    }
                }
                Err(e) => {
                    debug!("Text fallback failed for {}: {}", id, e);
                }
            }
        }

        Ok(WorkerOutcome {
            message_id: id,
            record: None,
            fingerprint: None,
            duplicate: saw_duplicate,
            failed: !saw_duplicate,
        })
    }

    /// Check usability and register the fingerprint before a record
    /// may count as extracted
    fn try_accept(
        &self,
        record: ExtractedRecord,
        item: &HeavyCandidate,
        dedup: &DedupRegistry,
    ) -> Accept {
        if !record.is_usable() {
            return Accept::Unusable;
        }
        let fingerprint = Fingerprint::for_record(
            &record,
            &item.candidate.date_received,
            &item.candidate.subject,
        );
        if dedup.check_and_register(&fingerprint) {
            Accept::Taken(record, fingerprint)
        } else {
            Accept::Duplicate
        }
    }
}

enum Accept {
    Taken(ExtractedRecord, Fingerprint),
    Duplicate,
    Unusable,
}

/// Retry transient document-pipeline errors with exponential backoff
async fn extract_with_retry(
    pipeline: &dyn DocumentPipeline,
    file_bytes: &[u8],
    mime_type: &str,
) -> Result<RawExtraction> {
    let policy = ExponentialBackoffBuilder::new()
        .with_max_elapsed_time(Some(Duration::from_secs(30)))
        .build();

    backoff::future::retry(policy, || async {
        pipeline
            .extract(file_bytes, mime_type)
            .await
            .map_err(|e: IngestError| {
                if e.is_transient() {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
    })
    .await
}
