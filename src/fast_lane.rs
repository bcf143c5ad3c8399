//! Batched text extraction for attachment-free candidates

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::dedup::{DedupRegistry, Fingerprint};
use crate::error::Result;
use crate::events::EventSink;
use crate::models::{
    vendor_is_unknown, CandidateMessage, ConfidenceTier, ExtractedRecord, RawExtraction,
    SourceLane,
};
use crate::provider::{select_body_text, InboxProvider};
use crate::router::HeavyCandidate;
use crate::store::{DurableStore, InsertOutcome};

/// One message's text handed to the bulk extractor
#[derive(Debug, Clone, Serialize)]
pub struct TextExtractionInput {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub date: DateTime<Utc>,
    pub body: String,
}

/// Trait defining the external bulk text-extraction boundary
#[async_trait]
pub trait BulkTextExtractor: Send + Sync {
    /// Extract structured records in bulk, keyed by message id
    async fn extract_batch(
        &self,
        batch: &[TextExtractionInput],
    ) -> Result<HashMap<String, RawExtraction>>;
}

/// Outcome of the fast lane over all its candidates
#[derive(Debug, Default)]
pub struct FastLaneOutcome {
    pub records: Vec<ExtractedRecord>,
    /// Weak results re-routed into the heavy lane, at most once each.
    /// Collected separately so the heavy queue is only extended after
    /// the fast-lane batches have been snapshotted.
    pub rerouted: Vec<HeavyCandidate>,
    pub duplicates: usize,
    pub failed: usize,
}

/// Does this result clear the fast-lane confidence gate?
pub fn passes_confidence_gate(result: &RawExtraction) -> bool {
    result.success
        && result.confidence_score != ConfidenceTier::Low
        && !result.missing_critical_data
        && !(result.total == 0.0 && vendor_is_unknown(&result.vendor))
}

pub struct FastLaneExtractor {
    batch_size: usize,
    body_truncation_chars: usize,
}

impl FastLaneExtractor {
    pub fn new(batch_size: usize, body_truncation_chars: usize) -> Self {
        Self {
            batch_size,
            body_truncation_chars,
        }
    }

    /// Run all fast-lane candidates through the bulk extractor.
    ///
    /// Results failing the confidence gate are re-routed to the heavy
    /// lane exactly once, with an empty attachment list so the heavy
    /// fallback chain works from the email body. A failed batch call
    /// marks all of its items failed without aborting the scan; only a
    /// scan-fatal provider error (auth expiry) propagates.
    pub async fn run(
        &self,
        candidates: &[CandidateMessage],
        provider: &dyn InboxProvider,
        extractor: &dyn BulkTextExtractor,
        dedup: &DedupRegistry,
        store: &dyn DurableStore,
        sink: &EventSink,
    ) -> Result<FastLaneOutcome> {
        let mut outcome = FastLaneOutcome::default();

        for batch in candidates.chunks(self.batch_size.max(1)) {
            let mut inputs = Vec::with_capacity(batch.len());
            for candidate in batch {
                let body = match provider.fetch_body(&candidate.message_id).await {
                    Ok(body) => body,
                    Err(e) if e.is_scan_fatal() => return Err(e),
                    Err(e) => {
                        warn!("Body fetch failed for {}: {}", candidate.message_id, e);
                        Default::default()
                    }
                };
                inputs.push(TextExtractionInput {
                    message_id: candidate.message_id.clone(),
                    subject: candidate.subject.clone(),
                    sender: candidate.sender.clone(),
                    date: candidate.date_received,
                    body: select_body_text(&body, &candidate.snippet, self.body_truncation_chars),
                });
            }

            let results = match extractor.extract_batch(&inputs).await {
                Ok(results) => results,
                Err(e) => {
                    warn!("Fast-lane batch of {} failed: {}", batch.len(), e);
                    sink.error(format!(
                        "Text extraction batch failed for {} messages",
                        batch.len()
                    ));
                    outcome.failed += batch.len();
                    continue;
                }
            };

            for candidate in batch {
                match results.get(&candidate.message_id) {
                    Some(result) if passes_confidence_gate(result) => {
                        self.accept(result, candidate, dedup, store, sink, &mut outcome)
                            .await;
                    }
                    _ => {
                        debug!(
                            "Fast-lane result for {} below confidence gate, re-routing",
                            candidate.message_id
                        );
                        outcome.rerouted.push(HeavyCandidate {
                            candidate: candidate.clone(),
                            attachments: Vec::new(),
                            rerouted: true,
                        });
                    }
                }
            }

            sink.info(format!(
                "Fast lane batch done: {} extracted, {} re-routed so far",
                outcome.records.len(),
                outcome.rerouted.len()
            ));
        }

        Ok(outcome)
    }

    async fn accept(
        &self,
        result: &RawExtraction,
        candidate: &CandidateMessage,
        dedup: &DedupRegistry,
        store: &dyn DurableStore,
        sink: &EventSink,
        outcome: &mut FastLaneOutcome,
    ) {
        let record = ExtractedRecord::from_raw(
            result,
            SourceLane::FastText,
            format!("message:{}", candidate.message_id),
        );
        let fingerprint =
            Fingerprint::for_record(&record, &candidate.date_received, &candidate.subject);

        if !dedup.check_and_register(&fingerprint) {
            outcome.duplicates += 1;
            return;
        }

        match store.insert_record(&record).await {
            Ok(InsertOutcome::Inserted) => {
                sink.info(format!(
                    "Extracted {} {} from {}",
                    record.total_amount, record.currency, record.vendor_name
                ));
                outcome.records.push(record);
            }
            Ok(InsertOutcome::Duplicate) => outcome.duplicates += 1,
            Err(e) => {
                warn!("Persist failed for {}: {}", candidate.message_id, e);
                // Release the fingerprint so a later occurrence of the
                // same document can still be captured this run
                dedup.unregister(&fingerprint);
                outcome.failed += 1;
            }
        }
    }
}
