//! Batched relevance classification of discovered candidates

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{CandidateMessage, ClassificationVerdict};

/// Per-candidate summary handed to the classifier model
#[derive(Debug, Clone)]
pub struct CandidateSummary {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub snippet: String,
    pub attachment_hint: Option<String>,
}

/// Trait defining the external classifier model boundary
#[async_trait]
pub trait ClassifierModel: Send + Sync {
    /// Classify a batch of candidates, keyed by message id in the reply
    async fn classify_batch(
        &self,
        batch: &[CandidateSummary],
    ) -> Result<HashMap<String, ClassificationVerdict>>;
}

/// A candidate that survived the gate, with its verdict
#[derive(Debug, Clone)]
pub struct KeptCandidate {
    pub candidate: CandidateMessage,
    pub verdict: ClassificationVerdict,
}

/// Aggregate outcome of running all candidates through the gate
#[derive(Debug, Default)]
pub struct GateOutcome {
    pub kept: Vec<KeptCandidate>,
    pub discarded: usize,
    /// Candidates in batches whose classifier call failed outright
    pub failed: usize,
}

/// Cascading keep/discard gate over batched classifier calls
pub struct ClassificationGate {
    batch_size: usize,
    confidence_threshold: f32,
}

impl ClassificationGate {
    pub fn new(batch_size: usize, confidence_threshold: f32) -> Self {
        Self {
            batch_size,
            confidence_threshold,
        }
    }

    /// Run every candidate through the classifier in fixed-size batches.
    ///
    /// A failed batch call marks all of its items failed and the scan
    /// continues. A verdict missing from an otherwise successful reply
    /// defaults to keep at confidence 0.5: false positives are absorbed
    /// later by the extraction confidence gates, while a false negative
    /// here would silently drop a real document.
    pub async fn run(
        &self,
        candidates: &[CandidateMessage],
        classifier: &dyn ClassifierModel,
        attachment_hints: &HashMap<String, String>,
    ) -> GateOutcome {
        let mut outcome = GateOutcome::default();

        for batch in candidates.chunks(self.batch_size.max(1)) {
            let summaries: Vec<CandidateSummary> = batch
                .iter()
                .map(|c| CandidateSummary {
                    message_id: c.message_id.clone(),
                    sender: c.sender.clone(),
                    subject: c.subject.clone(),
                    snippet: c.snippet.clone(),
                    attachment_hint: attachment_hints.get(&c.message_id).cloned(),
                })
                .collect();

            let verdicts = match classifier.classify_batch(&summaries).await {
                Ok(verdicts) => verdicts,
                Err(e) => {
                    warn!("Classifier batch of {} failed: {}", batch.len(), e);
                    outcome.failed += batch.len();
                    continue;
                }
            };

            for candidate in batch {
                let verdict = verdicts
                    .get(&candidate.message_id)
                    .cloned()
                    .unwrap_or_else(|| {
                        debug!(
                            "No verdict for {}, keeping fail-open",
                            candidate.message_id
                        );
                        ClassificationVerdict {
                            message_id: candidate.message_id.clone(),
                            is_relevant: true,
                            confidence: 0.5,
                            category: "unknown".to_string(),
                            reasoning: "verdict missing from classifier reply".to_string(),
                        }
                    });

                if verdict.is_relevant && verdict.confidence >= self.confidence_threshold {
                    outcome.kept.push(KeptCandidate {
                        candidate: candidate.clone(),
                        verdict,
                    });
                } else {
                    debug!(
                        "Discarded {}: relevant={}, confidence={:.2}, reason={}",
                        candidate.message_id,
                        verdict.is_relevant,
                        verdict.confidence,
                        verdict.reasoning
                    );
                    outcome.discarded += 1;
                }
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    struct FixedClassifier {
        verdicts: HashMap<String, ClassificationVerdict>,
        fail: bool,
    }

    #[async_trait]
    impl ClassifierModel for FixedClassifier {
        async fn classify_batch(
            &self,
            _batch: &[CandidateSummary],
        ) -> Result<HashMap<String, ClassificationVerdict>> {
            if self.fail {
                return Err(crate::error::IngestError::ClassificationError(
                    "model unavailable".to_string(),
                ));
            }
            Ok(self.verdicts.clone())
        }
    }

    fn candidate(id: &str) -> CandidateMessage {
        CandidateMessage {
            message_id: id.to_string(),
            sender: "billing@acme.com".to_string(),
            subject: format!("Invoice {}", id),
            snippet: "Amount due".to_string(),
            date_received: Utc::now(),
            has_binary_attachment: false,
        }
    }

    fn verdict(id: &str, relevant: bool, confidence: f32) -> ClassificationVerdict {
        ClassificationVerdict {
            message_id: id.to_string(),
            is_relevant: relevant,
            confidence,
            category: "invoice".to_string(),
            reasoning: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_keep_and_discard_by_threshold() {
        let mut verdicts = HashMap::new();
        verdicts.insert("a".to_string(), verdict("a", true, 0.9));
        verdicts.insert("b".to_string(), verdict("b", true, 0.2));
        verdicts.insert("c".to_string(), verdict("c", false, 0.95));

        let gate = ClassificationGate::new(25, 0.3);
        let classifier = FixedClassifier {
            verdicts,
            fail: false,
        };
        let candidates = vec![candidate("a"), candidate("b"), candidate("c")];
        let outcome = gate.run(&candidates, &classifier, &HashMap::new()).await;

        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.kept[0].candidate.message_id, "a");
        assert_eq!(outcome.discarded, 2);
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn test_threshold_boundary_keeps() {
        let mut verdicts = HashMap::new();
        verdicts.insert("a".to_string(), verdict("a", true, 0.3));

        let gate = ClassificationGate::new(25, 0.3);
        let classifier = FixedClassifier {
            verdicts,
            fail: false,
        };
        let outcome = gate
            .run(&[candidate("a")], &classifier, &HashMap::new())
            .await;
        assert_eq!(outcome.kept.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_verdict_fails_open() {
        let gate = ClassificationGate::new(25, 0.3);
        let classifier = FixedClassifier {
            verdicts: HashMap::new(),
            fail: false,
        };
        let outcome = gate
            .run(&[candidate("a")], &classifier, &HashMap::new())
            .await;

        assert_eq!(outcome.kept.len(), 1);
        assert_eq!(outcome.kept[0].verdict.confidence, 0.5);
        assert!(outcome.kept[0].verdict.is_relevant);
    }

    #[tokio::test]
    async fn test_failed_batch_counts_all_items() {
        let gate = ClassificationGate::new(2, 0.3);
        let classifier = FixedClassifier {
            verdicts: HashMap::new(),
            fail: true,
        };
        let candidates = vec![candidate("a"), candidate("b"), candidate("c")];
        let outcome = gate.run(&candidates, &classifier, &HashMap::new()).await;

        assert_eq!(outcome.kept.len(), 0);
        assert_eq!(outcome.failed, 3);
    }
}
