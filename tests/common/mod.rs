//! Shared mock collaborators for pipeline integration tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use invoice_ingest::classification::{CandidateSummary, ClassifierModel};
use invoice_ingest::fast_lane::{BulkTextExtractor, TextExtractionInput};
use invoice_ingest::heavy_lane::{DocumentPipeline, LinkExtraction};
use invoice_ingest::provider::{Attachment, InboxProvider, MessageBody, MessageMeta, MessagePage};
use invoice_ingest::{
    ClassificationVerdict, ConfidenceTier, IngestError, RawExtraction, Result, ScanEvent,
};

/// One fully described mailbox message
#[derive(Clone)]
pub struct MockMessage {
    pub id: String,
    pub sender: String,
    pub subject: String,
    pub snippet: String,
    pub date: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
    pub body: MessageBody,
}

pub fn text_message(id: &str, subject: &str, body: &str) -> MockMessage {
    MockMessage {
        id: id.to_string(),
        sender: "billing@acme.com".to_string(),
        subject: subject.to_string(),
        snippet: body.chars().take(80).collect(),
        date: Utc::now(),
        attachments: Vec::new(),
        body: MessageBody {
            plain_text: Some(body.to_string()),
            html: None,
        },
    }
}

pub fn pdf_message(id: &str, subject: &str) -> MockMessage {
    MockMessage {
        attachments: vec![Attachment {
            filename: "invoice.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            data: vec![0x25, 0x50, 0x44, 0x46],
        }],
        ..text_message(id, subject, "See attached invoice")
    }
}

/// In-memory inbox provider serving a fixed message set
pub struct MockProvider {
    pub messages: Vec<MockMessage>,
    pub auth_fail: bool,
    /// Listing and metadata succeed but attachment/body fetches fail
    /// with an auth error, as when a token expires mid-scan
    pub fetch_auth_fail: bool,
}

impl MockProvider {
    pub fn new(messages: Vec<MockMessage>) -> Self {
        Self {
            messages,
            auth_fail: false,
            fetch_auth_fail: false,
        }
    }

    fn find(&self, id: &str) -> Result<&MockMessage> {
        self.messages
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| IngestError::ProviderError(format!("no such message {}", id)))
    }
}

#[async_trait]
impl InboxProvider for MockProvider {
    async fn list(&self, _query: &str, _page_token: Option<String>) -> Result<MessagePage> {
        if self.auth_fail {
            return Err(IngestError::AuthError("credentials expired".to_string()));
        }
        Ok(MessagePage {
            message_ids: self.messages.iter().map(|m| m.id.clone()).collect(),
            next_page_token: None,
        })
    }

    async fn fetch_metadata(&self, id: &str) -> Result<MessageMeta> {
        let msg = self.find(id)?;
        Ok(MessageMeta {
            id: msg.id.clone(),
            sender: msg.sender.clone(),
            subject: msg.subject.clone(),
            snippet: msg.snippet.clone(),
            date: msg.date,
            attachment_hint: msg.attachments.first().map(|a| a.filename.clone()),
        })
    }

    async fn fetch_attachments(&self, id: &str) -> Result<Vec<Attachment>> {
        if self.fetch_auth_fail {
            return Err(IngestError::AuthError("token expired mid-scan".to_string()));
        }
        Ok(self.find(id)?.attachments.clone())
    }

    async fn fetch_body(&self, id: &str) -> Result<MessageBody> {
        if self.fetch_auth_fail {
            return Err(IngestError::AuthError("token expired mid-scan".to_string()));
        }
        Ok(self.find(id)?.body.clone())
    }
}

/// Classifier that keeps everything at high confidence
pub struct KeepAllClassifier;

#[async_trait]
impl ClassifierModel for KeepAllClassifier {
    async fn classify_batch(
        &self,
        batch: &[CandidateSummary],
    ) -> Result<HashMap<String, ClassificationVerdict>> {
        Ok(batch
            .iter()
            .map(|s| {
                (
                    s.message_id.clone(),
                    ClassificationVerdict {
                        message_id: s.message_id.clone(),
                        is_relevant: true,
                        confidence: 0.9,
                        category: "invoice".to_string(),
                        reasoning: "looks like an invoice".to_string(),
                    },
                )
            })
            .collect())
    }
}

/// Bulk text extractor serving canned per-message results
pub struct MockTextExtractor {
    pub results: HashMap<String, RawExtraction>,
    pub calls: AtomicUsize,
}

impl MockTextExtractor {
    pub fn new(results: HashMap<String, RawExtraction>) -> Self {
        Self {
            results,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self::new(HashMap::new())
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BulkTextExtractor for MockTextExtractor {
    async fn extract_batch(
        &self,
        batch: &[TextExtractionInput],
    ) -> Result<HashMap<String, RawExtraction>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(batch
            .iter()
            .filter_map(|input| {
                self.results
                    .get(&input.message_id)
                    .map(|r| (input.message_id.clone(), r.clone()))
            })
            .collect())
    }
}

/// Document pipeline returning one fixed extraction for any input
pub struct MockDocumentPipeline {
    pub result: Option<RawExtraction>,
    pub calls: AtomicUsize,
}

impl MockDocumentPipeline {
    pub fn fixed(result: RawExtraction) -> Self {
        Self {
            result: Some(result),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn broken() -> Self {
        Self {
            result: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DocumentPipeline for MockDocumentPipeline {
    async fn extract(&self, _file_bytes: &[u8], _mime_type: &str) -> Result<RawExtraction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result
            .clone()
            .ok_or_else(|| IngestError::ExtractionError("pipeline down".to_string()))
    }

    async fn extract_from_url(&self, _url: &str) -> Result<LinkExtraction> {
        self.result
            .clone()
            .map(|raw| LinkExtraction {
                raw,
                via_screenshot: false,
            })
            .ok_or_else(|| IngestError::ExtractionError("pipeline down".to_string()))
    }
}

pub fn extraction(vendor: &str, number: Option<&str>, total: f64) -> RawExtraction {
    RawExtraction {
        success: true,
        vendor: vendor.to_string(),
        total,
        currency: "USD".to_string(),
        document_number: number.map(|n| n.to_string()),
        confidence_score: ConfidenceTier::High,
        missing_critical_data: false,
        line_items: Vec::new(),
    }
}

pub fn weak_extraction(vendor: &str, total: f64) -> RawExtraction {
    RawExtraction {
        confidence_score: ConfidenceTier::Low,
        ..extraction(vendor, None, total)
    }
}

/// Drain a scan's event stream through its terminal event
pub async fn collect_events(stream: impl Stream<Item = ScanEvent>) -> Vec<ScanEvent> {
    let mut stream = Box::pin(stream);
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}
