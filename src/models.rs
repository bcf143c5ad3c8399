use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Candidate message discovered during the mailbox scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateMessage {
    pub message_id: String,
    pub sender: String,
    pub subject: String,
    pub snippet: String,
    pub date_received: DateTime<Utc>,
    /// Derived in the lane router, not at discovery time
    pub has_binary_attachment: bool,
}

/// Per-candidate classifier verdict
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationVerdict {
    pub message_id: String,
    pub is_relevant: bool,
    pub confidence: f32,
    pub category: String,
    pub reasoning: String,
}

/// Extraction confidence tier reported by the extractors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

/// Which extraction path produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceLane {
    #[serde(rename = "fast-text")]
    FastText,
    #[serde(rename = "heavy-attachment")]
    HeavyAttachment,
    #[serde(rename = "heavy-link")]
    HeavyLink,
    #[serde(rename = "heavy-screenshot")]
    HeavyScreenshot,
    #[serde(rename = "text-fallback")]
    TextFallback,
}

/// One line item on an extracted document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub amount: f64,
}

/// Terminal unit of the pipeline: a structured financial record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub vendor_name: String,
    /// May be absent or the literal "N/A" when the document carries no number
    pub document_number: Option<String>,
    pub total_amount: f64,
    pub currency: String,
    pub line_items: Vec<LineItem>,
    pub confidence_tier: ConfidenceTier,
    pub source_lane: SourceLane,
    /// Pointer to durable storage of the original artifact
    pub provenance: String,
    /// Full extractor output, retained for audit
    pub raw_payload: serde_json::Value,
}

impl ExtractedRecord {
    /// A vendor the extractors could not identify
    pub fn vendor_is_unknown(&self) -> bool {
        vendor_is_unknown(&self.vendor_name)
    }

    /// Heavy-lane fallback steps only stop on a usable record
    pub fn is_usable(&self) -> bool {
        self.total_amount > 0.0 && !self.vendor_is_unknown()
    }

    /// Build a record from a raw extractor result
    pub fn from_raw(raw: &RawExtraction, lane: SourceLane, provenance: String) -> Self {
        Self {
            vendor_name: raw.vendor.clone(),
            document_number: raw.document_number.clone(),
            total_amount: raw.total,
            currency: raw.currency.clone(),
            line_items: raw.line_items.clone(),
            confidence_tier: raw.confidence_score,
            source_lane: lane,
            provenance,
            raw_payload: serde_json::to_value(raw).unwrap_or(serde_json::Value::Null),
        }
    }
}

/// A vendor name the extractors could not identify
pub fn vendor_is_unknown(vendor: &str) -> bool {
    let v = vendor.trim();
    v.is_empty() || v.eq_ignore_ascii_case("unknown")
}

/// Raw structured output shared by the text and document extractors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawExtraction {
    pub success: bool,
    pub vendor: String,
    pub total: f64,
    pub currency: String,
    pub document_number: Option<String>,
    pub confidence_score: ConfidenceTier,
    pub missing_critical_data: bool,
    pub line_items: Vec<LineItem>,
}
