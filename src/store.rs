//! Durable record persistence boundary

use async_trait::async_trait;
use std::sync::Mutex;

use crate::dedup::normalize_document_number;
use crate::error::Result;
use crate::models::ExtractedRecord;

/// Outcome of persisting one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The store's own cross-run duplicate check rejected the record
    Duplicate,
}

/// Trait defining the external durable store boundary.
///
/// Called only after a record has passed the in-memory dedup pass; the
/// store's own duplicate rejection is defense in depth across runs.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn insert_record(&self, record: &ExtractedRecord) -> Result<InsertOutcome>;
}

/// In-memory store, used in tests and single-process setups.
/// Rejects repeats by normalized document number.
pub struct MemoryRecordStore {
    records: Mutex<Vec<ExtractedRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
        }
    }

    pub fn records(&self) -> Vec<ExtractedRecord> {
        self.records.lock().expect("store mutex poisoned").clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DurableStore for MemoryRecordStore {
    async fn insert_record(&self, record: &ExtractedRecord) -> Result<InsertOutcome> {
        let mut records = self.records.lock().expect("store mutex poisoned");

        if let Some(number) = record.document_number.as_deref() {
            let normalized = normalize_document_number(number);
            if !normalized.is_empty() && normalized != "NA" {
                let exists = records.iter().any(|r| {
                    r.document_number
                        .as_deref()
                        .map(normalize_document_number)
                        .as_deref()
                        == Some(normalized.as_str())
                });
                if exists {
                    return Ok(InsertOutcome::Duplicate);
                }
            }
        }

        records.push(record.clone());
        Ok(InsertOutcome::Inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConfidenceTier, SourceLane};

    fn record(number: Option<&str>) -> ExtractedRecord {
        ExtractedRecord {
            vendor_name: "Acme Inc".to_string(),
            document_number: number.map(|n| n.to_string()),
            total_amount: 50.0,
            currency: "USD".to_string(),
            line_items: Vec::new(),
            confidence_tier: ConfidenceTier::High,
            source_lane: SourceLane::FastText,
            provenance: "message:a".to_string(),
            raw_payload: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_insert_and_duplicate() {
        let store = MemoryRecordStore::new();
        assert_eq!(
            store.insert_record(&record(Some("INV-100"))).await.unwrap(),
            InsertOutcome::Inserted
        );
        assert_eq!(
            store.insert_record(&record(Some("inv100"))).await.unwrap(),
            InsertOutcome::Duplicate
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_numberless_records_always_insert() {
        let store = MemoryRecordStore::new();
        store.insert_record(&record(None)).await.unwrap();
        store.insert_record(&record(None)).await.unwrap();
        assert_eq!(store.len(), 2);
    }
}
