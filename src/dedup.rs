//! Duplicate detection scoped to a single scan run

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use tracing::debug;

use crate::models::ExtractedRecord;

/// Composite key identifying one extracted document within a scan run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Build the fingerprint for a record.
    ///
    /// A normalized document number wins when present; otherwise a
    /// composite of vendor key, rounded total, date and subject hash.
    /// The vendor key falls back to the subject hash when the vendor is
    /// unknown, so unrelated unknown-vendor records do not collide.
    pub fn for_record(record: &ExtractedRecord, date: &DateTime<Utc>, subject: &str) -> Self {
        if let Some(number) = record.document_number.as_deref() {
            let normalized = normalize_document_number(number);
            if !normalized.is_empty() && normalized != "NA" {
                return Fingerprint(format!("doc:{}", normalized));
            }
        }

        let vendor_key = if record.vendor_is_unknown() {
            format!("subj:{:016x}", hash_str(subject))
        } else {
            normalize_vendor(&record.vendor_name)
        };

        Fingerprint(format!(
            "cmp:{}|{}|{}|{:016x}",
            vendor_key,
            rounded_total(record.total_amount),
            date.format("%Y-%m-%d"),
            hash_str(subject),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Uppercase and strip punctuation from a document number
pub fn normalize_document_number(number: &str) -> String {
    number
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn normalize_vendor(vendor: &str) -> String {
    vendor
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Round to whole cents so float noise does not split duplicates
fn rounded_total(total: f64) -> i64 {
    (total * 100.0).round() as i64
}

fn hash_str(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// Shared duplicate registry for one scan run.
///
/// Injected as an `Arc` into the heavy-lane workers; the raw set is
/// never exposed, only the atomic test-and-set below. Fingerprints are
/// not persisted across runs; the durable store's own insert is the
/// cross-run backstop.
pub struct DedupRegistry {
    seen: Mutex<HashSet<Fingerprint>>,
}

impl DedupRegistry {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Atomic test-and-set. Returns true if the fingerprint is new.
    pub fn check_and_register(&self, fingerprint: &Fingerprint) -> bool {
        let mut seen = self.seen.lock().expect("dedup mutex poisoned");
        let is_new = seen.insert(fingerprint.clone());
        if !is_new {
            debug!("Duplicate fingerprint rejected: {}", fingerprint.as_str());
        }
        is_new
    }

    /// Release a fingerprint whose record could not be persisted, so a
    /// later occurrence of the same document can still be captured
    pub fn unregister(&self, fingerprint: &Fingerprint) {
        self.seen
            .lock()
            .expect("dedup mutex poisoned")
            .remove(fingerprint);
    }

    pub fn len(&self) -> usize {
        self.seen.lock().expect("dedup mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DedupRegistry {
    fn default() -> Self {
        Self::new()
    }
}
