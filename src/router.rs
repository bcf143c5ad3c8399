//! Lane assignment for kept candidates

use tracing::warn;

use crate::classification::KeptCandidate;
use crate::error::Result;
use crate::models::CandidateMessage;
use crate::provider::{Attachment, InboxProvider};

/// A candidate queued for the heavy lane, with its fetched attachments
#[derive(Debug, Clone)]
pub struct HeavyCandidate {
    pub candidate: CandidateMessage,
    pub attachments: Vec<Attachment>,
    /// True when this entered the heavy lane as a fast-lane re-route.
    /// Re-routed candidates that fail again are recorded as failures,
    /// never queued a third time.
    pub rerouted: bool,
}

/// Disjoint lane assignment; fast union heavy equals the kept set
#[derive(Debug, Default)]
pub struct RoutedLanes {
    pub fast: Vec<CandidateMessage>,
    pub heavy: Vec<HeavyCandidate>,
}

/// Does the filename look like a document we should OCR?
pub fn is_document_attachment(filename: &str, extensions: &[String]) -> bool {
    let lower = filename.to_lowercase();
    extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
}

/// Partition kept candidates into the two extraction lanes.
///
/// Any candidate with a document-like attachment goes to the heavy
/// lane; everything else is fast-lane text extraction. The partition
/// itself has no side effects beyond fetching attachment listings; a
/// non-fatal attachment fetch error downgrades that candidate to the
/// fast lane rather than dropping it, while a scan-fatal error (auth
/// expiry) aborts the whole partition.
pub async fn route_lanes(
    kept: Vec<KeptCandidate>,
    provider: &dyn InboxProvider,
    document_extensions: &[String],
) -> Result<RoutedLanes> {
    let mut lanes = RoutedLanes::default();

    for item in kept {
        let mut candidate = item.candidate;

        let attachments = match provider.fetch_attachments(&candidate.message_id).await {
            Ok(attachments) => attachments,
            Err(e) if e.is_scan_fatal() => return Err(e),
            Err(e) => {
                warn!(
                    "Attachment fetch failed for {}, routing to fast lane: {}",
                    candidate.message_id, e
                );
                Vec::new()
            }
        };

        let document_attachments: Vec<Attachment> = attachments
            .into_iter()
            .filter(|a| is_document_attachment(&a.filename, document_extensions))
            .collect();

        candidate.has_binary_attachment = !document_attachments.is_empty();

        if candidate.has_binary_attachment {
            lanes.heavy.push(HeavyCandidate {
                candidate,
                attachments: document_attachments,
                rerouted: false,
            });
        } else {
            lanes.fast.push(candidate);
        }
    }

    Ok(lanes)
}
