//! Candidate discovery: full pagination over the provider's list API

use chrono::{Duration, Utc};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::error::Result;
use crate::events::EventSink;
use crate::models::CandidateMessage;
use crate::provider::InboxProvider;

/// Sentinel meaning no time bound on the scan window
pub const ALL_TIME: u32 = 0;

/// Build the provider query for a trailing window of `days`.
/// `ALL_TIME` yields an unbounded query.
pub fn window_query(days: u32) -> String {
    if days == ALL_TIME {
        String::new()
    } else {
        let date = Utc::now() - Duration::days(days as i64);
        format!("after:{}", date.format("%Y/%m/%d"))
    }
}

/// Window plus the broad relevance query used for the scanned subset
pub fn relevance_query(days: u32, relevance: &str) -> String {
    let window = window_query(days);
    match (window.is_empty(), relevance.is_empty()) {
        (true, _) => relevance.to_string(),
        (false, true) => window,
        (false, false) => format!("{} {}", relevance, window),
    }
}

pub struct CandidateDiscovery;

impl CandidateDiscovery {
    /// Count every message in the window by paging to exhaustion.
    ///
    /// The exact count feeds the funnel display even though only the
    /// relevance-filtered subset is scanned. A non-fatal provider error
    /// degrades the count to zero and the scan continues; only an
    /// authentication failure propagates.
    pub async fn enumerate_total(
        &self,
        provider: &dyn InboxProvider,
        days: u32,
        sink: &EventSink,
    ) -> Result<usize> {
        let query = window_query(days);
        let mut total = 0usize;
        let mut page_token: Option<String> = None;

        loop {
            let page = match provider.list(&query, page_token.clone()).await {
                Ok(page) => page,
                Err(e) if e.is_scan_fatal() => return Err(e),
                Err(e) => {
                    warn!("Discovery failed, continuing with total=0: {}", e);
                    sink.warning("Discovery failed; candidate total unavailable");
                    return Ok(0);
                }
            };

            total += page.message_ids.len();
            sink.info(format!("Discovery: {} candidates so far", total));

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        info!("Discovery complete: {} candidates in window", total);
        Ok(total)
    }

    /// Fetch the relevance-filtered candidate set with per-message
    /// metadata. Returns the candidates plus attachment-name hints for
    /// the classifier. Metadata errors are candidate-local.
    pub async fn fetch_candidates(
        &self,
        provider: &dyn InboxProvider,
        days: u32,
        relevance: &str,
        sink: &EventSink,
    ) -> Result<(Vec<CandidateMessage>, HashMap<String, String>)> {
        let query = relevance_query(days, relevance);
        let mut candidates = Vec::new();
        let mut hints = HashMap::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = match provider.list(&query, page_token.clone()).await {
                Ok(page) => page,
                Err(e) if e.is_scan_fatal() => return Err(e),
                Err(e) => {
                    warn!("Relevance listing failed: {}", e);
                    sink.warning("Relevance listing failed; scanning partial set");
                    break;
                }
            };

            for id in &page.message_ids {
                match provider.fetch_metadata(id).await {
                    Ok(meta) => {
                        if let Some(hint) = meta.attachment_hint {
                            hints.insert(meta.id.clone(), hint);
                        }
                        candidates.push(CandidateMessage {
                            message_id: meta.id,
                            sender: meta.sender,
                            subject: meta.subject,
                            snippet: meta.snippet,
                            date_received: meta.date,
                            has_binary_attachment: false,
                        });
                    }
                    Err(e) if e.is_scan_fatal() => return Err(e),
                    Err(e) => {
                        warn!("Metadata fetch failed for {}: {}", id, e);
                    }
                }
            }

            sink.info(format!("Fetched metadata for {} candidates", candidates.len()));

            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok((candidates, hints))
    }
}
