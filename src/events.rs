//! Ordered event stream surfaced to the scan caller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::models::ExtractedRecord;

/// Severity tag on free-text progress lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Cumulative counts of candidates surviving each filter stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunnelStats {
    pub total_candidates: usize,
    pub classified: usize,
    pub kept: usize,
    pub discarded: usize,
    pub fast_lane: usize,
    pub heavy_lane: usize,
    pub rerouted: usize,
    pub processed: usize,
    pub extracted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Events emitted over the life of one scan connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    ScanStarted {
        scan_id: String,
    },
    Progress {
        message: String,
        severity: Severity,
    },
    FunnelStats {
        stats: FunnelStats,
    },
    Keepalive {
        timestamp: DateTime<Utc>,
    },
    Complete {
        stats: FunnelStats,
        records: Vec<ExtractedRecord>,
    },
    Error {
        message: String,
        can_resume: bool,
        scan_id: Option<String>,
    },
}

impl ScanEvent {
    /// Terminal events end the stream; exactly one is emitted per run
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanEvent::Complete { .. } | ScanEvent::Error { .. })
    }
}

/// Outbound event sink shared by the pipeline stages.
///
/// Sends never fail the scan: if the caller dropped the stream the scan
/// keeps running to completion for checkpointing purposes.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ScanEvent>,
}

impl EventSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ScanEvent) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped, scan continues detached");
        }
    }

    pub fn progress(&self, severity: Severity, message: impl Into<String>) {
        self.emit(ScanEvent::Progress {
            message: message.into(),
            severity,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.progress(Severity::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.progress(Severity::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.progress(Severity::Error, message);
    }

    pub fn funnel(&self, stats: &FunnelStats) {
        self.emit(ScanEvent::FunnelStats {
            stats: stats.clone(),
        });
    }

    pub fn keepalive(&self) {
        self.emit(ScanEvent::Keepalive {
            timestamp: Utc::now(),
        });
    }
}

/// Spawn the periodic keepalive that defeats idle-connection timeouts.
///
/// Fires unconditionally on the interval so no gap between consecutive
/// events ever exceeds it, regardless of stage progress. Aborted by the
/// pipeline once a terminal event is emitted.
pub fn spawn_keepalive(sink: EventSink, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick completes immediately; skip it
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sink.keepalive();
        }
    })
}
