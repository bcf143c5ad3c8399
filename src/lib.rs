//! Streaming Document-Ingestion Pipeline
//!
//! Scans a remote mailbox for candidate financial documents, filters
//! them through cascading classifiers, extracts structured records via
//! multiple strategies, deduplicates results, checkpoints progress, and
//! streams live status to the caller over a long-lived connection.
//!
//! # Overview
//!
//! - **Checkpointing**: durable per-scan progress with crash resume
//! - **Discovery**: full pagination for an exact candidate count
//! - **Classification**: batched relevance gate with fail-open defaults
//! - **Lane routing**: text-only candidates to a batched fast lane,
//!   attachment-bearing ones to a bounded concurrent heavy lane
//! - **Fallback chain**: attachment, then inline link, then plain text
//! - **Deduplication**: composite fingerprints scoped to one scan run
//! - **Event stream**: ordered progress, funnel stats, keepalives and
//!   exactly one terminal event per run
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use invoice_ingest::{Config, ScanPipeline, ScanRequest};
//! use invoice_ingest::checkpoint::FileCheckpointStore;
//!
//! # async fn example(
//! #     provider: Arc<dyn invoice_ingest::provider::InboxProvider>,
//! #     classifier: Arc<dyn invoice_ingest::classification::ClassifierModel>,
//! #     text_extractor: Arc<dyn invoice_ingest::fast_lane::BulkTextExtractor>,
//! #     document_pipeline: Arc<dyn invoice_ingest::heavy_lane::DocumentPipeline>,
//! #     store: Arc<dyn invoice_ingest::store::DurableStore>,
//! # ) -> anyhow::Result<()> {
//! let config = Config::load("config.toml".as_ref()).await?;
//! let checkpoints = Arc::new(FileCheckpointStore::from_config(&config.checkpoint));
//!
//! let pipeline = Arc::new(ScanPipeline::new(
//!     config,
//!     "user@example.com",
//!     provider,
//!     classifier,
//!     text_extractor,
//!     document_pipeline,
//!     checkpoints,
//!     store,
//! ));
//!
//! let mut events = Box::pin(pipeline.run(ScanRequest {
//!     days: 30,
//!     resume_scan_id: None,
//! }));
//! while let Some(event) = events.next().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! - [`checkpoint`] - Durable scan progress with resume support
//! - [`classification`] - Batched relevance classification gate
//! - [`config`] - Configuration management
//! - [`dedup`] - Per-run duplicate fingerprint registry
//! - [`discovery`] - Paginated candidate discovery
//! - [`error`] - Error types and result aliases
//! - [`events`] - Caller-facing event stream and keepalives
//! - [`fast_lane`] - Batched text extraction for text-only candidates
//! - [`heavy_lane`] - Concurrent worker pool with fallback chain
//! - [`models`] - Core data structures
//! - [`pipeline`] - End-to-end scan orchestration
//! - [`provider`] - Inbox provider boundary
//! - [`router`] - Fast/heavy lane assignment
//! - [`store`] - Durable record persistence boundary

pub mod checkpoint;
pub mod classification;
pub mod config;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod events;
pub mod fast_lane;
pub mod heavy_lane;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod router;
pub mod store;

// Re-export commonly used types for convenience
pub use error::{IngestError, Result};

// Core data models
pub use models::{
    CandidateMessage, ClassificationVerdict, ConfidenceTier, ExtractedRecord, LineItem,
    RawExtraction, SourceLane,
};

// Checkpointing
pub use checkpoint::{CheckpointStore, CheckpointUpdate, FileCheckpointStore, ScanCheckpoint, ScanStatus};

// Collaborator boundaries
pub use classification::ClassifierModel;
pub use fast_lane::BulkTextExtractor;
pub use heavy_lane::DocumentPipeline;
pub use provider::InboxProvider;
pub use store::{DurableStore, InsertOutcome};

// Dedup engine
pub use dedup::{DedupRegistry, Fingerprint};

// Event stream
pub use events::{EventSink, FunnelStats, ScanEvent, Severity};

// Config types
pub use config::{
    CheckpointConfig, ClassificationConfig, Config, DiscoveryConfig, EventConfig, ExtractionConfig,
};

// Orchestration
pub use pipeline::{ScanPipeline, ScanRequest};
