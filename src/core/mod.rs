//! Core pipeline logic.
//!
//! This module contains:
//! - Checkpoint: atomic JSON snapshots shared by every stage
//! - Collector: incremental crawl of the metadata source
//! - Quota: credential pool with rolling budgets
//! - Processor: resumable, quota-rotating speech-to-text batch
//! - Retry: bounded retry with backoff
//! - Pipeline: end-to-end runner

pub mod checkpoint;
pub mod collector;
pub mod pipeline;
pub mod processor;
pub mod quota;
pub mod retry;

// Re-export commonly used types
pub use checkpoint::{write_atomic, CheckpointError, CheckpointStore};
pub use collector::{CollectError, CollectMode, CollectOutcome, Collector, CollectorSettings};
pub use pipeline::{LastRun, Pipeline, StepResults};
pub use processor::{
    prepare_queue, AsrCheckpoint, BatchProcessor, HaltReason, ProcessorSettings, RunReport,
};
pub use quota::CredentialPool;
pub use retry::RetryPolicy;
