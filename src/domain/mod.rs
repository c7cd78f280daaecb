//! Domain types for the harvest pipeline.
//!
//! This module contains the core data structures:
//! - Item, Bucket, Page, Cursor: what the collector walks and remembers
//! - ItemStatus: per-item outcome of the speech-to-text stage
//! - Credential, CredentialUsage: quota bookkeeping for API keys

pub mod credential;
pub mod item;
pub mod status;

// Re-export commonly used types
pub use credential::{Credential, CredentialUsage, QuotaLimits, QuotaWindow};
pub use item::{Bucket, Cursor, Item, Page};
pub use status::ItemStatus;
