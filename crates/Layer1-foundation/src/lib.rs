//! # dockyard-foundation
//!
//! Foundation layer for dockyard:
//! - Error: 공통 에러 타입 (`Error`, `Result`)
//! - Digest: `ContentId` (SHA-256) for task identity and file contents
//! - Storage: `JsonStore`, atomic JSON records
//! - Config: `ExecutorConfig`

pub mod config;
pub mod digest;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Digest
// ============================================================================
pub use digest::{ContentHasher, ContentId};

// ============================================================================
// Config / Storage
// ============================================================================
pub use config::{ExecutorConfig, EXECUTOR_CONFIG_FILE};
pub use storage::JsonStore;
