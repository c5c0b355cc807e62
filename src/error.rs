//! Error types for the balloon driver.

use std::io;
use thiserror::Error;

use crate::{
    config::ConfigError,
    mem::tracking::PageLocation,
    types::{Mfn, Pfn},
};

/// Result type for balloon operations.
pub type Result<T> = std::result::Result<T, BalloonError>;

/// Errors that can occur in balloon operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BalloonError {
    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The general allocator could not satisfy a request
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Accounting is corrupted; the balloon must stop
    #[error("Fatal balloon fault: {0}")]
    Fatal(#[from] Fault),

    /// A previous fatal fault stopped the balloon
    #[error("Balloon halted after a fatal fault")]
    Halted,

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl BalloonError {
    /// Convert to an appropriate errno value
    #[inline]
    #[must_use]
    pub fn to_errno(&self) -> i32 {
        match *self {
            BalloonError::InvalidInput(_) => libc::EINVAL,
            BalloonError::OutOfMemory(_) => libc::ENOMEM,
            BalloonError::Halted | BalloonError::Fatal(_) => libc::EIO,
            BalloonError::IoError(ref e) => e.raw_os_error().unwrap_or(libc::EIO),
            BalloonError::Config(_) => libc::EINVAL,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(*self, BalloonError::Fatal(_))
    }
}

/// Broken invariants between the ledger, the pool, the translation table
/// and the host. None of these can be repaired locally.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Fault {
    #[error("host returned {returned} of {requested} frames on decrease")]
    ShortDecrease { requested: usize, returned: usize },

    #[error("host granted {granted} frames but only {requested} were requested")]
    OverGrant { requested: usize, granted: usize },

    #[error("empty batch passed to the host")]
    EmptyBatch,

    #[error("{pfn} already translated to {mfn}")]
    TranslationInUse { pfn: Pfn, mfn: Mfn },

    #[error("{pfn} has no machine frame")]
    MissingTranslation { pfn: Pfn },

    #[error("pool empty while {expected} pages were accounted for")]
    PoolExhausted { expected: u64 },

    #[error("{pfn} cannot move from {from:?} to {to:?}")]
    IllegalTransition {
        pfn: Pfn,
        from: Option<PageLocation>,
        to: PageLocation,
    },

    #[error("failed to update the mapping of {pfn}: {reason}")]
    MappingFailed { pfn: Pfn, reason: String },
}
