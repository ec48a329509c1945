//! Error kinds the core distinguishes, per `spec.md` §7.
//!
//! Validation failures, resource exhaustion, already-exists/not-found,
//! and permission errors are all recoverable: they propagate as
//! `Err(KernelError)` through an ordinary `?`-chain and the caller (a
//! process, in the end) keeps running. Invariant violations are not
//! recoverable and are raised with [`fatal`] instead, which logs before
//! panicking so the panic message is never the only record of what
//! happened.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, KernelError>;

/// Recoverable error conditions a caller can act on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// A lookup (file, directory entry, swap slot, VMA) found nothing.
    #[error("not found")]
    NotFound,

    /// A create-like operation collided with an existing name.
    #[error("already exists")]
    AlreadyExists,

    /// A directory remove was attempted on a non-empty directory, or a
    /// protected entry ("." , ".." , "/") was targeted.
    #[error("directory not empty or entry protected")]
    DirectoryNotEmpty,

    /// The caller does not have permission for this operation (write to
    /// a deny-write inode, remove "." or "..", etc).
    #[error("permission denied")]
    PermissionDenied,

    /// A caller-supplied value failed validation (bad descriptor, name
    /// too long, null/empty path, overlapping mmap region).
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An allocation-time resource was exhausted (no free sector, no
    /// free swap slot, no frame available under the process's cap).
    #[error("resource exhausted: {resource}")]
    Exhausted {
        /// Name of the resource that ran out, for diagnostics.
        resource: &'static str,
    },
}

/// Raise a fatal invariant violation: sector out of device range,
/// buffer pool exhausted with every group pinned, inode magic mismatch.
///
/// `spec.md` §7 classifies these as unrecoverable; the reference model
/// does not attempt to continue after one. Logs at `error!` before
/// panicking.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        log::error!("fatal invariant violation: {}", msg);
        panic!("{}", msg);
    }};
}
