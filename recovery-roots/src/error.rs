// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use recovery_sys::SysError;
use recovery_types::ToolStatus;
use thiserror::Error;

/// Step of a flash erase that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseStage {
    Open,
    Erase,
    Close,
}

impl fmt::Display for EraseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EraseStage::Open => write!(f, "open"),
            EraseStage::Erase => write!(f, "erase"),
            EraseStage::Close => write!(f, "close"),
        }
    }
}

/// Errors surfaced by root operations
#[derive(Error, Debug)]
pub enum RootsError {
    #[error("Can't resolve root {0:?}")]
    UnresolvableRoot(String),

    #[error("Root {0} is not mountable")]
    NotMountable(String),

    #[error("Root {0} is not backed by a flash partition")]
    NotFlashBacked(String),

    #[error("Can't mount {device}: {cause}")]
    MountFailed { device: String, cause: SysError },

    #[error("Can't unmount {root}: {cause}")]
    UnmountFailed { root: String, cause: SysError },

    #[error("Can't find partition {name:?}")]
    PartitionNotFound { name: String },

    #[error("Translated path does not fit in {capacity} bytes")]
    BufferTooSmall { capacity: usize },

    #[error("No package is bound to {0}")]
    PackageNotBound(String),

    #[error("{tool} failed for {root}: {status}")]
    ExternalToolFailed {
        tool: String,
        root: String,
        status: ToolStatus,
    },

    #[error("{tool} did not finish for {root} in time")]
    ExternalToolTimeout { tool: String, root: String },

    #[error("Can't {stage} {root}: {cause}")]
    EraseFailed {
        root: String,
        stage: EraseStage,
        cause: SysError,
    },

    #[error("Don't know how to format {root} as {filesystem}")]
    UnsupportedFormat { root: String, filesystem: String },

    #[error("Out of memory")]
    AllocationFailed,

    #[error(transparent)]
    Sys(#[from] SysError),
}

/// Result type alias for root operations
pub type Result<T> = std::result::Result<T, RootsError>;
