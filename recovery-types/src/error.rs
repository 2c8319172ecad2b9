// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or validating a root table
#[derive(Error, Debug)]
pub enum TableError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid root table: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid root name {0:?}: must end with the only ':' in the name")]
    InvalidName(String),

    #[error("Root {name} has a relative mount point {mount_point:?}")]
    RelativeMountPoint { name: String, mount_point: PathBuf },

    #[error("format_poll_secs must be at least 1")]
    ZeroPollInterval,

    #[error("Invalid device {0:?}: expected \"flash\", \"mmc\" or an absolute path")]
    InvalidDevice(String),
}
