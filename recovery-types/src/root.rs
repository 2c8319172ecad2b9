// SPDX-License-Identifier: GPL-3.0-only

//! Root descriptors
//!
//! One `RootDescriptor` per logical volume. Only `filesystem` and
//! `filesystem_options` change after construction, and only through
//! [`RootDescriptor::record_filesystem`].

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// Separator terminating a root name (`SYSTEM:`)
pub const ROOT_SEPARATOR: char = ':';

/// Initial capacity for probe-recorded option strings. Every option set the
/// probe writes fits, so rechecks overwrite in place.
const OPTIONS_CAPACITY: usize = 256;

/// Where a root's data physically lives
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceKind {
    /// Raw NAND partition reached through the MTD driver, looked up by name
    Flash,
    /// eMMC partition looked up by name
    Mmc,
    /// Ordinary block device or loop image path
    Block(String),
}

impl DeviceKind {
    pub fn block_path(&self) -> Option<&str> {
        match self {
            DeviceKind::Block(path) => Some(path),
            _ => None,
        }
    }
}

impl TryFrom<String> for DeviceKind {
    type Error = TableError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "flash" | "mtd" => Ok(DeviceKind::Flash),
            "mmc" => Ok(DeviceKind::Mmc),
            path if path.starts_with('/') => Ok(DeviceKind::Block(value)),
            _ => Err(TableError::InvalidDevice(value)),
        }
    }
}

impl From<DeviceKind> for String {
    fn from(kind: DeviceKind) -> Self {
        match kind {
            DeviceKind::Flash => "flash".to_string(),
            DeviceKind::Mmc => "mmc".to_string(),
            DeviceKind::Block(path) => path,
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Flash => write!(f, "<flash>"),
            DeviceKind::Mmc => write!(f, "<mmc>"),
            DeviceKind::Block(path) => write!(f, "{path}"),
        }
    }
}

/// Filesystem carried by a root
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FsKind {
    /// Unstructured partition contents (boot images, recovery image)
    Raw,
    /// Virtual root backed by the bound update package
    Package,
    /// A mountable filesystem type such as `ext4`, `rfs` or `auto`
    Named(String),
}

impl FsKind {
    pub fn named(&self) -> Option<&str> {
        match self {
            FsKind::Named(name) => Some(name),
            _ => None,
        }
    }
}

impl From<String> for FsKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "raw" => FsKind::Raw,
            "package" => FsKind::Package,
            _ => FsKind::Named(value),
        }
    }
}

impl From<FsKind> for String {
    fn from(kind: FsKind) -> Self {
        match kind {
            FsKind::Raw => "raw".to_string(),
            FsKind::Package => "package".to_string(),
            FsKind::Named(name) => name,
        }
    }
}

impl fmt::Display for FsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsKind::Raw => write!(f, "<raw>"),
            FsKind::Package => write!(f, "<package>"),
            FsKind::Named(name) => write!(f, "{name}"),
        }
    }
}

/// One logical volume of the device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootDescriptor {
    /// Symbolic prefix including the trailing separator, e.g. `SYSTEM:`
    pub name: String,

    /// Primary device
    #[serde(default)]
    pub device: Option<DeviceKind>,

    /// Secondary device path, only used when mounting the primary fails
    #[serde(default)]
    pub device2: Option<String>,

    /// Flash/mmc partition label
    #[serde(default)]
    pub partition_name: Option<String>,

    /// Absolute mount point, absent for roots that cannot be mounted
    #[serde(default)]
    pub mount_point: Option<PathBuf>,

    #[serde(default)]
    pub filesystem: Option<FsKind>,

    /// Mount option string, rewritten by the filesystem probe
    #[serde(default)]
    pub filesystem_options: Option<String>,

    /// Whether the filesystem probe inspects this root
    #[serde(default)]
    pub probe: bool,
}

impl RootDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: None,
            device2: None,
            partition_name: None,
            mount_point: None,
            filesystem: None,
            filesystem_options: None,
            probe: false,
        }
    }

    pub fn device(mut self, device: DeviceKind) -> Self {
        self.device = Some(device);
        self
    }

    pub fn device2(mut self, device2: impl Into<String>) -> Self {
        self.device2 = Some(device2.into());
        self
    }

    pub fn partition(mut self, partition_name: impl Into<String>) -> Self {
        self.partition_name = Some(partition_name.into());
        self
    }

    pub fn mount_point(mut self, mount_point: impl Into<PathBuf>) -> Self {
        self.mount_point = Some(mount_point.into());
        self
    }

    pub fn filesystem(mut self, filesystem: FsKind) -> Self {
        self.filesystem = Some(filesystem);
        self
    }

    pub fn options(mut self, options: impl Into<String>) -> Self {
        self.filesystem_options = Some(options.into());
        self
    }

    pub fn probed(mut self) -> Self {
        self.probe = true;
        self
    }

    pub fn mount_path(&self) -> Option<&Path> {
        self.mount_point.as_deref()
    }

    pub fn block_device(&self) -> Option<&str> {
        self.device.as_ref().and_then(DeviceKind::block_path)
    }

    /// Named filesystem type, `None` for sentinels and absent filesystems
    pub fn filesystem_name(&self) -> Option<&str> {
        self.filesystem.as_ref().and_then(FsKind::named)
    }

    pub fn is_package(&self) -> bool {
        matches!(self.filesystem, Some(FsKind::Package))
    }

    /// True when `prefix` (up to and including the separator) names this root
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.name == prefix
    }

    /// Overwrite the detected filesystem and its mount options.
    ///
    /// Existing string storage is reused so repeated probes do not reallocate.
    /// `None` clears the options entirely.
    pub fn record_filesystem(&mut self, fs_type: &str, options: Option<&str>) {
        match &mut self.filesystem {
            Some(FsKind::Named(name)) => {
                name.clear();
                name.push_str(fs_type);
            }
            slot => *slot = Some(FsKind::Named(fs_type.to_string())),
        }

        match options {
            Some(options) => {
                let buffer = self
                    .filesystem_options
                    .get_or_insert_with(|| String::with_capacity(OPTIONS_CAPACITY));
                buffer.clear();
                buffer.push_str(options);
            }
            None => self.filesystem_options = None,
        }
    }
}
