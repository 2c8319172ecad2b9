// SPDX-License-Identifier: GPL-3.0-only

//! Root table configuration
//!
//! The built-in table mirrors a typical Samsung-style layout. Boards override
//! it with a TOML file of `[[root]]` entries:
//!
//! ```toml
//! probe_unmount = ["SYSTEM:", "DATA:"]
//!
//! [[root]]
//! name = "SYSTEM:"
//! device = "/dev/block/stl9"
//! partition_name = "system"
//! mount_point = "/system"
//! filesystem = "rfs"
//! probe = true
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::TableError;
use crate::root::{DeviceKind, FsKind, ROOT_SEPARATOR, RootDescriptor};

/// Root table plus the board knobs that travel with it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    #[serde(rename = "root")]
    pub roots: Vec<RootDescriptor>,

    /// Roots force-unmounted after the filesystem probe
    pub probe_unmount: Vec<String>,

    /// Board keeps `CACHE:` on flash even when its device is a block path
    pub flash_cache: bool,

    /// Seconds between completion polls of an external formatter
    pub format_poll_secs: u64,

    /// Kill an external formatter after this many seconds; unbounded when unset
    pub format_timeout_secs: Option<u64>,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            probe_unmount: vec!["SYSTEM:".to_string(), "DATA:".to_string()],
            flash_cache: false,
            format_poll_secs: 1,
            format_timeout_secs: None,
        }
    }
}

impl TableConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, TableError> {
        let config: TableConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, TableError> {
        let content = std::fs::read_to_string(path).map_err(|source| TableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Reject entries the resolver could never match or mount, and a zero
    /// formatter poll interval
    pub fn validate(&self) -> Result<(), TableError> {
        if self.format_poll_secs == 0 {
            return Err(TableError::ZeroPollInterval);
        }

        for root in &self.roots {
            if root.name.find(ROOT_SEPARATOR) != Some(root.name.len().saturating_sub(1))
                || root.name.len() < 2
            {
                return Err(TableError::InvalidName(root.name.clone()));
            }
            if let Some(mount_point) = &root.mount_point
                && !mount_point.is_absolute()
            {
                return Err(TableError::RelativeMountPoint {
                    name: root.name.clone(),
                    mount_point: mount_point.clone(),
                });
            }
        }
        Ok(())
    }

    /// Names that appear more than once. Only the first entry of each is
    /// reachable through the resolver.
    pub fn duplicate_prefixes(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for root in &self.roots {
            if !seen.insert(root.name.as_str()) && !duplicates.contains(&root.name.as_str()) {
                duplicates.push(root.name.as_str());
            }
        }
        duplicates
    }
}

fn block(path: &str) -> DeviceKind {
    DeviceKind::Block(path.to_string())
}

fn named(fs_type: &str) -> FsKind {
    FsKind::Named(fs_type.to_string())
}

/// Built-in root table. Order matters: the first matching prefix wins.
pub fn default_roots() -> Vec<RootDescriptor> {
    vec![
        RootDescriptor::new("BOOT:")
            .device(DeviceKind::Flash)
            .partition("boot")
            .filesystem(FsKind::Raw),
        RootDescriptor::new("CACHE:")
            .device(block("/dev/block/stl11"))
            .partition("cache")
            .mount_point("/cache")
            .filesystem(named("rfs"))
            .probed(),
        RootDescriptor::new("DATA:")
            .device(block("/dev/block/mmcblk0p2"))
            .partition("userdata")
            .mount_point("/data")
            .filesystem(named("rfs"))
            .probed(),
        RootDescriptor::new("SYSTEM:")
            .device(block("/dev/block/stl9"))
            .partition("system")
            .mount_point("/system")
            .filesystem(named("rfs"))
            .probed(),
        RootDescriptor::new("PACKAGE:").filesystem(FsKind::Package),
        RootDescriptor::new("RECOVERY:")
            .device(DeviceKind::Flash)
            .partition("recovery")
            .mount_point("/")
            .filesystem(FsKind::Raw),
        RootDescriptor::new("SDCARD:")
            .device(block("/dev/block/mmcblk0p1"))
            .device2("/dev/block/mmcblk0")
            .mount_point("/sdcard")
            .filesystem(named("vfat")),
        RootDescriptor::new("SDEXT:")
            .device(block("/dev/block/mmcblk1p2"))
            .mount_point("/sd-ext")
            .filesystem(named("ext4")),
        RootDescriptor::new("MBM:")
            .device(DeviceKind::Flash)
            .partition("mbm")
            .filesystem(FsKind::Raw),
        RootDescriptor::new("TMP:").mount_point("/tmp"),
        RootDescriptor::new("EFS:")
            .device(block("/dev/block/stl3"))
            .partition("efs")
            .mount_point("/efs")
            .filesystem(named("rfs")),
    ]
}
