// SPDX-License-Identifier: GPL-3.0-only

//! Root registry and resolver
//!
//! `Roots` owns the root table, the probe and recheck state and the package
//! binding. Every symbolic path goes through [`Roots::resolve`], which runs
//! the filesystem probe first when a recheck has been requested.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use recovery_types::{DeviceKind, FlashPartition, ROOT_SEPARATOR, RootDescriptor, TableConfig};
use tracing::{debug, warn};

use crate::error::{Result, RootsError};
use crate::package::PackageBinding;
use crate::platform::Platform;

/// Lifecycle of the one-shot filesystem probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    NotRun,
    Running,
    Done,
}

/// Whether the next resolution must run the filesystem probe first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecheckState {
    Fresh,
    NeedsRecheck,
}

/// Mount status of a root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Mounted,
    Unmounted,
    /// The root has no mount point
    NotApplicable,
}

/// External formatter supervision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatSettings {
    pub poll_interval: Duration,
    pub timeout: Option<Duration>,
}

impl Default for FormatSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: None,
        }
    }
}

/// Registry of recovery roots.
///
/// `A` is the archive handle type bound to the package root. It is shared,
/// never opened or closed here.
pub struct Roots<A> {
    pub(crate) table: Vec<RootDescriptor>,
    pub(crate) platform: Platform,
    pub(crate) probe_state: ProbeState,
    pub(crate) recheck: RecheckState,
    pub(crate) package: Option<PackageBinding<A>>,
    pub(crate) probe_unmount: Vec<String>,
    pub(crate) flash_cache: bool,
    pub(crate) format_settings: FormatSettings,
}

impl<A> Roots<A> {
    pub fn new(config: TableConfig, platform: Platform) -> Self {
        let format_settings = FormatSettings {
            poll_interval: Duration::from_secs(config.format_poll_secs.max(1)),
            timeout: config.format_timeout_secs.map(Duration::from_secs),
        };

        Self {
            table: config.roots,
            platform,
            probe_state: ProbeState::NotRun,
            recheck: RecheckState::Fresh,
            package: None,
            probe_unmount: config.probe_unmount,
            flash_cache: config.flash_cache,
            format_settings,
        }
    }

    pub fn with_format_settings(mut self, settings: FormatSettings) -> Self {
        self.format_settings = settings;
        self
    }

    pub fn descriptors(&self) -> &[RootDescriptor] {
        &self.table
    }

    pub fn probe_state(&self) -> ProbeState {
        self.probe_state
    }

    pub fn recheck_state(&self) -> RecheckState {
        self.recheck
    }

    /// Ask the next resolution to (re)detect filesystem types
    pub fn request_recheck(&mut self) {
        self.recheck = RecheckState::NeedsRecheck;
    }

    /// Descriptor for the root named by `root_path`'s prefix
    pub fn resolve(&mut self, root_path: &str) -> Option<&RootDescriptor> {
        let index = self.resolve_index(root_path)?;
        Some(&self.table[index])
    }

    pub(crate) fn resolve_index(&mut self, root_path: &str) -> Option<usize> {
        let separator = root_path.find(ROOT_SEPARATOR)?;

        if self.recheck == RecheckState::NeedsRecheck {
            self.recheck = RecheckState::Fresh;
            self.run_probe();
        }

        let prefix = &root_path[..=separator];
        let index = self.table.iter().position(|root| root.matches_prefix(prefix));
        if index.is_none() {
            debug!("No root matches {prefix}");
        }
        index
    }

    pub(crate) fn require(&mut self, root_path: &str) -> Result<usize> {
        self.resolve_index(root_path).ok_or_else(|| {
            warn!("Can't resolve {root_path:?}");
            RootsError::UnresolvableRoot(root_path.to_string())
        })
    }

    /// Translate `SYSTEM:lib` into `/system/lib`
    pub fn translate_path(&mut self, root_path: &str) -> Result<PathBuf> {
        self.translate_path_within(root_path, usize::MAX)
    }

    /// Like [`Roots::translate_path`], failing when the result plus a
    /// terminator would not fit in `capacity` bytes
    pub fn translate_path_within(&mut self, root_path: &str, capacity: usize) -> Result<PathBuf> {
        let index = self.require(root_path)?;
        let root = &self.table[index];
        let mount_point = root
            .mount_path()
            .ok_or_else(|| RootsError::NotMountable(root.name.clone()))?
            .as_os_str();

        let relative = root_path[root.name.len()..].trim_start_matches('/');
        let needed = mount_point
            .len()
            .saturating_add(1)
            .saturating_add(relative.len())
            .saturating_add(1);
        if needed > capacity {
            return Err(RootsError::BufferTooSmall { capacity });
        }

        let mut translated = OsString::with_capacity(needed);
        translated.push(mount_point);
        if mount_point.as_encoded_bytes().last() != Some(&b'/') {
            translated.push("/");
        }
        translated.push(relative);
        Ok(PathBuf::from(translated))
    }

    pub fn is_mounted(&mut self, root_path: &str) -> Result<MountState> {
        let index = self.require(root_path)?;
        crate::mount::mount_state(&self.platform, &self.table[index])
    }

    /// Flash partition backing a root
    pub fn flash_partition_for(&mut self, root_path: &str) -> Result<FlashPartition> {
        let index = self.require(root_path)?;
        let root = &self.table[index];

        let flash_backed = root.device == Some(DeviceKind::Flash) && root.partition_name.is_some();
        let board_cache = self.flash_cache && root_path == "CACHE:";
        if !flash_backed && !board_cache {
            return Err(RootsError::NotFlashBacked(root.name.clone()));
        }

        let name = root
            .partition_name
            .as_deref()
            .ok_or_else(|| RootsError::NotFlashBacked(root.name.clone()))?;
        self.platform.flash.scan_partitions()?;
        self.platform
            .flash
            .find_by_name(name)
            .ok_or_else(|| RootsError::PartitionNotFound {
                name: name.to_string(),
            })
    }

    pub(crate) fn bound_archive(&self) -> Option<Arc<A>> {
        self.package.as_ref().map(|binding| binding.archive.clone())
    }
}
