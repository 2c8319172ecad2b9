// SPDX-License-Identifier: GPL-3.0-only

//! Idempotent mount and unmount of roots

use recovery_types::{DEFAULT_MOUNT_FLAGS, DeviceKind, MountFlags, RootDescriptor};
use tracing::{debug, error, info, warn};

use crate::error::{Result, RootsError};
use crate::platform::Platform;
use crate::roots::{MountState, Roots};

/// Options handed to the `mount` tool when a root records none
const DEFAULT_TOOL_OPTIONS: &str = "noatime,nodiratime,nodev,nosuid";

impl<A> Roots<A> {
    /// Mount the root unless it is already mounted
    pub fn ensure_mounted(&mut self, root_path: &str) -> Result<()> {
        let index = self.require(root_path)?;
        let root = &self.table[index];

        if mount_state(&self.platform, root)? == MountState::Mounted {
            debug!("{} is already mounted", root.name);
            return Ok(());
        }

        mount_root(&self.platform, root)
    }

    /// Unmount the root if it is mounted. Roots without a mount point are
    /// never mounted.
    pub fn ensure_unmounted(&mut self, root_path: &str) -> Result<()> {
        let index = self.require(root_path)?;
        unmount_root(&self.platform, &self.table[index])
    }
}

pub(crate) fn mount_state(platform: &Platform, root: &RootDescriptor) -> Result<MountState> {
    let Some(mount_point) = root.mount_path() else {
        return Ok(MountState::NotApplicable);
    };

    let volumes = platform.oracle.scan()?;
    if volumes.find_by_mount_point(mount_point).is_some() {
        Ok(MountState::Mounted)
    } else {
        Ok(MountState::Unmounted)
    }
}

pub(crate) fn unmount_root(platform: &Platform, root: &RootDescriptor) -> Result<()> {
    let Some(mount_point) = root.mount_path() else {
        return Ok(());
    };

    let volumes = platform.oracle.scan()?;
    let Some(volume) = volumes.find_by_mount_point(mount_point) else {
        debug!("{} is not mounted", root.name);
        return Ok(());
    };

    platform
        .oracle
        .unmount(volume)
        .map_err(|cause| RootsError::UnmountFailed {
            root: root.name.clone(),
            cause,
        })?;
    info!("Unmounted {} from {}", root.name, mount_point.display());
    Ok(())
}

fn mount_root(platform: &Platform, root: &RootDescriptor) -> Result<()> {
    let device = match &root.device {
        Some(DeviceKind::Flash) => return mount_flash(platform, root),
        Some(DeviceKind::Block(path)) => path.clone(),
        Some(DeviceKind::Mmc) => mmc_device_path(platform, root)?,
        None => return Err(RootsError::NotMountable(root.name.clone())),
    };

    let (Some(mount_point), Some(fs_type)) = (root.mount_path(), root.filesystem_name()) else {
        return Err(RootsError::NotMountable(root.name.clone()));
    };

    if let Err(e) = platform.mounter.prepare_mount_point(mount_point) {
        warn!("Can't create {}: {e}", mount_point.display());
    }

    let primary = if fs_type != "auto" && root.filesystem_options.is_none() {
        platform
            .mounter
            .mount(&device, mount_point, fs_type, DEFAULT_MOUNT_FLAGS, "")
    } else {
        let options = root
            .filesystem_options
            .as_deref()
            .unwrap_or(DEFAULT_TOOL_OPTIONS);
        platform
            .mounter
            .mount_with_tool(&device, mount_point, fs_type, options)
    };

    let Err(cause) = primary else {
        return Ok(());
    };

    let Some(device2) = &root.device2 else {
        error!("Can't mount {device} ({cause})");
        return Err(RootsError::MountFailed { device, cause });
    };

    debug!("Mounting {device} failed ({cause}), trying {device2}");
    platform
        .mounter
        .mount(device2, mount_point, fs_type, DEFAULT_MOUNT_FLAGS, "")
        .map_err(|cause| {
            error!("Can't mount {device} (or {device2}) ({cause})");
            RootsError::MountFailed {
                device: format!("{device} (or {device2})"),
                cause,
            }
        })
}

/// Flash roots mount through the mtd driver and have no secondary device.
/// The partition is looked up before anything else about the root is checked.
fn mount_flash(platform: &Platform, root: &RootDescriptor) -> Result<()> {
    let name = root
        .partition_name
        .as_deref()
        .ok_or_else(|| RootsError::NotFlashBacked(root.name.clone()))?;

    platform.flash.scan_partitions()?;
    let partition =
        platform
            .flash
            .find_by_name(name)
            .ok_or_else(|| RootsError::PartitionNotFound {
                name: name.to_string(),
            })?;

    // Raw partitions hold images, not filesystems
    let (Some(mount_point), Some(fs_type)) = (root.mount_path(), root.filesystem_name()) else {
        return Err(RootsError::NotMountable(root.name.clone()));
    };

    platform
        .flash
        .mount(&partition, mount_point, fs_type, MountFlags::empty())
        .map_err(|cause| RootsError::MountFailed {
            device: format!("mtd:{name}"),
            cause,
        })
}

fn mmc_device_path(platform: &Platform, root: &RootDescriptor) -> Result<String> {
    let name = root
        .partition_name
        .as_deref()
        .ok_or_else(|| RootsError::NotMountable(root.name.clone()))?;

    platform.mmc.scan_partitions()?;
    let partition =
        platform
            .mmc
            .find_by_name(name)
            .ok_or_else(|| RootsError::PartitionNotFound {
                name: name.to_string(),
            })?;
    Ok(partition.device_path.display().to_string())
}
