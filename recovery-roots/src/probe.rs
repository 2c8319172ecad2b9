// SPDX-License-Identifier: GPL-3.0-only

//! One-shot filesystem type detection
//!
//! Boards ship the same roots either on the vendor `rfs` filesystem, on ext2/
//! ext4 after a conversion, or as loop images on the sdcard. The probe finds
//! out which by trial mounting and records the result in the root table.
//! Run it while everything except the sdcard is unmounted.

use std::path::Path;

use recovery_types::{DeviceKind, FsKind, MountFlag, MountFlags, RootDescriptor};
use tracing::{debug, info, warn};

use crate::mount::{mount_state, unmount_root};
use crate::platform::Platform;
use crate::roots::{MountState, ProbeState, Roots};

/// Devices under this prefix are filesystem images on the sdcard
pub const SDCARD_IMAGE_PREFIX: &str = "/sdcard/";

const E2FSCK: &str = "/sbin/e2fsck";

const LOOP_IMAGE_OPTIONS: &str = "loop,nodev,nosuid,noatime,nodiratime,data=ordered";

const RFS_MOUNT_DATA: &str = "codepage=utf8,xattr,check=no";
const RFS_OPTIONS: &str = "nodev,nosuid,codepage=utf8,xattr,check=no";
const EXT2_OPTIONS: &str = "nodev,nosuid,noatime,nodiratime";
const EXT4_OPTIONS: &str = "nodev,nosuid,noatime,nodiratime,data=ordered";

fn rfs_flags() -> MountFlags {
    MountFlag::NoDev | MountFlag::NoSuid
}

fn ext_flags() -> MountFlags {
    MountFlag::NoDev | MountFlag::NoSuid | MountFlag::NoAtime | MountFlag::NoDirAtime
}

impl<A> Roots<A> {
    /// Detect filesystem types of the ambiguous block roots. Only the first
    /// call does anything; results persist for the life of the registry.
    pub(crate) fn run_probe(&mut self) {
        if self.probe_state != ProbeState::NotRun {
            debug!("Filesystem probe already ran ({:?})", self.probe_state);
            return;
        }
        self.probe_state = ProbeState::Running;
        info!("Checking filesystem types");

        for root in self.table.iter_mut().filter(|root| is_candidate(root)) {
            probe_root(&self.platform, root);
            self.platform.progress.print(".");
        }
        self.platform.progress.print("\n");

        // Probe mounts of these roots must not outlive the probe
        for name in &self.probe_unmount {
            let Some(root) = self.table.iter().find(|root| root.matches_prefix(name)) else {
                continue;
            };
            if let Err(e) = unmount_root(&self.platform, root) {
                warn!("Can't unmount {name} after probing: {e}");
            }
        }

        self.probe_state = ProbeState::Done;
    }
}

fn is_candidate(root: &RootDescriptor) -> bool {
    root.probe
        && matches!(root.device, Some(DeviceKind::Block(_)))
        && root.mount_point.is_some()
        && !matches!(root.filesystem, Some(FsKind::Raw | FsKind::Package))
}

fn probe_root(platform: &Platform, root: &mut RootDescriptor) {
    match mount_state(platform, root) {
        Ok(MountState::Mounted) => {
            debug!("{} is mounted, keeping {:?}", root.name, root.filesystem);
            return;
        }
        Ok(_) => {}
        Err(e) => warn!("Can't read mount table while probing {}: {e}", root.name),
    }

    let (Some(device), Some(mount_point)) = (
        root.block_device().map(str::to_owned),
        root.mount_point.clone(),
    ) else {
        return;
    };

    if let Err(e) = platform.mounter.prepare_mount_point(&mount_point) {
        warn!("Can't create {}: {e}", mount_point.display());
    }

    if device.starts_with(SDCARD_IMAGE_PREFIX) {
        check_filesystem(platform, root, &device);
        record(root, "ext4", Some(LOOP_IMAGE_OPTIONS));
        return;
    }

    if try_mount(platform, &device, &mount_point, "rfs", rfs_flags(), RFS_MOUNT_DATA) {
        record(root, "rfs", Some(RFS_OPTIONS));
        return;
    }

    check_filesystem(platform, root, &device);

    if try_mount(platform, &device, &mount_point, "ext2", ext_flags(), "") {
        record(root, "ext2", Some(EXT2_OPTIONS));
    } else if try_mount(platform, &device, &mount_point, "ext4", ext_flags(), "") {
        record(root, "ext4", Some(EXT4_OPTIONS));
    } else {
        // Unknown; leave it to the mount tool's own detection
        record(root, "auto", None);
    }
}

fn try_mount(
    platform: &Platform,
    device: &str,
    mount_point: &Path,
    fs_type: &str,
    flags: MountFlags,
    data: &str,
) -> bool {
    match platform
        .mounter
        .mount(device, mount_point, fs_type, flags, data)
    {
        Ok(()) => true,
        Err(e) => {
            debug!("{device} is not {fs_type}: {e}");
            false
        }
    }
}

/// Run e2fsck on the device, then unmount the root in case the checker
/// left it mounted
fn check_filesystem(platform: &Platform, root: &RootDescriptor, device: &str) {
    if let Err(e) = platform.tools.prepare_mtab() {
        warn!("Can't prepare /etc/mtab: {e}");
    }

    match platform
        .tools
        .run(Path::new(E2FSCK), &["-fyc".to_string(), device.to_string()])
    {
        Ok(status) if status.success() => debug!("{E2FSCK} {device}: clean"),
        Ok(status) => info!("{E2FSCK} {device}: {status}"),
        Err(e) => warn!("Can't run {E2FSCK} on {device}: {e}"),
    }

    if let Err(e) = unmount_root(platform, root) {
        warn!("Can't unmount {} after check: {e}", root.name);
    }
}

fn record(root: &mut RootDescriptor, fs_type: &str, options: Option<&str>) {
    info!("{} detected as {fs_type}", root.name);
    root.record_filesystem(fs_type, options);
}
