// SPDX-License-Identifier: GPL-3.0-only

//! Live mount table

use std::path::{Path, PathBuf};

use nix::mount::umount;
use recovery_types::{MountedVolume, MountedVolumes};
use tracing::{debug, info};

use crate::error::{Result, SysError};

const PROC_MOUNTS: &str = "/proc/mounts";

/// Unescape octal sequences in /proc/mounts fields (e.g. `\040` -> ` `)
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut output = Vec::with_capacity(bytes.len());
    let mut index = 0;

    while index < bytes.len() {
        if bytes[index] == b'\\'
            && index + 3 < bytes.len()
            && bytes[index + 1..index + 4]
                .iter()
                .all(|byte| (b'0'..=b'7').contains(byte))
        {
            if let Ok(value) = u8::from_str_radix(&field[index + 1..index + 4], 8) {
                output.push(value);
                index += 4;
                continue;
            }
        }

        output.push(bytes[index]);
        index += 1;
    }

    String::from_utf8_lossy(&output).into_owned()
}

/// Parse `/proc/mounts` content into a table snapshot
pub fn parse_mounts(input: &str) -> Result<MountedVolumes> {
    let mut volumes = Vec::new();

    for line in input.lines().filter(|line| !line.trim().is_empty()) {
        let mut fields = line.split_whitespace();
        let (Some(device), Some(mount_point), Some(filesystem)) =
            (fields.next(), fields.next(), fields.next())
        else {
            return Err(SysError::InvalidMountLine(line.to_string()));
        };
        let options = fields.next().unwrap_or_default();

        volumes.push(MountedVolume {
            device: unescape_mount_field(device),
            mount_point: PathBuf::from(unescape_mount_field(mount_point)),
            filesystem: filesystem.to_string(),
            options: options.to_string(),
        });
    }

    Ok(MountedVolumes::new(volumes))
}

/// Read the kernel's current mount table
pub fn scan_mounted_volumes() -> Result<MountedVolumes> {
    let content = std::fs::read_to_string(PROC_MOUNTS)?;
    let volumes = parse_mounts(&content)?;
    debug!("Scanned {} mounted volumes", volumes.len());
    Ok(volumes)
}

/// Unmount a volume found in the mount table
pub fn unmount_volume(volume: &MountedVolume) -> Result<()> {
    info!(
        "Unmounting {} from {}",
        volume.device,
        volume.mount_point.display()
    );
    unmount_path(&volume.mount_point)
}

pub(crate) fn unmount_path(mount_point: &Path) -> Result<()> {
    umount(mount_point).map_err(SysError::from)
}
