// SPDX-License-Identifier: GPL-3.0-only

//! Mounting through `mount(2)` and the external `mount` tool

use std::path::Path;
use std::process::Command;

use nix::mount::{MsFlags, mount};
use recovery_types::{MountFlag, MountFlags};
use tracing::{debug, info, warn};
use which::which;

use crate::error::{Result, SysError};

/// Translate recovery mount flags into kernel `MS_*` flags
pub fn to_ms_flags(flags: MountFlags) -> MsFlags {
    flags.iter().fold(MsFlags::empty(), |acc, flag| {
        acc | match flag {
            MountFlag::NoSuid => MsFlags::MS_NOSUID,
            MountFlag::NoDev => MsFlags::MS_NODEV,
            MountFlag::NoAtime => MsFlags::MS_NOATIME,
            MountFlag::NoDirAtime => MsFlags::MS_NODIRATIME,
        }
    })
}

/// Mount `device` on `target` with a direct `mount(2)` call
pub fn mount_device(
    device: &str,
    target: &Path,
    fs_type: &str,
    flags: MountFlags,
    data: &str,
) -> Result<()> {
    debug!(
        "mount({device}, {}, {fs_type}, {flags:?}, {data:?})",
        target.display()
    );

    mount(
        Some(device),
        target,
        Some(fs_type),
        to_ms_flags(flags),
        Some(data),
    )?;

    info!("Mounted {device} on {} as {fs_type}", target.display());
    Ok(())
}

/// Mount through the external `mount` tool so option strings the kernel
/// does not understand (`loop`, `data=ordered`) are handled in userspace
pub fn mount_with_tool(device: &str, target: &Path, fs_type: &str, options: &str) -> Result<()> {
    let binary = which("mount").map_err(|_| SysError::ToolNotFound("mount".to_string()))?;
    debug!(
        "Running {} -t {fs_type} -o {options} {device} {}",
        binary.display(),
        target.display()
    );

    let status = Command::new(&binary)
        .arg("-t")
        .arg(fs_type)
        .arg(format!("-o{options}"))
        .arg(device)
        .arg(target)
        .status()
        .map_err(|e| SysError::OperationFailed(format!("Failed to run mount: {e}")))?;

    if !status.success() {
        warn!("mount -t {fs_type} {device} failed: {status}");
        return Err(SysError::OperationFailed(format!(
            "mount -t {fs_type} {device} {} failed: {status}",
            target.display()
        )));
    }

    info!("Mounted {device} on {} as {fs_type}", target.display());
    Ok(())
}
