// SPDX-License-Identifier: GPL-3.0-only

//! eMMC partitions looked up through the kernel's `by-name` links

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use recovery_types::{MmcPartition, ToolStatus};
use tracing::{debug, info, warn};

use crate::error::{Result, SysError};
use crate::tools::{create_mtab, run_tool};

const BY_NAME_DIRS: &[&str] = &["/dev/block/by-name", "/dev/disk/by-partlabel"];
const PLATFORM_DIR: &str = "/dev/block/platform";

const MKE2FS: &str = "/sbin/mke2fs";
const TUNE2FS: &str = "/sbin/tune2fs";
const E2FSCK: &str = "/sbin/e2fsck";

/// List `name -> device` links in one `by-name` directory
fn read_by_name_dir(dir: &Path) -> Vec<MmcPartition> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };

    entries
        .flatten()
        .map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            let device_path = std::fs::canonicalize(entry.path()).unwrap_or_else(|_| entry.path());
            MmcPartition { name, device_path }
        })
        .collect()
}

fn by_name_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = BY_NAME_DIRS.iter().map(PathBuf::from).collect();
    if let Ok(platforms) = std::fs::read_dir(PLATFORM_DIR) {
        for platform in platforms.flatten() {
            dirs.push(platform.path().join("by-name"));
        }
    }
    dirs
}

/// Cached view of the named eMMC partitions
#[derive(Debug, Default)]
pub struct MmcDevices {
    partitions: Mutex<Vec<MmcPartition>>,
}

impl MmcDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scan_partitions(&self) -> Result<usize> {
        let mut partitions = Vec::new();
        for dir in by_name_dirs() {
            for partition in read_by_name_dir(&dir) {
                if !partitions
                    .iter()
                    .any(|known: &MmcPartition| known.name == partition.name)
                {
                    partitions.push(partition);
                }
            }
        }
        debug!("Found {} named mmc partitions", partitions.len());

        let count = partitions.len();
        let mut cache = self
            .partitions
            .lock()
            .map_err(|_| SysError::OperationFailed("mmc partition cache poisoned".to_string()))?;
        *cache = partitions;
        Ok(count)
    }

    pub fn find_by_name(&self, name: &str) -> Option<MmcPartition> {
        let cache = self.partitions.lock().ok()?;
        cache
            .iter()
            .find(|partition| partition.name == name)
            .cloned()
    }

    /// Build a fresh ext3 filesystem: ext2 base, journal, then a full check.
    ///
    /// Returns the status of the first step that failed, or the final check's
    /// status.
    pub fn format_ext3(&self, partition: &MmcPartition) -> Result<ToolStatus> {
        let device = partition.device_path.display().to_string();
        info!("Formatting mmc partition {} ({device}) as ext3", partition.name);
        create_mtab()?;

        let steps: [(&str, Vec<String>); 2] = [
            (
                MKE2FS,
                vec!["-T".into(), "ext2".into(), "-F".into(), "-q".into(), device.clone()],
            ),
            (TUNE2FS, vec!["-j".into(), device.clone()]),
        ];
        for (program, args) in steps {
            let status = run_tool(Path::new(program), &args)?;
            if !status.success() {
                warn!("{program} failed on {device}: {status}");
                return Ok(status);
            }
        }

        // e2fsck exits with 1 when it corrected something
        let status = run_tool(Path::new(E2FSCK), &["-fy".into(), device.clone()])?;
        match status {
            ToolStatus::Exited(0 | 1) => Ok(ToolStatus::Exited(0)),
            other => {
                warn!("{E2FSCK} failed on {device}: {other}");
                Ok(other)
            }
        }
    }
}
