// SPDX-License-Identifier: GPL-3.0-only

//! MTD (raw NAND) partitions
//!
//! Partitions are listed in `/proc/mtd`, mounted through their
//! `mtdblock` node and erased through the character node with the
//! `MEMERASE` ioctl.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use recovery_types::{FlashPartition, MountFlags};
use tracing::{debug, info, warn};

use crate::error::{Result, SysError};
use crate::mount::mount_device;

const PROC_MTD: &str = "/proc/mtd";

#[repr(C)]
#[derive(Debug, Default)]
#[allow(dead_code)]
struct MtdInfoUser {
    kind: u8,
    flags: u32,
    size: u32,
    erasesize: u32,
    writesize: u32,
    oobsize: u32,
    padding: u64,
}

#[repr(C)]
#[derive(Debug, Default)]
struct EraseInfoUser {
    start: u32,
    length: u32,
}

nix::ioctl_read!(mem_get_info, b'M', 1, MtdInfoUser);
nix::ioctl_write_ptr!(mem_erase, b'M', 2, EraseInfoUser);
nix::ioctl_write_ptr!(mem_get_bad_block, b'M', 11, libc::loff_t);

/// Parse `/proc/mtd` content.
///
/// ```text
/// dev:    size   erasesize  name
/// mtd0: 00500000 00020000 "boot"
/// ```
pub fn parse_proc_mtd(input: &str) -> Vec<FlashPartition> {
    input
        .lines()
        .filter_map(|line| {
            let (device, rest) = line.split_once(':')?;
            let index = device.trim().strip_prefix("mtd")?.parse().ok()?;
            let mut fields = rest.split_whitespace();
            let size = u64::from_str_radix(fields.next()?, 16).ok()?;
            let erase_size = u32::from_str_radix(fields.next()?, 16).ok()?;
            let name = rest.split_once('"')?.1.strip_suffix('"')?;

            Some(FlashPartition {
                index,
                name: name.to_string(),
                size,
                erase_size,
            })
        })
        .collect()
}

fn char_device(partition: &FlashPartition) -> PathBuf {
    let android = PathBuf::from(format!("/dev/mtd/mtd{}", partition.index));
    if android.exists() {
        android
    } else {
        PathBuf::from(format!("/dev/mtd{}", partition.index))
    }
}

fn block_device(partition: &FlashPartition) -> String {
    format!("/dev/block/mtdblock{}", partition.index)
}

/// Cached view of the MTD partitions on this device
#[derive(Debug, Default)]
pub struct MtdDevices {
    partitions: Mutex<Vec<FlashPartition>>,
}

impl MtdDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-read `/proc/mtd`, returning the number of partitions found
    pub fn scan_partitions(&self) -> Result<usize> {
        let content = std::fs::read_to_string(PROC_MTD)?;
        let partitions = parse_proc_mtd(&content);
        debug!("Found {} mtd partitions", partitions.len());

        let count = partitions.len();
        let mut cache = self
            .partitions
            .lock()
            .map_err(|_| SysError::OperationFailed("mtd partition cache poisoned".to_string()))?;
        *cache = partitions;
        Ok(count)
    }

    pub fn find_by_name(&self, name: &str) -> Option<FlashPartition> {
        let cache = self.partitions.lock().ok()?;
        cache
            .iter()
            .find(|partition| partition.name == name)
            .cloned()
    }

    pub fn mount_partition(
        &self,
        partition: &FlashPartition,
        mount_point: &Path,
        fs_type: &str,
        flags: MountFlags,
    ) -> Result<()> {
        mount_device(&block_device(partition), mount_point, fs_type, flags, "")
    }

    pub fn open_for_write(&self, partition: &FlashPartition) -> Result<MtdWriter> {
        let path = char_device(partition);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    SysError::DeviceNotFound(path.display().to_string())
                }
                std::io::ErrorKind::PermissionDenied => SysError::PermissionDenied(format!(
                    "Cannot open {} for writing",
                    path.display()
                )),
                _ => SysError::Io(e),
            })?;

        debug!("Opened {} for writing", path.display());
        Ok(MtdWriter {
            file,
            partition: partition.clone(),
        })
    }
}

/// Write context on an MTD character device
#[derive(Debug)]
pub struct MtdWriter {
    file: File,
    partition: FlashPartition,
}

impl MtdWriter {
    /// Erase `count` erase blocks from the start of the partition, or all of
    /// them when `count` is `None`. Bad blocks are skipped. Returns the number
    /// of bytes covered.
    pub fn erase_blocks(&mut self, count: Option<u32>) -> Result<u64> {
        let fd = self.file.as_raw_fd();
        let mut info = MtdInfoUser::default();
        // SAFETY: `info` is a valid, writable mtd_info_user for the ioctl
        unsafe { mem_get_info(fd, &mut info) }?;

        if info.erasesize == 0 {
            return Err(SysError::OperationFailed(format!(
                "mtd partition {} reports zero erase size",
                self.partition.name
            )));
        }

        let total_blocks = info.size / info.erasesize;
        let blocks = count.map_or(total_blocks, |count| count.min(total_blocks));
        let mut skipped = 0;

        for block in 0..blocks {
            let start = block * info.erasesize;
            let offset = libc::loff_t::from(start);
            // SAFETY: `offset` lives for the duration of the call
            if let Ok(bad) = unsafe { mem_get_bad_block(fd, &offset) }
                && bad > 0
            {
                warn!("Skipping bad block at 0x{start:08x} on {}", self.partition.name);
                skipped += 1;
                continue;
            }

            let erase = EraseInfoUser {
                start,
                length: info.erasesize,
            };
            // SAFETY: `erase` lives for the duration of the call
            unsafe { mem_erase(fd, &erase) }?;
        }

        info!(
            "Erased {} blocks of {} ({skipped} bad)",
            blocks - skipped,
            self.partition.name
        );
        Ok(u64::from(blocks) * u64::from(info.erasesize))
    }

    /// Flush and release the device. mtdchar has no fsync, so `EINVAL` from
    /// the flush only means there was nothing to flush.
    pub fn close(self) -> Result<()> {
        match self.file.sync_all() {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(libc::EINVAL) => {
                debug!("{} has no flush support", self.partition.name);
                Ok(())
            }
            Err(e) => Err(SysError::Io(e)),
        }
    }
}
