// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

/// Named MTD (raw NAND) partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashPartition {
    /// Index in `/proc/mtd` (`mtd<index>`)
    pub index: u32,
    pub name: String,
    pub size: u64,
    pub erase_size: u32,
}

/// Named eMMC partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MmcPartition {
    pub name: String,
    pub device_path: PathBuf,
}
