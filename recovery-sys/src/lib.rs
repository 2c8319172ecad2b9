// SPDX-License-Identifier: GPL-3.0-only

//! Low-level system operations for recovery roots
//!
//! Direct kernel and tool interfaces used by the recovery volume layer:
//! - Live mount table scanning and unmounting
//! - `mount(2)` and the external `mount` tool
//! - MTD (raw NAND) partition lookup, mounting and erasing
//! - eMMC partition lookup by name and ext3 formatting
//! - External tool execution, `/etc/mtab` and loop node preparation
//!
//! These operations require elevated privileges and are meant to run inside
//! the recovery environment.

pub mod error;
pub mod mmc;
pub mod mount;
pub mod mounts;
pub mod mtd;
pub mod tools;

pub use error::{Result, SysError};
pub use mmc::MmcDevices;
pub use mount::{mount_device, mount_with_tool};
pub use mounts::{parse_mounts, scan_mounted_volumes, unmount_volume};
pub use mtd::{MtdDevices, MtdWriter};
pub use tools::{ToolChild, create_mtab, ensure_loop_nodes, run_tool, spawn_tool};
