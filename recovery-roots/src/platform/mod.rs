// SPDX-License-Identifier: GPL-3.0-only

//! Capabilities the root layer calls into
//!
//! Partition drivers, the mount table, external tools and the progress
//! display all live outside this crate. `Platform` bundles one implementation
//! of each; [`Platform::linux`] wires the `recovery-sys` implementations.

mod linux;

use std::path::Path;
use std::sync::Arc;

use recovery_sys::SysError;
use recovery_types::{
    FlashPartition, MmcPartition, MountFlags, MountedVolume, MountedVolumes, ToolStatus,
};

pub use linux::{ConsoleProgress, KernelMounter, ProcMounts, ProcessTools};

type SysResult<T> = std::result::Result<T, SysError>;

/// Live mount table
pub trait MountOracle: Send + Sync {
    fn scan(&self) -> SysResult<MountedVolumes>;

    fn unmount(&self, volume: &MountedVolume) -> SysResult<()>;
}

pub trait Mounter: Send + Sync {
    /// Direct `mount(2)`
    fn mount(
        &self,
        device: &str,
        target: &Path,
        fs_type: &str,
        flags: MountFlags,
        data: &str,
    ) -> SysResult<()>;

    /// External `mount -t <fs_type> -o<options>` invocation
    fn mount_with_tool(
        &self,
        device: &str,
        target: &Path,
        fs_type: &str,
        options: &str,
    ) -> SysResult<()>;

    /// Create a mount point directory; an existing directory is not an error
    fn prepare_mount_point(&self, path: &Path) -> SysResult<()>;
}

/// Raw NAND partition driver
pub trait FlashDriver: Send + Sync {
    fn scan_partitions(&self) -> SysResult<usize>;

    fn find_by_name(&self, name: &str) -> Option<FlashPartition>;

    fn mount(
        &self,
        partition: &FlashPartition,
        mount_point: &Path,
        fs_type: &str,
        flags: MountFlags,
    ) -> SysResult<()>;

    fn open_for_write(&self, partition: &FlashPartition) -> SysResult<Box<dyn FlashWriter>>;
}

/// Open write context on a flash partition
pub trait FlashWriter {
    /// Erase `count` blocks, or the whole partition for `None`
    fn erase_blocks(&mut self, count: Option<u32>) -> SysResult<u64>;

    fn close(self: Box<Self>) -> SysResult<()>;
}

/// eMMC partition driver
pub trait MmcDriver: Send + Sync {
    fn scan_partitions(&self) -> SysResult<usize>;

    fn find_by_name(&self, name: &str) -> Option<MmcPartition>;

    fn format_ext3(&self, partition: &MmcPartition) -> SysResult<ToolStatus>;
}

/// External tool execution
pub trait ToolRunner: Send + Sync {
    /// Run to completion
    fn run(&self, program: &Path, args: &[String]) -> SysResult<ToolStatus>;

    /// Start without waiting
    fn spawn(&self, program: &Path, args: &[String]) -> SysResult<Box<dyn ToolProcess>>;

    /// Make sure `/etc/mtab` exists for the e2fsprogs tools
    fn prepare_mtab(&self) -> SysResult<()>;
}

/// A spawned external tool
pub trait ToolProcess {
    fn try_wait(&mut self) -> SysResult<Option<ToolStatus>>;

    fn kill(&mut self) -> SysResult<ToolStatus>;
}

/// Progress display; output is fire-and-forget
pub trait ProgressSink: Send + Sync {
    fn print(&self, text: &str);
}

/// One implementation per capability
#[derive(Clone)]
pub struct Platform {
    pub oracle: Arc<dyn MountOracle>,
    pub mounter: Arc<dyn Mounter>,
    pub flash: Arc<dyn FlashDriver>,
    pub mmc: Arc<dyn MmcDriver>,
    pub tools: Arc<dyn ToolRunner>,
    pub progress: Arc<dyn ProgressSink>,
}

impl Platform {
    /// Kernel-backed capabilities with progress printed to stdout
    pub fn linux() -> Self {
        Self::linux_with_progress(Arc::new(ConsoleProgress))
    }

    pub fn linux_with_progress(progress: Arc<dyn ProgressSink>) -> Self {
        Self {
            oracle: Arc::new(ProcMounts),
            mounter: Arc::new(KernelMounter),
            flash: Arc::new(recovery_sys::MtdDevices::new()),
            mmc: Arc::new(recovery_sys::MmcDevices::new()),
            tools: Arc::new(ProcessTools),
            progress,
        }
    }
}
