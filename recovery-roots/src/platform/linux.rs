// SPDX-License-Identifier: GPL-3.0-only

use std::fs::DirBuilder;
use std::io::{ErrorKind, Write};
use std::os::unix::fs::DirBuilderExt;
use std::path::Path;

use recovery_sys::{MmcDevices, MtdDevices, MtdWriter, SysError, ToolChild};
use recovery_types::{
    FlashPartition, MmcPartition, MountFlags, MountedVolume, MountedVolumes, ToolStatus,
};

use super::{
    FlashDriver, FlashWriter, MmcDriver, MountOracle, Mounter, ProgressSink, SysResult,
    ToolProcess, ToolRunner,
};

/// Mount table read from `/proc/mounts`
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcMounts;

impl MountOracle for ProcMounts {
    fn scan(&self) -> SysResult<MountedVolumes> {
        recovery_sys::scan_mounted_volumes()
    }

    fn unmount(&self, volume: &MountedVolume) -> SysResult<()> {
        recovery_sys::unmount_volume(volume)
    }
}

/// `mount(2)` plus the external `mount` tool
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelMounter;

impl Mounter for KernelMounter {
    fn mount(
        &self,
        device: &str,
        target: &Path,
        fs_type: &str,
        flags: MountFlags,
        data: &str,
    ) -> SysResult<()> {
        recovery_sys::mount_device(device, target, fs_type, flags, data)
    }

    fn mount_with_tool(
        &self,
        device: &str,
        target: &Path,
        fs_type: &str,
        options: &str,
    ) -> SysResult<()> {
        recovery_sys::mount_with_tool(device, target, fs_type, options)
    }

    fn prepare_mount_point(&self, path: &Path) -> SysResult<()> {
        match DirBuilder::new().mode(0o755).create(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(SysError::Io(e)),
        }
    }
}

impl FlashDriver for MtdDevices {
    fn scan_partitions(&self) -> SysResult<usize> {
        MtdDevices::scan_partitions(self)
    }

    fn find_by_name(&self, name: &str) -> Option<FlashPartition> {
        MtdDevices::find_by_name(self, name)
    }

    fn mount(
        &self,
        partition: &FlashPartition,
        mount_point: &Path,
        fs_type: &str,
        flags: MountFlags,
    ) -> SysResult<()> {
        self.mount_partition(partition, mount_point, fs_type, flags)
    }

    fn open_for_write(&self, partition: &FlashPartition) -> SysResult<Box<dyn FlashWriter>> {
        Ok(Box::new(MtdDevices::open_for_write(self, partition)?))
    }
}

impl FlashWriter for MtdWriter {
    fn erase_blocks(&mut self, count: Option<u32>) -> SysResult<u64> {
        MtdWriter::erase_blocks(self, count)
    }

    fn close(self: Box<Self>) -> SysResult<()> {
        MtdWriter::close(*self)
    }
}

impl MmcDriver for MmcDevices {
    fn scan_partitions(&self) -> SysResult<usize> {
        MmcDevices::scan_partitions(self)
    }

    fn find_by_name(&self, name: &str) -> Option<MmcPartition> {
        MmcDevices::find_by_name(self, name)
    }

    fn format_ext3(&self, partition: &MmcPartition) -> SysResult<ToolStatus> {
        MmcDevices::format_ext3(self, partition)
    }
}

/// Tools run as child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessTools;

impl ToolRunner for ProcessTools {
    fn run(&self, program: &Path, args: &[String]) -> SysResult<ToolStatus> {
        recovery_sys::run_tool(program, args)
    }

    fn spawn(&self, program: &Path, args: &[String]) -> SysResult<Box<dyn ToolProcess>> {
        Ok(Box::new(recovery_sys::spawn_tool(program, args)?))
    }

    fn prepare_mtab(&self) -> SysResult<()> {
        recovery_sys::create_mtab()
    }
}

impl ToolProcess for ToolChild {
    fn try_wait(&mut self) -> SysResult<Option<ToolStatus>> {
        ToolChild::try_wait(self)
    }

    fn kill(&mut self) -> SysResult<ToolStatus> {
        ToolChild::kill(self)
    }
}

/// Progress markers on stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn print(&self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
        let _ = stdout.flush();
    }
}
