// SPDX-License-Identifier: GPL-3.0-only

//! Recording fake of every platform capability

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use recovery_sys::SysError;
use recovery_types::{
    FlashPartition, MmcPartition, MountFlags, MountedVolume, MountedVolumes, ToolStatus,
};

use crate::error::EraseStage;
use crate::platform::{
    FlashDriver, FlashWriter, MmcDriver, MountOracle, Mounter, Platform, ProgressSink, ToolProcess,
    ToolRunner,
};

#[derive(Default)]
struct State {
    calls: Vec<String>,
    mounted: Vec<MountedVolume>,
    mount_failures: HashSet<String>,
    fail_unmounts: bool,
    flash: Vec<FlashPartition>,
    mmc: Vec<MmcPartition>,
    erase_failure: Option<EraseStage>,
    run_status: Option<ToolStatus>,
    spawn_status: Option<ToolStatus>,
    spawn_polls: usize,
    spawn_hangs: bool,
    spawn_wait_fails: bool,
    mmc_format_status: Option<ToolStatus>,
    progress: String,
}

pub(crate) struct FakeSystem {
    state: Arc<Mutex<State>>,
}

impl FakeSystem {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(State::default())),
        })
    }

    pub(crate) fn platform(self: &Arc<Self>) -> Platform {
        Platform {
            oracle: self.clone(),
            mounter: self.clone(),
            flash: self.clone(),
            mmc: self.clone(),
            tools: self.clone(),
            progress: self.clone(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn log(&self, call: String) {
        log(&self.state, call);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub(crate) fn count_calls(&self, prefix: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    pub(crate) fn has_call(&self, call: &str) -> bool {
        self.state().calls.iter().any(|logged| logged == call)
    }

    pub(crate) fn mark_mounted(&self, device: &str, mount_point: &str) {
        self.state().mounted.push(MountedVolume {
            device: device.to_string(),
            mount_point: PathBuf::from(mount_point),
            filesystem: "ext4".to_string(),
            options: "rw".to_string(),
        });
    }

    pub(crate) fn is_mounted(&self, mount_point: &str) -> bool {
        self.state()
            .mounted
            .iter()
            .any(|volume| volume.mount_point == Path::new(mount_point))
    }

    pub(crate) fn mounted_points(&self) -> Vec<PathBuf> {
        self.state()
            .mounted
            .iter()
            .map(|volume| volume.mount_point.clone())
            .collect()
    }

    /// Fail mounts of `device`, or only of `device:fs_type`
    pub(crate) fn fail_mount(&self, key: &str) {
        self.state().mount_failures.insert(key.to_string());
    }

    pub(crate) fn clear_mount_failures(&self) {
        self.state().mount_failures.clear();
    }

    pub(crate) fn fail_unmounts(&self) {
        self.state().fail_unmounts = true;
    }

    pub(crate) fn add_flash_partition(&self, index: u32, name: &str) {
        self.state().flash.push(FlashPartition {
            index,
            name: name.to_string(),
            size: 0x40_0000,
            erase_size: 0x2_0000,
        });
    }

    pub(crate) fn add_mmc_partition(&self, name: &str, device_path: &str) {
        self.state().mmc.push(MmcPartition {
            name: name.to_string(),
            device_path: PathBuf::from(device_path),
        });
    }

    pub(crate) fn fail_erase_at(&self, stage: EraseStage) {
        self.state().erase_failure = Some(stage);
    }

    pub(crate) fn set_run_status(&self, status: ToolStatus) {
        self.state().run_status = Some(status);
    }

    /// Spawned tools finish with `status` after `polls` unfinished polls
    pub(crate) fn set_spawn_result(&self, status: ToolStatus, polls: usize) {
        let mut state = self.state();
        state.spawn_status = Some(status);
        state.spawn_polls = polls;
    }

    pub(crate) fn hang_spawned_tools(&self) {
        self.state().spawn_hangs = true;
    }

    pub(crate) fn fail_spawned_waits(&self) {
        self.state().spawn_wait_fails = true;
    }

    pub(crate) fn set_mmc_format_status(&self, status: ToolStatus) {
        self.state().mmc_format_status = Some(status);
    }

    pub(crate) fn progress(&self) -> String {
        self.state().progress.clone()
    }

    fn check_mount(&self, device: &str, fs_type: &str) -> Result<(), SysError> {
        let state = self.state();
        if state.mount_failures.contains(device)
            || state.mount_failures.contains(&format!("{device}:{fs_type}"))
        {
            return Err(SysError::OperationFailed(format!("mount {device} as {fs_type}")));
        }
        Ok(())
    }

    fn record_mount(&self, device: &str, target: &Path, fs_type: &str) {
        self.state().mounted.push(MountedVolume {
            device: device.to_string(),
            mount_point: target.to_path_buf(),
            filesystem: fs_type.to_string(),
            options: "rw".to_string(),
        });
    }
}

fn log(state: &Mutex<State>, call: String) {
    state.lock().unwrap().calls.push(call);
}

fn command_line(program: &Path, args: &[String]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

impl MountOracle for FakeSystem {
    fn scan(&self) -> Result<MountedVolumes, SysError> {
        self.log("scan".to_string());
        Ok(MountedVolumes::new(self.state().mounted.clone()))
    }

    fn unmount(&self, volume: &MountedVolume) -> Result<(), SysError> {
        self.log(format!("unmount {}", volume.mount_point.display()));
        let mut state = self.state();
        if state.fail_unmounts {
            return Err(SysError::OperationFailed("busy".to_string()));
        }
        if let Some(position) = state
            .mounted
            .iter()
            .rposition(|mounted| mounted.mount_point == volume.mount_point)
        {
            state.mounted.remove(position);
        }
        Ok(())
    }
}

impl Mounter for FakeSystem {
    fn mount(
        &self,
        device: &str,
        target: &Path,
        fs_type: &str,
        flags: MountFlags,
        data: &str,
    ) -> Result<(), SysError> {
        self.log(format!(
            "mount {device} {} {fs_type} {flags:?} {data:?}",
            target.display()
        ));
        self.check_mount(device, fs_type)?;
        self.record_mount(device, target, fs_type);
        Ok(())
    }

    fn mount_with_tool(
        &self,
        device: &str,
        target: &Path,
        fs_type: &str,
        options: &str,
    ) -> Result<(), SysError> {
        self.log(format!(
            "tool-mount {device} {} {fs_type} {options}",
            target.display()
        ));
        self.check_mount(device, fs_type)?;
        self.record_mount(device, target, fs_type);
        Ok(())
    }

    fn prepare_mount_point(&self, path: &Path) -> Result<(), SysError> {
        self.log(format!("mkdir {}", path.display()));
        Ok(())
    }
}

impl FlashDriver for FakeSystem {
    fn scan_partitions(&self) -> Result<usize, SysError> {
        self.log("flash-scan".to_string());
        Ok(self.state().flash.len())
    }

    fn find_by_name(&self, name: &str) -> Option<FlashPartition> {
        self.state()
            .flash
            .iter()
            .find(|partition| partition.name == name)
            .cloned()
    }

    fn mount(
        &self,
        partition: &FlashPartition,
        mount_point: &Path,
        fs_type: &str,
        _flags: MountFlags,
    ) -> Result<(), SysError> {
        self.log(format!(
            "flash-mount {} {} {fs_type}",
            partition.name,
            mount_point.display()
        ));
        let device = format!("/dev/block/mtdblock{}", partition.index);
        self.check_mount(&device, fs_type)?;
        self.record_mount(&device, mount_point, fs_type);
        Ok(())
    }

    fn open_for_write(&self, partition: &FlashPartition) -> Result<Box<dyn FlashWriter>, SysError> {
        self.log(format!("flash-open {}", partition.name));
        if self.state().erase_failure == Some(EraseStage::Open) {
            return Err(SysError::DeviceNotFound(partition.name.clone()));
        }
        Ok(Box::new(FakeWriter {
            state: self.state.clone(),
            partition: partition.clone(),
        }))
    }
}

struct FakeWriter {
    state: Arc<Mutex<State>>,
    partition: FlashPartition,
}

impl FlashWriter for FakeWriter {
    fn erase_blocks(&mut self, count: Option<u32>) -> Result<u64, SysError> {
        log(&self.state, format!("flash-erase {} {count:?}", self.partition.name));
        if self.state.lock().unwrap().erase_failure == Some(EraseStage::Erase) {
            return Err(SysError::OperationFailed("bad block".to_string()));
        }
        Ok(self.partition.size / u64::from(self.partition.erase_size))
    }

    fn close(self: Box<Self>) -> Result<(), SysError> {
        log(&self.state, format!("flash-close {}", self.partition.name));
        if self.state.lock().unwrap().erase_failure == Some(EraseStage::Close) {
            return Err(SysError::OperationFailed("sync".to_string()));
        }
        Ok(())
    }
}

impl MmcDriver for FakeSystem {
    fn scan_partitions(&self) -> Result<usize, SysError> {
        self.log("mmc-scan".to_string());
        Ok(self.state().mmc.len())
    }

    fn find_by_name(&self, name: &str) -> Option<MmcPartition> {
        self.state()
            .mmc
            .iter()
            .find(|partition| partition.name == name)
            .cloned()
    }

    fn format_ext3(&self, partition: &MmcPartition) -> Result<ToolStatus, SysError> {
        self.log(format!("mmc-format {}", partition.device_path.display()));
        Ok(self
            .state()
            .mmc_format_status
            .unwrap_or(ToolStatus::Exited(0)))
    }
}

impl ToolRunner for FakeSystem {
    fn run(&self, program: &Path, args: &[String]) -> Result<ToolStatus, SysError> {
        self.log(format!("run {}", command_line(program, args)));
        Ok(self.state().run_status.unwrap_or(ToolStatus::Exited(0)))
    }

    fn spawn(&self, program: &Path, args: &[String]) -> Result<Box<dyn ToolProcess>, SysError> {
        self.log(format!("spawn {}", command_line(program, args)));
        let state = self.state();
        Ok(Box::new(FakeProcess {
            state: self.state.clone(),
            status: state.spawn_status.unwrap_or(ToolStatus::Exited(0)),
            polls_left: state.spawn_polls,
            hangs: state.spawn_hangs,
            wait_fails: state.spawn_wait_fails,
        }))
    }

    fn prepare_mtab(&self) -> Result<(), SysError> {
        self.log("prepare-mtab".to_string());
        Ok(())
    }
}

struct FakeProcess {
    state: Arc<Mutex<State>>,
    status: ToolStatus,
    polls_left: usize,
    hangs: bool,
    wait_fails: bool,
}

impl ToolProcess for FakeProcess {
    fn try_wait(&mut self) -> Result<Option<ToolStatus>, SysError> {
        if self.wait_fails {
            return Err(SysError::OperationFailed("waitpid".to_string()));
        }
        if self.hangs {
            return Ok(None);
        }
        if self.polls_left > 0 {
            self.polls_left -= 1;
            return Ok(None);
        }
        Ok(Some(self.status))
    }

    fn kill(&mut self) -> Result<ToolStatus, SysError> {
        log(&self.state, "kill".to_string());
        self.hangs = false;
        self.status = ToolStatus::Signaled(9);
        Ok(self.status)
    }
}

impl ProgressSink for FakeSystem {
    fn print(&self, text: &str) {
        self.state().progress.push_str(text);
    }
}
