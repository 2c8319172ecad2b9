// SPDX-License-Identifier: GPL-3.0-only

//! External tool execution and the filesystem scaffolding those tools expect

use std::fs::{self, File};
use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::sys::stat::{Mode, SFlag, makedev, mknod};
use recovery_types::ToolStatus;
use tracing::{debug, info, warn};

use crate::error::{Result, SysError};

const LOOP_MAJOR: u64 = 7;

static LOOP_NODES_READY: AtomicBool = AtomicBool::new(false);

fn tool_status(status: ExitStatus) -> ToolStatus {
    match (status.code(), status.signal()) {
        (Some(code), _) => ToolStatus::Exited(code),
        (None, Some(signal)) => ToolStatus::Signaled(signal),
        (None, None) => ToolStatus::Exited(-1),
    }
}

fn command(program: &Path, args: &[String]) -> Command {
    let mut command = Command::new(program);
    command.args(args);
    command
}

/// Run a tool to completion. Output goes to the inherited stdout/stderr.
pub fn run_tool(program: &Path, args: &[String]) -> Result<ToolStatus> {
    debug!("Running {} {}", program.display(), args.join(" "));
    let status = command(program, args).status().map_err(|e| {
        SysError::OperationFailed(format!("Failed to execute {}: {e}", program.display()))
    })?;
    Ok(tool_status(status))
}

/// Start a tool without waiting for it
pub fn spawn_tool(program: &Path, args: &[String]) -> Result<ToolChild> {
    info!("Spawning {} {}", program.display(), args.join(" "));
    let child = command(program, args).spawn().map_err(|e| {
        SysError::OperationFailed(format!("Failed to execute {}: {e}", program.display()))
    })?;
    Ok(ToolChild { child })
}

/// A running external tool
#[derive(Debug)]
pub struct ToolChild {
    child: Child,
}

impl ToolChild {
    /// Non-blocking completion check
    pub fn try_wait(&mut self) -> Result<Option<ToolStatus>> {
        Ok(self.child.try_wait()?.map(tool_status))
    }

    /// Kill the tool and reap it
    pub fn kill(&mut self) -> Result<ToolStatus> {
        self.child.kill()?;
        Ok(tool_status(self.child.wait()?))
    }
}

/// Make sure `/etc/mtab` exists; e2fsck and mke2fs refuse to run without it
pub fn create_mtab() -> Result<()> {
    create_mtab_in(Path::new("/etc"))
}

pub(crate) fn create_mtab_in(etc: &Path) -> Result<()> {
    let mtab = etc.join("mtab");
    if File::open(&mtab).is_ok() {
        return Ok(());
    }

    if !etc.is_dir() {
        // A dangling symlink or a stray file where /etc should be
        match fs::remove_file(etc) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {e}", etc.display()),
        }
        fs::create_dir_all(etc)?;
    }

    File::create(&mtab)?;
    debug!("Created {}", mtab.display());
    Ok(())
}

/// Create `/dev/loop0` .. `/dev/loop{count-1}` block nodes.
///
/// Succeeds without doing anything once all nodes have been created in this
/// process.
pub fn ensure_loop_nodes(count: u32) -> Result<()> {
    if LOOP_NODES_READY.load(Ordering::Relaxed) {
        return Ok(());
    }

    ensure_loop_nodes_in(Path::new("/dev"), count)?;
    LOOP_NODES_READY.store(true, Ordering::Relaxed);
    Ok(())
}

pub(crate) fn ensure_loop_nodes_in(dev: &Path, count: u32) -> Result<()> {
    let mut failures = Vec::new();

    for index in 0..count {
        let node = dev.join(format!("loop{index}"));
        if let Ok(metadata) = fs::metadata(&node)
            && metadata.file_type().is_block_device()
        {
            continue;
        }

        if let Err(e) = mknod(
            &node,
            SFlag::S_IFBLK,
            Mode::from_bits_truncate(0o600),
            makedev(LOOP_MAJOR, u64::from(index)),
        ) {
            warn!("Can't create {}: {e}", node.display());
            failures.push(node.display().to_string());
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(SysError::OperationFailed(format!(
            "Can't create loop nodes: {}",
            failures.join(", ")
        )))
    }
}
