// SPDX-License-Identifier: GPL-3.0-only

//! Formatting of roots
//!
//! Flash partitions are erased in place, eMMC partitions go through the
//! driver's ext3 formatter and block devices through an external formatter
//! supervised until it exits.

use std::path::{Path, PathBuf};
use std::time::Instant;

use recovery_sys::SysError;
use recovery_types::{DeviceKind, FsKind, RootDescriptor};
use tracing::{debug, error, info, warn};

use crate::error::{EraseStage, Result, RootsError};
use crate::mount::unmount_root;
use crate::platform::Platform;
use crate::roots::{FormatSettings, Roots};

const MKE2FS: &str = "/sbin/mke2fs";
const STL_FORMAT: &str = "/sbin/stl.format";
const MMC_FORMAT_TOOL: &str = "mmc_format_ext3";

impl<A> Roots<A> {
    /// Wipe the root's device according to its device kind and filesystem
    pub fn format(&mut self, root_path: &str) -> Result<()> {
        let index = self.require(root_path)?;
        let root = &self.table[index];
        let Some(device) = &root.device else {
            return Err(RootsError::UnresolvableRoot(root_path.to_string()));
        };

        // Formatting a mounted filesystem corrupts it
        unmount_root(&self.platform, root)?;

        info!("Formatting {}", root.name);
        match device {
            DeviceKind::Mmc => format_mmc(&self.platform, root),
            DeviceKind::Flash => erase_flash(&self.platform, root),
            DeviceKind::Block(path) => {
                let (program, args) = formatter_command(root.filesystem_name(), path);
                if program == Path::new(MKE2FS) {
                    if let Err(e) = self.platform.tools.prepare_mtab() {
                        warn!("Can't prepare /etc/mtab: {e}");
                    }
                }
                supervise(&self.platform, &self.format_settings, root, &program, &args)
            }
        }
    }
}

fn format_mmc(platform: &Platform, root: &RootDescriptor) -> Result<()> {
    if root.filesystem_name() != Some("ext3") {
        return Err(unsupported_format(root));
    }

    let name = root
        .partition_name
        .as_deref()
        .ok_or_else(|| RootsError::PartitionNotFound {
            name: root.name.clone(),
        })?;

    platform.mmc.scan_partitions()?;
    let partition = platform
        .mmc
        .find_by_name(name)
        .ok_or_else(|| RootsError::PartitionNotFound {
            name: name.to_string(),
        })?;

    let status = platform.mmc.format_ext3(&partition)?;
    if !status.success() {
        error!("Can't format {} as ext3: {status}", partition.device_path.display());
        return Err(RootsError::ExternalToolFailed {
            tool: MMC_FORMAT_TOOL.to_string(),
            root: root.name.clone(),
            status,
        });
    }
    Ok(())
}

fn unsupported_format(root: &RootDescriptor) -> RootsError {
    let filesystem = root
        .filesystem
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
    error!("Don't know how to format {} as {filesystem:?}", root.name);
    RootsError::UnsupportedFormat {
        root: root.name.clone(),
        filesystem,
    }
}

fn erase_flash(platform: &Platform, root: &RootDescriptor) -> Result<()> {
    let erasable = match &root.filesystem {
        Some(FsKind::Raw) => true,
        Some(FsKind::Named(name)) => name == "yaffs2",
        _ => false,
    };
    if !erasable {
        return Err(unsupported_format(root));
    }

    // The partition may have been remounted behind our back
    unmount_root(platform, root)?;

    let name = root
        .partition_name
        .as_deref()
        .ok_or_else(|| RootsError::NotFlashBacked(root.name.clone()))?;
    platform.flash.scan_partitions()?;
    let partition = platform
        .flash
        .find_by_name(name)
        .ok_or_else(|| RootsError::PartitionNotFound {
            name: name.to_string(),
        })?;

    let erase_failed = |stage: EraseStage, cause: SysError| {
        error!("Can't {stage} {name} for erasing");
        RootsError::EraseFailed {
            root: root.name.clone(),
            stage,
            cause,
        }
    };

    let mut writer = platform
        .flash
        .open_for_write(&partition)
        .map_err(|cause| erase_failed(EraseStage::Open, cause))?;

    let erased = match writer.erase_blocks(None) {
        Ok(erased) => erased,
        Err(cause) => {
            if let Err(e) = writer.close() {
                warn!("Can't close {name} after failed erase: {e}");
            }
            return Err(erase_failed(EraseStage::Erase, cause));
        }
    };

    writer
        .close()
        .map_err(|cause| erase_failed(EraseStage::Close, cause))?;
    info!("Erased {erased} blocks of {name}");
    Ok(())
}

/// External formatter for a block device
fn formatter_command(filesystem: Option<&str>, device: &str) -> (PathBuf, Vec<String>) {
    match filesystem {
        Some(fs_type) if fs_type.starts_with("ext") => {
            let mut args: Vec<String> = ["-T", fs_type, "-F", "-q", "-m", "0", "-b", "4096"]
                .into_iter()
                .map(str::to_owned)
                .collect();
            if fs_type == "ext4" {
                args.push("-O".to_string());
                args.push("^huge_file,extent".to_string());
            }
            args.push(device.to_string());
            (PathBuf::from(MKE2FS), args)
        }
        _ => (PathBuf::from(STL_FORMAT), vec![device.to_string()]),
    }
}

/// Run the formatter to completion, printing a progress tick per poll
fn supervise(
    platform: &Platform,
    settings: &FormatSettings,
    root: &RootDescriptor,
    program: &Path,
    args: &[String],
) -> Result<()> {
    let tool = program.display().to_string();
    debug!("Running {tool} {}", args.join(" "));

    let mut child = platform.tools.spawn(program, args)?;
    let started = Instant::now();

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {}
            Err(e) => {
                // Don't leave the formatter running unsupervised
                if let Err(kill_error) = child.kill() {
                    warn!("Can't stop {tool}: {kill_error}");
                }
                platform.progress.print("\n");
                error!("Lost track of {tool} for {}: {e}", root.name);
                return Err(e.into());
            }
        }

        if settings
            .timeout
            .is_some_and(|timeout| started.elapsed() >= timeout)
        {
            let killed = child.kill();
            platform.progress.print("\n");
            error!("{tool} did not finish for {} ({killed:?})", root.name);
            return Err(RootsError::ExternalToolTimeout {
                tool,
                root: root.name.clone(),
            });
        }

        platform.progress.print(".");
        std::thread::sleep(settings.poll_interval);
    };
    platform.progress.print("\n");

    if !status.success() {
        error!("{tool} failed for {}: {status}", root.name);
        return Err(RootsError::ExternalToolFailed {
            tool,
            root: root.name.clone(),
            status,
        });
    }

    info!("Formatted {}", root.name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use recovery_types::{TableConfig, ToolStatus};

    use super::*;
    use crate::testing::FakeSystem;

    fn roots_with(system: &std::sync::Arc<FakeSystem>, config: TableConfig) -> Roots<String> {
        Roots::new(config, system.platform()).with_format_settings(FormatSettings {
            poll_interval: Duration::ZERO,
            timeout: None,
        })
    }

    fn ext4_data() -> TableConfig {
        let mut config = TableConfig::default();
        config.roots[2].filesystem = Some(FsKind::Named("ext4".to_string()));
        config
    }

    #[test]
    fn raw_flash_roots_are_erased_not_formatted() {
        let system = FakeSystem::new();
        system.add_flash_partition(1, "recovery");
        let mut roots = roots_with(&system, TableConfig::default());

        roots.format("RECOVERY:").unwrap();
        assert_eq!(
            system.calls(),
            vec![
                "scan",
                "scan",
                "flash-scan",
                "flash-open recovery",
                "flash-erase recovery None",
                "flash-close recovery",
            ]
        );
        assert_eq!(system.count_calls("spawn"), 0);
    }

    #[test]
    fn ext4_block_format_passes_tuning_flags() {
        let system = FakeSystem::new();
        system.mark_mounted("/dev/block/mmcblk0p2", "/data");
        system.set_spawn_result(ToolStatus::Exited(0), 2);
        let mut roots = roots_with(&system, ext4_data());

        roots.format("DATA:").unwrap();
        assert!(!system.is_mounted("/data"));
        assert!(system.has_call("prepare-mtab"));
        assert!(system.has_call(
            "spawn /sbin/mke2fs -T ext4 -F -q -m 0 -b 4096 -O ^huge_file,extent /dev/block/mmcblk0p2"
        ));
        assert_eq!(system.progress(), "..\n");
    }

    #[test]
    fn ext2_and_rfs_use_their_formatters() {
        let system = FakeSystem::new();
        let mut config = TableConfig::default();
        config.roots[2].filesystem = Some(FsKind::Named("ext2".to_string()));
        let mut roots = roots_with(&system, config);

        roots.format("DATA:").unwrap();
        assert!(system.has_call("spawn /sbin/mke2fs -T ext2 -F -q -m 0 -b 4096 /dev/block/mmcblk0p2"));

        roots.format("SYSTEM:").unwrap();
        assert!(system.has_call("spawn /sbin/stl.format /dev/block/stl9"));
        assert_eq!(system.count_calls("prepare-mtab"), 1);
    }

    #[test]
    fn formatter_failure_names_tool_and_root() {
        let system = FakeSystem::new();
        system.set_spawn_result(ToolStatus::Exited(1), 0);
        let mut roots = roots_with(&system, ext4_data());

        match roots.format("DATA:") {
            Err(RootsError::ExternalToolFailed { tool, root, status }) => {
                assert_eq!(tool, MKE2FS);
                assert_eq!(root, "DATA:");
                assert_eq!(status, ToolStatus::Exited(1));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(system.progress(), "\n");
    }

    #[test]
    fn hung_formatter_is_killed_after_timeout() {
        let system = FakeSystem::new();
        system.hang_spawned_tools();
        let mut roots = Roots::<String>::new(TableConfig::default(), system.platform())
            .with_format_settings(FormatSettings {
                poll_interval: Duration::from_millis(1),
                timeout: Some(Duration::from_millis(20)),
            });

        assert!(matches!(
            roots.format("SYSTEM:"),
            Err(RootsError::ExternalToolTimeout { .. })
        ));
        assert!(system.has_call("kill"));
        assert!(system.progress().ends_with('\n'));
    }

    #[test]
    fn erase_failures_report_their_stage() {
        for stage in [EraseStage::Open, EraseStage::Erase, EraseStage::Close] {
            let system = FakeSystem::new();
            system.add_flash_partition(0, "boot");
            system.fail_erase_at(stage);
            let mut roots = roots_with(&system, TableConfig::default());

            match roots.format("BOOT:") {
                Err(RootsError::EraseFailed { stage: failed, .. }) => assert_eq!(failed, stage),
                other => panic!("unexpected {other:?} for {stage}"),
            }

            // An opened partition is always closed again
            let expected_closes = usize::from(stage != EraseStage::Open);
            assert_eq!(system.count_calls("flash-close"), expected_closes);
        }
    }

    #[test]
    fn flash_roots_need_a_known_partition() {
        let system = FakeSystem::new();
        let mut roots = roots_with(&system, TableConfig::default());
        assert!(matches!(
            roots.format("MBM:"),
            Err(RootsError::PartitionNotFound { name }) if name == "mbm"
        ));
    }

    #[test]
    fn flash_roots_with_other_filesystems_are_refused() {
        let system = FakeSystem::new();
        system.add_flash_partition(2, "cache");
        let mut config = TableConfig::default();
        config.roots[1] = RootDescriptor::new("CACHE:")
            .device(DeviceKind::Flash)
            .partition("cache")
            .mount_point("/cache")
            .filesystem(FsKind::Named("jffs2".to_string()));
        let mut roots = roots_with(&system, config);

        assert!(matches!(
            roots.format("CACHE:"),
            Err(RootsError::UnsupportedFormat { filesystem, .. }) if filesystem == "jffs2"
        ));
        assert_eq!(system.count_calls("flash-open"), 0);
    }

    #[test]
    fn yaffs2_flash_roots_are_unmounted_and_erased() {
        let system = FakeSystem::new();
        system.add_flash_partition(2, "cache");
        system.mark_mounted("/dev/block/mtdblock2", "/cache");
        let mut config = TableConfig::default();
        config.roots[1] = RootDescriptor::new("CACHE:")
            .device(DeviceKind::Flash)
            .partition("cache")
            .mount_point("/cache")
            .filesystem(FsKind::Named("yaffs2".to_string()));
        let mut roots = roots_with(&system, config);

        roots.format("CACHE:").unwrap();
        assert!(!system.is_mounted("/cache"));
        assert!(system.has_call("flash-erase cache None"));
    }

    #[test]
    fn mmc_roots_format_only_as_ext3() {
        let system = FakeSystem::new();
        system.add_mmc_partition("userdata", "/dev/block/mmcblk0p7");
        let mut config = TableConfig::default();
        config.roots[2].device = Some(DeviceKind::Mmc);
        config.roots[2].filesystem = Some(FsKind::Named("ext3".to_string()));
        let mut roots = roots_with(&system, config.clone());

        roots.format("DATA:").unwrap();
        assert!(system.has_call("mmc-format /dev/block/mmcblk0p7"));

        system.set_mmc_format_status(ToolStatus::Exited(8));
        assert!(matches!(
            roots.format("DATA:"),
            Err(RootsError::ExternalToolFailed { tool, .. }) if tool == MMC_FORMAT_TOOL
        ));

        let other = FakeSystem::new();
        other.add_mmc_partition("userdata", "/dev/block/mmcblk0p7");
        config.roots[2].filesystem = Some(FsKind::Named("vfat".to_string()));
        let mut roots = roots_with(&other, config.clone());
        assert!(matches!(
            roots.format("DATA:"),
            Err(RootsError::UnsupportedFormat { root, filesystem })
                if root == "DATA:" && filesystem == "vfat"
        ));
        assert_eq!(other.count_calls("mmc-format"), 0);

        config.roots[2].filesystem = Some(FsKind::Named("ext3".to_string()));
        config.roots[2].partition_name = None;
        let mut roots = roots_with(&other, config);
        assert!(matches!(
            roots.format("DATA:"),
            Err(RootsError::PartitionNotFound { name }) if name == "DATA:"
        ));
    }

    #[test]
    fn formatter_is_killed_when_it_cannot_be_polled() {
        let system = FakeSystem::new();
        system.fail_spawned_waits();
        let mut roots = roots_with(&system, TableConfig::default());

        assert!(matches!(roots.format("SYSTEM:"), Err(RootsError::Sys(_))));
        assert!(system.has_call("kill"));
        assert_eq!(system.progress(), "\n");
    }

    #[test]
    fn roots_without_device_cannot_be_formatted() {
        let system = FakeSystem::new();
        let mut roots = roots_with(&system, TableConfig::default());

        for root in ["TMP:", "PACKAGE:", "nothing"] {
            assert!(matches!(
                roots.format(root),
                Err(RootsError::UnresolvableRoot(_))
            ));
        }
        assert_eq!(system.count_calls("spawn"), 0);
    }

    #[test]
    fn unmount_failure_stops_format() {
        let system = FakeSystem::new();
        system.mark_mounted("/dev/block/stl9", "/system");
        system.fail_unmounts();
        let mut roots = roots_with(&system, TableConfig::default());

        assert!(matches!(
            roots.format("SYSTEM:"),
            Err(RootsError::UnmountFailed { .. })
        ));
        assert_eq!(system.count_calls("spawn"), 0);
    }
}
