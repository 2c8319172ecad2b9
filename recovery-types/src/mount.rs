// SPDX-License-Identifier: GPL-3.0-only

//! Mount flags and live mount table snapshots

use std::path::{Path, PathBuf};

use enumflags2::{BitFlags, bitflags, make_bitflags};

/// Kernel mount flags used by the recovery layer
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountFlag {
    NoSuid = 1 << 0,
    NoDev = 1 << 1,
    NoAtime = 1 << 2,
    NoDirAtime = 1 << 3,
}

pub type MountFlags = BitFlags<MountFlag>;

/// Flags applied to direct mounts of roots without recorded options and to
/// secondary-device fallbacks
pub const DEFAULT_MOUNT_FLAGS: MountFlags = make_bitflags!(MountFlag::{NoAtime | NoDev | NoDirAtime});

/// One entry of the live mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountedVolume {
    pub device: String,
    pub mount_point: PathBuf,
    pub filesystem: String,
    pub options: String,
}

/// Snapshot of the live mount table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountedVolumes {
    volumes: Vec<MountedVolume>,
}

impl MountedVolumes {
    pub fn new(volumes: Vec<MountedVolume>) -> Self {
        Self { volumes }
    }

    /// Last entry mounted at `mount_point`; later entries shadow earlier ones
    pub fn find_by_mount_point(&self, mount_point: &Path) -> Option<&MountedVolume> {
        self.volumes
            .iter()
            .rev()
            .find(|volume| volume.mount_point == mount_point)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MountedVolume> {
        self.volumes.iter()
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}
