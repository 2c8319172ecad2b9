// SPDX-License-Identifier: GPL-3.0-only

//! Canonical data model for recovery roots
//!
//! A *root* is a symbolic prefix such as `SYSTEM:` naming one logical volume of
//! the device. This crate holds the types shared by every layer:
//!
//! - **recovery-sys**: fills `MountedVolumes`, `FlashPartition` and `MmcPartition`
//!   from the running kernel
//! - **recovery-roots**: resolves, mounts, probes and formats `RootDescriptor`s
//! - **recovery-cli**: loads a `TableConfig` and prints descriptors
//!
//! Device and filesystem "sentinels" are closed enum variants, so a raw flash
//! root and a filesystem literally called `raw` can never be confused.

pub mod error;
pub mod mount;
pub mod partition;
pub mod root;
pub mod table;
pub mod tool;

pub use error::TableError;
pub use mount::{DEFAULT_MOUNT_FLAGS, MountFlag, MountFlags, MountedVolume, MountedVolumes};
pub use partition::{FlashPartition, MmcPartition};
pub use root::{DeviceKind, FsKind, RootDescriptor, ROOT_SEPARATOR};
pub use table::{TableConfig, default_roots};
pub use tool::ToolStatus;
