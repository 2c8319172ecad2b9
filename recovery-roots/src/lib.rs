// SPDX-License-Identifier: GPL-3.0-only

//! Recovery root layer
//!
//! Maps symbolic paths such as `SYSTEM:lib/libc.so` onto devices and mount
//! points, mounts and unmounts roots on demand, detects the filesystem of
//! ambiguous roots and formats them. Hardware access goes through the
//! capability traits in [`platform`].

pub mod error;
mod format;
mod mount;
mod package;
pub mod platform;
mod probe;
mod roots;

#[cfg(test)]
mod testing;

pub use error::{EraseStage, Result, RootsError};
pub use platform::{
    FlashDriver, FlashWriter, MmcDriver, MountOracle, Mounter, Platform, ProgressSink, ToolProcess,
    ToolRunner,
};
pub use probe::SDCARD_IMAGE_PREFIX;
pub use roots::{FormatSettings, MountState, ProbeState, RecheckState, Roots};
