// SPDX-License-Identifier: GPL-3.0-only

//! Binding of the package root to an update archive

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{Result, RootsError};
use crate::roots::Roots;

/// Archive currently served under the package root
#[derive(Debug)]
pub(crate) struct PackageBinding<A> {
    pub(crate) archive: Arc<A>,
    pub(crate) path: String,
}

impl<A> Roots<A> {
    /// Bind `archive` (opened from `path`) to the package root, replacing any
    /// previous binding. `None` clears the binding.
    pub fn register_package_root(&mut self, archive: Option<Arc<A>>, path: &str) -> Result<()> {
        let Some(archive) = archive else {
            if let Some(previous) = self.package.take() {
                debug!("Released package binding for {}", previous.path);
            }
            return Ok(());
        };

        let mut owned = String::new();
        owned
            .try_reserve_exact(path.len())
            .map_err(|_| RootsError::AllocationFailed)?;
        owned.push_str(path);

        info!("Bound package root to {owned}");
        self.package = Some(PackageBinding {
            archive,
            path: owned,
        });
        Ok(())
    }

    /// Path the current package was registered with
    pub fn package_path(&self) -> Option<&str> {
        self.package.as_ref().map(|binding| binding.path.as_str())
    }

    /// True when `root_path` names the package root and a package is bound
    pub fn is_package_root(&mut self, root_path: &str) -> bool {
        let Some(index) = self.resolve_index(root_path) else {
            return false;
        };
        self.table[index].is_package() && self.package.is_some()
    }

    /// Strip the package prefix, returning the archive-relative path and the
    /// bound archive
    pub fn translate_package_root(&mut self, root_path: &str) -> Result<(String, Arc<A>)> {
        self.translate_package_root_within(root_path, usize::MAX)
    }

    pub fn translate_package_root_within(
        &mut self,
        root_path: &str,
        capacity: usize,
    ) -> Result<(String, Arc<A>)> {
        let index = self.require(root_path)?;
        let root = &self.table[index];
        if !root.is_package() {
            return Err(RootsError::UnresolvableRoot(root_path.to_string()));
        }

        let relative = &root_path[root.name.len()..];
        if relative.len().saturating_add(1) > capacity {
            return Err(RootsError::BufferTooSmall { capacity });
        }

        let archive = self
            .bound_archive()
            .ok_or_else(|| RootsError::PackageNotBound(root.name.clone()))?;
        Ok((relative.to_string(), archive))
    }
}
