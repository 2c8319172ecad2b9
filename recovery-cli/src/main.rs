// SPDX-License-Identifier: GPL-3.0-only

//! Recovery roots - inspect, mount, probe and format the device's logical volumes

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recovery_roots::{MountState, Platform, Roots};
use recovery_types::{RootDescriptor, TableConfig};
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_FILTER: &str = "recovery_roots=info,recovery_sys=info,warn";
const VERBOSE_FILTER: &str = "recovery_roots=debug,recovery_sys=debug,info";

#[derive(Parser)]
#[command(name = "recovery-roots")]
#[command(about = "Resolve, mount and format recovery roots", long_about = None)]
struct Cli {
    /// Root table (TOML); the built-in table is used when absent
    #[arg(long, env = "RECOVERY_ROOTS_TABLE")]
    table: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the root table
    List,
    /// Show the descriptor a root path resolves to
    Resolve { root: String },
    /// Translate a symbolic path such as SYSTEM:lib into a filesystem path
    Translate { path: String },
    /// Report whether a root is mounted
    Status { root: String },
    /// Mount a root unless it is already mounted
    Mount { root: String },
    /// Unmount a root if it is mounted
    Unmount { root: String },
    /// Erase or reformat a root
    Format { root: String },
    /// Detect the filesystems of probed roots
    Probe,
    /// Create /dev/loopN nodes for loop-mounted images
    PrepareLoop {
        #[arg(default_value_t = 8)]
        count: u32,
    },
    /// Bind an update archive to the package root and translate a path in it
    Package {
        root: String,
        /// Archive served under the package root
        #[arg(long)]
        archive: PathBuf,
    },
}

impl Commands {
    fn needs_root(&self) -> bool {
        matches!(
            self,
            Commands::Mount { .. }
                | Commands::Unmount { .. }
                | Commands::Format { .. }
                | Commands::Probe
                | Commands::PrepareLoop { .. }
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    };
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if cli.command.needs_root() && unsafe { libc::geteuid() } != 0 {
        tracing::error!("This command must run as root");
        anyhow::bail!("Command needs root privileges");
    }

    let config = load_table(cli.table.as_deref())?;
    let mut roots: Roots<PathBuf> = Roots::new(config, Platform::linux());

    match cli.command {
        Commands::List => {
            for root in roots.descriptors() {
                println!("{}", describe(root));
            }
        }
        Commands::Resolve { root } => {
            let descriptor = roots
                .resolve(&root)
                .with_context(|| format!("No root matches {root:?}"))?;
            println!("{}", describe(descriptor));
        }
        Commands::Translate { path } => {
            let translated = roots
                .translate_path(&path)
                .with_context(|| format!("Failed to translate {path}"))?;
            println!("{}", translated.display());
        }
        Commands::Status { root } => {
            let state = roots
                .is_mounted(&root)
                .with_context(|| format!("Failed to check {root}"))?;
            let state = match state {
                MountState::Mounted => "mounted",
                MountState::Unmounted => "unmounted",
                MountState::NotApplicable => "not mountable",
            };
            println!("{root} {state}");
        }
        Commands::Mount { root } => {
            roots
                .ensure_mounted(&root)
                .with_context(|| format!("Failed to mount {root}"))?;
        }
        Commands::Unmount { root } => {
            roots
                .ensure_unmounted(&root)
                .with_context(|| format!("Failed to unmount {root}"))?;
        }
        Commands::Format { root } => {
            roots
                .format(&root)
                .with_context(|| format!("Failed to format {root}"))?;
        }
        Commands::Probe => probe(&mut roots),
        Commands::PrepareLoop { count } => {
            recovery_sys::ensure_loop_nodes(count)
                .with_context(|| format!("Failed to create {count} loop nodes"))?;
        }
        Commands::Package { root, archive } => {
            let path = archive.display().to_string();
            roots.register_package_root(Some(Arc::new(archive)), &path)?;
            let (relative, bound) = roots
                .translate_package_root(&root)
                .with_context(|| format!("Failed to translate {root}"))?;
            println!("{}: {relative}", bound.display());
        }
    }

    Ok(())
}

fn load_table(path: Option<&Path>) -> Result<TableConfig> {
    let Some(path) = path else {
        tracing::debug!("Using built-in root table");
        return Ok(TableConfig::default());
    };

    let config = TableConfig::load(path)
        .with_context(|| format!("Failed to load root table {}", path.display()))?;
    for name in config.duplicate_prefixes() {
        tracing::warn!("Root {name} is listed more than once; only the first entry is used");
    }
    tracing::info!(
        "Loaded {} roots from {}",
        config.roots.len(),
        path.display()
    );
    Ok(config)
}

fn probe(roots: &mut Roots<PathBuf>) {
    roots.request_recheck();

    // Any resolution runs the pending probe
    let Some(first) = roots.descriptors().first().map(|root| root.name.clone()) else {
        return;
    };
    roots.resolve(&first);

    for root in roots.descriptors().iter().filter(|root| root.probe) {
        println!("{}", describe(root));
    }
}

fn describe(root: &RootDescriptor) -> String {
    let or_dash = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());
    format!(
        "{:<10} {:<28} {:<10} {:<9} {}",
        root.name,
        or_dash(root.device.as_ref().map(ToString::to_string)),
        or_dash(root.mount_path().map(|path| path.display().to_string())),
        or_dash(root.filesystem.as_ref().map(ToString::to_string)),
        or_dash(root.filesystem_options.clone()),
    )
}
