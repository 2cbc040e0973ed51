//! Argument parsing and configuration merging for the `vram-lock` binary.

use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use vramlock_core::{BackendKind, ConfigError, LockConfig, LockError};

pub mod exit;

/// vram-lock - find unstable accelerator memory and keep it out of circulation
#[derive(Debug, Parser)]
#[command(name = "vram-lock")]
#[command(version)]
#[command(about = "Allocate, verify and lock faulty GPU memory")]
#[command(long_about = r#"
Allocates fixed-size slices of device memory until the device is full.
Each slice is filled with 0xA5 and read back twice; if the two copies differ
the slice is marked faulty and kept allocated. Once allocation fails every
healthy slice is freed and the process sleeps forever, holding only the
faulty memory so nothing else can be placed there.

Examples:
  # Device 0, 512 MiB slices
  vram-lock

  # Device 1, 256 MiB slices, through Vulkan
  vram-lock --backend vulkan 1 256
"#)]
pub struct Cli {
    /// Zero-based device index [default: 0]
    #[arg(value_name = "DEVICE_INDEX")]
    pub device_index: Option<u32>,

    /// Slice size in MiB [default: 512]
    #[arg(value_name = "SLICE_MEBIBYTES", value_parser = clap::value_parser!(u32).range(1..))]
    pub slice_mib: Option<u32>,

    /// Memory API to test through (cuda, vulkan)
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<BackendKind>,

    /// Configuration file path
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Glyphs per row of the slice map
    #[arg(long, value_name = "N")]
    pub columns: Option<usize>,
}

impl Cli {
    /// Defaults, then the config file, then `VRAMLOCK_*`, then these arguments.
    pub fn resolve_config(&self) -> Result<LockConfig, LockError> {
        let mut config = LockConfig::layered(self.config.as_deref())?;
        if let Some(backend) = self.backend {
            config.backend = Some(backend);
        }
        if let Some(index) = self.device_index {
            config.device_index = index;
        }
        if let Some(mib) = self.slice_mib {
            config.slice_mib = mib;
        }
        if let Some(columns) = self.columns {
            config.map_columns = columns;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

/// Build the clap command, for tests and completions.
pub fn build_cli() -> clap::Command {
    Cli::command()
}

/// Backends compiled into this binary, in order of preference.
pub fn compiled_backends() -> Vec<BackendKind> {
    let mut kinds = Vec::new();
    if cfg!(feature = "cuda") {
        kinds.push(BackendKind::Cuda);
    }
    if cfg!(feature = "vulkan") {
        kinds.push(BackendKind::Vulkan);
    }
    kinds
}

/// The backend to use: the requested one if compiled in, else the first compiled.
pub fn resolve_backend(requested: Option<BackendKind>) -> Result<BackendKind, LockError> {
    let compiled = compiled_backends();
    match requested {
        Some(kind) if compiled.contains(&kind) => Ok(kind),
        Some(kind) => Err(ConfigError::Validation(format!(
            "backend {kind} is not compiled into this build"
        ))
        .into()),
        None => compiled.first().copied().ok_or_else(|| {
            ConfigError::Validation("no backend compiled into this build".into()).into()
        }),
    }
}
