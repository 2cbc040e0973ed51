//! vram-lock
//!
//! Fills a GPU with verified slices until allocation fails, then keeps only
//! the slices whose readbacks disagreed and sleeps forever.

use std::convert::Infallible;

use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use tracing::info;
use vramlock_cli::{Cli, exit, resolve_backend};
use vramlock_core::screen::TerminalScreen;
use vramlock_core::{BackendKind, DeviceMemory, LockConfig, Session};

fn main() {
    let cli = Cli::parse();

    let err = match run(&cli) {
        Ok(never) => match never {},
        Err(err) => err,
    };

    eprintln!("{} {err}", style("ERROR:").for_stderr().red().bold());
    for cause in err.chain().skip(1) {
        eprintln!("  Caused by: {cause}");
    }
    std::process::exit(exit::exit_code_for(&err));
}

fn run(cli: &Cli) -> Result<Infallible> {
    let config = cli.resolve_config()?;
    setup_logging(&config.log_level);

    let backend = resolve_backend(config.backend)?;
    info!(%backend, device_index = config.device_index, "opening device");

    match backend {
        #[cfg(feature = "cuda")]
        BackendKind::Cuda => lock_device(vramlock_cuda::CudaMemory::open(config.device_index)?, &config),
        #[cfg(feature = "vulkan")]
        BackendKind::Vulkan => {
            let memory =
                vramlock_vulkan::VulkanMemory::open(config.device_index, config.slice_bytes())?;
            lock_device(memory, &config)
        }
        #[allow(unreachable_patterns)]
        other => anyhow::bail!("backend {other} is not compiled into this build"),
    }
}

/// Run the session to exhaustion and park holding the faulty slices.
fn lock_device<B: DeviceMemory>(backend: B, config: &LockConfig) -> Result<Infallible> {
    let mut screen = TerminalScreen::stdout().context("failed to prepare the terminal")?;
    let parked = Session::new(backend, config).run(&mut screen)?;
    parked.park(&mut screen)
}

/// Setup logging; `RUST_LOG` wins over the configured level.
fn setup_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
