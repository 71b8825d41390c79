//! testpmd wrapper
//!
//! Binds the given NICs to the DPDK driver, starts testpmd on them and
//! exposes forwarding control over HTTP. On Ctrl+C or SIGTERM the server
//! drains, testpmd is stopped and kernel ports go back to their kernel
//! driver.
//!
//! # Usage
//!
//! ```bash
//! # Devices from the SR-IOV device plugin (PCIDEVICE_* variables)
//! sudo -E testpmd-wrapper --auto
//!
//! # Explicit devices, two queues each
//! sudo testpmd-wrapper --pci 0000:86:00.0 --pci 0000:86:00.1 --queues 2
//!
//! curl -X POST http://localhost:9000/mode/io
//! curl http://localhost:9000/stats
//! ```

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use testpmd_ctl::config::DEFAULT_HUGEPAGE_DIR;
use testpmd_ctl::engine::cpuset::parse_cpu_list;
use testpmd_ctl::{ForwardMode, Settings, SysfsBus, Testpmd};
use testpmd_wrapper::{api, devices};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Parser, Debug)]
#[command(name = "testpmd-wrapper")]
#[command(about = "Run DPDK testpmd on bound NICs and control it over HTTP")]
struct Args {
    /// HTTP listen address
    #[arg(long, default_value = "0.0.0.0:9000")]
    listen: SocketAddr,

    /// Start io forwarding as soon as testpmd is up
    #[arg(long)]
    auto: bool,

    /// Rx/tx queues per port
    #[arg(long, default_value = "1")]
    queues: u32,

    /// Rx/tx descriptor ring size
    #[arg(long, default_value = "2048")]
    ring_size: u32,

    /// PCI device to use (repeatable); defaults to PCIDEVICE* variables
    #[arg(long = "pci")]
    pci: Vec<String>,

    /// testpmd executable
    #[arg(long, default_value = "testpmd")]
    testpmd_path: PathBuf,

    /// User-space I/O driver for the devices
    #[arg(long, default_value = "vfio-pci")]
    dpdk_driver: String,

    /// Per-command prompt timeout in milliseconds
    #[arg(long, default_value = "1000")]
    command_timeout_ms: u64,

    /// Startup prompt timeout in seconds
    #[arg(long, default_value = "60")]
    start_timeout_secs: u64,

    /// hugetlbfs mount holding testpmd's hugepage files
    #[arg(long, default_value = DEFAULT_HUGEPAGE_DIR)]
    hugepage_dir: PathBuf,

    /// CPUs to draw lcores from (e.g. "2-7"); defaults to the affinity mask
    #[arg(long)]
    cpus: Option<String>,

    /// Skip depmod/modprobe for the DPDK driver
    #[arg(long)]
    no_load_driver: bool,
}

impl Args {
    fn settings(&self) -> Result<Settings, BoxError> {
        let mut settings = Settings::new()
            .command_timeout(Duration::from_millis(self.command_timeout_ms))
            .start_timeout(Duration::from_secs(self.start_timeout_secs))
            .hugepage_dir(&self.hugepage_dir)
            .load_driver(!self.no_load_driver);
        if let Some(cpus) = &self.cpus {
            settings = settings.cpus(parse_cpu_list(cpus)?);
        }
        Ok(settings)
    }
}

/// Stop testpmd, then hand devices back. Both steps always run.
fn teardown(testpmd: &mut Testpmd<SysfsBus>) -> testpmd_ctl::Result<()> {
    let stopped = testpmd.stop_session();
    let released = testpmd.release_devices();
    if let Err(e) = &released {
        error!(error = %e, "Failed to restore kernel drivers");
    }
    stopped.and(released)
}

/// Acquire devices and start testpmd, undoing partial work on failure.
fn bring_up(testpmd: &mut Testpmd<SysfsBus>, args: &Args) -> testpmd_ctl::Result<()> {
    let addresses = devices::resolve(&args.pci, env::vars())?;
    info!(devices = ?addresses, driver = %args.dpdk_driver, "Using devices");

    let result = testpmd
        .acquire_devices(&addresses, &args.dpdk_driver)
        .and_then(|_| {
            testpmd.start_session(&addresses, args.queues, args.ring_size, &args.testpmd_path)
        })
        .and_then(|_| {
            if args.auto {
                testpmd.set_forwarding_mode(ForwardMode::Io)
            } else {
                Ok(())
            }
        });

    if let Err(e) = &result {
        error!(error = %e, "Startup failed, restoring devices");
        if let Err(e) = teardown(testpmd) {
            warn!(error = %e, "Restore after failed startup incomplete");
        }
    }
    result
}

async fn serve(
    app: axum::Router,
    listen: SocketAddr,
    shutdown: CancellationToken,
) -> Result<(), BoxError> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!(addr = %listen, "Control API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    info!("Control API stopped");
    Ok(())
}

fn main() -> Result<(), BoxError> {
    // Initialize tracing - respects RUST_LOG, defaults to info if not set
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_ansi(false)
        .init();

    let args = Args::parse();
    info!(?args, "Starting testpmd wrapper");

    // Installed before any device is touched, so a signal during startup
    // still ends in teardown
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("Received termination signal, shutting down");
        cancel_clone.cancel();
    })?;

    let settings = args.settings()?;
    let mut testpmd = Testpmd::new(SysfsBus::from_settings(&settings), settings);
    bring_up(&mut testpmd, &args)?;

    let testpmd = Arc::new(Mutex::new(testpmd));
    let app = api::router(testpmd.clone());
    let served = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(BoxError::from)
        .and_then(|rt| rt.block_on(serve(app, args.listen, cancel)));
    if let Err(e) = &served {
        error!(error = %e, "Control API failed");
    }

    let mut guard = testpmd.lock().unwrap_or_else(|e| e.into_inner());
    teardown(&mut guard)?;
    info!("Shutdown complete");
    served
}
