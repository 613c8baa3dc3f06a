//! `vfio-setup`: hand a PCI device to vfio-pci.
//!
//! ```text
//! USAGE:
//!   vfio-setup <addr>              Rebind the device and open its VFIO group (root)
//!   vfio-setup --status <addr>     Show the device's current state
//!
//!   <addr> is BB:SS.F (e.g. 22:00.0) or DDDD:BB:SS.F (e.g. 0000:22:00.0)
//! ```
//!
//! Exit status: 0 on success, 1 on a setup failure, 130 when interrupted,
//! 2 on bad arguments.

use anyhow::{bail, Result};
use clap::Parser;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vfio_layout::DeviceAddress;
use vfio_setup::{RunError, SetupConfig, SetupReport, SystemPlatform, VfioSetup};

/// Raised by the SIGINT handler, polled by the pipeline between stages.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

const EXIT_FAILURE: u8 = 1;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(
    name = "vfio-setup",
    about = "Bind a PCI device to vfio-pci and open its IOMMU group to user space",
    version,
    after_help = "Examples:\n  vfio-setup 22:00.0\n  vfio-setup 0000:22:00.0\n  vfio-setup --status 22:00.0"
)]
struct Cli {
    /// PCI address: BB:SS.F (domain 0000 assumed) or DDDD:BB:SS.F.
    device: DeviceAddress,

    /// Log every step, including diagnostics.
    #[arg(short, long)]
    verbose: bool,

    /// Only print the device's current state; changes nothing.
    #[arg(long)]
    status: bool,

    /// Wait this long (ms) after each control write before reading back.
    #[arg(long, value_name = "MS")]
    settle_ms: Option<u64>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let mut config = SetupConfig::from_env();
    if let Some(ms) = cli.settle_ms {
        config = config.with_settle_delay(Duration::from_millis(ms));
    }
    let platform = SystemPlatform::new(&config.layout);
    let setup = VfioSetup::new(config, platform);

    if cli.status {
        println!("{}", setup.status(&cli.device));
        return Ok(ExitCode::SUCCESS);
    }

    install_interrupt_handler()?;

    match setup.run(&cli.device, &INTERRUPTED) {
        Ok(report) => {
            print_summary(&setup, &report);
            Ok(ExitCode::SUCCESS)
        }
        Err(RunError::Failed(failure)) => {
            error!("Setup failed: {failure}");
            for line in failure.error.remediation() {
                error!("{line}");
            }
            Ok(ExitCode::from(EXIT_FAILURE))
        }
        Err(interrupted @ RunError::Interrupted { .. }) => {
            error!("Setup {interrupted}");
            Ok(ExitCode::from(EXIT_INTERRUPTED))
        }
    }
}

extern "C" fn on_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
    // SAFETY: signal(2) is async-signal-safe; a second ^C gets the default
    // disposition and terminates the process.
    unsafe {
        libc::signal(libc::SIGINT, libc::SIG_DFL);
    }
}

fn install_interrupt_handler() -> Result<()> {
    let handler = on_sigint as extern "C" fn(libc::c_int);
    // SAFETY: the handler only stores to an atomic and resets the disposition.
    let previous = unsafe { libc::signal(libc::SIGINT, handler as libc::sighandler_t) };
    if previous == libc::SIG_ERR {
        bail!("failed to install SIGINT handler: {}", std::io::Error::last_os_error());
    }
    Ok(())
}

fn print_summary(setup: &VfioSetup<SystemPlatform>, report: &SetupReport) {
    for warning in &report.warnings {
        warn!("{warning}");
    }

    println!();
    println!("{report}");

    if let Some(description) = setup.describe(&report.status.address) {
        println!();
        println!("Device Information:");
        println!("{}", "=".repeat(50));
        println!("{}", description.trim_end());
    }

    println!();
    println!("VFIO Status:");
    println!("{}", "=".repeat(30));
    println!("{}", report.status);
    println!();

    info!("Device is now ready for VFIO access!");
    info!(
        "Open {} (with {}) from a VFIO-based application; no root needed while its mode stays {:o}.",
        report.group_node.display(),
        report.container_node.display(),
        setup.config().node_mode
    );
}
