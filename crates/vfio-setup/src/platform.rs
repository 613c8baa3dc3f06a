//! Platform capabilities the pipeline relies on but does not own.
//!
//! Control-file reads and writes go straight to the filesystem under the
//! configured [`SysfsLayout`]. Everything else (privilege, module status and
//! activation, `lspci` diagnostics, waiting for the kernel) sits behind
//! [`Platform`] so it can be replaced in tests.

use anyhow::{bail, Context, Result};
use std::process::Command;
use std::time::Duration;
use tracing::debug;
use vfio_layout::{normalize_module_name, DeviceAddress, SysfsLayout};

/// External capabilities used by the setup pipeline.
pub trait Platform {
    /// Whether the effective user may write kernel control files.
    fn is_privileged(&self) -> bool;

    /// Names of the currently active kernel modules.
    ///
    /// # Errors
    ///
    /// Returns error if the module listing cannot be obtained.
    fn active_modules(&self) -> Result<Vec<String>>;

    /// Ask the kernel to activate a module.
    ///
    /// # Errors
    ///
    /// Returns error if the activation request is rejected.
    fn load_module(&self, name: &str) -> Result<()>;

    /// Human-readable listing of all PCI devices.
    ///
    /// # Errors
    ///
    /// Returns error if the listing tool is unavailable or fails.
    fn list_pci_devices(&self) -> Result<String>;

    /// Human-readable description of one device.
    ///
    /// # Errors
    ///
    /// Returns error if the listing tool is unavailable or fails.
    fn describe_device(&self, address: &DeviceAddress) -> Result<String>;

    /// Give the kernel time to apply a control-file write.
    fn settle(&self, delay: Duration);
}

impl<P: Platform + ?Sized> Platform for &P {
    fn is_privileged(&self) -> bool {
        (**self).is_privileged()
    }

    fn active_modules(&self) -> Result<Vec<String>> {
        (**self).active_modules()
    }

    fn load_module(&self, name: &str) -> Result<()> {
        (**self).load_module(name)
    }

    fn list_pci_devices(&self) -> Result<String> {
        (**self).list_pci_devices()
    }

    fn describe_device(&self, address: &DeviceAddress) -> Result<String> {
        (**self).describe_device(address)
    }

    fn settle(&self, delay: Duration) {
        (**self).settle(delay);
    }
}

/// The live system: `lsmod`, `modprobe`, `lspci`, real sleeps.
#[derive(Debug, Clone)]
pub struct SystemPlatform {
    layout: SysfsLayout,
}

impl SystemPlatform {
    /// Platform whose built-in module lookup reads under `layout`'s sysfs root.
    pub fn new(layout: &SysfsLayout) -> Self {
        Self {
            layout: layout.clone(),
        }
    }

    /// Built-in modules never show up in `lsmod`. They still get a
    /// `/sys/module/<name>` directory, but without `initstate`.
    fn builtin_modules(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.layout.modules_dir()) else {
            return Vec::new();
        };

        entries
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .filter(|name| !self.layout.module_dir(name).join("initstate").exists())
            .collect()
    }
}

impl Default for SystemPlatform {
    fn default() -> Self {
        Self::new(&SysfsLayout::system())
    }
}

impl Platform for SystemPlatform {
    fn is_privileged(&self) -> bool {
        rustix::process::geteuid().is_root()
    }

    fn active_modules(&self) -> Result<Vec<String>> {
        let output = Command::new("lsmod").output().context("Failed to run lsmod")?;
        if !output.status.success() {
            bail!("lsmod exited with {}", output.status);
        }

        let mut modules = parse_lsmod(&String::from_utf8_lossy(&output.stdout));
        modules.extend(self.builtin_modules());
        Ok(modules)
    }

    fn load_module(&self, name: &str) -> Result<()> {
        let output = Command::new("modprobe")
            .arg(name)
            .output()
            .context("Failed to run modprobe")?;

        if !output.status.success() {
            bail!(
                "modprobe {name} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    fn list_pci_devices(&self) -> Result<String> {
        run_lspci(&[])
    }

    fn describe_device(&self, address: &DeviceAddress) -> Result<String> {
        run_lspci(&["-v", "-s", &address.canonical()])
    }

    fn settle(&self, delay: Duration) {
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }
}

fn run_lspci(args: &[&str]) -> Result<String> {
    let output = Command::new("lspci")
        .args(args)
        .output()
        .context("Failed to run lspci")?;

    if !output.status.success() {
        bail!("lspci exited with {}", output.status);
    }
    Ok(String::from_utf8(output.stdout)?)
}

/// Module names from `lsmod` output (first column, header skipped).
pub fn parse_lsmod(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|name| *name != "Module")
        .map(normalize_module_name)
        .collect()
}

/// Exact (normalised) membership test against a module listing.
pub fn module_listed(modules: &[String], name: &str) -> bool {
    let wanted = normalize_module_name(name);
    let found = modules.iter().any(|m| normalize_module_name(m) == wanted);
    debug!(module = %wanted, found, "Module status");
    found
}
