//! Fake sysfs/devfs tree and kernel for pipeline tests.
//!
//! `FakeSystem` lays out directories, control files and symlinks under a
//! temporary directory. `FakeKernel` is the `Platform`: its `settle()` plays
//! the kernel's part, applying whatever was written to `unbind`, `new_id` and
//! `bind` since the last settle, subject to the configured misbehaviour.

#![allow(dead_code)]

use anyhow::{bail, Result};
use std::cell::{Cell, RefCell};
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use vfio_setup::{DeviceAddress, Platform, SetupConfig, SysfsLayout};

pub const TARGET: &str = "vfio-pci";

/// Temporary control surface.
pub struct FakeSystem {
    _dir: TempDir,
    pub layout: SysfsLayout,
}

impl FakeSystem {
    /// Tree with IOMMU enabled, the target driver registered and the
    /// container node present.
    pub fn new() -> Self {
        let sys = Self::bare();
        fs::create_dir_all(sys.layout.iommu_groups_dir()).unwrap();
        sys.add_driver(TARGET);
        sys.add_node(&sys.layout.container_node());
        sys
    }

    /// Tree with no IOMMU groups directory and no drivers.
    pub fn bare() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = SysfsLayout::new(dir.path().join("sys"), dir.path().join("dev"));
        fs::create_dir_all(layout.pci_devices_dir()).unwrap();
        fs::create_dir_all(layout.pci_drivers_dir()).unwrap();
        fs::create_dir_all(layout.vfio_dev_dir()).unwrap();
        Self { _dir: dir, layout }
    }

    /// Config pointing at this tree with no settle delay.
    pub fn config(&self) -> SetupConfig {
        SetupConfig::default()
            .with_layout(self.layout.clone())
            .with_settle_delay(Duration::ZERO)
    }

    pub fn add_group(&self, group: &str) {
        fs::create_dir_all(self.layout.iommu_groups_dir().join(group).join("devices")).unwrap();
    }

    pub fn add_driver(&self, name: &str) {
        let dir = self.layout.driver_dir(name);
        fs::create_dir_all(&dir).unwrap();
        for file in ["bind", "unbind", "new_id"] {
            fs::write(dir.join(file), "").unwrap();
        }
    }

    pub fn remove_driver_file(&self, driver: &str, file: &str) {
        fs::remove_file(self.layout.driver_dir(driver).join(file)).unwrap();
    }

    /// Device directory with identity files and an IOMMU group link.
    pub fn add_device(&self, addr: &str, vendor: &str, device: &str, group: Option<&str>) -> DeviceAddress {
        let address: DeviceAddress = addr.parse().unwrap();
        let dir = self.layout.device_dir(&address);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("vendor"), format!("{vendor}\n")).unwrap();
        fs::write(dir.join("device"), format!("{device}\n")).unwrap();

        if let Some(group) = group {
            self.add_group(group);
            symlink(self.layout.iommu_groups_dir().join(group), dir.join("iommu_group")).unwrap();
        }
        address
    }

    pub fn bind_link(&self, address: &DeviceAddress, driver: &str) {
        let link = self.layout.device_dir(address).join("driver");
        let _ = fs::remove_file(&link);
        symlink(self.layout.driver_dir(driver), link).unwrap();
    }

    /// Device node with mode 0600.
    pub fn add_node(&self, path: &Path) {
        fs::write(path, "").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).unwrap();
    }

    pub fn add_group_node(&self, group: &str) -> PathBuf {
        let node = self.layout.group_node(group);
        self.add_node(&node);
        node
    }

    pub fn driver_of(&self, address: &DeviceAddress) -> Option<String> {
        fs::read_link(self.layout.device_dir(address).join("driver"))
            .ok()
            .and_then(|t| t.file_name().map(|n| n.to_string_lossy().to_string()))
    }

    pub fn mode_of(&self, path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    pub fn control(&self, driver: &str, file: &str) -> PathBuf {
        self.layout.driver_dir(driver).join(file)
    }
}

/// How the fake kernel reacts.
#[derive(Debug, Clone, Default)]
pub struct Behavior {
    /// Root is not available
    pub unprivileged: bool,
    /// `unbind` writes are accepted but the link stays
    pub stuck_unbind: bool,
    /// `bind` writes are accepted but nothing binds
    pub bind_ignored: bool,
    /// A `bind` to the target ends with this driver on the link instead
    pub reclaimed_by: Option<String>,
    /// Registering an id immediately binds matching unbound devices
    pub autobind_on_new_id: bool,
    /// Binding creates the group node (as the real vfio-pci does)
    pub create_group_node: bool,
    /// `modprobe` exits 0 but the module never shows up
    pub modprobe_noop: bool,
    /// `modprobe` fails outright
    pub modprobe_rejects: bool,
    /// `lspci` is unavailable
    pub lspci_missing: bool,
}

/// Platform double.
pub struct FakeKernel {
    layout: SysfsLayout,
    behavior: Behavior,
    modules: RefCell<Vec<String>>,
    pub load_requests: RefCell<Vec<String>>,
    pub registered_ids: RefCell<Vec<String>>,
    pub bind_requests: RefCell<Vec<String>>,
    pub unbind_requests: RefCell<Vec<String>>,
    pub listings: Cell<usize>,
    pub settles: Cell<usize>,
}

impl FakeKernel {
    pub fn new(system: &FakeSystem, behavior: Behavior) -> Self {
        Self {
            layout: system.layout.clone(),
            behavior,
            modules: RefCell::new(Vec::new()),
            load_requests: RefCell::new(Vec::new()),
            registered_ids: RefCell::new(Vec::new()),
            bind_requests: RefCell::new(Vec::new()),
            unbind_requests: RefCell::new(Vec::new()),
            listings: Cell::new(0),
            settles: Cell::new(0),
        }
    }

    /// Kernel with every VFIO module already active.
    pub fn with_modules(system: &FakeSystem, behavior: Behavior) -> Self {
        let kernel = Self::new(system, behavior);
        kernel.set_modules(&["vfio", "vfio_iommu_type1", "vfio_pci"]);
        kernel
    }

    pub fn set_modules(&self, modules: &[&str]) {
        *self.modules.borrow_mut() = modules.iter().map(ToString::to_string).collect();
    }

    /// Drain a control file, returning what was written to it.
    fn take(path: &Path) -> Option<String> {
        let content = fs::read_to_string(path).ok()?;
        let trimmed = content.trim().to_string();
        if trimmed.is_empty() {
            return None;
        }
        fs::write(path, "").ok()?;
        Some(trimmed)
    }

    fn device_dir(&self, addr: &str) -> PathBuf {
        self.layout.pci_devices_dir().join(addr)
    }

    fn link_driver(&self, addr: &str) -> Option<String> {
        fs::read_link(self.device_dir(addr).join("driver"))
            .ok()
            .and_then(|t| t.file_name().map(|n| n.to_string_lossy().to_string()))
    }

    fn set_link(&self, addr: &str, driver: &str) {
        let link = self.device_dir(addr).join("driver");
        let _ = fs::remove_file(&link);
        symlink(self.layout.driver_dir(driver), link).unwrap();

        if driver == TARGET && self.behavior.create_group_node {
            if let Ok(group) = fs::read_link(self.device_dir(addr).join("iommu_group")) {
                let group = group.file_name().unwrap().to_string_lossy().to_string();
                let node = self.layout.group_node(&group);
                if !node.exists() {
                    fs::write(&node, "").unwrap();
                    fs::set_permissions(&node, fs::Permissions::from_mode(0o600)).unwrap();
                }
            }
        }
    }

    fn apply_unbinds(&self) {
        let Ok(drivers) = fs::read_dir(self.layout.pci_drivers_dir()) else {
            return;
        };
        for entry in drivers.flatten() {
            let driver = entry.file_name().to_string_lossy().to_string();
            if let Some(addr) = Self::take(&entry.path().join("unbind")) {
                self.unbind_requests.borrow_mut().push(addr.clone());
                if !self.behavior.stuck_unbind && self.link_driver(&addr).as_deref() == Some(driver.as_str()) {
                    let _ = fs::remove_file(self.device_dir(&addr).join("driver"));
                }
            }
        }
    }

    fn apply_new_id(&self) {
        let Some(id) = Self::take(&self.layout.driver_dir(TARGET).join("new_id")) else {
            return;
        };
        self.registered_ids.borrow_mut().push(id.clone());

        if !self.behavior.autobind_on_new_id {
            return;
        }
        let Ok(devices) = fs::read_dir(self.layout.pci_devices_dir()) else {
            return;
        };
        for entry in devices.flatten() {
            let addr = entry.file_name().to_string_lossy().to_string();
            let read = |f: &str| {
                fs::read_to_string(entry.path().join(f))
                    .map(|s| s.trim().trim_start_matches("0x").to_string())
                    .unwrap_or_default()
            };
            if format!("{} {}", read("vendor"), read("device")) == id && self.link_driver(&addr).is_none() {
                self.set_link(&addr, TARGET);
            }
        }
    }

    fn apply_bind(&self) {
        let Some(addr) = Self::take(&self.layout.driver_dir(TARGET).join("bind")) else {
            return;
        };
        self.bind_requests.borrow_mut().push(addr.clone());

        if self.behavior.bind_ignored || !self.device_dir(&addr).exists() {
            return;
        }
        match &self.behavior.reclaimed_by {
            Some(other) => self.set_link(&addr, other),
            None => self.set_link(&addr, TARGET),
        }
    }
}

impl Platform for FakeKernel {
    fn is_privileged(&self) -> bool {
        !self.behavior.unprivileged
    }

    fn active_modules(&self) -> Result<Vec<String>> {
        Ok(self.modules.borrow().clone())
    }

    fn load_module(&self, name: &str) -> Result<()> {
        self.load_requests.borrow_mut().push(name.to_string());
        if self.behavior.modprobe_rejects {
            bail!("modprobe: FATAL: Module {name} not found");
        }
        if !self.behavior.modprobe_noop {
            self.modules.borrow_mut().push(name.to_string());
        }
        Ok(())
    }

    fn list_pci_devices(&self) -> Result<String> {
        self.listings.set(self.listings.get() + 1);
        if self.behavior.lspci_missing {
            bail!("lspci: command not found");
        }
        Ok("00:00.0 Host bridge: Fake Corp Root Complex\n".to_string())
    }

    fn describe_device(&self, address: &DeviceAddress) -> Result<String> {
        if self.behavior.lspci_missing {
            bail!("lspci: command not found");
        }
        Ok(format!("{} Ethernet controller: Fake Corp NIC\n\tSubsystem: Fake\n", address.short()))
    }

    fn settle(&self, _delay: Duration) {
        self.settles.set(self.settles.get() + 1);
        self.apply_unbinds();
        self.apply_new_id();
        self.apply_bind();
    }
}
