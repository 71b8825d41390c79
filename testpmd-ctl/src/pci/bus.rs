//! PCI bus access.
//!
//! [`PciBus`] is the seam between the device registry and the kernel:
//! attribute reads plus the driver control files (`bind`, `unbind`,
//! `new_id`, `remove_id`). [`SysfsBus`] implements it over sysfs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::config::{PCI_DEVICES_DIR, PCI_DRIVERS_DIR, Settings};
use crate::error::{Error, Result};
use crate::pci::PciAddress;

pub trait PciBus {
    /// Whether the device exists on the bus.
    fn exists(&self, pci: &PciAddress) -> bool;

    /// Vendor ID as exposed by sysfs (e.g. "0x8086").
    fn vendor_id(&self, pci: &PciAddress) -> Result<String>;

    /// Device ID as exposed by sysfs (e.g. "0x158b").
    fn device_id(&self, pci: &PciAddress) -> Result<String>;

    /// NUMA node of the device (-1 when the platform reports none).
    fn numa_node(&self, pci: &PciAddress) -> Result<i32>;

    /// Name of the driver the device is bound to, if any.
    fn bound_driver(&self, pci: &PciAddress) -> Result<Option<String>>;

    /// Whether the device currently exposes a kernel network interface.
    fn has_net_interface(&self, pci: &PciAddress) -> bool;

    /// Unbind the device from whatever driver holds it.
    fn unbind(&self, pci: &PciAddress) -> Result<()>;

    /// Ask `driver` to bind the device.
    fn bind(&self, pci: &PciAddress, driver: &str) -> Result<()>;

    /// Register a vendor/device pair with the driver's dynamic ID table.
    fn add_dynamic_id(&self, driver: &str, vendor_id: &str, device_id: &str) -> Result<()>;

    /// Remove a vendor/device pair from the driver's dynamic ID table.
    fn remove_dynamic_id(&self, driver: &str, vendor_id: &str, device_id: &str) -> Result<()>;

    /// Make sure the driver's kernel module is loaded.
    fn load_driver(&self, driver: &str) -> Result<()>;
}

/// [`PciBus`] backed by `/sys/bus/pci`.
#[derive(Debug, Clone)]
pub struct SysfsBus {
    devices_dir: PathBuf,
    drivers_dir: PathBuf,
}

impl Default for SysfsBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsBus {
    pub fn new() -> Self {
        Self::with_dirs(PCI_DEVICES_DIR, PCI_DRIVERS_DIR)
    }

    pub fn with_dirs(devices_dir: impl Into<PathBuf>, drivers_dir: impl Into<PathBuf>) -> Self {
        Self {
            devices_dir: devices_dir.into(),
            drivers_dir: drivers_dir.into(),
        }
    }

    /// Use the sysfs directories named in `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_dirs(&settings.devices_dir, &settings.drivers_dir)
    }

    fn device_path(&self, pci: &PciAddress) -> PathBuf {
        self.devices_dir.join(pci.as_str())
    }

    fn driver_path(&self, driver: &str) -> PathBuf {
        self.drivers_dir.join(driver)
    }
}

impl PciBus for SysfsBus {
    fn exists(&self, pci: &PciAddress) -> bool {
        self.device_path(pci).exists()
    }

    fn vendor_id(&self, pci: &PciAddress) -> Result<String> {
        read_sysfs_value(&self.device_path(pci).join("vendor"))
    }

    fn device_id(&self, pci: &PciAddress) -> Result<String> {
        read_sysfs_value(&self.device_path(pci).join("device"))
    }

    fn numa_node(&self, pci: &PciAddress) -> Result<i32> {
        let path = self.device_path(pci).join("numa_node");
        let value = read_sysfs_value(&path)?;
        value.parse().map_err(|_| {
            Error::device_io(
                path,
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("bad numa_node {value:?}"),
                ),
            )
        })
    }

    fn bound_driver(&self, pci: &PciAddress) -> Result<Option<String>> {
        let link = self.device_path(pci).join("driver");
        match fs::read_link(&link) {
            Ok(target) => {
                let driver = target
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string());
                debug!(pci = %pci, driver = ?driver, "Device is bound");
                Ok(driver)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(pci = %pci, "Device is not bound");
                Ok(None)
            }
            Err(e) => Err(Error::device_io(link, e)),
        }
    }

    fn has_net_interface(&self, pci: &PciAddress) -> bool {
        let kernel_port = self.device_path(pci).join("net").exists();
        debug!(pci = %pci, kernel_port, "Checked for kernel interface");
        kernel_port
    }

    fn unbind(&self, pci: &PciAddress) -> Result<()> {
        // Resolves through the driver symlink to <driver>/unbind
        write_control(&self.device_path(pci).join("driver/unbind"), pci.as_str())
    }

    fn bind(&self, pci: &PciAddress, driver: &str) -> Result<()> {
        write_control(&self.driver_path(driver).join("bind"), pci.as_str())
    }

    fn add_dynamic_id(&self, driver: &str, vendor_id: &str, device_id: &str) -> Result<()> {
        write_control(
            &self.driver_path(driver).join("new_id"),
            &format!("{} {}", vendor_id, device_id),
        )
    }

    fn remove_dynamic_id(&self, driver: &str, vendor_id: &str, device_id: &str) -> Result<()> {
        write_control(
            &self.driver_path(driver).join("remove_id"),
            &format!("{} {}", vendor_id, device_id),
        )
    }

    fn load_driver(&self, driver: &str) -> Result<()> {
        info!(driver, "Loading driver module");
        for (program, args) in [("depmod", vec!["-a"]), ("modprobe", vec![driver])] {
            let status = Command::new(program)
                .args(&args)
                .status()
                .map_err(|e| Error::ProcessSpawn {
                    program: program.to_string(),
                    source: e,
                })?;
            if !status.success() {
                warn!(program, ?args, %status, "Module command returned non-zero");
            }
        }

        if !self.driver_path(driver).exists() {
            return Err(Error::config(format!(
                "driver {} not available under {}",
                driver,
                self.drivers_dir.display()
            )));
        }
        Ok(())
    }
}

/// Read a value from a sysfs file.
fn read_sysfs_value(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map(|s| s.trim().to_string())
        .map_err(|e| Error::device_io(path, e))
}

/// Write to a driver control file.
fn write_control(path: &Path, value: &str) -> Result<()> {
    info!("echo {} > {}", value, path.display());
    fs::write(path, value).map_err(|e| Error::device_io(path, e))
}
