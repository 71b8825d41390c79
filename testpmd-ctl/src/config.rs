//! Runtime settings shared by the device registry and the engine session.
//!
//! `Settings` collects every path, timeout and sizing knob with defaults that
//! match a stock Linux host running DPDK testpmd. Use the builder methods to
//! customize.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use testpmd_ctl::config::Settings;
//!
//! let settings = Settings::new()
//!     .command_timeout(Duration::from_secs(2))
//!     .hugepage_dir("/mnt/huge");
//! assert_eq!(settings.prompt, "testpmd> ");
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Sysfs directory holding one entry per PCI device.
pub const PCI_DEVICES_DIR: &str = "/sys/bus/pci/devices";

/// Sysfs directory holding one entry per PCI driver.
pub const PCI_DRIVERS_DIR: &str = "/sys/bus/pci/drivers";

/// Default hugetlbfs mount point.
pub const DEFAULT_HUGEPAGE_DIR: &str = "/dev/hugepages";

/// Text testpmd prints when it is idle.
pub const DEFAULT_PROMPT: &str = "testpmd> ";

/// Default per-device socket memory reservation in MB.
pub const DEFAULT_MEM_PER_DEVICE_MB: u32 = 1024;

#[derive(Debug, Clone)]
pub struct Settings {
    pub devices_dir: PathBuf,
    pub drivers_dir: PathBuf,
    pub hugepage_dir: PathBuf,
    pub prompt: String,
    /// Bound on the wait for the first prompt after spawn.
    pub start_timeout: Duration,
    /// Bound on the wait for the prompt after each command.
    pub command_timeout: Duration,
    /// Bound on the wait for the engine to exit after `quit`.
    pub stop_timeout: Duration,
    /// Pause after each sysfs mutation.
    pub settle_delay: Duration,
    pub mem_per_device_mb: u32,
    pub memory_channels: u32,
    /// Run `modprobe` for the target driver before binding.
    pub load_driver: bool,
    /// CPUs to draw lcores from; `None` uses the process affinity mask.
    pub cpus: Option<Vec<usize>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

impl Settings {
    pub fn new() -> Self {
        Self {
            devices_dir: PathBuf::from(PCI_DEVICES_DIR),
            drivers_dir: PathBuf::from(PCI_DRIVERS_DIR),
            hugepage_dir: PathBuf::from(DEFAULT_HUGEPAGE_DIR),
            prompt: DEFAULT_PROMPT.to_string(),
            start_timeout: Duration::from_secs(60),
            command_timeout: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(5),
            settle_delay: Duration::from_millis(20),
            mem_per_device_mb: DEFAULT_MEM_PER_DEVICE_MB,
            memory_channels: 4,
            load_driver: true,
            cpus: None,
        }
    }

    /// Root both sysfs directories under `root` (used against a fake tree).
    pub fn sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        self.devices_dir = root.join("bus/pci/devices");
        self.drivers_dir = root.join("bus/pci/drivers");
        self
    }

    pub fn hugepage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.hugepage_dir = dir.into();
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }

    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn mem_per_device_mb(mut self, mb: u32) -> Self {
        self.mem_per_device_mb = mb;
        self
    }

    pub fn memory_channels(mut self, n: u32) -> Self {
        self.memory_channels = n;
        self
    }

    pub fn load_driver(mut self, load: bool) -> Self {
        self.load_driver = load;
        self
    }

    pub fn cpus(mut self, cpus: Vec<usize>) -> Self {
        self.cpus = Some(cpus);
        self
    }
}
