//! In-memory stand-ins for the PCI bus and the engine.
//!
//! [`FakeBus`] mimics how the kernel reacts to control-file writes (unbind
//! clears the driver link, `new_id` lets the driver claim matching unbound
//! devices) and records each successful write. [`ScriptedEngine`] answers
//! commands from a fixed script.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::engine::Transport;
use crate::error::{Error, Result};
use crate::pci::{PciAddress, PciBus};

/// A control-file write observed by [`FakeBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    Unbind(String),
    Bind(String, String),
    NewId(String, String, String),
    RemoveId(String, String, String),
    LoadDriver(String),
}

#[derive(Debug, Clone)]
pub struct FakeDevice {
    address: PciAddress,
    vendor_id: String,
    device_id: String,
    numa_node: i32,
    driver: Option<String>,
    /// Driver under which the device shows a `net/` directory
    net_driver: Option<String>,
}

impl FakeDevice {
    /// # Panics
    /// Panics on a malformed address.
    pub fn new(address: &str, vendor_id: &str, device_id: &str) -> Self {
        Self {
            address: PciAddress::parse(address).expect("bad fake pci address"),
            vendor_id: vendor_id.to_string(),
            device_id: device_id.to_string(),
            numa_node: 0,
            driver: None,
            net_driver: None,
        }
    }

    pub fn bound_to(mut self, driver: &str) -> Self {
        self.driver = Some(driver.to_string());
        self
    }

    /// Expose a kernel interface while on the current driver.
    pub fn with_net(mut self) -> Self {
        self.net_driver = self.driver.clone();
        self
    }

    pub fn numa_node(mut self, node: i32) -> Self {
        self.numa_node = node;
        self
    }
}

#[derive(Debug)]
pub struct FakeBus {
    devices: Mutex<BTreeMap<PciAddress, FakeDevice>>,
    ops: Mutex<Vec<BusOp>>,
    dynamic_ids: Mutex<HashSet<(String, String, String)>>,
    failing: Mutex<HashSet<PciAddress>>,
    failing_binds: Mutex<HashSet<PciAddress>>,
    auto_claim: bool,
}

impl Default for FakeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBus {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(BTreeMap::new()),
            ops: Mutex::new(Vec::new()),
            dynamic_ids: Mutex::new(HashSet::new()),
            failing: Mutex::new(HashSet::new()),
            failing_binds: Mutex::new(HashSet::new()),
            auto_claim: true,
        }
    }

    pub fn with_device(self, device: FakeDevice) -> Self {
        lock(&self.devices).insert(device.address.clone(), device);
        self
    }

    /// Registering a dynamic ID no longer makes the driver claim devices.
    pub fn without_auto_claim(mut self) -> Self {
        self.auto_claim = false;
        self
    }

    /// Every bind/unbind of this device fails with an I/O error.
    ///
    /// # Panics
    /// Panics on a malformed address.
    pub fn fail_writes_for(self, address: &str) -> Self {
        let pci = PciAddress::parse(address).expect("bad fake pci address");
        self.set_write_failure(&pci, true);
        self
    }

    /// Toggle write failures for a device after construction.
    pub fn set_write_failure(&self, pci: &PciAddress, fail: bool) {
        let mut failing = lock(&self.failing);
        if fail {
            failing.insert(pci.clone());
        } else {
            failing.remove(pci);
        }
    }

    /// Toggle failures of `bind` alone; `unbind` keeps working.
    pub fn set_bind_failure(&self, pci: &PciAddress, fail: bool) {
        let mut failing = lock(&self.failing_binds);
        if fail {
            failing.insert(pci.clone());
        } else {
            failing.remove(pci);
        }
    }

    pub fn ops(&self) -> Vec<BusOp> {
        lock(&self.ops).clone()
    }

    pub fn clear_ops(&self) {
        lock(&self.ops).clear();
    }

    pub fn driver_of(&self, pci: &PciAddress) -> Option<String> {
        lock(&self.devices).get(pci).and_then(|d| d.driver.clone())
    }

    /// Plug in a device after construction. Like the kernel, any driver
    /// whose dynamic ID table lists the device claims it right away.
    pub fn hot_add(&self, mut device: FakeDevice) {
        self.claim(&mut device);
        lock(&self.devices).insert(device.address.clone(), device);
    }

    /// Bind an unbound device to a driver with a matching dynamic ID.
    fn claim(&self, dev: &mut FakeDevice) {
        if !self.auto_claim || dev.driver.is_some() {
            return;
        }
        let ids = lock(&self.dynamic_ids);
        if let Some((driver, _, _)) = ids
            .iter()
            .find(|(_, v, d)| *v == dev.vendor_id && *d == dev.device_id)
        {
            dev.driver = Some(driver.clone());
        }
    }

    fn record(&self, op: BusOp) {
        lock(&self.ops).push(op);
    }

    fn check_writable(&self, pci: &PciAddress) -> Result<()> {
        if lock(&self.failing).contains(pci) {
            return Err(Error::device_io(
                format!("/sys/bus/pci/devices/{}", pci),
                io::Error::new(io::ErrorKind::PermissionDenied, "write rejected"),
            ));
        }
        Ok(())
    }

    fn with_device_ref<T>(&self, pci: &PciAddress, f: impl FnOnce(&FakeDevice) -> T) -> Result<T> {
        lock(&self.devices)
            .get(pci)
            .map(f)
            .ok_or_else(|| missing(pci))
    }
}

impl PciBus for FakeBus {
    fn exists(&self, pci: &PciAddress) -> bool {
        lock(&self.devices).contains_key(pci)
    }

    fn vendor_id(&self, pci: &PciAddress) -> Result<String> {
        self.with_device_ref(pci, |d| d.vendor_id.clone())
    }

    fn device_id(&self, pci: &PciAddress) -> Result<String> {
        self.with_device_ref(pci, |d| d.device_id.clone())
    }

    fn numa_node(&self, pci: &PciAddress) -> Result<i32> {
        self.with_device_ref(pci, |d| d.numa_node)
    }

    fn bound_driver(&self, pci: &PciAddress) -> Result<Option<String>> {
        self.with_device_ref(pci, |d| d.driver.clone())
    }

    fn has_net_interface(&self, pci: &PciAddress) -> bool {
        self.with_device_ref(pci, |d| d.driver.is_some() && d.driver == d.net_driver)
            .unwrap_or(false)
    }

    fn unbind(&self, pci: &PciAddress) -> Result<()> {
        self.check_writable(pci)?;
        let mut devices = lock(&self.devices);
        let dev = devices.get_mut(pci).ok_or_else(|| missing(pci))?;
        if dev.driver.take().is_none() {
            return Err(missing(pci));
        }
        drop(devices);
        self.record(BusOp::Unbind(pci.to_string()));
        Ok(())
    }

    fn bind(&self, pci: &PciAddress, driver: &str) -> Result<()> {
        self.check_writable(pci)?;
        if lock(&self.failing_binds).contains(pci) {
            return Err(Error::device_io(
                format!("/sys/bus/pci/drivers/{}/bind", driver),
                io::Error::other("bind rejected"),
            ));
        }
        let mut devices = lock(&self.devices);
        let dev = devices.get_mut(pci).ok_or_else(|| missing(pci))?;
        dev.driver = Some(driver.to_string());
        drop(devices);
        self.record(BusOp::Bind(pci.to_string(), driver.to_string()));
        Ok(())
    }

    fn add_dynamic_id(&self, driver: &str, vendor_id: &str, device_id: &str) -> Result<()> {
        lock(&self.dynamic_ids).insert((
            driver.to_string(),
            vendor_id.to_string(),
            device_id.to_string(),
        ));
        for dev in lock(&self.devices).values_mut() {
            self.claim(dev);
        }
        self.record(BusOp::NewId(
            driver.to_string(),
            vendor_id.to_string(),
            device_id.to_string(),
        ));
        Ok(())
    }

    fn remove_dynamic_id(&self, driver: &str, vendor_id: &str, device_id: &str) -> Result<()> {
        lock(&self.dynamic_ids).remove(&(
            driver.to_string(),
            vendor_id.to_string(),
            device_id.to_string(),
        ));
        self.record(BusOp::RemoveId(
            driver.to_string(),
            vendor_id.to_string(),
            device_id.to_string(),
        ));
        Ok(())
    }

    fn load_driver(&self, driver: &str) -> Result<()> {
        self.record(BusOp::LoadDriver(driver.to_string()));
        Ok(())
    }
}

fn missing(pci: &PciAddress) -> Error {
    Error::device_io(
        format!("/sys/bus/pci/devices/{}/driver", pci),
        io::Error::from(io::ErrorKind::NotFound),
    )
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

enum Reply {
    Output(String),
    Hang,
}

/// Commands received by a [`ScriptedEngine`], shared with the test.
#[derive(Debug, Clone, Default)]
pub struct EngineLog {
    inner: Arc<Mutex<LogInner>>,
}

#[derive(Debug, Default)]
struct LogInner {
    commands: Vec<String>,
    closed: bool,
}

impl EngineLog {
    pub fn commands(&self) -> Vec<String> {
        lock(&self.inner).commands.clone()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).closed
    }
}

/// Deterministic [`Transport`] answering from a script.
///
/// Unknown commands produce empty output. The startup banner is returned by
/// the first `expect`.
pub struct ScriptedEngine {
    responses: HashMap<String, String>,
    hangs: HashSet<String>,
    pending: VecDeque<Reply>,
    log: EngineLog,
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        let mut pending = VecDeque::new();
        pending.push_back(Reply::Output("Interactive-mode selected\n".to_string()));
        Self {
            responses: HashMap::new(),
            hangs: HashSet::new(),
            pending,
            log: EngineLog::default(),
        }
    }

    /// Never show the startup prompt.
    pub fn silent(mut self) -> Self {
        self.pending.clear();
        self.pending.push_back(Reply::Hang);
        self
    }

    /// Reply to `command` with `output`.
    pub fn respond(mut self, command: &str, output: &str) -> Self {
        self.responses
            .insert(command.to_string(), output.to_string());
        self
    }

    /// Never show the prompt after `command`.
    pub fn hang_on(mut self, command: &str) -> Self {
        self.hangs.insert(command.to_string());
        self
    }

    pub fn log(&self) -> EngineLog {
        self.log.clone()
    }
}

impl Transport for ScriptedEngine {
    fn send(&mut self, line: &str) -> Result<()> {
        let mut log = lock(&self.log.inner);
        if log.closed {
            return Err(Error::EngineExited);
        }
        log.commands.push(line.to_string());
        drop(log);

        if self.hangs.contains(line) {
            self.pending.push_back(Reply::Hang);
        } else {
            let out = self.responses.get(line).cloned().unwrap_or_default();
            self.pending.push_back(Reply::Output(out));
        }
        Ok(())
    }

    fn expect(&mut self, _prompt: &str, timeout: Duration) -> Result<String> {
        if lock(&self.log.inner).closed {
            return Err(Error::EngineExited);
        }
        match self.pending.pop_front() {
            Some(Reply::Output(out)) => Ok(out),
            Some(Reply::Hang) | None => Err(Error::PromptTimeout { waited: timeout }),
        }
    }

    fn close(&mut self, _timeout: Duration) {
        lock(&self.log.inner).closed = true;
    }
}
