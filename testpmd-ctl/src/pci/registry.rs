//! Reversible driver rebinding for the engine's PCI devices.
//!
//! [`DeviceRegistry::acquire`] moves each device from its kernel driver to the
//! driver the engine needs and records enough to undo it;
//! [`DeviceRegistry::release`] hands kernel ports back to their kernel module.
//!
//! Every control-file write is followed by a fixed settle delay before the
//! next read, since the kernel completes binding asynchronously.

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::pci::{DriverTable, PciAddress, PciBus};

/// Binding record for one managed device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceBinding {
    pub address: PciAddress,
    pub vendor_id: String,
    pub device_id: String,
    /// Kernel module that owns this device as a network interface
    pub kernel_module: String,
    /// Driver bound when acquisition started
    pub driver_before: Option<String>,
    /// Driver bound after acquisition
    pub driver_current: String,
    /// Device exposed a kernel interface when acquisition started
    pub was_kernel_port: bool,
}

impl DeviceBinding {
    /// Whether release has nothing to undo for this device.
    pub fn is_on_kernel_module(&self) -> bool {
        self.driver_current == self.kernel_module
    }
}

pub struct DeviceRegistry<B> {
    bus: B,
    table: DriverTable,
    settle_delay: Duration,
    bindings: Vec<DeviceBinding>,
}

impl<B: PciBus> DeviceRegistry<B> {
    pub fn new(bus: B, settle_delay: Duration) -> Self {
        Self {
            bus,
            table: DriverTable,
            settle_delay,
            bindings: Vec::new(),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Bindings held since the last acquire, in acquisition order.
    pub fn bindings(&self) -> &[DeviceBinding] {
        &self.bindings
    }

    /// Find the binding for one address.
    pub fn binding(&self, pci: &PciAddress) -> Option<&DeviceBinding> {
        self.bindings.iter().find(|b| &b.address == pci)
    }

    /// Bind every address to `target_driver`, in order.
    ///
    /// Stops at the first failure. Devices completed before the failure stay
    /// recorded so [`release`](Self::release) can restore them.
    pub fn acquire(
        &mut self,
        addresses: &[PciAddress],
        target_driver: &str,
    ) -> Result<&[DeviceBinding]> {
        if !self.bindings.is_empty() {
            return Err(Error::AlreadyAcquired);
        }

        info!(devices = ?addresses, driver = target_driver, "Acquiring devices");
        for pci in addresses {
            let binding = self.acquire_one(pci, target_driver)?;
            info!(
                pci = %binding.address,
                before = ?binding.driver_before,
                current = %binding.driver_current,
                kernel_port = binding.was_kernel_port,
                "Device acquired"
            );
            self.bindings.push(binding);
        }
        Ok(&self.bindings)
    }

    fn acquire_one(&self, pci: &PciAddress, target_driver: &str) -> Result<DeviceBinding> {
        let vendor_id = self.bus.vendor_id(pci)?;
        let device_id = self.bus.device_id(pci)?;
        let drivers = self.table.lookup(&vendor_id, &device_id)?;
        let target = drivers.effective_target(target_driver);
        if drivers.is_bifurcated() {
            debug!(pci = %pci, driver = drivers.kernel, "Engine uses the kernel driver");
        }

        let bound = self.bus.bound_driver(pci)?;
        let was_kernel_port = bound.is_some() && self.bus.has_net_interface(pci);

        let mut binding = DeviceBinding {
            address: pci.clone(),
            vendor_id,
            device_id,
            // the driver holding a kernel interface is its kernel module
            kernel_module: match (&bound, was_kernel_port) {
                (Some(driver), true) => driver.clone(),
                _ => drivers.kernel.to_string(),
            },
            driver_before: bound.clone(),
            driver_current: String::new(),
            was_kernel_port,
        };

        if was_kernel_port && target == binding.kernel_module {
            binding.driver_current = binding.kernel_module.clone();
            return Ok(binding);
        }

        if bound.as_deref() == Some(target) {
            debug!(pci = %pci, driver = target, "Already on target driver");
            binding.driver_current = target.to_string();
            return Ok(binding);
        }

        if bound.is_some() {
            self.bus.unbind(pci)?;
            self.settle();
        }

        if target == binding.kernel_module {
            self.bus.bind(pci, target)?;
            self.settle();
            binding.driver_current = target.to_string();
            return Ok(binding);
        }

        // new_id usually makes the driver claim the device on its own
        self.bus
            .add_dynamic_id(target, &binding.vendor_id, &binding.device_id)?;
        self.settle();
        if self.bus.bound_driver(pci)?.as_deref() != Some(target) {
            self.bus.bind(pci, target)?;
        }

        // so unrelated devices with the same IDs are not claimed later
        self.bus
            .remove_dynamic_id(target, &binding.vendor_id, &binding.device_id)?;
        self.settle();

        binding.driver_current = target.to_string();
        Ok(binding)
    }

    /// Return kernel ports to their kernel module, in acquisition order.
    ///
    /// Devices that were never kernel managed are left on their current
    /// driver. The records are dropped only when every device succeeded; a
    /// retry after a failure skips devices already restored.
    pub fn release(&mut self) -> Result<()> {
        info!(devices = self.bindings.len(), "Releasing devices");
        for i in 0..self.bindings.len() {
            let binding = &self.bindings[i];
            if binding.is_on_kernel_module() {
                continue;
            }
            if !binding.was_kernel_port {
                debug!(
                    pci = %binding.address,
                    driver = %binding.driver_current,
                    "Leaving non-kernel device as is"
                );
                continue;
            }

            info!(
                pci = %binding.address,
                driver = %binding.kernel_module,
                "Restoring kernel driver"
            );
            // an earlier attempt may have unbound the device and then failed
            if self.bus.bound_driver(&binding.address)?.is_some() {
                self.bus.unbind(&binding.address)?;
                self.settle();
            }
            self.bus.bind(&binding.address, &binding.kernel_module)?;
            self.settle();

            let binding = &mut self.bindings[i];
            binding.driver_current = binding.kernel_module.clone();
        }

        self.bindings.clear();
        Ok(())
    }

    fn settle(&self) {
        if !self.settle_delay.is_zero() {
            thread::sleep(self.settle_delay);
        }
    }
}

impl<B> Drop for DeviceRegistry<B> {
    fn drop(&mut self) {
        if !self.bindings.is_empty() {
            warn!(
                devices = self.bindings.len(),
                "Registry dropped without releasing devices"
            );
        }
    }
}
