//! Static vendor/device to driver table.
//!
//! Each entry names the kernel module that owns the NIC and the driver the
//! forwarding engine needs. Bifurcated hardware (Mellanox) drives DPDK
//! through its kernel module, so both names are equal.

use crate::error::{Error, Result};

/// Key used for the per-vendor fallback entry.
pub const DEFAULT_DEVICE: &str = "default";

pub mod vendor {
    pub const INTEL: &str = "0x8086";
    pub const MELLANOX: &str = "0x15b3";
    pub const REDHAT_VIRTIO: &str = "0x1af4";
}

/// Driver pair for one vendor/device combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverPair {
    /// Kernel module that exposes the device as a network interface
    pub kernel: &'static str,
    /// Driver the engine needs (None: use the caller's target driver)
    pub userspace: Option<&'static str>,
}

impl DriverPair {
    const fn kernel(kernel: &'static str) -> Self {
        Self {
            kernel,
            userspace: None,
        }
    }

    const fn bifurcated(kernel: &'static str) -> Self {
        Self {
            kernel,
            userspace: Some(kernel),
        }
    }

    /// Whether the engine uses the kernel module itself.
    pub fn is_bifurcated(&self) -> bool {
        self.userspace == Some(self.kernel)
    }

    /// Driver the device must end up on for the requested target.
    pub fn effective_target<'a>(&self, target: &'a str) -> &'a str {
        self.userspace.unwrap_or(target)
    }
}

struct Entry {
    vendor: &'static str,
    device: &'static str,
    drivers: DriverPair,
}

const fn entry(vendor: &'static str, device: &'static str, drivers: DriverPair) -> Entry {
    Entry {
        vendor,
        device,
        drivers,
    }
}

// TODO: the Intel default (i40e) needs product-owner confirmation; ice and
// ixgbe parts only resolve correctly through their device entries.
static ENTRIES: &[Entry] = &[
    // Intel
    entry(vendor::INTEL, DEFAULT_DEVICE, DriverPair::kernel("i40e")),
    entry(vendor::INTEL, "0x158b", DriverPair::kernel("i40e")), // XXV710
    entry(vendor::INTEL, "0x1572", DriverPair::kernel("i40e")), // X710 10G SFP+
    entry(vendor::INTEL, "0x1583", DriverPair::kernel("i40e")), // XL710 40G QSFP+
    entry(vendor::INTEL, "0x1592", DriverPair::kernel("ice")),  // E810-C QSFP
    entry(vendor::INTEL, "0x159b", DriverPair::kernel("ice")),  // E810-XXV SFP
    entry(vendor::INTEL, "0x10fb", DriverPair::kernel("ixgbe")), // 82599ES
    // Mellanox
    entry(
        vendor::MELLANOX,
        DEFAULT_DEVICE,
        DriverPair::bifurcated("mlx5_core"),
    ),
    // Virtio
    entry(
        vendor::REDHAT_VIRTIO,
        DEFAULT_DEVICE,
        DriverPair::kernel("virtio-pci"),
    ),
];

/// Lookup over the static table.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverTable;

impl DriverTable {
    /// Resolve drivers for a vendor/device pair.
    ///
    /// A device-specific entry wins; otherwise the vendor's default entry is
    /// used. An unknown vendor is fatal: the device cannot be managed safely.
    pub fn lookup(&self, vendor_id: &str, device_id: &str) -> Result<DriverPair> {
        let vendor_id = vendor_id.to_ascii_lowercase();
        let device_id = device_id.to_ascii_lowercase();

        let mut fallback = None;
        for e in ENTRIES.iter().filter(|e| e.vendor == vendor_id) {
            if e.device == device_id {
                return Ok(e.drivers);
            }
            if e.device == DEFAULT_DEVICE {
                fallback = Some(e.drivers);
            }
        }

        fallback.ok_or(Error::UnknownVendor {
            vendor: vendor_id,
            device: device_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_specific_entry() {
        let d = DriverTable.lookup("0x8086", "0x158b").unwrap();
        assert_eq!(d.kernel, "i40e");
        assert!(!d.is_bifurcated());
        assert_eq!(d.effective_target("vfio-pci"), "vfio-pci");

        let d = DriverTable.lookup("0x8086", "0x159b").unwrap();
        assert_eq!(d.kernel, "ice");
    }

    #[test]
    fn test_vendor_default() {
        let d = DriverTable.lookup("0x8086", "0xffff").unwrap();
        assert_eq!(d.kernel, "i40e");

        let d = DriverTable.lookup("0x15B3", "0x1017").unwrap();
        assert_eq!(d.kernel, "mlx5_core");
        assert!(d.is_bifurcated());
        assert_eq!(d.effective_target("vfio-pci"), "mlx5_core");
    }

    #[test]
    fn test_unknown_vendor() {
        let err = DriverTable.lookup("0x10de", "0x2204").unwrap_err();
        assert!(matches!(err, Error::UnknownVendor { .. }));
    }
}
