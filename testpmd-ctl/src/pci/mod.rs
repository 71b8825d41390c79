//! PCI devices: addressing, sysfs access, driver table and the binding
//! registry.

pub mod address;
pub mod bus;
pub mod registry;
pub mod table;

pub use address::PciAddress;
pub use bus::{PciBus, SysfsBus};
pub use registry::{DeviceBinding, DeviceRegistry};
pub use table::{DriverPair, DriverTable};
