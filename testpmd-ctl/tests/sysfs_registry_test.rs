//! Registry driving `SysfsBus` over a fake sysfs tree.
//!
//! Nothing reacts to the control writes here, so the driver symlink never
//! moves and every step that verifies a bind falls through to an explicit
//! bind write.

use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use std::time::Duration;

use testpmd_ctl::{Error, PciAddress, Settings, SysfsBus, Testpmd};

const PCI: &str = "0000:86:00.0";

fn fake_sysfs(root: &Path) {
    let dev = root.join("bus/pci/devices").join(PCI);
    let drivers = root.join("bus/pci/drivers");
    fs::create_dir_all(dev.join("net/ens1f0")).unwrap();
    fs::write(dev.join("vendor"), "0x8086\n").unwrap();
    fs::write(dev.join("device"), "0x158b\n").unwrap();
    fs::write(dev.join("numa_node"), "0\n").unwrap();
    for d in ["i40e", "vfio-pci"] {
        fs::create_dir_all(drivers.join(d)).unwrap();
    }
    symlink(drivers.join("i40e"), dev.join("driver")).unwrap();
}

fn read(root: &Path, file: &str) -> String {
    fs::read_to_string(root.join("bus/pci/drivers").join(file)).unwrap()
}

#[test]
fn test_acquire_and_release_writes() {
    let root = tempfile::tempdir().unwrap();
    fake_sysfs(root.path());

    let settings = Settings::new()
        .sysfs_root(root.path())
        .settle_delay(Duration::ZERO)
        .load_driver(false);
    let bus = SysfsBus::from_settings(&settings);
    let mut testpmd = Testpmd::new(bus, settings);
    let pci = PciAddress::parse(PCI).unwrap();

    testpmd.acquire_devices(&[pci.clone()], "vfio-pci").unwrap();
    let b = &testpmd.bindings()[0];
    assert!(b.was_kernel_port);
    assert_eq!(b.kernel_module, "i40e");
    assert_eq!(b.driver_current, "vfio-pci");

    assert_eq!(read(root.path(), "i40e/unbind"), PCI);
    assert_eq!(read(root.path(), "vfio-pci/new_id"), "0x8086 0x158b");
    assert_eq!(read(root.path(), "vfio-pci/bind"), PCI);
    assert_eq!(read(root.path(), "vfio-pci/remove_id"), "0x8086 0x158b");

    testpmd.release_devices().unwrap();
    assert_eq!(read(root.path(), "i40e/bind"), PCI);
    assert!(testpmd.bindings().is_empty());
}

#[test]
fn test_missing_device_is_configuration_error() {
    let root = tempfile::tempdir().unwrap();
    fake_sysfs(root.path());
    let settings = Settings::new().sysfs_root(root.path()).load_driver(false);
    let mut testpmd = Testpmd::new(SysfsBus::from_settings(&settings), settings);

    let err = testpmd
        .acquire_devices(&[PciAddress::parse("0000:af:00.0").unwrap()], "vfio-pci")
        .unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
}
