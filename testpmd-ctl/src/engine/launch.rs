//! Resource plan for one engine launch.
//!
//! Everything here is pure: the plan is computed from the device list, the
//! allowed CPUs and [`Settings`], then rendered into an [`EngineCommand`].

use std::path::Path;

use uuid::Uuid;

use crate::config::Settings;
use crate::engine::cmdline::{EngineCommand, ProcessType};
use crate::engine::cpuset::{format_cpu_list, select_cores};
use crate::error::{Error, Result};
use crate::pci::PciAddress;

/// Highest port count a `u64` port mask can address.
pub const MAX_PORTS: usize = 64;

/// A device and the NUMA node it sits on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedDevice {
    pub address: PciAddress,
    pub numa_node: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub addresses: Vec<PciAddress>,
    /// One management core followed by one core per forwarding queue
    pub cores: Vec<usize>,
    /// Socket memory in MB for NUMA nodes 0 and 1
    pub socket_mem: [u32; 2],
    pub port_mask: u64,
    pub queues: u32,
    pub ring_size: u32,
    /// Hugepage file prefix unique to this session
    pub tag: String,
}

impl LaunchPlan {
    pub fn build(
        devices: &[PlacedDevice],
        queues: u32,
        ring_size: u32,
        allowed_cpus: &[usize],
        settings: &Settings,
    ) -> Result<Self> {
        if devices.is_empty() {
            return Err(Error::config("no devices to forward on"));
        }
        if queues == 0 {
            return Err(Error::config("queue count must be at least 1"));
        }
        if ring_size == 0 {
            return Err(Error::config("ring size must be at least 1"));
        }

        let needed = devices.len() * queues as usize + 1;
        let cores = select_cores(allowed_cpus, needed)?;
        let socket_mem = socket_memory(
            devices.iter().map(|d| d.numa_node),
            settings.mem_per_device_mb,
        )?;

        Ok(Self {
            addresses: devices.iter().map(|d| d.address.clone()).collect(),
            cores,
            socket_mem,
            port_mask: port_mask(devices.len())?,
            queues,
            ring_size,
            tag: session_tag(),
        })
    }

    pub fn forwarding_cores(&self) -> usize {
        self.addresses.len() * self.queues as usize
    }

    /// Render the engine command line.
    pub fn command(&self, engine_path: &Path, settings: &Settings) -> EngineCommand {
        let mut cmd = EngineCommand::new(engine_path)
            .core_list(format_cpu_list(&self.cores))
            .memory_channels(settings.memory_channels)
            .process_type(ProcessType::Auto)
            .file_prefix(&self.tag)
            .socket_mem(format!("{},{}", self.socket_mem[0], self.socket_mem[1]));
        for pci in &self.addresses {
            cmd = cmd.allow(pci.as_str());
        }
        cmd.interactive()
            .forwarding_cores(self.forwarding_cores())
            .ports(self.addresses.len())
            .port_mask(self.port_mask)
            .queues(self.queues)
            .ring_size(self.ring_size)
    }
}

/// Mask with one bit per port, ports numbered from 0.
pub fn port_mask(ports: usize) -> Result<u64> {
    match ports {
        0 => Ok(0),
        n if n < MAX_PORTS => Ok((1u64 << n) - 1),
        MAX_PORTS => Ok(u64::MAX),
        n => Err(Error::config(format!(
            "{} ports exceed the {} port limit",
            n, MAX_PORTS
        ))),
    }
}

/// Sum the per-device reservation per NUMA node. Only nodes 0 and 1 exist.
pub fn socket_memory(nodes: impl IntoIterator<Item = i32>, per_device_mb: u32) -> Result<[u32; 2]> {
    let mut mem = [0u32; 2];
    for node in nodes {
        match node {
            0 | 1 => {
                let slot = &mut mem[node as usize];
                *slot = slot.checked_add(per_device_mb).ok_or_else(|| {
                    Error::config(format!("socket memory for numa node {} overflows", node))
                })?;
            }
            other => {
                return Err(Error::config(format!(
                    "unsupported numa node {} (expected 0 or 1)",
                    other
                )));
            }
        }
    }
    Ok(mem)
}

/// Fresh session tag: a v4 UUID without hyphens.
pub fn session_tag() -> String {
    Uuid::new_v4().simple().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn placed(pci: &str, numa_node: i32) -> PlacedDevice {
        PlacedDevice {
            address: PciAddress::parse(pci).unwrap(),
            numa_node,
        }
    }

    #[test]
    fn test_port_mask() {
        assert_eq!(port_mask(3).unwrap(), 0b111);
        assert_eq!(port_mask(1).unwrap(), 0x1);
        assert_eq!(port_mask(64).unwrap(), u64::MAX);
        assert!(port_mask(65).is_err());
    }

    #[test]
    fn test_socket_memory() {
        assert_eq!(socket_memory([0, 1, 1], 1024).unwrap(), [1024, 2048]);
        assert_eq!(socket_memory(std::iter::empty(), 1024).unwrap(), [0, 0]);
        assert!(matches!(
            socket_memory([0, -1], 1024),
            Err(Error::Configuration { .. })
        ));
        assert!(socket_memory([2], 1024).is_err());
        assert!(matches!(
            socket_memory([1, 1], u32::MAX),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_session_tag_unique() {
        let a = session_tag();
        let b = session_tag();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_build_plan() {
        let devices = [placed("86:00.0", 1), placed("86:00.1", 1), placed("3b:00.0", 0)];
        let settings = Settings::new();
        let plan = LaunchPlan::build(&devices, 2, 1024, &[0, 1, 2, 3, 4, 5, 6, 7, 8], &settings)
            .unwrap();

        assert_eq!(plan.cores, vec![0, 1, 2, 3, 4, 5, 6]);
        assert_eq!(plan.forwarding_cores(), 6);
        assert_eq!(plan.socket_mem, [1024, 2048]);
        assert_eq!(plan.port_mask, 0b111);

        let args = plan.command(Path::new("testpmd"), &settings).args();
        let prefix = format!("--file-prefix={}", plan.tag);
        assert_eq!(
            args,
            [
                "-l",
                "0,1,2,3,4,5,6",
                "-n",
                "4",
                "--proc-type=auto",
                prefix.as_str(),
                "--socket-mem=1024,2048",
                "-a",
                "0000:86:00.0",
                "-a",
                "0000:86:00.1",
                "-a",
                "0000:3b:00.0",
                "--",
                "-i",
                "--nb-cores=6",
                "--nb-ports=3",
                "--portmask=0x7",
                "--rxq=2",
                "--txq=2",
                "--rxd=1024",
                "--txd=1024",
            ]
        );
    }

    #[test]
    fn test_build_rejects_bad_input() {
        let settings = Settings::new();
        assert!(matches!(
            LaunchPlan::build(&[], 1, 2048, &[0, 1], &settings),
            Err(Error::Configuration { .. })
        ));

        // two ports with one queue need three cores
        let devices = [placed("86:00.0", 0), placed("86:00.1", 0)];
        assert!(LaunchPlan::build(&devices, 1, 2048, &[0, 1], &settings).is_err());
        assert!(LaunchPlan::build(&devices, 0, 2048, &[0, 1, 2], &settings).is_err());
    }
}
