//! [`Testpmd`]: devices, engine session and forwarding behind one handle.
//!
//! The phases run in a fixed order: acquire devices, start the session,
//! serve commands, stop the session, release devices. All methods take
//! `&mut self`, so a caller sharing the handle must serialize access (one
//! mutex around it is enough).

use std::path::Path;

use tracing::{debug, info};

use crate::config::Settings;
use crate::engine::launch::session_tag;
use crate::engine::{EngineSession, Transport};
use crate::error::{Error, Result};
use crate::forwarding::{ForwardMode, ForwardingController, ForwardingState};
use crate::parse::{self, PortInfo};
use crate::pci::{DeviceBinding, DeviceRegistry, PciAddress, PciBus};

/// A peer MAC for one port, used by [`Testpmd::mac_mode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub port: u16,
    pub mac: String,
}

pub struct Testpmd<B: PciBus> {
    settings: Settings,
    registry: DeviceRegistry<B>,
    forwarding: Option<ForwardingController>,
}

impl<B: PciBus> Testpmd<B> {
    pub fn new(bus: B, settings: Settings) -> Self {
        Self {
            registry: DeviceRegistry::new(bus, settings.settle_delay),
            settings,
            forwarding: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn bindings(&self) -> &[DeviceBinding] {
        self.registry.bindings()
    }

    pub fn bus(&self) -> &B {
        self.registry.bus()
    }

    pub fn has_session(&self) -> bool {
        self.forwarding.is_some()
    }

    /// Load `target_driver` (unless disabled) and bind every device to it.
    pub fn acquire_devices(&mut self, addresses: &[PciAddress], target_driver: &str) -> Result<()> {
        if let Some(missing) = addresses.iter().find(|pci| !self.registry.bus().exists(pci)) {
            return Err(Error::config(format!("pci device {} not found", missing)));
        }
        if self.settings.load_driver {
            self.registry.bus().load_driver(target_driver)?;
        }
        self.registry.acquire(addresses, target_driver)?;
        Ok(())
    }

    pub fn release_devices(&mut self) -> Result<()> {
        self.registry.release()
    }

    /// Spawn the engine for `addresses`.
    pub fn start_session(
        &mut self,
        addresses: &[PciAddress],
        queues: u32,
        ring_size: u32,
        engine_path: &Path,
    ) -> Result<()> {
        if self.forwarding.is_some() {
            return Err(Error::SessionActive);
        }
        let session = EngineSession::start(
            &self.settings,
            self.registry.bus(),
            addresses,
            queues,
            ring_size,
            engine_path,
        )?;
        self.forwarding = Some(ForwardingController::new(session));
        Ok(())
    }

    /// Use an engine that is already running behind `transport`.
    pub fn attach_session(&mut self, transport: impl Transport + 'static) -> Result<()> {
        if self.forwarding.is_some() {
            return Err(Error::SessionActive);
        }
        let session = EngineSession::attach(transport, session_tag(), &self.settings)?;
        self.forwarding = Some(ForwardingController::new(session));
        Ok(())
    }

    /// Stop the engine if one runs. Best effort; never fails.
    pub fn stop_session(&mut self) -> Result<()> {
        match self.forwarding.take() {
            Some(fwd) => fwd.into_session().stop(),
            None => debug!("No engine session to stop"),
        }
        Ok(())
    }

    pub fn set_forwarding_mode(&mut self, mode: ForwardMode) -> Result<()> {
        self.controller()?.set_mode(mode)
    }

    pub fn set_peer_address(&mut self, port: u16, peer: &str) -> Result<()> {
        if !parse::is_mac_address(peer) {
            return Err(Error::config(format!("invalid mac address {:?}", peer)));
        }
        self.controller()?.set_peer_address(port, peer)
    }

    pub fn query(&mut self, command: &str) -> Result<String> {
        self.controller()?.query(command)
    }

    pub fn forwarding_state(&self) -> Result<ForwardingState> {
        self.forwarding
            .as_ref()
            .map(ForwardingController::state)
            .ok_or(Error::NoSession)
    }

    pub fn mac_address(&mut self, pci: &PciAddress) -> Result<String> {
        let out = self.query(&format!("show device info {}", pci))?;
        parse::parse_mac_address(&out)
    }

    pub fn port_info(&mut self, pci: &PciAddress) -> Result<PortInfo> {
        let out = self.query(&format!("show device info {}", pci))?;
        parse::parse_port_info(&out)
    }

    pub fn list_ports(&mut self) -> Result<Vec<PortInfo>> {
        let out = self.query("show device info all")?;
        parse::parse_port_list(&out)
    }

    pub fn fwd_stats(&mut self) -> Result<String> {
        self.query("show fwd stats all")
    }

    pub fn clear_fwd_stats(&mut self) -> Result<()> {
        self.query("clear fwd stats all").map(|_| ())
    }

    /// Configure every peer, then forward in mac mode.
    pub fn mac_mode(&mut self, peers: &[PeerAddress]) -> Result<()> {
        for peer in peers {
            self.set_peer_address(peer.port, &peer.mac)?;
        }
        self.set_forwarding_mode(ForwardMode::Mac)?;
        info!(peers = peers.len(), "Mac forwarding configured");
        Ok(())
    }

    fn controller(&mut self) -> Result<&mut ForwardingController> {
        self.forwarding.as_mut().ok_or(Error::NoSession)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{BusOp, FakeBus, FakeDevice, ScriptedEngine};
    use std::time::Duration;

    const PORT0: &str = "Port id: 0\nMAC address: 3C:FD:FE:B4:D2:40\nDevice name: 0000:86:00.0\n";

    fn testpmd() -> Testpmd<FakeBus> {
        let bus = FakeBus::new().with_device(
            FakeDevice::new("0000:86:00.0", "0x8086", "0x158b")
                .bound_to("i40e")
                .with_net(),
        );
        Testpmd::new(bus, Settings::new().settle_delay(Duration::ZERO))
    }

    #[test]
    fn test_commands_need_session() {
        let mut t = testpmd();
        assert!(matches!(t.query("show port info all"), Err(Error::NoSession)));
        assert!(matches!(
            t.set_forwarding_mode(ForwardMode::Io),
            Err(Error::NoSession)
        ));
        assert!(matches!(t.forwarding_state(), Err(Error::NoSession)));
        t.stop_session().unwrap();
    }

    #[test]
    fn test_acquire_loads_driver_first() {
        let mut t = testpmd();
        let pci = PciAddress::parse("86:00.0").unwrap();
        t.acquire_devices(&[pci.clone()], "vfio-pci").unwrap();
        assert_eq!(t.bus().ops()[0], BusOp::LoadDriver("vfio-pci".into()));
        assert_eq!(t.bindings()[0].driver_current, "vfio-pci");

        t.release_devices().unwrap();
        assert_eq!(t.bus().driver_of(&pci).as_deref(), Some("i40e"));
    }

    #[test]
    fn test_acquire_unknown_device() {
        let mut t = testpmd();
        let pci = PciAddress::parse("0000:99:00.0").unwrap();
        let err = t.acquire_devices(&[pci], "vfio-pci").unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(t.bus().ops().is_empty());
    }

    #[test]
    fn test_port_queries() {
        let mut t = testpmd();
        t.attach_session(
            ScriptedEngine::new()
                .respond("show device info 0000:86:00.0", PORT0)
                .respond("show device info all", PORT0),
        )
        .unwrap();
        let pci = PciAddress::parse("86:00.0").unwrap();

        assert_eq!(t.mac_address(&pci).unwrap(), "3C:FD:FE:B4:D2:40");
        assert_eq!(t.port_info(&pci).unwrap().device_name, "0000:86:00.0");
        assert_eq!(t.list_ports().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_error_on_unexpected_output() {
        let mut t = testpmd();
        t.attach_session(ScriptedEngine::new()).unwrap();
        let pci = PciAddress::parse("86:00.0").unwrap();
        let err = t.mac_address(&pci).unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_mac_mode() {
        let mut t = testpmd();
        let engine = ScriptedEngine::new();
        let log = engine.log();
        t.attach_session(engine).unwrap();
        t.set_forwarding_mode(ForwardMode::Io).unwrap();

        t.mac_mode(&[
            PeerAddress {
                port: 0,
                mac: "aa:bb:cc:dd:ee:00".into(),
            },
            PeerAddress {
                port: 1,
                mac: "aa:bb:cc:dd:ee:01".into(),
            },
        ])
        .unwrap();

        assert_eq!(
            log.commands(),
            vec![
                "set fwd io",
                "start",
                "stop",
                "set eth-peer 0 aa:bb:cc:dd:ee:00",
                "set eth-peer 1 aa:bb:cc:dd:ee:01",
                "set fwd mac",
                "start",
            ]
        );
        let state = t.forwarding_state().unwrap();
        assert_eq!(state.mode, Some(ForwardMode::Mac));
        assert!(state.running);
    }

    #[test]
    fn test_invalid_peer_rejected_before_engine() {
        let mut t = testpmd();
        let engine = ScriptedEngine::new();
        let log = engine.log();
        t.attach_session(engine).unwrap();
        assert!(matches!(
            t.set_peer_address(0, "not-a-mac"),
            Err(Error::Configuration { .. })
        ));
        assert!(log.commands().is_empty());
    }

    #[test]
    fn test_second_session_rejected_and_stop_is_idempotent() {
        let mut t = testpmd();
        let engine = ScriptedEngine::new();
        let log = engine.log();
        t.attach_session(engine).unwrap();
        assert!(matches!(
            t.attach_session(ScriptedEngine::new()),
            Err(Error::SessionActive)
        ));

        t.stop_session().unwrap();
        assert!(log.is_closed());
        assert!(!t.has_session());
        t.stop_session().unwrap();
    }
}
