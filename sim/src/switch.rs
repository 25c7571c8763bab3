//! Switch Kernel
//!
//! A layer-2 switch: the frame forwarder decides, the port interfaces
//! carry. Ports are promiscuous so every frame on the wire reaches the
//! forwarding logic.

use wirelab_net::forwarder::{ForwardDecision, FrameForwarder};
use wirelab_net::mac_table::MacTable;
use wirelab_net::nic::{NetworkInterface, RxDisposition};
use wirelab_net::wire::EthernetFrame;
use wirelab_net::MacAddress;

/// An N-port learning switch with per-port VLAN membership.
pub struct Switch {
    online: bool,
    ports: Vec<NetworkInterface>,
    forwarder: FrameForwarder,
}

impl Switch {
    /// Create a switch; ports are named `port0..portN-1`, promiscuous and
    /// up, all in the default VLAN.
    pub fn new(port_macs: Vec<MacAddress>) -> Self {
        let forwarder = FrameForwarder::new(port_macs.len());
        let ports = port_macs
            .into_iter()
            .enumerate()
            .map(|(i, mac)| {
                let mut nic = NetworkInterface::new(format!("port{}", i), mac);
                nic.set_promiscuous(true);
                nic.up();
                nic
            })
            .collect();
        Switch {
            online: true,
            ports,
            forwarder,
        }
    }

    pub fn online(&self) -> bool {
        self.online
    }

    pub fn set_online(&mut self, online: bool) {
        self.online = online;
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    pub fn nic(&self, port: usize) -> Option<&NetworkInterface> {
        self.ports.get(port)
    }

    pub fn nic_mut(&mut self, port: usize) -> Option<&mut NetworkInterface> {
        self.ports.get_mut(port)
    }

    /// The MAC table.
    pub fn mac_table(&self) -> &MacTable {
        self.forwarder.table()
    }

    /// Mutable MAC table access (aging sweeps, tests).
    pub fn mac_table_mut(&mut self) -> &mut MacTable {
        self.forwarder.table_mut()
    }

    /// The forwarder (VLAN and port administration).
    pub fn forwarder_mut(&mut self) -> &mut FrameForwarder {
        &mut self.forwarder
    }

    /// Assign a port to a VLAN.
    pub fn set_port_vlan(&mut self, port: usize, vlan: u16) {
        self.forwarder.set_port_vlan(port, vlan);
    }

    /// Enable or disable a port.
    pub fn set_port_enabled(&mut self, port: usize, enabled: bool) {
        self.forwarder.set_port_enabled(port, enabled);
    }

    /// Forget all learned MACs.
    pub fn reset(&mut self) {
        self.forwarder.reset();
    }

    /// Run a frame through the forwarder and transmit per its decision.
    pub fn receive_frame(&mut self, ingress: usize, frame: EthernetFrame, now_ms: u64) -> Option<ForwardDecision> {
        if !self.online {
            return None;
        }
        {
            let nic = self.ports.get_mut(ingress)?;
            if nic.receive(&frame) != RxDisposition::Delivered {
                return None;
            }
        }

        let decision = self.forwarder.forward(&frame, ingress, now_ms);
        for &egress in &decision.ports {
            if let Some(port) = self.ports.get_mut(egress) {
                let _ = port.transmit(&frame);
            }
        }
        Some(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use wirelab_net::forwarder::ForwardAction;
    use wirelab_net::wire::ethernet::ETHERTYPE_IPV4;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn switch_with_taps(n: usize) -> (Switch, Arc<Mutex<Vec<(usize, EthernetFrame)>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut sw = Switch::new((0..n).map(|i| mac(0xB0 + i as u8)).collect());
        for i in 0..n {
            let tx = sent.clone();
            sw.nic_mut(i).unwrap().set_tx_hook(Box::new(move |f| {
                tx.lock().unwrap().push((i, f.clone()));
            }));
        }
        (sw, sent)
    }

    fn frame(dst: MacAddress, src: MacAddress) -> EthernetFrame {
        EthernetFrame::new(dst, src, ETHERTYPE_IPV4, vec![0; 46]).unwrap()
    }

    #[test]
    fn test_unknown_destination_floods() {
        let (mut sw, sent) = switch_with_taps(3);
        sw.receive_frame(0, frame(mac(9), mac(1)), 0);
        let ports: Vec<usize> = sent.lock().unwrap().iter().map(|(p, _)| *p).collect();
        assert_eq!(ports, vec![1, 2]);
    }

    #[test]
    fn test_learned_destination_single_egress() {
        let (mut sw, sent) = switch_with_taps(3);
        // mac(2) announces itself on port 2
        sw.receive_frame(2, frame(MacAddress::BROADCAST, mac(2)), 0);
        sent.lock().unwrap().clear();

        let decision = sw.receive_frame(0, frame(mac(2), mac(1)), 10).unwrap();
        assert_eq!(decision.action, ForwardAction::Forward);
        let ports: Vec<usize> = sent.lock().unwrap().iter().map(|(p, _)| *p).collect();
        assert_eq!(ports, vec![2]);
    }

    #[test]
    fn test_powered_off_switch_drops() {
        let (mut sw, sent) = switch_with_taps(2);
        sw.set_online(false);
        assert!(sw.receive_frame(0, frame(mac(9), mac(1)), 0).is_none());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_reset_clears_table() {
        let (mut sw, _) = switch_with_taps(2);
        sw.receive_frame(0, frame(mac(9), mac(1)), 0);
        assert_eq!(sw.mac_table().len(), 1);
        sw.reset();
        assert_eq!(sw.mac_table().len(), 0);
    }

    #[test]
    fn test_vlan_isolation_end_to_end() {
        let (mut sw, sent) = switch_with_taps(4);
        sw.set_port_vlan(2, 99);
        sw.set_port_vlan(3, 99);
        sw.receive_frame(0, frame(MacAddress::BROADCAST, mac(1)), 0);
        let ports: Vec<usize> = sent.lock().unwrap().iter().map(|(p, _)| *p).collect();
        assert_eq!(ports, vec![1]); // VLAN 99 never sees it
    }
}
