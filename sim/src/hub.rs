//! Hub Kernel
//!
//! A dumb repeater: every frame arriving on one port is retransmitted on
//! every other enabled port. No MAC table, no filtering.

use wirelab_net::nic::NetworkInterface;
use wirelab_net::wire::EthernetFrame;
use wirelab_net::MacAddress;

/// An N-port repeater.
pub struct Hub {
    online: bool,
    ports: Vec<NetworkInterface>,
    frames_repeated: u64,
}

impl Hub {
    /// Create a hub; ports are named `port0..portN-1`, promiscuous and up.
    pub fn new(port_macs: Vec<MacAddress>) -> Self {
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
        Hub {
            online: true,
            ports,
            frames_repeated: 0,
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

    /// Frames repeated since power-on.
    pub fn frames_repeated(&self) -> u64 {
        self.frames_repeated
    }

    pub fn nic(&self, port: usize) -> Option<&NetworkInterface> {
        self.ports.get(port)
    }

    pub fn nic_mut(&mut self, port: usize) -> Option<&mut NetworkInterface> {
        self.ports.get_mut(port)
    }

    /// Repeat a frame arriving on `ingress` out of every other port.
    pub fn receive_frame(&mut self, ingress: usize, frame: EthernetFrame, _now_ms: u64) {
        if !self.online {
            return;
        }
        {
            let nic = match self.ports.get_mut(ingress) {
                Some(n) => n,
                None => return,
            };
            if nic.receive(&frame) != wirelab_net::nic::RxDisposition::Delivered {
                return;
            }
        }
        for (i, port) in self.ports.iter_mut().enumerate() {
            if i == ingress {
                continue;
            }
            if port.transmit(&frame).is_ok() {
                self.frames_repeated += 1;
            }
        }
    }
}
