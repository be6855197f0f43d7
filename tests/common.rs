//
// Test infrastructure: an environment over the software driver with one port per given bus
// address, plus helpers building Ethernet frames.
//
#![allow(dead_code)]

use std::sync::Arc;

use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::util::MacAddr;
use rand::Rng;

use dpdkpcap::{Config, Environment, PciAddr, SoftDriver};

pub const SRC_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0x01);
pub const DST_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0x02);

pub fn pci(bus: u8, devid: u8) -> PciAddr {
    PciAddr {
        domain: 0,
        bus,
        devid,
        function: 0,
    }
}

/// Environment with ports at the given (bus, devid) addresses. Not initialized.
pub fn environment(ports: &[(u8, u8)]) -> Arc<Environment<SoftDriver>> {
    environment_with(ports, Config::default())
}

pub fn environment_with(ports: &[(u8, u8)], config: Config) -> Arc<Environment<SoftDriver>> {
    let drv = SoftDriver::new();
    for (bus, devid) in ports {
        drv.add_port(pci(*bus, *devid));
    }

    Arc::new(Environment::new(drv, config))
}

/// An Ethernet frame of `len` bytes whose payload starts with `seq`, followed by random bytes.
pub fn frame(len: usize, seq: u32) -> Vec<u8> {
    assert!(len >= 14 + 4);

    let mut buf = vec![0u8; len];
    let mut payload = vec![0u8; len - 14];
    rand::thread_rng().fill(&mut payload[..]);
    payload[..4].copy_from_slice(&seq.to_be_bytes());

    let mut eth = MutableEthernetPacket::new(&mut buf[..]).unwrap();
    eth.set_destination(DST_MAC);
    eth.set_source(SRC_MAC);
    eth.set_ethertype(EtherTypes::Ipv4);
    eth.set_payload(&payload);

    buf
}

/// Sequence number written by `frame`.
pub fn seq(frame: &[u8]) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&frame[14..18]);
    u32::from_be_bytes(b)
}

pub fn random_len() -> usize {
    rand::thread_rng().gen_range(60..1515)
}
