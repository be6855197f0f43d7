//! The contract of the poll-mode driver framework this crate sits on.
//!
//! Port numbers and queue ids follow the framework's conventions: ports are numbered from zero
//! in probe order and each port is used with a single RX and a single TX queue.

use std::fmt;

use serde::Deserialize;

use crate::error::{DriverError, Result};
use crate::mbuf::Mbuf;
use crate::mempool::{Mempool, PoolOptions};

/// Bus location of a device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PciAddr {
    pub domain: u32,
    pub bus: u8,
    pub devid: u8,
    pub function: u8,
}

impl fmt::Display for PciAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{}",
            self.domain, self.bus, self.devid, self.function
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub driver_name: String,
    /// Absent for virtual devices.
    pub pci_addr: Option<PciAddr>,
    pub max_rx_queues: u16,
    pub max_tx_queues: u16,
}

/// Receive side port settings. Everything is off by default.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RxMode {
    pub split_hdr_size: u16,
    pub header_split: bool,
    pub hw_ip_checksum: bool,
    pub hw_vlan_filter: bool,
    pub jumbo_frame: bool,
    pub hw_strip_crc: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxMqMode {
    None,
    Dcb,
    Vmdq,
}

impl Default for TxMqMode {
    fn default() -> Self {
        TxMqMode::None
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TxMode {
    pub mq_mode: TxMqMode,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PortConf {
    pub rxmode: RxMode,
    pub txmode: TxMode,
}

/// Prefetch, host and write-back thresholds of a descriptor ring.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Thresholds {
    pub pthresh: u8,
    pub hthresh: u8,
    pub wthresh: u8,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RxConf {
    pub rx_thresh: Thresholds,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TxConf {
    pub tx_thresh: Thresholds,
}

/// Per port counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PortStats {
    pub ipackets: u64,
    pub opackets: u64,
    pub ibytes: u64,
    pub obytes: u64,
    /// Packets dropped because the RX ring was full or the port was down.
    pub imissed: u64,
    /// Packets dropped because they could not be received into a buffer.
    pub ierrors: u64,
    /// Packets dropped because the RX pool was empty.
    pub rx_nombuf: u64,
}

/// Primitives of a poll-mode driver framework. Every call returns immediately.
pub trait Driver: Send + Sync {
    /// Initialize the runtime with an argument vector, program name first.
    fn eal_init(&self, args: &[String]) -> std::result::Result<(), DriverError>;

    /// Bind drivers to all devices found on the bus.
    fn probe(&self) -> std::result::Result<(), DriverError>;

    fn port_count(&self) -> u16;

    fn dev_info(&self, port: u16) -> std::result::Result<DeviceInfo, DriverError>;

    fn dev_configure(
        &self,
        port: u16,
        nb_rx_queues: u16,
        nb_tx_queues: u16,
        conf: &PortConf,
    ) -> std::result::Result<(), DriverError>;

    /// Set up an RX queue whose descriptors are filled from `pool`.
    fn rx_queue_setup(
        &self,
        port: u16,
        queue: u16,
        nb_desc: u16,
        conf: &RxConf,
        pool: &Mempool,
    ) -> std::result::Result<(), DriverError>;

    fn tx_queue_setup(
        &self,
        port: u16,
        queue: u16,
        nb_desc: u16,
        conf: &TxConf,
    ) -> std::result::Result<(), DriverError>;

    fn dev_start(&self, port: u16) -> std::result::Result<(), DriverError>;

    fn dev_stop(&self, port: u16) -> std::result::Result<(), DriverError>;

    fn promiscuous_set(&self, port: u16, on: bool) -> std::result::Result<(), DriverError>;

    /// Move up to `nb_pkts` received buffers into `bufs`. Returns the number moved.
    fn rx_burst(&self, port: u16, queue: u16, bufs: &mut Vec<Mbuf>, nb_pkts: usize) -> usize;

    /// Queue buffers from the front of `bufs` for transmission. Accepted buffers are removed
    /// from `bufs` and owned by the driver from then on. Returns the number accepted.
    fn tx_burst(&self, port: u16, queue: u16, bufs: &mut Vec<Mbuf>) -> usize;

    fn stats(&self, port: u16) -> std::result::Result<PortStats, DriverError>;

    /// Create a packet buffer pool.
    fn create_pool(&self, options: &PoolOptions) -> Result<Mempool> {
        Mempool::new(options.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pci_addr_display() {
        let addr = PciAddr {
            domain: 0,
            bus: 3,
            devid: 0x1f,
            function: 1,
        };
        assert_eq!(addr.to_string(), "0000:03:1f.1");
    }

    #[test]
    fn port_conf_defaults_off() {
        let conf = PortConf::default();
        assert!(!conf.rxmode.header_split);
        assert!(!conf.rxmode.hw_ip_checksum);
        assert!(!conf.rxmode.hw_vlan_filter);
        assert!(!conf.rxmode.jumbo_frame);
        assert!(!conf.rxmode.hw_strip_crc);
        assert_eq!(conf.txmode.mq_mode, TxMqMode::None);
    }
}
