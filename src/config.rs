//! Deployment parameters. The defaults are the values the capture layer has always run with;
//! a YAML file may override any of them.
//!
//! ```yaml
//! eal:
//!   core_mask: 3
//!   memory_channels: 4
//! pool:
//!   capacity: 1023
//! ```
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::driver::{PortConf, RxConf, Thresholds, TxConf};
use crate::error::{Error, Result};
use crate::mempool::{PoolFlags, PoolOptions, MBUF_HEADROOM, MEMPOOL_CACHE_MAX};

pub const RX_POOL_NAME: &str = "RX_POOL";
pub const TX_POOL_NAME: &str = "TX_POOL";

/// Driver runtime arguments.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EalConfig {
    pub program: String,
    pub core_mask: u64,
    pub memory_channels: u32,
    /// Heap size in megabytes
    pub heap_mb: u32,
    pub file_prefix: String,
}

impl Default for EalConfig {
    fn default() -> Self {
        EalConfig {
            program: "dpdkpcap".to_string(),
            core_mask: 0x03,
            memory_channels: 2,
            heap_mb: 128,
            file_prefix: "dpdkpcap".to_string(),
        }
    }
}

impl EalConfig {
    /// The argument vector passed to the runtime, program name first.
    pub fn args(&self) -> Vec<String> {
        vec![
            self.program.clone(),
            format!("-c {:#04x}", self.core_mask),
            format!("-n {}", self.memory_channels),
            format!("-m {}", self.heap_mb),
            format!("--file-prefix={}", self.file_prefix),
        ]
    }
}

/// Shape of the RX and TX pools. Both pools use the same values.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub capacity: usize,
    pub data_room: usize,
    pub cache_size: usize,
    pub huge_tlb: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            capacity: 512,
            data_room: 2048,
            cache_size: 32,
            huge_tlb: false,
        }
    }
}

impl PoolConfig {
    pub fn options(&self, name: &str) -> PoolOptions {
        PoolOptions {
            name: name.to_string(),
            capacity: self.capacity,
            data_room: self.data_room,
            cache_size: self.cache_size,
            flags: PoolFlags::SPSC,
            huge_tlb: self.huge_tlb,
        }
    }
}

/// Queue sizing of every port.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub rx_desc: u16,
    pub tx_desc: u16,
    pub rx_thresh: Thresholds,
    pub tx_thresh: Thresholds,
    /// Largest burst requested by the RX polling task
    pub rx_burst: usize,
}

const DEFAULT_THRESH: Thresholds = Thresholds {
    pthresh: 8,
    hthresh: 8,
    wthresh: 4,
};

impl Default for PortConfig {
    fn default() -> Self {
        PortConfig {
            rx_desc: 128,
            tx_desc: 128,
            rx_thresh: DEFAULT_THRESH,
            tx_thresh: DEFAULT_THRESH,
            rx_burst: 32,
        }
    }
}

impl PortConfig {
    /// Offloads stay disabled; there is no knob for them.
    pub fn port_conf(&self) -> PortConf {
        PortConf::default()
    }

    pub fn rx_conf(&self) -> RxConf {
        RxConf {
            rx_thresh: self.rx_thresh,
        }
    }

    pub fn tx_conf(&self) -> TxConf {
        TxConf {
            tx_thresh: self.tx_thresh,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub eal: EalConfig,
    pub pool: PoolConfig,
    pub port: PortConfig,
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Config> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        Config::from_yaml(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        if self.eal.program.is_empty() {
            return Err(Error::Config("eal.program must not be empty".into()));
        }
        if self.eal.core_mask == 0 {
            return Err(Error::Config("eal.core_mask selects no core".into()));
        }
        if self.pool.capacity == 0 {
            return Err(Error::Config("pool.capacity must be positive".into()));
        }
        if self.pool.data_room == 0 || MBUF_HEADROOM + self.pool.data_room > u16::MAX as usize {
            return Err(Error::Config(format!(
                "pool.data_room {} out of range",
                self.pool.data_room
            )));
        }
        if self.pool.cache_size > MEMPOOL_CACHE_MAX || self.pool.cache_size > self.pool.capacity {
            return Err(Error::Config(format!(
                "pool.cache_size {} out of range",
                self.pool.cache_size
            )));
        }
        if self.port.rx_desc == 0 || self.port.tx_desc == 0 {
            return Err(Error::Config("descriptor counts must be positive".into()));
        }
        if self.port.rx_burst == 0 {
            return Err(Error::Config("port.rx_burst must be positive".into()));
        }

        Ok(())
    }
}
