//! A pcap style capture API (enumerate, open, receive, send, close) over poll-mode NIC
//! drivers that only offer burst I/O on pre-allocated buffer pools.
//!
//! ```no_run
//! use std::sync::Arc;
//! use dpdkpcap::{CaptureSession, Environment, SoftDriver};
//!
//! let env = Arc::new(Environment::with_defaults(SoftDriver::new()));
//! let devices = env.enumerate_devices()?;
//! let mut session = CaptureSession::open(&env, &devices.names()[0], 65535, true, 1000)?;
//! session.send_one(&[0xff; 60])?;
//! session.close()?;
//! # Ok::<(), dpdkpcap::Error>(())
//! ```
pub mod config;
pub mod device;
pub mod driver;
pub mod enumerate;
pub mod env;
pub mod error;
pub mod mbuf;
pub mod mempool;
pub mod mmap_area;
pub mod registry;
pub mod rx_loop;
pub mod session;
pub mod soft;
mod util;

pub use config::Config;
pub use device::DeviceState;
pub use driver::{DeviceInfo, Driver, PciAddr, PortStats};
pub use enumerate::{DeviceDescriptor, DeviceList};
pub use env::Environment;
pub use error::{DriverError, Error, ErrorKind, Result};
pub use mbuf::Mbuf;
pub use mempool::Mempool;
pub use rx_loop::{RxLoop, RxLoopStats};
pub use session::{BreakLoop, CaptureSession, Packet, PacketHeader};
pub use soft::SoftDriver;

/// Size of an interface name field, terminating NUL included.
pub const IF_NAMESIZE: usize = 16;
