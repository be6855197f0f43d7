use std::fmt;
use std::io;

use thiserror::Error;

/// Failure reported by the poll-mode driver. Holds a negative errno value the way the driver
/// framework returns them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverError(pub i32);

impl DriverError {
    pub fn errno(&self) -> i32 {
        -self.0
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (errno {})",
            io::Error::from_raw_os_error(self.errno()),
            self.errno()
        )
    }
}

impl std::error::Error for DriverError {}

/// Broad classes of failure. Callers use these to decide whether a device is still usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Runtime or pool initialization failed or was not performed. Nothing works until init
    /// succeeds.
    Environment,
    /// Per-device setup failed, the device stays unusable.
    Configuration,
    /// Unknown device name or index.
    NotFound,
    /// Device start or stop failed.
    StartStop,
    /// Nothing to receive right now. Expected while polling.
    NoData,
    /// A burst rejected the buffer or no buffer was available.
    Transfer,
    /// Invalid or unreadable configuration.
    Config,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not initialize the driver runtime: {0}")]
    EalInit(#[source] DriverError),

    #[error("could not probe devices: {0}")]
    Probe(#[source] DriverError),

    #[error("could not allocate {pool} memory pool: {source}")]
    PoolCreate {
        pool: String,
        #[source]
        source: Box<Error>,
    },

    #[error("could not map {size} bytes of packet memory (errno {errno})")]
    Mmap { size: usize, errno: i32 },

    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    #[error("global init is not performed yet")]
    EnvNotReady,

    #[error("could not configure the device {port}: {source}")]
    Configure {
        port: u16,
        #[source]
        source: DriverError,
    },

    #[error("could not setup RX queue of the device {port}: {source}")]
    RxQueueSetup {
        port: u16,
        #[source]
        source: DriverError,
    },

    #[error("could not setup TX queue of the device {port}: {source}")]
    TxQueueSetup {
        port: u16,
        #[source]
        source: DriverError,
    },

    #[error("could not read info of the device {port}: {source}")]
    DeviceInfo {
        port: u16,
        #[source]
        source: DriverError,
    },

    #[error("no devices found")]
    NoDevicesFound,

    #[error("could not find device {0}")]
    DeviceNotFound(String),

    #[error("device {0} is not configured")]
    NotConfigured(u16),

    #[error("could not start the device {port}: {source}")]
    StartFailed {
        port: u16,
        #[source]
        source: DriverError,
    },

    #[error("could not stop the device {port}: {source}")]
    StopFailed {
        port: u16,
        #[source]
        source: DriverError,
    },

    #[error("no packet available on device {0}")]
    NoPacketAvailable(u16),

    #[error("transmit burst rejected the packet on device {0}")]
    TransmitFailed(u16),

    #[error("{0} memory pool is exhausted")]
    PoolExhausted(String),

    #[error("packet of {len} bytes does not fit in a {capacity} byte buffer")]
    PayloadTooLarge { len: usize, capacity: usize },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EalInit(_)
            | Error::Probe(_)
            | Error::PoolCreate { .. }
            | Error::Mmap { .. }
            | Error::EnvNotReady => ErrorKind::Environment,
            Error::Driver(_)
            | Error::Configure { .. }
            | Error::RxQueueSetup { .. }
            | Error::TxQueueSetup { .. }
            | Error::DeviceInfo { .. } => ErrorKind::Configuration,
            Error::NoDevicesFound | Error::DeviceNotFound(_) => ErrorKind::NotFound,
            Error::NotConfigured(_) | Error::StartFailed { .. } | Error::StopFailed { .. } => {
                ErrorKind::StartStop
            }
            Error::NoPacketAvailable(_) => ErrorKind::NoData,
            Error::TransmitFailed(_) | Error::PoolExhausted(_) | Error::PayloadTooLarge { .. } => {
                ErrorKind::Transfer
            }
            Error::Config(_) | Error::Yaml(_) | Error::Io(_) => ErrorKind::Config,
        }
    }

    /// True when the caller should simply poll again.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::NoData
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_reports_errno() {
        let err = DriverError(-libc::EBUSY);
        assert_eq!(err.errno(), libc::EBUSY);
        assert!(err.to_string().contains(&format!("errno {}", libc::EBUSY)));
    }

    #[test]
    fn kinds() {
        assert_eq!(Error::EnvNotReady.kind(), ErrorKind::Environment);
        assert_eq!(Error::NoDevicesFound.kind(), ErrorKind::NotFound);
        assert_eq!(Error::NoPacketAvailable(0).kind(), ErrorKind::NoData);
        assert_eq!(Error::TransmitFailed(0).kind(), ErrorKind::Transfer);
        assert_eq!(
            Error::EalInit(DriverError(-libc::EINVAL)).kind(),
            ErrorKind::Environment
        );
        assert_eq!(
            Error::StartFailed {
                port: 1,
                source: DriverError(-libc::EIO)
            }
            .kind(),
            ErrorKind::StartStop
        );
    }

    #[test]
    fn only_no_data_is_retryable() {
        assert!(Error::NoPacketAvailable(3).is_retryable());
        assert!(!Error::TransmitFailed(3).is_retryable());
        assert!(!Error::DeviceNotFound("enp1s0".into()).is_retryable());
    }

    #[test]
    fn messages() {
        assert_eq!(
            Error::DeviceNotFound("enp3s0".into()).to_string(),
            "could not find device enp3s0"
        );
        assert_eq!(
            Error::EnvNotReady.to_string(),
            "global init is not performed yet"
        );
        assert_eq!(
            Error::PayloadTooLarge {
                len: 4000,
                capacity: 2048
            }
            .to_string(),
            "packet of 4000 bytes does not fit in a 2048 byte buffer"
        );
    }
}
