use std::slice;
use std::vec;

use tracing::{debug, info};

use crate::driver::{DeviceInfo, Driver, PciAddr};
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::util::{lock, truncate_to_field};
use crate::IF_NAMESIZE;

/// An openable device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    pub name: String,
    pub port: u16,
    pub pci_addr: Option<PciAddr>,
    pub driver_name: String,
}

/// Devices in port order, as returned by `Environment::enumerate_devices`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceList {
    devices: Vec<DeviceDescriptor>,
}

impl DeviceList {
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<&DeviceDescriptor> {
        self.devices.get(idx)
    }

    pub fn iter(&self) -> slice::Iter<'_, DeviceDescriptor> {
        self.devices.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.devices.iter().map(|d| d.name.as_str()).collect()
    }
}

impl IntoIterator for DeviceList {
    type Item = DeviceDescriptor;
    type IntoIter = vec::IntoIter<DeviceDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.into_iter()
    }
}

impl<'a> IntoIterator for &'a DeviceList {
    type Item = &'a DeviceDescriptor;
    type IntoIter = slice::Iter<'a, DeviceDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.devices.iter()
    }
}

/// Interface name of a device: `enp{bus}s{devid}` from its bus address, `dpdk{port}` for
/// virtual devices. Never longer than the interface name field allows.
///
/// The PCI function is not part of the name, so the functions of a multi-function NIC share
/// one name. Only the lowest port with a given name can be found by name; the others are
/// listed by enumeration but cannot be opened.
pub fn device_name(port: u16, info: &DeviceInfo) -> String {
    let name = match info.pci_addr {
        Some(addr) => format!("enp{}s{}", addr.bus, addr.devid),
        None => format!("dpdk{}", port),
    };
    truncate_to_field(name, IF_NAMESIZE)
}

impl<D: Driver> Environment<D> {
    /// Initialize the environment if needed, configure every device and name it. Any device
    /// failing to configure aborts the enumeration. Enumerating again returns the same names
    /// and configures again the devices that were stopped in between.
    pub fn enumerate_devices(&self) -> Result<DeviceList> {
        self.init()?;
        let rx_pool = self.rx_pool()?;

        let count = self.driver().port_count();
        if count == 0 {
            return Err(Error::NoDevicesFound);
        }
        info!(count, "discovered devices");

        let mut devices = lock(&self.devices);
        if devices.enumerated {
            debug!("enumerating devices again");
        }

        let mut list = Vec::with_capacity(count as usize);
        for port in 0..count {
            self.init_locked(&mut devices, port, &rx_pool)?;

            let info = self
                .driver()
                .dev_info(port)
                .map_err(|source| Error::DeviceInfo { port, source })?;

            let name = devices
                .registry
                .register(port, device_name(port, &info))
                .to_string();
            debug!(%name, port, "allocated device name");

            list.push(DeviceDescriptor {
                name,
                port,
                pci_addr: info.pci_addr,
                driver_name: info.driver_name,
            });
        }

        devices.enumerated = true;

        Ok(DeviceList { devices: list })
    }

    /// Port of the device enumerated under `name`.
    pub fn find_device(&self, name: &str) -> Result<u16> {
        lock(&self.devices)
            .registry
            .find(name)
            .ok_or_else(|| Error::DeviceNotFound(name.to_string()))
    }

    /// Name given to `port` by enumeration.
    pub fn device_name(&self, port: u16) -> Option<String> {
        lock(&self.devices)
            .registry
            .name(port)
            .map(|s| s.to_string())
    }

    /// Release a list returned by `enumerate_devices`.
    pub fn release_devices(&self, list: DeviceList) {
        if !self.is_initialized() {
            return;
        }

        for device in list {
            debug!(name = %device.name, "releasing device");
        }
    }
}
