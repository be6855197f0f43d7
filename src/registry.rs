use std::collections::{BTreeMap, HashMap};

use tracing::warn;

use crate::IF_NAMESIZE;

/// Device names by port and ports by name. A port is named once and keeps the name.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    names: BTreeMap<u16, String>,
    ports: HashMap<String, u16>,
}

impl DeviceRegistry {
    pub fn new() -> DeviceRegistry {
        Default::default()
    }

    /// Name `port` unless it already has a name. Returns the name the port ends up with.
    pub fn register(&mut self, port: u16, name: String) -> &str {
        let ports = &mut self.ports;
        self.names
            .entry(port)
            .or_insert_with(|| {
                match ports.get(&name) {
                    Some(other) => warn!(%name, port, other, "device name already taken"),
                    None => {
                        ports.insert(name.clone(), port);
                    }
                }
                name
            })
            .as_str()
    }

    pub fn name(&self, port: u16) -> Option<&str> {
        self.names.get(&port).map(|s| s.as_str())
    }

    /// Port registered under `name`. Names that do not fit the interface name field never
    /// match.
    pub fn find(&self, name: &str) -> Option<u16> {
        if name.len() >= IF_NAMESIZE {
            return None;
        }
        self.ports.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Ports and their names in port order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &str)> {
        self.names.iter().map(|(port, name)| (*port, name.as_str()))
    }
}
