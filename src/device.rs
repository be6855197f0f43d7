//! Per device lifecycle: Uninitialized -> Configured -> Started, and back to Uninitialized on
//! stop.
use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::driver::Driver;
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::mempool::Mempool;
use crate::registry::DeviceRegistry;
use crate::util::lock;

/// Queue used for every burst.
pub const QUEUE_ID: u16 = 0;

const RX_QUEUE_NUMBER: u16 = 1;
const TX_QUEUE_NUMBER: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Uninitialized,
    Configured,
    Started,
}

impl Default for DeviceState {
    fn default() -> Self {
        DeviceState::Uninitialized
    }
}

#[derive(Debug, Default)]
pub(crate) struct DeviceSlot {
    pub(crate) state: DeviceState,
    /// Open capture sessions bound to the device
    pub(crate) sessions: usize,
    /// Bumped by every stop. Sessions bound before a stop no longer count.
    pub(crate) generation: u64,
}

#[derive(Debug, Default)]
pub(crate) struct DeviceTable {
    slots: BTreeMap<u16, DeviceSlot>,
    pub(crate) registry: DeviceRegistry,
    pub(crate) enumerated: bool,
}

impl DeviceTable {
    pub(crate) fn state(&self, port: u16) -> DeviceState {
        self.slots.get(&port).map_or(DeviceState::Uninitialized, |s| s.state)
    }

    pub(crate) fn sessions(&self, port: u16) -> usize {
        self.slots.get(&port).map_or(0, |s| s.sessions)
    }

    pub(crate) fn slot_mut(&mut self, port: u16) -> &mut DeviceSlot {
        self.slots.entry(port).or_default()
    }
}

impl<D: Driver> Environment<D> {
    /// Configure `port` with one RX queue fed by the RX pool and one TX queue. A port that is
    /// already configured or started is left alone.
    pub fn device_init(&self, port: u16) -> Result<()> {
        let rx_pool = self.rx_pool()?;
        let mut devices = lock(&self.devices);
        self.init_locked(&mut devices, port, &rx_pool)
    }

    pub(crate) fn init_locked(
        &self,
        devices: &mut DeviceTable,
        port: u16,
        rx_pool: &Mempool,
    ) -> Result<()> {
        if devices.state(port) != DeviceState::Uninitialized {
            return Ok(());
        }

        let cfg = &self.config().port;
        let drv = self.driver();

        drv.dev_configure(port, RX_QUEUE_NUMBER, TX_QUEUE_NUMBER, &cfg.port_conf())
            .map_err(|source| Error::Configure { port, source })?;

        drv.rx_queue_setup(port, QUEUE_ID, cfg.rx_desc, &cfg.rx_conf(), rx_pool)
            .map_err(|source| Error::RxQueueSetup { port, source })?;

        drv.tx_queue_setup(port, QUEUE_ID, cfg.tx_desc, &cfg.tx_conf())
            .map_err(|source| Error::TxQueueSetup { port, source })?;

        devices.slot_mut(port).state = DeviceState::Configured;
        debug!(port, "device configured");

        Ok(())
    }

    /// Apply the promiscuous setting and start a configured port.
    pub fn device_start(&self, port: u16, promiscuous: bool) -> Result<()> {
        self.pools()?;
        let mut devices = lock(&self.devices);
        self.start_locked(&mut devices, port, promiscuous)
    }

    fn start_locked(&self, devices: &mut DeviceTable, port: u16, promiscuous: bool) -> Result<()> {
        let state = devices.state(port);
        if state == DeviceState::Uninitialized {
            return Err(Error::NotConfigured(port));
        }

        let drv = self.driver();
        drv.promiscuous_set(port, promiscuous)
            .map_err(|source| Error::StartFailed { port, source })?;

        if state == DeviceState::Configured {
            drv.dev_start(port)
                .map_err(|source| Error::StartFailed { port, source })?;
            devices.slot_mut(port).state = DeviceState::Started;
            info!(port, promiscuous, "device started");
        }

        Ok(())
    }

    /// Stop a port. It has to be configured again before it can be restarted.
    pub fn device_stop(&self, port: u16) -> Result<()> {
        let mut devices = lock(&self.devices);
        self.stop_locked(&mut devices, port)
    }

    fn stop_locked(&self, devices: &mut DeviceTable, port: u16) -> Result<()> {
        if devices.state(port) == DeviceState::Uninitialized {
            return Err(Error::NotConfigured(port));
        }

        self.driver()
            .dev_stop(port)
            .map_err(|source| Error::StopFailed { port, source })?;

        let slot = devices.slot_mut(port);
        slot.state = DeviceState::Uninitialized;
        slot.sessions = 0;
        slot.generation += 1;
        info!(port, "device stopped");

        Ok(())
    }

    pub fn device_state(&self, port: u16) -> DeviceState {
        lock(&self.devices).state(port)
    }

    /// Number of capture sessions open on `port`.
    pub fn device_sessions(&self, port: u16) -> usize {
        lock(&self.devices).sessions(port)
    }

    /// Bind a new session to `port`: configure it again if an earlier close stopped it, then
    /// start it. Returns the generation the session is bound to.
    pub(crate) fn attach(&self, port: u16, promiscuous: bool) -> Result<u64> {
        let rx_pool = self.rx_pool()?;
        let mut devices = lock(&self.devices);

        self.init_locked(&mut devices, port, &rx_pool)?;
        self.start_locked(&mut devices, port, promiscuous)?;

        let slot = devices.slot_mut(port);
        slot.sessions += 1;

        Ok(slot.generation)
    }

    /// Release a session's binding. The last session to leave stops the device. A session
    /// bound before the device was last stopped holds nothing and leaves it alone.
    pub(crate) fn detach(&self, port: u16, generation: u64) -> Result<()> {
        let mut devices = lock(&self.devices);

        let slot = devices.slot_mut(port);
        if slot.generation != generation {
            debug!(port, generation, "session outlived a device stop");
            return Ok(());
        }

        slot.sessions = slot.sessions.saturating_sub(1);
        if slot.sessions > 0 || slot.state == DeviceState::Uninitialized {
            return Ok(());
        }

        self.stop_locked(&mut devices, port)
    }
}
