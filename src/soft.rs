//! A software poll-mode driver. Ports are in-memory descriptor rings: packets are injected on
//! the receive side and transmitted packets are collected from the transmit side. Used to run
//! the capture layer without a NIC.

use std::cmp::min;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use arraydeque::{ArrayDeque, Saturating};
use libc::{EALREADY, EBUSY, EINVAL, EIO, ENODEV, ENOMEM};
use tracing::debug;

use crate::driver::{DeviceInfo, Driver, PciAddr, PortConf, PortStats, RxConf, TxConf};
use crate::error::{DriverError, Error, Result};
use crate::mbuf::Mbuf;
use crate::mempool::{Mempool, PoolOptions};
use crate::util::lock;

/// Hardware limit of each descriptor ring.
pub const SOFT_RING_LEN: usize = 128;

const DRIVER_NAME: &str = "net_soft";

type Ring = ArrayDeque<[Mbuf; SOFT_RING_LEN], Saturating>;

/// Calls that can be made to fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    EalInit,
    Probe,
    /// Pool creation fails for the pool with this name
    PoolCreate(String),
    Configure(u16),
    RxQueueSetup(u16),
    TxQueueSetup(u16),
    Start(u16),
    /// Transmit bursts on the port accept nothing
    TxBurst(u16),
}

/// Number of times each control call reached the driver.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub eal_init: usize,
    pub probe: usize,
    pub pool_create: usize,
    pub configure: usize,
    pub rx_queue_setup: usize,
    pub tx_queue_setup: usize,
    pub start: usize,
    pub stop: usize,
}

#[derive(Default)]
struct Calls {
    eal_init: AtomicUsize,
    probe: AtomicUsize,
    pool_create: AtomicUsize,
    configure: AtomicUsize,
    rx_queue_setup: AtomicUsize,
    tx_queue_setup: AtomicUsize,
    start: AtomicUsize,
    stop: AtomicUsize,
}

fn bump(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct RxQueue {
    nb_desc: usize,
    pool: Mempool,
}

struct SoftPort {
    info: DeviceInfo,
    conf: Option<(u16, u16, PortConf)>,
    rxq: Option<RxQueue>,
    tx_desc: Option<usize>,
    started: bool,
    promiscuous: bool,
    rx: Ring,
    tx: Ring,
    stats: PortStats,
}

impl SoftPort {
    fn new(pci_addr: Option<PciAddr>) -> SoftPort {
        SoftPort {
            info: DeviceInfo {
                driver_name: DRIVER_NAME.to_string(),
                pci_addr,
                max_rx_queues: 1,
                max_tx_queues: 1,
            },
            conf: None,
            rxq: None,
            tx_desc: None,
            started: false,
            promiscuous: false,
            rx: ArrayDeque::new(),
            tx: ArrayDeque::new(),
            stats: PortStats::default(),
        }
    }
}

#[derive(Default)]
struct SoftState {
    eal_args: Option<Vec<String>>,
    probed: bool,
    ports: Vec<SoftPort>,
    faults: Vec<Fault>,
}

impl SoftState {
    fn failing(&self, fault: &Fault) -> bool {
        self.faults.contains(fault)
    }

    fn port(&mut self, port: u16) -> std::result::Result<&mut SoftPort, DriverError> {
        if !self.probed {
            return Err(DriverError(-ENODEV));
        }
        self.ports
            .get_mut(port as usize)
            .ok_or(DriverError(-ENODEV))
    }
}

/// Software poll-mode driver.
#[derive(Default)]
pub struct SoftDriver {
    state: Mutex<SoftState>,
    calls: Calls,
}

impl SoftDriver {
    pub fn new() -> SoftDriver {
        Default::default()
    }

    /// Add a device at `pci_addr`. It becomes visible once the bus is probed. Returns its port
    /// number.
    pub fn add_port(&self, pci_addr: PciAddr) -> u16 {
        let mut state = lock(&self.state);
        state.ports.push(SoftPort::new(Some(pci_addr)));
        (state.ports.len() - 1) as u16
    }

    /// Add a virtual device, one without a bus address.
    pub fn add_vdev(&self) -> u16 {
        let mut state = lock(&self.state);
        state.ports.push(SoftPort::new(None));
        (state.ports.len() - 1) as u16
    }

    pub fn inject_fault(&self, fault: Fault) {
        lock(&self.state).faults.push(fault);
    }

    pub fn clear_faults(&self) {
        lock(&self.state).faults.clear();
    }

    pub fn calls(&self) -> CallCounts {
        let c = &self.calls;
        CallCounts {
            eal_init: c.eal_init.load(Ordering::Relaxed),
            probe: c.probe.load(Ordering::Relaxed),
            pool_create: c.pool_create.load(Ordering::Relaxed),
            configure: c.configure.load(Ordering::Relaxed),
            rx_queue_setup: c.rx_queue_setup.load(Ordering::Relaxed),
            tx_queue_setup: c.tx_queue_setup.load(Ordering::Relaxed),
            start: c.start.load(Ordering::Relaxed),
            stop: c.stop.load(Ordering::Relaxed),
        }
    }

    /// Arguments of the successful runtime init, if any.
    pub fn eal_args(&self) -> Option<Vec<String>> {
        lock(&self.state).eal_args.clone()
    }

    pub fn promiscuous(&self, port: u16) -> Option<bool> {
        lock(&self.state)
            .ports
            .get(port as usize)
            .map(|p| p.promiscuous)
    }

    pub fn is_started(&self, port: u16) -> bool {
        lock(&self.state)
            .ports
            .get(port as usize)
            .map_or(false, |p| p.started)
    }

    /// Put a packet on the wire towards `port`. Returns false when the port dropped it: port
    /// stopped, no free buffer, packet too large or RX ring full.
    pub fn inject(&self, port: u16, packet: &[u8]) -> bool {
        let mut state = lock(&self.state);
        let p = match state.ports.get_mut(port as usize) {
            Some(p) => p,
            None => return false,
        };

        let rxq = match (&p.rxq, p.started) {
            (Some(rxq), true) => rxq,
            _ => {
                p.stats.imissed += 1;
                return false;
            }
        };

        if p.rx.len() >= rxq.nb_desc {
            p.stats.imissed += 1;
            return false;
        }

        let mut mbuf = match rxq.pool.alloc() {
            Some(mbuf) => mbuf,
            None => {
                p.stats.rx_nombuf += 1;
                return false;
            }
        };

        if mbuf.append(packet).is_err() {
            p.stats.ierrors += 1;
            return false;
        }

        if p.rx.push_back(mbuf).is_err() {
            p.stats.imissed += 1;
            return false;
        }

        p.stats.ipackets += 1;
        p.stats.ibytes += packet.len() as u64;

        true
    }

    /// Collect the packets transmitted on `port` so far. Their buffers go back to the pool.
    pub fn take_transmitted(&self, port: u16) -> Vec<Vec<u8>> {
        let mut state = lock(&self.state);
        match state.ports.get_mut(port as usize) {
            Some(p) => p.tx.drain(0..).map(|mbuf| mbuf.data().to_vec()).collect(),
            None => Vec::new(),
        }
    }

    /// Number of packets waiting in the RX ring of `port`.
    pub fn rx_pending(&self, port: u16) -> usize {
        lock(&self.state)
            .ports
            .get(port as usize)
            .map_or(0, |p| p.rx.len())
    }
}

impl Driver for SoftDriver {
    fn eal_init(&self, args: &[String]) -> std::result::Result<(), DriverError> {
        bump(&self.calls.eal_init);
        let mut state = lock(&self.state);

        if state.failing(&Fault::EalInit) || args.is_empty() {
            return Err(DriverError(-EINVAL));
        }
        if state.eal_args.is_some() {
            return Err(DriverError(-EALREADY));
        }

        state.eal_args = Some(args.to_vec());
        Ok(())
    }

    fn probe(&self) -> std::result::Result<(), DriverError> {
        bump(&self.calls.probe);
        let mut state = lock(&self.state);

        if state.eal_args.is_none() || state.failing(&Fault::Probe) {
            return Err(DriverError(-ENODEV));
        }

        state.probed = true;
        debug!(ports = state.ports.len(), "probed soft devices");
        Ok(())
    }

    fn port_count(&self) -> u16 {
        let state = lock(&self.state);
        if state.probed {
            state.ports.len() as u16
        } else {
            0
        }
    }

    fn dev_info(&self, port: u16) -> std::result::Result<DeviceInfo, DriverError> {
        let mut state = lock(&self.state);
        Ok(state.port(port)?.info.clone())
    }

    fn dev_configure(
        &self,
        port: u16,
        nb_rx_queues: u16,
        nb_tx_queues: u16,
        conf: &PortConf,
    ) -> std::result::Result<(), DriverError> {
        bump(&self.calls.configure);
        let mut state = lock(&self.state);

        if state.failing(&Fault::Configure(port)) {
            return Err(DriverError(-EIO));
        }

        let p = state.port(port)?;
        if p.started {
            return Err(DriverError(-EBUSY));
        }
        if nb_rx_queues == 0
            || nb_tx_queues == 0
            || nb_rx_queues > p.info.max_rx_queues
            || nb_tx_queues > p.info.max_tx_queues
        {
            return Err(DriverError(-EINVAL));
        }

        // Reconfiguring releases the queues
        p.rxq = None;
        p.tx_desc = None;
        p.rx.clear();
        p.conf = Some((nb_rx_queues, nb_tx_queues, *conf));

        Ok(())
    }

    fn rx_queue_setup(
        &self,
        port: u16,
        queue: u16,
        nb_desc: u16,
        _conf: &RxConf,
        pool: &Mempool,
    ) -> std::result::Result<(), DriverError> {
        bump(&self.calls.rx_queue_setup);
        let mut state = lock(&self.state);

        if state.failing(&Fault::RxQueueSetup(port)) {
            return Err(DriverError(-ENOMEM));
        }

        let p = state.port(port)?;
        let nb_rx = match p.conf {
            Some((nb_rx, _, _)) => nb_rx,
            None => return Err(DriverError(-EINVAL)),
        };
        if p.started {
            return Err(DriverError(-EBUSY));
        }
        if queue >= nb_rx || nb_desc == 0 || nb_desc as usize > SOFT_RING_LEN {
            return Err(DriverError(-EINVAL));
        }

        p.rx.clear();
        p.rxq = Some(RxQueue {
            nb_desc: nb_desc as usize,
            pool: pool.clone(),
        });

        Ok(())
    }

    fn tx_queue_setup(
        &self,
        port: u16,
        queue: u16,
        nb_desc: u16,
        _conf: &TxConf,
    ) -> std::result::Result<(), DriverError> {
        bump(&self.calls.tx_queue_setup);
        let mut state = lock(&self.state);

        if state.failing(&Fault::TxQueueSetup(port)) {
            return Err(DriverError(-ENOMEM));
        }

        let p = state.port(port)?;
        let nb_tx = match p.conf {
            Some((_, nb_tx, _)) => nb_tx,
            None => return Err(DriverError(-EINVAL)),
        };
        if p.started {
            return Err(DriverError(-EBUSY));
        }
        if queue >= nb_tx || nb_desc == 0 || nb_desc as usize > SOFT_RING_LEN {
            return Err(DriverError(-EINVAL));
        }

        p.tx_desc = Some(nb_desc as usize);

        Ok(())
    }

    fn dev_start(&self, port: u16) -> std::result::Result<(), DriverError> {
        bump(&self.calls.start);
        let mut state = lock(&self.state);

        if state.failing(&Fault::Start(port)) {
            return Err(DriverError(-EIO));
        }

        let p = state.port(port)?;
        if p.conf.is_none() || p.rxq.is_none() || p.tx_desc.is_none() {
            return Err(DriverError(-EINVAL));
        }

        p.started = true;
        Ok(())
    }

    fn dev_stop(&self, port: u16) -> std::result::Result<(), DriverError> {
        bump(&self.calls.stop);
        let mut state = lock(&self.state);

        let p = state.port(port)?;
        p.started = false;

        Ok(())
    }

    fn promiscuous_set(&self, port: u16, on: bool) -> std::result::Result<(), DriverError> {
        let mut state = lock(&self.state);
        state.port(port)?.promiscuous = on;
        Ok(())
    }

    fn rx_burst(&self, port: u16, queue: u16, bufs: &mut Vec<Mbuf>, nb_pkts: usize) -> usize {
        let mut state = lock(&self.state);
        let p = match state.ports.get_mut(port as usize) {
            Some(p) if p.started && queue == 0 => p,
            _ => return 0,
        };

        let ready = min(nb_pkts, p.rx.len());
        for _ in 0..ready {
            match p.rx.pop_front() {
                Some(mbuf) => bufs.push(mbuf),
                None => break,
            }
        }

        ready
    }

    fn tx_burst(&self, port: u16, queue: u16, bufs: &mut Vec<Mbuf>) -> usize {
        let mut state = lock(&self.state);
        if state.failing(&Fault::TxBurst(port)) {
            return 0;
        }

        let p = match state.ports.get_mut(port as usize) {
            Some(p) if p.started && queue == 0 => p,
            _ => return 0,
        };
        let nb_desc = match p.tx_desc {
            Some(n) => n,
            None => return 0,
        };

        let ready = min(bufs.len(), nb_desc.saturating_sub(p.tx.len()));
        for mbuf in bufs.drain(..ready) {
            p.stats.opackets += 1;
            p.stats.obytes += mbuf.len() as u64;

            // Space was checked above
            let _ = p.tx.push_back(mbuf);
        }

        ready
    }

    fn stats(&self, port: u16) -> std::result::Result<PortStats, DriverError> {
        let mut state = lock(&self.state);
        Ok(state.port(port)?.stats)
    }

    fn create_pool(&self, options: &PoolOptions) -> Result<Mempool> {
        bump(&self.calls.pool_create);

        if lock(&self.state).failing(&Fault::PoolCreate(options.name.clone())) {
            return Err(Error::Driver(DriverError(-ENOMEM)));
        }

        Mempool::new(options.clone())
    }
}
