use std::cmp::min;
use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};

use crossbeam_channel::{bounded, Receiver};
use tracing::{info, trace, warn};

use crate::device::QUEUE_ID;
use crate::driver::{Driver, PortStats};
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::mbuf::Mbuf;
use crate::rx_loop::{LoopControl, RxLoop};

/// Per packet metadata, as in a pcap packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub ts: SystemTime,
    /// Bytes captured
    pub caplen: u32,
    /// Bytes on the wire
    pub len: u32,
}

/// A received packet copied out of its driver buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub data: Vec<u8>,
}

impl Packet {
    pub(crate) fn from_mbuf(mbuf: &Mbuf, snaplen: usize) -> Packet {
        let len = mbuf.len();
        let caplen = min(len, snaplen);

        Packet {
            header: PacketHeader {
                ts: SystemTime::now(),
                caplen: caplen as u32,
                len: len as u32,
            },
            data: mbuf.data()[..caplen].to_vec(),
        }
    }
}

/// Makes a running `CaptureSession::loop_packets` return. Can be moved to another thread.
#[derive(Debug, Clone, Default)]
pub struct BreakLoop(Arc<AtomicBool>);

impl BreakLoop {
    pub fn break_loop(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// An open device. Packets are received and sent one burst of one at a time; nothing blocks.
///
/// Closing the last session bound to a device stops the device. Dropping a session closes it.
/// Closing a session also stops the RX loops it started.
pub struct CaptureSession<D: Driver + 'static> {
    env: Arc<Environment<D>>,
    port: u16,
    /// Device generation the session is bound to
    generation: u64,
    loops: Vec<Arc<LoopControl>>,
    name: String,
    snaplen: usize,
    promiscuous: bool,
    timeout: Duration,
    errbuf: String,
    brk: BreakLoop,
    closed: bool,
}

impl<D: Driver + 'static> CaptureSession<D> {
    /// Open the device enumerated under `name` and start it.
    ///
    /// # Arguments
    ///
    /// * snaplen: Maximum number of bytes captured per packet, 0 for no limit
    /// * promiscuous: Receive all traffic on the link
    /// * timeout_ms: Kept for callers that read it back; receive calls never wait
    pub fn open(
        env: &Arc<Environment<D>>,
        name: &str,
        snaplen: u32,
        promiscuous: bool,
        timeout_ms: u32,
    ) -> Result<CaptureSession<D>> {
        info!(device = name, "opening device");

        if !env.is_initialized() {
            return Err(Error::EnvNotReady);
        }

        let port = env.find_device(name)?;
        let generation = env.attach(port, promiscuous)?;

        Ok(CaptureSession {
            env: env.clone(),
            port,
            generation,
            loops: Vec::new(),
            name: name.to_string(),
            snaplen: if snaplen == 0 {
                usize::MAX
            } else {
                snaplen as usize
            },
            promiscuous,
            timeout: Duration::from_millis(timeout_ms as u64),
            errbuf: String::new(),
            brk: BreakLoop::default(),
            closed: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn snaplen(&self) -> usize {
        self.snaplen
    }

    pub fn promiscuous(&self) -> bool {
        self.promiscuous
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn environment(&self) -> &Arc<Environment<D>> {
        &self.env
    }

    /// Message of the last error this session returned, empty if there was none.
    pub fn geterr(&self) -> &str {
        &self.errbuf
    }

    fn record<T>(&mut self, r: Result<T>) -> Result<T> {
        if let Err(err) = &r {
            self.errbuf = err.to_string();
        }
        r
    }

    /// Take one packet from the device. Returns `Error::NoPacketAvailable` right away if there
    /// is none.
    pub fn receive_one(&mut self) -> Result<Packet> {
        let r = self.try_receive();
        self.record(r)
    }

    fn try_receive(&self) -> Result<Packet> {
        let mut bufs = Vec::with_capacity(1);
        let n = self
            .env
            .driver()
            .rx_burst(self.port, QUEUE_ID, &mut bufs, 1);

        let mbuf = match bufs.pop() {
            Some(mbuf) if n > 0 => mbuf,
            _ => {
                trace!(port = self.port, "rx burst returned nothing");
                return Err(Error::NoPacketAvailable(self.port));
            }
        };

        Ok(Packet::from_mbuf(&mbuf, self.snaplen))
    }

    /// Copy `bytes` into a buffer from the TX pool and hand it to the device. On failure the
    /// buffer is back in the pool before this returns.
    pub fn send_one(&mut self, bytes: &[u8]) -> Result<()> {
        let r = self.try_send(bytes);
        self.record(r)
    }

    fn try_send(&self, bytes: &[u8]) -> Result<()> {
        let pool = self.env.tx_pool()?;
        let mut mbuf = pool
            .alloc()
            .ok_or_else(|| Error::PoolExhausted(pool.name().to_string()))?;
        mbuf.append(bytes)?;

        trace!(port = self.port, len = bytes.len(), "sending a packet");

        let mut bufs = vec![mbuf];
        let sent = self.env.driver().tx_burst(self.port, QUEUE_ID, &mut bufs);
        if sent == 0 {
            warn!(port = self.port, "tx burst failed");
            return Err(Error::TransmitFailed(self.port));
        }

        Ok(())
    }

    /// Receive packets and pass each to `callback` until `cnt` packets were delivered, or
    /// forever if `cnt` is 0. Returns early when the loop is broken through `breaker()`.
    /// Returns the number of packets delivered.
    pub fn loop_packets<F>(&mut self, cnt: usize, mut callback: F) -> Result<usize>
    where
        F: FnMut(&PacketHeader, &[u8]),
    {
        let mut delivered = 0;

        loop {
            if self.brk.take() {
                break;
            }
            if cnt != 0 && delivered >= cnt {
                break;
            }

            match self.try_receive() {
                Ok(packet) => {
                    callback(&packet.header, &packet.data);
                    delivered += 1;
                }
                Err(err) if err.is_retryable() => {
                    hint::spin_loop();
                    thread::yield_now();
                }
                Err(err) => return self.record(Err(err)),
            }
        }

        Ok(delivered)
    }

    pub fn breaker(&self) -> BreakLoop {
        self.brk.clone()
    }

    /// Start a thread polling the device and sending each packet to the returned channel,
    /// which holds up to `capacity` packets. The loop runs until stopped or until the session
    /// is closed.
    pub fn rx_loop(&mut self, capacity: usize) -> Result<(RxLoop, Receiver<Packet>)> {
        let (sender, receiver) = bounded(capacity);
        let rx_loop = RxLoop::spawn(
            self.env.clone(),
            self.port,
            self.env.config().port.rx_burst,
            self.snaplen,
            sender,
        )?;

        self.loops.retain(|control| control.is_started());
        self.loops.push(rx_loop.control());

        Ok((rx_loop, receiver))
    }

    pub fn stats(&self) -> Result<PortStats> {
        Ok(self.env.driver().stats(self.port)?)
    }

    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        info!(device = %self.name, "closing device");
        self.stop_loops();
        self.env.detach(self.port, self.generation)
    }

    fn stop_loops(&mut self) {
        for control in self.loops.drain(..) {
            control.halt(self.port);
        }
    }
}

impl<D: Driver + 'static> Drop for CaptureSession<D> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }

        self.stop_loops();
        if let Err(err) = self.env.detach(self.port, self.generation) {
            warn!(device = %self.name, %err, "failed to close device");
        }
    }
}
