use std::hint;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, warn};

use crate::device::QUEUE_ID;
use crate::driver::Driver;
use crate::env::Environment;
use crate::error::Result;
use crate::session::Packet;
use crate::util::lock;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RxLoopStats {
    /// Bursts that returned at least one packet
    pub bursts: u64,
    pub delivered: u64,
    /// Packets dropped because the channel was full
    pub dropped: u64,
}

/// Stop flag, thread handle and final counters of one loop. Shared by the `RxLoop` handle and
/// the session that started the loop, so either can stop it.
pub(crate) struct LoopControl {
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<RxLoopStats>>>,
    stats: Mutex<RxLoopStats>,
}

impl LoopControl {
    pub(crate) fn is_started(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear the running flag and wait for the thread. Returns the final counters; calling it
    /// again returns them again.
    pub(crate) fn halt(&self, port: u16) -> RxLoopStats {
        self.running.store(false, Ordering::Release);

        let handle = lock(&self.handle).take();
        if let Some(handle) = handle {
            let stats = match handle.join() {
                Ok(stats) => {
                    debug!(port, ?stats, "rx loop stopped");
                    stats
                }
                Err(_) => {
                    warn!(port, "rx loop panicked");
                    RxLoopStats::default()
                }
            };
            *lock(&self.stats) = stats;
        }

        *lock(&self.stats)
    }
}

/// A thread polling one device and passing packets to a channel. The running flag is checked
/// once per burst; stopping never interrupts a burst. Closing the session that started the loop
/// stops it too.
pub struct RxLoop {
    port: u16,
    control: Arc<LoopControl>,
}

impl RxLoop {
    pub(crate) fn spawn<D: Driver + 'static>(
        env: Arc<Environment<D>>,
        port: u16,
        burst: usize,
        snaplen: usize,
        sender: Sender<Packet>,
    ) -> Result<RxLoop> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name(format!("rx-loop-{}", port))
            .spawn(move || {
                let stats = poll(env.driver(), port, burst, snaplen, &flag, &sender);
                flag.store(false, Ordering::Release);
                stats
            })?;

        debug!(port, burst, "rx loop started");

        Ok(RxLoop {
            port,
            control: Arc::new(LoopControl {
                running,
                handle: Mutex::new(Some(handle)),
                stats: Mutex::new(RxLoopStats::default()),
            }),
        })
    }

    pub(crate) fn control(&self) -> Arc<LoopControl> {
        self.control.clone()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// False once the loop was stopped, its session closed or its receiver went away.
    pub fn is_started(&self) -> bool {
        self.control.is_started()
    }

    /// Ask the loop to finish its current burst and exit, then wait for it.
    pub fn stop(self) -> RxLoopStats {
        self.control.halt(self.port)
    }
}

impl Drop for RxLoop {
    fn drop(&mut self) {
        self.control.halt(self.port);
    }
}

fn poll<D: Driver>(
    driver: &D,
    port: u16,
    burst: usize,
    snaplen: usize,
    running: &AtomicBool,
    sender: &Sender<Packet>,
) -> RxLoopStats {
    let mut stats = RxLoopStats::default();
    let mut bufs = Vec::with_capacity(burst);

    while running.load(Ordering::Acquire) {
        let n = driver.rx_burst(port, QUEUE_ID, &mut bufs, burst);
        if n == 0 {
            hint::spin_loop();
            thread::yield_now();
            continue;
        }
        stats.bursts += 1;

        for mbuf in bufs.drain(..) {
            let packet = Packet::from_mbuf(&mbuf, snaplen);
            drop(mbuf);

            match sender.try_send(packet) {
                Ok(()) => stats.delivered += 1,
                Err(TrySendError::Full(_)) => stats.dropped += 1,
                Err(TrySendError::Disconnected(_)) => {
                    debug!(port, "rx loop receiver went away");
                    return stats;
                }
            }
        }
    }

    stats
}
