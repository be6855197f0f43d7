use std::sync::Mutex;

use tracing::info;

use crate::config::{Config, RX_POOL_NAME, TX_POOL_NAME};
use crate::device::DeviceTable;
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::mempool::Mempool;
use crate::util::lock;

/// The RX and TX buffer pools.
#[derive(Debug, Clone)]
pub struct Pools {
    pub rx: Mempool,
    pub tx: Mempool,
}

#[derive(Default)]
struct Bootstrap {
    eal_ready: bool,
    pools: Option<Pools>,
}

/// Everything the capture layer shares between devices and sessions: the driver, the two buffer
/// pools and the device table. Create one per process and share it with an `Arc`.
pub struct Environment<D: Driver> {
    driver: D,
    config: Config,
    boot: Mutex<Bootstrap>,
    pub(crate) devices: Mutex<DeviceTable>,
}

impl<D: Driver> Environment<D> {
    pub fn new(driver: D, config: Config) -> Environment<D> {
        Environment {
            driver,
            config,
            boot: Mutex::new(Bootstrap::default()),
            devices: Mutex::new(DeviceTable::default()),
        }
    }

    /// Environment with the default deployment parameters.
    pub fn with_defaults(driver: D) -> Environment<D> {
        Environment::new(driver, Config::default())
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Initialize the driver runtime and allocate the buffer pools. Calling it again after a
    /// success does nothing. After a failure the environment stays uninitialized and the call
    /// may be retried; the runtime itself is only initialized once.
    pub fn init(&self) -> Result<()> {
        let mut boot = lock(&self.boot);
        if boot.pools.is_some() {
            return Ok(());
        }

        self.config.validate()?;

        if !boot.eal_ready {
            let args = self.config.eal.args();
            self.driver.eal_init(&args).map_err(Error::EalInit)?;
            boot.eal_ready = true;
        }

        self.driver.probe().map_err(Error::Probe)?;

        let rx = self.create_pool(RX_POOL_NAME)?;
        let tx = self.create_pool(TX_POOL_NAME)?;

        info!(
            capacity = self.config.pool.capacity,
            data_room = self.config.pool.data_room,
            "environment initialized"
        );

        boot.pools = Some(Pools { rx, tx });
        Ok(())
    }

    fn create_pool(&self, name: &str) -> Result<Mempool> {
        self.driver
            .create_pool(&self.config.pool.options(name))
            .map_err(|err| Error::PoolCreate {
                pool: name.to_string(),
                source: Box::new(err),
            })
    }

    pub fn is_initialized(&self) -> bool {
        lock(&self.boot).pools.is_some()
    }

    pub fn pools(&self) -> Result<Pools> {
        lock(&self.boot).pools.clone().ok_or(Error::EnvNotReady)
    }

    pub fn rx_pool(&self) -> Result<Mempool> {
        Ok(self.pools()?.rx)
    }

    pub fn tx_pool(&self) -> Result<Mempool> {
        Ok(self.pools()?.tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::PciAddr;
    use crate::error::ErrorKind;
    use crate::soft::{Fault, SoftDriver};

    #[test]
    fn init_is_idempotent() {
        let env = Environment::with_defaults(SoftDriver::new());
        assert!(!env.is_initialized());
        assert!(matches!(env.rx_pool(), Err(Error::EnvNotReady)));

        env.init().unwrap();
        let rx = env.rx_pool().unwrap();
        env.init().unwrap();

        let calls = env.driver().calls();
        assert_eq!(calls.eal_init, 1);
        assert_eq!(calls.pool_create, 2);
        assert!(env.rx_pool().unwrap().same_pool(&rx));
        assert!(!env.tx_pool().unwrap().same_pool(&rx));
    }

    #[test]
    fn pools_follow_config() {
        let env = Environment::with_defaults(SoftDriver::new());
        env.init().unwrap();

        let pools = env.pools().unwrap();
        assert_eq!(pools.rx.name(), "RX_POOL");
        assert_eq!(pools.tx.name(), "TX_POOL");
        assert_eq!(pools.rx.capacity(), 512);
        assert_eq!(pools.tx.options().cache_size, 32);
        assert_eq!(
            env.driver().eal_args().unwrap(),
            env.config().eal.args()
        );
    }

    #[test]
    fn eal_failure() {
        let drv = SoftDriver::new();
        drv.inject_fault(Fault::EalInit);
        let env = Environment::with_defaults(drv);

        let err = env.init().unwrap_err();
        assert!(matches!(err, Error::EalInit(_)));
        assert_eq!(err.kind(), ErrorKind::Environment);
        assert!(!env.is_initialized());
    }

    #[test]
    fn tx_pool_failure_leaves_environment_uninitialized() {
        let drv = SoftDriver::new();
        drv.add_port(PciAddr::default());
        drv.inject_fault(Fault::PoolCreate(TX_POOL_NAME.to_string()));
        let env = Environment::with_defaults(drv);

        match env.init() {
            Err(Error::PoolCreate { pool, .. }) => assert_eq!(pool, "TX_POOL"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!env.is_initialized());

        // Retry without initializing the runtime a second time
        env.driver().clear_faults();
        env.init().unwrap();
        assert!(env.is_initialized());
        assert_eq!(env.driver().calls().eal_init, 1);
        assert_eq!(env.driver().calls().probe, 2);
    }

    #[test]
    fn invalid_config() {
        let mut config = Config::default();
        config.pool.capacity = 0;
        let env = Environment::new(SoftDriver::new(), config);

        assert_eq!(env.init().unwrap_err().kind(), ErrorKind::Config);
        assert_eq!(env.driver().calls().eal_init, 0);
    }

    #[test]
    fn concurrent_first_use_initializes_once() {
        use std::sync::{Arc, Barrier};
        use std::thread;

        const THREADS: usize = 8;

        let drv = SoftDriver::new();
        drv.add_port(PciAddr::default());
        let env = Arc::new(Environment::with_defaults(drv));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let env = env.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    if i % 2 == 0 {
                        env.init().map(|_| ())
                    } else {
                        env.enumerate_devices().map(|_| ())
                    }
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap().unwrap();
        }

        let calls = env.driver().calls();
        assert_eq!(calls.eal_init, 1);
        assert_eq!(calls.probe, 1);
        assert_eq!(calls.pool_create, 2);
        assert_eq!(calls.configure, 1);
        assert!(env.is_initialized());
    }
}
