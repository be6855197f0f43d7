//
// End to end scenarios: enumerate the software ports, open them, move packets through them and
// close them again.
//
use std::sync::Arc;
use std::thread;

use pnet::packet::ethernet::{EtherTypes, EthernetPacket};

use dpdkpcap::soft::Fault;
use dpdkpcap::{CaptureSession, DeviceState, Driver, Error, ErrorKind};

mod common;
use common::{environment, frame, random_len, seq, DST_MAC, SRC_MAC};

#[test]
fn open_before_init() {
    let env = environment(&[(0, 0)]);

    let r = CaptureSession::open(&env, "enp0s0", 65535, true, 1000);
    match r {
        Err(err) => {
            assert!(matches!(err, Error::EnvNotReady));
            assert_eq!(err.kind(), ErrorKind::Environment);
        }
        Ok(_) => panic!("open succeeded without init"),
    }
}

#[test]
fn no_devices_present() {
    let env = environment(&[]);
    env.init().unwrap();

    assert!(matches!(env.enumerate_devices(), Err(Error::NoDevicesFound)));
}

#[test]
fn one_device() {
    let env = environment(&[(3, 2)]);

    let devices = env.enumerate_devices().unwrap();
    assert_eq!(devices.names(), vec!["enp3s2"]);

    let mut s = CaptureSession::open(&env, "enp3s2", 65535, true, 1000).unwrap();
    assert_eq!(env.device_state(0), DeviceState::Started);
    assert_eq!(env.driver().promiscuous(0), Some(true));

    s.send_one(&[0x01, 0x02, 0x03]).unwrap();
    assert_eq!(env.driver().take_transmitted(0), vec![vec![1, 2, 3]]);

    env.driver().inject_fault(Fault::TxBurst(0));
    assert!(matches!(
        s.send_one(&[0x01, 0x02, 0x03]),
        Err(Error::TransmitFailed(0))
    ));
    env.driver().clear_faults();

    assert!(matches!(s.receive_one(), Err(Error::NoPacketAvailable(0))));

    s.close().unwrap();
    env.release_devices(devices);
}

#[test]
fn frames_round_trip_through_the_wire() {
    let env = environment(&[(1, 0), (1, 1)]);
    let devices = env.enumerate_devices().unwrap();
    assert_eq!(devices.len(), 2);

    let mut a = CaptureSession::open(&env, "enp1s0", 65535, true, 1000).unwrap();
    let mut b = CaptureSession::open(&env, "enp1s1", 65535, false, 1000).unwrap();

    // Whatever a transmits is put on b's wire
    let mut sent = Vec::new();
    for i in 0..50 {
        let f = frame(random_len(), i);
        a.send_one(&f).unwrap();
        sent.push(f);

        for f in env.driver().take_transmitted(a.port()) {
            assert!(env.driver().inject(b.port(), &f));
        }
    }

    for expected in &sent {
        let p = b.receive_one().unwrap();
        assert_eq!(p.header.len as usize, expected.len());
        assert_eq!(&p.data, expected);

        let eth = EthernetPacket::new(&p.data).unwrap();
        assert_eq!(eth.get_source(), SRC_MAC);
        assert_eq!(eth.get_destination(), DST_MAC);
        assert_eq!(eth.get_ethertype(), EtherTypes::Ipv4);
    }
    assert!(b.receive_one().is_err());

    assert_eq!(env.tx_pool().unwrap().in_use(), 0);
    assert_eq!(env.rx_pool().unwrap().in_use(), 0);

    let stats = b.stats().unwrap();
    assert_eq!(stats.ipackets, 50);
    assert_eq!(a.stats().unwrap().opackets, 50);
}

#[test]
fn pool_reuse_over_capacity_cycles() {
    let env = environment(&[(2, 0)]);
    env.enumerate_devices().unwrap();
    let mut s = CaptureSession::open(&env, "enp2s0", 65535, true, 1000).unwrap();

    let capacity = env.config().pool.capacity;
    for i in 0..capacity * 2 {
        s.send_one(&frame(64, i as u32)).unwrap();
        assert_eq!(env.driver().take_transmitted(0).len(), 1);

        assert!(env.driver().inject(0, &frame(64, i as u32)));
        let p = s.receive_one().unwrap();
        assert_eq!(seq(&p.data), i as u32);
    }

    assert_eq!(env.tx_pool().unwrap().available(), capacity);
    assert_eq!(env.rx_pool().unwrap().available(), capacity);
}

#[test]
fn tx_pool_exhaustion_is_reported() {
    let env = environment(&[(2, 0)]);
    env.enumerate_devices().unwrap();
    let mut s = CaptureSession::open(&env, "enp2s0", 65535, true, 1000).unwrap();

    // Hold every TX buffer
    let pool = env.tx_pool().unwrap();
    let mut held = Vec::new();
    pool.alloc_bulk(&mut held, pool.capacity());

    let err = s.send_one(&[1, 2, 3]).unwrap_err();
    assert!(matches!(err, Error::PoolExhausted(ref name) if name == "TX_POOL"));
    assert_eq!(err.kind(), ErrorKind::Transfer);

    held.clear();
    s.send_one(&[1, 2, 3]).unwrap();
}

#[test]
fn sessions_on_one_device() {
    let env = environment(&[(5, 0)]);
    env.enumerate_devices().unwrap();

    let first = CaptureSession::open(&env, "enp5s0", 65535, true, 1000).unwrap();
    let second = CaptureSession::open(&env, "enp5s0", 65535, true, 1000).unwrap();
    assert_eq!(env.device_sessions(0), 2);

    first.close().unwrap();
    assert_eq!(env.device_state(0), DeviceState::Started);

    second.close().unwrap();
    assert_eq!(env.device_state(0), DeviceState::Uninitialized);
}

#[test]
fn concurrent_senders_share_the_tx_pool() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 200;

    let env = environment(&[(6, 0)]);
    env.enumerate_devices().unwrap();
    // Keeps the device started while the threads come and go
    let keep = CaptureSession::open(&env, "enp6s0", 65535, true, 1000).unwrap();

    let mut handles = Vec::new();
    for t in 0..THREADS {
        let env = Arc::clone(&env);
        handles.push(thread::spawn(move || {
            let mut s = CaptureSession::open(&env, "enp6s0", 65535, true, 1000).unwrap();
            let mut sent = 0;
            for i in 0..PER_THREAD {
                let f = frame(128, (t * PER_THREAD + i) as u32);
                // The TX ring may be full while another thread drains it
                while s.send_one(&f).is_err() {
                    env.driver().take_transmitted(0);
                    thread::yield_now();
                }
                sent += 1;
            }
            sent
        }));
    }

    let mut total = 0;
    for h in handles {
        total += h.join().unwrap();
    }
    assert_eq!(total, THREADS * PER_THREAD);
    assert_eq!(env.device_sessions(0), 1);
    keep.close().unwrap();

    env.driver().take_transmitted(0);
    assert_eq!(env.tx_pool().unwrap().in_use(), 0);
    assert_eq!(
        env.driver().stats(0).map(|s| s.opackets),
        Ok((THREADS * PER_THREAD) as u64)
    );
}

#[test]
fn enumerating_twice_gives_the_same_list() {
    let env = environment(&[(7, 0), (7, 1)]);

    let first = env.enumerate_devices().unwrap();
    let second = env.enumerate_devices().unwrap();

    assert_eq!(first.names(), second.names());
    assert_eq!(second.len(), 2);
}
