//
// Demo opens every software device, feeds generated frames to them and drops whatever the
// capture sessions receive while printing the packet rate.
//
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time;
use structopt::StructOpt;

use cli_table::{format::Justify, Table, WithTitle};
use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::util::MacAddr;

use dpdkpcap::driver::PciAddr;
use dpdkpcap::{CaptureSession, Config, Environment, RxLoop, SoftDriver};

const CHANNEL_LEN: usize = 1024;

#[derive(StructOpt, Debug)]
#[structopt(name = "softdrop")]
struct Opt {
    /// Number of software devices
    #[structopt(long, default_value = "2")]
    ports: u8,

    /// Frame size
    #[structopt(long, default_value = "64")]
    frame_size: usize,

    /// Optional YAML config file
    #[structopt(long)]
    config_file: Option<std::string::String>,
}

#[derive(Default, Debug, Clone, Table)]
struct StatsRow {
    #[table(name = "Device", justify = "Justify::Right")]
    device: String,
    #[table(name = "Rx Packets")]
    rx_packets: usize,
    #[table(name = "Rx Packet Rate (PPS)")]
    rx_packets_rate: usize,
    #[table(name = "Missed")]
    missed: u64,
}

fn frame(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len.max(14)];
    if let Some(mut eth) = MutableEthernetPacket::new(&mut buf[..]) {
        eth.set_destination(MacAddr(0xff, 0xff, 0xff, 0xff, 0xff, 0xff));
        eth.set_source(MacAddr(0x02, 0, 0, 0, 0, 0x01));
        eth.set_ethertype(EtherTypes::Ipv4);
    }
    buf
}

/// Puts frames on every device's wire until `exit` is set
fn do_generator(
    env: Arc<Environment<SoftDriver>>,
    ports: Vec<u16>,
    len: usize,
    exit: Arc<AtomicBool>,
) {
    let f = frame(len);

    while !exit.load(Ordering::SeqCst) {
        for port in &ports {
            if !env.driver().inject(*port, &f) {
                thread::yield_now();
            }
        }
    }
}

fn main() {
    let opt = Opt::from_args();

    let exit = Arc::new(AtomicBool::new(false));
    let r = exit.clone();

    ctrlc::set_handler(move || {
        r.store(true, Ordering::SeqCst);
    })
    .expect("Error setting Ctrl-C handler");
    println!("CTRL-C to exit");

    let config = match &opt.config_file {
        Some(path) => match Config::from_file(path) {
            Ok(config) => config,
            Err(err) => {
                println!("Error loading YAML config file {} error: {}", path, err);
                return;
            }
        },
        None => Config::default(),
    };

    //
    // Setup the software devices
    //
    let drv = SoftDriver::new();
    for devid in 0..opt.ports {
        drv.add_port(PciAddr {
            domain: 0,
            bus: 1,
            devid,
            function: 0,
        });
    }
    let env = Arc::new(Environment::new(drv, config));

    let devices = match env.enumerate_devices() {
        Ok(devices) => devices,
        Err(err) => panic!("Failed to enumerate devices: {}", err),
    };

    //
    // Open every device and start its RX loop
    //
    let mut sessions = Vec::new();
    let mut loops: Vec<(String, RxLoop, crossbeam_channel::Receiver<dpdkpcap::Packet>)> =
        Vec::new();
    for dev in &devices {
        let r = CaptureSession::open(&env, &dev.name, 65535, true, 1000);
        let mut session = match r {
            Ok(session) => session,
            Err(err) => panic!("Failed to open {}: {}", dev.name, err),
        };

        let (rx_loop, packets) = match session.rx_loop(CHANNEL_LEN) {
            Ok(r) => r,
            Err(err) => panic!("Failed to start rx loop on {}: {}", dev.name, err),
        };
        println!("Opened {} at {:?}", dev.name, dev.pci_addr);

        loops.push((dev.name.clone(), rx_loop, packets));
        sessions.push(session);
    }

    let ports: Vec<u16> = sessions.iter().map(|s| s.port()).collect();
    let generator = {
        let env = env.clone();
        let exit = exit.clone();
        let len = opt.frame_size;
        thread::spawn(move || do_generator(env, ports, len, exit))
    };

    //
    // Drain the channels, printing stats once a second
    //
    let mut counts = vec![0usize; loops.len()];
    let mut last = vec![0usize; loops.len()];
    let mut last_time = time::Instant::now();

    while !exit.load(Ordering::SeqCst) {
        for (i, (_, _, packets)) in loops.iter().enumerate() {
            counts[i] += packets.try_iter().count();
        }

        let elapsed = last_time.elapsed();
        if elapsed < time::Duration::from_secs(1) {
            thread::yield_now();
            continue;
        }

        let mut rows = Vec::new();
        for (i, (name, _, _)) in loops.iter().enumerate() {
            let missed = sessions[i].stats().map(|s| s.imissed).unwrap_or(0);
            rows.push(StatsRow {
                device: name.clone(),
                rx_packets: counts[i],
                rx_packets_rate: ((counts[i] - last[i]) as f64 / elapsed.as_secs_f64()) as usize,
                missed,
            });
            last[i] = counts[i];
        }
        last_time = time::Instant::now();

        let r = cli_table::print_stdout(rows.with_title());
        if let Err(err) = r {
            println!("error: {:?}", err);
        }
    }

    //
    // Wait for the threads
    //
    let r = generator.join();
    if let Err(err) = r {
        println!("error: {:?}", err);
    }

    for (name, rx_loop, _) in loops {
        let stats = rx_loop.stop();
        println!(
            "{}: {} delivered, {} dropped in {} bursts",
            name, stats.delivered, stats.dropped, stats.bursts
        );
    }

    for session in sessions {
        if let Err(err) = session.close() {
            println!("error: {}", err);
        }
    }
    env.release_devices(devices);
}
