//! Acknowledge every datagram the forwarder sends.
//!
//! A scripted stand-in forwarder pushes PUSH_DATA and PULL_DATA beacons
//! through the shim; host threads answer each one the way a network
//! server would (PUSH_ACK and PULL_ACK). Runs for a few seconds, then
//! stops the forwarder and exits with its status.
//!
//! Usage: `ack [config-dir]`

use std::os::fd::RawFd;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lora_comms::{
    stdio_logger, CommLink, Comms, CommsError, Forwarder, Hwm, Shim, Signal, RECV_FROM_BUFLEN,
};

const PROTOCOL_VERSION: u8 = 2;

const PKT_PUSH_DATA: u8 = 0;
const PKT_PUSH_ACK: u8 = 1;
const PKT_PULL_DATA: u8 = 2;
const PKT_PULL_ACK: u8 = 4;

/// Stand-in for the ported forwarder: one beacon loop per link, each
/// waiting for the matching acknowledgement.
struct BeaconForwarder;

impl Forwarder for BeaconForwarder {
    fn run(&self, shim: Shim) {
        let stopping = Arc::new(AtomicBool::new(false));
        {
            let stopping = Arc::clone(&stopping);
            shim.sigaction(
                Signal::SIGTERM,
                Arc::new(move |_signum| stopping.store(true, Ordering::SeqCst)),
            );
        }

        let up = shim.socket().expect("uplink socket");
        shim.connect(up).expect("uplink connect");
        let down = shim.socket().expect("downlink socket");
        shim.connect(down).expect("downlink connect");

        // Wait at most half a second for each acknowledgement.
        let tv = libc::timeval {
            tv_sec: 0,
            tv_usec: 500_000,
        };
        for fd in [up, down] {
            shim.setsockopt(fd, libc::SOL_SOCKET, libc::SO_RCVTIMEO, Some(&tv))
                .expect("receive timeout");
        }

        let keepalive = {
            let worker_shim = shim.clone();
            let stopping = Arc::clone(&stopping);
            shim.spawn(move || {
                beacon_loop(&worker_shim, down, PKT_PULL_DATA, PKT_PULL_ACK, &stopping)
            })
            .expect("keepalive worker")
        };

        beacon_loop(&shim, up, PKT_PUSH_DATA, PKT_PUSH_ACK, &stopping);
        keepalive.join();

        shim.printf(format_args!("INFO: beacons done\n"));
    }
}

fn beacon_loop(shim: &Shim, fd: RawFd, data_kind: u8, ack_kind: u8, stopping: &AtomicBool) {
    let mut token: u16 = 0;
    let mut ack = [0u8; 64];

    while !stopping.load(Ordering::SeqCst) {
        token = token.wrapping_add(1);
        let mut pkt = [0u8; 12];
        pkt[0] = PROTOCOL_VERSION;
        pkt[1] = (token >> 8) as u8;
        pkt[2] = token as u8;
        pkt[3] = data_kind;

        if shim.send(fd, &pkt).is_err() {
            break;
        }

        match shim.recv(fd, &mut ack) {
            Ok(n) if n >= 4 && ack[3] == ack_kind => {
                shim.printf(format_args!("INFO: token {token} acknowledged on fd {fd}\n"));
            }
            Ok(_) | Err(CommsError::TimedOut) => {}
            Err(_) => break,
        }

        shim.wait_ms(250);
    }
}

fn thread_ack(comms: &Comms, link: CommLink) {
    let mut buf = [0u8; RECV_FROM_BUFLEN];

    loop {
        let n = match comms.recv_from(link, &mut buf, None) {
            Ok(n) => n,
            Err(_) => return,
        };

        if n < 12 || buf[0] != PROTOCOL_VERSION {
            continue;
        }

        buf[3] = match (link, buf[3]) {
            (CommLink::Uplink, PKT_PUSH_DATA) => PKT_PUSH_ACK,
            (CommLink::Downlink, PKT_PULL_DATA) => PKT_PULL_ACK,
            _ => continue,
        };

        if comms
            .send_to(link, &buf[..4], Hwm::Unbounded, None)
            .is_err()
        {
            return;
        }
    }
}

fn main() {
    env_logger::init();

    let comms = Comms::new();
    comms.set_logger(Some(stdio_logger));

    let mut ackers = Vec::new();
    for link in [CommLink::Uplink, CommLink::Downlink] {
        let comms = comms.clone();
        ackers.push(thread::spawn(move || thread_ack(&comms, link)));
    }

    // Run for a few seconds, then ask the forwarder to wind down.
    {
        let comms = comms.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(5));
            comms.stop();
        });
    }

    let cfg_dir = std::env::args().nth(1).map(PathBuf::from);
    let status = comms.start(&BeaconForwarder, cfg_dir.as_deref());

    for acker in ackers {
        let _ = acker.join();
    }

    process::exit(status);
}
