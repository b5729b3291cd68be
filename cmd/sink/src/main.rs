//! Receive and discard everything the forwarder sends, and drain its log
//! output through the in-process log queues.
//!
//! The scripted stand-in forwarder pushes rxpk datagrams on the uplink
//! and keepalives on the downlink without waiting for acknowledgements.
//! Host threads print packet sizes; two more drain the log queues, which
//! are closed drain-then-close style after shutdown so no line is lost.
//!
//! Usage: `sink [config-dir]`

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lora_comms::{
    log_to_queues, CommLink, Comms, Forwarder, LogStream, Shim, Signal, RECV_FROM_BUFLEN,
};

const PROTOCOL_VERSION: u8 = 2;

const PKT_PUSH_DATA: u8 = 0;
const PKT_PULL_DATA: u8 = 2;

/// Stand-in for the ported forwarder: fire-and-forget traffic plus log
/// chatter on both streams.
struct ChatterForwarder;

impl Forwarder for ChatterForwarder {
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

        shim.fprintf(
            LogStream::Stderr,
            format_args!("ERROR: [GPS] no fix, using system time\n"),
        );

        let puller = {
            let worker_shim = shim.clone();
            let stopping = Arc::clone(&stopping);
            shim.spawn(move || {
                let mut token: u16 = 0;
                while !stopping.load(Ordering::SeqCst) {
                    token = token.wrapping_add(1);
                    let pkt = [
                        PROTOCOL_VERSION,
                        (token >> 8) as u8,
                        token as u8,
                        PKT_PULL_DATA,
                        0,
                        0,
                        0,
                        0,
                        0,
                        0,
                        0,
                        0,
                    ];
                    if worker_shim.send(down, &pkt).is_err() {
                        break;
                    }
                    worker_shim.wait_ms(400);
                }
            })
            .expect("keepalive worker")
        };

        let mut token: u16 = 0;
        while !stopping.load(Ordering::SeqCst) {
            token = token.wrapping_add(1);
            let payload = format!("{{\"rxpk\":[{{\"tmst\":{},\"size\":14}}]}}", token as u32 * 1000);

            let mut pkt = Vec::with_capacity(12 + payload.len());
            pkt.extend_from_slice(&[PROTOCOL_VERSION, (token >> 8) as u8, token as u8, PKT_PUSH_DATA]);
            pkt.extend_from_slice(&[0u8; 8]); // gateway EUI
            pkt.extend_from_slice(payload.as_bytes());

            if shim.send(up, &pkt).is_err() {
                break;
            }
            shim.printf(format_args!(
                "INFO: pushed datagram {token} ({} bytes)\n",
                pkt.len()
            ));
            shim.wait_ms(200);
        }

        puller.join();
        shim.printf(format_args!("INFO: concentrator stopped\n"));
    }
}

fn thread_sink(comms: &Comms, link: CommLink) {
    let mut buf = [0u8; RECV_FROM_BUFLEN];

    loop {
        match comms.recv_from(link, &mut buf, None) {
            Ok(n) => println!("link {link:?}: got packet {n} bytes long"),
            Err(_) => return,
        }
    }
}

fn thread_info_logs(comms: &Comms) {
    let mut buf = vec![0u8; comms.get_log_max_msg_size()];
    while let Ok(n) = comms.get_log_info_message(&mut buf, None) {
        print!("{}", String::from_utf8_lossy(&buf[..n]));
    }
}

fn thread_error_logs(comms: &Comms) {
    let mut buf = vec![0u8; comms.get_log_max_msg_size()];
    while let Ok(n) = comms.get_log_error_message(&mut buf, None) {
        eprint!("{}", String::from_utf8_lossy(&buf[..n]));
    }
}

fn main() {
    env_logger::init();

    let comms = Comms::new();
    comms.set_logger(Some(log_to_queues));

    let mut sinks = Vec::new();
    for link in [CommLink::Uplink, CommLink::Downlink] {
        let comms = comms.clone();
        sinks.push(thread::spawn(move || thread_sink(&comms, link)));
    }

    let info_drain = {
        let comms = comms.clone();
        thread::spawn(move || thread_info_logs(&comms))
    };
    let error_drain = {
        let comms = comms.clone();
        thread::spawn(move || thread_error_logs(&comms))
    };

    // Run for a few seconds, then ask the forwarder to wind down.
    {
        let comms = comms.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_secs(5));
            comms.stop();
        });
    }

    let cfg_dir = std::env::args().nth(1).map(PathBuf::from);
    let status = comms.start(&ChatterForwarder, cfg_dir.as_deref());

    // Let the drain threads finish the backlog, then stop them.
    comms.close_log_queues(false);

    for sink in sinks {
        let _ = sink.join();
    }
    let _ = info_drain.join();
    let _ = error_drain.join();

    process::exit(status);
}
