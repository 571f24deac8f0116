//! # Bode
//!
//! Emulates a Siglent SDG arbitrary waveform generator on the network so
//! that a Siglent SDS-series oscilloscope can run Bode plot measurements
//! against a differently-branded generator.
//!
//! ## Services
//! * RPCBIND/portmap responders on UDP and TCP port 111
//! * VXI-11 core channel on a rotating TCP port (fresh port per session,
//!   as SDS800X-HD firmwares require)
//! * Siglent SCPI translation onto the selected generator driver

use std::process::exit;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;

use sdgemu::awg;
use sdgemu::net::{lxi::LxiServer, portmapper, PortCell};

/// Present a Siglent SDG to an SDS oscilloscope, driving another AWG.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Listen address for both RPCBIND and VXI-11.
    #[clap(long, default_value = "0.0.0.0")]
    host: String,

    /// RPCBIND port. Scopes only ever ask 111; binding it usually needs
    /// elevated privileges.
    #[clap(long, default_value_t = 111)]
    rpcbind_port: u16,

    /// First port of the VXI-11 rotation range.
    #[clap(long, default_value_t = 9010)]
    vxi11_port_start: u16,

    /// Last port of the VXI-11 rotation range.
    #[clap(long, default_value_t = 9019)]
    vxi11_port_end: u16,

    /// Downstream generator driver.
    #[clap(long, default_value = "dummy")]
    awg: String,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if args.vxi11_port_start > args.vxi11_port_end {
        log::error!(
            "VXI-11 port range {}..{} is empty",
            args.vxi11_port_start,
            args.vxi11_port_end
        );
        exit(1);
    }

    let mut awg = match awg::by_name(&args.awg) {
        Some(awg) => awg,
        None => {
            log::error!(
                "unknown AWG driver {:?}; available: {}",
                args.awg,
                awg::names().join(", ")
            );
            exit(1);
        }
    };
    if let Err(e) = awg.connect() {
        log::error!("cannot connect the {} driver: {:?}", args.awg, e);
        exit(1);
    }
    if let Err(e) = awg.initialize() {
        log::error!("cannot initialize the {} driver: {:?}", args.awg, e);
        exit(1);
    }
    log::info!("driving: {}", awg.id());

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            log::info!("stop requested, shutting down");
            stop.store(true, Ordering::Relaxed);
        }) {
            log::warn!("cannot install the Ctrl-C handler: {}", e);
        }
    }

    let cell = Arc::new(PortCell::new(args.vxi11_port_start, args.vxi11_port_end));

    log::info!(
        "portmapper: listening on UDP and TCP {}:{}",
        args.host,
        args.rpcbind_port
    );
    let pm_udp = match portmapper::spawn_udp(
        &args.host,
        args.rpcbind_port,
        cell.clone(),
        stop.clone(),
    ) {
        Ok(handle) => handle,
        Err(e) => {
            log::error!(
                "cannot open UDP port {} on {} for listening: {}",
                args.rpcbind_port,
                args.host,
                e
            );
            exit(1);
        }
    };
    let pm_tcp = match portmapper::spawn_tcp(
        &args.host,
        args.rpcbind_port,
        cell.clone(),
        stop.clone(),
    ) {
        Ok(handle) => handle,
        Err(e) => {
            log::error!(
                "cannot open TCP port {} on {} for listening: {}",
                args.rpcbind_port,
                args.host,
                e
            );
            exit(1);
        }
    };

    log::info!("VXI-11: listening on {}:{}", args.host, cell.load());
    let mut server = LxiServer::new(&args.host, cell, stop.clone(), awg);
    if server.run().is_err() {
        // The failing port and address were logged at the bind site.
        exit(1);
    }

    stop.store(true, Ordering::Relaxed);
    let _ = pm_udp.join();
    let _ = pm_tcp.join();
}
