//! RPCBIND / portmap responders (RFC 1057, RFC 1833).
//!
//! The scope locates the VXI-11 core channel by asking the portmapper on
//! port 111 where program 395183 lives, over UDP or TCP depending on the
//! firmware. Both responders answer PMAPPROC_GETPORT for that one program
//! with whatever the port cell currently holds; anything else is dropped
//! and the transport closed, which the scope handles better than a
//! hand-built error reply would.
//!
//! Both listeners are bound before their thread spawns so a missing
//! privilege for port 111 surfaces as a fatal startup error.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::net::PortCell;

/// How often a blocked listener rechecks the stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// A GETPORT datagram is 56 bytes; these sizes leave generous slack.
const UDP_BUFFER_SIZE: usize = 1024;
const TCP_BUFFER_SIZE: usize = 128;

/// Bind the UDP responder on `host:port` and spawn its thread.
pub fn spawn_udp(
    host: &str,
    port: u16,
    cell: Arc<PortCell>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let socket = UdpSocket::bind((host, port))?;
    socket.set_read_timeout(Some(POLL_INTERVAL))?;
    thread::Builder::new()
        .name("pmap-udp".into())
        .spawn(move || udp_loop(socket, cell, stop))
}

/// Bind the TCP responder on `host:port` and spawn its thread.
pub fn spawn_tcp(
    host: &str,
    port: u16,
    cell: Arc<PortCell>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let listener = TcpListener::bind((host, port))?;
    listener.set_nonblocking(true)?;
    thread::Builder::new()
        .name("pmap-tcp".into())
        .spawn(move || tcp_loop(listener, cell, stop))
}

fn udp_loop(socket: UdpSocket, cell: Arc<PortCell>, stop: Arc<AtomicBool>) {
    let mut buffer = [0u8; UDP_BUFFER_SIZE];
    while !stop.load(Ordering::Relaxed) {
        let (length, peer) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                continue
            }
            Err(e) => {
                log::error!("UDP portmapper: receive failed: {}", e);
                break;
            }
        };
        log::info!("UDP portmapper: request from {}", peer);
        match respond(&buffer[..length], &cell) {
            Some(reply) => {
                if let Err(e) = socket.send_to(&reply, peer) {
                    log::warn!("UDP portmapper: reply to {} failed: {}", peer, e);
                }
            }
            None => log::warn!("UDP portmapper: incompatible RPCBIND request"),
        }
    }
}

fn tcp_loop(listener: TcpListener, cell: Arc<PortCell>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                log::info!("TCP portmapper: request from {}", peer);
                if let Err(e) = serve_connection(stream, &cell) {
                    log::warn!("TCP portmapper: request from {} failed: {}", peer, e);
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                log::error!("TCP portmapper: accept failed: {}", e);
                break;
            }
        }
    }
}

/// One read, at most one framed reply, then the connection drops.
fn serve_connection(mut stream: TcpStream, cell: &PortCell) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(POLL_INTERVAL))?;

    let mut buffer = [0u8; TCP_BUFFER_SIZE];
    let length = stream.read(&mut buffer)?;
    if length <= 4 {
        return Ok(());
    }
    // Strip the record mark so the record starts at the XID, as on UDP.
    match respond(&buffer[4..length], cell) {
        Some(reply) => stream.write_all(&vxi11::frame(&reply)),
        None => {
            log::warn!("TCP portmapper: incompatible RPCBIND request");
            Ok(())
        }
    }
}

/// Validate a GETPORT for the VXI-11 core program and build the bare
/// (unframed) reply carrying the advertised port. Anything else: `None`,
/// reply suppressed.
fn respond(record: &[u8], cell: &PortCell) -> Option<Vec<u8>> {
    let call = vxi11::Call::parse(record).ok()?;
    if call.procedure() != vxi11::PMAP_PROC_GETPORT {
        return None;
    }
    if call.getport_program().ok()? != vxi11::VXI11_CORE_PROGRAM {
        return None;
    }

    let port = cell.load();
    log::info!("portmapper: advertising TCP port {}", port);
    Some(vxi11::reply(call.xid(), &(port as u32).to_be_bytes()))
}
