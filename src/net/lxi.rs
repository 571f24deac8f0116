//! VXI-11 core channel server.
//!
//! One scope, one session at a time: accept a connection on the currently
//! advertised port, answer `create_link` / `device_write` / `device_read`
//! / `destroy_link`, and rotate the listener to the next port of the range
//! when the session ends. SCPI payloads of `device_write` are executed on
//! the downstream generator before the reply goes out, so a scope that saw
//! its write succeed knows the generator has been told.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use socket2::{Domain, Socket, Type};
use vxi11::CoreProcedure;

use crate::awg::Awg;
use crate::net::{PortCell, AWG_ID};
use crate::scpi::CommandParser;

/// Poll cadences for the stoppable blocking points.
const ACCEPT_POLL: Duration = Duration::from_millis(50);
const SESSION_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Every request the scope sends fits one such read.
const SESSION_BUFFER_SIZE: usize = 255;

/// The VXI-11 core channel service.
pub struct LxiServer {
    host: String,
    cell: Arc<PortCell>,
    stop: Arc<AtomicBool>,
    parser: CommandParser,
    awg: Box<dyn Awg>,
}

impl LxiServer {
    pub fn new(
        host: &str,
        cell: Arc<PortCell>,
        stop: Arc<AtomicBool>,
        awg: Box<dyn Awg>,
    ) -> Self {
        Self {
            host: host.into(),
            cell,
            stop,
            parser: CommandParser::new(),
            awg,
        }
    }

    /// Serve sessions until the stop flag is raised.
    ///
    /// Bind failures are fatal: the scope would keep getting port numbers
    /// nobody listens on.
    pub fn run(&mut self) -> std::io::Result<()> {
        let mut listener = self.bind(self.cell.load())?;
        loop {
            let stream = match self.accept(&listener)? {
                Some(stream) => stream,
                None => {
                    if let Err(e) = self.awg.disconnect() {
                        log::warn!("driver disconnect failed: {:?}", e);
                    }
                    return Ok(());
                }
            };
            self.serve_session(stream);

            // A fresh listener for every session, see PortCell. The old
            // one is gone before the range can wrap back onto its port.
            drop(listener);
            let port = self.cell.advance();
            log::info!("VXI-11: moving to TCP port {}", port);
            listener = self.bind(port)?;
        }
    }

    /// Bind a listener with SO_REUSEADDR: after one trip through the
    /// range, the port may still hold the previous session's socket in
    /// TIME_WAIT.
    fn bind(&self, port: u16) -> std::io::Result<TcpListener> {
        let bound = resolve(&self.host, port).and_then(bind_listener);
        if let Err(ref e) = bound {
            log::error!(
                "VXI-11: cannot open TCP port {} on {} for listening: {}",
                port,
                self.host,
                e
            );
        }
        bound
    }

    /// Wait for the single scope connection, or `None` once stopped.
    fn accept(&self, listener: &TcpListener) -> std::io::Result<Option<TcpStream>> {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                return Ok(None);
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    log::info!("VXI-11: incoming connection from {}", peer);
                    return Ok(Some(stream));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
                Err(e) => return Err(e),
            }
        }
    }

    /// Run one session from accept to teardown. All exits close the
    /// connection; the listener rotation happens in [`LxiServer::run`]
    /// regardless of how the session went.
    fn serve_session(&mut self, mut stream: TcpStream) {
        if let Err(e) = stream
            .set_nonblocking(false)
            .and_then(|_| stream.set_read_timeout(Some(SESSION_READ_TIMEOUT)))
        {
            log::warn!("VXI-11: session setup failed: {}", e);
            return;
        }

        let mut buffer = [0u8; SESSION_BUFFER_SIZE];
        loop {
            let length = match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(length) => length,
                Err(e)
                    if e.kind() == ErrorKind::WouldBlock
                        || e.kind() == ErrorKind::TimedOut =>
                {
                    if self.stop.load(Ordering::Relaxed) {
                        break;
                    }
                    continue;
                }
                Err(e) => {
                    log::warn!("VXI-11: session read failed: {}", e);
                    break;
                }
            };
            if length <= 4 {
                break;
            }
            if !self.handle_request(&buffer[4..length], &mut stream) {
                break;
            }
        }
    }

    /// Dispatch one core-channel request; `false` ends the session.
    fn handle_request(&mut self, record: &[u8], stream: &mut TcpStream) -> bool {
        let call = match vxi11::Call::parse(record) {
            Ok(call) => call,
            Err(_) => {
                log::warn!("VXI-11: truncated request, aborting session");
                return false;
            }
        };
        if call.program() != vxi11::VXI11_CORE_PROGRAM {
            log::warn!(
                "VXI-11: request for foreign program {}, aborting session",
                call.program()
            );
            return false;
        }

        let procedure = match CoreProcedure::try_from(call.procedure()) {
            Ok(procedure) => procedure,
            Err(_) => {
                log::warn!(
                    "VXI-11: unknown procedure {}, aborting session",
                    call.procedure()
                );
                return false;
            }
        };

        let body: Vec<u8> = match procedure {
            CoreProcedure::CreateLink => {
                match call.link_client_id() {
                    Ok(client) => log::info!(
                        "VXI-11 CREATE_LINK from {:?}",
                        String::from_utf8_lossy(client)
                    ),
                    Err(_) => log::info!("VXI-11 CREATE_LINK"),
                }
                vxi11::create_link_body().to_vec()
            }
            CoreProcedure::DeviceWrite => {
                let payload = match call.write_payload() {
                    Ok(payload) => payload,
                    Err(_) => {
                        log::warn!("VXI-11: truncated DEVICE_WRITE, aborting session");
                        return false;
                    }
                };
                let command = String::from_utf8_lossy(payload);
                let command = command.trim();
                log::info!("VXI-11 DEVICE_WRITE, SCPI command: {}", command);
                self.parser.parse(command, self.awg.as_mut());
                vxi11::device_write_body(payload.len() as u32).to_vec()
            }
            CoreProcedure::DeviceRead => {
                // Any read gets the canned identity: the scope checks it
                // after *IDN? and ignores the body of every other read.
                log::info!("VXI-11 DEVICE_READ");
                vxi11::device_read_body(AWG_ID)
            }
            CoreProcedure::DestroyLink => {
                log::info!("VXI-11 DESTROY_LINK");
                vxi11::destroy_link_body().to_vec()
            }
        };

        if let Err(e) = stream.write_all(&vxi11::framed_reply(call.xid(), &body)) {
            log::warn!("VXI-11: reply failed: {}", e);
            return false;
        }

        procedure != CoreProcedure::DestroyLink
    }
}

fn resolve(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(ErrorKind::InvalidInput, "listen address is invalid"))
}

fn bind_listener(address: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(address), Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&address.into())?;
    socket.listen(1)?;
    let listener: TcpListener = socket.into();
    listener.set_nonblocking(true)?;
    Ok(listener)
}
