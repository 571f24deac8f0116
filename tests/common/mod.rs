//! Shared helpers: scope-side request builders and a recording driver.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sdgemu::awg::{Awg, Channel, Error, Load, WaveType};

/// RPC call header with two zero-length AUTH_NULL records, as every SDS
/// firmware emits it.
fn call_header(xid: u32, program: u32, version: u32, procedure: u32) -> Vec<u8> {
    [xid, 0, 2, program, version, procedure, 0, 0, 0, 0]
        .iter()
        .flat_map(|word| word.to_be_bytes())
        .collect()
}

fn push_u32s(record: &mut Vec<u8>, words: &[u32]) {
    for word in words {
        record.extend_from_slice(&word.to_be_bytes());
    }
}

fn push_opaque(record: &mut Vec<u8>, data: &[u8]) {
    push_u32s(record, &[data.len() as u32]);
    record.extend_from_slice(data);
    record.resize(record.len() + (4 - data.len() % 4) % 4, 0);
}

/// PMAPPROC_GETPORT asking where `program` v1 listens on TCP.
pub fn getport_call(xid: u32, program: u32) -> Vec<u8> {
    let mut record = call_header(xid, 100_000, 2, 3);
    push_u32s(&mut record, &[program, 1, 6, 0]);
    record
}

pub fn create_link_call(xid: u32, client_id: &str) -> Vec<u8> {
    let mut record = call_header(xid, vxi11::VXI11_CORE_PROGRAM, 1, 10);
    // client id, lockDevice, lock_timeout
    push_u32s(&mut record, &[0, 0, 0]);
    push_opaque(&mut record, client_id.as_bytes());
    record
}

pub fn device_write_call(xid: u32, command: &str) -> Vec<u8> {
    let mut record = call_header(xid, vxi11::VXI11_CORE_PROGRAM, 1, 11);
    // link id, io_timeout, lock_timeout, flags
    push_u32s(&mut record, &[0, 0, 0, 0]);
    push_opaque(&mut record, command.as_bytes());
    record
}

pub fn device_read_call(xid: u32) -> Vec<u8> {
    let mut record = call_header(xid, vxi11::VXI11_CORE_PROGRAM, 1, 12);
    // link id, request size, io_timeout, lock_timeout, flags, term char
    push_u32s(&mut record, &[0, 255, 0, 0, 0, 0x0a]);
    record
}

pub fn destroy_link_call(xid: u32) -> Vec<u8> {
    let mut record = call_header(xid, vxi11::VXI11_CORE_PROGRAM, 1, 23);
    push_u32s(&mut record, &[0]);
    record
}

/// Send one framed record over an established core-channel connection.
pub fn send_record(stream: &mut TcpStream, record: &[u8]) {
    stream.write_all(&vxi11::frame(record)).unwrap();
}

/// Read one framed reply; panics on a missing last-fragment bit.
pub fn read_reply(stream: &mut TcpStream) -> Vec<u8> {
    let mut mark = [0u8; 4];
    stream.read_exact(&mut mark).unwrap();
    let mark = u32::from_be_bytes(mark);
    assert_ne!(mark & vxi11::LAST_FRAGMENT, 0, "fragmented reply");
    let mut reply = vec![0u8; (mark & !vxi11::LAST_FRAGMENT) as usize];
    stream.read_exact(&mut reply).unwrap();
    reply
}

/// Keep trying to connect until the rotating listener comes up.
pub fn connect_with_retry(host: &str, port: u16) -> TcpStream {
    let address = (host, port)
        .to_socket_addrs()
        .unwrap()
        .next()
        .unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        match TcpStream::connect_timeout(&address, Duration::from_millis(250)) {
            Ok(stream) => return stream,
            Err(e) => {
                if Instant::now() > deadline {
                    panic!("listener on port {} never came up: {}", port, e);
                }
                thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

/// Wait for a condition that another thread establishes.
pub fn wait_until(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// A driver whose call log can be inspected from the test thread while the
/// server owns the driver itself.
#[derive(Clone, Default)]
pub struct SharedRecorder {
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl SharedRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl Awg for SharedRecorder {
    fn connect(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn disconnect(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn initialize(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn id(&self) -> &str {
        "shared recorder"
    }
    fn enable_output(&mut self, channel: Channel, on: bool) -> Result<(), Error> {
        self.record(format!("enable_output({:?}, {})", channel, on));
        Ok(())
    }
    fn set_frequency(&mut self, channel: Channel, frequency: f64) -> Result<(), Error> {
        self.record(format!("set_frequency({:?}, {})", channel, frequency));
        Ok(())
    }
    fn set_phase(&mut self, channel: Channel, phase: f64) -> Result<(), Error> {
        self.record(format!("set_phase({:?}, {})", channel, phase));
        Ok(())
    }
    fn set_wave_type(&mut self, channel: Channel, wave_type: WaveType) -> Result<(), Error> {
        self.record(format!("set_wave_type({:?}, {:?})", channel, wave_type));
        Ok(())
    }
    fn set_amplitude(&mut self, channel: Channel, amplitude: f64) -> Result<(), Error> {
        self.record(format!("set_amplitude({:?}, {:.4})", channel, amplitude));
        Ok(())
    }
    fn set_offset(&mut self, channel: Channel, offset: f64) -> Result<(), Error> {
        self.record(format!("set_offset({:?}, {})", channel, offset));
        Ok(())
    }
    fn set_load_impedance(&mut self, channel: Channel, load: Load) -> Result<(), Error> {
        self.record(format!("set_load_impedance({:?}, {:?})", channel, load));
        Ok(())
    }
}
