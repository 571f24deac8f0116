//! Network management module.
//!
//! # Design
//! Three concurrent services face the scope: the UDP and TCP RPCBIND
//! responders (always on port 111) and the VXI-11 core channel on a
//! rotating port. They share exactly one piece of state, the [`PortCell`]
//! holding the currently advertised VXI-11 port: the core server advances
//! it after every session teardown and the portmappers read it on every
//! GETPORT. A shared stop flag ends all three loops on shutdown.

pub mod lxi;
pub mod portmapper;

use std::sync::atomic::{AtomicU32, Ordering};

/// Identity returned for every `device_read`. The scope only accepts the
/// peer as a Siglent generator when the model field starts with `SDG`.
pub const AWG_ID: &[u8] = b"IDN-SGLT-PRI SDG0000X";

/// The currently advertised VXI-11 port, shared between the single writer
/// (the core server) and the portmapper readers.
///
/// Some scope firmwares (SDS800X-HD) insist on a fresh TCP port for every
/// VXI-11 session; reusing one makes them refuse to reconnect. The cell
/// therefore rotates through `[start, end]`, wrapping at the end.
pub struct PortCell {
    current: AtomicU32,
    start: u16,
    end: u16,
}

impl PortCell {
    /// Create a cell positioned at the start of the rotation range.
    pub fn new(start: u16, end: u16) -> Self {
        assert!(start <= end, "port range is empty");
        Self {
            current: AtomicU32::new(start as u32),
            start,
            end,
        }
    }

    pub fn load(&self) -> u16 {
        self.current.load(Ordering::SeqCst) as u16
    }

    pub fn store(&self, port: u16) {
        self.current.store(port as u32, Ordering::SeqCst);
    }

    /// Advance to the next port of the range, wrapping at the end, and
    /// return it. Called by the single writer only.
    pub fn advance(&self) -> u16 {
        let current = self.load();
        let next = if current >= self.end {
            self.start
        } else {
            current + 1
        };
        self.store(next);
        next
    }
}
