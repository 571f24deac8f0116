//! Wire-format helpers for the subset of ONC-RPC (RFC 1057) and the VXI-11
//! core channel (program 395183) that a Siglent SDS-series oscilloscope
//! exercises during Bode plot measurements.
//!
//! The scope speaks RPC version 2 with zero-length AUTH_NULL credential and
//! verifier records, which makes every field of interest sit at a fixed
//! offset. [`Call`] is a zero-copy view over one call record exposing those
//! fields; the free functions at the bottom build the matching replies.
//!
//! On TCP, records are carried with a 4-byte big-endian record mark whose
//! most significant bit flags the last fragment. Only single last-fragment
//! records are produced, and only such records are understood.

use num_enum::TryFromPrimitive;

/// RPC program number of the VXI-11 core channel.
pub const VXI11_CORE_PROGRAM: u32 = 395_183;

/// Program version the scope asks the portmapper about.
pub const VXI11_CORE_VERSION: u32 = 1;

/// PMAPPROC_GETPORT, the only portmap procedure that gets an answer.
pub const PMAP_PROC_GETPORT: u32 = 3;

/// Last-fragment flag of the TCP record mark.
pub const LAST_FRAGMENT: u32 = 0x8000_0000;

/// `device_read` termination reason: the whole response fit in one read.
pub const READ_REASON_END: u32 = 4;

/// Maximum receive size advertised in the `create_link` reply (8 MiB).
pub const MAX_RECV_SIZE: u32 = 0x0080_0000;

/// VXI-11 core channel procedures invoked by the scope. Everything else
/// aborts the session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, TryFromPrimitive)]
#[repr(u32)]
pub enum CoreProcedure {
    CreateLink = 10,
    DeviceWrite = 11,
    DeviceRead = 12,
    DestroyLink = 23,
}

/// Errors produced while picking fields out of a call record.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// The record ends before the requested field.
    Truncated,
}

// Field offsets within a call record, counted from the XID. The fixed
// positions past offset 24 assume zero-length AUTH_NULL credential and
// verifier records, which is what SDS firmwares emit.
const OFFSET_PROGRAM: usize = 12;
const OFFSET_PROCEDURE: usize = 20;
const OFFSET_ARGS: usize = 40;

/// A borrowed view of one RPC call record, starting at the XID.
///
/// TCP callers must strip the 4-byte record mark before constructing the
/// view; UDP datagrams already begin at the XID.
#[derive(Debug, Copy, Clone)]
pub struct Call<'a> {
    data: &'a [u8],
}

impl<'a> Call<'a> {
    /// Wrap a call record. Anything shorter than the fixed RPC call header
    /// is rejected outright.
    pub fn parse(data: &'a [u8]) -> Result<Self, Error> {
        if data.len() < OFFSET_PROCEDURE + 4 {
            return Err(Error::Truncated);
        }
        Ok(Call { data })
    }

    fn u32_at(&self, offset: usize) -> Result<u32, Error> {
        let bytes = self
            .data
            .get(offset..offset + 4)
            .ok_or(Error::Truncated)?;
        Ok(u32::from_be_bytes(bytes.try_into().unwrap()))
    }

    /// Transaction ID, echoed verbatim in every reply.
    pub fn xid(&self) -> u32 {
        // The constructor guarantees at least a full call header.
        u32::from_be_bytes(self.data[..4].try_into().unwrap())
    }

    /// RPC program the call is addressed to.
    pub fn program(&self) -> u32 {
        u32::from_be_bytes(
            self.data[OFFSET_PROGRAM..OFFSET_PROGRAM + 4]
                .try_into()
                .unwrap(),
        )
    }

    /// Procedure number within the program.
    pub fn procedure(&self) -> u32 {
        u32::from_be_bytes(
            self.data[OFFSET_PROCEDURE..OFFSET_PROCEDURE + 4]
                .try_into()
                .unwrap(),
        )
    }

    /// The program a PMAPPROC_GETPORT call is asking to be located.
    pub fn getport_program(&self) -> Result<u32, Error> {
        self.u32_at(OFFSET_ARGS)
    }

    /// The opaque data of a `device_write` call: the SCPI command bytes.
    ///
    /// The `device_write` argument block carries the link id, two timeouts
    /// and the flags word before the opaque payload.
    pub fn write_payload(&self) -> Result<&'a [u8], Error> {
        self.opaque_at(OFFSET_ARGS + 16)
    }

    /// The client id string of a `create_link` call. The emulator only
    /// logs it; link ids are fixed at zero.
    pub fn link_client_id(&self) -> Result<&'a [u8], Error> {
        self.opaque_at(OFFSET_ARGS + 12)
    }

    fn opaque_at(&self, offset: usize) -> Result<&'a [u8], Error> {
        let len = self.u32_at(offset)? as usize;
        self.data
            .get(offset + 4..offset + 4 + len)
            .ok_or(Error::Truncated)
    }
}

/// Build the 24-byte accepted-reply header: message type reply, reply state
/// accepted, AUTH_NULL verifier, accept state success.
pub fn reply_header(xid: u32) -> [u8; 24] {
    let mut header = [0u8; 24];
    header[..4].copy_from_slice(&xid.to_be_bytes());
    header[4..8].copy_from_slice(&1u32.to_be_bytes());
    header
}

/// Prefix a payload with the TCP record mark: 4-byte big-endian length with
/// the last-fragment bit set. The emulator never fragments.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mark = payload.len() as u32 | LAST_FRAGMENT;
    let mut record = Vec::with_capacity(payload.len() + 4);
    record.extend_from_slice(&mark.to_be_bytes());
    record.extend_from_slice(payload);
    record
}

/// Assemble a bare (UDP) reply: header followed by the procedure body.
pub fn reply(xid: u32, body: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(24 + body.len());
    packet.extend_from_slice(&reply_header(xid));
    packet.extend_from_slice(body);
    packet
}

/// Assemble a framed (TCP) reply.
pub fn framed_reply(xid: u32, body: &[u8]) -> Vec<u8> {
    frame(&reply(xid, body))
}

/// `create_link` reply body: no error, link id 0, no abort channel, and a
/// generous maximum receive size.
pub fn create_link_body() -> [u8; 16] {
    let mut body = [0u8; 16];
    body[12..].copy_from_slice(&MAX_RECV_SIZE.to_be_bytes());
    body
}

/// `device_write` reply body: no error, size echoing the command length so
/// the scope sees the whole write accepted.
pub fn device_write_body(size: u32) -> [u8; 8] {
    let mut body = [0u8; 8];
    body[4..].copy_from_slice(&size.to_be_bytes());
    body
}

/// `device_read` reply body: no error, END reason, then the instrument
/// response as XDR opaque data. A trailing newline is appended to the
/// response before padding, matching what a real SDG returns.
pub fn device_read_body(response: &[u8]) -> Vec<u8> {
    let data_len = response.len() + 1;
    let padding = (4 - data_len % 4) % 4;
    let mut body = Vec::with_capacity(12 + data_len + padding);
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(&READ_REASON_END.to_be_bytes());
    body.extend_from_slice(&(data_len as u32).to_be_bytes());
    body.extend_from_slice(response);
    body.push(b'\n');
    body.resize(body.len() + padding, 0);
    body
}

/// `destroy_link` reply body: just the error word.
pub fn destroy_link_body() -> [u8; 4] {
    [0u8; 4]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The GETPORT datagram an SDS1004X-E emits, reconstructed from a
    /// capture: XID 0x000167e2, call, RPC v2, portmap program 100000 v2,
    /// procedure 3, AUTH_NULL twice, then program 395183 v1 proto TCP.
    fn getport_datagram() -> Vec<u8> {
        let words: [u32; 14] = [
            0x000167e2, 0, 2, 100_000, 2, 3, 0, 0, 0, 0, 395_183, 1, 6, 0,
        ];
        words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    #[test]
    fn getport_fields() {
        let datagram = getport_datagram();
        let call = Call::parse(&datagram).unwrap();
        assert_eq!(call.xid(), 0x000167e2);
        assert_eq!(call.program(), 100_000);
        assert_eq!(call.procedure(), PMAP_PROC_GETPORT);
        assert_eq!(call.getport_program().unwrap(), VXI11_CORE_PROGRAM);
    }

    #[test]
    fn truncated_records_rejected() {
        let datagram = getport_datagram();
        assert_eq!(Call::parse(&datagram[..20]).unwrap_err(), Error::Truncated);
        // Header parses, but the portmap argument block is missing.
        let call = Call::parse(&datagram[..24]).unwrap();
        assert_eq!(call.getport_program().unwrap_err(), Error::Truncated);
    }

    #[test]
    fn device_write_payload() {
        // Call header + AUTH_NULLs + device_write args around "C1:OUTP ON".
        let mut record: Vec<u8> = [0xcafef00du32, 0, 2, VXI11_CORE_PROGRAM, 1, 11, 0, 0, 0, 0]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        let command = b"C1:OUTP ON";
        record.extend_from_slice(&[0u8; 16]); // link id, timeouts, flags
        record.extend_from_slice(&(command.len() as u32).to_be_bytes());
        record.extend_from_slice(command);
        record.extend_from_slice(&[0, 0]); // XDR padding

        let call = Call::parse(&record).unwrap();
        assert_eq!(call.procedure(), CoreProcedure::DeviceWrite as u32);
        assert_eq!(call.write_payload().unwrap(), command);
    }

    #[test]
    fn frame_law() {
        for len in [0usize, 1, 3, 4, 28, 255, 1024, 8192] {
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let record = frame(&payload);
            let mark = u32::from_be_bytes(record[..4].try_into().unwrap());
            assert_ne!(mark & LAST_FRAGMENT, 0);
            assert_eq!((mark & !LAST_FRAGMENT) as usize, len);
            assert_eq!(&record[4..], &payload[..]);
        }
    }

    #[test]
    fn reply_header_bytes() {
        let header = reply_header(0x1234_5678);
        assert_eq!(
            header,
            [
                0x12, 0x34, 0x56, 0x78, // xid
                0, 0, 0, 1, // reply
                0, 0, 0, 0, // accepted
                0, 0, 0, 0, 0, 0, 0, 0, // AUTH_NULL verifier
                0, 0, 0, 0, // success
            ]
        );
    }

    #[test]
    fn device_read_body_layout() {
        let body = device_read_body(b"IDN-SGLT-PRI SDG0000X");
        // error, reason END, opaque length counts the id and the newline.
        assert_eq!(&body[..4], &[0, 0, 0, 0]);
        assert_eq!(&body[4..8], &[0, 0, 0, 4]);
        assert_eq!(&body[8..12], &[0, 0, 0, 22]);
        assert_eq!(&body[12..33], b"IDN-SGLT-PRI SDG0000X");
        assert_eq!(&body[33..], &[0x0a, 0x00, 0x00]);
    }

    #[test]
    fn create_link_body_layout() {
        let body = create_link_body();
        assert_eq!(&body[..12], &[0u8; 12]);
        assert_eq!(&body[12..], &[0x00, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn device_write_size_echo() {
        assert_eq!(device_write_body(10), [0, 0, 0, 0, 0, 0, 0, 10]);
    }
}
