//! Emulation of a Siglent SDG-series waveform generator, network side.
//!
//! An SDS-series oscilloscope running a Bode plot expects a Siglent AWG it
//! can discover over RPCBIND and drive over VXI-11. This crate speaks just
//! enough of both protocols to stand in for one, translating the scope's
//! SCPI into calls on an abstract generator driver so any instrument with
//! the right capability set can sit behind it.

pub mod awg;
pub mod net;
pub mod scpi;
