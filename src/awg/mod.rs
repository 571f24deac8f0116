//! Downstream generator drivers.
//!
//! The protocol stack never talks to a concrete instrument; it drives the
//! [`Awg`] capability set. Channel addressing, waveform codes and load
//! impedance are normalized here so that a driver only ever sees volts
//! into its configured load and one of the conventional waveform codes.

use bitflags::bitflags;
use enum_iterator::Sequence;
use num_enum::IntoPrimitive;
use serde::{Deserialize, Serialize};

pub mod dummy;

pub use dummy::DummyAwg;

/// Number of output channels addressable over SCPI (`C1:`/`C2:`).
pub const CHANNEL_COUNT: usize = 2;

bitflags! {
    /// Specifies an output channel of the downstream generator.
    ///
    /// A missing `Cn:` prefix on a SCPI command addresses every channel at
    /// once; that broadcast is `ALL`.
    pub struct Channel: u8 {
        const ONE = 0b01;
        const TWO = 0b10;
        const ALL = Self::ONE.bits | Self::TWO.bits;
    }
}

impl Channel {
    /// Translate a SCPI channel index (the `n` of `Cn:`) to a channel.
    pub fn from_scpi_index(index: u32) -> Option<Channel> {
        match index {
            1 => Some(Channel::ONE),
            2 => Some(Channel::TWO),
            _ => None,
        }
    }

    /// The channels of the set, one flag at a time.
    pub fn split(self) -> impl Iterator<Item = Channel> {
        [Channel::ONE, Channel::TWO]
            .into_iter()
            .filter(move |channel| self.contains(*channel))
    }

    /// Storage index of a single channel.
    pub(crate) fn index(self) -> usize {
        match self {
            Channel::ONE => 0,
            _ => 1,
        }
    }
}

/// Waveform selection, carrying the conventional numeric codes vendor
/// dialects are mapped from.
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize, Sequence, IntoPrimitive,
)]
#[repr(u8)]
pub enum WaveType {
    Sine = 0,
    Square = 1,
    Triangle = 2,
    Pulse = 3,
    Noise = 4,
    Arb = 5,
}

impl WaveType {
    /// Siglent mnemonics answering to this waveform. The scope uses `RAMP`
    /// for what most downstream generators call a triangle.
    fn mnemonics(self) -> &'static [&'static str] {
        match self {
            WaveType::Sine => &["SINE"],
            WaveType::Square => &["SQUARE"],
            WaveType::Triangle => &["RAMP", "TRIANGLE"],
            WaveType::Pulse => &["PULSE"],
            WaveType::Noise => &["NOISE"],
            WaveType::Arb => &["ARB"],
        }
    }

    /// Look a waveform up by its SCPI mnemonic.
    pub fn from_mnemonic(mnemonic: &str) -> Option<WaveType> {
        enum_iterator::all::<WaveType>()
            .find(|wave| wave.mnemonics().iter().any(|m| mnemonic.eq_ignore_ascii_case(m)))
    }
}

/// Load impedance seen by an output, either a resistance in ohms or the
/// high-impedance sentinel the scope spells `HZ`.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub enum Load {
    Ohms(f64),
    HighZ,
}

/// Full per-channel output configuration, in the units the [`Awg`] trait
/// takes: Hz, degrees, volts peak-to-peak into the configured load.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelState {
    pub wave_type: WaveType,
    pub frequency: f64,
    pub phase: f64,
    pub amplitude: f64,
    pub offset: f64,
    pub load: Load,
    pub output: bool,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            wave_type: WaveType::Sine,
            frequency: 0.0,
            phase: 0.0,
            amplitude: 0.0,
            offset: 0.0,
            load: Load::HighZ,
            output: false,
        }
    }
}

/// Possible errors reported by a driver.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Bounds,
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Error {
        Error::Io(e)
    }
}

/// The capability set a downstream generator driver must provide.
///
/// Amplitude and offset are always volts into the channel's configured
/// load; dB-referenced SCPI values are resolved to volts before a driver
/// sees them. A driver whose amplitude setting is EMF-referenced (open
/// circuit volts behind a series source resistance) reports that
/// resistance via [`Awg::source_impedance`] and receives values
/// pre-corrected for the voltage divider it forms with the load.
///
/// Driver errors during a session are logged by the callers and do not
/// tear the VXI-11 session down; the scope has no way to receive them.
pub trait Awg {
    fn connect(&mut self) -> Result<(), Error>;

    fn disconnect(&mut self) -> Result<(), Error>;

    /// Bring the instrument to a known state after connecting.
    fn initialize(&mut self) -> Result<(), Error>;

    /// Identity of the real downstream instrument, for logs only; the
    /// scope is always shown the canned Siglent identity.
    fn id(&self) -> &str;

    fn enable_output(&mut self, channel: Channel, on: bool) -> Result<(), Error>;

    /// Set the output frequency in Hz.
    fn set_frequency(&mut self, channel: Channel, frequency: f64) -> Result<(), Error>;

    /// Set the phase offset in degrees.
    fn set_phase(&mut self, channel: Channel, phase: f64) -> Result<(), Error>;

    fn set_wave_type(&mut self, channel: Channel, wave_type: WaveType) -> Result<(), Error>;

    /// Set the amplitude in volts peak-to-peak into the configured load.
    fn set_amplitude(&mut self, channel: Channel, amplitude: f64) -> Result<(), Error>;

    /// Set the DC offset in volts.
    fn set_offset(&mut self, channel: Channel, offset: f64) -> Result<(), Error>;

    fn set_load_impedance(&mut self, channel: Channel, load: Load) -> Result<(), Error>;

    /// Series output resistance the driver's amplitude setting is
    /// referenced to, or `None` when the setting already means volts
    /// delivered into the configured load.
    fn source_impedance(&self) -> Option<f64> {
        None
    }
}

/// Look a driver up by the short name used on the command line.
pub fn by_name(name: &str) -> Option<Box<dyn Awg>> {
    match name {
        dummy::SHORT_NAME => Some(Box::new(DummyAwg::new())),
        _ => None,
    }
}

/// Short names of every registered driver.
pub fn names() -> &'static [&'static str] {
    &[dummy::SHORT_NAME]
}
