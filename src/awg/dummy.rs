//! A driver that drives nothing: every call is logged and mirrored into a
//! [`ChannelState`] table. Useful for watching what a scope asks for
//! before pointing the emulator at real hardware, and as the test stand-in.

use super::{Awg, Channel, ChannelState, Error, Load, WaveType, CHANNEL_COUNT};

pub const SHORT_NAME: &str = "dummy";

const ID: &str = "Dummy AWG";

pub struct DummyAwg {
    channels: [ChannelState; CHANNEL_COUNT],
}

impl DummyAwg {
    pub fn new() -> Self {
        Self {
            channels: [ChannelState::default(); CHANNEL_COUNT],
        }
    }

    /// The recorded state of every channel.
    pub fn state(&self) -> &[ChannelState; CHANNEL_COUNT] {
        &self.channels
    }

    fn update(&mut self, channel: Channel, apply: impl Fn(&mut ChannelState)) {
        for single in channel.split() {
            apply(&mut self.channels[single.index()]);
        }
    }
}

impl Default for DummyAwg {
    fn default() -> Self {
        Self::new()
    }
}

impl Awg for DummyAwg {
    fn connect(&mut self) -> Result<(), Error> {
        log::info!("dummy: connect");
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), Error> {
        let state = serde_json::to_string(&self.channels)
            .unwrap_or_else(|_| String::from("<unserializable>"));
        log::info!("dummy: disconnect, final state {}", state);
        Ok(())
    }

    fn initialize(&mut self) -> Result<(), Error> {
        log::info!("dummy: initialize");
        Ok(())
    }

    fn id(&self) -> &str {
        ID
    }

    fn enable_output(&mut self, channel: Channel, on: bool) -> Result<(), Error> {
        log::info!("dummy: enable_output(channel: {:?}, on: {})", channel, on);
        self.update(channel, |state| state.output = on);
        Ok(())
    }

    fn set_frequency(&mut self, channel: Channel, frequency: f64) -> Result<(), Error> {
        log::info!(
            "dummy: set_frequency(channel: {:?}, frequency: {})",
            channel,
            frequency
        );
        self.update(channel, |state| state.frequency = frequency);
        Ok(())
    }

    fn set_phase(&mut self, channel: Channel, phase: f64) -> Result<(), Error> {
        log::info!("dummy: set_phase(channel: {:?}, phase: {})", channel, phase);
        self.update(channel, |state| state.phase = phase);
        Ok(())
    }

    fn set_wave_type(&mut self, channel: Channel, wave_type: WaveType) -> Result<(), Error> {
        log::info!(
            "dummy: set_wave_type(channel: {:?}, wave_type: {:?})",
            channel,
            wave_type
        );
        self.update(channel, |state| state.wave_type = wave_type);
        Ok(())
    }

    fn set_amplitude(&mut self, channel: Channel, amplitude: f64) -> Result<(), Error> {
        log::info!(
            "dummy: set_amplitude(channel: {:?}, amplitude: {})",
            channel,
            amplitude
        );
        self.update(channel, |state| state.amplitude = amplitude);
        Ok(())
    }

    fn set_offset(&mut self, channel: Channel, offset: f64) -> Result<(), Error> {
        log::info!(
            "dummy: set_offset(channel: {:?}, offset: {})",
            channel,
            offset
        );
        self.update(channel, |state| state.offset = offset);
        Ok(())
    }

    fn set_load_impedance(&mut self, channel: Channel, load: Load) -> Result<(), Error> {
        log::info!(
            "dummy: set_load_impedance(channel: {:?}, load: {:?})",
            channel,
            load
        );
        self.update(channel, |state| state.load = load);
        Ok(())
    }
}
