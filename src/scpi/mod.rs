//! Siglent SCPI command parsing.
//!
//! The scope drives the emulated generator with the SDG dialect: an
//! optional `Cn:` channel prefix, a four-letter command root and a flat
//! comma-separated parameter list (`C1:BSWV WVTP,SINE,FRQ,1000,AMP,2`).
//! The parser tracks the load impedance the scope configured per channel
//! and resolves every dB-referenced amplitude to volts peak-to-peak into
//! that load before the driver is called.
//!
//! Nothing here returns an error to the protocol layer: the scope has no
//! channel for SCPI failures, so malformed input is logged and skipped
//! while the rest of the command keeps going.

use crate::awg::{Awg, Channel, Load, WaveType, CHANNEL_COUNT};

/// Parameters of the basic-wave (`BSWV`) command that map to driver calls.
#[derive(Debug, Copy, Clone)]
enum WaveParam {
    WaveType,
    Frequency,
    Amplitude,
    AmplitudeDbm,
    AmplitudeVrms,
    Offset,
    Phase,
}

/// Fixed dispatch table for `BSWV` parameter names. Names not listed here
/// fall through to a log line.
const WAVE_PARAMS: &[(&str, WaveParam)] = &[
    ("WVTP", WaveParam::WaveType),
    ("FRQ", WaveParam::Frequency),
    ("AMP", WaveParam::Amplitude),
    ("AMPDBM", WaveParam::AmplitudeDbm),
    ("AMPVRMS", WaveParam::AmplitudeVrms),
    ("OFST", WaveParam::Offset),
    ("PHSE", WaveParam::Phase),
];

/// Convert a power in dBm dissipated in `load` ohms to volts peak-to-peak.
pub fn dbm_to_vpp(dbm: f64, load: f64) -> f64 {
    let vrms = (load * 10f64.powf(dbm / 10.0) * 1e-3).sqrt();
    vrms_to_vpp(vrms)
}

/// Convert an RMS voltage of a sinusoid to volts peak-to-peak.
pub fn vrms_to_vpp(vrms: f64) -> f64 {
    2.0 * std::f64::consts::SQRT_2 * vrms
}

/// Scale factor applied to an EMF-referenced amplitude so that the wanted
/// voltage appears across `load` behind a `source` ohm series resistance.
/// A high-Z load leaves the divider at unity.
pub fn divider_correction(source: f64, load: Load) -> f64 {
    match load {
        Load::Ohms(ohms) => (source + ohms) / ohms,
        Load::HighZ => 1.0,
    }
}

/// Parses single SCPI commands and applies them to a driver.
///
/// The parser owns the per-channel load table; the driver additionally
/// receives every `set_load_impedance` call so stateful instruments can
/// track it themselves.
pub struct CommandParser {
    loads: [Load; CHANNEL_COUNT],
}

impl Default for CommandParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandParser {
    /// Channels start high-Z; the scope configures `LOAD` before it sends
    /// any amplitude.
    pub fn new() -> Self {
        Self {
            loads: [Load::HighZ; CHANNEL_COUNT],
        }
    }

    /// Parse one command (already stripped of terminators) and issue the
    /// resulting driver calls in command order.
    pub fn parse(&mut self, command: &str, awg: &mut dyn Awg) {
        let command = command.trim();
        if command.is_empty() {
            return;
        }

        let (head, args) = match command.split_once(' ') {
            Some((head, args)) => (head, args.trim()),
            None => (command, ""),
        };
        let head = head.to_ascii_uppercase();

        let (channel, root) = match channel_and_root(&head) {
            Ok(parsed) => parsed,
            Err(index) => {
                log::warn!("channel C{} out of range, dropping {:?}", index, command);
                return;
            }
        };

        if root.ends_with('?') {
            // Queries (*IDN?, C1:BSWV?) are answered by the canned
            // device_read reply; there is nothing to forward.
            log::debug!("query {} handled by the read path", root);
            return;
        }

        match root {
            "OUTP" => self.output(channel, args, awg),
            "BSWV" => self.basic_wave(channel, args, awg),
            "BTWV" => log::debug!("ignoring burst configuration for {:?}", channel),
            _ => log::debug!("ignoring unknown command {:?}", command),
        }
    }

    /// `Cn:OUTP <ON|OFF>[,LOAD,<z>]`. The load change lands before the
    /// enable so that everything downstream sees the new impedance.
    fn output(&mut self, channel: Channel, args: &str, awg: &mut dyn Awg) {
        let mut tokens = args.split(',').map(str::trim);

        let on = match tokens.next() {
            Some(state) if state.eq_ignore_ascii_case("ON") => true,
            Some(state) if state.eq_ignore_ascii_case("OFF") => false,
            state => {
                log::warn!("unrecognized output state {:?}", state);
                return;
            }
        };

        while let Some(name) = tokens.next() {
            if name.is_empty() {
                continue;
            }
            match tokens.next() {
                Some(value) if name.eq_ignore_ascii_case("LOAD") => {
                    self.set_load(channel, value, awg)
                }
                Some(value) => {
                    log::warn!("unknown OUTP parameter {},{}; skipping", name, value)
                }
                None => log::warn!("OUTP parameter {} is missing its value", name),
            }
        }

        if let Err(e) = awg.enable_output(channel, on) {
            log::error!("driver rejected output enable: {:?}", e);
        }
    }

    fn set_load(&mut self, channel: Channel, value: &str, awg: &mut dyn Awg) {
        let load = if value.eq_ignore_ascii_case("HZ") {
            Load::HighZ
        } else {
            match value.parse::<f64>() {
                Ok(ohms) => Load::Ohms(ohms),
                Err(_) => {
                    log::warn!("malformed load impedance {:?}; skipping", value);
                    return;
                }
            }
        };

        for single in channel.split() {
            self.loads[single.index()] = load;
        }
        if let Err(e) = awg.set_load_impedance(channel, load) {
            log::error!("driver rejected load change: {:?}", e);
        }
    }

    /// `Cn:BSWV <param>,<value>,…`. Parameters are applied left to right;
    /// a bad pair is dropped and parsing continues with the next one.
    fn basic_wave(&mut self, channel: Channel, args: &str, awg: &mut dyn Awg) {
        let mut tokens = args.split(',').map(str::trim);

        while let Some(name) = tokens.next() {
            if name.is_empty() {
                continue;
            }
            let value = match tokens.next() {
                Some(value) => value,
                None => {
                    log::warn!("BSWV parameter {} is missing its value", name);
                    return;
                }
            };
            match WAVE_PARAMS
                .iter()
                .find(|(param, _)| name.eq_ignore_ascii_case(param))
            {
                Some((_, kind)) => self.wave_param(channel, *kind, value, awg),
                None => log::warn!("unknown BSWV parameter {},{}; skipping", name, value),
            }
        }
    }

    fn wave_param(&mut self, channel: Channel, kind: WaveParam, value: &str, awg: &mut dyn Awg) {
        match kind {
            WaveParam::WaveType => {
                let wave = WaveType::from_mnemonic(value).unwrap_or_else(|| {
                    log::warn!("unknown waveform {:?}, falling back to sine", value);
                    WaveType::Sine
                });
                if let Err(e) = awg.set_wave_type(channel, wave) {
                    log::error!("driver rejected wave type: {:?}", e);
                }
            }
            WaveParam::Frequency => {
                if let Some(frequency) = parse_numeric("FRQ", value) {
                    if let Err(e) = awg.set_frequency(channel, frequency) {
                        log::error!("driver rejected frequency: {:?}", e);
                    }
                }
            }
            WaveParam::Offset => {
                if let Some(offset) = parse_numeric("OFST", value) {
                    if let Err(e) = awg.set_offset(channel, offset) {
                        log::error!("driver rejected offset: {:?}", e);
                    }
                }
            }
            WaveParam::Phase => {
                if let Some(phase) = parse_numeric("PHSE", value) {
                    if let Err(e) = awg.set_phase(channel, phase) {
                        log::error!("driver rejected phase: {:?}", e);
                    }
                }
            }
            WaveParam::Amplitude | WaveParam::AmplitudeDbm | WaveParam::AmplitudeVrms => {
                if let Some(amplitude) = parse_numeric("amplitude", value) {
                    self.amplitude(channel, kind, amplitude, awg);
                }
            }
        }
    }

    /// Resolve an amplitude to volts peak-to-peak and send it down.
    ///
    /// Issued per physical channel: the dBm conversion and the divider
    /// correction both depend on the load, and each channel may carry a
    /// different one.
    fn amplitude(&mut self, channel: Channel, kind: WaveParam, value: f64, awg: &mut dyn Awg) {
        for single in channel.split() {
            let load = self.loads[single.index()];
            let vpp = match kind {
                WaveParam::Amplitude => value,
                WaveParam::AmplitudeVrms => vrms_to_vpp(value),
                WaveParam::AmplitudeDbm => match load {
                    Load::Ohms(ohms) => dbm_to_vpp(value, ohms),
                    Load::HighZ => {
                        log::warn!(
                            "{} dBm into a high-Z load has no defined voltage; skipping",
                            value
                        );
                        continue;
                    }
                },
                _ => unreachable!(),
            };
            let vpp = match awg.source_impedance() {
                Some(source) => vpp * divider_correction(source, load),
                None => vpp,
            };
            if let Err(e) = awg.set_amplitude(single, vpp) {
                log::error!("driver rejected amplitude: {:?}", e);
            }
        }
    }
}

/// Split the optional `Cn:` prefix off an (already uppercased) command
/// head. A head without the prefix addresses all channels. `Err` carries
/// an index that is syntactically a channel but out of range.
fn channel_and_root(head: &str) -> Result<(Channel, &str), u32> {
    if let Some(rest) = head.strip_prefix('C') {
        if let Some((index, root)) = rest.split_once(':') {
            if let Ok(index) = index.parse::<u32>() {
                return match Channel::from_scpi_index(index) {
                    Some(channel) => Ok((channel, root)),
                    None => Err(index),
                };
            }
        }
    }
    Ok((Channel::ALL, head))
}

fn parse_numeric(what: &str, value: &str) -> Option<f64> {
    match value.parse::<f64>() {
        Ok(number) => Some(number),
        Err(_) => {
            log::warn!("malformed {} value {:?}; skipping", what, value);
            None
        }
    }
}
