//! Per-model channel ranges, gains and raw sample decoding.

use ueidaq_core::{Direction, DeviceModelKind, Result, UeiError};

/// Gains selectable on the AI-217-803, indexed by gain code.
const AI217_GAINS: [u32; 7] = [1, 2, 4, 8, 16, 32, 64];

/// Gains selectable on the AI-201-100, indexed by gain code.
const AI201_GAINS: [u32; 4] = [1, 2, 5, 10];

/// Full-scale input span of the analog layers, volts (+/-10 V).
const ANALOG_SPAN_V: f64 = 20.0;

/// Hardware layer model together with its per-channel settings.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceModel {
    /// 16 simultaneous 24-bit analog inputs.
    Ai217_803 {
        /// Gain per channel number.
        gains: Vec<u32>,
    },
    /// 24 multiplexed 16-bit analog inputs.
    Ai201_100 {
        /// Gain per channel number.
        gains: Vec<u32>,
    },
    /// Six 8-bit digital ports, each readable and writable.
    Dio403,
    /// Eight analog outputs.
    Ao308,
}

impl DeviceModel {
    /// Build a model, checking the configured gains.
    ///
    /// `gains[n]` is the gain of channel `n`; channels past the end of the
    /// list run at gain 1. Models without programmable gain reject a
    /// non-empty list.
    pub fn new(device: &str, kind: DeviceModelKind, gains: &[u32]) -> Result<Self> {
        let model = match kind {
            DeviceModelKind::Ai217_803 => Self::Ai217_803 {
                gains: gains.to_vec(),
            },
            DeviceModelKind::Ai201_100 => Self::Ai201_100 {
                gains: gains.to_vec(),
            },
            DeviceModelKind::Dio403 => Self::Dio403,
            DeviceModelKind::Ao308 => Self::Ao308,
        };

        let allowed = model.allowed_gains();
        if allowed.is_empty() && !gains.is_empty() {
            return Err(UeiError::config(format!(
                "Device '{}': model {} has no programmable gain",
                device, kind
            )));
        }
        if let Some(max) = model.max_channel(Direction::Input) {
            if gains.len() > max as usize + 1 {
                return Err(UeiError::config(format!(
                    "Device '{}': {} gains given for {} channels",
                    device,
                    gains.len(),
                    max + 1
                )));
            }
        }
        if let Some(bad) = gains.iter().find(|g| !allowed.contains(g)) {
            return Err(UeiError::config(format!(
                "Device '{}': gain {} not one of {:?}",
                device, bad, allowed
            )));
        }
        Ok(model)
    }

    /// Configuration tag of this model.
    pub fn kind(&self) -> DeviceModelKind {
        match self {
            Self::Ai217_803 { .. } => DeviceModelKind::Ai217_803,
            Self::Ai201_100 { .. } => DeviceModelKind::Ai201_100,
            Self::Dio403 => DeviceModelKind::Dio403,
            Self::Ao308 => DeviceModelKind::Ao308,
        }
    }

    /// Whether the model serves `direction` at all.
    pub fn supports(&self, direction: Direction) -> bool {
        self.max_channel(direction).is_some()
    }

    /// Highest channel number for `direction`, `None` when unsupported.
    pub fn max_channel(&self, direction: Direction) -> Option<u32> {
        match (self, direction) {
            (Self::Ai217_803 { .. }, Direction::Input) => Some(15),
            (Self::Ai201_100 { .. }, Direction::Input) => Some(23),
            (Self::Dio403, _) => Some(5),
            (Self::Ao308, Direction::Output) => Some(7),
            _ => None,
        }
    }

    /// Whether `channel` is valid for `direction`.
    pub fn accepts(&self, channel: u32, direction: Direction) -> bool {
        self.max_channel(direction)
            .is_some_and(|max| channel <= max)
    }

    /// Highest sampling frequency the layer can run at, Hz.
    pub fn max_sampling_frequency(&self) -> f64 {
        match self {
            Self::Ai217_803 { .. } => 1_000.0,
            Self::Ai201_100 { .. } => 100_000.0,
            Self::Dio403 | Self::Ao308 => 10_000.0,
        }
    }

    /// Gains the model can select, empty for fixed-range layers.
    pub fn allowed_gains(&self) -> &'static [u32] {
        match self {
            Self::Ai217_803 { .. } => &AI217_GAINS,
            Self::Ai201_100 { .. } => &AI201_GAINS,
            Self::Dio403 | Self::Ao308 => &[],
        }
    }

    /// Gain of a channel number.
    pub fn gain(&self, channel: u32) -> u32 {
        match self {
            Self::Ai217_803 { gains } | Self::Ai201_100 { gains } => {
                gains.get(channel as usize).copied().unwrap_or(1)
            }
            Self::Dio403 | Self::Ao308 => 1,
        }
    }

    /// Gain code written into the driver channel word.
    pub fn gain_code(&self, channel: u32) -> u32 {
        let gain = self.gain(channel);
        self.allowed_gains()
            .iter()
            .position(|&g| g == gain)
            .map_or(0, |code| code as u32)
    }

    /// Convert a raw input word of `channel` to engineering units.
    ///
    /// Analog layers return volts, the digital layer the port value.
    pub fn decode(&self, channel: u32, raw: u32) -> std::result::Result<f64, String> {
        match self {
            Self::Ai217_803 { .. } => {
                let code = i64::from(raw & 0x00FF_FFFF) - 0x0080_0000;
                Ok(code as f64 * ANALOG_SPAN_V / 16_777_216.0 / f64::from(self.gain(channel)))
            }
            Self::Ai201_100 { .. } => {
                let code = i64::from(raw & 0xFFFF) - 0x8000;
                Ok(code as f64 * ANALOG_SPAN_V / 65_536.0 / f64::from(self.gain(channel)))
            }
            Self::Dio403 => Ok(f64::from(raw & 0xFF)),
            Self::Ao308 => Err("AO-308 has no input channels".to_string()),
        }
    }
}
