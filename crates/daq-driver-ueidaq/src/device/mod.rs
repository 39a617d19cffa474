//! Hardware layers.
//!
//! A [`Device`] is one layer (channel group) in an IOM slot. It validates the
//! channel lists maps hand it, turns them into driver channel words, and
//! converts raw input words into engineering values in signal memory.
//!
//! Devices are shared: the [`DeviceRegistry`](crate::DeviceRegistry) owns
//! them behind `Arc` and maps refer to them by [`DeviceId`]. All mutation
//! after construction goes through interior locks and atomics.

mod channel_list;
mod models;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tracing::debug;
use ueidaq_core::driver::{pack_channel, FIFO_MODE, RAW_WORD_SIZE};
use ueidaq_core::{
    ChannelListFault, DeviceConfig, DeviceModelKind, Direction, MapType, OneShotFlag, Result,
    SignalType, UeiError,
};

pub use channel_list::ChannelList;
pub use models::DeviceModel;

/// Number of layer slots in an IOM chassis.
pub const MAX_IO_SLOTS: u32 = 12;

/// Handle of a device in a [`DeviceRegistry`](crate::DeviceRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub(crate) u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

/// Flag that can be raised once and never lowered.
#[derive(Debug, Default)]
struct OneShot(AtomicBool);

impl OneShot {
    /// Raise the flag. Returns `false` if it was already raised.
    fn raise(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One hardware layer.
#[derive(Debug)]
pub struct Device {
    name: String,
    devn: u32,
    sampling_frequency: f64,
    model: DeviceModel,
    inputs: RwLock<ChannelList>,
    outputs: RwLock<ChannelList>,
    hardware_bound: OneShot,
    map_assigned: OneShot,
}

impl Device {
    /// Create a layer in slot `devn`.
    pub fn new(
        name: &str,
        kind: DeviceModelKind,
        devn: u32,
        sampling_frequency: f64,
        gains: &[u32],
    ) -> Result<Self> {
        if devn >= MAX_IO_SLOTS {
            return Err(UeiError::InvalidDevn {
                device: name.to_string(),
                devn,
                max: MAX_IO_SLOTS,
            });
        }
        let model = DeviceModel::new(name, kind, gains)?;
        if !(sampling_frequency > 0.0) || sampling_frequency > model.max_sampling_frequency() {
            return Err(UeiError::config(format!(
                "Device '{}': sampling frequency {} Hz outside (0, {}] for {}",
                name,
                sampling_frequency,
                model.max_sampling_frequency(),
                kind
            )));
        }

        Ok(Self {
            name: name.to_string(),
            devn,
            sampling_frequency,
            model,
            inputs: RwLock::new(ChannelList::default()),
            outputs: RwLock::new(ChannelList::default()),
            hardware_bound: OneShot::default(),
            map_assigned: OneShot::default(),
        })
    }

    /// Create a layer from its configuration entry.
    pub fn from_config(config: &DeviceConfig) -> Result<Self> {
        Self::new(
            &config.name,
            config.model,
            config.devn,
            config.sampling_frequency,
            &config.gains,
        )
    }

    /// Configured name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slot number.
    pub fn devn(&self) -> u32 {
        self.devn
    }

    /// Sampling frequency, Hz.
    pub fn sampling_frequency(&self) -> f64 {
        self.sampling_frequency
    }

    /// Model and per-channel settings.
    pub fn model(&self) -> &DeviceModel {
        &self.model
    }

    /// Size in bytes of one raw sample in the driver input map.
    pub fn sample_width(&self) -> usize {
        RAW_WORD_SIZE
    }

    /// Whether `channel` is valid for `direction` on this model.
    pub fn check_channel_and_direction(&self, channel: u32, direction: Direction) -> bool {
        self.model.accepts(channel, direction)
    }

    /// Validate a channel list for `direction`, reporting every fault found.
    pub fn check_channel_list_and_direction(
        &self,
        channels: &[u32],
        direction: Direction,
    ) -> Result<()> {
        self.validated_list(channels, direction).map(|_| ())
    }

    fn validated_list(&self, channels: &[u32], direction: Direction) -> Result<ChannelList> {
        if !self.model.supports(direction) {
            let mut faults = vec![ChannelListFault::DirectionNotSupported];
            faults.extend(channel_list::faults(channels, |_| true));
            return Err(UeiError::InvalidChannelList {
                device: self.name.clone(),
                direction,
                faults,
            });
        }
        ChannelList::validated(channels, |c| self.check_channel_and_direction(c, direction))
            .map_err(|faults| UeiError::InvalidChannelList {
                device: self.name.clone(),
                direction,
                faults,
            })
    }

    /// Store the input channel list. Leaves the previous list on failure.
    pub fn set_input_channel_list(&self, channels: &[u32]) -> Result<()> {
        self.set_channel_list(channels, Direction::Input)
    }

    /// Store the output channel list. Leaves the previous list on failure.
    pub fn set_output_channel_list(&self, channels: &[u32]) -> Result<()> {
        self.set_channel_list(channels, Direction::Output)
    }

    /// Store the channel list of `direction`.
    pub fn set_channel_list(&self, channels: &[u32], direction: Direction) -> Result<()> {
        let list = self.validated_list(channels, direction)?;
        debug!(device = %self.name, %direction, channels = ?list.as_slice(), "channel list set");
        *self.list(direction).write() = list;
        Ok(())
    }

    fn list(&self, direction: Direction) -> &RwLock<ChannelList> {
        match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        }
    }

    /// Copy of the channel list of `direction`.
    pub fn channels(&self, direction: Direction) -> Vec<u32> {
        self.list(direction).read().as_slice().to_vec()
    }

    /// Number of channels in the list of `direction`.
    pub fn channel_count(&self, direction: Direction) -> usize {
        self.list(direction).read().len()
    }

    /// Position of `channel` in the list of `direction`.
    pub fn find_channel_index(&self, channel: u32, direction: Direction) -> Option<usize> {
        self.list(direction).read().position(channel)
    }

    /// Mark the layer as bound to its physical slot. Succeeds once.
    pub fn set_hardware_correspondence(&self) -> Result<()> {
        self.raise(&self.hardware_bound, OneShotFlag::HardwareCorrespondence)
    }

    /// Mark the layer as claimed by a map. Succeeds once.
    pub fn set_map_assignment(&self) -> Result<()> {
        self.raise(&self.map_assigned, OneShotFlag::MapAssignment)
    }

    fn raise(&self, flag: &OneShot, which: OneShotFlag) -> Result<()> {
        if flag.raise() {
            Ok(())
        } else {
            Err(UeiError::AlreadySet {
                device: self.name.clone(),
                flag: which,
            })
        }
    }

    /// Whether the layer is bound to its slot.
    pub fn is_hardware_bound(&self) -> bool {
        self.hardware_bound.is_raised()
    }

    /// Whether a map has claimed the layer.
    pub fn is_map_assigned(&self) -> bool {
        self.map_assigned.is_raised()
    }

    /// Driver channel words for the stored list of `direction`.
    ///
    /// Variable-rate maps read inputs through the layer FIFO.
    pub fn configure_channels(&self, direction: Direction, map_type: MapType) -> Result<Vec<u32>> {
        let list = self.list(direction).read();
        if list.is_empty() {
            return Err(UeiError::InvalidChannelList {
                device: self.name.clone(),
                direction,
                faults: vec![ChannelListFault::Empty],
            });
        }
        let flags = match (direction, map_type) {
            (Direction::Input, MapType::RtVMap) => FIFO_MODE,
            _ => 0,
        };
        Ok(list
            .as_slice()
            .iter()
            .map(|&c| pack_channel(c, self.model.gain_code(c), flags))
            .collect())
    }

    /// Decode the raw word of input channel `channel_index` (a position in the
    /// input list) and store it into `output` as `output_type`.
    pub fn scale_signal(
        &self,
        channel_index: usize,
        raw: u32,
        output: &mut [u8],
        output_type: SignalType,
    ) -> Result<()> {
        let channel = self
            .inputs
            .read()
            .get(channel_index)
            .ok_or_else(|| self.decode_error(channel_index, "no such input channel"))?;
        let value = self
            .model
            .decode(channel, raw)
            .map_err(|message| self.decode_error(channel_index, message))?;
        output_type.write_f64(value, output)
    }

    fn decode_error(&self, channel_index: usize, message: impl Into<String>) -> UeiError {
        UeiError::Decode {
            device: self.name.clone(),
            channel_index,
            message: message.into(),
        }
    }

    /// Convert `n` elements of a typed buffer into booleans (`value != 0`).
    pub fn any_type_to_boolean(
        &self,
        n: usize,
        out: &mut [bool],
        input: &[u8],
        input_type: SignalType,
    ) -> Result<()> {
        if !input_type.is_numeric() {
            return Err(UeiError::UnsupportedType(input_type));
        }
        let width = input_type.byte_size();
        if out.len() < n {
            return Err(UeiError::BufferTooSmall {
                needed: n,
                actual: out.len(),
            });
        }
        if input.len() < n * width {
            return Err(UeiError::BufferTooSmall {
                needed: n * width,
                actual: input.len(),
            });
        }
        for (slot, element) in out.iter_mut().zip(input.chunks_exact(width)).take(n) {
            *slot = input_type.read_nonzero(element)?;
        }
        Ok(())
    }
}
