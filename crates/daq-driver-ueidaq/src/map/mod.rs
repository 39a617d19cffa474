//! Acquisition maps.
//!
//! A map is one driver session polling a fixed set of layers:
//!
//! - [`RtDMap`]: fixed rate, one scan per refresh.
//! - [`RtVMap`]: variable rate, bursts of FIFO-buffered scans per refresh,
//!   queued in a [`FrameRing`] and consumed `Samples` at a time.
//!
//! Both share [`MapCore`]: the member table, coherency checks, session
//! setup and teardown, timestamp correction and per-sample decoding.
//! [`UeiMap`] is the closed set of the two.
//!
//! # Lifecycle
//!
//! ```text
//! Unconfigured --check_map_coherency--> Coherent --start_map--> Started
//!                                                                  |
//!                     Coherent <--start_map re-checks-- Stopped <--stop_map
//! ```
//!
//! Decoding is all-or-nothing: samples are written into a staging packet and
//! swapped into the visible packet only when every channel of every sample
//! decoded. The timestamp corrector advances only on that swap.

mod ring;
mod rtdmap;
mod rtvmap;
mod timestamp;

use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use ueidaq_core::driver::{FIFO_MODE, INVALID_SESSION, RAW_WORD_SIZE, TIMESTAMP_CHANNEL};
use ueidaq_core::{
    Direction, DriverStatus, MapConfig, MapType, Result, SessionHandle, SignalType, UeiError,
};

use crate::device::DeviceId;
use crate::iom::Iom;
use crate::registry::DeviceRegistry;

pub use ring::FrameRing;
pub use rtdmap::RtDMap;
pub use rtvmap::RtVMap;
pub use timestamp::TimestampCorrector;

/// Lifecycle state of a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapState {
    /// Members changed or a coherency check failed.
    Unconfigured,
    /// Coherency check passed.
    Coherent,
    /// Session open and acquiring.
    Started,
    /// Session closed after running.
    Stopped,
}

impl fmt::Display for MapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Unconfigured => "unconfigured",
            Self::Coherent => "coherent",
            Self::Started => "started",
            Self::Stopped => "stopped",
        };
        write!(f, "{}", label)
    }
}

/// Outcome of one successful poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// A new packet was decoded and is visible through [`MapCore::packet`].
    NewData,
    /// Nothing new since the last packet; the packet is unchanged.
    NoNewData,
    /// The hardware FIFO or the frame ring overflowed.
    FifoOverflow,
}

/// Device and channel subset contributing to a map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapMember {
    /// Direction served.
    pub direction: Direction,
    /// Channels, strictly ascending.
    pub channels: Vec<u32>,
    /// Device bound to the slot.
    pub device: Option<DeviceId>,
}

/// Counters kept by a map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapStats {
    /// Packets decoded and committed.
    pub packets: u64,
    /// Polls that found nothing new.
    pub no_data: u64,
    /// FIFO or ring overflows.
    pub overflows: u64,
    /// Polls that returned an error.
    pub errors: u64,
    /// Variable-rate resets.
    pub resets: u64,
}

/// Decoded samples of one poll.
///
/// Channel `i` holds `samples` elements of `channel_type(i)` in host byte
/// order, ready to be copied into signal memory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPacket {
    samples: usize,
    types: Vec<SignalType>,
    timestamps: Vec<u64>,
    channels: Vec<Vec<u8>>,
}

impl DecodedPacket {
    fn new(samples: usize, types: &[SignalType]) -> Self {
        Self {
            samples,
            types: types.to_vec(),
            timestamps: vec![0; samples],
            channels: types
                .iter()
                .map(|t| vec![0; t.byte_size() * samples])
                .collect(),
        }
    }

    /// Samples per channel.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Corrected timestamp of every sample.
    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps
    }

    /// Raw bytes of channel `index`.
    pub fn channel(&self, index: usize) -> Option<&[u8]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    /// Element type of channel `index`.
    pub fn channel_type(&self, index: usize) -> Option<SignalType> {
        self.types.get(index).copied()
    }

    /// Sample `sample` of channel `channel` as `f64`.
    pub fn value(&self, channel: usize, sample: usize) -> Option<f64> {
        let ty = self.channel_type(channel)?;
        let size = ty.byte_size();
        let bytes = self.channel(channel)?.get(sample * size..(sample + 1) * size)?;
        ty.read_f64(bytes).ok()
    }
}

/// Where one input layer's words sit in a frame.
#[derive(Debug, Clone, Copy)]
struct InputSlot {
    device: DeviceId,
    devn: u32,
    /// Words per scan, the timestamp word included.
    words: usize,
    /// Byte offset of the first channel word in the frame.
    data_offset: usize,
    /// Channels of this layer.
    channels: usize,
    /// Index of this layer's first channel among all map input channels.
    first_channel: usize,
}

fn word_at(bytes: &[u8], offset: usize) -> Option<u32> {
    let b = bytes.get(offset..offset + RAW_WORD_SIZE)?;
    Some(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Decode one scan frame into sample `sample` of `packet`.
fn decode_frame(
    registry: &DeviceRegistry,
    inputs: &[InputSlot],
    frame: &[u8],
    sample: usize,
    packet: &mut DecodedPacket,
) -> Result<()> {
    for slot in inputs {
        let device = registry.resolve(slot.device)?;
        for k in 0..slot.channels {
            let raw = word_at(frame, slot.data_offset + k * RAW_WORD_SIZE).ok_or_else(|| {
                UeiError::Decode {
                    device: device.name().to_string(),
                    channel_index: k,
                    message: "input map too short".to_string(),
                }
            })?;
            let index = slot.first_channel + k;
            let ty = packet.types[index];
            let size = ty.byte_size();
            let out = &mut packet.channels[index][sample * size..(sample + 1) * size];
            device.scale_signal(k, raw, out, ty)?;
        }
    }
    Ok(())
}

/// State and behaviour shared by both map protocols.
#[derive(Debug)]
pub struct MapCore {
    name: String,
    map_type: MapType,
    iom: Iom,
    registry: Arc<DeviceRegistry>,
    members: Vec<MapMember>,
    scan_rate: Option<f64>,
    effective_rate: f64,
    samples: usize,
    number_of_buffers: usize,
    state: MapState,
    session: SessionHandle,
    corrector: TimestampCorrector,
    first_packet: bool,
    signals_configured: bool,
    packet: DecodedPacket,
    staging: DecodedPacket,
    inputs: Vec<InputSlot>,
    frame_size: usize,
    raw_maps: Vec<Vec<u8>>,
    /// Variable-rate scans read but not yet framed, one byte queue per layer.
    backlog: Vec<Vec<u8>>,
    frame: Vec<u8>,
    stats: MapStats,
}

impl MapCore {
    fn new(
        name: &str,
        map_type: MapType,
        scan_rate: Option<f64>,
        samples: usize,
        number_of_buffers: usize,
        iom: Iom,
        registry: Arc<DeviceRegistry>,
    ) -> Self {
        Self {
            name: name.to_string(),
            map_type,
            iom,
            registry,
            members: Vec::new(),
            scan_rate,
            effective_rate: 0.0,
            samples,
            number_of_buffers,
            state: MapState::Unconfigured,
            session: INVALID_SESSION,
            corrector: TimestampCorrector::new(),
            first_packet: true,
            signals_configured: false,
            packet: DecodedPacket::default(),
            staging: DecodedPacket::default(),
            inputs: Vec::new(),
            frame_size: 0,
            raw_maps: Vec::new(),
            backlog: Vec::new(),
            frame: Vec::new(),
            stats: MapStats::default(),
        }
    }

    /// Map name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol.
    pub fn map_type(&self) -> MapType {
        self.map_type
    }

    /// Lifecycle state.
    pub fn state(&self) -> MapState {
        self.state
    }

    /// Whether the last coherency check passed (or the map is running).
    pub fn is_coherent(&self) -> bool {
        matches!(self.state, MapState::Coherent | MapState::Started)
    }

    /// Whether the session is acquiring.
    pub fn is_started(&self) -> bool {
        self.state == MapState::Started
    }

    /// Whether the consumer's signals have been accepted.
    pub fn signals_configured(&self) -> bool {
        self.signals_configured
    }

    /// Driver session, [`INVALID_SESSION`] when closed.
    pub fn session(&self) -> SessionHandle {
        self.session
    }

    /// Member slots in the order they were added.
    pub fn members(&self) -> &[MapMember] {
        &self.members
    }

    /// Configured scan rate, Hz.
    pub fn scan_rate(&self) -> Option<f64> {
        self.scan_rate
    }

    /// Scan rate granted by the driver at the last start, Hz.
    pub fn effective_scan_rate(&self) -> f64 {
        self.effective_rate
    }

    /// Samples per channel delivered by each poll.
    pub fn samples_per_read(&self) -> usize {
        self.samples
    }

    /// `Samples`-sized blocks held by the frame ring (variable-rate only).
    pub fn number_of_buffers(&self) -> usize {
        self.number_of_buffers
    }

    /// Number of input channels over all input members.
    pub fn input_channel_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.direction == Direction::Input)
            .map(|m| m.channels.len())
            .sum()
    }

    /// Last committed packet.
    pub fn packet(&self) -> &DecodedPacket {
        &self.packet
    }

    /// Corrected timestamp of the newest committed sample.
    pub fn last_timestamp(&self) -> Option<u64> {
        self.corrector.current()
    }

    /// Timestamp corrector state.
    pub fn corrector(&self) -> &TimestampCorrector {
        &self.corrector
    }

    /// Counters.
    pub fn stats(&self) -> MapStats {
        self.stats
    }

    /// Bytes of one scan frame over all input layers.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Add an unbound member slot and return its index.
    pub fn add_member(&mut self, direction: Direction, channels: &[u32]) -> usize {
        self.members.push(MapMember {
            direction,
            channels: channels.to_vec(),
            device: None,
        });
        self.state = MapState::Unconfigured;
        self.signals_configured = false;
        self.members.len() - 1
    }

    /// Bind a registered device to member slot `slot`.
    ///
    /// Claims the device for this map (a device already serving this map in
    /// the other direction is not claimed twice) and stores the member's
    /// channel list into it.
    pub fn set_device(&mut self, slot: usize, id: DeviceId) -> Result<()> {
        let member = self.members.get(slot).ok_or(UeiError::SlotOutOfRange {
            map: self.name.clone(),
            slot,
            slots: self.members.len(),
        })?;
        if member.device.is_some() {
            return Err(UeiError::config(format!(
                "Map '{}': member slot {} is already bound",
                self.name, slot
            )));
        }
        let direction = member.direction;
        let device = self.registry.resolve(id)?;
        device.check_channel_list_and_direction(&member.channels, direction)?;

        let mut in_this_map = false;
        for other in self.members.iter().filter(|m| m.device == Some(id)) {
            if other.direction == direction {
                return Err(UeiError::config(format!(
                    "Map '{}': device '{}' already serves {} here",
                    self.name,
                    device.name(),
                    direction
                )));
            }
            in_this_map = true;
        }
        if !in_this_map {
            device.set_map_assignment()?;
        }
        device.set_channel_list(&member.channels, direction)?;

        debug!(map = %self.name, slot, device = %device.name(), %direction, "Member bound");
        self.members[slot].device = Some(id);
        self.state = MapState::Unconfigured;
        Ok(())
    }

    /// Check that the map can be started.
    pub fn check_map_coherency(&mut self) -> Result<()> {
        let result = self.coherency();
        match &result {
            Ok(()) => {
                if self.state != MapState::Started {
                    self.state = MapState::Coherent;
                }
            }
            Err(e) => {
                warn!(map = %self.name, error = %e, "Map not coherent");
                if self.state != MapState::Started {
                    self.state = MapState::Unconfigured;
                }
            }
        }
        result
    }

    fn coherency(&self) -> Result<()> {
        if !self
            .members
            .iter()
            .any(|m| m.direction == Direction::Input)
        {
            return Err(UeiError::config(format!(
                "Map '{}' has no input members",
                self.name
            )));
        }
        if self.map_type == MapType::RtVMap && (self.samples < 2 || self.number_of_buffers == 0) {
            return Err(UeiError::InvalidSampleCount {
                map: self.name.clone(),
                map_type: self.map_type,
                samples: self.samples,
                expected: "Samples > 1 and NumberOfBuffers >= 1".to_string(),
            });
        }
        let rate = self.requested_scan_rate()?;
        for (slot, member) in self.members.iter().enumerate() {
            let id = member.device.ok_or(UeiError::UnboundMember {
                map: self.name.clone(),
                slot,
            })?;
            let device = self.registry.resolve(id)?;
            device.check_channel_list_and_direction(&member.channels, member.direction)?;
            if rate > device.sampling_frequency() {
                return Err(UeiError::ScanRateTooHigh {
                    map: self.name.clone(),
                    rate,
                    device: device.name().to_string(),
                    limit: device.sampling_frequency(),
                });
            }
        }
        Ok(())
    }

    /// Configured scan rate, or the slowest member's sampling frequency.
    fn requested_scan_rate(&self) -> Result<f64> {
        if let Some(rate) = self.scan_rate {
            return Ok(rate);
        }
        let mut slowest: Option<f64> = None;
        for id in self.members.iter().filter_map(|m| m.device) {
            let f = self.registry.resolve(id)?.sampling_frequency();
            slowest = Some(slowest.map_or(f, |s| s.min(f)));
        }
        slowest.ok_or_else(|| {
            UeiError::config(format!("Map '{}': no scan rate and no members", self.name))
        })
    }

    /// Accept the consumer's signal layout.
    ///
    /// Fixed-rate maps deliver one sample per poll; variable-rate maps exactly
    /// their configured `Samples`. `channel_count` and `types.len()` must both
    /// equal the number of input channels. On failure the signals stay
    /// unconfigured and the call may be repeated.
    pub fn configure_inputs_for_data_source(
        &mut self,
        samples: usize,
        channel_count: usize,
        types: &[SignalType],
    ) -> Result<()> {
        self.signals_configured = false;
        let legal = match self.map_type {
            MapType::RtDMap => samples == 1,
            MapType::RtVMap => samples > 1 && samples == self.samples,
        };
        if !legal {
            let expected = match self.map_type {
                MapType::RtDMap => "1".to_string(),
                MapType::RtVMap => self.samples.to_string(),
            };
            return Err(UeiError::InvalidSampleCount {
                map: self.name.clone(),
                map_type: self.map_type,
                samples,
                expected,
            });
        }

        let expected = self.input_channel_count();
        for actual in [channel_count, types.len()] {
            if actual != expected {
                return Err(UeiError::ChannelCountMismatch {
                    map: self.name.clone(),
                    expected,
                    actual,
                });
            }
        }
        if let Some(bad) = types.iter().find(|t| !t.is_numeric()) {
            return Err(UeiError::UnsupportedType(*bad));
        }

        self.packet = DecodedPacket::new(samples, types);
        self.staging = DecodedPacket::new(samples, types);
        self.signals_configured = true;
        debug!(map = %self.name, samples, channels = channel_count, "Signals configured");
        Ok(())
    }

    fn start_session(&mut self) -> Result<()> {
        if self.state == MapState::Started {
            debug!(map = %self.name, "Map already started");
            return Ok(());
        }
        self.check_map_coherency()?;

        self.session = self.iom.open_session(self.map_type).map_err(|e| {
            error!(map = %self.name, error = %e, "Failed to open session");
            e
        })?;
        if let Err(e) = self.configure_session() {
            error!(map = %self.name, session = self.session, error = %e, "Failed to start map");
            if let Err(teardown) = self.close_session() {
                warn!(map = %self.name, error = %teardown, "Cleanup after failed start failed");
            }
            return Err(e);
        }

        self.state = MapState::Started;
        self.corrector.reset();
        self.first_packet = true;
        info!(
            map = %self.name,
            map_type = %self.map_type,
            session = self.session,
            rate_hz = self.effective_rate,
            "Map started"
        );
        Ok(())
    }

    /// Register every member with the freshly opened session and start it.
    fn configure_session(&mut self) -> Result<()> {
        let session = self.session;
        let rate = self.requested_scan_rate()?;
        self.effective_rate = self.iom.set_scan_rate(session, rate)?;

        let mode_flags = match self.map_type {
            MapType::RtDMap => 0,
            MapType::RtVMap => FIFO_MODE,
        };
        let mut inputs = Vec::new();
        let mut offset = 0;
        let mut first_channel = 0;
        for direction in [Direction::Input, Direction::Output] {
            for member in self.members.iter().filter(|m| m.direction == direction) {
                let id = member.device.ok_or(UeiError::NotCoherent {
                    map: self.name.clone(),
                })?;
                let device = self.registry.resolve(id)?;
                let mut words = device.configure_channels(direction, self.map_type)?;
                let has_timestamp = direction == Direction::Input && inputs.is_empty();
                if has_timestamp {
                    words.insert(0, TIMESTAMP_CHANNEL | mode_flags);
                }
                self.iom
                    .add_channels(session, device.devn(), direction, &words)?;

                if direction == Direction::Input {
                    let data_offset = offset + usize::from(has_timestamp) * RAW_WORD_SIZE;
                    inputs.push(InputSlot {
                        device: id,
                        devn: device.devn(),
                        words: words.len(),
                        data_offset,
                        channels: member.channels.len(),
                        first_channel,
                    });
                    offset += words.len() * RAW_WORD_SIZE;
                    first_channel += member.channels.len();
                }
            }
        }
        self.raw_maps = vec![Vec::new(); inputs.len()];
        self.backlog = vec![Vec::new(); inputs.len()];
        self.inputs = inputs;
        self.frame_size = offset;
        self.frame = Vec::with_capacity(offset);

        if self.map_type == MapType::RtVMap {
            for slot in &self.inputs {
                let granted = self
                    .iom
                    .request_input_size(session, slot.devn, self.samples)?;
                debug!(map = %self.name, devn = slot.devn, granted, "Input size negotiated");
            }
        }

        self.iom.start(session)?;
        self.iom.refresh(session)?;
        // Variable-rate scans read here stay in the backlog for the first poll.
        self.read_input_maps()
    }

    /// Stop and close the session. Both calls are always attempted; the first
    /// failure is returned.
    fn close_session(&mut self) -> Result<()> {
        if self.session == INVALID_SESSION {
            return Ok(());
        }
        let session = self.session;
        let stopped = self.iom.stop(session);
        let closed = self.iom.close_session(session);
        self.session = INVALID_SESSION;
        stopped.and(closed)
    }

    /// Stop acquisition and close the session.
    pub fn stop_map(&mut self) -> Result<()> {
        let was_running = self.session != INVALID_SESSION;
        let result = self.close_session();
        if self.state == MapState::Started {
            self.state = MapState::Stopped;
        }
        match &result {
            Ok(()) if was_running => info!(map = %self.name, "Map stopped"),
            Ok(()) => {}
            Err(e) => warn!(map = %self.name, error = %e, "Map teardown failed"),
        }
        result
    }

    fn ensure_polling(&self) -> Result<()> {
        if self.state != MapState::Started {
            return Err(UeiError::NotStarted {
                map: self.name.clone(),
            });
        }
        if !self.signals_configured {
            return Err(UeiError::SignalsNotConfigured {
                map: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Refresh the session. A hardware FIFO overflow is counted and returns
    /// `Ok(false)`.
    fn refresh(&mut self) -> Result<bool> {
        match self.iom.refresh(self.session) {
            Ok(()) => Ok(true),
            Err(UeiError::Driver {
                status: DriverStatus::FifoOverflow,
                ..
            }) => {
                self.stats.overflows += 1;
                warn!(map = %self.name, "Hardware FIFO overflow");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn read_input_maps(&mut self) -> Result<()> {
        for (slot, buf) in self.inputs.iter().zip(self.raw_maps.iter_mut()) {
            self.iom.read_input_map(self.session, slot.devn, buf)?;
        }
        if self.map_type == MapType::RtVMap {
            self.queue_scans()?;
        }
        Ok(())
    }

    /// Append the scans just read to each layer's backlog. Nothing is queued
    /// unless every layer holds whole scans, so layers never drift apart.
    fn queue_scans(&mut self) -> Result<()> {
        for (slot, map) in self.inputs.iter().zip(&self.raw_maps) {
            let scan_bytes = slot.words * RAW_WORD_SIZE;
            if map.len() % scan_bytes != 0 {
                return Err(UeiError::Decode {
                    device: self.name.clone(),
                    channel_index: 0,
                    message: format!(
                        "devn {}: {} bytes is not a whole number of {}-byte scans",
                        slot.devn,
                        map.len(),
                        scan_bytes
                    ),
                });
            }
        }
        for (backlog, map) in self.backlog.iter_mut().zip(&self.raw_maps) {
            backlog.extend_from_slice(map);
        }
        Ok(())
    }

    fn backlog_scans(&self) -> impl Iterator<Item = usize> + '_ {
        self.inputs
            .iter()
            .zip(&self.backlog)
            .map(|(slot, queued)| queued.len() / (slot.words * RAW_WORD_SIZE))
    }

    /// Frames that can be assembled from the backlog: scan `k` of every layer
    /// forms frame `k`.
    fn queued_scans(&self) -> usize {
        self.backlog_scans().min().unwrap_or(0)
    }

    /// Scans waiting in the deepest layer backlog.
    fn backlog_depth(&self) -> usize {
        self.backlog_scans().max().unwrap_or(0)
    }

    /// Move the oldest backlog scan of every layer into the frame buffer.
    fn take_queued_scan(&mut self) -> bool {
        if self.queued_scans() == 0 {
            return false;
        }
        self.frame.clear();
        for (slot, queued) in self.inputs.iter().zip(self.backlog.iter_mut()) {
            self.frame.extend(queued.drain(..slot.words * RAW_WORD_SIZE));
        }
        true
    }

    fn clear_backlog(&mut self) {
        for queued in &mut self.backlog {
            queued.clear();
        }
    }

    /// Raw timestamp of the first scan in the current input maps.
    fn raw_timestamp(&self) -> Result<u32> {
        self.raw_maps
            .first()
            .and_then(|m| word_at(m, 0))
            .ok_or_else(|| UeiError::Decode {
                device: self.name.clone(),
                channel_index: 0,
                message: "input map has no timestamp".to_string(),
            })
    }

    /// Concatenate scan `scan` of every input map into the frame buffer.
    fn assemble_scan(&mut self, scan: usize) -> Result<()> {
        self.frame.clear();
        for (slot, map) in self.inputs.iter().zip(&self.raw_maps) {
            let len = slot.words * RAW_WORD_SIZE;
            let chunk = map
                .get(scan * len..(scan + 1) * len)
                .ok_or_else(|| UeiError::Decode {
                    device: self.name.clone(),
                    channel_index: 0,
                    message: format!("devn {}: scan {} missing from input map", slot.devn, scan),
                })?;
            self.frame.extend_from_slice(chunk);
        }
        Ok(())
    }

    /// Decode `frames` as one packet and commit it if all of them decode.
    fn commit_frames<'f, I>(&mut self, frames: I) -> Result<()>
    where
        I: IntoIterator<Item = &'f [u8]>,
    {
        let mut corrector = self.corrector;
        let mut decoded = 0;
        for (sample, frame) in frames.into_iter().enumerate() {
            if sample >= self.staging.samples {
                break;
            }
            let raw = word_at(frame, 0).ok_or_else(|| UeiError::Decode {
                device: self.name.clone(),
                channel_index: 0,
                message: "frame has no timestamp".to_string(),
            })?;
            self.staging.timestamps[sample] = corrector.correct(raw);
            decode_frame(&self.registry, &self.inputs, frame, sample, &mut self.staging)?;
            decoded += 1;
        }
        if decoded != self.staging.samples {
            return Err(UeiError::Decode {
                device: self.name.clone(),
                channel_index: 0,
                message: format!("{} of {} samples available", decoded, self.staging.samples),
            });
        }

        std::mem::swap(&mut self.packet, &mut self.staging);
        self.corrector = corrector;
        self.stats.packets += 1;
        if self.first_packet {
            self.first_packet = false;
            info!(map = %self.name, timestamp = ?self.corrector.current(), "First packet received");
        }
        Ok(())
    }
}

impl Drop for MapCore {
    fn drop(&mut self) {
        if self.session == INVALID_SESSION {
            return;
        }
        debug!(map = %self.name, session = self.session, "Closing session on drop");
        if let Err(e) = self.close_session() {
            warn!(map = %self.name, error = %e, "Map teardown failed");
        }
    }
}

/// Either map protocol.
#[derive(Debug)]
pub enum UeiMap {
    /// Fixed-rate map.
    Dmap(RtDMap),
    /// Variable-rate map.
    Vmap(RtVMap),
}

impl UeiMap {
    /// Build a map from its configuration and bind its members to the
    /// registry devices they name.
    pub fn from_config(config: &MapConfig, iom: Iom, registry: Arc<DeviceRegistry>) -> Result<Self> {
        let mut map = match config.map_type {
            MapType::RtDMap => {
                let rate = config.scan_rate.ok_or_else(|| {
                    UeiError::config(format!("RtDMap '{}' requires ScanRate", config.name))
                })?;
                Self::Dmap(RtDMap::new(&config.name, rate, iom, Arc::clone(&registry)))
            }
            MapType::RtVMap => Self::Vmap(RtVMap::new(
                &config.name,
                config.samples.unwrap_or(0),
                config.number_of_buffers.unwrap_or(0),
                config.scan_rate,
                iom,
                Arc::clone(&registry),
            )),
        };

        let members = config
            .inputs
            .iter()
            .map(|m| (Direction::Input, m))
            .chain(config.outputs.iter().map(|m| (Direction::Output, m)));
        for (direction, member) in members {
            let slot = map.core_mut().add_member(direction, &member.channels);
            let id = registry.require(&member.device)?;
            map.set_device(slot, id)?;
        }
        map.check_map_coherency()?;
        Ok(map)
    }

    /// Shared state.
    pub fn core(&self) -> &MapCore {
        match self {
            Self::Dmap(m) => m.core(),
            Self::Vmap(m) => m.core(),
        }
    }

    /// Shared state, mutably.
    pub fn core_mut(&mut self) -> &mut MapCore {
        match self {
            Self::Dmap(m) => m.core_mut(),
            Self::Vmap(m) => m.core_mut(),
        }
    }

    /// Map name.
    pub fn name(&self) -> &str {
        self.core().name()
    }

    /// Protocol.
    pub fn map_type(&self) -> MapType {
        self.core().map_type()
    }

    /// See [`MapCore::set_device`].
    pub fn set_device(&mut self, slot: usize, id: DeviceId) -> Result<()> {
        self.core_mut().set_device(slot, id)
    }

    /// See [`MapCore::check_map_coherency`].
    pub fn check_map_coherency(&mut self) -> Result<()> {
        self.core_mut().check_map_coherency()
    }

    /// See [`MapCore::configure_inputs_for_data_source`].
    pub fn configure_inputs_for_data_source(
        &mut self,
        samples: usize,
        channel_count: usize,
        types: &[SignalType],
    ) -> Result<()> {
        self.core_mut()
            .configure_inputs_for_data_source(samples, channel_count, types)
    }

    /// Open, configure and start the driver session.
    pub fn start_map(&mut self) -> Result<()> {
        match self {
            Self::Dmap(m) => m.start_map(),
            Self::Vmap(m) => m.start_map(),
        }
    }

    /// Poll the driver once.
    pub fn poll_for_new_packet(&mut self) -> Result<PollStatus> {
        match self {
            Self::Dmap(m) => m.poll_for_new_packet(),
            Self::Vmap(m) => m.poll_for_new_packet(),
        }
    }

    /// See [`MapCore::stop_map`].
    pub fn stop_map(&mut self) -> Result<()> {
        self.core_mut().stop_map()
    }

    /// Last committed packet.
    pub fn packet(&self) -> &DecodedPacket {
        self.core().packet()
    }

    /// Samples per channel delivered by each poll.
    pub fn samples_per_cycle(&self) -> usize {
        match self {
            Self::Dmap(_) => 1,
            Self::Vmap(m) => m.core().samples_per_read(),
        }
    }

    /// The variable-rate map, if this is one.
    pub fn as_vmap_mut(&mut self) -> Option<&mut RtVMap> {
        match self {
            Self::Dmap(_) => None,
            Self::Vmap(m) => Some(m),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use tracing_test::traced_test;
    use ueidaq_core::{DeviceModelKind, DriverStatus};
    use ueidaq_driver_mock::{MockIom, MockOp};

    fn setup() -> (MockIom, Arc<DeviceRegistry>, DeviceId) {
        let mock = MockIom::new("IOM_0");
        let registry = Arc::new(DeviceRegistry::new());
        let id = registry
            .register(Device::new("ai0", DeviceModelKind::Ai217_803, 0, 1000.0, &[]).unwrap())
            .unwrap();
        (mock, registry, id)
    }

    #[test]
    fn test_set_device_claims_once() {
        let (mock, registry, id) = setup();
        let mut a = RtDMap::new("a", 1.0, Iom::new(mock.clone()), Arc::clone(&registry));
        let slot = a.core_mut().add_member(Direction::Input, &[0, 1]);
        a.core_mut().set_device(slot, id).unwrap();

        let mut b = RtDMap::new("b", 1.0, Iom::new(mock), Arc::clone(&registry));
        let slot = b.core_mut().add_member(Direction::Input, &[2]);
        assert!(matches!(
            b.core_mut().set_device(slot, id),
            Err(UeiError::AlreadySet { .. })
        ));
        assert!(matches!(
            b.core_mut().set_device(7, id),
            Err(UeiError::SlotOutOfRange { .. })
        ));
    }

    #[test]
    fn test_coherency_rejects_fast_scan_rate() {
        let (mock, registry, id) = setup();
        let mut map = RtDMap::new("fast", 5000.0, Iom::new(mock), Arc::clone(&registry));
        let slot = map.core_mut().add_member(Direction::Input, &[0]);
        map.core_mut().set_device(slot, id).unwrap();
        assert!(matches!(
            map.core_mut().check_map_coherency(),
            Err(UeiError::ScanRateTooHigh { .. })
        ));
        assert_eq!(map.core().state(), MapState::Unconfigured);
    }

    #[test]
    fn test_coherency_rejects_unbound_member() {
        let (mock, registry, _) = setup();
        let mut map = RtDMap::new("m", 1.0, Iom::new(mock), registry);
        map.core_mut().add_member(Direction::Input, &[0]);
        assert!(matches!(
            map.core_mut().check_map_coherency(),
            Err(UeiError::UnboundMember { slot: 0, .. })
        ));
    }

    #[traced_test]
    #[test]
    fn test_drop_logs_teardown_failure() {
        let (mock, registry, id) = setup();
        {
            let mut map = RtDMap::new("m", 1.0, Iom::new(mock.clone()), registry);
            let slot = map.core_mut().add_member(Direction::Input, &[0]);
            map.core_mut().set_device(slot, id).unwrap();
            map.start_map().unwrap();
            mock.inject(MockOp::Stop, DriverStatus::Code(-5), 1);
        }
        assert!(logs_contain("Map teardown failed"));
        assert!(mock.open_sessions().is_empty());
    }
}
