//! Data source adapter.
//!
//! [`UeiDataSource`] turns one map's polling into the host's synchronous
//! cycle. Each [`UeiDataSource::synchronise`] call polls until a packet
//! arrives or a bound is hit, then writes into signal memory:
//!
//! | Signal | Type   | Elements  | Content                               |
//! |--------|--------|-----------|---------------------------------------|
//! | 0      | uint32 | 1         | status word (see [`StatusFlags`])     |
//! | 1      | uint64 | `samples` | corrected timestamps                  |
//! | 2..N   | any    | `samples` | input channels in map order           |
//!
//! Map errors never escape a cycle; they are counted into the status word.

use std::thread;
use std::time::{Duration, Instant};

use bitflags::bitflags;
use tracing::{debug, error, info, warn};
use ueidaq_core::{DataSourceConfig, Result, SignalConfig, SignalType, UeiError};

use crate::map::{PollStatus, UeiMap};

bitflags! {
    /// Flag bits of the status word. The low 16 bits hold the number of
    /// poll errors seen during the cycle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u32 {
        /// Signal values were not refreshed this cycle.
        const DATA_INVALID = 1 << 16;
        /// A FIFO overflow was seen this cycle.
        const FIFO_OVERFLOW = 1 << 17;
        /// The cycle ended on an acquisition error.
        const ACQUISITION_ERROR = 1 << 18;
    }
}

/// Mask of the error counter in the status word.
pub const ERROR_COUNT_MASK: u32 = 0xFFFF;

/// Pack an error count and flags into a status word.
pub fn status_word(errors: u32, flags: StatusFlags) -> u32 {
    errors.min(ERROR_COUNT_MASK) | flags.bits()
}

/// Counters kept across cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    /// `synchronise` calls.
    pub cycles: u64,
    /// Cycles that delivered a packet.
    pub packets: u64,
    /// Cycles that ended with data marked invalid.
    pub invalid: u64,
    /// Poll errors over all cycles.
    pub errors: u64,
    /// FIFO overflows over all cycles.
    pub overflows: u64,
    /// Variable-rate resets triggered.
    pub resets: u64,
}

/// Polling bounds of one data source.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Sleep between unsuccessful polls.
    pub poll_sleep_period: Duration,
    /// Poll errors tolerated per cycle.
    pub max_consecutive_errors: u32,
    /// FIFO overflows tolerated per cycle before a reset.
    pub fifo_overflow_threshold: u32,
    /// Longest wait for new data per cycle.
    pub no_data_timeout: Duration,
    /// Delay before the first map start.
    pub startup_delay: Duration,
}

impl SyncSettings {
    /// Settings from a data source configuration entry.
    pub fn from_config(config: &DataSourceConfig) -> Self {
        Self {
            poll_sleep_period: Duration::from_micros(config.poll_sleep_period_us),
            max_consecutive_errors: config.max_consecutive_errors.max(1),
            fifo_overflow_threshold: config.fifo_overflow_threshold.max(1),
            no_data_timeout: Duration::from_millis(config.no_data_timeout_ms),
            startup_delay: Duration::from_millis(config.startup_delay_ms),
        }
    }
}

/// Offsets of every signal inside one state buffer.
#[derive(Debug, Clone)]
struct BufferLayout {
    offsets: Vec<usize>,
    sizes: Vec<usize>,
    size: usize,
}

/// Host-facing adapter around one map.
#[derive(Debug)]
pub struct UeiDataSource {
    name: String,
    map: UeiMap,
    settings: SyncSettings,
    signals: Vec<SignalConfig>,
    samples: usize,
    state_buffers: usize,
    layout: Option<BufferLayout>,
    memory: Vec<u8>,
    active_buffer: usize,
    last_buffer: usize,
    first_sync: bool,
    stats: SyncStats,
}

impl UeiDataSource {
    /// Adapter for `map`, configuring the map's inputs from the signal list.
    pub fn new(config: &DataSourceConfig, map: UeiMap) -> Result<Self> {
        let mut source = Self {
            name: config.name.clone(),
            samples: map.samples_per_cycle(),
            map,
            settings: SyncSettings::from_config(config),
            signals: config.signals.clone(),
            state_buffers: config.number_of_state_buffers,
            layout: None,
            memory: Vec::new(),
            active_buffer: 0,
            last_buffer: 0,
            first_sync: true,
            stats: SyncStats::default(),
        };
        source.configure_signals()?;
        Ok(source)
    }

    /// Check the signal list and hand the channel types to the map.
    pub fn configure_signals(&mut self) -> Result<()> {
        if self.state_buffers == 0 {
            return Err(UeiError::config(format!(
                "Data source '{}': NumberOfStateBuffers must be at least 1",
                self.name
            )));
        }
        if self.signals.len() < 3 {
            return Err(UeiError::config(format!(
                "Data source '{}' needs status, timestamp and channel signals",
                self.name
            )));
        }
        if self.signals[0].signal_type != SignalType::Uint32
            || self.signals[1].signal_type != SignalType::Uint64
        {
            return Err(UeiError::config(format!(
                "Data source '{}': status must be uint32 and timestamp uint64",
                self.name
            )));
        }
        let types: Vec<SignalType> = self.signals[2..].iter().map(|s| s.signal_type).collect();
        self.map
            .configure_inputs_for_data_source(self.samples, types.len(), &types)?;
        debug!(source = %self.name, map = %self.map.name(), channels = types.len(), "Signals configured");
        Ok(())
    }

    /// Reserve zeroed signal memory for every state buffer.
    pub fn allocate_memory(&mut self) -> Result<()> {
        let mut offsets = Vec::with_capacity(self.signals.len());
        let mut sizes = Vec::with_capacity(self.signals.len());
        let mut size = 0;
        for (index, signal) in self.signals.iter().enumerate() {
            let elements = if index == 0 { 1 } else { self.samples };
            let bytes = signal.signal_type.byte_size() * elements;
            offsets.push(size);
            sizes.push(bytes);
            size += bytes;
        }
        self.memory = vec![0; size * self.state_buffers];
        self.layout = Some(BufferLayout {
            offsets,
            sizes,
            size,
        });
        debug!(
            source = %self.name,
            bytes = self.memory.len(),
            buffers = self.state_buffers,
            "Signal memory allocated"
        );
        Ok(())
    }

    /// Bytes of `signal` in state buffer `buffer`.
    pub fn signal_memory(&self, signal: usize, buffer: usize) -> Option<&[u8]> {
        let layout = self.layout.as_ref()?;
        if buffer >= self.state_buffers {
            return None;
        }
        let start = buffer * layout.size + layout.offsets.get(signal)?;
        self.memory.get(start..start + layout.sizes[signal])
    }

    fn signal_memory_mut(&mut self, signal: usize, buffer: usize) -> Option<&mut [u8]> {
        let layout = self.layout.as_ref()?;
        let start = buffer * layout.size + layout.offsets.get(signal)?;
        let end = start + layout.sizes[signal];
        self.memory.get_mut(start..end)
    }

    /// Status word in state buffer `buffer`.
    pub fn status(&self, buffer: usize) -> Option<u32> {
        let b = self.signal_memory(0, buffer)?;
        Some(u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Timestamp of sample `sample` in state buffer `buffer`.
    pub fn timestamp(&self, buffer: usize, sample: usize) -> Option<u64> {
        let b = self.signal_memory(1, buffer)?.get(sample * 8..sample * 8 + 8)?;
        Some(u64::from_ne_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Data source name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The map being consumed.
    pub fn map(&self) -> &UeiMap {
        &self.map
    }

    /// The map being consumed, mutably.
    pub fn map_mut(&mut self) -> &mut UeiMap {
        &mut self.map
    }

    /// Number of state buffers.
    pub fn state_buffers(&self) -> usize {
        self.state_buffers
    }

    /// Buffer written by the last `synchronise` call.
    pub fn last_buffer(&self) -> usize {
        self.last_buffer
    }

    /// Counters.
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Run one host cycle.
    ///
    /// The first call after construction or [`prepare_next_state`] waits the
    /// startup delay and starts the map; a start failure is returned after
    /// being recorded in the status word. Every call then polls until new
    /// data, the error ceiling, the overflow threshold or the no-data timeout.
    ///
    /// [`prepare_next_state`]: Self::prepare_next_state
    pub fn synchronise(&mut self) -> Result<()> {
        if self.layout.is_none() {
            return Err(UeiError::config(format!(
                "Data source '{}': signal memory not allocated",
                self.name
            )));
        }
        self.stats.cycles += 1;
        let buffer = self.active_buffer;

        if self.first_sync {
            thread::sleep(self.settings.startup_delay);
            if let Err(e) = self.map.start_map() {
                error!(source = %self.name, map = %self.map.name(), error = %e, "Failed to start map");
                self.write_status(
                    buffer,
                    1,
                    StatusFlags::ACQUISITION_ERROR | StatusFlags::DATA_INVALID,
                );
                self.stats.errors += 1;
                self.stats.invalid += 1;
                return Err(e);
            }
            self.first_sync = false;
            info!(source = %self.name, map = %self.map.name(), "Acquisition started");
        }

        let deadline = Instant::now() + self.settings.no_data_timeout;
        let mut errors = 0u32;
        let mut overflows = 0u32;
        let mut flags = StatusFlags::empty();
        let mut delivered = false;

        loop {
            match self.map.poll_for_new_packet() {
                Ok(PollStatus::NewData) => {
                    delivered = true;
                    break;
                }
                Ok(PollStatus::NoNewData) => {
                    if Instant::now() >= deadline {
                        debug!(source = %self.name, "No new data before timeout");
                        flags |= StatusFlags::DATA_INVALID;
                        break;
                    }
                }
                Ok(PollStatus::FifoOverflow) => {
                    overflows += 1;
                    self.stats.overflows += 1;
                    flags |= StatusFlags::FIFO_OVERFLOW;
                    if overflows >= self.settings.fifo_overflow_threshold {
                        warn!(source = %self.name, overflows, "FIFO overflow threshold reached");
                        self.reset_after_overflow();
                        flags |= StatusFlags::DATA_INVALID;
                        break;
                    }
                }
                Err(e) => {
                    errors += 1;
                    self.stats.errors += 1;
                    if !e.is_recoverable() || errors >= self.settings.max_consecutive_errors {
                        warn!(
                            source = %self.name,
                            errors,
                            kind = %e.kind(),
                            error = %e,
                            "Giving up on this cycle"
                        );
                        flags |= StatusFlags::ACQUISITION_ERROR | StatusFlags::DATA_INVALID;
                        break;
                    }
                    debug!(source = %self.name, errors, error = %e, "Poll error, retrying");
                }
            }
            thread::sleep(self.settings.poll_sleep_period);
        }

        if delivered {
            self.copy_packet(buffer);
            self.stats.packets += 1;
        } else {
            self.stats.invalid += 1;
        }
        self.write_status(buffer, errors, flags);
        self.last_buffer = buffer;
        self.active_buffer = (buffer + 1) % self.state_buffers;
        Ok(())
    }

    fn reset_after_overflow(&mut self) {
        let name = self.name.clone();
        if let Some(vmap) = self.map.as_vmap_mut() {
            match vmap.reset_vmap() {
                Ok(()) => self.stats.resets += 1,
                Err(e) => warn!(source = %name, error = %e, "Variable-rate reset failed"),
            }
        }
    }

    fn write_status(&mut self, buffer: usize, errors: u32, flags: StatusFlags) {
        let word = status_word(errors, flags);
        if let Some(dst) = self.signal_memory_mut(0, buffer) {
            dst.copy_from_slice(&word.to_ne_bytes());
        }
    }

    fn copy_packet(&mut self, buffer: usize) {
        let Some(layout) = self.layout.as_ref() else {
            return;
        };
        let base = buffer * layout.size;
        let packet = self.map.packet();

        let ts = base + layout.offsets[1];
        for (i, t) in packet.timestamps().iter().enumerate() {
            self.memory[ts + i * 8..ts + (i + 1) * 8].copy_from_slice(&t.to_ne_bytes());
        }
        for channel in 0..packet.channel_count() {
            let signal = channel + 2;
            let (Some(&offset), Some(&size), Some(bytes)) = (
                layout.offsets.get(signal),
                layout.sizes.get(signal),
                packet.channel(channel),
            ) else {
                continue;
            };
            let start = base + offset;
            self.memory[start..start + size].copy_from_slice(bytes);
        }
    }

    /// Stop the map and re-arm the startup sequence for the next state.
    pub fn prepare_next_state(&mut self) -> Result<()> {
        self.first_sync = true;
        self.map.stop_map().map_err(|e| {
            warn!(source = %self.name, error = %e, "Map stop failed");
            e
        })
    }
}
