//! Boundary to the IOM driver library.
//!
//! The vendor library is a black box that is called synchronously and answers
//! with status codes. [`IomDriver`] captures exactly the calls the acquisition
//! maps need; a real binding and the simulated IOM in `ueidaq-driver-mock`
//! both implement it.
//!
//! Channel words passed to [`IomDriver::add_channels`] are packed the same way
//! for every layer:
//!
//! ```text
//!  31      30        29..16     15..8       7..0
//! [TS] [FIFO mode] [reserved] [gain code] [channel]
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque handle of an open driver session.
pub type SessionHandle = i32;

/// Sentinel for "no session open".
pub const INVALID_SESSION: SessionHandle = -1;

/// Flag marking the pseudo-channel that delivers the hardware timestamp.
pub const TIMESTAMP_CHANNEL: u32 = 0x8000_0000;

/// Flag requesting FIFO (variable-rate) delivery for a channel.
pub const FIFO_MODE: u32 = 0x4000_0000;

/// Size in bytes of one raw word in a driver input map.
pub const RAW_WORD_SIZE: usize = 4;

/// Pack a channel number and gain code into a driver channel word.
#[inline]
pub fn pack_channel(channel: u32, gain_code: u32, flags: u32) -> u32 {
    flags | ((gain_code & 0xff) << 8) | (channel & 0xff)
}

/// Extract the channel number from a packed channel word.
#[inline]
pub fn channel_of(word: u32) -> u32 {
    word & 0xff
}

/// Extract the gain code from a packed channel word.
#[inline]
pub fn gain_code_of(word: u32) -> u32 {
    (word >> 8) & 0xff
}

/// Check whether a packed channel word is the timestamp pseudo-channel.
#[inline]
pub fn is_timestamp_word(word: u32) -> bool {
    word & TIMESTAMP_CHANNEL != 0
}

/// Direction of a channel list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Hardware to host.
    Input,
    /// Host to hardware.
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Input => write!(f, "input"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// Acquisition protocol of a map, and therefore of its driver session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MapType {
    /// Fixed-rate, one scan per refresh.
    RtDMap,
    /// Variable-rate, a burst of buffered scans per refresh.
    RtVMap,
}

impl fmt::Display for MapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RtDMap => write!(f, "RtDMap"),
            Self::RtVMap => write!(f, "RtVMap"),
        }
    }
}

/// Non-success status returned by the driver.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverStatus {
    /// The call did not complete in time.
    #[error("operation timed out")]
    Timeout,
    /// Hardware FIFO overflowed since the last refresh.
    #[error("FIFO overflow")]
    FifoOverflow,
    /// The resource is held by someone else.
    #[error("device busy")]
    Busy,
    /// An argument was rejected.
    #[error("bad parameter")]
    BadParameter,
    /// The session handle is not open.
    #[error("session {0} is not open")]
    NoSession(SessionHandle),
    /// No layer answers at this slot.
    #[error("no device at slot {0}")]
    NoDevice(u32),
    /// Refreshing the shared buffer failed.
    #[error("refresh failed")]
    RefreshFailed,
    /// Any other vendor status code.
    #[error("driver status code {0}")]
    Code(i32),
}

impl DriverStatus {
    /// Whether retrying the same call later can succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::FifoOverflow | Self::Busy | Self::RefreshFailed
        )
    }
}

/// Result of a driver call.
pub type DriverResult<T> = std::result::Result<T, DriverStatus>;

/// Synchronous call interface of an IOM driver.
///
/// Calls never block for longer than the driver's own internal timeout and
/// report failure through [`DriverStatus`]. Implementations are not required
/// to be thread-safe; callers serialise access (see `Iom` in
/// `daq-driver-ueidaq`).
pub trait IomDriver: Send {
    /// Human-readable identification of the IOM (address or name).
    fn name(&self) -> &str;

    /// Open a session of the given protocol.
    fn open_session(&mut self, map_type: MapType) -> DriverResult<SessionHandle>;

    /// Close a session. The handle is invalid afterwards even on failure.
    fn close_session(&mut self, session: SessionHandle) -> DriverResult<()>;

    /// Request a scan rate and return the rate the hardware will actually use.
    fn set_scan_rate(&mut self, session: SessionHandle, rate_hz: f64) -> DriverResult<f64>;

    /// Register the packed channel words of one layer for one direction.
    fn add_channels(
        &mut self,
        session: SessionHandle,
        devn: u32,
        direction: Direction,
        words: &[u32],
    ) -> DriverResult<()>;

    /// Ask for `scans` scans per refresh on a variable-rate session and return
    /// the number the driver granted.
    fn request_input_size(
        &mut self,
        session: SessionHandle,
        devn: u32,
        scans: usize,
    ) -> DriverResult<usize>;

    /// Start acquisition on the session.
    fn start(&mut self, session: SessionHandle) -> DriverResult<()>;

    /// Stop acquisition on the session.
    fn stop(&mut self, session: SessionHandle) -> DriverResult<()>;

    /// Refresh the shared buffer view of every layer in the session.
    fn refresh(&mut self, session: SessionHandle) -> DriverResult<()>;

    /// Copy the current input map of one layer into `dst`.
    ///
    /// Returns `None` when the driver hands out a null map pointer.
    fn read_input_map(&self, session: SessionHandle, devn: u32, dst: &mut Vec<u8>)
        -> Option<()>;
}
