//! Error types for the UEIDAQ acquisition subsystem.
//!
//! Every fallible operation of devices, maps and data sources returns
//! [`UeiError`]. Nothing in the acquisition path panics; the data source folds
//! errors into its status signal instead of halting the real-time loop.
//!
//! ## Error classes
//!
//! [`UeiError::kind`] sorts errors into four classes that decide how callers
//! react:
//!
//! - **Configuration**: bad channel lists, unsupported sample counts, scan
//!   rates above a layer's limit. Detected once at setup, never retried.
//! - **Acquisition**: refresh failures and other transient driver statuses.
//!   Retried by the polling loop up to a configured ceiling.
//! - **Decode**: a sample cannot be converted (device gone, null input map).
//!   Fatal to the current packet only.
//! - **Session**: opening, starting or closing a driver session failed.

use std::fmt;

use thiserror::Error;

use crate::driver::{Direction, DriverStatus, MapType};
use crate::signal::SignalType;

/// Result type alias for UEIDAQ operations.
pub type Result<T> = std::result::Result<T, UeiError>;

/// Classification of a [`UeiError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Setup-time error, fatal to activation.
    Configuration,
    /// Transient driver error while polling.
    Acquisition,
    /// Packet could not be decoded.
    Decode,
    /// Driver session could not be opened, started or closed.
    Session,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Configuration => "configuration",
            Self::Acquisition => "acquisition",
            Self::Decode => "decode",
            Self::Session => "session",
        };
        write!(f, "{}", label)
    }
}

/// One reason a channel list was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelListFault {
    /// No channels given.
    Empty,
    /// The model does not serve this direction at all.
    DirectionNotSupported,
    /// `channel` does not follow its predecessor in ascending order.
    NotAscending {
        /// Offending channel.
        channel: u32,
    },
    /// `channel` appears more than once.
    Duplicate {
        /// Offending channel.
        channel: u32,
    },
    /// `channel` is outside the model's range for the direction.
    Rejected {
        /// Offending channel.
        channel: u32,
    },
}

impl fmt::Display for ChannelListFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty list"),
            Self::DirectionNotSupported => write!(f, "direction not supported"),
            Self::NotAscending { channel } => write!(f, "channel {} out of order", channel),
            Self::Duplicate { channel } => write!(f, "channel {} duplicated", channel),
            Self::Rejected { channel } => write!(f, "channel {} rejected", channel),
        }
    }
}

/// Which one-shot flag an [`UeiError::AlreadySet`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OneShotFlag {
    /// Device bound to a physical slot.
    HardwareCorrespondence,
    /// Device claimed by a map.
    MapAssignment,
}

impl fmt::Display for OneShotFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HardwareCorrespondence => write!(f, "hardware correspondence"),
            Self::MapAssignment => write!(f, "map assignment"),
        }
    }
}

fn join_faults(faults: &[ChannelListFault]) -> String {
    faults
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors raised by devices, maps and data sources.
#[derive(Error, Debug)]
pub enum UeiError {
    /// A channel list failed validation. All faults found are listed.
    #[error("Invalid {direction} channel list for device '{device}': {}", join_faults(.faults))]
    InvalidChannelList {
        /// Device name.
        device: String,
        /// Direction of the list.
        direction: Direction,
        /// Every fault found.
        faults: Vec<ChannelListFault>,
    },

    /// The device model cannot serve this direction.
    #[error("Device '{device}' does not support {direction} channels")]
    InvalidDirection {
        /// Device name.
        device: String,
        /// Requested direction.
        direction: Direction,
    },

    /// A one-shot flag was already set.
    #[error("Device '{device}': {flag} already set")]
    AlreadySet {
        /// Device name.
        device: String,
        /// Flag set twice.
        flag: OneShotFlag,
    },

    /// Slot number outside the chassis.
    #[error("Device '{device}': devn {devn} exceeds the {max} available slots")]
    InvalidDevn {
        /// Device name.
        device: String,
        /// Requested slot.
        devn: u32,
        /// Slots in the chassis.
        max: u32,
    },

    /// Device lookup failed.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Two devices claim the same name or slot.
    #[error("Duplicate device {what}: {value}")]
    DuplicateDevice {
        /// `"name"` or `"devn"`.
        what: &'static str,
        /// Clashing value.
        value: String,
    },

    /// Map member slot out of range.
    #[error("Map '{map}': member slot {slot} out of range ({slots} slots)")]
    SlotOutOfRange {
        /// Map name.
        map: String,
        /// Requested slot.
        slot: usize,
        /// Member slots the map has.
        slots: usize,
    },

    /// A member slot has no device bound.
    #[error("Map '{map}': member slot {slot} has no device")]
    UnboundMember {
        /// Map name.
        map: String,
        /// Unbound slot.
        slot: usize,
    },

    /// Operation requires a coherent map.
    #[error("Map '{map}' is not coherent")]
    NotCoherent {
        /// Map name.
        map: String,
    },

    /// Operation requires a started map.
    #[error("Map '{map}' is not started")]
    NotStarted {
        /// Map name.
        map: String,
    },

    /// Scan rate above what a member can sample.
    #[error("Map '{map}': scan rate {rate} Hz exceeds {limit} Hz of device '{device}'")]
    ScanRateTooHigh {
        /// Map name.
        map: String,
        /// Requested scan rate in Hz.
        rate: f64,
        /// Slowest offending member.
        device: String,
        /// Its sampling frequency in Hz.
        limit: f64,
    },

    /// Sample count not legal for the map type.
    #[error("Map '{map}' ({map_type}): {samples} samples per cycle not allowed, expected {expected}")]
    InvalidSampleCount {
        /// Map name.
        map: String,
        /// Map protocol.
        map_type: MapType,
        /// Samples requested.
        samples: usize,
        /// What the map accepts.
        expected: String,
    },

    /// Signal count does not match the configured input channels.
    #[error("Map '{map}': {actual} channel signals given, map has {expected} input channels")]
    ChannelCountMismatch {
        /// Map name.
        map: String,
        /// Input channels of the map.
        expected: usize,
        /// Channel signals given.
        actual: usize,
    },

    /// Polling requested before the consumer configured its signals.
    #[error("Map '{map}': signals not configured")]
    SignalsNotConfigured {
        /// Map name.
        map: String,
    },

    /// Signal type not usable for the requested conversion.
    #[error("Unsupported signal type {0}")]
    UnsupportedType(SignalType),

    /// Buffer too small for the requested conversion.
    #[error("Buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        actual: usize,
    },

    /// A driver call failed.
    #[error("Driver call '{operation}' failed: {status}")]
    Driver {
        /// Driver call name.
        operation: &'static str,
        /// Status it returned.
        status: DriverStatus,
    },

    /// The driver returned a null input map.
    #[error("Null input map for devn {devn}")]
    NullInputMap {
        /// Layer slot.
        devn: u32,
    },

    /// A raw sample could not be converted.
    #[error("Decode error on device '{device}' channel index {channel_index}: {message}")]
    Decode {
        /// Device or map name.
        device: String,
        /// Channel index within the device.
        channel_index: usize,
        /// What went wrong.
        message: String,
    },

    /// Semantic configuration error.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// What is wrong.
        message: String,
    },

    /// Configuration could not be parsed.
    #[error("Configuration parse error: {0}")]
    Parse(#[from] Box<figment::Error>),

    /// Configuration text is not valid TOML.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl UeiError {
    /// Shorthand for a driver failure.
    pub fn driver(operation: &'static str, status: DriverStatus) -> Self {
        Self::Driver { operation, status }
    }

    /// Shorthand for a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidChannelList { .. }
            | Self::InvalidDirection { .. }
            | Self::AlreadySet { .. }
            | Self::InvalidDevn { .. }
            | Self::DuplicateDevice { .. }
            | Self::SlotOutOfRange { .. }
            | Self::UnboundMember { .. }
            | Self::NotCoherent { .. }
            | Self::ScanRateTooHigh { .. }
            | Self::InvalidSampleCount { .. }
            | Self::ChannelCountMismatch { .. }
            | Self::SignalsNotConfigured { .. }
            | Self::UnsupportedType(_)
            | Self::InvalidConfig { .. }
            | Self::Parse(_)
            | Self::Toml(_) => ErrorKind::Configuration,
            Self::Driver { status, .. } if status.is_transient() => ErrorKind::Acquisition,
            Self::Driver { .. } | Self::NotStarted { .. } => ErrorKind::Session,
            Self::DeviceNotFound(_)
            | Self::NullInputMap { .. }
            | Self::Decode { .. }
            | Self::BufferTooSmall { .. } => ErrorKind::Decode,
        }
    }

    /// Whether the error may clear on a later poll.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Acquisition | ErrorKind::Decode)
    }
}

impl From<figment::Error> for UeiError {
    fn from(err: figment::Error) -> Self {
        Self::Parse(Box::new(err))
    }
}
