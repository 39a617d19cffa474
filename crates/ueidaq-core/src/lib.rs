//! Core types and traits for the UEIDAQ acquisition subsystem.
//!
//! This crate holds everything the acquisition maps, the data source adapter
//! and the driver implementations agree on:
//!
//! - [`driver`] - the [`IomDriver`](driver::IomDriver) call interface, status
//!   codes and channel word packing
//! - [`error`] - [`UeiError`] and its [`ErrorKind`] classification
//! - [`signal`] - signal element types and typed access to signal memory
//! - [`config`] - the configuration surface, loaded with `figment`
//! - [`logging`] - `tracing-subscriber` setup for binaries and demos

pub mod config;
pub mod driver;
pub mod error;
pub mod logging;
pub mod signal;

pub use config::{
    DataSourceConfig, DeviceConfig, DeviceModelKind, IomConfig, MapConfig, MemberConfig,
    SignalConfig, UeiConfig,
};
pub use driver::{Direction, DriverResult, DriverStatus, IomDriver, MapType, SessionHandle};
pub use error::{ChannelListFault, ErrorKind, OneShotFlag, Result, UeiError};
pub use signal::SignalType;
