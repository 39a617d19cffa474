//! UEIDAQ acquisition maps and data source adapter.
//!
//! This crate polls a UEI I/O module (IOM) through the
//! [`IomDriver`](ueidaq_core::IomDriver) interface, converts raw codes into
//! engineering values, extends the 32-bit hardware timestamp, and exposes the
//! result as framework signals.
//!
//! # Architecture
//!
//! ## Devices
//! - [`Device`] - one hardware layer: channel validation, channel words,
//!   decoding and scaling
//! - [`DeviceRegistry`] - owns the devices; maps refer to them by [`DeviceId`]
//!
//! ## Maps
//! - [`RtDMap`] - fixed-rate, one scan per refresh
//! - [`RtVMap`] - variable-rate, FIFO bursts queued in a [`FrameRing`]
//! - [`UeiMap`] - either of the two
//! - [`TimestampCorrector`] - 32-bit to monotonic 64-bit timestamps
//!
//! ## Host Surface
//! - [`UeiDataSource`] - the synchronous `synchronise` cycle and signal memory
//! - [`UeiSystem`] - everything built from a [`UeiConfig`](ueidaq_core::UeiConfig)
//!
//! # Example
//!
//! ```no_run
//! use daq_driver_ueidaq::UeiSystem;
//! use ueidaq_core::UeiConfig;
//! use ueidaq_driver_mock::MockIom;
//!
//! # fn example() -> anyhow::Result<()> {
//! let config = UeiConfig::load_from("config/ueidaq.example.toml")?;
//! let mut system = UeiSystem::from_config(&config, Box::new(MockIom::free_running("IOM_0", 1)))?;
//!
//! let source = system.data_source_mut("uei_in").expect("configured");
//! source.synchronise()?;
//! println!("status = {:#x}", source.status(source.last_buffer()).unwrap_or(0));
//! source.prepare_next_state()?;
//! # Ok(())
//! # }
//! ```

pub mod data_source;
pub mod device;
pub mod factory;
pub mod iom;
pub mod map;
pub mod registry;

pub use data_source::{status_word, StatusFlags, SyncSettings, SyncStats, UeiDataSource};
pub use device::{ChannelList, Device, DeviceId, DeviceModel, MAX_IO_SLOTS};
pub use factory::UeiSystem;
pub use iom::Iom;
pub use map::{
    DecodedPacket, FrameRing, MapCore, MapMember, MapState, MapStats, PollStatus, RtDMap,
    RtVMap, TimestampCorrector, UeiMap,
};
pub use registry::DeviceRegistry;
