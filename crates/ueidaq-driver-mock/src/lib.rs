//! Simulated UEIDAQ I/O module.
//!
//! [`MockIom`] implements [`IomDriver`](ueidaq_core::IomDriver) without any
//! hardware. It is cheap to clone; every clone shares the same state, so a
//! test can move one clone into a map and keep another to script packets,
//! inject failures and inspect the calls the map made.
//!
//! # Modes
//!
//! - [`MockMode::Scripted`]: every refresh delivers the next queued scan(s)
//!   per layer; an empty queue leaves a fixed-rate map unchanged and gives a
//!   variable-rate map zero scans.
//! - [`MockMode::FreeRunning`]: every refresh synthesises fresh scans with an
//!   advancing hardware timestamp.
//!
//! # Example
//!
//! ```rust,ignore
//! let iom = MockIom::new("IOM_0");
//! let controller = iom.clone();
//! controller.queue_scan(0, &[100, 0x0080_0000, 0x0080_0000]);
//! controller.inject(MockOp::Refresh, DriverStatus::Timeout, 1);
//! ```

mod errors;
mod mock_iom;
mod pattern;

pub use errors::{FailurePlan, FailureScenario, MockOp};
pub use mock_iom::{MockCall, MockIom, MockMode, RegisteredChannels};
pub use pattern::synthetic_word;
