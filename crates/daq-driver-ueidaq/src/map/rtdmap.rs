//! Fixed-rate map.

use std::sync::Arc;

use tracing::{debug, trace};
use ueidaq_core::{MapType, Result};

use super::{MapCore, PollStatus};
use crate::iom::Iom;
use crate::registry::DeviceRegistry;

/// Fixed-rate map: each refresh exposes the latest single scan.
///
/// The hardware keeps overwriting the input map at the scan rate. A poll is
/// "new" when the timestamp word differs from the last committed one.
#[derive(Debug)]
pub struct RtDMap {
    core: MapCore,
}

impl RtDMap {
    /// Map scanning at `scan_rate` Hz.
    pub fn new(name: &str, scan_rate: f64, iom: Iom, registry: Arc<DeviceRegistry>) -> Self {
        Self {
            core: MapCore::new(name, MapType::RtDMap, Some(scan_rate), 1, 1, iom, registry),
        }
    }

    /// Shared state.
    pub fn core(&self) -> &MapCore {
        &self.core
    }

    /// Shared state, mutably.
    pub fn core_mut(&mut self) -> &mut MapCore {
        &mut self.core
    }

    /// Open, configure and start the driver session.
    pub fn start_map(&mut self) -> Result<()> {
        self.core.start_session()
    }

    /// Refresh, and decode the scan if its timestamp is new.
    pub fn poll_for_new_packet(&mut self) -> Result<PollStatus> {
        self.core.ensure_polling()?;
        let result = self.poll();
        if let Err(e) = &result {
            self.core.stats.errors += 1;
            debug!(map = %self.core.name, error = %e, "Poll failed");
        }
        result
    }

    fn poll(&mut self) -> Result<PollStatus> {
        let core = &mut self.core;
        if !core.refresh()? {
            return Ok(PollStatus::FifoOverflow);
        }
        core.read_input_maps()?;

        let raw = core.raw_timestamp()?;
        if core.corrector.is_repeat(raw) {
            core.stats.no_data += 1;
            trace!(map = %core.name, raw, "No new data");
            return Ok(PollStatus::NoNewData);
        }

        core.assemble_scan(0)?;
        let frame = std::mem::take(&mut core.frame);
        let committed = core.commit_frames(std::iter::once(frame.as_slice()));
        core.frame = frame;
        committed?;
        trace!(map = %core.name, raw, "New packet");
        Ok(PollStatus::NewData)
    }
}
