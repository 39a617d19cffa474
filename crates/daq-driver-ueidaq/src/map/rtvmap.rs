//! Variable-rate map.

use std::sync::Arc;

use tracing::{debug, info, trace, warn};
use ueidaq_core::{MapType, Result, UeiError};

use super::{FrameRing, MapCore, PollStatus};
use crate::iom::Iom;
use crate::registry::DeviceRegistry;

/// Variable-rate map: each refresh hands over however many scans the layer
/// FIFOs collected.
///
/// Scans are queued in a ring of `NumberOfBuffers x Samples` frames. A poll
/// commits a packet once `Samples` frames are queued, giving every sample its
/// own corrected timestamp. Scans the ring has no room for yet wait in a
/// per-layer backlog, including those read by the start-up refresh.
#[derive(Debug)]
pub struct RtVMap {
    core: MapCore,
    ring: FrameRing,
}

impl RtVMap {
    /// Map delivering `samples` scans per packet.
    ///
    /// Without `scan_rate` the slowest member's sampling frequency is used.
    pub fn new(
        name: &str,
        samples: usize,
        number_of_buffers: usize,
        scan_rate: Option<f64>,
        iom: Iom,
        registry: Arc<DeviceRegistry>,
    ) -> Self {
        Self {
            core: MapCore::new(
                name,
                MapType::RtVMap,
                scan_rate,
                samples,
                number_of_buffers,
                iom,
                registry,
            ),
            ring: FrameRing::new(0, 0),
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

    /// Frames waiting in the ring.
    pub fn queued_frames(&self) -> usize {
        self.ring.len()
    }

    /// Open, configure and start the driver session, and size the ring.
    pub fn start_map(&mut self) -> Result<()> {
        let was_started = self.core.is_started();
        self.core.start_session()?;
        if !was_started {
            let capacity = self.core.samples * self.core.number_of_buffers;
            self.ring = FrameRing::new(capacity, self.core.frame_size);
            debug!(map = %self.core.name, frames = capacity, "Frame ring allocated");
        }
        Ok(())
    }

    /// Restart acquisition after a FIFO overflow, keeping the configuration.
    ///
    /// Stop and start are both attempted and the first failure is returned.
    /// Queued frames and backlog are dropped either way; the timestamp
    /// history is kept.
    pub fn reset_vmap(&mut self) -> Result<()> {
        if !self.core.is_started() {
            return Err(UeiError::NotStarted {
                map: self.core.name.clone(),
            });
        }
        let session = self.core.session;
        let stopped = self.core.iom.stop(session);
        let started = self.core.iom.start(session);
        self.ring.clear();
        self.core.clear_backlog();
        self.core.stats.resets += 1;
        match stopped.and(started) {
            Ok(()) => {
                info!(map = %self.core.name, session, "Variable-rate map reset");
                Ok(())
            }
            Err(e) => {
                warn!(
                    map = %self.core.name,
                    session,
                    error = %e,
                    "Variable-rate map reset failed"
                );
                Err(e)
            }
        }
    }

    /// Drain the layer FIFOs into the ring and commit a packet if enough
    /// frames are queued.
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
        if !self.core.refresh()? {
            return Ok(PollStatus::FifoOverflow);
        }
        self.core.read_input_maps()?;
        let framed = self.fill_ring();

        // Scans that do not fit stay in the backlog. Only a backlog deeper
        // than the whole ring means the host has fallen behind.
        let core = &mut self.core;
        let backlog = core.backlog_depth();
        trace!(map = %core.name, framed, queued = self.ring.len(), backlog, "Scans queued");
        if backlog > self.ring.capacity() {
            core.stats.overflows += 1;
            warn!(map = %core.name, queued = self.ring.len(), backlog, "Frame ring overflow");
            return Ok(PollStatus::FifoOverflow);
        }

        let samples = core.samples;
        if self.ring.len() < samples {
            core.stats.no_data += 1;
            return Ok(PollStatus::NoNewData);
        }

        let ring = &self.ring;
        core.commit_frames((0..samples).filter_map(|i| ring.peek(i)))?;
        self.ring.consume(samples);
        Ok(PollStatus::NewData)
    }

    /// Move backlog scans into the ring while it has room.
    fn fill_ring(&mut self) -> usize {
        let mut framed = 0;
        while self.ring.free() > 0 && self.core.take_queued_scan() {
            if !self.ring.push(&self.core.frame) {
                break;
            }
            framed += 1;
        }
        framed
    }
}
