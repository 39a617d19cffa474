//! Shared handle to an IOM driver.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};
use ueidaq_core::{Direction, IomDriver, MapType, Result, SessionHandle, UeiError};

struct IomInner {
    name: String,
    driver: Mutex<Box<dyn IomDriver>>,
}

/// Cloneable handle to one IOM.
///
/// Several maps run sessions on the same IOM. The driver library is not
/// thread-safe, so every call goes through one lock, and each call's status
/// is turned into a [`UeiError::Driver`] naming the operation.
#[derive(Clone)]
pub struct Iom {
    inner: Arc<IomInner>,
}

impl fmt::Debug for Iom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Iom").field("name", &self.inner.name).finish()
    }
}

impl Iom {
    /// Wrap a driver.
    pub fn new<D: IomDriver + 'static>(driver: D) -> Self {
        Self::from_boxed(Box::new(driver))
    }

    /// Wrap an already boxed driver.
    pub fn from_boxed(driver: Box<dyn IomDriver>) -> Self {
        let name = driver.name().to_string();
        debug!(iom = %name, "IOM handle created");
        Self {
            inner: Arc::new(IomInner {
                name,
                driver: Mutex::new(driver),
            }),
        }
    }

    /// Identification reported by the driver.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Run `f` with exclusive access to the driver.
    pub fn with_driver<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut dyn IomDriver) -> R,
    {
        let mut guard = self.inner.driver.lock();
        f(guard.as_mut())
    }

    /// Open a session.
    pub fn open_session(&self, map_type: MapType) -> Result<SessionHandle> {
        let session = self
            .with_driver(|d| d.open_session(map_type))
            .map_err(|s| UeiError::driver("open_session", s))?;
        debug!(iom = %self.name(), session, %map_type, "Session opened");
        Ok(session)
    }

    /// Close a session.
    pub fn close_session(&self, session: SessionHandle) -> Result<()> {
        self.with_driver(|d| d.close_session(session))
            .map_err(|s| UeiError::driver("close_session", s))?;
        debug!(iom = %self.name(), session, "Session closed");
        Ok(())
    }

    /// Request a scan rate; returns the rate the hardware will use.
    pub fn set_scan_rate(&self, session: SessionHandle, rate_hz: f64) -> Result<f64> {
        self.with_driver(|d| d.set_scan_rate(session, rate_hz))
            .map_err(|s| UeiError::driver("set_scan_rate", s))
    }

    /// Register the channel words of one layer.
    pub fn add_channels(
        &self,
        session: SessionHandle,
        devn: u32,
        direction: Direction,
        words: &[u32],
    ) -> Result<()> {
        trace!(session, devn, %direction, words = ?words, "add_channels");
        self.with_driver(|d| d.add_channels(session, devn, direction, words))
            .map_err(|s| UeiError::driver("add_channels", s))
    }

    /// Negotiate the number of scans per refresh on a variable-rate session.
    pub fn request_input_size(
        &self,
        session: SessionHandle,
        devn: u32,
        scans: usize,
    ) -> Result<usize> {
        self.with_driver(|d| d.request_input_size(session, devn, scans))
            .map_err(|s| UeiError::driver("request_input_size", s))
    }

    /// Start a session.
    pub fn start(&self, session: SessionHandle) -> Result<()> {
        self.with_driver(|d| d.start(session))
            .map_err(|s| UeiError::driver("start", s))
    }

    /// Stop a session.
    pub fn stop(&self, session: SessionHandle) -> Result<()> {
        self.with_driver(|d| d.stop(session))
            .map_err(|s| UeiError::driver("stop", s))
    }

    /// Refresh the input maps of a session.
    pub fn refresh(&self, session: SessionHandle) -> Result<()> {
        self.with_driver(|d| d.refresh(session))
            .map_err(|s| UeiError::driver("refresh", s))
    }

    /// Copy the input map of layer `devn` into `dst`.
    pub fn read_input_map(&self, session: SessionHandle, devn: u32, dst: &mut Vec<u8>) -> Result<()> {
        self.with_driver(|d| d.read_input_map(session, devn, dst))
            .ok_or(UeiError::NullInputMap { devn })
    }
}
