//! Building a complete acquisition setup from configuration.
//!
//! # Example Configuration
//!
//! ```toml
//! [Iom]
//! Name = "IOM_0"
//!
//! [[Iom.Devices]]
//! Name = "ai0"
//! Model = "AI-217-803"
//! Devn = 0
//! SamplingFrequency = 1000.0
//!
//! [[Iom.Maps]]
//! Name = "fast"
//! Type = "RtVMap"
//! Samples = 10
//! NumberOfBuffers = 4
//! Inputs = [{ Device = "ai0", Channels = [0, 1] }]
//!
//! [[DataSources]]
//! Name = "uei_fast"
//! Map = "fast"
//! Signals = [
//!     { Name = "Status", Type = "uint32" },
//!     { Name = "Timestamp", Type = "uint64" },
//!     { Name = "Ai0", Type = "float32" },
//!     { Name = "Ai1", Type = "float32" },
//! ]
//! ```

use std::sync::Arc;

use tracing::info;
use ueidaq_core::{IomDriver, Result, UeiConfig, UeiError};

use crate::data_source::UeiDataSource;
use crate::device::Device;
use crate::iom::Iom;
use crate::map::UeiMap;
use crate::registry::DeviceRegistry;

/// Everything built from one configuration: the registry that owns the
/// devices, the IOM handle, and the maps.
///
/// Maps consumed by a data source are owned by it; the rest stay in
/// [`UeiSystem::maps`].
#[derive(Debug)]
pub struct UeiSystem {
    registry: Arc<DeviceRegistry>,
    iom: Iom,
    maps: Vec<UeiMap>,
    data_sources: Vec<UeiDataSource>,
}

impl UeiSystem {
    /// Build devices, maps and data sources on top of `driver`.
    pub fn from_config(config: &UeiConfig, driver: Box<dyn IomDriver>) -> Result<Self> {
        config.validate()?;
        let iom = Iom::from_boxed(driver);
        let registry = Arc::new(DeviceRegistry::new());

        for device in &config.iom.devices {
            registry.register(Device::from_config(device)?)?;
        }

        let mut maps = Vec::with_capacity(config.iom.maps.len());
        for map in &config.iom.maps {
            maps.push(UeiMap::from_config(map, iom.clone(), Arc::clone(&registry))?);
        }

        let mut data_sources = Vec::with_capacity(config.data_sources.len());
        for source in &config.data_sources {
            let index = maps
                .iter()
                .position(|m| m.name() == source.map)
                .ok_or_else(|| {
                    UeiError::config(format!(
                        "Data source '{}' references unknown map '{}'",
                        source.name, source.map
                    ))
                })?;
            let map = maps.remove(index);
            let mut data_source = UeiDataSource::new(source, map)?;
            data_source.allocate_memory()?;
            data_sources.push(data_source);
        }

        info!(
            iom = %config.iom.name,
            devices = registry.len(),
            maps = config.iom.maps.len(),
            data_sources = data_sources.len(),
            "UEIDAQ system built"
        );
        Ok(Self {
            registry,
            iom,
            maps,
            data_sources,
        })
    }

    /// Device registry.
    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// IOM handle.
    pub fn iom(&self) -> &Iom {
        &self.iom
    }

    /// Maps not consumed by a data source.
    pub fn maps(&self) -> &[UeiMap] {
        &self.maps
    }

    /// Maps not consumed by a data source, mutably.
    pub fn maps_mut(&mut self) -> &mut [UeiMap] {
        &mut self.maps
    }

    /// Data sources.
    pub fn data_sources(&self) -> &[UeiDataSource] {
        &self.data_sources
    }

    /// Data source called `name`.
    pub fn data_source_mut(&mut self, name: &str) -> Option<&mut UeiDataSource> {
        self.data_sources.iter_mut().find(|d| d.name() == name)
    }

    /// Take ownership of the data sources, e.g. to move them to the threads
    /// that drive them.
    pub fn into_parts(self) -> (Arc<DeviceRegistry>, Vec<UeiMap>, Vec<UeiDataSource>) {
        (self.registry, self.maps, self.data_sources)
    }
}
