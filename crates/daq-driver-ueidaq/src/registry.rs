//! Device registry.
//!
//! The registry owns every [`Device`] of an IOM. Maps keep [`DeviceId`]s and
//! resolve them on use, so a device that has been removed shows up as a
//! decode error instead of a dangling reference.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};
use ueidaq_core::{Result, UeiError};

use crate::device::{Device, DeviceId};

#[derive(Debug, Default)]
struct Inner {
    next_id: u32,
    devices: HashMap<DeviceId, Arc<Device>>,
    names: HashMap<String, DeviceId>,
}

/// Name- and slot-unique collection of devices.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    inner: RwLock<Inner>,
}

impl DeviceRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device and bind it to its slot.
    ///
    /// Fails if another device already uses the name or the slot.
    pub fn register(&self, device: Device) -> Result<DeviceId> {
        let mut inner = self.inner.write();
        if inner.names.contains_key(device.name()) {
            return Err(UeiError::DuplicateDevice {
                what: "name",
                value: device.name().to_string(),
            });
        }
        if inner.devices.values().any(|d| d.devn() == device.devn()) {
            return Err(UeiError::DuplicateDevice {
                what: "devn",
                value: device.devn().to_string(),
            });
        }
        device.set_hardware_correspondence()?;

        let id = DeviceId(inner.next_id);
        inner.next_id += 1;
        info!(
            device = %device.name(),
            devn = device.devn(),
            model = %device.model().kind(),
            %id,
            "Registered device"
        );
        inner.names.insert(device.name().to_string(), id);
        inner.devices.insert(id, Arc::new(device));
        Ok(id)
    }

    /// Device behind `id`, if still registered.
    pub fn get(&self, id: DeviceId) -> Option<Arc<Device>> {
        self.inner.read().devices.get(&id).cloned()
    }

    /// Device behind `id`, or [`UeiError::DeviceNotFound`].
    pub fn resolve(&self, id: DeviceId) -> Result<Arc<Device>> {
        self.get(id)
            .ok_or_else(|| UeiError::DeviceNotFound(id.to_string()))
    }

    /// Id of the device called `name`.
    pub fn lookup(&self, name: &str) -> Option<DeviceId> {
        self.inner.read().names.get(name).copied()
    }

    /// Id of the device called `name`, or [`UeiError::DeviceNotFound`].
    pub fn require(&self, name: &str) -> Result<DeviceId> {
        self.lookup(name)
            .ok_or_else(|| UeiError::DeviceNotFound(name.to_string()))
    }

    /// Remove a device. Maps still holding `id` fail on their next decode.
    pub fn remove(&self, id: DeviceId) -> Option<Arc<Device>> {
        let mut inner = self.inner.write();
        let device = inner.devices.remove(&id)?;
        inner.names.remove(device.name());
        debug!(device = %device.name(), %id, "Removed device");
        Some(device)
    }

    /// Number of registered devices.
    pub fn len(&self) -> usize {
        self.inner.read().devices.len()
    }

    /// Whether no device is registered.
    pub fn is_empty(&self) -> bool {
        self.inner.read().devices.is_empty()
    }

    /// Ids of every registered device, in registration order.
    pub fn ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<_> = self.inner.read().devices.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
