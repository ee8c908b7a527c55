//! Registry of peripheral drivers.
//!
//! Unlike input and lights drivers, peripherals are not picked by name: the
//! host loads every discovered peripheral once, after its message bus is up,
//! and keeps them until shutdown.

use std::sync::Arc;

use crate::bus::MessageBus;
use crate::driver::{PeripheralKind, PeripheralModule};
use crate::error::{DriverError, DriverResult};
use crate::factory::ModuleFactory;
use crate::modules::ModuleCategory;

/// Owns every activated peripheral driver.
#[derive(Debug, Default)]
pub struct PeripheralManager {
    peripherals: Vec<PeripheralModule>,
    loaded: bool,
}

impl PeripheralManager {
    /// Create an empty, not yet loaded registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate every discovered peripheral, in table order.
    ///
    /// Peripherals that fail to load are logged and left out. Returns the
    /// number of peripherals now registered.
    ///
    /// # Errors
    ///
    /// [`DriverError::BusNotReady`] if `bus` is not ready yet, and
    /// [`DriverError::PeripheralsAlreadyLoaded`] on a second call. Neither
    /// changes the registry.
    pub fn load_peripherals(
        &mut self,
        factory: &ModuleFactory<'_>,
        bus: &Arc<dyn MessageBus>,
    ) -> DriverResult<usize> {
        if self.loaded {
            tracing::warn!("load_peripherals called twice; ignored");
            return Err(DriverError::PeripheralsAlreadyLoaded);
        }
        if !bus.is_ready() {
            tracing::error!("Message bus is not ready; peripherals cannot be loaded");
            return Err(DriverError::BusNotReady);
        }
        self.loaded = true;

        for desc in factory.tables().table(ModuleCategory::Peripheral).iter() {
            match factory.instantiate(desc, PeripheralKind::new(Arc::clone(bus))) {
                Ok(peripheral) => self.peripherals.push(peripheral),
                Err(e) => tracing::warn!(
                    module = %desc.name,
                    error = %e,
                    "Failed to load peripheral"
                ),
            }
        }

        tracing::info!(count = self.peripherals.len(), "Peripherals loaded");
        Ok(self.peripherals.len())
    }

    /// Advance every non-threaded peripheral, in registration order.
    pub fn update(&self, delta_seconds: f32) {
        for peripheral in self.peripherals.iter().filter(|p| !p.is_threaded()) {
            if let Err(e) = peripheral.module_update(delta_seconds) {
                tracing::warn!(driver = %peripheral.name(), error = %e, "Peripheral update failed");
            }
        }
    }

    /// Number of registered peripherals
    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    /// True when no peripheral is registered
    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }

    /// Names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.peripherals.iter().map(|p| p.name()).collect()
    }

    /// True once `load_peripherals` has run
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Tear every peripheral down, last registered first.
    pub fn shutdown(&mut self) {
        while let Some(mut peripheral) = self.peripherals.pop() {
            peripheral.module_exit();
        }
    }
}

impl Drop for PeripheralManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
