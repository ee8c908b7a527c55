//! The runtime value a host owns for its whole session.
//!
//! [`DriverRuntime`] bundles the discovered module tables, the host services
//! drivers talk to (input sink and message bus) and the peripheral registry.
//! A typical host does:
//!
//! ```no_run
//! use std::sync::Arc;
//! use scripted_drivers::bus::LocalMessageBus;
//! use scripted_drivers::config::ScriptingConfig;
//! use scripted_drivers::input::NullInputSink;
//! use scripted_drivers::runtime::DriverRuntime;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = Arc::new(LocalMessageBus::new());
//! let mut runtime = DriverRuntime::new(ScriptingConfig::default(), Arc::new(NullInputSink), bus.clone());
//! runtime.load_modules_dir("modules");
//!
//! let mut inputs = Vec::new();
//! runtime.add_input_modules("Joystick1", &mut inputs);
//!
//! bus.mark_ready();
//! runtime.load_peripherals()?;
//!
//! for _ in 0..60 {
//!     runtime.update(1.0 / 60.0);
//!     for input in inputs.iter_mut().filter(|i| !i.is_threaded()) {
//!         input.update(1.0 / 60.0)?;
//!     }
//! }
//! runtime.shutdown();
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use crate::bus::MessageBus;
use crate::config::ScriptingConfig;
use crate::error::DriverResult;
use crate::factory::ModuleFactory;
use crate::input::{InputHandler, InputSink};
use crate::lights::LightsDriver;
use crate::modules::{scan_dirs, DiscoveryReport, ModuleTables};
use crate::peripherals::PeripheralManager;

/// Discovered modules, host services and the peripheral registry.
pub struct DriverRuntime {
    config: ScriptingConfig,
    tables: ModuleTables,
    input_sink: Arc<dyn InputSink>,
    bus: Arc<dyn MessageBus>,
    peripherals: PeripheralManager,
}

impl DriverRuntime {
    /// Runtime with empty tables.
    pub fn new(
        config: ScriptingConfig,
        input_sink: Arc<dyn InputSink>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            config,
            tables: ModuleTables::new(),
            input_sink,
            bus,
            peripherals: PeripheralManager::new(),
        }
    }

    /// Discovery pass over one directory.
    pub fn load_modules_dir(&mut self, dir: impl AsRef<Path>) -> DiscoveryReport {
        self.load_modules_dirs([dir])
    }

    /// Discovery pass over several directories; replaces every table.
    pub fn load_modules_dirs<I, P>(&mut self, dirs: I) -> DiscoveryReport
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let (tables, report) = scan_dirs(dirs, &self.config);
        self.tables = tables;
        tracing::info!(
            modules = self.tables.len(),
            skipped = report.errors.len(),
            "Module discovery complete"
        );
        report
    }

    /// Discovered module tables
    pub fn tables(&self) -> &ModuleTables {
        &self.tables
    }

    /// Script settings used for every engine
    pub fn config(&self) -> &ScriptingConfig {
        &self.config
    }

    /// Factory over the current tables
    pub fn factory(&self) -> ModuleFactory<'_> {
        ModuleFactory::new(&self.tables, &self.config)
    }

    /// See [`ModuleFactory::add_input_modules`].
    pub fn add_input_modules(
        &self,
        requested: &str,
        out: &mut Vec<Box<dyn InputHandler>>,
    ) -> usize {
        self.factory()
            .add_input_modules(requested, &self.input_sink, out)
    }

    /// See [`ModuleFactory::add_lights_modules`].
    pub fn add_lights_modules(
        &self,
        requested: &str,
        out: &mut Vec<Box<dyn LightsDriver>>,
    ) -> usize {
        self.factory().add_lights_modules(requested, out)
    }

    /// See [`PeripheralManager::load_peripherals`].
    pub fn load_peripherals(&mut self) -> DriverResult<usize> {
        let factory = ModuleFactory::new(&self.tables, &self.config);
        self.peripherals.load_peripherals(&factory, &self.bus)
    }

    /// One host tick for the peripherals.
    pub fn update(&self, delta_seconds: f32) {
        self.peripherals.update(delta_seconds);
    }

    /// Peripheral registry
    pub fn peripherals(&self) -> &PeripheralManager {
        &self.peripherals
    }

    /// Tear down every peripheral and forget the discovered tables.
    ///
    /// Input and lights drivers belong to the caller and are torn down when
    /// the caller drops them.
    pub fn shutdown(&mut self) {
        self.peripherals.shutdown();
        self.tables.clear();
        tracing::info!("Driver runtime shut down");
    }
}

impl std::fmt::Debug for DriverRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRuntime")
            .field("tables", &self.tables)
            .field("peripherals", &self.peripherals)
            .finish_non_exhaustive()
    }
}
