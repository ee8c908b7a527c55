use std::sync::Arc;

use super::instance::{Definition, DriverInstance, ModuleKind};
use crate::error::DriverResult;
use crate::input::{InputDeviceInfo, InputHandler, InputSink};
use crate::modules::ModuleCategory;
use crate::scripting::CategoryServices;

/// Input capability: publishes button events into the host's input sink.
pub struct InputKind {
    sink: Arc<dyn InputSink>,
    devices: Vec<String>,
}

impl InputKind {
    /// Input kind reporting into `sink`
    pub fn new(sink: Arc<dyn InputSink>) -> Self {
        Self {
            sink,
            devices: Vec::new(),
        }
    }
}

impl ModuleKind for InputKind {
    const CATEGORY: ModuleCategory = ModuleCategory::Input;

    fn services(&self) -> CategoryServices {
        CategoryServices::Input(Arc::clone(&self.sink))
    }

    fn load_derived(&mut self, def: &Definition<'_>) -> DriverResult<()> {
        self.devices = def.optional_string_list("devices")?;
        Ok(())
    }
}

/// An activated input driver.
pub type InputModule = DriverInstance<InputKind>;

impl InputHandler for InputModule {
    fn name(&self) -> &str {
        DriverInstance::name(self)
    }

    fn devices_and_descriptions(&self) -> Vec<InputDeviceInfo> {
        let description = self.description().to_string();
        let devices = self.with_kind(|kind| kind.devices.clone());
        if devices.is_empty() {
            return vec![InputDeviceInfo {
                name: DriverInstance::name(self).to_string(),
                description,
            }];
        }
        devices
            .into_iter()
            .map(|name| InputDeviceInfo {
                name,
                description: description.clone(),
            })
            .collect()
    }

    fn is_threaded(&self) -> bool {
        DriverInstance::is_threaded(self)
    }

    fn update(&mut self, delta_seconds: f32) -> DriverResult<()> {
        self.module_update(delta_seconds)
    }
}
