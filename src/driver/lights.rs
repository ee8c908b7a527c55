use rhai::{Dynamic, FnPtr};

use super::instance::{Definition, DriverInstance, ModuleKind};
use crate::error::{DriverError, DriverResult};
use crate::lights::{LightsDriver, LightsState};
use crate::modules::ModuleCategory;
use crate::scripting::CategoryServices;

/// Lights capability: requires a `set(ctx, state)` hook.
#[derive(Default)]
pub struct LightsKind {
    set: Option<FnPtr>,
}

impl LightsKind {
    /// Unbound lights kind
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModuleKind for LightsKind {
    const CATEGORY: ModuleCategory = ModuleCategory::Lights;

    fn services(&self) -> CategoryServices {
        CategoryServices::Lights
    }

    fn load_derived(&mut self, def: &Definition<'_>) -> DriverResult<()> {
        self.set = Some(def.callable("set", 2)?);
        Ok(())
    }
}

/// An activated lights driver.
pub type LightsModule = DriverInstance<LightsKind>;

impl LightsDriver for LightsModule {
    fn name(&self) -> &str {
        DriverInstance::name(self)
    }

    fn is_threaded(&self) -> bool {
        DriverInstance::is_threaded(self)
    }

    fn set(&mut self, state: &LightsState) -> DriverResult<()> {
        let state = Dynamic::from_map(state.to_script_map());
        self.with_hooks(|kind, env| {
            let hook = kind.set.as_ref().ok_or_else(|| DriverError::BindingShape {
                module: env.context().name().to_string(),
                field: "set".to_string(),
                message: "field not found".to_string(),
            })?;
            env.call("set", hook, (env.context().clone(), state))?;
            Ok(())
        })
    }

    fn update(&mut self, delta_seconds: f32) -> DriverResult<()> {
        self.module_update(delta_seconds)
    }
}
