//! Turn requested module names into running drivers.
//!
//! The host hands over a comma-separated request list (usually straight from
//! its configuration) and a collection to fill. Each requested name is looked
//! up in the discovered tables, loaded into its own engine, bound and
//! initialized. Anything that goes wrong with one module is logged and the
//! remaining names are still processed.

use rhai::Map;
use std::sync::Arc;

use crate::config::ScriptingConfig;
use crate::driver::{DriverInstance, InputKind, LightsKind, ModuleKind};
use crate::error::{DriverError, DriverResult};
use crate::input::{InputHandler, InputSink};
use crate::lights::LightsDriver;
use crate::modules::{ModuleCategory, ModuleDescriptor, ModuleTables};
use crate::scripting::ModuleScript;

/// Split a request list: items are trimmed and empty items dropped.
pub fn parse_requested(requested: &str) -> Vec<&str> {
    requested
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .collect()
}

/// The file may have changed since discovery; it must still declare the
/// descriptor's category and name, and the category must match `K`.
fn check_identity<K: ModuleKind>(desc: &ModuleDescriptor, table: &Map) -> DriverResult<()> {
    let declared = |field: &str| {
        table
            .get(field)
            .and_then(|v| v.clone().into_string().ok())
            .map(|s| s.trim().to_string())
    };
    let mismatch = |message: String| DriverError::Parse {
        path: desc.path.clone(),
        message,
    };

    let category = declared("category").and_then(|c| c.parse::<ModuleCategory>().ok());
    if category != Some(desc.category) || desc.category != K::CATEGORY {
        return Err(mismatch(format!(
            "expected a {} module, file declares {:?}",
            K::CATEGORY,
            declared("category").unwrap_or_default()
        )));
    }

    let name = declared("name").unwrap_or_default();
    if name.to_lowercase() != desc.name.to_lowercase() {
        return Err(mismatch(format!(
            "expected module '{}', file declares '{}'",
            desc.name, name
        )));
    }
    Ok(())
}

/// Builds driver instances from discovered descriptors.
#[derive(Debug, Clone, Copy)]
pub struct ModuleFactory<'a> {
    tables: &'a ModuleTables,
    config: &'a ScriptingConfig,
}

impl<'a> ModuleFactory<'a> {
    /// Factory over `tables`, creating engines with `config`.
    pub fn new(tables: &'a ModuleTables, config: &'a ScriptingConfig) -> Self {
        Self { tables, config }
    }

    /// Discovered tables this factory resolves names against
    pub fn tables(&self) -> &'a ModuleTables {
        self.tables
    }

    /// Load, bind and initialize one module.
    ///
    /// On failure the partly built instance is dropped before returning, so
    /// no thread or script handle outlives the call.
    pub fn instantiate<K: ModuleKind>(
        &self,
        desc: &ModuleDescriptor,
        kind: K,
    ) -> DriverResult<DriverInstance<K>> {
        let (script, table) = ModuleScript::load(&desc.path, self.config, &desc.name)?;
        check_identity::<K>(desc, &table)?;

        let mut instance = DriverInstance::new(desc.name.clone(), kind, self.config);
        instance.load_from_table(script, &table)?;
        instance.module_init()?;
        Ok(instance)
    }

    /// Activate the requested input drivers, appending them to `out`.
    ///
    /// Returns how many were added.
    pub fn add_input_modules(
        &self,
        requested: &str,
        sink: &Arc<dyn InputSink>,
        out: &mut Vec<Box<dyn InputHandler>>,
    ) -> usize {
        self.add_modules(
            ModuleCategory::Input,
            requested,
            || InputKind::new(Arc::clone(sink)),
            |instance| out.push(Box::new(instance)),
        )
    }

    /// Activate the requested lights drivers, appending them to `out`.
    ///
    /// Returns how many were added.
    pub fn add_lights_modules(
        &self,
        requested: &str,
        out: &mut Vec<Box<dyn LightsDriver>>,
    ) -> usize {
        self.add_modules(
            ModuleCategory::Lights,
            requested,
            LightsKind::new,
            |instance| out.push(Box::new(instance)),
        )
    }

    fn add_modules<K: ModuleKind>(
        &self,
        category: ModuleCategory,
        requested: &str,
        mut kind: impl FnMut() -> K,
        mut push: impl FnMut(DriverInstance<K>),
    ) -> usize {
        let mut added = 0;
        for name in parse_requested(requested) {
            let Some(desc) = self.tables.find(category, name) else {
                let err = DriverError::NameNotFound {
                    category,
                    name: name.to_string(),
                };
                tracing::warn!(error = %err, "Skipping requested module");
                continue;
            };

            match self.instantiate(desc, kind()) {
                Ok(instance) => {
                    push(instance);
                    added += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        module = %desc.name,
                        category = %category,
                        error = %e,
                        "Failed to activate module"
                    );
                }
            }
        }
        added
    }
}
