//! Sandboxed Rhai engines and per-module script handles.
//!
//! Every driver instance owns its own [`ModuleScript`]: a private `Engine`
//! plus the compiled `AST` of its module file. Nothing is shared between
//! instances, so a threaded driver can run its hooks on its worker while
//! other drivers run theirs on the host thread.
//!
//! # Safety Limits
//!
//! Engines are created with an operation budget per call
//! (`scripting.max_operations`) and a call-depth limit, and `eval` is
//! disabled so modules cannot compile code at runtime.

use rhai::{Dynamic, Engine, EvalAltResult, FnPtr, FuncArgs, Map, AST};
use std::path::{Path, PathBuf};

use crate::config::ScriptingConfig;
use crate::error::{DriverError, DriverResult};
use crate::scripting::context;

/// Tracing target used for script output
pub const SCRIPT_LOG_TARGET: &str = "scripted_drivers::script";

/// Create an engine with the runtime's safety limits.
///
/// `label` tags every `print`/`debug` line the scripts emit.
pub fn create_sandboxed_engine(config: &ScriptingConfig, label: &str) -> Engine {
    let mut engine = Engine::new();

    engine.set_max_operations(config.max_operations);
    engine.set_max_call_levels(config.max_call_levels);
    engine.disable_symbol("eval");

    let print_label = label.to_string();
    engine.on_print(move |text| {
        tracing::info!(target: SCRIPT_LOG_TARGET, driver = %print_label, "{}", text);
    });

    let debug_label = label.to_string();
    engine.on_debug(move |text, source, pos| {
        tracing::debug!(
            target: SCRIPT_LOG_TARGET,
            driver = %debug_label,
            source = source.unwrap_or(""),
            position = %pos,
            "{}",
            text
        );
    });

    engine
}

/// Compile a module file and evaluate its top level to the definition table.
///
/// Only the module's top-level statements run; no hook is called.
pub fn read_definition(engine: &Engine, path: &Path) -> DriverResult<(AST, Map)> {
    let ast = engine
        .compile_file(path.to_path_buf())
        .map_err(|e| parse_error(path, &e))?;

    let value: Dynamic = engine
        .eval_ast(&ast)
        .map_err(|e| parse_error(path, &e))?;

    let type_name = value.type_name();
    let table = value.try_cast::<Map>().ok_or_else(|| DriverError::Parse {
        path: path.to_path_buf(),
        message: format!("module must evaluate to an object map, found {}", type_name),
    })?;

    Ok((ast, table))
}

fn parse_error(path: &Path, err: &EvalAltResult) -> DriverError {
    DriverError::Parse {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

/// The scripting handles owned by one driver instance.
///
/// Dropping it releases the engine, the compiled module and every value the
/// module's top level created.
pub struct ModuleScript {
    engine: Engine,
    ast: AST,
    path: PathBuf,
}

impl ModuleScript {
    /// Load a module file into a fresh engine with the driver API registered.
    ///
    /// Returns the script handles together with the evaluated definition table.
    pub fn load(path: &Path, config: &ScriptingConfig, label: &str) -> DriverResult<(Self, Map)> {
        let mut engine = create_sandboxed_engine(config, label);
        context::register_driver_api(&mut engine);

        let (ast, table) = read_definition(&engine, path)?;
        Ok((
            Self {
                engine,
                ast,
                path: path.to_path_buf(),
            },
            table,
        ))
    }

    /// Call a bound hook.
    pub fn call(&self, hook: &FnPtr, args: impl FuncArgs) -> Result<Dynamic, Box<EvalAltResult>> {
        hook.call::<Dynamic>(&self.engine, &self.ast, args)
    }

    /// True if the module defines a script function `name` taking `arity`
    /// parameters.
    pub fn has_function(&self, name: &str, arity: usize) -> bool {
        self.ast
            .iter_functions()
            .any(|f| f.name == name && f.params.len() == arity)
    }

    /// Source file this script was loaded from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for ModuleScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleScript")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn module_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".rhai").tempfile().unwrap();
        write!(file, "{}", body).unwrap();
        file
    }

    #[test]
    fn reads_definition_without_calling_hooks() {
        let file = module_file(
            r#"
            #{
                category: "input",
                name: "Pad",
                init: |ctx| { throw "init must not run during discovery"; },
            }
            "#,
        );
        let engine = create_sandboxed_engine(&ScriptingConfig::default(), "probe");
        let (_, table) = read_definition(&engine, file.path()).unwrap();
        assert_eq!(table["name"].clone().into_string().unwrap(), "Pad");
        assert!(table["init"].is::<FnPtr>());
    }

    #[test]
    fn syntax_error_is_a_parse_error() {
        let file = module_file("#{ category: \"input\", name: ");
        let engine = create_sandboxed_engine(&ScriptingConfig::default(), "probe");
        let err = read_definition(&engine, file.path()).unwrap_err();
        assert!(matches!(err, DriverError::Parse { .. }));
    }

    #[test]
    fn non_map_module_is_rejected() {
        let file = module_file("40 + 2");
        let engine = create_sandboxed_engine(&ScriptingConfig::default(), "probe");
        let err = read_definition(&engine, file.path()).unwrap_err();
        assert!(err.to_string().contains("object map"));
    }

    #[test]
    fn operation_limit_stops_runaway_top_level() {
        let file = module_file("loop { } #{}");
        let config = ScriptingConfig {
            max_operations: 1_000,
            ..Default::default()
        };
        let engine = create_sandboxed_engine(&config, "probe");
        assert!(read_definition(&engine, file.path()).is_err());
    }

    #[test]
    fn loaded_script_calls_closures() {
        let file = module_file(
            r#"
            let base = 40;
            #{ answer: |x| base + x }
            "#,
        );
        let (script, table) =
            ModuleScript::load(file.path(), &ScriptingConfig::default(), "test").unwrap();
        let hook = table["answer"].clone().try_cast::<FnPtr>().unwrap();
        let result = script.call(&hook, (2_i64,)).unwrap();
        assert_eq!(result.as_int().unwrap(), 42);
    }

    #[test]
    fn function_lookup_checks_arity() {
        let file = module_file("fn tick(ctx, dt) {} #{}");
        let (script, _) =
            ModuleScript::load(file.path(), &ScriptingConfig::default(), "test").unwrap();
        assert!(script.has_function("tick", 2));
        assert!(!script.has_function("tick", 1));
        assert!(!script.has_function("tock", 2));
    }
}
