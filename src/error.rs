//! Error types for the driver runtime.
//!
//! All per-module failures (`Parse`, `BindingShape`, `InitFailure`,
//! `NameNotFound`) are local to a single load attempt. The discovery pass,
//! the factory layer and the peripheral bulk-load log them and move on to the
//! next module; they never abort a batch. `BusNotReady` is the one contract
//! violation a host is expected to treat as fatal.

use std::path::PathBuf;

use thiserror::Error;

use crate::modules::ModuleCategory;

/// Convenience alias for results using the runtime error type.
pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// Errors produced while discovering, binding or running scripted drivers.
#[derive(Error, Debug)]
pub enum DriverError {
    /// A module file could not be compiled, evaluated or classified.
    #[error("Failed to parse module {}: {message}", path.display())]
    Parse {
        /// Path of the offending module file
        path: PathBuf,
        /// Human-readable reason
        message: String,
    },

    /// A loaded definition table is missing a required field or has the wrong type.
    #[error("Module '{module}' is missing required field '{field}': {message}")]
    BindingShape {
        /// Module name
        module: String,
        /// Table field that failed to bind
        field: String,
        /// What was wrong with it
        message: String,
    },

    /// The `init` hook ran but reported failure.
    #[error("Module '{module}' failed to initialize: {reason}")]
    InitFailure {
        /// Module name
        module: String,
        /// Returned or raised reason
        reason: String,
    },

    /// A requested module name is not present in the descriptor table.
    #[error("No {category} module named '{name}'")]
    NameNotFound {
        /// Category that was searched
        category: ModuleCategory,
        /// Name as requested
        name: String,
    },

    /// A hook raised a script error after initialization.
    #[error("Script error in module '{module}' ({hook}): {message}")]
    Script {
        /// Module name
        module: String,
        /// Hook that raised
        hook: &'static str,
        /// Script error text
        message: String,
    },

    /// The driver has not been initialized or has already exited.
    #[error("Module '{0}' is not running")]
    NotRunning(String),

    /// The driver was asked to bind or initialize while already running.
    #[error("Module '{0}' is already running")]
    AlreadyRunning(String),

    /// A host-driven update was requested for a driver that drives itself.
    #[error("Module '{0}' runs its own update thread; host update rejected")]
    ThreadedUpdate(String),

    /// The OS refused to start a worker thread.
    #[error("Failed to spawn worker thread for module '{module}': {source}")]
    WorkerSpawn {
        /// Module name
        module: String,
        /// Underlying spawn error
        #[source]
        source: std::io::Error,
    },

    /// Peripherals were loaded before the message bus reported ready.
    #[error("Peripherals loaded before the message bus was ready")]
    BusNotReady,

    /// `load_peripherals` was called a second time.
    #[error("Peripherals have already been loaded")]
    PeripheralsAlreadyLoaded,

    /// I/O error while scanning module directories.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded or failed validation.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<figment::Error> for DriverError {
    fn from(err: figment::Error) -> Self {
        DriverError::Config(err.to_string())
    }
}

impl DriverError {
    /// True when the error only affects a single module load attempt.
    pub fn is_module_local(&self) -> bool {
        matches!(
            self,
            DriverError::Parse { .. }
                | DriverError::BindingShape { .. }
                | DriverError::InitFailure { .. }
                | DriverError::NameNotFound { .. }
                | DriverError::Script { .. }
                | DriverError::WorkerSpawn { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_errors_are_local() {
        let err = DriverError::NameNotFound {
            category: ModuleCategory::Input,
            name: "Unknown".into(),
        };
        assert!(err.is_module_local());
        assert_eq!(err.to_string(), "No input module named 'Unknown'");

        assert!(!DriverError::BusNotReady.is_module_local());
        assert!(!DriverError::PeripheralsAlreadyLoaded.is_module_local());
    }

    #[test]
    fn parse_error_names_the_file() {
        let err = DriverError::Parse {
            path: PathBuf::from("/tmp/broken.rhai"),
            message: "unexpected end of input".into(),
        };
        let text = err.to_string();
        assert!(text.contains("broken.rhai"));
        assert!(text.contains("unexpected end of input"));
    }
}
