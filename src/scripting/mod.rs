//! Rhai scripting boundary.
//!
//! The runtime never inspects script internals; it only needs:
//!
//! - "load file → definition table" ([`ModuleScript::load`], [`read_definition`])
//! - "call hook with context → value or error" ([`ModuleScript::call`])
//! - owned engine/AST/function-pointer handles that are released on drop
//!
//! # Module Shape
//!
//! A module file evaluates to an object map:
//!
//! ```rhai
//! #{
//!     category: "input",          // input | lights | peripheral
//!     name: "Joystick1",
//!     description: "USB arcade stick",
//!     update_interval_ms: 8,      // worker cadence when threaded
//!
//!     init: |ctx| { ctx.set_threaded(true); true },
//!     update: |ctx, dt| { ctx.button("Start", true); },
//!     exit: |ctx| { },
//! }
//! ```

pub mod context;
pub mod engine;

pub use context::{register_driver_api, CategoryServices, DriverContext};
pub use engine::{create_sandboxed_engine, read_definition, ModuleScript, SCRIPT_LOG_TARGET};
