//! # Scripted Drivers
//!
//! Runtime for hardware drivers written as Rhai scripts. Module files are
//! discovered in configured directories, classified by the category they
//! declare, and instantiated on request into input drivers, lights drivers or
//! bus-driven peripherals. Each driver owns its own script engine and may ask
//! for a dedicated worker thread during `init`.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based runtime configuration (`config/drivers.toml` + env).
//! - **`logging`**: Tracing subscriber setup.
//! - **`error`**: The `DriverError` enum shared by every layer.
//! - **`modules`**: Module categories, descriptors and the discovery pass.
//! - **`scripting`**: Sandboxed Rhai engines and the `Driver` script API.
//! - **`driver`**: `DriverInstance<K>` lifecycle plus the input, lights and
//!   peripheral capabilities.
//! - **`factory`**: Name-based activation of input and lights drivers.
//! - **`peripherals`**: The peripheral registry.
//! - **`input`**, **`lights`**, **`bus`**: Host subsystem boundaries.
//! - **`runtime`**: `DriverRuntime`, the value a host keeps for its session.

pub mod bus;
pub mod config;
pub mod driver;
pub mod error;
pub mod factory;
pub mod input;
pub mod lights;
pub mod logging;
pub mod modules;
pub mod peripherals;
pub mod runtime;
pub mod scripting;

pub use error::{DriverError, DriverResult};
pub use runtime::DriverRuntime;
