//! Scripted driver instances and their category capabilities.
//!
//! The lifecycle (binding, `init`/`update`/`exit`, worker threads) lives once
//! in [`DriverInstance`]; each category plugs in through [`ModuleKind`]:
//!
//! | Kind             | Extra table fields               | Host interface     |
//! |------------------|----------------------------------|--------------------|
//! | [`InputKind`]      | `devices` (optional)             | [`InputHandler`](crate::input::InputHandler) |
//! | [`LightsKind`]     | `set` (required)                 | [`LightsDriver`](crate::lights::LightsDriver) |
//! | [`PeripheralKind`] | `message`, `subscriptions` (optional) | [`PeripheralManager`](crate::peripherals::PeripheralManager) |

pub mod instance;
mod input;
mod lights;
mod peripheral;

pub use input::{InputKind, InputModule};
pub use instance::{Definition, DriverInstance, HookEnv, ModuleKind};
pub use lights::{LightsKind, LightsModule};
pub use peripheral::{PeripheralKind, PeripheralModule};
