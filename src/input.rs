//! Input subsystem boundary.
//!
//! Scripted input drivers report button transitions through an
//! [`InputSink`]; the host sees each activated driver as a boxed
//! [`InputHandler`].

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::DriverResult;

/// One button transition reported by an input driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputEvent {
    /// Name of the driver that produced the event
    pub driver: String,
    /// Button name as reported by the module
    pub button: String,
    /// True on press, false on release
    pub pressed: bool,
}

/// Receiver of input events; implemented by the host's input subsystem.
pub trait InputSink: Send + Sync {
    /// Accept one event. Must not block for long; drivers call it from
    /// their update hook.
    fn submit(&self, event: InputEvent);
}

impl InputSink for mpsc::UnboundedSender<InputEvent> {
    fn submit(&self, event: InputEvent) {
        if self.send(event).is_err() {
            tracing::trace!("Input event dropped: receiver closed");
        }
    }
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullInputSink;

impl InputSink for NullInputSink {
    fn submit(&self, _event: InputEvent) {}
}

/// A device exposed by an input driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDeviceInfo {
    /// Device label
    pub name: String,
    /// Owning driver's description
    pub description: String,
}

/// Host-facing interface of an activated input driver.
pub trait InputHandler: Send {
    /// Driver name
    fn name(&self) -> &str;

    /// Devices this driver exposes, for device listings
    fn devices_and_descriptions(&self) -> Vec<InputDeviceInfo>;

    /// True when the driver runs its own update thread
    fn is_threaded(&self) -> bool;

    /// Advance a non-threaded driver by one host tick.
    ///
    /// Threaded drivers reject this call without running their hook.
    fn update(&mut self, delta_seconds: f32) -> DriverResult<()>;
}
