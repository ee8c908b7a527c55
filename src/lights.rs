//! Lights subsystem boundary.

use rhai::{Array, Dynamic, Map};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::DriverResult;

/// Snapshot of every light the host wants lit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightsState {
    /// Cabinet lights (marquee, bass, ...), by index
    pub cabinet: Vec<bool>,
    /// Per-button lights, keyed by button name
    pub buttons: BTreeMap<String, bool>,
}

impl LightsState {
    /// All lights off, with `cabinet_lights` cabinet slots
    pub fn with_cabinet_lights(cabinet_lights: usize) -> Self {
        Self {
            cabinet: vec![false; cabinet_lights],
            buttons: BTreeMap::new(),
        }
    }

    /// Script view: `#{ cabinet: [bool, ..], buttons: #{ name: bool } }`
    pub(crate) fn to_script_map(&self) -> Map {
        let cabinet: Array = self.cabinet.iter().map(|on| Dynamic::from(*on)).collect();
        let buttons: Map = self
            .buttons
            .iter()
            .map(|(name, on)| (name.as_str().into(), Dynamic::from(*on)))
            .collect();

        let mut map = Map::new();
        map.insert("cabinet".into(), Dynamic::from_array(cabinet));
        map.insert("buttons".into(), Dynamic::from_map(buttons));
        map
    }
}

/// Host-facing interface of an activated lights driver.
pub trait LightsDriver: Send {
    /// Driver name
    fn name(&self) -> &str;

    /// True when the driver runs its own update thread
    fn is_threaded(&self) -> bool;

    /// Push a new lights state to the module's `set` hook.
    fn set(&mut self, state: &LightsState) -> DriverResult<()>;

    /// Advance a non-threaded driver by one host tick.
    ///
    /// Threaded drivers reject this call without running their hook.
    fn update(&mut self, delta_seconds: f32) -> DriverResult<()>;
}
