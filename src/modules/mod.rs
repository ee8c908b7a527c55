//! Module descriptor tables.
//!
//! A descriptor only records "this name is loadable from this path". Nothing
//! here is instantiated; the factory layer and the peripheral manager turn
//! descriptors into running drivers.

pub mod discovery;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub use discovery::{scan_dirs, DiscoveryReport};

/// Device category a module declares for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleCategory {
    /// Input controllers (pads, joysticks, cabinet buttons)
    Input,
    /// Lighting controllers
    Lights,
    /// Generic peripherals driven by message-bus traffic
    Peripheral,
}

impl ModuleCategory {
    /// All categories, in table order.
    pub const ALL: [ModuleCategory; 3] = [
        ModuleCategory::Input,
        ModuleCategory::Lights,
        ModuleCategory::Peripheral,
    ];

    /// Tag used in module definition tables.
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleCategory::Input => "input",
            ModuleCategory::Lights => "lights",
            ModuleCategory::Peripheral => "peripheral",
        }
    }
}

impl fmt::Display for ModuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "input" => Ok(ModuleCategory::Input),
            "lights" => Ok(ModuleCategory::Lights),
            "peripheral" => Ok(ModuleCategory::Peripheral),
            other => Err(format!(
                "Unknown module category '{}'. Must be one of: input, lights, peripheral",
                other
            )),
        }
    }
}

/// A discovered, not yet instantiated, module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Declared module name (original case)
    pub name: String,
    /// Declared description, empty if none
    pub description: String,
    /// Declared category
    pub category: ModuleCategory,
    /// Absolute path of the module source
    pub path: PathBuf,
}

/// Name → descriptor index for one category.
///
/// Keys are case-folded; lookups are case-insensitive and iteration follows
/// the case-folded name order.
#[derive(Debug, Clone, Default)]
pub struct ModuleTable {
    entries: BTreeMap<String, ModuleDescriptor>,
}

impl ModuleTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a descriptor unless its name is already taken.
    ///
    /// Returns the rejected descriptor back when the name collides.
    pub fn insert(&mut self, desc: ModuleDescriptor) -> Result<(), ModuleDescriptor> {
        let key = desc.name.to_lowercase();
        if self.entries.contains_key(&key) {
            return Err(desc);
        }
        self.entries.insert(key, desc);
        Ok(())
    }

    /// Case-insensitive lookup
    pub fn get(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.entries.get(&name.trim().to_lowercase())
    }

    /// Declared names in table order
    pub fn names(&self) -> Vec<&str> {
        self.entries.values().map(|d| d.name.as_str()).collect()
    }

    /// Descriptors in table order
    pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.entries.values()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no module of this category was discovered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One descriptor table per category.
#[derive(Debug, Clone, Default)]
pub struct ModuleTables {
    input: ModuleTable,
    lights: ModuleTable,
    peripheral: ModuleTable,
}

impl ModuleTables {
    /// Create empty tables
    pub fn new() -> Self {
        Self::default()
    }

    /// Table for a category
    pub fn table(&self, category: ModuleCategory) -> &ModuleTable {
        match category {
            ModuleCategory::Input => &self.input,
            ModuleCategory::Lights => &self.lights,
            ModuleCategory::Peripheral => &self.peripheral,
        }
    }

    pub(crate) fn table_mut(&mut self, category: ModuleCategory) -> &mut ModuleTable {
        match category {
            ModuleCategory::Input => &mut self.input,
            ModuleCategory::Lights => &mut self.lights,
            ModuleCategory::Peripheral => &mut self.peripheral,
        }
    }

    /// Look a module up by category and name (case-insensitive)
    pub fn find(&self, category: ModuleCategory, name: &str) -> Option<&ModuleDescriptor> {
        self.table(category).get(name)
    }

    /// Total number of descriptors across all categories
    pub fn len(&self) -> usize {
        ModuleCategory::ALL
            .iter()
            .map(|c| self.table(*c).len())
            .sum()
    }

    /// True when every table is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every descriptor
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
