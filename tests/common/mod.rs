//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use scripted_drivers::config::ScriptingConfig;
use scripted_drivers::input::{InputEvent, InputSink};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Temporary module directory.
pub struct ModuleDir {
    dir: tempfile::TempDir,
}

impl ModuleDir {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn with(self, file: &str, body: &str) -> Self {
        fs::write(self.dir.path().join(file), body).unwrap();
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Input sink that keeps every event, in arrival order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<InputEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Button names of every event so far
    pub fn buttons(&self) -> Vec<String> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.button.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl InputSink for RecordingSink {
    fn submit(&self, event: InputEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn config() -> ScriptingConfig {
    ScriptingConfig::default()
}

/// Input module that reports every hook call as a button named after it.
pub fn recording_input(name: &str, threaded: bool) -> String {
    format!(
        r#"
        #{{
            category: "input",
            name: "{name}",
            update_interval_ms: 1,
            init: |ctx| {{ ctx.set_threaded({threaded}); ctx.button("init", true); true }},
            update: |ctx, dt| {{ ctx.button("update", true); }},
            exit: |ctx| {{ ctx.button("exit", true); }},
        }}
        "#
    )
}
