//! CLI entry point for scripted-drivers
//!
//! Provides command-line access to:
//! - Module discovery (list what the configured directories contain)
//! - A standalone host loop that activates drivers and ticks them
//!
//! # Usage
//!
//! List modules:
//! ```bash
//! scripted-drivers discover demos/modules
//! scripted-drivers discover --json
//! ```
//!
//! Run the host loop for 10 seconds at 60 Hz:
//! ```bash
//! scripted-drivers run --input DemoPad --lights DemoLights --ticks 600
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scripted_drivers::bus::LocalMessageBus;
use scripted_drivers::config::{RuntimeConfig, DEFAULT_CONFIG_PATH};
use scripted_drivers::input::{InputEvent, InputHandler, InputSink, NullInputSink};
use scripted_drivers::lights::{LightsDriver, LightsState};
use scripted_drivers::logging;
use scripted_drivers::modules::{DiscoveryReport, ModuleCategory, ModuleTables};
use scripted_drivers::DriverRuntime;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "scripted-drivers")]
#[command(about = "Runtime for Rhai-scripted input, lights and peripheral drivers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan module directories and list what was found
    Discover {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Print the tables as JSON
        #[arg(long)]
        json: bool,

        /// Directories to scan (defaults to modules.dirs from the config)
        dirs: Vec<PathBuf>,
    },

    /// Activate drivers and run the host tick loop
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Input drivers to activate (comma-separated, overrides the config)
        #[arg(long)]
        input: Option<String>,

        /// Lights drivers to activate (comma-separated, overrides the config)
        #[arg(long)]
        lights: Option<String>,

        /// Stop after this many ticks (runs until Ctrl+C otherwise)
        #[arg(long)]
        ticks: Option<u64>,

        /// Tick period in milliseconds
        #[arg(long, default_value = "16")]
        tick_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Discover { config, json, dirs } => {
            let config = load_config(&config)?;
            discover(config, json, dirs)
        }
        Commands::Run {
            config,
            input,
            lights,
            ticks,
            tick_ms,
        } => {
            let mut config = load_config(&config)?;
            if let Some(input) = input {
                config.modules.input = input;
            }
            if let Some(lights) = lights {
                config.modules.lights = lights;
            }
            run(config, ticks, Duration::from_millis(tick_ms.max(1))).await
        }
    }
}

fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let config = RuntimeConfig::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    config.validate().context("Invalid configuration")?;
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn discover(config: RuntimeConfig, json: bool, dirs: Vec<PathBuf>) -> Result<()> {
    let dirs = if dirs.is_empty() {
        config.modules.dirs.clone()
    } else {
        dirs
    };

    let mut runtime = DriverRuntime::new(
        config.scripting,
        Arc::new(NullInputSink),
        Arc::new(LocalMessageBus::new()),
    );
    let report = runtime.load_modules_dirs(&dirs);

    if json {
        println!("{}", tables_json(runtime.tables(), &report)?);
    } else {
        print_tables(runtime.tables(), &report);
    }
    Ok(())
}

fn tables_json(tables: &ModuleTables, report: &DiscoveryReport) -> Result<String> {
    let mut out = serde_json::Map::new();
    for category in ModuleCategory::ALL {
        let entries: Vec<_> = tables.table(category).iter().collect();
        out.insert(category.to_string(), serde_json::to_value(entries)?);
    }
    let errors: Vec<String> = report.errors.iter().map(|e| e.to_string()).collect();
    out.insert("errors".to_string(), serde_json::to_value(errors)?);
    Ok(serde_json::to_string_pretty(&out)?)
}

fn print_tables(tables: &ModuleTables, report: &DiscoveryReport) {
    for category in ModuleCategory::ALL {
        let table = tables.table(category);
        println!("{} ({})", category, table.len());
        for desc in table.iter() {
            if desc.description.is_empty() {
                println!("  {:<20} {}", desc.name, desc.path.display());
            } else {
                println!(
                    "  {:<20} {} - {}",
                    desc.name,
                    desc.path.display(),
                    desc.description
                );
            }
        }
    }
    if !report.errors.is_empty() {
        println!("skipped ({})", report.errors.len());
        for err in &report.errors {
            println!("  {}", err);
        }
    }
}

async fn run(config: RuntimeConfig, ticks: Option<u64>, tick: Duration) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<InputEvent>();
    let sink: Arc<dyn InputSink> = Arc::new(event_tx);
    let bus = Arc::new(LocalMessageBus::new());

    let mut runtime = DriverRuntime::new(config.scripting.clone(), sink, bus.clone());
    runtime.load_modules_dirs(&config.modules.dirs);

    let mut inputs: Vec<Box<dyn InputHandler>> = Vec::new();
    let mut lights: Vec<Box<dyn LightsDriver>> = Vec::new();
    runtime.add_input_modules(&config.modules.input, &mut inputs);
    runtime.add_lights_modules(&config.modules.lights, &mut lights);

    bus.mark_ready();
    let peripherals = runtime
        .load_peripherals()
        .context("Failed to load peripherals")?;

    tracing::info!(
        inputs = inputs.len(),
        lights = lights.len(),
        peripherals,
        tick_ms = tick.as_millis() as u64,
        "Host loop starting"
    );

    let mut state = LightsState::default();
    let mut interval = tokio::time::interval(tick);
    let mut last = Instant::now();
    let mut count = 0u64;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Ctrl+C received");
                break;
            }
            _ = interval.tick() => {}
        }

        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f32();
        last = now;

        runtime.update(dt);
        for input in inputs.iter_mut().filter(|i| !i.is_threaded()) {
            if let Err(e) = input.update(dt) {
                tracing::warn!(driver = %input.name(), error = %e, "Input update failed");
            }
        }

        let mut changed = false;
        while let Ok(event) = event_rx.try_recv() {
            tracing::info!(
                driver = %event.driver,
                button = %event.button,
                pressed = event.pressed,
                "Input event"
            );
            changed |= state.buttons.insert(event.button, event.pressed) != Some(event.pressed);
        }

        for light in lights.iter_mut() {
            if changed {
                if let Err(e) = light.set(&state) {
                    tracing::warn!(driver = %light.name(), error = %e, "Lights set failed");
                }
            }
            if !light.is_threaded() {
                if let Err(e) = light.update(dt) {
                    tracing::warn!(driver = %light.name(), error = %e, "Lights update failed");
                }
            }
        }

        count += 1;
        if ticks.is_some_and(|limit| count >= limit) {
            break;
        }
    }

    // Teardown joins worker threads.
    tokio::task::block_in_place(move || {
        drop(lights);
        drop(inputs);
        runtime.shutdown();
    });
    tracing::info!(ticks = count, "Host loop stopped");
    Ok(())
}
