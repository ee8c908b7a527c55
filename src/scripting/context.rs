//! The `Driver` object every hook receives as its first argument.
//!
//! # Script API
//!
//! All categories:
//! - `ctx.name`, `ctx.category` - identity
//! - `ctx.set_threaded(bool)` - only honoured while `init` runs
//! - `ctx.is_threaded()`
//! - `ctx.log(msg)` - info-level log line tagged with the driver name
//!
//! Input drivers:
//! - `ctx.button(name, pressed)` - report a button transition
//!
//! Peripheral drivers:
//! - `ctx.subscribe(message)` - receive `message` in the `message` hook
//! - `ctx.broadcast(message)` - send `message` on the host bus
//!
//! Calling an API that belongs to another category raises a script error.

use rhai::{Engine, EvalAltResult, Position};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bus::{MessageBus, MessageSender};
use crate::input::{InputEvent, InputSink};
use crate::modules::ModuleCategory;
use crate::scripting::engine::SCRIPT_LOG_TARGET;

/// Host services a driver category can reach from script.
#[derive(Clone)]
pub enum CategoryServices {
    /// Input drivers publish button events
    Input(Arc<dyn InputSink>),
    /// Lights drivers only receive state through their `set` hook
    Lights,
    /// Peripherals talk to the message bus through their own queue
    Peripheral {
        /// Host bus
        bus: Arc<dyn MessageBus>,
        /// Sending half of this peripheral's queue
        inbox: MessageSender,
    },
}

impl CategoryServices {
    fn category(&self) -> ModuleCategory {
        match self {
            CategoryServices::Input(_) => ModuleCategory::Input,
            CategoryServices::Lights => ModuleCategory::Lights,
            CategoryServices::Peripheral { .. } => ModuleCategory::Peripheral,
        }
    }
}

struct ContextInner {
    name: String,
    services: CategoryServices,
    threaded: AtomicBool,
    in_init: AtomicBool,
}

/// Handle scripts use to call back into their driver instance.
///
/// Cheap to clone; every clone refers to the same instance state.
#[derive(Clone)]
pub struct DriverContext {
    inner: Arc<ContextInner>,
}

impl DriverContext {
    /// Create the context for a driver named `name`
    pub fn new(name: impl Into<String>, services: CategoryServices) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                name: name.into(),
                services,
                threaded: AtomicBool::new(false),
                in_init: AtomicBool::new(false),
            }),
        }
    }

    /// Driver name
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Driver category
    pub fn category(&self) -> ModuleCategory {
        self.inner.services.category()
    }

    /// True once `init` has requested threaded mode
    pub fn is_threaded(&self) -> bool {
        self.inner.threaded.load(Ordering::Acquire)
    }

    /// Request (or cancel) threaded mode. Ignored outside `init`.
    pub fn set_threaded(&self, threaded: bool) {
        if self.inner.in_init.load(Ordering::Acquire) {
            self.inner.threaded.store(threaded, Ordering::Release);
        } else {
            tracing::warn!(
                driver = %self.inner.name,
                "set_threaded called outside init; ignored"
            );
        }
    }

    pub(crate) fn begin_init(&self) {
        self.inner.in_init.store(true, Ordering::Release);
    }

    pub(crate) fn end_init(&self) {
        self.inner.in_init.store(false, Ordering::Release);
    }

    pub(crate) fn reset_threaded(&self) {
        self.inner.threaded.store(false, Ordering::Release);
    }

    fn input_sink(&self) -> Result<&Arc<dyn InputSink>, Box<EvalAltResult>> {
        match &self.inner.services {
            CategoryServices::Input(sink) => Ok(sink),
            _ => Err(self.wrong_category("button", ModuleCategory::Input)),
        }
    }

    fn bus(&self, op: &str) -> Result<(&Arc<dyn MessageBus>, &MessageSender), Box<EvalAltResult>> {
        match &self.inner.services {
            CategoryServices::Peripheral { bus, inbox } => Ok((bus, inbox)),
            _ => Err(self.wrong_category(op, ModuleCategory::Peripheral)),
        }
    }

    fn wrong_category(&self, op: &str, needed: ModuleCategory) -> Box<EvalAltResult> {
        Box::new(EvalAltResult::ErrorRuntime(
            format!(
                "{}() is only available to {} drivers; '{}' is a {} driver",
                op,
                needed,
                self.inner.name,
                self.category()
            )
            .into(),
            Position::NONE,
        ))
    }
}

impl std::fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverContext")
            .field("name", &self.inner.name)
            .field("category", &self.category())
            .field("threaded", &self.is_threaded())
            .finish()
    }
}

/// Register the `Driver` type and its methods with an engine.
pub fn register_driver_api(engine: &mut Engine) {
    engine.register_type_with_name::<DriverContext>("Driver");

    engine.register_get("name", |ctx: &mut DriverContext| ctx.name().to_string());
    engine.register_get("category", |ctx: &mut DriverContext| {
        ctx.category().to_string()
    });

    engine.register_fn("set_threaded", |ctx: &mut DriverContext, threaded: bool| {
        ctx.set_threaded(threaded)
    });
    engine.register_fn("is_threaded", |ctx: &mut DriverContext| ctx.is_threaded());

    engine.register_fn("log", |ctx: &mut DriverContext, msg: &str| {
        tracing::info!(target: SCRIPT_LOG_TARGET, driver = %ctx.name(), "{}", msg);
    });

    // Input
    engine.register_fn(
        "button",
        |ctx: &mut DriverContext, button: &str, pressed: bool| -> Result<(), Box<EvalAltResult>> {
            let sink = ctx.input_sink()?;
            sink.submit(InputEvent {
                driver: ctx.name().to_string(),
                button: button.to_string(),
                pressed,
            });
            Ok(())
        },
    );

    // Peripheral
    engine.register_fn(
        "subscribe",
        |ctx: &mut DriverContext, message: &str| -> Result<(), Box<EvalAltResult>> {
            let (bus, inbox) = ctx.bus("subscribe")?;
            bus.subscribe(message, inbox.clone());
            tracing::debug!(driver = %ctx.name(), message, "Subscribed to message");
            Ok(())
        },
    );
    engine.register_fn(
        "broadcast",
        |ctx: &mut DriverContext, message: &str| -> Result<(), Box<EvalAltResult>> {
            let (bus, _) = ctx.bus("broadcast")?;
            bus.broadcast(message);
            Ok(())
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalMessageBus;
    use crate::input::NullInputSink;
    use rhai::Scope;
    use tokio::sync::mpsc;

    fn engine() -> Engine {
        let mut engine = Engine::new();
        register_driver_api(&mut engine);
        engine
    }

    #[test]
    fn set_threaded_only_during_init() {
        let ctx = DriverContext::new("Pad", CategoryServices::Input(Arc::new(NullInputSink)));

        ctx.set_threaded(true);
        assert!(!ctx.is_threaded());

        ctx.begin_init();
        ctx.set_threaded(true);
        ctx.end_init();
        assert!(ctx.is_threaded());

        ctx.set_threaded(false);
        assert!(ctx.is_threaded());
    }

    #[test]
    fn button_reaches_the_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = DriverContext::new("Pad", CategoryServices::Input(Arc::new(tx)));

        let mut scope = Scope::new();
        scope.push("ctx", ctx);
        engine()
            .run_with_scope(&mut scope, r#"ctx.button("Start", true);"#)
            .unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(
            event,
            InputEvent {
                driver: "Pad".into(),
                button: "Start".into(),
                pressed: true
            }
        );
    }

    #[test]
    fn wrong_category_api_raises() {
        let ctx = DriverContext::new("Strobe", CategoryServices::Lights);
        let mut scope = Scope::new();
        scope.push("ctx", ctx);

        let err = engine()
            .run_with_scope(&mut scope, r#"ctx.broadcast("Hello");"#)
            .unwrap_err();
        assert!(err.to_string().contains("only available to peripheral drivers"));
    }

    #[test]
    fn peripheral_subscribe_and_broadcast() {
        let bus = Arc::new(LocalMessageBus::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = DriverContext::new(
            "Panel",
            CategoryServices::Peripheral {
                bus: bus.clone(),
                inbox: tx,
            },
        );

        let mut scope = Scope::new();
        scope.push("ctx", ctx);
        engine()
            .run_with_scope(
                &mut scope,
                r#"
                ctx.subscribe("Ping");
                ctx.broadcast("Ping");
                "#,
            )
            .unwrap();

        assert_eq!(rx.try_recv().unwrap(), "Ping");
        assert_eq!(bus.subscriber_count("Ping"), 1);
    }

    #[test]
    fn name_and_category_properties() {
        let ctx = DriverContext::new("Strobe", CategoryServices::Lights);
        let mut scope = Scope::new();
        scope.push("ctx", ctx);
        let out: String = engine()
            .eval_with_scope(&mut scope, r#"ctx.name + ":" + ctx.category"#)
            .unwrap();
        assert_eq!(out, "Strobe:lights");
    }
}
