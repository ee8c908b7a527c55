//! Shared lifecycle for every scripted driver.
//!
//! A [`DriverInstance`] moves through:
//!
//! ```text
//! new ──► load_from_table ──► module_init ──┬─► host module_update (non-threaded)
//!                                           └─► worker thread update loop (threaded)
//!                                                        │
//!                          drop ◄── module_exit ◄────────┘
//! ```
//!
//! Teardown always runs stop signal → worker join → `exit` hook → release of
//! the scripting handles, so a worker never observes a released script and
//! `exit` never overlaps an `update`.

use rhai::{Dynamic, FnPtr, FuncArgs, Map, FLOAT};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::ScriptingConfig;
use crate::error::{DriverError, DriverResult};
use crate::modules::ModuleCategory;
use crate::scripting::{CategoryServices, DriverContext, ModuleScript};

/// Category-specific part of a driver, composed into [`DriverInstance`].
pub trait ModuleKind: Send + 'static {
    /// Category this kind implements
    const CATEGORY: ModuleCategory;

    /// Host services exposed to the module's scripts
    fn services(&self) -> CategoryServices;

    /// Bind extra fields from the definition table after the base hooks.
    fn load_derived(&mut self, _def: &Definition<'_>) -> DriverResult<()> {
        Ok(())
    }

    /// Runs immediately before the `init` hook.
    fn prepare(&mut self, _ctx: &DriverContext) {}

    /// Runs before every `update` hook, on the thread running the update.
    fn before_update(&mut self, _env: &HookEnv<'_>) -> DriverResult<()> {
        Ok(())
    }
}

/// Access to a bound module's script while its state lock is held.
pub struct HookEnv<'a> {
    script: &'a ModuleScript,
    context: &'a DriverContext,
}

impl HookEnv<'_> {
    /// The driver's context object
    pub fn context(&self) -> &DriverContext {
        self.context
    }

    /// Call a hook, mapping script errors to [`DriverError::Script`].
    pub fn call(
        &self,
        hook_name: &'static str,
        hook: &FnPtr,
        args: impl FuncArgs,
    ) -> DriverResult<Dynamic> {
        self.script
            .call(hook, args)
            .map_err(|e| DriverError::Script {
                module: self.context.name().to_string(),
                hook: hook_name,
                message: e.to_string(),
            })
    }
}

/// A module's evaluated definition table, read during binding.
///
/// Field errors come back as [`DriverError::BindingShape`] naming the field.
pub struct Definition<'a> {
    module: &'a str,
    table: &'a Map,
    script: &'a ModuleScript,
}

impl<'a> Definition<'a> {
    /// View `table`, evaluated from `script`, for the module named `module`.
    pub fn new(module: &'a str, table: &'a Map, script: &'a ModuleScript) -> Self {
        Self {
            module,
            table,
            script,
        }
    }

    fn shape_error(&self, field: &str, message: impl Into<String>) -> DriverError {
        DriverError::BindingShape {
            module: self.module.to_string(),
            field: field.to_string(),
            message: message.into(),
        }
    }

    fn field(&self, field: &str) -> Option<&'a Dynamic> {
        self.table.get(field).filter(|value| !value.is_unit())
    }

    /// Required hook taking `arity` arguments.
    pub fn callable(&self, field: &str, arity: usize) -> DriverResult<FnPtr> {
        self.optional_callable(field, arity)?
            .ok_or_else(|| self.shape_error(field, "field not found"))
    }

    /// Optional hook: a closure, a `Fn("name")` pointer, or a string naming a
    /// script function. Named functions must exist in the module with the
    /// expected number of parameters.
    pub fn optional_callable(&self, field: &str, arity: usize) -> DriverResult<Option<FnPtr>> {
        let Some(value) = self.field(field) else {
            return Ok(None);
        };

        let fn_ptr = if let Some(fn_ptr) = value.clone().try_cast::<FnPtr>() {
            fn_ptr
        } else if value.is_string() {
            let fn_name = value
                .clone()
                .into_string()
                .map_err(|t| self.shape_error(field, t))?;
            FnPtr::new(fn_name).map_err(|e| self.shape_error(field, e.to_string()))?
        } else {
            return Err(self.shape_error(
                field,
                format!("expected a function, found {}", value.type_name()),
            ));
        };

        if !fn_ptr.is_anonymous() {
            let arity = arity.saturating_sub(fn_ptr.curry().len());
            if !self.script.has_function(fn_ptr.fn_name(), arity) {
                return Err(self.shape_error(
                    field,
                    format!(
                        "no function '{}' taking {} parameters",
                        fn_ptr.fn_name(),
                        arity
                    ),
                ));
            }
        }
        Ok(Some(fn_ptr))
    }

    /// Optional string field.
    pub fn optional_string(&self, field: &str) -> DriverResult<Option<String>> {
        match self.field(field) {
            None => Ok(None),
            Some(value) => value.clone().into_string().map(Some).map_err(|found| {
                self.shape_error(field, format!("expected a string, found {}", found))
            }),
        }
    }

    /// Optional array of strings; absent means empty.
    pub fn optional_string_list(&self, field: &str) -> DriverResult<Vec<String>> {
        let Some(value) = self.field(field) else {
            return Ok(Vec::new());
        };
        let items = value.clone().into_array().map_err(|found| {
            self.shape_error(field, format!("expected an array, found {}", found))
        })?;
        items
            .into_iter()
            .map(|item| {
                item.into_string().map_err(|found| {
                    self.shape_error(field, format!("expected strings, found {}", found))
                })
            })
            .collect()
    }

    /// Optional positive integer of milliseconds.
    pub fn optional_interval(&self, field: &str) -> DriverResult<Option<Duration>> {
        let Some(value) = self.field(field) else {
            return Ok(None);
        };
        match value.as_int() {
            Ok(ms) if ms > 0 => Ok(Some(Duration::from_millis(ms as u64))),
            _ => Err(self.shape_error(field, "expected a positive integer")),
        }
    }
}

struct Hooks {
    init: FnPtr,
    exit: FnPtr,
    update: FnPtr,
}

struct Bound {
    script: ModuleScript,
    hooks: Hooks,
}

struct State<K> {
    kind: K,
    bound: Option<Bound>,
}

/// State reachable from both the owning instance and its worker.
struct Shared<K> {
    context: DriverContext,
    state: Mutex<State<K>>,
}

impl<K: ModuleKind> Shared<K> {
    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_hooks<R>(
        &self,
        f: impl FnOnce(&mut K, &Hooks, &HookEnv<'_>) -> DriverResult<R>,
    ) -> DriverResult<R> {
        let mut guard = self.lock();
        let State { kind, bound } = &mut *guard;
        let bound = bound
            .as_ref()
            .ok_or_else(|| DriverError::NotRunning(self.context.name().to_string()))?;
        let env = HookEnv {
            script: &bound.script,
            context: &self.context,
        };
        f(kind, &bound.hooks, &env)
    }

    fn update(&self, delta_seconds: f32) -> DriverResult<()> {
        self.with_hooks(|kind, hooks, env| {
            kind.before_update(env)?;
            env.call(
                "update",
                &hooks.update,
                (env.context().clone(), delta_seconds as FLOAT),
            )?;
            Ok(())
        })
    }
}

struct Worker {
    stop: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// One scripted driver: identity, bound hooks, run state and optional worker.
///
/// See the module documentation for the lifecycle. Dropping an instance runs
/// [`module_exit`](Self::module_exit) and then releases its script.
pub struct DriverInstance<K: ModuleKind> {
    name: String,
    description: String,
    update_interval: Duration,
    running: bool,
    shared: Arc<Shared<K>>,
    worker: Option<Worker>,
}

impl<K: ModuleKind> DriverInstance<K> {
    /// Create an unbound instance named `name`.
    pub fn new(name: impl Into<String>, kind: K, config: &ScriptingConfig) -> Self {
        let name = name.into();
        let context = DriverContext::new(name.clone(), kind.services());
        Self {
            name,
            description: String::new(),
            update_interval: Duration::from_millis(config.default_update_interval_ms),
            running: false,
            shared: Arc::new(Shared {
                context,
                state: Mutex::new(State { kind, bound: None }),
            }),
            worker: None,
        }
    }

    /// Driver name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description from the definition table (empty if none)
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Category of this driver
    pub fn category(&self) -> ModuleCategory {
        K::CATEGORY
    }

    /// True between a successful `init` and `exit`
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// True if `init` asked for a worker thread
    pub fn is_threaded(&self) -> bool {
        self.shared.context.is_threaded()
    }

    /// Worker sleep between `update` calls
    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Bind the definition table's hooks and fields.
    ///
    /// Takes ownership of the module's script; on any failure the script is
    /// dropped and the instance stays unbound, so `module_init` must not be
    /// called.
    pub fn load_from_table(&mut self, script: ModuleScript, table: &Map) -> DriverResult<()> {
        if self.running {
            return Err(DriverError::AlreadyRunning(self.name.clone()));
        }

        let def = Definition::new(&self.name, table, &script);
        let hooks = Hooks {
            init: def.callable("init", 1)?,
            exit: def.callable("exit", 1)?,
            update: def.callable("update", 2)?,
        };
        let description = def.optional_string("description")?;
        let update_interval = def.optional_interval("update_interval_ms")?;

        let mut state = self.shared.lock();
        state.kind.load_derived(&def)?;
        state.bound = Some(Bound { script, hooks });
        drop(state);

        if let Some(description) = description {
            self.description = description;
        }
        if let Some(interval) = update_interval {
            self.update_interval = interval;
        }

        tracing::debug!(driver = %self.name, category = %K::CATEGORY, "Bound module hooks");
        Ok(())
    }

    /// Run the `init` hook; start the worker if the hook asked for one.
    ///
    /// A hook that returns `false` or raises is an [`DriverError::InitFailure`]
    /// and leaves no thread behind.
    pub fn module_init(&mut self) -> DriverResult<()> {
        if self.running {
            return Err(DriverError::AlreadyRunning(self.name.clone()));
        }

        let context = &self.shared.context;
        let outcome = {
            let mut guard = self.shared.lock();
            let State { kind, bound } = &mut *guard;
            let bound = bound.as_ref().ok_or_else(|| DriverError::BindingShape {
                module: self.name.clone(),
                field: "init".to_string(),
                message: "module has not been loaded".to_string(),
            })?;

            context.reset_threaded();
            kind.prepare(context);
            context.begin_init();
            let outcome = bound.script.call(&bound.hooks.init, (context.clone(),));
            context.end_init();
            outcome
        };

        let failure = match outcome {
            Ok(value) if value.as_bool() == Ok(false) => Some("init returned false".to_string()),
            Ok(_) => None,
            Err(e) => Some(e.to_string()),
        };
        if let Some(reason) = failure {
            context.reset_threaded();
            return Err(DriverError::InitFailure {
                module: self.name.clone(),
                reason,
            });
        }

        self.running = true;

        if self.is_threaded() {
            if let Err(e) = self.spawn_worker() {
                // the module may already hold external resources
                self.module_exit();
                return Err(e);
            }
        }

        tracing::info!(
            driver = %self.name,
            category = %K::CATEGORY,
            threaded = self.is_threaded(),
            "Module initialized"
        );
        Ok(())
    }

    /// Run the `update` hook once from the host tick.
    ///
    /// Rejected with [`DriverError::ThreadedUpdate`] for threaded drivers,
    /// whose worker is the only caller of their `update`.
    pub fn module_update(&self, delta_seconds: f32) -> DriverResult<()> {
        if !self.running {
            return Err(DriverError::NotRunning(self.name.clone()));
        }
        if self.is_threaded() {
            tracing::warn!(driver = %self.name, "Host update on a threaded module rejected");
            return Err(DriverError::ThreadedUpdate(self.name.clone()));
        }
        self.shared.update(delta_seconds)
    }

    /// Stop and join the worker, then run the `exit` hook. Idempotent.
    pub fn module_exit(&mut self) {
        if let Some(worker) = self.worker.take() {
            // a send error only means the worker already left its loop
            let _ = worker.stop.send(());
            if worker.handle.join().is_err() {
                tracing::error!(driver = %self.name, "Worker thread panicked");
            }
        }

        if !self.running {
            return;
        }
        self.running = false;

        let result = self.shared.with_hooks(|_, hooks, env| {
            env.call("exit", &hooks.exit, (env.context().clone(),))
        });
        match result {
            Ok(_) => tracing::info!(driver = %self.name, "Module exited"),
            Err(e) => tracing::warn!(driver = %self.name, error = %e, "Module exit hook failed"),
        }
    }

    /// Run `f` against the bound module while holding its state lock.
    pub(crate) fn with_hooks<R>(
        &self,
        f: impl FnOnce(&mut K, &HookEnv<'_>) -> DriverResult<R>,
    ) -> DriverResult<R> {
        if !self.running {
            return Err(DriverError::NotRunning(self.name.clone()));
        }
        self.shared.with_hooks(|kind, _, env| f(kind, env))
    }

    /// Read the category state.
    pub(crate) fn with_kind<R>(&self, f: impl FnOnce(&K) -> R) -> R {
        f(&self.shared.lock().kind)
    }

    fn spawn_worker(&mut self) -> DriverResult<()> {
        let (stop_tx, stop_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let interval = self.update_interval;

        let handle = thread::Builder::new()
            .name(format!("driver-{}", self.name))
            .spawn(move || run_worker(shared, stop_rx, interval))
            .map_err(|source| DriverError::WorkerSpawn {
                module: self.name.clone(),
                source,
            })?;

        self.worker = Some(Worker {
            stop: stop_tx,
            handle,
        });
        Ok(())
    }
}

fn run_worker<K: ModuleKind>(shared: Arc<Shared<K>>, stop: mpsc::Receiver<()>, interval: Duration) {
    let name = shared.context.name().to_string();
    tracing::debug!(driver = %name, interval_ms = interval.as_millis() as u64, "Worker started");

    let mut last = Instant::now();
    loop {
        match stop.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Disconnected) => break,
        }

        let now = Instant::now();
        let delta = now.duration_since(last).as_secs_f32();
        last = now;

        if let Err(e) = shared.update(delta) {
            tracing::warn!(driver = %name, error = %e, "Threaded update failed");
        }

        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::debug!(driver = %name, "Worker stopped");
}

impl<K: ModuleKind> Drop for DriverInstance<K> {
    fn drop(&mut self) {
        self.module_exit();
        self.shared.lock().bound = None;
    }
}

impl<K: ModuleKind> std::fmt::Debug for DriverInstance<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverInstance")
            .field("name", &self.name)
            .field("category", &K::CATEGORY)
            .field("running", &self.running)
            .field("threaded", &self.is_threaded())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{InputEvent, NullInputSink};
    use crate::bus::LocalMessageBus;
    use crate::driver::{InputKind, LightsKind, PeripheralKind};
    use std::io::Write;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn load(body: &str, kind: InputKind) -> DriverInstance<InputKind> {
        let mut file = tempfile::Builder::new().suffix(".rhai").tempfile().unwrap();
        write!(file, "{}", body).unwrap();
        let config = ScriptingConfig::default();
        let (script, table) = ModuleScript::load(file.path(), &config, "Test").unwrap();
        let mut instance = DriverInstance::new("Test", kind, &config);
        instance.load_from_table(script, &table).unwrap();
        instance
    }

    fn recorder() -> (InputKind, UnboundedReceiver<InputEvent>) {
        let (tx, rx) = unbounded_channel();
        (InputKind::new(Arc::new(tx)), rx)
    }

    fn drain(rx: &mut UnboundedReceiver<InputEvent>) -> Vec<String> {
        let mut seen = Vec::new();
        while let Ok(event) = rx.try_recv() {
            seen.push(event.button);
        }
        seen
    }

    const RECORDING: &str = r#"
        #{
            init: |ctx| { ctx.button("init", true); true },
            update: |ctx, dt| { ctx.button("update", true); },
            exit: |ctx| { ctx.button("exit", true); },
        }
    "#;

    #[test]
    fn missing_hook_is_a_binding_error() {
        let mut file = tempfile::Builder::new().suffix(".rhai").tempfile().unwrap();
        write!(file, r#"#{{ init: |ctx| true, update: |ctx, dt| () }}"#).unwrap();
        let config = ScriptingConfig::default();
        let (script, table) = ModuleScript::load(file.path(), &config, "Test").unwrap();

        let mut instance = DriverInstance::new("Test", InputKind::new(Arc::new(NullInputSink)), &config);
        let err = instance.load_from_table(script, &table).unwrap_err();
        assert!(matches!(err, DriverError::BindingShape { ref field, .. } if field == "exit"));

        // unbound instances refuse to initialize
        assert!(instance.module_init().is_err());
        assert!(!instance.is_running());
    }

    /// Bind `body` and return the field named by the resulting shape error.
    fn bad_field<K: ModuleKind>(body: &str, kind: K) -> String {
        let mut file = tempfile::Builder::new().suffix(".rhai").tempfile().unwrap();
        write!(file, "{}", body).unwrap();
        let config = ScriptingConfig::default();
        let (script, table) = ModuleScript::load(file.path(), &config, "Test").unwrap();
        let mut instance = DriverInstance::new("Test", kind, &config);
        match instance.load_from_table(script, &table) {
            Err(DriverError::BindingShape { field, .. }) => field,
            other => panic!("expected a binding error, got {:?}", other),
        }
    }

    /// Definition with valid base hooks plus `extra` fields.
    fn definition(extra: &str) -> String {
        format!("#{{ init: |ctx| true, update: |ctx, dt| {{}}, exit: |ctx| {{}}, {} }}", extra)
    }

    fn null_input() -> InputKind {
        InputKind::new(Arc::new(NullInputSink))
    }

    fn peripheral() -> PeripheralKind {
        PeripheralKind::new(Arc::new(LocalMessageBus::new()))
    }

    #[test]
    fn named_hook_must_exist() {
        let body = r#"#{ init: |ctx| true, update: "nope", exit: |ctx| {} }"#;
        assert_eq!(bad_field(body, null_input()), "update");

        let body = r#"fn stop() {} #{ init: |ctx| true, update: |ctx, dt| {}, exit: Fn("stop") }"#;
        assert_eq!(bad_field(body, null_input()), "exit");

        let body = r#"fn tick(ctx) {} #{ init: |ctx| true, update: Fn("tick"), exit: |ctx| {} }"#;
        assert_eq!(bad_field(body, null_input()), "update");

        let body = r#"#{ init: 42, update: |ctx, dt| {}, exit: |ctx| {} }"#;
        assert_eq!(bad_field(body, null_input()), "init");
    }

    #[test]
    fn update_interval_must_be_positive_integer() {
        for value in ["0", "-5", "\"fast\"", "2.5"] {
            let body = definition(&format!("update_interval_ms: {}", value));
            assert_eq!(bad_field(&body, null_input()), "update_interval_ms", "{}", value);
        }
    }

    #[test]
    fn description_must_be_string() {
        assert_eq!(bad_field(&definition("description: 7"), null_input()), "description");
    }

    #[test]
    fn devices_must_be_string_array() {
        for value in ["\"Pad\"", "[1, 2]", "[\"Pad\", true]"] {
            let body = definition(&format!("devices: {}", value));
            assert_eq!(bad_field(&body, null_input()), "devices", "{}", value);
        }
    }

    #[test]
    fn peripheral_fields_are_checked() {
        assert_eq!(bad_field(&definition("subscriptions: \"ping\""), peripheral()), "subscriptions");
        assert_eq!(bad_field(&definition("subscriptions: [1]"), peripheral()), "subscriptions");
        assert_eq!(bad_field(&definition("message: 42"), peripheral()), "message");
        assert_eq!(bad_field(&definition("message: \"nope\""), peripheral()), "message");
    }

    #[test]
    fn lights_set_is_required_and_checked() {
        assert_eq!(bad_field(&definition(""), LightsKind::new()), "set");
        assert_eq!(bad_field(&definition("set: \"paint\""), LightsKind::new()), "set");
    }

    #[test]
    fn hooks_run_in_lifecycle_order() {
        let (kind, mut rx) = recorder();
        let mut instance = load(RECORDING, kind);

        assert!(matches!(
            instance.module_update(0.016),
            Err(DriverError::NotRunning(_))
        ));

        instance.module_init().unwrap();
        assert!(instance.is_running());
        assert!(!instance.is_threaded());
        instance.module_update(0.016).unwrap();
        instance.module_update(0.016).unwrap();
        instance.module_exit();
        instance.module_exit();

        assert_eq!(drain(&mut rx), ["init", "update", "update", "exit"]);
        assert!(!instance.is_running());
    }

    #[test]
    fn init_returning_false_fails_without_exit() {
        let (kind, mut rx) = recorder();
        let mut instance = load(
            r#"
            #{
                init: |ctx| { ctx.set_threaded(true); false },
                update: |ctx, dt| {},
                exit: |ctx| { ctx.button("exit", true); },
            }
            "#,
            kind,
        );

        let err = instance.module_init().unwrap_err();
        assert!(matches!(err, DriverError::InitFailure { .. }));
        assert!(!instance.is_threaded());
        drop(instance);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn init_raising_is_an_init_failure() {
        let mut instance = load(
            r#"#{ init: |ctx| { throw "no device"; }, update: |ctx, dt| {}, exit: |ctx| {} }"#,
            InputKind::new(Arc::new(NullInputSink)),
        );
        let err = instance.module_init().unwrap_err();
        assert!(err.to_string().contains("no device"));
    }

    #[test]
    fn named_function_hooks_bind() {
        let (kind, mut rx) = recorder();
        let mut instance = load(
            r#"
            fn start(ctx) { ctx.button("init", true); }
            fn stop(ctx) { ctx.button("exit", true); }
            fn tick(ctx, dt) {}
            #{ init: "start", update: Fn("tick"), exit: "stop", update_interval_ms: 5 }
            "#,
            kind,
        );
        assert_eq!(instance.update_interval(), Duration::from_millis(5));
        instance.module_init().unwrap();
        drop(instance);
        assert_eq!(drain(&mut rx), ["init", "exit"]);
    }

    #[test]
    fn threaded_module_self_drives_and_rejects_host_update() {
        let (kind, mut rx) = recorder();
        let mut instance = load(
            r#"
            #{
                update_interval_ms: 1,
                init: |ctx| { ctx.set_threaded(true); ctx.button("init", true); },
                update: |ctx, dt| { ctx.button("update", true); },
                exit: |ctx| { ctx.button("exit", true); },
            }
            "#,
            kind,
        );
        instance.module_init().unwrap();
        assert!(instance.is_threaded());

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut seen = Vec::new();
        while seen.len() < 3 && Instant::now() < deadline {
            seen.extend(drain(&mut rx));
            thread::sleep(Duration::from_millis(1));
        }
        assert!(seen.len() >= 3, "worker never updated: {:?}", seen);

        assert!(matches!(
            instance.module_update(0.016),
            Err(DriverError::ThreadedUpdate(_))
        ));

        drop(instance);
        seen.extend(drain(&mut rx));
        assert_eq!(seen.first().map(String::as_str), Some("init"));
        assert_eq!(seen.last().map(String::as_str), Some("exit"));
        assert_eq!(seen.iter().filter(|b| *b == "exit").count(), 1);
    }
}
