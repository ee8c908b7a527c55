use rhai::FnPtr;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::instance::{Definition, DriverInstance, HookEnv, ModuleKind};
use crate::bus::{MessageBus, MessageReceiver, MessageSender};
use crate::error::DriverResult;
use crate::modules::ModuleCategory;
use crate::scripting::{CategoryServices, DriverContext};

/// Peripheral capability: a private message queue fed by the host bus.
pub struct PeripheralKind {
    bus: Arc<dyn MessageBus>,
    inbox_tx: MessageSender,
    inbox_rx: MessageReceiver,
    message: Option<FnPtr>,
    subscriptions: Vec<String>,
}

impl PeripheralKind {
    /// Peripheral kind attached to `bus`
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            bus,
            inbox_tx,
            inbox_rx,
            message: None,
            subscriptions: Vec::new(),
        }
    }
}

impl ModuleKind for PeripheralKind {
    const CATEGORY: ModuleCategory = ModuleCategory::Peripheral;

    fn services(&self) -> CategoryServices {
        CategoryServices::Peripheral {
            bus: Arc::clone(&self.bus),
            inbox: self.inbox_tx.clone(),
        }
    }

    fn load_derived(&mut self, def: &Definition<'_>) -> DriverResult<()> {
        self.message = def.optional_callable("message", 2)?;
        self.subscriptions = def.optional_string_list("subscriptions")?;
        Ok(())
    }

    fn prepare(&mut self, ctx: &DriverContext) {
        for message in &self.subscriptions {
            self.bus.subscribe(message, self.inbox_tx.clone());
            tracing::debug!(driver = %ctx.name(), message = %message, "Subscribed to message");
        }
    }

    /// Deliver queued messages. A failing `message` call is logged and does
    /// not hold back the rest of the queue or the `update` that follows.
    fn before_update(&mut self, env: &HookEnv<'_>) -> DriverResult<()> {
        // messages broadcast from inside the hook wait for the next update
        let pending: Vec<String> = std::iter::from_fn(|| self.inbox_rx.try_recv().ok()).collect();
        for message in pending {
            match &self.message {
                Some(hook) => {
                    let args = (env.context().clone(), message.clone());
                    if let Err(e) = env.call("message", hook, args) {
                        tracing::warn!(
                            driver = %env.context().name(),
                            message = %message,
                            error = %e,
                            "Message hook failed"
                        );
                    }
                }
                None => tracing::trace!(
                    driver = %env.context().name(),
                    message = %message,
                    "No message hook; dropped"
                ),
            }
        }
        Ok(())
    }
}

/// An activated peripheral driver.
pub type PeripheralModule = DriverInstance<PeripheralKind>;
