//! Background worker executing external actions.

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use crate::config::DispatcherConfig;
use crate::dispatch::handler::{ActionHandler, ExternalCall};
use crate::error::{ExecutionError, FlowError, FlowResult};

/// External actions every rule may name, whether or not a handler is registered yet.
pub const BUILTIN_ACTIONS: [&str; 2] = ["compute_response", "trigger_intent"];

type HandlerMap = HashMap<String, Arc<dyn ActionHandler>>;

enum Msg {
    Call(ExternalCall),
    Flush(Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    failed: AtomicU64,
}

/// Dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Calls a handler completed successfully.
    pub dispatched: u64,
    /// Calls that had no handler, or whose handler failed or panicked.
    pub failed: u64,
    /// Calls rejected because the queue was full or closed.
    pub dropped: u64,
}

/// Runs external actions on a dedicated worker thread.
///
/// `submit` never blocks: when the queue is full the call is dropped and
/// counted. Calls are executed in submission order.
pub struct ActionDispatcher {
    tx: Sender<Msg>,
    handlers: Arc<RwLock<HandlerMap>>,
    counters: Arc<Counters>,
    dropped: AtomicU64,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher").field("stats", &self.stats()).finish_non_exhaustive()
    }
}

impl ActionDispatcher {
    /// Starts the worker thread.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the thread cannot be spawned.
    pub fn new(cfg: &DispatcherConfig) -> FlowResult<Self> {
        let (tx, rx) = bounded::<Msg>(cfg.queue_capacity.max(1));
        let handlers: Arc<RwLock<HandlerMap>> = Arc::new(RwLock::new(HashMap::new()));
        let counters = Arc::new(Counters::default());

        let thread_handlers = Arc::clone(&handlers);
        let thread_counters = Arc::clone(&counters);
        let join = thread::Builder::new()
            .name(cfg.worker_name.clone())
            .spawn(move || worker_loop(&rx, &thread_handlers, &thread_counters))
            .map_err(|e| FlowError::internal(format!("failed to spawn dispatcher worker: {e}")))?;

        Ok(Self {
            tx,
            handlers,
            counters,
            dropped: AtomicU64::new(0),
            join: Mutex::new(Some(join)),
        })
    }

    /// Installs the handler for `action`, returning the one it replaces.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the handler table lock is poisoned.
    pub fn register_handler(
        &self,
        action: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) -> FlowResult<Option<Arc<dyn ActionHandler>>> {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| FlowError::internal("handler table lock poisoned"))?;
        Ok(handlers.insert(action.into(), handler))
    }

    /// Action names a rule may use: the built-in ones plus every registered handler.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the handler table lock is poisoned.
    pub fn known_actions(&self) -> FlowResult<HashSet<String>> {
        let handlers = self
            .handlers
            .read()
            .map_err(|_| FlowError::internal("handler table lock poisoned"))?;
        Ok(BUILTIN_ACTIONS
            .iter()
            .map(|a| (*a).to_string())
            .chain(handlers.keys().cloned())
            .collect())
    }

    /// Non-blocking enqueue. Returns `false` if the call was dropped.
    pub fn submit(&self, call: ExternalCall) -> bool {
        let (id, action) = (call.id, call.action.clone());
        match self.tx.try_send(Msg::Call(call)) {
            Ok(()) => {
                debug!(dispatch_id = %id, action = %action, "external call queued");
                true
            }
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(dispatch_id = %id, action = %action, "dispatch queue full, external call dropped");
                false
            }
        }
    }

    /// Blocks until every call submitted before this one has been handled.
    ///
    /// # Errors
    ///
    /// Returns `Disconnected` if the worker is gone, or an internal error on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> FlowResult<()> {
        let disconnected = || {
            FlowError::Execution(ExecutionError::Disconnected {
                path: "dispatcher".to_string(),
            })
        };
        let (reply_tx, reply_rx) = bounded::<()>(1);
        self.tx
            .send_timeout(Msg::Flush(reply_tx), timeout)
            .map_err(|_| disconnected())?;
        reply_rx
            .recv_timeout(timeout)
            .map_err(|_| FlowError::internal("timed out waiting for the dispatcher"))
    }

    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for ActionDispatcher {
    fn drop(&mut self) {
        // Close the queue so the worker drains it and exits, then join.
        let (closed_tx, _) = bounded::<Msg>(1);
        drop(std::mem::replace(&mut self.tx, closed_tx));

        if let Ok(mut guard) = self.join.lock() {
            if let Some(handle) = guard.take() {
                if handle.join().is_err() {
                    warn!("dispatcher worker panicked");
                }
            }
        }
    }
}

fn worker_loop(rx: &Receiver<Msg>, handlers: &RwLock<HandlerMap>, counters: &Counters) {
    for msg in rx {
        match msg {
            Msg::Call(call) => run(&call, handlers, counters),
            Msg::Flush(reply) => {
                let _ = reply.send(());
            }
        }
    }
}

fn run(call: &ExternalCall, handlers: &RwLock<HandlerMap>, counters: &Counters) {
    let handler = match handlers.read() {
        Ok(map) => map.get(&call.action).cloned(),
        Err(_) => None,
    };
    let Some(handler) = handler else {
        counters.failed.fetch_add(1, Ordering::Relaxed);
        warn!(dispatch_id = %call.id, action = %call.action, rule = %call.rule, "no handler registered for action");
        return;
    };

    match catch_unwind(AssertUnwindSafe(|| handler.handle(call))) {
        Ok(Ok(())) => {
            counters.dispatched.fetch_add(1, Ordering::Relaxed);
            debug!(dispatch_id = %call.id, action = %call.action, "external call handled");
        }
        Ok(Err(err)) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(dispatch_id = %call.id, action = %call.action, rule = %call.rule, error = %err, "external action failed");
        }
        Err(_) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(dispatch_id = %call.id, action = %call.action, rule = %call.rule, "external action handler panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::dispatch::handler::HandlerError;
    use crate::ids::{DispatchId, ItemId};
    use crate::value::Value;

    fn call(action: &str, payload: Vec<Value>) -> ExternalCall {
        ExternalCall {
            id: DispatchId::new(),
            rule: "r".to_string(),
            action: action.to_string(),
            item_id: ItemId::new(),
            payload,
            requested_at: Utc::now(),
        }
    }

    #[test]
    fn runs_handlers_and_counts_outcomes() {
        let dispatcher = ActionDispatcher::new(&DispatcherConfig::default()).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher
            .register_handler(
                "compute_response",
                Arc::new(move |c: &ExternalCall| -> Result<(), HandlerError> {
                    sink.lock().unwrap().push(c.payload.clone());
                    Ok(())
                }),
            )
            .unwrap();
        dispatcher
            .register_handler(
                "trigger_intent",
                Arc::new(|_: &ExternalCall| -> Result<(), HandlerError> { Err(HandlerError::new("intent service down")) }),
            )
            .unwrap();
        dispatcher
            .register_handler("explode", Arc::new(|_: &ExternalCall| -> Result<(), HandlerError> { panic!("boom") }))
            .unwrap();

        assert!(dispatcher.submit(call("compute_response", vec![Value::from("hi")])));
        assert!(dispatcher.submit(call("trigger_intent", Vec::new())));
        assert!(dispatcher.submit(call("explode", Vec::new())));
        assert!(dispatcher.submit(call("unregistered", Vec::new())));
        dispatcher.wait_idle(Duration::from_secs(5)).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![vec![Value::from("hi")]]);
        assert_eq!(
            dispatcher.stats(),
            DispatchStats {
                dispatched: 1,
                failed: 3,
                dropped: 0
            }
        );
    }

    #[test]
    fn full_queue_drops_without_blocking() {
        let cfg = DispatcherConfig {
            queue_capacity: 1,
            ..DispatcherConfig::default()
        };
        let dispatcher = ActionDispatcher::new(&cfg).unwrap();
        let (gate_tx, gate_rx) = bounded::<()>(0);
        dispatcher
            .register_handler(
                "slow",
                Arc::new(move |_: &ExternalCall| -> Result<(), HandlerError> {
                    let _ = gate_rx.recv_timeout(Duration::from_secs(5));
                    Ok(())
                }),
            )
            .unwrap();

        // First call occupies the worker, second fills the queue.
        assert!(dispatcher.submit(call("slow", Vec::new())));
        let mut accepted = 1;
        for _ in 0..10 {
            if dispatcher.submit(call("slow", Vec::new())) {
                accepted += 1;
            }
        }
        assert!(accepted <= 3);
        assert!(dispatcher.stats().dropped >= 8);
        drop(gate_tx);
    }

    #[test]
    fn known_actions_include_builtins_and_registered_handlers() {
        let dispatcher = ActionDispatcher::new(&DispatcherConfig::default()).unwrap();
        dispatcher
            .register_handler("notify", Arc::new(|_: &ExternalCall| -> Result<(), HandlerError> { Ok(()) }))
            .unwrap();
        let known = dispatcher.known_actions().unwrap();
        assert!(known.contains("compute_response"));
        assert!(known.contains("trigger_intent"));
        assert!(known.contains("notify"));
    }
}
