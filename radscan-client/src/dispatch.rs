//! Per-type message dispatch.
//!
//! Each client façade owns one message dispatcher: an active worker
//! with a `type -> handler` table. Decoded messages are enqueued from
//! the receive path; the worker looks up the handler for the message's
//! type and invokes it with a context handle (through which a handler
//! can send back to the radar) and the message itself.
//!
//! A type with no handler and no `ignore` entry produces one debug log
//! line, repeated at most once per second per type. A panicking
//! handler is caught, logged at error level with the type tag and
//! connection id, and the dispatcher moves on to the next message.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use log::{debug, error};

use crate::active::{Active, ActiveHandle};
use crate::event::ConnectionId;

/// How often an unhandled message type may be logged.
const UNHANDLED_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// A message handler: context handle, connection id, owned message.
/// The handler may retain or move the message. Long work must be
/// re-enqueued onto the user's own worker - the dispatcher thread must
/// not be blocked indefinitely.
pub type Handler<C, M> = Box<dyn FnMut(&C, ConnectionId, M) + Send>;

/// Handler table plus suppression state; lives on the dispatcher's
/// worker while running, and inside the façade while stopped so
/// handlers installed while stopped take effect on the next start.
pub struct DispatchTable<C, M, K> {
    key_of: fn(&M) -> K,
    context: Option<C>,
    handlers: HashMap<K, Handler<C, M>>,
    ignored: HashSet<K>,
    last_unhandled_log: HashMap<K, Instant>,
}

impl<C, M, K> DispatchTable<C, M, K>
where
    K: Eq + Hash + Copy + std::fmt::Display,
{
    pub fn new(key_of: fn(&M) -> K) -> Self {
        DispatchTable {
            key_of,
            context: None,
            handlers: HashMap::new(),
            ignored: HashSet::new(),
            last_unhandled_log: HashMap::new(),
        }
    }

    pub fn set_handler(&mut self, key: K, handler: Handler<C, M>) {
        self.ignored.remove(&key);
        self.handlers.insert(key, handler);
    }

    pub fn remove_handler(&mut self, key: K) {
        self.handlers.remove(&key);
    }

    /// Suppress the "no handler" log for a type without handling it.
    /// Mutually exclusive with having a handler installed.
    pub fn ignore(&mut self, key: K) {
        self.handlers.remove(&key);
        self.ignored.insert(key);
    }

    pub fn set_context(&mut self, context: C) {
        self.context = Some(context);
    }

    pub fn dispatch(&mut self, id: ConnectionId, message: M) {
        let key = (self.key_of)(&message);

        let Some(context) = &self.context else {
            debug!("dispatcher has no context, message {} dropped", key);
            return;
        };

        if let Some(handler) = self.handlers.get_mut(&key) {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(context, id, message)));
            if outcome.is_err() {
                error!(
                    "handler for message type {} on connection {} panicked",
                    key, id
                );
            }
            return;
        }

        if self.ignored.contains(&key) {
            return;
        }

        let now = Instant::now();
        let log_it = self
            .last_unhandled_log
            .get(&key)
            .map(|last| now.duration_since(*last) >= UNHANDLED_LOG_INTERVAL)
            .unwrap_or(true);
        if log_it {
            debug!("no handler for message type {}", key);
            self.last_unhandled_log.insert(key, now);
        }
    }
}

/// The dispatcher itself: a [`DispatchTable`] hosted on an [`Active`]
/// worker while running.
pub struct MessageDispatcher<C, M, K> {
    name: String,
    key_of: fn(&M) -> K,
    stopped: Option<DispatchTable<C, M, K>>,
    worker: Option<Active<DispatchTable<C, M, K>>>,
}

impl<C, M, K> MessageDispatcher<C, M, K>
where
    C: Send + 'static,
    M: Send + 'static,
    K: Eq + Hash + Copy + std::fmt::Display + Send + 'static,
{
    pub fn new(name: impl Into<String>, key_of: fn(&M) -> K) -> Self {
        MessageDispatcher {
            name: name.into(),
            key_of,
            stopped: Some(DispatchTable::new(key_of)),
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Install a handler; replaces any previous handler or ignore
    /// entry for the type. Effective immediately when running,
    /// otherwise on the next start.
    pub fn set_handler(
        &mut self,
        key: K,
        handler: impl FnMut(&C, ConnectionId, M) + Send + 'static,
    ) {
        let handler: Handler<C, M> = Box::new(handler);
        match (&mut self.stopped, &self.worker) {
            (Some(table), _) => table.set_handler(key, handler),
            (None, Some(worker)) => {
                worker.call(move |table| table.set_handler(key, handler));
            }
            (None, None) => {}
        }
    }

    pub fn remove_handler(&mut self, key: K) {
        match (&mut self.stopped, &self.worker) {
            (Some(table), _) => table.remove_handler(key),
            (None, Some(worker)) => {
                worker.call(move |table| table.remove_handler(key));
            }
            (None, None) => {}
        }
    }

    pub fn ignore(&mut self, key: K) {
        match (&mut self.stopped, &self.worker) {
            (Some(table), _) => table.ignore(key),
            (None, Some(worker)) => {
                worker.call(move |table| table.ignore(key));
            }
            (None, None) => {}
        }
    }

    /// Start the worker with the context handlers receive. Idempotent.
    pub fn start(&mut self, context: C) {
        if self.worker.is_some() {
            return;
        }
        let mut table = self
            .stopped
            .take()
            .expect("dispatcher table lost");
        table.set_context(context);
        self.worker = Some(Active::spawn(self.name.clone(), table));
    }

    /// Enqueue-only feed for the receive path. `None` while stopped.
    pub fn feed(&self) -> Option<DispatchFeed<C, M, K>> {
        self.worker.as_ref().map(|worker| DispatchFeed {
            handle: worker.handle(),
        })
    }

    /// Drain queued messages, stop the worker, keep the handler table
    /// for the next start. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            match worker.stop().await {
                Some(mut table) => {
                    table.context = None;
                    self.stopped = Some(table);
                }
                None => {
                    // A handler destroyed the worker; start fresh
                    error!("{}: handler table lost, handlers cleared", self.name);
                    self.stopped = Some(DispatchTable::new(self.key_of));
                }
            }
        }
    }
}

/// Clonable enqueue handle used by receive paths to push messages
/// at the dispatcher.
pub struct DispatchFeed<C, M, K> {
    handle: ActiveHandle<DispatchTable<C, M, K>>,
}

impl<C, M, K> Clone for DispatchFeed<C, M, K> {
    fn clone(&self) -> Self {
        DispatchFeed {
            handle: self.handle.clone(),
        }
    }
}

impl<C, M, K> DispatchFeed<C, M, K>
where
    C: Send + 'static,
    M: Send + 'static,
    K: Eq + Hash + Copy + std::fmt::Display + Send + 'static,
{
    pub fn push(&self, id: ConnectionId, message: M) -> bool {
        self.handle
            .call(move |table| table.dispatch(id, message))
    }
}
