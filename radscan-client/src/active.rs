//! Active object execution model.
//!
//! Every networked component owns exactly one worker task and one
//! unbounded task queue. Public operations on a component are a thin
//! shell that enqueues a closure; the closure runs on the worker with
//! exclusive access to the component's state.
//!
//! Ordering: tasks enqueued from a single task run in enqueue order;
//! tasks from different tasks are serialised but interleave
//! indeterminately. Stopping drains the pending queue before the
//! worker exits - there is no preemptive interrupt, a task already
//! running always completes. A task must never block on the result of
//! another task enqueued on the same worker.

use log::{debug, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

enum Command<S> {
    Call(Task<S>),
    Stop,
}

/// A worker task owning a piece of state, driven by a queue of
/// closures over that state.
pub struct Active<S> {
    name: String,
    tx: mpsc::UnboundedSender<Command<S>>,
    handle: JoinHandle<S>,
}

impl<S: Send + 'static> Active<S> {
    /// Start the worker, taking ownership of the state.
    pub fn spawn(name: impl Into<String>, mut state: S) -> Self {
        let name = name.into();
        let (tx, mut rx) = mpsc::unbounded_channel::<Command<S>>();

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            debug!("{}: worker started", task_name);
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Call(task) => task(&mut state),
                    Command::Stop => {
                        // Drain whatever was enqueued before the stop
                        while let Ok(command) = rx.try_recv() {
                            if let Command::Call(task) = command {
                                task(&mut state);
                            }
                        }
                        break;
                    }
                }
            }
            debug!("{}: worker stopped", task_name);
            state
        });

        Active { name, tx, handle }
    }

    /// Enqueue a closure for the worker. Returns false if the worker
    /// has already stopped.
    pub fn call(&self, task: impl FnOnce(&mut S) + Send + 'static) -> bool {
        self.tx.send(Command::Call(Box::new(task))).is_ok()
    }

    /// A clonable handle other components can enqueue through.
    pub fn handle(&self) -> ActiveHandle<S> {
        ActiveHandle {
            tx: self.tx.clone(),
        }
    }

    /// Drain the queue, stop the worker and get the state back.
    /// Returns `None` if a task panicked and the state is gone.
    pub async fn stop(self) -> Option<S> {
        let _ = self.tx.send(Command::Stop);
        match self.handle.await {
            Ok(state) => Some(state),
            Err(err) => {
                warn!("{}: worker lost: {}", self.name, err);
                None
            }
        }
    }
}

/// Clonable enqueue-only handle onto an [`Active`] worker.
pub struct ActiveHandle<S> {
    tx: mpsc::UnboundedSender<Command<S>>,
}

impl<S> Clone for ActiveHandle<S> {
    fn clone(&self) -> Self {
        ActiveHandle {
            tx: self.tx.clone(),
        }
    }
}

impl<S: Send + 'static> ActiveHandle<S> {
    /// Enqueue a closure; false if the worker has stopped.
    pub fn call(&self, task: impl FnOnce(&mut S) + Send + 'static) -> bool {
        self.tx.send(Command::Call(Box::new(task))).is_ok()
    }
}
