//! The single-writer task queue.
//!
//! Every mutating datastore operation and every public cursor execution is
//! funneled through one worker thread, so at most one task touches the
//! indexes or the log at a time and the observable order of (index mutation,
//! log append) is exactly submission order.
//!
//! Until the datastore has loaded, the executor is not ready: submissions
//! land in a buffer instead of the queue. The load task itself is submitted
//! force-queued so it bypasses the buffer; when the load succeeds the buffer
//! is drained into the queue in arrival order and the executor turns ready.

use crate::errors::{ErrorKind, LigniteError, LigniteResult};
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct ExecutorState {
    ready: bool,
    buffer: Vec<Task>,
    sender: Option<mpsc::Sender<Task>>,
}

/// A FIFO queue running every task on a single worker thread.
#[derive(Clone)]
pub struct Executor {
    state: Arc<Mutex<ExecutorState>>,
}

impl Executor {
    /// Creates the executor and spawns its worker thread. The executor
    /// starts not-ready.
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel::<Task>();
        thread::Builder::new()
            .name("lignite-executor".to_string())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task();
                }
            })
            .ok();

        Executor {
            state: Arc::new(Mutex::new(ExecutorState {
                ready: false,
                buffer: Vec::new(),
                sender: Some(sender),
            })),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// Marks the executor ready and drains the pre-ready buffer into the
    /// queue in arrival order.
    pub fn set_ready(&self) {
        let mut state = self.state.lock();
        state.ready = true;
        let buffered = std::mem::take(&mut state.buffer);
        if let Some(sender) = &state.sender {
            for task in buffered {
                let _ = sender.send(task);
            }
        }
    }

    fn enqueue(&self, task: Task, force_queue: bool) {
        let mut state = self.state.lock();
        if !state.ready && !force_queue {
            state.buffer.push(task);
            return;
        }
        if let Some(sender) = &state.sender {
            let _ = sender.send(task);
        }
    }

    /// Submits a task and blocks until it has run, returning its result.
    ///
    /// A task submitted while not-ready is buffered; the caller then blocks
    /// until the datastore finishes loading and the buffer drains.
    pub fn submit<T, F>(&self, f: F) -> LigniteResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> LigniteResult<T> + Send + 'static,
    {
        self.submit_inner(f, false)
    }

    /// Like [Executor::submit], but bypasses the pre-ready buffer. Only the
    /// load task uses this.
    pub fn submit_forced<T, F>(&self, f: F) -> LigniteResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> LigniteResult<T> + Send + 'static,
    {
        self.submit_inner(f, true)
    }

    fn submit_inner<T, F>(&self, f: F, force_queue: bool) -> LigniteResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> LigniteResult<T> + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        self.enqueue(
            Box::new(move || {
                let _ = sender.send(f());
            }),
            force_queue,
        );
        receiver.recv().unwrap_or_else(|_| {
            Err(LigniteError::new(
                "Executor stopped before the task completed",
                ErrorKind::InternalError,
            ))
        })
    }

    /// Submits a fire-and-forget task; it runs after every task already in
    /// the queue. Used for the TTL sweep's asynchronous removals.
    pub fn submit_detached<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.enqueue(Box::new(f), false);
    }

    /// Closes the queue; tasks already queued still run, new submissions are
    /// dropped.
    pub fn stop(&self) {
        self.state.lock().sender = None;
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}
