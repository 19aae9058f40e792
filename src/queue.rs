//! Single-consumer task queue
//!
//! Tasks may be enqueued from any thread; one dedicated worker thread runs
//! them one at a time in FIFO order.

use crate::error::{RecogError, RecogResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};

type Handler<T> = Box<dyn FnMut(T) + Send>;

/// Serializes tasks onto one worker thread
pub struct TaskQueue<T: Send + 'static> {
    name: String,
    sender: Mutex<Option<mpsc::Sender<T>>>,
    /// Receiver and handler waiting for `start`
    idle: Mutex<Option<(mpsc::Receiver<T>, Handler<T>)>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    discard: Arc<AtomicBool>,
}

impl<T: Send + 'static> TaskQueue<T> {
    /// Create a stopped queue; tasks enqueued before `start` are kept
    pub fn new<F>(name: &str, handler: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<T>();
        Self {
            name: name.to_string(),
            sender: Mutex::new(Some(sender)),
            idle: Mutex::new(Some((receiver, Box::new(handler)))),
            worker: Mutex::new(None),
            discard: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the worker thread
    pub fn start(&self) -> RecogResult<()> {
        let (receiver, mut handler) = self.idle.lock()?.take().ok_or(RecogError::QueueClosed)?;
        let discard = self.discard.clone();
        let name = self.name.clone();

        let handle = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || {
                info!("⚙️ Task queue '{}' started", name);
                while let Ok(task) = receiver.recv() {
                    if discard.load(Ordering::SeqCst) {
                        debug!("Discarding task on stopped queue '{}'", name);
                        continue;
                    }
                    handler(task);
                }
                info!("⚙️ Task queue '{}' stopped", name);
            })?;

        *self.worker.lock()? = Some(handle);
        Ok(())
    }

    /// Hand a task to the worker; fails once the queue is stopped
    pub fn enqueue(&self, task: T) -> RecogResult<()> {
        let sender = self.sender.lock()?;
        match sender.as_ref() {
            Some(tx) => tx.send(task).map_err(|_| RecogError::QueueClosed),
            None => Err(RecogError::QueueClosed),
        }
    }

    /// Close the queue
    ///
    /// With `wait` the worker finishes every task already enqueued and is
    /// joined. Without it remaining tasks are dropped and the worker is left
    /// to exit on its own.
    pub fn stop(&self, wait: bool) -> RecogResult<()> {
        if !wait {
            self.discard.store(true, Ordering::SeqCst);
        }
        self.sender.lock()?.take();
        self.idle.lock()?.take();

        let handle = self.worker.lock()?.take();
        if let Some(handle) = handle {
            if wait {
                if handle.thread().id() == thread::current().id() {
                    warn!("Task queue '{}' stopped from its own worker", self.name);
                } else if handle.join().is_err() {
                    warn!("Task queue '{}' worker panicked", self.name);
                }
            }
        }
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        let has_sender = self.sender.lock().map(|s| s.is_some()).unwrap_or(false);
        let has_worker = self.worker.lock().map(|w| w.is_some()).unwrap_or(false);
        has_sender && has_worker
    }
}

impl<T: Send + 'static> Drop for TaskQueue<T> {
    fn drop(&mut self) {
        if let Err(e) = self.stop(true) {
            warn!("Failed to stop task queue '{}': {}", self.name, e);
        }
    }
}
