use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use log::{info, warn};

use crate::error::{Result, SyncErr};

/// A cooperative stop flag, checked by a loop once per iteration.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Creates a new, unset `StopSignal`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks every loop watching this signal to stop at its next check.
    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A named background thread with a stop signal.
///
/// Dropping a running task requests it to stop and joins it.
#[derive(Debug)]
pub struct BackgroundTask {
    name: String,
    stop: StopSignal,
    handle: Option<JoinHandle<Result<()>>>,
}

impl BackgroundTask {
    /// Spawns `f` on a new thread.
    ///
    /// # Arguments
    /// * `name` - The thread's name, used in logs and errors.
    /// * `f` - The task body, it receives the signal it must watch.
    ///
    /// # Returns
    /// The running task or `ThreadStart` if the thread couldn't be spawned.
    pub fn spawn<F>(name: impl Into<String>, f: F) -> Result<Self>
    where
        F: FnOnce(StopSignal) -> Result<()> + Send + 'static,
    {
        let name = name.into();
        let stop = StopSignal::new();
        let signal = stop.clone();

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || f(signal))
            .map_err(|source| SyncErr::ThreadStart {
                name: name.clone(),
                source,
            })?;

        info!("started {name}");

        Ok(Self {
            name,
            stop,
            handle: Some(handle),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the thread is still executing its body.
    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Asks the task to stop without waiting for it.
    pub fn request_stop(&self) {
        self.stop.request();
    }

    /// Waits for the task to finish on its own.
    ///
    /// # Returns
    /// The task's own result, or `ThreadJoin` if it panicked.
    pub fn join(mut self) -> Result<()> {
        self.wait()
    }

    /// Requests the task to stop and waits for it.
    pub fn stop(mut self) -> Result<()> {
        self.stop.request();
        self.wait()
    }

    fn wait(&mut self) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        // A thread can't join itself, it is left detached and finishes on its own.
        if handle.thread().id() == thread::current().id() {
            return Ok(());
        }

        let result = handle.join().map_err(|_| SyncErr::ThreadJoin {
            name: self.name.clone(),
        })?;

        info!("stopped {}", self.name);
        result
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop.request();

            if let Err(e) = self.wait() {
                warn!("{} exited with an error: {e}", self.name);
            }
        }
    }
}
