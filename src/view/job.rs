//! Latest-only job slot and the worker thread that drains it.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

struct SlotState<T> {
    pending: Option<T>,
    quit: bool,
}

/// Single pending job. Sending replaces whatever has not been taken yet.
pub struct LatestJob<T> {
    state: Mutex<SlotState<T>>,
    ready: Condvar,
}

impl<T> Default for LatestJob<T> {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState {
                pending: None,
                quit: false,
            }),
            ready: Condvar::new(),
        }
    }
}

impl<T> LatestJob<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&self, job: T) {
        let mut state = self.state.lock().expect("job slot poisoned");
        state.pending = Some(job);
        self.ready.notify_one();
    }

    /// Wait for a job. `None` once quit.
    pub fn take_blocking(&self) -> Option<T> {
        let state = self.state.lock().expect("job slot poisoned");
        let mut state = self
            .ready
            .wait_while(state, |s| s.pending.is_none() && !s.quit)
            .expect("job slot poisoned");
        if state.quit {
            return None;
        }
        state.pending.take()
    }

    pub fn try_take(&self) -> Option<T> {
        self.state.lock().expect("job slot poisoned").pending.take()
    }

    pub fn quit(&self) {
        let mut state = self.state.lock().expect("job slot poisoned");
        state.quit = true;
        self.ready.notify_all();
    }
}

/// Thread running `handler` on every job taken from its slot. Dropping the
/// worker lets a running job finish, then joins.
pub struct Worker<T: Send + 'static> {
    jobs: Arc<LatestJob<T>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Worker<T> {
    pub fn spawn(name: &str, jobs: Arc<LatestJob<T>>, mut handler: impl FnMut(T) + Send + 'static) -> Self {
        let slot = Arc::clone(&jobs);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while let Some(job) = slot.take_blocking() {
                    handler(job);
                }
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to spawn {} worker: {}", name, e);
                None
            }
        };
        Self { jobs, handle }
    }

    pub fn submit(&self, job: T) {
        self.jobs.send(job);
    }
}

impl<T: Send + 'static> Drop for Worker<T> {
    fn drop(&mut self) {
        self.jobs.quit();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("View worker panicked");
            }
        }
    }
}
