//! Wakeup-driven background worker.
//!
//! A `WorkerLoop` owns one OS thread that sleeps on a condition variable until
//! signaled, runs its registered wakeup listeners in registration order, and
//! goes back to sleep. In continuous mode it keeps running passes back to back
//! until paused.
//!
//! The loop does not catch panics raised by listeners. A panicking listener
//! takes the worker thread down with it; recoverable errors belong inside the
//! listener.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crate::listeners::{ListenerId, ListenerList};

type WakeupListener = dyn Fn() + Send + Sync;

#[derive(Debug, Default)]
struct RunState {
    runnable: bool,
    terminate: bool,
}

struct Shared {
    continuous: bool,
    state: Mutex<RunState>,
    wakeup: Condvar,
    listeners: ListenerList<WakeupListener>,
    passes: AtomicU64,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        // RunState is two flags; a poisoned guard still holds valid values.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background thread that runs its listeners once per `signal()`.
pub struct WorkerLoop {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerLoop {
    /// Spawn the worker thread. The thread starts idle in both modes.
    pub fn new(continuous: bool) -> Self {
        let shared = Arc::new(Shared {
            continuous,
            state: Mutex::new(RunState::default()),
            wakeup: Condvar::new(),
            listeners: ListenerList::new(),
            passes: AtomicU64::new(0),
        });
        let thread_shared = shared.clone();
        let thread = std::thread::spawn(move || run_worker(&thread_shared));
        Self {
            shared,
            thread: Some(thread),
        }
    }

    /// Register a wakeup listener. Listeners run in registration order on the
    /// worker thread.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.listeners.add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    /// Mark the loop runnable and wake the thread. Signals that arrive before
    /// the thread picks them up collapse into a single pass; a signal that
    /// arrives during a pass schedules one more pass.
    pub fn signal(&self) {
        self.shared.lock_state().runnable = true;
        self.shared.wakeup.notify_all();
    }

    /// Mark the loop not runnable. An in-flight pass completes; the flag is
    /// checked before the next idle wait.
    pub fn pause(&self) {
        self.shared.lock_state().runnable = false;
        self.shared.wakeup.notify_all();
    }

    pub fn is_continuous(&self) -> bool {
        self.shared.continuous
    }

    /// True while the loop is scheduled to run another pass.
    pub fn is_running(&self) -> bool {
        self.shared.lock_state().runnable
    }

    /// Number of completed passes since construction.
    pub fn passes(&self) -> u64 {
        self.shared.passes.load(Ordering::SeqCst)
    }

    /// Stop the worker and wait for its thread to exit.
    ///
    /// Returns an error if a listener panicked and killed the thread.
    pub fn close(&mut self) -> Result<()> {
        self.shared.lock_state().terminate = true;
        self.shared.wakeup.notify_all();

        let Some(thread) = self.thread.take() else {
            return Ok(());
        };
        if thread.thread().id() == std::thread::current().id() {
            // Dropped from one of our own listeners; the thread exits on its
            // own once the current pass returns.
            return Ok(());
        }
        thread
            .join()
            .map_err(|_| anyhow!("worker thread terminated by a panicking listener"))
    }
}

impl Drop for WorkerLoop {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("{}", e);
        }
    }
}

fn run_worker(shared: &Shared) {
    let mut state = shared.lock_state();
    loop {
        while !state.runnable && !state.terminate {
            state = shared
                .wakeup
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.terminate {
            break;
        }
        if !shared.continuous {
            // Consume the signal before the pass so a signal raised during the
            // pass is not lost.
            state.runnable = false;
        }
        drop(state);

        for listener in shared.listeners.snapshot() {
            listener();
        }
        shared.passes.fetch_add(1, Ordering::SeqCst);

        state = shared.lock_state();
    }
}
