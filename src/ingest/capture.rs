//! Background frame capture.

use anyhow::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::FrameSource;
use crate::frame::Frame;
use crate::frequency::Frequency;
use crate::listeners::{ListenerId, ListenerList};
use crate::slot::LatestSlot;
use crate::worker::WorkerLoop;

type FrameListener = dyn Fn(&Frame) + Send + Sync;

/// Back-off after a failed read so a dead source does not spin.
const READ_ERROR_BACKOFF: Duration = Duration::from_millis(200);

struct CaptureCore {
    source: Mutex<Box<dyn FrameSource>>,
    frequency: Mutex<Frequency>,
    listeners: ListenerList<FrameListener>,
    output: Mutex<Option<Arc<LatestSlot<Frame>>>>,
    frames: AtomicU64,
    frame_interval: Option<Duration>,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl CaptureCore {
    fn capture_once(&self) {
        let started = Instant::now();
        let result = lock(&self.source).next_frame();
        match result {
            Ok(frame) => {
                lock(&self.frequency).tick();
                self.frames.fetch_add(1, Ordering::SeqCst);
                for listener in self.listeners.snapshot() {
                    listener(&frame);
                }
                if let Some(output) = lock(&self.output).as_ref() {
                    output.store(frame);
                }
            }
            Err(e) => {
                log::warn!("frame read failed: {:#}", e);
                std::thread::sleep(READ_ERROR_BACKOFF);
                return;
            }
        }
        if let Some(interval) = self.frame_interval {
            if let Some(rest) = interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }
}

/// Continuous capture loop over a `FrameSource`.
///
/// Listeners run on the capture thread in registration order and only see the
/// frame by reference. The frame itself is then moved into the output slot,
/// if one is set, for the single consumer that needs ownership.
pub struct AsyncCapture {
    core: Arc<CaptureCore>,
    worker: WorkerLoop,
}

impl AsyncCapture {
    /// Capture from `source`, paced to `target_fps` (0 = as fast as the
    /// source delivers). Starts paused.
    pub fn new(source: Box<dyn FrameSource>, target_fps: u32) -> Self {
        let frame_interval =
            (target_fps > 0).then(|| Duration::from_secs_f64(1.0 / f64::from(target_fps)));
        let core = Arc::new(CaptureCore {
            source: Mutex::new(source),
            frequency: Mutex::new(Frequency::default()),
            listeners: ListenerList::new(),
            output: Mutex::new(None),
            frames: AtomicU64::new(0),
            frame_interval,
        });
        let worker = WorkerLoop::new(true);
        let pass_core = core.clone();
        worker.add_listener(move || pass_core.capture_once());
        Self { core, worker }
    }

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.core.listeners.add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.listeners.remove(id)
    }

    /// Move every captured frame into `slot`, replacing any previous output.
    pub fn set_output(&self, slot: Arc<LatestSlot<Frame>>) {
        *lock(&self.core.output) = Some(slot);
    }

    pub fn start(&self) {
        log::info!("capture started on {}", lock(&self.core.source).name());
        self.worker.signal();
    }

    /// Stop after the current frame.
    pub fn pause(&self) {
        self.worker.pause();
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Frames per second over the last second.
    pub fn fps(&self) -> f64 {
        lock(&self.core.frequency).freq()
    }

    pub fn frames_captured(&self) -> u64 {
        self.core.frames.load(Ordering::SeqCst)
    }

    pub fn close(&mut self) -> Result<()> {
        self.worker.close()
    }
}
