//! Motion-gated object detection.
//!
//! Frames are handed over through a `LatestSlot` and processed on the
//! detector's own deferred `WorkerLoop`. Each pass decides whether the frame
//! is worth running the engine on:
//!
//! 1. no reference criteria yet: adopt the frame as criteria and infer;
//! 2. an object was seen last time, or the override interval has elapsed
//!    since the last inference: infer;
//! 3. otherwise infer only if some pixel of the blurred grayscale frame
//!    differs from the criteria by more than the diff threshold.
//!
//! The criteria is replaced by the current frame once it is older than the
//! override interval. Every pass emits a `DetectionResult` to the listeners.

use anyhow::{Context, Result};
use image::{GrayImage, RgbImage};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::detect::engine::{AssetSource, InferenceEngine};
use crate::detect::labels::{parse_labelmap, LabelFilter};
use crate::detect::preprocess::{exceeds_threshold, preprocess};
use crate::detect::result::DetectionResult;
use crate::frame::Frame;
use crate::listeners::{ListenerId, ListenerList};
use crate::slot::LatestSlot;
use crate::worker::WorkerLoop;

type ResultListener = dyn Fn(&DetectionResult) + Send + Sync;

/// Motion gate tuning.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MotionConfig {
    /// Force inference when this much time passed since the last one. Also
    /// the maximum age of the reference criteria.
    pub override_interval_ms: i64,
    /// Per-pixel absolute difference that counts as movement.
    pub diff_threshold: u8,
    /// Gaussian blur sigma applied before differencing.
    pub blur_sigma: f32,
    /// Initial score threshold.
    pub score_threshold: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            override_interval_ms: 3000,
            diff_threshold: 40,
            blur_sigma: 1.1,
            score_threshold: 0.5,
        }
    }
}

struct ReferenceCriteria {
    image: GrayImage,
    timestamp_ms: i64,
}

#[derive(Default)]
struct MotionState {
    criteria: Option<ReferenceCriteria>,
    object_detected: bool,
    last_inference_ms: Option<i64>,
}

impl MotionState {
    fn should_infer(&mut self, current: &GrayImage, timestamp_ms: i64, config: &MotionConfig) -> bool {
        let comparable = self
            .criteria
            .as_ref()
            .map_or(false, |c| c.image.dimensions() == current.dimensions());
        if !comparable {
            if self.criteria.is_some() {
                log::debug!(
                    "frame size changed to {}x{}, resetting motion criteria",
                    current.width(),
                    current.height()
                );
            }
            self.criteria = Some(ReferenceCriteria {
                image: current.clone(),
                timestamp_ms,
            });
            return true;
        }
        if self.object_detected {
            return true;
        }
        let overdue = self
            .last_inference_ms
            .map_or(true, |last| timestamp_ms > last + config.override_interval_ms);
        overdue
            || self
                .criteria
                .as_ref()
                .map_or(true, |c| exceeds_threshold(&c.image, current, config.diff_threshold))
    }

    fn refresh_criteria(&mut self, current: GrayImage, timestamp_ms: i64, interval_ms: i64) {
        let stale = self
            .criteria
            .as_ref()
            .map_or(true, |c| c.timestamp_ms + interval_ms < timestamp_ms);
        if stale {
            self.criteria = Some(ReferenceCriteria {
                image: current,
                timestamp_ms,
            });
        }
    }
}

struct DetectorCore {
    config: MotionConfig,
    engine: Mutex<Box<dyn InferenceEngine>>,
    state: Mutex<MotionState>,
    filter: Mutex<LabelFilter>,
    listeners: ListenerList<ResultListener>,
    inference_time_ms: AtomicI64,
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DetectorCore {
    fn process(&self, frame: &Frame) -> DetectionResult {
        let started = Instant::now();
        let current = preprocess(&frame.image, self.config.blur_sigma);
        let ts = frame.timestamp_ms;

        let mut state = lock(&self.state);
        if !state.should_infer(&current, ts, &self.config) {
            state.object_detected = false;
            state.refresh_criteria(current, ts, self.config.override_interval_ms);
            self.record_time(started);
            return None;
        }

        let raw = {
            let mut engine = lock(&self.engine);
            if !engine.is_loaded() {
                log::warn!("frame at {} ms dropped: model not loaded", ts);
                self.record_time(started);
                return None;
            }
            match engine.invoke(&frame.image) {
                Ok(detections) => detections,
                Err(e) => {
                    log::error!("inference failed: {:#}", e);
                    Vec::new()
                }
            }
        };
        let accepted = lock(&self.filter).apply(raw);

        state.last_inference_ms = Some(ts);
        state.object_detected = !accepted.is_empty();
        state.refresh_criteria(current, ts, self.config.override_interval_ms);
        drop(state);

        self.record_time(started);
        if accepted.is_empty() {
            None
        } else {
            Some(accepted)
        }
    }

    fn record_time(&self, started: Instant) {
        let elapsed = i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.inference_time_ms.store(elapsed, Ordering::SeqCst);
    }
}

/// Object detector that skips inference on frames without visible change.
pub struct MotionGatedDetector {
    core: Arc<DetectorCore>,
    input: Arc<LatestSlot<Frame>>,
    worker: WorkerLoop,
}

impl MotionGatedDetector {
    pub fn new<E: InferenceEngine + 'static>(engine: E, config: MotionConfig) -> Self {
        Self::with_boxed_engine(Box::new(engine), config)
    }

    pub fn with_boxed_engine(engine: Box<dyn InferenceEngine>, config: MotionConfig) -> Self {
        let core = Arc::new(DetectorCore {
            config,
            engine: Mutex::new(engine),
            state: Mutex::new(MotionState::default()),
            filter: Mutex::new(LabelFilter::new(config.score_threshold)),
            listeners: ListenerList::new(),
            inference_time_ms: AtomicI64::new(-1),
        });
        let input = Arc::new(LatestSlot::new());
        let worker = WorkerLoop::new(false);

        let pass_core = core.clone();
        let pass_input = input.clone();
        worker.add_listener(move || {
            let Some(frame) = pass_input.take() else {
                return;
            };
            let result = pass_core.process(&frame);
            for listener in pass_core.listeners.snapshot() {
                listener(&result);
            }
        });

        Self {
            core,
            input,
            worker,
        }
    }

    /// Load the model and labelmap into the engine. A second call after a
    /// successful load is a no-op.
    pub fn load_model(&self, model: AssetSource<'_>, labelmap: AssetSource<'_>) -> Result<()> {
        let mut engine = lock(&self.core.engine);
        if engine.is_loaded() {
            log::debug!("{} engine already loaded", engine.name());
            return Ok(());
        }
        let model = model.read().context("failed to read model")?;
        let labels = parse_labelmap(&labelmap.read().context("failed to read labelmap")?)?;
        engine
            .load(&model, &labels)
            .with_context(|| format!("{} engine failed to load model", engine.name()))?;
        log::info!(
            "{} engine loaded ({} bytes, {} labels)",
            engine.name(),
            model.len(),
            labels.len()
        );
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        lock(&self.core.engine).is_loaded()
    }

    pub fn set_score_threshold(&self, threshold: f32) {
        lock(&self.core.filter).set_threshold(threshold);
    }

    pub fn score_threshold(&self) -> f32 {
        lock(&self.core.filter).threshold()
    }

    pub fn add_label(&self, label: impl Into<String>) -> bool {
        lock(&self.core.filter).add_label(label)
    }

    pub fn remove_label(&self, label: &str) -> bool {
        lock(&self.core.filter).remove_label(label)
    }

    /// Desired labels, sorted. Empty means every label is accepted.
    pub fn labels(&self) -> Vec<String> {
        lock(&self.core.filter).labels()
    }

    /// Hand a frame to the detector. Returns immediately; a frame that has
    /// not been picked up yet is replaced.
    pub fn feed(&self, image: RgbImage, timestamp_ms: i64) {
        self.feed_frame(Frame::new(image, timestamp_ms));
    }

    pub fn feed_frame(&self, frame: Frame) {
        self.input.store(frame);
        self.worker.signal();
    }

    /// Register a callback for every pass result. Runs on the detector thread.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&DetectionResult) + Send + Sync + 'static,
    {
        self.core.listeners.add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.core.listeners.remove(id)
    }

    /// Duration of the last pass in milliseconds, -1 before the first one.
    pub fn inference_time_ms(&self) -> i64 {
        self.core.inference_time_ms.load(Ordering::SeqCst)
    }

    /// Whether the last inference accepted at least one detection.
    pub fn object_detected(&self) -> bool {
        lock(&self.core.state).object_detected
    }

    /// Stop the detector thread. Pending frames are discarded.
    pub fn close(&mut self) -> Result<()> {
        self.worker.close()?;
        self.input.reset();
        Ok(())
    }
}
