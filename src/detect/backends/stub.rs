use anyhow::{anyhow, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::detect::engine::InferenceEngine;
use crate::detect::result::Detection;

/// Scripted engine for tests and dry runs.
///
/// Every invocation returns the currently configured detections. Clones share
/// the script and the invocation counter, so a test can keep a handle after
/// giving the engine to a detector.
#[derive(Clone, Default)]
pub struct StubEngine {
    detections: Arc<Mutex<Vec<Detection>>>,
    invocations: Arc<AtomicUsize>,
    label_count: Arc<AtomicUsize>,
    loaded: bool,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stub that is already usable without `load`.
    pub fn preloaded() -> Self {
        Self {
            loaded: true,
            ..Self::default()
        }
    }

    pub fn set_detections(&self, detections: Vec<Detection>) {
        *self
            .detections
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = detections;
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }

    /// Labels received by the last `load`.
    pub fn label_count(&self) -> usize {
        self.label_count.load(Ordering::SeqCst)
    }
}

impl InferenceEngine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn load(&mut self, model: &[u8], labels: &[String]) -> Result<()> {
        if model.is_empty() {
            return Err(anyhow!("empty model"));
        }
        self.label_count.store(labels.len(), Ordering::SeqCst);
        self.loaded = true;
        Ok(())
    }

    fn is_loaded(&self) -> bool {
        self.loaded
    }

    fn invoke(&mut self, _image: &RgbImage) -> Result<Vec<Detection>> {
        if !self.loaded {
            return Err(anyhow!("stub engine used before load"));
        }
        self.invocations.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .detections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
