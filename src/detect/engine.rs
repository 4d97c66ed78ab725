use anyhow::{Context, Result};
use image::RgbImage;
use std::borrow::Cow;
use std::path::Path;

use crate::detect::result::Detection;

/// Where model or labelmap bytes come from.
#[derive(Clone, Copy, Debug)]
pub enum AssetSource<'a> {
    Bytes(&'a [u8]),
    Path(&'a Path),
}

impl<'a> AssetSource<'a> {
    pub fn read(&self) -> Result<Cow<'a, [u8]>> {
        match *self {
            AssetSource::Bytes(bytes) => Ok(Cow::Borrowed(bytes)),
            AssetSource::Path(path) => std::fs::read(path)
                .map(Cow::Owned)
                .with_context(|| format!("failed to read {}", path.display())),
        }
    }
}

/// Object detection engine.
///
/// The engine is owned by one detector and only called from its worker
/// thread. Implementations must treat the image as read-only and must not
/// retain it past `invoke`.
pub trait InferenceEngine: Send {
    /// Engine identifier.
    fn name(&self) -> &'static str;

    /// Build the engine from serialized model bytes and a labelmap.
    fn load(&mut self, model: &[u8], labels: &[String]) -> Result<()>;

    fn is_loaded(&self) -> bool;

    /// Run inference on an RGB frame. Scores are not filtered here.
    fn invoke(&mut self, image: &RgbImage) -> Result<Vec<Detection>>;
}
