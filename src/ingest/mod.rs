//! Frame sources.
//!
//! - `stub://camera`: synthetic camera with a moving block (`SyntheticCamera`)
//! - `stub://static`: the same camera with the scene frozen
//! - local paths: still images, or a directory of them (`ImageFileSource`)
//!
//! Sources are pulled by `AsyncCapture`, which runs them on a continuous
//! worker and broadcasts every frame.

use anyhow::{anyhow, Result};

pub mod camera;
pub mod capture;
pub mod file;

pub use camera::{CameraDevice, CameraProperty, CameraSource, SyntheticCamera};
pub use capture::AsyncCapture;
pub use file::ImageFileSource;

use crate::frame::Frame;

/// Something that produces frames on demand.
pub trait FrameSource: Send {
    /// Human-readable source identifier for logs.
    fn name(&self) -> &str;

    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame>;
}

/// Open a source by URI. `width`/`height` size synthetic frames and are
/// requested from camera devices.
pub fn open_source(uri: &str, width: u32, height: u32) -> Result<Box<dyn FrameSource>> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(anyhow!("frame source URI is empty"));
    }
    match uri {
        "stub://camera" => Ok(Box::new(CameraSource::new(
            SyntheticCamera::new(),
            width,
            height,
        )?)),
        "stub://static" => Ok(Box::new(CameraSource::new(
            SyntheticCamera::frozen(),
            width,
            height,
        )?)),
        _ if uri.contains("://") => Err(anyhow!(
            "unsupported frame source '{}' (use stub://camera, stub://static or a local path)",
            uri
        )),
        path => Ok(Box::new(ImageFileSource::open(path)?)),
    }
}
