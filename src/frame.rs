//! Captured frames and the process-wide monotonic clock they are stamped with.

use image::RgbImage;
use std::sync::OnceLock;
use std::time::Instant;

/// One captured RGB image with its capture time.
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbImage,
    /// Milliseconds on the `monotonic_ms` clock.
    pub timestamp_ms: i64,
}

impl Frame {
    pub fn new(image: RgbImage, timestamp_ms: i64) -> Self {
        Self {
            image,
            timestamp_ms,
        }
    }

    /// Frame stamped with the current monotonic time.
    pub fn now(image: RgbImage) -> Self {
        Self::new(image, monotonic_ms())
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Milliseconds since the first call in this process. Never goes backwards.
pub fn monotonic_ms() -> i64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX)
}
