//! Camera devices behind a small capability interface.

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use rand::Rng;

use super::FrameSource;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CameraProperty {
    Width,
    Height,
    Fps,
}

/// Platform camera. Implementations are picked when the source is opened.
pub trait CameraDevice: Send {
    fn name(&self) -> &str;
    fn open(&mut self) -> Result<()>;
    fn is_open(&self) -> bool;
    /// `None` when the device does not know the property.
    fn get_property(&self, property: CameraProperty) -> Option<f64>;
    fn set_property(&mut self, property: CameraProperty, value: f64) -> Result<()>;
    fn read_frame(&mut self) -> Result<RgbImage>;
}

/// Adapts a `CameraDevice` to `FrameSource`, opening it on first use.
pub struct CameraSource<D: CameraDevice> {
    device: D,
}

impl<D: CameraDevice> CameraSource<D> {
    pub fn new(mut device: D, width: u32, height: u32) -> Result<Self> {
        device.set_property(CameraProperty::Width, f64::from(width))?;
        device.set_property(CameraProperty::Height, f64::from(height))?;
        Ok(Self { device })
    }

    pub fn device(&self) -> &D {
        &self.device
    }
}

impl<D: CameraDevice> FrameSource for CameraSource<D> {
    fn name(&self) -> &str {
        self.device.name()
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if !self.device.is_open() {
            self.device.open()?;
            log::info!(
                "camera {} opened at {}x{}",
                self.device.name(),
                self.device.get_property(CameraProperty::Width).unwrap_or(0.0),
                self.device.get_property(CameraProperty::Height).unwrap_or(0.0)
            );
        }
        Ok(Frame::now(self.device.read_frame()?))
    }
}

/// Synthetic camera: a bright block sliding over a gradient background, with
/// a little sensor noise.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    fps: f64,
    open: bool,
    frozen: bool,
    noise: u8,
    frame_count: u64,
}

impl SyntheticCamera {
    pub fn new() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 30.0,
            open: false,
            frozen: false,
            noise: 4,
            frame_count: 0,
        }
    }

    /// Camera whose scene never changes and has no noise.
    pub fn frozen() -> Self {
        Self {
            frozen: true,
            noise: 0,
            ..Self::new()
        }
    }

    pub fn with_noise(mut self, noise: u8) -> Self {
        self.noise = noise;
        self
    }

    pub fn frames_read(&self) -> u64 {
        self.frame_count
    }

    fn render(&self) -> RgbImage {
        let block = (self.width / 5).max(1);
        let travel = self.width.saturating_sub(block).max(1);
        let step = if self.frozen { 0 } else { self.frame_count };
        let block_x = ((step * 8) % u64::from(travel)) as u32;
        let block_y = self.height.saturating_sub(block) / 2;
        let noise = self.noise;
        let mut rng = rand::thread_rng();

        RgbImage::from_fn(self.width, self.height, |x, y| {
            let inside = x >= block_x && x < block_x + block && y >= block_y && y < block_y + block;
            let base = if inside {
                230
            } else {
                (40 + (x * 60 / self.width.max(1)) + (y * 60 / self.height.max(1))) as u8
            };
            let jitter = if noise > 0 { rng.gen_range(0..=noise) } else { 0 };
            let v = base.saturating_add(jitter);
            Rgb([v, v, v])
        })
    }
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraDevice for SyntheticCamera {
    fn name(&self) -> &str {
        if self.frozen {
            "stub://static"
        } else {
            "stub://camera"
        }
    }

    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn get_property(&self, property: CameraProperty) -> Option<f64> {
        Some(match property {
            CameraProperty::Width => f64::from(self.width),
            CameraProperty::Height => f64::from(self.height),
            CameraProperty::Fps => self.fps,
        })
    }

    fn set_property(&mut self, property: CameraProperty, value: f64) -> Result<()> {
        if !value.is_finite() || value <= 0.0 {
            return Err(anyhow!("invalid value {} for {:?}", value, property));
        }
        match property {
            CameraProperty::Width => self.width = value as u32,
            CameraProperty::Height => self.height = value as u32,
            CameraProperty::Fps => self.fps = value,
        }
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RgbImage> {
        if !self.open {
            return Err(anyhow!("camera {} is not open", self.name()));
        }
        let image = self.render();
        self.frame_count += 1;
        Ok(image)
    }
}
