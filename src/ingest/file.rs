//! Still-image frame source.
//!
//! Reads one image file, or every image in a directory in name order, and
//! cycles through them forever. Files are decoded on each read so edits show
//! up without a restart.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::FrameSource;
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct ImageFileSource {
    name: String,
    paths: Vec<PathBuf>,
    next: usize,
    frames_read: u64,
}

impl ImageFileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let paths = if path.is_dir() {
            let mut paths: Vec<PathBuf> = std::fs::read_dir(path)
                .with_context(|| format!("failed to list {}", path.display()))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| is_image_path(p))
                .collect();
            paths.sort();
            paths
        } else if path.is_file() {
            vec![path.to_path_buf()]
        } else {
            return Err(anyhow!("image source {} does not exist", path.display()));
        };
        if paths.is_empty() {
            return Err(anyhow!("no images found in {}", path.display()));
        }
        Ok(Self {
            name: path.display().to_string(),
            paths,
            next: 0,
            frames_read: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

impl FrameSource for ImageFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn next_frame(&mut self) -> Result<Frame> {
        // Advance first so an undecodable file does not stall the cycle.
        let path = &self.paths[self.next];
        self.next = (self.next + 1) % self.paths.len();
        let image = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();
        self.frames_read += 1;
        Ok(Frame::now(image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tempfile::tempdir;

    #[test]
    fn directory_images_cycle_in_name_order() {
        let dir = tempdir().unwrap();
        RgbImage::from_pixel(4, 4, Rgb([255, 0, 0]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbImage::from_pixel(2, 2, Rgb([0, 255, 0]))
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let mut source = ImageFileSource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);
        let sizes: Vec<(u32, u32)> = (0..3)
            .map(|_| source.next_frame().unwrap().image.dimensions())
            .collect();
        assert_eq!(sizes, vec![(2, 2), (4, 4), (2, 2)]);
        assert_eq!(source.frames_read(), 3);
    }

    #[test]
    fn undecodable_file_is_skipped_on_the_next_read() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"not a jpeg").unwrap();
        RgbImage::from_pixel(3, 3, Rgb([0, 0, 255]))
            .save(dir.path().join("b.png"))
            .unwrap();

        let mut source = ImageFileSource::open(dir.path()).unwrap();
        let results: Vec<bool> = (0..4).map(|_| source.next_frame().is_ok()).collect();
        assert_eq!(results, vec![false, true, false, true]);
        assert_eq!(source.frames_read(), 2);
    }

    #[test]
    fn missing_or_empty_locations_fail() {
        let dir = tempdir().unwrap();
        assert!(ImageFileSource::open(dir.path()).is_err());
        assert!(ImageFileSource::open(dir.path().join("missing.jpg")).is_err());
    }
}
