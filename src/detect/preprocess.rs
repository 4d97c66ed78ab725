//! Cheap frame preprocessing for the motion gate.

use image::{imageops, GrayImage, RgbImage};

/// Grayscale conversion followed by a Gaussian blur. A non-positive sigma
/// skips the blur.
pub fn preprocess(image: &RgbImage, blur_sigma: f32) -> GrayImage {
    let gray = imageops::grayscale(image);
    if blur_sigma > 0.0 {
        imageops::blur(&gray, blur_sigma)
    } else {
        gray
    }
}

/// True when any pixel differs by more than `threshold`, or the images have
/// different dimensions.
pub fn exceeds_threshold(a: &GrayImage, b: &GrayImage, threshold: u8) -> bool {
    if a.dimensions() != b.dimensions() {
        return true;
    }
    a.as_raw()
        .iter()
        .zip(b.as_raw())
        .any(|(x, y)| x.abs_diff(*y) > threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    #[test]
    fn preprocess_produces_single_channel_of_same_size() {
        let image = RgbImage::from_pixel(16, 8, Rgb([200, 10, 10]));
        let gray = preprocess(&image, 1.1);
        assert_eq!(gray.dimensions(), (16, 8));
    }

    #[test]
    fn difference_must_strictly_exceed_threshold() {
        let a = GrayImage::from_pixel(4, 4, Luma([100]));
        let mut b = a.clone();
        b.put_pixel(3, 3, Luma([140]));
        assert!(!exceeds_threshold(&a, &b, 40));
        b.put_pixel(3, 3, Luma([141]));
        assert!(exceeds_threshold(&a, &b, 40));
        b.put_pixel(3, 3, Luma([59]));
        assert!(exceeds_threshold(&a, &b, 40));
    }

    #[test]
    fn size_change_counts_as_difference() {
        let a = GrayImage::new(4, 4);
        let b = GrayImage::new(4, 5);
        assert!(exceeds_threshold(&a, &b, 255));
    }
}
