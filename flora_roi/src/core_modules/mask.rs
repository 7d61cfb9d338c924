// THEORY:
// Binary masks drive every crop. This module owns the cheap path's image
// preparation: grayscale, Gaussian blur, then an Otsu threshold whose polarity is
// chosen per organ. Flowers and fruit are photographed bright against a darker
// field, while leaf scans are dark leaves on a bright scanner bed, so the two
// keep opposite polarities.

use image::{GrayImage, Luma, RgbImage};
use imageproc::contrast::otsu_level;
use imageproc::filter::gaussian_blur_f32;
use serde::{Deserialize, Serialize};

/// Per-pixel foreground label: 0 is background, anything else is foreground.
pub type Mask = GrayImage;

pub const FOREGROUND: u8 = 255;
pub const BACKGROUND: u8 = 0;

/// Which side of the Otsu level is kept as foreground.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdPolarity {
    /// Pixels brighter than the level are foreground.
    BrightForeground,
    /// Pixels at or below the level are foreground.
    DarkForeground,
}

/// Luma conversion followed by a Gaussian blur of standard deviation `sigma`.
pub fn grayscale_blurred(image: &RgbImage, sigma: f32) -> GrayImage {
    let gray = image::imageops::grayscale(image);
    gaussian_blur_f32(&gray, sigma)
}

/// Binarizes `gray` at `level` with the requested polarity.
pub fn threshold_at(gray: &GrayImage, level: u8, polarity: ThresholdPolarity) -> Mask {
    let (width, height) = gray.dimensions();
    GrayImage::from_fn(width, height, |x, y| {
        let above = gray.get_pixel(x, y).0[0] > level;
        let keep = match polarity {
            ThresholdPolarity::BrightForeground => above,
            ThresholdPolarity::DarkForeground => !above,
        };
        Luma([if keep { FOREGROUND } else { BACKGROUND }])
    })
}

/// Otsu threshold of `gray`, returned with the level that was chosen.
pub fn otsu_binary(gray: &GrayImage, polarity: ThresholdPolarity) -> (Mask, u8) {
    let level = otsu_level(gray);
    (threshold_at(gray, level, polarity), level)
}

pub fn foreground_pixels(mask: &Mask) -> usize {
    mask.pixels().filter(|p| p.0[0] != BACKGROUND).count()
}
