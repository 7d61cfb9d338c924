// THEORY:
// Palette normalization suppresses background noise before the organ color is
// searched for. Every bucket that is common in the border band is considered
// part of the background, and every pixel of such a bucket is repainted with the
// canonical color of the predominant background bucket. What remains with a
// distinct color afterwards is, presumably, the organ.

use crate::core_modules::background::BackgroundProfile;
use crate::core_modules::color_bucket::{BUCKET_COUNT, classify};
use crate::core_modules::pixel::pixel::Pixel;
use image::RgbImage;

/// Returns a recolored copy of `image`. The input is never modified.
pub fn normalize(image: &RgbImage, profile: &BackgroundProfile, noise_threshold: f64) -> RgbImage {
    let mut noisy = [false; BUCKET_COUNT];
    for bucket in profile.background_buckets(noise_threshold) {
        noisy[bucket.index()] = true;
    }
    let fill = profile.predominant.canonical().to_rgb();

    let mut output = image.clone();
    for (_, _, rgb) in output.enumerate_pixels_mut() {
        if noisy[classify(&Pixel::from(*rgb)).index()] {
            *rgb = fill;
        }
    }
    output
}
