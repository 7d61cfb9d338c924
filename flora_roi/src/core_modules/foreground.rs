// THEORY:
// The `ForegroundLocator` answers one question about a (normalized) image: which
// color, other than the background, covers the most pixels? That bucket is taken
// as the organ's color. `None` means nothing but background was found.
//
// Normalization paints the background with the canonical color of its bucket,
// and a canonical color need not classify back into its own bucket (the
// `Other` fill reads as red). Pixels carrying the fill are therefore skipped
// outright instead of being counted under whatever bucket they classify as.

use crate::core_modules::color_bucket::{BucketHistogram, ColorBucket};
use crate::core_modules::pixel::pixel::Pixel;
use image::RgbImage;

pub fn histogram(image: &RgbImage) -> BucketHistogram {
    let mut histogram = BucketHistogram::new();
    for rgb in image.pixels() {
        histogram.add_pixel(&Pixel::from(rgb));
    }
    histogram
}

pub fn locate(image: &RgbImage, background: ColorBucket) -> Option<ColorBucket> {
    let fill = background.canonical().to_rgb();
    let mut histogram = BucketHistogram::new();
    for rgb in image.pixels().filter(|rgb| **rgb != fill) {
        histogram.add_pixel(&Pixel::from(rgb));
    }
    histogram.dominant_excluding(Some(background))
}
