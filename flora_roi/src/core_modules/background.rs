// THEORY:
// The `BackgroundProfile` describes what the edge of a photograph looks like. The
// organ is assumed to sit roughly in the middle of the frame, so the colors found
// in a band along the four borders are taken to be background.
//
// Sampling geometry, for a band of thickness `b`:
//   - the top strip, rows [0, b)
//   - the bottom strip, rows [H-b, H)
//   - the left and right strips, columns [0, b) and [W-b, W), restricted to the
//     middle rows [b, H-b) so no pixel is sampled twice.
// `b` is clamped to a quarter of the smaller dimension, so the strips never
// overlap and always leave an unsampled interior.

use crate::core_modules::color_bucket::{BUCKET_COUNT, BucketHistogram, ColorBucket};
use crate::core_modules::pixel::pixel::Pixel;
use crate::error::{RoiError, RoiResult};
use image::RgbImage;

#[derive(Debug, Clone, PartialEq)]
pub struct BackgroundProfile {
    /// Raw per-bucket counts over the sampled band.
    pub histogram: BucketHistogram,
    /// Fraction of sampled pixels in each bucket, indexed by `ColorBucket::index`.
    pub fractions: [f64; BUCKET_COUNT],
    /// The most frequent bucket in the band.
    pub predominant: ColorBucket,
    /// Band thickness actually used after clamping.
    pub band: u32,
}

impl BackgroundProfile {
    pub fn fraction(&self, bucket: ColorBucket) -> f64 {
        self.fractions[bucket.index()]
    }

    pub fn sampled(&self) -> u64 {
        self.histogram.total()
    }

    /// Buckets frequent enough in the band to count as background.
    pub fn background_buckets(&self, noise_threshold: f64) -> impl Iterator<Item = ColorBucket> + '_ {
        ColorBucket::ALL
            .into_iter()
            .filter(move |bucket| self.fraction(*bucket) > noise_threshold)
    }
}

/// Band thickness after clamping to a quarter of each dimension.
pub fn effective_band(width: u32, height: u32, band_width: u32) -> u32 {
    band_width.min(height / 4).min(width / 4)
}

/// Samples the border band of `image` and builds its color profile.
pub fn profile(image: &RgbImage, band_width: u32) -> RoiResult<BackgroundProfile> {
    let (width, height) = image.dimensions();
    let band = effective_band(width, height, band_width);
    if band == 0 {
        return Err(RoiError::DegenerateImage {
            width,
            height,
            reason: "too small for border sampling",
        });
    }

    let mut histogram = BucketHistogram::new();
    let mut sample = |x: u32, y: u32| histogram.add_pixel(&Pixel::from(image.get_pixel(x, y)));

    for y in (0..band).chain(height - band..height) {
        for x in 0..width {
            sample(x, y);
        }
    }
    for y in band..height - band {
        for x in (0..band).chain(width - band..width) {
            sample(x, y);
        }
    }

    let total = histogram.total() as f64;
    let mut fractions = [0.0; BUCKET_COUNT];
    for bucket in ColorBucket::ALL {
        fractions[bucket.index()] = histogram.count(bucket) as f64 / total;
    }
    // The band is never empty once `band > 0`, so a dominant bucket always exists.
    let predominant = histogram
        .dominant_excluding(None)
        .unwrap_or(ColorBucket::Other);

    Ok(BackgroundProfile {
        histogram,
        fractions,
        predominant,
        band,
    })
}
