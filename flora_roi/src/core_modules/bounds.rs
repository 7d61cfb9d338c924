// THEORY:
// The `BoundingExtractor` turns "which pixels belong to the organ" into a single
// rectangle and cuts the organ out of the photograph with it.
//
// Key architectural principles & algorithm steps:
// 1.  **Sentinel Start**: The accumulator starts inverted (top at the last row,
//     bottom at row 0, and likewise for columns). Matching pixels can only shrink
//     `top`/`left` and grow `bottom`/`right`, so a selection with no match stays
//     inverted and is reported as empty.
// 2.  **Independent Updates**: Each coordinate is min/max-updated on its own. A
//     single matching row therefore sets both `top` and `bottom`.
// 3.  **Four Inputs, One Shape**: a color predicate, a color bucket, a binary
//     mask, or a list of contour points all feed the same accumulator.
// 4.  **Inclusive Box**: `bottom` and `right` are the last matching row and
//     column; the crop keeps both.

use crate::core_modules::color_bucket::ColorBucket;
use crate::core_modules::pixel::pixel::Pixel;
use image::{GrayImage, RgbImage};
use imageproc::point::Point;

/// Inclusive pixel rectangle. Empty when `top > bottom` or `left > right`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub top: u32,
    pub bottom: u32,
    pub left: u32,
    pub right: u32,
}

impl BoundingBox {
    /// The inverted sentinel for an image of the given size.
    pub fn empty(width: u32, height: u32) -> Self {
        // On one-pixel dimensions `H - 1` would equal `bottom`; raise it so the
        // sentinel stays inverted.
        BoundingBox {
            top: height.saturating_sub(1).max(1),
            bottom: 0,
            left: width.saturating_sub(1).max(1),
            right: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.top > self.bottom || self.left > self.right
    }

    pub fn width(&self) -> u32 {
        if self.is_empty() { 0 } else { self.right - self.left + 1 }
    }

    pub fn height(&self) -> u32 {
        if self.is_empty() { 0 } else { self.bottom - self.top + 1 }
    }

    /// Grows the box to include `(x, y)`.
    pub fn include(&mut self, x: u32, y: u32) {
        self.top = self.top.min(y);
        self.bottom = self.bottom.max(y);
        self.left = self.left.min(x);
        self.right = self.right.max(x);
    }
}

pub mod bounding_extractor {
    use super::*; // Make the box and pixel types from the parent module available.
    use crate::error::{RoiError, RoiResult};
    use std::path::PathBuf;

    /// Tightest box around every pixel for which `predicate` holds.
    pub fn bounds_by_predicate<F>(image: &RgbImage, predicate: F) -> BoundingBox
    where
        F: Fn(&Pixel) -> bool,
    {
        let (width, height) = image.dimensions();
        let mut bounds = BoundingBox::empty(width, height);
        for (x, y, rgb) in image.enumerate_pixels() {
            if predicate(&Pixel::from(rgb)) {
                bounds.include(x, y);
            }
        }
        bounds
    }

    /// Tightest box around the pixels satisfying `bucket`'s own predicate.
    pub fn bounds_by_bucket(image: &RgbImage, bucket: ColorBucket) -> BoundingBox {
        bounds_by_predicate(image, |px| bucket.matches(px))
    }

    /// Tightest box around every non-zero mask pixel.
    pub fn bounds_by_mask(mask: &GrayImage) -> BoundingBox {
        let (width, height) = mask.dimensions();
        let mut bounds = BoundingBox::empty(width, height);
        for (x, y, value) in mask.enumerate_pixels() {
            if value.0[0] != 0 {
                bounds.include(x, y);
            }
        }
        bounds
    }

    /// Tightest box around a contour outline. Points outside the image are ignored.
    pub fn bounds_of_points(points: &[Point<i32>], width: u32, height: u32) -> BoundingBox {
        let mut bounds = BoundingBox::empty(width, height);
        for point in points {
            let (Ok(x), Ok(y)) = (u32::try_from(point.x), u32::try_from(point.y)) else {
                continue;
            };
            if x < width && y < height {
                bounds.include(x, y);
            }
        }
        bounds
    }

    /// Copies the inclusive `bounds` region out of `image`.
    ///
    /// Empty boxes are refused with `EmptySelection`; the returned error carries
    /// no path, callers attach theirs with `RoiError::at`.
    pub fn crop(image: &RgbImage, bounds: &BoundingBox) -> RoiResult<RgbImage> {
        let (width, height) = image.dimensions();
        if bounds.is_empty() || bounds.right >= width || bounds.bottom >= height {
            return Err(RoiError::EmptySelection {
                path: PathBuf::new(),
            });
        }
        Ok(image::imageops::crop_imm(image, bounds.left, bounds.top, bounds.width(), bounds.height()).to_image())
    }
}

#[cfg(test)]
mod tests {
    use super::bounding_extractor::*;
    use super::*;
    use crate::error::RoiError;
    use image::{Luma, Rgb};

    fn yellow_square_scene() -> RgbImage {
        let mut image = RgbImage::from_pixel(20, 20, Rgb([0, 0, 0]));
        for y in 5..15 {
            for x in 5..15 {
                image.put_pixel(x, y, Rgb([255, 255, 0]));
            }
        }
        image
    }

    #[test]
    fn predicate_box_is_tight_and_in_bounds() {
        let image = yellow_square_scene();
        let bounds = bounds_by_bucket(&image, ColorBucket::Yellow);
        assert_eq!(
            bounds,
            BoundingBox {
                top: 5,
                bottom: 14,
                left: 5,
                right: 14
            }
        );
        assert!(!bounds.is_empty());

        let cropped = crop(&image, &bounds).expect("crop");
        assert_eq!(cropped.dimensions(), (10, 10));
        assert!(cropped.pixels().all(|p| *p == Rgb([255, 255, 0])));
    }

    #[test]
    fn single_row_match_sets_both_edges() {
        let mut image = RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]));
        image.put_pixel(3, 6, Rgb([255, 255, 255]));
        image.put_pixel(5, 6, Rgb([255, 255, 255]));
        let bounds = bounds_by_bucket(&image, ColorBucket::White);
        assert_eq!((bounds.top, bounds.bottom), (6, 6));
        assert_eq!((bounds.left, bounds.right), (3, 5));
    }

    #[test]
    fn no_match_is_the_inverted_sentinel_and_cannot_be_cropped() {
        let image = yellow_square_scene();
        let bounds = bounds_by_predicate(&image, |_| false);
        assert_eq!(bounds, BoundingBox::empty(20, 20));
        assert!(bounds.top > bounds.bottom);
        assert!(bounds.is_empty());
        assert!(matches!(crop(&image, &bounds), Err(RoiError::EmptySelection { .. })));
    }

    #[test]
    fn sentinel_stays_inverted_on_one_pixel_images() {
        let image = RgbImage::from_pixel(1, 1, Rgb([0, 0, 0]));
        let bounds = bounds_by_predicate(&image, |_| false);
        assert!(bounds.is_empty());

        let matched = bounds_by_predicate(&image, |_| true);
        assert_eq!(matched, BoundingBox { top: 0, bottom: 0, left: 0, right: 0 });
        assert_eq!(crop(&image, &matched).expect("crop").dimensions(), (1, 1));
    }

    #[test]
    fn mask_and_points_agree() {
        let mut mask = GrayImage::new(30, 20);
        let outline = [(4, 3), (12, 3), (12, 9), (4, 9)];
        for &(x, y) in &outline {
            mask.put_pixel(x, y, Luma([255]));
        }
        let points: Vec<Point<i32>> = outline
            .iter()
            .map(|&(x, y)| Point::new(x as i32, y as i32))
            .collect();
        let from_mask = bounds_by_mask(&mask);
        assert_eq!(from_mask, bounds_of_points(&points, 30, 20));
        assert_eq!((from_mask.width(), from_mask.height()), (9, 7));
    }
}
