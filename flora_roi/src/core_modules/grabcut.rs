// THEORY:
// Native GrabCut through OpenCV, compiled only with the `opencv` feature. The
// image is handed to OpenCV in BGR order, the algorithm is initialized from the
// seed rectangle, and every pixel labelled definite or probable foreground
// becomes foreground in the returned mask. The call is CPU-bound, so it runs on
// the blocking pool.

use crate::core_modules::external::{ForegroundExtractor, SeedRect};
use crate::core_modules::mask::{BACKGROUND, FOREGROUND, Mask};
use crate::error::{RoiError, RoiResult};
use async_trait::async_trait;
use image::{GrayImage, RgbImage};
use opencv::{
    core::{self, Mat, Rect, Scalar},
    imgproc,
    prelude::*,
};

#[derive(Debug, Clone)]
pub struct GrabCutExtractor {
    iterations: i32,
}

impl GrabCutExtractor {
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1) as i32,
        }
    }
}

fn grab_cut(image: &RgbImage, seed: SeedRect, iterations: i32) -> RoiResult<Mask> {
    let (width, height) = image.dimensions();
    let (rows, cols) = (height as i32, width as i32);

    let mut rgb = Mat::new_rows_cols_with_default(rows, cols, core::CV_8UC3, Scalar::all(0.0))?;
    rgb.data_bytes_mut()?.copy_from_slice(image.as_raw());
    let mut bgr = Mat::default();
    imgproc::cvt_color(&rgb, &mut bgr, imgproc::COLOR_RGB2BGR, 0)?;

    let mut labels = Mat::new_rows_cols_with_default(rows, cols, core::CV_8UC1, Scalar::all(0.0))?;
    let mut background_model = Mat::default();
    let mut foreground_model = Mat::default();
    let rect = Rect::new(seed.x as i32, seed.y as i32, seed.width as i32, seed.height as i32);
    imgproc::grab_cut(
        &bgr,
        &mut labels,
        rect,
        &mut background_model,
        &mut foreground_model,
        iterations,
        imgproc::GC_INIT_WITH_RECT,
    )?;

    let fgd = imgproc::GC_FGD as u8;
    let probable_fgd = imgproc::GC_PR_FGD as u8;
    let data: Vec<u8> = labels
        .data_bytes()?
        .iter()
        .map(|&label| {
            if label == fgd || label == probable_fgd {
                FOREGROUND
            } else {
                BACKGROUND
            }
        })
        .collect();
    GrayImage::from_raw(width, height, data)
        .ok_or_else(|| RoiError::external("grabcut", "label matrix has an unexpected size"))
}

#[async_trait]
impl ForegroundExtractor for GrabCutExtractor {
    fn name(&self) -> &str {
        "grabcut"
    }

    async fn extract(&self, _label: &str, image: &RgbImage, seed: SeedRect) -> RoiResult<Mask> {
        let image = image.clone();
        let iterations = self.iterations;
        tokio::task::spawn_blocking(move || grab_cut(&image, seed, iterations))
            .await
            .map_err(|e| RoiError::worker(format!("grabcut task: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[tokio::test]
    async fn finds_a_bright_square_inside_the_seed() {
        let mut image = RgbImage::from_pixel(80, 60, Rgb([20, 60, 20]));
        for y in 20..40 {
            for x in 25..55 {
                image.put_pixel(x, y, Rgb([240, 200, 40]));
            }
        }
        let seed = SeedRect::inset(80, 60, 10).expect("seed");
        let mask = GrabCutExtractor::new(5)
            .extract("square", &image, seed)
            .await
            .expect("grabcut");
        assert_eq!(mask.dimensions(), (80, 60));
        assert_eq!(mask.get_pixel(40, 30).0[0], FOREGROUND);
        assert_eq!(mask.get_pixel(2, 2).0[0], BACKGROUND);
    }
}
