use anyhow::{Context, Result};
use flora_roi::config::RoiConfig;
use flora_roi::core_modules::background;
use flora_roi::core_modules::bounds::bounding_extractor::bounds_by_mask;
use flora_roi::core_modules::foreground;
use flora_roi::core_modules::palette;
use flora_roi::core_modules::segmentation::SegmentationPolicy;
use flora_roi::core_modules::utils::image_helper::image_helper;
use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::env;
use std::path::Path;
use tracing::{info, warn};

const BOX_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

fn main() -> Result<()> {
    // --- 1. Argument Parsing & Setup ---
    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        println!("Usage: roi_inspector <input_image_path> <output_image_path>");
        return Ok(());
    }
    let input_path = Path::new(&args[1]);
    let output_path = Path::new(&args[2]);
    tracing_subscriber::fmt().with_target(false).init();

    // --- 2. Image Loading ---
    let config = RoiConfig::default();
    let image = image_helper::load(input_path)
        .with_context(|| format!("loading {}", input_path.display()))?;
    let (width, height) = image.dimensions();

    // --- 3. Color Heuristic Stages ---
    let profile = background::profile(&image, config.sampling.band_width)
        .context("sampling the background band")?;
    info!(
        predominant = %profile.predominant,
        band = profile.band,
        sampled = profile.sampled(),
        "background profile"
    );
    for bucket in profile.background_buckets(config.sampling.noise_threshold) {
        info!(%bucket, fraction = profile.fraction(bucket), "background bucket");
    }

    let normalized = palette::normalize(&image, &profile, config.sampling.noise_threshold);
    let Some(bucket) = foreground::locate(&normalized, profile.predominant) else {
        warn!("no foreground color stands out; writing the image unmarked");
        image_helper::save_atomically(&image, output_path)?;
        return Ok(());
    };
    // Same mask the color-heuristic handler crops to.
    let selection = SegmentationPolicy::new(&config)
        .segment_color_heuristic(&image)
        .context("color heuristic")?;
    let bounds = bounds_by_mask(&selection.mask);
    if bounds.is_empty() {
        warn!(%bucket, "foreground bucket matched no pixel; writing the image unmarked");
        image_helper::save_atomically(&image, output_path)?;
        return Ok(());
    }
    info!(
        %bucket,
        top = bounds.top,
        bottom = bounds.bottom,
        left = bounds.left,
        right = bounds.right,
        "region of interest"
    );

    // --- 4. Visualization ---
    // Two nested outlines so the box stays visible on busy backgrounds.
    let mut overlay = image.clone();
    let rect = Rect::at(bounds.left as i32, bounds.top as i32).of_size(bounds.width(), bounds.height());
    draw_hollow_rect_mut(&mut overlay, rect, BOX_COLOR);
    if bounds.width() > 2 && bounds.height() > 2 {
        let inner = Rect::at(bounds.left as i32 + 1, bounds.top as i32 + 1)
            .of_size(bounds.width() - 2, bounds.height() - 2);
        draw_hollow_rect_mut(&mut overlay, inner, BOX_COLOR);
    }

    // --- 5. Output ---
    image_helper::save_atomically(&overlay, output_path)
        .with_context(|| format!("writing {}", output_path.display()))?;
    info!(width, height, output = %output_path.display(), "overlay written");
    Ok(())
}
