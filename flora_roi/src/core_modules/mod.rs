pub mod background;
pub mod bounds;
pub mod color_bucket;
pub mod contours;
pub mod external;
pub mod foreground;
#[cfg(feature = "opencv")]
pub mod grabcut;
pub mod mask;
pub mod organ;
pub mod palette;
pub mod pixel;
pub mod scratch;
pub mod segmentation;
pub mod utils;
