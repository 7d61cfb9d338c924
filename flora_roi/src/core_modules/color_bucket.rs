// THEORY:
// A `ColorBucket` is one of seven coarse, mutually exclusive color classes. Every
// pixel belongs to exactly one bucket. The buckets are what the background
// profiler counts, what the palette normalizer recolors, and what the color
// heuristic selects as "the organ color".
//
// Key architectural principles:
// 1.  **Static lookup, not strings**: the bucket -> (predicate, canonical color)
//     table is a `match` on the enum, so a misspelled bucket cannot compile.
// 2.  **Fixed evaluation order**: `classify` tries black, white, yellow, green,
//     blue, red, then other. The first predicate that holds wins, which keeps the
//     classes disjoint even where the raw predicates overlap.
// 3.  **Fixed tie-break order**: where a choice between buckets must be made by
//     count (profiles, locator), ties go to the bucket listed first in
//     `ColorBucket::ALL`.

use crate::core_modules::pixel::pixel::Pixel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorBucket {
    Red,
    Yellow,
    Blue,
    Green,
    White,
    Black,
    Other,
}

pub const BUCKET_COUNT: usize = 7;

impl ColorBucket {
    /// Enumeration order. Also the tie-break order.
    pub const ALL: [ColorBucket; BUCKET_COUNT] = [
        ColorBucket::Red,
        ColorBucket::Yellow,
        ColorBucket::Blue,
        ColorBucket::Green,
        ColorBucket::White,
        ColorBucket::Black,
        ColorBucket::Other,
    ];

    /// Order in which `classify` evaluates the predicates.
    pub const CLASSIFICATION_ORDER: [ColorBucket; BUCKET_COUNT] = [
        ColorBucket::Black,
        ColorBucket::White,
        ColorBucket::Yellow,
        ColorBucket::Green,
        ColorBucket::Blue,
        ColorBucket::Red,
        ColorBucket::Other,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            ColorBucket::Red => "red",
            ColorBucket::Yellow => "yellow",
            ColorBucket::Blue => "blue",
            ColorBucket::Green => "green",
            ColorBucket::White => "white",
            ColorBucket::Black => "black",
            ColorBucket::Other => "other",
        }
    }

    /// Evaluates this bucket's own predicate, ignoring the other buckets.
    /// `Other` holds exactly when no other predicate does.
    pub fn matches(self, px: &Pixel) -> bool {
        match self {
            ColorBucket::Black => px.is_dark(),
            ColorBucket::White => px.is_bright(),
            ColorBucket::Yellow => px.is_yellowish(),
            ColorBucket::Green => px.green_dominates(),
            ColorBucket::Blue => px.blue_dominates(),
            ColorBucket::Red => px.red_dominates(),
            ColorBucket::Other => !ColorBucket::CLASSIFICATION_ORDER[..BUCKET_COUNT - 1]
                .iter()
                .any(|bucket| bucket.matches(px)),
        }
    }

    /// The representative color a pixel is repainted with.
    pub fn canonical(self) -> Pixel {
        match self {
            ColorBucket::Black => Pixel::new(0, 0, 0),
            ColorBucket::Yellow => Pixel::new(255, 255, 0),
            ColorBucket::Green => Pixel::new(0, 255, 0),
            ColorBucket::Blue => Pixel::new(0, 0, 255),
            ColorBucket::White => Pixel::new(255, 255, 255),
            ColorBucket::Red => Pixel::new(255, 0, 0),
            ColorBucket::Other => Pixel::new(255, 128, 0),
        }
    }
}

impl std::fmt::Display for ColorBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Maps a pixel to exactly one bucket.
pub fn classify(px: &Pixel) -> ColorBucket {
    ColorBucket::CLASSIFICATION_ORDER
        .into_iter()
        .find(|bucket| bucket.matches(px))
        .unwrap_or(ColorBucket::Other)
}

/// Per-bucket pixel counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BucketHistogram {
    counts: [u64; BUCKET_COUNT],
}

impl BucketHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, bucket: ColorBucket) {
        self.counts[bucket.index()] += 1;
    }

    pub fn add_pixel(&mut self, px: &Pixel) {
        self.add(classify(px));
    }

    pub fn count(&self, bucket: ColorBucket) -> u64 {
        self.counts[bucket.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Bucket with the highest non-zero count, skipping `excluded`.
    /// Ties go to the bucket listed first in `ColorBucket::ALL`.
    pub fn dominant_excluding(&self, excluded: Option<ColorBucket>) -> Option<ColorBucket> {
        let mut best: Option<(ColorBucket, u64)> = None;
        for bucket in ColorBucket::ALL {
            if Some(bucket) == excluded {
                continue;
            }
            let count = self.count(bucket);
            if count == 0 {
                continue;
            }
            // Strict comparison keeps the earlier bucket on ties.
            if best.is_none_or(|(_, best_count)| count > best_count) {
                best = Some((bucket, count));
            }
        }
        best.map(|(bucket, _)| bucket)
    }
}
