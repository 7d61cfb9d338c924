// THEORY:
// The `Pixel` is the smallest unit the ROI engine reasons about. It wraps one RGB
// sample and exposes the single-pixel color heuristics that the color buckets are
// built from. Every heuristic names its channel explicitly, so no rule depends on
// the storage order of the underlying image buffer.
//
// Key principles:
// 1) Single-pixel scope: heuristics never read neighbors.
// 2) Channel names, not positions: `red`, `green` and `blue` are fields.
// 3) Cheap and `Copy`: pixels are created on the fly while scanning images.

pub mod pixel {
    use image::Rgb;

    pub type Channel = u8;

    /// Upper bound (exclusive) for a channel to count as dark.
    pub const DARK_LIMIT: Channel = 100;
    /// Lower bound (exclusive) for a channel to count as bright.
    pub const BRIGHT_LIMIT: Channel = 175;
    /// Lower bound (exclusive) for the red and green channels of a yellow pixel.
    pub const YELLOW_LIMIT: Channel = 150;

    /// A single RGB sample.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Pixel {
        /// The red channel value (0-255).
        pub red: Channel,
        /// The green channel value (0-255).
        pub green: Channel,
        /// The blue channel value (0-255).
        pub blue: Channel,
    }

    impl Pixel {
        pub const fn new(red: Channel, green: Channel, blue: Channel) -> Self {
            Pixel { red, green, blue }
        }

        pub fn to_rgb(self) -> Rgb<u8> {
            Rgb([self.red, self.green, self.blue])
        }

        /// All three channels are dark.
        pub fn is_dark(&self) -> bool {
            self.red < DARK_LIMIT && self.green < DARK_LIMIT && self.blue < DARK_LIMIT
        }

        /// All three channels are bright.
        pub fn is_bright(&self) -> bool {
            self.red > BRIGHT_LIMIT && self.green > BRIGHT_LIMIT && self.blue > BRIGHT_LIMIT
        }

        pub fn is_yellowish(&self) -> bool {
            self.blue < DARK_LIMIT && self.green > YELLOW_LIMIT && self.red > YELLOW_LIMIT
        }

        /// Green strictly exceeds both other channels.
        pub fn green_dominates(&self) -> bool {
            self.green > self.red && self.green > self.blue
        }

        /// Blue strictly exceeds both other channels.
        pub fn blue_dominates(&self) -> bool {
            self.blue > self.red && self.blue > self.green
        }

        /// Red strictly exceeds both other channels.
        pub fn red_dominates(&self) -> bool {
            self.red > self.green && self.red > self.blue
        }
    }

    impl From<Rgb<u8>> for Pixel {
        fn from(rgb: Rgb<u8>) -> Self {
            let [red, green, blue] = rgb.0;
            Pixel { red, green, blue }
        }
    }

    impl From<&Rgb<u8>> for Pixel {
        fn from(rgb: &Rgb<u8>) -> Self {
            Pixel::from(*rgb)
        }
    }

    impl From<Pixel> for Rgb<u8> {
        fn from(pixel: Pixel) -> Self {
            pixel.to_rgb()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::pixel::*;
    use image::Rgb;

    #[test]
    fn channel_names_follow_rgb_storage() {
        let px = Pixel::from(Rgb([10u8, 20, 30]));
        assert_eq!((px.red, px.green, px.blue), (10, 20, 30));
        assert_eq!(px.to_rgb(), Rgb([10, 20, 30]));
    }

    #[test]
    fn limits_are_strict() {
        assert!(!Pixel::new(100, 0, 0).is_dark());
        assert!(Pixel::new(99, 99, 99).is_dark());
        assert!(!Pixel::new(175, 255, 255).is_bright());
        assert!(Pixel::new(176, 176, 176).is_bright());
        assert!(!Pixel::new(200, 200, 0).green_dominates());
        assert!(Pixel::new(151, 151, 99).is_yellowish());
    }
}
