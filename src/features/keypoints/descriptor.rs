//! Binary intensity-comparison descriptors.
//!
//! Each keypoint is described by 256 pairwise intensity tests inside a
//! 31x31 patch, packed into four words. The sampling pattern is drawn
//! once from a seeded generator, so descriptors are comparable across
//! frames and across runs.

use image::GrayImage;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Half-width of the sampling patch.
const PATCH_RADIUS: i32 = 15;
/// Sampling offsets stay within this radius so the 3x3 smoothing
/// window never leaves the patch.
const SAMPLE_RADIUS: i32 = 13;
/// Fixed seed for the pattern; changing it invalidates stored
/// descriptors.
const PATTERN_SEED: u64 = 0x5eed_beef;

/// A 256-bit binary descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor(pub [u64; 4]);

impl Descriptor {
    pub fn zeros() -> Self {
        Self([0; 4])
    }

    /// Number of differing bits, in `0..=256`.
    pub fn hamming(&self, other: &Self) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a ^ b).count_ones())
            .sum()
    }
}

/// Computes descriptors from smoothed pairwise intensity tests.
pub struct DescriptorExtractor {
    pattern: Vec<(i32, i32, i32, i32)>,
}

impl DescriptorExtractor {
    pub fn new() -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(PATTERN_SEED);
        let pattern = (0..256)
            .map(|_| {
                (
                    rng.gen_range(-SAMPLE_RADIUS..=SAMPLE_RADIUS),
                    rng.gen_range(-SAMPLE_RADIUS..=SAMPLE_RADIUS),
                    rng.gen_range(-SAMPLE_RADIUS..=SAMPLE_RADIUS),
                    rng.gen_range(-SAMPLE_RADIUS..=SAMPLE_RADIUS),
                )
            })
            .collect();
        Self { pattern }
    }

    /// Describe the patch around `(x, y)`; `None` when the patch falls
    /// outside the image.
    pub fn compute(&self, image: &GrayImage, x: f32, y: f32) -> Option<Descriptor> {
        let (width, height) = image.dimensions();
        let cx = x.round() as i32;
        let cy = y.round() as i32;
        if cx < PATCH_RADIUS
            || cy < PATCH_RADIUS
            || cx + PATCH_RADIUS >= width as i32
            || cy + PATCH_RADIUS >= height as i32
        {
            return None;
        }

        let mut words = [0u64; 4];
        for (bit, &(x1, y1, x2, y2)) in self.pattern.iter().enumerate() {
            let a = smoothed(image, cx + x1, cy + y1);
            let b = smoothed(image, cx + x2, cy + y2);
            if a < b {
                words[bit / 64] |= 1u64 << (bit % 64);
            }
        }
        Some(Descriptor(words))
    }
}

impl Default for DescriptorExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// 3x3 box average, noise-robust replacement for a single pixel read.
fn smoothed(image: &GrayImage, x: i32, y: i32) -> u32 {
    let mut sum = 0u32;
    for dy in -1..=1 {
        for dx in -1..=1 {
            sum += image.get_pixel((x + dx) as u32, (y + dy) as u32).0[0] as u32;
        }
    }
    sum
}
