//! Debug overlay: primitive masks and tracked points blended over the
//! input frame.

use image::{GrayImage, Rgb, RgbImage};

use crate::geometry::Pose;
use crate::map::{LocalMap, PointStage};

/// Blend factor between the frame and primitive colors.
const MASK_ALPHA: u32 = 2; // 50/50 integer blend

/// Render primitive masks (for matched map primitives only) and the
/// projections of tracked map points onto a copy of `rgb`.
pub fn debug_overlay(
    pose: &Pose,
    rgb: &RgbImage,
    segmentation: &GrayImage,
    map: &LocalMap,
) -> RgbImage {
    let mut canvas = rgb.clone();

    if segmentation.dimensions() == rgb.dimensions() {
        // Label -> color for every matched map primitive.
        let mut colors: [Option<Rgb<u8>>; 256] = [None; 256];
        for primitive in map.primitives() {
            if let Some(label) = primitive.matched_label {
                colors[label as usize] = Some(id_color(primitive.id.0));
            }
        }

        for (x, y, pixel) in canvas.enumerate_pixels_mut() {
            let label = segmentation.get_pixel(x, y).0[0] as usize;
            if let Some(color) = colors[label] {
                for channel in 0..3 {
                    pixel.0[channel] =
                        ((pixel.0[channel] as u32 + color.0[channel] as u32) / MASK_ALPHA) as u8;
                }
            }
        }
    }

    // Tracked points: confirmed in green, staged in yellow.
    let world_to_camera = pose.world_to_camera();
    let intrinsics = map.intrinsics();
    let (width, height) = canvas.dimensions();
    for point in map.points() {
        let Some(pixel) = intrinsics.project(&point.position, &world_to_camera) else {
            continue;
        };
        let color = match point.stage {
            PointStage::Confirmed => Rgb([0, 220, 0]),
            PointStage::Staged => Rgb([230, 200, 0]),
        };
        let (u, v) = (pixel.x.round() as i64, pixel.y.round() as i64);
        for dv in -1..=1i64 {
            for du in -1..=1i64 {
                let (x, y) = (u + du, v + dv);
                if x >= 0 && y >= 0 && x < width as i64 && y < height as i64 {
                    canvas.put_pixel(x as u32, y as u32, color);
                }
            }
        }
    }

    canvas
}

/// Deterministic, well-spread color for a primitive id.
fn id_color(id: u64) -> Rgb<u8> {
    let mut state = id.wrapping_mul(0x9e37_79b9_7f4a_7c15).wrapping_add(0x1234_5678);
    state ^= state >> 33;
    state = state.wrapping_mul(0xff51_afd7_ed55_8ccd);
    state ^= state >> 33;
    Rgb([
        64 + (state & 0xbf) as u8,
        64 + ((state >> 8) & 0xbf) as u8,
        64 + ((state >> 16) & 0xbf) as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_colors_are_deterministic_and_distinct() {
        assert_eq!(id_color(1), id_color(1));
        assert_ne!(id_color(1), id_color(2));
    }
}
