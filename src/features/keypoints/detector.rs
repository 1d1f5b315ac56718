//! Segment-test corner detection with a corner-response score.
//!
//! Corners are found with a 16-pixel circle segment test (nine
//! contiguous pixels brighter or darker than the center), scored with a
//! Harris response over a local window, and thinned by grid-based
//! non-maximum suppression.

use image::GrayImage;

/// A detected corner in pixel coordinates.
#[derive(Debug, Clone, Copy)]
pub struct Corner {
    pub x: f32,
    pub y: f32,
    pub response: f32,
}

/// Bresenham circle of radius 3 used by the segment test.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// Contiguous arc length required on the circle.
const ARC_LENGTH: u32 = 9;

pub struct CornerDetector {
    /// Intensity contrast a circle pixel must clear.
    threshold: i16,
    /// Cell side for non-maximum suppression.
    nms_cell: u32,
    /// Cap on returned corners, strongest first.
    max_corners: usize,
}

impl CornerDetector {
    pub fn new(threshold: u32, max_corners: usize) -> Self {
        Self {
            threshold: threshold.min(255) as i16,
            nms_cell: 16,
            max_corners,
        }
    }

    pub fn detect(&self, image: &GrayImage) -> Vec<Corner> {
        let (width, height) = image.dimensions();
        if width < 7 || height < 7 {
            return Vec::new();
        }

        let mut corners = Vec::new();
        for y in 3..height - 3 {
            for x in 3..width - 3 {
                if self.is_corner(image, x, y) {
                    corners.push(Corner {
                        x: x as f32,
                        y: y as f32,
                        response: self.harris_response(image, x, y),
                    });
                }
            }
        }

        let mut strongest = self.grid_suppression(corners, width);
        strongest.sort_by(|a, b| b.response.total_cmp(&a.response));
        strongest.truncate(self.max_corners);
        strongest
    }

    fn is_corner(&self, image: &GrayImage, x: u32, y: u32) -> bool {
        let at = |dx: i32, dy: i32| -> i16 {
            image.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32).0[0] as i16
        };
        let center = at(0, 0);
        let bright = center + self.threshold;
        let dark = center - self.threshold;

        // Cardinal short-circuit: at least three of the four compass
        // pixels must pass for a 9-arc to exist.
        let cardinals = [at(0, -3), at(3, 0), at(0, 3), at(-3, 0)];
        let n_bright = cardinals.iter().filter(|&&p| p > bright).count();
        let n_dark = cardinals.iter().filter(|&&p| p < dark).count();
        if n_bright < 3 && n_dark < 3 {
            return false;
        }

        let ring: [i16; 16] = std::array::from_fn(|i| at(CIRCLE[i].0, CIRCLE[i].1));
        longest_arc(&ring, |p| p > bright) >= ARC_LENGTH || longest_arc(&ring, |p| p < dark) >= ARC_LENGTH
    }

    /// Harris response `det(M) - 0.04 trace(M)^2` over a 5x5 window of
    /// central-difference gradients.
    fn harris_response(&self, image: &GrayImage, x: u32, y: u32) -> f32 {
        let (width, height) = image.dimensions();
        let mut xx = 0.0f32;
        let mut yy = 0.0f32;
        let mut xy = 0.0f32;

        for dy in -2i32..=2 {
            for dx in -2i32..=2 {
                let px = (x as i32 + dx).clamp(1, width as i32 - 2) as u32;
                let py = (y as i32 + dy).clamp(1, height as i32 - 2) as u32;
                let gx = (image.get_pixel(px + 1, py).0[0] as f32
                    - image.get_pixel(px - 1, py).0[0] as f32)
                    * 0.5;
                let gy = (image.get_pixel(px, py + 1).0[0] as f32
                    - image.get_pixel(px, py - 1).0[0] as f32)
                    * 0.5;
                xx += gx * gx;
                yy += gy * gy;
                xy += gx * gy;
            }
        }
        let det = xx * yy - xy * xy;
        let trace = xx + yy;
        det - 0.04 * trace * trace
    }

    /// Keep only the strongest corner per grid cell.
    fn grid_suppression(&self, corners: Vec<Corner>, width: u32) -> Vec<Corner> {
        let cells_per_row = (width / self.nms_cell + 1) as usize;
        let mut best: std::collections::HashMap<usize, Corner> = std::collections::HashMap::new();

        for corner in corners {
            let cell = (corner.y as u32 / self.nms_cell) as usize * cells_per_row
                + (corner.x as u32 / self.nms_cell) as usize;
            match best.get(&cell) {
                Some(existing) if existing.response >= corner.response => {}
                _ => {
                    best.insert(cell, corner);
                }
            }
        }
        best.into_values().collect()
    }
}

/// Longest run (with wrap-around) of circle pixels satisfying `test`.
fn longest_arc(ring: &[i16; 16], test: impl Fn(i16) -> bool) -> u32 {
    let mut run = 0u32;
    let mut longest = 0u32;
    for i in 0..32 {
        if test(ring[i % 16]) {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    longest.min(16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn uniform_image_has_no_corners() {
        let detector = CornerDetector::new(20, 100);
        let image = GrayImage::from_pixel(64, 64, Luma([100]));
        assert!(detector.detect(&image).is_empty());
    }

    #[test]
    fn tiny_image_is_rejected() {
        let detector = CornerDetector::new(20, 100);
        assert!(detector.detect(&GrayImage::new(5, 5)).is_empty());
    }

    #[test]
    fn bright_square_corner_is_found() {
        let detector = CornerDetector::new(20, 100);
        let mut image = GrayImage::from_pixel(64, 64, Luma([30]));
        for y in 20..44 {
            for x in 20..44 {
                image.put_pixel(x, y, Luma([220]));
            }
        }
        let corners = detector.detect(&image);
        assert!(!corners.is_empty());
        // Every detection sits near one of the four square corners.
        for c in &corners {
            let near_x = (c.x - 20.0).abs() < 4.0 || (c.x - 43.0).abs() < 4.0;
            let near_y = (c.y - 20.0).abs() < 4.0 || (c.y - 43.0).abs() < 4.0;
            assert!(near_x && near_y, "corner at ({}, {}) not near square corners", c.x, c.y);
        }
    }

    #[test]
    fn max_corner_cap_is_respected() {
        let detector = CornerDetector::new(10, 5);
        let mut image = GrayImage::from_pixel(128, 128, Luma([10]));
        for by in 0..6u32 {
            for bx in 0..6u32 {
                let x0 = 8 + bx * 20;
                let y0 = 8 + by * 20;
                for y in y0..y0 + 6 {
                    for x in x0..x0 + 6 {
                        image.put_pixel(x, y, Luma([250]));
                    }
                }
            }
        }
        assert!(detector.detect(&image).len() <= 5);
    }
}
