//! Pyramidal Lucas-Kanade optical flow for tracking keypoints between
//! consecutive frames.

use image::{GrayImage, Luma};

/// Tracking settings; the defaults suit inter-frame motion of a few
/// pixels per pyramid level.
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Half-width of the tracking window.
    pub window_radius: i32,
    /// Pyramid levels (1 = no pyramid).
    pub levels: usize,
    /// Iteration cap per level.
    pub max_iterations: usize,
    /// Convergence threshold on the per-iteration update norm.
    pub epsilon: f32,
    /// Minimum smaller eigenvalue of the gradient matrix; below this
    /// the window is textureless and tracking fails.
    pub min_eigenvalue: f32,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            window_radius: 7,
            levels: 3,
            max_iterations: 20,
            epsilon: 0.01,
            min_eigenvalue: 1e-4,
        }
    }
}

pub struct FlowTracker {
    config: FlowConfig,
}

impl FlowTracker {
    pub fn new(config: FlowConfig) -> Self {
        Self { config }
    }

    /// Track `points` from `previous` into `next`. Each output is the
    /// refined position, or `None` when tracking failed.
    pub fn track(
        &self,
        previous: &GrayImage,
        next: &GrayImage,
        points: &[(f32, f32)],
    ) -> Vec<Option<(f32, f32)>> {
        let prev_pyramid = build_pyramid(previous, self.config.levels);
        let next_pyramid = build_pyramid(next, self.config.levels);

        points
            .iter()
            .map(|&p| self.track_point(&prev_pyramid, &next_pyramid, p))
            .collect()
    }

    fn track_point(
        &self,
        prev_pyramid: &[GrayImage],
        next_pyramid: &[GrayImage],
        point: (f32, f32),
    ) -> Option<(f32, f32)> {
        let top = prev_pyramid.len() - 1;
        let scale = (1 << top) as f32;
        let mut guess = (point.0 / scale, point.1 / scale);

        for level in (0..prev_pyramid.len()).rev() {
            let level_scale = (1 << level) as f32;
            let origin = (point.0 / level_scale, point.1 / level_scale);
            guess = self.refine_at_level(&prev_pyramid[level], &next_pyramid[level], origin, guess)?;
            if level > 0 {
                guess = (guess.0 * 2.0, guess.1 * 2.0);
            }
        }

        let (width, height) = next_pyramid[0].dimensions();
        let inside = guess.0 >= 1.0
            && guess.1 >= 1.0
            && guess.0 < width as f32 - 2.0
            && guess.1 < height as f32 - 2.0;
        inside.then_some(guess)
    }

    /// One level of iterative LK: fixed spatial gradients from the
    /// previous image, temporal difference re-sampled each iteration.
    fn refine_at_level(
        &self,
        previous: &GrayImage,
        next: &GrayImage,
        origin: (f32, f32),
        mut guess: (f32, f32),
    ) -> Option<(f32, f32)> {
        let r = self.config.window_radius;

        // Structure tensor over the window.
        let mut gxx = 0.0f32;
        let mut gyy = 0.0f32;
        let mut gxy = 0.0f32;
        let mut gradients = Vec::with_capacity(((2 * r + 1) * (2 * r + 1)) as usize);

        for dy in -r..=r {
            for dx in -r..=r {
                let x = origin.0 + dx as f32;
                let y = origin.1 + dy as f32;
                let gx = (sample(previous, x + 1.0, y) - sample(previous, x - 1.0, y)) * 0.5;
                let gy = (sample(previous, x, y + 1.0) - sample(previous, x, y - 1.0)) * 0.5;
                gradients.push((gx, gy));
                gxx += gx * gx;
                gyy += gy * gy;
                gxy += gx * gy;
            }
        }

        // Reject textureless windows via the smaller eigenvalue.
        let trace = gxx + gyy;
        let det = gxx * gyy - gxy * gxy;
        let discriminant = (trace * trace * 0.25 - det).max(0.0).sqrt();
        let window_area = ((2 * r + 1) * (2 * r + 1)) as f32;
        if (trace * 0.5 - discriminant) / window_area < self.config.min_eigenvalue {
            return None;
        }

        let inv_det = 1.0 / det.max(1e-12);

        for _ in 0..self.config.max_iterations {
            let mut bx = 0.0f32;
            let mut by = 0.0f32;
            let mut index = 0;
            for dy in -r..=r {
                for dx in -r..=r {
                    let x = origin.0 + dx as f32;
                    let y = origin.1 + dy as f32;
                    let difference =
                        sample(previous, x, y) - sample(next, guess.0 + dx as f32, guess.1 + dy as f32);
                    let (gx, gy) = gradients[index];
                    index += 1;
                    bx += difference * gx;
                    by += difference * gy;
                }
            }

            let du = (gyy * bx - gxy * by) * inv_det;
            let dv = (gxx * by - gxy * bx) * inv_det;
            guess.0 += du;
            guess.1 += dv;

            if (du * du + dv * dv).sqrt() < self.config.epsilon {
                break;
            }
        }
        Some(guess)
    }
}

impl Default for FlowTracker {
    fn default() -> Self {
        Self::new(FlowConfig::default())
    }
}

fn build_pyramid(image: &GrayImage, levels: usize) -> Vec<GrayImage> {
    let mut pyramid = vec![image.clone()];
    for _ in 1..levels {
        let previous = pyramid.last().unwrap();
        let (w, h) = previous.dimensions();
        if w < 16 || h < 16 {
            break;
        }
        pyramid.push(halve(previous));
    }
    pyramid
}

/// 2x downsampling with a 2x2 box filter.
fn halve(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    let (half_w, half_h) = (width / 2, height / 2);
    let mut out = GrayImage::new(half_w, half_h);
    for y in 0..half_h {
        for x in 0..half_w {
            let sum = image.get_pixel(2 * x, 2 * y).0[0] as u32
                + image.get_pixel((2 * x + 1).min(width - 1), 2 * y).0[0] as u32
                + image.get_pixel(2 * x, (2 * y + 1).min(height - 1)).0[0] as u32
                + image.get_pixel((2 * x + 1).min(width - 1), (2 * y + 1).min(height - 1)).0[0] as u32;
            out.put_pixel(x, y, Luma([((sum + 2) / 4) as u8]));
        }
    }
    out
}

/// Bilinear intensity sample with border clamping.
fn sample(image: &GrayImage, x: f32, y: f32) -> f32 {
    let (width, height) = image.dimensions();
    let x = x.clamp(0.0, width as f32 - 1.001);
    let y = y.clamp(0.0, height as f32 - 1.001);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = image.get_pixel(x0, y0).0[0] as f32;
    let p10 = image.get_pixel(x1, y0).0[0] as f32;
    let p01 = image.get_pixel(x0, y1).0[0] as f32;
    let p11 = image.get_pixel(x1, y1).0[0] as f32;

    p00 * (1.0 - fx) * (1.0 - fy) + p10 * fx * (1.0 - fy) + p01 * (1.0 - fx) * fy + p11 * fx * fy
}
