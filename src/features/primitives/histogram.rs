//! Directional histogram over planar-cell normals.
//!
//! Region growing seeds from the most populated direction bin, so the
//! dominant surface orientation in the frame is segmented first.

use std::f64::consts::PI;

/// 2D histogram over (polar, azimuth) angles of cell normals.
///
/// Cells are referenced by their grid index; removing a cell never
/// drives its bin negative even if removal is requested twice.
#[derive(Debug)]
pub struct Histogram {
    bins_per_axis: usize,
    counts: Vec<u32>,
    bin_of_cell: Vec<Option<usize>>,
}

impl Histogram {
    pub fn new(bins_per_axis: usize) -> Self {
        Self {
            bins_per_axis,
            counts: vec![0; bins_per_axis * bins_per_axis],
            bin_of_cell: Vec::new(),
        }
    }

    /// Polar/azimuth angles of a unit normal, with the polar axis
    /// pointing camera-ward so frontal planes land near theta = 0.
    pub fn angles_of_normal(normal: &nalgebra::Vector3<f64>) -> (f64, f64) {
        let planar_norm = (normal.x * normal.x + normal.y * normal.y).sqrt();
        let theta = (-normal.z).clamp(-1.0, 1.0).acos();
        let phi = if planar_norm > 0.0 {
            (normal.x / planar_norm).atan2(normal.y / planar_norm)
        } else {
            0.0
        };
        (theta, phi)
    }

    /// Bin every cell whose mask entry is set. `angles[i]` is the
    /// (theta, phi) pair of cell `i`.
    pub fn init(&mut self, angles: &[(f64, f64)], unassigned: &[bool]) {
        debug_assert_eq!(angles.len(), unassigned.len());
        self.counts.fill(0);
        self.bin_of_cell.clear();
        self.bin_of_cell.resize(angles.len(), None);

        for (cell_id, &(theta, phi)) in angles.iter().enumerate() {
            if !unassigned[cell_id] {
                continue;
            }
            let bin = self.bin_index(theta, phi);
            self.bin_of_cell[cell_id] = Some(bin);
            self.counts[bin] += 1;
        }
    }

    fn bin_index(&self, theta: f64, phi: f64) -> usize {
        let b = self.bins_per_axis;
        let x = ((theta / PI) * b as f64) as usize;
        let y = (((phi + PI) / (2.0 * PI)) * b as f64) as usize;
        x.min(b - 1) * b + y.min(b - 1)
    }

    /// Cells belonging to the currently most populated bin. Empty when
    /// the histogram has been drained.
    pub fn points_from_most_frequent_bin(&self, out: &mut Vec<usize>) {
        out.clear();
        let Some((best_bin, &count)) = self
            .counts
            .iter()
            .enumerate()
            .max_by_key(|(_, &count)| count)
        else {
            return;
        };
        if count == 0 {
            return;
        }
        for (cell_id, bin) in self.bin_of_cell.iter().enumerate() {
            if *bin == Some(best_bin) {
                out.push(cell_id);
            }
        }
    }

    /// Remove one cell from its bin.
    pub fn remove_point(&mut self, cell_id: usize) {
        if let Some(bin) = self.bin_of_cell.get_mut(cell_id).and_then(Option::take) {
            self.counts[bin] = self.counts[bin].saturating_sub(1);
        }
    }

    pub fn reset(&mut self) {
        self.counts.fill(0);
        self.bin_of_cell.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn histogram_with(normals: &[Vector3<f64>]) -> Histogram {
        let angles: Vec<(f64, f64)> = normals.iter().map(Histogram::angles_of_normal).collect();
        let mask = vec![true; normals.len()];
        let mut histogram = Histogram::new(20);
        histogram.init(&angles, &mask);
        histogram
    }

    #[test]
    fn parallel_normals_share_a_bin() {
        let n = Vector3::new(0.0, 0.0, -1.0);
        let histogram = histogram_with(&[n, n, n, Vector3::new(-1.0, 0.0, 0.0)]);
        let mut cells = Vec::new();
        histogram.points_from_most_frequent_bin(&mut cells);
        assert_eq!(cells, vec![0, 1, 2]);
    }

    #[test]
    fn removal_moves_majority() {
        let frontal = Vector3::new(0.0, 0.0, -1.0);
        let side = Vector3::new(-1.0, 0.0, 0.0);
        let mut histogram = histogram_with(&[frontal, frontal, side, side, side]);

        histogram.remove_point(2);
        histogram.remove_point(3);
        let mut cells = Vec::new();
        histogram.points_from_most_frequent_bin(&mut cells);
        assert_eq!(cells, vec![0, 1]);
    }

    #[test]
    fn double_removal_is_harmless() {
        let n = Vector3::new(0.0, 0.0, -1.0);
        let mut histogram = histogram_with(&[n]);
        histogram.remove_point(0);
        histogram.remove_point(0);
        let mut cells = Vec::new();
        histogram.points_from_most_frequent_bin(&mut cells);
        assert!(cells.is_empty());
    }

    #[test]
    fn masked_cells_are_ignored() {
        let n = Vector3::new(0.0, 0.0, -1.0);
        let angles: Vec<(f64, f64)> = [n, n].iter().map(Histogram::angles_of_normal).collect();
        let mut histogram = Histogram::new(20);
        histogram.init(&angles, &[true, false]);
        let mut cells = Vec::new();
        histogram.points_from_most_frequent_bin(&mut cells);
        assert_eq!(cells, vec![0]);
    }
}
