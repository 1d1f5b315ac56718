//! A 3D landmark tracked across frames.

use nalgebra::{Vector2, Vector3};

use crate::features::keypoints::Descriptor;

/// Unique identifier of a map point. Assigned sequentially; a
/// lightweight handle that avoids shared ownership of the point itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapPointId(pub u64);

impl MapPointId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for MapPointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Two-stage lifecycle: new points are staged and evicted on their
/// first miss; points that keep matching graduate to confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointStage {
    Staged,
    Confirmed,
}

/// A 3D keypoint landmark in the world frame.
#[derive(Debug, Clone)]
pub struct MapPoint {
    pub id: MapPointId,
    pub position: Vector3<f64>,
    pub descriptor: Descriptor,
    /// Pixel where the point was last observed; seeds optical flow.
    pub last_pixel: Vector2<f64>,
    /// Consecutive frames this point has been matched.
    pub age: u32,
    /// Consecutive frames this point has gone unmatched.
    pub unmatched_streak: u32,
    pub stage: PointStage,
    pub matched_this_frame: bool,
    /// Set at creation, cleared the first time the point is offered to
    /// matching; a point cannot be missed before it was searchable.
    pub fresh: bool,
}

impl MapPoint {
    pub fn new_staged(
        id: MapPointId,
        position: Vector3<f64>,
        descriptor: Descriptor,
        pixel: Vector2<f64>,
    ) -> Self {
        Self {
            id,
            position,
            descriptor,
            last_pixel: pixel,
            age: 0,
            unmatched_streak: 0,
            stage: PointStage::Staged,
            matched_this_frame: false,
            fresh: true,
        }
    }

    /// Record a successful match; promotes once the point has survived
    /// `age_liability` consecutive frames.
    pub fn mark_matched(&mut self, pixel: Vector2<f64>, age_liability: u32) {
        self.age += 1;
        self.unmatched_streak = 0;
        self.matched_this_frame = true;
        self.last_pixel = pixel;
        if self.stage == PointStage::Staged && self.age >= age_liability {
            self.stage = PointStage::Confirmed;
        }
    }

    pub fn mark_unmatched(&mut self) {
        self.unmatched_streak += 1;
        self.matched_this_frame = false;
    }

    /// Whether the pruning sweep should drop this point: staged points
    /// die on their first miss, confirmed points after a long streak.
    pub fn should_evict(&self, maximum_unmatched: u32) -> bool {
        match self.stage {
            PointStage::Staged => self.unmatched_streak > 0,
            PointStage::Confirmed => self.unmatched_streak > maximum_unmatched,
        }
    }

    /// Confidence in `[0, 1]`: grows with matched age, shrinks while
    /// the point goes unseen.
    pub fn liability(&self, age_liability: u32) -> f64 {
        let effective = self.age.saturating_sub(self.unmatched_streak);
        (effective as f64 / age_liability.max(1) as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point() -> MapPoint {
        MapPoint::new_staged(
            MapPointId::new(1),
            Vector3::new(0.0, 0.0, 2.0),
            Descriptor::zeros(),
            Vector2::new(10.0, 10.0),
        )
    }

    #[test]
    fn promotion_after_age_liability_matches() {
        let mut p = point();
        for _ in 0..4 {
            p.mark_matched(Vector2::new(10.0, 10.0), 5);
            assert_eq!(p.stage, PointStage::Staged);
        }
        p.mark_matched(Vector2::new(10.0, 10.0), 5);
        assert_eq!(p.stage, PointStage::Confirmed);
        assert!(p.age >= 5);
    }

    #[test]
    fn staged_point_evicted_on_first_miss() {
        let mut p = point();
        p.mark_unmatched();
        assert!(p.should_evict(10));
    }

    #[test]
    fn confirmed_point_survives_until_streak_exceeds_limit() {
        let mut p = point();
        for _ in 0..5 {
            p.mark_matched(Vector2::new(10.0, 10.0), 5);
        }
        for _ in 0..10 {
            p.mark_unmatched();
            assert!(!p.should_evict(10));
        }
        p.mark_unmatched();
        assert!(p.should_evict(10));
    }

    #[test]
    fn liability_saturates_and_decays() {
        let mut p = point();
        assert_eq!(p.liability(5), 0.0);
        for _ in 0..10 {
            p.mark_matched(Vector2::new(0.0, 0.0), 5);
        }
        assert_eq!(p.liability(5), 1.0);
        for _ in 0..8 {
            p.mark_unmatched();
        }
        assert!(p.liability(5) < 1.0);
    }
}
