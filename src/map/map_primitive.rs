//! Primitive landmarks stored in the local map.

use crate::features::primitives::Primitive;

/// Unique identifier of a map primitive. Monotonically increasing and
/// never reused; zero is reserved for "unmatched".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapPrimitiveId(pub u64);

impl MapPrimitiveId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for MapPrimitiveId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// A plane or cylinder landmark. The stored observation is refreshed
/// whenever a newly detected primitive matches it.
#[derive(Debug, Clone)]
pub struct MapPrimitive {
    pub id: MapPrimitiveId,
    pub primitive: Primitive,
    /// Segmentation label of the current-frame detection that matched
    /// this landmark, if any.
    pub matched_label: Option<u8>,
    /// Consecutive frames without a match.
    pub unmatched_streak: u32,
}

impl MapPrimitive {
    pub fn new(id: MapPrimitiveId, primitive: Primitive) -> Self {
        Self {
            id,
            primitive,
            matched_label: None,
            unmatched_streak: 0,
        }
    }

    pub fn is_matched(&self) -> bool {
        self.matched_label.is_some()
    }
}
