//! Driver state machine.

/// Tracking state of the SLAM driver.
///
/// `Lost` is terminal for the run: there is no relocalization, so every
/// later frame passes through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlamState {
    /// Waiting for a first frame to initialize the map from.
    NotInitialized,
    /// Normal per-frame tracking.
    Tracking,
    /// Tracking failed for good; the pose is frozen.
    Lost,
}

impl Default for SlamState {
    fn default() -> Self {
        Self::NotInitialized
    }
}
