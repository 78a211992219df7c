//! Error taxonomy for the narration engine.

use crate::book::Coordinate;
use thiserror::Error;

/// Failures the engine can report.
///
/// Foreground variants (`SynthesisFailure`, `PlaybackDeviceFailure`) move the
/// controller back to `Idle` with the coordinate preserved so a retry is a
/// plain `play()`. Background variants are absorbed where they happen.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("speech synthesis failed at {coordinate}: {reason}")]
    SynthesisFailure {
        coordinate: Coordinate,
        reason: String,
    },

    #[error("audio device rejected playback at {coordinate}: {reason}")]
    PlaybackDeviceFailure {
        coordinate: Coordinate,
        reason: String,
    },

    #[error("prefetch of {coordinate} failed: {reason}")]
    PrefetchFailure {
        coordinate: Coordinate,
        reason: String,
    },

    #[error("failed to save progress: {0}")]
    PersistenceFailure(String),

    #[error("{coordinate} is outside the book")]
    InvalidCoordinate { coordinate: Coordinate },
}

impl PlaybackError {
    /// Whether the failure interrupted narration and must reach the user.
    pub fn is_foreground(&self) -> bool {
        matches!(
            self,
            Self::SynthesisFailure { .. } | Self::PlaybackDeviceFailure { .. }
        )
    }
}
