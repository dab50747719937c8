//! Error types for schedule operations

use thiserror::Error;

use crate::version::{ItineraryVersion, ParticipantId};

/// Errors surfaced by the registry, itinerary logs and rectifiers.
///
/// Version gaps seen by a mirror are not errors; they are handled by the
/// rectification state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("Unknown participant: {0}")]
    UnknownParticipant(ParticipantId),

    #[error("Invalid participant description: {0}")]
    InvalidDescription(String),

    #[error("Invalid range {start}..{end} for itinerary of length {len}")]
    InvalidRange { start: usize, end: usize, len: usize },

    #[error("Malformed trajectory: {0}")]
    MalformedTrajectory(String),

    #[error("History expired: version {requested} requested, oldest retained is {oldest}")]
    HistoryExpired {
        requested: ItineraryVersion,
        oldest: ItineraryVersion,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ScheduleError>;
