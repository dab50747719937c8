//! Incremental schedule updates

use serde::{Deserialize, Serialize};

use crate::itinerary::Change;
use crate::version::{ParticipantId, ScheduleVersion};

/// Changes of one participant carried by a `Patch`, oldest first.
///
/// Starts with a baseline `Set` when the source no longer retains every
/// change the receiver is missing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantPatch {
    pub participant: ParticipantId,
    pub changes: Vec<Change>,
}

/// Everything that changed after some schedule version for the
/// participants matching a query
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub participants: Vec<ParticipantPatch>,

    /// Schedule version when the patch was assembled. Pass it as `after`
    /// to fetch the next patch; changes recorded while this one was being
    /// assembled may show up in both and are ingested as duplicates.
    pub latest_version: ScheduleVersion,
}

impl Patch {
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Total number of changes across participants
    pub fn change_count(&self) -> usize {
        self.participants.iter().map(|p| p.changes.len()).sum()
    }
}
