//! Itinerary changes
//!
//! A `Change` is the unit of replication: the authoritative log produces
//! exactly one per accepted mutation, and mirrors rebuild the itinerary by
//! applying them in version order with the same `ChangeOp::apply`.

use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::trajectory::{validate_all, Itinerary, Time, Trajectory};
use crate::version::{ItineraryVersion, ScheduleVersion};

/// The mutation carried by a change
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ChangeOp {
    /// Replace the whole itinerary
    Set { trajectories: Vec<Arc<Trajectory>> },

    /// Append trajectories to the end of the itinerary
    Extend { trajectories: Vec<Arc<Trajectory>> },

    /// Push back every segment finishing at or after `from`
    Delay { from: Time, duration: Duration },

    /// Remove the trajectories at the given indices
    Erase { range: Range<usize> },

    /// Remove the trajectories at the given indices and insert new ones in
    /// their place
    Replace {
        range: Range<usize>,
        trajectories: Vec<Arc<Trajectory>>,
    },

    /// Drop every trajectory that finishes before `before`
    Cull { before: Time },
}

impl ChangeOp {
    pub fn set(trajectories: Vec<Trajectory>) -> Self {
        ChangeOp::Set {
            trajectories: trajectories.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn extend(trajectories: Vec<Trajectory>) -> Self {
        ChangeOp::Extend {
            trajectories: trajectories.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn delay(from: Time, duration: Duration) -> Self {
        ChangeOp::Delay { from, duration }
    }

    pub fn erase(range: Range<usize>) -> Self {
        ChangeOp::Erase { range }
    }

    pub fn replace(range: Range<usize>, trajectories: Vec<Trajectory>) -> Self {
        ChangeOp::Replace {
            range,
            trajectories: trajectories.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn cull(before: Time) -> Self {
        ChangeOp::Cull { before }
    }

    /// Human-readable name of the operation
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeOp::Set { .. } => "set",
            ChangeOp::Extend { .. } => "extend",
            ChangeOp::Delay { .. } => "delay",
            ChangeOp::Erase { .. } => "erase",
            ChangeOp::Replace { .. } => "replace",
            ChangeOp::Cull { .. } => "cull",
        }
    }

    /// A change that does not depend on any earlier state
    pub fn is_baseline(&self) -> bool {
        matches!(self, ChangeOp::Set { .. })
    }

    /// Apply this operation to an itinerary.
    ///
    /// All validation happens before the first write, so on error the
    /// itinerary is unchanged.
    pub fn apply(&self, itinerary: &mut Itinerary) -> Result<()> {
        match self {
            ChangeOp::Set { trajectories } => {
                validate_all(trajectories)?;
                itinerary.clear();
                itinerary.extend(trajectories);
            }
            ChangeOp::Extend { trajectories } => {
                validate_all(trajectories)?;
                itinerary.extend(trajectories);
            }
            ChangeOp::Delay { from, duration } => {
                let mut delayed = Vec::new();
                for (index, trajectory) in itinerary.iter().enumerate() {
                    if let Some(updated) = trajectory.delayed(*from, *duration)? {
                        delayed.push((index, updated));
                    }
                }
                for (index, updated) in delayed {
                    itinerary.replace_at(index, updated);
                }
            }
            ChangeOp::Erase { range } => {
                itinerary.check_range(range)?;
                itinerary.splice(range.clone(), &[]);
            }
            ChangeOp::Replace {
                range,
                trajectories,
            } => {
                itinerary.check_range(range)?;
                validate_all(trajectories)?;
                itinerary.splice(range.clone(), trajectories);
            }
            ChangeOp::Cull { before } => {
                itinerary.retain(|t| matches!(t.finish_time(), Some(finish) if finish >= *before));
            }
        }
        Ok(())
    }
}

/// An immutable, versioned record of one accepted mutation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Change {
    /// Itinerary version produced by this change
    pub version: ItineraryVersion,

    /// Schedule version at which the change was accepted
    pub schedule_version: ScheduleVersion,

    pub op: ChangeOp,
}

impl Change {
    pub fn new(version: ItineraryVersion, schedule_version: ScheduleVersion, op: ChangeOp) -> Self {
        Self {
            version,
            schedule_version,
            op,
        }
    }
}
