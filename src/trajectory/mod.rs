//! Trajectory and itinerary value types
//!
//! The schedule treats motion as opaque: a trajectory is a map name, a pool
//! of profiles and a list of time-stamped segments whose control data is
//! only interpreted by the motion/geometry collaborators.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};
use crate::geometry::ShapeId;

/// Absolute time used throughout the schedule
pub type Time = DateTime<Utc>;

/// Key of a profile within a trajectory's profile pool
pub type ProfileId = u32;

/// The physical extent of a participant while following a segment
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Shape the participant occupies
    pub footprint: ShapeId,

    /// Shape around the participant that other traffic should keep clear of
    pub vicinity: Option<ShapeId>,
}

impl Profile {
    pub fn new(footprint: ShapeId) -> Self {
        Self {
            footprint,
            vicinity: None,
        }
    }

    pub fn with_vicinity(mut self, vicinity: ShapeId) -> Self {
        self.vicinity = Some(vicinity);
        self
    }
}

/// A time-stamped control point of a trajectory
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Time at which the participant reaches this control point
    pub finish_time: Time,

    /// Position at the finish time (x, y, yaw)
    pub position: [f64; 3],

    /// Velocity at the finish time (x, y, yaw)
    pub velocity: [f64; 3],

    /// Profile in effect while approaching this control point
    pub profile: ProfileId,
}

impl Segment {
    pub fn new(finish_time: Time, position: [f64; 3], velocity: [f64; 3], profile: ProfileId) -> Self {
        Self {
            finish_time,
            position,
            velocity,
            profile,
        }
    }
}

/// A planned path on a single map
///
/// The first segment only encodes initial conditions, so the active interval
/// runs from the first segment's finish time to the last one's.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub map: String,
    pub profiles: BTreeMap<ProfileId, Profile>,
    pub segments: Vec<Segment>,
}

impl Trajectory {
    /// Create an empty trajectory on a map
    pub fn new(map: impl Into<String>) -> Self {
        Self {
            map: map.into(),
            profiles: BTreeMap::new(),
            segments: Vec::new(),
        }
    }

    /// Add a profile to the pool
    pub fn with_profile(mut self, id: ProfileId, profile: Profile) -> Self {
        self.profiles.insert(id, profile);
        self
    }

    /// Append a control point. Ordering is checked by `validate`.
    pub fn with_segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn start_time(&self) -> Option<Time> {
        self.segments.first().map(|s| s.finish_time)
    }

    pub fn finish_time(&self) -> Option<Time> {
        self.segments.last().map(|s| s.finish_time)
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Check that the trajectory can be accepted into an itinerary
    pub fn validate(&self) -> Result<()> {
        if self.map.is_empty() {
            return Err(ScheduleError::MalformedTrajectory(
                "trajectory has an empty map name".to_string(),
            ));
        }

        for pair in self.segments.windows(2) {
            if pair[1].finish_time <= pair[0].finish_time {
                return Err(ScheduleError::MalformedTrajectory(format!(
                    "segment times must strictly increase on map {}: {} is not after {}",
                    self.map, pair[1].finish_time, pair[0].finish_time
                )));
            }
        }

        if let Some(segment) = self
            .segments
            .iter()
            .find(|s| !self.profiles.contains_key(&s.profile))
        {
            return Err(ScheduleError::MalformedTrajectory(format!(
                "segment at {} references unknown profile {}",
                segment.finish_time, segment.profile
            )));
        }

        Ok(())
    }

    /// Whether the active interval intersects `[lower, upper]`. Missing
    /// bounds are open. Empty trajectories are never active.
    pub fn is_active_within(&self, lower: Option<Time>, upper: Option<Time>) -> bool {
        let (Some(start), Some(finish)) = (self.start_time(), self.finish_time()) else {
            return false;
        };

        if matches!(lower, Some(lower) if finish < lower) {
            return false;
        }
        if matches!(upper, Some(upper) if upper < start) {
            return false;
        }
        true
    }

    /// Copy of this trajectory with every segment finishing at or after
    /// `from` pushed back by `delay`. Returns `None` when nothing moves.
    pub fn delayed(&self, from: Time, delay: std::time::Duration) -> Result<Option<Trajectory>> {
        match self.finish_time() {
            Some(finish) if finish >= from => {}
            _ => return Ok(None),
        }

        let shift = chrono::Duration::from_std(delay).map_err(|e| {
            ScheduleError::MalformedTrajectory(format!("delay out of range: {}", e))
        })?;

        let mut delayed = self.clone();
        for segment in delayed.segments.iter_mut().filter(|s| s.finish_time >= from) {
            segment.finish_time = segment
                .finish_time
                .checked_add_signed(shift)
                .ok_or_else(|| {
                    ScheduleError::MalformedTrajectory("delayed time overflows".to_string())
                })?;
        }
        Ok(Some(delayed))
    }
}

/// The trajectories currently planned for one participant, in insertion
/// order. Cloning only copies the outer vector.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Itinerary {
    trajectories: Vec<Arc<Trajectory>>,
}

impl Itinerary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_trajectories(trajectories: Vec<Trajectory>) -> Self {
        Self {
            trajectories: trajectories.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.trajectories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trajectories.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Trajectory>> {
        self.trajectories.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Trajectory>> {
        self.trajectories.iter()
    }

    pub fn trajectories(&self) -> &[Arc<Trajectory>] {
        &self.trajectories
    }

    pub(crate) fn check_range(&self, range: &Range<usize>) -> Result<()> {
        if range.start > range.end || range.end > self.trajectories.len() {
            return Err(ScheduleError::InvalidRange {
                start: range.start,
                end: range.end,
                len: self.trajectories.len(),
            });
        }
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.trajectories.clear();
    }

    pub(crate) fn extend(&mut self, trajectories: &[Arc<Trajectory>]) {
        self.trajectories.extend(trajectories.iter().cloned());
    }

    pub(crate) fn splice(&mut self, range: Range<usize>, trajectories: &[Arc<Trajectory>]) {
        self.trajectories
            .splice(range, trajectories.iter().cloned());
    }

    pub(crate) fn replace_at(&mut self, index: usize, trajectory: Trajectory) {
        self.trajectories[index] = Arc::new(trajectory);
    }

    pub(crate) fn retain(&mut self, keep: impl FnMut(&Arc<Trajectory>) -> bool) {
        self.trajectories.retain(keep);
    }
}

/// Validate every trajectory of a mutation payload
pub fn validate_all(trajectories: &[Arc<Trajectory>]) -> Result<()> {
    trajectories.iter().try_for_each(|t| t.validate())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    /// Time `secs` seconds after the epoch
    pub fn t(secs: i64) -> Time {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    /// A well-formed trajectory with one segment per time
    pub fn trajectory(map: &str, times: &[i64]) -> Trajectory {
        let mut trajectory = Trajectory::new(map).with_profile(0, Profile::new(0));
        for (i, secs) in times.iter().enumerate() {
            trajectory = trajectory.with_segment(Segment::new(
                t(*secs),
                [i as f64, 0.0, 0.0],
                [1.0, 0.0, 0.0],
                0,
            ));
        }
        trajectory
    }
}
