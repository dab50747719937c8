//! Schedule queries
//!
//! A `Query` combines three independent filters. Each filter is an enum, so
//! exactly one mode is active at a time and switching modes discards the
//! parameters of the previous one. Mode-specific accessors return `None`
//! when a different mode is active.

mod engine;
mod patch;

pub use engine::{ItinerarySource, QueryEngine, QueryResult};
pub use patch::{ParticipantPatch, Patch};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::geometry::Region;
use crate::trajectory::{Time, Trajectory};
use crate::version::{ItineraryVersion, ParticipantId};

/// Maps plus an optional time window, both bounds inclusive
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Timespan {
    pub maps: BTreeSet<String>,
    pub lower: Option<Time>,
    pub upper: Option<Time>,
}

impl Timespan {
    pub fn new<I, S>(maps: I, lower: Option<Time>, upper: Option<Time>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            maps: maps.into_iter().map(Into::into).collect(),
            lower,
            upper,
        }
    }

    /// On a listed map and active at some point within the window
    pub fn admits(&self, trajectory: &Trajectory) -> bool {
        self.maps.contains(&trajectory.map) && trajectory.is_active_within(self.lower, self.upper)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum Spacetime {
    #[default]
    All,
    Regions(Vec<Region>),
    Timespan(Timespan),
}

impl Spacetime {
    pub fn is_all(&self) -> bool {
        matches!(self, Spacetime::All)
    }

    pub fn regions(&self) -> Option<&[Region]> {
        match self {
            Spacetime::Regions(regions) => Some(regions),
            _ => None,
        }
    }

    pub fn timespan(&self) -> Option<&Timespan> {
        match self {
            Spacetime::Timespan(timespan) => Some(timespan),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Versions {
    #[default]
    All,
    /// Only participants whose itinerary version is greater than this.
    ///
    /// Compared against the participant's own `ItineraryVersion`.
    /// `ItinerarySnapshot::schedule_version` is deliberately not consulted
    /// here; schedule-wide "changed since" reads go through
    /// `ParticipantRegistry::changes`, which takes a `ScheduleVersion`.
    After(ItineraryVersion),
}

impl Versions {
    pub fn after(&self) -> Option<ItineraryVersion> {
        match self {
            Versions::After(version) => Some(*version),
            Versions::All => None,
        }
    }

    pub fn admits(&self, version: ItineraryVersion) -> bool {
        match self {
            Versions::All => true,
            Versions::After(after) => version > *after,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Participants {
    #[default]
    All,
    Include(BTreeSet<ParticipantId>),
    Exclude(BTreeSet<ParticipantId>),
}

impl Participants {
    pub fn include(ids: impl IntoIterator<Item = ParticipantId>) -> Self {
        Participants::Include(ids.into_iter().collect())
    }

    pub fn exclude(ids: impl IntoIterator<Item = ParticipantId>) -> Self {
        Participants::Exclude(ids.into_iter().collect())
    }

    pub fn included(&self) -> Option<&BTreeSet<ParticipantId>> {
        match self {
            Participants::Include(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn excluded(&self) -> Option<&BTreeSet<ParticipantId>> {
        match self {
            Participants::Exclude(ids) => Some(ids),
            _ => None,
        }
    }

    pub fn admits(&self, id: ParticipantId) -> bool {
        match self {
            Participants::All => true,
            Participants::Include(ids) => ids.contains(&id),
            Participants::Exclude(ids) => !ids.contains(&id),
        }
    }
}

/// A schedule query
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    spacetime: Spacetime,
    versions: Versions,
    participants: Participants,
}

impl Query {
    /// Every trajectory of every participant
    pub fn everything() -> Self {
        Self::default()
    }

    /// Participants whose itineraries changed after `version`
    pub fn after(version: ItineraryVersion) -> Self {
        Self::default().with_versions(Versions::After(version))
    }

    pub fn regions(regions: Vec<Region>) -> Self {
        Self::default().with_spacetime(Spacetime::Regions(regions))
    }

    pub fn timespan<I, S>(maps: I, lower: Option<Time>, upper: Option<Time>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::default().with_spacetime(Spacetime::Timespan(Timespan::new(maps, lower, upper)))
    }

    pub fn after_in_regions(version: ItineraryVersion, regions: Vec<Region>) -> Self {
        Self::regions(regions).with_versions(Versions::After(version))
    }

    pub fn with_spacetime(mut self, spacetime: Spacetime) -> Self {
        self.spacetime = spacetime;
        self
    }

    pub fn with_versions(mut self, versions: Versions) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_participants(mut self, participants: Participants) -> Self {
        self.participants = participants;
        self
    }

    pub fn spacetime(&self) -> &Spacetime {
        &self.spacetime
    }

    pub fn versions(&self) -> &Versions {
        &self.versions
    }

    pub fn participants(&self) -> &Participants {
        &self.participants
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::test_support::{t, trajectory};

    #[test]
    fn test_switching_mode_drops_parameters() {
        let query = Query::timespan(["L1"], Some(t(0)), None);
        assert!(query.spacetime().timespan().is_some());
        assert!(query.spacetime().regions().is_none());

        let query = query.with_spacetime(Spacetime::Regions(vec![]));
        assert!(query.spacetime().timespan().is_none());
        assert_eq!(query.spacetime().regions().map(|r| r.len()), Some(0));
    }

    #[test]
    fn test_accessors_for_inactive_mode() {
        let query = Query::everything();
        assert!(query.spacetime().is_all());
        assert_eq!(query.versions().after(), None);
        assert!(query.participants().included().is_none());
        assert!(query.participants().excluded().is_none());

        let query = Query::after_in_regions(4, vec![]);
        assert_eq!(query.versions().after(), Some(4));
        assert!(query.spacetime().regions().is_some());
    }

    #[test]
    fn test_participant_filters() {
        let include = Participants::include([1, 3]);
        let exclude = Participants::exclude([1, 3]);
        assert!(include.admits(1) && !include.admits(2));
        assert!(!exclude.admits(1) && exclude.admits(2));
        assert!(Participants::All.admits(7));
    }

    #[test]
    fn test_timespan_requires_listed_map() {
        let traj = trajectory("L1", &[10, 20]);
        assert!(Timespan::new(["L1", "L2"], None, None).admits(&traj));
        assert!(!Timespan::new(["L2"], None, None).admits(&traj));
        assert!(!Timespan::new(Vec::<String>::new(), None, None).admits(&traj));
        assert!(Timespan::new(["L1"], Some(t(20)), Some(t(30))).admits(&traj));
        assert!(!Timespan::new(["L1"], Some(t(21)), None).admits(&traj));
    }
}
