//! Consumer-side gap detection
//!
//! A `RectificationTracker` rebuilds one participant's itinerary from
//! changes that may arrive late, twice or not at all. Out-of-order changes
//! are buffered until the missing versions show up.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::itinerary::Change;
use crate::trajectory::Itinerary;
use crate::version::{ItineraryVersion, ScheduleVersion};

/// Where a mirrored participant stands with respect to its source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RectificationState {
    /// No change received yet
    Unset,

    /// Every version up to and including this one has been applied
    Valid(ItineraryVersion),

    /// A later version arrived before `expected`
    Inconsistent { expected: ItineraryVersion },

    /// Retransmission of versions up to `requested_through` is in flight
    Rectifying {
        expected: ItineraryVersion,
        requested_through: ItineraryVersion,
    },
}

/// Inclusive range of versions a consumer wants resent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetransmitRequest {
    pub from: ItineraryVersion,
    pub to: ItineraryVersion,
}

/// Outcome of ingesting one change
#[derive(Clone, Debug, PartialEq)]
pub enum Ingestion {
    /// The change and any buffered successors were applied, in order
    Applied(Vec<Change>),

    /// Already applied or already buffered; nothing changed
    Duplicate,

    /// A `Set` ahead of the known version replaced all prior state. Holds
    /// it and any buffered successors that were applied after it.
    Baseline(Vec<Change>),

    /// Buffered; the given range should be requested from the source.
    /// Every gap asks again from the first missing version, so a lost
    /// retransmission is covered by the next out-of-order arrival.
    Gap(RetransmitRequest),
}

/// Gap detection state for one mirrored participant
#[derive(Debug, Default)]
pub struct RectificationTracker {
    itinerary: Arc<Itinerary>,
    last_known: Option<ItineraryVersion>,
    schedule_version: ScheduleVersion,
    requested_through: Option<ItineraryVersion>,
    buffer: BTreeMap<ItineraryVersion, Change>,
}

impl RectificationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RectificationState {
        let expected = self.version() + 1;
        match (self.buffer.is_empty(), self.last_known, self.requested_through) {
            (true, None, _) => RectificationState::Unset,
            (true, Some(last), _) => RectificationState::Valid(last),
            (false, _, None) => RectificationState::Inconsistent { expected },
            (false, _, Some(requested_through)) => RectificationState::Rectifying {
                expected,
                requested_through,
            },
        }
    }

    /// Last contiguous version applied, 0 before any change
    pub fn version(&self) -> ItineraryVersion {
        self.last_known.unwrap_or(0)
    }

    /// Schedule version of the last applied change
    pub fn schedule_version(&self) -> ScheduleVersion {
        self.schedule_version
    }

    pub fn itinerary(&self) -> Arc<Itinerary> {
        Arc::clone(&self.itinerary)
    }

    /// Feed one change received from the transport.
    ///
    /// On error the change could not be applied to the local itinerary.
    /// The tracker is reset to `Unset` and the caller should request a
    /// fresh copy from the source.
    pub fn ingest(&mut self, change: Change) -> Result<Ingestion> {
        let last = self.version();

        if change.version <= last {
            return Ok(Ingestion::Duplicate);
        }

        if change.version == last + 1 {
            let mut applied = Vec::new();
            self.apply(change, &mut applied)?;
            self.drain(&mut applied)?;
            return Ok(Ingestion::Applied(applied));
        }

        if change.op.is_baseline() {
            let version = change.version;
            self.itinerary = Arc::new(Itinerary::new());
            self.last_known = None;
            self.buffer.retain(|v, _| *v > version);

            let mut applied = Vec::new();
            self.apply(change, &mut applied)?;
            self.drain(&mut applied)?;
            return Ok(Ingestion::Baseline(applied));
        }

        if self.buffer.contains_key(&change.version) {
            return Ok(Ingestion::Duplicate);
        }

        let to = change.version;
        self.buffer.insert(to, change);
        Ok(Ingestion::Gap(RetransmitRequest { from: last + 1, to }))
    }

    /// Note that versions up to `to` have been requested. Only feeds the
    /// `Rectifying` state report; it never suppresses a later request.
    pub fn mark_requested(&mut self, to: ItineraryVersion) {
        if self.buffer.is_empty() {
            return;
        }
        self.requested_through = Some(self.requested_through.map_or(to, |r| r.max(to)));
    }

    /// The whole outstanding range, used to ask again when an earlier
    /// request may have been lost
    pub fn outstanding(&self) -> Option<RetransmitRequest> {
        let to = *self.buffer.keys().next_back()?;
        Some(RetransmitRequest {
            from: self.version() + 1,
            to,
        })
    }

    /// Inclusive version ranges that are known to exist but have not been
    /// received
    pub fn missing_ranges(&self) -> Vec<RangeInclusive<ItineraryVersion>> {
        let mut ranges = Vec::new();
        let mut next = self.version() + 1;
        for &version in self.buffer.keys() {
            if version > next {
                ranges.push(next..=version - 1);
            }
            next = version + 1;
        }
        ranges
    }

    /// Forget everything, as if no change had ever been received
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn apply(&mut self, change: Change, applied: &mut Vec<Change>) -> Result<()> {
        let mut next = Itinerary::clone(&self.itinerary);
        if let Err(e) = change.op.apply(&mut next) {
            self.reset();
            return Err(e);
        }

        self.itinerary = Arc::new(next);
        self.last_known = Some(change.version);
        self.schedule_version = change.schedule_version;
        applied.push(change);
        Ok(())
    }

    fn drain(&mut self, applied: &mut Vec<Change>) -> Result<()> {
        while let Some(change) = self.buffer.remove(&(self.version() + 1)) {
            self.apply(change, applied)?;
        }
        if self.buffer.is_empty() {
            self.requested_through = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ScheduleError;
    use crate::itinerary::ChangeOp;
    use crate::trajectory::test_support::{t, trajectory};
    use std::time::Duration;

    fn change(version: ItineraryVersion, op: ChangeOp) -> Change {
        Change::new(version, version, op)
    }

    fn versions(changes: &[Change]) -> Vec<ItineraryVersion> {
        changes.iter().map(|c| c.version).collect()
    }

    #[test]
    fn test_in_order_changes_apply() {
        let mut tracker = RectificationTracker::new();
        assert_eq!(tracker.state(), RectificationState::Unset);

        let outcome = tracker
            .ingest(change(1, ChangeOp::set(vec![trajectory("L1", &[0, 10])])))
            .unwrap();
        assert!(matches!(outcome, Ingestion::Applied(ref c) if versions(c) == vec![1]));
        assert_eq!(tracker.state(), RectificationState::Valid(1));
        assert_eq!(tracker.itinerary().len(), 1);
    }

    #[test]
    fn test_duplicate_is_noop() {
        let mut tracker = RectificationTracker::new();
        let first = change(1, ChangeOp::set(vec![trajectory("L1", &[0, 10])]));
        tracker.ingest(first.clone()).unwrap();
        let before = tracker.itinerary();

        assert_eq!(tracker.ingest(first).unwrap(), Ingestion::Duplicate);
        assert_eq!(tracker.itinerary(), before);
        assert_eq!(tracker.state(), RectificationState::Valid(1));
    }

    #[test]
    fn test_gap_requests_missing_versions() {
        let mut tracker = RectificationTracker::new();
        tracker
            .ingest(change(1, ChangeOp::set(vec![trajectory("L1", &[0, 10])])))
            .unwrap();

        // Version 2 lost in transit
        let outcome = tracker
            .ingest(change(3, ChangeOp::delay(t(0), Duration::from_secs(1))))
            .unwrap();
        assert_eq!(outcome, Ingestion::Gap(RetransmitRequest { from: 2, to: 3 }));
        assert_eq!(
            tracker.state(),
            RectificationState::Inconsistent { expected: 2 }
        );
        assert_eq!(tracker.missing_ranges(), vec![2..=2]);

        tracker.mark_requested(3);
        assert_eq!(
            tracker.state(),
            RectificationState::Rectifying {
                expected: 2,
                requested_through: 3
            }
        );

        let outcome = tracker
            .ingest(change(2, ChangeOp::extend(vec![trajectory("L1", &[20, 30])])))
            .unwrap();
        assert!(matches!(outcome, Ingestion::Applied(ref c) if versions(c) == vec![2, 3]));
        assert_eq!(tracker.state(), RectificationState::Valid(3));
        assert!(tracker.missing_ranges().is_empty());
    }

    #[test]
    fn test_every_gap_requests_from_last_known() {
        let mut tracker = RectificationTracker::new();
        tracker.ingest(change(1, ChangeOp::set(vec![]))).unwrap();

        let first = tracker.ingest(change(4, ChangeOp::erase(0..0))).unwrap();
        assert_eq!(first, Ingestion::Gap(RetransmitRequest { from: 2, to: 4 }));
        tracker.mark_requested(4);

        // Overlapping requests are expected; the source tolerates them
        assert_eq!(
            tracker.ingest(change(3, ChangeOp::erase(0..0))).unwrap(),
            Ingestion::Gap(RetransmitRequest { from: 2, to: 3 })
        );
        assert_eq!(
            tracker.ingest(change(6, ChangeOp::erase(0..0))).unwrap(),
            Ingestion::Gap(RetransmitRequest { from: 2, to: 6 })
        );
        assert_eq!(
            tracker.state(),
            RectificationState::Rectifying {
                expected: 2,
                requested_through: 4
            }
        );
        assert_eq!(tracker.missing_ranges(), vec![2..=2, 5..=5]);
        assert_eq!(
            tracker.outstanding(),
            Some(RetransmitRequest { from: 2, to: 6 })
        );
    }

    #[test]
    fn test_lost_retransmission_is_requested_again() {
        let mut tracker = RectificationTracker::new();
        tracker.ingest(change(1, ChangeOp::set(vec![]))).unwrap();

        // Version 2 lost, then lost again on retransmission
        assert_eq!(
            tracker.ingest(change(3, ChangeOp::erase(0..0))).unwrap(),
            Ingestion::Gap(RetransmitRequest { from: 2, to: 3 })
        );
        tracker.mark_requested(3);
        assert_eq!(
            tracker.ingest(change(3, ChangeOp::erase(0..0))).unwrap(),
            Ingestion::Duplicate
        );

        // Version 4 lost once; 5 still asks for 2
        assert_eq!(
            tracker.ingest(change(5, ChangeOp::erase(0..0))).unwrap(),
            Ingestion::Gap(RetransmitRequest { from: 2, to: 5 })
        );
        tracker.mark_requested(5);
        assert_eq!(
            tracker.ingest(change(4, ChangeOp::erase(0..0))).unwrap(),
            Ingestion::Gap(RetransmitRequest { from: 2, to: 4 })
        );

        let outcome = tracker.ingest(change(2, ChangeOp::erase(0..0))).unwrap();
        assert!(matches!(outcome, Ingestion::Applied(ref c) if versions(c) == vec![2, 3, 4, 5]));
        assert_eq!(tracker.state(), RectificationState::Valid(5));
    }

    #[test]
    fn test_set_ahead_becomes_baseline() {
        let mut tracker = RectificationTracker::new();
        tracker
            .ingest(change(1, ChangeOp::set(vec![trajectory("A", &[0, 1])])))
            .unwrap();
        tracker.ingest(change(4, ChangeOp::erase(0..0))).unwrap();
        tracker.ingest(change(7, ChangeOp::erase(0..1))).unwrap();

        let outcome = tracker
            .ingest(change(5, ChangeOp::set(vec![trajectory("B", &[0, 1])])))
            .unwrap();
        assert!(matches!(outcome, Ingestion::Baseline(ref c) if versions(c) == vec![5]));
        assert_eq!(tracker.itinerary().get(0).unwrap().map, "B");
        assert_eq!(tracker.missing_ranges(), vec![6..=6]);
        assert_eq!(
            tracker.state(),
            RectificationState::Inconsistent { expected: 6 }
        );
    }

    #[test]
    fn test_first_change_missing() {
        let mut tracker = RectificationTracker::new();
        let outcome = tracker.ingest(change(2, ChangeOp::erase(0..0))).unwrap();
        assert_eq!(outcome, Ingestion::Gap(RetransmitRequest { from: 1, to: 2 }));
    }

    #[test]
    fn test_divergence_resets_tracker() {
        let mut tracker = RectificationTracker::new();
        tracker.ingest(change(1, ChangeOp::set(vec![]))).unwrap();
        let err = tracker.ingest(change(2, ChangeOp::erase(0..1))).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidRange { .. }));
        assert_eq!(tracker.state(), RectificationState::Unset);
    }
}
