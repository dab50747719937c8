//! Authoritative per-participant itinerary log

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use uuid::Uuid;

use crate::config::ScheduleConfig;
use crate::error::{Result, ScheduleError};
use crate::itinerary::change::{Change, ChangeOp};
use crate::itinerary::history::ChangeHistory;
use crate::rectification::Rectifier;
use crate::trajectory::{Itinerary, Time, Trajectory};
use crate::transport::ChangeTransport;
use crate::version::{ItineraryVersion, ParticipantId, ScheduleClock, ScheduleVersion};

/// A consistent view of one participant's itinerary
#[derive(Clone, Debug)]
pub struct ItinerarySnapshot {
    pub participant: ParticipantId,
    pub version: ItineraryVersion,
    pub schedule_version: ScheduleVersion,
    pub itinerary: Arc<Itinerary>,
}

struct LogState {
    itinerary: Arc<Itinerary>,
    version: ItineraryVersion,
    schedule_version: ScheduleVersion,
    history: ChangeHistory,
}

impl LogState {
    /// The whole itinerary as a `Set` stamped with the current version
    fn baseline(&self) -> Change {
        Change::new(
            self.version,
            self.schedule_version,
            ChangeOp::Set {
                trajectories: self.itinerary.trajectories().to_vec(),
            },
        )
    }
}

/// The versioned sequence of changes made to one participant's itinerary.
///
/// Writers take the log's exclusive lock only to validate and swap in the
/// new itinerary; readers clone an `Arc<Itinerary>` under a brief read lock.
/// Accepted changes are published after the lock is released.
pub struct ItineraryLog {
    participant: ParticipantId,
    clock: Arc<ScheduleClock>,
    transport: Arc<dyn ChangeTransport>,
    retired: AtomicBool,
    state: RwLock<LogState>,
}

impl ItineraryLog {
    pub(crate) fn new(
        participant: ParticipantId,
        clock: Arc<ScheduleClock>,
        transport: Arc<dyn ChangeTransport>,
        config: &ScheduleConfig,
    ) -> Self {
        Self {
            participant,
            clock,
            transport,
            retired: AtomicBool::new(false),
            state: RwLock::new(LogState {
                itinerary: Arc::new(Itinerary::new()),
                version: 0,
                schedule_version: 0,
                history: ChangeHistory::new(config.history_depth),
            }),
        }
    }

    pub fn participant(&self) -> ParticipantId {
        self.participant
    }

    /// Whether the participant has been unregistered
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    /// Replace the whole itinerary
    pub fn set(&self, trajectories: Vec<Trajectory>) -> Result<ItineraryVersion> {
        self.commit(ChangeOp::set(trajectories))
    }

    /// Append trajectories
    pub fn extend(&self, trajectories: Vec<Trajectory>) -> Result<ItineraryVersion> {
        self.commit(ChangeOp::extend(trajectories))
    }

    /// Push back every segment finishing at or after `from`
    pub fn delay(&self, from: Time, duration: Duration) -> Result<ItineraryVersion> {
        self.commit(ChangeOp::delay(from, duration))
    }

    /// Remove trajectories by index range
    pub fn erase(&self, range: Range<usize>) -> Result<ItineraryVersion> {
        self.commit(ChangeOp::erase(range))
    }

    /// Erase a range and insert `trajectories` at its start as one change
    pub fn replace(&self, range: Range<usize>, trajectories: Vec<Trajectory>) -> Result<ItineraryVersion> {
        self.commit(ChangeOp::replace(range, trajectories))
    }

    /// Drop trajectories that finish before `before`. Nothing is recorded
    /// when no trajectory qualifies.
    pub fn cull(&self, before: Time) -> Result<ItineraryVersion> {
        self.commit(ChangeOp::cull(before))
    }

    /// Snapshot of the current itinerary
    pub fn current_itinerary(&self) -> ItinerarySnapshot {
        let state = self.read();
        ItinerarySnapshot {
            participant: self.participant,
            version: state.version,
            schedule_version: state.schedule_version,
            itinerary: Arc::clone(&state.itinerary),
        }
    }

    pub fn version(&self) -> ItineraryVersion {
        self.read().version
    }

    /// Oldest version still available for retransmission
    pub fn oldest_retained(&self) -> Option<ItineraryVersion> {
        self.read().history.oldest()
    }

    pub fn retained_changes(&self) -> Vec<Arc<Change>> {
        self.read().history.iter().cloned().collect()
    }

    /// Record that `mirror` has applied every change up to `version`.
    /// Stale acknowledgements are ignored and return false.
    pub fn acknowledge(&self, mirror: Uuid, version: ItineraryVersion) -> bool {
        let mut state = self.write();
        let version = version.min(state.version);
        let accepted = state.history.acknowledge(mirror, version);
        drop(state);
        if accepted {
            log::trace!(
                "Mirror {} acknowledged version {} of participant {}",
                mirror,
                version,
                self.participant
            );
        }
        accepted
    }

    /// Stop retaining changes on behalf of `mirror`
    pub fn forget_mirror(&self, mirror: &Uuid) -> bool {
        self.write().history.forget(mirror)
    }

    /// Changes recorded after schedule version `after`, oldest first.
    ///
    /// If some of those changes have already been pruned, a single
    /// baseline `Set` of the current itinerary is returned instead.
    pub fn changes_after(&self, after: ScheduleVersion) -> Vec<Change> {
        let state = self.read();
        if state.schedule_version <= after {
            return Vec::new();
        }
        if state.history.pruned_through() > after {
            return vec![state.baseline()];
        }
        state
            .history
            .iter()
            .filter(|change| change.schedule_version > after)
            .map(|change| change.as_ref().clone())
            .collect()
    }

    /// Issue a rectifier bound to this log
    pub fn rectifier(self: &Arc<Self>) -> Rectifier {
        Rectifier::new(self.participant, Arc::downgrade(self))
    }

    /// Resend retained changes in `[from, min(to, latest)]`
    pub(crate) fn retransmit(&self, from: ItineraryVersion, to: ItineraryVersion) -> Result<usize> {
        let changes = self.read().history.range(from, to)?;
        for change in &changes {
            self.transport.send(self.participant, change);
        }
        if !changes.is_empty() {
            log::debug!(
                "Retransmitted {} change(s) [{}, {}] of participant {}",
                changes.len(),
                from,
                to,
                self.participant
            );
        }
        Ok(changes.len())
    }

    /// Send the whole current itinerary as a `Set` stamped with the current
    /// version. No version is consumed.
    pub(crate) fn resynchronize(&self) -> ItineraryVersion {
        let change = self.read().baseline();
        log::info!(
            "Resynchronizing participant {} at version {}",
            self.participant,
            change.version
        );
        self.transport.send(self.participant, &change);
        change.version
    }

    fn commit(&self, op: ChangeOp) -> Result<ItineraryVersion> {
        if self.is_retired() {
            return Err(ScheduleError::UnknownParticipant(self.participant));
        }

        let change = {
            let mut state = self.write();
            let mut next = Itinerary::clone(&state.itinerary);
            op.apply(&mut next)?;

            if matches!(op, ChangeOp::Cull { .. }) && next.len() == state.itinerary.len() {
                return Ok(state.version);
            }

            let version = state.version + 1;
            let schedule_version = self.clock.advance();
            let change = Arc::new(Change::new(version, schedule_version, op));

            state.itinerary = Arc::new(next);
            state.version = version;
            state.schedule_version = schedule_version;
            state.history.push(Arc::clone(&change));
            change
        };

        log::debug!(
            "Participant {} {} -> version {} (schedule {})",
            self.participant,
            change.op.kind(),
            change.version,
            change.schedule_version
        );
        self.transport.send(self.participant, &change);
        Ok(change.version)
    }

    fn read(&self) -> RwLockReadGuard<'_, LogState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LogState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
