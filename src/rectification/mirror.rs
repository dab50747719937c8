//! Consumer-side copy of a schedule
//!
//! Rebuilds remote itineraries from changes delivered by an unreliable
//! transport, asking each participant's source to fill in whatever went
//! missing.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::{Result, ScheduleError};
use crate::itinerary::{Change, ItinerarySnapshot};
use crate::query::{ItinerarySource, Patch};
use crate::rectification::rectifier::{
    RectificationRequester, RectificationRequesterFactory, Rectifier,
};
use crate::rectification::tracker::{
    Ingestion, RectificationState, RectificationTracker, RetransmitRequest,
};
use crate::registry::ParticipantDescription;
use crate::version::{ItineraryVersion, ParticipantId, ScheduleVersion};

struct MirroredParticipant {
    description: Arc<ParticipantDescription>,
    tracker: Mutex<RectificationTracker>,
    requester: Box<dyn RectificationRequester>,
}

impl MirroredParticipant {
    fn tracker(&self) -> MutexGuard<'_, RectificationTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A local copy of remote participants' itineraries
pub struct ScheduleMirror {
    id: Uuid,
    factory: Arc<dyn RectificationRequesterFactory>,
    participants: RwLock<BTreeMap<ParticipantId, Arc<MirroredParticipant>>>,
    synced_through: AtomicU64,
}

impl ScheduleMirror {
    pub fn new(factory: impl RectificationRequesterFactory + 'static) -> Self {
        Self {
            id: Uuid::new_v4(),
            factory: Arc::new(factory),
            participants: RwLock::new(BTreeMap::new()),
            synced_through: AtomicU64::new(0),
        }
    }

    /// Identity used when acknowledging versions to a source
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start tracking a participant. Any previous state for `id` is
    /// discarded along with its requester.
    pub fn mirror_participant(
        &self,
        id: ParticipantId,
        description: ParticipantDescription,
        rectifier: Rectifier,
    ) {
        let requester = self.factory.make(rectifier, id);
        let entry = Arc::new(MirroredParticipant {
            description: Arc::new(description),
            tracker: Mutex::new(RectificationTracker::new()),
            requester,
        });
        let replaced = self.write().insert(id, entry).is_some();
        log::info!(
            "Mirror {} tracking participant {}{}",
            self.id,
            id,
            if replaced { " (replaced)" } else { "" }
        );
    }

    /// Stop tracking a participant and drop its requester
    pub fn unregister(&self, id: ParticipantId) -> Result<()> {
        self.write()
            .remove(&id)
            .ok_or(ScheduleError::UnknownParticipant(id))?;
        log::info!("Mirror {} dropped participant {}", self.id, id);
        Ok(())
    }

    /// Ingest one change for `id`.
    ///
    /// Gaps are detected under the participant's lock; the requester is
    /// invoked after the lock is released. If the change cannot be applied
    /// the local copy is discarded, a full retransmission is requested and
    /// the error is returned.
    pub fn ingest(&self, id: ParticipantId, change: Change) -> Result<Ingestion> {
        let entry = self.entry(id)?;
        let version = change.version;

        let (outcome, request) = {
            let mut tracker = entry.tracker();
            match tracker.ingest(change) {
                Ok(Ingestion::Gap(request)) => {
                    tracker.mark_requested(request.to);
                    (Ok(Ingestion::Gap(request)), Some(request))
                }
                Ok(other) => (Ok(other), None),
                Err(e) => {
                    log::error!(
                        "Mirror {} diverged from participant {} at version {}: {}",
                        self.id,
                        id,
                        version,
                        e
                    );
                    (Err(e), Some(RetransmitRequest { from: 1, to: version }))
                }
            }
        };

        if let Some(request) = request {
            log::info!(
                "Participant {}: requesting versions [{}, {}]",
                id,
                request.from,
                request.to
            );
            entry.requester.request(request.from, request.to);
        }
        outcome
    }

    /// Ingest every change of `patch`, participant by participant.
    ///
    /// Participants this mirror does not track are skipped. A participant
    /// whose copy diverges stops at the failing change; a full
    /// retransmission has already been requested for it. Returns how many
    /// changes were applied.
    pub fn apply_patch(&self, patch: &Patch) -> usize {
        let mut applied = 0;
        for participant in &patch.participants {
            let id = participant.participant;
            for change in &participant.changes {
                match self.ingest(id, change.clone()) {
                    Ok(Ingestion::Applied(changes)) | Ok(Ingestion::Baseline(changes)) => {
                        applied += changes.len()
                    }
                    Ok(_) => {}
                    Err(ScheduleError::UnknownParticipant(_)) => {
                        log::trace!("Mirror {} ignoring patch for participant {}", self.id, id);
                        break;
                    }
                    Err(e) => {
                        log::warn!("Failed to apply patch for {}: {}", id, e);
                        break;
                    }
                }
            }
        }

        self.synced_through
            .fetch_max(patch.latest_version, Ordering::AcqRel);
        log::debug!(
            "Mirror {} applied {} change(s) from patch at schedule version {}",
            self.id,
            applied,
            patch.latest_version
        );
        applied
    }

    /// Latest schedule version of any applied patch, to ask for the next
    /// one after
    pub fn synced_through(&self) -> ScheduleVersion {
        self.synced_through.load(Ordering::Acquire)
    }

    pub fn state(&self, id: ParticipantId) -> Option<RectificationState> {
        self.entry(id).ok().map(|entry| entry.tracker().state())
    }

    pub fn description(&self, id: ParticipantId) -> Option<Arc<ParticipantDescription>> {
        self.entry(id).ok().map(|entry| Arc::clone(&entry.description))
    }

    /// Missing version ranges of every participant that has any
    pub fn inconsistencies(&self) -> Vec<(ParticipantId, Vec<RangeInclusive<ItineraryVersion>>)> {
        self.entries()
            .into_iter()
            .filter_map(|(id, entry)| {
                let ranges = entry.tracker().missing_ranges();
                (!ranges.is_empty()).then_some((id, ranges))
            })
            .collect()
    }

    /// Ask again for every outstanding range. Returns how many requests
    /// were issued.
    pub fn retry_inconsistencies(&self) -> usize {
        let mut issued = 0;
        for (id, entry) in self.entries() {
            let outstanding = entry.tracker().outstanding();
            if let Some(request) = outstanding {
                log::debug!(
                    "Participant {}: re-requesting versions [{}, {}]",
                    id,
                    request.from,
                    request.to
                );
                entry.requester.request(request.from, request.to);
                issued += 1;
            }
        }
        issued
    }

    /// Contiguous version held for each participant, for acknowledging
    /// back to the source
    pub fn acknowledgements(&self) -> Vec<(ParticipantId, ItineraryVersion)> {
        self.entries()
            .into_iter()
            .map(|(id, entry)| (id, entry.tracker().version()))
            .filter(|(_, version)| *version > 0)
            .collect()
    }

    /// Feed changes from a broadcast receiver until the sender closes.
    ///
    /// Changes for participants this mirror does not track are skipped.
    /// When the receiver lags, outstanding ranges are requested again.
    pub fn spawn_receiver(
        self: &Arc<Self>,
        mut receiver: broadcast::Receiver<(ParticipantId, Change)>,
    ) -> tokio::task::JoinHandle<()> {
        let mirror = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok((id, change)) => match mirror.ingest(id, change) {
                        Ok(_) => {}
                        Err(ScheduleError::UnknownParticipant(_)) => {
                            log::trace!("Mirror {} ignoring participant {}", mirror.id, id);
                        }
                        Err(e) => log::warn!("Failed to ingest change for {}: {}", id, e),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("Mirror {} lagged, {} change(s) lost", mirror.id, skipped);
                        mirror.retry_inconsistencies();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn entry(&self, id: ParticipantId) -> Result<Arc<MirroredParticipant>> {
        self.participants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(ScheduleError::UnknownParticipant(id))
    }

    fn entries(&self) -> Vec<(ParticipantId, Arc<MirroredParticipant>)> {
        self.participants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, entry)| (*id, Arc::clone(entry)))
            .collect()
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<ParticipantId, Arc<MirroredParticipant>>> {
        self.participants.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ItinerarySource for ScheduleMirror {
    fn participant_ids(&self) -> Vec<ParticipantId> {
        self.participants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    fn snapshot(&self, id: ParticipantId) -> Option<ItinerarySnapshot> {
        let entry = self.entry(id).ok()?;
        let tracker = entry.tracker();
        Some(ItinerarySnapshot {
            participant: id,
            version: tracker.version(),
            schedule_version: tracker.schedule_version(),
            itinerary: tracker.itinerary(),
        })
    }
}
