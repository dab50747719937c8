//! Participant registry
//!
//! Owns participant identity, descriptions and the authoritative itinerary
//! log of every registered participant. The map lock is only held to look
//! up, insert or remove handles; all itinerary work happens on the log.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ScheduleConfig;
use crate::error::{Result, ScheduleError};
use crate::geometry::{ShapeContext, ShapeId};
use crate::itinerary::{ItineraryLog, ItinerarySnapshot};
use crate::query::{ItinerarySource, ParticipantPatch, Patch, Query, QueryEngine};
use crate::rectification::Rectifier;
use crate::trajectory::{Time, Trajectory};
use crate::transport::ChangeTransport;
use crate::version::{ItineraryVersion, ParticipantId, ScheduleClock, ScheduleVersion};

/// How a participant reacts to schedule negotiation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Responsiveness {
    Invalid,
    /// Follows its itinerary but never adjusts it for others
    Unresponsive,
    Responsive,
}

/// Immutable description supplied at registration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParticipantDescription {
    pub name: String,
    pub owner: String,
    pub responsiveness: Responsiveness,
    pub map: String,
    pub footprint: ShapeId,
    pub vicinity: ShapeId,
}

impl ParticipantDescription {
    /// A responsive participant whose vicinity is its footprint
    pub fn new(
        name: impl Into<String>,
        owner: impl Into<String>,
        map: impl Into<String>,
        footprint: ShapeId,
    ) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            responsiveness: Responsiveness::Responsive,
            map: map.into(),
            footprint,
            vicinity: footprint,
        }
    }

    pub fn with_responsiveness(mut self, responsiveness: Responsiveness) -> Self {
        self.responsiveness = responsiveness;
        self
    }

    pub fn with_vicinity(mut self, vicinity: ShapeId) -> Self {
        self.vicinity = vicinity;
        self
    }

    pub fn validate(&self, shapes: &ShapeContext) -> Result<()> {
        if self.name.is_empty() {
            return Err(ScheduleError::InvalidDescription(
                "participant name is empty".to_string(),
            ));
        }
        if self.map.is_empty() {
            return Err(ScheduleError::InvalidDescription(format!(
                "participant {} has no map",
                self.name
            )));
        }
        if self.responsiveness == Responsiveness::Invalid {
            return Err(ScheduleError::InvalidDescription(format!(
                "participant {} has invalid responsiveness",
                self.name
            )));
        }
        for (role, shape) in [("footprint", self.footprint), ("vicinity", self.vicinity)] {
            if !shapes.contains(shape) {
                return Err(ScheduleError::InvalidDescription(format!(
                    "participant {} references unknown {} shape {}",
                    self.name, role, shape
                )));
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
struct ParticipantEntry {
    description: Arc<ParticipantDescription>,
    log: Arc<ItineraryLog>,
}

/// The authoritative schedule: every registered participant and its log
pub struct ParticipantRegistry {
    config: ScheduleConfig,
    shapes: Arc<ShapeContext>,
    clock: Arc<ScheduleClock>,
    transport: Arc<dyn ChangeTransport>,
    next_id: AtomicU64,
    participants: RwLock<BTreeMap<ParticipantId, ParticipantEntry>>,
}

impl ParticipantRegistry {
    pub fn new(config: ScheduleConfig, transport: Arc<dyn ChangeTransport>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            shapes: Arc::new(ShapeContext::new()),
            clock: Arc::new(ScheduleClock::new()),
            transport,
            next_id: AtomicU64::new(0),
            participants: RwLock::new(BTreeMap::new()),
        })
    }

    /// Use `shapes` as the shape context participants are checked against
    pub fn with_shapes(mut self, shapes: ShapeContext) -> Self {
        self.shapes = Arc::new(shapes);
        self
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.config
    }

    pub fn shapes(&self) -> Arc<ShapeContext> {
        Arc::clone(&self.shapes)
    }

    pub fn schedule_version(&self) -> ScheduleVersion {
        self.clock.latest()
    }

    /// Register a participant and create its empty itinerary log
    pub fn register(&self, description: ParticipantDescription) -> Result<ParticipantId> {
        description.validate(&self.shapes)?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let log = Arc::new(ItineraryLog::new(
            id,
            Arc::clone(&self.clock),
            Arc::clone(&self.transport),
            &self.config,
        ));

        log::info!(
            "Registered participant {} ({} owned by {})",
            id,
            description.name,
            description.owner
        );
        self.participants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                ParticipantEntry {
                    description: Arc::new(description),
                    log,
                },
            );
        Ok(id)
    }

    /// Remove a participant. Outstanding rectifiers for it start failing.
    pub fn unregister(&self, id: ParticipantId) -> Result<()> {
        let entry = self
            .participants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .ok_or(ScheduleError::UnknownParticipant(id))?;
        entry.log.retire();
        log::info!("Unregistered participant {} ({})", id, entry.description.name);
        Ok(())
    }

    pub fn description(&self, id: ParticipantId) -> Result<Arc<ParticipantDescription>> {
        Ok(self.entry(id)?.description)
    }

    pub fn log(&self, id: ParticipantId) -> Result<Arc<ItineraryLog>> {
        Ok(self.entry(id)?.log)
    }

    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        self.participants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    pub fn rectifier(&self, id: ParticipantId) -> Result<Rectifier> {
        Ok(self.log(id)?.rectifier())
    }

    pub fn set(&self, id: ParticipantId, trajectories: Vec<Trajectory>) -> Result<ItineraryVersion> {
        self.log(id)?.set(trajectories)
    }

    pub fn extend(&self, id: ParticipantId, trajectories: Vec<Trajectory>) -> Result<ItineraryVersion> {
        self.log(id)?.extend(trajectories)
    }

    pub fn delay(&self, id: ParticipantId, from: Time, duration: Duration) -> Result<ItineraryVersion> {
        self.log(id)?.delay(from, duration)
    }

    pub fn erase(&self, id: ParticipantId, range: Range<usize>) -> Result<ItineraryVersion> {
        self.log(id)?.erase(range)
    }

    pub fn replace(
        &self,
        id: ParticipantId,
        range: Range<usize>,
        trajectories: Vec<Trajectory>,
    ) -> Result<ItineraryVersion> {
        self.log(id)?.replace(range, trajectories)
    }

    pub fn cull(&self, id: ParticipantId, before: Time) -> Result<ItineraryVersion> {
        self.log(id)?.cull(before)
    }

    /// Cull every participant. Returns how many itineraries changed.
    pub fn cull_all(&self, before: Time) -> usize {
        let logs: Vec<Arc<ItineraryLog>> = self
            .participants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| Arc::clone(&entry.log))
            .collect();

        let mut culled = 0;
        for log in logs {
            let before_version = log.version();
            match log.cull(before) {
                Ok(version) if version != before_version => culled += 1,
                Ok(_) => {}
                // Unregistered while culling
                Err(e) => log::debug!("Skipping cull of participant {}: {}", log.participant(), e),
            }
        }
        if culled > 0 {
            log::info!("Culled trajectories finishing before {} from {} participant(s)", before, culled);
        }
        culled
    }

    /// Record a mirror's acknowledgement for retention purposes
    pub fn acknowledge(&self, id: ParticipantId, mirror: Uuid, version: ItineraryVersion) -> Result<bool> {
        Ok(self.log(id)?.acknowledge(mirror, version))
    }

    /// Drop `mirror`'s watermark from every log
    pub fn forget_mirror(&self, mirror: &Uuid) {
        let logs: Vec<Arc<ItineraryLog>> = self
            .participants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| Arc::clone(&entry.log))
            .collect();
        for log in logs {
            log.forget_mirror(mirror);
        }
    }

    /// Changes made after schedule version `after` by the participants
    /// matching `query`, with region overlap tested by bounding circles.
    /// Pass 0 to fetch everything.
    pub fn changes(&self, query: &Query, after: ScheduleVersion) -> Patch {
        self.changes_with(&QueryEngine::with_bounding_circles(self.shapes()), query, after)
    }

    /// Like `changes`, evaluating `query` with `engine`.
    ///
    /// Participants are selected by their current itinerary, so one whose
    /// trajectories no longer match the spacetime filter is left out even
    /// if it changed.
    pub fn changes_with(&self, engine: &QueryEngine, query: &Query, after: ScheduleVersion) -> Patch {
        let latest_version = self.schedule_version();
        let mut participants = Vec::new();
        for result in engine.evaluate(query, self) {
            let Ok(log) = self.log(result.participant) else {
                continue;
            };
            let changes = log.changes_after(after);
            if !changes.is_empty() {
                participants.push(ParticipantPatch {
                    participant: result.participant,
                    changes,
                });
            }
        }

        let patch = Patch {
            participants,
            latest_version,
        };
        log::debug!(
            "Patch after schedule version {}: {} change(s) from {} participant(s)",
            after,
            patch.change_count(),
            patch.participants.len()
        );
        patch
    }

    fn entry(&self, id: ParticipantId) -> Result<ParticipantEntry> {
        self.participants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(ScheduleError::UnknownParticipant(id))
    }
}

impl ItinerarySource for ParticipantRegistry {
    fn participant_ids(&self) -> Vec<ParticipantId> {
        ParticipantRegistry::participant_ids(self)
    }

    fn snapshot(&self, id: ParticipantId) -> Option<ItinerarySnapshot> {
        self.log(id).ok().map(|log| log.current_itinerary())
    }
}
