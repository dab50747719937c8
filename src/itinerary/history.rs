//! Bounded change history with mirror watermarks

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{Result, ScheduleError};
use crate::itinerary::change::Change;
use crate::version::{ItineraryVersion, ScheduleVersion};

/// Retained changes of one itinerary, oldest first, with consecutive
/// versions.
///
/// At least the last `depth` changes are kept. While a mirror has an
/// acknowledgement on file, nothing newer than its watermark is dropped.
#[derive(Debug)]
pub(crate) struct ChangeHistory {
    changes: VecDeque<Arc<Change>>,
    depth: usize,
    watermarks: BTreeMap<Uuid, ItineraryVersion>,
    pruned_through: ScheduleVersion,
}

impl ChangeHistory {
    pub fn new(depth: usize) -> Self {
        Self {
            changes: VecDeque::new(),
            depth: depth.max(1),
            watermarks: BTreeMap::new(),
            pruned_through: 0,
        }
    }

    pub fn push(&mut self, change: Arc<Change>) {
        debug_assert!(self
            .changes
            .back()
            .map_or(true, |last| last.version + 1 == change.version));
        self.changes.push_back(change);
        self.prune();
    }

    pub fn oldest(&self) -> Option<ItineraryVersion> {
        self.changes.front().map(|c| c.version)
    }

    pub fn latest(&self) -> Option<ItineraryVersion> {
        self.changes.back().map(|c| c.version)
    }

    /// Schedule version of the newest change dropped so far, 0 if none
    pub fn pruned_through(&self) -> ScheduleVersion {
        self.pruned_through
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Change>> {
        self.changes.iter()
    }

    /// Record that `mirror` holds every version up to `version`. Returns
    /// false when the acknowledgement is stale.
    pub fn acknowledge(&mut self, mirror: Uuid, version: ItineraryVersion) -> bool {
        if matches!(self.watermarks.get(&mirror), Some(&watermark) if version <= watermark) {
            return false;
        }
        self.watermarks.insert(mirror, version);
        self.prune();
        true
    }

    pub fn forget(&mut self, mirror: &Uuid) -> bool {
        let removed = self.watermarks.remove(mirror).is_some();
        if removed {
            self.prune();
        }
        removed
    }

    #[cfg(test)]
    pub fn watermark(&self, mirror: &Uuid) -> Option<ItineraryVersion> {
        self.watermarks.get(mirror).copied()
    }

    /// Changes with versions in `[from, min(to, latest)]`.
    pub fn range(&self, from: ItineraryVersion, to: ItineraryVersion) -> Result<Vec<Arc<Change>>> {
        let Some(latest) = self.latest() else {
            return Ok(Vec::new());
        };
        let from = from.max(1);
        let to = to.min(latest);
        if from > to {
            return Ok(Vec::new());
        }

        let oldest = self.oldest().unwrap_or(latest);
        if from < oldest {
            return Err(ScheduleError::HistoryExpired {
                requested: from,
                oldest,
            });
        }

        let skip = (from - oldest) as usize;
        let take = (to - from + 1) as usize;
        Ok(self.changes.iter().skip(skip).take(take).cloned().collect())
    }

    fn prune(&mut self) {
        let floor = self.watermarks.values().min().copied();
        while self.changes.len() > self.depth {
            let Some(front) = self.changes.front() else {
                break;
            };
            if matches!(floor, Some(floor) if front.version > floor) {
                break;
            }
            if let Some(pruned) = self.changes.pop_front() {
                self.pruned_through = pruned.schedule_version;
            }
        }
    }
}
