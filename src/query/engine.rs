//! Query evaluation

use std::sync::Arc;

use crate::geometry::{BoundingCircleOverlap, ShapeContext, ShapeOverlap};
use crate::itinerary::ItinerarySnapshot;
use crate::query::{Participants, Query, Spacetime};
use crate::trajectory::Trajectory;
use crate::version::{ItineraryVersion, ParticipantId};

/// Anything that can hand out per-participant itinerary snapshots
pub trait ItinerarySource {
    fn participant_ids(&self) -> Vec<ParticipantId>;

    /// `None` when the participant is not known to this source
    fn snapshot(&self, id: ParticipantId) -> Option<ItinerarySnapshot>;
}

/// The part of one participant's itinerary that matched a query
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResult {
    pub participant: ParticipantId,
    pub version: ItineraryVersion,
    pub trajectories: Vec<Arc<Trajectory>>,
}

/// Stateless evaluator of queries over an `ItinerarySource`
pub struct QueryEngine {
    shapes: Arc<ShapeContext>,
    overlap: Arc<dyn ShapeOverlap>,
}

impl QueryEngine {
    pub fn new(shapes: Arc<ShapeContext>, overlap: impl ShapeOverlap + 'static) -> Self {
        Self {
            shapes,
            overlap: Arc::new(overlap),
        }
    }

    /// Engine using the coarse bounding-circle overlap test
    pub fn with_bounding_circles(shapes: Arc<ShapeContext>) -> Self {
        Self::new(shapes, BoundingCircleOverlap)
    }

    /// Evaluate `query` against `source`.
    ///
    /// Results are ordered by participant id with trajectories in itinerary
    /// order. Each participant is read from its own snapshot, so
    /// participants mutated during evaluation may be seen at different
    /// points in time.
    pub fn evaluate<S>(&self, query: &Query, source: &S) -> Vec<QueryResult>
    where
        S: ItinerarySource + ?Sized,
    {
        let mut ids = match query.participants() {
            Participants::Include(ids) => ids.iter().copied().collect(),
            participants => {
                let mut ids = source.participant_ids();
                ids.retain(|id| participants.admits(*id));
                ids
            }
        };
        ids.sort_unstable();
        ids.dedup();

        let mut results = Vec::new();
        for id in ids {
            let Some(snapshot) = source.snapshot(id) else {
                continue;
            };
            if !query.versions().admits(snapshot.version) {
                continue;
            }

            let trajectories: Vec<Arc<Trajectory>> = snapshot
                .itinerary
                .iter()
                .filter(|trajectory| self.matches(query.spacetime(), trajectory))
                .cloned()
                .collect();

            if trajectories.is_empty() && !query.spacetime().is_all() {
                continue;
            }
            results.push(QueryResult {
                participant: id,
                version: snapshot.version,
                trajectories,
            });
        }

        log::trace!("Query matched {} participant(s)", results.len());
        results
    }

    fn matches(&self, spacetime: &Spacetime, trajectory: &Trajectory) -> bool {
        match spacetime {
            Spacetime::All => true,
            Spacetime::Timespan(timespan) => timespan.admits(trajectory),
            Spacetime::Regions(regions) => regions.iter().any(|region| {
                region.admits(trajectory) && self.overlap.overlaps(trajectory, &self.shapes, region)
            }),
        }
    }
}
