//! Shapes, regions and the overlap collaborator
//!
//! Real collision checking lives outside this crate. The schedule only needs
//! a shared shape context (so profiles reference shapes by id instead of
//! duplicating geometry) and a predicate deciding whether a trajectory
//! touches a region.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::trajectory::{Time, Trajectory};

/// Key of a shape within the shared shape context
pub type ShapeId = u32;

/// A convex shape definition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ConvexShape {
    Circle { radius: f64 },
    Box { x_length: f64, y_length: f64 },
}

impl ConvexShape {
    /// Radius of the smallest circle centered on the shape that contains it
    pub fn characteristic_length(&self) -> f64 {
        match self {
            ConvexShape::Circle { radius } => *radius,
            ConvexShape::Box { x_length, y_length } => {
                (x_length * x_length + y_length * y_length).sqrt() / 2.0
            }
        }
    }
}

/// Shapes shared across all participant profiles
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ShapeContext {
    shapes: BTreeMap<ShapeId, ConvexShape>,
    next_id: ShapeId,
}

impl ShapeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a shape and return its id
    pub fn insert(&mut self, shape: ConvexShape) -> ShapeId {
        let id = self.next_id;
        self.next_id += 1;
        self.shapes.insert(id, shape);
        id
    }

    pub fn get(&self, id: ShapeId) -> Option<&ConvexShape> {
        self.shapes.get(&id)
    }

    pub fn contains(&self, id: ShapeId) -> bool {
        self.shapes.contains_key(&id)
    }
}

/// A shape placed at a pose (x, y, yaw)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Space {
    pub shape: ShapeId,
    pub pose: [f64; 3],
}

impl Space {
    pub fn new(shape: ShapeId, pose: [f64; 3]) -> Self {
        Self { shape, pose }
    }
}

/// A region of spacetime: spaces on one map, optionally bounded in time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub map: String,
    pub lower_time_bound: Option<Time>,
    pub upper_time_bound: Option<Time>,
    pub spaces: Vec<Space>,
}

impl Region {
    pub fn new(map: impl Into<String>, spaces: Vec<Space>) -> Self {
        Self {
            map: map.into(),
            lower_time_bound: None,
            upper_time_bound: None,
            spaces,
        }
    }

    pub fn with_lower_time_bound(mut self, time: Time) -> Self {
        self.lower_time_bound = Some(time);
        self
    }

    pub fn with_upper_time_bound(mut self, time: Time) -> Self {
        self.upper_time_bound = Some(time);
        self
    }

    /// Cheap pre-check run before any shape test: same map and an active
    /// interval that intersects the region's time window.
    pub fn admits(&self, trajectory: &Trajectory) -> bool {
        trajectory.map == self.map
            && trajectory.is_active_within(self.lower_time_bound, self.upper_time_bound)
    }
}

/// Decides whether a trajectory that already passed `Region::admits`
/// physically intersects the region.
pub trait ShapeOverlap: Send + Sync {
    fn overlaps(&self, trajectory: &Trajectory, shapes: &ShapeContext, region: &Region) -> bool;
}

impl<F> ShapeOverlap for F
where
    F: Fn(&Trajectory, &ShapeContext, &Region) -> bool + Send + Sync,
{
    fn overlaps(&self, trajectory: &Trajectory, shapes: &ShapeContext, region: &Region) -> bool {
        self(trajectory, shapes, region)
    }
}

/// Coarse overlap test treating every shape as its bounding circle and the
/// motion between control points as a straight line.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoundingCircleOverlap;

impl BoundingCircleOverlap {
    fn footprint_radius(trajectory: &Trajectory, shapes: &ShapeContext, profile: u32) -> Option<f64> {
        let profile = trajectory.profiles.get(&profile)?;
        shapes.get(profile.footprint).map(ConvexShape::characteristic_length)
    }

    fn in_window(region: &Region, start: Time, finish: Time) -> bool {
        !matches!(region.lower_time_bound, Some(lower) if finish < lower)
            && !matches!(region.upper_time_bound, Some(upper) if upper < start)
    }
}

impl ShapeOverlap for BoundingCircleOverlap {
    fn overlaps(&self, trajectory: &Trajectory, shapes: &ShapeContext, region: &Region) -> bool {
        let segments = &trajectory.segments;

        // Pair each segment with its predecessor; a lone segment is a point.
        let legs: Vec<(usize, usize)> = if segments.len() == 1 {
            vec![(0, 0)]
        } else {
            (1..segments.len()).map(|i| (i - 1, i)).collect()
        };

        legs.into_iter().any(|(a, b)| {
            let (from, to) = (&segments[a], &segments[b]);
            if !Self::in_window(region, from.finish_time, to.finish_time) {
                return false;
            }
            let Some(footprint) = Self::footprint_radius(trajectory, shapes, to.profile) else {
                return false;
            };

            region.spaces.iter().any(|space| {
                let Some(shape) = shapes.get(space.shape) else {
                    return false;
                };
                let reach = footprint + shape.characteristic_length();
                point_to_segment_distance(space.pose, from.position, to.position) <= reach
            })
        })
    }
}

fn point_to_segment_distance(p: [f64; 3], a: [f64; 3], b: [f64; 3]) -> f64 {
    let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
    let len_sq = dx * dx + dy * dy;
    let s = if len_sq == 0.0 {
        0.0
    } else {
        (((p[0] - a[0]) * dx + (p[1] - a[1]) * dy) / len_sq).clamp(0.0, 1.0)
    };
    let (cx, cy) = (a[0] + s * dx, a[1] + s * dy);
    ((p[0] - cx).powi(2) + (p[1] - cy).powi(2)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trajectory::test_support::{t, trajectory};

    fn unit_context() -> ShapeContext {
        let mut shapes = ShapeContext::new();
        // trajectory() profiles reference shape 0
        shapes.insert(ConvexShape::Circle { radius: 0.5 });
        shapes
    }

    #[test]
    fn test_box_characteristic_length() {
        let shape = ConvexShape::Box {
            x_length: 6.0,
            y_length: 8.0,
        };
        assert_eq!(shape.characteristic_length(), 5.0);
    }

    #[test]
    fn test_admits_checks_map_and_window() {
        let traj = trajectory("L1", &[10, 20]);
        let region = Region::new("L1", vec![]).with_lower_time_bound(t(15));
        assert!(region.admits(&traj));
        assert!(!Region::new("L2", vec![]).admits(&traj));
        assert!(!Region::new("L1", vec![])
            .with_lower_time_bound(t(21))
            .admits(&traj));
    }

    #[test]
    fn test_bounding_circle_hits_path() {
        let shapes = unit_context();
        // trajectory() moves along x from 0.0 to 1.0
        let traj = trajectory("L1", &[0, 10]);
        let near = Region::new("L1", vec![Space::new(0, [0.5, 0.8, 0.0])]);
        let far = Region::new("L1", vec![Space::new(0, [0.5, 3.0, 0.0])]);

        assert!(BoundingCircleOverlap.overlaps(&traj, &shapes, &near));
        assert!(!BoundingCircleOverlap.overlaps(&traj, &shapes, &far));
    }

    #[test]
    fn test_bounding_circle_respects_time_window() {
        let shapes = unit_context();
        let traj = trajectory("L1", &[0, 10, 20]);
        // Near the second control point, but only after the trajectory ends
        let late = Region::new("L1", vec![Space::new(0, [1.0, 0.0, 0.0])])
            .with_lower_time_bound(t(30));
        assert!(!BoundingCircleOverlap.overlaps(&traj, &shapes, &late));
    }

    #[test]
    fn test_closure_overlap() {
        let never = |_: &Trajectory, _: &ShapeContext, _: &Region| false;
        let traj = trajectory("L1", &[0, 10]);
        assert!(!never.overlaps(&traj, &unit_context(), &Region::new("L1", vec![])));
    }
}
