//! Query evaluation over a live registry

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use traffic_schedule::{
    ConvexShape, InlineRequesterFactory, NullTransport, ParticipantDescription, ParticipantId,
    ParticipantRegistry, Participants, Profile, Query, QueryEngine, QueryResult, Region,
    ScheduleConfig, ScheduleMirror, Segment, ShapeContext, Space, Time, Trajectory,
};

fn t(secs: i64) -> Time {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Straight line along y = `lane` on `map`
fn path(map: &str, lane: f64, times: &[i64]) -> Trajectory {
    let mut trajectory = Trajectory::new(map).with_profile(0, Profile::new(0));
    for (i, secs) in times.iter().enumerate() {
        trajectory = trajectory.with_segment(Segment::new(
            t(*secs),
            [i as f64 * 10.0, lane, 0.0],
            [1.0, 0.0, 0.0],
            0,
        ));
    }
    trajectory
}

fn shapes() -> ShapeContext {
    let mut shapes = ShapeContext::new();
    shapes.insert(ConvexShape::Circle { radius: 0.5 });
    shapes
}

fn registry() -> ParticipantRegistry {
    ParticipantRegistry::new(ScheduleConfig::default(), Arc::new(NullTransport))
        .unwrap()
        .with_shapes(shapes())
}

fn register(registry: &ParticipantRegistry, name: &str) -> ParticipantId {
    registry
        .register(ParticipantDescription::new(name, "fleet", "L1", 0))
        .unwrap()
}

fn ids(results: &[QueryResult]) -> Vec<ParticipantId> {
    results.iter().map(|r| r.participant).collect()
}

/// Three robots: `a` on L1 early, `b` on L1 late, `c` on L2
fn populated() -> (ParticipantRegistry, [ParticipantId; 3]) {
    let registry = registry();
    let a = register(&registry, "a");
    let b = register(&registry, "b");
    let c = register(&registry, "c");
    registry.set(a, vec![path("L1", 0.0, &[0, 10])]).unwrap();
    registry
        .set(b, vec![path("L1", 5.0, &[20, 30]), path("L1", 5.0, &[40, 50])])
        .unwrap();
    registry.set(c, vec![path("L2", 0.0, &[0, 10])]).unwrap();
    (registry, [a, b, c])
}

#[test]
fn test_include_and_exclude_partition_participants() {
    let (registry, [a, b, c]) = populated();
    let engine = QueryEngine::with_bounding_circles(registry.shapes());

    let include = Query::everything().with_participants(Participants::include([c, a]));
    let exclude = Query::everything().with_participants(Participants::exclude([c, a]));
    assert_eq!(ids(&engine.evaluate(&include, &registry)), vec![a, c]);
    assert_eq!(ids(&engine.evaluate(&exclude, &registry)), vec![b]);
}

#[test]
fn test_timespan_overlap_is_inclusive() {
    let (registry, [a, b, _]) = populated();
    let engine = QueryEngine::with_bounding_circles(registry.shapes());

    let touching = Query::timespan(["L1"], Some(t(10)), Some(t(20)));
    let results = engine.evaluate(&touching, &registry);
    assert_eq!(ids(&results), vec![a, b]);
    assert_eq!(results[1].trajectories.len(), 1);

    let open_lower = Query::timespan(["L1"], None, Some(t(5)));
    assert_eq!(ids(&engine.evaluate(&open_lower, &registry)), vec![a]);

    let gap = Query::timespan(["L1"], Some(t(31)), Some(t(39)));
    assert!(engine.evaluate(&gap, &registry).is_empty());
}

#[test]
fn test_regions_select_by_lane() {
    let (registry, [_, b, _]) = populated();
    let engine = QueryEngine::with_bounding_circles(registry.shapes());

    let lane_b = Region::new("L1", vec![Space::new(0, [5.0, 5.0, 0.0])]);
    let results = engine.evaluate(&Query::regions(vec![lane_b.clone()]), &registry);
    assert_eq!(ids(&results), vec![b]);
    assert_eq!(results[0].trajectories.len(), 2);

    let late = lane_b.with_lower_time_bound(t(35));
    let results = engine.evaluate(&Query::regions(vec![late]), &registry);
    assert_eq!(results[0].trajectories.len(), 1);
}

#[test]
fn test_after_reports_changed_participants() {
    let (registry, [a, b, c]) = populated();
    let engine = QueryEngine::with_bounding_circles(registry.shapes());
    registry.extend(b, vec![path("L1", 5.0, &[60, 70])]).unwrap();

    assert_eq!(ids(&engine.evaluate(&Query::after(1), &registry)), vec![b]);
    assert_eq!(ids(&engine.evaluate(&Query::after(0), &registry)), vec![a, b, c]);

    let lane_a = Region::new("L1", vec![Space::new(0, [0.0, 0.0, 0.0])]);
    assert!(engine
        .evaluate(&Query::after_in_regions(1, vec![lane_a]), &registry)
        .is_empty());
}

#[test]
fn test_mirror_answers_like_source() {
    let (registry, participants) = populated();
    let mirror = ScheduleMirror::new(InlineRequesterFactory);
    for id in participants {
        mirror.mirror_participant(
            id,
            registry.description(id).unwrap().as_ref().clone(),
            registry.rectifier(id).unwrap(),
        );
        for change in registry.log(id).unwrap().retained_changes() {
            mirror.ingest(id, change.as_ref().clone()).unwrap();
        }
    }

    let engine = QueryEngine::with_bounding_circles(registry.shapes());
    let query = Query::timespan(["L1", "L2"], Some(t(0)), Some(t(25)));
    assert_eq!(engine.evaluate(&query, &mirror), engine.evaluate(&query, &registry));
}

#[test]
fn test_mutating_one_participant_does_not_block_queries_of_another() {
    let (registry, [a, b, _]) = populated();
    let registry = Arc::new(registry);
    let engine = QueryEngine::with_bounding_circles(registry.shapes());
    let done = AtomicBool::new(false);

    thread::scope(|scope| {
        let writer = scope.spawn(|| {
            let mut count = 0;
            loop {
                registry
                    .set(a, vec![path("L1", 0.0, &[count, count + 1])])
                    .unwrap();
                count += 1;
                if done.load(Ordering::Acquire) {
                    break count;
                }
            }
        });

        let query = Query::everything().with_participants(Participants::include([b]));
        for _ in 0..1000 {
            let results = engine.evaluate(&query, registry.as_ref());
            assert_eq!(ids(&results), vec![b]);
            assert_eq!(results[0].trajectories.len(), 2);
        }
        thread::sleep(Duration::from_millis(1));
        done.store(true, Ordering::Release);

        let writes = writer.join().unwrap();
        assert!(writes > 0);
    });

    // Every write to `a` landed as its own version
    let log = registry.log(a).unwrap();
    assert_eq!(log.current_itinerary().itinerary.len(), 1);
    assert!(log.version() > 1);
}
