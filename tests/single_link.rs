//! Tests that involve the simulation of a single lane.

use gtu_sim::units::{Length, Speed, Time};
use gtu_sim::{
    DetectorKind, GtuAttributes, GtuId, LaneAttributes, LaneId, Network, RemovalReason, SimEvent,
    Simulation, SpawnRequest,
};

/// A network with a single lane of the given length and speed limit.
fn single_lane(length: f64, speed_limit: Speed) -> (Network, LaneId) {
    let mut net = Network::new();
    let a = net.add_node("a");
    let b = net.add_node("b");
    let link = net.add_link(a, b, &Default::default());
    let lane = net.add_lane(link, &LaneAttributes::new(Length::new(length), speed_limit));
    (net, lane)
}

fn car_at(lane: LaneId, position: f64, speed: f64) -> SpawnRequest {
    SpawnRequest {
        attributes: GtuAttributes::car(),
        route: None,
        lane,
        position: Length::new(position),
        speed: Speed::new(speed),
    }
}

fn created(events: &[SimEvent]) -> Vec<GtuId> {
    events
        .iter()
        .filter_map(|event| match event {
            SimEvent::GtuCreated { gtu, .. } => Some(*gtu),
            _ => None,
        })
        .collect()
}

/// Test that a GTU's position increases monotonically.
#[test]
fn gtu_drives_forward() {
    let limit = Speed::from_kmh(100.0);
    let (net, lane) = single_lane(1000.0, limit);
    let mut sim = Simulation::new(net);
    sim.spawn(Time::ZERO, car_at(lane, 10.0, 0.0)).unwrap();
    sim.run_until(Time::new(20.0)).unwrap();

    let snapshots: Vec<_> = sim
        .take_events()
        .into_iter()
        .filter_map(|event| match event {
            SimEvent::PlanCommitted(snapshot) => Some(snapshot),
            _ => None,
        })
        .collect();
    assert_eq!(snapshots.len(), 41);
    for pair in snapshots.windows(2) {
        assert!(pair[1].position > pair[0].position);
        assert!(pair[1].time > pair[0].time);
        assert!(pair[1].speed <= limit * 1.001);
    }
}

#[test]
fn gtu_stops_at_dead_end() {
    let (net, lane) = single_lane(200.0, Speed::from_kmh(50.0));
    let mut sim = Simulation::new(net);
    sim.spawn(Time::ZERO, car_at(lane, 10.0, 13.0)).unwrap();
    sim.run_until(Time::new(60.0)).unwrap();

    let events = sim.take_events();
    let id = created(&events)[0];
    assert!(!events
        .iter()
        .any(|e| matches!(e, SimEvent::GtuRemoved { .. })));
    let gtu = sim.get_gtu(id).unwrap();
    let front = gtu.snapshot().position + gtu.length() * 0.5;
    assert!(front <= Length::new(200.0));
    assert!(front > Length::new(150.0));
    assert!(gtu.has_stopped());
}

#[test]
fn sink_removes_gtu() {
    let (mut net, lane) = single_lane(200.0, Speed::from_kmh(80.0));
    let sink = net.add_detector(lane, Length::new(150.0), DetectorKind::Sink);
    let mut sim = Simulation::new(net);
    sim.spawn(Time::ZERO, car_at(lane, 10.0, 20.0)).unwrap();
    sim.run_until(Time::new(20.0)).unwrap();

    let events = sim.take_events();
    let id = created(&events)[0];
    let tail: Vec<_> = events.iter().rev().take(2).rev().cloned().collect();
    match tail.as_slice() {
        [SimEvent::DetectorTriggered {
            gtu,
            detector,
            time: passed,
        }, SimEvent::GtuRemoved { reason, time, .. }] => {
            assert_eq!(*gtu, id);
            assert_eq!(*detector, sink);
            assert_eq!(*reason, RemovalReason::ReachedSink);
            assert_eq!(passed, time);
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert!(sim.get_gtu(id).is_none());
    assert!(sim.perception(id).is_none());
    assert!(sim.network().lane(lane).gtus().is_empty());
}

#[test]
fn sensor_triggers_replan_at_crossing() {
    let (mut net, lane) = single_lane(1000.0, Speed::from_kmh(80.0));
    let sensor = net.add_detector(lane, Length::new(50.0), DetectorKind::Sensor);
    let mut sim = Simulation::new(net);
    sim.spawn(Time::ZERO, car_at(lane, 10.0, 15.0)).unwrap();
    sim.run_until(Time::new(10.0)).unwrap();

    let events = sim.take_events();
    let idx = events
        .iter()
        .position(|e| matches!(e, SimEvent::DetectorTriggered { detector, .. } if *detector == sensor))
        .unwrap();
    let SimEvent::DetectorTriggered { time, .. } = events[idx] else {
        unreachable!()
    };
    match &events[idx + 1] {
        SimEvent::PlanCommitted(snapshot) => {
            assert_eq!(snapshot.time, time);
            assert!((snapshot.position.si() - 50.0).abs() < 1e-6);
        }
        other => panic!("expected a replan, got {other:?}"),
    }
    // Passed once only
    let passes = events
        .iter()
        .filter(|e| matches!(e, SimEvent::DetectorTriggered { .. }))
        .count();
    assert_eq!(passes, 1);
}

#[test]
fn forced_stop_and_release() {
    let (net, lane) = single_lane(1000.0, Speed::from_kmh(100.0));
    let mut sim = Simulation::new(net);
    sim.spawn(Time::ZERO, car_at(lane, 10.0, 20.0)).unwrap();
    sim.run_until(Time::new(2.0)).unwrap();
    let id = created(&sim.take_events())[0];

    sim.set_gtu_frozen(id, true).unwrap();
    sim.run_until(Time::new(10.0)).unwrap();
    let gtu = sim.get_gtu(id).unwrap();
    assert!(gtu.is_frozen());
    assert!(gtu.has_stopped());
    let stopped_at = gtu.snapshot().position;

    sim.run_until(Time::new(12.0)).unwrap();
    assert_eq!(sim.get_gtu(id).unwrap().snapshot().position, stopped_at);

    sim.set_gtu_frozen(id, false).unwrap();
    sim.run_until(Time::new(15.0)).unwrap();
    let gtu = sim.get_gtu(id).unwrap();
    assert!(!gtu.is_frozen());
    assert!(gtu.snapshot().speed > Speed::new(1.0));
    assert!(gtu.snapshot().position > stopped_at);
}

#[test]
fn follower_stops_behind_stationary_leader() {
    let (net, lane) = single_lane(1000.0, Speed::from_kmh(100.0));
    let mut sim = Simulation::new(net);
    sim.spawn(Time::ZERO, car_at(lane, 150.0, 0.0)).unwrap();
    sim.spawn(Time::ZERO, car_at(lane, 10.0, 20.0)).unwrap();
    sim.run_until(Time::ZERO).unwrap();
    let ids = created(&sim.take_events());
    let (leader, follower) = (ids[0], ids[1]);
    sim.set_gtu_frozen(leader, true).unwrap();
    sim.run_until(Time::new(60.0)).unwrap();

    let leader = sim.get_gtu(leader).unwrap().snapshot();
    let follower = sim.get_gtu(follower).unwrap().snapshot();
    let gap = leader.position - follower.position - (leader.length + follower.length) * 0.5;
    assert!(gap > Length::new(1.0), "gap {gap}");
    assert!(follower.speed < Speed::new(0.1));
    assert_eq!(sim.network().lane(lane).gtus(), &[follower.id, leader.id]);
}

#[test]
fn occupied_spawn_is_retried() {
    let (net, lane) = single_lane(1000.0, Speed::from_kmh(100.0));
    let mut sim = Simulation::new(net);
    sim.spawn(Time::ZERO, car_at(lane, 10.0, 20.0)).unwrap();
    sim.spawn(Time::ZERO, car_at(lane, 10.0, 20.0)).unwrap();
    sim.run_until(Time::new(1.0)).unwrap();

    let times: Vec<_> = sim
        .take_events()
        .into_iter()
        .filter_map(|e| match e {
            SimEvent::GtuCreated { time, .. } => Some(time),
            _ => None,
        })
        .collect();
    assert_eq!(times, vec![Time::ZERO, Time::new(0.5)]);
    assert_eq!(sim.iter_gtus().count(), 2);
}

#[test]
fn invalid_spawns_are_rejected() {
    let (net, lane) = single_lane(100.0, Speed::from_kmh(100.0));
    let mut sim = Simulation::new(net);
    assert!(sim.spawn(Time::ZERO, car_at(lane, 150.0, 0.0)).is_err());
    assert!(sim.spawn(Time::ZERO, car_at(lane, 10.0, -1.0)).is_err());
    assert!(sim.spawn(Time::new(f64::NAN), car_at(lane, 10.0, 0.0)).is_err());
    assert_eq!(sim.pending(), 0);
}

#[test]
fn removed_gtu_leaves_no_trace() {
    let (net, lane) = single_lane(1000.0, Speed::from_kmh(100.0));
    let mut sim = Simulation::new(net);
    sim.spawn(Time::ZERO, car_at(lane, 10.0, 20.0)).unwrap();
    sim.run_until(Time::new(1.0)).unwrap();
    let id = created(&sim.take_events())[0];

    let removed = sim.remove_gtu(id).unwrap();
    assert_eq!(removed.state(), gtu_sim::GtuState::Removed);
    assert!(sim.remove_gtu(id).is_err());
    // Its pending replan is discarded
    sim.run_until(Time::new(5.0)).unwrap();
    let events = sim.take_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        SimEvent::GtuRemoved {
            reason: RemovalReason::External,
            ..
        }
    ));
}
