//! Tests of GTUs interacting with lanes, branches and each other.

use gtu_sim::network::Compatibility;
use gtu_sim::parameters::{FSPEED, LOOKAHEAD};
use gtu_sim::units::{Acceleration, Length, Speed, Time};
use gtu_sim::{
    DetectorKind, FaultPolicy, GtuAttributes, GtuId, LaneAttributes, LaneId, Network,
    RemovalReason, Route, SimConfig, SimError, SimEvent, Simulation, SpawnRequest, Trigger,
};
use rand::SeedableRng;

/// A straight link with a left and a right lane.
fn two_lanes(length: f64) -> (Network, [LaneId; 2]) {
    let mut net = Network::new();
    let a = net.add_node("a");
    let b = net.add_node("b");
    let link = net.add_link(a, b, &Default::default());
    let attrs = LaneAttributes::new(Length::new(length), Speed::from_kmh(100.0));
    let left = net.add_lane(link, &attrs);
    let right = net.add_lane(link, &attrs);
    net.set_adjacent(left, right, Compatibility::all());
    (net, [left, right])
}

/// A single lane link from `a` to `b`, splitting at `b` into single lane
/// links to `c` and `d`.
fn fork(length: f64, speed_limit: Speed) -> (Network, [gtu_sim::NodeId; 4], [LaneId; 3]) {
    let mut net = Network::new();
    let nodes @ [a, b, c, d] = ["a", "b", "c", "d"].map(|n| net.add_node(n));
    let attrs = LaneAttributes::new(Length::new(length), speed_limit);
    let ab = net.add_link(a, b, &Default::default());
    let bc = net.add_link(b, c, &Default::default());
    let bd = net.add_link(b, d, &Default::default());
    let into = net.add_lane(ab, &attrs);
    let to_c = net.add_lane(bc, &attrs);
    let to_d = net.add_lane(bd, &attrs);
    net.connect_lanes(into, to_c);
    net.connect_lanes(into, to_d);
    (net, nodes, [into, to_c, to_d])
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

#[test]
fn keeps_to_the_preferred_side() {
    let (net, [left, right]) = two_lanes(1000.0);
    let mut sim = Simulation::new(net);
    sim.spawn(Time::ZERO, car_at(left, 10.0, 20.0)).unwrap();
    sim.run_until(Time::ZERO).unwrap();

    let events = sim.take_events();
    let id = created(&events)[0];
    assert!(events.contains(&SimEvent::LaneChangeCommitted {
        gtu: id,
        time: Time::ZERO,
        from: left,
        to: right,
    }));

    // Both lanes are occupied while changing lanes
    sim.run_until(Time::new(1.0)).unwrap();
    assert_eq!(sim.network().lane(left).gtus(), &[id]);
    assert_eq!(sim.network().lane(right).gtus(), &[id]);
    let maneuver = sim.get_gtu(id).unwrap().maneuver().copied().unwrap();
    assert_eq!(maneuver.window.max, Time::new(3.0));

    sim.run_until(Time::new(10.0)).unwrap();
    let events = sim.take_events();
    assert!(events.contains(&SimEvent::LaneChangeCompleted {
        gtu: id,
        time: Time::new(3.0),
        lane: right,
    }));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SimEvent::LaneChangeCommitted { .. })));
    let gtu = sim.get_gtu(id).unwrap();
    assert_eq!(gtu.lane(), right);
    assert!(gtu.maneuver().is_none());
    assert!(sim.network().lane(left).gtus().is_empty());
}

#[test]
fn vehicle_alongside_blocks_lane_change() {
    let (net, [left, right]) = two_lanes(1000.0);
    let mut sim = Simulation::new(net);
    sim.spawn(Time::ZERO, car_at(left, 100.0, 20.0)).unwrap();
    sim.spawn(Time::ZERO, car_at(right, 100.0, 20.0)).unwrap();
    sim.run_until(Time::new(10.0)).unwrap();

    let events = sim.take_events();
    assert!(!events
        .iter()
        .any(|e| matches!(e, SimEvent::LaneChangeCommitted { .. })));
    let ids = created(&events);
    assert_eq!(sim.get_gtu(ids[0]).unwrap().lane(), left);
    assert_eq!(sim.get_gtu(ids[1]).unwrap().lane(), right);
}

#[test]
fn route_is_followed_at_branch() {
    let (net, [a, b, c, d], [into, to_c, to_d]) = fork(300.0, Speed::new(15.0));
    let mut sim = Simulation::new(net);
    let via_c = sim.add_route(Route::new(vec![a, b, c]).unwrap());
    let via_d = sim.add_route(Route::new(vec![a, b, d]).unwrap());
    sim.spawn(
        Time::ZERO,
        SpawnRequest {
            route: Some(via_c),
            ..car_at(into, 60.0, 15.0)
        },
    )
    .unwrap();
    sim.spawn(
        Time::ZERO,
        SpawnRequest {
            route: Some(via_d),
            ..car_at(into, 10.0, 15.0)
        },
    )
    .unwrap();
    sim.run_until(Time::new(20.0)).unwrap();

    let events = sim.take_events();
    assert!(!events
        .iter()
        .any(|e| matches!(e, SimEvent::PlanningFault { .. } | SimEvent::GtuRemoved { .. })));
    let ids = created(&events);
    assert_eq!(sim.get_gtu(ids[0]).unwrap().lane(), to_c);
    assert_eq!(sim.get_gtu(ids[1]).unwrap().lane(), to_d);
    assert!(sim.network().lane(into).gtus().is_empty());
    assert_eq!(sim.network().lane(to_d).gtus(), &[ids[1]]);
}

#[test]
fn unroutable_branch_halts_gtu() {
    let (net, _, [into, ..]) = fork(100.0, Speed::new(15.0));
    let mut sim = Simulation::new(net);
    sim.spawn(Time::ZERO, car_at(into, 10.0, 10.0)).unwrap();
    sim.run_until(Time::new(10.0)).unwrap();

    let events = sim.take_events();
    let id = created(&events)[0];
    match events.as_slice() {
        [SimEvent::GtuCreated { .. }, SimEvent::PlanningFault { gtu, error, .. }, SimEvent::PlanCommitted(snapshot)] =>
        {
            assert_eq!(*gtu, id);
            assert!(matches!(error, SimError::NetworkInconsistency { .. }));
            assert_eq!(snapshot.speed, Speed::new(10.0));
            assert_eq!(snapshot.acceleration, Acceleration::new(-8.0));
            assert_eq!(snapshot.position, Length::new(10.0));
        }
        other => panic!("unexpected events {other:?}"),
    }
    let gtu = sim.get_gtu(id).unwrap();
    assert!(gtu.is_halted());
    assert_eq!(sim.pending(), 0);
    // Brakes to a standstill after 6.25 m, then holds
    let state = gtu.kinematics_at(sim.now());
    assert_eq!(state.speed, Speed::ZERO);
    assert_eq!(state.position, Length::new(16.25));

    // A trigger resumes planning, which fails again
    sim.trigger(sim.now(), id, Trigger::Hazard).unwrap();
    sim.run_until(Time::new(20.0)).unwrap();
    let faults = sim
        .take_events()
        .iter()
        .filter(|e| matches!(e, SimEvent::PlanningFault { .. }))
        .count();
    assert_eq!(faults, 1);
    assert!(sim.get_gtu(id).unwrap().is_halted());
}

#[test]
fn halted_gtu_stays_on_the_lane_it_entered() {
    let mut net = Network::new();
    let [a, b, c, d, e] = ["a", "b", "c", "d", "e"].map(|n| net.add_node(n));
    let limit = Speed::new(10.0);
    let ab = net.add_link(a, b, &Default::default());
    let bc = net.add_link(b, c, &Default::default());
    let into = net.add_lane(ab, &LaneAttributes::new(Length::new(100.0), limit));
    let short = net.add_lane(bc, &LaneAttributes::new(Length::new(20.0), limit));
    net.connect_lanes(into, short);
    for end in [d, e] {
        let link = net.add_link(c, end, &Default::default());
        let lane = net.add_lane(link, &LaneAttributes::new(Length::new(100.0), limit));
        net.connect_lanes(short, lane);
    }
    let sensor = net.add_detector(short, Length::new(2.0), DetectorKind::Sensor);

    // The split comes into view 5 m past the end of the first lane
    let mut attributes = GtuAttributes::car();
    attributes.params.set(&LOOKAHEAD, Length::new(19.0)).unwrap();
    let mut sim = Simulation::new(net);
    sim.spawn(
        Time::ZERO,
        SpawnRequest {
            attributes,
            ..car_at(into, 80.0, 10.0)
        },
    )
    .unwrap();
    sim.run_until(Time::new(2.5)).unwrap();

    let events = sim.take_events();
    let id = created(&events)[0];
    let fault = events
        .iter()
        .position(|e| matches!(e, SimEvent::PlanningFault { .. }))
        .unwrap();
    assert_eq!(
        events[fault - 1],
        SimEvent::DetectorTriggered {
            gtu: id,
            time: Time::new(2.5),
            detector: sensor,
        }
    );
    match &events[fault + 1..] {
        [SimEvent::PlanCommitted(snapshot)] => {
            assert_eq!(snapshot.time, Time::new(2.5));
            assert_eq!(snapshot.lane, short);
            assert_eq!(snapshot.position, Length::new(5.0));
            assert_eq!(snapshot.speed, Speed::new(10.0));
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert!(sim.network().lane(into).gtus().is_empty());
    assert_eq!(sim.network().lane(short).gtus(), &[id]);

    sim.run_until(Time::new(10.0)).unwrap();
    let state = sim.get_gtu(id).unwrap().kinematics_at(sim.now());
    assert_eq!(state.lane, short);
    assert_eq!(state.speed, Speed::ZERO);
    assert_eq!(state.position, Length::new(11.25));
}

#[test]
fn unroutable_branch_removes_gtu_under_remove_policy() {
    let (net, _, [into, ..]) = fork(100.0, Speed::new(15.0));
    let config = SimConfig {
        fault_policy: FaultPolicy::Remove,
        ..Default::default()
    };
    let mut sim = Simulation::with_config(net, config).unwrap();
    sim.spawn(Time::ZERO, car_at(into, 10.0, 10.0)).unwrap();
    sim.run_until(Time::new(1.0)).unwrap();

    let events = sim.take_events();
    let id = created(&events)[0];
    assert!(matches!(
        events.last(),
        Some(SimEvent::GtuRemoved {
            reason: RemovalReason::Fault,
            ..
        })
    ));
    assert!(sim.get_gtu(id).is_none());
    assert!(sim.network().lane(into).gtus().is_empty());
}

#[test]
fn route_must_be_known_and_valid() {
    let (net, [a, _, c, d], [into, ..]) = fork(100.0, Speed::new(15.0));
    let mut sim = Simulation::new(net);
    let invalid = sim.add_route(Route::new(vec![a, d, c]).unwrap());
    let request = SpawnRequest {
        route: Some(invalid),
        ..car_at(into, 10.0, 10.0)
    };
    assert!(sim.spawn(Time::ZERO, request).is_err());
}

#[test]
fn speed_factors_are_bounded() {
    let (net, [left, right]) = two_lanes(1000.0);
    let mut sim = Simulation::new(net);
    for pos in [10.0, 50.0, 90.0] {
        sim.spawn(Time::ZERO, car_at(left, pos, 20.0)).unwrap();
        sim.spawn(Time::ZERO, car_at(right, pos, 20.0)).unwrap();
    }
    sim.run_until(Time::ZERO).unwrap();

    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    sim.randomise_speed_factors_with(&mut rng, 0.5).unwrap();
    for gtu in sim.iter_gtus() {
        let factor = gtu.params().get(&FSPEED).unwrap();
        assert!((0.75..=1.25).contains(&factor));
    }
    assert!(sim.randomise_speed_factors(-1.0).is_err());
}

fn busy_road() -> Vec<SimEvent> {
    let (mut net, [left, right]) = two_lanes(1000.0);
    net.add_detector(left, Length::new(600.0), DetectorKind::Sink);
    net.add_detector(right, Length::new(600.0), DetectorKind::Sink);
    net.add_detector(right, Length::new(300.0), DetectorKind::Sensor);
    let mut sim = Simulation::new(net);
    for (lane, pos, speed) in [(left, 10.0, 20.0), (left, 60.0, 25.0), (right, 30.0, 15.0), (right, 90.0, 18.0)] {
        sim.spawn(Time::ZERO, car_at(lane, pos, speed)).unwrap();
    }
    for t in [2.0, 4.0, 6.0] {
        sim.spawn(Time::new(t), car_at(right, 10.0, 22.0)).unwrap();
    }
    sim.run_until(Time::new(30.0)).unwrap();
    sim.take_events()
}

#[test]
fn replays_are_identical() {
    let first = busy_road();
    assert!(first.len() > 100);
    assert_eq!(first, busy_road());
}
