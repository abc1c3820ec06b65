//! Engine integration tests, driving the engine against simulated arms.

use std::{
    sync::{
        mpsc::{channel, Receiver},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use comms_if::{
    eqpt::arm::{Arm, ArmFrame, Axis, CmdKind},
    tc::{ControlRequest, ControlResponse, Directive},
    tm::{AxisActivity, RunState, StatusEvent},
};
use pal_lib::{
    dispatcher::{self, ArmLink},
    engine::{Engine, EngineError},
    request_processor, run_ctrl,
    run_ctrl::RunCtrlError,
    sim_arm::{SimArm, SimBehaviour},
    status_server::ChannelSink,
};

const WAIT: Duration = Duration::from_secs(5);

struct Rig {
    engine: Engine,
    events: Receiver<StatusEvent>,
    sent: Arc<Mutex<Vec<ArmFrame>>>,
}

fn rig_with(behaviour: SimBehaviour, move_ms: u64, params: dispatcher::Params) -> Rig {
    let sim = SimArm::with_behaviour(Arm::Left, Duration::from_millis(move_ms), behaviour);
    let sent = sim.sent_log();
    let link: Box<dyn ArmLink> = Box::new(sim);
    let (tx, events) = channel();

    let engine = Engine::spawn(
        run_ctrl::Params::default(),
        params,
        vec![link],
        Box::new(ChannelSink(tx)),
        None,
    )
    .unwrap();

    Rig {
        engine,
        events,
        sent,
    }
}

fn rig(move_ms: u64) -> Rig {
    rig_with(SimBehaviour::Nominal, move_ms, dispatcher::Params::default())
}

/// Collect events until one matches.
fn wait_for<F: FnMut(&StatusEvent) -> bool>(
    events: &Receiver<StatusEvent>,
    mut pred: F,
) -> Vec<StatusEvent> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = events
            .recv_timeout(remaining)
            .unwrap_or_else(|_| panic!("no matching event, saw {:?}", seen));
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

fn is_state(state: RunState) -> impl Fn(&StatusEvent) -> bool {
    move |e| matches!(e, StatusEvent::State { state: s, .. } if *s == state)
}

fn drain(events: &Receiver<StatusEvent>) {
    while events.try_recv().is_ok() {}
}

/// (axis, index, speed) of every move sent so far.
fn moves(sent: &Arc<Mutex<Vec<ArmFrame>>>) -> Vec<(Axis, i64, i64)> {
    sent.lock()
        .unwrap()
        .iter()
        .filter(|f| f.kind == CmdKind::Move)
        .map(|f| (Axis::from_code(f.params[0]).unwrap(), f.params[1], f.params[3]))
        .collect()
}

#[test]
fn test_steps_run_in_order() {
    let r = rig(5);
    let h = r.engine.handle();

    assert_eq!(
        h.load_script("X(1,10,100),Y(1,10,100) NEXT X(2,20,200),Y(2,20,200) NEXT Z(1,5,50)")
            .unwrap(),
        3
    );
    drain(&r.events);

    h.directive(Directive::Play).unwrap();
    let events = wait_for(&r.events, is_state(RunState::Idle));

    let running: Vec<usize> = events
        .iter()
        .filter_map(|e| match e {
            StatusEvent::State {
                state: RunState::Running,
                cursor: Some(c),
            } => Some(*c),
            _ => None,
        })
        .collect();
    assert_eq!(running, vec![0, 1, 2]);

    assert_eq!(
        moves(&r.sent),
        vec![
            (Axis::X, 1, 100),
            (Axis::Y, 1, 100),
            (Axis::X, 2, 200),
            (Axis::Y, 2, 200),
            (Axis::Z, 1, 50),
        ]
    );

    let status = h.status().unwrap();
    assert_eq!(status.state, RunState::Idle);
    assert_eq!(status.cursor, None);
    assert_eq!(status.last_error, None);
    for a in status.axes.iter() {
        match a.axis {
            Axis::X | Axis::Y | Axis::Z => assert_eq!(a.activity, AxisActivity::Idle),
            _ => assert_eq!(a.activity, AxisActivity::Unknown),
        }
    }
}

#[test]
fn test_pause_resume_stop() {
    let r = rig(200);
    let h = r.engine.handle();

    h.load_script("X(1,10,100) NEXT X(2,20,100)").unwrap();
    h.directive_str("PLAY").unwrap();
    h.directive_str("PAUSE").unwrap();

    // The step in flight at pause completes, the next one is held
    wait_for(&r.events, |e| {
        *e == StatusEvent::State {
            state: RunState::Paused,
            cursor: Some(1),
        }
    });
    assert_eq!(moves(&r.sent), vec![(Axis::X, 1, 100)]);

    h.directive_str("PLAY").unwrap();
    h.directive_str("STOP").unwrap();
    wait_for(&r.events, is_state(RunState::Idle));

    let status = h.status().unwrap();
    assert_eq!(status.state, RunState::Idle);
    assert_eq!(status.cursor, None);
    assert!(moves(&r.sent).len() <= 2);

    // Pausing an idle engine is refused and changes nothing
    assert!(matches!(
        h.directive(Directive::Pause),
        Err(EngineError::Rejected(RunCtrlError::InvalidTransition { .. }))
    ));
}

#[test]
fn test_replay_after_stop_waits_for_the_new_move() {
    let r = rig(300);
    let h = r.engine.handle();

    h.load_script("X(1,10,100) NEXT Y(1,20,100)").unwrap();
    h.directive(Directive::Play).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    h.directive(Directive::Stop).unwrap();
    wait_for(&r.events, is_state(RunState::Idle));
    drain(&r.events);

    // The first X move is still running on the arm when the script is played again
    let replayed = Instant::now();
    h.directive(Directive::Play).unwrap();
    wait_for(&r.events, |e| {
        *e == StatusEvent::State {
            state: RunState::Running,
            cursor: Some(1),
        }
    });
    let elapsed = replayed.elapsed();
    wait_for(&r.events, is_state(RunState::Idle));

    assert!(elapsed >= Duration::from_millis(300), "next step after {:?}", elapsed);
    assert_eq!(
        moves(&r.sent),
        vec![(Axis::X, 1, 100), (Axis::X, 1, 100), (Axis::Y, 1, 100)]
    );
}

#[test]
fn test_timeout_faults_until_stopped() {
    let params = dispatcher::Params {
        ack_timeout_ms: 100,
        ..Default::default()
    };
    let r = rig_with(SimBehaviour::Silent, 5, params);
    let h = r.engine.handle();

    h.load_script("X(1,10,100),G(1,0,100) NEXT X(2,20,100)").unwrap();
    h.directive(Directive::Play).unwrap();
    wait_for(&r.events, |e| matches!(e, StatusEvent::Fault(_)));

    let status = h.status().unwrap();
    assert_eq!(status.state, RunState::Error);
    assert_eq!(status.cursor, Some(0));
    assert!(status.last_error.unwrap().contains("timed out"));
    for a in status.axes.iter().filter(|a| a.axis == Axis::X || a.axis == Axis::G) {
        assert_eq!(a.activity, AxisActivity::Unknown);
    }

    for d in ["PLAY", "PAUSE", "ZERO", "SPEED 100"].iter() {
        assert!(matches!(
            h.directive_str(d),
            Err(EngineError::Rejected(RunCtrlError::Faulted(_)))
        ));
    }

    h.directive_str("STOP").unwrap();
    let status = h.status().unwrap();
    assert_eq!(status.state, RunState::Idle);
    assert_eq!(status.last_error, None);
    assert_eq!(moves(&r.sent).len(), 2);
}

#[test]
fn test_corrupt_frame_faults() {
    let r = rig_with(SimBehaviour::CorruptAcks, 5, dispatcher::Params::default());
    let h = r.engine.handle();

    h.load_script("T(1,10,100)").unwrap();
    h.directive(Directive::Play).unwrap();
    let events = wait_for(&r.events, |e| matches!(e, StatusEvent::Fault(_)));

    assert!(events
        .iter()
        .any(|e| matches!(e, StatusEvent::Warning(w) if w.contains("Discarded"))));
    assert!(h.status().unwrap().last_error.unwrap().contains("Corrupt"));
}

#[test]
fn test_speed_overrides() {
    let r = rig(5);
    let h = r.engine.handle();

    h.directive_str("SPEED;g;2000").unwrap();
    h.directive_str("SPEED 5").unwrap();

    let status = h.status().unwrap();
    assert_eq!(status.speed_overrides.get(&Axis::G), Some(&364));
    for axis in Axis::TRANSLATIONAL.iter() {
        assert_eq!(status.speed_overrides.get(axis), Some(&10));
    }
    assert_eq!(status.state, RunState::Idle);

    h.load_script("X(1,10,900),G(1,0,100)").unwrap();
    drain(&r.events);
    h.directive(Directive::Play).unwrap();
    wait_for(&r.events, is_state(RunState::Idle));

    assert_eq!(moves(&r.sent), vec![(Axis::X, 1, 10), (Axis::G, 1, 364)]);

    // Overrides were forwarded to the arm as they took effect
    let sent = r.sent.lock().unwrap().clone();
    assert!(sent.contains(&ArmFrame::set_speed(Arm::Left, Axis::G, 364)));
    for axis in Axis::TRANSLATIONAL.iter() {
        assert!(sent.contains(&ArmFrame::set_speed(Arm::Left, *axis, 10)));
    }

    assert!(matches!(
        h.directive_str("SPEED Q 10"),
        Err(EngineError::Directive(_))
    ));
    assert!(matches!(h.directive_str("speed 10"), Err(EngineError::Directive(_))));
}

#[test]
fn test_script_swap_at_step_boundary() {
    let r = rig(150);
    let h = r.engine.handle();

    h.load_script("X(1,10,100) NEXT Y(2,20,100)").unwrap();
    drain(&r.events);
    h.directive(Directive::Play).unwrap();

    let replacement = "Z(1,30,100)";
    h.load_script(replacement).unwrap();
    assert!(h.status().unwrap().script_pending);

    wait_for(&r.events, is_state(RunState::Idle));

    // The new script starts from its first step, none of the old steps run after the swap
    assert_eq!(moves(&r.sent), vec![(Axis::X, 1, 100), (Axis::Z, 1, 100)]);
    assert_eq!(h.script_text().unwrap().as_deref(), Some(replacement));
    assert!(!h.status().unwrap().script_pending);
}

#[test]
fn test_load_script_file() {
    let r = rig(5);
    let h = r.engine.handle();

    let path = std::env::temp_dir().join(format!("pal_engine_{}.txt", std::process::id()));
    std::fs::write(&path, "X(1,10,100) NEXT\nY(1,10,100) NEXT\n").unwrap();

    assert_eq!(h.load_script_file(&path).unwrap(), 2);
    assert_eq!(
        h.script_text().unwrap().as_deref(),
        Some("X(1,10,100) NEXT\nY(1,10,100) NEXT\n")
    );

    std::fs::remove_file(&path).unwrap();
    assert!(matches!(
        h.load_script_file(&path),
        Err(EngineError::Script(_))
    ));
    assert_eq!(h.status().unwrap().num_steps, 2);
}

#[test]
fn test_rejected_script_keeps_previous() {
    let r = rig(5);
    let h = r.engine.handle();

    h.load_script("X(1,10,100) NEXT Y(1,10,100)").unwrap();
    assert!(matches!(
        h.load_script("X(1,10,100) NEXT Q(1,2,3)"),
        Err(EngineError::Parse(_))
    ));

    let status = h.status().unwrap();
    assert_eq!(status.num_steps, 2);
    assert_eq!(
        h.script_text().unwrap().as_deref(),
        Some("X(1,10,100) NEXT Y(1,10,100)")
    );
}

#[test]
fn test_zero_returns_every_axis() {
    let r = rig(5);
    let h = r.engine.handle();

    h.directive(Directive::Zero).unwrap();

    let mut idle = 0;
    wait_for(&r.events, |e| {
        if let StatusEvent::Axis {
            activity: AxisActivity::Idle,
            ..
        } = e
        {
            idle += 1;
        }
        idle == Axis::ALL.len()
    });

    let zeroed: Vec<ArmFrame> = Axis::ALL
        .iter()
        .map(|a| ArmFrame::zero_axis(Arm::Left, *a))
        .collect();
    assert_eq!(*r.sent.lock().unwrap(), zeroed);
    assert_eq!(h.status().unwrap().state, RunState::Idle);
}

#[test]
fn test_request_processor() {
    let r = rig(5);
    let h = r.engine.handle();

    assert_eq!(
        request_processor::exec(&h, &ControlRequest::LoadScript("X(1,1,100)".into())),
        ControlResponse::Ok
    );
    assert!(matches!(
        request_processor::exec(&h, &ControlRequest::Directive("JUMP".into())),
        ControlResponse::Rejected(_)
    ));
    assert!(matches!(
        request_processor::exec(&h, &ControlRequest::GetStatus),
        ControlResponse::Status(s) if s.num_steps == 1
    ));
    assert_eq!(
        request_processor::exec(&h, &ControlRequest::GetScript),
        ControlResponse::Script(Some("X(1,1,100)".into()))
    );
}
