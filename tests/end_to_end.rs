//! End-to-end scenarios against mocked gates
//!
//! Each test wires the robot core to in-memory duplex transports. The
//! mock gate records every frame the host sends (keep-alives excluded)
//! and can either stay silent, publish on demand, or answer get requests
//! like the firmware would.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};

use tokio::io::{self, AsyncReadExt, AsyncWriteExt, DuplexStream, WriteHalf};
use tokio::time::{sleep, Duration};

use reachy_hal::config::{DeviceConfig, PartConfig};
use reachy_hal::controller::Controller;
use reachy_hal::message::{self, msg_type, FrameParser};
use reachy_hal::registers::{DxlModel, DxlRegister, OrbitaRegister};
use reachy_hal::robot::Robot;
use reachy_hal::types::{HalError, JointRegister};

type Responder = Box<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

struct MockGate {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    writer: Arc<tokio::sync::Mutex<WriteHalf<DuplexStream>>>,
}

impl MockGate {
    fn spawn(transport: DuplexStream, responder: Option<Responder>) -> Self {
        let (mut reader, writer) = io::split(transport);
        let writer = Arc::new(tokio::sync::Mutex::new(writer));
        let sent: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));

        let task_writer = writer.clone();
        let task_sent = sent.clone();
        tokio::spawn(async move {
            let mut parser = FrameParser::new();
            let mut buf = [0u8; 256];
            loop {
                let n = match reader.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                };
                for payload in parser.push(&buf[..n]) {
                    if payload[0] != msg_type::KEEP_ALIVE {
                        task_sent.lock().unwrap().push(payload.clone());
                    }
                    if let Some(responder) = &responder {
                        for answer in responder(&payload) {
                            let mut writer = task_writer.lock().await;
                            let _ = writer.write_all(&message::frame(&answer)).await;
                        }
                    }
                }
            }
        });

        Self { sent, writer }
    }

    /// Push an unsolicited publish to the host.
    async fn publish(&self, payload: &[u8]) {
        let mut writer = self.writer.lock().await;
        writer.write_all(&message::frame(payload)).await.unwrap();
    }

    fn requests(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    fn requests_of_type(&self, kind: u8) -> Vec<Vec<u8>> {
        self.requests()
            .into_iter()
            .filter(|payload| payload[0] == kind)
            .collect()
    }
}

/// Answer every get like the firmware: dxl reads resolve to the mapped
/// raw value (default 0), fan reads to off, orbita reads to zeroed disks.
fn firmware_responder(dxl_values: HashMap<u8, u16>) -> Responder {
    Box::new(move |payload: &[u8]| match payload[0] {
        msg_type::DXL_GET_REG => {
            let addr = payload[1];
            let width = payload[2];
            let mut answer = vec![msg_type::DXL_PUB_DATA, addr, width];
            for &id in &payload[3..] {
                let raw = dxl_values.get(&id).copied().unwrap_or(0);
                answer.push(id);
                answer.extend([0, 0]);
                match width {
                    1 => answer.push(raw as u8),
                    _ => answer.extend(raw.to_le_bytes()),
                }
            }
            vec![answer]
        }
        msg_type::FAN_GET => {
            let mut answer = vec![msg_type::FAN_PUB_DATA];
            for &id in &payload[1..] {
                answer.extend([id, 0]);
            }
            vec![answer]
        }
        msg_type::ORBITA_GET => {
            let register = OrbitaRegister::from_code(payload[2]).unwrap();
            let per_disk = register.value_kind().bytes_per_disk();
            let mut answer = vec![msg_type::ORBITA_PUB_DATA, payload[1], payload[2]];
            answer.extend(std::iter::repeat(0u8).take(3 * per_disk));
            vec![answer]
        }
        _ => Vec::new(),
    })
}

fn dxl_part(name: &str, motors: &[(&str, u8, DxlModel)]) -> PartConfig {
    PartConfig {
        name: name.to_owned(),
        devices: motors
            .iter()
            .map(|(joint, id, model)| {
                (
                    (*joint).to_owned(),
                    DeviceConfig::Dxl {
                        id: *id,
                        model: *model,
                        offset: 0.0,
                        direct: true,
                    },
                )
            })
            .collect(),
    }
}

// ============================================================================
// Scenario 1: grouped reads across two gates
// ============================================================================

#[tokio::test]
async fn present_position_query_groups_one_frame_per_gate() {
    let (host_a, gate_a) = io::duplex(4096);
    let (host_b, gate_b) = io::duplex(4096);

    let parts = [
        dxl_part(
            "gate_a",
            &[("j1", 10, DxlModel::MX106), ("j2", 11, DxlModel::MX64)],
        ),
        dxl_part("gate_b", &[("j3", 20, DxlModel::MX28)]),
    ];
    let mut robot = Robot::with_transports(&parts, vec![host_a, host_b])
        .await
        .unwrap();

    let gate_a = MockGate::spawn(
        gate_a,
        Some(firmware_responder(HashMap::from([(10, 1024), (11, 2048)]))),
    );
    let gate_b = MockGate::spawn(
        gate_b,
        Some(firmware_responder(HashMap::from([(20, 3072)]))),
    );

    let positions = robot
        .get_joints_value(JointRegister::PresentPosition, &["j1", "j3", "j2"], 3)
        .await
        .unwrap();

    // caller order preserved, conversions centered on the envelope
    assert!((positions[0] - (-PI / 2.0)).abs() < 2e-3, "{positions:?}");
    assert!((positions[1] - PI / 2.0).abs() < 2e-3, "{positions:?}");
    assert!(positions[2].abs() < 2e-3, "{positions:?}");

    assert_eq!(
        gate_a.requests_of_type(msg_type::DXL_GET_REG),
        vec![vec![msg_type::DXL_GET_REG, 36, 2, 10, 11]]
    );
    assert_eq!(
        gate_b.requests_of_type(msg_type::DXL_GET_REG),
        vec![vec![msg_type::DXL_GET_REG, 36, 2, 20]]
    );

    // steady state: values are streamed, a second read asks nothing new
    let _ = robot
        .get_joints_value(JointRegister::PresentPosition, &["j1", "j2"], 0)
        .await
        .unwrap();
    assert_eq!(gate_a.requests_of_type(msg_type::DXL_GET_REG).len(), 1);

    robot.stop().await;
}

#[tokio::test]
async fn moving_speed_query_emits_exactly_two_frames() {
    let (host_a, gate_a) = io::duplex(4096);
    let (host_b, gate_b) = io::duplex(4096);

    let parts = [
        dxl_part(
            "gate_a",
            &[("j1", 10, DxlModel::MX106), ("j2", 11, DxlModel::MX64)],
        ),
        dxl_part("gate_b", &[("j3", 20, DxlModel::MX28)]),
    ];
    let mut robot = Robot::with_transports(&parts, vec![host_a, host_b])
        .await
        .unwrap();

    let gate_a = MockGate::spawn(gate_a, Some(firmware_responder(HashMap::new())));
    let gate_b = MockGate::spawn(gate_b, Some(firmware_responder(HashMap::new())));

    robot
        .get_joints_value(JointRegister::MovingSpeed, &["j1", "j2", "j3"], 3)
        .await
        .unwrap();

    assert_eq!(
        gate_a.requests_of_type(msg_type::DXL_GET_REG),
        vec![vec![msg_type::DXL_GET_REG, 32, 2, 10, 11]]
    );
    assert_eq!(
        gate_b.requests_of_type(msg_type::DXL_GET_REG),
        vec![vec![msg_type::DXL_GET_REG, 32, 2, 20]]
    );

    robot.stop().await;
}

// ============================================================================
// Scenario 2: goal write on a compliant motor stays local
// ============================================================================

#[tokio::test]
async fn goal_write_on_torque_off_motor_sends_nothing() {
    let (host, gate) = io::duplex(4096);
    let parts = [dxl_part("gate", &[("j1", 10, DxlModel::MX64)])];
    let mut robot = Robot::with_transports(&parts, vec![host]).await.unwrap();
    let gate = MockGate::spawn(gate, None);

    let motor = robot.registry().dxl(10).unwrap();
    motor.cell(DxlRegister::TorqueEnable).update(vec![0]);

    robot
        .set_joints_value(JointRegister::GoalPosition, &[("j1", 1.0)])
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    assert!(gate.requests().is_empty(), "{:?}", gate.requests());

    // the local cell still observes the intended setpoint
    let expected = motor
        .convert_to_raw(DxlRegister::GoalPosition, 1.0)
        .unwrap();
    assert_eq!(motor.cell(DxlRegister::GoalPosition).peek(), Some(expected));

    robot.stop().await;
}

// ============================================================================
// Scenario 3: torque enable replays speed and refreshes goal
// ============================================================================

#[tokio::test]
async fn torque_enable_resends_speed_then_refreshes_goal() {
    let (host, gate) = io::duplex(4096);
    let parts = [dxl_part("gate", &[("j1", 10, DxlModel::MX64)])];
    let mut robot = Robot::with_transports(&parts, vec![host]).await.unwrap();
    let gate = MockGate::spawn(gate, Some(firmware_responder(HashMap::new())));

    let motor = robot.registry().dxl(10).unwrap();
    let cached_speed = motor.convert_to_raw(DxlRegister::MovingSpeed, 1.0).unwrap();
    motor
        .cell(DxlRegister::MovingSpeed)
        .update(cached_speed.clone());

    robot
        .set_joints_value(JointRegister::TorqueEnable, &[("j1", 1.0)])
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;

    let mut expected_speed = vec![msg_type::DXL_SET_REG, 32, 2, 10];
    expected_speed.extend(&cached_speed);
    assert_eq!(
        gate.requests(),
        vec![
            vec![msg_type::DXL_SET_REG, 24, 1, 10, 1],
            expected_speed,
            vec![msg_type::DXL_GET_REG, 30, 2, 10],
        ]
    );

    robot.stop().await;
}

// ============================================================================
// Scenario 4: force sensor publish
// ============================================================================

#[tokio::test]
async fn force_publish_is_read_back_in_newtons() {
    let (host, gate) = io::duplex(4096);
    let parts = [PartConfig {
        name: "right_arm".to_owned(),
        devices: vec![(
            "r_force_gripper".to_owned(),
            DeviceConfig::ForceSensor { id: 10 },
        )],
    }];
    let mut robot = Robot::with_transports(&parts, vec![host]).await.unwrap();
    let gate = MockGate::spawn(gate, None);

    gate.publish(&[msg_type::LOAD_PUB_DATA, 10, 0x00, 0x00, 0x80, 0x3F])
        .await;

    let forces = robot.get_force(&["r_force_gripper"]).await.unwrap();
    assert_eq!(forces, vec![1.0]);

    robot.stop().await;
}

// ============================================================================
// Scenario 5: firmware assertion poisons the robot
// ============================================================================

#[tokio::test]
async fn assertion_fails_the_next_call_with_its_text() {
    let (host, gate) = io::duplex(4096);
    let parts = [dxl_part("gate", &[("j1", 10, DxlModel::MX64)])];
    let mut robot = Robot::with_transports(&parts, vec![host]).await.unwrap();
    let gate = MockGate::spawn(gate, None);

    let mut payload = vec![msg_type::ASSERT];
    payload.extend_from_slice(b"overcurrent");
    gate.publish(&payload).await;
    sleep(Duration::from_millis(50)).await;

    let err = robot
        .get_joints_value(JointRegister::PresentPosition, &["j1"], 0)
        .await
        .unwrap_err();
    match err {
        HalError::GateAssert(text) => assert_eq!(text, "overcurrent"),
        other => panic!("unexpected error {other:?}"),
    }

    robot.stop().await;
}

// ============================================================================
// Scenario 6: concurrent reads keep the wire well-framed
// ============================================================================

#[tokio::test]
async fn concurrent_reads_do_not_interleave_frames() {
    let (host, gate) = io::duplex(8192);
    let parts = [dxl_part(
        "gate",
        &[("j1", 10, DxlModel::MX64), ("j2", 11, DxlModel::MX64)],
    )];
    let robot = Arc::new(
        Robot::with_transports(&parts, vec![host]).await.unwrap(),
    );
    let gate = MockGate::spawn(gate, Some(firmware_responder(HashMap::new())));

    let left = {
        let robot = robot.clone();
        tokio::spawn(async move {
            robot
                .get_joints_value(JointRegister::MovingSpeed, &["j1"], 3)
                .await
        })
    };
    let right = {
        let robot = robot.clone();
        tokio::spawn(async move {
            robot
                .get_joints_value(JointRegister::TorqueLimit, &["j2"], 3)
                .await
        })
    };

    left.await.unwrap().unwrap();
    right.await.unwrap().unwrap();

    // the mock gate reparsed the stream: every request must have come out
    // whole, one per register
    let requests = gate.requests_of_type(msg_type::DXL_GET_REG);
    assert_eq!(requests.len(), 2);
    assert!(requests.contains(&vec![msg_type::DXL_GET_REG, 32, 2, 10]));
    assert!(requests.contains(&vec![msg_type::DXL_GET_REG, 34, 2, 11]));
}

// ============================================================================
// Cached facade: write coalescing
// ============================================================================

#[tokio::test]
async fn facade_forwards_only_changed_writes() {
    let (host, gate) = io::duplex(8192);
    let parts = [PartConfig {
        name: "gate".to_owned(),
        devices: vec![
            (
                "j1".to_owned(),
                DeviceConfig::Dxl {
                    id: 10,
                    model: DxlModel::MX64,
                    offset: 0.0,
                    direct: true,
                },
            ),
            ("j1_fan".to_owned(), DeviceConfig::DxlFan { id: 10 }),
        ],
    }];
    let robot = Robot::with_transports(&parts, vec![host]).await.unwrap();
    let gate = MockGate::spawn(gate, Some(firmware_responder(HashMap::new())));

    let controller = Controller::new(robot).await.unwrap();

    let torque_writes = |gate: &MockGate| {
        gate.requests()
            .into_iter()
            .filter(|p| p[0] == msg_type::DXL_SET_REG && p[1] == 24)
            .count()
    };

    // seeded torque_enable is 0: the joint is already compliant
    assert_eq!(controller.get_compliant(&["j1"]).unwrap(), vec![true]);
    assert!(controller.set_compliance(&[("j1", true)]).await.unwrap());
    sleep(Duration::from_millis(20)).await;
    assert_eq!(torque_writes(&gate), 0);

    // first real change goes out
    assert!(controller.set_compliance(&[("j1", false)]).await.unwrap());
    sleep(Duration::from_millis(20)).await;
    assert_eq!(torque_writes(&gate), 1);

    // repeating it is coalesced away
    assert!(controller.set_compliance(&[("j1", false)]).await.unwrap());
    sleep(Duration::from_millis(20)).await;
    assert_eq!(torque_writes(&gate), 1);

    // a different value goes out again
    assert!(controller.set_compliance(&[("j1", true)]).await.unwrap());
    sleep(Duration::from_millis(20)).await;
    assert_eq!(torque_writes(&gate), 2);

    // goal coalescing, now that torque is known: enable first
    assert!(controller.set_compliance(&[("j1", false)]).await.unwrap());
    let goal_writes = |gate: &MockGate| {
        gate.requests()
            .into_iter()
            .filter(|p| p[0] == msg_type::DXL_SET_REG && p[1] == 30)
            .count()
    };
    assert!(controller.set_goal_positions(&[("j1", 0.5)]).await.unwrap());
    assert!(controller.set_goal_positions(&[("j1", 0.5)]).await.unwrap());
    sleep(Duration::from_millis(20)).await;
    assert_eq!(goal_writes(&gate), 1);
    assert!(controller.set_goal_positions(&[("j1", 0.75)]).await.unwrap());
    sleep(Duration::from_millis(20)).await;
    assert_eq!(goal_writes(&gate), 2);

    controller.stop().await;
}
