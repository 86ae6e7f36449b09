//! Gate discovery
//!
//! Ports are not labelled: the robot knows which devices it expects on
//! each of its parts, and finds the hosting port by challenging every
//! candidate with a detection request and matching the containers the
//! gate enumerates against the expected set.

use log::{debug, info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{self, Duration};
use tokio_serial::SerialPortBuilderExt;

use crate::gate::BAUD_RATE;
use crate::message::{self, Container, ContainerKind, FrameParser, GateMessage};
use crate::types::{HalError, Result};

/// Detection round trip bound.
const DETECTION_TIMEOUT: Duration = Duration::from_millis(500);

/// One device the robot expects to find behind a gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    /// Device name, used when reporting a missing device.
    pub name: String,
    pub kind: ContainerKind,
    pub id: u8,
}

impl Expectation {
    pub fn new(name: &str, kind: ContainerKind, id: u8) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            id,
        }
    }

    /// Alias the gate would report for this device.
    pub fn alias(&self) -> String {
        format!("{}_{}", self.kind.basename(), self.id)
    }

    fn matches(&self, container: &Container) -> bool {
        container.kind == self.kind && container.alias == self.alias()
    }
}

/// Split an expected set into (matched, missing) against one gate's
/// container enumeration.
pub fn match_containers<'a>(
    expected: &'a [Expectation],
    containers: &[Container],
) -> (Vec<&'a Expectation>, Vec<&'a Expectation>) {
    expected
        .iter()
        .partition(|dev| containers.iter().any(|c| dev.matches(c)))
}

/// Challenge one transport with a detection request.
///
/// Returns the enumerated containers, or an empty list when the gate
/// stays silent past the round-trip bound.
pub async fn identify_containers<T>(io: &mut T) -> Result<Vec<Container>>
where
    T: AsyncRead + AsyncWrite + Send + Unpin,
{
    io.write_all(&message::detection_request()).await?;
    io.flush().await?;

    let mut parser = FrameParser::new();
    let mut buf = [0u8; 256];
    let deadline = time::Instant::now() + DETECTION_TIMEOUT;

    loop {
        let read = match time::timeout_at(deadline, io.read(&mut buf)).await {
            Ok(read) => read,
            Err(_) => return Ok(Vec::new()),
        };
        let n = read?;
        if n == 0 {
            return Ok(Vec::new());
        }
        for payload in parser.push(&buf[..n]) {
            match message::parse_payload(&payload) {
                Some(GateMessage::Containers(containers)) => return Ok(containers),
                Some(GateMessage::Assert(text)) => return Err(HalError::GateAssert(text)),
                _ => {}
            }
        }
    }
}

/// Pick the port whose containers cover the expected set.
///
/// Zero missing devices wins outright; otherwise the best candidate is
/// reported as a fatal discovery error carrying its missing list.
pub fn select_port(
    expected: &[Expectation],
    enumerations: &[(String, Vec<Container>)],
) -> Result<String> {
    let mut best: Option<(&str, Vec<&Expectation>)> = None;

    for (port, containers) in enumerations {
        let (_, missing) = match_containers(expected, containers);
        if missing.is_empty() {
            return Ok(port.clone());
        }
        debug!(
            "{port}: {} expected device(s) not enumerated",
            missing.len()
        );
        if best
            .as_ref()
            .is_none_or(|(_, best_missing)| missing.len() < best_missing.len())
        {
            best = Some((port, missing));
        }
    }

    let (port, missing) = best.ok_or_else(|| HalError::Config("no candidate port".into()))?;
    Err(HalError::DiscoveryMissing {
        port: port.to_owned(),
        missing: missing.iter().map(|dev| dev.name.clone()).collect(),
    })
}

/// Identify which of the candidate ports hosts the expected device set.
pub async fn find_gate(expected: &[Expectation], ports: &[String]) -> Result<String> {
    let mut enumerations = Vec::with_capacity(ports.len());

    for port in ports {
        let mut stream = tokio_serial::new(port, BAUD_RATE).open_native_async()?;
        let containers = identify_containers(&mut stream).await?;
        info!("{port}: enumerated {} container(s)", containers.len());

        let (_, missing) = match_containers(expected, &containers);
        if missing.is_empty() {
            return Ok(port.clone());
        }
        enumerations.push((port.clone(), containers));
    }

    select_port(expected, &enumerations)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(kind: ContainerKind, alias: &str) -> Container {
        Container {
            kind,
            alias: alias.to_owned(),
        }
    }

    fn expected_pair() -> Vec<Expectation> {
        vec![
            Expectation::new("l_shoulder_pitch", ContainerKind::DynamixelMotor, 20),
            Expectation::new("l_shoulder_roll", ContainerKind::DynamixelMotor, 21),
        ]
    }

    #[test]
    fn port_with_zero_missing_wins() {
        let enumerations = vec![
            (
                "/dev/ttyUSB0".to_owned(),
                vec![
                    container(ContainerKind::DynamixelMotor, "dxl_10"),
                    container(ContainerKind::DynamixelMotor, "dxl_11"),
                ],
            ),
            (
                "/dev/ttyUSB1".to_owned(),
                vec![
                    container(ContainerKind::DynamixelMotor, "dxl_20"),
                    container(ContainerKind::DynamixelMotor, "dxl_21"),
                ],
            ),
        ];
        assert_eq!(
            select_port(&expected_pair(), &enumerations).unwrap(),
            "/dev/ttyUSB1"
        );
    }

    #[test]
    fn best_candidate_is_reported_when_nothing_matches_fully() {
        let enumerations = vec![
            ("/dev/ttyUSB0".to_owned(), vec![]),
            (
                "/dev/ttyUSB1".to_owned(),
                vec![container(ContainerKind::DynamixelMotor, "dxl_20")],
            ),
        ];
        match select_port(&expected_pair(), &enumerations).unwrap_err() {
            HalError::DiscoveryMissing { port, missing } => {
                assert_eq!(port, "/dev/ttyUSB1");
                assert_eq!(missing, vec!["l_shoulder_roll".to_owned()]);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn matching_requires_both_kind_and_alias() {
        let expected = vec![Expectation::new("r_force_gripper", ContainerKind::Load, 10)];
        let containers = vec![
            container(ContainerKind::DynamixelMotor, "load_10"),
            container(ContainerKind::Load, "load_11"),
        ];
        let (matched, missing) = match_containers(&expected, &containers);
        assert!(matched.is_empty());
        assert_eq!(missing.len(), 1);

        let containers = vec![container(ContainerKind::Load, "load_10")];
        let (matched, missing) = match_containers(&expected, &containers);
        assert_eq!(matched.len(), 1);
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn identify_reads_the_container_answer() {
        let (mut host_side, mut gate_side) = tokio::io::duplex(1024);

        let gate = tokio::spawn(async move {
            let mut buf = [0u8; 16];
            let n = gate_side.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], message::detection_request().as_slice());

            let mut payload = vec![message::msg_type::CONTAINER_DESCRIPTOR];
            payload.extend_from_slice(&[0, 6]);
            payload.extend_from_slice(b"dxl_20");
            gate_side
                .write_all(&message::frame(&payload))
                .await
                .unwrap();
        });

        let containers = identify_containers(&mut host_side).await.unwrap();
        gate.await.unwrap();
        assert_eq!(
            containers,
            vec![container(ContainerKind::DynamixelMotor, "dxl_20")]
        );
    }
}
