//! Gate wire protocol: framing, outgoing builders, incoming parser
//!
//! Every frame on the wire is `0xFF 0xFF LEN PAYLOAD[LEN]` with LEN in
//! [1, 255] counting payload bytes only. The first payload byte is the
//! message type. The serial stream may start mid-frame and frames arrive
//! in arbitrary chunks, so decoding goes through the incremental
//! [`FrameParser`].

use log::debug;

use crate::registers::OrbitaRegister;

pub const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Message type codes
///
/// The values mirror the message table of the gate firmware header
/// (gate/include/msg_type.h) and must stay in sync with it.
pub mod msg_type {
    pub const DXL_GET_REG: u8 = 10;
    pub const DXL_SET_REG: u8 = 11;
    pub const DXL_PUB_DATA: u8 = 15;
    pub const LOAD_PUB_DATA: u8 = 20;
    pub const FAN_GET: u8 = 30;
    pub const FAN_SET: u8 = 31;
    pub const FAN_PUB_DATA: u8 = 35;
    pub const ORBITA_GET: u8 = 50;
    pub const ORBITA_SET: u8 = 51;
    pub const ORBITA_PUB_DATA: u8 = 55;
    pub const KEEP_ALIVE: u8 = 200;
    pub const DETECTION_REQUEST: u8 = 201;
    pub const CONTAINER_DESCRIPTOR: u8 = 205;
    pub const ASSERT: u8 = 222;
}

// ============================================================================
// Outgoing frames
// ============================================================================

/// Wrap a payload into a wire frame.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    debug_assert!(!payload.is_empty() && payload.len() <= 255);
    let mut data = Vec::with_capacity(payload.len() + 3);
    data.extend_from_slice(&HEADER);
    data.push(payload.len() as u8);
    data.extend_from_slice(payload);
    data
}

/// Grouped register read: one request covers every listed motor.
pub fn dxl_get(addr: u8, width: u8, ids: &[u8]) -> Vec<u8> {
    let mut payload = vec![msg_type::DXL_GET_REG, addr, width];
    payload.extend_from_slice(ids);
    frame(&payload)
}

/// Grouped register write: per-motor raw values, all for the same register.
pub fn dxl_set(addr: u8, width: u8, values: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let mut payload = vec![msg_type::DXL_SET_REG, addr, width];
    for (id, raw) in values {
        debug_assert_eq!(raw.len(), width as usize);
        payload.push(*id);
        payload.extend_from_slice(raw);
    }
    frame(&payload)
}

pub fn orbita_get(id: u8, register: OrbitaRegister) -> Vec<u8> {
    frame(&[msg_type::ORBITA_GET, id, register.code()])
}

/// Per-disk register write on one actuator.
pub fn orbita_set(id: u8, register: OrbitaRegister, values: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let mut payload = vec![msg_type::ORBITA_SET, id, register.code()];
    for (disk_index, raw) in values {
        payload.push(*disk_index);
        payload.extend_from_slice(raw);
    }
    frame(&payload)
}

pub fn fan_get(ids: &[u8]) -> Vec<u8> {
    let mut payload = vec![msg_type::FAN_GET];
    payload.extend_from_slice(ids);
    frame(&payload)
}

pub fn fan_set(states: &[(u8, u8)]) -> Vec<u8> {
    let mut payload = vec![msg_type::FAN_SET];
    for (id, state) in states {
        payload.push(*id);
        payload.push(*state);
    }
    frame(&payload)
}

pub fn keep_alive() -> Vec<u8> {
    frame(&[msg_type::KEEP_ALIVE])
}

pub fn detection_request() -> Vec<u8> {
    frame(&[msg_type::DETECTION_REQUEST])
}

// ============================================================================
// Incoming messages
// ============================================================================

/// One motor entry inside a grouped Dynamixel publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DxlUpdate {
    pub id: u8,
    pub error: u16,
    pub value: Vec<u8>,
}

/// Container classes enumerated by a gate during detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerKind {
    DynamixelMotor,
    Load,
    OrbitaActuator,
    Fan,
}

impl ContainerKind {
    pub fn from_code(code: u8) -> Option<ContainerKind> {
        match code {
            0 => Some(ContainerKind::DynamixelMotor),
            1 => Some(ContainerKind::Load),
            2 => Some(ContainerKind::OrbitaActuator),
            3 => Some(ContainerKind::Fan),
            _ => None,
        }
    }

    /// Alias prefix used by the gate for this class (`dxl_<id>`, ...).
    pub fn basename(self) -> &'static str {
        match self {
            ContainerKind::DynamixelMotor => "dxl",
            ContainerKind::Load => "load",
            ContainerKind::OrbitaActuator => "orbita",
            ContainerKind::Fan => "fan",
        }
    }
}

/// One attached device as enumerated by a gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub kind: ContainerKind,
    pub alias: String,
}

/// Decoded gate-to-host message
#[derive(Debug, Clone, PartialEq)]
pub enum GateMessage {
    /// Grouped register publish; `addr` is the wire register address.
    DxlPublish { addr: u8, entries: Vec<DxlUpdate> },
    /// One force reading per sensor.
    LoadPublish { entries: Vec<(u8, f32)> },
    /// Raw per-disk values for one register of one actuator.
    OrbitaPublish {
        id: u8,
        register: u8,
        values: Vec<u8>,
    },
    FanPublish { entries: Vec<(u8, u8)> },
    /// Response to a detection request.
    Containers(Vec<Container>),
    /// Firmware assertion text; the gate is lost.
    Assert(String),
    KeepAlive,
}

/// Decode a framed payload into a typed message.
///
/// Unknown types and malformed payloads yield `None`; the stream itself
/// is unaffected.
pub fn parse_payload(payload: &[u8]) -> Option<GateMessage> {
    let (&kind, body) = payload.split_first()?;
    match kind {
        msg_type::DXL_PUB_DATA => {
            let (&addr, rest) = body.split_first()?;
            let (&val_size, rest) = rest.split_first()?;
            let entry_size = 1 + 2 + val_size as usize;
            let mut entries = Vec::with_capacity(rest.len() / entry_size);
            for chunk in rest.chunks_exact(entry_size) {
                entries.push(DxlUpdate {
                    id: chunk[0],
                    error: u16::from_le_bytes([chunk[1], chunk[2]]),
                    value: chunk[3..].to_vec(),
                });
            }
            Some(GateMessage::DxlPublish { addr, entries })
        }
        msg_type::LOAD_PUB_DATA => {
            let mut entries = Vec::with_capacity(body.len() / 5);
            for chunk in body.chunks_exact(5) {
                let force = f32::from_le_bytes([chunk[1], chunk[2], chunk[3], chunk[4]]);
                entries.push((chunk[0], force));
            }
            Some(GateMessage::LoadPublish { entries })
        }
        msg_type::ORBITA_PUB_DATA => {
            let (&id, rest) = body.split_first()?;
            let (&register, values) = rest.split_first()?;
            Some(GateMessage::OrbitaPublish {
                id,
                register,
                values: values.to_vec(),
            })
        }
        msg_type::FAN_PUB_DATA => {
            let entries = body.chunks_exact(2).map(|c| (c[0], c[1])).collect();
            Some(GateMessage::FanPublish { entries })
        }
        msg_type::CONTAINER_DESCRIPTOR => {
            let mut containers = Vec::new();
            let mut rest = body;
            while rest.len() >= 2 {
                let kind = ContainerKind::from_code(rest[0])?;
                let alias_len = rest[1] as usize;
                if rest.len() < 2 + alias_len {
                    return None;
                }
                let alias = String::from_utf8_lossy(&rest[2..2 + alias_len]).into_owned();
                containers.push(Container { kind, alias });
                rest = &rest[2 + alias_len..];
            }
            Some(GateMessage::Containers(containers))
        }
        msg_type::ASSERT => Some(GateMessage::Assert(
            String::from_utf8_lossy(body).into_owned(),
        )),
        msg_type::KEEP_ALIVE => Some(GateMessage::KeepAlive),
        other => {
            debug!("dropping message of unknown type {other}");
            None
        }
    }
}

// ============================================================================
// Stream framing
// ============================================================================

/// Incremental splitter of a raw serial stream into frame payloads
///
/// Bytes before the first header are noise and silently discarded; a
/// trailing fragment is retained until enough bytes arrive to complete
/// it. The same byte sequence yields the same payloads regardless of how
/// it is chunked.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: Vec<u8>,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning every payload completed by it.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(data);
        let mut payloads = Vec::new();

        loop {
            match find_header(&self.buffer) {
                Some(at) => {
                    self.buffer.drain(..at);
                }
                None => {
                    // a trailing 0xFF may be the first half of a header
                    let keep = usize::from(self.buffer.last() == Some(&0xFF));
                    let junk = self.buffer.len() - keep;
                    self.buffer.drain(..junk);
                    return payloads;
                }
            }

            if self.buffer.len() < 3 {
                return payloads;
            }
            let len = self.buffer[2] as usize;
            if len == 0 {
                // invalid length byte: drop this header, keep scanning
                debug!("dropping frame with zero length byte");
                self.buffer.drain(..2);
                continue;
            }
            if self.buffer.len() < 3 + len {
                return payloads;
            }

            payloads.push(self.buffer[3..3 + len].to_vec());
            self.buffer.drain(..3 + len);
        }
    }
}

fn find_header(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == HEADER)
}
