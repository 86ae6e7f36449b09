//! Orbita actuator device model
//!
//! An Orbita is a parallel mechanism driven by three disks. The gate
//! addresses the actuator as a whole: every register publish carries the
//! values of all three disks back to back (top, middle, bottom), and is
//! split evenly here into the per-disk cells.

use std::collections::HashMap;

use log::warn;

use crate::cell::SyncCell;
use crate::convert;
use crate::registers::{OrbitaRegister, OrbitaValueKind, ORBITA_REGISTERS};
use crate::types::Pid;

/// One of the three disks of an actuator, in wire order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disk {
    Top,
    Middle,
    Bottom,
}

pub const DISKS: [Disk; 3] = [Disk::Top, Disk::Middle, Disk::Bottom];

impl Disk {
    /// Index of this disk inside a wire payload.
    pub const fn index(self) -> usize {
        match self {
            Disk::Top => 0,
            Disk::Middle => 1,
            Disk::Bottom => 2,
        }
    }

    /// Joint name suffix for this disk (`<actuator>_disk_top`, ...).
    pub fn suffix(self) -> &'static str {
        match self {
            Disk::Top => "disk_top",
            Disk::Middle => "disk_middle",
            Disk::Bottom => "disk_bottom",
        }
    }
}

#[derive(Debug)]
struct OrbitaDisk {
    registers: HashMap<OrbitaRegister, SyncCell<Vec<u8>>>,
}

impl OrbitaDisk {
    fn new() -> Self {
        Self {
            registers: ORBITA_REGISTERS
                .into_iter()
                .map(|reg| (reg, SyncCell::new()))
                .collect(),
        }
    }
}

/// A three-disk actuator attached to a gate
#[derive(Debug)]
pub struct OrbitaActuator {
    id: u8,
    disks: [OrbitaDisk; 3],
}

impl OrbitaActuator {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            disks: [OrbitaDisk::new(), OrbitaDisk::new(), OrbitaDisk::new()],
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn cell(&self, disk: Disk, register: OrbitaRegister) -> &SyncCell<Vec<u8>> {
        &self.disks[disk.index()].registers[&register]
    }

    /// Mark a register pending on all three disks.
    pub fn clear_value(&self, register: OrbitaRegister) {
        for disk in DISKS {
            self.cell(disk, register).reset();
        }
    }

    pub fn is_value_set(&self, register: OrbitaRegister) -> bool {
        DISKS.into_iter().all(|disk| self.cell(disk, register).is_set())
    }

    /// Store a published payload, split evenly across top, middle, bottom.
    pub fn update_value(&self, register: OrbitaRegister, values: &[u8]) {
        if values.len() % 3 != 0 {
            warn!(
                "orbita {} register {}: publish of {} bytes is not divisible by 3, dropped",
                self.id,
                register.name(),
                values.len()
            );
            return;
        }
        let per_disk = values.len() / 3;
        for disk in DISKS {
            let start = disk.index() * per_disk;
            self.cell(disk, register)
                .update(values[start..start + per_disk].to_vec());
        }
    }

    // ========================================================================
    // Value codecs
    // ========================================================================

    /// Encode one disk's scalar value for the wire.
    pub fn encode_scalar(&self, register: OrbitaRegister, usi: f64) -> Vec<u8> {
        match register.value_kind() {
            OrbitaValueKind::Count => convert::orbita_position_to_raw(usi).to_le_bytes().to_vec(),
            OrbitaValueKind::Float => (usi as f32).to_le_bytes().to_vec(),
            OrbitaValueKind::Byte => vec![u8::from(usi != 0.0)],
            // pid and angle_limit carry structured values, not scalars
            OrbitaValueKind::PidGains | OrbitaValueKind::Limits => Vec::new(),
        }
    }

    /// Decode one disk's scalar value from the wire.
    pub fn decode_scalar(&self, register: OrbitaRegister, value: &[u8]) -> f64 {
        match register.value_kind() {
            OrbitaValueKind::Count => {
                let count = read_i32(value);
                convert::orbita_position_to_usi(count)
            }
            OrbitaValueKind::Float => read_f32(value) as f64,
            OrbitaValueKind::Byte => value.first().copied().unwrap_or(0) as f64,
            OrbitaValueKind::PidGains | OrbitaValueKind::Limits => f64::NAN,
        }
    }

    pub fn encode_pid(&self, pid: Pid) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(12);
        bytes.extend_from_slice(&pid.p.to_le_bytes());
        bytes.extend_from_slice(&pid.i.to_le_bytes());
        bytes.extend_from_slice(&pid.d.to_le_bytes());
        bytes
    }

    pub fn decode_pid(&self, value: &[u8]) -> Pid {
        if value.len() < 12 {
            return Pid::UNKNOWN;
        }
        Pid::new(
            read_f32(&value[0..4]),
            read_f32(&value[4..8]),
            read_f32(&value[8..12]),
        )
    }

    /// Encode one disk's (low, high) angle limits in rad.
    pub fn encode_limits(&self, low: f64, high: f64) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(8);
        bytes.extend_from_slice(&convert::orbita_position_to_raw(low).to_le_bytes());
        bytes.extend_from_slice(&convert::orbita_position_to_raw(high).to_le_bytes());
        bytes
    }

    pub fn decode_limits(&self, value: &[u8]) -> (f64, f64) {
        if value.len() < 8 {
            return (f64::NAN, f64::NAN);
        }
        (
            convert::orbita_position_to_usi(read_i32(&value[0..4])),
            convert::orbita_position_to_usi(read_i32(&value[4..8])),
        )
    }
}

fn read_i32(bytes: &[u8]) -> i32 {
    let mut buf = [0u8; 4];
    let n = bytes.len().min(4);
    buf[..n].copy_from_slice(&bytes[..n]);
    i32::from_le_bytes(buf)
}

fn read_f32(bytes: &[u8]) -> f32 {
    let mut buf = [0u8; 4];
    let n = bytes.len().min(4);
    buf[..n].copy_from_slice(&bytes[..n]);
    f32::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_is_split_across_disks_in_order() {
        let orbita = OrbitaActuator::new(40);
        let payload: Vec<u8> = (0..12).collect();
        orbita.update_value(OrbitaRegister::PresentPosition, &payload);

        assert_eq!(
            orbita.cell(Disk::Top, OrbitaRegister::PresentPosition).peek(),
            Some(vec![0, 1, 2, 3])
        );
        assert_eq!(
            orbita
                .cell(Disk::Middle, OrbitaRegister::PresentPosition)
                .peek(),
            Some(vec![4, 5, 6, 7])
        );
        assert_eq!(
            orbita
                .cell(Disk::Bottom, OrbitaRegister::PresentPosition)
                .peek(),
            Some(vec![8, 9, 10, 11])
        );
    }

    #[test]
    fn indivisible_publish_is_dropped() {
        let orbita = OrbitaActuator::new(40);
        orbita.update_value(OrbitaRegister::PresentPosition, &[1, 2, 3, 4]);
        assert!(!orbita.is_value_set(OrbitaRegister::PresentPosition));
    }

    #[test]
    fn scalar_codec_round_trips_positions() {
        let orbita = OrbitaActuator::new(40);
        let bytes = orbita.encode_scalar(OrbitaRegister::GoalPosition, 1.0);
        assert_eq!(bytes.len(), 4);
        let usi = orbita.decode_scalar(OrbitaRegister::GoalPosition, &bytes);
        assert!((usi - 1.0).abs() < 1e-3);
    }

    #[test]
    fn pid_codec_round_trips() {
        let orbita = OrbitaActuator::new(40);
        let pid = Pid::new(1.5, 0.25, 0.0);
        assert_eq!(orbita.decode_pid(&orbita.encode_pid(pid)), pid);
        assert!(!orbita.decode_pid(&[0; 4]).is_known());
    }

    #[test]
    fn limits_codec_round_trips() {
        let orbita = OrbitaActuator::new(40);
        let bytes = orbita.encode_limits(-1.0, 2.0);
        let (low, high) = orbita.decode_limits(&bytes);
        assert!((low - (-1.0)).abs() < 1e-3);
        assert!((high - 2.0).abs() < 1e-3);
    }
}
