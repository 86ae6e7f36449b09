//! Register layout tables for the devices attached to the gates
//!
//! Dynamixel motors expose a numbered register map that differs between
//! protocol revisions: the V2 map shifts torque_limit, present_position
//! and temperature by one or three addresses. The variant owning a motor
//! is the only authority for its addresses; both directions of the
//! address/name lookup are defined here per revision.
//!
//! Orbita registers are identified by a register code carried verbatim on
//! the wire; the codes mirror the message table of the gate firmware
//! header and must stay in sync with it.

use std::f64::consts::PI;

use crate::types::JointRegister;

// ============================================================================
// Dynamixel models
// ============================================================================

/// Dynamixel motor families supported by the gates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DxlModel {
    MX106,
    MX64,
    MX28,
    AX18,
    XL320,
}

/// Dynamixel register map revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DxlProtocol {
    V1,
    V2,
}

impl DxlModel {
    /// Register map revision spoken by this family.
    pub const fn protocol(self) -> DxlProtocol {
        match self {
            DxlModel::MX106 | DxlModel::MX64 | DxlModel::MX28 | DxlModel::AX18 => DxlProtocol::V1,
            DxlModel::XL320 => DxlProtocol::V2,
        }
    }

    /// Position resolution: one past the largest raw position value.
    pub const fn max_raw(self) -> u16 {
        match self {
            DxlModel::MX106 | DxlModel::MX64 | DxlModel::MX28 => 4096,
            DxlModel::AX18 | DxlModel::XL320 => 1024,
        }
    }

    /// Angle (rad) spanned by the full raw position range.
    pub fn max_angle(self) -> f64 {
        match self {
            // MX family: full turn
            DxlModel::MX106 | DxlModel::MX64 | DxlModel::MX28 => 2.0 * PI,
            // AX/XL: 300 degrees
            DxlModel::AX18 | DxlModel::XL320 => 5.0 * PI / 3.0,
        }
    }
}

// ============================================================================
// Dynamixel register layout
// ============================================================================

/// Registers exposed by every Dynamixel motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DxlRegister {
    TorqueEnable,
    GoalPosition,
    MovingSpeed,
    TorqueLimit,
    PresentPosition,
    Temperature,
}

pub const DXL_REGISTERS: [DxlRegister; 6] = [
    DxlRegister::TorqueEnable,
    DxlRegister::GoalPosition,
    DxlRegister::MovingSpeed,
    DxlRegister::TorqueLimit,
    DxlRegister::PresentPosition,
    DxlRegister::Temperature,
];

impl DxlRegister {
    /// (address, width in bytes) of this register under the given revision.
    pub const fn layout(self, protocol: DxlProtocol) -> (u8, u8) {
        match protocol {
            DxlProtocol::V1 => match self {
                DxlRegister::TorqueEnable => (24, 1),
                DxlRegister::GoalPosition => (30, 2),
                DxlRegister::MovingSpeed => (32, 2),
                DxlRegister::TorqueLimit => (34, 2),
                DxlRegister::PresentPosition => (36, 2),
                DxlRegister::Temperature => (43, 1),
            },
            DxlProtocol::V2 => match self {
                DxlRegister::TorqueEnable => (24, 1),
                DxlRegister::GoalPosition => (30, 2),
                DxlRegister::MovingSpeed => (32, 2),
                DxlRegister::TorqueLimit => (35, 2),
                DxlRegister::PresentPosition => (37, 2),
                DxlRegister::Temperature => (46, 1),
            },
        }
    }

    /// Reverse lookup of the address/name bijection for one revision.
    pub fn from_addr(protocol: DxlProtocol, addr: u8) -> Option<DxlRegister> {
        DXL_REGISTERS
            .into_iter()
            .find(|reg| reg.layout(protocol).0 == addr)
    }

    pub fn name(self) -> &'static str {
        match self {
            DxlRegister::TorqueEnable => "torque_enable",
            DxlRegister::GoalPosition => "goal_position",
            DxlRegister::MovingSpeed => "moving_speed",
            DxlRegister::TorqueLimit => "torque_limit",
            DxlRegister::PresentPosition => "present_position",
            DxlRegister::Temperature => "temperature",
        }
    }
}

impl From<JointRegister> for DxlRegister {
    fn from(reg: JointRegister) -> Self {
        match reg {
            JointRegister::TorqueEnable => DxlRegister::TorqueEnable,
            JointRegister::GoalPosition => DxlRegister::GoalPosition,
            JointRegister::MovingSpeed => DxlRegister::MovingSpeed,
            JointRegister::TorqueLimit => DxlRegister::TorqueLimit,
            JointRegister::PresentPosition => DxlRegister::PresentPosition,
            JointRegister::Temperature => DxlRegister::Temperature,
        }
    }
}

// ============================================================================
// Orbita registers
// ============================================================================

/// Payload layout of an Orbita register, per disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrbitaValueKind {
    /// Signed 32-bit encoder count
    Count,
    /// IEEE-754 float32
    Float,
    /// Single byte flag
    Byte,
    /// Three float32 gains (p, i, d)
    PidGains,
    /// Two signed 32-bit counts (low, high)
    Limits,
}

impl OrbitaValueKind {
    pub const fn bytes_per_disk(self) -> usize {
        match self {
            OrbitaValueKind::Count => 4,
            OrbitaValueKind::Float => 4,
            OrbitaValueKind::Byte => 1,
            OrbitaValueKind::PidGains => 12,
            OrbitaValueKind::Limits => 8,
        }
    }
}

/// Registers exposed by an Orbita actuator
///
/// Discriminants are the wire codes from the gate firmware header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OrbitaRegister {
    AngleLimit = 0,
    TemperatureShutdown = 1,
    PresentPosition = 10,
    PresentSpeed = 11,
    PresentLoad = 12,
    GoalPosition = 20,
    MaxSpeed = 21,
    MaxTorque = 22,
    Compliant = 30,
    Pid = 31,
    Temperature = 32,
    Zero = 33,
    AbsolutePosition = 34,
    FanState = 40,
}

pub const ORBITA_REGISTERS: [OrbitaRegister; 14] = [
    OrbitaRegister::AngleLimit,
    OrbitaRegister::TemperatureShutdown,
    OrbitaRegister::PresentPosition,
    OrbitaRegister::PresentSpeed,
    OrbitaRegister::PresentLoad,
    OrbitaRegister::GoalPosition,
    OrbitaRegister::MaxSpeed,
    OrbitaRegister::MaxTorque,
    OrbitaRegister::Compliant,
    OrbitaRegister::Pid,
    OrbitaRegister::Temperature,
    OrbitaRegister::Zero,
    OrbitaRegister::AbsolutePosition,
    OrbitaRegister::FanState,
];

impl OrbitaRegister {
    pub const fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<OrbitaRegister> {
        ORBITA_REGISTERS.into_iter().find(|reg| reg.code() == code)
    }

    pub const fn value_kind(self) -> OrbitaValueKind {
        match self {
            OrbitaRegister::PresentPosition
            | OrbitaRegister::GoalPosition
            | OrbitaRegister::AbsolutePosition
            | OrbitaRegister::Zero => OrbitaValueKind::Count,
            OrbitaRegister::PresentSpeed
            | OrbitaRegister::PresentLoad
            | OrbitaRegister::MaxSpeed
            | OrbitaRegister::MaxTorque
            | OrbitaRegister::Temperature
            | OrbitaRegister::TemperatureShutdown => OrbitaValueKind::Float,
            OrbitaRegister::Compliant | OrbitaRegister::FanState => OrbitaValueKind::Byte,
            OrbitaRegister::Pid => OrbitaValueKind::PidGains,
            OrbitaRegister::AngleLimit => OrbitaValueKind::Limits,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OrbitaRegister::AngleLimit => "angle_limit",
            OrbitaRegister::TemperatureShutdown => "temperature_shutdown",
            OrbitaRegister::PresentPosition => "present_position",
            OrbitaRegister::PresentSpeed => "present_speed",
            OrbitaRegister::PresentLoad => "present_load",
            OrbitaRegister::GoalPosition => "goal_position",
            OrbitaRegister::MaxSpeed => "max_speed",
            OrbitaRegister::MaxTorque => "max_torque",
            OrbitaRegister::Compliant => "compliant",
            OrbitaRegister::Pid => "pid",
            OrbitaRegister::Temperature => "temperature",
            OrbitaRegister::Zero => "zero",
            OrbitaRegister::AbsolutePosition => "absolute_position",
            OrbitaRegister::FanState => "fan_state",
        }
    }
}

impl From<JointRegister> for OrbitaRegister {
    fn from(reg: JointRegister) -> Self {
        match reg {
            // compliant == torque disabled
            JointRegister::TorqueEnable => OrbitaRegister::Compliant,
            JointRegister::GoalPosition => OrbitaRegister::GoalPosition,
            JointRegister::MovingSpeed => OrbitaRegister::MaxSpeed,
            JointRegister::TorqueLimit => OrbitaRegister::MaxTorque,
            JointRegister::PresentPosition => OrbitaRegister::PresentPosition,
            JointRegister::Temperature => OrbitaRegister::Temperature,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_name_lookup_is_a_bijection_per_revision() {
        for protocol in [DxlProtocol::V1, DxlProtocol::V2] {
            for reg in DXL_REGISTERS {
                let (addr, _) = reg.layout(protocol);
                assert_eq!(DxlRegister::from_addr(protocol, addr), Some(reg));
            }
        }
    }

    #[test]
    fn v2_map_shifts_the_upper_registers() {
        assert_eq!(DxlRegister::TorqueLimit.layout(DxlProtocol::V2), (35, 2));
        assert_eq!(
            DxlRegister::PresentPosition.layout(DxlProtocol::V2),
            (37, 2)
        );
        assert_eq!(DxlRegister::Temperature.layout(DxlProtocol::V2), (46, 1));
        // lower registers keep their V1 addresses
        assert_eq!(DxlRegister::GoalPosition.layout(DxlProtocol::V2), (30, 2));
    }

    #[test]
    fn orbita_codes_round_trip() {
        for reg in ORBITA_REGISTERS {
            assert_eq!(OrbitaRegister::from_code(reg.code()), Some(reg));
        }
        assert_eq!(OrbitaRegister::from_code(99), None);
    }
}
