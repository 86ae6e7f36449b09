//! Type definitions for the Reachy hardware abstraction layer
//!
//! Contains the error taxonomy, the crate-wide `Result` alias and the
//! small value types shared between the device models and the robot core.

use thiserror::Error;

/// Error types for HAL operations
#[derive(Error, Debug)]
pub enum HalError {
    #[error("timed out waiting for register '{register}' on '{name}'")]
    Timeout { name: String, register: String },

    #[error("gate assertion: {0}")]
    GateAssert(String),

    #[error("no serial port hosts all expected devices (best candidate '{port}', missing: {missing:?})")]
    DiscoveryMissing { port: String, missing: Vec<String> },

    #[error("duplicate {kind} id {id}")]
    IdCollision { kind: &'static str, id: u8 },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("unknown joint '{0}'")]
    UnknownJoint(String),

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("unknown robot model '{0}'")]
    UnknownModel(String),

    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HalError>;

/// Logical joint registers addressable through the robot core
///
/// Each maps to a Dynamixel register or to the equivalent Orbita register
/// depending on which device owns the joint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointRegister {
    TorqueEnable,
    GoalPosition,
    MovingSpeed,
    TorqueLimit,
    PresentPosition,
    Temperature,
}

impl JointRegister {
    /// Registers published by the gates at a fixed rate without being asked.
    pub fn is_auto_published(self) -> bool {
        matches!(
            self,
            JointRegister::PresentPosition | JointRegister::Temperature
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            JointRegister::TorqueEnable => "torque_enable",
            JointRegister::GoalPosition => "goal_position",
            JointRegister::MovingSpeed => "moving_speed",
            JointRegister::TorqueLimit => "torque_limit",
            JointRegister::PresentPosition => "present_position",
            JointRegister::Temperature => "temperature",
        }
    }
}

/// PID gain triplet
///
/// Unknown gains (e.g. on devices without a PID register) are carried as
/// NaN; [`Pid::is_known`] reports whether all three gains are actual
/// numbers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pid {
    pub p: f32,
    pub i: f32,
    pub d: f32,
}

impl Pid {
    pub const UNKNOWN: Pid = Pid {
        p: f32::NAN,
        i: f32::NAN,
        d: f32::NAN,
    };

    pub fn new(p: f32, i: f32, d: f32) -> Self {
        Self { p, i, d }
    }

    pub fn is_known(&self) -> bool {
        !self.p.is_nan() && !self.i.is_nan() && !self.d.is_nan()
    }

    /// Element-wise comparison where NaN never equals anything.
    pub fn same_as(&self, other: &Pid) -> bool {
        self.is_known() && other.is_known() && self == other
    }
}
