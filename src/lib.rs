//! Hardware abstraction layer for the Reachy humanoid robot
//!
//! The robot is a set of daisy-chained motor and sensor buses reached
//! through serial "gates". Each gate multiplexes Dynamixel servo motors
//! (MX-106/64/28, AX-18, XL-320), a three-disk Orbita wrist/neck
//! actuator, force sensors and cooling fans over one UART at 1 Mbaud.
//! This crate presents them as a single robot: list the joints, read or
//! write a named register on any set of them, read a force, set a fan —
//! all in SI units (rad, rad/s, % torque, °C).
//!
//! # Features
//! - Framed gate wire protocol (header, length, typed payloads) with an
//!   incremental stream parser tolerant to partial frames and noise
//! - Per-register synchronisation: a read issues a grouped request and
//!   blocks until the matching asynchronous publish arrives, with
//!   timeout and retry
//! - Multi-gate request planner: one grouped frame per gate per
//!   operation, results reassembled in the caller's order
//! - Device discovery: ports are identified by challenging them and
//!   matching the enumerated containers against the robot model
//! - Background keep-alive and paced writes (gates need ≥ 1 ms between
//!   frames)
//! - Write-coalescing cached facade that only forwards changed setpoints
//! - Blocking wrapper for non-async callers
//!
//! # Async usage
//! ```no_run
//! use reachy_hal::{JointRegister, Robot, RobotModel};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut robot = Robot::connect_auto(RobotModel::from_env()?).await?;
//!
//!     let names = robot.get_all_joint_names();
//!     println!("joints: {names:?}");
//!
//!     let positions = robot
//!         .get_joints_value(
//!             JointRegister::PresentPosition,
//!             &["r_shoulder_pitch", "r_elbow_pitch"],
//!             3,
//!         )
//!         .await?;
//!     println!("positions: {positions:?} rad");
//!
//!     robot
//!         .set_joints_value(JointRegister::GoalPosition, &[("r_elbow_pitch", -1.2)])
//!         .await?;
//!
//!     robot.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! # Blocking usage
//! ```no_run
//! use reachy_hal::{RobotModel, SyncRobot};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let robot = SyncRobot::connect_auto(RobotModel::from_env()?)?;
//!     let forces = robot.get_force(&["r_force_gripper"])?;
//!     println!("gripper force: {forces:?}");
//!     robot.stop();
//!     Ok(())
//! }
//! ```

pub mod cell;
pub mod config;
pub mod controller;
pub mod convert;
pub mod discovery;
pub mod dynamixel;
pub mod fan;
pub mod force_sensor;
pub mod gate;
pub mod message;
pub mod orbita;
pub mod registers;
pub mod registry;
pub mod robot;
pub mod router;
pub mod sync;
pub mod types;

// Re-export main types
pub use config::{DeviceConfig, PartConfig, RobotModel};
pub use controller::Controller;
pub use registers::{DxlModel, DxlProtocol, DxlRegister, OrbitaRegister};
pub use robot::Robot;
pub use sync::SyncRobot;
pub use types::{HalError, JointRegister, Pid, Result};
