//! Synchronous wrapper around the robot core
//!
//! Wraps the async [`Robot`] with a dedicated current-thread tokio
//! runtime to provide a blocking API, for callers that are not async
//! themselves (test rigs, small tools, bindings).

use tokio::runtime::{Builder, Runtime};
use tokio::time::Duration;

use crate::config::RobotModel;
use crate::registers::OrbitaRegister;
use crate::robot::Robot;
use crate::types::{JointRegister, Pid, Result};

/// Blocking robot client
///
/// # Example
/// ```no_run
/// use reachy_hal::{SyncRobot, JointRegister, RobotModel};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let robot = SyncRobot::connect_auto(RobotModel::FullKit)?;
///
///     let positions = robot.get_joints_value(
///         JointRegister::PresentPosition,
///         &["r_elbow_pitch", "l_elbow_pitch"],
///         3,
///     )?;
///     println!("elbows at {positions:?} rad");
///
///     Ok(())
/// }
/// ```
pub struct SyncRobot {
    robot: Robot,
    runtime: Runtime,
}

impl SyncRobot {
    /// Discover and connect the robot among the given serial ports.
    pub fn connect(model: RobotModel, ports: &[String]) -> Result<Self> {
        let runtime = new_runtime()?;
        let robot = runtime.block_on(Robot::connect(model, ports))?;
        Ok(Self { robot, runtime })
    }

    /// Discover and connect the robot among every serial port present.
    pub fn connect_auto(model: RobotModel) -> Result<Self> {
        let runtime = new_runtime()?;
        let robot = runtime.block_on(Robot::connect_auto(model))?;
        Ok(Self { robot, runtime })
    }

    /// Wrap an already-connected robot with its runtime.
    pub fn from_async(robot: Robot, runtime: Runtime) -> Self {
        Self { robot, runtime }
    }

    /// Stop every gate and release the ports.
    pub fn stop(mut self) {
        self.runtime.block_on(self.robot.stop());
    }

    pub fn set_sync_timeout(&mut self, timeout: Duration) {
        self.robot.set_sync_timeout(timeout);
    }

    // ========================================================================
    // NAME ENUMERATION
    // ========================================================================

    pub fn get_all_joint_names(&self) -> Vec<String> {
        self.robot.get_all_joint_names()
    }

    pub fn get_all_fan_names(&self) -> Vec<String> {
        self.robot.get_all_fan_names()
    }

    pub fn get_all_force_sensor_names(&self) -> Vec<String> {
        self.robot.get_all_force_sensor_names()
    }

    // ========================================================================
    // JOINTS
    // ========================================================================

    pub fn get_joints_value(
        &self,
        register: JointRegister,
        names: &[&str],
        retry: u32,
    ) -> Result<Vec<f64>> {
        self.runtime
            .block_on(self.robot.get_joints_value(register, names, retry))
    }

    pub fn set_joints_value(&self, register: JointRegister, values: &[(&str, f64)]) -> Result<()> {
        self.runtime
            .block_on(self.robot.set_joints_value(register, values))
    }

    pub fn get_compliant(&self, names: &[&str], retry: u32) -> Result<Vec<bool>> {
        self.runtime.block_on(self.robot.get_compliant(names, retry))
    }

    pub fn set_compliance(&self, values: &[(&str, bool)]) -> Result<()> {
        self.runtime.block_on(self.robot.set_compliance(values))
    }

    pub fn get_joints_pid(&self, names: &[&str], retry: u32) -> Result<Vec<Pid>> {
        self.runtime
            .block_on(self.robot.get_joints_pid(names, retry))
    }

    pub fn set_joints_pid(&self, values: &[(&str, Pid)]) -> Result<()> {
        self.runtime.block_on(self.robot.set_joints_pid(values))
    }

    // ========================================================================
    // FORCE SENSORS AND FANS
    // ========================================================================

    pub fn get_force(&self, names: &[&str]) -> Result<Vec<f64>> {
        self.runtime.block_on(self.robot.get_force(names))
    }

    pub fn get_fans_state(&self, names: &[&str], retry: u32) -> Result<Vec<bool>> {
        self.runtime
            .block_on(self.robot.get_fans_state(names, retry))
    }

    pub fn set_fans_state(&self, states: &[(&str, bool)]) -> Result<()> {
        self.runtime.block_on(self.robot.set_fans_state(states))
    }

    // ========================================================================
    // ORBITA
    // ========================================================================

    pub fn get_orbita_value(
        &self,
        actuator: &str,
        register: OrbitaRegister,
        retry: u32,
    ) -> Result<[f64; 3]> {
        self.runtime
            .block_on(self.robot.get_orbita_value(actuator, register, retry))
    }

    pub fn set_orbita_value(
        &self,
        actuator: &str,
        register: OrbitaRegister,
        values: [f64; 3],
    ) -> Result<()> {
        self.runtime
            .block_on(self.robot.set_orbita_value(actuator, register, values))
    }

    pub fn get_orbita_pid(&self, actuator: &str, retry: u32) -> Result<[Pid; 3]> {
        self.runtime
            .block_on(self.robot.get_orbita_pid(actuator, retry))
    }

    pub fn set_orbita_pid(&self, actuator: &str, pids: [Pid; 3]) -> Result<()> {
        self.runtime
            .block_on(self.robot.set_orbita_pid(actuator, pids))
    }

    pub fn get_orbita_angle_limits(&self, actuator: &str, retry: u32) -> Result<[(f64, f64); 3]> {
        self.runtime
            .block_on(self.robot.get_orbita_angle_limits(actuator, retry))
    }

    pub fn set_orbita_angle_limits(&self, actuator: &str, limits: [(f64, f64); 3]) -> Result<()> {
        self.runtime
            .block_on(self.robot.set_orbita_angle_limits(actuator, limits))
    }
}

fn new_runtime() -> Result<Runtime> {
    Ok(Builder::new_current_thread().enable_all().build()?)
}
