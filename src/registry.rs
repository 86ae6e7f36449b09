//! Device registry
//!
//! Single owner of every device model, indexed both by class id (used by
//! the protocol router when a publish arrives) and by public name (used
//! by the robot core to resolve caller requests). Ids are unique within
//! a device class; a collision is fatal at construction time.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::dynamixel::DynamixelMotor;
use crate::fan::Fan;
use crate::force_sensor::ForceSensor;
use crate::orbita::{Disk, OrbitaActuator, DISKS};
use crate::types::{HalError, Result};

/// Resolution of a joint name to its owning device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JointRef {
    Dxl(u8),
    OrbitaDisk { actuator: u8, disk: Disk },
}

/// All devices of one robot
#[derive(Debug, Default)]
pub struct Registry {
    dxls: HashMap<u8, DynamixelMotor>,
    orbitas: HashMap<u8, OrbitaActuator>,
    force_sensors: HashMap<u8, ForceSensor>,
    fans: HashMap<u8, Fan>,

    joint_names: Vec<String>,
    joints: HashMap<String, JointRef>,
    force_sensor_names: Vec<String>,
    force_sensors_by_name: HashMap<String, u8>,
    fan_names: Vec<String>,
    fans_by_name: HashMap<String, u8>,
    orbitas_by_name: HashMap<String, u8>,

    /// First firmware assertion seen on any gate; latches the robot dead.
    fault: Mutex<Option<String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Construction
    // ========================================================================

    pub fn add_dxl_joint(&mut self, name: &str, motor: DynamixelMotor) -> Result<()> {
        if self.dxls.contains_key(&motor.id()) {
            return Err(HalError::IdCollision {
                kind: "dynamixel",
                id: motor.id(),
            });
        }
        self.register_joint_name(name, JointRef::Dxl(motor.id()))?;
        self.dxls.insert(motor.id(), motor);
        Ok(())
    }

    /// Register an actuator along with its three disk joints
    /// (`<name>_disk_top`, `<name>_disk_middle`, `<name>_disk_bottom`).
    pub fn add_orbita(&mut self, name: &str, actuator: OrbitaActuator) -> Result<()> {
        if self.orbitas.contains_key(&actuator.id()) {
            return Err(HalError::IdCollision {
                kind: "orbita",
                id: actuator.id(),
            });
        }
        for disk in DISKS {
            self.register_joint_name(
                &format!("{name}_{}", disk.suffix()),
                JointRef::OrbitaDisk {
                    actuator: actuator.id(),
                    disk,
                },
            )?;
        }
        self.orbitas_by_name.insert(name.to_owned(), actuator.id());
        self.orbitas.insert(actuator.id(), actuator);
        Ok(())
    }

    pub fn add_force_sensor(&mut self, name: &str, sensor: ForceSensor) -> Result<()> {
        if self.force_sensors.contains_key(&sensor.id()) {
            return Err(HalError::IdCollision {
                kind: "force sensor",
                id: sensor.id(),
            });
        }
        self.force_sensor_names.push(name.to_owned());
        self.force_sensors_by_name.insert(name.to_owned(), sensor.id());
        self.force_sensors.insert(sensor.id(), sensor);
        Ok(())
    }

    pub fn add_fan(&mut self, name: &str, fan: Fan) -> Result<()> {
        if self.fans.contains_key(&fan.id()) {
            return Err(HalError::IdCollision {
                kind: "fan",
                id: fan.id(),
            });
        }
        self.fan_names.push(name.to_owned());
        self.fans_by_name.insert(name.to_owned(), fan.id());
        self.fans.insert(fan.id(), fan);
        Ok(())
    }

    fn register_joint_name(&mut self, name: &str, joint: JointRef) -> Result<()> {
        if self.joints.contains_key(name) {
            return Err(HalError::Config(format!("joint name '{name}' used twice")));
        }
        self.joint_names.push(name.to_owned());
        self.joints.insert(name.to_owned(), joint);
        Ok(())
    }

    // ========================================================================
    // Name resolution
    // ========================================================================

    /// All joint names, in configuration order.
    pub fn joint_names(&self) -> &[String] {
        &self.joint_names
    }

    pub fn force_sensor_names(&self) -> &[String] {
        &self.force_sensor_names
    }

    pub fn fan_names(&self) -> &[String] {
        &self.fan_names
    }

    pub fn joint(&self, name: &str) -> Result<JointRef> {
        self.joints
            .get(name)
            .copied()
            .ok_or_else(|| HalError::UnknownJoint(name.to_owned()))
    }

    pub fn force_sensor_by_name(&self, name: &str) -> Result<&ForceSensor> {
        let id = self
            .force_sensors_by_name
            .get(name)
            .ok_or_else(|| HalError::UnknownDevice(name.to_owned()))?;
        Ok(&self.force_sensors[id])
    }

    pub fn fan_by_name(&self, name: &str) -> Result<&Fan> {
        let id = self
            .fans_by_name
            .get(name)
            .ok_or_else(|| HalError::UnknownDevice(name.to_owned()))?;
        Ok(&self.fans[id])
    }

    pub fn orbita_by_name(&self, name: &str) -> Result<&OrbitaActuator> {
        let id = self
            .orbitas_by_name
            .get(name)
            .ok_or_else(|| HalError::UnknownDevice(name.to_owned()))?;
        Ok(&self.orbitas[id])
    }

    // ========================================================================
    // Id resolution (router side)
    // ========================================================================

    pub fn dxl(&self, id: u8) -> Option<&DynamixelMotor> {
        self.dxls.get(&id)
    }

    pub fn orbita(&self, id: u8) -> Option<&OrbitaActuator> {
        self.orbitas.get(&id)
    }

    pub fn force_sensor(&self, id: u8) -> Option<&ForceSensor> {
        self.force_sensors.get(&id)
    }

    pub fn fan(&self, id: u8) -> Option<&Fan> {
        self.fans.get(&id)
    }

    // ========================================================================
    // Fault latch
    // ========================================================================

    /// Record a firmware assertion; the first one wins.
    pub fn set_fault(&self, message: &str) {
        let mut fault = self.fault.lock().unwrap();
        if fault.is_none() {
            *fault = Some(message.to_owned());
        }
    }

    /// Fail if any gate asserted since the robot was opened.
    pub fn ensure_alive(&self) -> Result<()> {
        match &*self.fault.lock().unwrap() {
            Some(message) => Err(HalError::GateAssert(message.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::DxlModel;

    #[test]
    fn duplicate_dxl_id_is_fatal() {
        let mut registry = Registry::new();
        registry
            .add_dxl_joint("r_elbow_pitch", DynamixelMotor::new(13, DxlModel::MX64))
            .unwrap();
        let err = registry
            .add_dxl_joint("r_wrist_pitch", DynamixelMotor::new(13, DxlModel::MX28))
            .unwrap_err();
        assert!(matches!(
            err,
            HalError::IdCollision {
                kind: "dynamixel",
                id: 13
            }
        ));
    }

    #[test]
    fn orbita_contributes_three_disk_joints() {
        let mut registry = Registry::new();
        registry.add_orbita("neck", OrbitaActuator::new(40)).unwrap();
        assert_eq!(
            registry.joint_names(),
            &[
                "neck_disk_top".to_owned(),
                "neck_disk_middle".to_owned(),
                "neck_disk_bottom".to_owned(),
            ]
        );
        assert!(matches!(
            registry.joint("neck_disk_middle").unwrap(),
            JointRef::OrbitaDisk { actuator: 40, disk: Disk::Middle }
        ));
    }

    #[test]
    fn fault_latches_the_first_assertion() {
        let registry = Registry::new();
        assert!(registry.ensure_alive().is_ok());
        registry.set_fault("overcurrent");
        registry.set_fault("later");
        match registry.ensure_alive().unwrap_err() {
            HalError::GateAssert(message) => assert_eq!(message, "overcurrent"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}
