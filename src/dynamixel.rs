//! Dynamixel motor device model
//!
//! One [`DynamixelMotor`] owns a synced cell per register plus the
//! constants needed to convert between raw encodings and rad / rad/s / %
//! / °C. The motor's variant decides both its register addresses (V1/V2
//! map) and its motion envelope.

use std::collections::HashMap;

use crate::cell::SyncCell;
use crate::convert;
use crate::registers::{DxlModel, DxlRegister, DXL_REGISTERS};
use crate::types::Result;

/// A Dynamixel servo attached to a gate
#[derive(Debug)]
pub struct DynamixelMotor {
    id: u8,
    model: DxlModel,
    /// Mounting offset applied to every position conversion (rad).
    offset: f64,
    /// Whether the joint rotates in the same direction as the raw scale.
    direct: bool,
    registers: HashMap<DxlRegister, SyncCell<Vec<u8>>>,
}

impl DynamixelMotor {
    pub fn new(id: u8, model: DxlModel) -> Self {
        Self {
            id,
            model,
            offset: 0.0,
            direct: true,
            registers: DXL_REGISTERS
                .into_iter()
                .map(|reg| (reg, SyncCell::new()))
                .collect(),
        }
    }

    /// Set the mounting offset (rad).
    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    /// Set the rotation direction.
    pub fn with_direct(mut self, direct: bool) -> Self {
        self.direct = direct;
        self
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn model(&self) -> DxlModel {
        self.model
    }

    /// (address, width) of a register under this motor's map revision.
    pub fn layout(&self, register: DxlRegister) -> (u8, u8) {
        register.layout(self.model.protocol())
    }

    pub fn cell(&self, register: DxlRegister) -> &SyncCell<Vec<u8>> {
        &self.registers[&register]
    }

    /// Store a published raw value, resolving the wire address through
    /// this motor's own register map.
    ///
    /// Returns false when the address does not belong to the map.
    pub fn update_from_wire(&self, addr: u8, value: Vec<u8>) -> bool {
        match DxlRegister::from_addr(self.model.protocol(), addr) {
            Some(register) => {
                self.cell(register).update(value);
                true
            }
            None => false,
        }
    }

    pub fn clear_value(&self, register: DxlRegister) {
        self.cell(register).reset();
    }

    pub fn is_value_set(&self, register: DxlRegister) -> bool {
        self.cell(register).is_set()
    }

    /// Encode a physical value into the raw little-endian wire form.
    pub fn convert_to_raw(&self, register: DxlRegister, usi: f64) -> Result<Vec<u8>> {
        let raw = match register {
            DxlRegister::TorqueEnable => convert::dxl_torque_enable_to_raw(usi),
            DxlRegister::GoalPosition | DxlRegister::PresentPosition => {
                convert::dxl_position_to_raw(usi, self.model, self.offset, self.direct)
            }
            DxlRegister::MovingSpeed => convert::dxl_speed_to_raw(usi)?,
            DxlRegister::TorqueLimit => convert::dxl_torque_to_raw(usi),
            DxlRegister::Temperature => convert::dxl_temperature_to_raw(usi),
        };
        let (_, width) = self.layout(register);
        Ok(convert::raw_to_bytes(raw, width))
    }

    /// Decode a raw wire value into its physical unit.
    pub fn convert_to_usi(&self, register: DxlRegister, value: &[u8]) -> f64 {
        let raw = convert::bytes_to_raw(value);
        match register {
            DxlRegister::TorqueEnable => convert::dxl_torque_enable_to_usi(raw),
            DxlRegister::GoalPosition | DxlRegister::PresentPosition => {
                convert::dxl_position_to_usi(raw, self.model, self.offset, self.direct)
            }
            DxlRegister::MovingSpeed => convert::dxl_speed_to_usi(raw),
            DxlRegister::TorqueLimit => convert::dxl_torque_to_usi(raw),
            DxlRegister::Temperature => convert::dxl_temperature_to_usi(raw),
        }
    }

    /// Whether torque is known to be disabled (compliant motor).
    ///
    /// Unknown state reads as enabled so that writes are never suppressed
    /// on a motor we have not heard from yet.
    pub fn torque_disabled(&self) -> bool {
        self.cell(DxlRegister::TorqueEnable)
            .peek()
            .is_some_and(|value| convert::bytes_to_raw(&value) == 0)
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use super::*;

    #[test]
    fn wire_update_uses_the_variant_map() {
        let mx = DynamixelMotor::new(10, DxlModel::MX28);
        let xl = DynamixelMotor::new(30, DxlModel::XL320);

        assert!(mx.update_from_wire(36, vec![0x00, 0x08]));
        assert!(mx.is_value_set(DxlRegister::PresentPosition));

        // 36 is not a register start under the V2 map
        assert!(!xl.update_from_wire(36, vec![0x00, 0x08]));
        assert!(xl.update_from_wire(37, vec![0x00, 0x02]));
        assert!(xl.is_value_set(DxlRegister::PresentPosition));
    }

    #[test]
    fn conversion_applies_offset_and_direction() {
        let motor = DynamixelMotor::new(10, DxlModel::MX106)
            .with_offset(PI / 2.0)
            .with_direct(false);

        let usi = motor.convert_to_usi(DxlRegister::PresentPosition, &[0x00, 0x08]);
        assert!((usi - (-PI / 2.0)).abs() < 2e-3);

        let raw = motor.convert_to_raw(DxlRegister::GoalPosition, 0.0).unwrap();
        assert_eq!(convert::bytes_to_raw(&raw), 1024);
    }

    #[test]
    fn torque_state_defaults_to_enabled() {
        let motor = DynamixelMotor::new(10, DxlModel::MX64);
        assert!(!motor.torque_disabled());

        motor.cell(DxlRegister::TorqueEnable).update(vec![0]);
        assert!(motor.torque_disabled());

        motor.cell(DxlRegister::TorqueEnable).update(vec![1]);
        assert!(!motor.torque_disabled());
    }
}
