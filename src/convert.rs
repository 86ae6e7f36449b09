//! Conversions between physical units and device raw encodings
//!
//! Pure functions, no state. Clients of the HAL only ever see SI-like
//! units (rad, rad/s, % torque, °C); everything below this module is raw
//! wire bytes.
//!
//! Dynamixel raw values are little-endian and at most 16 bits wide.
//! Orbita values are 32-bit counts or float32; the gate and the host are
//! both little-endian.

use std::f64::consts::PI;

use crate::registers::DxlModel;
use crate::types::{HalError, Result};

/// One Dynamixel speed unit, in rpm.
const DXL_SPEED_UNIT_RPM: f64 = 0.114;

/// One Dynamixel torque unit, in percent of max torque.
const DXL_TORQUE_UNIT_PCT: f64 = 1.0 / 10.23;

const RAD_PER_SEC_PER_RPM: f64 = 2.0 * PI / 60.0;

/// Orbita encoder ticks per motor turn.
const ORBITA_RESOLUTION: f64 = 4096.0;

/// Orbita gear reduction between motor and disk.
const ORBITA_REDUCTION: f64 = 52.0 / 24.0;

// ============================================================================
// Dynamixel position
// ============================================================================

/// Decode a raw position into rad, applying the motor offset and direction.
///
/// The raw range [0, max_raw-1] maps linearly onto the motion envelope,
/// centered on its midpoint.
pub fn dxl_position_to_usi(raw: u16, model: DxlModel, offset: f64, direct: bool) -> f64 {
    let max_angle = model.max_angle();
    let max_raw = model.max_raw() as f64;

    let pos = (max_angle * raw as f64) / (max_raw - 1.0) - max_angle / 2.0;
    (if direct { pos } else { -pos }) - offset
}

/// Encode a position in rad into the motor raw range.
///
/// Rounded to the nearest integer and clipped to [0, max_raw-1].
pub fn dxl_position_to_raw(usi: f64, model: DxlModel, offset: f64, direct: bool) -> u16 {
    let max_angle = model.max_angle();
    let max_raw = model.max_raw() as f64;

    let pos = (usi + offset) * if direct { 1.0 } else { -1.0 };
    let raw = ((max_raw - 1.0) * ((max_angle / 2.0 + pos) / max_angle)).round();
    raw.clamp(0.0, max_raw - 1.0) as u16
}

// ============================================================================
// Dynamixel speed
// ============================================================================

/// Decode a raw moving speed into rad/s.
///
/// Values above 1023 carry the clockwise sign bit and decode as negative.
pub fn dxl_speed_to_usi(raw: u16) -> f64 {
    let (magnitude, sign) = if raw > 1023 {
        ((raw - 1024) as f64, -1.0)
    } else {
        (raw as f64, 1.0)
    };
    sign * magnitude * DXL_SPEED_UNIT_RPM * RAD_PER_SEC_PER_RPM
}

/// Encode a moving speed in rad/s into speed units.
///
/// Only counter-clockwise setpoints are accepted; negative input is an
/// error. Clipped to [0, 1023].
pub fn dxl_speed_to_raw(usi: f64) -> Result<u16> {
    if usi < 0.0 {
        return Err(HalError::InvalidValue(format!(
            "moving speed must be >= 0 rad/s (got {usi})"
        )));
    }
    let rpm = usi / RAD_PER_SEC_PER_RPM;
    let raw = (rpm / DXL_SPEED_UNIT_RPM).round();
    Ok(raw.clamp(0.0, 1023.0) as u16)
}

// ============================================================================
// Dynamixel torque limit
// ============================================================================

/// Decode a raw torque limit into percent of max torque.
pub fn dxl_torque_to_usi(raw: u16) -> f64 {
    raw as f64 * DXL_TORQUE_UNIT_PCT
}

/// Encode a torque limit in percent into torque units, clipped to [0, 1023].
pub fn dxl_torque_to_raw(percent: f64) -> u16 {
    (percent / DXL_TORQUE_UNIT_PCT).round().clamp(0.0, 1023.0) as u16
}

// ============================================================================
// Dynamixel temperature / flags
// ============================================================================

pub fn dxl_temperature_to_usi(raw: u16) -> f64 {
    raw as f64
}

pub fn dxl_temperature_to_raw(celsius: f64) -> u16 {
    celsius.round().clamp(0.0, 255.0) as u16
}

pub fn dxl_torque_enable_to_usi(raw: u16) -> f64 {
    if raw == 0 {
        0.0
    } else {
        1.0
    }
}

pub fn dxl_torque_enable_to_raw(usi: f64) -> u16 {
    if usi == 0.0 {
        0
    } else {
        1
    }
}

// ============================================================================
// Orbita
// ============================================================================

/// Decode a disk encoder count into rad.
pub fn orbita_position_to_usi(count: i32) -> f64 {
    2.0 * PI * count as f64 / (ORBITA_RESOLUTION * ORBITA_REDUCTION)
}

/// Encode a disk angle in rad into encoder counts, rounded to nearest.
pub fn orbita_position_to_raw(usi: f64) -> i32 {
    (usi * ORBITA_RESOLUTION * ORBITA_REDUCTION / (2.0 * PI)).round() as i32
}

// ============================================================================
// Raw byte packing
// ============================================================================

/// Pack a raw register value into its little-endian wire form.
pub fn raw_to_bytes(value: u16, width: u8) -> Vec<u8> {
    match width {
        1 => vec![value as u8],
        _ => value.to_le_bytes().to_vec(),
    }
}

/// Unpack a little-endian wire value of 1 or 2 bytes.
pub fn bytes_to_raw(bytes: &[u8]) -> u16 {
    match bytes.len() {
        0 => 0,
        1 => bytes[0] as u16,
        _ => u16::from_le_bytes([bytes[0], bytes[1]]),
    }
}
