//! Robot model selection and device tables
//!
//! The model decides which parts exist and therefore which devices are
//! expected behind which gate. Selection order: `REACHY_MODEL`
//! environment variable, then the YAML file at `REACHY_CONFIG_FILE`
//! (default `~/.reachy.yaml`, `model:` key), then the full kit.

use std::env;
use std::f64::consts::PI;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::discovery::Expectation;
use crate::message::ContainerKind;
use crate::registers::DxlModel;
use crate::types::{HalError, Result};

pub const DEFAULT_MODEL: RobotModel = RobotModel::FullKit;

const MODEL_ENV: &str = "REACHY_MODEL";
const CONFIG_FILE_ENV: &str = "REACHY_CONFIG_FILE";

/// Closed set of supported robot models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotModel {
    FullKit,
    FullKitLeftAdvanced,
    FullKitRightAdvanced,
    FullKitFullAdvanced,
    StarterKitLeft,
    StarterKitLeftAdvanced,
    StarterKitRight,
    StarterKitRightAdvanced,
    RoboticArmLeft,
    RoboticArmLeftAdvanced,
    RoboticArmRight,
    RoboticArmRightAdvanced,
}

impl FromStr for RobotModel {
    type Err = HalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full_kit" => Ok(RobotModel::FullKit),
            "full_kit_left_advanced" => Ok(RobotModel::FullKitLeftAdvanced),
            "full_kit_right_advanced" => Ok(RobotModel::FullKitRightAdvanced),
            "full_kit_full_advanced" => Ok(RobotModel::FullKitFullAdvanced),
            "starter_kit_left" => Ok(RobotModel::StarterKitLeft),
            "starter_kit_left_advanced" => Ok(RobotModel::StarterKitLeftAdvanced),
            "starter_kit_right" => Ok(RobotModel::StarterKitRight),
            "starter_kit_right_advanced" => Ok(RobotModel::StarterKitRightAdvanced),
            "robotic_arm_left" => Ok(RobotModel::RoboticArmLeft),
            "robotic_arm_left_advanced" => Ok(RobotModel::RoboticArmLeftAdvanced),
            "robotic_arm_right" => Ok(RobotModel::RoboticArmRight),
            "robotic_arm_right_advanced" => Ok(RobotModel::RoboticArmRightAdvanced),
            other => Err(HalError::UnknownModel(other.to_owned())),
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    model: String,
}

impl RobotModel {
    /// Resolve the model for this machine.
    pub fn from_env() -> Result<RobotModel> {
        if let Ok(model) = env::var(MODEL_ENV) {
            return model.parse();
        }

        let path = env::var(CONFIG_FILE_ENV).map(PathBuf::from).unwrap_or_else(|_| {
            PathBuf::from(env::var("HOME").unwrap_or_else(|_| ".".into())).join(".reachy.yaml")
        });
        if !path.exists() {
            return Ok(DEFAULT_MODEL);
        }

        let text = std::fs::read_to_string(&path)?;
        let config: ConfigFile = serde_yaml::from_str(&text)
            .map_err(|err| HalError::Config(format!("{}: {err}", path.display())))?;
        config.model.parse()
    }

    /// Device tables of every part of this model, gate by gate.
    pub fn parts(self) -> Vec<PartConfig> {
        use RobotModel::*;
        match self {
            FullKit => vec![left_arm(false), right_arm(false), head()],
            FullKitLeftAdvanced => vec![left_arm(true), right_arm(false), head()],
            FullKitRightAdvanced => vec![left_arm(false), right_arm(true), head()],
            FullKitFullAdvanced => vec![left_arm(true), right_arm(true), head()],
            StarterKitLeft => vec![left_arm(false), head()],
            StarterKitLeftAdvanced => vec![left_arm(true), head()],
            StarterKitRight => vec![right_arm(false), head()],
            StarterKitRightAdvanced => vec![right_arm(true), head()],
            RoboticArmLeft => vec![left_arm(false)],
            RoboticArmLeftAdvanced => vec![left_arm(true)],
            RoboticArmRight => vec![right_arm(false)],
            RoboticArmRightAdvanced => vec![right_arm(true)],
        }
    }
}

/// Configuration of one device, before construction
#[derive(Debug, Clone)]
pub enum DeviceConfig {
    Dxl {
        id: u8,
        model: DxlModel,
        offset: f64,
        direct: bool,
    },
    Orbita {
        id: u8,
    },
    ForceSensor {
        id: u8,
    },
    DxlFan {
        id: u8,
    },
    OrbitaFan {
        actuator_id: u8,
    },
}

impl DeviceConfig {
    /// Container the gate must enumerate for this device, if any.
    ///
    /// Orbita fans live inside their actuator and have no container of
    /// their own.
    pub fn expected_container(&self) -> Option<(ContainerKind, u8)> {
        match *self {
            DeviceConfig::Dxl { id, .. } => Some((ContainerKind::DynamixelMotor, id)),
            DeviceConfig::Orbita { id } => Some((ContainerKind::OrbitaActuator, id)),
            DeviceConfig::ForceSensor { id } => Some((ContainerKind::Load, id)),
            DeviceConfig::DxlFan { id } => Some((ContainerKind::Fan, id)),
            DeviceConfig::OrbitaFan { .. } => None,
        }
    }
}

/// Devices behind one gate, in configuration order
#[derive(Debug, Clone)]
pub struct PartConfig {
    pub name: String,
    pub devices: Vec<(String, DeviceConfig)>,
}

impl PartConfig {
    /// Containers the hosting gate must enumerate for this part.
    pub fn expectations(&self) -> Vec<Expectation> {
        self.devices
            .iter()
            .filter_map(|(name, device)| {
                device
                    .expected_container()
                    .map(|(kind, id)| Expectation::new(name, kind, id))
            })
            .collect()
    }
}

fn dxl(id: u8, model: DxlModel, offset_deg: f64, direct: bool) -> DeviceConfig {
    DeviceConfig::Dxl {
        id,
        model,
        offset: offset_deg * PI / 180.0,
        direct,
    }
}

fn right_arm(advanced: bool) -> PartConfig {
    let mut devices = vec![
        ("r_shoulder_pitch".into(), dxl(10, DxlModel::MX106, 90.0, false)),
        ("r_shoulder_roll".into(), dxl(11, DxlModel::MX64, 90.0, false)),
        ("r_arm_yaw".into(), dxl(12, DxlModel::MX64, 0.0, false)),
        ("r_elbow_pitch".into(), dxl(13, DxlModel::MX64, 0.0, false)),
        ("r_forearm_yaw".into(), dxl(14, DxlModel::AX18, 0.0, false)),
        ("r_wrist_pitch".into(), dxl(15, DxlModel::MX28, 0.0, false)),
        ("r_wrist_roll".into(), dxl(16, DxlModel::AX18, 0.0, false)),
        ("r_gripper".into(), dxl(17, DxlModel::AX18, 0.0, true)),
        ("r_shoulder_fan".into(), DeviceConfig::DxlFan { id: 10 }),
        ("r_elbow_fan".into(), DeviceConfig::DxlFan { id: 13 }),
        ("r_wrist_fan".into(), DeviceConfig::DxlFan { id: 15 }),
    ];
    if advanced {
        devices.push(("r_force_gripper".into(), DeviceConfig::ForceSensor { id: 10 }));
    }
    PartConfig {
        name: "right_arm".into(),
        devices,
    }
}

fn left_arm(advanced: bool) -> PartConfig {
    let mut devices = vec![
        ("l_shoulder_pitch".into(), dxl(20, DxlModel::MX106, 90.0, true)),
        ("l_shoulder_roll".into(), dxl(21, DxlModel::MX64, -90.0, false)),
        ("l_arm_yaw".into(), dxl(22, DxlModel::MX64, 0.0, false)),
        ("l_elbow_pitch".into(), dxl(23, DxlModel::MX64, 0.0, false)),
        ("l_forearm_yaw".into(), dxl(24, DxlModel::AX18, 0.0, false)),
        ("l_wrist_pitch".into(), dxl(25, DxlModel::MX28, 0.0, false)),
        ("l_wrist_roll".into(), dxl(26, DxlModel::AX18, 0.0, false)),
        ("l_gripper".into(), dxl(27, DxlModel::AX18, 0.0, true)),
        ("l_shoulder_fan".into(), DeviceConfig::DxlFan { id: 20 }),
        ("l_elbow_fan".into(), DeviceConfig::DxlFan { id: 23 }),
        ("l_wrist_fan".into(), DeviceConfig::DxlFan { id: 25 }),
    ];
    if advanced {
        devices.push(("l_force_gripper".into(), DeviceConfig::ForceSensor { id: 20 }));
    }
    PartConfig {
        name: "left_arm".into(),
        devices,
    }
}

fn head() -> PartConfig {
    PartConfig {
        name: "head".into(),
        devices: vec![
            ("neck".into(), DeviceConfig::Orbita { id: 40 }),
            ("l_antenna".into(), dxl(30, DxlModel::XL320, 0.0, true)),
            ("r_antenna".into(), dxl(31, DxlModel::XL320, 0.0, true)),
            ("neck_fan".into(), DeviceConfig::OrbitaFan { actuator_id: 40 }),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_names_round_trip() {
        for name in [
            "full_kit",
            "full_kit_left_advanced",
            "full_kit_right_advanced",
            "full_kit_full_advanced",
            "starter_kit_left",
            "starter_kit_left_advanced",
            "starter_kit_right",
            "starter_kit_right_advanced",
            "robotic_arm_left",
            "robotic_arm_left_advanced",
            "robotic_arm_right",
            "robotic_arm_right_advanced",
        ] {
            assert!(name.parse::<RobotModel>().is_ok(), "{name}");
        }
        assert!("zuuu".parse::<RobotModel>().is_err());
    }

    #[test]
    fn full_kit_spans_three_gates() {
        let parts = RobotModel::FullKit.parts();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].name, "left_arm");
        assert_eq!(parts[2].name, "head");
    }

    #[test]
    fn advanced_kits_add_the_gripper_force_sensor() {
        let base = RobotModel::StarterKitRight.parts();
        let advanced = RobotModel::StarterKitRightAdvanced.parts();
        let names = |part: &PartConfig| {
            part.devices
                .iter()
                .map(|(name, _)| name.clone())
                .collect::<Vec<_>>()
        };
        assert!(!names(&base[0]).contains(&"r_force_gripper".to_owned()));
        assert!(names(&advanced[0]).contains(&"r_force_gripper".to_owned()));
    }

    #[test]
    fn orbita_fan_expects_no_container_of_its_own() {
        let head = head();
        let fan = &head.devices.last().unwrap().1;
        assert!(fan.expected_container().is_none());
    }
}
