//! Protocol router
//!
//! Stateless dispatcher from decoded gate messages to the owning device
//! models. Gates publish concurrently; a single mutex linearises every
//! callback so cell updates and their wake-ups never interleave across
//! reader tasks.

use std::sync::{Arc, Mutex};

use log::{debug, error, warn};

use crate::fan::Fan;
use crate::message::{parse_payload, GateMessage};
use crate::registers::OrbitaRegister;
use crate::registry::Registry;

/// Receiver of decoded frame payloads from a gate reader
pub trait MessageSink: Send + Sync {
    /// Handle one payload. Returning false stops the gate's reader: the
    /// gate is considered lost.
    fn deliver(&self, gate: &str, payload: &[u8]) -> bool;
}

/// Routes publishes to the device registry
pub struct Router {
    registry: Arc<Registry>,
    lock: Mutex<()>,
}

impl Router {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            lock: Mutex::new(()),
        }
    }
}

impl MessageSink for Router {
    fn deliver(&self, gate: &str, payload: &[u8]) -> bool {
        let Some(message) = parse_payload(payload) else {
            return true;
        };

        // updates from all gates are linearised here
        let _guard = self.lock.lock().unwrap();

        match message {
            GateMessage::DxlPublish { addr, entries } => {
                for entry in entries {
                    if entry.error != 0 {
                        // the value may be stale but callers need liveness,
                        // so it is still applied
                        warn!(
                            "dynamixel {} reported error {:#06x} on register {addr}",
                            entry.id, entry.error
                        );
                    }
                    match self.registry.dxl(entry.id) {
                        Some(motor) => {
                            if !motor.update_from_wire(addr, entry.value) {
                                warn!(
                                    "dynamixel {}: publish for address {addr} outside its map",
                                    entry.id
                                );
                            }
                        }
                        None => warn!("publish for unknown dynamixel id {}", entry.id),
                    }
                }
            }
            GateMessage::LoadPublish { entries } => {
                for (id, force) in entries {
                    match self.registry.force_sensor(id) {
                        Some(sensor) => sensor.update_force(force),
                        None => warn!("publish for unknown force sensor id {id}"),
                    }
                }
            }
            GateMessage::OrbitaPublish {
                id,
                register,
                values,
            } => match (self.registry.orbita(id), OrbitaRegister::from_code(register)) {
                (Some(orbita), Some(register)) => orbita.update_value(register, &values),
                (None, _) => warn!("publish for unknown orbita id {id}"),
                (_, None) => warn!("orbita {id}: publish for unknown register code {register}"),
            },
            GateMessage::FanPublish { entries } => {
                for (id, state) in entries {
                    match self.registry.fan(id) {
                        Some(Fan::Dxl(fan)) => fan.state().update(state),
                        Some(Fan::Orbita(fan)) => {
                            // orbita fans report through their actuator
                            if let Some(orbita) = self.registry.orbita(fan.actuator_id()) {
                                orbita.update_value(
                                    OrbitaRegister::FanState,
                                    &[state, state, state],
                                );
                            }
                        }
                        None => warn!("publish for unknown fan id {id}"),
                    }
                }
            }
            GateMessage::Containers(_) => {
                // detection answers are consumed during discovery only
                debug!("{gate}: ignoring container descriptor outside discovery");
            }
            GateMessage::KeepAlive => {}
            GateMessage::Assert(text) => {
                error!("{gate}: firmware assertion: {text}");
                self.registry.set_fault(&text);
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamixel::DynamixelMotor;
    use crate::force_sensor::ForceSensor;
    use crate::registers::{DxlModel, DxlRegister};

    fn registry_with_one_motor() -> Arc<Registry> {
        let mut registry = Registry::new();
        registry
            .add_dxl_joint("r_elbow_pitch", DynamixelMotor::new(13, DxlModel::MX64))
            .unwrap();
        registry
            .add_force_sensor("r_force_gripper", ForceSensor::new(10))
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn dxl_publish_reaches_the_owning_cell() {
        let registry = registry_with_one_motor();
        let router = Router::new(registry.clone());

        let payload = [15, 36, 2, 13, 0, 0, 0x00, 0x08];
        assert!(router.deliver("gate", &payload));

        let motor = registry.dxl(13).unwrap();
        assert_eq!(
            motor.cell(DxlRegister::PresentPosition).peek(),
            Some(vec![0x00, 0x08])
        );
    }

    #[test]
    fn nonzero_device_error_still_updates() {
        let registry = registry_with_one_motor();
        let router = Router::new(registry.clone());

        let payload = [15, 36, 2, 13, 0x24, 0x00, 0x01, 0x02];
        assert!(router.deliver("gate", &payload));
        assert!(registry
            .dxl(13)
            .unwrap()
            .cell(DxlRegister::PresentPosition)
            .is_set());
    }

    #[test]
    fn force_publish_updates_the_sensor() {
        let registry = registry_with_one_motor();
        let router = Router::new(registry.clone());

        let payload = [20, 10, 0x00, 0x00, 0x80, 0x3F];
        assert!(router.deliver("gate", &payload));
        assert!(registry.force_sensor(10).unwrap().is_set());
    }

    #[test]
    fn assertion_latches_the_fault_and_stops_the_reader() {
        let registry = registry_with_one_motor();
        let router = Router::new(registry.clone());

        let mut payload = vec![222];
        payload.extend_from_slice(b"overcurrent");
        assert!(!router.deliver("gate", &payload));
        assert!(registry.ensure_alive().is_err());
    }
}
