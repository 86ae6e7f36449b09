//! Robot core
//!
//! Owns every gate and every device, resolves public names to devices,
//! and implements the joint / force / fan / Orbita operations. A read
//! clears the target cells, emits one grouped request per gate, then
//! blocks on the cells with timeout and retry; a write updates the local
//! cells immediately and forwards grouped setpoint frames.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use log::warn;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Duration;

use crate::config::{DeviceConfig, PartConfig, RobotModel};
use crate::discovery;
use crate::dynamixel::DynamixelMotor;
use crate::fan::{DxlFan, Fan, OrbitaFan};
use crate::force_sensor::ForceSensor;
use crate::gate::GateClient;
use crate::message;
use crate::orbita::{Disk, OrbitaActuator, DISKS};
use crate::registers::{DxlRegister, OrbitaRegister};
use crate::registry::{JointRef, Registry};
use crate::router::Router;
use crate::types::{HalError, JointRegister, Pid, Result};

/// Bound on one cell wait; each retry gets a fresh window.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of re-requests before a read gives up.
pub const DEFAULT_RETRY: u32 = 3;

/// The whole robot behind its serial gates
pub struct Robot {
    registry: Arc<Registry>,
    gates: Vec<GateClient>,
    gate_of: HashMap<String, usize>,
    sync_timeout: Duration,
}

impl Robot {
    // ========================================================================
    // CONSTRUCTION
    // ========================================================================

    /// Discover the gates of `model` among `ports` and start a client on
    /// each. Fails fast when some expected device is nowhere to be found.
    pub async fn connect(model: RobotModel, ports: &[String]) -> Result<Robot> {
        let parts = model.parts();

        let mut available = ports.to_vec();
        let mut assigned = Vec::with_capacity(parts.len());
        for part in &parts {
            let port = discovery::find_gate(&part.expectations(), &available).await?;
            available.retain(|candidate| *candidate != port);
            assigned.push(port);
        }

        let (registry, gate_of) = build_registry(&parts)?;
        let registry = Arc::new(registry);
        let router = Arc::new(Router::new(registry.clone()));

        let mut gates = Vec::with_capacity(assigned.len());
        for port in &assigned {
            gates.push(GateClient::open(port, router.clone()).await?);
        }

        Ok(Robot {
            registry,
            gates,
            gate_of,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        })
    }

    /// Discover the robot among every serial port present on the system.
    pub async fn connect_auto(model: RobotModel) -> Result<Robot> {
        let ports = tokio_serial::available_ports()?
            .into_iter()
            .map(|info| info.port_name)
            .collect::<Vec<_>>();
        Self::connect(model, &ports).await
    }

    /// Start a robot over already-open transports, one per part, skipping
    /// discovery. Part `i` talks through transport `i`.
    pub async fn with_transports<T>(parts: &[PartConfig], transports: Vec<T>) -> Result<Robot>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (registry, gate_of) = build_registry(parts)?;
        let registry = Arc::new(registry);
        let router = Arc::new(Router::new(registry.clone()));

        let mut gates = Vec::with_capacity(transports.len());
        for (part, transport) in parts.iter().zip(transports) {
            gates.push(GateClient::start(&part.name, transport, router.clone()).await?);
        }

        Ok(Robot {
            registry,
            gates,
            gate_of,
            sync_timeout: DEFAULT_SYNC_TIMEOUT,
        })
    }

    /// Stop every gate client and release the ports.
    pub async fn stop(&mut self) {
        for gate in &mut self.gates {
            gate.stop().await;
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Override the per-attempt cell wait bound.
    pub fn set_sync_timeout(&mut self, timeout: Duration) {
        self.sync_timeout = timeout;
    }

    // ========================================================================
    // NAME ENUMERATION
    // ========================================================================

    pub fn get_all_joint_names(&self) -> Vec<String> {
        self.registry.joint_names().to_vec()
    }

    pub fn get_all_fan_names(&self) -> Vec<String> {
        self.registry.fan_names().to_vec()
    }

    pub fn get_all_force_sensor_names(&self) -> Vec<String> {
        self.registry.force_sensor_names().to_vec()
    }

    fn gate_index(&self, name: &str) -> Result<usize> {
        self.gate_of
            .get(name)
            .copied()
            .ok_or_else(|| HalError::UnknownDevice(name.to_owned()))
    }

    // ========================================================================
    // JOINT READS
    // ========================================================================

    /// Read one register on a set of joints, in the caller's order.
    ///
    /// Auto-published registers keep their last published value; anything
    /// else is cleared and explicitly requested, one grouped frame per
    /// gate. Joints still unset after the wait are re-requested up to
    /// `retry` times.
    pub async fn get_joints_value(
        &self,
        register: JointRegister,
        names: &[&str],
        retry: u32,
    ) -> Result<Vec<f64>> {
        self.registry.ensure_alive()?;

        let mut pending: Vec<&str> = names.to_vec();
        let mut attempts_left = retry;
        loop {
            self.request_joints_value(register, &pending).await?;

            let mut still_unset = Vec::new();
            for name in &pending {
                if !self.wait_joint_value(register, name).await? {
                    still_unset.push(*name);
                }
            }
            if still_unset.is_empty() {
                break;
            }
            // a firmware assertion explains the silence better than a timeout
            self.registry.ensure_alive()?;
            if attempts_left == 0 {
                return Err(HalError::Timeout {
                    name: still_unset[0].to_owned(),
                    register: register.name().to_owned(),
                });
            }
            attempts_left -= 1;
            pending = still_unset;
        }

        names
            .iter()
            .map(|name| self.read_joint_value(register, name))
            .collect()
    }

    pub async fn get_compliant(&self, names: &[&str], retry: u32) -> Result<Vec<bool>> {
        let torques = self
            .get_joints_value(JointRegister::TorqueEnable, names, retry)
            .await?;
        Ok(torques.into_iter().map(|torque| torque == 0.0).collect())
    }

    /// Clear the relevant cells and emit one grouped request per gate.
    async fn request_joints_value(&self, register: JointRegister, names: &[&str]) -> Result<()> {
        let mut dxl_groups: BTreeMap<(usize, u8, u8), Vec<u8>> = BTreeMap::new();
        let mut orbita_targets: BTreeSet<(usize, u8)> = BTreeSet::new();

        for name in names {
            match self.registry.joint(name)? {
                JointRef::Dxl(id) => {
                    let motor = self.registry.dxl(id).expect("registry maps are consistent");
                    let dxl_register = DxlRegister::from(register);
                    if register.is_auto_published() {
                        // the gate streams these on its own; keep the last
                        // value and only ask when nothing arrived yet
                        if motor.is_value_set(dxl_register) {
                            continue;
                        }
                    } else {
                        motor.clear_value(dxl_register);
                    }
                    let (addr, width) = motor.layout(dxl_register);
                    dxl_groups
                        .entry((self.gate_index(name)?, addr, width))
                        .or_default()
                        .push(id);
                }
                JointRef::OrbitaDisk { actuator, .. } => {
                    let orbita = self
                        .registry
                        .orbita(actuator)
                        .expect("registry maps are consistent");
                    orbita.clear_value(register.into());
                    orbita_targets.insert((self.gate_index(name)?, actuator));
                }
            }
        }

        for ((gate, addr, width), ids) in dxl_groups {
            self.gates[gate]
                .send(&message::dxl_get(addr, width, &ids))
                .await?;
        }
        for (gate, actuator) in orbita_targets {
            self.gates[gate]
                .send(&message::orbita_get(actuator, register.into()))
                .await?;
        }
        Ok(())
    }

    async fn wait_joint_value(&self, register: JointRegister, name: &str) -> Result<bool> {
        Ok(match self.registry.joint(name)? {
            JointRef::Dxl(id) => {
                let motor = self.registry.dxl(id).expect("registry maps are consistent");
                motor
                    .cell(register.into())
                    .get(self.sync_timeout)
                    .await
                    .is_some()
            }
            JointRef::OrbitaDisk { actuator, disk } => {
                let orbita = self
                    .registry
                    .orbita(actuator)
                    .expect("registry maps are consistent");
                orbita
                    .cell(disk, register.into())
                    .get(self.sync_timeout)
                    .await
                    .is_some()
            }
        })
    }

    fn read_joint_value(&self, register: JointRegister, name: &str) -> Result<f64> {
        let timeout = || HalError::Timeout {
            name: name.to_owned(),
            register: register.name().to_owned(),
        };
        match self.registry.joint(name)? {
            JointRef::Dxl(id) => {
                let motor = self.registry.dxl(id).expect("registry maps are consistent");
                let dxl_register = DxlRegister::from(register);
                let value = motor.cell(dxl_register).peek().ok_or_else(timeout)?;
                Ok(motor.convert_to_usi(dxl_register, &value))
            }
            JointRef::OrbitaDisk { actuator, disk } => {
                let orbita = self
                    .registry
                    .orbita(actuator)
                    .expect("registry maps are consistent");
                let orbita_register = OrbitaRegister::from(register);
                let value = orbita
                    .cell(disk, orbita_register)
                    .peek()
                    .ok_or_else(timeout)?;
                let scalar = orbita.decode_scalar(orbita_register, &value);
                Ok(if register == JointRegister::TorqueEnable {
                    // compliant flag is the inverse of torque enable
                    1.0 - scalar
                } else {
                    scalar
                })
            }
        }
    }

    // ========================================================================
    // JOINT WRITES
    // ========================================================================

    /// Write one register on a set of joints.
    ///
    /// The local cells observe the setpoint immediately, before the
    /// hardware confirms anything. Goal and speed writes to a motor whose
    /// torque is known-disabled are kept local: the gate treats them as
    /// no-ops but they can clobber other state on its side.
    pub async fn set_joints_value(
        &self,
        register: JointRegister,
        values: &[(&str, f64)],
    ) -> Result<()> {
        self.registry.ensure_alive()?;

        let mut dxl_groups: BTreeMap<(usize, u8, u8), Vec<(u8, Vec<u8>)>> = BTreeMap::new();
        let mut orbita_groups: BTreeMap<(usize, u8), Vec<(u8, Vec<u8>)>> = BTreeMap::new();
        let mut torque_enabled: Vec<&str> = Vec::new();

        for (name, usi) in values {
            match self.registry.joint(name)? {
                JointRef::Dxl(id) => {
                    let motor = self.registry.dxl(id).expect("registry maps are consistent");
                    let dxl_register = DxlRegister::from(register);
                    let raw = motor.convert_to_raw(dxl_register, *usi)?;

                    let suppress = matches!(
                        register,
                        JointRegister::GoalPosition | JointRegister::MovingSpeed
                    ) && motor.torque_disabled();

                    // read-after-write observes the intent either way
                    motor.cell(dxl_register).update(raw.clone());
                    if suppress {
                        continue;
                    }

                    if register == JointRegister::TorqueEnable && *usi != 0.0 {
                        torque_enabled.push(*name);
                    }
                    let (addr, width) = motor.layout(dxl_register);
                    dxl_groups
                        .entry((self.gate_index(name)?, addr, width))
                        .or_default()
                        .push((id, raw));
                }
                JointRef::OrbitaDisk { actuator, disk } => {
                    let orbita = self
                        .registry
                        .orbita(actuator)
                        .expect("registry maps are consistent");
                    let orbita_register = OrbitaRegister::from(register);
                    let scalar = if register == JointRegister::TorqueEnable {
                        if *usi == 0.0 {
                            1.0
                        } else {
                            0.0
                        }
                    } else {
                        *usi
                    };
                    let raw = orbita.encode_scalar(orbita_register, scalar);
                    orbita.cell(disk, orbita_register).update(raw.clone());
                    orbita_groups
                        .entry((self.gate_index(name)?, actuator))
                        .or_default()
                        .push((disk.index() as u8, raw));
                }
            }
        }

        for ((gate, addr, width), group) in dxl_groups {
            self.gates[gate]
                .send(&message::dxl_set(addr, width, &group))
                .await?;
        }
        for ((gate, actuator), group) in orbita_groups {
            self.gates[gate]
                .send(&message::orbita_set(actuator, register.into(), &group))
                .await?;
        }

        if register == JointRegister::TorqueEnable && !torque_enabled.is_empty() {
            self.after_torque_enable(&torque_enabled).await?;
        }
        Ok(())
    }

    pub async fn set_compliance(&self, values: &[(&str, bool)]) -> Result<()> {
        let torques: Vec<(&str, f64)> = values
            .iter()
            .map(|(name, compliant)| (*name, if *compliant { 0.0 } else { 1.0 }))
            .collect();
        self.set_joints_value(JointRegister::TorqueEnable, &torques)
            .await
    }

    /// Re-arm a motor that just had its torque enabled.
    ///
    /// The gate may have dropped the speed and goal setpoints while the
    /// motor was compliant: replay the cached moving speed, then refresh
    /// the goal position from the hardware so nobody trusts a stale one.
    /// Skipping this leaves a freshly stiffened motor one goal write away
    /// from slamming at full speed.
    async fn after_torque_enable(&self, names: &[&str]) -> Result<()> {
        let mut speed_groups: BTreeMap<(usize, u8, u8), Vec<(u8, Vec<u8>)>> = BTreeMap::new();
        let mut goal_groups: BTreeMap<(usize, u8, u8), Vec<u8>> = BTreeMap::new();

        for name in names {
            let JointRef::Dxl(id) = self.registry.joint(name)? else {
                continue;
            };
            let motor = self.registry.dxl(id).expect("registry maps are consistent");
            let gate = self.gate_index(name)?;

            if let Some(speed) = motor.cell(DxlRegister::MovingSpeed).peek() {
                let (addr, width) = motor.layout(DxlRegister::MovingSpeed);
                speed_groups
                    .entry((gate, addr, width))
                    .or_default()
                    .push((id, speed));
            }

            motor.clear_value(DxlRegister::GoalPosition);
            let (addr, width) = motor.layout(DxlRegister::GoalPosition);
            goal_groups.entry((gate, addr, width)).or_default().push(id);
        }

        for ((gate, addr, width), group) in speed_groups {
            self.gates[gate]
                .send(&message::dxl_set(addr, width, &group))
                .await?;
        }
        for ((gate, addr, width), ids) in goal_groups {
            self.gates[gate]
                .send(&message::dxl_get(addr, width, &ids))
                .await?;
        }
        Ok(())
    }

    // ========================================================================
    // FORCE SENSORS
    // ========================================================================

    /// Latest published force of each sensor, in the caller's order.
    pub async fn get_force(&self, names: &[&str]) -> Result<Vec<f64>> {
        self.registry.ensure_alive()?;

        let mut forces = Vec::with_capacity(names.len());
        for name in names {
            let sensor = self.registry.force_sensor_by_name(name)?;
            let force = sensor
                .get_force(self.sync_timeout)
                .await
                .ok_or_else(|| HalError::Timeout {
                    name: name.to_string(),
                    register: "force".to_owned(),
                })?;
            forces.push(force as f64);
        }
        Ok(forces)
    }

    // ========================================================================
    // FANS
    // ========================================================================

    pub async fn get_fans_state(&self, names: &[&str], retry: u32) -> Result<Vec<bool>> {
        self.registry.ensure_alive()?;

        let mut pending: Vec<&str> = names.to_vec();
        let mut attempts_left = retry;
        loop {
            self.request_fans_state(&pending).await?;

            let mut still_unset = Vec::new();
            for name in &pending {
                if !self.wait_fan_state(name).await? {
                    still_unset.push(*name);
                }
            }
            if still_unset.is_empty() {
                break;
            }
            self.registry.ensure_alive()?;
            if attempts_left == 0 {
                return Err(HalError::Timeout {
                    name: still_unset[0].to_owned(),
                    register: "fan_state".to_owned(),
                });
            }
            attempts_left -= 1;
            pending = still_unset;
        }

        names
            .iter()
            .map(|name| self.read_fan_state(name))
            .collect()
    }

    pub async fn set_fans_state(&self, states: &[(&str, bool)]) -> Result<()> {
        self.registry.ensure_alive()?;

        let mut dxl_groups: BTreeMap<usize, Vec<(u8, u8)>> = BTreeMap::new();
        let mut orbita_writes: Vec<(usize, u8, u8)> = Vec::new();

        for (name, on) in states {
            let state = u8::from(*on);
            match self.registry.fan_by_name(name)? {
                Fan::Dxl(fan) => {
                    fan.state().update(state);
                    dxl_groups
                        .entry(self.gate_index(name)?)
                        .or_default()
                        .push((fan.id(), state));
                }
                Fan::Orbita(fan) => {
                    let orbita = self
                        .registry
                        .orbita(fan.actuator_id())
                        .expect("registry maps are consistent");
                    orbita.update_value(OrbitaRegister::FanState, &[state, state, state]);
                    orbita_writes.push((self.gate_index(name)?, fan.actuator_id(), state));
                }
            }
        }

        for (gate, group) in dxl_groups {
            self.gates[gate].send(&message::fan_set(&group)).await?;
        }
        for (gate, actuator, state) in orbita_writes {
            let per_disk: Vec<(u8, Vec<u8>)> = DISKS
                .into_iter()
                .map(|disk| (disk.index() as u8, vec![state]))
                .collect();
            self.gates[gate]
                .send(&message::orbita_set(
                    actuator,
                    OrbitaRegister::FanState,
                    &per_disk,
                ))
                .await?;
        }
        Ok(())
    }

    async fn request_fans_state(&self, names: &[&str]) -> Result<()> {
        let mut dxl_groups: BTreeMap<usize, Vec<u8>> = BTreeMap::new();
        let mut orbita_targets: BTreeSet<(usize, u8)> = BTreeSet::new();

        for name in names {
            match self.registry.fan_by_name(name)? {
                Fan::Dxl(fan) => {
                    fan.state().reset();
                    dxl_groups
                        .entry(self.gate_index(name)?)
                        .or_default()
                        .push(fan.id());
                }
                Fan::Orbita(fan) => {
                    let orbita = self
                        .registry
                        .orbita(fan.actuator_id())
                        .expect("registry maps are consistent");
                    orbita.clear_value(OrbitaRegister::FanState);
                    orbita_targets.insert((self.gate_index(name)?, fan.actuator_id()));
                }
            }
        }

        for (gate, ids) in dxl_groups {
            self.gates[gate].send(&message::fan_get(&ids)).await?;
        }
        for (gate, actuator) in orbita_targets {
            self.gates[gate]
                .send(&message::orbita_get(actuator, OrbitaRegister::FanState))
                .await?;
        }
        Ok(())
    }

    async fn wait_fan_state(&self, name: &str) -> Result<bool> {
        Ok(match self.registry.fan_by_name(name)? {
            Fan::Dxl(fan) => fan.state().get(self.sync_timeout).await.is_some(),
            Fan::Orbita(fan) => {
                let orbita = self
                    .registry
                    .orbita(fan.actuator_id())
                    .expect("registry maps are consistent");
                orbita
                    .cell(Disk::Top, OrbitaRegister::FanState)
                    .get(self.sync_timeout)
                    .await
                    .is_some()
            }
        })
    }

    fn read_fan_state(&self, name: &str) -> Result<bool> {
        let timeout = || HalError::Timeout {
            name: name.to_owned(),
            register: "fan_state".to_owned(),
        };
        match self.registry.fan_by_name(name)? {
            Fan::Dxl(fan) => Ok(fan.state().peek().ok_or_else(timeout)? != 0),
            Fan::Orbita(fan) => {
                let orbita = self
                    .registry
                    .orbita(fan.actuator_id())
                    .expect("registry maps are consistent");
                let value = orbita
                    .cell(Disk::Top, OrbitaRegister::FanState)
                    .peek()
                    .ok_or_else(timeout)?;
                Ok(value.first().copied().unwrap_or(0) != 0)
            }
        }
    }

    // ========================================================================
    // ORBITA REGISTER ACCESS
    // ========================================================================

    /// Read a scalar Orbita register, one value per disk (top, middle,
    /// bottom).
    pub async fn get_orbita_value(
        &self,
        actuator: &str,
        register: OrbitaRegister,
        retry: u32,
    ) -> Result<[f64; 3]> {
        let orbita = self.refresh_orbita_register(actuator, register, retry).await?;
        let mut values = [0.0; 3];
        for disk in DISKS {
            let raw = orbita.cell(disk, register).peek().unwrap_or_default();
            values[disk.index()] = orbita.decode_scalar(register, &raw);
        }
        Ok(values)
    }

    /// Write a scalar Orbita register, one value per disk.
    pub async fn set_orbita_value(
        &self,
        actuator: &str,
        register: OrbitaRegister,
        values: [f64; 3],
    ) -> Result<()> {
        self.registry.ensure_alive()?;
        let orbita = self.registry.orbita_by_name(actuator)?;

        let mut per_disk = Vec::with_capacity(3);
        for disk in DISKS {
            let raw = orbita.encode_scalar(register, values[disk.index()]);
            orbita.cell(disk, register).update(raw.clone());
            per_disk.push((disk.index() as u8, raw));
        }

        let gate = self.gate_index(actuator)?;
        self.gates[gate]
            .send(&message::orbita_set(orbita.id(), register, &per_disk))
            .await
    }

    pub async fn get_orbita_pid(&self, actuator: &str, retry: u32) -> Result<[Pid; 3]> {
        let orbita = self
            .refresh_orbita_register(actuator, OrbitaRegister::Pid, retry)
            .await?;
        let mut pids = [Pid::UNKNOWN; 3];
        for disk in DISKS {
            let raw = orbita
                .cell(disk, OrbitaRegister::Pid)
                .peek()
                .unwrap_or_default();
            pids[disk.index()] = orbita.decode_pid(&raw);
        }
        Ok(pids)
    }

    pub async fn set_orbita_pid(&self, actuator: &str, pids: [Pid; 3]) -> Result<()> {
        self.registry.ensure_alive()?;
        let orbita = self.registry.orbita_by_name(actuator)?;

        let mut per_disk = Vec::with_capacity(3);
        for disk in DISKS {
            let raw = orbita.encode_pid(pids[disk.index()]);
            orbita.cell(disk, OrbitaRegister::Pid).update(raw.clone());
            per_disk.push((disk.index() as u8, raw));
        }

        let gate = self.gate_index(actuator)?;
        self.gates[gate]
            .send(&message::orbita_set(
                orbita.id(),
                OrbitaRegister::Pid,
                &per_disk,
            ))
            .await
    }

    pub async fn get_orbita_angle_limits(
        &self,
        actuator: &str,
        retry: u32,
    ) -> Result<[(f64, f64); 3]> {
        let orbita = self
            .refresh_orbita_register(actuator, OrbitaRegister::AngleLimit, retry)
            .await?;
        let mut limits = [(0.0, 0.0); 3];
        for disk in DISKS {
            let raw = orbita
                .cell(disk, OrbitaRegister::AngleLimit)
                .peek()
                .unwrap_or_default();
            limits[disk.index()] = orbita.decode_limits(&raw);
        }
        Ok(limits)
    }

    pub async fn set_orbita_angle_limits(
        &self,
        actuator: &str,
        limits: [(f64, f64); 3],
    ) -> Result<()> {
        self.registry.ensure_alive()?;
        let orbita = self.registry.orbita_by_name(actuator)?;

        let mut per_disk = Vec::with_capacity(3);
        for disk in DISKS {
            let (low, high) = limits[disk.index()];
            let raw = orbita.encode_limits(low, high);
            orbita
                .cell(disk, OrbitaRegister::AngleLimit)
                .update(raw.clone());
            per_disk.push((disk.index() as u8, raw));
        }

        let gate = self.gate_index(actuator)?;
        self.gates[gate]
            .send(&message::orbita_set(
                orbita.id(),
                OrbitaRegister::AngleLimit,
                &per_disk,
            ))
            .await
    }

    /// Clear, request and wait for one register on every disk of an
    /// actuator, with retry.
    async fn refresh_orbita_register(
        &self,
        actuator: &str,
        register: OrbitaRegister,
        retry: u32,
    ) -> Result<&OrbitaActuator> {
        self.registry.ensure_alive()?;
        let orbita = self.registry.orbita_by_name(actuator)?;
        let gate = self.gate_index(actuator)?;

        let mut attempts_left = retry;
        loop {
            orbita.clear_value(register);
            self.gates[gate]
                .send(&message::orbita_get(orbita.id(), register))
                .await?;

            let mut synced = true;
            for disk in DISKS {
                if orbita
                    .cell(disk, register)
                    .get(self.sync_timeout)
                    .await
                    .is_none()
                {
                    synced = false;
                    break;
                }
            }
            if synced {
                return Ok(orbita);
            }
            self.registry.ensure_alive()?;
            if attempts_left == 0 {
                return Err(HalError::Timeout {
                    name: actuator.to_owned(),
                    register: register.name().to_owned(),
                });
            }
            attempts_left -= 1;
        }
    }

    // ========================================================================
    // JOINT PID ACCESS
    // ========================================================================

    /// PID gains per joint. Dynamixel joints have no PID register on the
    /// gate and report unknown gains.
    pub async fn get_joints_pid(&self, names: &[&str], retry: u32) -> Result<Vec<Pid>> {
        self.registry.ensure_alive()?;

        let mut actuators: BTreeSet<u8> = BTreeSet::new();
        for name in names {
            if let JointRef::OrbitaDisk { actuator, .. } = self.registry.joint(name)? {
                actuators.insert(actuator);
            }
        }
        for id in actuators {
            let orbita_name = self.orbita_name_of(id)?;
            self.refresh_orbita_register(&orbita_name, OrbitaRegister::Pid, retry)
                .await?;
        }

        names
            .iter()
            .map(|name| match self.registry.joint(name)? {
                JointRef::Dxl(_) => Ok(Pid::UNKNOWN),
                JointRef::OrbitaDisk { actuator, disk } => {
                    let orbita = self
                        .registry
                        .orbita(actuator)
                        .expect("registry maps are consistent");
                    let raw = orbita
                        .cell(disk, OrbitaRegister::Pid)
                        .peek()
                        .unwrap_or_default();
                    Ok(orbita.decode_pid(&raw))
                }
            })
            .collect()
    }

    pub async fn set_joints_pid(&self, values: &[(&str, Pid)]) -> Result<()> {
        self.registry.ensure_alive()?;

        let mut groups: BTreeMap<(usize, u8), Vec<(u8, Vec<u8>)>> = BTreeMap::new();
        for (name, pid) in values {
            match self.registry.joint(name)? {
                JointRef::Dxl(_) => {
                    warn!("{name}: no PID register on this joint, write ignored");
                }
                JointRef::OrbitaDisk { actuator, disk } => {
                    let orbita = self
                        .registry
                        .orbita(actuator)
                        .expect("registry maps are consistent");
                    let raw = orbita.encode_pid(*pid);
                    orbita.cell(disk, OrbitaRegister::Pid).update(raw.clone());
                    groups
                        .entry((self.gate_index(name)?, actuator))
                        .or_default()
                        .push((disk.index() as u8, raw));
                }
            }
        }

        for ((gate, actuator), group) in groups {
            self.gates[gate]
                .send(&message::orbita_set(actuator, OrbitaRegister::Pid, &group))
                .await?;
        }
        Ok(())
    }

    fn orbita_name_of(&self, id: u8) -> Result<String> {
        // disk joints are registered as <actuator>_disk_<pos>
        for name in self.registry.joint_names() {
            if let Ok(JointRef::OrbitaDisk { actuator, disk }) = self.registry.joint(name) {
                if actuator == id && disk == Disk::Top {
                    return Ok(name
                        .strip_suffix("_disk_top")
                        .unwrap_or(name.as_str())
                        .to_owned());
                }
            }
        }
        Err(HalError::UnknownDevice(format!("orbita {id}")))
    }
}

// ============================================================================
// Registry construction
// ============================================================================

fn build_registry(parts: &[PartConfig]) -> Result<(Registry, HashMap<String, usize>)> {
    let mut registry = Registry::new();
    let mut gate_of = HashMap::new();

    for (index, part) in parts.iter().enumerate() {
        for (name, device) in &part.devices {
            match device {
                DeviceConfig::Dxl {
                    id,
                    model,
                    offset,
                    direct,
                } => {
                    registry.add_dxl_joint(
                        name,
                        DynamixelMotor::new(*id, *model)
                            .with_offset(*offset)
                            .with_direct(*direct),
                    )?;
                    gate_of.insert(name.clone(), index);
                }
                DeviceConfig::Orbita { id } => {
                    registry.add_orbita(name, OrbitaActuator::new(*id))?;
                    gate_of.insert(name.clone(), index);
                    for disk in DISKS {
                        gate_of.insert(format!("{name}_{}", disk.suffix()), index);
                    }
                }
                DeviceConfig::ForceSensor { id } => {
                    registry.add_force_sensor(name, ForceSensor::new(*id))?;
                    gate_of.insert(name.clone(), index);
                }
                DeviceConfig::DxlFan { id } => {
                    registry.add_fan(name, Fan::Dxl(DxlFan::new(*id)))?;
                    gate_of.insert(name.clone(), index);
                }
                DeviceConfig::OrbitaFan { actuator_id } => {
                    registry.add_fan(name, Fan::Orbita(OrbitaFan::new(*actuator_id)))?;
                    gate_of.insert(name.clone(), index);
                }
            }
        }
    }

    Ok((registry, gate_of))
}
