//! Cached robot facade
//!
//! Keeps the last written goal position, compliance, speed limit, torque
//! limit, PID and fan state per name, and only forwards the entries that
//! actually changed. Reads of cached fields never touch the wire; force
//! and fan readings are refreshed by background pollers so their cached
//! values stay current.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::warn;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};

use crate::robot::{Robot, DEFAULT_RETRY};
use crate::types::{HalError, JointRegister, Pid, Result};

const FORCE_POLL_PERIOD: Duration = Duration::from_millis(100);
const FAN_POLL_PERIOD: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Caches {
    goal_position: Mutex<HashMap<String, f64>>,
    compliant: Mutex<HashMap<String, bool>>,
    speed_limit: Mutex<HashMap<String, f64>>,
    torque_limit: Mutex<HashMap<String, f64>>,
    pid: Mutex<HashMap<String, Pid>>,
    fan: Mutex<HashMap<String, bool>>,
    force: Mutex<HashMap<String, f64>>,
}

/// Write-coalescing layer over the robot core
pub struct Controller {
    robot: Arc<Robot>,
    caches: Arc<Caches>,
    shutdown: watch::Sender<bool>,
    pollers: Vec<JoinHandle<()>>,
}

impl Controller {
    /// Seed every cache through the core, then start the pollers.
    pub async fn new(robot: Robot) -> Result<Controller> {
        let robot = Arc::new(robot);
        let caches = Arc::new(Caches::default());

        let joints = robot.get_all_joint_names();
        let joint_refs: Vec<&str> = joints.iter().map(String::as_str).collect();

        let goals = robot
            .get_joints_value(JointRegister::GoalPosition, &joint_refs, DEFAULT_RETRY)
            .await?;
        seed(&caches.goal_position, &joints, goals);

        let compliances = robot.get_compliant(&joint_refs, DEFAULT_RETRY).await?;
        seed(&caches.compliant, &joints, compliances);

        let speeds = robot
            .get_joints_value(JointRegister::MovingSpeed, &joint_refs, DEFAULT_RETRY)
            .await?;
        seed(&caches.speed_limit, &joints, speeds);

        let torques = robot
            .get_joints_value(JointRegister::TorqueLimit, &joint_refs, DEFAULT_RETRY)
            .await?;
        seed(&caches.torque_limit, &joints, torques);

        let pids = robot.get_joints_pid(&joint_refs, DEFAULT_RETRY).await?;
        seed(&caches.pid, &joints, pids);

        let fans = robot.get_all_fan_names();
        let fan_refs: Vec<&str> = fans.iter().map(String::as_str).collect();
        let fan_states = robot.get_fans_state(&fan_refs, DEFAULT_RETRY).await?;
        seed(&caches.fan, &fans, fan_states);

        let sensors = robot.get_all_force_sensor_names();
        if !sensors.is_empty() {
            let sensor_refs: Vec<&str> = sensors.iter().map(String::as_str).collect();
            let forces = robot.get_force(&sensor_refs).await?;
            seed(&caches.force, &sensors, forces);
        }

        let shutdown = watch::channel(false).0;
        let pollers = vec![
            spawn_force_poller(robot.clone(), caches.clone(), shutdown.subscribe()),
            spawn_fan_poller(robot.clone(), caches.clone(), shutdown.subscribe()),
        ];

        Ok(Controller {
            robot,
            caches,
            shutdown,
            pollers,
        })
    }

    /// Stop the pollers, then the robot and its gates.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        for poller in self.pollers.drain(..) {
            let _ = poller.await;
        }
        drop(self.caches);
        if let Ok(mut robot) = Arc::try_unwrap(self.robot) {
            robot.stop().await;
        }
    }

    pub fn robot(&self) -> &Robot {
        &self.robot
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
    // LIVE READS (pass through to the core)
    // ========================================================================

    pub async fn get_joint_positions(&self, names: &[&str]) -> Result<Vec<f64>> {
        self.robot
            .get_joints_value(JointRegister::PresentPosition, names, DEFAULT_RETRY)
            .await
    }

    pub async fn get_joint_temperatures(&self, names: &[&str]) -> Result<Vec<f64>> {
        self.robot
            .get_joints_value(JointRegister::Temperature, names, DEFAULT_RETRY)
            .await
    }

    // ========================================================================
    // CACHED READS
    // ========================================================================

    pub fn get_goal_positions(&self, names: &[&str]) -> Result<Vec<f64>> {
        cached(&self.caches.goal_position, names)
    }

    pub fn get_compliant(&self, names: &[&str]) -> Result<Vec<bool>> {
        cached(&self.caches.compliant, names)
    }

    pub fn get_goal_velocities(&self, names: &[&str]) -> Result<Vec<f64>> {
        cached(&self.caches.speed_limit, names)
    }

    pub fn get_goal_efforts(&self, names: &[&str]) -> Result<Vec<f64>> {
        cached(&self.caches.torque_limit, names)
    }

    pub fn get_joint_pids(&self, names: &[&str]) -> Result<Vec<Pid>> {
        cached(&self.caches.pid, names)
    }

    pub fn get_fans_state(&self, names: &[&str]) -> Result<Vec<bool>> {
        cached(&self.caches.fan, names)
    }

    pub fn get_force(&self, names: &[&str]) -> Result<Vec<f64>> {
        cached(&self.caches.force, names)
    }

    // ========================================================================
    // COALESCED WRITES
    // ========================================================================

    pub async fn set_goal_positions(&self, values: &[(&str, f64)]) -> Result<bool> {
        let fresh = fresh_entries(&self.caches.goal_position, values, |a, b| a == b);
        if fresh.is_empty() {
            return Ok(true);
        }
        self.robot
            .set_joints_value(JointRegister::GoalPosition, &fresh)
            .await?;
        store(&self.caches.goal_position, &fresh);
        Ok(true)
    }

    pub async fn set_compliance(&self, values: &[(&str, bool)]) -> Result<bool> {
        let fresh = fresh_entries(&self.caches.compliant, values, |a, b| a == b);
        if fresh.is_empty() {
            return Ok(true);
        }
        self.robot.set_compliance(&fresh).await?;
        store(&self.caches.compliant, &fresh);
        Ok(true)
    }

    pub async fn set_goal_velocities(&self, values: &[(&str, f64)]) -> Result<bool> {
        let fresh = fresh_entries(&self.caches.speed_limit, values, |a, b| a == b);
        if fresh.is_empty() {
            return Ok(true);
        }
        self.robot
            .set_joints_value(JointRegister::MovingSpeed, &fresh)
            .await?;
        store(&self.caches.speed_limit, &fresh);
        Ok(true)
    }

    pub async fn set_goal_efforts(&self, values: &[(&str, f64)]) -> Result<bool> {
        let fresh = fresh_entries(&self.caches.torque_limit, values, |a, b| a == b);
        if fresh.is_empty() {
            return Ok(true);
        }
        self.robot
            .set_joints_value(JointRegister::TorqueLimit, &fresh)
            .await?;
        store(&self.caches.torque_limit, &fresh);
        Ok(true)
    }

    pub async fn set_joint_pids(&self, values: &[(&str, Pid)]) -> Result<bool> {
        // NaN gains are unknown and always count as a change
        let fresh = fresh_entries(&self.caches.pid, values, Pid::same_as);
        if fresh.is_empty() {
            return Ok(true);
        }
        self.robot.set_joints_pid(&fresh).await?;
        store(&self.caches.pid, &fresh);
        Ok(true)
    }

    pub async fn set_fans_state(&self, values: &[(&str, bool)]) -> Result<bool> {
        let fresh = fresh_entries(&self.caches.fan, values, |a, b| a == b);
        if fresh.is_empty() {
            return Ok(true);
        }
        self.robot.set_fans_state(&fresh).await?;
        store(&self.caches.fan, &fresh);
        Ok(true)
    }
}

// ============================================================================
// Cache plumbing
// ============================================================================

fn seed<V>(cache: &Mutex<HashMap<String, V>>, names: &[String], values: Vec<V>) {
    let mut cache = cache.lock().unwrap();
    for (name, value) in names.iter().zip(values) {
        cache.insert(name.clone(), value);
    }
}

fn store<V: Copy>(cache: &Mutex<HashMap<String, V>>, entries: &[(&str, V)]) {
    let mut cache = cache.lock().unwrap();
    for (name, value) in entries {
        cache.insert((*name).to_owned(), *value);
    }
}

fn cached<V: Copy>(cache: &Mutex<HashMap<String, V>>, names: &[&str]) -> Result<Vec<V>> {
    let cache = cache.lock().unwrap();
    names
        .iter()
        .map(|name| {
            cache
                .get(*name)
                .copied()
                .ok_or_else(|| HalError::UnknownJoint((*name).to_owned()))
        })
        .collect()
}

/// Entries whose value differs from the cache (or are not cached yet).
fn fresh_entries<'a, V: Copy>(
    cache: &Mutex<HashMap<String, V>>,
    values: &[(&'a str, V)],
    same: impl Fn(&V, &V) -> bool,
) -> Vec<(&'a str, V)> {
    let cache = cache.lock().unwrap();
    values
        .iter()
        .filter(|(name, value)| cache.get(*name).is_none_or(|cached| !same(cached, value)))
        .copied()
        .collect()
}

// ============================================================================
// Background pollers
// ============================================================================

fn spawn_force_poller(
    robot: Arc<Robot>,
    caches: Arc<Caches>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let names = robot.get_all_force_sensor_names();
        if names.is_empty() {
            return;
        }
        let mut ticker = time::interval(FORCE_POLL_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
                    match robot.get_force(&refs).await {
                        Ok(forces) => seed(&caches.force, &names, forces),
                        Err(HalError::GateAssert(_)) => break,
                        Err(err) => warn!("force poll failed: {err}"),
                    }
                }
            }
        }
    })
}

fn spawn_fan_poller(
    robot: Arc<Robot>,
    caches: Arc<Caches>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let names = robot.get_all_fan_names();
        if names.is_empty() {
            return;
        }
        let mut ticker = time::interval(FAN_POLL_PERIOD);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
                    match robot.get_fans_state(&refs, 0).await {
                        Ok(states) => seed(&caches.fan, &names, states),
                        Err(HalError::GateAssert(_)) => break,
                        Err(err) => warn!("fan poll failed: {err}"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_entries_skips_unchanged_values() {
        let cache = Mutex::new(HashMap::from([("a".to_owned(), 1.0), ("b".to_owned(), 2.0)]));
        let fresh = fresh_entries(&cache, &[("a", 1.0), ("b", 3.0), ("c", 4.0)], |a, b| a == b);
        assert_eq!(fresh, vec![("b", 3.0), ("c", 4.0)]);
    }

    #[test]
    fn identical_write_needs_no_forwarding() {
        let cache = Mutex::new(HashMap::from([("a".to_owned(), true)]));
        assert!(fresh_entries(&cache, &[("a", true)], |a, b| a == b).is_empty());
    }

    #[test]
    fn nan_pid_always_counts_as_changed() {
        let cache = Mutex::new(HashMap::from([("neck_disk_top".to_owned(), Pid::UNKNOWN)]));
        let fresh = fresh_entries(&cache, &[("neck_disk_top", Pid::UNKNOWN)], Pid::same_as);
        assert_eq!(fresh.len(), 1);

        let known = Pid::new(1.0, 0.0, 0.1);
        let cache = Mutex::new(HashMap::from([("neck_disk_top".to_owned(), known)]));
        assert!(fresh_entries(&cache, &[("neck_disk_top", known)], Pid::same_as).is_empty());
    }
}
