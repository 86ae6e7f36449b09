//! Force sensor device model

use tokio::time::Duration;

use crate::cell::SyncCell;

/// A load cell attached to a gate
///
/// Forces are published by the gate on its own schedule; reads wait on
/// the latest published value.
#[derive(Debug)]
pub struct ForceSensor {
    id: u8,
    force: SyncCell<f32>,
}

impl ForceSensor {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            force: SyncCell::new(),
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn update_force(&self, force: f32) {
        self.force.update(force);
    }

    pub async fn get_force(&self, timeout: Duration) -> Option<f32> {
        self.force.get(timeout).await
    }

    pub fn is_set(&self) -> bool {
        self.force.is_set()
    }
}
