use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{AppId, NodeId};

/// Error returned when enrolling an application with a non-positive period.
#[derive(Debug, Error)]
#[error("application period must be positive, got {0}")]
pub struct InvalidPeriod(pub f64);

/// A pending vehicular application and its static attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub app_id: AppId,
    /// Owning vehicle.
    pub veh_id: NodeId,
    /// Job period (seconds); the deadline equals the period.
    pub period: f64,
    /// Bytes offloaded per job.
    pub input_size: u32,
    /// Bytes returned per job.
    pub output_size: u32,
    /// Service kind, keyed into the service catalog.
    pub service: String,
    /// Local-execution energy per job (joules).
    pub energy: f64,
    /// Power draw while transmitting (watts).
    pub offload_power: f64,
    /// Simulated time after which the vehicle is gone.
    #[serde(default)]
    pub stop_time: Option<f64>,
    /// Vehicle address, carried opaquely into grants.
    #[serde(default)]
    pub veh_addr: Option<Ipv4Addr>,
}

/// C1 — pure container for pending applications.
///
/// Imposes no scheduling policy; the engine copies its contents into dense
/// epoch-local arrays at the start of every epoch. Iteration order is stable
/// (ascending `AppId`).
#[derive(Debug, Default)]
pub struct AppRegistry {
    apps: BTreeMap<AppId, Application>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll an application. Rejects a non-positive period; an id collision
    /// replaces the previous record (id uniqueness is the caller's contract).
    pub fn enroll(&mut self, app: Application) -> Result<(), InvalidPeriod> {
        if app.period <= 0.0 {
            return Err(InvalidPeriod(app.period));
        }
        debug!(app = app.app_id, veh = app.veh_id, "Application enrolled");
        self.apps.insert(app.app_id, app);
        Ok(())
    }

    /// Remove an application, returning its record if it was enrolled.
    pub fn retire(&mut self, app_id: AppId) -> Option<Application> {
        let removed = self.apps.remove(&app_id);
        if removed.is_some() {
            debug!(app = app_id, "Application retired");
        }
        removed
    }

    pub fn get(&self, app_id: AppId) -> Option<&Application> {
        self.apps.get(&app_id)
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Clone the pending applications in stable (ascending id) order.
    pub fn snapshot(&self) -> Vec<Application> {
        self.apps.values().cloned().collect()
    }

    /// Retire every application whose `stop_time` has passed, returning the
    /// retired ids so callers can revoke any outstanding grants.
    pub fn prune_stopped(&mut self, now: f64) -> Vec<AppId> {
        let stopped: Vec<AppId> = self
            .apps
            .values()
            .filter(|a| a.stop_time.is_some_and(|t| t <= now))
            .map(|a| a.app_id)
            .collect();
        for id in &stopped {
            self.apps.remove(id);
            debug!(app = id, "Application pruned, vehicle stopped");
        }
        stopped
    }
}
