pub mod candidates;
pub mod epoch;
pub mod graph_match;
pub mod greedy;
pub mod lp;
pub mod quick_lr;

use tracing::{info, warn};

use crate::catalog::ServiceCatalog;
use crate::config::{Policy, SchedulerConfig};
use crate::error::ConfigError;
use crate::grants::{self, Grant, Revocation};
use crate::registry::apps::AppRegistry;
use crate::registry::links::LinkObservatory;
use crate::registry::resources::ResourceRegistry;
use crate::{AppId, NodeId};

use candidates::InstancePool;
use epoch::EpochState;
use quick_lr::LrVariant;

/// One policy decision: a service instance chosen for admission, with the
/// scheduling metadata the grant issuer needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub app_id: AppId,
    pub veh_id: NodeId,
    pub off_rsu: NodeId,
    pub pro_rsu: NodeId,
    pub rbs: u32,
    pub cus: u32,
    pub utility: f64,
    pub max_off_time: f64,
    pub exe_delay: f64,
    pub tier: Option<String>,
}

impl Selection {
    /// Lift instance `i` of the pool back into id space.
    pub(crate) fn from_instance(epoch: &EpochState, pool: &InstancePool, i: usize) -> Self {
        let app = &epoch.apps[pool.app_idx[i]];
        Self {
            app_id: app.app_id,
            veh_id: app.veh_id,
            off_rsu: epoch.rsu_ids[pool.off_rsu[i]],
            pro_rsu: epoch.rsu_ids[pool.pro_rsu[i]],
            rbs: pool.rbs[i],
            cus: pool.cus[i],
            utility: pool.utility[i],
            max_off_time: pool.max_off_time[i],
            exe_delay: pool.exe_delay[i],
            tier: pool.tier[i].clone(),
        }
    }
}

/// The scheduling core: owns the three registries and runs the
/// snapshot → enumerate → select → commit → emit pipeline once per epoch.
///
/// Single-threaded and cooperative; the host discrete-event loop drives it
/// tick by tick and ferries the returned grants to vehicles and RSUs.
#[derive(Debug)]
pub struct Engine {
    config: SchedulerConfig,
    catalog: ServiceCatalog,
    apps: AppRegistry,
    resources: ResourceRegistry,
    links: LinkObservatory,
}

impl Engine {
    /// Validate the configuration and build an engine around it.
    pub fn new(config: SchedulerConfig, catalog: ServiceCatalog) -> Result<Self, ConfigError> {
        config.validate()?;
        info!(policy = ?config.policy, utility = ?config.utility, "Scheduler engine ready");
        Ok(Self {
            config,
            catalog,
            apps: AppRegistry::new(),
            resources: ResourceRegistry::new(),
            links: LinkObservatory::new(),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn apps(&self) -> &AppRegistry {
        &self.apps
    }

    pub fn apps_mut(&mut self) -> &mut AppRegistry {
        &mut self.apps
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    pub fn resources_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.resources
    }

    pub fn links(&self) -> &LinkObservatory {
        &self.links
    }

    pub fn links_mut(&mut self) -> &mut LinkObservatory {
        &mut self.links
    }

    /// Run one scheduling epoch at simulated time `now`.
    ///
    /// Applications whose vehicle has stopped are retired first (their grants
    /// stay committed until revoked). Applications already holding a grant
    /// are not rescheduled. An epoch that can schedule nothing returns an
    /// empty list; there is no distinguished failure value.
    pub fn run_epoch(&mut self, now: f64) -> Vec<Grant> {
        let stopped = self.apps.prune_stopped(now);
        if !stopped.is_empty() {
            warn!(count = stopped.len(), "Vehicles stopped; revoke their grants");
        }

        let pending: Vec<_> = self
            .apps
            .snapshot()
            .into_iter()
            .filter(|a| !self.resources.has_grant(a.app_id))
            .collect();
        let rsus = self.resources.snapshot();
        let mut epoch =
            EpochState::build(now, pending, &rsus, &mut self.links, &self.config);

        let pool = candidates::generate(&epoch, &self.catalog, &self.config);
        let selections = match self.config.policy {
            Policy::Greedy | Policy::GameTheory => greedy::select(&mut epoch, &pool),
            Policy::GraphMatch => {
                graph_match::select(&mut epoch, &pool, &self.catalog, &self.config)
            }
            Policy::QuickLr => quick_lr::select(&mut epoch, &pool, LrVariant::QuickLr),
            Policy::FastSa => quick_lr::select(&mut epoch, &pool, LrVariant::FastSa),
        };

        let grants = grants::issue(&selections, &epoch, &mut self.resources);
        info!(
            now,
            apps = epoch.apps.len(),
            instances = pool.len(),
            granted = grants.len(),
            "Epoch done"
        );
        grants
    }

    /// Revoke an application's outstanding grant, releasing its resources.
    /// Returns the revocation record for the control plane, or `None` when
    /// the application holds no grant.
    pub fn revoke(&mut self, app_id: AppId) -> Option<Revocation> {
        let footprint = self.resources.release_grant(app_id)?;
        info!(app = app_id, "Grant revoked");
        Some(Revocation {
            app_id,
            off_rsu: footprint.off_rsu,
            pro_rsu: footprint.pro_rsu,
        })
    }
}
