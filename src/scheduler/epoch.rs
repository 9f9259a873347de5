use std::collections::HashMap;

use tracing::debug;

use crate::config::SchedulerConfig;
use crate::registry::apps::Application;
use crate::registry::links::LinkObservatory;
use crate::registry::resources::RsuSnapshot;
use crate::NodeId;

/// Dense, epoch-local view of the pending applications, the active RSUs, and
/// the usable uplinks. Everything downstream of the snapshot reasons in
/// vector indices; node and application ids only reappear at the grant
/// boundary.
///
/// The availability vectors start at the registry's current values and are
/// decremented by the policies as they select, so a policy's feasibility
/// checks and the final registry commit see the same arithmetic.
#[derive(Debug)]
pub struct EpochState {
    pub now: f64,

    /// Pending applications in stable order; index = epoch app index.
    pub apps: Vec<Application>,

    pub rsu_ids: Vec<NodeId>,
    pub rsu_index: HashMap<NodeId, usize>,
    pub rb_available: Vec<u32>,
    pub cu_available: Vec<u32>,
    pub cmp_capacity: Vec<f64>,
    pub device_type: Vec<String>,

    /// Per RSU index: reachable RSUs as `(rsu index, hop count)`.
    pub reachable: Vec<Vec<(usize, u32)>>,

    /// Per app index: usable offload RSUs as `(rsu index, bytes/TTI per RB)`,
    /// captured after stale-link pruning.
    pub access: Vec<Vec<(usize, f64)>>,
}

impl EpochState {
    /// Build the epoch snapshot. This is the point where stale links are
    /// dropped from the Link Observatory (side effect): each pending
    /// application's vehicle has its access set pruned, and only the usable
    /// remainder is captured for enumeration.
    pub fn build(
        now: f64,
        apps: Vec<Application>,
        rsus: &[RsuSnapshot],
        links: &mut LinkObservatory,
        config: &SchedulerConfig,
    ) -> Self {
        let rsu_ids: Vec<NodeId> = rsus.iter().map(|r| r.rsu_id).collect();
        let rsu_index: HashMap<NodeId, usize> =
            rsu_ids.iter().enumerate().map(|(i, &id)| (id, i)).collect();

        let reachable: Vec<Vec<(usize, u32)>> = rsus
            .iter()
            .map(|r| {
                r.reachable
                    .iter()
                    .filter_map(|&(dst, hops)| rsu_index.get(&dst).map(|&idx| (idx, hops)))
                    .collect()
            })
            .collect();

        let mut access = Vec::with_capacity(apps.len());
        for app in &apps {
            if app.period <= 0.0 {
                // invalid application: skipped this epoch, stays enrolled
                debug!(app = app.app_id, period = app.period, "Invalid period, skipped");
                access.push(Vec::new());
                continue;
            }
            let usable = links.prune_vehicle(app.veh_id, now, config.freshness_horizon);
            access.push(
                usable
                    .into_iter()
                    .filter_map(|(rsu, rate)| rsu_index.get(&rsu).map(|&idx| (idx, rate)))
                    .collect(),
            );
        }

        Self {
            now,
            apps,
            rsu_ids,
            rsu_index,
            rb_available: rsus.iter().map(|r| r.rb_available).collect(),
            cu_available: rsus.iter().map(|r| r.cu_available).collect(),
            cmp_capacity: rsus.iter().map(|r| r.cmp_capacity).collect(),
            device_type: rsus.iter().map(|r| r.device_type.clone()).collect(),
            reachable,
            access,
        }
    }

    /// Captured uplink rate between an application's vehicle and an RSU.
    pub fn rate(&self, app_idx: usize, rsu_idx: usize) -> Option<f64> {
        self.access[app_idx]
            .iter()
            .find(|&&(idx, _)| idx == rsu_idx)
            .map(|&(_, rate)| rate)
    }

    /// Backhaul hop count between two RSUs, if the destination is reachable.
    pub fn hops(&self, off_idx: usize, pro_idx: usize) -> Option<u32> {
        self.reachable[off_idx]
            .iter()
            .find(|&&(idx, _)| idx == pro_idx)
            .map(|&(_, hops)| hops)
    }

    pub fn rsu_count(&self) -> usize {
        self.rsu_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::resources::{ResourceRegistry, RsuProfile};

    fn app(app_id: u32, veh_id: u16, period: f64) -> Application {
        Application {
            app_id,
            veh_id,
            period,
            input_size: 100_000,
            output_size: 1_000,
            service: "objDetect".into(),
            energy: 5.0,
            offload_power: 2.0,
            stop_time: None,
            veh_addr: None,
        }
    }

    fn registry_with_rsus(ids: &[u16]) -> ResourceRegistry {
        let mut reg = ResourceRegistry::new();
        for &id in ids {
            reg.register(RsuProfile {
                rsu_id: id,
                rb_capacity: 10,
                cu_capacity: 10,
                cmp_capacity: 1.0,
                device_type: "rtx3090".into(),
                addr: None,
                port: None,
            });
        }
        reg
    }

    #[test]
    fn build_maps_ids_to_dense_indices() {
        let mut reg = registry_with_rsus(&[5, 9]);
        reg.set_reachability(5, vec![(9, 1)]);
        let mut links = LinkObservatory::new();
        links.observe(101, 5, 1250.0, 0.0);

        let epoch = EpochState::build(
            0.1,
            vec![app(1, 101, 0.1)],
            &reg.snapshot(),
            &mut links,
            &SchedulerConfig::default(),
        );

        assert_eq!(epoch.rsu_ids, vec![5, 9]);
        assert_eq!(epoch.rsu_index[&9], 1);
        // rsu 5 reaches itself (hop 0) and rsu 9 (1 hop)
        assert_eq!(epoch.reachable[0], vec![(0, 0), (1, 1)]);
        assert_eq!(epoch.access[0], vec![(0, 1250.0)]);
        assert_eq!(epoch.hops(0, 1), Some(1));
        assert_eq!(epoch.hops(1, 0), None);
    }

    #[test]
    fn build_prunes_stale_links() {
        let reg = registry_with_rsus(&[1]);
        let mut links = LinkObservatory::new();
        // sample is two horizons old
        links.observe(101, 1, 1250.0, 0.0);

        let epoch = EpochState::build(
            2.0,
            vec![app(1, 101, 0.1)],
            &reg.snapshot(),
            &mut links,
            &SchedulerConfig::default(),
        );

        assert!(epoch.access[0].is_empty());
        assert!(links.access_set(101).is_empty());
    }

    #[test]
    fn invalid_period_app_gets_no_access_and_keeps_links() {
        let reg = registry_with_rsus(&[1]);
        let mut links = LinkObservatory::new();
        links.observe(101, 1, 1250.0, 0.0);

        let epoch = EpochState::build(
            5.0, // links are stale by now, but the invalid app is not scanned
            vec![app(1, 101, -1.0)],
            &reg.snapshot(),
            &mut links,
            &SchedulerConfig::default(),
        );

        assert!(epoch.access[0].is_empty());
        assert_eq!(links.access_set(101), vec![1]);
    }

    #[test]
    fn unknown_rsu_in_access_set_is_ignored() {
        let reg = registry_with_rsus(&[1]);
        let mut links = LinkObservatory::new();
        links.observe(101, 1, 1250.0, 0.0);
        links.observe(101, 7, 1250.0, 0.0); // not registered

        let epoch = EpochState::build(
            0.0,
            vec![app(1, 101, 0.1)],
            &reg.snapshot(),
            &mut links,
            &SchedulerConfig::default(),
        );

        assert_eq!(epoch.access[0], vec![(0, 1250.0)]);
    }
}
