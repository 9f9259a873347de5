use std::collections::BTreeMap;

use tracing::debug;

use crate::NodeId;

/// One radio feedback sample for a `(vehicle, RSU)` pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkSample {
    /// Achievable uplink rate, bytes per TTI per resource block.
    pub rate: f64,
    /// Simulated time of the last refresh.
    pub updated_at: f64,
}

/// C3 — per-(vehicle, RSU) uplink observations and the vehicles' access sets.
///
/// Feedback arrives asynchronously at any rate; the access set of a vehicle
/// is the set of RSUs it currently holds a sample for. A link is usable iff
/// `now - updated_at <= horizon` and `rate > 0`; unusable links are purged
/// from the access set when an epoch scans them, and the observatory is
/// authoritative for access-set membership from then on.
#[derive(Debug, Default)]
pub struct LinkObservatory {
    links: BTreeMap<NodeId, BTreeMap<NodeId, LinkSample>>,
}

impl LinkObservatory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a feedback sample, adding the RSU to the vehicle's access set.
    pub fn observe(&mut self, veh_id: NodeId, rsu_id: NodeId, rate: f64, now: f64) {
        self.links
            .entry(veh_id)
            .or_default()
            .insert(rsu_id, LinkSample { rate, updated_at: now });
    }

    /// The vehicle's current access set, ascending by RSU id.
    pub fn access_set(&self, veh_id: NodeId) -> Vec<NodeId> {
        self.links
            .get(&veh_id)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn sample(&self, veh_id: NodeId, rsu_id: NodeId) -> Option<LinkSample> {
        self.links.get(&veh_id)?.get(&rsu_id).copied()
    }

    /// Whether the link passes the freshness/rate invariant at `now`.
    pub fn usable(&self, veh_id: NodeId, rsu_id: NodeId, now: f64, horizon: f64) -> bool {
        self.sample(veh_id, rsu_id)
            .is_some_and(|s| now - s.updated_at <= horizon && s.rate > 0.0)
    }

    /// Remove one link from the vehicle's access set.
    pub fn purge(&mut self, veh_id: NodeId, rsu_id: NodeId) {
        if let Some(map) = self.links.get_mut(&veh_id) {
            if map.remove(&rsu_id).is_some() {
                debug!(veh = veh_id, rsu = rsu_id, "Link purged from access set");
            }
            if map.is_empty() {
                self.links.remove(&veh_id);
            }
        }
    }

    /// Drop every unusable link of one vehicle, returning the usable
    /// remainder as `(rsu, rate)` pairs in ascending RSU order.
    pub fn prune_vehicle(&mut self, veh_id: NodeId, now: f64, horizon: f64) -> Vec<(NodeId, f64)> {
        let Some(map) = self.links.get_mut(&veh_id) else {
            return Vec::new();
        };

        let stale: Vec<NodeId> = map
            .iter()
            .filter(|(_, s)| now - s.updated_at > horizon || s.rate <= 0.0)
            .map(|(&rsu, _)| rsu)
            .collect();
        for rsu in &stale {
            map.remove(rsu);
            debug!(veh = veh_id, rsu, "Stale link dropped");
        }

        let usable: Vec<(NodeId, f64)> = map.iter().map(|(&rsu, s)| (rsu, s.rate)).collect();
        if map.is_empty() {
            self.links.remove(&veh_id);
        }
        usable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_builds_access_set() {
        let mut obs = LinkObservatory::new();
        obs.observe(101, 2, 1250.0, 0.0);
        obs.observe(101, 1, 900.0, 0.0);
        assert_eq!(obs.access_set(101), vec![1, 2]);
        assert_eq!(obs.access_set(999), Vec::<NodeId>::new());
    }

    #[test]
    fn newer_sample_replaces() {
        let mut obs = LinkObservatory::new();
        obs.observe(101, 1, 900.0, 0.0);
        obs.observe(101, 1, 1100.0, 0.5);
        let s = obs.sample(101, 1).unwrap();
        assert_eq!(s.rate, 1100.0);
        assert_eq!(s.updated_at, 0.5);
    }

    #[test]
    fn usable_respects_horizon_and_rate() {
        let mut obs = LinkObservatory::new();
        obs.observe(101, 1, 1250.0, 0.0);
        obs.observe(101, 2, 0.0, 0.0);

        assert!(obs.usable(101, 1, 0.5, 1.0));
        assert!(obs.usable(101, 1, 1.0, 1.0)); // boundary: age == horizon
        assert!(!obs.usable(101, 1, 1.5, 1.0)); // too old
        assert!(!obs.usable(101, 2, 0.5, 1.0)); // zero rate
        assert!(!obs.usable(101, 3, 0.5, 1.0)); // never observed
    }

    #[test]
    fn prune_vehicle_drops_stale_and_zero_rate() {
        let mut obs = LinkObservatory::new();
        obs.observe(101, 1, 1250.0, 2.0); // fresh
        obs.observe(101, 2, 1250.0, 0.0); // stale at now=2.5, horizon=1
        obs.observe(101, 3, 0.0, 2.4); // zero rate

        let usable = obs.prune_vehicle(101, 2.5, 1.0);
        assert_eq!(usable, vec![(1, 1250.0)]);
        // the access set reflects the pruning
        assert_eq!(obs.access_set(101), vec![1]);
    }

    #[test]
    fn prune_vehicle_removes_empty_entry() {
        let mut obs = LinkObservatory::new();
        obs.observe(101, 1, 1250.0, 0.0);
        let usable = obs.prune_vehicle(101, 10.0, 1.0);
        assert!(usable.is_empty());
        assert!(obs.access_set(101).is_empty());
    }

    #[test]
    fn purge_is_targeted() {
        let mut obs = LinkObservatory::new();
        obs.observe(101, 1, 1250.0, 0.0);
        obs.observe(101, 2, 1250.0, 0.0);
        obs.purge(101, 1);
        assert_eq!(obs.access_set(101), vec![2]);
    }
}
