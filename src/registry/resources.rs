use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CommitError;
use crate::{AppId, NodeId};

/// Static attributes of an edge server, provided at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RsuProfile {
    pub rsu_id: NodeId,
    /// Total radio resource blocks.
    pub rb_capacity: u32,
    /// Total computing units.
    pub cu_capacity: u32,
    /// Hardware scaling factor mapping CU count to achieved throughput.
    pub cmp_capacity: f64,
    /// Device class, keyed into the service catalog.
    pub device_type: String,
    /// Processing-side address, carried opaquely into grants.
    #[serde(default)]
    pub addr: Option<Ipv4Addr>,
    #[serde(default)]
    pub port: Option<u16>,
}

/// The committed footprint of one application's grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GrantFootprint {
    pub off_rsu: NodeId,
    pub pro_rsu: NodeId,
    pub rbs: u32,
    pub cus: u32,
}

#[derive(Debug)]
struct RsuState {
    profile: RsuProfile,
    rb_available: u32,
    cu_available: u32,
    active: bool,
    /// Backhaul reachability, `{destination: hop count}`. Opaque to the core.
    reachable: BTreeMap<NodeId, u32>,
}

/// One RSU's entry in a point-in-time resource snapshot.
#[derive(Debug, Clone)]
pub struct RsuSnapshot {
    pub rsu_id: NodeId,
    pub rb_available: u32,
    pub cu_available: u32,
    pub cmp_capacity: f64,
    pub device_type: String,
    /// Reachable active RSUs as `(destination, hop count)`, ascending by id.
    /// Always contains the RSU itself at hop count 0.
    pub reachable: Vec<(NodeId, u32)>,
}

/// C2 — per-RSU capacities, availability, and the backhaul reachability map.
///
/// Availability is mutated exclusively through [`commit_grant`] and
/// [`release_grant`]; at every observable state
/// `0 <= available <= capacity` holds on both axes. Because the revocation
/// interface identifies a grant only by its application, the registry also
/// keeps the committed footprint per application.
///
/// [`commit_grant`]: ResourceRegistry::commit_grant
/// [`release_grant`]: ResourceRegistry::release_grant
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    rsus: BTreeMap<NodeId, RsuState>,
    ledger: BTreeMap<AppId, GrantFootprint>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an RSU (or replace its profile), resetting availability to
    /// full capacity and marking it active.
    pub fn register(&mut self, profile: RsuProfile) {
        debug!(
            rsu = profile.rsu_id,
            rbs = profile.rb_capacity,
            cus = profile.cu_capacity,
            device = %profile.device_type,
            "RSU registered"
        );
        self.rsus.insert(
            profile.rsu_id,
            RsuState {
                rb_available: profile.rb_capacity,
                cu_available: profile.cu_capacity,
                active: true,
                reachable: BTreeMap::new(),
                profile,
            },
        );
    }

    /// Mark an RSU active or inactive. Inactive RSUs are dropped from
    /// snapshots and refuse commits; their outstanding grants stay in the
    /// ledger until the host revokes them.
    pub fn set_active(&mut self, rsu_id: NodeId, active: bool) {
        if let Some(state) = self.rsus.get_mut(&rsu_id) {
            state.active = active;
            debug!(rsu = rsu_id, active, "RSU activity changed");
        }
    }

    pub fn is_active(&self, rsu_id: NodeId) -> bool {
        self.rsus.get(&rsu_id).is_some_and(|s| s.active)
    }

    /// Replace one RSU's backhaul reachability map (`{destination: hops}`).
    /// Provided by the host's route discovery; treated as opaque here.
    pub fn set_reachability(&mut self, src: NodeId, reachable: Vec<(NodeId, u32)>) {
        if let Some(state) = self.rsus.get_mut(&src) {
            state.reachable = reachable.into_iter().collect();
        }
    }

    pub fn profile(&self, rsu_id: NodeId) -> Option<&RsuProfile> {
        self.rsus.get(&rsu_id).map(|s| &s.profile)
    }

    /// Current `(rb, cu)` availability of an RSU.
    pub fn available(&self, rsu_id: NodeId) -> Option<(u32, u32)> {
        self.rsus
            .get(&rsu_id)
            .map(|s| (s.rb_available, s.cu_available))
    }

    pub fn active_grant(&self, app_id: AppId) -> Option<&GrantFootprint> {
        self.ledger.get(&app_id)
    }

    pub fn has_grant(&self, app_id: AppId) -> bool {
        self.ledger.contains_key(&app_id)
    }

    /// Atomically subtract a grant's resources and record its footprint.
    ///
    /// Fails without mutating anything if either RSU is unknown or inactive,
    /// if either subtraction would go negative, or if the application already
    /// holds a grant.
    pub fn commit_grant(
        &mut self,
        app_id: AppId,
        off_rsu: NodeId,
        pro_rsu: NodeId,
        rbs: u32,
        cus: u32,
    ) -> Result<(), CommitError> {
        if self.ledger.contains_key(&app_id) {
            return Err(CommitError::DuplicateGrant(app_id));
        }
        for rsu in [off_rsu, pro_rsu] {
            let state = self.rsus.get(&rsu).ok_or(CommitError::UnknownRsu(rsu))?;
            if !state.active {
                return Err(CommitError::RsuInactive(rsu));
            }
        }

        let off = &self.rsus[&off_rsu];
        if off.rb_available < rbs {
            return Err(CommitError::CapacityExceeded {
                rsu: off_rsu,
                unit: "RBs",
                requested: rbs,
                available: off.rb_available,
            });
        }
        let pro = &self.rsus[&pro_rsu];
        if pro.cu_available < cus {
            return Err(CommitError::CapacityExceeded {
                rsu: pro_rsu,
                unit: "CUs",
                requested: cus,
                available: pro.cu_available,
            });
        }

        if let Some(off) = self.rsus.get_mut(&off_rsu) {
            off.rb_available -= rbs;
        }
        if let Some(pro) = self.rsus.get_mut(&pro_rsu) {
            pro.cu_available -= cus;
        }
        self.ledger.insert(
            app_id,
            GrantFootprint {
                off_rsu,
                pro_rsu,
                rbs,
                cus,
            },
        );
        debug!(app = app_id, off = off_rsu, pro = pro_rsu, rbs, cus, "Grant committed");
        Ok(())
    }

    /// Return an application's committed resources, removing its ledger
    /// entry. A no-op returning `None` when the application holds no grant.
    pub fn release_grant(&mut self, app_id: AppId) -> Option<GrantFootprint> {
        let footprint = self.ledger.remove(&app_id)?;
        if let Some(off) = self.rsus.get_mut(&footprint.off_rsu) {
            off.rb_available = (off.rb_available + footprint.rbs).min(off.profile.rb_capacity);
        }
        if let Some(pro) = self.rsus.get_mut(&footprint.pro_rsu) {
            pro.cu_available = (pro.cu_available + footprint.cus).min(pro.profile.cu_capacity);
        }
        debug!(app = app_id, "Grant released");
        Some(footprint)
    }

    /// A point-in-time view of every active RSU, in ascending id order.
    ///
    /// Inactive RSUs are dropped entirely, including as reachability targets,
    /// so downstream enumeration never sees a dead RSU. Each RSU reaches
    /// itself at hop count 0.
    pub fn snapshot(&self) -> Vec<RsuSnapshot> {
        self.rsus
            .iter()
            .filter(|(_, s)| s.active)
            .map(|(&id, s)| {
                let mut reachable: Vec<(NodeId, u32)> = s
                    .reachable
                    .iter()
                    .filter(|(dst, _)| self.rsus.get(dst).is_some_and(|d| d.active))
                    .map(|(&dst, &hops)| (dst, hops))
                    .collect();
                if !reachable.iter().any(|&(dst, _)| dst == id) {
                    reachable.push((id, 0));
                    reachable.sort_unstable_by_key(|&(dst, _)| dst);
                }
                RsuSnapshot {
                    rsu_id: id,
                    rb_available: s.rb_available,
                    cu_available: s.cu_available,
                    cmp_capacity: s.profile.cmp_capacity,
                    device_type: s.profile.device_type.clone(),
                    reachable,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn rsu(rsu_id: NodeId, rbs: u32, cus: u32) -> RsuProfile {
        RsuProfile {
            rsu_id,
            rb_capacity: rbs,
            cu_capacity: cus,
            cmp_capacity: 1.0,
            device_type: "rtx3090".into(),
            addr: None,
            port: None,
        }
    }

    #[test]
    fn commit_subtracts_and_release_restores() {
        let mut reg = ResourceRegistry::new();
        reg.register(rsu(1, 10, 10));
        reg.register(rsu(2, 8, 8));

        reg.commit_grant(42, 1, 2, 4, 3).unwrap();
        assert_eq!(reg.available(1), Some((6, 10)));
        assert_eq!(reg.available(2), Some((8, 5)));

        let fp = reg.release_grant(42).unwrap();
        assert_eq!(fp.rbs, 4);
        assert_eq!(fp.cus, 3);
        assert_eq!(reg.available(1), Some((10, 10)));
        assert_eq!(reg.available(2), Some((8, 8)));
    }

    #[test]
    fn commit_same_rsu_both_sides() {
        let mut reg = ResourceRegistry::new();
        reg.register(rsu(1, 10, 10));
        reg.commit_grant(1, 1, 1, 10, 10).unwrap();
        assert_eq!(reg.available(1), Some((0, 0)));
    }

    #[test]
    fn capacity_exceeded_leaves_state_untouched() {
        let mut reg = ResourceRegistry::new();
        reg.register(rsu(1, 10, 10));
        reg.register(rsu(2, 2, 2));

        let err = reg.commit_grant(1, 1, 2, 4, 3).unwrap_err();
        assert!(matches!(err, CommitError::CapacityExceeded { rsu: 2, .. }));
        // the offload side must not have been debited
        assert_eq!(reg.available(1), Some((10, 10)));
        assert_eq!(reg.available(2), Some((2, 2)));
        assert!(!reg.has_grant(1));
    }

    #[test]
    fn duplicate_grant_rejected() {
        let mut reg = ResourceRegistry::new();
        reg.register(rsu(1, 10, 10));
        reg.commit_grant(1, 1, 1, 1, 1).unwrap();
        assert!(matches!(
            reg.commit_grant(1, 1, 1, 1, 1),
            Err(CommitError::DuplicateGrant(1))
        ));
    }

    #[test]
    fn inactive_rsu_refuses_commit() {
        let mut reg = ResourceRegistry::new();
        reg.register(rsu(1, 10, 10));
        reg.set_active(1, false);
        assert!(matches!(
            reg.commit_grant(1, 1, 1, 1, 1),
            Err(CommitError::RsuInactive(1))
        ));
    }

    #[test]
    fn unknown_rsu_refuses_commit() {
        let mut reg = ResourceRegistry::new();
        assert!(matches!(
            reg.commit_grant(1, 9, 9, 1, 1),
            Err(CommitError::UnknownRsu(9))
        ));
    }

    #[test]
    fn release_unknown_app_is_noop() {
        let mut reg = ResourceRegistry::new();
        reg.register(rsu(1, 10, 10));
        assert!(reg.release_grant(99).is_none());
        assert_eq!(reg.available(1), Some((10, 10)));
    }

    #[test]
    fn snapshot_drops_inactive_and_filters_reachability() {
        let mut reg = ResourceRegistry::new();
        reg.register(rsu(1, 10, 10));
        reg.register(rsu(2, 8, 8));
        reg.register(rsu(3, 6, 6));
        reg.set_reachability(1, vec![(2, 1), (3, 2)]);
        reg.set_active(3, false);

        let snap = reg.snapshot();
        assert_eq!(snap.len(), 2);
        let first = &snap[0];
        assert_eq!(first.rsu_id, 1);
        // rsu 3 is inactive: dropped as a target; self-reach at hop 0 added
        assert_eq!(first.reachable, vec![(1, 0), (2, 1)]);
    }

    #[test]
    fn snapshot_keeps_explicit_self_hop() {
        let mut reg = ResourceRegistry::new();
        reg.register(rsu(1, 10, 10));
        reg.set_reachability(1, vec![(1, 0)]);
        let snap = reg.snapshot();
        assert_eq!(snap[0].reachable, vec![(1, 0)]);
    }

    // -----------------------------------------------------------------------
    // randomized commit/release round trips (invariant 4)
    // -----------------------------------------------------------------------

    #[test]
    fn random_commit_release_round_trips() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(7);
        let mut reg = ResourceRegistry::new();
        for id in 1..=4u16 {
            reg.register(rsu(id, 20, 20));
        }

        for round in 0..200u32 {
            let before: Vec<_> = (1..=4u16).map(|id| reg.available(id)).collect();
            let app = round;
            let off = rng.gen_range(1..=4u16);
            let pro = rng.gen_range(1..=4u16);
            let rbs = rng.gen_range(0..=25u32);
            let cus = rng.gen_range(0..=25u32);

            match reg.commit_grant(app, off, pro, rbs, cus) {
                Ok(()) => {
                    assert!(reg.has_grant(app));
                    reg.release_grant(app).unwrap();
                }
                Err(_) => assert!(!reg.has_grant(app)),
            }

            let after: Vec<_> = (1..=4u16).map(|id| reg.available(id)).collect();
            assert_eq!(before, after, "round {round} did not restore state");
        }
    }
}
