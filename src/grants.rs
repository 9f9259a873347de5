use std::net::Ipv4Addr;

use serde::Serialize;
use tracing::{debug, warn};

use crate::registry::resources::ResourceRegistry;
use crate::scheduler::epoch::EpochState;
use crate::scheduler::Selection;
use crate::{AppId, NodeId};

/// One admitted application's allocation, ferried by the control plane to
/// the vehicle (via the offload RSU) and to the processing RSU.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Grant {
    pub app_id: AppId,
    pub veh_id: NodeId,
    pub veh_addr: Option<Ipv4Addr>,
    pub off_rsu: NodeId,
    pub pro_rsu: NodeId,
    pub pro_rsu_addr: Option<Ipv4Addr>,
    pub pro_rsu_port: Option<u16>,
    pub rbs: u32,
    pub cus: u32,
    /// Residual uplink window: period minus forwarding, execution, and setup.
    pub max_offload_time: f64,
    pub exe_delay: f64,
    pub utility: f64,
    /// Uplink byte budget per TTI at the granted RB allocation.
    pub byte_per_tti: f64,
    /// Job deadline; equals the application period.
    pub deadline: f64,
    pub input_size: u32,
    pub output_size: u32,
    pub service: String,
    /// Service-quality tier (accuracy variants only).
    pub tier: Option<String>,
}

/// Notice that an application's grant has been withdrawn and its resources
/// released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Revocation {
    pub app_id: AppId,
    pub off_rsu: NodeId,
    pub pro_rsu: NodeId,
}

/// C6 — turn the policy's selections into grant records, committing each
/// one's resources to the registry.
///
/// A selection that no longer fits (its RSU went inactive mid-epoch, or a
/// graph-matching over-approximation outran the live capacity) is dropped
/// with a warning; the rest of the epoch proceeds.
pub fn issue(
    selections: &[Selection],
    epoch: &EpochState,
    resources: &mut ResourceRegistry,
) -> Vec<Grant> {
    let mut grants = Vec::with_capacity(selections.len());

    for sel in selections {
        if sel.max_off_time <= 0.0 {
            warn!(app = sel.app_id, "Non-positive offload window, dropped");
            continue;
        }

        let Some(app_idx) = epoch.apps.iter().position(|a| a.app_id == sel.app_id) else {
            continue;
        };
        let app = &epoch.apps[app_idx];
        let Some(&off_idx) = epoch.rsu_index.get(&sel.off_rsu) else {
            continue;
        };
        let Some(rate) = epoch.rate(app_idx, off_idx) else {
            continue;
        };

        if let Err(e) =
            resources.commit_grant(sel.app_id, sel.off_rsu, sel.pro_rsu, sel.rbs, sel.cus)
        {
            warn!(app = sel.app_id, error = %e, "Commit failed, selection dropped");
            continue;
        }

        let (pro_rsu_addr, pro_rsu_port) = resources
            .profile(sel.pro_rsu)
            .map(|p| (p.addr, p.port))
            .unwrap_or((None, None));

        debug!(
            app = sel.app_id,
            off = sel.off_rsu,
            pro = sel.pro_rsu,
            rbs = sel.rbs,
            cus = sel.cus,
            utility = sel.utility,
            "Grant issued"
        );
        grants.push(Grant {
            app_id: sel.app_id,
            veh_id: sel.veh_id,
            veh_addr: app.veh_addr,
            off_rsu: sel.off_rsu,
            pro_rsu: sel.pro_rsu,
            pro_rsu_addr,
            pro_rsu_port,
            rbs: sel.rbs,
            cus: sel.cus,
            max_offload_time: sel.max_off_time,
            exe_delay: sel.exe_delay,
            utility: sel.utility,
            byte_per_tti: rate * f64::from(sel.rbs),
            deadline: app.period,
            input_size: app.input_size,
            output_size: app.output_size,
            service: app.service.clone(),
            tier: sel.tier.clone(),
        });
    }

    grants
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use crate::registry::apps::Application;
    use crate::registry::links::LinkObservatory;
    use crate::registry::resources::RsuProfile;

    fn app(app_id: u32, veh_id: u16) -> Application {
        Application {
            app_id,
            veh_id,
            period: 0.1,
            input_size: 102_400,
            output_size: 1_000,
            service: "objDetect".into(),
            energy: 5.0,
            offload_power: 2.0,
            stop_time: None,
            veh_addr: Some(Ipv4Addr::new(10, 0, 0, 5)),
        }
    }

    fn setup() -> (ResourceRegistry, EpochState) {
        let mut reg = ResourceRegistry::new();
        reg.register(RsuProfile {
            rsu_id: 1,
            rb_capacity: 10,
            cu_capacity: 10,
            cmp_capacity: 1.0,
            device_type: "rtx3090".into(),
            addr: Some(Ipv4Addr::new(10, 0, 0, 1)),
            port: Some(5000),
        });
        let mut links = LinkObservatory::new();
        links.observe(101, 1, 1250.0, 0.0);
        let epoch = EpochState::build(
            0.0,
            vec![app(1, 101)],
            &reg.snapshot(),
            &mut links,
            &SchedulerConfig::default(),
        );
        (reg, epoch)
    }

    fn selection() -> Selection {
        Selection {
            app_id: 1,
            veh_id: 101,
            off_rsu: 1,
            pro_rsu: 1,
            rbs: 4,
            cus: 5,
            utility: 49.0,
            max_off_time: 0.075,
            exe_delay: 0.004,
            tier: None,
        }
    }

    #[test]
    fn issue_commits_and_fills_grant() {
        let (mut reg, epoch) = setup();
        let grants = issue(&[selection()], &epoch, &mut reg);

        assert_eq!(grants.len(), 1);
        let g = &grants[0];
        assert_eq!(g.app_id, 1);
        assert_eq!((g.rbs, g.cus), (4, 5));
        // byte budget = per-RB rate * granted RBs
        assert_eq!(g.byte_per_tti, 1250.0 * 4.0);
        assert_eq!(g.deadline, 0.1);
        assert_eq!(g.pro_rsu_addr, Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(g.pro_rsu_port, Some(5000));
        assert_eq!(g.veh_addr, Some(Ipv4Addr::new(10, 0, 0, 5)));
        // resources were committed
        assert_eq!(reg.available(1), Some((6, 5)));
        assert!(reg.has_grant(1));
    }

    #[test]
    fn non_positive_window_is_dropped() {
        let (mut reg, epoch) = setup();
        let mut sel = selection();
        sel.max_off_time = 0.0;
        let grants = issue(&[sel], &epoch, &mut reg);
        assert!(grants.is_empty());
        assert_eq!(reg.available(1), Some((10, 10)));
    }

    #[test]
    fn capacity_exceeded_drops_selection_only() {
        let (mut reg, epoch) = setup();
        let mut big = selection();
        big.rbs = 11;
        let ok = selection();
        // first selection overshoots; second (same app would collide, so use
        // a distinct app id that still resolves in the epoch) — keep it
        // simple: the overshooting one is dropped, nothing is committed
        let grants = issue(&[big], &epoch, &mut reg);
        assert!(grants.is_empty());
        assert_eq!(reg.available(1), Some((10, 10)));

        let grants = issue(&[ok], &epoch, &mut reg);
        assert_eq!(grants.len(), 1);
    }

    #[test]
    fn inactive_rsu_drops_selection() {
        let (mut reg, epoch) = setup();
        reg.set_active(1, false);
        let grants = issue(&[selection()], &epoch, &mut reg);
        assert!(grants.is_empty());
    }

    #[test]
    fn grant_serializes_to_json() {
        let (mut reg, epoch) = setup();
        let grants = issue(&[selection()], &epoch, &mut reg);
        let json = serde_json::to_string(&grants[0]).unwrap();
        assert!(json.contains("\"app_id\":1"));
        assert!(json.contains("\"byte_per_tti\":5000.0"));
    }
}
