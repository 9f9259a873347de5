use std::cmp::Ordering;

use tracing::debug;

use crate::scheduler::candidates::InstancePool;
use crate::scheduler::epoch::EpochState;
use crate::scheduler::Selection;

/// Greedy policy: rank every instance by resource efficiency and admit in
/// descending order, one instance per application, re-testing feasibility
/// against the running availability before each admission.
///
/// Efficiency is utility divided by the product of the instance's fractional
/// takes of the offload RSU's RBs and the processing RSU's CUs; an instance
/// touching an exhausted RSU scores zero. The sort is stable, so equal
/// scores keep enumeration order and repeated runs yield identical grants.
pub fn select(epoch: &mut EpochState, pool: &InstancePool) -> Vec<Selection> {
    if pool.is_empty() {
        return Vec::new();
    }

    let n = pool.len();
    let mut efficiency = vec![0.0f64; n];
    for i in 0..n {
        let avail_rb = f64::from(epoch.rb_available[pool.off_rsu[i]]);
        let avail_cu = f64::from(epoch.cu_available[pool.pro_rsu[i]]);
        if avail_rb <= 0.0 || avail_cu <= 0.0 {
            continue;
        }
        let rb_util = f64::from(pool.rbs[i]) / avail_rb;
        let cu_util = f64::from(pool.cus[i]) / avail_cu;
        efficiency[i] = pool.utility[i] / (rb_util * cu_util);
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        efficiency[b]
            .partial_cmp(&efficiency[a])
            .unwrap_or(Ordering::Equal)
    });

    let mut selected_apps = vec![false; epoch.apps.len()];
    let mut selections = Vec::new();
    for i in order {
        let app_idx = pool.app_idx[i];
        if selected_apps[app_idx] {
            continue;
        }
        let off = pool.off_rsu[i];
        let pro = pool.pro_rsu[i];
        if epoch.rb_available[off] < pool.rbs[i] || epoch.cu_available[pro] < pool.cus[i] {
            continue;
        }

        selections.push(Selection::from_instance(epoch, pool, i));
        selected_apps[app_idx] = true;
        epoch.rb_available[off] -= pool.rbs[i];
        epoch.cu_available[pro] -= pool.cus[i];
    }

    debug!(
        selected = selections.len(),
        instances = n,
        "Greedy selection done"
    );
    selections
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ServiceCatalog;
    use crate::config::SchedulerConfig;
    use crate::registry::apps::Application;
    use crate::registry::links::LinkObservatory;
    use crate::registry::resources::{ResourceRegistry, RsuProfile};
    use crate::scheduler::candidates;

    fn app(app_id: u32, veh_id: u16, energy: f64) -> Application {
        Application {
            app_id,
            veh_id,
            period: 0.1,
            input_size: 102_400,
            output_size: 1_000,
            service: "objDetect".into(),
            energy,
            offload_power: 2.0,
            stop_time: None,
            veh_addr: None,
        }
    }

    fn catalog() -> ServiceCatalog {
        let mut cat = ServiceCatalog::new();
        cat.set_exec_time("objDetect", "rtx3090", 0.02);
        cat
    }

    fn epoch_for(apps: Vec<Application>, rb: u32, cu: u32) -> EpochState {
        let mut reg = ResourceRegistry::new();
        reg.register(RsuProfile {
            rsu_id: 1,
            rb_capacity: rb,
            cu_capacity: cu,
            cmp_capacity: 1.0,
            device_type: "rtx3090".into(),
            addr: None,
            port: None,
        });
        let mut links = LinkObservatory::new();
        for a in &apps {
            links.observe(a.veh_id, 1, 1250.0, 0.0);
        }
        EpochState::build(0.0, apps, &reg.snapshot(), &mut links, &SchedulerConfig::default())
    }

    #[test]
    fn single_app_takes_smallest_feasible_footprint() {
        let config = SchedulerConfig::default();
        let mut epoch = epoch_for(vec![app(1, 101, 5.0)], 10, 10);
        let pool = candidates::generate(&epoch, &catalog(), &config);
        let selections = select(&mut epoch, &pool);

        assert_eq!(selections.len(), 1);
        let s = &selections[0];
        // efficiency divides utility by the resource shares, so the cheapest
        // deadline-feasible combination wins: 2 RBs (41 ms uplink) and 1 CU
        // (20 ms execution) beat every larger allocation
        assert_eq!((s.rbs, s.cus), (2, 1));
        assert!((s.utility - (5.0 - 2.0 * 0.04096) / 0.1).abs() < 1e-9);
        assert_eq!(epoch.rb_available[0], 8);
        assert_eq!(epoch.cu_available[0], 9);
    }

    #[test]
    fn one_instance_per_app() {
        let config = SchedulerConfig::default();
        let mut epoch = epoch_for(vec![app(1, 101, 5.0), app(2, 102, 4.0)], 10, 10);
        let pool = candidates::generate(&epoch, &catalog(), &config);
        let selections = select(&mut epoch, &pool);

        let mut ids: Vec<u32> = selections.iter().map(|s| s.app_id).collect();
        ids.dedup();
        assert_eq!(ids.len(), selections.len());
    }

    #[test]
    fn admissions_respect_capacity() {
        let config = SchedulerConfig::default();
        let mut epoch = epoch_for(
            vec![app(1, 101, 5.0), app(2, 102, 4.0), app(3, 103, 3.0)],
            10,
            10,
        );
        let pool = candidates::generate(&epoch, &catalog(), &config);
        let before_rb: u32 = 10;
        let before_cu: u32 = 10;
        let selections = select(&mut epoch, &pool);

        let used_rb: u32 = selections.iter().map(|s| s.rbs).sum();
        let used_cu: u32 = selections.iter().map(|s| s.cus).sum();
        assert!(used_rb <= before_rb);
        assert!(used_cu <= before_cu);
        assert_eq!(epoch.rb_available[0], before_rb - used_rb);
        assert_eq!(epoch.cu_available[0], before_cu - used_cu);
    }

    #[test]
    fn repeated_runs_are_identical() {
        let config = SchedulerConfig::default();
        let apps = vec![app(1, 101, 5.0), app(2, 102, 5.0), app(3, 103, 5.0)];

        let mut epoch_a = epoch_for(apps.clone(), 10, 10);
        let pool_a = candidates::generate(&epoch_a, &catalog(), &config);
        let run_a = select(&mut epoch_a, &pool_a);

        let mut epoch_b = epoch_for(apps, 10, 10);
        let pool_b = candidates::generate(&epoch_b, &catalog(), &config);
        let run_b = select(&mut epoch_b, &pool_b);

        assert_eq!(run_a.len(), run_b.len());
        for (a, b) in run_a.iter().zip(&run_b) {
            assert_eq!(a.app_id, b.app_id);
            assert_eq!((a.off_rsu, a.pro_rsu, a.rbs, a.cus), (b.off_rsu, b.pro_rsu, b.rbs, b.cus));
            assert_eq!(a.utility, b.utility);
        }
    }

    #[test]
    fn empty_pool_selects_nothing() {
        let mut epoch = epoch_for(vec![app(1, 101, 5.0)], 10, 10);
        let selections = select(&mut epoch, &InstancePool::default());
        assert!(selections.is_empty());
    }
}
