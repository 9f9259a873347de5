use tracing::{debug, trace};

use crate::catalog::ServiceCatalog;
use crate::config::{SchedulerConfig, UtilityModel};
use crate::registry::apps::Application;
use crate::scheduler::epoch::EpochState;

/// The service instances of one epoch, as dense parallel arrays plus
/// per-axis secondary indices. Regenerated from scratch every epoch, never
/// persisted.
///
/// Invariants for every stored instance: utility is strictly positive, the
/// end-to-end delay fits the application period, and the resource take is
/// capped by the fair factor.
#[derive(Debug, Default)]
pub struct InstancePool {
    pub app_idx: Vec<usize>,
    pub off_rsu: Vec<usize>,
    pub pro_rsu: Vec<usize>,
    pub rbs: Vec<u32>,
    pub cus: Vec<u32>,
    pub utility: Vec<f64>,
    pub max_off_time: Vec<f64>,
    pub exe_delay: Vec<f64>,
    /// Chosen quality tier (accuracy utility only).
    pub tier: Vec<Option<String>>,

    pub by_off_rsu: Vec<Vec<usize>>,
    pub by_pro_rsu: Vec<Vec<usize>>,
    pub by_app: Vec<Vec<usize>>,
}

impl InstancePool {
    pub fn len(&self) -> usize {
        self.app_idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.app_idx.is_empty()
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn push(
        &mut self,
        app_idx: usize,
        off_rsu: usize,
        pro_rsu: usize,
        rbs: u32,
        cus: u32,
        utility: f64,
        max_off_time: f64,
        exe_delay: f64,
        tier: Option<String>,
    ) {
        let idx = self.len();
        self.app_idx.push(app_idx);
        self.off_rsu.push(off_rsu);
        self.pro_rsu.push(pro_rsu);
        self.rbs.push(rbs);
        self.cus.push(cus);
        self.utility.push(utility);
        self.max_off_time.push(max_off_time);
        self.exe_delay.push(exe_delay);
        self.tier.push(tier);
        self.by_off_rsu[off_rsu].push(idx);
        self.by_pro_rsu[pro_rsu].push(idx);
        self.by_app[app_idx].push(idx);
    }
}

/// Uplink time to move `input_size` bytes over `rbs` resource blocks at
/// `rate` bytes/TTI per block.
pub(crate) fn offload_delay(input_size: u32, rate: f64, rbs: u32, tti: f64) -> f64 {
    f64::from(input_size) / (rate * f64::from(rbs)) * tti
}

/// Store-and-forward time across the backhaul. Zero when processing happens
/// on the offload RSU itself.
pub(crate) fn forwarding_delay(input_size: u32, virtual_link_rate: f64, hops: u32) -> f64 {
    if hops == 0 {
        return 0.0;
    }
    f64::from(input_size) / virtual_link_rate * f64::from(hops)
}

/// Execution time of a full-allocation `exec_time` run on `cus` units of a
/// device with the given capacity scaling.
pub(crate) fn scaled_exe_delay(exec_time: f64, cmp_capacity: f64, cus: u32) -> f64 {
    exec_time * cmp_capacity / f64::from(cus)
}

fn energy_utility(app: &Application, off_delay: f64) -> f64 {
    (app.energy - app.offload_power * off_delay) / app.period
}

/// Highest-accuracy tier whose scaled execution time fits `budget`.
/// Returns `(exe_delay, accuracy, tier name)`.
fn best_tier(
    catalog: &ServiceCatalog,
    service: &str,
    device: &str,
    cmp_capacity: f64,
    cus: u32,
    budget: f64,
) -> Option<(f64, f64, String)> {
    catalog
        .tiers(service, device)
        .iter()
        .filter_map(|t| {
            let exe = scaled_exe_delay(t.exec_time, cmp_capacity, cus);
            (exe <= budget).then(|| (exe, t.accuracy, t.name.clone()))
        })
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
}

/// Execution delay, utility, and tier for one fully specified placement.
#[derive(Debug, Clone)]
pub(crate) struct Evaluation {
    pub utility: f64,
    pub exe_delay: f64,
    pub tier: Option<String>,
}

/// Re-evaluate a placement `(app, offload RSU, processing RSU, rbs, cus)`
/// outside the enumeration loops. Used by the graph-matching merge, where
/// demands have been rounded and utility must be recomputed. Deadline
/// feasibility is *not* enforced for the energy model (the caller checks the
/// residual offload window instead); the accuracy model needs the deadline to
/// pick a tier, so an unplaceable tier yields `None`.
pub(crate) fn evaluate(
    epoch: &EpochState,
    catalog: &ServiceCatalog,
    config: &SchedulerConfig,
    app_idx: usize,
    off_idx: usize,
    pro_idx: usize,
    rbs: u32,
    cus: u32,
) -> Option<Evaluation> {
    if rbs == 0 || cus == 0 {
        return None;
    }
    let app = &epoch.apps[app_idx];
    let rate = epoch.rate(app_idx, off_idx)?;
    let off_delay = offload_delay(app.input_size, rate, rbs, config.tti);
    let hops = epoch.hops(off_idx, pro_idx)?;
    let fwd_delay = forwarding_delay(app.input_size, config.virtual_link_rate, hops);
    let device = &epoch.device_type[pro_idx];

    match config.utility {
        UtilityModel::Energy => {
            let exec_time = catalog.exec_time(&app.service, device)?;
            let exe_delay = scaled_exe_delay(exec_time, epoch.cmp_capacity[pro_idx], cus);
            Some(Evaluation {
                utility: energy_utility(app, off_delay),
                exe_delay,
                tier: None,
            })
        }
        UtilityModel::Accuracy => {
            let budget = app.period - off_delay - fwd_delay - config.offload_overhead;
            let (exe_delay, accuracy, name) = best_tier(
                catalog,
                &app.service,
                device,
                epoch.cmp_capacity[pro_idx],
                cus,
                budget,
            )?;
            Some(Evaluation {
                utility: accuracy / app.period,
                exe_delay,
                tier: Some(name),
            })
        }
    }
}

/// C4 — enumerate every feasible service instance for the epoch.
///
/// Per application, per offload RSU in the vehicle's (already pruned) access
/// set: resource blocks count down from `floor(available * fair_factor)` in
/// `rb_step` strides, and the RB loop breaks as soon as the offload delay
/// alone overshoots the period (offload delay is nondecreasing as blocks
/// shrink). Computing units behave symmetrically against the total delay.
/// Instances with non-positive utility are skipped without breaking, since
/// utility is not monotone in the remaining loop variables.
pub fn generate(
    epoch: &EpochState,
    catalog: &ServiceCatalog,
    config: &SchedulerConfig,
) -> InstancePool {
    let mut pool = InstancePool {
        by_off_rsu: vec![Vec::new(); epoch.rsu_count()],
        by_pro_rsu: vec![Vec::new(); epoch.rsu_count()],
        by_app: vec![Vec::new(); epoch.apps.len()],
        ..InstancePool::default()
    };

    for (app_idx, app) in epoch.apps.iter().enumerate() {
        if app.period <= 0.0 {
            continue;
        }
        let period = app.period;

        for &(off_idx, rate) in &epoch.access[app_idx] {
            let max_rb = (f64::from(epoch.rb_available[off_idx]) * config.fair_factor) as u32;

            let mut rbs = max_rb;
            'rb: while rbs > 0 {
                let off_delay = offload_delay(app.input_size, rate, rbs, config.tti);
                if off_delay + config.offload_overhead > period {
                    break 'rb;
                }

                for &(pro_idx, hops) in &epoch.reachable[off_idx] {
                    let fwd_delay =
                        forwarding_delay(app.input_size, config.virtual_link_rate, hops);
                    if off_delay + fwd_delay + config.offload_overhead > period {
                        continue;
                    }

                    let device = &epoch.device_type[pro_idx];
                    // unsupported service on this device: infinite delay, move on
                    let exec_time = match config.utility {
                        UtilityModel::Energy => {
                            match catalog.exec_time(&app.service, device) {
                                Some(t) => t,
                                None => {
                                    trace!(
                                        app = app.app_id,
                                        rsu = epoch.rsu_ids[pro_idx],
                                        service = %app.service,
                                        "Service unsupported on device"
                                    );
                                    continue;
                                }
                            }
                        }
                        // the accuracy model consults the tier table instead
                        UtilityModel::Accuracy => 0.0,
                    };

                    let max_cu =
                        (f64::from(epoch.cu_available[pro_idx]) * config.fair_factor) as u32;
                    let mut cus = max_cu;
                    while cus > 0 {
                        let (utility, exe_delay, tier) = match config.utility {
                            UtilityModel::Energy => {
                                let exe = scaled_exe_delay(
                                    exec_time,
                                    epoch.cmp_capacity[pro_idx],
                                    cus,
                                );
                                if off_delay + fwd_delay + exe + config.offload_overhead > period {
                                    break;
                                }
                                (energy_utility(app, off_delay), exe, None)
                            }
                            UtilityModel::Accuracy => {
                                let budget =
                                    period - off_delay - fwd_delay - config.offload_overhead;
                                match best_tier(
                                    catalog,
                                    &app.service,
                                    device,
                                    epoch.cmp_capacity[pro_idx],
                                    cus,
                                    budget,
                                ) {
                                    Some((exe, accuracy, name)) => {
                                        (accuracy / period, exe, Some(name))
                                    }
                                    // fewer units only get slower
                                    None => break,
                                }
                            }
                        };

                        if utility > 0.0 {
                            pool.push(
                                app_idx,
                                off_idx,
                                pro_idx,
                                rbs,
                                cus,
                                utility,
                                period - fwd_delay - exe_delay - config.offload_overhead,
                                exe_delay,
                                tier,
                            );
                        }

                        cus = cus.saturating_sub(config.cu_step);
                    }
                }

                rbs = rbs.saturating_sub(config.rb_step);
            }
        }
    }

    debug!(
        instances = pool.len(),
        apps = epoch.apps.len(),
        rsus = epoch.rsu_count(),
        "Candidate enumeration done"
    );
    pool
}
