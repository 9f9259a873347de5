use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, warn};

use crate::catalog::ServiceCatalog;
use crate::config::SchedulerConfig;
use crate::scheduler::candidates::{self, InstancePool};
use crate::scheduler::epoch::EpochState;
use crate::scheduler::lp::{LpError, LpModel};
use crate::scheduler::Selection;

/// LP values at or below this are treated as zero.
const EPS: f64 = 1e-9;

/// One side's bipartite expansion: applications on the left, RSU *rank
/// copies* on the right. An RSU whose instances carry fractional LP mass `s`
/// appears as `ceil(s)` rank copies, each a distinct match target.
struct BipartiteGraph {
    /// `(rsu index, rank)` per node.
    rsu_nodes: Vec<(usize, u32)>,
    /// `(app node, rsu node)` per edge.
    edges: Vec<(usize, usize)>,
    /// Resource demand of the instance that created each edge.
    demand: Vec<u32>,
}

/// The merged tripartite graph: app nodes, offload rank copies, processing
/// rank copies, and hyperedges spanning one node of each class. All
/// cross-references are indices into the dense vectors.
struct TripartiteGraph {
    /// Epoch app index per app node.
    app_nodes: Vec<usize>,
    off_nodes: Vec<(usize, u32)>,
    pro_nodes: Vec<(usize, u32)>,

    /// `[app node, offload node, processing node]` per hyperedge.
    edges: Vec<[usize; 3]>,
    rb_demand: Vec<u32>,
    cu_demand: Vec<u32>,
    /// Utility recomputed from the rounded rank-copy demands.
    weight: Vec<f64>,
    exe_delay: Vec<f64>,
    tier: Vec<Option<String>>,

    for_app: Vec<Vec<usize>>,
    for_off: Vec<Vec<usize>>,
    for_pro: Vec<Vec<usize>>,
}

#[derive(Clone, Copy)]
enum Side {
    Offload,
    Processing,
}

/// GraphMatch policy: relax the instance ILP, expand both resource axes into
/// bipartite rank-copy graphs, merge them into a tripartite matching problem,
/// relax that too, and round with the fractional local-ratio method.
///
/// Any LP failure degrades to an empty selection for the epoch.
pub fn select(
    epoch: &mut EpochState,
    pool: &InstancePool,
    catalog: &ServiceCatalog,
    config: &SchedulerConfig,
) -> Vec<Selection> {
    if pool.is_empty() {
        return Vec::new();
    }

    let lp_solution = match solve_instance_lp(epoch, pool, config) {
        Ok(s) => s,
        Err(e) => {
            warn!(error = %e, "Instance LP failed, epoch yields no grants");
            return Vec::new();
        }
    };
    if lp_solution.is_empty() {
        debug!("Instance LP support is empty");
        return Vec::new();
    }

    // Both bipartite graphs share the same application node list.
    let app_nodes: Vec<usize> = lp_solution
        .keys()
        .map(|&i| pool.app_idx[i])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let app_node_of: HashMap<usize, usize> =
        app_nodes.iter().enumerate().map(|(n, &a)| (a, n)).collect();

    let (off_graph, inst_off_edges) =
        build_bipartite(pool, &lp_solution, &app_node_of, Side::Offload);
    let (pro_graph, inst_pro_edges) =
        build_bipartite(pool, &lp_solution, &app_node_of, Side::Processing);

    let tri = merge(
        epoch,
        pool,
        catalog,
        config,
        app_nodes,
        &lp_solution,
        &off_graph,
        &inst_off_edges,
        &pro_graph,
        &inst_pro_edges,
    );
    if tri.edges.is_empty() {
        return Vec::new();
    }
    debug!(
        hyperedges = tri.edges.len(),
        off_rank_copies = tri.off_nodes.len(),
        pro_rank_copies = tri.pro_nodes.len(),
        "Tripartite graph built"
    );

    let matching = match solve_matching_lp(&tri, config) {
        Ok(y) => y,
        Err(e) => {
            warn!(error = %e, "Matching LP failed, epoch yields no grants");
            return Vec::new();
        }
    };
    if matching.is_empty() {
        return Vec::new();
    }

    fractional_local_ratio(epoch, config, &tri, &matching)
}

/// Phase 1 — the relaxed instance ILP. Per offload RSU the RB-weighted mass
/// is capped at `ceil(available * (1 - fair_factor))` (the complement of the
/// generator's per-instance cap), symmetrically for CUs, and each app's
/// variables sum to at most one.
fn solve_instance_lp(
    epoch: &EpochState,
    pool: &InstancePool,
    config: &SchedulerConfig,
) -> Result<BTreeMap<usize, f64>, LpError> {
    let mut lp = LpModel::maximize(Duration::from_secs_f64(config.lp_time_limit));
    for i in 0..pool.len() {
        lp.add_var(pool.utility[i]);
    }

    for r in 0..epoch.rsu_count() {
        if !pool.by_off_rsu[r].is_empty() {
            let terms: Vec<(usize, f64)> = pool.by_off_rsu[r]
                .iter()
                .map(|&i| (i, f64::from(pool.rbs[i])))
                .collect();
            let limit = (f64::from(epoch.rb_available[r]) * (1.0 - config.fair_factor)).ceil();
            lp.add_le_constraint(&terms, limit);
        }
        if !pool.by_pro_rsu[r].is_empty() {
            let terms: Vec<(usize, f64)> = pool.by_pro_rsu[r]
                .iter()
                .map(|&i| (i, f64::from(pool.cus[i])))
                .collect();
            let limit = (f64::from(epoch.cu_available[r]) * (1.0 - config.fair_factor)).ceil();
            lp.add_le_constraint(&terms, limit);
        }
    }
    for a in 0..epoch.apps.len() {
        if !pool.by_app[a].is_empty() {
            let terms: Vec<(usize, f64)> = pool.by_app[a].iter().map(|&i| (i, 1.0)).collect();
            lp.add_le_constraint(&terms, 1.0);
        }
    }

    let x = lp.solve()?;
    Ok(x.into_iter()
        .enumerate()
        .filter(|&(_, v)| v > EPS)
        .collect())
}

/// Phase 2 — expand one resource axis into a bipartite graph of app nodes
/// and RSU rank copies.
///
/// Per RSU, instances are swept in descending resource demand while a running
/// fractional sum advances; an instance's edge lands on the rank copy
/// covering `[old_sum, old_sum + x)`, and a second edge is emitted when the
/// interval crosses a rank boundary. Returns the graph plus, per instance,
/// the edges it contributed to.
fn build_bipartite(
    pool: &InstancePool,
    lp_solution: &BTreeMap<usize, f64>,
    app_node_of: &HashMap<usize, usize>,
    side: Side,
) -> (BipartiteGraph, BTreeMap<usize, Vec<usize>>) {
    let (demand_of, rsu_of): (&Vec<u32>, &Vec<usize>) = match side {
        Side::Offload => (&pool.rbs, &pool.off_rsu),
        Side::Processing => (&pool.cus, &pool.pro_rsu),
    };

    let mut by_rsu: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut frac_mass: BTreeMap<usize, f64> = BTreeMap::new();
    for (&inst, &x) in lp_solution {
        by_rsu.entry(rsu_of[inst]).or_default().push(inst);
        *frac_mass.entry(rsu_of[inst]).or_insert(0.0) += x;
    }

    let mut graph = BipartiteGraph {
        rsu_nodes: Vec::new(),
        edges: Vec::new(),
        demand: Vec::new(),
    };
    let mut inst_edges: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    let mut edge_index: HashMap<(usize, usize), usize> = HashMap::new();

    for (&rsu, insts) in &mut by_rsu {
        let total_rank = frac_mass[&rsu].ceil() as i64;
        if total_rank <= 0 {
            continue;
        }
        let first_node = graph.rsu_nodes.len();
        for rank in 0..total_rank as u32 {
            graph.rsu_nodes.push((rsu, rank));
        }
        let last_rank = (total_rank - 1) as u32;

        insts.sort_by(|&a, &b| demand_of[b].cmp(&demand_of[a]));

        let mut running = 0.0f64;
        for &inst in insts.iter() {
            let app_node = app_node_of[&pool.app_idx[inst]];
            let ceil_old = running.ceil();
            let old = running;
            running += lp_solution[&inst];
            let entry = inst_edges.entry(inst).or_default();

            let mut attach = |rank: u32, entry: &mut Vec<usize>| {
                // the running sum may drift past the precomputed ceiling
                let rank = rank.min(last_rank);
                let key = (app_node, first_node + rank as usize);
                let idx = *edge_index.entry(key).or_insert_with(|| {
                    graph.edges.push(key);
                    graph.demand.push(demand_of[inst]);
                    graph.edges.len() - 1
                });
                if !entry.contains(&idx) {
                    entry.push(idx);
                }
            };

            if old < ceil_old {
                // old sum sits inside a rank: attach there, and spill into
                // the next rank copy when the interval crosses the boundary
                attach(ceil_old as u32 - 1, &mut *entry);
                if running > ceil_old {
                    attach(ceil_old as u32, &mut *entry);
                }
            } else {
                // old sum is integral: this instance opens the next rank
                attach(old as u32, &mut *entry);
            }
        }
    }

    (graph, inst_edges)
}

/// Phase 3 — merge the two bipartite graphs into hyperedges, visiting
/// instances in descending utility. Each (offload edge, processing edge)
/// pair of an instance yields one hyperedge, deduplicated by endpoint
/// triple, with its weight recomputed from the rounded rank-copy demands.
#[allow(clippy::too_many_arguments)]
fn merge(
    epoch: &EpochState,
    pool: &InstancePool,
    catalog: &ServiceCatalog,
    config: &SchedulerConfig,
    app_nodes: Vec<usize>,
    lp_solution: &BTreeMap<usize, f64>,
    off_graph: &BipartiteGraph,
    inst_off_edges: &BTreeMap<usize, Vec<usize>>,
    pro_graph: &BipartiteGraph,
    inst_pro_edges: &BTreeMap<usize, Vec<usize>>,
) -> TripartiteGraph {
    let mut tri = TripartiteGraph {
        for_app: vec![Vec::new(); app_nodes.len()],
        for_off: vec![Vec::new(); off_graph.rsu_nodes.len()],
        for_pro: vec![Vec::new(); pro_graph.rsu_nodes.len()],
        app_nodes,
        off_nodes: off_graph.rsu_nodes.clone(),
        pro_nodes: pro_graph.rsu_nodes.clone(),
        edges: Vec::new(),
        rb_demand: Vec::new(),
        cu_demand: Vec::new(),
        weight: Vec::new(),
        exe_delay: Vec::new(),
        tier: Vec::new(),
    };
    let mut seen: HashSet<[usize; 3]> = HashSet::new();

    let mut sorted_insts: Vec<usize> = lp_solution.keys().copied().collect();
    sorted_insts.sort_by(|&a, &b| {
        pool.utility[b]
            .partial_cmp(&pool.utility[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    for inst in sorted_insts {
        let (Some(off_edges), Some(pro_edges)) =
            (inst_off_edges.get(&inst), inst_pro_edges.get(&inst))
        else {
            continue;
        };
        for &off_edge in off_edges {
            let (app_node, off_node) = off_graph.edges[off_edge];
            for &pro_edge in pro_edges {
                let (_, pro_node) = pro_graph.edges[pro_edge];

                let hyper = [app_node, off_node, pro_node];
                if !seen.insert(hyper) {
                    continue;
                }

                let rb_demand = off_graph.demand[off_edge];
                let cu_demand = pro_graph.demand[pro_edge];
                let app_idx = tri.app_nodes[app_node];
                let off_idx = tri.off_nodes[off_node].0;
                let pro_idx = tri.pro_nodes[pro_node].0;

                // merge-time utility, from the rounded demands rather than
                // the enumeration-time ones
                let (weight, exe_delay, tier) = match candidates::evaluate(
                    epoch, catalog, config, app_idx, off_idx, pro_idx, rb_demand, cu_demand,
                ) {
                    Some(eval) => (eval.utility, eval.exe_delay, eval.tier),
                    None => (0.0, 0.0, None),
                };

                let edge_idx = tri.edges.len();
                tri.edges.push(hyper);
                tri.rb_demand.push(rb_demand);
                tri.cu_demand.push(cu_demand);
                tri.weight.push(weight);
                tri.exe_delay.push(exe_delay);
                tri.tier.push(tier);
                tri.for_app[app_node].push(edge_idx);
                tri.for_off[off_node].push(edge_idx);
                tri.for_pro[pro_node].push(edge_idx);
            }
        }
    }

    tri
}

/// Phase 4 — the relaxed tripartite matching: at most unit mass per app node
/// and per rank copy.
fn solve_matching_lp(
    tri: &TripartiteGraph,
    config: &SchedulerConfig,
) -> Result<BTreeMap<usize, f64>, LpError> {
    let mut lp = LpModel::maximize(Duration::from_secs_f64(config.lp_time_limit));
    for &w in &tri.weight {
        lp.add_var(w);
    }
    for class in [&tri.for_app, &tri.for_off, &tri.for_pro] {
        for edges in class {
            if !edges.is_empty() {
                let terms: Vec<(usize, f64)> = edges.iter().map(|&e| (e, 1.0)).collect();
                lp.add_le_constraint(&terms, 1.0);
            }
        }
    }

    let y = lp.solve()?;
    Ok(y.into_iter()
        .enumerate()
        .filter(|&(_, v)| v > EPS)
        .collect())
}

/// Phase 5 — fractional local-ratio rounding over the positive-mass
/// hyperedges, then final feasibility checks against the live availability.
fn fractional_local_ratio(
    epoch: &mut EpochState,
    config: &SchedulerConfig,
    tri: &TripartiteGraph,
    matching: &BTreeMap<usize, f64>,
) -> Vec<Selection> {
    let positive: Vec<usize> = matching.keys().copied().collect();

    // closed neighborhoods: edges sharing any of the three endpoints
    let mut by_app: HashMap<usize, BTreeSet<usize>> = HashMap::new();
    let mut by_off: HashMap<usize, BTreeSet<usize>> = HashMap::new();
    let mut by_pro: HashMap<usize, BTreeSet<usize>> = HashMap::new();
    for &e in &positive {
        let [a, o, p] = tri.edges[e];
        by_app.entry(a).or_default().insert(e);
        by_off.entry(o).or_default().insert(e);
        by_pro.entry(p).or_default().insert(e);
    }
    let neighbors: BTreeMap<usize, BTreeSet<usize>> = positive
        .iter()
        .map(|&e| {
            let [a, o, p] = tri.edges[e];
            let mut n = BTreeSet::new();
            n.extend(&by_app[&a]);
            n.extend(&by_off[&o]);
            n.extend(&by_pro[&p]);
            (e, n)
        })
        .collect();

    let mut frac_sum: BTreeMap<usize, f64> = neighbors
        .iter()
        .map(|(&e, n)| (e, n.iter().map(|nb| matching[nb]).sum()))
        .collect();

    // peel edges in ascending fractional-neighborhood order
    let mut remaining: BTreeSet<usize> = positive.iter().copied().collect();
    let mut order = Vec::with_capacity(positive.len());
    while !remaining.is_empty() {
        let mut best = None;
        let mut best_val = f64::INFINITY;
        for &e in &remaining {
            let v = frac_sum[&e];
            if v < best_val {
                best_val = v;
                best = Some(e);
            }
        }
        let Some(picked) = best else {
            break;
        };
        order.push(picked);
        remaining.remove(&picked);
        for nb in &neighbors[&picked] {
            if let Some(f) = frac_sum.get_mut(nb) {
                *f -= matching[&picked];
            }
        }
    }

    // forward walk: keep edges whose residual weight is still positive,
    // charging each kept edge's weight to its whole neighborhood
    let mut residual: BTreeMap<usize, f64> = positive
        .iter()
        .map(|&e| (e, tri.weight[e]))
        .collect();
    let mut candidates = Vec::new();
    for &e in &order {
        let w = residual[&e];
        if w <= 0.0 {
            continue;
        }
        candidates.push(e);
        for nb in &neighbors[&e] {
            if let Some(r) = residual.get_mut(nb) {
                *r -= w;
            }
        }
    }

    // reverse greedy admission on the three endpoint classes
    let mut app_used = vec![false; tri.app_nodes.len()];
    let mut off_used = vec![false; tri.off_nodes.len()];
    let mut pro_used = vec![false; tri.pro_nodes.len()];
    let mut admitted = Vec::new();
    for &e in candidates.iter().rev() {
        let [a, o, p] = tri.edges[e];
        if app_used[a] || off_used[o] || pro_used[p] {
            continue;
        }
        admitted.push(e);
        app_used[a] = true;
        off_used[o] = true;
        pro_used[p] = true;
    }

    // final checks against live availability, then build the selections
    let mut selected_apps = vec![false; epoch.apps.len()];
    let mut selections = Vec::new();
    for &e in &admitted {
        let [a, o, p] = tri.edges[e];
        let app_idx = tri.app_nodes[a];
        if selected_apps[app_idx] {
            continue;
        }
        let off_idx = tri.off_nodes[o].0;
        let pro_idx = tri.pro_nodes[p].0;
        let rbs = tri.rb_demand[e];
        let cus = tri.cu_demand[e];
        if rbs > epoch.rb_available[off_idx] || cus > epoch.cu_available[pro_idx] {
            debug!(
                app = epoch.apps[app_idx].app_id,
                "Rounded demand exceeds live capacity, dropped"
            );
            continue;
        }
        let Some(hops) = epoch.hops(off_idx, pro_idx) else {
            continue;
        };

        let app = &epoch.apps[app_idx];
        let fwd_delay =
            candidates::forwarding_delay(app.input_size, config.virtual_link_rate, hops);
        let max_off_time =
            app.period - tri.exe_delay[e] - fwd_delay - config.offload_overhead;
        if max_off_time <= 0.0 || tri.weight[e] <= 0.0 {
            continue;
        }

        selections.push(Selection {
            app_id: app.app_id,
            veh_id: app.veh_id,
            off_rsu: epoch.rsu_ids[off_idx],
            pro_rsu: epoch.rsu_ids[pro_idx],
            rbs,
            cus,
            utility: tri.weight[e],
            max_off_time,
            exe_delay: tri.exe_delay[e],
            tier: tri.tier[e].clone(),
        });
        selected_apps[app_idx] = true;
        epoch.rb_available[off_idx] -= rbs;
        epoch.cu_available[pro_idx] -= cus;
    }

    debug!(selected = selections.len(), "Fractional local ratio done");
    selections
}
