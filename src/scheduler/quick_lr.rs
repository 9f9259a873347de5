use tracing::debug;

use crate::scheduler::candidates::InstancePool;
use crate::scheduler::epoch::EpochState;
use crate::scheduler::Selection;

/// Resource-weight class of an instance against its RSUs' availability.
/// "Light" means the demand fits twice over (`2 * demand <= available`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Category {
    /// Light RBs, light CUs.
    Ll,
    /// Light RBs, heavy CUs.
    Lh,
    /// Heavy RBs, light CUs.
    Hl,
    /// Heavy RBs, heavy CUs.
    Hh,
}

/// Which flavor of the categorical local-ratio approximation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrVariant {
    /// Energy flavor: the light-RB/heavy-CU class is handled by a separate
    /// pass with its own (asymmetric) reduction coefficients.
    QuickLr,
    /// Accuracy flavor: both families use the symmetric reduction form,
    /// partitioned as `{LL, LH, HH}` against `{HL}`.
    FastSa,
}

struct Classified {
    category: Vec<Category>,
    rb_util: Vec<f64>,
    cu_util: Vec<f64>,
}

fn classify(epoch: &EpochState, pool: &InstancePool) -> Classified {
    let n = pool.len();
    let mut category = Vec::with_capacity(n);
    let mut rb_util = Vec::with_capacity(n);
    let mut cu_util = Vec::with_capacity(n);

    for i in 0..n {
        let avail_rb = epoch.rb_available[pool.off_rsu[i]];
        let avail_cu = epoch.cu_available[pool.pro_rsu[i]];
        rb_util.push(f64::from(pool.rbs[i]) / f64::from(avail_rb));
        cu_util.push(f64::from(pool.cus[i]) / f64::from(avail_cu));

        let light_rb = pool.rbs[i] * 2 <= avail_rb;
        let light_cu = pool.cus[i] * 2 <= avail_cu;
        category.push(match (light_rb, light_cu) {
            (true, true) => Category::Ll,
            (true, false) => Category::Lh,
            (false, true) => Category::Hl,
            (false, false) => Category::Hh,
        });
    }

    Classified {
        category,
        rb_util,
        cu_util,
    }
}

/// Per-tuple utility already committed "around" each app and RSU. The five
/// accumulators let the effective utility subtract what neighbors on the same
/// app or the same RSU have taken, without double-counting an app's own
/// contribution on its own RSUs.
struct Reductions {
    per_app: Vec<f64>,
    rb_per_rsu: Vec<f64>,
    cu_per_rsu: Vec<f64>,
    rb_app_in_rsu: Vec<Vec<f64>>,
    cu_app_in_rsu: Vec<Vec<f64>>,
}

impl Reductions {
    fn new(apps: usize, rsus: usize) -> Self {
        Self {
            per_app: vec![0.0; apps],
            rb_per_rsu: vec![0.0; rsus],
            cu_per_rsu: vec![0.0; rsus],
            rb_app_in_rsu: vec![vec![0.0; rsus]; apps],
            cu_app_in_rsu: vec![vec![0.0; rsus]; apps],
        }
    }

    fn raise(&mut self, app: usize, off: usize, pro: usize, utility: f64) {
        self.per_app[app] += utility;
        self.rb_per_rsu[off] += utility;
        self.rb_app_in_rsu[app][off] += utility;
        self.cu_per_rsu[pro] += utility;
        self.cu_app_in_rsu[app][pro] += utility;
    }
}

/// Local-ratio candidate pass over the given categories, in category order,
/// using the symmetric effective-utility form
/// `u - red_app - 2*red_off*rb_util - 2*red_pro*cu_util`.
fn candidates_symmetric(
    epoch: &EpochState,
    pool: &InstancePool,
    cls: &Classified,
    categories: &[Category],
) -> Vec<usize> {
    let mut red = Reductions::new(epoch.apps.len(), epoch.rsu_count());
    let mut candidates = Vec::new();

    for &cat in categories {
        for i in 0..pool.len() {
            if cls.category[i] != cat {
                continue;
            }
            let app = pool.app_idx[i];
            let off = pool.off_rsu[i];
            let pro = pool.pro_rsu[i];

            let red_app = red.per_app[app];
            let red_off = red.rb_per_rsu[off] - red.rb_app_in_rsu[app][off];
            let red_pro = red.cu_per_rsu[pro] - red.cu_app_in_rsu[app][pro];

            let utility = pool.utility[i]
                - red_app
                - 2.0 * red_off * cls.rb_util[i]
                - 2.0 * red_pro * cls.cu_util[i];
            if utility <= 0.0 {
                continue;
            }

            candidates.push(i);
            red.raise(app, off, pro, utility);
        }
    }
    candidates
}

/// Local-ratio candidate pass over the single separated class, with the
/// asymmetric effective-utility form: the heavy axis contributes its raw
/// reduction, only the light axis is utilization-scaled.
fn candidates_separated(
    epoch: &EpochState,
    pool: &InstancePool,
    cls: &Classified,
    separated: Category,
) -> Vec<usize> {
    debug_assert!(matches!(separated, Category::Lh | Category::Hl));
    let mut red = Reductions::new(epoch.apps.len(), epoch.rsu_count());
    let mut candidates = Vec::new();

    for i in 0..pool.len() {
        if cls.category[i] != separated {
            continue;
        }
        let app = pool.app_idx[i];
        let off = pool.off_rsu[i];
        let pro = pool.pro_rsu[i];

        let red_app = red.per_app[app];
        let red_off = red.rb_per_rsu[off] - red.rb_app_in_rsu[app][off];
        let red_pro = red.cu_per_rsu[pro] - red.cu_app_in_rsu[app][pro];

        let utility = match separated {
            Category::Lh => {
                pool.utility[i] - red_app - 2.0 * red_off * cls.rb_util[i] - red_pro
            }
            Category::Hl => {
                pool.utility[i] - red_app - red_off - 2.0 * red_pro * cls.cu_util[i]
            }
            _ => unreachable!(),
        };
        if utility <= 0.0 {
            continue;
        }

        candidates.push(i);
        red.raise(app, off, pro, utility);
    }
    candidates
}

/// Walk a candidate list in reverse, admitting any instance whose app is
/// still unclaimed and whose RSUs still fit, against a scratch copy of the
/// epoch availability. Returns the admitted instances and their total
/// (original) utility.
fn admit_reverse(epoch: &EpochState, pool: &InstancePool, candidates: &[usize]) -> (Vec<usize>, f64) {
    let mut rb = epoch.rb_available.clone();
    let mut cu = epoch.cu_available.clone();
    let mut selected_apps = vec![false; epoch.apps.len()];
    let mut chosen = Vec::new();
    let mut total = 0.0;

    for &i in candidates.iter().rev() {
        let app = pool.app_idx[i];
        if selected_apps[app] {
            continue;
        }
        let off = pool.off_rsu[i];
        let pro = pool.pro_rsu[i];
        if rb[off] < pool.rbs[i] || cu[pro] < pool.cus[i] {
            continue;
        }

        chosen.push(i);
        selected_apps[app] = true;
        total += pool.utility[i];
        rb[off] -= pool.rbs[i];
        cu[pro] -= pool.cus[i];
    }
    (chosen, total)
}

/// QuickLR / FastSA policy: run local-ratio selection on two disjoint
/// instance families and keep whichever total utility is larger. The
/// families never mix, even when a cross-family union would score higher.
pub fn select(epoch: &mut EpochState, pool: &InstancePool, variant: LrVariant) -> Vec<Selection> {
    if pool.is_empty() {
        return Vec::new();
    }

    let cls = classify(epoch, pool);

    let (family_a, family_b) = match variant {
        LrVariant::QuickLr => (
            candidates_symmetric(
                epoch,
                pool,
                &cls,
                &[Category::Ll, Category::Hl, Category::Hh],
            ),
            candidates_separated(epoch, pool, &cls, Category::Lh),
        ),
        LrVariant::FastSa => (
            candidates_symmetric(
                epoch,
                pool,
                &cls,
                &[Category::Ll, Category::Lh, Category::Hh],
            ),
            candidates_symmetric(epoch, pool, &cls, &[Category::Hl]),
        ),
    };

    let (chosen_a, utility_a) = admit_reverse(epoch, pool, &family_a);
    let (chosen_b, utility_b) = admit_reverse(epoch, pool, &family_b);

    let chosen = if utility_a >= utility_b {
        chosen_a
    } else {
        chosen_b
    };
    debug!(
        variant = ?variant,
        family_a = utility_a,
        family_b = utility_b,
        selected = chosen.len(),
        "Local-ratio selection done"
    );

    let mut selections = Vec::with_capacity(chosen.len());
    for i in chosen {
        selections.push(Selection::from_instance(epoch, pool, i));
        epoch.rb_available[pool.off_rsu[i]] -= pool.rbs[i];
        epoch.cu_available[pool.pro_rsu[i]] -= pool.cus[i];
    }
    selections
}
