use std::time::{Duration, Instant};

use microlp::{ComparisonOp, OptimizationDirection, Problem, Variable};
use thiserror::Error;
use tracing::warn;

/// Error surfaced when the LP backend fails. Callers treat it as an empty
/// epoch, never as a fatal condition.
#[derive(Debug, Error)]
#[error("LP solve failed: {0}")]
pub struct LpError(pub String);

/// A maximization LP over `[0, 1]` continuous variables with `<=`
/// constraints — the exact solver contract the graph-matching policy needs,
/// over a deterministic pure-Rust simplex backend.
///
/// The backend has no in-solver interruption, so the wall-clock budget is
/// checked after the fact: an overrun is logged and the (optimal) result is
/// still used, which is strictly better than the best-incumbent semantics the
/// budget allows.
pub struct LpModel {
    problem: Problem,
    vars: Vec<Variable>,
    time_limit: Duration,
}

impl LpModel {
    pub fn maximize(time_limit: Duration) -> Self {
        Self {
            problem: Problem::new(OptimizationDirection::Maximize),
            vars: Vec::new(),
            time_limit,
        }
    }

    /// Add a `[0, 1]` continuous variable with the given objective
    /// coefficient; returns its dense index.
    pub fn add_var(&mut self, objective: f64) -> usize {
        let var = self.problem.add_var(objective, (0.0, 1.0));
        self.vars.push(var);
        self.vars.len() - 1
    }

    pub fn num_vars(&self) -> usize {
        self.vars.len()
    }

    /// Add `sum(coeff * var) <= rhs` over `(variable index, coefficient)`
    /// terms.
    pub fn add_le_constraint(&mut self, terms: &[(usize, f64)], rhs: f64) {
        let expr: Vec<(Variable, f64)> = terms
            .iter()
            .map(|&(idx, coeff)| (self.vars[idx], coeff))
            .collect();
        self.problem.add_constraint(expr, ComparisonOp::Le, rhs);
    }

    /// Solve and read back the primal values, indexed like `add_var` order.
    pub fn solve(self) -> Result<Vec<f64>, LpError> {
        let start = Instant::now();
        let solution = self.problem.solve().map_err(|e| LpError(e.to_string()))?;
        let elapsed = start.elapsed();
        if elapsed > self.time_limit {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                limit_ms = self.time_limit.as_millis() as u64,
                "LP solve exceeded its time budget"
            );
        }
        Ok(self.vars.iter().map(|&v| solution[v]).collect())
    }
}
