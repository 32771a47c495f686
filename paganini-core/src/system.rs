//! Compiled equation system and the fixed-point oracle.
//!
//! Class values are solved diagonal by diagonal, from the truncation `K`
//! down to 1: the equations on diagonal `k` only read class values on
//! diagonals `>= k`, so every higher diagonal is already known when `k` is
//! solved. The oracle declares a parameter vector infeasible when no finite
//! least fixed point is found from zero.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use num_traits::ToPrimitive;
use thiserror::Error;

use crate::error::{ConvergenceError, EvalError, TuneError};
use crate::eval::{finite, Assignment, Dual, MAX_MAGNITUDE};
use crate::expr::Expr;
use crate::linear_system::LinearSystem;
use crate::params::{Params, Type};
use crate::variable::{VarId, Variable};

/// Relative slack before a negative Newton step counts as non-monotone.
const MONOTONE_SLACK: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub(crate) enum Infeasible {
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("newton step decreased the iterate")]
    NonMonotone,
    #[error("iterate is not finite")]
    NonFinite,
    #[error("linearized system is singular")]
    Singular,
    #[error("no fixed point within {0} iterations")]
    IterationLimit(usize),
}

impl From<Infeasible> for TuneError {
    fn from(err: Infeasible) -> Self {
        match err {
            Infeasible::Eval(e) => TuneError::Eval(e),
            Infeasible::NonMonotone | Infeasible::NonFinite => ConvergenceError::Diverged.into(),
            Infeasible::Singular => ConvergenceError::SingularSystem.into(),
            Infeasible::IterationLimit(n) => ConvergenceError::IterationLimit(n).into(),
        }
    }
}

/// Verdict of the oracle at one parameter vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    Feasible,
    Infeasible,
    /// Neither convergence nor divergence within `max_iters`.
    Exhausted,
}

/// Solutions on every solved diagonal, plus their sensitivities with respect
/// to the log-parameters when requested.
#[derive(Clone, Debug)]
pub(crate) struct Levels {
    values: Vec<Option<DVector<f64>>>,
    tangents: Vec<Option<DMatrix<f64>>>,
}

impl Levels {
    fn new(truncation: u32) -> Self {
        let k = truncation as usize;
        Self {
            values: vec![None; k],
            tangents: vec![None; k],
        }
    }

    fn slot(level: u32) -> Option<usize> {
        (level as usize).checked_sub(1)
    }

    pub(crate) fn value(&self, level: u32) -> Option<&DVector<f64>> {
        self.values.get(Self::slot(level)?)?.as_ref()
    }

    pub(crate) fn tangent(&self, level: u32) -> Option<&DMatrix<f64>> {
        self.tangents.get(Self::slot(level)?)?.as_ref()
    }

    pub(crate) fn base(&self) -> Option<&DVector<f64>> {
        self.value(1)
    }

    fn set_value(&mut self, level: u32, y: DVector<f64>) {
        if let Some(slot) = Self::slot(level).and_then(|s| self.values.get_mut(s)) {
            *slot = Some(y);
        }
    }

    fn set_tangent(&mut self, level: u32, t: DMatrix<f64>) {
        if let Some(slot) = Self::slot(level).and_then(|s| self.tangents.get_mut(s)) {
            *slot = Some(t);
        }
    }
}

/// Parameter and first-diagonal class values produced by a tuner.
#[derive(Clone, Debug)]
pub(crate) struct Solution {
    pub params: Vec<f64>,
    pub classes: DVector<f64>,
}

impl Solution {
    /// Every parameter must be positive and finite, every class value
    /// bounded by `MAX_MAGNITUDE`.
    pub(crate) fn validate(&self, system: &System) -> Result<(), ConvergenceError> {
        for (var, &value) in system.params.iter().zip(&self.params) {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConvergenceError::InvalidResult { var: var.id(), value });
            }
        }
        for (var, &value) in system.classes.iter().zip(self.classes.iter()) {
            if !(value.abs() <= MAX_MAGNITUDE) {
                return Err(ConvergenceError::InvalidResult { var: var.id(), value });
            }
        }
        Ok(())
    }
}

/// Values of the right-hand sides with their derivatives on one diagonal.
#[derive(Clone, Debug)]
pub(crate) struct Linearization {
    pub values: DVector<f64>,
    /// `dF_j / dY_i` on the evaluated diagonal.
    pub jacobian: DMatrix<f64>,
    /// `dF_j / dlog p_i`, including the dependence through higher diagonals.
    /// Empty unless requested.
    pub sensitivities: DMatrix<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Seed {
    Values,
    Classes,
    All,
}

struct LevelView<'a> {
    system: &'a System,
    params: &'a [f64],
    levels: &'a Levels,
    base: u32,
    current: &'a DVector<f64>,
    seed: Seed,
}

fn exponent(level: u32) -> i32 {
    level.to_i32().unwrap_or(i32::MAX)
}

impl Assignment for LevelView<'_> {
    fn dim(&self) -> usize {
        let n = self.system.classes.len();
        match self.seed {
            Seed::Values => 0,
            Seed::Classes => n,
            Seed::All => n + self.system.params.len(),
        }
    }

    fn truncation(&self) -> u32 {
        self.system.truncation
    }

    fn lookup(&self, var: &Variable, level: u32) -> Result<Dual, EvalError> {
        let n = self.system.classes.len();
        let dim = self.dim();
        if let Some(&i) = self.system.param_index.get(&var.id()) {
            let value = self.params[i].powi(exponent(level));
            return Ok(match self.seed {
                Seed::All => Dual::seeded(value, dim, n + i, f64::from(level) * value),
                _ => Dual::constant(value, dim),
            });
        }
        let j = *self
            .system
            .class_index
            .get(&var.id())
            .ok_or(EvalError::Unassigned(var.id()))?;
        let level = level.min(self.system.truncation);
        if level == self.base {
            return Ok(match self.seed {
                Seed::Values => Dual::constant(self.current[j], dim),
                _ => Dual::seeded(self.current[j], dim, j, 1.0),
            });
        }
        let y = self
            .levels
            .value(level)
            .ok_or(EvalError::Unassigned(var.id()))?;
        let mut d = Dual::constant(y[j], dim);
        if let (Seed::All, Some(t)) = (self.seed, self.levels.tangent(level)) {
            for i in 0..self.system.params.len() {
                d.grad[n + i] = t[(j, i)];
            }
        }
        Ok(d)
    }
}

/// A specification frozen for one tuner run.
#[derive(Clone, Debug)]
pub(crate) struct System {
    classes: Vec<Variable>,
    equations: Vec<Expr>,
    params: Vec<Variable>,
    class_index: HashMap<VarId, usize>,
    param_index: HashMap<VarId, usize>,
    sys_type: Type,
    truncation: u32,
    max_iters: usize,
    tolerance: f64,
}

impl System {
    pub(crate) fn new(equations: &[(Variable, Expr)], sys_type: Type, config: &Params) -> Self {
        let classes: Vec<Variable> = equations.iter().map(|(v, _)| v.clone()).collect();
        let class_index: HashMap<VarId, usize> =
            classes.iter().enumerate().map(|(j, v)| (v.id(), j)).collect();
        let mut params = Vec::new();
        let mut param_index = HashMap::new();
        for (_, expr) in equations {
            for v in expr.variables() {
                if !class_index.contains_key(&v.id()) && !param_index.contains_key(&v.id()) {
                    param_index.insert(v.id(), params.len());
                    params.push(v);
                }
            }
        }
        let truncation = if equations.iter().any(|(_, e)| e.has_polya()) {
            config.truncation.max(1)
        } else {
            1
        };
        Self {
            classes,
            equations: equations.iter().map(|(_, e)| e.clone()).collect(),
            params,
            class_index,
            param_index,
            sys_type,
            truncation,
            max_iters: config.max_iters,
            tolerance: config.tolerance,
        }
    }

    pub(crate) fn classes(&self) -> &[Variable] {
        &self.classes
    }

    pub(crate) fn params(&self) -> &[Variable] {
        &self.params
    }

    pub(crate) fn class_position(&self, var: &Variable) -> Option<usize> {
        self.class_index.get(&var.id()).copied()
    }

    pub(crate) fn param_position(&self, var: &Variable) -> Option<usize> {
        self.param_index.get(&var.id()).copied()
    }

    pub(crate) fn sys_type(&self) -> Type {
        self.sys_type
    }

    pub(crate) fn truncation(&self) -> u32 {
        self.truncation
    }

    pub(crate) fn max_iters(&self) -> usize {
        self.max_iters
    }

    pub(crate) fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn evaluate(&self, view: &LevelView<'_>) -> Result<Vec<Dual>, EvalError> {
        self.equations
            .iter()
            .map(|e| e.eval(view, view.base).and_then(finite))
            .collect()
    }

    /// Right-hand sides on diagonal `base` with class values `y` there.
    pub(crate) fn apply(
        &self,
        p: &[f64],
        levels: &Levels,
        base: u32,
        y: &DVector<f64>,
    ) -> Result<DVector<f64>, EvalError> {
        let view = LevelView {
            system: self,
            params: p,
            levels,
            base,
            current: y,
            seed: Seed::Values,
        };
        let duals = self.evaluate(&view)?;
        Ok(DVector::from_iterator(duals.len(), duals.iter().map(|d| d.value)))
    }

    pub(crate) fn linearize(
        &self,
        p: &[f64],
        levels: &Levels,
        base: u32,
        y: &DVector<f64>,
        with_params: bool,
    ) -> Result<Linearization, EvalError> {
        let n = self.classes.len();
        let m = if with_params { self.params.len() } else { 0 };
        let view = LevelView {
            system: self,
            params: p,
            levels,
            base,
            current: y,
            seed: if with_params { Seed::All } else { Seed::Classes },
        };
        let duals = self.evaluate(&view)?;
        let values = DVector::from_iterator(n, duals.iter().map(|d| d.value));
        let jacobian = DMatrix::from_fn(n, n, |j, i| duals[j].grad[i]);
        let sensitivities = DMatrix::from_fn(n, m, |j, i| duals[j].grad[n + i]);
        Ok(Linearization {
            values,
            jacobian,
            sensitivities,
        })
    }

    fn solve_level(&self, p: &[f64], levels: &Levels, base: u32) -> Result<DVector<f64>, Infeasible> {
        match self.sys_type {
            Type::Rational => self.kleene(p, levels, base),
            Type::Algebraic => self.newton(p, levels, base),
        }
    }

    // Direct substitution from zero.
    fn kleene(&self, p: &[f64], levels: &Levels, base: u32) -> Result<DVector<f64>, Infeasible> {
        let mut y = DVector::zeros(self.classes.len());
        for _ in 0..self.max_iters {
            let next = self.apply(p, levels, base, &y)?;
            let diff = (&next - &y).amax();
            y = next;
            if diff <= self.tolerance * y.amax() {
                return Ok(y);
            }
        }
        Err(Infeasible::IterationLimit(self.max_iters))
    }

    // Newton from zero; past the singularity the iterate stops increasing.
    fn newton(&self, p: &[f64], levels: &Levels, base: u32) -> Result<DVector<f64>, Infeasible> {
        let mut y = DVector::zeros(self.classes.len());
        let mut prev = f64::INFINITY;
        for iter in 0..self.max_iters {
            let lin = self.linearize(p, levels, base, &y, false)?;
            let residual = &lin.values - &y;
            let step = LinearSystem::identity_minus(&lin.jacobian)
                .solve(&residual)
                .ok_or(Infeasible::Singular)?;
            let scale = y.amax().max(1.0);
            if step.iter().any(|&d| d < -MONOTONE_SLACK * scale) {
                return Err(Infeasible::NonMonotone);
            }
            y += &step;
            if !y.iter().all(|v| v.is_finite()) {
                return Err(Infeasible::NonFinite);
            }
            let size = step.amax();
            if size <= self.tolerance * scale {
                return Ok(y);
            }
            // stalled at the rounding floor near the singularity
            if iter >= 2 && size >= prev && size <= self.tolerance.sqrt() * scale {
                return Ok(y);
            }
            prev = size;
        }
        Err(Infeasible::IterationLimit(self.max_iters))
    }

    /// Solves diagonals `K` down to `lowest`. With `tangents`, also records
    /// `dY/dlog p` on every diagonal above the first.
    pub(crate) fn solve(&self, p: &[f64], tangents: bool, lowest: u32) -> Result<Levels, Infeasible> {
        let mut levels = Levels::new(self.truncation);
        for base in (lowest.max(1)..=self.truncation).rev() {
            let y = self.solve_level(p, &levels, base)?;
            if tangents && base > 1 {
                let t = self.tangent(p, &levels, base, &y)?;
                levels.set_tangent(base, t);
            }
            levels.set_value(base, y);
        }
        Ok(levels)
    }

    /// `dY/dlog p` on diagonal `base`, solved from `(I - J) X = dF/dlog p`.
    pub(crate) fn tangent(
        &self,
        p: &[f64],
        levels: &Levels,
        base: u32,
        y: &DVector<f64>,
    ) -> Result<DMatrix<f64>, Infeasible> {
        let lin = self.linearize(p, levels, base, y, true)?;
        LinearSystem::identity_minus(&lin.jacobian)
            .solve_matrix(&lin.sensitivities)
            .ok_or(Infeasible::Singular)
    }

    pub(crate) fn verdict(&self, p: &[f64]) -> Verdict {
        match self.solve(p, false, 1) {
            Ok(_) => Verdict::Feasible,
            Err(Infeasible::IterationLimit(_)) => Verdict::Exhausted,
            Err(_) => Verdict::Infeasible,
        }
    }

    pub(crate) fn feasible(&self, p: &[f64]) -> bool {
        self.verdict(p) == Verdict::Feasible
    }

    /// Same system under another oracle.
    pub(crate) fn with_type(&self, sys_type: Type) -> Self {
        Self {
            sys_type,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{mset, pow, seq};
    use approx::assert_abs_diff_eq;

    fn binary_trees(sys_type: Type) -> System {
        let z = Variable::new();
        let b = Variable::new();
        System::new(&[(b.clone(), 1 + &z * pow(&b, 2))], sys_type, &Params::default())
    }

    fn catalan(z: f64) -> f64 {
        (1.0 - (1.0 - 4.0 * z).sqrt()) / (2.0 * z)
    }

    #[test]
    fn both_oracles_find_the_least_fixed_point() {
        for sys_type in [Type::Rational, Type::Algebraic] {
            let sys = binary_trees(sys_type);
            let levels = sys.solve(&[0.2], false, 1).unwrap();
            assert_abs_diff_eq!(levels.base().unwrap()[0], catalan(0.2), epsilon = 1e-10);
        }
    }

    #[test]
    fn infeasible_past_the_singularity() {
        let sys = binary_trees(Type::Algebraic);
        assert!(sys.feasible(&[0.24]));
        assert_eq!(sys.solve(&[0.3], false, 1).unwrap_err(), Infeasible::NonMonotone);
        assert!(!binary_trees(Type::Rational).feasible(&[0.3]));
    }

    #[test]
    fn slow_substitution_is_told_apart_from_divergence() {
        let z = Variable::new();
        let b = Variable::new();
        let config = Params::default().with_max_iters(10);
        let sys = System::new(&[(b.clone(), 1 + &z * pow(&b, 2))], Type::Rational, &config);
        assert_eq!(sys.verdict(&[0.01]), Verdict::Feasible);
        assert_eq!(sys.verdict(&[0.2499]), Verdict::Exhausted);
        let newton = sys.with_type(Type::Algebraic);
        assert_eq!(newton.sys_type(), Type::Algebraic);
        assert_eq!(newton.verdict(&[0.2499]), Verdict::Feasible);
        assert_eq!(newton.verdict(&[0.3]), Verdict::Infeasible);
    }

    #[test]
    fn results_must_stay_representable() {
        let sys = binary_trees(Type::Algebraic);
        let b = sys.classes()[0].id();
        let z = sys.params()[0].id();
        let solution = |p: f64, y: f64| Solution {
            params: vec![p],
            classes: DVector::from_vec(vec![y]),
        };
        assert!(solution(0.25, 1e12).validate(&sys).is_ok());
        assert_eq!(
            solution(0.25, 1e200).validate(&sys),
            Err(ConvergenceError::InvalidResult { var: b, value: 1e200 })
        );
        assert_eq!(
            solution(0.0, 2.0).validate(&sys),
            Err(ConvergenceError::InvalidResult { var: z, value: 0.0 })
        );
    }

    #[test]
    fn sensitivity_matches_closed_form() {
        let sys = binary_trees(Type::Algebraic);
        let z = 0.2;
        let levels = sys.solve(&[z], false, 1).unwrap();
        let y = levels.base().unwrap().clone();
        let t = sys.tangent(&[z], &levels, 1, &y).unwrap();
        let b = catalan(z);
        let expected = z * b * b / (1.0 - 2.0 * z * b);
        assert_abs_diff_eq!(t[(0, 0)], expected, epsilon = 1e-10);
    }

    #[test]
    fn polya_diagonals_are_solved_top_down() {
        // rooted unlabelled trees T = z MSet(T)
        let z = Variable::new();
        let t = Variable::new();
        let sys = System::new(&[(t.clone(), &z * mset(&t))], Type::Algebraic, &Params::default());
        assert_eq!(sys.truncation(), 20);
        let p = [0.3];
        let levels = sys.solve(&p, true, 1).unwrap();
        for k in 1..=20u32 {
            let y = levels.value(k).unwrap();
            let f = sys.apply(&p, &levels, k, y).unwrap();
            assert_abs_diff_eq!(f[0], y[0], epsilon = 1e-12);
        }
        assert!(levels.tangent(2).is_some());
        assert!(levels.tangent(1).is_none());
        // the second diagonal is the first one at z^2, up to truncation
        let sq = sys.solve(&[0.09], false, 1).unwrap();
        assert_abs_diff_eq!(levels.value(2).unwrap()[0], sq.base().unwrap()[0], epsilon = 1e-12);
    }

    #[test]
    fn parameters_follow_first_occurrence() {
        let z = Variable::new();
        let u = Variable::new();
        let a = Variable::new();
        let c = Variable::new();
        let sys = System::new(
            &[(a.clone(), &u * &c + &z), (c.clone(), seq(&z))],
            Type::Rational,
            &Params::default(),
        );
        assert_eq!(sys.params(), &[u.clone(), z.clone()]);
        assert_eq!(sys.class_position(&c), Some(1));
        assert_eq!(sys.param_position(&z), Some(1));
        assert_eq!(sys.truncation(), 1);
    }
}
