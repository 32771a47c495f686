//! First-order conditions shared by both tuners.
//!
//! Unknowns are `w = (x, Y, λ)`: log-values of the free parameters, class
//! values on the first diagonal, and the multiplier vector. The residual is
//!
//! ```text
//! F(Y) - Y                      = 0
//! (I - J)^T λ - e_C / Y_C       = 0   (the e_C term only for mean tuning)
//! λ . dF/dlog p_i - c_i         = 0   for every free p_i
//! ```
//!
//! At a singularity `λ` is the left null vector of `I - J` and `c` holds
//! the (relative) frequencies; for mean tuning `λ` is the sensitivity of
//! `log C` and `c` holds the expectations.

use nalgebra::{DMatrix, DVector};
use tracing::trace;

use crate::error::ConvergenceError;
use crate::linear_system::LinearSystem;
use crate::system::{Infeasible, System};

const RESIDUAL_FLOOR: f64 = 1e-10;
const MULTIPLIER_SLACK: f64 = 1e-9;
const FD_STEP: f64 = 1e-7;
const MIN_LINE_STEP: f64 = 1e-6;
const MIN_PROGRESS_STEP: f64 = 1e-8;
const CONTINUATION_STEPS: usize = 15;
const POLISH_STEPS: usize = 50;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Goal {
    Singularity,
    Expectation { class: usize },
}

pub(crate) struct Point {
    pub params: Vec<f64>,
    pub classes: DVector<f64>,
    pub multipliers: DVector<f64>,
}

pub(crate) struct Kkt<'a> {
    system: &'a System,
    fixed: Vec<f64>,
    free: Vec<usize>,
    goal: Goal,
    tolerance: f64,
}

impl<'a> Kkt<'a> {
    /// `fixed` holds every parameter value; entries listed in `free` are
    /// overwritten from the unknowns.
    pub(crate) fn new(system: &'a System, fixed: Vec<f64>, free: Vec<usize>, goal: Goal) -> Self {
        let tolerance = system.tolerance().max(RESIDUAL_FLOOR);
        Self {
            system,
            fixed,
            free,
            goal,
            tolerance,
        }
    }

    fn n(&self) -> usize {
        self.system.classes().len()
    }

    pub(crate) fn pack(&self, params: &[f64], classes: &DVector<f64>, multipliers: &DVector<f64>) -> DVector<f64> {
        let mf = self.free.len();
        let n = self.n();
        let mut w = DVector::zeros(mf + 2 * n);
        for (a, &i) in self.free.iter().enumerate() {
            w[a] = params[i].ln();
        }
        w.rows_mut(mf, n).copy_from(classes);
        w.rows_mut(mf + n, n).copy_from(multipliers);
        w
    }

    pub(crate) fn unpack(&self, w: &DVector<f64>) -> Point {
        let mf = self.free.len();
        let n = self.n();
        let mut params = self.fixed.clone();
        for (a, &i) in self.free.iter().enumerate() {
            params[i] = w[a].exp();
        }
        Point {
            params,
            classes: w.rows(mf, n).into_owned(),
            multipliers: w.rows(mf + n, n).into_owned(),
        }
    }

    fn residual(&self, w: &DVector<f64>, targets: &[f64]) -> Result<DVector<f64>, Infeasible> {
        let n = self.n();
        let mf = self.free.len();
        let Point {
            params,
            classes: y,
            multipliers: lambda,
        } = self.unpack(w);
        let levels = self.system.solve(&params, true, 2)?;
        let lin = self.system.linearize(&params, &levels, 1, &y, true)?;

        let mut r = DVector::zeros(2 * n + mf);
        r.rows_mut(0, n).copy_from(&(&lin.values - &y));

        let mut stationarity = &lambda - lin.jacobian.transpose() * &lambda;
        if let Goal::Expectation { class } = self.goal {
            if !(y[class] > 0.0) {
                return Err(Infeasible::NonFinite);
            }
            stationarity[class] -= 1.0 / y[class];
        }
        let scale = lambda.amax().max(1.0);
        r.rows_mut(n, n).copy_from(&(stationarity / scale));

        for (a, &i) in self.free.iter().enumerate() {
            let c = lambda.dot(&lin.sensitivities.column(i));
            r[2 * n + a] = (c - targets[a]) / targets[a].abs().max(1.0);
        }
        if r.iter().all(|v| v.is_finite()) {
            Ok(r)
        } else {
            Err(Infeasible::NonFinite)
        }
    }

    // Multipliers must stay non-negative: the other branch of the fixed point
    // satisfies the same equations.
    fn admissible(&self, w: &DVector<f64>) -> bool {
        let n = self.n();
        let lambda = w.rows(self.free.len() + n, n);
        let floor = -MULTIPLIER_SLACK * lambda.amax().max(1.0);
        lambda.iter().all(|&l| l >= floor)
    }

    fn jacobian(&self, w: &DVector<f64>, targets: &[f64]) -> Option<DMatrix<f64>> {
        let dim = w.len();
        let mut jac = DMatrix::zeros(dim, dim);
        for j in 0..dim {
            let h = FD_STEP * w[j].abs().max(1.0);
            let mut wp = w.clone();
            wp[j] += h;
            let mut wm = w.clone();
            wm[j] -= h;
            let rp = self.residual(&wp, targets).ok()?;
            let rm = self.residual(&wm, targets).ok()?;
            jac.set_column(j, &((rp - rm) / (2.0 * h)));
        }
        Some(jac)
    }

    /// Damped Newton on the residual for fixed targets.
    fn correct(&self, mut w: DVector<f64>, targets: &[f64], max_steps: usize) -> Option<DVector<f64>> {
        let mut r = self.residual(&w, targets).ok()?;
        let mut norm = r.amax();
        for _ in 0..max_steps {
            if norm <= self.tolerance {
                return Some(w);
            }
            let jac = self.jacobian(&w, targets)?;
            let dir = LinearSystem::from_matrix(jac).solve(&(-&r))?;
            let mut t = 1.0;
            loop {
                let trial = &w + &dir * t;
                if let Ok(rt) = self.residual(&trial, targets) {
                    let nt = rt.amax();
                    if self.admissible(&trial) && nt < (1.0 - 1e-4 * t) * norm {
                        w = trial;
                        r = rt;
                        norm = nt;
                        break;
                    }
                }
                t /= 2.0;
                if t < MIN_LINE_STEP {
                    return None;
                }
            }
        }
        (norm <= self.tolerance).then_some(w)
    }

    /// Moves the targets linearly from `start` to `end`, correcting at each
    /// step. `w` must solve the system for `start`.
    pub(crate) fn continuation(
        &self,
        w: DVector<f64>,
        start: &[f64],
        end: &[f64],
    ) -> Result<DVector<f64>, ConvergenceError> {
        let direct = start
            .iter()
            .zip(end)
            .all(|(a, b)| (a - b).abs() <= f64::EPSILON * b.abs().max(1.0));
        if direct {
            return self
                .correct(w, end, POLISH_STEPS)
                .ok_or(ConvergenceError::Stalled { progress: 0.0 });
        }

        let mut w = w;
        let mut s = 0.0;
        let mut ds: f64 = 1.0;
        let mut steps = 0;
        while s < 1.0 {
            steps += 1;
            if steps > self.system.max_iters() {
                return Err(ConvergenceError::IterationLimit(self.system.max_iters()));
            }
            let next = (s + ds).min(1.0);
            let targets: Vec<f64> = start
                .iter()
                .zip(end)
                .map(|(a, b)| (1.0 - next) * a + next * b)
                .collect();
            match self.correct(w.clone(), &targets, CONTINUATION_STEPS) {
                Some(wn) => {
                    w = wn;
                    s = next;
                    ds = (2.0 * ds).min(1.0);
                }
                None => {
                    ds /= 2.0;
                    if ds < MIN_PROGRESS_STEP {
                        return Err(ConvergenceError::Stalled { progress: s });
                    }
                }
            }
            trace!(s, ds, steps, "continuation step");
        }
        Ok(w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::pow;
    use crate::params::{Params, Type};
    use crate::variable::Variable;
    use approx::assert_abs_diff_eq;

    #[test]
    fn corrector_lands_on_the_binary_tree_singularity() {
        let z = Variable::new();
        let b = Variable::new();
        let sys = System::new(&[(b.clone(), 1 + &z * pow(&b, 2))], Type::Algebraic, &Params::default());
        let z0: f64 = 0.2499;
        let b0 = (1.0 - (1.0 - 4.0 * z0).sqrt()) / (2.0 * z0);
        let kkt = Kkt::new(&sys, vec![z0], vec![0], Goal::Singularity);
        let w0 = kkt.pack(
            &[z0],
            &DVector::from_vec(vec![b0]),
            &DVector::from_vec(vec![1.0 / (z0 * b0 * b0)]),
        );
        let w = kkt.continuation(w0, &[1.0], &[1.0]).unwrap();
        let point = kkt.unpack(&w);
        assert_abs_diff_eq!(point.params[0], 0.25, epsilon = 1e-8);
        assert_abs_diff_eq!(point.classes[0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(point.multipliers[0], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn negative_multipliers_are_rejected() {
        let z = Variable::new();
        let b = Variable::new();
        let sys = System::new(&[(b.clone(), 1 + &z * pow(&b, 2))], Type::Algebraic, &Params::default());
        let kkt = Kkt::new(&sys, vec![0.2], vec![0], Goal::Expectation { class: 0 });
        let ok = kkt.pack(&[0.2], &DVector::from_vec(vec![1.0]), &DVector::from_vec(vec![0.5]));
        let bad = kkt.pack(&[0.2], &DVector::from_vec(vec![1.0]), &DVector::from_vec(vec![-0.5]));
        assert!(kkt.admissible(&ok));
        assert!(!kkt.admissible(&bad));
    }
}
