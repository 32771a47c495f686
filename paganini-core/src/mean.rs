//! Mean tuning: move the expectations of the targeted parameters from a
//! feasible starting point to their targets along a straight homotopy.

use nalgebra::DVector;
use tracing::debug;

use crate::error::{ConfigError, ConvergenceError, TuneError};
use crate::kkt::{Goal, Kkt};
use crate::linear_system::LinearSystem;
use crate::system::{Solution, System};

const MAX_HALVINGS: usize = 200;

/// Tunes the parameters listed in `targets` so that, in the Boltzmann model
/// of class `class`, each has the requested expectation. Parameters without
/// a target stay at 1.
pub(crate) fn tune(system: &System, class: usize, targets: &[(usize, f64)]) -> Result<Solution, TuneError> {
    if targets.is_empty() {
        return Err(ConfigError::NoTargets.into());
    }
    let n = system.classes().len();
    let mut p = vec![1.0; system.params().len()];
    let mut halvings = 0;
    while !system.feasible(&p) {
        halvings += 1;
        if halvings > MAX_HALVINGS {
            return Err(ConvergenceError::InfeasibleStart.into());
        }
        for &(i, _) in targets {
            p[i] *= 0.5;
        }
    }
    debug!(halvings, "found a feasible start");

    let levels = system.solve(&p, true, 1)?;
    let y = levels
        .base()
        .cloned()
        .ok_or(ConvergenceError::InfeasibleStart)?;
    if !(y[class] > 0.0) {
        return Err(ConvergenceError::InfeasibleStart.into());
    }
    let lin = system.linearize(&p, &levels, 1, &y, true)?;
    let mut rhs = DVector::zeros(n);
    rhs[class] = 1.0 / y[class];
    let lambda = LinearSystem::identity_minus(&lin.jacobian)
        .transpose()
        .solve(&rhs)
        .ok_or(ConvergenceError::SingularSystem)?;

    let free: Vec<usize> = targets.iter().map(|&(i, _)| i).collect();
    let start: Vec<f64> = free
        .iter()
        .map(|&i| lambda.dot(&lin.sensitivities.column(i)))
        .collect();
    let end: Vec<f64> = targets.iter().map(|&(_, t)| t).collect();
    debug!(?start, ?end, "continuation on expectations");

    let kkt = Kkt::new(system, p.clone(), free, Goal::Expectation { class });
    let w = kkt.continuation(kkt.pack(&p, &y, &lambda), &start, &end)?;
    let point = kkt.unpack(&w);
    Ok(Solution {
        params: point.params,
        classes: point.classes,
    })
}

/// Expected count of every parameter in the Boltzmann model of `class`,
/// at the given parameter and first-diagonal class values.
pub(crate) fn expectations(
    system: &System,
    params: &[f64],
    classes: &DVector<f64>,
    class: usize,
) -> Result<Vec<f64>, TuneError> {
    let levels = system.solve(params, true, 2)?;
    let sens = system.tangent(params, &levels, 1, classes)?;
    let yc = classes[class];
    Ok((0..params.len()).map(|i| sens[(class, i)] / yc).collect())
}
