//! Singular tuning.
//!
//! The dominant singularity is the boundary of the region where the oracle
//! finds a finite least fixed point. It is bracketed and bisected in log z,
//! then polished on the first-order conditions (see [`crate::kkt`]), which
//! also moves marks to their requested frequencies.

use std::iter;

use nalgebra::DVector;
use tracing::{debug, warn};

use crate::error::{ConvergenceError, TuneError};
use crate::kkt::{Goal, Kkt};
use crate::linear_system::LinearSystem;
use crate::params::Type;
use crate::system::{Levels, Solution, System, Verdict};

const MAX_LOG_Z: f64 = 40.0;
const MIN_LOG_Z: f64 = -60.0;

/// Feasible end of the bisection in log z. `exhausted` records that the
/// infeasible end was only rejected for running out of iterations.
#[derive(Clone, Copy, Debug)]
struct Boundary {
    lo: f64,
    exhausted: bool,
}

/// Tunes parameter `z` to the singularity. `marks` lists the other free
/// parameters with their target frequencies; remaining parameters stay at 1.
pub(crate) fn tune(system: &System, z: usize, marks: &[(usize, f64)]) -> Result<Solution, TuneError> {
    let m = system.params().len();
    let at = |x: f64| {
        let mut p = vec![1.0; m];
        p[z] = x.exp();
        p
    };
    let rational = system.sys_type() == Type::Rational;

    let mut boundary = locate(system, z, &at)?;
    let newton;
    let mut system = system;
    if rational && boundary.exhausted {
        // substitution slows down before a pole; Newton tells both sides apart
        debug!(lo = boundary.lo, "substitution exhausted near the boundary, switching to newton");
        newton = system.with_type(Type::Algebraic);
        system = &newton;
        boundary = locate(system, z, &at)?;
    }

    let p0 = at(boundary.lo);
    let levels = system.solve(&p0, true, 1)?;
    let y0 = levels
        .base()
        .cloned()
        .ok_or(ConvergenceError::InfeasibleStart)?;
    debug!(z = p0[z], exhausted = boundary.exhausted, "bisection converged");
    let bisected = Solution {
        params: p0.clone(),
        classes: y0.clone(),
    };
    if rational && marks.is_empty() && !boundary.exhausted {
        return Ok(bisected);
    }

    match polish(system, z, marks, &p0, &levels, &y0) {
        Ok(solution) => Ok(solution),
        Err(err) if boundary.exhausted => {
            debug!(%err, "polishing failed on an undecided boundary");
            Err(ConvergenceError::IterationLimit(system.max_iters()).into())
        }
        Err(err) if marks.is_empty() => {
            warn!(%err, "polishing failed, keeping the bisection point");
            Ok(bisected)
        }
        Err(err) => Err(err),
    }
}

fn locate(system: &System, z: usize, at: &impl Fn(f64) -> Vec<f64>) -> Result<Boundary, ConvergenceError> {
    let (mut lo, mut hi, mut exhausted) = bracket(system, z, at)?;
    debug!(lo, hi, exhausted, "bracketed singularity in log z");
    while hi - lo > system.tolerance() {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        match system.verdict(&at(mid)) {
            Verdict::Feasible => lo = mid,
            verdict => {
                hi = mid;
                exhausted = verdict == Verdict::Exhausted;
            }
        }
    }
    Ok(Boundary { lo, exhausted })
}

// Unit steps in log z from 1 until feasibility flips.
fn bracket(
    system: &System,
    z: usize,
    at: &impl Fn(f64) -> Vec<f64>,
) -> Result<(f64, f64, bool), ConvergenceError> {
    let start = system.verdict(&at(0.0));
    if start == Verdict::Feasible {
        let mut hi = 0.0;
        loop {
            hi += 1.0;
            if hi > MAX_LOG_Z {
                return Err(ConvergenceError::NoSingularity(system.params()[z].id()));
            }
            let verdict = system.verdict(&at(hi));
            if verdict != Verdict::Feasible {
                return Ok((hi - 1.0, hi, verdict == Verdict::Exhausted));
            }
        }
    } else {
        let mut lo = 0.0;
        let mut upper = start;
        loop {
            lo -= 1.0;
            if lo < MIN_LOG_Z {
                return Err(ConvergenceError::InfeasibleStart);
            }
            let verdict = system.verdict(&at(lo));
            if verdict == Verdict::Feasible {
                return Ok((lo, lo + 1.0, upper == Verdict::Exhausted));
            }
            upper = verdict;
        }
    }
}

fn polish(
    system: &System,
    z: usize,
    marks: &[(usize, f64)],
    p0: &[f64],
    levels: &Levels,
    y0: &DVector<f64>,
) -> Result<Solution, TuneError> {
    let lin = system.linearize(p0, levels, 1, y0, true)?;
    let lambda = LinearSystem::identity_minus(&lin.jacobian)
        .left_null_vector()
        .ok_or(ConvergenceError::SingularSystem)?;
    let g = lambda.dot(&lin.sensitivities.column(z));
    if !(g.is_finite() && g.abs() > f64::MIN_POSITIVE) {
        return Err(ConvergenceError::SingularSystem.into());
    }
    let lambda = lambda / g;

    let free: Vec<usize> = iter::once(z).chain(marks.iter().map(|&(i, _)| i)).collect();
    let mut start: Vec<f64> = free
        .iter()
        .map(|&i| lambda.dot(&lin.sensitivities.column(i)))
        .collect();
    start[0] = 1.0;
    let end: Vec<f64> = iter::once(1.0).chain(marks.iter().map(|&(_, t)| t)).collect();

    let kkt = Kkt::new(system, p0.to_vec(), free, Goal::Singularity);
    let w = kkt.continuation(kkt.pack(p0, y0, &lambda), &start, &end)?;
    let point = kkt.unpack(&w);
    debug!(z = point.params[z], "polished singular point");
    Ok(Solution {
        params: point.params,
        classes: point.classes,
    })
}
