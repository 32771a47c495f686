//! Forward-mode evaluation of expressions.
//!
//! Every node evaluates to a [`Dual`]: a value together with its gradient
//! along the directions seeded by the [`Assignment`]. Parameters on the
//! i-th Pólya diagonal are raised to the i-th power; class variables are
//! read from the assignment at that diagonal (clamped to the truncation).

use std::collections::HashMap;
use std::ops;

use nalgebra::DVector;
use num_traits::ToPrimitive;

use crate::constraint::Constraint;
use crate::error::EvalError;
use crate::expr::Expr;
use crate::params::DEFAULT_TRUNCATION;
use crate::partitions::{factorial, totient, Partitions};
use crate::variable::{VarId, Variable};

/// Largest magnitude an evaluation may reach; its square is still finite.
pub(crate) const MAX_MAGNITUDE: f64 = 1e150;

#[derive(Clone, Debug, PartialEq)]
pub struct Dual {
    pub value: f64,
    pub grad: DVector<f64>,
}

impl Dual {
    pub fn constant(value: f64, dim: usize) -> Self {
        Self {
            value,
            grad: DVector::zeros(dim),
        }
    }

    pub fn seeded(value: f64, dim: usize, index: usize, slope: f64) -> Self {
        let mut d = Self::constant(value, dim);
        d.grad[index] = slope;
        d
    }

    pub fn dim(&self) -> usize {
        self.grad.len()
    }

    pub fn scale(&self, c: f64) -> Self {
        Self {
            value: self.value * c,
            grad: &self.grad * c,
        }
    }

    /// `g(self)` given `g(self.value)` and `g'(self.value)`.
    pub fn chain(&self, value: f64, slope: f64) -> Self {
        Self {
            value,
            grad: &self.grad * slope,
        }
    }

    pub fn powi(&self, k: u32) -> Self {
        if k == 0 {
            return Self::constant(1.0, self.dim());
        }
        let e = k.to_i32().unwrap_or(i32::MAX);
        self.chain(self.value.powi(e), f64::from(k) * self.value.powi(e - 1))
    }
}

impl ops::Add<&Dual> for Dual {
    type Output = Dual;
    fn add(self, rhs: &Dual) -> Dual {
        Dual {
            value: self.value + rhs.value,
            grad: self.grad + &rhs.grad,
        }
    }
}

impl ops::Sub<&Dual> for Dual {
    type Output = Dual;
    fn sub(self, rhs: &Dual) -> Dual {
        Dual {
            value: self.value - rhs.value,
            grad: self.grad - &rhs.grad,
        }
    }
}

impl ops::Mul<&Dual> for Dual {
    type Output = Dual;
    fn mul(self, rhs: &Dual) -> Dual {
        Dual {
            value: self.value * rhs.value,
            grad: self.grad * rhs.value + &rhs.grad * self.value,
        }
    }
}

/// Source of leaf values during evaluation.
pub trait Assignment {
    /// Gradient length of every produced [`Dual`].
    fn dim(&self) -> usize;
    /// Highest Pólya diagonal kept.
    fn truncation(&self) -> u32;
    fn lookup(&self, var: &Variable, level: u32) -> Result<Dual, EvalError>;
}

/// Explicit assignment map for evaluating expressions outside the tuners.
#[derive(Clone, Debug)]
pub struct Valuation {
    params: HashMap<VarId, f64>,
    classes: HashMap<(VarId, u32), f64>,
    truncation: u32,
}

impl Default for Valuation {
    fn default() -> Self {
        Self::new()
    }
}

impl Valuation {
    pub fn new() -> Self {
        Self {
            params: HashMap::new(),
            classes: HashMap::new(),
            truncation: DEFAULT_TRUNCATION,
        }
    }

    /// Reads the value cells of parameters; unset variables are skipped.
    pub fn from_variables<'a>(vars: impl IntoIterator<Item = &'a Variable>) -> Self {
        let mut out = Self::new();
        for v in vars {
            if let Some(x) = v.value() {
                out.assign(v, x);
            }
        }
        out
    }

    pub fn with_truncation(mut self, truncation: u32) -> Self {
        self.truncation = truncation.max(1);
        self
    }

    /// Parameter value; on diagonal i it reads as `value^i`.
    pub fn assign(&mut self, var: &Variable, value: f64) -> &mut Self {
        self.params.insert(var.id(), value);
        self
    }

    /// Class value on a given diagonal.
    pub fn assign_class(&mut self, var: &Variable, level: u32, value: f64) -> &mut Self {
        self.classes.insert((var.id(), level), value);
        self
    }

    pub fn get(&self, var: &Variable, level: u32) -> Option<f64> {
        if let Some(&p) = self.params.get(&var.id()) {
            return Some(p.powi(level.to_i32().unwrap_or(i32::MAX)));
        }
        self.classes
            .get(&(var.id(), level.min(self.truncation)))
            .copied()
    }
}

impl Assignment for Valuation {
    fn dim(&self) -> usize {
        0
    }

    fn truncation(&self) -> u32 {
        self.truncation
    }

    fn lookup(&self, var: &Variable, level: u32) -> Result<Dual, EvalError> {
        self.get(var, level)
            .map(|x| Dual::constant(x, 0))
            .ok_or(EvalError::Unassigned(var.id()))
    }
}

// One-directional view of a valuation, seeded on `wrt`.
struct Tangent<'a> {
    base: &'a Valuation,
    wrt: VarId,
}

impl Assignment for Tangent<'_> {
    fn dim(&self) -> usize {
        1
    }

    fn truncation(&self) -> u32 {
        self.base.truncation
    }

    fn lookup(&self, var: &Variable, level: u32) -> Result<Dual, EvalError> {
        let x = self
            .base
            .get(var, level)
            .ok_or(EvalError::Unassigned(var.id()))?;
        if var.id() != self.wrt {
            return Ok(Dual::constant(x, 1));
        }
        match self.base.params.get(&var.id()) {
            Some(&p) => {
                let e = level.to_i32().unwrap_or(i32::MAX);
                Ok(Dual::seeded(x, 1, 0, f64::from(level) * p.powi(e - 1)))
            }
            // class values on higher diagonals are held fixed
            None if level == 1 => Ok(Dual::seeded(x, 1, 0, 1.0)),
            None => Ok(Dual::constant(x, 1)),
        }
    }
}

impl Expr {
    /// Numeric value under `valuation`.
    pub fn value(&self, valuation: &Valuation) -> Result<f64, EvalError> {
        finite(self.eval(valuation, 1)?).map(|d| d.value)
    }

    /// Partial derivative with respect to `wrt`, every other leaf held fixed.
    pub fn derivative(&self, valuation: &Valuation, wrt: &Variable) -> Result<f64, EvalError> {
        let tangent = Tangent {
            base: valuation,
            wrt: wrt.id(),
        };
        let d = finite(self.eval(&tangent, 1)?)?;
        if d.grad[0].is_finite() {
            Ok(d.grad[0])
        } else {
            Err(EvalError::NonFinite)
        }
    }

    /// Evaluates on diagonal `level`.
    pub fn eval<A: Assignment + ?Sized>(&self, env: &A, level: u32) -> Result<Dual, EvalError> {
        match self {
            Expr::Var(v) => env.lookup(v, level),
            Expr::Const(c) => Ok(Dual::constant(*c, env.dim())),
            Expr::Add(a, b) => Ok(a.eval(env, level)? + &b.eval(env, level)?),
            Expr::Sub(a, b) => Ok(a.eval(env, level)? - &b.eval(env, level)?),
            Expr::Mul(a, b) => Ok(a.eval(env, level)? * &b.eval(env, level)?),
            Expr::Pow(a, k) => Ok(a.eval(env, level)?.powi(*k)),
            Expr::Seq(a, c) => sequence(&a.eval(env, level)?, *c),
            Expr::MSet(a, c) => multiset(a, *c, env, level),
            Expr::Cyc(a, c) => labelled_cycle(&a.eval(env, level)?, *c),
            Expr::UCyc(a, c) => unlabelled_cycle(a, *c, env, level),
        }
    }
}

pub(crate) fn finite(d: Dual) -> Result<Dual, EvalError> {
    if d.value.is_finite() {
        Ok(d)
    } else {
        Err(EvalError::NonFinite)
    }
}

fn check_below_one(construction: &'static str, u: &Dual) -> Result<(), EvalError> {
    if u.value < 1.0 {
        Ok(())
    } else {
        Err(EvalError::Divergent {
            construction,
            argument: u.value,
        })
    }
}

// u^k / (1 - u)
fn geometric_tail(u: &Dual, k: u32) -> Result<Dual, EvalError> {
    check_below_one("Seq", u)?;
    let r = 1.0 / (1.0 - u.value);
    Ok(u.powi(k) * &u.chain(r, r * r))
}

// -log(1 - u)
fn log_inverse(construction: &'static str, u: &Dual) -> Result<Dual, EvalError> {
    check_below_one(construction, u)?;
    Ok(u.chain(-(1.0 - u.value).ln(), 1.0 / (1.0 - u.value)))
}

// Sum of the size terms over `sizes`.
fn sum_over(sizes: impl Iterator<Item = u32>, dim: usize, term: impl Fn(u32) -> Dual) -> Dual {
    sizes.fold(Dual::constant(0.0, dim), |acc, j| acc + &term(j))
}

fn sequence(u: &Dual, c: Constraint) -> Result<Dual, EvalError> {
    match c {
        Constraint::Unrestricted => geometric_tail(u, 0),
        Constraint::Eq(k) | Constraint::Leq(k) => {
            Ok(sum_over((0..=k).filter(|&j| c.admits(j)), u.dim(), |j| u.powi(j)))
        }
        Constraint::Geq(k) => geometric_tail(u, k),
    }
}

// The argument evaluated on diagonals level*1 ..= level*count.
fn diagonals<A: Assignment + ?Sized>(
    arg: &Expr,
    env: &A,
    level: u32,
    count: u32,
) -> Result<Vec<Dual>, EvalError> {
    (1..=count)
        .map(|i| arg.eval(env, level.saturating_mul(i)))
        .collect()
}

fn polya_terms(env_truncation: u32, level: u32) -> u32 {
    (env_truncation / level.max(1)).max(1)
}

// Cycle index of the symmetric group S_n over the given diagonals.
fn symmetric_index(diags: &[Dual], n: u32, dim: usize) -> Dual {
    let mut acc = Dual::constant(0.0, dim);
    for ks in Partitions::new(n) {
        let mut term = Dual::constant(1.0, dim);
        let mut coef = 1.0;
        for (i, &k) in ks.iter().enumerate() {
            if k == 0 {
                continue;
            }
            let part = (i + 1) as u32;
            term = term * &diags[i].powi(k);
            coef *= f64::from(part).powi(k as i32) * factorial(k);
        }
        acc = acc + &term.scale(1.0 / coef);
    }
    acc
}

// Cycle index of the cyclic group C_n; zero for n = 0.
fn cyclic_index(diags: &[Dual], n: u32, dim: usize) -> Dual {
    let mut acc = Dual::constant(0.0, dim);
    for d in (1..=n).filter(|d| n % d == 0) {
        let term = diags[(d - 1) as usize].powi(n / d);
        acc = acc + &term.scale(f64::from(totient(d)) / f64::from(n));
    }
    acc
}

fn multiset<A: Assignment + ?Sized>(
    arg: &Expr,
    c: Constraint,
    env: &A,
    level: u32,
) -> Result<Dual, EvalError> {
    let dim = env.dim();
    let unrestricted = || -> Result<Dual, EvalError> {
        let terms = polya_terms(env.truncation(), level);
        let diags = diagonals(arg, env, level, terms)?;
        let s = diags
            .iter()
            .enumerate()
            .fold(Dual::constant(0.0, dim), |acc, (i, d)| {
                acc + &d.scale(1.0 / (i + 1) as f64)
            });
        if s.value > MAX_MAGNITUDE.ln() {
            return Err(EvalError::Divergent {
                construction: "MSet",
                argument: s.value,
            });
        }
        let e = s.value.exp();
        Ok(s.chain(e, e))
    };
    match c {
        Constraint::Unrestricted => unrestricted(),
        Constraint::Eq(n) | Constraint::Leq(n) => {
            let diags = diagonals(arg, env, level, n)?;
            Ok(sum_over((0..=n).filter(|&j| c.admits(j)), dim, |j| {
                symmetric_index(&diags, j, dim)
            }))
        }
        Constraint::Geq(n) => {
            let diags = diagonals(arg, env, level, n.saturating_sub(1))?;
            let excluded = sum_over((0..n).filter(|&j| !c.admits(j)), dim, |j| {
                symmetric_index(&diags, j, dim)
            });
            Ok(unrestricted()? - &excluded)
        }
    }
}

fn labelled_cycle(u: &Dual, c: Constraint) -> Result<Dual, EvalError> {
    let dim = u.dim();
    let term = |j: u32| u.powi(j).scale(1.0 / f64::from(j));
    match c {
        Constraint::Unrestricted => log_inverse("Cyc", u),
        Constraint::Eq(n) | Constraint::Leq(n) => {
            Ok(sum_over((1..=n).filter(|&j| c.admits(j)), dim, term))
        }
        Constraint::Geq(n) => {
            Ok(log_inverse("Cyc", u)? - &sum_over((1..n).filter(|&j| !c.admits(j)), dim, term))
        }
    }
}

fn unlabelled_cycle<A: Assignment + ?Sized>(
    arg: &Expr,
    c: Constraint,
    env: &A,
    level: u32,
) -> Result<Dual, EvalError> {
    let dim = env.dim();
    let unrestricted = || -> Result<Dual, EvalError> {
        let terms = polya_terms(env.truncation(), level);
        let diags = diagonals(arg, env, level, terms)?;
        let mut acc = Dual::constant(0.0, dim);
        for (i, d) in diags.iter().enumerate() {
            let i = (i + 1) as u32;
            let weight = f64::from(totient(i)) / f64::from(i);
            acc = acc + &log_inverse("UCyc", d)?.scale(weight);
        }
        Ok(acc)
    };
    match c {
        Constraint::Unrestricted => unrestricted(),
        Constraint::Eq(n) | Constraint::Leq(n) => {
            let diags = diagonals(arg, env, level, n)?;
            Ok(sum_over((1..=n).filter(|&j| c.admits(j)), dim, |j| {
                cyclic_index(&diags, j, dim)
            }))
        }
        Constraint::Geq(n) => {
            let diags = diagonals(arg, env, level, n.saturating_sub(1))?;
            let excluded = sum_over((1..n).filter(|&j| !c.admits(j)), dim, |j| {
                cyclic_index(&diags, j, dim)
            });
            Ok(unrestricted()? - &excluded)
        }
    }
}
