use std::collections::HashSet;
use std::fmt;
use std::ops;

use crate::constraint::Constraint;
use crate::variable::{VarId, Variable};

/// Construction tree over variables and constants.
#[derive(Clone, Debug)]
pub enum Expr {
    Var(Variable),
    Const(f64),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Pow(Box<Expr>, u32),
    Seq(Box<Expr>, Constraint),
    /// Pólya multiset.
    MSet(Box<Expr>, Constraint),
    /// Labelled cycle.
    Cyc(Box<Expr>, Constraint),
    /// Unlabelled (Pólya) cycle.
    UCyc(Box<Expr>, Constraint),
}

impl Expr {
    pub fn var(v: &Variable) -> Self {
        Expr::Var(v.clone())
    }
    pub fn constant(c: f64) -> Self {
        Expr::Const(c)
    }
    pub fn add(a: Expr, b: Expr) -> Self {
        Expr::Add(Box::new(a), Box::new(b))
    }
    pub fn sub(a: Expr, b: Expr) -> Self {
        Expr::Sub(Box::new(a), Box::new(b))
    }
    pub fn mul(a: Expr, b: Expr) -> Self {
        Expr::Mul(Box::new(a), Box::new(b))
    }
    pub fn pow(self, k: u32) -> Self {
        Expr::Pow(Box::new(self), k)
    }

    /// Leaf variables, each listed once, in order of first occurrence.
    pub fn variables(&self) -> Vec<Variable> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        self.visit_leaves(&mut |v| {
            if seen.insert(v.id()) {
                out.push(v.clone());
            }
        });
        out
    }

    /// Whether both expressions reach the same multiset of leaf variables.
    /// Insensitive to operator order and nesting.
    pub fn related(&self, other: &Expr) -> bool {
        self.leaf_ids() == other.leaf_ids()
    }

    fn leaf_ids(&self) -> Vec<VarId> {
        let mut ids = Vec::new();
        self.visit_leaves(&mut |v| ids.push(v.id()));
        ids.sort();
        ids
    }

    fn visit_leaves(&self, f: &mut dyn FnMut(&Variable)) {
        match self {
            Expr::Var(v) => f(v),
            Expr::Const(_) => {}
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) => {
                a.visit_leaves(f);
                b.visit_leaves(f);
            }
            Expr::Pow(a, _)
            | Expr::Seq(a, _)
            | Expr::MSet(a, _)
            | Expr::Cyc(a, _)
            | Expr::UCyc(a, _) => a.visit_leaves(f),
        }
    }

    /// Whether evaluation needs Pólya diagonals beyond the first.
    pub(crate) fn has_polya(&self) -> bool {
        match self {
            Expr::Var(_) | Expr::Const(_) => false,
            Expr::MSet(..) | Expr::UCyc(..) => true,
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) => a.has_polya() || b.has_polya(),
            Expr::Pow(a, _) | Expr::Seq(a, _) | Expr::Cyc(a, _) => a.has_polya(),
        }
    }

    /// Polynomial degree in the variables of `group`. Constructions reaching
    /// the group count as degree 2.
    pub(crate) fn degree_in(&self, group: &HashSet<VarId>) -> u32 {
        match self {
            Expr::Var(v) => u32::from(group.contains(&v.id())),
            Expr::Const(_) => 0,
            Expr::Add(a, b) | Expr::Sub(a, b) => a.degree_in(group).max(b.degree_in(group)),
            Expr::Mul(a, b) => a.degree_in(group) + b.degree_in(group),
            Expr::Pow(a, k) => a.degree_in(group).saturating_mul(*k),
            Expr::Seq(a, _) | Expr::MSet(a, _) | Expr::Cyc(a, _) | Expr::UCyc(a, _) => {
                if a.degree_in(group) > 0 {
                    2
                } else {
                    0
                }
            }
        }
    }
}

pub fn seq(e: impl Into<Expr>) -> Expr {
    seq_with(e, Constraint::Unrestricted)
}

pub fn seq_with(e: impl Into<Expr>, c: Constraint) -> Expr {
    Expr::Seq(Box::new(e.into()), c)
}

pub fn mset(e: impl Into<Expr>) -> Expr {
    mset_with(e, Constraint::Unrestricted)
}

pub fn mset_with(e: impl Into<Expr>, c: Constraint) -> Expr {
    Expr::MSet(Box::new(e.into()), c)
}

pub fn cyc(e: impl Into<Expr>) -> Expr {
    cyc_with(e, Constraint::Unrestricted)
}

pub fn cyc_with(e: impl Into<Expr>, c: Constraint) -> Expr {
    Expr::Cyc(Box::new(e.into()), c)
}

pub fn ucyc(e: impl Into<Expr>) -> Expr {
    ucyc_with(e, Constraint::Unrestricted)
}

pub fn ucyc_with(e: impl Into<Expr>, c: Constraint) -> Expr {
    Expr::UCyc(Box::new(e.into()), c)
}

pub fn pow(e: impl Into<Expr>, k: u32) -> Expr {
    e.into().pow(k)
}

impl From<&Variable> for Expr {
    fn from(v: &Variable) -> Self {
        Expr::var(v)
    }
}

impl From<Variable> for Expr {
    fn from(v: Variable) -> Self {
        Expr::Var(v)
    }
}

impl From<f64> for Expr {
    fn from(c: f64) -> Self {
        Expr::Const(c)
    }
}

impl From<i32> for Expr {
    fn from(c: i32) -> Self {
        Expr::Const(f64::from(c))
    }
}

macro_rules! expr_binop {
    ($trait:ident, $method:ident, $ctor:ident) => {
        impl<R: Into<Expr>> ops::$trait<R> for Expr {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                Expr::$ctor(self, rhs.into())
            }
        }

        impl<R: Into<Expr>> ops::$trait<R> for &Variable {
            type Output = Expr;
            fn $method(self, rhs: R) -> Expr {
                Expr::$ctor(Expr::var(self), rhs.into())
            }
        }

        impl ops::$trait<Expr> for f64 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::$ctor(Expr::Const(self), rhs)
            }
        }

        impl ops::$trait<&Variable> for f64 {
            type Output = Expr;
            fn $method(self, rhs: &Variable) -> Expr {
                Expr::$ctor(Expr::Const(self), Expr::var(rhs))
            }
        }

        impl ops::$trait<Expr> for i32 {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::$ctor(Expr::from(self), rhs)
            }
        }

        impl ops::$trait<&Variable> for i32 {
            type Output = Expr;
            fn $method(self, rhs: &Variable) -> Expr {
                Expr::$ctor(Expr::from(self), Expr::var(rhs))
            }
        }
    };
}

expr_binop!(Add, add, add);
expr_binop!(Sub, sub, sub);
expr_binop!(Mul, mul, mul);

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let construction = |f: &mut fmt::Formatter<'_>, name: &str, a: &Expr, c: &Constraint| {
            if c.is_unrestricted() {
                write!(f, "{}({})", name, a)
            } else {
                write!(f, "{}({}, {})", name, a, c)
            }
        };
        match self {
            Expr::Var(v) => write!(f, "{}", v),
            Expr::Const(c) => write!(f, "{}", c),
            Expr::Add(a, b) => write!(f, "({} + {})", a, b),
            Expr::Sub(a, b) => write!(f, "({} - {})", a, b),
            Expr::Mul(a, b) => write!(f, "({}*{})", a, b),
            Expr::Pow(a, k) => write!(f, "{}^{}", a, k),
            Expr::Seq(a, c) => construction(f, "Seq", a, c),
            Expr::MSet(a, c) => construction(f, "MSet", a, c),
            Expr::Cyc(a, c) => construction(f, "Cyc", a, c),
            Expr::UCyc(a, c) => construction(f, "UCyc", a, c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::leq;

    #[test]
    fn related_is_reflexive() {
        let x = Variable::new();
        let y = Variable::new();
        let exprs = vec![
            Expr::from(&x),
            &x * &y,
            seq(&x + 1.0),
            mset_with(&x * &y, leq(3)) - 2.0 * &y,
        ];
        for e in &exprs {
            assert!(e.related(e));
        }
    }

    #[test]
    fn related_ignores_order_but_not_leaf_sets() {
        let x = Variable::new();
        let y = Variable::new();
        let z = Variable::new();
        assert!((&x * &y).related(&(&y * &x)));
        assert!((&x + seq(&y)).related(&ucyc(&y * &x)));
        assert!(!(&x * &y * &z).related(&(&y * &x)));
        assert!(!Expr::from(&x).related(&Expr::from(&y)));
    }

    #[test]
    fn variables_are_unique_in_first_occurrence_order() {
        let z = Variable::new();
        let b = Variable::new();
        let e = 1 + &z * Expr::from(&b).pow(2) + &z;
        assert_eq!(e.variables(), vec![z.clone(), b.clone()]);
        assert!(Expr::constant(3.0).variables().is_empty());
    }

    #[test]
    fn degree_tracks_nonlinear_self_reference() {
        let z = Variable::new();
        let b = Variable::new();
        let group: HashSet<VarId> = [b.id()].into_iter().collect();
        assert_eq!((1 + &z * pow(&b, 2)).degree_in(&group), 2);
        assert_eq!((&z + &z * &b).degree_in(&group), 1);
        assert_eq!(seq(&z * &b).degree_in(&group), 2);
        assert_eq!(seq(&z).degree_in(&group), 0);
    }

    #[test]
    fn polya_detection() {
        let z = Variable::new();
        assert!(!seq(cyc(&z)).has_polya());
        assert!((1.0 + seq(mset(&z))).has_polya());
        assert!(ucyc(&z).has_polya());
    }

    #[test]
    fn display() {
        let z = Variable::new();
        let m = Variable::new();
        let e = &z * seq_with(&m, leq(2));
        assert_eq!(e.to_string(), format!("({}*Seq({}, <= 2))", z, m));
        assert_eq!(pow(&m, 3).to_string(), format!("{}^3", m));
    }
}
