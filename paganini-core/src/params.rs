/// Solver family used by the fixed-point oracle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Type {
    /// Direct substitution from zero.
    Rational,
    /// Newton iteration from zero with a monotonicity check.
    Algebraic,
}

pub const DEFAULT_MAX_ITERS: usize = 1000;
pub const DEFAULT_TOLERANCE: f64 = 1e-12;
pub const DEFAULT_TRUNCATION: u32 = 20;

/// Tuner configuration. `sys_type: None` lets the specification infer the
/// solver family.
#[derive(Clone, Debug, PartialEq)]
pub struct Params {
    pub sys_type: Option<Type>,
    pub max_iters: usize,
    pub tolerance: f64,
    /// Number of Pólya diagonals kept for multisets and unlabelled cycles.
    pub truncation: u32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            sys_type: None,
            max_iters: DEFAULT_MAX_ITERS,
            tolerance: DEFAULT_TOLERANCE,
            truncation: DEFAULT_TRUNCATION,
        }
    }
}

impl Params {
    pub fn new(sys_type: Type) -> Self {
        Self {
            sys_type: Some(sys_type),
            ..Self::default()
        }
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_truncation(mut self, truncation: u32) -> Self {
        self.truncation = truncation.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let p = Params::default();
        assert_eq!(p.sys_type, None);
        assert_eq!(p.max_iters, 1000);
        assert_eq!(p.tolerance, 1e-12);
        assert_eq!(p.truncation, 20);
    }

    #[test]
    fn builder_and_public_max_iters() {
        let mut p = Params::new(Type::Rational).with_tolerance(1e-9).with_truncation(0);
        p.max_iters = 8000;
        assert_eq!(p.sys_type, Some(Type::Rational));
        assert_eq!(p.max_iters, 8000);
        assert_eq!(p.tolerance, 1e-9);
        assert_eq!(p.truncation, 1);
        assert_eq!(Params::new(Type::Algebraic).with_max_iters(50).max_iters, 50);
    }
}
