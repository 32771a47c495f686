use thiserror::Error;

use crate::variable::VarId;

/// Malformed specification or tuner request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{0} already has a defining equation")]
    DuplicateEquation(VarId),
    #[error("{0} cannot be defined as itself")]
    SelfDefinition(VarId),
    #[error("{0} is a class variable, expected a parameter")]
    NotAParameter(VarId),
    #[error("{0} is a parameter, expected a class variable")]
    NotAClass(VarId),
    #[error("{0} does not occur in the specification")]
    UnknownVariable(VarId),
    #[error("no parameter carries a target expectation")]
    NoTargets,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("{0} has no assigned value")]
    Unassigned(VarId),
    #[error("{construction} diverges at argument {argument}")]
    Divergent {
        construction: &'static str,
        argument: f64,
    },
    #[error("evaluation produced a non-finite value")]
    NonFinite,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConvergenceError {
    #[error("no convergence within {0} iterations")]
    IterationLimit(usize),
    #[error("no feasible starting point")]
    InfeasibleStart,
    #[error("system stays feasible for every tested value of {0}")]
    NoSingularity(VarId),
    #[error("iterate left the admissible domain")]
    Diverged,
    #[error("tuned value {value} of {var} is not a positive finite number")]
    InvalidResult { var: VarId, value: f64 },
    #[error("linear system is singular")]
    SingularSystem,
    #[error("continuation stalled at {progress:.3e}")]
    Stalled { progress: f64 },
}

/// Error returned by the tuner entry points.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TuneError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Convergence(#[from] ConvergenceError),
}
