// Symbolic layer: variables, constructions and specifications
pub mod constraint;
pub mod expr;
pub mod partitions;
pub mod specification;
pub mod variable;

// Numeric layer: evaluation, oracle and tuners
pub mod error;
pub mod eval;
pub mod graph;
mod kkt;
pub mod linear_system;
mod mean;
pub mod params;
mod singular;
mod system;

// Public symbolic API
pub use crate::constraint::{eq, geq, leq, Constraint};
pub use crate::expr::{cyc, cyc_with, mset, mset_with, pow, seq, seq_with, ucyc, ucyc_with, Expr};
pub use crate::partitions::{count, partition_sequences, totient, Partitions};
pub use crate::specification::Specification;
pub use crate::variable::{VarId, Variable};

// Public numeric API
pub use crate::error::{ConfigError, ConvergenceError, EvalError, TuneError};
pub use crate::eval::{Assignment, Dual, Valuation};
pub use crate::graph::DependencyGraph;
pub use crate::linear_system::LinearSystem;
pub use crate::params::{Params, Type, DEFAULT_MAX_ITERS, DEFAULT_TOLERANCE, DEFAULT_TRUNCATION};
