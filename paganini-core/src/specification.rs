use std::collections::{HashMap, HashSet};
use std::fmt;

use nalgebra::DVector;
use tracing::{debug, info};

use crate::error::{ConfigError, EvalError, TuneError};
use crate::eval::Valuation;
use crate::expr::Expr;
use crate::graph::DependencyGraph;
use crate::params::{Params, Type};
use crate::system::{Solution, System};
use crate::variable::{VarId, Variable};
use crate::{mean, singular};

/// System of equations `class = expression`, possibly mutually recursive.
#[derive(Clone, Debug, Default)]
pub struct Specification {
    equations: Vec<(Variable, Expr)>,
    index: HashMap<VarId, usize>,
}

impl Specification {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same as [`Variable::new`]. Variables are not owned by a specification;
    /// one joins it once it occurs in an added equation.
    pub fn variable(&self) -> Variable {
        Variable::new()
    }

    /// Same as [`Variable::with_target`].
    pub fn variable_with_target(&self, target: f64) -> Variable {
        Variable::with_target(target)
    }

    /// Registers the defining equation of `var`.
    pub fn add(&mut self, var: &Variable, expr: impl Into<Expr>) -> Result<(), ConfigError> {
        if self.index.contains_key(&var.id()) {
            return Err(ConfigError::DuplicateEquation(var.id()));
        }
        let expr = expr.into();
        if matches!(&expr, Expr::Var(v) if v == var) {
            return Err(ConfigError::SelfDefinition(var.id()));
        }
        self.index.insert(var.id(), self.equations.len());
        self.equations.push((var.clone(), expr));
        Ok(())
    }

    pub fn equations(&self) -> impl Iterator<Item = (&Variable, &Expr)> {
        self.equations.iter().map(|(v, e)| (v, e))
    }

    pub fn equation(&self, var: &Variable) -> Option<&Expr> {
        self.index.get(&var.id()).map(|&i| &self.equations[i].1)
    }

    pub fn len(&self) -> usize {
        self.equations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.equations.is_empty()
    }

    pub fn is_class(&self, var: &Variable) -> bool {
        self.index.contains_key(&var.id())
    }

    pub fn classes(&self) -> Vec<Variable> {
        self.equations.iter().map(|(v, _)| v.clone()).collect()
    }

    /// Variables used on right-hand sides without an equation of their own.
    pub fn parameters(&self) -> Vec<Variable> {
        let mut seen = HashSet::new();
        self.equations
            .iter()
            .flat_map(|(_, e)| e.variables())
            .filter(|v| !self.is_class(v) && seen.insert(v.id()))
            .collect()
    }

    /// Edges follow the order of `classes()`.
    pub fn dependency_graph(&self) -> DependencyGraph {
        let adjacency = self
            .equations
            .iter()
            .map(|(_, e)| {
                let mut succ: Vec<usize> = e
                    .variables()
                    .iter()
                    .filter_map(|v| self.index.get(&v.id()).copied())
                    .collect();
                succ.sort_unstable();
                succ
            })
            .collect();
        DependencyGraph::new(adjacency)
    }

    /// `Algebraic` when some class depends nonlinearly on a member of its
    /// own recursive component (a power, a product of two members, or a
    /// construction around one), `Rational` otherwise.
    pub fn infer_type(&self) -> Type {
        let graph = self.dependency_graph();
        for component in graph.recursive_components() {
            let group: HashSet<VarId> = component
                .iter()
                .map(|&j| self.equations[j].0.id())
                .collect();
            if component
                .iter()
                .any(|&j| self.equations[j].1.degree_in(&group) >= 2)
            {
                return Type::Algebraic;
            }
        }
        Type::Rational
    }

    fn compile(&self, params: Option<&Params>) -> System {
        let config = params.cloned().unwrap_or_default();
        let sys_type = config.sys_type.unwrap_or_else(|| self.infer_type());
        let system = System::new(&self.equations, sys_type, &config);
        debug!(
            ?sys_type,
            equations = self.len(),
            truncation = system.truncation(),
            "compiling specification"
        );
        system
    }

    /// Tunes `z` to the dominant singularity. Parameters other than `z`
    /// carrying a target are tuned jointly to that frequency; the remaining
    /// ones are fixed at 1. On failure every variable of the specification
    /// is left unset.
    pub fn run_singular_tuner(&self, z: &Variable, params: Option<&Params>) -> Result<(), TuneError> {
        if self.is_class(z) {
            return Err(ConfigError::NotAParameter(z.id()).into());
        }
        let system = self.compile(params);
        let zi = system
            .param_position(z)
            .ok_or(ConfigError::UnknownVariable(z.id()))?;
        let marks: Vec<(usize, f64)> = system
            .params()
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != zi)
            .filter_map(|(i, v)| v.target().map(|t| (i, t)))
            .collect();
        let result = singular::tune(&system, zi, &marks);
        self.finish(&system, result)
    }

    /// Tunes every parameter carrying a target so that its expectation in
    /// the Boltzmann model of `class` matches. Untargeted parameters are
    /// fixed at 1.
    pub fn run_tuner(&self, class: &Variable, params: Option<&Params>) -> Result<(), TuneError> {
        let system = self.compile(params);
        let ci = self.class_index(&system, class)?;
        let targets: Vec<(usize, f64)> = system
            .params()
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.target().map(|t| (i, t)))
            .collect();
        let result = mean::tune(&system, ci, &targets);
        self.finish(&system, result)
    }

    /// Expected count of each parameter in the Boltzmann model of `class`,
    /// read at the current variable values.
    pub fn expectations(
        &self,
        class: &Variable,
        params: Option<&Params>,
    ) -> Result<Vec<(Variable, f64)>, TuneError> {
        let system = self.compile(params);
        let ci = self.class_index(&system, class)?;
        let p = current(system.params())?;
        let y = current(system.classes())?;
        let values = mean::expectations(&system, &p, &DVector::from_vec(y), ci)?;
        Ok(system.params().iter().cloned().zip(values).collect())
    }

    /// Current values of every variable as an explicit assignment. Classes
    /// on the Pólya diagonals above the first are solved from the current
    /// parameter values, so constructions evaluate as in the tuners.
    pub fn valuation(&self, params: Option<&Params>) -> Result<Valuation, TuneError> {
        let system = self.compile(params);
        let p = current(system.params())?;
        let y = current(system.classes())?;
        let mut val = Valuation::from_variables(system.params()).with_truncation(system.truncation());
        for (v, &x) in system.classes().iter().zip(&y) {
            val.assign_class(v, 1, x);
        }
        let levels = system.solve(&p, false, 2)?;
        for level in 2..=system.truncation() {
            if let Some(values) = levels.value(level) {
                for (v, &x) in system.classes().iter().zip(values.iter()) {
                    val.assign_class(v, level, x);
                }
            }
        }
        Ok(val)
    }

    fn class_index(&self, system: &System, class: &Variable) -> Result<usize, ConfigError> {
        system.class_position(class).ok_or_else(|| {
            if self.parameters().contains(class) {
                ConfigError::NotAClass(class.id())
            } else {
                ConfigError::UnknownVariable(class.id())
            }
        })
    }

    fn finish(&self, system: &System, result: Result<Solution, TuneError>) -> Result<(), TuneError> {
        let solution = result.and_then(|s| {
            s.validate(system)?;
            Ok(s)
        });
        match solution {
            Ok(s) => {
                for (v, &x) in system.params().iter().zip(&s.params) {
                    v.set_value(Some(x));
                }
                for (v, &x) in system.classes().iter().zip(s.classes.iter()) {
                    v.set_value(Some(x));
                }
                info!(params = system.params().len(), classes = system.classes().len(), "tuning succeeded");
                Ok(())
            }
            Err(err) => {
                for v in system.params().iter().chain(system.classes()) {
                    v.set_value(None);
                }
                debug!(%err, "tuning failed, values reset");
                Err(err)
            }
        }
    }
}

fn current(vars: &[Variable]) -> Result<Vec<f64>, EvalError> {
    vars.iter()
        .map(|v| v.value().ok_or(EvalError::Unassigned(v.id())))
        .collect()
}

impl fmt::Display for Specification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (v, e) in &self.equations {
            writeln!(f, "{} = {}", v, e)?;
        }
        Ok(())
    }
}
