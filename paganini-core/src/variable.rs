use std::cell::Cell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

/// Process-unique identity of a [`Variable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(usize);

impl VarId {
    fn fresh() -> Self {
        VarId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug)]
struct Inner {
    id: VarId,
    target: Option<f64>,
    value: Cell<Option<f64>>,
}

/// Handle to a parameter or class variable.
///
/// Clones share identity: two handles compare equal iff they were cloned
/// from the same `Variable::new` call. The resolved value is written only
/// by the tuners.
#[derive(Clone, Debug)]
pub struct Variable(Rc<Inner>);

impl Variable {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A variable carrying a requested expectation (mean tuning) or
    /// frequency (marks during singular tuning).
    pub fn with_target(target: f64) -> Self {
        Self::build(Some(target))
    }

    fn build(target: Option<f64>) -> Self {
        Variable(Rc::new(Inner {
            id: VarId::fresh(),
            target,
            value: Cell::new(None),
        }))
    }

    pub fn id(&self) -> VarId {
        self.0.id
    }

    pub fn target(&self) -> Option<f64> {
        self.0.target
    }

    pub fn value(&self) -> Option<f64> {
        self.0.value.get()
    }

    pub fn is_set(&self) -> bool {
        self.value().is_some()
    }

    pub(crate) fn set_value(&self, value: Option<f64>) {
        self.0.value.set(value);
    }
}

impl Default for Variable {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Variable {}

impl Hash for Variable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}
