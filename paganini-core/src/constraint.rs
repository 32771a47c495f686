use std::fmt;

/// Cardinalities admitted by a bounded construction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Constraint {
    #[default]
    Unrestricted,
    Eq(u32),
    Leq(u32),
    Geq(u32),
}

pub fn eq(k: u32) -> Constraint {
    Constraint::Eq(k)
}

pub fn leq(k: u32) -> Constraint {
    Constraint::Leq(k)
}

pub fn geq(k: u32) -> Constraint {
    Constraint::Geq(k)
}

impl Constraint {
    pub fn admits(&self, n: u32) -> bool {
        match *self {
            Constraint::Unrestricted => true,
            Constraint::Eq(k) => n == k,
            Constraint::Leq(k) => n <= k,
            Constraint::Geq(k) => n >= k,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Constraint::Unrestricted)
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Unrestricted => Ok(()),
            Constraint::Eq(k) => write!(f, "= {}", k),
            Constraint::Leq(k) => write!(f, "<= {}", k),
            Constraint::Geq(k) => write!(f, ">= {}", k),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_matches_relation() {
        assert!(eq(3).admits(3));
        assert!(!eq(3).admits(2));
        assert!(leq(2).admits(0) && leq(2).admits(2) && !leq(2).admits(3));
        assert!(geq(2).admits(7) && !geq(2).admits(1));
        assert!(Constraint::default().admits(12345));
    }

    #[test]
    fn display() {
        assert_eq!(eq(4).to_string(), "= 4");
        assert_eq!(leq(2).to_string(), "<= 2");
        assert_eq!(geq(1).to_string(), ">= 1");
        assert_eq!(Constraint::Unrestricted.to_string(), "");
    }
}
