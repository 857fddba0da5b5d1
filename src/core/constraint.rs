//! Version constraints.
//!
//! A constraint is a conjunction of `(op, version)` clauses. Supported ops:
//! `=`, `!=`, `<`, `<=`, `>`, `>=`, the pessimistic `~>`, and `^`
//! (compatible-with). `~>1.2.3` allows `>=1.2.3, <1.3`; `^1.2` allows
//! `>=1.2, <2`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::version::{Version, VersionError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConstraintError {
    #[error("invalid constraint clause {0:?}")]
    InvalidClause(String),

    #[error("invalid version in constraint: {0}")]
    Version(#[from] VersionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `~>` - raises the last written component.
    Pessimistic,
    /// `^` - fixes the leading component.
    Compatible,
}

impl Op {
    fn symbol(self) -> &'static str {
        match self {
            Op::Eq => "=",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::Pessimistic => "~>",
            Op::Compatible => "^",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Clause {
    pub op: Op,
    pub version: Version,
}

impl Clause {
    pub fn matches(&self, candidate: &Version) -> bool {
        match self.op {
            Op::Eq => candidate == &self.version,
            Op::Ne => candidate != &self.version,
            Op::Lt => candidate < &self.version,
            Op::Le => candidate <= &self.version,
            Op::Gt => candidate > &self.version,
            Op::Ge => candidate >= &self.version,
            Op::Pessimistic => {
                let upper = pessimistic_upper(&self.version);
                candidate >= &self.version && candidate < &upper
            }
            Op::Compatible => {
                let upper = self.version.bumped(0);
                candidate >= &self.version && candidate < &upper
            }
        }
    }

    /// Lower bound implied by this clause, with inclusivity.
    fn lower_bound(&self) -> Option<(&Version, bool)> {
        match self.op {
            Op::Eq | Op::Ge | Op::Pessimistic | Op::Compatible => Some((&self.version, true)),
            Op::Gt => Some((&self.version, false)),
            _ => None,
        }
    }

    /// Upper bound implied by this clause, with inclusivity.
    fn upper_bound(&self) -> Option<(Version, bool)> {
        match self.op {
            Op::Eq | Op::Le => Some((self.version.clone(), true)),
            Op::Lt => Some((self.version.clone(), false)),
            Op::Pessimistic => Some((pessimistic_upper(&self.version), false)),
            Op::Compatible => Some((self.version.bumped(0), false)),
            _ => None,
        }
    }
}

/// `~>1.2.3` caps below `1.3`; a single-component `~>2` caps below `3`.
fn pessimistic_upper(v: &Version) -> Version {
    let idx = v.precision().saturating_sub(2);
    v.bumped(idx)
}

/// A conjunction of clauses. The empty constraint matches every version.
///
/// Equality is structural over the clause list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Constraint {
    clauses: Vec<Clause>,
}

impl Constraint {
    /// The unconstrained predicate.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn exact(version: Version) -> Self {
        Self {
            clauses: vec![Clause {
                op: Op::Eq,
                version,
            }],
        }
    }

    pub fn is_any(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    /// Parse a comma-separated clause list, e.g. `>=1.2, <2.0` or `~>1.4`.
    /// A bare version means `=`.
    pub fn parse(s: &str) -> Result<Self, ConstraintError> {
        let s = s.trim();
        if s.is_empty() || s == "*" {
            return Ok(Self::any());
        }

        let mut clauses = Vec::new();
        for raw in s.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(ConstraintError::InvalidClause(s.to_string()));
            }
            clauses.push(parse_clause(raw)?);
        }
        Ok(Self { clauses })
    }

    pub fn matches(&self, candidate: &Version) -> bool {
        self.clauses.iter().all(|c| c.matches(candidate))
    }

    /// Conjunction of two constraints; duplicate clauses collapse.
    pub fn intersect(&self, other: &Constraint) -> Constraint {
        let mut clauses = self.clauses.clone();
        for clause in &other.clauses {
            if !clauses.contains(clause) {
                clauses.push(clause.clone());
            }
        }
        Constraint { clauses }
    }

    /// Cheap contradiction check over the implied bounds. A `false` result
    /// does not prove satisfiability; candidate scanning has the last word.
    pub fn is_contradictory(&self) -> bool {
        let mut lower: Option<(Version, bool)> = None;
        let mut upper: Option<(Version, bool)> = None;

        for clause in &self.clauses {
            if let Some((v, incl)) = clause.lower_bound() {
                let replace = match &lower {
                    Some((cur, cur_incl)) => v > cur || (v == cur && !incl && *cur_incl),
                    None => true,
                };
                if replace {
                    lower = Some((v.clone(), incl));
                }
            }
            if let Some((v, incl)) = clause.upper_bound() {
                let replace = match &upper {
                    Some((cur, cur_incl)) => &v < cur || (&v == cur && !incl && *cur_incl),
                    None => true,
                };
                if replace {
                    upper = Some((v, incl));
                }
            }
        }

        match (lower, upper) {
            (Some((lo, lo_incl)), Some((hi, hi_incl))) => {
                lo > hi || (lo == hi && !(lo_incl && hi_incl))
            }
            _ => false,
        }
    }
}

fn parse_clause(raw: &str) -> Result<Clause, ConstraintError> {
    // Two-character ops first so `<=` never parses as `<` + garbage.
    let ops: &[(&str, Op)] = &[
        ("<=", Op::Le),
        (">=", Op::Ge),
        ("!=", Op::Ne),
        ("~>", Op::Pessimistic),
        ("==", Op::Eq),
        ("^", Op::Compatible),
        ("<", Op::Lt),
        (">", Op::Gt),
        ("=", Op::Eq),
    ];

    for (symbol, op) in ops {
        if let Some(rest) = raw.strip_prefix(symbol) {
            let version = Version::parse(rest.trim())?;
            return Ok(Clause { op: *op, version });
        }
    }

    // Bare version: exact match.
    if raw.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        let version = Version::parse(raw)?;
        return Ok(Clause {
            op: Op::Eq,
            version,
        });
    }

    Err(ConstraintError::InvalidClause(raw.to_string()))
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return write!(f, "*");
        }
        let rendered = self
            .clauses
            .iter()
            .map(|c| format!("{}{}", c.op.symbol(), c.version))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{rendered}")
    }
}

impl FromStr for Constraint {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Constraint {
    type Error = ConstraintError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Constraint> for String {
    fn from(c: Constraint) -> Self {
        c.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn c(s: &str) -> Constraint {
        Constraint::parse(s).unwrap()
    }

    #[test]
    fn test_simple_ops() {
        assert!(c(">=1.2").matches(&v("1.2")));
        assert!(c(">=1.2").matches(&v("1.3")));
        assert!(!c(">=1.2").matches(&v("1.1.9")));
        assert!(c("!=1.5").matches(&v("1.4")));
        assert!(!c("!=1.5").matches(&v("1.5")));
        assert!(c("1.7.1").matches(&v("1.7.1")));
        assert!(!c("<1.0").matches(&v("1.0")));
    }

    #[test]
    fn test_conjunction() {
        let range = c(">=1.2, <2.0");
        assert!(range.matches(&v("1.2")));
        assert!(range.matches(&v("1.9.9")));
        assert!(!range.matches(&v("2.0")));
        assert!(!range.matches(&v("1.1")));
    }

    #[test]
    fn test_pessimistic() {
        let tilde = c("~>1.2.3");
        assert!(tilde.matches(&v("1.2.3")));
        assert!(tilde.matches(&v("1.2.9")));
        assert!(!tilde.matches(&v("1.3.0")));

        let coarse = c("~>1.2");
        assert!(coarse.matches(&v("1.9")));
        assert!(!coarse.matches(&v("2.0")));
    }

    #[test]
    fn test_compatible() {
        let caret = c("^1.2");
        assert!(caret.matches(&v("1.2")));
        assert!(caret.matches(&v("1.99")));
        assert!(!caret.matches(&v("2.0")));
        assert!(!caret.matches(&v("1.1")));
    }

    #[test]
    fn test_structural_equality() {
        assert_eq!(c(">=1.2, <2"), c(">=1.2, <2"));
        assert_ne!(c(">=1.2"), c(">1.2"));
        // Structural, not semantic: clause order matters.
        assert_ne!(c(">=1.2, <2"), c("<2, >=1.2"));
    }

    #[test]
    fn test_intersect_and_contradiction() {
        let merged = c(">=1.2").intersect(&c("<2"));
        assert!(merged.matches(&v("1.5")));
        assert!(!merged.is_contradictory());

        let conflict = c("<2").intersect(&c(">=2"));
        assert!(conflict.is_contradictory());

        let pinned = c("=1.4").intersect(&c(">=1.2"));
        assert!(!pinned.is_contradictory());
        assert!(pinned.matches(&v("1.4")));
    }

    #[test]
    fn test_any() {
        assert!(Constraint::any().matches(&v("0.0.1")));
        assert_eq!(Constraint::any().to_string(), "*");
        assert_eq!(c("*"), Constraint::any());
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Constraint::parse("carrot").is_err());
        assert!(Constraint::parse(">=,<2").is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let range = c(">=1.2, <2.0");
        assert_eq!(Constraint::parse(&range.to_string()).unwrap(), range);
    }
}
