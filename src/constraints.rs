//! Constraints over type variables.

use itertools::Itertools;

/// A type variable: a dense integer naming either the unknown type of one IR
/// value or a literal lattice element minted by the generator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct TypeVariable(pub usize);

/// A constraint over type variables. Binary constraints carry exactly two
/// variables; combinator constraints own their children. Lattice types are
/// never inlined here: a literal bound is expressed through a variable
/// pre-bound to that literal.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Constraint {
    /// The classes of `left` and `right` must be unified.
    IsEqual {
        left: TypeVariable,
        right: TypeVariable,
    },
    /// `left`'s type is a specialization of `right`'s (adds information:
    /// larger bit count, deeper category).
    Specializes {
        left: TypeVariable,
        right: TypeVariable,
    },
    /// `left`'s type is a generalization of `right`'s (takes information
    /// away: smaller bit count).
    Generalizes {
        left: TypeVariable,
        right: TypeVariable,
    },
    /// All children must hold simultaneously.
    Conjunction(Vec<Constraint>),
    /// At least one child must hold.
    Disjunction(Vec<Constraint>),
}

impl Constraint {
    /// The processing order of the solver: unifications first, then atomic
    /// inequalities, then case analysis.
    pub fn kind_order(&self) -> u8 {
        match self {
            Constraint::IsEqual { .. } => 0,
            Constraint::Specializes { .. } => 1,
            Constraint::Generalizes { .. } => 2,
            Constraint::Conjunction(_) => 3,
            Constraint::Disjunction(_) => 4,
        }
    }
}

impl std::fmt::Display for Constraint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Constraint::IsEqual { left, right } => write!(f, "<{}> = <{}>", left.0, right.0),
            Constraint::Specializes { left, right } => write!(f, "<{}> : <{}>", left.0, right.0),
            Constraint::Generalizes { left, right } => write!(f, "<{}> ! <{}>", left.0, right.0),
            Constraint::Conjunction(children) => {
                write!(
                    f,
                    "({})",
                    children.iter().map(|c| format!("({})", c)).join(" & ")
                )
            }
            Constraint::Disjunction(children) => {
                write!(
                    f,
                    "({})",
                    children.iter().map(|c| format!("({})", c)).join(" | ")
                )
            }
        }
    }
}
