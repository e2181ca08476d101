//! Compiles rule address expressions into disjoint, ordered range lists.
//!
//! A rule names the addresses it applies to with an expression such as
//! `[10.0.0.0/8, !10.1.0.0/16, 192.168.1.1-192.168.1.9]`. This crate
//! parses such expressions, resolves negation, and folds any number of
//! them into an [`AddressSet`]: per address family, a sorted sequence of
//! pairwise-disjoint ranges, each annotated with the ids of the rules
//! whose expressions cover it. A containment lookup against the compiled
//! set then yields the candidate rules for a packet address in one step.

use thiserror::Error;

mod expr;
mod range;
mod rules;
mod set;

pub use range::{AddrRange, RangeRelation};
pub use rules::RuleSet;
pub use set::{AddressNode, AddressSet};

/// Errors raised while parsing or compiling an address expression.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    /// An element was not a recognizable host, network or range.
    #[error("malformed address '{0}'")]
    MalformedAddress(String),
    /// A network prefix was not numeric or exceeded the family width.
    #[error("invalid network prefix in '{0}'")]
    InvalidPrefix(String),
    /// The lower bound of a range is above its upper bound.
    #[error("address range '{0}' is reversed")]
    ReversedRange(String),
    /// Brackets in the expression do not pair up.
    #[error("unbalanced brackets in '{0}'")]
    UnbalancedBrackets(String),
    /// An expression element was empty.
    #[error("empty address expression element")]
    EmptyElement,
    /// Two ranges of different address families were compared.
    #[error("cannot compare address ranges of different families")]
    FamilyMismatch,
}
