//! # Query Terms
//!
//! Systems declare what they access as a list of [`Term`]s. A term names an
//! [`Id`], how it is accessed ([`InOutKind`]), where it is read from
//! ([`TermSource`]) and how it combines with the other terms ([`TermOper`]).
//!
//! ## Purpose
//! Terms serve two consumers:
//! - the store, which matches `This` terms against table types to find the
//!   entities a system iterates,
//! - the pipeline builder, which reads the access modes to decide where merges
//!   are required.
//!
//! ## Design
//! [`QueryBuilder`] offers a fluent way to assemble terms from component ids;
//! [`Query`] is the immutable result attached to a system.

use crate::engine::types::Id;


/// Declared access mode of a term.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum InOutKind {
    /// Resolved from the source: owned terms read and write, shared terms read.
    #[default]
    Default,
    /// Read only.
    In,
    /// Write only.
    Out,
    /// Read and write.
    InOut,
    /// Not accessed.
    None,
    /// Only used for matching.
    Filter,
}

/// Where a term's id is looked up.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TermSource {
    /// The entity being iterated.
    #[default]
    This,
    /// Inherited from a parent or prefab of the iterated entity.
    Up,
    /// No entity; the term only declares intent.
    Nothing,
}

/// How a term combines with the others.

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TermOper {
    /// The id must be present.
    #[default]
    And,
    /// The id must be absent.
    Not,
    /// At least one of the adjacent `Or` terms must be present.
    Or,
    /// The id may be present.
    Optional,
}

/// One declared access of a system.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Term {
    /// Matched id (may be a wildcard pattern).
    pub id: Id,
    /// Access mode.
    pub inout: InOutKind,
    /// Source.
    pub src: TermSource,
    /// Operator.
    pub oper: TermOper,
}

impl Term {
    /// Creates an `And` term on `This` with default access.
    pub fn new(id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            inout: InOutKind::Default,
            src: TermSource::This,
            oper: TermOper::And,
        }
    }

    /// Sets the access mode.
    pub fn inout(mut self, inout: InOutKind) -> Self { self.inout = inout; self }
    /// Sets the source.
    pub fn src(mut self, src: TermSource) -> Self { self.src = src; self }
    /// Sets the operator.
    pub fn oper(mut self, oper: TermOper) -> Self { self.oper = oper; self }

    /// Returns `true` if the term is evaluated on the iterated entity.
    #[inline]
    pub fn matches_this(&self) -> bool { self.src == TermSource::This }

    /// Returns `true` if the term has no source entity.
    #[inline]
    pub fn matches_nothing(&self) -> bool { self.src == TermSource::Nothing }
}

/// Fluent builder for a system's terms.
///
/// ## Example
/// ```ignore
/// let query = QueryBuilder::new()
///     .read(position)
///     .write(velocity)
///     .without(frozen)
///     .build();
/// ```

#[derive(Clone, Debug, Default)]
pub struct QueryBuilder {
    terms: Vec<Term>,
}

impl QueryBuilder {
    /// Creates a new, empty query builder.
    pub fn new() -> Self { Self::default() }

    /// Declares a read-only dependency on `id`.
    pub fn read(self, id: impl Into<Id>) -> Self {
        self.term(Term::new(id).inout(InOutKind::In))
    }

    /// Declares a mutable dependency on `id`.
    pub fn write(self, id: impl Into<Id>) -> Self {
        self.term(Term::new(id).inout(InOutKind::InOut))
    }

    /// Requires `id` without accessing it.
    pub fn with(self, id: impl Into<Id>) -> Self {
        self.term(Term::new(id).inout(InOutKind::Filter))
    }

    /// Excludes tables containing `id`.
    pub fn without(self, id: impl Into<Id>) -> Self {
        self.term(Term::new(id).inout(InOutKind::None).oper(TermOper::Not))
    }

    /// Declares that the system adds `id` to entities through commands.
    ///
    /// ## Semantics
    /// Recorded as a write with no source, so later readers of `id` see the
    /// change only after a merge.

    pub fn adds(self, id: impl Into<Id>) -> Self {
        self.term(Term::new(id).inout(InOutKind::Out).src(TermSource::Nothing))
    }

    /// Declares that the system reads `id` from some entity other than the
    /// iterated one.

    pub fn reads_any(self, id: impl Into<Id>) -> Self {
        self.term(Term::new(id).inout(InOutKind::In).src(TermSource::Nothing))
    }

    /// Appends a raw term.
    pub fn term(mut self, term: Term) -> Self {
        self.terms.push(term);
        self
    }

    /// Finishes the query.
    pub fn build(self) -> Query {
        Query { terms: self.terms }
    }
}

/// Immutable list of terms attached to a system.

#[derive(Clone, Debug, Default)]
pub struct Query {
    terms: Vec<Term>,
}

impl Query {
    /// Creates a query from terms.
    pub fn new(terms: Vec<Term>) -> Self { Self { terms } }

    /// Terms in declaration order.
    #[inline]
    pub fn terms(&self) -> &[Term] { &self.terms }

    /// Returns `true` if any term is evaluated on the iterated entity.
    pub fn has_this_terms(&self) -> bool {
        self.terms.iter().any(|term| term.matches_this())
    }

    /// Ids of `This` terms an entity must have.
    pub fn required_ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.terms.iter()
            .filter(|term| term.matches_this() && term.oper == TermOper::And)
            .map(|term| term.id)
    }

    /// Returns `true` if a table with type `ty` satisfies every `This` term.
    ///
    /// ## Semantics
    /// - `And` ids must match some id of the type.
    /// - `Not` ids must match none.
    /// - Among `Or` terms at least one must match.
    /// - `Optional` terms never reject.

    pub fn matches_type(&self, has: impl Fn(Id) -> bool) -> bool {
        let mut or_seen = false;
        let mut or_hit = false;
        for term in self.terms.iter().filter(|term| term.matches_this()) {
            match term.oper {
                TermOper::And => if !has(term.id) { return false; },
                TermOper::Not => if has(term.id) { return false; },
                TermOper::Or => {
                    or_seen = true;
                    or_hit |= has(term.id);
                }
                TermOper::Optional => {}
            }
        }
        !or_seen || or_hit
    }
}

impl From<Vec<Term>> for Query {
    fn from(terms: Vec<Term>) -> Self { Query::new(terms) }
}

impl From<QueryBuilder> for Query {
    fn from(builder: QueryBuilder) -> Self { builder.build() }
}
