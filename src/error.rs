use crate::types::{FeatVar, FsId, TermKind};

/// The witness for a cyclic-term failure: the variable or co-indexation tag
/// that would have been bound into itself, or the recursion limit that fired
/// before a witness could be named.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cycle {
  Var(FeatVar),
  Tag(FsId),
  Depth(u32),
}

/// Why a unification episode failed. All variants are recoverable: the caller
/// treats failure as "this combination does not apply" and tries another one.
/// A failed episode carries no partial result; its substitution and episode
/// state are discarded whole.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnifyFailure {
  /// The two types' lattice intersection is empty.
  IncompatibleTypes(Box<str>, Box<str>),
  /// Binding a variable to a term that (transitively) contains it, or a
  /// co-indexation tag resolving through itself.
  OccursCheck(Cycle),
  /// Structurally incompatible term kinds, including unequal opaque semantic
  /// payloads and variables appearing under an [`EmptySubst`].
  ///
  /// [`EmptySubst`]: crate::subst::EmptySubst
  ShapeMismatch(TermKind, TermKind),
}

impl std::fmt::Display for UnifyFailure {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      UnifyFailure::IncompatibleTypes(t1, t2) => write!(f, "incompatible types '{t1}' and '{t2}'"),
      UnifyFailure::OccursCheck(Cycle::Var(v)) => write!(f, "occurs check failed for {v:?}"),
      UnifyFailure::OccursCheck(Cycle::Tag(tag)) =>
        write!(f, "co-indexation tag #{tag:?} resolves through itself"),
      UnifyFailure::OccursCheck(Cycle::Depth(d)) => write!(f, "recursion limit {d} exceeded"),
      UnifyFailure::ShapeMismatch(k1, k2) => write!(f, "cannot unify {k1:?} with {k2:?}"),
    }
  }
}

impl std::error::Error for UnifyFailure {}

pub type UnifyResult<T> = Result<T, UnifyFailure>;

/// Errors while building a type lattice, before any unification runs.
#[derive(Debug, PartialEq, Eq)]
pub enum LatticeError {
  UnknownParent(String, String),
  DuplicateType(String),
  /// The lattice was already closed by a meet or by `close()`; declarations
  /// must all precede use.
  Closed(String),
  Parse(String),
}

impl std::fmt::Display for LatticeError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      LatticeError::UnknownParent(ty, parent) =>
        write!(f, "type '{ty}' names unknown parent '{parent}'"),
      LatticeError::DuplicateType(ty) => write!(f, "type '{ty}' declared twice"),
      LatticeError::Closed(ty) => write!(f, "cannot declare '{ty}': lattice is already closed"),
      LatticeError::Parse(msg) => write!(f, "malformed type hierarchy: {msg}"),
    }
  }
}

impl std::error::Error for LatticeError {}
