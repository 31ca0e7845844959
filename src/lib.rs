//! A typed unification engine for categorial-grammar descriptions.
//!
//! Grammatical categories are [`Term`]s: atomic types from a meet-closed
//! [`Types`] lattice, typed variables, recursive feature structures with
//! co-indexation tags, and opaque semantic payloads. The [`Unifier`] runs
//! unification episodes under an explicit [`UnifyControl`] session, recording
//! bindings in a pluggable [`Subst`] and resolving structure sharing through
//! the session's tag registry.
//!
//! ```
//! use ccg_unify::{Term, Types, Unifier, UnifyControl};
//!
//! let mut types = Types::new();
//! let n = types.declare("n", &[]).unwrap();
//! types.close();
//! let mut ctl = UnifyControl::new();
//! let mut u = Unifier::new(&mut types, &mut ctl);
//! let out = u.unify(&Term::var("X"), &Term::Atom(n)).unwrap();
//! assert_eq!(out, Term::Atom(n));
//! ```

use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;

pub mod control;
pub mod error;
pub mod format;
pub mod lattice;
pub mod subst;
pub mod types;
pub mod unify;

pub use control::{condense, UnifyControl};
pub use error::{Cycle, LatticeError, UnifyFailure, UnifyResult};
pub use format::show;
pub use lattice::{SimpleType, TypeDecl, Types};
pub use subst::{CondensingSubst, EmptySubst, GSubstitution, SimpleSubst, Subst};
pub use types::{
  FeatStruc, FeatVar, FsId, SemPayload, SemTerm, Term, TermKind, TypeId, VarId, VisitMut,
  Visitable,
};
pub use unify::Unifier;

/// Bump a named internal counter. Counters accumulate for the life of the
/// process; drain them with [`take_stats`].
pub fn stat(s: &'static str) {
  *STATS.lock().unwrap().get_or_insert_with(HashMap::new).entry(s).or_default() += 1;
}

/// Drain the counters accumulated by [`stat`], sorted by name.
pub fn take_stats() -> Vec<(&'static str, u32)> {
  let mut vec: Vec<_> = STATS.lock().unwrap().take().unwrap_or_default().into_iter().collect();
  vec.sort();
  vec
}

#[macro_export]
macro_rules! vprintln {
  ($($args:tt)*) => {
    if $crate::verbose() {
      eprintln!($($args)*)
    }
  };
}

static VERBOSE: AtomicBool = AtomicBool::new(false);
pub fn verbose() -> bool { VERBOSE.load(std::sync::atomic::Ordering::SeqCst) }
pub fn set_verbose(b: bool) { VERBOSE.store(b, std::sync::atomic::Ordering::SeqCst) }

static STATS: Mutex<Option<HashMap<&'static str, u32>>> = Mutex::new(None);
