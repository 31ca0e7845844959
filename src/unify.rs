use crate::control::UnifyControl;
use crate::error::{Cycle, UnifyFailure, UnifyResult};
use crate::lattice::Types;
use crate::subst::{occurs_in, GSubstitution, Subst};
use crate::types::{FeatStruc, FeatVar, FsId, Term};
use crate::vprintln;
use itertools::{EitherOrBoth, Itertools};
use std::collections::BTreeMap;

pub(crate) const STACK_RED_ZONE: usize = 32 * 1024;
pub(crate) const STACK_GROW: usize = 1024 * 1024;

/// The unification engine for one session: borrows the grammar's type
/// registry and the session control, and runs episodes against them.
pub struct Unifier<'a> {
  pub types: &'a mut Types,
  pub ctl: &'a mut UnifyControl,
}

impl<'a> Unifier<'a> {
  pub fn new(types: &'a mut Types, ctl: &'a mut UnifyControl) -> Self { Unifier { types, ctl } }

  /// One full unification episode: a fresh substitution, the dispatch walk,
  /// and a final `fill` so the caller never sees a partially resolved term.
  /// On failure the episode's bindings and tag state carry no meaning and are
  /// dropped at the next episode boundary.
  pub fn unify(&mut self, t1: &Term, t2: &Term) -> UnifyResult<Term> {
    self.ctl.begin_episode();
    let mut sub = GSubstitution::default();
    let out = self.unify_in(t1, t2, &mut sub)?;
    let out = self.fill(&out, &mut sub)?;
    vprintln!("unified {t1:?} + {t2:?} = {out:?}");
    Ok(out)
  }

  /// Unify within an existing substitution (one step of an episode).
  pub fn unify_in<S: Subst>(&mut self, t1: &Term, t2: &Term, s: &mut S) -> UnifyResult<Term> {
    self.check_depth(t1)?;
    self.check_depth(t2)?;
    self.dispatch(t1, t2, s, 0)
  }

  /// Reject operands nesting beyond the session's depth limit before touching
  /// them: the occurs check, binding rewrites, and deep copies all walk
  /// operand structure outside the dispatcher's depth accounting.
  pub(crate) fn check_depth(&self, tm: &Term) -> UnifyResult<()> {
    if tm.deeper_than(self.ctl.max_depth()) {
      crate::stat("unify.depth_limit");
      return Err(UnifyFailure::OccursCheck(Cycle::Depth(self.ctl.max_depth())))
    }
    Ok(())
  }

  /// The central ordering-sensitive dispatch. A variable as the *second*
  /// operand must see its own unification logic even when the first operand
  /// would otherwise claim priority; only when neither side is a variable
  /// does shape-directed unification apply.
  pub(crate) fn dispatch<S: Subst>(
    &mut self, t1: &Term, t2: &Term, s: &mut S, depth: u32,
  ) -> UnifyResult<Term> {
    if depth >= self.ctl.max_depth() {
      crate::stat("unify.depth_limit");
      return Err(UnifyFailure::OccursCheck(Cycle::Depth(depth)))
    }
    self.ctl.dispatches[t1.kind()] += 1;
    self.ctl.dispatches[t2.kind()] += 1;
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW, || match (t1, t2) {
      (_, Term::Var(v2)) => self.unify_var(v2, t1, s),
      (Term::Var(v1), _) => self.unify_var(v1, t2, s),
      (Term::Atom(a), Term::Atom(b)) => Ok(Term::Atom(self.types.meet(*a, *b)?)),
      (Term::Fs(f1), Term::Fs(f2)) => Ok(Term::fs(self.unify_fs(f1, f2, s, depth)?)),
      (Term::Sem(s1), Term::Sem(s2)) =>
        if s1 == s2 {
          Ok(t1.clone())
        } else {
          crate::stat("unify.sem_mismatch");
          Err(UnifyFailure::ShapeMismatch(t1.kind(), t2.kind()))
        },
      _ => {
        crate::stat("unify.shape_mismatch");
        Err(UnifyFailure::ShapeMismatch(t1.kind(), t2.kind()))
      }
    })
  }

  /// Variable unification. Reflexive on the identical variable; against a
  /// type, the variable's own type is narrowed by the lattice meet; against
  /// another variable, whichever side already carries the meet becomes the
  /// representative, otherwise a fresh variable with the meet type is bound
  /// from both sides so each original keeps its more general type for later
  /// use. Everything else is occurs-checked and bound directly.
  fn unify_var<S: Subst>(&mut self, v: &FeatVar, other: &Term, s: &mut S) -> UnifyResult<Term> {
    match other {
      Term::Var(v2) if v == v2 => Ok(other.clone()),
      Term::Atom(t) => {
        let met = self.types.meet(v.ty, *t)?;
        s.bind(self, v.clone(), Term::Atom(met))
      }
      Term::Var(v2) => {
        if occurs_in(s, v, other) || occurs_in(s, v2, &Term::Var(v.clone())) {
          crate::stat("unify.occurs");
          return Err(UnifyFailure::OccursCheck(Cycle::Var(v.clone())))
        }
        let met = self.types.meet(v.ty, v2.ty)?;
        if met == v2.ty {
          s.bind(self, v.clone(), other.clone())
        } else if met == v.ty {
          s.bind(self, v2.clone(), Term::Var(v.clone()))
        } else {
          let name = if v.name <= v2.name { v.name.clone() } else { v2.name.clone() };
          let fresh = FeatVar { name, index: Some(self.ctl.fresh_var()), ty: met };
          s.bind(self, v.clone(), Term::Var(fresh.clone()))?;
          s.bind(self, v2.clone(), Term::Var(fresh.clone()))?;
          Ok(Term::Var(fresh))
        }
      }
      _ => {
        if occurs_in(s, v, other) {
          crate::stat("unify.occurs");
          return Err(UnifyFailure::OccursCheck(Cycle::Var(v.clone())))
        }
        s.bind(self, v.clone(), other.clone())
      }
    }
  }

  /// Feature structure unification: shared attributes unify recursively,
  /// one-sided attributes are copied through, and co-indexation tags are
  /// reconciled so every other occurrence of either input tag resolves to the
  /// same merged node for the rest of the episode.
  pub(crate) fn unify_fs<S: Subst>(
    &mut self, f1: &FeatStruc, f2: &FeatStruc, s: &mut S, depth: u32,
  ) -> UnifyResult<FeatStruc> {
    if depth >= self.ctl.max_depth() {
      crate::stat("unify.depth_limit");
      return Err(UnifyFailure::OccursCheck(Cycle::Depth(depth)))
    }
    let mut attrs = BTreeMap::new();
    for pair in f1.attrs.iter().merge_join_by(f2.attrs.iter(), |(a, _), (b, _)| a.cmp(b)) {
      match pair {
        EitherOrBoth::Both((attr, v1), (_, v2)) => {
          let merged = self.dispatch(v1, v2, s, depth + 1)?;
          attrs.insert(attr.clone(), merged);
        }
        EitherOrBoth::Left((attr, v)) | EitherOrBoth::Right((attr, v)) => {
          attrs.insert(attr.clone(), v.clone());
        }
      }
    }
    let (tag, displaced) = self.merge_tags(f1.tag, f2.tag);
    let mut out = FeatStruc { attrs, tag, inherits: f1.inherits.or(f2.inherits) };
    if let Some(tag) = tag {
      let mut pending = displaced;
      if let Some(prev) = self.ctl.take_registered(tag) {
        pending.push(prev)
      }
      for prev in pending {
        out = self.unify_fs(&prev, &out, s, depth + 1)?;
      }
      self.ctl.register(tag, out.clone());
    }
    Ok(out)
  }

  /// Reconcile two (possibly absent) co-indexation tags: equal resolved tags
  /// are kept; otherwise a fresh merged tag is minted and both originals
  /// aliased to it. Returns the merged tag together with any structures that
  /// were registered under the originals, for the caller to fold in.
  fn merge_tags(&mut self, t1: Option<FsId>, t2: Option<FsId>) -> (Option<FsId>, Vec<FeatStruc>) {
    let a = t1.map(|t| self.ctl.resolve_tag(t));
    let b = t2.map(|t| self.ctl.resolve_tag(t));
    match (a, b) {
      (None, None) => (None, vec![]),
      (Some(a), Some(b)) if a == b => (Some(a), vec![]),
      (a, b) => {
        let merged = self.ctl.fresh_tag();
        let mut displaced = vec![];
        for t in [a, b].into_iter().flatten() {
          if let Some(fs) = self.ctl.alias_tag(t, merged) {
            displaced.push(fs)
          }
        }
        (Some(merged), displaced)
      }
    }
  }

  /// Resolve a term against the substitution and the episode's registry:
  /// bound variables are replaced by their values, and every tagged structure
  /// adopts (and is unified with) whatever its shared node has become
  /// elsewhere in the episode. A tag resolving through itself is a cycle the
  /// variable occurs check cannot see, and fails here.
  pub fn fill<S: Subst>(&mut self, tm: &Term, s: &mut S) -> UnifyResult<Term> {
    let mut stack = vec![];
    self.fill_rec(tm, s, &mut stack, 0)
  }

  fn fill_rec<S: Subst>(
    &mut self, tm: &Term, s: &mut S, stack: &mut Vec<FsId>, depth: u32,
  ) -> UnifyResult<Term> {
    if depth >= self.ctl.max_depth() {
      crate::stat("fill.depth_limit");
      return Err(UnifyFailure::OccursCheck(Cycle::Depth(depth)))
    }
    match tm {
      Term::Atom(_) | Term::Sem(_) => Ok(tm.clone()),
      Term::Var(v) => match s.lookup(v) {
        Some(bound) => {
          let bound = bound.clone();
          self.fill_rec(&bound, s, stack, depth + 1)
        }
        None => Ok(tm.clone()),
      },
      Term::Fs(fs) => {
        let mut fs = (**fs).clone();
        let tag = fs.tag.map(|t| self.ctl.resolve_tag(t));
        if let Some(tag) = tag {
          if stack.contains(&tag) {
            crate::stat("fill.tag_cycle");
            return Err(UnifyFailure::OccursCheck(Cycle::Tag(tag)))
          }
          stack.push(tag);
          fs.tag = Some(tag);
          if let Some(reg) = self.ctl.take_registered(tag) {
            fs = self.unify_fs(&reg, &fs, s, depth)?;
          }
        }
        for val in fs.attrs.values_mut() {
          let filled = self.fill_rec(val, s, stack, depth + 1)?;
          *val = filled;
        }
        if let Some(tag) = fs.tag {
          self.ctl.register(tag, fs.clone());
          stack.pop();
        }
        Ok(Term::fs(fs))
      }
    }
  }
}
