use crate::error::{Cycle, UnifyFailure, UnifyResult};
use crate::types::{FeatVar, Term, TermKind, VisitMut, Visitable};
use crate::unify::{Unifier, STACK_GROW, STACK_RED_ZONE};

/// A binding environment threaded through one unification episode and
/// discarded afterwards. The variants share this contract but differ in how
/// far a new binding is propagated into the rest of the environment.
pub trait Subst {
  fn lookup(&self, v: &FeatVar) -> Option<&Term>;
  /// Record `v := val`, returning the value actually bound (which may be a
  /// further-resolved form of `val`).
  fn bind(&mut self, u: &mut Unifier<'_>, v: FeatVar, val: Term) -> UnifyResult<Term>;
  fn entries(&self) -> &[(FeatVar, Term)];
}

/// Does `v` occur in `tm`, chasing bound variables through `s`?
pub(crate) fn occurs_in<S: Subst + ?Sized>(s: &S, v: &FeatVar, tm: &Term) -> bool {
  stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW, || match tm {
    Term::Var(v2) => v == v2 || s.lookup(v2).is_some_and(|b| occurs_in(s, v, b)),
    Term::Fs(fs) => fs.attrs.values().any(|t| occurs_in(s, v, t)),
    Term::Atom(_) | Term::Sem(_) => false,
  })
}

/// Rewrites every occurrence of one variable to a value, in place.
pub(crate) struct InstVar<'a> {
  pub v: &'a FeatVar,
  pub val: &'a Term,
}

impl VisitMut for InstVar<'_> {
  fn visit_term(&mut self, tm: &mut Term, d: u32) {
    if matches!(tm, Term::Var(v2) if v2 == self.v) {
      *tm = self.val.clone();
      return
    }
    self.super_visit_term(tm, d)
  }
}

/// For callers that guarantee the operands are ground: answers every lookup
/// with nothing and rejects every binding.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptySubst;

impl Subst for EmptySubst {
  fn lookup(&self, _: &FeatVar) -> Option<&Term> { None }

  fn bind(&mut self, _: &mut Unifier<'_>, _: FeatVar, val: Term) -> UnifyResult<Term> {
    crate::stat("subst.empty_bind");
    Err(UnifyFailure::ShapeMismatch(TermKind::Var, val.kind()))
  }

  fn entries(&self) -> &[(FeatVar, Term)] { &[] }
}

/// Records bindings as given and never revisits previously stored ones, so
/// lookups may need multi-hop chasing and no occurs check is performed.
#[derive(Clone, Debug, Default)]
pub struct SimpleSubst(Vec<(FeatVar, Term)>);

impl Subst for SimpleSubst {
  fn lookup(&self, v: &FeatVar) -> Option<&Term> {
    self.0.iter().find(|(w, _)| w == v).map(|(_, t)| t)
  }

  fn bind(&mut self, _: &mut Unifier<'_>, v: FeatVar, val: Term) -> UnifyResult<Term> {
    match self.0.iter_mut().find(|(w, _)| *w == v) {
      Some(slot) => slot.1 = val.clone(),
      None => self.0.push((v, val.clone())),
    }
    Ok(val)
  }

  fn entries(&self) -> &[(FeatVar, Term)] { &self.0 }
}

trait BindStore: Subst + Sized {
  fn store(&mut self) -> &mut Vec<(FeatVar, Term)>;
}

/// The shared bind discipline of the condensing variants.
///
/// Directional by construction: an already-bound side unifies the two bound
/// values instead of overwriting; a variable target is first resolved through
/// its own binding. The new value is resolved against every existing binding
/// and, once stored, every existing binding is rewritten through it, so the
/// map is fully resolved at all times and lookups never chase chains.
fn condensing_bind<S: BindStore>(
  u: &mut Unifier<'_>, s: &mut S, v: FeatVar, val: Term,
) -> UnifyResult<Term> {
  u.check_depth(&val)?;
  if let Some(prev) = s.lookup(&v).cloned() {
    let merged = u.unify_in(&prev, &val, s)?;
    if let Some(slot) = s.store().iter_mut().find(|(w, _)| *w == v) {
      slot.1 = merged.clone()
    }
    return Ok(merged)
  }
  let mut val = val;
  if let Term::Var(v2) = &val {
    if *v2 == v {
      return Ok(val)
    }
    if let Some(prev2) = s.lookup(v2).cloned() {
      val = prev2
    }
  }
  for (w, t) in s.entries() {
    val.visit(&mut InstVar { v: w, val: t })
  }
  if occurs_in(s, &v, &val) {
    crate::stat("subst.occurs");
    return Err(UnifyFailure::OccursCheck(Cycle::Var(v)))
  }
  for (_, t) in s.store().iter_mut() {
    t.visit(&mut InstVar { v: &v, val: &val })
  }
  s.store().push((v, val.clone()));
  Ok(val)
}

/// Self-condensing substitution: every bind re-resolves all previously stored
/// bindings, keeping the map single-hop at all times.
#[derive(Clone, Debug, Default)]
pub struct CondensingSubst(Vec<(FeatVar, Term)>);

impl BindStore for CondensingSubst {
  fn store(&mut self) -> &mut Vec<(FeatVar, Term)> { &mut self.0 }
}

impl Subst for CondensingSubst {
  fn lookup(&self, v: &FeatVar) -> Option<&Term> {
    self.0.iter().find(|(w, _)| w == v).map(|(_, t)| t)
  }

  fn bind(&mut self, u: &mut Unifier<'_>, v: FeatVar, val: Term) -> UnifyResult<Term> {
    condensing_bind(u, self, v, val)
  }

  fn entries(&self) -> &[(FeatVar, Term)] { &self.0 }
}

/// The production substitution: condensing semantics, plus coordination with
/// the session's indexed-object registry. Every successful bind is also
/// propagated into the registered feature structures, so the current occupant
/// of a shared tag never holds a stale variable.
#[derive(Clone, Debug, Default)]
pub struct GSubstitution(Vec<(FeatVar, Term)>);

impl BindStore for GSubstitution {
  fn store(&mut self) -> &mut Vec<(FeatVar, Term)> { &mut self.0 }
}

impl Subst for GSubstitution {
  fn lookup(&self, v: &FeatVar) -> Option<&Term> {
    self.0.iter().find(|(w, _)| w == v).map(|(_, t)| t)
  }

  fn bind(&mut self, u: &mut Unifier<'_>, v: FeatVar, val: Term) -> UnifyResult<Term> {
    let var = v.clone();
    let out = condensing_bind(u, self, v, val)?;
    for fs in u.ctl.registered_values_mut() {
      fs.visit(&mut InstVar { v: &var, val: &out })
    }
    Ok(out)
  }

  fn entries(&self) -> &[(FeatVar, Term)] { &self.0 }
}
