use enum_map::Enum;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};
use std::rc::Rc;

/// A trait for newtyped integers, that can be used as index types in vectors and sets.
pub trait Idx: Copy + Eq + std::hash::Hash + Ord {
  /// Convert from `T` to `usize`
  fn into_usize(self) -> usize;
  /// Convert from `usize` to `T`
  fn from_usize(_: usize) -> Self;
  /// Generate a fresh index from a `&mut ID` counter.
  #[must_use]
  fn fresh(&mut self) -> Self {
    let n = *self;
    *self = Self::from_usize(self.into_usize() + 1);
    n
  }
}

impl Idx for usize {
  fn into_usize(self) -> usize { self }
  fn from_usize(n: usize) -> Self { n }
}
impl Idx for u32 {
  fn into_usize(self) -> usize { self as _ }
  fn from_usize(n: usize) -> Self { n as _ }
}

/// A vector indexed by a custom indexing type `I`, usually a newtyped integer.
pub struct IdxVec<I, T>(pub Vec<T>, PhantomData<I>);

impl<I, T: std::fmt::Debug> std::fmt::Debug for IdxVec<I, T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.0.fmt(f) }
}

impl<I, T: Clone> Clone for IdxVec<I, T> {
  fn clone(&self) -> Self { Self(self.0.clone(), PhantomData) }
}

impl<I, T> IdxVec<I, T> {
  /// Construct a new empty [`IdxVec`].
  #[must_use]
  pub const fn new() -> Self { Self(vec![], PhantomData) }

  /// The number of elements in the [`IdxVec`].
  #[must_use]
  pub fn len(&self) -> usize { self.0.len() }

  /// Get a value by index into the vector.
  pub fn get(&self, index: I) -> Option<&T>
  where I: Idx {
    self.0.get(I::into_usize(index))
  }

  /// Returns the value that would be returned by the next call to `push`.
  pub fn peek(&self) -> I
  where I: Idx {
    I::from_usize(self.0.len())
  }

  /// Insert a new value at the end of the vector.
  pub fn push(&mut self, val: T) -> I
  where I: Idx {
    let id = self.peek();
    self.0.push(val);
    id
  }

  /// An iterator including the indexes, like `iter().enumerate()`.
  pub fn enum_iter(&self) -> impl Iterator<Item = (I, &T)>
  where I: Idx {
    self.0.iter().enumerate().map(|(n, val)| (I::from_usize(n), val))
  }

  /// Returns `true` if the vector contains no elements.
  #[must_use]
  pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl<I, T> From<Vec<T>> for IdxVec<I, T> {
  fn from(vec: Vec<T>) -> Self { Self(vec, PhantomData) }
}

impl<I, T> Default for IdxVec<I, T> {
  fn default() -> Self { vec![].into() }
}

impl<I: Idx, T> Index<I> for IdxVec<I, T> {
  type Output = T;
  fn index(&self, index: I) -> &Self::Output { &self.0[I::into_usize(index)] }
}

impl<I: Idx, T> IndexMut<I> for IdxVec<I, T> {
  fn index_mut(&mut self, index: I) -> &mut Self::Output { &mut self.0[I::into_usize(index)] }
}

#[macro_export]
macro_rules! mk_id {
  ($($id:ident,)*) => {
    $(
      #[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
      pub struct $id(pub u32);
      impl $crate::types::Idx for $id {
        fn from_usize(n: usize) -> Self { Self(n as u32) }
        fn into_usize(self) -> usize { self.0 as usize }
      }
      impl std::fmt::Debug for $id {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.0.fmt(f) }
      }
    )*
  };
}

mk_id! {
  TypeId,
  VarId,
  FsId,
}

/// The fixed, closed set of term shapes the engine unifies over.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Enum)]
pub enum TermKind {
  Atom,
  Var,
  Fs,
  Sem,
}

/// An opaque semantic payload carried alongside grammatical descriptions.
/// The engine treats it as atomic: equality and rendering are delegated,
/// it is never unified into.
pub trait SemPayload: std::fmt::Debug {
  fn as_any(&self) -> &dyn std::any::Any;
  fn sem_eq(&self, other: &dyn SemPayload) -> bool;
}

#[derive(Clone, Debug)]
pub struct SemTerm(pub Rc<dyn SemPayload>);

impl SemTerm {
  pub fn new(payload: impl SemPayload + 'static) -> Self { Self(Rc::new(payload)) }
}

impl PartialEq for SemTerm {
  fn eq(&self, other: &Self) -> bool { self.0.sem_eq(&*other.0) }
}
impl Eq for SemTerm {}

/// A named, typed logic variable. Two variables are equal only if name,
/// uniquification index, and type all match; `index == None` means the
/// variable has not been uniquified by a session yet.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FeatVar {
  pub name: Box<str>,
  pub index: Option<VarId>,
  pub ty: TypeId,
}

impl FeatVar {
  pub fn new(name: &str) -> Self { Self { name: name.into(), index: None, ty: TypeId::TOP } }

  pub fn with_ty(name: &str, ty: TypeId) -> Self { Self { name: name.into(), index: None, ty } }
}

impl std::fmt::Debug for FeatVar {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "?{}", self.name)?;
    if let Some(i) = self.index {
      write!(f, ".{i:?}")?
    }
    if self.ty != TypeId::TOP {
      write!(f, ":t{}", self.ty.0)?
    }
    Ok(())
  }
}

/// An attribute→value description of a grammatical object.
///
/// `tag` is the co-indexation tag: two structures anywhere in a term carrying
/// the same tag denote the same logical node and must be unified together
/// whenever either is touched. `None` = unshared. `inherits` records the tag
/// of the structure this one inherits defaults from.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct FeatStruc {
  pub attrs: BTreeMap<Box<str>, Term>,
  pub tag: Option<FsId>,
  pub inherits: Option<FsId>,
}

impl FeatStruc {
  #[must_use]
  pub fn new() -> Self { Self::default() }

  pub fn insert(&mut self, attr: &str, val: Term) -> Option<Term> {
    self.attrs.insert(attr.into(), val)
  }

  pub fn get(&self, attr: &str) -> Option<&Term> { self.attrs.get(attr) }

  /// Superset test: does `self` describe at least everything `other` does?
  /// Values are compared structurally; tags and inheritance markers are not
  /// part of the comparison.
  pub fn contains(&self, other: &FeatStruc) -> bool {
    other.attrs.iter().all(|(attr, v2)| match (self.attrs.get(attr), v2) {
      (Some(Term::Fs(f1)), Term::Fs(f2)) => f1.contains(f2),
      (Some(Term::Fs(_)), _) | (Some(_), Term::Fs(_)) => false,
      (Some(v1), _) => v1 == v2,
      (None, _) => false,
    })
  }
}

impl std::fmt::Debug for FeatStruc {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    if let Some(tag) = self.tag {
      write!(f, "#{tag:?}")?
    }
    let mut m = f.debug_map();
    for (attr, val) in &self.attrs {
      m.entry(&format_args!("{attr}"), val);
    }
    m.finish()
  }
}

/// A unifiable term: the closed union of the shapes the engine understands.
#[derive(Clone, PartialEq, Eq)]
pub enum Term {
  /// An atomic grammatical type, resolved in the shared [`Types`] registry.
  ///
  /// [`Types`]: crate::lattice::Types
  Atom(TypeId),
  Var(FeatVar),
  Fs(Box<FeatStruc>),
  Sem(SemTerm),
}

impl Term {
  pub fn var(name: &str) -> Self { Term::Var(FeatVar::new(name)) }

  pub fn fs(fs: FeatStruc) -> Self { Term::Fs(Box::new(fs)) }

  pub fn kind(&self) -> TermKind {
    match self {
      Term::Atom(_) => TermKind::Atom,
      Term::Var(_) => TermKind::Var,
      Term::Fs(_) => TermKind::Fs,
      Term::Sem(_) => TermKind::Sem,
    }
  }

  pub fn as_fs(&self) -> Option<&FeatStruc> {
    match self {
      Term::Fs(fs) => Some(fs),
      _ => None,
    }
  }

  /// Does the term nest more than `limit` levels of feature structure?
  /// Walks with an explicit stack, so arbitrarily deep input is fine.
  pub fn deeper_than(&self, limit: u32) -> bool {
    let mut stack = vec![(self, 0u32)];
    while let Some((tm, d)) = stack.pop() {
      if let Term::Fs(fs) = tm {
        if d >= limit {
          return true
        }
        stack.extend(fs.attrs.values().map(|t| (t, d + 1)));
      }
    }
    false
  }
}

impl std::fmt::Debug for Term {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Atom(t) => write!(f, "t{}", t.0),
      Self::Var(v) => v.fmt(f),
      Self::Fs(fs) => fs.fmt(f),
      Self::Sem(s) => write!(f, "<{:?}>", s.0),
    }
  }
}

/// In-place traversal over terms. Implementors override the hooks they care
/// about; `super_*` methods continue the walk.
pub trait VisitMut {
  fn visit_term(&mut self, tm: &mut Term, depth: u32) { self.super_visit_term(tm, depth) }
  fn super_visit_term(&mut self, tm: &mut Term, depth: u32) {
    match tm {
      Term::Var(v) => self.visit_var(v, depth),
      Term::Fs(fs) => self.visit_fs(fs, depth),
      Term::Atom(_) | Term::Sem(_) => {}
    }
  }
  fn visit_var(&mut self, _: &mut FeatVar, _: u32) {}
  fn visit_fs(&mut self, fs: &mut FeatStruc, depth: u32) { self.super_visit_fs(fs, depth) }
  fn super_visit_fs(&mut self, fs: &mut FeatStruc, depth: u32) {
    for val in fs.attrs.values_mut() {
      self.visit_term(val, depth + 1)
    }
  }
}

pub trait Visitable<V> {
  fn visit_d(&mut self, v: &mut V, depth: u32);
  fn visit(&mut self, v: &mut V) { self.visit_d(v, 0) }
  fn visit_cloned(&self, v: &mut V) -> Self
  where Self: Clone {
    let mut t = self.clone();
    t.visit(v);
    t
  }
}

impl<V: VisitMut> Visitable<V> for Term {
  fn visit_d(&mut self, v: &mut V, d: u32) { v.visit_term(self, d) }
}
impl<V: VisitMut> Visitable<V> for FeatStruc {
  fn visit_d(&mut self, v: &mut V, d: u32) { v.visit_fs(self, d) }
}
impl<V, T: Visitable<V>> Visitable<V> for Box<T> {
  fn visit_d(&mut self, v: &mut V, d: u32) { (**self).visit_d(v, d) }
}
impl<V, T: Visitable<V>> Visitable<V> for Option<T> {
  fn visit_d(&mut self, v: &mut V, d: u32) { self.iter_mut().for_each(|t| t.visit_d(v, d)) }
}
impl<V, T: Visitable<V>> Visitable<V> for Vec<T> {
  fn visit_d(&mut self, v: &mut V, d: u32) { self.iter_mut().for_each(|t| t.visit_d(v, d)) }
}
