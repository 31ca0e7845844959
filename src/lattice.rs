use crate::error::{LatticeError, UnifyFailure, UnifyResult};
use crate::types::{IdxVec, TypeId};
use serde_derive::Deserialize;
use std::collections::HashMap;

impl TypeId {
  /// The maximal type; every registry contains it at index 0.
  pub const TOP: TypeId = TypeId(0);
}

/// A fixed-width bit vector over the declared types of one lattice.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BitSet {
  words: Box<[u64]>,
}

impl BitSet {
  fn empty(width: usize) -> Self { Self { words: vec![0; width.div_ceil(64)].into() } }

  fn insert(&mut self, i: usize) { self.words[i / 64] |= 1 << (i % 64) }

  pub fn contains(&self, i: usize) -> bool {
    self.words.get(i / 64).is_some_and(|w| w & (1 << (i % 64)) != 0)
  }

  fn union_with(&mut self, other: &BitSet) {
    for (w, w2) in self.words.iter_mut().zip(&*other.words) {
      *w |= w2
    }
  }

  fn intersect(&self, other: &BitSet) -> BitSet {
    Self { words: self.words.iter().zip(&*other.words).map(|(a, b)| a & b).collect() }
  }

  pub fn is_empty(&self) -> bool { self.words.iter().all(|&w| w == 0) }

  pub fn is_subset(&self, other: &BitSet) -> bool {
    self.words.iter().zip(&*other.words).all(|(a, b)| a & !b == 0)
  }
}

impl std::fmt::Debug for BitSet {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let mut s = f.debug_set();
    for i in 0..self.words.len() * 64 {
      if self.contains(i) {
        s.entry(&i);
      }
    }
    s.finish()
  }
}

/// An atomic grammatical type. Immutable once the lattice is closed; compared
/// by id, since the registry keeps exactly one instance per compatibility set.
#[derive(Clone, Debug)]
pub struct SimpleType {
  pub id: TypeId,
  pub name: Box<str>,
  /// Bit `i` is set iff declared type `i` is compatible with this one, i.e.
  /// this type itself and all its declared subtypes.
  compat: BitSet,
}

impl SimpleType {
  pub fn name(&self) -> &str { &self.name }

  pub fn compat(&self) -> &BitSet { &self.compat }
}

/// One record of a data-driven type hierarchy. A type with no parents is an
/// immediate subtype of `top`.
#[derive(Clone, Debug, Deserialize)]
pub struct TypeDecl {
  pub name: String,
  #[serde(default)]
  pub parents: Vec<String>,
}

/// The shared registry of all types of one grammar, arranged in a subsumption
/// lattice. Unification of two types is intersection of their compatibility
/// bit sets; the registry interns one canonical [`SimpleType`] per distinct
/// set so the result of a meet compares by id like any declared type.
pub struct Types {
  types: IdxVec<TypeId, SimpleType>,
  by_name: HashMap<Box<str>, TypeId>,
  /// Declared subtype edges, child → parents. Only meaningful before `close`.
  parents: IdxVec<TypeId, Vec<TypeId>>,
  by_compat: HashMap<BitSet, TypeId>,
  closed: bool,
}

impl Default for Types {
  fn default() -> Self { Self::new() }
}

impl Types {
  pub const TOP_NAME: &'static str = "top";

  /// A registry containing only `top`.
  pub fn new() -> Self {
    let mut types = Types {
      types: IdxVec::new(),
      by_name: HashMap::new(),
      parents: IdxVec::new(),
      by_compat: HashMap::new(),
      closed: false,
    };
    types.push_decl(Self::TOP_NAME, vec![]).expect("empty registry");
    types
  }

  fn push_decl(&mut self, name: &str, parents: Vec<TypeId>) -> Result<TypeId, LatticeError> {
    if self.closed {
      return Err(LatticeError::Closed(name.to_owned()))
    }
    if self.by_name.contains_key(name) {
      return Err(LatticeError::DuplicateType(name.to_owned()))
    }
    let id = self.types.peek();
    self.types.push(SimpleType { id, name: name.into(), compat: BitSet::empty(0) });
    self.by_name.insert(name.into(), id);
    self.parents.push(parents);
    Ok(id)
  }

  /// Declare a type below the given parents (below `top` if none are given).
  /// Parents must already be declared, so declaration order is topological.
  pub fn declare(&mut self, name: &str, parents: &[TypeId]) -> Result<TypeId, LatticeError> {
    let parents =
      if parents.is_empty() { vec![TypeId::TOP] } else { parents.to_vec() };
    self.push_decl(name, parents)
  }

  /// Declare a type naming its parents.
  pub fn declare_named(&mut self, name: &str, parents: &[&str]) -> Result<TypeId, LatticeError> {
    let parents = parents
      .iter()
      .map(|p| {
        let unknown = || LatticeError::UnknownParent(name.to_owned(), (*p).to_owned());
        self.by_name(p).ok_or_else(unknown)
      })
      .collect::<Result<Vec<_>, _>>()?;
    self.declare(name, &parents)
  }

  /// Build a closed registry from a list of declarations.
  pub fn from_decls(decls: &[TypeDecl]) -> Result<Self, LatticeError> {
    let mut types = Types::new();
    for decl in decls {
      let parents: Vec<&str> = decl.parents.iter().map(|s| &**s).collect();
      types.declare_named(&decl.name, &parents)?;
    }
    types.close();
    Ok(types)
  }

  /// Build a closed registry from a JSON array of `{"name": .., "parents": [..]}`
  /// records, the form grammar type hierarchies ship in.
  pub fn from_json(json: &str) -> Result<Self, LatticeError> {
    let decls: Vec<TypeDecl> =
      serde_json::from_str(json).map_err(|e| LatticeError::Parse(e.to_string()))?;
    Self::from_decls(&decls)
  }

  /// Compute the compatibility sets. Called implicitly by the first meet;
  /// idempotent; declarations are rejected afterwards.
  pub fn close(&mut self) {
    if self.closed {
      return
    }
    self.closed = true;
    let n = self.types.len();
    // reverse declaration order: every child precedes its parents' turn
    for i in (0..n).rev() {
      let mut compat = BitSet::empty(n);
      compat.insert(i);
      let id = TypeId(i as u32);
      for (child, ps) in self.parents.enum_iter() {
        if ps.contains(&id) {
          let child_compat = self.types[child].compat.clone();
          compat.union_with(&child_compat);
        }
      }
      self.types[id].compat = compat;
    }
    for (id, ty) in self.types.enum_iter() {
      self.by_compat.entry(ty.compat.clone()).or_insert(id);
    }
  }

  pub fn by_name(&self, name: &str) -> Option<TypeId> { self.by_name.get(name).copied() }

  pub fn get(&self, id: TypeId) -> &SimpleType { &self.types[id] }

  pub fn name(&self, id: TypeId) -> &str { &self.types[id].name }

  pub fn len(&self) -> usize { self.types.len() }

  pub fn is_empty(&self) -> bool { self.types.is_empty() }

  /// Does `general` subsume `specific` in the lattice?
  /// Precondition: the registry is closed.
  pub fn subsumes(&self, general: TypeId, specific: TypeId) -> bool {
    debug_assert!(self.closed);
    self.types[specific].compat.is_subset(&self.types[general].compat)
  }

  /// Lattice intersection of two types. Identical types return immediately;
  /// an empty intersection fails; any other result is the canonical interned
  /// type for the intersected compatibility set. Pure with respect to any
  /// substitution.
  pub fn meet(&mut self, t1: TypeId, t2: TypeId) -> UnifyResult<TypeId> {
    if t1 == t2 {
      return Ok(t1)
    }
    self.close();
    let m = self.types[t1].compat.intersect(&self.types[t2].compat);
    if m.is_empty() {
      crate::stat("lattice.disjoint");
      return Err(UnifyFailure::IncompatibleTypes(
        self.types[t1].name.clone(),
        self.types[t2].name.clone(),
      ))
    }
    if let Some(&id) = self.by_compat.get(&m) {
      return Ok(id)
    }
    let name = format!("{}^{}", self.types[t1].name, self.types[t2].name);
    let id =
      self.types.push(SimpleType { id: self.types.peek(), name: name.into(), compat: m.clone() });
    self.by_compat.insert(m, id);
    Ok(id)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // top > {anim, phys}, anim > animal, phys > {animal, robot}
  fn lattice() -> Types {
    let mut t = Types::new();
    t.declare("anim", &[]).unwrap();
    t.declare("phys", &[]).unwrap();
    t.declare_named("animal", &["anim", "phys"]).unwrap();
    t.declare_named("robot", &["phys"]).unwrap();
    t.close();
    t
  }

  #[test]
  fn meet_of_identical_is_identity() {
    let mut t = lattice();
    let anim = t.by_name("anim").unwrap();
    assert_eq!(t.meet(anim, anim).unwrap(), anim);
  }

  #[test]
  fn meet_with_top_is_other_operand() {
    let mut t = lattice();
    for name in ["anim", "phys", "animal", "robot"] {
      let ty = t.by_name(name).unwrap();
      assert_eq!(t.meet(TypeId::TOP, ty).unwrap(), ty);
      assert_eq!(t.meet(ty, TypeId::TOP).unwrap(), ty);
    }
  }

  #[test]
  fn meet_resolves_to_common_subtype() {
    let mut t = lattice();
    let anim = t.by_name("anim").unwrap();
    let phys = t.by_name("phys").unwrap();
    let animal = t.by_name("animal").unwrap();
    assert_eq!(t.meet(anim, phys).unwrap(), animal);
    assert_eq!(t.meet(phys, anim).unwrap(), animal);
  }

  #[test]
  fn disjoint_types_fail() {
    let mut t = lattice();
    let anim = t.by_name("anim").unwrap();
    let robot = t.by_name("robot").unwrap();
    assert!(matches!(t.meet(anim, robot), Err(UnifyFailure::IncompatibleTypes(..))));
  }

  #[test]
  fn meet_interns_one_canonical_type() {
    let mut t = Types::new();
    let a = t.declare("a", &[]).unwrap();
    let b = t.declare("b", &[]).unwrap();
    t.declare_named("c", &["a", "b"]).unwrap();
    t.declare_named("d", &["a", "b"]).unwrap();
    let m1 = t.meet(a, b).unwrap();
    let m2 = t.meet(b, a).unwrap();
    assert_eq!(m1, m2);
    assert_eq!(t.name(m1), "a^b");
    // the interned meet behaves like any other type
    assert!(t.subsumes(a, m1));
    assert!(t.subsumes(b, m1));
    assert_eq!(t.meet(m1, a).unwrap(), m1);
  }

  #[test]
  fn subsumption_follows_declared_edges() {
    let t = lattice();
    let phys = t.by_name("phys").unwrap();
    let animal = t.by_name("animal").unwrap();
    let anim = t.by_name("anim").unwrap();
    assert!(t.subsumes(TypeId::TOP, animal));
    assert!(t.subsumes(phys, animal));
    assert!(t.subsumes(anim, animal));
    assert!(!t.subsumes(animal, phys));
    assert!(!t.subsumes(anim, phys));
  }

  #[test]
  fn lattice_from_json() {
    let t = Types::from_json(
      r#"[
        {"name": "np"},
        {"name": "n"},
        {"name": "nom", "parents": ["np", "n"]}
      ]"#,
    )
    .unwrap();
    let np = t.by_name("np").unwrap();
    let nom = t.by_name("nom").unwrap();
    assert!(t.subsumes(np, nom));
    assert_eq!(t.name(TypeId::TOP), "top");
  }

  #[test]
  fn declarations_rejected_after_close() {
    let mut t = lattice();
    assert!(matches!(t.declare("late", &[]), Err(LatticeError::Closed(_))));
    assert!(matches!(t.declare("anim", &[]), Err(LatticeError::Closed(_))));
  }

  #[test]
  fn duplicate_and_unknown_parent_errors() {
    let mut t = Types::new();
    t.declare("a", &[]).unwrap();
    assert!(matches!(t.declare("a", &[]), Err(LatticeError::DuplicateType(_))));
    assert!(matches!(t.declare_named("b", &["zzz"]), Err(LatticeError::UnknownParent(..))));
  }
}
