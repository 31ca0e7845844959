use crate::types::{FeatStruc, FeatVar, FsId, Idx, Term, TermKind, VarId, VisitMut, Visitable};
use enum_map::EnumMap;
use std::collections::{HashMap, HashSet};

const DEFAULT_MAX_DEPTH: u32 = 512;

/// The explicit unification-session context: fresh-identity counters for a
/// batch of episodes, plus the episode-scoped tag bookkeeping (the old→merged
/// tag map and the indexed-object registry). One control per batch; episodes
/// within it are serialized. There is no process-global engine state.
pub struct UnifyControl {
  next_var: VarId,
  next_fs: FsId,
  max_depth: u32,
  /// old tag → merged tag, current episode only
  remap: HashMap<FsId, FsId>,
  /// merged tag → the structure currently known to occupy that node
  registry: HashMap<FsId, FeatStruc>,
  /// how often each term shape reached the dispatcher
  pub dispatches: EnumMap<TermKind, u32>,
}

impl Default for UnifyControl {
  fn default() -> Self { Self::new() }
}

impl UnifyControl {
  pub fn new() -> Self {
    UnifyControl {
      next_var: VarId(0),
      next_fs: FsId(0),
      max_depth: DEFAULT_MAX_DEPTH,
      remap: HashMap::new(),
      registry: HashMap::new(),
      dispatches: EnumMap::default(),
    }
  }

  /// Bound on term nesting (and binding-chain) depth during one episode.
  pub fn set_max_depth(&mut self, depth: u32) { self.max_depth = depth }

  pub fn max_depth(&self) -> u32 { self.max_depth }

  /// Batch boundary: restart the identity counters and drop all episode
  /// state. Only legal when no term reindexed under this control is still
  /// held by the caller, otherwise later episodes can capture its variables.
  pub fn start_sequence(&mut self) {
    self.next_var = VarId(0);
    self.next_fs = FsId(0);
    self.begin_episode();
  }

  /// Episode boundary: forget the tag merges and registered occupants of the
  /// previous unification attempt. Counters keep running, so identities stay
  /// unique across the whole sequence.
  pub fn begin_episode(&mut self) {
    self.remap.clear();
    self.registry.clear();
  }

  pub fn fresh_var(&mut self) -> VarId { self.next_var.fresh() }

  pub fn fresh_tag(&mut self) -> FsId { self.next_fs.fresh() }

  /// Chase a tag through the episode's old→merged map.
  pub fn resolve_tag(&self, mut tag: FsId) -> FsId {
    while let Some(&next) = self.remap.get(&tag) {
      tag = next
    }
    tag
  }

  /// Redirect `old` to `merged`, returning whatever structure was registered
  /// under `old` so the caller can fold it into the merged node.
  pub(crate) fn alias_tag(&mut self, old: FsId, merged: FsId) -> Option<FeatStruc> {
    if old == merged {
      return None
    }
    self.remap.insert(old, merged);
    self.registry.remove(&old)
  }

  pub(crate) fn take_registered(&mut self, tag: FsId) -> Option<FeatStruc> {
    self.registry.remove(&tag)
  }

  pub(crate) fn register(&mut self, tag: FsId, fs: FeatStruc) { self.registry.insert(tag, fs); }

  /// Read-only view of the current occupant of a (possibly stale) tag.
  pub fn registered(&self, tag: FsId) -> Option<&FeatStruc> {
    self.registry.get(&self.resolve_tag(tag))
  }

  pub(crate) fn registered_values_mut(&mut self) -> impl Iterator<Item = &mut FeatStruc> {
    self.registry.values_mut()
  }

  /// Uniquify a term before an episode: every variable occurrence (keyed by
  /// its full identity) and every co-indexation tag is consistently mapped to
  /// a fresh id, so reuses of the same rule or lexical entry never capture
  /// each other's variables. Untagged structures each receive their own tag.
  pub fn reindex(&mut self, tm: &Term) -> Term {
    let mut tm = tm.clone();
    self.reindex_in_place(&mut tm);
    tm
  }

  pub fn reindex_in_place(&mut self, tm: &mut Term) {
    let mut r = Reindexer { ctl: self, vars: HashMap::new(), tags: HashMap::new() };
    tm.visit(&mut r)
  }
}

struct Reindexer<'a> {
  ctl: &'a mut UnifyControl,
  vars: HashMap<FeatVar, VarId>,
  tags: HashMap<FsId, FsId>,
}

impl VisitMut for Reindexer<'_> {
  fn visit_var(&mut self, v: &mut FeatVar, _: u32) {
    let ctl = &mut *self.ctl;
    let fresh = *self.vars.entry(v.clone()).or_insert_with(|| ctl.next_var.fresh());
    v.index = Some(fresh);
  }

  fn visit_fs(&mut self, fs: &mut FeatStruc, d: u32) {
    let ctl = &mut *self.ctl;
    fs.tag = Some(match fs.tag {
      Some(old) => *self.tags.entry(old).or_insert_with(|| ctl.next_fs.fresh()),
      None => ctl.next_fs.fresh(),
    });
    if let Some(old) = fs.inherits {
      let ctl = &mut *self.ctl;
      fs.inherits = Some(*self.tags.entry(old).or_insert_with(|| ctl.next_fs.fresh()));
    }
    self.super_visit_fs(fs, d)
  }
}

/// Post-unification cleanup: a tag that occurs exactly once and is not
/// inherited from records no sharing and is cleared; surviving tags are
/// renumbered compactly from 0, in first-occurrence order. Inheritance links
/// follow the renumbering; a link whose source tag does not survive (or never
/// occurred) is cleared.
pub fn condense(tm: &mut Term) {
  #[derive(Default)]
  struct CountTags {
    tags: HashMap<FsId, u32>,
    refs: HashSet<FsId>,
    order: Vec<FsId>,
  }
  impl VisitMut for CountTags {
    fn visit_fs(&mut self, fs: &mut FeatStruc, d: u32) {
      if let Some(tag) = fs.tag {
        let n = self.tags.entry(tag).or_default();
        if *n == 0 {
          self.order.push(tag)
        }
        *n += 1;
      }
      if let Some(src) = fs.inherits {
        self.refs.insert(src);
      }
      self.super_visit_fs(fs, d)
    }
  }
  let mut c = CountTags::default();
  tm.visit(&mut c);

  // the complete renumbering is fixed before the rewrite walk, so an
  // inheritance link resolves the same way wherever it sits in the traversal
  let mut next = FsId(0);
  let map: HashMap<FsId, FsId> = c
    .order
    .iter()
    .filter(|&&t| c.tags[&t] > 1 || c.refs.contains(&t))
    .map(|&t| (t, next.fresh()))
    .collect();

  struct Renumber<'a>(&'a HashMap<FsId, FsId>);
  impl VisitMut for Renumber<'_> {
    fn visit_fs(&mut self, fs: &mut FeatStruc, d: u32) {
      if let Some(tag) = fs.tag {
        fs.tag = self.0.get(&tag).copied();
      }
      if let Some(src) = fs.inherits {
        fs.inherits = self.0.get(&src).copied();
      }
      self.super_visit_fs(fs, d)
    }
  }
  tm.visit(&mut Renumber(&map));
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::TypeId;
  use std::collections::HashSet;

  fn fs(pairs: &[(&str, Term)]) -> FeatStruc {
    let mut f = FeatStruc::new();
    for (attr, val) in pairs {
      f.insert(attr, val.clone());
    }
    f
  }

  fn var_indices(tm: &Term) -> Vec<Option<VarId>> {
    struct Collect(Vec<Option<VarId>>);
    impl VisitMut for Collect {
      fn visit_var(&mut self, v: &mut FeatVar, _: u32) { self.0.push(v.index) }
    }
    let mut c = Collect(vec![]);
    tm.clone().visit(&mut c);
    c.0
  }

  fn tags(tm: &Term) -> Vec<Option<FsId>> {
    struct Collect(Vec<Option<FsId>>);
    impl VisitMut for Collect {
      fn visit_fs(&mut self, f: &mut FeatStruc, d: u32) {
        self.0.push(f.tag);
        self.super_visit_fs(f, d)
      }
    }
    let mut c = Collect(vec![]);
    tm.clone().visit(&mut c);
    c.0
  }

  #[test]
  fn reindex_is_consistent_within_one_call() {
    let mut ctl = UnifyControl::new();
    let raw = Term::fs(fs(&[
      ("A", Term::var("X")),
      ("B", Term::var("X")),
      ("C", Term::var("Y")),
    ]));
    let t = ctl.reindex(&raw);
    let idx = var_indices(&t);
    assert_eq!(idx[0], idx[1], "both occurrences of X share one fresh index");
    assert_ne!(idx[0], idx[2], "Y is a different variable");
    assert!(idx.iter().all(|i| i.is_some()));
  }

  #[test]
  fn reindex_distinguishes_same_name_different_type() {
    let mut ctl = UnifyControl::new();
    let raw = Term::fs(fs(&[
      ("A", Term::Var(FeatVar::new("X"))),
      ("B", Term::Var(FeatVar::with_ty("X", TypeId(3)))),
    ]));
    let idx = var_indices(&ctl.reindex(&raw));
    assert_ne!(idx[0], idx[1]);
  }

  #[test]
  fn reindex_maps_shared_tags_together_and_untagged_apart() {
    let mut ctl = UnifyControl::new();
    let mut shared = fs(&[("CASE", Term::var("C"))]);
    shared.tag = Some(FsId(7));
    let raw = Term::fs(fs(&[
      ("L", Term::fs(shared.clone())),
      ("R", Term::fs(shared)),
      ("U", Term::fs(fs(&[]))),
    ]));
    let t = ctl.reindex(&raw);
    let tg = tags(&t);
    // outer, L, R, U in sorted attribute order L < R < U
    assert_eq!(tg[1], tg[2], "tag 7 occurrences stay co-indexed");
    assert_ne!(tg[1], tg[3]);
    assert_ne!(tg[0], tg[1]);
    assert!(tg.iter().all(|t| t.is_some()));
  }

  #[test]
  fn reindexing_twice_never_reuses_live_indices() {
    let mut ctl = UnifyControl::new();
    let raw = Term::fs(fs(&[("A", Term::var("X")), ("B", Term::var("Y"))]));
    let first = ctl.reindex(&raw);
    ctl.begin_episode();
    let second = ctl.reindex(&raw);
    let a: HashSet<_> = var_indices(&first).into_iter().collect();
    let b: HashSet<_> = var_indices(&second).into_iter().collect();
    assert!(a.is_disjoint(&b), "episodes of one control never share identities");
    let ta: HashSet<_> = tags(&first).into_iter().collect();
    let tb: HashSet<_> = tags(&second).into_iter().collect();
    assert!(ta.is_disjoint(&tb));
  }

  #[test]
  fn start_sequence_restarts_counters() {
    let mut ctl = UnifyControl::new();
    let _ = ctl.fresh_var();
    let _ = ctl.fresh_tag();
    ctl.start_sequence();
    assert_eq!(ctl.fresh_var(), VarId(0));
    assert_eq!(ctl.fresh_tag(), FsId(0));
  }

  #[test]
  fn resolve_tag_chases_chains() {
    let mut ctl = UnifyControl::new();
    assert!(ctl.alias_tag(FsId(1), FsId(2)).is_none());
    assert!(ctl.alias_tag(FsId(2), FsId(5)).is_none());
    assert_eq!(ctl.resolve_tag(FsId(1)), FsId(5));
    assert_eq!(ctl.resolve_tag(FsId(9)), FsId(9));
    ctl.begin_episode();
    assert_eq!(ctl.resolve_tag(FsId(1)), FsId(1));
  }

  #[test]
  fn condense_drops_singleton_tags_and_renumbers() {
    let mut shared = fs(&[]);
    shared.tag = Some(FsId(40));
    let mut lone = fs(&[]);
    lone.tag = Some(FsId(41));
    let mut outer = fs(&[
      ("L", Term::fs(shared.clone())),
      ("M", Term::fs(lone)),
      ("R", Term::fs(shared)),
    ]);
    outer.tag = Some(FsId(42));
    let mut t = Term::fs(outer);
    condense(&mut t);
    let tg = tags(&t);
    // outer (singleton 42) and M (singleton 41) lose their tags
    assert_eq!(tg[0], None);
    assert_eq!(tg[2], None);
    // the shared pair keeps a single compact tag
    assert_eq!(tg[1], Some(FsId(0)));
    assert_eq!(tg[3], Some(FsId(0)));
  }

  #[test]
  fn condense_remaps_inherits_ahead_of_its_source() {
    // the inheritor sits at "A", before the shared #9 pair at "Y"/"Z" in
    // traversal order; its link must still follow the renumbering
    let mut inheritor = fs(&[]);
    inheritor.inherits = Some(FsId(9));
    let mut shared = fs(&[]);
    shared.tag = Some(FsId(9));
    let outer = fs(&[
      ("A", Term::fs(inheritor)),
      ("Y", Term::fs(shared.clone())),
      ("Z", Term::fs(shared)),
    ]);
    let mut t = Term::fs(outer);
    condense(&mut t);
    let outer = t.as_fs().unwrap();
    let a = outer.get("A").unwrap().as_fs().unwrap();
    let y = outer.get("Y").unwrap().as_fs().unwrap();
    assert_eq!(y.tag, Some(FsId(0)));
    assert_eq!(a.inherits, y.tag, "inheritor follows the renumbered source");
  }

  #[test]
  fn condense_keeps_an_inherited_from_singleton_and_clears_dangling_links() {
    let mut source = fs(&[]);
    source.tag = Some(FsId(3));
    let mut inheritor = fs(&[]);
    inheritor.inherits = Some(FsId(3));
    let mut orphan = fs(&[]);
    orphan.inherits = Some(FsId(8)); // tag 8 occurs nowhere
    let outer =
      fs(&[("A", Term::fs(inheritor)), ("B", Term::fs(source)), ("C", Term::fs(orphan))]);
    let mut t = Term::fs(outer);
    condense(&mut t);
    let outer = t.as_fs().unwrap();
    assert_eq!(outer.get("B").unwrap().as_fs().unwrap().tag, Some(FsId(0)));
    assert_eq!(outer.get("A").unwrap().as_fs().unwrap().inherits, Some(FsId(0)));
    assert_eq!(outer.get("C").unwrap().as_fs().unwrap().inherits, None);
  }
}
