//! Readable rendering of terms, with type names resolved through a [`Types`]
//! registry when one is supplied.

use crate::lattice::Types;
use crate::types::{FeatStruc, FeatVar, Term, TypeId};
use pretty::{Arena, DocAllocator, DocBuilder};

const WIDTH: usize = 100;

struct Pretty<'a> {
  types: Option<&'a Types>,
  arena: &'a Arena<'a>,
  comma: Doc<'a>,
}

impl Pretty<'_> {
  fn with<R>(types: Option<&Types>, f: impl for<'b> FnOnce(&'b Pretty<'b>) -> R) -> R {
    let arena = Arena::new();
    f(&Pretty { types, arena: &arena, comma: arena.text(",").append(arena.line()) })
  }
}

impl<'a> std::ops::Deref for Pretty<'a> {
  type Target = &'a Arena<'a>;
  fn deref(&self) -> &Self::Target { &self.arena }
}

type Doc<'a> = DocBuilder<'a, Arena<'a>>;

impl<'a> Pretty<'a> {
  fn commas(&self, docs: impl IntoIterator<Item = Doc<'a>>) -> Doc<'a> {
    self.intersperse(docs, self.comma.clone()).nest(2).group()
  }

  fn ty(&self, id: TypeId) -> Doc<'a> {
    match self.types {
      Some(types) => self.text(types.name(id).to_owned()),
      None => self.text(format!("t{}", id.0)),
    }
  }

  fn var(&self, v: &FeatVar) -> Doc<'a> {
    let mut doc = self.text(format!("?{}", v.name));
    if let Some(i) = v.index {
      doc = doc.append(self.text(format!(".{}", i.0)))
    }
    if v.ty != TypeId::TOP {
      doc = doc.append(self.text(":")).append(self.ty(v.ty))
    }
    doc
  }

  fn fs(&self, fs: &FeatStruc) -> Doc<'a> {
    let mut doc = self.nil();
    if let Some(tag) = fs.tag {
      doc = doc.append(self.text(format!("#{}", tag.0)))
    }
    if let Some(src) = fs.inherits {
      doc = doc.append(self.text(format!("^{}", src.0)))
    }
    let attrs = fs.attrs.iter().map(|(attr, val)| {
      self.text(attr.to_string()).append(self.text(": ")).append(self.term(val))
    });
    doc.append(self.commas(attrs).brackets()).group()
  }

  fn term(&self, tm: &Term) -> Doc<'a> {
    match tm {
      Term::Atom(id) => self.ty(*id),
      Term::Var(v) => self.var(v),
      Term::Fs(fs) => self.fs(fs),
      Term::Sem(s) => self.text(format!("{:?}", s.0)),
    }
  }
}

/// A [`Term`] bundled with the registry needed to print its type names.
/// Created by [`Types::show`].
pub struct TermDisplay<'a> {
  types: Option<&'a Types>,
  tm: &'a Term,
}

impl std::fmt::Display for TermDisplay<'_> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    Pretty::with(self.types, |p| p.term(self.tm).render_fmt(WIDTH, f))
  }
}

impl Types {
  pub fn show<'a>(&'a self, tm: &'a Term) -> TermDisplay<'a> {
    TermDisplay { types: Some(self), tm }
  }
}

/// Render without a registry; type atoms fall back to their numeric ids.
pub fn show(tm: &Term) -> TermDisplay<'_> { TermDisplay { types: None, tm } }
