use std::ops::{Index, IndexMut};

use crate::{
    ast::{Ident, Span},
    builtins::Builtin,
    ty::Ty,
};

/// Index of a declaration in [`Decls`]. Use sites store this instead of a
/// reference to the declaring node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeclId(u32);

impl DeclId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Const,
    Var,
    Type,
    Proc,
    Func,
    ValueParam,
    VarParam,
    ProcParam,
    FuncParam,
}

impl DeclKind {
    /// Can appear as a simple v-name.
    pub fn is_value(self) -> bool {
        matches!(self, Self::Const | Self::Var | Self::ValueParam | Self::VarParam)
    }

    /// Can be the target of an assignment or a `var` argument.
    pub fn is_variable(self) -> bool {
        matches!(self, Self::Var | Self::VarParam)
    }

    pub fn is_proc(self) -> bool {
        matches!(self, Self::Proc | Self::ProcParam)
    }

    pub fn is_func(self) -> bool {
        matches!(self, Self::Func | Self::FuncParam)
    }
}

#[derive(Debug, Clone)]
pub struct Decl {
    pub name: Ident,
    pub kind: DeclKind,
    /// The value's type, the denoted type for `type` declarations, or the
    /// signature for routines.
    pub ty: Ty,
    pub builtin: Option<Builtin>,
    /// `None` for the standard environment.
    pub span: Option<Span>,
}

#[derive(Debug, Default)]
pub struct Decls {
    decls: Vec<Decl>,
}

impl Decls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, decl: Decl) -> DeclId {
        let id = DeclId(u32::try_from(self.decls.len()).expect("more than u32::MAX declarations"));
        log::trace!("declared {:?} `{}` as {id:?}", decl.kind, decl.name);
        self.decls.push(decl);
        id
    }

    pub fn len(&self) -> usize {
        self.decls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decls.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (DeclId, &Decl)> {
        (0..).map(DeclId).zip(&self.decls)
    }
}

impl Index<DeclId> for Decls {
    type Output = Decl;

    fn index(&self, id: DeclId) -> &Self::Output {
        &self.decls[id.index()]
    }
}

impl IndexMut<DeclId> for Decls {
    fn index_mut(&mut self, id: DeclId) -> &mut Self::Output {
        &mut self.decls[id.index()]
    }
}
