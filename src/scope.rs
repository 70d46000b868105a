use rustc_hash::FxHashMap;

use crate::{ast::Ident, decl::DeclId};

/// Stack of lexical scopes mapping identifiers to their declarations.
///
/// Frame 0 is created with the table and is never closed.
#[derive(Debug)]
pub struct SymbolTable {
    frames: Vec<FxHashMap<Ident, DeclId>>,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self { frames: vec![FxHashMap::default()] }
    }

    /// Number of frames above the outermost one.
    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn open_scope(&mut self) {
        self.frames.push(FxHashMap::default());
    }

    pub fn close_scope(&mut self) {
        assert!(self.frames.len() > 1, "closed the outermost scope");
        self.frames.pop();
    }

    /// Binds `name` in the innermost frame, returning the existing binding if
    /// that frame already has one.
    pub fn enter(&mut self, name: Ident, decl: DeclId) -> Result<(), DeclId> {
        let frame = self.frames.last_mut().expect("symbol table always has a frame");
        match frame.get(name) {
            Some(&previous) => Err(previous),
            None => {
                frame.insert(name, decl);
                Ok(())
            }
        }
    }

    /// Finds the innermost binding of `name` and how many frames out it was.
    pub fn retrieve(&self, name: Ident) -> Option<(DeclId, usize)> {
        self.frames
            .iter()
            .rev()
            .enumerate()
            .find_map(|(levels_up, frame)| frame.get(name).map(|&decl| (decl, levels_up)))
    }
}

#[cfg(test)]
mod tests {
    use super::SymbolTable;
    use crate::{
        decl::{Decl, DeclKind, Decls},
        ty::Ty,
    };

    fn decl(decls: &mut Decls, name: &'static str) -> crate::decl::DeclId {
        decls.push(Decl { name, kind: DeclKind::Var, ty: Ty::int(), builtin: None, span: None })
    }

    #[test]
    fn inner_binding_shadows_outer() {
        let mut decls = Decls::new();
        let (outer, inner) = (decl(&mut decls, "x"), decl(&mut decls, "x"));
        let mut table = SymbolTable::new();
        table.enter("x", outer).unwrap();
        table.open_scope();
        table.enter("x", inner).unwrap();
        assert_eq!(table.retrieve("x"), Some((inner, 0)));
        table.close_scope();
        assert_eq!(table.retrieve("x"), Some((outer, 0)));
    }

    #[test]
    fn duplicate_in_same_frame_is_rejected() {
        let mut decls = Decls::new();
        let (first, second) = (decl(&mut decls, "x"), decl(&mut decls, "x"));
        let mut table = SymbolTable::new();
        table.open_scope();
        table.enter("x", first).unwrap();
        assert_eq!(table.enter("x", second), Err(first));
        assert_eq!(table.retrieve("x"), Some((first, 0)));
    }

    #[test]
    fn closed_frames_are_gone() {
        let mut decls = Decls::new();
        let (a, b) = (decl(&mut decls, "a"), decl(&mut decls, "b"));
        let mut table = SymbolTable::new();
        table.enter("a", a).unwrap();
        table.open_scope();
        table.open_scope();
        table.enter("b", b).unwrap();
        assert_eq!(table.retrieve("a"), Some((a, 2)));
        assert_eq!(table.depth(), 2);
        table.close_scope();
        assert_eq!(table.retrieve("b"), None);
    }
}
