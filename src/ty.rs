use std::{fmt, rc::Rc};

use crate::ast::Ident;

/// Words occupied by an address on the TAM stack.
pub const ADDRESS_SIZE: u32 = 1;
/// Words occupied by a routine closure (static link + code address).
pub const CLOSURE_SIZE: u32 = 2;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Ty {
    kind: Rc<TyKind>,
}

#[derive(Debug, PartialEq, Eq, Hash)]
pub enum TyKind {
    /// Type of a node whose checking already produced a diagnostic.
    Error,
    Bool,
    Char,
    Int,
    Array { len: u32, elem: Ty },
    Record { fields: Box<[Field]> },
    Proc { params: Box<[Param]> },
    Func { params: Box<[Param]>, ret: Ty },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Field {
    pub name: Ident,
    pub ty: Ty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamMode {
    Value,
    Var,
    Proc,
    Func,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Param {
    pub mode: ParamMode,
    pub ty: Ty,
}

macro_rules! impl_ty_const {
    ($name: ident, $kind: ident) => {
        pub fn $name() -> Ty {
            thread_local! {
                static CACHE: Ty = Ty::from(TyKind::$kind);
            }
            CACHE.with(Ty::clone)
        }
    };
}

impl Ty {
    impl_ty_const!(error, Error);

    impl_ty_const!(bool, Bool);

    impl_ty_const!(char, Char);

    impl_ty_const!(int, Int);

    pub fn array(len: u32, elem: Ty) -> Self {
        TyKind::Array { len, elem }.into()
    }

    pub fn record(fields: impl IntoIterator<Item = Field>) -> Self {
        TyKind::Record { fields: fields.into_iter().collect() }.into()
    }

    pub fn proc(params: impl IntoIterator<Item = Param>) -> Self {
        TyKind::Proc { params: params.into_iter().collect() }.into()
    }

    pub fn func(params: impl IntoIterator<Item = Param>, ret: Ty) -> Self {
        TyKind::Func { params: params.into_iter().collect(), ret }.into()
    }

    pub fn kind(&self) -> &TyKind {
        &self.kind
    }

    pub fn is_error(&self) -> bool {
        matches!(self.kind(), TyKind::Error)
    }

    /// Structural equality that lets `Error` stand in for any type, so a fault
    /// is reported once and not again by every consumer of the faulty node.
    pub fn compatible(&self, other: &Ty) -> bool {
        if self.is_error() || other.is_error() {
            return true;
        }
        match (self.kind(), other.kind()) {
            (TyKind::Array { len: l, elem: le }, TyKind::Array { len: r, elem: re }) => {
                l == r && le.compatible(re)
            }
            (TyKind::Record { fields: l }, TyKind::Record { fields: r }) => {
                l.len() == r.len()
                    && l.iter().zip(r).all(|(l, r)| l.name == r.name && l.ty.compatible(&r.ty))
            }
            (TyKind::Proc { params: l }, TyKind::Proc { params: r }) => params_compatible(l, r),
            (TyKind::Func { params: l, ret: lr }, TyKind::Func { params: r, ret: rr }) => {
                params_compatible(l, r) && lr.compatible(rr)
            }
            (l, r) => l == r,
        }
    }

    pub fn field(&self, name: Ident) -> Option<&Ty> {
        let TyKind::Record { fields } = self.kind() else { return None };
        fields.iter().find(|field| field.name == name).map(|field| &field.ty)
    }

    /// Word offset of `name` within a record value. `None` when there is no
    /// such field or the fields before it have no size.
    pub fn field_offset(&self, name: Ident) -> Option<u32> {
        let TyKind::Record { fields } = self.kind() else { return None };
        let mut offset: u32 = 0;
        for field in fields {
            if field.name == name {
                return Some(offset);
            }
            offset = offset.checked_add(field.ty.size()?)?;
        }
        None
    }

    pub fn params(&self) -> Option<&[Param]> {
        match self.kind() {
            TyKind::Proc { params } | TyKind::Func { params, .. } => Some(params),
            _ => None,
        }
    }

    /// Number of TAM words a value of this type occupies, `None` if the
    /// count overflows.
    pub fn size(&self) -> Option<u32> {
        match self.kind() {
            TyKind::Error | TyKind::Proc { .. } | TyKind::Func { .. } => Some(0),
            TyKind::Bool | TyKind::Char | TyKind::Int => Some(1),
            TyKind::Array { len, elem } => len.checked_mul(elem.size()?),
            TyKind::Record { fields } => fields
                .iter()
                .try_fold(0u32, |total, field| total.checked_add(field.ty.size()?)),
        }
    }
}

fn params_compatible(l: &[Param], r: &[Param]) -> bool {
    l.len() == r.len() && l.iter().zip(r).all(|(l, r)| l.mode == r.mode && l.ty.compatible(&r.ty))
}

impl From<TyKind> for Ty {
    fn from(kind: TyKind) -> Self {
        Self { kind: Rc::new(kind) }
    }
}

impl fmt::Debug for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.kind, f)
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            TyKind::Error => write!(f, "<error>"),
            TyKind::Bool => write!(f, "Boolean"),
            TyKind::Char => write!(f, "Char"),
            TyKind::Int => write!(f, "Integer"),
            TyKind::Array { len, elem } => write!(f, "array {len} of {elem}"),
            TyKind::Record { fields } => {
                write!(f, "record ")?;
                for (i, field) in fields.iter().enumerate() {
                    let prefix = if i != 0 { ", " } else { "" };
                    write!(f, "{prefix}{}: {}", field.name, field.ty)?;
                }
                write!(f, " end")
            }
            TyKind::Proc { params } => write!(f, "proc({})", DisplayParams(params)),
            TyKind::Func { params, ret } => write!(f, "func({}): {ret}", DisplayParams(params)),
        }
    }
}

struct DisplayParams<'a>(&'a [Param]);

impl fmt::Display for DisplayParams<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, param) in self.0.iter().enumerate() {
            let prefix = if i != 0 { ", " } else { "" };
            let var = if param.mode == ParamMode::Var { "var " } else { "" };
            write!(f, "{prefix}{var}{}", param.ty)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(fields: &[(Ident, Ty)]) -> Ty {
        Ty::record(fields.iter().map(|(name, ty)| Field { name: *name, ty: ty.clone() }))
    }

    #[test]
    fn records_are_structural() {
        let a = record(&[("x", Ty::int()), ("c", Ty::char())]);
        let b = record(&[("x", Ty::int()), ("c", Ty::char())]);
        let reordered = record(&[("c", Ty::char()), ("x", Ty::int())]);
        assert!(a.compatible(&b));
        assert_eq!(a, b);
        assert!(!a.compatible(&reordered));
    }

    #[test]
    fn arrays_compare_length_and_element() {
        assert!(Ty::array(3, Ty::int()).compatible(&Ty::array(3, Ty::int())));
        assert!(!Ty::array(3, Ty::int()).compatible(&Ty::array(4, Ty::int())));
        assert!(!Ty::array(3, Ty::int()).compatible(&Ty::array(3, Ty::char())));
    }

    #[test]
    fn error_is_compatible_with_everything() {
        assert!(Ty::error().compatible(&Ty::int()));
        assert!(Ty::array(2, Ty::bool()).compatible(&Ty::error()));
        assert!(Ty::array(2, Ty::error()).compatible(&Ty::array(2, Ty::char())));
    }

    #[test]
    fn sizes_and_offsets() {
        let point = record(&[("x", Ty::int()), ("y", Ty::int())]);
        let line = record(&[("tag", Ty::char()), ("ends", Ty::array(2, point.clone()))]);
        assert_eq!(point.size(), Some(2));
        assert_eq!(line.size(), Some(5));
        assert_eq!(line.field_offset("ends"), Some(1));
        assert_eq!(line.field_offset("missing"), None);
        assert_eq!(line.field("tag"), Some(&Ty::char()));
    }

    #[test]
    fn sizes_that_overflow_are_none() {
        let cube = Ty::array(30000, Ty::array(30000, Ty::array(30000, Ty::int())));
        assert_eq!(cube.size(), None);
        let wide = Ty::array(65536, Ty::array(65536, Ty::int()));
        assert_eq!(wide.size(), None);
        let after = record(&[("big", cube), ("x", Ty::int())]);
        assert_eq!(after.size(), None);
        assert_eq!(after.field_offset("big"), Some(0));
        assert_eq!(after.field_offset("x"), None);
    }

    #[test]
    fn routine_signatures() {
        let by_value = Ty::proc([Param { mode: ParamMode::Value, ty: Ty::int() }]);
        let by_ref = Ty::proc([Param { mode: ParamMode::Var, ty: Ty::int() }]);
        assert!(!by_value.compatible(&by_ref));
        assert_eq!(by_ref.to_string(), "proc(var Integer)");
        assert_eq!(Ty::func([], Ty::bool()).to_string(), "func(): Boolean");
    }
}
