use crate::{
    ast::Literal,
    decl::{Decl, DeclKind, Decls},
    scope::SymbolTable,
    tam::{Primitive, MAXINT},
    ty::{Param, ParamMode, Ty},
};

/// Names predeclared in the outermost scope.
#[derive(
    macros::NumVariants, macros::AllVariants, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord,
)]
pub enum Builtin {
    Boolean,
    Char,
    Integer,
    False,
    True,
    Maxint,
    Chr,
    Ord,
    Eol,
    Eof,
    Get,
    Put,
    GetInt,
    PutInt,
    GetEol,
    PutEol,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Self::Boolean => "Boolean",
            Self::Char => "Char",
            Self::Integer => "Integer",
            Self::False => "false",
            Self::True => "true",
            Self::Maxint => "maxint",
            Self::Chr => "chr",
            Self::Ord => "ord",
            Self::Eol => "eol",
            Self::Eof => "eof",
            Self::Get => "get",
            Self::Put => "put",
            Self::GetInt => "getint",
            Self::PutInt => "putint",
            Self::GetEol => "geteol",
            Self::PutEol => "puteol",
        }
    }

    pub fn kind(self) -> DeclKind {
        match self {
            Self::Boolean | Self::Char | Self::Integer => DeclKind::Type,
            Self::False | Self::True | Self::Maxint => DeclKind::Const,
            Self::Chr | Self::Ord | Self::Eol | Self::Eof => DeclKind::Func,
            Self::Get | Self::Put | Self::GetInt | Self::PutInt | Self::GetEol | Self::PutEol => {
                DeclKind::Proc
            }
        }
    }

    pub fn ty(self) -> Ty {
        let value = |ty| Param { mode: ParamMode::Value, ty };
        let var = |ty| Param { mode: ParamMode::Var, ty };
        match self {
            Self::Boolean | Self::False | Self::True => Ty::bool(),
            Self::Char => Ty::char(),
            Self::Integer | Self::Maxint => Ty::int(),
            Self::Chr => Ty::func([value(Ty::int())], Ty::char()),
            Self::Ord => Ty::func([value(Ty::char())], Ty::int()),
            Self::Eol | Self::Eof => Ty::func([], Ty::bool()),
            Self::Get => Ty::proc([var(Ty::char())]),
            Self::Put => Ty::proc([value(Ty::char())]),
            Self::GetInt => Ty::proc([var(Ty::int())]),
            Self::PutInt => Ty::proc([value(Ty::int())]),
            Self::GetEol | Self::PutEol => Ty::proc([]),
        }
    }

    /// Compile-time value of the standard constants.
    pub fn value(self) -> Option<Literal> {
        match self {
            Self::False => Some(Literal::Bool(false)),
            Self::True => Some(Literal::Bool(true)),
            Self::Maxint => Some(Literal::Int(MAXINT)),
            _ => None,
        }
    }

    /// The TAM primitive implementing a standard routine.
    pub fn primitive(self) -> Option<Primitive> {
        Some(match self {
            Self::Chr | Self::Ord => Primitive::Id,
            Self::Eol => Primitive::Eol,
            Self::Eof => Primitive::Eof,
            Self::Get => Primitive::Get,
            Self::Put => Primitive::Put,
            Self::GetInt => Primitive::GetInt,
            Self::PutInt => Primitive::PutInt,
            Self::GetEol => Primitive::GetEol,
            Self::PutEol => Primitive::PutEol,
            _ => return None,
        })
    }
}

/// Declares every builtin in the table's current frame.
pub fn declare_standard_environment(table: &mut SymbolTable, decls: &mut Decls) {
    for builtin in Builtin::ALL {
        let id = decls.push(Decl {
            name: builtin.name(),
            kind: builtin.kind(),
            ty: builtin.ty(),
            builtin: Some(builtin),
            span: None,
        });
        if table.enter(builtin.name(), id).is_err() {
            unreachable!("builtin `{}` declared twice", builtin.name());
        }
    }
    log::trace!("declared {} builtins", Builtin::VARIANT_COUNT);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_builtin_is_reachable() {
        let mut table = SymbolTable::new();
        let mut decls = Decls::new();
        declare_standard_environment(&mut table, &mut decls);
        assert_eq!(decls.len(), Builtin::VARIANT_COUNT);
        for builtin in Builtin::ALL {
            let (id, levels_up) = table.retrieve(builtin.name()).unwrap();
            assert_eq!(levels_up, 0);
            assert_eq!(decls[id].builtin, Some(builtin));
        }
    }

    #[test]
    fn routines_have_primitives() {
        for builtin in Builtin::ALL {
            let routine = matches!(builtin.kind(), DeclKind::Proc | DeclKind::Func);
            assert_eq!(builtin.primitive().is_some(), routine, "{builtin:?}");
        }
    }
}
