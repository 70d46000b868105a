use std::{
    fmt,
    ops::{Deref, DerefMut},
};

pub use logos::Span;

use crate::{decl::DeclId, ty::Ty};

pub type Ident = &'static str;

#[derive(Debug, PartialEq, Clone)]
pub struct Spanned<T> {
    pub inner: T,
    pub span: Span,
}

impl<T> Deref for Spanned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<T> DerefMut for Spanned<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

/// Slot on a tree node that a later pass fills in.
///
/// Parsing leaves every slot empty and the checker writes each one exactly
/// once; writing a slot twice is a bug in the pass doing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoration<T>(Option<T>);

impl<T> Decoration<T> {
    pub const fn empty() -> Self {
        Self(None)
    }

    pub fn get(&self) -> Option<&T> {
        self.0.as_ref()
    }

    #[track_caller]
    pub fn set(&mut self, value: T) {
        assert!(self.0.is_none(), "decoration written twice");
        self.0 = Some(value);
    }
}

impl<T> Default for Decoration<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> From<T> for Decoration<T> {
    fn from(value: T) -> Self {
        Self(Some(value))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub command: Spanned<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Empty,
    Assign { target: Vname, expr: Expr },
    Call { callee: Name, args: Box<[ActualParam]> },
    Seq(Box<[Spanned<Command>]>),
    Let { decls: Box<[Declaration]>, body: Box<Spanned<Command>> },
    If { cond: Expr, then: Box<Spanned<Command>>, r#else: Box<Spanned<Command>> },
    While { cond: Expr, body: Box<Spanned<Command>> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Declaration {
    pub ident: Spanned<Ident>,
    pub kind: DeclarationKind,
    pub span: Span,
    pub decl: Decoration<DeclId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclarationKind {
    Const(Expr),
    Var(TypeDenoter),
    Proc { params: Box<[FormalParam]>, body: Spanned<Command> },
    Func { params: Box<[FormalParam]>, ret: TypeDenoter, body: Expr },
    Type(TypeDenoter),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FormalParam {
    pub ident: Spanned<Ident>,
    pub kind: FormalParamKind,
    pub span: Span,
    pub decl: Decoration<DeclId>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormalParamKind {
    Value(TypeDenoter),
    Var(TypeDenoter),
    Proc(Box<[FormalParam]>),
    Func(Box<[FormalParam]>, TypeDenoter),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActualParam {
    Value(Expr),
    Var(Vname),
    Proc(Name),
    Func(Name),
}

impl ActualParam {
    pub fn span(&self) -> Span {
        match self {
            Self::Value(expr) => expr.span.clone(),
            Self::Var(vname) => vname.span.clone(),
            Self::Proc(name) | Self::Func(name) => name.span.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeDenoter {
    Named(Name),
    Array { len: Spanned<i64>, elem: Box<TypeDenoter> },
    Record(Box<[FieldType]>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldType {
    pub ident: Spanned<Ident>,
    pub ty: TypeDenoter,
}

/// Use of an identifier, bound to its declaration by the checker.
#[derive(Debug, Clone, PartialEq)]
pub struct Name {
    pub ident: Ident,
    pub span: Span,
    pub decl: Decoration<DeclId>,
}

impl Name {
    pub fn new(ident: Ident, span: Span) -> Self {
        Self { ident, span, decl: Decoration::empty() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vname {
    pub kind: VnameKind,
    pub span: Span,
    pub ty: Decoration<Ty>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VnameKind {
    Simple(Name),
    Field { vname: Box<Vname>, field: Spanned<Ident> },
    Index { vname: Box<Vname>, index: Box<Expr> },
}

impl Vname {
    pub fn new(kind: VnameKind, span: Span) -> Self {
        Self { kind, span, ty: Decoration::empty() }
    }

    /// The identifier the v-name is rooted at.
    pub fn root(&self) -> &Name {
        match &self.kind {
            VnameKind::Simple(name) => name,
            VnameKind::Field { vname, .. } | VnameKind::Index { vname, .. } => vname.root(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub ty: Decoration<Ty>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Vname(Vname),
    Call { callee: Name, args: Box<[ActualParam]> },
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinOp, exprs: Box<[Expr; 2]> },
    If { exprs: Box<[Expr; 3]> },
    Let { decls: Box<[Declaration]>, body: Box<Expr> },
    Array(Box<[Expr]>),
    Record(Box<[FieldInit]>),
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span, ty: Decoration::empty() }
    }

    pub fn literal(&self) -> Option<Literal> {
        match self.kind {
            ExprKind::Literal(literal) => Some(literal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInit {
    pub ident: Spanned<Ident>,
    pub expr: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Literal {
    Int(i64),
    Char(char),
    /// Only produced by constant folding; the source language spells
    /// truth values as the standard constants `true` and `false`.
    Bool(bool),
}

impl Literal {
    /// The TAM word representing this value.
    pub fn word(self) -> i64 {
        match self {
            Self::Int(int) => int,
            Self::Char(char) => char as i64,
            Self::Bool(bool) => bool as i64,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(int) => write!(f, "{int}"),
            Self::Char(char) => write!(f, "'{char}'"),
            Self::Bool(bool) => write!(f, "{bool}"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOp {
    pub fn spelling(self) -> &'static str {
        match self {
            Self::Or => "\\/",
            Self::And => "/\\",
            Self::Eq => "=",
            Self::Ne => "\\=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "//",
        }
    }
}

impl TryFrom<&str> for BinOp {
    type Error = ();

    fn try_from(spelling: &str) -> Result<Self, Self::Error> {
        Ok(match spelling {
            "\\/" => Self::Or,
            "/\\" => Self::And,
            "=" => Self::Eq,
            "\\=" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "//" => Self::Mod,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum UnaryOp {
    Not,
    Neg,
}

impl UnaryOp {
    pub fn spelling(self) -> &'static str {
        match self {
            Self::Not => "\\",
            Self::Neg => "-",
        }
    }
}

impl TryFrom<&str> for UnaryOp {
    type Error = ();

    fn try_from(spelling: &str) -> Result<Self, Self::Error> {
        match spelling {
            "\\" => Ok(Self::Not),
            "-" => Ok(Self::Neg),
            _ => Err(()),
        }
    }
}
