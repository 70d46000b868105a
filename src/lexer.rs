use std::fmt;

use logos::Logos;
use macros::EnumKind;

use crate::intern::intern;

#[derive(Default, Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    FromIntErr(#[from] std::num::ParseIntError),
    #[default]
    #[error("unrecognised character")]
    Unknown,
}

#[derive(Debug, Logos, Clone, Copy, PartialEq, EnumKind)]
#[enum_kind(TokenKind)]
#[logos(error = Error)]
#[logos(skip "![^\n]*")]
#[logos(skip "[ \t\r\n]+")]
#[rustfmt::skip]
pub enum Token {
    // Symbols
    #[token("(")] LParen,
    #[token(")")] RParen,
    #[token("[")] LBracket,
    #[token("]")] RBracket,
    #[token("{")] LBrace,
    #[token("}")] RBrace,
    #[token(",")] Comma,
    #[token(";")] Semicolon,
    #[token(":")] Colon,
    #[token(":=")] Becomes,
    #[token("~")] Is,
    #[token(".")] Dot,
    // Keywords
    #[token("array")] Array,
    #[token("begin")] Begin,
    #[token("const")] Const,
    #[token("do")] Do,
    #[token("else")] Else,
    #[token("end")] End,
    #[token("func")] Func,
    #[token("if")] If,
    #[token("in")] In,
    #[token("let")] Let,
    #[token("of")] Of,
    #[token("proc")] Proc,
    #[token("record")] Record,
    #[token("then")] Then,
    #[token("type")] Type,
    #[token("var")] Var,
    #[token("while")] While,
    // Literals
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>())]
    Int(i64),
    #[regex(r"'[^\n]'", |lex| lex.slice()[1..].chars().next())]
    Char(char),
    #[regex(r"[+\-*/=<>\\&@%^?]+", |lex| intern(lex.slice()))]
    Operator(S),
    #[regex(r"[A-Za-z][A-Za-z0-9]*", |lex| intern(lex.slice()))]
    Ident(S),
}

// avoid Logos' special case for &str
type S = &'static str;

impl TokenKind {
    pub fn repr(self) -> &'static str {
        match self {
            Self::LParen => "(",
            Self::RParen => ")",
            Self::LBracket => "[",
            Self::RBracket => "]",
            Self::LBrace => "{",
            Self::RBrace => "}",
            Self::Comma => ",",
            Self::Semicolon => ";",
            Self::Colon => ":",
            Self::Becomes => ":=",
            Self::Is => "~",
            Self::Dot => ".",
            Self::Array => "array",
            Self::Begin => "begin",
            Self::Const => "const",
            Self::Do => "do",
            Self::Else => "else",
            Self::End => "end",
            Self::Func => "func",
            Self::If => "if",
            Self::In => "in",
            Self::Let => "let",
            Self::Of => "of",
            Self::Proc => "proc",
            Self::Record => "record",
            Self::Then => "then",
            Self::Type => "type",
            Self::Var => "var",
            Self::While => "while",
            Self::Int => "integer literal",
            Self::Char => "character literal",
            Self::Operator => "operator",
            Self::Ident => "identifier",
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(int) => write!(f, "{int}"),
            Self::Char(char) => write!(f, "'{char}'"),
            Self::Operator(op) | Self::Ident(op) => write!(f, "{op}"),
            _ => write!(f, "{}", self.kind()),
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr())
    }
}
