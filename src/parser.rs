use logos::Logos;
use miette::{Error, LabeledSpan, Result};

use crate::{
    ast::{
        ActualParam, BinOp, Command, Declaration, DeclarationKind, Expr, ExprKind, FieldInit,
        FieldType, FormalParam, FormalParamKind, Ident, Literal, Name, Program, Span, Spanned,
        TypeDenoter, UnaryOp, Vname, VnameKind,
    },
    lexer::{self, Token, TokenKind},
};

pub fn parse(src: &str) -> Result<Program> {
    Stream::new(src).parse_root()
}

type Lexer<'a> = logos::Lexer<'a, Token>;

#[derive(Clone)]
struct Stream<'a> {
    lexer: Lexer<'a>,
    prev_end: usize,
}

impl<'a> Stream<'a> {
    fn new(content: &'a str) -> Self {
        Self { lexer: Token::lexer(content), prev_end: 0 }
    }

    fn parse<T: Parse>(&mut self) -> Result<T> {
        T::parse(self)
    }

    fn parse_root(mut self) -> Result<Program> {
        let command = self.parse()?;
        if let Some(got) = self.peek_or_end()? {
            let span = LabeledSpan::at(self.next_span(), "expected end of program");
            return Err(miette::miette!(labels = vec![span], "unexpected '{got}' after program")
                .with_source_code(self.src()));
        }
        Ok(Program { command })
    }

    fn src(&self) -> String {
        self.lexer.source().to_owned()
    }

    /// Start of the next token.
    fn start(&self) -> usize {
        self.next_span().start
    }

    /// End of the last consumed token.
    fn end(&self) -> usize {
        self.lexer.span().end
    }

    fn next_span(&self) -> Span {
        let mut copy = self.lexer.clone();
        _ = copy.next();
        copy.span()
    }

    fn span_from(&self, start: usize) -> Span {
        start..self.end().max(start)
    }

    fn parse_single_command(&mut self) -> Result<Spanned<Command>> {
        let start = self.start();
        let inner = match self.peek_or_end()? {
            None | Some(Token::Semicolon | Token::End | Token::Else | Token::In) => {
                return Ok(Spanned { inner: Command::Empty, span: start..start });
            }
            Some(Token::Begin) => {
                self.skip();
                let command = self.parse()?;
                self.expect_token(Token::End)?;
                command
            }
            Some(Token::Let) => {
                self.skip();
                let decls = self.parse_declarations()?;
                self.expect_token(Token::In)?;
                let body = Box::new(self.parse_single_command()?);
                Command::Let { decls, body }
            }
            Some(Token::If) => {
                self.skip();
                let cond = self.parse()?;
                self.expect_token(Token::Then)?;
                let then = Box::new(self.parse_single_command()?);
                self.expect_token(Token::Else)?;
                let r#else = Box::new(self.parse_single_command()?);
                Command::If { cond, then, r#else }
            }
            Some(Token::While) => {
                self.skip();
                let cond = self.parse()?;
                self.expect_token(Token::Do)?;
                let body = Box::new(self.parse_single_command()?);
                Command::While { cond, body }
            }
            Some(Token::Ident(ident)) => {
                self.skip();
                let name = Name::new(ident, self.lexer.span());
                if self.peek_or_end()? == Some(Token::LParen) {
                    Command::Call { callee: name, args: self.parse_actuals()? }
                } else {
                    let target = self.parse_vname_rest(name)?;
                    self.expect_token(Token::Becomes)?;
                    Command::Assign { target, expr: self.parse()? }
                }
            }
            Some(got) => {
                self.skip();
                return Err(self.expect_failed(got.kind(), &[
                    TokenKind::Ident,
                    TokenKind::Begin,
                    TokenKind::Let,
                    TokenKind::If,
                    TokenKind::While,
                ]));
            }
        };
        Ok(Spanned { inner, span: self.span_from(start) })
    }

    fn parse_declarations(&mut self) -> Result<Box<[Declaration]>> {
        let mut decls = vec![self.parse()?];
        while self.try_token(TokenKind::Semicolon)?.is_some() {
            decls.push(self.parse()?);
        }
        Ok(decls.into())
    }

    fn parse_formals(&mut self) -> Result<Box<[FormalParam]>> {
        self.expect_token(Token::LParen)?;
        self.parse_separated(TokenKind::Comma, TokenKind::RParen)
    }

    fn parse_actuals(&mut self) -> Result<Box<[ActualParam]>> {
        self.expect_token(Token::LParen)?;
        self.parse_separated(TokenKind::Comma, TokenKind::RParen)
    }

    fn parse_binary(&mut self, precedence: usize) -> Result<Expr> {
        const OPS: &[&[BinOp]] = &[
            &[BinOp::Or],
            &[BinOp::And],
            &[BinOp::Eq, BinOp::Ne, BinOp::Lt, BinOp::Le, BinOp::Gt, BinOp::Ge],
            &[BinOp::Add, BinOp::Sub],
            &[BinOp::Mul, BinOp::Div, BinOp::Mod],
        ];

        let Some(&ops) = OPS.get(precedence) else {
            return self.parse_primary();
        };
        let start = self.start();
        let mut root = self.parse_binary(precedence + 1)?;
        loop {
            let Some(Token::Operator(spelling)) = self.peek_or_end()? else { break };
            let Ok(op) = BinOp::try_from(spelling) else { break };
            if !ops.contains(&op) {
                break;
            }
            self.skip();
            let expr = self.parse_binary(precedence + 1)?;
            root = Expr::new(ExprKind::Binary { op, exprs: Box::new([root, expr]) }, self.span_from(start));
        }
        Ok(root)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let start = self.start();
        let kind = match self.bump()? {
            Token::Int(int) => ExprKind::Literal(Literal::Int(int)),
            Token::Char(char) => ExprKind::Literal(Literal::Char(char)),
            Token::Ident(ident) => {
                let name = Name::new(ident, self.lexer.span());
                if self.peek_or_end()? == Some(Token::LParen) {
                    ExprKind::Call { callee: name, args: self.parse_actuals()? }
                } else {
                    ExprKind::Vname(self.parse_vname_rest(name)?)
                }
            }
            Token::Operator(spelling) => {
                let Ok(op) = UnaryOp::try_from(spelling) else {
                    return Err(self.unknown_operator(spelling));
                };
                ExprKind::Unary { op, expr: Box::new(self.parse_primary()?) }
            }
            Token::LParen => {
                let expr = self.parse()?;
                self.expect_token(Token::RParen)?;
                return Ok(expr);
            }
            Token::LBrace => {
                let mut fields = vec![];
                loop {
                    let ident = self.parse()?;
                    self.expect_token(Token::Is)?;
                    fields.push(FieldInit { ident, expr: self.parse()? });
                    if self.try_token(TokenKind::Comma)?.is_none() {
                        break;
                    }
                }
                self.expect_token(Token::RBrace)?;
                ExprKind::Record(fields.into())
            }
            Token::LBracket => {
                let mut elems = vec![self.parse()?];
                while self.try_token(TokenKind::Comma)?.is_some() {
                    elems.push(self.parse()?);
                }
                self.expect_token(Token::RBracket)?;
                ExprKind::Array(elems.into())
            }
            got => {
                return Err(self.expect_failed(got.kind(), &[
                    TokenKind::Int,
                    TokenKind::Char,
                    TokenKind::Ident,
                    TokenKind::Operator,
                    TokenKind::LParen,
                    TokenKind::LBrace,
                    TokenKind::LBracket,
                ]));
            }
        };
        Ok(Expr::new(kind, self.span_from(start)))
    }

    fn parse_vname_rest(&mut self, root: Name) -> Result<Vname> {
        let start = root.span.start;
        let span = root.span.clone();
        let mut vname = Vname::new(VnameKind::Simple(root), span);
        loop {
            vname = match self.peek_or_end()? {
                Some(Token::Dot) => {
                    self.skip();
                    let field = self.parse()?;
                    let kind = VnameKind::Field { vname: Box::new(vname), field };
                    Vname::new(kind, self.span_from(start))
                }
                Some(Token::LBracket) => {
                    self.skip();
                    let index = Box::new(self.parse()?);
                    self.expect_token(Token::RBracket)?;
                    let kind = VnameKind::Index { vname: Box::new(vname), index };
                    Vname::new(kind, self.span_from(start))
                }
                _ => return Ok(vname),
            };
        }
    }

    fn parse_separated<T>(&mut self, sep: TokenKind, terminator: TokenKind) -> Result<Box<[T]>>
    where
        T: Parse,
    {
        let mut args = vec![];
        while self.peek()?.kind() != terminator {
            args.push(self.parse()?);
            if self.peek()?.kind() == terminator {
                break;
            }
            self.expect_token(sep)?;
        }
        self.skip();
        Ok(args.into())
    }

    fn expect_token(&mut self, expected: impl Into<TokenKind>) -> Result<Token> {
        self.expect_any(&[expected.into()])
    }

    fn expect_any(&mut self, one_of: &[TokenKind]) -> Result<Token> {
        match self.bump()? {
            got if one_of.contains(&got.kind()) => Ok(got),
            got => Err(self.expect_failed(got.kind(), one_of)),
        }
    }

    #[cold]
    #[inline(never)]
    fn expect_failed(&self, got: TokenKind, one_of: &[TokenKind]) -> Error {
        debug_assert_ne!(one_of.len(), 0);
        let expect_msg = {
            let prefix = if one_of.len() > 1 { "one of " } else { "" };
            let mut reprs = vec![];
            reprs.extend(one_of.iter().map(|kind| format!("'{}'", kind.repr())));
            prefix.to_string() + &reprs.join("|")
        };
        let span_message = format!("expected {expect_msg} here");
        let span = if one_of.iter().all(|tok| tok.repr().len() == 1) {
            LabeledSpan::at_offset(self.prev_end, span_message)
        } else {
            LabeledSpan::at(self.lexer.span(), span_message)
        };
        miette::miette!(labels = vec![span], "Expected: {expect_msg}, Got: '{got}'")
            .with_source_code(self.src())
    }

    #[cold]
    #[inline(never)]
    fn unknown_operator(&self, spelling: Ident) -> Error {
        let span = LabeledSpan::at(self.lexer.span(), "not a unary operator");
        miette::miette!(labels = vec![span], "unknown operator '{spelling}'")
            .with_source_code(self.src())
    }

    fn try_token(&mut self, expected: TokenKind) -> Result<Option<Token>> {
        match self.peek_or_end()? {
            Some(tok) if tok.kind() == expected => {
                self.skip();
                Ok(Some(tok))
            }
            _ => Ok(None),
        }
    }

    fn bump(&mut self) -> Result<Token> {
        #[cold]
        #[inline(never)]
        fn handle_bump_err(
            state: Option<Result<Token, lexer::Error>>,
            src: &str,
            span: Span,
        ) -> Result<Token> {
            let src = src.to_string();
            match state {
                Some(Ok(..)) => unreachable!(),
                Some(Err(err)) => {
                    let span = LabeledSpan::at(span, "here");
                    Err(miette::miette!(labels = vec![span], "{err}").with_source_code(src))
                }
                None => {
                    let span = LabeledSpan::at_offset(span.end, "here");
                    Err(miette::miette!(labels = vec![span], "unexpected end of input")
                        .with_source_code(src))
                }
            }
        }
        self.prev_end = self.lexer.span().end;
        match self.lexer.next() {
            Some(Ok(tok)) => Ok(tok),
            other => handle_bump_err(other, self.lexer.source(), self.lexer.span()),
        }
    }

    fn skip(&mut self) {
        self.prev_end = self.lexer.span().end;
        #[cfg(debug_assertions)]
        let _ = self.lexer.next().unwrap().unwrap();
        #[cfg(not(debug_assertions))]
        let _ = self.lexer.next();
    }

    fn peek(&self) -> Result<Token> {
        self.clone().bump()
    }

    fn peek_or_end(&self) -> Result<Option<Token>> {
        if self.lexer.clone().next().is_none() {
            return Ok(None);
        }
        self.peek().map(Some)
    }
}

trait Parse: Sized {
    fn parse(stream: &mut Stream) -> Result<Self>;
}

impl<T: Parse> Parse for Spanned<T> {
    fn parse(stream: &mut Stream) -> Result<Self> {
        let start = stream.start();
        let inner = T::parse(stream)?;
        Ok(Spanned { inner, span: stream.span_from(start) })
    }
}

impl Parse for Ident {
    fn parse(stream: &mut Stream) -> Result<Self> {
        match stream.bump()? {
            Token::Ident(ident) => Ok(ident),
            got => Err(stream.expect_failed(got.kind(), &[TokenKind::Ident])),
        }
    }
}

impl Parse for Command {
    fn parse(stream: &mut Stream) -> Result<Self> {
        let mut commands = vec![stream.parse_single_command()?];
        while stream.try_token(TokenKind::Semicolon)?.is_some() {
            commands.push(stream.parse_single_command()?);
        }
        Ok(match <[_; 1]>::try_from(commands) {
            Ok([single]) => single.inner,
            Err(commands) => Command::Seq(commands.into()),
        })
    }
}

impl Parse for Declaration {
    fn parse(stream: &mut Stream) -> Result<Self> {
        let start = stream.start();
        let introducer = stream.expect_any(&[
            TokenKind::Const,
            TokenKind::Var,
            TokenKind::Proc,
            TokenKind::Func,
            TokenKind::Type,
        ])?;
        let ident = stream.parse()?;
        let kind = match introducer {
            Token::Const => {
                stream.expect_token(Token::Is)?;
                DeclarationKind::Const(stream.parse()?)
            }
            Token::Var => {
                stream.expect_token(Token::Colon)?;
                DeclarationKind::Var(stream.parse()?)
            }
            Token::Proc => {
                let params = stream.parse_formals()?;
                stream.expect_token(Token::Is)?;
                DeclarationKind::Proc { params, body: stream.parse_single_command()? }
            }
            Token::Func => {
                let params = stream.parse_formals()?;
                stream.expect_token(Token::Colon)?;
                let ret = stream.parse()?;
                stream.expect_token(Token::Is)?;
                DeclarationKind::Func { params, ret, body: stream.parse()? }
            }
            _ => {
                stream.expect_token(Token::Is)?;
                DeclarationKind::Type(stream.parse()?)
            }
        };
        Ok(Declaration { ident, kind, span: stream.span_from(start), decl: Default::default() })
    }
}

impl Parse for FormalParam {
    fn parse(stream: &mut Stream) -> Result<Self> {
        let start = stream.start();
        let mode = match stream.peek()? {
            tok @ (Token::Var | Token::Proc | Token::Func) => {
                stream.skip();
                Some(tok)
            }
            _ => None,
        };
        let ident = stream.parse()?;
        let kind = match mode {
            Some(Token::Proc) => FormalParamKind::Proc(stream.parse_formals()?),
            Some(Token::Func) => {
                let params = stream.parse_formals()?;
                stream.expect_token(Token::Colon)?;
                FormalParamKind::Func(params, stream.parse()?)
            }
            Some(_) => {
                stream.expect_token(Token::Colon)?;
                FormalParamKind::Var(stream.parse()?)
            }
            None => {
                stream.expect_token(Token::Colon)?;
                FormalParamKind::Value(stream.parse()?)
            }
        };
        Ok(FormalParam { ident, kind, span: stream.span_from(start), decl: Default::default() })
    }
}

impl Parse for ActualParam {
    fn parse(stream: &mut Stream) -> Result<Self> {
        let mode = stream.peek()?;
        if !matches!(mode, Token::Var | Token::Proc | Token::Func) {
            return stream.parse().map(ActualParam::Value);
        }
        stream.skip();
        let ident: Spanned<Ident> = stream.parse()?;
        let name = Name::new(ident.inner, ident.span);
        Ok(match mode {
            Token::Var => ActualParam::Var(stream.parse_vname_rest(name)?),
            Token::Proc => ActualParam::Proc(name),
            _ => ActualParam::Func(name),
        })
    }
}

impl Parse for TypeDenoter {
    fn parse(stream: &mut Stream) -> Result<Self> {
        match stream.bump()? {
            Token::Ident(ident) => Ok(TypeDenoter::Named(Name::new(ident, stream.lexer.span()))),
            Token::Array => {
                let len = match stream.bump()? {
                    Token::Int(int) => Spanned { inner: int, span: stream.lexer.span() },
                    got => return Err(stream.expect_failed(got.kind(), &[TokenKind::Int])),
                };
                stream.expect_token(Token::Of)?;
                Ok(TypeDenoter::Array { len, elem: Box::new(stream.parse()?) })
            }
            Token::Record => {
                let mut fields = vec![];
                loop {
                    let ident = stream.parse()?;
                    stream.expect_token(Token::Colon)?;
                    fields.push(FieldType { ident, ty: stream.parse()? });
                    if stream.try_token(TokenKind::Comma)?.is_none() {
                        break;
                    }
                }
                stream.expect_token(Token::End)?;
                Ok(TypeDenoter::Record(fields.into()))
            }
            got => Err(stream.expect_failed(got.kind(), &[
                TokenKind::Ident,
                TokenKind::Array,
                TokenKind::Record,
            ])),
        }
    }
}

impl Parse for Expr {
    fn parse(stream: &mut Stream) -> Result<Self> {
        let start = stream.start();
        let kind = match stream.peek()? {
            Token::Let => {
                stream.skip();
                let decls = stream.parse_declarations()?;
                stream.expect_token(Token::In)?;
                ExprKind::Let { decls, body: Box::new(stream.parse()?) }
            }
            Token::If => {
                stream.skip();
                let cond = stream.parse()?;
                stream.expect_token(Token::Then)?;
                let then = stream.parse()?;
                stream.expect_token(Token::Else)?;
                let r#else = stream.parse()?;
                ExprKind::If { exprs: Box::new([cond, then, r#else]) }
            }
            _ => return stream.parse_binary(0),
        };
        Ok(Expr::new(kind, stream.span_from(start)))
    }
}

#[cfg(test)]
mod tests {
    use super::parse;
    use crate::ast::{BinOp, Command, DeclarationKind, ExprKind, Literal, VnameKind};

    #[test]
    fn precedence_climbs() {
        let program = parse("x := 1 + 2 * 3 = 7 /\\ b").unwrap();
        let Command::Assign { expr, .. } = &program.command.inner else { panic!() };
        let ExprKind::Binary { op: BinOp::And, exprs } = &expr.kind else { panic!("{expr:?}") };
        let ExprKind::Binary { op: BinOp::Eq, exprs } = &exprs[0].kind else { panic!() };
        let ExprKind::Binary { op: BinOp::Add, exprs } = &exprs[0].kind else { panic!() };
        assert!(matches!(exprs[1].kind, ExprKind::Binary { op: BinOp::Mul, .. }));
    }

    #[test]
    fn sequences_and_empty_commands() {
        let program = parse("begin ; putint(1); end").unwrap();
        let Command::Seq(commands) = &program.command.inner else { panic!() };
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].inner, Command::Empty);
        assert_eq!(commands[2].inner, Command::Empty);
    }

    #[test]
    fn declarations_and_vnames() {
        let src = "let type P ~ record x: Integer, y: Integer end; var a: array 3 of P \
                   in a[1].y := -1";
        let program = parse(src).unwrap();
        let Command::Let { decls, body } = &program.command.inner else { panic!() };
        assert_eq!(decls.len(), 2);
        assert!(matches!(decls[0].kind, DeclarationKind::Type(_)));
        let Command::Assign { target, expr } = &body.inner else { panic!() };
        let VnameKind::Field { vname, field } = &target.kind else { panic!() };
        assert_eq!(field.inner, "y");
        assert!(matches!(vname.kind, VnameKind::Index { .. }));
        assert_eq!(&src[target.span.clone()], "a[1].y");
        let ExprKind::Unary { expr, .. } = &expr.kind else { panic!() };
        assert_eq!(expr.literal(), Some(Literal::Int(1)));
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(parse("let var x: Integer x := 1").is_err());
        assert!(parse("x := (1 + 2").is_err());
        assert!(parse("x := 1 end").is_err());
        assert!(parse("x := 1 & 2").is_err());
    }
}
