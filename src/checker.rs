use std::fmt;

use rustc_hash::FxHashSet;

use crate::{
    ast::{
        ActualParam, BinOp, Command, Declaration, DeclarationKind, Expr, ExprKind, FormalParam,
        FormalParamKind, Ident, Literal, Name, Program, Span, Spanned, TypeDenoter, UnaryOp, Vname,
        VnameKind,
    },
    builtins,
    decl::{Decl, DeclId, DeclKind, Decls},
    errors::{source_span, ErrorReporter, SemanticError},
    scope::SymbolTable,
    tam::MAXINT,
    ty::{Field, Param, ParamMode, Ty, TyKind},
};

/// Resolves every identifier in `program`, decorates every expression and
/// v-name with its type and reports contextual errors.
///
/// Returns the declarations the tree's `DeclId`s refer to.
pub fn check(program: &mut Program, reporter: &mut ErrorReporter) -> Decls {
    let mut checker = Checker::new(reporter);
    checker.command(&mut program.command);
    debug_assert_eq!(checker.table.depth(), 1, "unbalanced scopes");
    log::debug!(
        "checked program: {} declarations, {} errors",
        checker.decls.len(),
        checker.reporter.error_count()
    );
    checker.decls
}

struct Checker<'a> {
    table: SymbolTable,
    decls: Decls,
    reporter: &'a mut ErrorReporter,
}

impl<'a> Checker<'a> {
    fn new(reporter: &'a mut ErrorReporter) -> Self {
        let mut table = SymbolTable::new();
        let mut decls = Decls::new();
        builtins::declare_standard_environment(&mut table, &mut decls);
        // user declarations may shadow the standard environment
        table.open_scope();
        Self { table, decls, reporter }
    }

    fn command(&mut self, command: &mut Spanned<Command>) {
        match &mut command.inner {
            Command::Empty => {}
            Command::Assign { target, expr } => {
                let target_ty = self.vname(target);
                let expr_ty = self.expr(expr);
                if !target_ty.is_error() && !self.is_variable(target) {
                    let span = source_span(&target.span);
                    self.reporter.report(SemanticError::NotAssignable { span });
                } else {
                    self.expect_ty(&target_ty, &expr_ty, &expr.span);
                }
            }
            Command::Call { callee, args } => match self.resolve(callee) {
                Some(id) if self.decls[id].kind.is_proc() => {
                    let sig = self.decls[id].ty.clone();
                    self.args(callee, &sig, args);
                }
                Some(_) => {
                    self.reporter.report(SemanticError::NotCallable {
                        name: callee.ident,
                        span: source_span(&callee.span),
                    });
                    self.stray_args(args);
                }
                None => self.stray_args(args),
            },
            Command::Seq(commands) => commands.iter_mut().for_each(|command| self.command(command)),
            Command::Let { decls, body } => {
                self.table.open_scope();
                self.declarations(decls);
                self.command(body);
                self.table.close_scope();
            }
            Command::If { cond, then, r#else } => {
                self.condition(cond);
                self.command(then);
                self.command(r#else);
            }
            Command::While { cond, body } => {
                self.condition(cond);
                self.command(body);
            }
        }
    }

    fn declarations(&mut self, decls: &mut [Declaration]) {
        for decl in decls {
            self.declaration(decl);
        }
    }

    fn declaration(&mut self, decl: &mut Declaration) {
        let ident = &decl.ident;
        let id = match &mut decl.kind {
            DeclarationKind::Const(expr) => {
                let ty = self.expr(expr);
                self.declare(ident, DeclKind::Const, ty)
            }
            DeclarationKind::Var(ty) => {
                let ty = self.type_denoter(ty);
                self.declare(ident, DeclKind::Var, ty)
            }
            DeclarationKind::Type(ty) => {
                let ty = self.type_denoter(ty);
                self.declare(ident, DeclKind::Type, ty)
            }
            DeclarationKind::Proc { params, body } => {
                // entered before the body so that recursive calls resolve
                let id = self.declare(ident, DeclKind::Proc, Ty::error());
                self.table.open_scope();
                let params = self.formals(params);
                self.decls[id].ty = Ty::proc(params);
                self.command(body);
                self.table.close_scope();
                id
            }
            DeclarationKind::Func { params, ret, body } => {
                let ret = self.type_denoter(ret);
                let id = self.declare(ident, DeclKind::Func, Ty::error());
                self.table.open_scope();
                let params = self.formals(params);
                self.decls[id].ty = Ty::func(params, ret.clone());
                let body_ty = self.expr(body);
                self.expect_ty(&ret, &body_ty, &body.span);
                self.table.close_scope();
                id
            }
        };
        decl.decl.set(id);
    }

    fn formals(&mut self, params: &mut [FormalParam]) -> Vec<Param> {
        params.iter_mut().map(|param| self.formal(param)).collect()
    }

    fn formal(&mut self, param: &mut FormalParam) -> Param {
        let (kind, mode, ty) = match &mut param.kind {
            FormalParamKind::Value(ty) => {
                (DeclKind::ValueParam, ParamMode::Value, self.type_denoter(ty))
            }
            FormalParamKind::Var(ty) => (DeclKind::VarParam, ParamMode::Var, self.type_denoter(ty)),
            FormalParamKind::Proc(params) => {
                self.table.open_scope();
                let params = self.formals(params);
                self.table.close_scope();
                (DeclKind::ProcParam, ParamMode::Proc, Ty::proc(params))
            }
            FormalParamKind::Func(params, ret) => {
                let ret = self.type_denoter(ret);
                self.table.open_scope();
                let params = self.formals(params);
                self.table.close_scope();
                (DeclKind::FuncParam, ParamMode::Func, Ty::func(params, ret))
            }
        };
        let id = self.declare(&param.ident, kind, ty.clone());
        param.decl.set(id);
        Param { mode, ty }
    }

    fn type_denoter(&mut self, ty: &mut TypeDenoter) -> Ty {
        match ty {
            TypeDenoter::Named(name) => {
                let Some(id) = self.resolve(name) else { return Ty::error() };
                if self.decls[id].kind != DeclKind::Type {
                    self.reporter.report(SemanticError::NotAType {
                        name: name.ident,
                        span: source_span(&name.span),
                    });
                    return Ty::error();
                }
                self.decls[id].ty.clone()
            }
            TypeDenoter::Array { len, elem } => {
                let elem = self.type_denoter(elem);
                if len.inner <= 0 {
                    self.reporter.report(SemanticError::EmptyArray { span: source_span(&len.span) });
                    return Ty::error();
                }
                let Some(count) = u32::try_from(len.inner).ok().filter(|_| len.inner <= MAXINT)
                else {
                    self.reporter.report(SemanticError::LiteralOutOfRange {
                        value: len.inner,
                        span: source_span(&len.span),
                    });
                    return Ty::error();
                };
                Ty::array(count, elem)
            }
            TypeDenoter::Record(fields) => {
                let mut seen = FxHashSet::default();
                let mut distinct = true;
                let mut out = Vec::with_capacity(fields.len());
                for field in fields {
                    let ty = self.type_denoter(&mut field.ty);
                    distinct &= self.distinct_field(&mut seen, &field.ident);
                    out.push(Field { name: field.ident.inner, ty });
                }
                if distinct { Ty::record(out) } else { Ty::error() }
            }
        }
    }

    fn expr(&mut self, expr: &mut Expr) -> Ty {
        let ty = match &mut expr.kind {
            ExprKind::Literal(literal) => match *literal {
                Literal::Int(value) if value > MAXINT => {
                    let span = source_span(&expr.span);
                    self.reporter.report(SemanticError::LiteralOutOfRange { value, span });
                    Ty::error()
                }
                Literal::Int(_) => Ty::int(),
                Literal::Char(_) => Ty::char(),
                Literal::Bool(_) => Ty::bool(),
            },
            ExprKind::Vname(vname) => self.vname(vname),
            ExprKind::Call { callee, args } => match self.resolve(callee) {
                Some(id) if self.decls[id].kind.is_func() => {
                    let sig = self.decls[id].ty.clone();
                    self.args(callee, &sig, args);
                    match sig.kind() {
                        TyKind::Func { ret, .. } => ret.clone(),
                        _ => Ty::error(),
                    }
                }
                Some(_) => {
                    self.reporter.report(SemanticError::NotAFunction {
                        name: callee.ident,
                        span: source_span(&callee.span),
                    });
                    self.stray_args(args);
                    Ty::error()
                }
                None => {
                    self.stray_args(args);
                    Ty::error()
                }
            },
            ExprKind::Unary { op, expr: operand } => {
                let ty = match op {
                    UnaryOp::Not => Ty::bool(),
                    UnaryOp::Neg => Ty::int(),
                };
                if self.operand(&ty, operand) { ty } else { Ty::error() }
            }
            ExprKind::Binary { op, exprs } => {
                let [lhs, rhs] = &mut **exprs;
                match op {
                    BinOp::Eq | BinOp::Ne => {
                        let lhs_ty = self.expr(lhs);
                        let rhs_ty = self.expr(rhs);
                        if lhs_ty.is_error() || rhs_ty.is_error() {
                            Ty::error()
                        } else if self.expect_ty(&lhs_ty, &rhs_ty, &rhs.span) {
                            Ty::bool()
                        } else {
                            Ty::error()
                        }
                    }
                    _ => {
                        let (operand, result) = signature(*op);
                        let lhs_ok = self.operand(&operand, lhs);
                        let rhs_ok = self.operand(&operand, rhs);
                        if lhs_ok && rhs_ok { result } else { Ty::error() }
                    }
                }
            }
            ExprKind::If { exprs } => {
                let [cond, then, r#else] = &mut **exprs;
                self.condition(cond);
                let then_ty = self.expr(then);
                let else_ty = self.expr(r#else);
                if then_ty.is_error() || else_ty.is_error() {
                    Ty::error()
                } else if self.expect_ty(&then_ty, &else_ty, &r#else.span) {
                    then_ty
                } else {
                    Ty::error()
                }
            }
            ExprKind::Let { decls, body } => {
                self.table.open_scope();
                self.declarations(decls);
                let ty = self.expr(body);
                self.table.close_scope();
                ty
            }
            ExprKind::Array(elems) => {
                let mut elem_ty: Option<Ty> = None;
                let mut uniform = true;
                for elem in elems.iter_mut() {
                    let ty = self.expr(elem);
                    match &elem_ty {
                        Some(first) => uniform &= self.expect_ty(first, &ty, &elem.span),
                        None => elem_ty = Some(ty),
                    }
                }
                match (elem_ty, u32::try_from(elems.len())) {
                    (Some(elem), Ok(len)) if uniform && !elem.is_error() => Ty::array(len, elem),
                    _ => Ty::error(),
                }
            }
            ExprKind::Record(fields) => {
                let mut seen = FxHashSet::default();
                let mut distinct = true;
                let mut out = Vec::with_capacity(fields.len());
                for field in fields.iter_mut() {
                    let ty = self.expr(&mut field.expr);
                    distinct &= self.distinct_field(&mut seen, &field.ident);
                    out.push(Field { name: field.ident.inner, ty });
                }
                if distinct { Ty::record(out) } else { Ty::error() }
            }
        };
        expr.ty.set(ty.clone());
        ty
    }

    fn vname(&mut self, vname: &mut Vname) -> Ty {
        let ty = match &mut vname.kind {
            VnameKind::Simple(name) => match self.resolve(name) {
                Some(id) if self.decls[id].kind.is_value() => self.decls[id].ty.clone(),
                Some(_) => {
                    self.reporter.report(SemanticError::NotAValue {
                        name: name.ident,
                        span: source_span(&name.span),
                    });
                    Ty::error()
                }
                None => Ty::error(),
            },
            VnameKind::Field { vname: base, field } => {
                let base_ty = self.vname(base);
                match base_ty.kind() {
                    TyKind::Error => Ty::error(),
                    TyKind::Record { .. } => match base_ty.field(field.inner) {
                        Some(ty) => ty.clone(),
                        None => {
                            self.reporter.report(SemanticError::NoSuchField {
                                name: field.inner,
                                ty: base_ty.to_string(),
                                span: source_span(&field.span),
                            });
                            Ty::error()
                        }
                    },
                    _ => {
                        self.mismatch("a record", &base_ty, &base.span);
                        Ty::error()
                    }
                }
            }
            VnameKind::Index { vname: base, index } => {
                let base_ty = self.vname(base);
                let index_ty = self.expr(index);
                self.expect_ty(&Ty::int(), &index_ty, &index.span);
                match base_ty.kind() {
                    TyKind::Error => Ty::error(),
                    TyKind::Array { elem, .. } => elem.clone(),
                    _ => {
                        self.mismatch("an array", &base_ty, &base.span);
                        Ty::error()
                    }
                }
            }
        };
        vname.ty.set(ty.clone());
        ty
    }

    fn args(&mut self, callee: &Name, sig: &Ty, args: &mut [ActualParam]) {
        let params = sig.params().unwrap_or_default();
        if params.len() != args.len() {
            self.reporter.report(SemanticError::ArityMismatch {
                name: callee.ident,
                expected: params.len(),
                found: args.len(),
                span: source_span(&callee.span),
            });
            self.stray_args(args);
            return;
        }
        for (param, arg) in params.iter().zip(args) {
            self.arg(param, arg);
        }
    }

    fn arg(&mut self, param: &Param, arg: &mut ActualParam) {
        match (param.mode, arg) {
            (ParamMode::Value, ActualParam::Value(expr)) => {
                let ty = self.expr(expr);
                self.expect_ty(&param.ty, &ty, &expr.span);
            }
            (ParamMode::Var, ActualParam::Var(vname)) => {
                let ty = self.vname(vname);
                if ty.is_error() {
                    return;
                }
                if !self.is_variable(vname) {
                    let span = source_span(&vname.span);
                    self.reporter.report(SemanticError::NotAssignable { span });
                } else {
                    self.expect_ty(&param.ty, &ty, &vname.span);
                }
            }
            (ParamMode::Proc, ActualParam::Proc(name)) => self.routine_arg(&param.ty, name, true),
            (ParamMode::Func, ActualParam::Func(name)) => self.routine_arg(&param.ty, name, false),
            (mode, arg) => {
                let expected = match mode {
                    ParamMode::Value => "value",
                    ParamMode::Var => "var",
                    ParamMode::Proc => "proc",
                    ParamMode::Func => "func",
                };
                let span = source_span(&arg.span());
                self.reporter.report(SemanticError::ParamKindMismatch { expected, span });
                self.stray_arg(arg);
            }
        }
    }

    fn routine_arg(&mut self, expected: &Ty, name: &mut Name, proc: bool) {
        let Some(id) = self.resolve(name) else { return };
        let kind = self.decls[id].kind;
        let (ident, span) = (name.ident, source_span(&name.span));
        if proc && !kind.is_proc() {
            self.reporter.report(SemanticError::NotCallable { name: ident, span });
        } else if !proc && !kind.is_func() {
            self.reporter.report(SemanticError::NotAFunction { name: ident, span });
        } else {
            let ty = self.decls[id].ty.clone();
            self.expect_ty(expected, &ty, &name.span);
        }
    }

    /// Decorates arguments that could not be matched against a signature.
    fn stray_args(&mut self, args: &mut [ActualParam]) {
        for arg in args {
            self.stray_arg(arg);
        }
    }

    fn stray_arg(&mut self, arg: &mut ActualParam) {
        match arg {
            ActualParam::Value(expr) => {
                self.expr(expr);
            }
            ActualParam::Var(vname) => {
                self.vname(vname);
            }
            ActualParam::Proc(name) | ActualParam::Func(name) => {
                self.resolve(name);
            }
        }
    }

    fn condition(&mut self, cond: &mut Expr) {
        let ty = self.expr(cond);
        self.expect_ty(&Ty::bool(), &ty, &cond.span);
    }

    /// Checks an operator operand, returning whether it is well typed.
    fn operand(&mut self, expected: &Ty, operand: &mut Expr) -> bool {
        let ty = self.expr(operand);
        self.expect_ty(expected, &ty, &operand.span) && !ty.is_error()
    }

    fn declare(&mut self, ident: &Spanned<Ident>, kind: DeclKind, ty: Ty) -> DeclId {
        let decl = Decl { name: ident.inner, kind, ty, builtin: None, span: Some(ident.span.clone()) };
        let id = self.decls.push(decl);
        if let Err(previous) = self.table.enter(ident.inner, id) {
            self.reporter.report(SemanticError::DuplicateDeclaration {
                name: ident.inner,
                span: source_span(&ident.span),
                previous: self.decls[previous].span.as_ref().map(source_span),
            });
        }
        id
    }

    fn resolve(&mut self, name: &mut Name) -> Option<DeclId> {
        let Some((id, _)) = self.table.retrieve(name.ident) else {
            self.reporter.report(SemanticError::UndeclaredIdentifier {
                name: name.ident,
                span: source_span(&name.span),
            });
            return None;
        };
        name.decl.set(id);
        Some(id)
    }

    fn distinct_field(&mut self, seen: &mut FxHashSet<Ident>, ident: &Spanned<Ident>) -> bool {
        if seen.insert(ident.inner) {
            return true;
        }
        self.reporter.report(SemanticError::DuplicateField {
            name: ident.inner,
            span: source_span(&ident.span),
        });
        false
    }

    fn is_variable(&self, vname: &Vname) -> bool {
        vname.root().decl.get().is_some_and(|&id| self.decls[id].kind.is_variable())
    }

    fn expect_ty(&mut self, expected: &Ty, found: &Ty, span: &Span) -> bool {
        if expected.compatible(found) {
            return true;
        }
        self.mismatch(expected, found, span);
        false
    }

    fn mismatch(&mut self, expected: impl fmt::Display, found: &Ty, span: &Span) {
        if found.is_error() {
            return;
        }
        self.reporter.report(SemanticError::TypeMismatch {
            expected: expected.to_string(),
            found: found.to_string(),
            span: source_span(span),
        });
    }
}

/// Operand and result types of the non-equality binary operators.
fn signature(op: BinOp) -> (Ty, Ty) {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => (Ty::int(), Ty::int()),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => (Ty::int(), Ty::bool()),
        BinOp::And | BinOp::Or | BinOp::Eq | BinOp::Ne => (Ty::bool(), Ty::bool()),
    }
}

#[cfg(test)]
mod tests {
    use super::check;
    use crate::{
        ast::{Command, DeclarationKind, ExprKind, Program, VnameKind},
        decl::{DeclKind, Decls},
        errors::{ErrorReporter, SemanticError},
        parser::parse,
        ty::Ty,
    };

    fn check_src(src: &str) -> (Program, Decls, ErrorReporter) {
        let mut program = parse(src).unwrap();
        let mut reporter = ErrorReporter::new();
        let decls = check(&mut program, &mut reporter);
        (program, decls, reporter)
    }

    fn errors(src: &str) -> Vec<SemanticError> {
        check_src(src).2.errors().to_vec()
    }

    #[test]
    fn nearest_declaration_wins() {
        let (program, decls, reporter) =
            check_src("let var x: Integer in let var x: Char in x := 'a'");
        assert_eq!(reporter.error_count(), 0);
        let Command::Let { body, .. } = &program.command.inner else { panic!() };
        let Command::Let { decls: inner, body } = &body.inner else { panic!() };
        let Command::Assign { target, .. } = &body.inner else { panic!() };
        let VnameKind::Simple(name) = &target.kind else { panic!() };
        assert_eq!(name.decl.get(), inner[0].decl.get());
        assert_eq!(decls[*name.decl.get().unwrap()].ty, Ty::char());
    }

    #[test]
    fn duplicate_declaration_is_reported_once() {
        let errors = errors("let var x: Integer; var x: Char in x := 1");
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(matches!(errors[0], SemanticError::DuplicateDeclaration { name: "x", .. }));
    }

    #[test]
    fn standard_names_can_be_shadowed() {
        let (_, _, reporter) = check_src("let const maxint ~ 10 in putint(maxint)");
        assert_eq!(reporter.error_count(), 0);
    }

    #[test]
    fn records_compare_structurally() {
        let src = "let type A ~ record a: Integer, b: Char end; \
                   type B ~ record a: Integer, b: Char end; \
                   var x: A; var y: B in x := y";
        assert!(errors(src).is_empty());

        let src = "let var x: record a: Integer, b: Char end; \
                   var y: record b: Char, a: Integer end in x := y";
        assert!(matches!(errors(src)[..], [SemanticError::TypeMismatch { .. }]));
    }

    #[test]
    fn recursive_calls_resolve_to_the_routine() {
        let src = "let proc p(n: Integer) ~ if n > 0 then p(n - 1) else puteol() in p(3)";
        let (program, decls, reporter) = check_src(src);
        assert_eq!(reporter.error_count(), 0);
        let Command::Let { decls: block, .. } = &program.command.inner else { panic!() };
        let DeclarationKind::Proc { body, .. } = &block[0].kind else { panic!() };
        let Command::If { then, .. } = &body.inner else { panic!() };
        let Command::Call { callee, .. } = &then.inner else { panic!() };
        assert_eq!(callee.decl.get(), block[0].decl.get());
        assert_eq!(decls[*callee.decl.get().unwrap()].kind, DeclKind::Proc);
    }

    #[test]
    fn every_expression_is_decorated() {
        let src = "let var a: array 2 of Integer; func f(x: Integer): Integer ~ x * 2 \
                   in a[f(1) - 2] := if a[0] < 3 then ord('c') else -1";
        let (program, _, reporter) = check_src(src);
        assert_eq!(reporter.error_count(), 0);
        let Command::Let { body, .. } = &program.command.inner else { panic!() };
        let Command::Assign { target, expr } = &body.inner else { panic!() };
        assert_eq!(target.ty.get(), Some(&Ty::int()));
        assert_eq!(expr.ty.get(), Some(&Ty::int()));
        let ExprKind::If { exprs } = &expr.kind else { panic!() };
        assert!(exprs.iter().all(|expr| expr.ty.get().is_some()));
    }

    #[test]
    fn contextual_errors() {
        macro_rules! assert_error {
            ($src: literal, $pattern: pat) => {
                let errors = errors($src);
                assert!(matches!(errors[..], [$pattern]), "{}: {errors:?}", $src);
            };
        }
        assert_error!("x := 1", SemanticError::UndeclaredIdentifier { name: "x", .. });
        assert_error!("let const c ~ 1 in c := 2", SemanticError::NotAssignable { .. });
        assert_error!("let var b: Boolean in b := 1", SemanticError::TypeMismatch { .. });
        assert_error!("putint(1, 2)", SemanticError::ArityMismatch { expected: 1, found: 2, .. });
        assert_error!("getint(1)", SemanticError::ParamKindMismatch { expected: "var", .. });
        assert_error!("let const c ~ 1 in getint(var c)", SemanticError::NotAssignable { .. });
        assert_error!("maxint()", SemanticError::NotCallable { .. });
        assert_error!("putint(puteol())", SemanticError::NotAFunction { .. });
        assert_error!("let var x: maxint in x := 1", SemanticError::NotAType { .. });
        assert_error!("putint(putint)", SemanticError::NotAValue { .. });
        assert_error!("putint(40000)", SemanticError::LiteralOutOfRange { value: 40000, .. });
        assert_error!("let var a: array 0 of Char in put(a[0])", SemanticError::EmptyArray { .. });
        assert_error!(
            "let var r: record a: Integer end in putint(r.b)",
            SemanticError::NoSuchField { name: "b", .. }
        );
        assert_error!(
            "let var r: record a: Integer, a: Char end in puteol()",
            SemanticError::DuplicateField { .. }
        );
        assert_error!("while 1 do puteol()", SemanticError::TypeMismatch { .. });
        assert_error!("putint(if true then 1 else 'a')", SemanticError::TypeMismatch { .. });
    }

    #[test]
    fn error_type_silences_consumers() {
        let errors = errors("let var x: Integer in x := (y + 1) * 2");
        assert!(matches!(errors[..], [SemanticError::UndeclaredIdentifier { name: "y", .. }]));
    }
}
