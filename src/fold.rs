use rustc_hash::FxHashMap;

use crate::{
    ast::{
        ActualParam, BinOp, Command, Declaration, DeclarationKind, Expr, ExprKind, Literal,
        Program, Spanned, UnaryOp, Vname, VnameKind,
    },
    decl::{DeclId, Decls},
    tam::MAXINT,
};

/// Literal expressions seen while folding.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FoldSummary {
    pub char_exprs: usize,
    pub int_exprs: usize,
}

/// Replaces expressions whose value is known at compile time with literals.
///
/// Expects a tree the checker accepted. A folded node keeps its span and type.
pub fn fold(program: &mut Program, decls: &Decls) -> FoldSummary {
    let mut folder = Folder { decls, consts: FxHashMap::default(), summary: FoldSummary::default() };
    folder.command(&mut program.command);
    log::debug!("folded program: {:?}", folder.summary);
    folder.summary
}

struct Folder<'a> {
    decls: &'a Decls,
    /// Constant declarations whose value folded to a literal.
    consts: FxHashMap<DeclId, Literal>,
    summary: FoldSummary,
}

enum Rewrite {
    Literal(Literal),
    Limb(usize),
}

impl Folder<'_> {
    fn command(&mut self, command: &mut Spanned<Command>) {
        match &mut command.inner {
            Command::Empty => {}
            Command::Assign { target, expr } => {
                self.vname(target);
                self.expr(expr);
            }
            Command::Call { args, .. } => self.args(args),
            Command::Seq(commands) => commands.iter_mut().for_each(|command| self.command(command)),
            Command::Let { decls, body } => {
                self.declarations(decls);
                self.command(body);
            }
            Command::If { cond, then, r#else } => {
                self.expr(cond);
                self.command(then);
                self.command(r#else);
            }
            Command::While { cond, body } => {
                self.expr(cond);
                self.command(body);
            }
        }
    }

    fn declarations(&mut self, decls: &mut [Declaration]) {
        for decl in decls {
            match &mut decl.kind {
                DeclarationKind::Const(expr) => {
                    self.expr(expr);
                    if let (Some(literal), Some(&id)) = (expr.literal(), decl.decl.get()) {
                        self.consts.insert(id, literal);
                    }
                }
                DeclarationKind::Proc { body, .. } => self.command(body),
                DeclarationKind::Func { body, .. } => self.expr(body),
                DeclarationKind::Var(_) | DeclarationKind::Type(_) => {}
            }
        }
    }

    fn args(&mut self, args: &mut [ActualParam]) {
        for arg in args {
            match arg {
                ActualParam::Value(expr) => self.expr(expr),
                ActualParam::Var(vname) => self.vname(vname),
                ActualParam::Proc(_) | ActualParam::Func(_) => {}
            }
        }
    }

    fn vname(&mut self, vname: &mut Vname) {
        match &mut vname.kind {
            VnameKind::Simple(_) => {}
            VnameKind::Field { vname, .. } => self.vname(vname),
            VnameKind::Index { vname, index } => {
                self.vname(vname);
                self.expr(index);
            }
        }
    }

    fn expr(&mut self, expr: &mut Expr) {
        if expr.ty.get().is_none_or(|ty| ty.is_error()) {
            return;
        }
        let rewrite = match &mut expr.kind {
            ExprKind::Literal(Literal::Int(_)) => {
                self.summary.int_exprs += 1;
                None
            }
            ExprKind::Literal(Literal::Char(_)) => {
                self.summary.char_exprs += 1;
                None
            }
            ExprKind::Literal(Literal::Bool(_)) => None,
            ExprKind::Vname(vname) => {
                self.vname(vname);
                self.constant(vname).map(Rewrite::Literal)
            }
            ExprKind::Call { args, .. } => {
                self.args(args);
                None
            }
            ExprKind::Unary { op, expr: operand } => {
                self.expr(operand);
                operand.literal().and_then(|literal| unary(*op, literal)).map(Rewrite::Literal)
            }
            ExprKind::Binary { op, exprs } => {
                exprs.iter_mut().for_each(|expr| self.expr(expr));
                match (exprs[0].literal(), exprs[1].literal()) {
                    (Some(lhs), Some(rhs)) => binary(*op, lhs, rhs).map(Rewrite::Literal),
                    _ => None,
                }
            }
            ExprKind::If { exprs } => {
                exprs.iter_mut().for_each(|expr| self.expr(expr));
                match exprs[0].literal() {
                    Some(Literal::Bool(true)) => Some(Rewrite::Limb(1)),
                    Some(Literal::Bool(false)) => Some(Rewrite::Limb(2)),
                    _ => None,
                }
            }
            ExprKind::Let { decls, body } => {
                self.declarations(decls);
                self.expr(body);
                let all_known = decls.iter().all(|decl| {
                    matches!(&decl.kind, DeclarationKind::Const(expr) if expr.literal().is_some())
                });
                body.literal().filter(|_| all_known).map(Rewrite::Literal)
            }
            ExprKind::Array(elems) => {
                elems.iter_mut().for_each(|expr| self.expr(expr));
                None
            }
            ExprKind::Record(fields) => {
                fields.iter_mut().for_each(|field| self.expr(&mut field.expr));
                None
            }
        };
        match rewrite {
            None => {}
            Some(Rewrite::Literal(literal)) => expr.kind = ExprKind::Literal(literal),
            Some(Rewrite::Limb(limb)) => {
                let kind = std::mem::replace(&mut expr.kind, ExprKind::Literal(Literal::Bool(false)));
                if let ExprKind::If { exprs } = kind {
                    let [_, then, r#else] = *exprs;
                    expr.kind = if limb == 1 { then.kind } else { r#else.kind };
                }
            }
        }
    }

    fn constant(&self, vname: &Vname) -> Option<Literal> {
        let VnameKind::Simple(name) = &vname.kind else { return None };
        let id = *name.decl.get()?;
        self.consts.get(&id).copied().or_else(|| self.decls[id].builtin?.value())
    }
}

fn unary(op: UnaryOp, operand: Literal) -> Option<Literal> {
    match (op, operand) {
        (UnaryOp::Not, Literal::Bool(bool)) => Some(Literal::Bool(!bool)),
        (UnaryOp::Neg, Literal::Int(int)) => in_range(-int),
        _ => None,
    }
}

/// Folds `lhs op rhs`, leaving alone anything that would fault at run time.
fn binary(op: BinOp, lhs: Literal, rhs: Literal) -> Option<Literal> {
    use Literal::{Bool, Int};

    match (op, lhs, rhs) {
        (BinOp::Add, Int(lhs), Int(rhs)) => in_range(lhs + rhs),
        (BinOp::Sub, Int(lhs), Int(rhs)) => in_range(lhs - rhs),
        (BinOp::Mul, Int(lhs), Int(rhs)) => in_range(lhs * rhs),
        (BinOp::Div | BinOp::Mod, Int(_), Int(0)) => None,
        (BinOp::Div, Int(lhs), Int(rhs)) => in_range(lhs / rhs),
        (BinOp::Mod, Int(lhs), Int(rhs)) => in_range(lhs % rhs),
        (BinOp::Lt, Int(lhs), Int(rhs)) => Some(Bool(lhs < rhs)),
        (BinOp::Le, Int(lhs), Int(rhs)) => Some(Bool(lhs <= rhs)),
        (BinOp::Gt, Int(lhs), Int(rhs)) => Some(Bool(lhs > rhs)),
        (BinOp::Ge, Int(lhs), Int(rhs)) => Some(Bool(lhs >= rhs)),
        (BinOp::And, Bool(lhs), Bool(rhs)) => Some(Bool(lhs && rhs)),
        (BinOp::Or, Bool(lhs), Bool(rhs)) => Some(Bool(lhs || rhs)),
        (BinOp::Eq, lhs, rhs) => Some(Bool(lhs == rhs)),
        (BinOp::Ne, lhs, rhs) => Some(Bool(lhs != rhs)),
        _ => None,
    }
}

fn in_range(int: i64) -> Option<Literal> {
    (-MAXINT..=MAXINT).contains(&int).then_some(Literal::Int(int))
}

#[cfg(test)]
mod tests {
    use super::{fold, FoldSummary};
    use crate::{
        ast::{ActualParam, Command, Expr, ExprKind, Literal, Program},
        checker::check,
        errors::ErrorReporter,
        parser::parse,
        ty::Ty,
    };

    fn folded(src: &str) -> (Program, FoldSummary) {
        let mut program = parse(src).unwrap();
        let mut reporter = ErrorReporter::new();
        let decls = check(&mut program, &mut reporter);
        let summary = fold(&mut program, &decls);
        (program, summary)
    }

    /// The expression passed to the outermost `putint`/`put` call.
    fn argument(program: &Program) -> &Expr {
        let mut command = &program.command.inner;
        loop {
            match command {
                Command::Let { body, .. } => command = &body.inner,
                Command::Call { args, .. } => {
                    let ActualParam::Value(expr) = &args[0] else { panic!() };
                    return expr;
                }
                _ => panic!("{command:?}"),
            }
        }
    }

    fn folds_to(src: &str) -> Option<Literal> {
        argument(&folded(src).0).literal()
    }

    #[test]
    fn arithmetic_and_logic() {
        assert_eq!(folds_to("putint(1 + 2 * 3)"), Some(Literal::Int(7)));
        assert_eq!(folds_to("putint(-(7 // 4) - 1)"), Some(Literal::Int(-4)));
        assert_eq!(folds_to("putint(7 / 2)"), Some(Literal::Int(3)));
        assert_eq!(folds_to("putint(if 1 < 2 /\\ \\false then 10 else 20)"), Some(Literal::Int(10)));
        assert_eq!(folds_to("putint(if 'a' = 'b' then 10 else 20)"), Some(Literal::Int(20)));
        assert_eq!(folds_to("putint(maxint - 1)"), Some(Literal::Int(32766)));
    }

    #[test]
    fn runtime_faults_are_left_alone() {
        assert_eq!(folds_to("putint(maxint + 1)"), None);
        assert_eq!(folds_to("putint(5 / 0)"), None);
        assert_eq!(folds_to("putint(5 // (1 - 1))"), None);
        assert_eq!(folds_to("putint(200 * 200)"), None);
    }

    #[test]
    fn constants_and_let_expressions() {
        assert_eq!(folds_to("putint(let const x ~ 3 in x + 4)"), Some(Literal::Int(7)));
        assert_eq!(folds_to("let const x ~ 3; const y ~ x * x in putint(y)"), Some(Literal::Int(9)));
        assert_eq!(folds_to("let var v: Integer in putint(let const x ~ v in 1 + 1)"), None);
    }

    #[test]
    fn folded_nodes_keep_their_type() {
        let (program, _) = folded("put(if true then chr(65) else 'b')");
        let expr = argument(&program);
        assert!(matches!(expr.kind, ExprKind::Call { .. }));
        assert_eq!(expr.ty.get(), Some(&Ty::char()));
    }

    #[test]
    fn error_typed_nodes_are_not_folded() {
        let mut program = parse("putint(1 + 'a')").unwrap();
        let mut reporter = ErrorReporter::new();
        let decls = check(&mut program, &mut reporter);
        assert_eq!(reporter.error_count(), 1);
        fold(&mut program, &decls);
        assert!(matches!(argument(&program).kind, ExprKind::Binary { .. }));
    }

    #[test]
    fn folding_is_idempotent() {
        let src = "let const k ~ 2 * 3; var a: array 4 of Integer \
                   in begin a[k - 5] := k; putint(if a[1] > k then k else -k) end";
        let mut program = parse(src).unwrap();
        let mut reporter = ErrorReporter::new();
        let decls = check(&mut program, &mut reporter);
        fold(&mut program, &decls);
        let once = program.clone();
        fold(&mut program, &decls);
        assert_eq!(program, once);
    }

    #[test]
    fn summary_counts_literals() {
        let (_, summary) = folded("let const x ~ 3 in begin putint(x + 4); put('c') end");
        assert_eq!(summary, FoldSummary { char_exprs: 1, int_exprs: 2 });
    }
}
