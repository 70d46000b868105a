use std::fmt::Write;

use crate::ast::{
    ActualParam, Command, Declaration, DeclarationKind, Expr, ExprKind, FormalParam,
    FormalParamKind, Program, Spanned, TypeDenoter, Vname, VnameKind,
};

/// Renders the tree one node per line, children indented under their parent.
///
/// Decorated expressions and v-names show their type after a colon.
pub fn draw(program: &Program) -> String {
    let mut drawer = Drawer { out: String::new(), depth: 0 };
    drawer.node("Program", |drawer| drawer.command(&program.command));
    drawer.out
}

struct Drawer {
    out: String,
    depth: usize,
}

impl Drawer {
    fn line(&mut self, label: &str) {
        _ = writeln!(self.out, "{:indent$}{label}", "", indent = self.depth * 2);
    }

    fn node(&mut self, label: &str, children: impl FnOnce(&mut Self)) {
        self.line(label);
        self.depth += 1;
        children(self);
        self.depth -= 1;
    }

    fn command(&mut self, command: &Spanned<Command>) {
        match &command.inner {
            Command::Empty => self.line("EmptyCommand"),
            Command::Assign { target, expr } => self.node("AssignCommand", |drawer| {
                drawer.vname(target);
                drawer.expr(expr);
            }),
            Command::Call { callee, args } => {
                self.node(&format!("CallCommand {}", callee.ident), |drawer| drawer.args(args));
            }
            Command::Seq(commands) => self.node("SequentialCommand", |drawer| {
                commands.iter().for_each(|command| drawer.command(command));
            }),
            Command::Let { decls, body } => self.node("LetCommand", |drawer| {
                drawer.declarations(decls);
                drawer.command(body);
            }),
            Command::If { cond, then, r#else } => self.node("IfCommand", |drawer| {
                drawer.expr(cond);
                drawer.command(then);
                drawer.command(r#else);
            }),
            Command::While { cond, body } => self.node("WhileCommand", |drawer| {
                drawer.expr(cond);
                drawer.command(body);
            }),
        }
    }

    fn declarations(&mut self, decls: &[Declaration]) {
        for decl in decls {
            let name = decl.ident.inner;
            match &decl.kind {
                DeclarationKind::Const(expr) => {
                    self.node(&format!("ConstDeclaration {name}"), |drawer| drawer.expr(expr));
                }
                DeclarationKind::Var(ty) => {
                    self.node(&format!("VarDeclaration {name}"), |drawer| drawer.type_denoter(ty));
                }
                DeclarationKind::Proc { params, body } => {
                    self.node(&format!("ProcDeclaration {name}"), |drawer| {
                        drawer.formals(params);
                        drawer.command(body);
                    });
                }
                DeclarationKind::Func { params, ret, body } => {
                    self.node(&format!("FuncDeclaration {name}"), |drawer| {
                        drawer.formals(params);
                        drawer.type_denoter(ret);
                        drawer.expr(body);
                    });
                }
                DeclarationKind::Type(ty) => {
                    self.node(&format!("TypeDeclaration {name}"), |drawer| drawer.type_denoter(ty));
                }
            }
        }
    }

    fn formals(&mut self, params: &[FormalParam]) {
        for param in params {
            let name = param.ident.inner;
            match &param.kind {
                FormalParamKind::Value(ty) => {
                    self.node(&format!("ConstFormalParameter {name}"), |drawer| drawer.type_denoter(ty));
                }
                FormalParamKind::Var(ty) => {
                    self.node(&format!("VarFormalParameter {name}"), |drawer| drawer.type_denoter(ty));
                }
                FormalParamKind::Proc(params) => {
                    self.node(&format!("ProcFormalParameter {name}"), |drawer| drawer.formals(params));
                }
                FormalParamKind::Func(params, ret) => {
                    self.node(&format!("FuncFormalParameter {name}"), |drawer| {
                        drawer.formals(params);
                        drawer.type_denoter(ret);
                    });
                }
            }
        }
    }

    fn args(&mut self, args: &[ActualParam]) {
        for arg in args {
            match arg {
                ActualParam::Value(expr) => self.expr(expr),
                ActualParam::Var(vname) => self.node("VarActualParameter", |drawer| drawer.vname(vname)),
                ActualParam::Proc(name) => self.line(&format!("ProcActualParameter {}", name.ident)),
                ActualParam::Func(name) => self.line(&format!("FuncActualParameter {}", name.ident)),
            }
        }
    }

    fn type_denoter(&mut self, ty: &TypeDenoter) {
        match ty {
            TypeDenoter::Named(name) => self.line(&format!("SimpleTypeDenoter {}", name.ident)),
            TypeDenoter::Array { len, elem } => {
                self.node(&format!("ArrayTypeDenoter {}", len.inner), |drawer| drawer.type_denoter(elem));
            }
            TypeDenoter::Record(fields) => self.node("RecordTypeDenoter", |drawer| {
                for field in fields {
                    let label = format!("FieldTypeDenoter {}", field.ident.inner);
                    drawer.node(&label, |drawer| drawer.type_denoter(&field.ty));
                }
            }),
        }
    }

    fn vname(&mut self, vname: &Vname) {
        let ty = vname.ty.get().map(|ty| format!(" : {ty}")).unwrap_or_default();
        match &vname.kind {
            VnameKind::Simple(name) => self.line(&format!("SimpleVname {}{ty}", name.ident)),
            VnameKind::Field { vname, field } => {
                self.node(&format!("DotVname {}{ty}", field.inner), |drawer| drawer.vname(vname));
            }
            VnameKind::Index { vname, index } => self.node(&format!("SubscriptVname{ty}"), |drawer| {
                drawer.vname(vname);
                drawer.expr(index);
            }),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        let ty = expr.ty.get().map(|ty| format!(" : {ty}")).unwrap_or_default();
        match &expr.kind {
            ExprKind::Literal(literal) => self.line(&format!("LiteralExpression {literal}{ty}")),
            ExprKind::Vname(vname) => {
                self.node(&format!("VnameExpression{ty}"), |drawer| drawer.vname(vname));
            }
            ExprKind::Call { callee, args } => {
                self.node(&format!("CallExpression {}{ty}", callee.ident), |drawer| drawer.args(args));
            }
            ExprKind::Unary { op, expr } => {
                self.node(&format!("UnaryExpression {}{ty}", op.spelling()), |drawer| drawer.expr(expr));
            }
            ExprKind::Binary { op, exprs } => {
                self.node(&format!("BinaryExpression {}{ty}", op.spelling()), |drawer| {
                    exprs.iter().for_each(|expr| drawer.expr(expr));
                });
            }
            ExprKind::If { exprs } => self.node(&format!("IfExpression{ty}"), |drawer| {
                exprs.iter().for_each(|expr| drawer.expr(expr));
            }),
            ExprKind::Let { decls, body } => self.node(&format!("LetExpression{ty}"), |drawer| {
                drawer.declarations(decls);
                drawer.expr(body);
            }),
            ExprKind::Array(elems) => self.node(&format!("ArrayExpression{ty}"), |drawer| {
                elems.iter().for_each(|expr| drawer.expr(expr));
            }),
            ExprKind::Record(fields) => self.node(&format!("RecordExpression{ty}"), |drawer| {
                for field in fields {
                    let label = format!("FieldAggregate {}", field.ident.inner);
                    drawer.node(&label, |drawer| drawer.expr(&field.expr));
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::draw;
    use crate::{checker::check, errors::ErrorReporter, fold::fold, parser::parse};

    #[test]
    fn undecorated_tree() {
        let program = parse("let var x: Integer in x := x + 1").unwrap();
        assert_eq!(draw(&program), "\
Program
  LetCommand
    VarDeclaration x
      SimpleTypeDenoter Integer
    AssignCommand
      SimpleVname x
      BinaryExpression +
        VnameExpression
          SimpleVname x
        LiteralExpression 1
");
    }

    #[test]
    fn folding_shows_in_the_tree() {
        let mut program = parse("putint(let const x ~ 3 in x + 4)").unwrap();
        let mut reporter = ErrorReporter::new();
        let decls = check(&mut program, &mut reporter);
        let before = draw(&program);
        assert!(before.contains("LetExpression : Integer"), "{before}");
        assert!(before.contains("ConstDeclaration x"), "{before}");

        fold(&mut program, &decls);
        assert_eq!(draw(&program), "\
Program
  CallCommand putint
    LiteralExpression 7 : Integer
");
    }
}
