use miette::IntoDiagnostic;

use crate::{
    checker::check,
    codegen::{encode, Encoding},
    decl::Decls,
    drawer::draw,
    errors::ErrorReporter,
    fold::{fold, FoldSummary},
    parser::parse,
};

#[derive(Debug, Default, Clone, Copy)]
pub struct Options {
    /// Draw the checked tree.
    pub show_tree: bool,
    pub folding: bool,
    /// Draw the tree after folding instead of before.
    pub show_tree_after_folding: bool,
}

#[derive(Debug)]
pub struct Compilation {
    pub encoding: Encoding,
    pub decls: Decls,
    pub summary: FoldSummary,
    /// Drawings requested by [`Options`], in the order they were taken.
    pub trees: Vec<String>,
}

/// Runs every pass over `src`. Nothing is shared between calls.
pub fn compile(src: &str, options: Options) -> miette::Result<Compilation> {
    log::info!("syntactic analysis");
    let mut program = parse(src)?;

    log::info!("contextual analysis");
    let mut reporter = ErrorReporter::new();
    let decls = check(&mut program, &mut reporter);

    let mut trees = vec![];
    if options.show_tree && !options.show_tree_after_folding {
        trees.push(draw(&program));
    }
    let summary = if options.folding {
        let summary = fold(&mut program, &decls);
        if options.show_tree && options.show_tree_after_folding {
            trees.push(draw(&program));
        }
        summary
    } else {
        // literals are still counted, on a copy that is thrown away
        fold(&mut program.clone(), &decls)
    };
    if reporter.has_errors() {
        return Err(reporter.into_report(src));
    }

    log::info!("code generation");
    let encoding = encode(&program, &decls, &mut reporter).into_diagnostic()?;
    if reporter.has_errors() {
        return Err(reporter.into_report(src));
    }
    Ok(Compilation { encoding, decls, summary, trees })
}

#[cfg(test)]
mod tests {
    use super::{compile, Options};
    use crate::tam::Instr;

    #[test]
    fn errors_abort_before_encoding() {
        let report = compile("let var x: Integer in x := 'a'", Options::default()).unwrap_err();
        assert!(report.to_string().contains("1 error"), "{report}");

        let report = compile("let var x: Integer in x := ", Options::default()).unwrap_err();
        assert!(report.labels().is_some());
    }

    #[test]
    fn trees_follow_the_options() {
        let src = "putint(1 + 2)";
        let plain = compile(src, Options::default()).unwrap();
        assert!(plain.trees.is_empty());

        let options = Options { show_tree: true, ..Options::default() };
        let before = compile(src, options).unwrap();
        assert_eq!(before.trees.len(), 1);
        assert!(before.trees[0].contains("BinaryExpression +"));

        let options = Options { show_tree: true, folding: true, show_tree_after_folding: true };
        let after = compile(src, options).unwrap();
        assert_eq!(after.trees.len(), 1);
        assert!(after.trees[0].contains("LiteralExpression 3"));
        assert_eq!(after.encoding.instructions()[0], Instr::LoadL(3));
    }

    #[test]
    fn stats_do_not_depend_on_folding() {
        let src = "begin put('a'); put('b'); putint(1 + 2) end";
        let folded = compile(src, Options { folding: true, ..Options::default() }).unwrap();
        let unfolded = compile(src, Options::default()).unwrap();
        assert_eq!(folded.summary, unfolded.summary);
        assert_eq!(folded.summary.char_exprs, 2);
        assert_eq!(folded.summary.int_exprs, 2);
        assert!(folded.encoding.instructions().len() < unfolded.encoding.instructions().len());
    }
}
