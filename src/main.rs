use std::path::PathBuf;

use clap::Parser;
use miette::{IntoDiagnostic, WrapErr};

use crate::compile::{compile, Options};

mod ast;
mod builtins;
mod checker;
mod codegen;
mod compile;
mod decl;
mod disassemble;
mod drawer;
mod errors;
mod fold;
mod intern;
mod lexer;
mod parser;
mod scope;
mod tam;
#[cfg(test)]
mod tests;
mod ty;
mod vm;

/// Compiles a Triangle program to TAM object code.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Source file to compile
    #[arg(short, long)]
    file: PathBuf,

    /// Object file to write
    #[arg(short, long, default_value = "obj.tam")]
    obj: PathBuf,

    /// Draw the tree after contextual analysis
    #[arg(long)]
    tree: bool,

    /// Fold constant expressions
    #[arg(long)]
    fold: bool,

    /// Draw the tree after folding
    #[arg(long)]
    tfold: bool,

    /// Print literal expression counts
    #[arg(long)]
    stats: bool,

    /// Print where each declaration was placed
    #[arg(long)]
    table: bool,

    /// Print the generated code
    #[arg(long)]
    disasm: bool,

    /// Run the generated code
    #[arg(long)]
    run: bool,
}

fn main() -> miette::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let src = std::fs::read_to_string(&args.file)
        .into_diagnostic()
        .wrap_err_with(|| format!("can't access source file {}", args.file.display()))?;
    let options = Options {
        show_tree: args.tree || args.tfold,
        folding: args.fold || args.tfold,
        show_tree_after_folding: args.tfold,
    };
    let compilation = match compile(&src, options) {
        Ok(compilation) => compilation,
        Err(report) => {
            println!("Compilation was unsuccessful.");
            return Err(report);
        }
    };
    for tree in &compilation.trees {
        print!("{tree}");
    }

    compilation
        .encoding
        .save(&args.obj)
        .into_diagnostic()
        .wrap_err_with(|| format!("can't write object file {}", args.obj.display()))?;
    println!("Compilation was successful.");
    if args.stats {
        println!("[STATS] CharExpr: {}!", compilation.summary.char_exprs);
        println!("[STATS] IntExpr: {}!", compilation.summary.int_exprs);
    }
    if args.table {
        print!("{}", compilation.encoding.table(&compilation.decls));
    }
    if args.disasm {
        print!("{}", disassemble::disassemble(compilation.encoding.instructions()));
    }
    if args.run {
        vm::execute(compilation.encoding.instructions()).into_diagnostic()?;
    }
    Ok(())
}
