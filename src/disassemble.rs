use std::fmt::Write;

use crate::tam::{Instr, Operand, Primitive, Register};

/// Renders `code` one instruction per line in TAM assembler notation.
pub fn disassemble(code: &[Instr]) -> String {
    let mut out = String::new();
    for (offset, &instr) in code.iter().enumerate() {
        _ = writeln!(out, "{offset}: {}", render(instr));
    }
    out
}

fn render(instr: Instr) -> String {
    let op = instr.kind().mnemonic();
    match instr {
        Instr::Load { size, addr } => format!("{op}({size}) {}", operand(addr)),
        Instr::LoadA(addr) => format!("{op} {}", operand(addr)),
        Instr::LoadI(size) => format!("{op}({size})"),
        Instr::LoadL(value) => format!("{op} {value}"),
        Instr::Store { size, addr } => format!("{op}({size}) {}", operand(addr)),
        Instr::StoreI(size) => format!("{op}({size})"),
        Instr::Call { addr, .. } if addr.register == Register::PB => {
            match Primitive::from_displacement(addr.displacement) {
                Some(primitive) => format!("{op} {}", primitive.name()),
                None => format!("{op} {}", operand(addr)),
            }
        }
        Instr::Call { static_link, addr } => format!("{op}({static_link:?}) {}", operand(addr)),
        Instr::CallI => op.to_string(),
        Instr::Return { result, args } => format!("{op}({result}) {args}"),
        Instr::Push(count) => format!("{op} {count}"),
        Instr::Pop { result, count } => format!("{op}({result}) {count}"),
        Instr::Jump(addr) => format!("{op} {}", operand(addr)),
        Instr::JumpI => op.to_string(),
        Instr::JumpIf { value, addr } => format!("{op}({value}) {}", operand(addr)),
        Instr::Halt => op.to_string(),
    }
}

fn operand(addr: Operand) -> String {
    format!("{}[{:?}]", addr.displacement, addr.register)
}
