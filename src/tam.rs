use std::{io, ops::Range, path::Path};

use macros::{AllVariants, EnumKind};
use rustc_hash::FxHashMap;

pub const MAXINT: i64 = 32767;
pub const FALSE: u8 = 0;
pub const TRUE: u8 = 1;
/// Static link, dynamic link and return address.
pub const LINK_DATA_SIZE: i32 = 3;
/// Instructions the code store holds before the primitive segment begins.
pub const CODE_STORE_SIZE: usize = 1024;
/// Enclosing frames reachable through `L1..L6`.
pub const MAX_DISPLAY: usize = 6;

#[derive(AllVariants, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Register {
    CB,
    CT,
    PB,
    PT,
    SB,
    ST,
    HB,
    HT,
    LB,
    L1,
    L2,
    L3,
    L4,
    L5,
    L6,
    CP,
}

impl Register {
    /// Register holding the frame base `levels_out` routines out from the
    /// current one.
    pub fn display(levels_out: usize) -> Option<Self> {
        if levels_out > MAX_DISPLAY {
            return None;
        }
        Some(Self::ALL[Self::LB as usize + levels_out])
    }
}

/// Routines built into the machine, addressed as displacements from `PB`.
#[derive(AllVariants, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Primitive {
    Id = 1,
    Not,
    And,
    Or,
    Succ,
    Pred,
    Neg,
    Add,
    Sub,
    Mult,
    Div,
    Mod,
    Lt,
    Le,
    Ge,
    Gt,
    Eq,
    Ne,
    Eol,
    Eof,
    Get,
    Put,
    GetEol,
    PutEol,
    GetInt,
    PutInt,
    New,
    Dispose,
}

impl Primitive {
    pub fn displacement(self) -> i32 {
        i32::from(self as u8)
    }

    pub fn from_displacement(displacement: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|primitive| primitive.displacement() == displacement)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Not => "not",
            Self::And => "and",
            Self::Or => "or",
            Self::Succ => "succ",
            Self::Pred => "pred",
            Self::Neg => "neg",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mult => "mult",
            Self::Div => "div",
            Self::Mod => "mod",
            Self::Lt => "lt",
            Self::Le => "le",
            Self::Ge => "ge",
            Self::Gt => "gt",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Eol => "eol",
            Self::Eof => "eof",
            Self::Get => "get",
            Self::Put => "put",
            Self::GetEol => "geteol",
            Self::PutEol => "puteol",
            Self::GetInt => "getint",
            Self::PutInt => "putint",
            Self::New => "new",
            Self::Dispose => "dispose",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand {
    pub register: Register,
    pub displacement: i32,
}

impl Operand {
    pub const fn new(register: Register, displacement: i32) -> Self {
        Self { register, displacement }
    }

    pub const fn code(displacement: i32) -> Self {
        Self::new(Register::CB, displacement)
    }

    pub fn primitive(primitive: Primitive) -> Self {
        Self::new(Register::PB, primitive.displacement())
    }
}

#[derive(EnumKind, Debug, Clone, Copy, PartialEq, Eq)]
#[enum_kind(OpCode)]
pub enum Instr {
    Load { size: u8, addr: Operand },
    LoadA(Operand),
    LoadI(u8),
    LoadL(i32),
    Store { size: u8, addr: Operand },
    StoreI(u8),
    Call { static_link: Register, addr: Operand },
    CallI,
    Return { result: u8, args: i32 },
    Push(i32),
    Pop { result: u8, count: i32 },
    Jump(Operand),
    JumpI,
    JumpIf { value: u8, addr: Operand },
    Halt,
}

impl OpCode {
    pub fn code(self) -> i32 {
        match self {
            Self::Load => 0,
            Self::LoadA => 1,
            Self::LoadI => 2,
            Self::LoadL => 3,
            Self::Store => 4,
            Self::StoreI => 5,
            Self::Call => 6,
            Self::CallI => 7,
            Self::Return => 8,
            Self::Push => 10,
            Self::Pop => 11,
            Self::Jump => 12,
            Self::JumpI => 13,
            Self::JumpIf => 14,
            Self::Halt => 15,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Self::Load => "LOAD",
            Self::LoadA => "LOADA",
            Self::LoadI => "LOADI",
            Self::LoadL => "LOADL",
            Self::Store => "STORE",
            Self::StoreI => "STOREI",
            Self::Call => "CALL",
            Self::CallI => "CALLI",
            Self::Return => "RETURN",
            Self::Push => "PUSH",
            Self::Pop => "POP",
            Self::Jump => "JUMP",
            Self::JumpI => "JUMPI",
            Self::JumpIf => "JUMPIF",
            Self::Halt => "HALT",
        }
    }
}

impl Instr {
    /// The `(op, r, n, d)` fields as laid out in an object file.
    pub fn to_raw(self) -> [i32; 4] {
        let op = self.kind().code();
        let (r, n, d) = match self {
            Self::Load { size, addr } | Self::Store { size, addr } => {
                (addr.register as i32, i32::from(size), addr.displacement)
            }
            Self::LoadA(addr) | Self::Jump(addr) => (addr.register as i32, 0, addr.displacement),
            Self::LoadI(size) | Self::StoreI(size) => (0, i32::from(size), 0),
            Self::LoadL(value) | Self::Push(value) => (0, 0, value),
            Self::Call { static_link, addr } => {
                (addr.register as i32, static_link as i32, addr.displacement)
            }
            Self::Return { result, args } => (0, i32::from(result), args),
            Self::Pop { result, count } => (0, i32::from(result), count),
            Self::JumpIf { value, addr } => (addr.register as i32, i32::from(value), addr.displacement),
            Self::CallI | Self::JumpI | Self::Halt => (0, 0, 0),
        };
        [op, r, n, d]
    }

    /// Retargets a jump, call or address load at a code address.
    fn with_target(self, target: i32) -> Self {
        match self {
            Self::Jump(addr) => Self::Jump(Operand { displacement: target, ..addr }),
            Self::JumpIf { value, addr } => {
                Self::JumpIf { value, addr: Operand { displacement: target, ..addr } }
            }
            Self::Call { static_link, addr } => {
                Self::Call { static_link, addr: Operand { displacement: target, ..addr } }
            }
            Self::LoadA(addr) => Self::LoadA(Operand { displacement: target, ..addr }),
            other => other,
        }
    }

    /// Words pushed minus words popped, for instructions that neither
    /// transfer control nor call.
    pub fn stack_effect(self) -> Option<i32> {
        Some(match self {
            Self::Load { size, .. } => i32::from(size),
            Self::LoadA(_) | Self::LoadL(_) => 1,
            Self::LoadI(size) => i32::from(size) - 1,
            Self::Store { size, .. } => -i32::from(size),
            Self::StoreI(size) => -i32::from(size) - 1,
            Self::Push(count) => count,
            Self::Pop { count, .. } => -count,
            Self::Call { .. }
            | Self::CallI
            | Self::Return { .. }
            | Self::Jump(_)
            | Self::JumpI
            | Self::JumpIf { .. }
            | Self::Halt => return None,
        })
    }
}

/// Forward reference into the code store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

/// Append-only TAM code store.
#[derive(Debug, Default)]
pub struct Emitter {
    code: Vec<Instr>,
    labels: Vec<Option<u32>>,
    pending: Vec<(usize, Label)>,
}

impl Emitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, instr: Instr) -> usize {
        log::trace!("{:>4}: {instr:?}", self.code.len());
        self.code.push(instr);
        self.code.len() - 1
    }

    pub fn current_position(&self) -> usize {
        self.code.len()
    }

    pub fn patch(&mut self, position: usize, instr: Instr) {
        self.code[position] = instr;
    }

    pub fn create_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the next instruction and patches everything emitted
    /// against it so far.
    pub fn bind_label(&mut self, label: Label) {
        debug_assert!(self.labels[label.0].is_none(), "label bound twice");
        let target = code_address(self.current_position());
        self.labels[label.0] = Some(target as u32);
        let (ready, pending): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.pending).into_iter().partition(|&(_, pending)| pending == label);
        self.pending = pending;
        for (position, _) in ready {
            self.patch(position, self.code[position].with_target(target));
        }
    }

    /// Emits `instr` aimed at `label`, patching it later if the label is
    /// still unbound.
    pub fn emit_to_label(&mut self, instr: Instr, label: Label) -> usize {
        match self.label_address(label) {
            Some(target) => self.emit(instr.with_target(target as i32)),
            None => {
                let position = self.emit(instr);
                self.pending.push((position, label));
                position
            }
        }
    }

    pub fn label_address(&self, label: Label) -> Option<u32> {
        self.labels[label.0]
    }

    pub fn unbound_label(&self) -> Option<usize> {
        self.pending.first().map(|(_, label)| label.0)
    }

    pub fn instructions(&self) -> &[Instr] {
        &self.code
    }

    pub fn is_full(&self) -> bool {
        self.code.len() > CODE_STORE_SIZE
    }

    pub fn object_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.code.len() * 16);
        for instr in &self.code {
            for field in instr.to_raw() {
                bytes.extend(field.to_be_bytes());
            }
        }
        bytes
    }

    pub fn save(&self, path: impl AsRef<Path>) -> io::Result<()> {
        log::info!("writing {} instructions to {}", self.code.len(), path.as_ref().display());
        std::fs::write(path, self.object_bytes())
    }
}

fn code_address(position: usize) -> i32 {
    i32::try_from(position).unwrap_or(i32::MAX)
}

/// Net words left on the stack by running `range`, following every branch.
///
/// Calls take their effect from `calls`, keyed by position. Returns `None` if
/// some path leaves the range other than at its end, reaches an instruction
/// with an unknown effect, or two paths disagree.
pub fn net_stack_effect(
    code: &[Instr],
    range: Range<usize>,
    calls: &FxHashMap<usize, i32>,
) -> Option<i32> {
    let mut seen: FxHashMap<usize, i32> = FxHashMap::default();
    let mut work = vec![(range.start, 0)];
    let mut result = None;

    while let Some((position, depth)) = work.pop() {
        if position == range.end {
            if result.is_some_and(|result| result != depth) {
                return None;
            }
            result = Some(depth);
            continue;
        }
        if !range.contains(&position) {
            return None;
        }
        if let Some(&previous) = seen.get(&position) {
            if previous != depth {
                return None;
            }
            continue;
        }
        seen.insert(position, depth);

        let target = |addr: Operand| usize::try_from(addr.displacement).ok();
        match code[position] {
            Instr::Jump(addr) => work.push((target(addr)?, depth)),
            Instr::JumpIf { addr, .. } => {
                work.push((target(addr)?, depth - 1));
                work.push((position + 1, depth - 1));
            }
            Instr::Call { .. } | Instr::CallI => {
                work.push((position + 1, depth + calls.get(&position)?));
            }
            Instr::Return { .. } | Instr::JumpI | Instr::Halt => return None,
            instr => work.push((position + 1, depth + instr.stack_effect()?)),
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_labels_are_patched_on_bind() {
        let mut emitter = Emitter::new();
        let end = emitter.create_label();
        let jump = emitter.emit_to_label(Instr::Jump(Operand::code(0)), end);
        emitter.emit(Instr::LoadL(1));
        emitter.bind_label(end);
        emitter.emit(Instr::Halt);
        assert_eq!(emitter.instructions()[jump], Instr::Jump(Operand::code(2)));
        assert_eq!(emitter.unbound_label(), None);

        let back = emitter.emit_to_label(Instr::Jump(Operand::code(0)), end);
        assert_eq!(emitter.instructions()[back], Instr::Jump(Operand::code(2)));
    }

    #[test]
    fn object_words_are_big_endian() {
        let mut emitter = Emitter::new();
        emitter.emit(Instr::Load { size: 2, addr: Operand::new(Register::LB, -3) });
        assert_eq!(emitter.object_bytes(), [
            0, 0, 0, 0, //
            0, 0, 0, 8, //
            0, 0, 0, 2, //
            0xff, 0xff, 0xff, 0xfd,
        ]);
    }

    #[test]
    fn display_registers() {
        assert_eq!(Register::display(0), Some(Register::LB));
        assert_eq!(Register::display(6), Some(Register::L6));
        assert_eq!(Register::display(7), None);
        assert_eq!(Primitive::from_displacement(8), Some(Primitive::Add));
        assert_eq!(Primitive::PutInt.displacement(), 26);
    }

    #[test]
    fn stack_effect_follows_branches() {
        // if b then 1 else 2, with b at 0[SB]
        let code = [
            Instr::Load { size: 1, addr: Operand::new(Register::SB, 0) },
            Instr::JumpIf { value: 0, addr: Operand::code(4) },
            Instr::LoadL(1),
            Instr::Jump(Operand::code(5)),
            Instr::LoadL(2),
        ];
        let calls = FxHashMap::default();
        assert_eq!(net_stack_effect(&code, 0..5, &calls), Some(1));
        assert_eq!(net_stack_effect(&code, 2..4, &calls), None);
    }
}
