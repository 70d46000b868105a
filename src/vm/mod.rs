use std::io::{self, BufRead, Write};

use crate::tam::{Instr, Operand, Register, CODE_STORE_SIZE, FALSE, LINK_DATA_SIZE, TRUE};

mod primitive;

/// Words of data store shared by the stack (growing up from `SB`) and the
/// heap (growing down from `HB`).
pub const DATA_STORE_SIZE: usize = 1024;

const PB: i32 = CODE_STORE_SIZE as i32;
const PT: i32 = PB + 29;

/// A TAM program stopped abnormally; `at` is the code address that faulted.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("arithmetic overflow at {at}")]
    Overflow { at: i32 },
    #[error("division by zero at {at}")]
    ZeroDivide { at: i32 },
    #[error("data access violation at {at}")]
    DataAccessViolation { at: i32 },
    #[error("code access violation at {at}")]
    CodeAccessViolation { at: i32 },
    #[error("stack overflow at {at}")]
    StackOverflow { at: i32 },
    #[error("no primitive routine at {displacement}[PB] (called at {at})")]
    BadPrimitive { displacement: i32, at: i32 },
    #[error("expected an integer on input at {at}")]
    BadInput { at: i32 },
    #[error(transparent)]
    Io(#[from] io::Error),
}

type Result<T> = std::result::Result<T, VmError>;

pub fn execute(code: &[Instr]) -> Result<()> {
    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    execute_with(code, &mut stdin, &mut stdout)
}

/// Runs `code` from address 0 until `HALT`, reading `get`/`getint` from
/// `input` and writing `put`/`putint` to `output`.
pub fn execute_with(code: &[Instr], input: &mut dyn BufRead, output: &mut dyn Write) -> Result<()> {
    let mut machine = Machine {
        code,
        data: vec![0; DATA_STORE_SIZE],
        at: 0,
        cp: 0,
        st: 0,
        lb: 0,
        ht: DATA_STORE_SIZE as i32,
        input,
        output,
    };
    let result = machine.run();
    machine.output.flush()?;
    log::debug!("machine stopped at {} with {} words on the stack", machine.at, machine.st);
    result
}

struct Machine<'a, 'io> {
    code: &'a [Instr],
    data: Vec<i32>,
    /// Address of the instruction being executed.
    at: i32,
    cp: i32,
    st: i32,
    lb: i32,
    ht: i32,
    input: &'io mut dyn BufRead,
    output: &'io mut dyn Write,
}

impl Machine<'_, '_> {
    fn run(&mut self) -> Result<()> {
        loop {
            self.at = self.cp;
            let instr = usize::try_from(self.cp)
                .ok()
                .and_then(|cp| self.code.get(cp))
                .copied()
                .ok_or(VmError::CodeAccessViolation { at: self.at })?;
            log::trace!("{:>4}: {instr:?} (st = {})", self.cp, self.st);
            self.cp += 1;
            match instr {
                Instr::Load { size, addr } => {
                    let addr = self.address(addr)?;
                    for offset in 0..i32::from(size) {
                        let word = self.read(addr + offset)?;
                        self.push(word)?;
                    }
                }
                Instr::LoadA(addr) => {
                    let addr = self.address(addr)?;
                    self.push(addr)?;
                }
                Instr::LoadI(size) => {
                    let addr = self.pop()?;
                    for offset in 0..i32::from(size) {
                        let word = self.read(addr + offset)?;
                        self.push(word)?;
                    }
                }
                Instr::LoadL(value) => self.push(value)?,
                Instr::Store { size, addr } => {
                    let addr = self.address(addr)?;
                    self.store(addr, size)?;
                }
                Instr::StoreI(size) => {
                    let addr = self.pop()?;
                    self.store(addr, size)?;
                }
                Instr::Call { static_link, addr } => {
                    let target = self.address(addr)?;
                    let static_link = self.register(static_link)?;
                    self.call(target, static_link)?;
                }
                Instr::CallI => {
                    let target = self.pop()?;
                    let static_link = self.pop()?;
                    self.call(target, static_link)?;
                }
                Instr::Return { result, args } => {
                    let result = self.pop_words(result)?;
                    let frame = self.lb;
                    self.cp = self.read(frame + 2)?;
                    self.lb = self.read(frame + 1)?;
                    self.drop_to(frame - args)?;
                    self.push_words(&result)?;
                }
                Instr::Push(count) => {
                    for _ in 0..count {
                        self.push(0)?;
                    }
                }
                Instr::Pop { result, count } => {
                    let result = self.pop_words(result)?;
                    self.drop_to(self.st - count)?;
                    self.push_words(&result)?;
                }
                Instr::Jump(addr) => self.cp = self.address(addr)?,
                Instr::JumpI => self.cp = self.pop()?,
                Instr::JumpIf { value, addr } => {
                    let target = self.address(addr)?;
                    if self.pop()? == i32::from(value) {
                        self.cp = target;
                    }
                }
                Instr::Halt => return Ok(()),
            }
        }
    }

    fn call(&mut self, target: i32, static_link: i32) -> Result<()> {
        if (PB..PT).contains(&target) {
            return self.primitive(target - PB);
        }
        self.push(static_link)?;
        self.push(self.lb)?;
        self.push(self.cp)?;
        self.lb = self.st - LINK_DATA_SIZE;
        self.cp = target;
        Ok(())
    }

    fn register(&self, register: Register) -> Result<i32> {
        Ok(match register {
            Register::CB | Register::SB => 0,
            Register::CT => i32::try_from(self.code.len()).unwrap_or(PB),
            Register::PB => PB,
            Register::PT => PT,
            Register::ST => self.st,
            Register::HB => DATA_STORE_SIZE as i32,
            Register::HT => self.ht,
            Register::LB => self.lb,
            Register::CP => self.cp,
            display => {
                // follow static links out from the current frame
                let mut base = self.lb;
                for _ in 0..(display as u8 - Register::LB as u8) {
                    base = self.read(base)?;
                }
                base
            }
        })
    }

    fn address(&self, operand: Operand) -> Result<i32> {
        Ok(self.register(operand.register)? + operand.displacement)
    }

    /// Index of a word in the live stack or heap.
    fn slot(&self, addr: i32) -> Result<usize> {
        if (0..self.st).contains(&addr) || (self.ht..DATA_STORE_SIZE as i32).contains(&addr) {
            return usize::try_from(addr).map_err(|_| VmError::DataAccessViolation { at: self.at });
        }
        Err(VmError::DataAccessViolation { at: self.at })
    }

    fn read(&self, addr: i32) -> Result<i32> {
        Ok(self.data[self.slot(addr)?])
    }

    fn write(&mut self, addr: i32, word: i32) -> Result<()> {
        let slot = self.slot(addr)?;
        self.data[slot] = word;
        Ok(())
    }

    fn store(&mut self, addr: i32, size: u8) -> Result<()> {
        let words = self.pop_words(size)?;
        for (offset, word) in (0..).zip(words) {
            self.write(addr + offset, word)?;
        }
        Ok(())
    }

    fn push(&mut self, word: i32) -> Result<()> {
        if self.st >= self.ht {
            return Err(VmError::StackOverflow { at: self.at });
        }
        self.data[self.st as usize] = word;
        self.st += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<i32> {
        if self.st <= 0 {
            return Err(VmError::DataAccessViolation { at: self.at });
        }
        self.st -= 1;
        Ok(self.data[self.st as usize])
    }

    /// Pops the top `count` words, keeping their stack order.
    fn pop_words(&mut self, count: u8) -> Result<Vec<i32>> {
        let base = self.st - i32::from(count);
        if base < 0 {
            return Err(VmError::DataAccessViolation { at: self.at });
        }
        let words = self.data[base as usize..self.st as usize].to_vec();
        self.st = base;
        Ok(words)
    }

    fn push_words(&mut self, words: &[i32]) -> Result<()> {
        words.iter().try_for_each(|&word| self.push(word))
    }

    fn drop_to(&mut self, st: i32) -> Result<()> {
        if !(0..=self.st).contains(&st) {
            return Err(VmError::DataAccessViolation { at: self.at });
        }
        self.st = st;
        Ok(())
    }

    fn boolean(value: bool) -> i32 {
        i32::from(if value { TRUE } else { FALSE })
    }
}

#[cfg(test)]
mod tests {
    use bstr::ByteSlice;

    use super::{execute_with, VmError};
    use crate::tam::{Instr, Operand, Primitive, Register};

    fn run(code: &[Instr], input: &str) -> Result<String, VmError> {
        let mut output = vec![];
        execute_with(code, &mut input.as_bytes(), &mut output)?;
        Ok(output.to_str().unwrap().to_owned())
    }

    fn call(primitive: Primitive) -> Instr {
        Instr::Call { static_link: Register::SB, addr: Operand::primitive(primitive) }
    }

    #[test]
    fn arithmetic_and_output() {
        let code = [
            Instr::LoadL(6),
            Instr::LoadL(7),
            call(Primitive::Mult),
            call(Primitive::PutInt),
            call(Primitive::PutEol),
            Instr::Halt,
        ];
        assert_eq!(run(&code, "").unwrap(), "42\n");
    }

    #[test]
    fn routine_call_and_return() {
        // func double(x) ~ x + x; putint(double(21))
        let lb = Operand::new(Register::LB, -1);
        let code = [
            Instr::Jump(Operand::code(5)),
            Instr::Load { size: 1, addr: lb },
            Instr::Load { size: 1, addr: lb },
            call(Primitive::Add),
            Instr::Return { result: 1, args: 1 },
            Instr::LoadL(21),
            Instr::Call { static_link: Register::SB, addr: Operand::code(1) },
            call(Primitive::PutInt),
            Instr::Halt,
        ];
        assert_eq!(run(&code, "").unwrap(), "42");
    }

    #[test]
    fn multiword_equality() {
        let code = [
            Instr::LoadL(1),
            Instr::LoadL(2),
            Instr::LoadL(1),
            Instr::LoadL(2),
            Instr::LoadL(2),
            call(Primitive::Eq),
            Instr::LoadL(1),
            Instr::LoadL(3),
            Instr::LoadL(1),
            call(Primitive::Ne),
            call(Primitive::And),
            call(Primitive::PutInt),
            Instr::Halt,
        ];
        assert_eq!(run(&code, "").unwrap(), "1");
    }

    #[test]
    fn input() {
        let code = [
            Instr::Push(2),
            Instr::LoadA(Operand::new(Register::SB, 0)),
            call(Primitive::GetInt),
            Instr::LoadA(Operand::new(Register::SB, 1)),
            call(Primitive::Get),
            Instr::Load { size: 1, addr: Operand::new(Register::SB, 1) },
            call(Primitive::Put),
            Instr::Load { size: 1, addr: Operand::new(Register::SB, 0) },
            call(Primitive::Neg),
            call(Primitive::PutInt),
            call(Primitive::Eol),
            call(Primitive::PutInt),
            Instr::Halt,
        ];
        assert_eq!(run(&code, "  -12x\n").unwrap(), "x121");
    }

    #[test]
    fn faults() {
        let overflow = [Instr::LoadL(32767), Instr::LoadL(1), call(Primitive::Add), Instr::Halt];
        assert!(matches!(run(&overflow, ""), Err(VmError::Overflow { at: 2 })));

        let zero = [Instr::LoadL(1), Instr::LoadL(0), call(Primitive::Mod), Instr::Halt];
        assert!(matches!(run(&zero, ""), Err(VmError::ZeroDivide { at: 2 })));

        let wild = [Instr::Load { size: 1, addr: Operand::new(Register::SB, 5) }, Instr::Halt];
        assert!(matches!(run(&wild, ""), Err(VmError::DataAccessViolation { at: 0 })));

        let runaway = [Instr::LoadL(0), Instr::Jump(Operand::code(0))];
        assert!(matches!(run(&runaway, ""), Err(VmError::StackOverflow { at: 0 })));

        let no_halt = [Instr::LoadL(0)];
        assert!(matches!(run(&no_halt, ""), Err(VmError::CodeAccessViolation { at: 1 })));
    }
}
