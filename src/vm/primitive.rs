use super::{Machine, Result, VmError};
use crate::tam::{Primitive, MAXINT, TRUE};

impl Machine<'_, '_> {
    pub(super) fn primitive(&mut self, displacement: i32) -> Result<()> {
        let Some(primitive) = Primitive::from_displacement(displacement) else {
            return Err(VmError::BadPrimitive { displacement, at: self.at });
        };
        match primitive {
            Primitive::Id => {}
            Primitive::Not => {
                let value = self.pop()?;
                self.push(Self::boolean(value != i32::from(TRUE)))?;
            }
            Primitive::And => self.logic(|lhs, rhs| lhs && rhs)?,
            Primitive::Or => self.logic(|lhs, rhs| lhs || rhs)?,
            Primitive::Succ => {
                let value = self.pop()?;
                self.push_int(i64::from(value) + 1)?;
            }
            Primitive::Pred => {
                let value = self.pop()?;
                self.push_int(i64::from(value) - 1)?;
            }
            Primitive::Neg => {
                let value = self.pop()?;
                self.push_int(-i64::from(value))?;
            }
            Primitive::Add => self.arithmetic(|lhs, rhs| Some(lhs + rhs))?,
            Primitive::Sub => self.arithmetic(|lhs, rhs| Some(lhs - rhs))?,
            Primitive::Mult => self.arithmetic(|lhs, rhs| Some(lhs * rhs))?,
            Primitive::Div => self.arithmetic(|lhs, rhs| lhs.checked_div(rhs))?,
            Primitive::Mod => self.arithmetic(|lhs, rhs| lhs.checked_rem(rhs))?,
            Primitive::Lt => self.compare(|lhs, rhs| lhs < rhs)?,
            Primitive::Le => self.compare(|lhs, rhs| lhs <= rhs)?,
            Primitive::Ge => self.compare(|lhs, rhs| lhs >= rhs)?,
            Primitive::Gt => self.compare(|lhs, rhs| lhs > rhs)?,
            Primitive::Eq | Primitive::Ne => {
                let size = self.pop()?;
                let size = u8::try_from(size).map_err(|_| VmError::DataAccessViolation { at: self.at })?;
                let rhs = self.pop_words(size)?;
                let lhs = self.pop_words(size)?;
                self.push(Self::boolean((lhs == rhs) == (primitive == Primitive::Eq)))?;
            }
            Primitive::Eol => {
                let eol = self.peek_byte()? == Some(b'\n');
                self.push(Self::boolean(eol))?;
            }
            Primitive::Eof => {
                let eof = self.peek_byte()?.is_none();
                self.push(Self::boolean(eof))?;
            }
            Primitive::Get => {
                let addr = self.pop()?;
                let char = self.read_byte()?.map_or(-1, i32::from);
                self.write(addr, char)?;
            }
            Primitive::Put => {
                let char = self.pop()?;
                let char = u32::try_from(char)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                write!(self.output, "{char}")?;
            }
            Primitive::GetEol => while !matches!(self.read_byte()?, Some(b'\n') | None) {},
            Primitive::PutEol => writeln!(self.output)?,
            Primitive::GetInt => {
                let addr = self.pop()?;
                let int = self.read_int()?;
                self.write(addr, int)?;
            }
            Primitive::PutInt => {
                let int = self.pop()?;
                write!(self.output, "{int}")?;
            }
            Primitive::New => {
                let size = self.pop()?;
                if size < 0 || self.ht - size < self.st {
                    return Err(VmError::StackOverflow { at: self.at });
                }
                self.ht -= size;
                self.push(self.ht)?;
            }
            // storage is never reclaimed
            Primitive::Dispose => _ = self.pop()?,
        }
        Ok(())
    }

    fn push_int(&mut self, int: i64) -> Result<()> {
        if !(-MAXINT..=MAXINT).contains(&int) {
            return Err(VmError::Overflow { at: self.at });
        }
        self.push(int as i32)
    }

    fn arithmetic(&mut self, op: impl FnOnce(i64, i64) -> Option<i64>) -> Result<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        let int = op(i64::from(lhs), i64::from(rhs)).ok_or(VmError::ZeroDivide { at: self.at })?;
        self.push_int(int)
    }

    fn compare(&mut self, op: impl FnOnce(i32, i32) -> bool) -> Result<()> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        self.push(Self::boolean(op(lhs, rhs)))
    }

    fn logic(&mut self, op: impl FnOnce(bool, bool) -> bool) -> Result<()> {
        let rhs = self.pop()? == i32::from(TRUE);
        let lhs = self.pop()? == i32::from(TRUE);
        self.push(Self::boolean(op(lhs, rhs)))
    }

    fn peek_byte(&mut self) -> Result<Option<u8>> {
        Ok(self.input.fill_buf()?.first().copied())
    }

    fn read_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.peek_byte()?;
        if byte.is_some() {
            self.input.consume(1);
        }
        Ok(byte)
    }

    /// Reads an optionally signed decimal integer, skipping leading
    /// whitespace.
    fn read_int(&mut self) -> Result<i32> {
        while self.peek_byte()?.is_some_and(|byte| byte.is_ascii_whitespace()) {
            self.read_byte()?;
        }
        let negative = match self.peek_byte()? {
            Some(b'-') => true,
            Some(b'+') => false,
            _ => return self.read_digits(false),
        };
        self.read_byte()?;
        self.read_digits(negative)
    }

    fn read_digits(&mut self, negative: bool) -> Result<i32> {
        let mut int: i64 = 0;
        let mut digits = 0;
        while let Some(byte) = self.peek_byte()?.filter(u8::is_ascii_digit) {
            self.read_byte()?;
            int = int * 10 + i64::from(byte - b'0');
            if int > MAXINT {
                return Err(VmError::Overflow { at: self.at });
            }
            digits += 1;
        }
        if digits == 0 {
            return Err(VmError::BadInput { at: self.at });
        }
        Ok(if negative { -int } else { int } as i32)
    }
}
