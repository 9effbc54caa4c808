//! Instruction set, decoder and program builders.
//!
//! Only a small decodable subset of AVR is modelled. Everything else decodes
//! to `None` and is turned into a tallied no-op by [`Program::from_words`].

use super::hex::HexImage;
use super::registers::IO_BASE;

/// Cycles per millisecond at the default 16 MHz clock.
const CYCLES_PER_MS: i64 = 16_000;
const DEFAULT_BLINK_PIN: &str = "D13";
const DEFAULT_BLINK_MS: i64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Nop,
    /// `arg0` = register, `arg1` = immediate.
    Ldi,
    /// `arg0` = I/O data address, `arg1` = source register.
    Out,
    /// `arg0` = I/O data address, `arg1` = bit.
    Sbi,
    Cbi,
    /// `arg2` = offset added to `pc`.
    Rjmp,
    /// `arg2` = cycles to stall.
    DelayCycles,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: OpCode,
    pub arg0: u16,
    pub arg1: u8,
    pub arg2: i64,
}

impl Instruction {
    pub fn new(op: OpCode, arg0: u16, arg1: u8, arg2: i64) -> Self {
        Self {
            op,
            arg0,
            arg1,
            arg2,
        }
    }

    pub fn nop() -> Self {
        Self::new(OpCode::Nop, 0, 0, 0)
    }

    pub fn ldi(register: u8, value: u8) -> Self {
        Self::new(OpCode::Ldi, register as u16, value, 0)
    }

    pub fn out(address: u16, register: u8) -> Self {
        Self::new(OpCode::Out, address, register, 0)
    }

    pub fn sbi(address: u16, bit: u8) -> Self {
        Self::new(OpCode::Sbi, address, bit, 0)
    }

    pub fn cbi(address: u16, bit: u8) -> Self {
        Self::new(OpCode::Cbi, address, bit, 0)
    }

    pub fn rjmp(offset: i64) -> Self {
        Self::new(OpCode::Rjmp, 0, 0, offset)
    }

    pub fn delay(cycles: i64) -> Self {
        Self::new(OpCode::DelayCycles, 0, 0, cycles)
    }
}

/// Decode one 16-bit instruction word.
///
/// I/O addresses are returned as data-space addresses (`A + 0x20`). The
/// relative jump offset is stored as `k + 1` because the hardware target is
/// `PC + k + 1` while the CPU applies `pc += offset`.
pub fn decode(word: u16) -> Option<Instruction> {
    if word == 0x0000 {
        return Some(Instruction::nop());
    }
    if word & 0xF000 == 0xE000 {
        let register = 16 + ((word >> 4) & 0x0F) as u8;
        let value = (((word >> 4) & 0xF0) | (word & 0x0F)) as u8;
        return Some(Instruction::ldi(register, value));
    }
    if word & 0xF000 == 0xC000 {
        let raw = (word & 0x0FFF) as i64;
        let k = if raw & 0x0800 != 0 { raw - 0x1000 } else { raw };
        return Some(Instruction::rjmp(k + 1));
    }
    if word & 0xF800 == 0xB800 {
        let address = ((word >> 5) & 0x30) | (word & 0x0F);
        let register = ((word >> 4) & 0x1F) as u8;
        return Some(Instruction::out(address + IO_BASE, register));
    }
    if word & 0xFF00 == 0x9A00 {
        let address = (word >> 3) & 0x1F;
        return Some(Instruction::sbi(address + IO_BASE, (word & 0x07) as u8));
    }
    if word & 0xFF00 == 0x9800 {
        let address = (word >> 3) & 0x1F;
        return Some(Instruction::cbi(address + IO_BASE, (word & 0x07) as u8));
    }
    None
}

/// A loaded instruction sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    /// Words that did not decode and were replaced by no-ops.
    pub unknown: usize,
}

impl Program {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            unknown: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Number of words that decoded to a known instruction.
    pub fn decoded(&self) -> usize {
        self.instructions.len() - self.unknown
    }

    pub fn from_words(words: &[u16]) -> Self {
        let mut unknown = 0;
        let instructions = words
            .iter()
            .map(|w| {
                decode(*w).unwrap_or_else(|| {
                    unknown += 1;
                    Instruction::nop()
                })
            })
            .collect();
        Self {
            instructions,
            unknown,
        }
    }

    /// Decode little-endian words from address 0 up to the highest written
    /// byte of a HEX image.
    pub fn from_image(image: &HexImage) -> Self {
        let Some((_, max)) = image.address_range() else {
            return Self::default();
        };
        let end = (max + 1).min(image.data().len());
        let words: Vec<u16> = image.data()[..end]
            .chunks(2)
            .map(|pair| {
                let lo = pair[0] as u16;
                let hi = pair.get(1).copied().unwrap_or(0) as u16;
                lo | (hi << 8)
            })
            .collect();
        Self::from_words(&words)
    }

    /// Square-wave program toggling `(ddr, port, bit)` every `half_period_ms`.
    pub fn blink(ddr: u16, port: u16, bit: u8, half_period_ms: i64) -> Self {
        let delay = half_period_ms.max(1) * CYCLES_PER_MS;
        let mut instructions = vec![Instruction::sbi(ddr, bit)];
        let loop_start = instructions.len() as i64;
        instructions.push(Instruction::sbi(port, bit));
        instructions.push(Instruction::delay(delay));
        instructions.push(Instruction::cbi(port, bit));
        instructions.push(Instruction::delay(delay));
        let here = instructions.len() as i64;
        instructions.push(Instruction::rjmp(loop_start - here));
        Self::new(instructions)
    }

    /// Build a program from a firmware string such as `blink:D13:500`.
    ///
    /// Missing or unparsable fields fall back to D13 and 500 ms, and any
    /// unrecognised string yields the default blink.
    pub fn from_firmware_string(value: &str, pins: &super::hal::PinMap) -> Self {
        let mut parts = value.trim().split(':');
        let kind = parts.next().unwrap_or("").trim();
        let (pin, ms) = if kind.eq_ignore_ascii_case("blink") {
            let pin = parts
                .next()
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .unwrap_or(DEFAULT_BLINK_PIN);
            let ms = parts
                .next()
                .and_then(|m| m.trim().parse::<i64>().ok())
                .filter(|m| *m > 0)
                .unwrap_or(DEFAULT_BLINK_MS);
            (pin, ms)
        } else {
            (DEFAULT_BLINK_PIN, DEFAULT_BLINK_MS)
        };
        let mapping = pins
            .get(pin)
            .or_else(|| pins.get(DEFAULT_BLINK_PIN));
        match mapping {
            Some(m) => Self::blink(m.ddr, m.port, m.bit, ms),
            None => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::hal::PinMap;
    use crate::runtime::registers::{DDRB, PORTB, PORTD};

    #[test]
    fn test_decode_ldi() {
        // ldi r24, 0xA5
        let instr = decode(0xEA85).unwrap();
        assert_eq!(instr, Instruction::ldi(24, 0xA5));
    }

    #[test]
    fn test_decode_out() {
        // out 0x05 (PORTB), r24
        let instr = decode(0xB985).unwrap();
        assert_eq!(instr, Instruction::out(PORTB, 24));
        // out 0x3F (SREG), r0
        let instr = decode(0xBE0F).unwrap();
        assert_eq!(instr, Instruction::out(0x3F + IO_BASE, 0));
    }

    #[test]
    fn test_decode_sbi_cbi() {
        // sbi 0x04, 5 / cbi 0x05, 5
        assert_eq!(decode(0x9A25).unwrap(), Instruction::sbi(DDRB, 5));
        assert_eq!(decode(0x982D).unwrap(), Instruction::cbi(PORTB, 5));
    }

    #[test]
    fn test_decode_rjmp_sign_extension() {
        // rjmp .-2 loops on itself
        assert_eq!(decode(0xCFFF).unwrap(), Instruction::rjmp(0));
        assert_eq!(decode(0xC003).unwrap(), Instruction::rjmp(4));
        assert_eq!(decode(0xC800).unwrap(), Instruction::rjmp(-2047));
    }

    #[test]
    fn test_decode_unknown() {
        assert_eq!(decode(0x0000), Some(Instruction::nop()));
        // mov r0, r1 is not modelled
        assert_eq!(decode(0x2C01), None);
        assert_eq!(decode(0x940C), None);
    }

    #[test]
    fn test_from_words_tallies_unknown() {
        let program = Program::from_words(&[0xEA85, 0x2C01, 0x940C, 0xCFFF]);
        assert_eq!(program.len(), 4);
        assert_eq!(program.unknown, 2);
        assert_eq!(program.decoded(), 2);
        assert_eq!(program.instructions[1], Instruction::nop());
    }

    #[test]
    fn test_blink_layout() {
        let program = Program::blink(DDRB, PORTB, 5, 10);
        assert_eq!(program.len(), 6);
        assert_eq!(program.instructions[0], Instruction::sbi(DDRB, 5));
        assert_eq!(program.instructions[2], Instruction::delay(160_000));
        assert_eq!(program.instructions[5], Instruction::rjmp(-4));
    }

    #[test]
    fn test_firmware_string() {
        let pins = PinMap::default_layout();
        let program = Program::from_firmware_string("blink:D2:20", &pins);
        assert_eq!(program.instructions[1], Instruction::sbi(PORTD, 2));
        assert_eq!(program.instructions[2], Instruction::delay(320_000));

        let fallback = Program::from_firmware_string("mystery", &pins);
        assert_eq!(fallback.instructions[1], Instruction::sbi(PORTB, 5));
        assert_eq!(fallback.instructions[2], Instruction::delay(8_000_000));
    }
}
