//! Register file of a virtual AVR board.
//!
//! Data-space addresses follow the ATmega328P layout: the 32 general purpose
//! registers live below 0x20 and the I/O space starts at 0x20. Only the I/O
//! window and the register bank are modelled; there is no behavior here.

/// First data-space address of the I/O window.
pub const IO_BASE: u16 = 0x20;
/// Size of the modelled I/O window in bytes.
pub const IO_SIZE: usize = 0x200;
/// Number of general purpose registers (r0..r31).
pub const GENERAL_REGISTERS: usize = 32;

pub const PINB: u16 = 0x23;
pub const DDRB: u16 = 0x24;
pub const PORTB: u16 = 0x25;
pub const PINC: u16 = 0x26;
pub const DDRC: u16 = 0x27;
pub const PORTC: u16 = 0x28;
pub const PIND: u16 = 0x29;
pub const DDRD: u16 = 0x2A;
pub const PORTD: u16 = 0x2B;

/// Byte-addressable I/O space plus the general register bank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    io: Vec<u8>,
    general: [u8; GENERAL_REGISTERS],
}

impl RegisterFile {
    pub fn new() -> Self {
        Self {
            io: vec![0; IO_SIZE],
            general: [0; GENERAL_REGISTERS],
        }
    }

    /// Read an I/O register. Addresses outside the window read as 0.
    pub fn read_io(&self, address: u16) -> u8 {
        io_index(address).map(|i| self.io[i]).unwrap_or(0)
    }

    /// Write an I/O register. Writes outside the window are ignored.
    pub fn write_io(&mut self, address: u16, value: u8) {
        if let Some(i) = io_index(address) {
            self.io[i] = value;
        }
    }

    pub fn read_register(&self, index: u8) -> u8 {
        self.general
            .get(index as usize)
            .copied()
            .unwrap_or(0)
    }

    pub fn write_register(&mut self, index: u8, value: u8) {
        if let Some(slot) = self.general.get_mut(index as usize) {
            *slot = value;
        }
    }

    pub fn get_bit(&self, address: u16, bit: u8) -> bool {
        if bit > 7 {
            return false;
        }
        self.read_io(address) & (1 << bit) != 0
    }

    pub fn set_bit(&mut self, address: u16, bit: u8, value: bool) {
        if bit > 7 {
            return;
        }
        let current = self.read_io(address);
        let next = if value {
            current | (1 << bit)
        } else {
            current & !(1 << bit)
        };
        self.write_io(address, next);
    }

    /// Raw view of the I/O window, indexed from [`IO_BASE`].
    pub fn io_bytes(&self) -> &[u8] {
        &self.io
    }

    pub fn general_registers(&self) -> &[u8; GENERAL_REGISTERS] {
        &self.general
    }

    /// Zero every register.
    pub fn reset(&mut self) {
        self.io.iter_mut().for_each(|b| *b = 0);
        self.general = [0; GENERAL_REGISTERS];
    }
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self::new()
    }
}

fn io_index(address: u16) -> Option<usize> {
    let offset = address.checked_sub(IO_BASE)? as usize;
    (offset < IO_SIZE).then_some(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_round_trip() {
        let mut regs = RegisterFile::new();
        regs.write_io(PORTB, 0xA5);
        assert_eq!(regs.read_io(PORTB), 0xA5);
        assert_eq!(regs.io_bytes()[(PORTB - IO_BASE) as usize], 0xA5);
    }

    #[test]
    fn test_out_of_window_is_ignored() {
        let mut regs = RegisterFile::new();
        regs.write_io(0x10, 0xFF);
        regs.write_io(IO_BASE + IO_SIZE as u16, 0xFF);
        assert_eq!(regs.read_io(0x10), 0);
        assert!(regs.io_bytes().iter().all(|b| *b == 0));
    }

    #[test]
    fn test_set_and_clear_bits() {
        let mut regs = RegisterFile::new();
        regs.set_bit(DDRB, 5, true);
        regs.set_bit(DDRB, 0, true);
        assert_eq!(regs.read_io(DDRB), 0b0010_0001);
        regs.set_bit(DDRB, 5, false);
        assert!(!regs.get_bit(DDRB, 5));
        assert!(regs.get_bit(DDRB, 0));
        regs.set_bit(DDRB, 9, true);
        assert_eq!(regs.read_io(DDRB), 0b0000_0001);
    }

    #[test]
    fn test_general_registers() {
        let mut regs = RegisterFile::new();
        regs.write_register(16, 0x20);
        regs.write_register(40, 0x01);
        assert_eq!(regs.read_register(16), 0x20);
        assert_eq!(regs.read_register(40), 0);
        regs.reset();
        assert_eq!(regs.read_register(16), 0);
    }
}
