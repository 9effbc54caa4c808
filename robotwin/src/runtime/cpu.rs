//! Cycle-budgeted CPU core.

use super::program::{OpCode, Program};
use super::registers::RegisterFile;

/// Fetch/decode/execute loop over a loaded [`Program`].
///
/// The core holds only its own control state. Register mutations go to the
/// register file passed to [`Cpu::execute_cycles`], which the owning board
/// never shares.
#[derive(Debug, Clone, Default)]
pub struct Cpu {
    program: Program,
    pc: usize,
    delay_cycles: u64,
    executed: u64,
}

impl Cpu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the program and reset execution state.
    pub fn load_program(&mut self, program: Program) {
        self.program = program;
        self.pc = 0;
        self.delay_cycles = 0;
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn delay_cycles(&self) -> u64 {
        self.delay_cycles
    }

    /// Instructions retired since construction.
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Run for `cycles` cycles.
    ///
    /// Outstanding delay debt is paid first. An out-of-range `pc` wraps to
    /// the first instruction, and an empty program simply idles. The last
    /// instruction may overrun the budget by one cycle; the overrun is not
    /// carried into the next call.
    pub fn execute_cycles(&mut self, regs: &mut RegisterFile, cycles: u64) {
        let mut remaining = cycles;
        while remaining > 0 {
            if self.delay_cycles > 0 {
                let step = self.delay_cycles.min(remaining);
                self.delay_cycles -= step;
                remaining -= step;
                continue;
            }

            if self.program.is_empty() {
                return;
            }
            if self.pc >= self.program.len() {
                self.pc = 0;
            }

            let instr = self.program.instructions[self.pc];
            let mut cost: u64 = 1;
            match instr.op {
                OpCode::Nop => {}
                OpCode::Ldi => regs.write_register(instr.arg0 as u8, instr.arg1),
                OpCode::Out => {
                    let value = regs.read_register(instr.arg1);
                    regs.write_io(instr.arg0, value);
                }
                OpCode::Sbi => {
                    regs.set_bit(instr.arg0, instr.arg1, true);
                    cost = 2;
                }
                OpCode::Cbi => {
                    regs.set_bit(instr.arg0, instr.arg1, false);
                    cost = 2;
                }
                OpCode::Rjmp => {
                    let target = self.pc as i64 + instr.arg2;
                    // Negative targets land out of range and wrap on the next fetch.
                    self.pc = usize::try_from(target).unwrap_or(usize::MAX);
                    cost = 2;
                }
                OpCode::DelayCycles => {
                    self.delay_cycles = instr.arg2.max(0) as u64;
                }
            }

            if instr.op != OpCode::Rjmp {
                self.pc += 1;
            }
            self.executed += 1;
            remaining = remaining.saturating_sub(cost);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::program::Instruction;
    use crate::runtime::registers::{DDRB, PORTB};

    fn run(program: Program, cycles: u64) -> (Cpu, RegisterFile) {
        let mut cpu = Cpu::new();
        let mut regs = RegisterFile::new();
        cpu.load_program(program);
        cpu.execute_cycles(&mut regs, cycles);
        (cpu, regs)
    }

    #[test]
    fn test_ldi_out() {
        let program = Program::new(vec![
            Instruction::ldi(16, 0x20),
            Instruction::out(PORTB, 16),
        ]);
        let (cpu, regs) = run(program, 2);
        assert_eq!(regs.read_register(16), 0x20);
        assert_eq!(regs.read_io(PORTB), 0x20);
        assert_eq!(cpu.pc(), 2);
    }

    #[test]
    fn test_bit_ops_cost_two_cycles() {
        let program = Program::new(vec![
            Instruction::sbi(DDRB, 5),
            Instruction::sbi(PORTB, 5),
            Instruction::cbi(PORTB, 5),
        ]);
        let (cpu, regs) = run(program, 4);
        assert_eq!(cpu.pc(), 2);
        assert!(regs.get_bit(PORTB, 5));
    }

    #[test]
    fn test_rjmp_loops() {
        let program = Program::new(vec![
            Instruction::nop(),
            Instruction::rjmp(-1),
        ]);
        let (cpu, _) = run(program, 7);
        // nop(1) + rjmp(2) + nop(1) + rjmp(2) + nop(1)
        assert_eq!(cpu.pc(), 1);
        assert_eq!(cpu.executed(), 5);
    }

    #[test]
    fn test_delay_debt_spans_calls() {
        let program = Program::new(vec![
            Instruction::delay(10),
            Instruction::sbi(PORTB, 0),
        ]);
        let mut cpu = Cpu::new();
        let mut regs = RegisterFile::new();
        cpu.load_program(program);
        cpu.execute_cycles(&mut regs, 5);
        assert_eq!(cpu.delay_cycles(), 6);
        assert!(!regs.get_bit(PORTB, 0));
        cpu.execute_cycles(&mut regs, 6);
        assert_eq!(cpu.delay_cycles(), 0);
        assert!(!regs.get_bit(PORTB, 0));
        cpu.execute_cycles(&mut regs, 2);
        assert!(regs.get_bit(PORTB, 0));
    }

    #[test]
    fn test_empty_program_idles() {
        let (cpu, regs) = run(Program::default(), 100);
        assert_eq!(cpu.pc(), 0);
        assert_eq!(regs, RegisterFile::new());
    }

    #[test]
    fn test_pc_wraps() {
        let program = Program::new(vec![Instruction::nop(), Instruction::nop()]);
        let (cpu, _) = run(program, 3);
        assert_eq!(cpu.pc(), 1);
    }

    #[test]
    fn test_load_resets_state() {
        let (mut cpu, _) = run(Program::blink(DDRB, PORTB, 5, 1), 10);
        assert!(cpu.delay_cycles() > 0);
        cpu.load_program(Program::default());
        assert_eq!(cpu.pc(), 0);
        assert_eq!(cpu.delay_cycles(), 0);
    }

    #[test]
    fn test_identical_runs_are_bit_identical() {
        let program = Program::blink(DDRB, PORTB, 5, 1);
        let (a_cpu, a_regs) = run(program.clone(), 123_457);
        let (b_cpu, b_regs) = run(program, 123_457);
        assert_eq!(a_regs, b_regs);
        assert_eq!(a_cpu.pc(), b_cpu.pc());
        assert_eq!(a_cpu.delay_cycles(), b_cpu.delay_cycles());
    }
}
