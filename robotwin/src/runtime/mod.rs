//! Virtual microcontroller runtime.
//!
//! Leaf-first: [`registers`] and [`clock`] hold state, [`hal`] maps pins onto
//! registers, [`program`] and [`cpu`] execute instructions, [`hex`] loads
//! images and [`board`] ties one instance together.

pub mod board;
pub mod clock;
pub mod cpu;
pub mod hal;
pub mod hex;
pub mod memory;
pub mod profiles;
pub mod program;
pub mod registers;

pub use board::VirtualBoard;
pub use clock::VirtualClock;
pub use cpu::Cpu;
pub use hal::{Hal, PinMap, PinMapping, PinState};
pub use hex::{HexError, HexImage};
pub use memory::VirtualMemory;
pub use profiles::BoardProfile;
pub use program::{decode, Instruction, OpCode, Program};
pub use registers::RegisterFile;
