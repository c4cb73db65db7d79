#![warn(missing_docs)]
#![allow(clippy::cast_lossless)]

//! Instruction-level emulator for the Thumb/Thumb-2 instruction set on a
//! Cortex-M class microcontroller, with a memory map modeled after the
//! Nordic nRF51/nRF52 peripheral set.
//!
//! The crate is organized the way the hardware is: a flag arithmetic kernel
//! ([`flags`]), an address-space router ([`bus`]), an instruction decoder/
//! executor ([`cpu`]), and a machine controller that ties them together
//! ([`machine`]). Everything the core needs from its environment — firmware
//! bytes in, UART bytes in and out — crosses the [`host`] boundary; the
//! core itself never touches a terminal, socket, or file.
//!
//! # SAFETY POLICY
//!
//! This crate emulates a guest CPU; it does not execute guest code as host
//! machine code. There is no `unsafe` in the instruction-level core. The
//! `cortex_m4` feature gates the Thumb-2 32-bit instruction families, IT
//! blocks, CBZ/CBNZ, and unaligned access; without it the emulator only
//! accepts the Cortex-M0 subset (plain Thumb-16 plus `BL`/`B.W`).
//!
//! # TESTING POLICY
//!
//! Every module below carries its own `#[cfg(test)]` unit tests, written so
//! that `cargo test` exercises as much of the emulator as possible without a
//! GDB client or a terminal attached.

pub mod bit_utils;
pub mod bus;
pub mod cpu;
pub mod error;
pub mod flags;
pub mod gdbserver;
pub mod host;
pub mod machine;

pub use error::{EmuError, StepResult};
pub use machine::Machine;
