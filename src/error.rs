//! Construction-time errors and the per-step outcome codes.

use thiserror::Error;

/// Failures that can occur while building or configuring a [`crate::machine::Machine`].
///
/// These are genuine errors (the caller passed a bad configuration); they are
/// distinct from [`StepResult`], which reports expected emulation outcomes.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmuError {
  #[error("image_size must be at least {min} bytes (got {got})")]
  ImageTooSmall { got: usize, min: usize },
  #[error("pagesize {0} must be a power of two")]
  PagesizeNotPowerOfTwo(usize),
  #[error("firmware image of {got} bytes does not fit in a {cap}-byte flash")]
  FirmwareTooLarge { got: usize, cap: usize },
  #[error("breakpoint slot {0} is out of range (valid: 0..4)")]
  BadBreakpointSlot(usize),
}

/// Outcome of [`crate::machine::Machine::step`] and
/// [`crate::machine::Machine::run`].
///
/// `Ok` results (`Ok`, `Exit`, `Halt`, `BreakHit`) let the caller continue
/// driving the machine; the rest are fatal to the run loop (spec.md §4.3,
/// §7) and are reported to the caller rather than retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepResult {
  /// Instruction executed normally; keep stepping.
  Ok,
  /// PC reached the sentinel return address `0xdeadbeef`.
  Exit,
  /// The halt flag was observed at the top of the run loop.
  Halt,
  /// A hardware or software (`BKPT`) breakpoint was hit.
  BreakHit,
  /// PC was out of range, or its low bit was clear (not Thumb).
  FaultPC,
  /// The address-space router rejected a load or store.
  FaultMemory,
  /// The fetched halfword (or 32-bit Thumb-2 encoding) is not recognized.
  Undefined,
  /// `SDIV`/`UDIV` with a zero divisor.
  DivideByZero,
}

impl StepResult {
  /// `true` for outcomes that should stop a `run` loop and be reported to
  /// the caller as a fatal condition (spec.md §4.3's "State machine" table).
  #[must_use]
  pub fn is_fatal(self) -> bool {
    matches!(
      self,
      StepResult::FaultPC | StepResult::FaultMemory | StepResult::Undefined | StepResult::DivideByZero
    )
  }
}
