//! Machine Controller (spec.md §4.4): the top-level [`Machine`] entity,
//! lifecycle operations, the run loop, and the inspection entry points used
//! by an external debugger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::bus::{Access, Bus, IsaLevel};
use crate::error::{EmuError, StepResult};
use crate::flags::Flags;
use crate::host::Host;

/// Register index aliases (spec.md §3).
pub const SP: usize = 13;
pub const LR: usize = 14;
pub const PC: usize = 15;

/// Sentinel return address placed in `LR` at reset; a transfer of control to
/// this address terminates emulation (spec.md §3, §4.3).
pub const EXIT_SENTINEL: u32 = 0xdead_beef;

/// Bound on the diagnostic backtrace (spec.md §3, §8).
pub const BACKTRACE_LEN: usize = 100;

/// Host-facing log levels (spec.md §6): each enables everything below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
  Error,
  Warn,
  Calls,
  CallsSp,
  Instrs,
}

/// Program status flags, the Thumb bit, and the Cortex-M4 IT-block state.
///
/// `it_state` follows the architectural ITSTATE byte layout: bits `[7:5]`
/// are the fixed high bits of the first condition, bits `[4:0]` are a shift
/// register seeded from `firstcond<0>:mask<3:0>` and advanced by one
/// instruction at a time. This is a single combined byte rather than the
/// `it1`(2-bit)/`it2`(6-bit) split named informally in spec.md §3; the two
/// are behaviorally equivalent; see DESIGN.md.
#[derive(Debug, Clone, Copy, Default)]
pub struct Psr {
  pub flags: Flags,
  pub t: bool,
  it_state: u8,
}

impl Psr {
  #[must_use]
  pub fn in_it_block(&self) -> bool {
    self.it_state & 0xF != 0
  }

  /// Condition of the next instruction to execute. `AL` outside an IT block.
  #[must_use]
  pub fn current_cond(&self) -> u8 {
    if self.in_it_block() {
      (self.it_state >> 4) & 0xF
    } else {
      0xE
    }
  }

  pub fn set_it_state(&mut self, firstcond: u8, mask: u8) {
    let top3 = (firstcond >> 1) & 0x7;
    let bit4 = firstcond & 1;
    self.it_state = (top3 << 5) | (bit4 << 4) | (mask & 0xF);
  }

  /// Consumes one bit of IT state, as done after every instruction executed
  /// (or skipped) inside an IT block.
  pub fn advance_it(&mut self) {
    if self.it_state & 0b111 == 0 {
      self.it_state = 0;
    } else {
      let low5 = self.it_state & 0x1F;
      self.it_state = (self.it_state & 0xE0) | ((low5 << 1) & 0x1F);
    }
  }
}

/// One logical call-stack entry: the return address and the stack pointer
/// observed at the call site (spec.md §3, §4.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct BacktraceEntry {
  pub pc: u32,
  pub sp: u32,
}

/// The single top-level emulator entity (spec.md §3).
pub struct Machine {
  pub regs: [u32; 16],
  pub psr: Psr,
  pub bus: Bus,
  pub hwbreak: [u32; 4],
  halt_flag: Arc<AtomicBool>,
  pub call_depth: usize,
  pub backtrace: [BacktraceEntry; BACKTRACE_LEN],
  pub last_sp: u32,
  pub loglevel: LogLevel,
}

impl Machine {
  /// Creates a machine. Validates `image_size` (must hold at least the
  /// vector table) and `pagesize` (must be a power of two).
  pub fn create(
    image_size: usize,
    pagesize: usize,
    mem_size: usize,
    loglevel: LogLevel,
  ) -> Result<Self, EmuError> {
    if image_size < 64 {
      return Err(EmuError::ImageTooSmall { got: image_size, min: 64 });
    }
    if pagesize == 0 || !pagesize.is_power_of_two() {
      return Err(EmuError::PagesizeNotPowerOfTwo(pagesize));
    }
    let isa_level = if cfg!(feature = "cortex_m4") { IsaLevel::CortexM4 } else { IsaLevel::CortexM0 };
    Ok(Machine {
      regs: [0; 16],
      psr: Psr::default(),
      bus: Bus::new(image_size, pagesize, mem_size, isa_level),
      hwbreak: [0; 4],
      halt_flag: Arc::new(AtomicBool::new(false)),
      call_depth: 0,
      backtrace: [BacktraceEntry::default(); BACKTRACE_LEN],
      last_sp: 0,
      loglevel,
    })
  }

  /// Copies `bytes` into the prefix of flash. Unused tail bytes keep
  /// whatever they held before (initially `0xFF`, the erased state).
  pub fn load(&mut self, bytes: &[u8]) -> Result<(), EmuError> {
    if bytes.len() > self.bus.image.len() {
      return Err(EmuError::FirmwareTooLarge { got: bytes.len(), cap: self.bus.image.len() });
    }
    self.bus.image[..bytes.len()].copy_from_slice(bytes);
    Ok(())
  }

  /// Resets the machine: `SP` from the first vector-table word, `PC` from
  /// the second (with the Thumb bit forced on), `LR` to the exit sentinel.
  pub fn reset(&mut self) {
    let sp = u32::from_le_bytes(self.bus.image[0..4].try_into().unwrap());
    let pc = u32::from_le_bytes(self.bus.image[4..8].try_into().unwrap()) | 1;
    self.regs = [0; 16];
    self.regs[SP] = sp;
    self.regs[PC] = pc;
    self.regs[LR] = EXIT_SENTINEL;
    self.psr = Psr::default();
    self.psr.t = true;
    self.call_depth = 1;
    self.backtrace = [BacktraceEntry::default(); BACKTRACE_LEN];
    self.backtrace[0] = BacktraceEntry { pc, sp };
    self.last_sp = sp;
  }

  /// Executes one instruction.
  pub fn step(&mut self, host: &mut dyn Host) -> StepResult {
    crate::cpu::step(self, host)
  }

  /// Steps until a fatal result, `Exit`, `Halt`, or `BreakHit`. On a fatal
  /// result, prints the register snapshot and the backtrace before
  /// returning (spec.md §7).
  pub fn run(&mut self, host: &mut dyn Host) -> StepResult {
    loop {
      if self.halt_flag.swap(false, Ordering::AcqRel) {
        return StepResult::Halt;
      }
      let result = self.step(host);
      if result == StepResult::Ok {
        continue;
      }
      if result.is_fatal() {
        self.print_registers();
        self.push_backtrace_pc();
        self.print_backtrace();
      }
      return result;
    }
  }

  /// Thread-safe request for `run` to stop at the next instruction boundary
  /// (spec.md §5). A second call before `run` observes the first is a
  /// no-op.
  pub fn halt(&self) {
    self.halt_flag.store(true, Ordering::Release);
  }

  /// A clone of the halt flag, for a debug server running on another
  /// thread.
  #[must_use]
  pub fn halt_handle(&self) -> Arc<AtomicBool> {
    Arc::clone(&self.halt_flag)
  }

  pub fn set_breakpoint(&mut self, slot: usize, address: u32) -> Result<(), EmuError> {
    self.hwbreak.get_mut(slot).map(|s| *s = address).ok_or(EmuError::BadBreakpointSlot(slot))
  }

  #[must_use]
  pub fn read_register(&self, i: usize) -> u32 {
    self.regs.get(i).copied().unwrap_or(0)
  }

  /// Copies up to `num` registers into `buf`, clamped to the 16 registers
  /// that exist (spec.md §9's open question: clamp down, not up).
  pub fn read_registers(&self, buf: &mut [u32], num: usize) -> usize {
    let n = num.min(self.regs.len()).min(buf.len());
    buf[..n].copy_from_slice(&self.regs[..n]);
    n
  }

  /// Reads guest memory through the router, so peripheral side effects
  /// (e.g. draining UART.RXD) are observable from the debugger too.
  /// Uses word transfers when both `address` and `length` are word-aligned,
  /// byte transfers otherwise.
  pub fn read_memory(
    &mut self,
    buf: &mut [u8],
    address: u32,
    length: usize,
    host: &mut dyn Host,
  ) -> Result<(), StepResult> {
    if address % 4 == 0 && length % 4 == 0 {
      for (i, chunk) in buf[..length].chunks_mut(4).enumerate() {
        let mut v = 0u32;
        self.bus.transfer(address + (i as u32) * 4, Access::Load, &mut v, 32, false, host)?;
        chunk.copy_from_slice(&v.to_le_bytes());
      }
    } else {
      for (i, slot) in buf[..length].iter_mut().enumerate() {
        let mut v = 0u32;
        self.bus.transfer(address + i as u32, Access::Load, &mut v, 8, false, host)?;
        *slot = v as u8;
      }
    }
    Ok(())
  }

  /// Pushes a call-site entry, pruning stale entries whose recorded SP is
  /// at or above the current SP first (spec.md §4.3's backtrace protocol:
  /// this recovers from tail-call returns that never pop via `POP {..,PC}`).
  pub(crate) fn push_call(&mut self, return_pc: u32, sp: u32) {
    while self.call_depth > 0 && self.backtrace[self.call_depth - 1].sp >= sp {
      self.call_depth -= 1;
    }
    if self.call_depth < BACKTRACE_LEN {
      self.backtrace[self.call_depth] = BacktraceEntry { pc: return_pc, sp };
      self.call_depth += 1;
    }
    self.last_sp = sp;
  }

  fn push_backtrace_pc(&mut self) {
    let pc = self.regs[PC];
    let sp = self.regs[SP];
    if self.call_depth < BACKTRACE_LEN {
      self.backtrace[self.call_depth] = BacktraceEntry { pc, sp };
      self.call_depth += 1;
    }
  }

  fn print_registers(&self) {
    for (i, r) in self.regs.iter().enumerate() {
      log::error!("r{i} = {r:#010x}");
    }
    log::error!(
      "psr: n={} z={} c={} v={}",
      self.psr.flags.n,
      self.psr.flags.z,
      self.psr.flags.c,
      self.psr.flags.v
    );
  }

  fn print_backtrace(&self) {
    log::error!("backtrace ({} frames):", self.call_depth);
    for entry in self.backtrace[..self.call_depth].iter().rev() {
      log::error!("  pc={:#010x} sp={:#010x}", entry.pc, entry.sp);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn blank() -> Machine {
    Machine::create(256, 64, 1024, LogLevel::Error).unwrap()
  }

  #[test]
  fn test_create_rejects_tiny_image() {
    assert_eq!(
      Machine::create(32, 64, 1024, LogLevel::Error).unwrap_err(),
      EmuError::ImageTooSmall { got: 32, min: 64 }
    );
  }

  #[test]
  fn test_create_rejects_non_power_of_two_pagesize() {
    assert_eq!(
      Machine::create(256, 100, 1024, LogLevel::Error).unwrap_err(),
      EmuError::PagesizeNotPowerOfTwo(100)
    );
  }

  #[test]
  fn test_reset_reads_vector_table() {
    let mut m = blank();
    m.bus.image[0..4].copy_from_slice(&0x2000_0100u32.to_le_bytes());
    m.bus.image[4..8].copy_from_slice(&0x0000_0008u32.to_le_bytes());
    m.reset();
    assert_eq!(m.regs[SP], 0x2000_0100);
    assert_eq!(m.regs[PC], 0x0000_0009); // thumb bit forced on
    assert_eq!(m.regs[LR], EXIT_SENTINEL);
    assert_eq!(m.call_depth, 1);
  }

  #[test]
  fn test_read_registers_clamps_down() {
    let m = blank();
    let mut buf = [0u32; 20];
    let n = m.read_registers(&mut buf, 20);
    assert_eq!(n, 16);
  }

  #[test]
  fn test_double_halt_is_idempotent() {
    let m = blank();
    m.halt();
    m.halt();
    assert!(m.halt_flag.swap(false, Ordering::AcqRel));
    assert!(!m.halt_flag.swap(false, Ordering::AcqRel));
  }

  #[test]
  fn test_set_breakpoint_then_clear() {
    let mut m = blank();
    m.set_breakpoint(0, 0x1000).unwrap();
    assert_eq!(m.hwbreak[0], 0x1000);
    m.set_breakpoint(0, 0).unwrap();
    assert_eq!(m.hwbreak[0], 0);
  }

  #[test]
  fn test_backtrace_prunes_by_sp() {
    let mut m = blank();
    m.call_depth = 0;
    m.push_call(0x100, 0x2000_0080);
    m.push_call(0x104, 0x2000_0078);
    // A tail call returns to sp 0x80 without ever popping; the next BL
    // from that level should drop the stale 0x78 entry.
    m.push_call(0x108, 0x2000_0080);
    assert_eq!(m.call_depth, 2);
    assert_eq!(m.backtrace[1].pc, 0x108);
  }
}
