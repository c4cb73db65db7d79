//! Instruction Decoder/Executor (spec.md §4.3): fetches one halfword at
//! `PC`, classifies it into a Thumb-16 format or a Thumb-2 32-bit family,
//! and executes it against a [`Machine`]'s registers, flags, and [`Bus`].
//!
//! The classification is a single `match` on the top 5 bits of the fetched
//! halfword (`hw >> 11`), which lines up with every format boundary in the
//! 16-bit encoding space except the ALU/hi-register pair (disambiguated by
//! bit 10) and the `1011` "misc" bucket (disambiguated in [`execute_misc16`]
//! in the order spec.md §4.3 requires: add/sub SP immediate and sign/zero
//! extend before the generic push/pop bucket, CBZ/CBNZ after both).

use crate::bus::{Access, IsaLevel};
use crate::flags::{self, Cond, Flags};
use crate::host::Host;
use crate::error::StepResult;
use crate::machine::{Machine, EXIT_SENTINEL, LR, LogLevel, PC, SP};

/// Reads the halfword at `addr & !1`. Out-of-range reads return `0`, which
/// decodes to `Undefined` rather than panicking; `step`'s PC-range
/// precondition makes this only reachable for the trailing halfword of a
/// 32-bit instruction that runs past the end of the image.
fn fetch_halfword(image: &[u8], addr: u32) -> u16 {
  let off = (addr & !1) as usize;
  if off + 2 <= image.len() {
    u16::from_le_bytes([image[off], image[off + 1]])
  } else {
    0
  }
}

fn is_32bit_prefix(hw: u16) -> bool {
  matches!(hw >> 11, 0x1D | 0x1E | 0x1F)
}

/// Writes `val` to register `idx`, forcing the Thumb bit on when `idx` is
/// `PC` (spec.md §3's invariant: bit 0 of PC is always 1).
fn write_reg(m: &mut Machine, idx: usize, val: u32) {
  if idx == PC {
    m.regs[PC] = val | 1;
  } else {
    m.regs[idx] = val;
  }
}

fn branch_to(m: &mut Machine, target: u32) {
  m.regs[PC] = target | 1;
}

/// `(PC + 2)` in this module's convention, i.e. architectural `PC + 4`
/// relative to the start of the currently executing 16-bit instruction
/// (spec.md §4.3: PC is advanced by 2 at fetch time, before classification).
fn pc_plus2(m: &Machine) -> u32 {
  m.regs[PC].wrapping_add(2)
}

/// Executes one instruction (spec.md §4.3).
pub fn step(m: &mut Machine, host: &mut dyn Host) -> StepResult {
  for &bp in &m.hwbreak {
    if bp != 0 && m.regs[PC].wrapping_sub(1) == bp {
      return StepResult::BreakHit;
    }
  }
  if m.regs[PC] == EXIT_SENTINEL {
    return StepResult::Exit;
  }
  if m.regs[PC] & 1 == 0 || (m.regs[PC] as usize) > m.bus.image.len().saturating_sub(2) {
    return StepResult::FaultPC;
  }

  let start_pc = m.regs[PC];
  let was_in_it_block = m.psr.in_it_block();
  let cond = m.psr.current_cond();

  let hw1 = fetch_halfword(&m.bus.image, m.regs[PC]);
  m.regs[PC] = m.regs[PC].wrapping_add(2);

  if was_in_it_block && !Cond(cond).eval(m.psr.flags) {
    if is_32bit_prefix(hw1) {
      m.regs[PC] = m.regs[PC].wrapping_add(2);
    }
    m.psr.advance_it();
    if m.loglevel >= LogLevel::Instrs {
      log::trace!("skip (IT false) at {start_pc:#010x}");
    }
    return StepResult::Ok;
  }

  let result = execute(m, hw1, host);
  if was_in_it_block {
    m.psr.advance_it();
  }
  if result == StepResult::Undefined {
    m.regs[PC] = start_pc;
  }
  if m.loglevel >= LogLevel::Instrs && result == StepResult::Ok {
    log::trace!("{start_pc:#010x}: {hw1:#06x}");
  }
  result
}

fn execute(m: &mut Machine, hw: u16, host: &mut dyn Host) -> StepResult {
  let top5 = hw >> 11;
  match top5 {
    0 | 1 | 2 => format1_shift(m, hw, top5),
    3 => format2_addsub(m, hw),
    4..=7 => format3_imm(m, hw),
    8 => {
      if (hw >> 10) & 1 == 0 { format4_alu(m, hw) } else { format5_hireg(m, hw) }
    }
    9 => format6_pcrel_ldr(m, hw, host).unwrap_or_else(|e| e),
    10 | 11 => format7_8_ldr_str_reg(m, hw, host).unwrap_or_else(|e| e),
    12..=15 => format9_ldr_str_imm(m, hw, host).unwrap_or_else(|e| e),
    16 | 17 => format10_ldrh_strh(m, hw, host).unwrap_or_else(|e| e),
    18 | 19 => format11_sp_ldr_str(m, hw, host).unwrap_or_else(|e| e),
    20 | 21 => format12_addr(m, hw),
    22 | 23 => execute_misc16(m, hw, host),
    24 | 25 => format15_ldm_stm(m, hw, host).unwrap_or_else(|e| e),
    26 | 27 => format16_cond_branch(m, hw),
    28 => format18_uncond_branch(m, hw),
    0x1D | 0x1E | 0x1F => {
      let hw2 = fetch_halfword(&m.bus.image, m.regs[PC]);
      m.regs[PC] = m.regs[PC].wrapping_add(2);
      execute32(m, hw, hw2, top5, host)
    }
    _ => StepResult::Undefined,
  }
}

// ---- Format 1: shift by immediate (LSLS/LSRS/ASRS) ----

fn format1_shift(m: &mut Machine, hw: u16, top5: u16) -> StepResult {
  let imm5 = u32::from((hw >> 6) & 0x1F);
  let rs = usize::from((hw >> 3) & 0x7);
  let rd = usize::from(hw & 0x7);
  let src = m.regs[rs];
  let carry_in = m.psr.flags.c;
  let (result, c) = match top5 {
    0 => flags::lsl(src, imm5, carry_in),
    1 => flags::lsr(src, if imm5 == 0 { 32 } else { imm5 }, carry_in),
    _ => flags::asr(src, if imm5 == 0 { 32 } else { imm5 }, carry_in),
  };
  m.regs[rd] = result;
  if !m.psr.in_it_block() {
    m.psr.flags = Flags::nz_of(result, c, m.psr.flags.v);
  }
  StepResult::Ok
}

// ---- Format 2: ADD/SUB register or 3-bit immediate ----

fn format2_addsub(m: &mut Machine, hw: u16) -> StepResult {
  let imm_or_reg = u32::from((hw >> 6) & 0x7);
  let is_imm = (hw >> 10) & 1 != 0;
  let is_sub = (hw >> 9) & 1 != 0;
  let rs = usize::from((hw >> 3) & 0x7);
  let rd = usize::from(hw & 0x7);
  let a = m.regs[rs];
  let b = if is_imm { imm_or_reg } else { m.regs[imm_or_reg as usize] };
  let (result, f) = if is_sub { flags::sub(a, b) } else { flags::add(a, b) };
  m.regs[rd] = result;
  if !m.psr.in_it_block() {
    m.psr.flags = f;
  }
  StepResult::Ok
}

// ---- Format 3: immediate MOV/CMP/ADD/SUB ----

fn format3_imm(m: &mut Machine, hw: u16) -> StepResult {
  let op = (hw >> 11) & 0x3;
  let rd = usize::from((hw >> 8) & 0x7);
  let imm8 = u32::from(hw & 0xFF);
  let a = m.regs[rd];
  let suppress = m.psr.in_it_block();
  match op {
    0 => {
      // MOVS rd, #imm8
      if !suppress {
        m.psr.flags = Flags::nz_of(imm8, m.psr.flags.c, m.psr.flags.v);
      }
      m.regs[rd] = imm8;
    }
    1 => {
      // CMP rd, #imm8 -- always sets flags, never suppressed by IT
      let (_, f) = flags::sub(a, imm8);
      m.psr.flags = f;
    }
    2 => {
      let (result, f) = flags::add(a, imm8);
      m.regs[rd] = result;
      if !suppress {
        m.psr.flags = f;
      }
    }
    _ => {
      let (result, f) = flags::sub(a, imm8);
      m.regs[rd] = result;
      if !suppress {
        m.psr.flags = f;
      }
    }
  }
  StepResult::Ok
}

// ---- Format 4: ALU operations (Rd, Rs) ----

fn format4_alu(m: &mut Machine, hw: u16) -> StepResult {
  let op = (hw >> 6) & 0xF;
  let rs = usize::from((hw >> 3) & 0x7);
  let rd = usize::from(hw & 0x7);
  let a = m.regs[rd];
  let b = m.regs[rs];
  let suppress = m.psr.in_it_block();
  let c_in = m.psr.flags.c;

  macro_rules! logical {
    ($result:expr) => {{
      let result = $result;
      m.regs[rd] = result;
      if !suppress {
        m.psr.flags = Flags::nz_of(result, m.psr.flags.c, m.psr.flags.v);
      }
    }};
  }

  match op {
    0 => logical!(a & b),                                   // AND
    1 => logical!(a ^ b),                                    // EOR
    2 => {
      let (result, c) = flags::lsl(a, b & 0xFF, c_in);
      m.regs[rd] = result;
      if !suppress {
        m.psr.flags = Flags::nz_of(result, c, m.psr.flags.v);
      }
    }
    3 => {
      let (result, c) = flags::lsr(a, b & 0xFF, c_in);
      m.regs[rd] = result;
      if !suppress {
        m.psr.flags = Flags::nz_of(result, c, m.psr.flags.v);
      }
    }
    4 => {
      let (result, c) = flags::asr(a, b & 0xFF, c_in);
      m.regs[rd] = result;
      if !suppress {
        m.psr.flags = Flags::nz_of(result, c, m.psr.flags.v);
      }
    }
    5 => {
      let (result, f) = flags::adc(a, b, c_in);
      m.regs[rd] = result;
      if !suppress {
        m.psr.flags = f;
      }
    }
    6 => {
      let (result, f) = flags::sbc(a, b, c_in);
      m.regs[rd] = result;
      if !suppress {
        m.psr.flags = f;
      }
    }
    7 => return StepResult::Undefined, // ROR not implemented in this ALU slot
    8 => logical!(a & b),                                    // TST (discard below)
    9 => {
      let (result, f) = flags::sub(0, b);
      m.regs[rd] = result;
      if !suppress {
        m.psr.flags = f;
      }
    }
    10 => {
      let (_, f) = flags::sub(a, b);
      m.psr.flags = f; // CMP: never suppressed
    }
    11 => {
      let (_, f) = flags::add(a, b);
      m.psr.flags = f; // CMN: never suppressed
    }
    12 => logical!(a | b),                                   // ORR
    13 => {
      let result = (a as i64 * b as i64) as u32; // MUL
      m.regs[rd] = result;
      if !suppress {
        m.psr.flags = Flags::nz_of(result, m.psr.flags.c, m.psr.flags.v);
      }
    }
    14 => logical!(a & !b),                                  // BIC
    _ => logical!(!b),                                        // MVN
  }

  // TST must not write Rd; undo the macro's write for op==8.
  if op == 8 {
    m.regs[rd] = a;
    if !suppress {
      m.psr.flags = Flags::nz_of(a & b, m.psr.flags.c, m.psr.flags.v);
    }
  }
  StepResult::Ok
}

// ---- Format 5: hi-register operations / BX / BLX ----

fn format5_hireg(m: &mut Machine, hw: u16) -> StepResult {
  let op = (hw >> 8) & 0x3;
  let h1 = (hw >> 7) & 1;
  let h2 = (hw >> 6) & 1;
  let rs = usize::from(((h2 << 3) | ((hw >> 3) & 0x7)) as u16);
  let rd = usize::from(((h1 << 3) | (hw & 0x7)) as u16);

  match op {
    0 => {
      let result = m.regs[rd].wrapping_add(m.regs[rs]);
      write_reg(m, rd, result);
    }
    1 => {
      let (_, f) = flags::sub(m.regs[rd], m.regs[rs]);
      m.psr.flags = f;
    }
    2 => {
      let val = m.regs[rs];
      write_reg(m, rd, val);
    }
    _ => {
      let target = m.regs[rs];
      if h1 == 1 {
        m.regs[LR] = m.regs[PC] | 1; // BLX: LR = address of the instruction after this one
        m.push_call(m.regs[LR], m.regs[SP]);
      }
      branch_to(m, target);
      return StepResult::Ok;
    }
  }
  StepResult::Ok
}

// ---- Format 6: PC-relative load ----

fn format6_pcrel_ldr(m: &mut Machine, hw: u16, host: &mut dyn Host) -> Result<StepResult, StepResult> {
  let rd = usize::from((hw >> 8) & 0x7);
  let imm8 = u32::from(hw & 0xFF);
  let addr = (pc_plus2(m) & !3).wrapping_add(imm8 * 4);
  let mut v = 0;
  m.bus.transfer(addr, Access::Load, &mut v, 32, false, host)?;
  m.regs[rd] = v;
  Ok(StepResult::Ok)
}

// ---- Formats 7/8: load/store with register offset ----

fn format7_8_ldr_str_reg(m: &mut Machine, hw: u16, host: &mut dyn Host) -> Result<StepResult, StepResult> {
  let ro = usize::from((hw >> 6) & 0x7);
  let rb = usize::from((hw >> 3) & 0x7);
  let rd = usize::from(hw & 0x7);
  let addr = m.regs[rb].wrapping_add(m.regs[ro]);
  if (hw >> 9) & 1 == 0 {
    let l = (hw >> 11) & 1 != 0;
    let b = (hw >> 10) & 1 != 0;
    let width = if b { 8 } else { 32 };
    if l {
      let mut v = 0;
      m.bus.transfer(addr, Access::Load, &mut v, width, false, host)?;
      m.regs[rd] = v;
    } else {
      let mut v = m.regs[rd];
      m.bus.transfer(addr, Access::Store, &mut v, width, false, host)?;
    }
  } else {
    let h = (hw >> 11) & 1 != 0;
    let s = (hw >> 10) & 1 != 0;
    match (s, h) {
      (false, false) => {
        let mut v = m.regs[rd];
        m.bus.transfer(addr, Access::Store, &mut v, 16, false, host)?;
      }
      (false, true) => {
        let mut v = 0;
        m.bus.transfer(addr, Access::Load, &mut v, 16, false, host)?;
        m.regs[rd] = v;
      }
      (true, false) => {
        let mut v = 0;
        m.bus.transfer(addr, Access::Load, &mut v, 8, true, host)?;
        m.regs[rd] = v;
      }
      (true, true) => {
        let mut v = 0;
        m.bus.transfer(addr, Access::Load, &mut v, 16, true, host)?;
        m.regs[rd] = v;
      }
    }
  }
  Ok(StepResult::Ok)
}

// ---- Format 9: load/store word/byte with 5-bit immediate offset ----

fn format9_ldr_str_imm(m: &mut Machine, hw: u16, host: &mut dyn Host) -> Result<StepResult, StepResult> {
  let b = (hw >> 12) & 1 != 0;
  let l = (hw >> 11) & 1 != 0;
  let offset5 = u32::from((hw >> 6) & 0x1F);
  let rb = usize::from((hw >> 3) & 0x7);
  let rd = usize::from(hw & 0x7);
  let width: u8 = if b { 8 } else { 32 };
  let scale = if b { 1 } else { 4 };
  let addr = m.regs[rb].wrapping_add(offset5 * scale);
  if l {
    let mut v = 0;
    m.bus.transfer(addr, Access::Load, &mut v, width, false, host)?;
    m.regs[rd] = v;
  } else {
    let mut v = m.regs[rd];
    m.bus.transfer(addr, Access::Store, &mut v, width, false, host)?;
  }
  Ok(StepResult::Ok)
}

// ---- Format 10: load/store halfword, 5-bit immediate scaled by 2 ----

fn format10_ldrh_strh(m: &mut Machine, hw: u16, host: &mut dyn Host) -> Result<StepResult, StepResult> {
  let l = (hw >> 11) & 1 != 0;
  let offset5 = u32::from((hw >> 6) & 0x1F);
  let rb = usize::from((hw >> 3) & 0x7);
  let rd = usize::from(hw & 0x7);
  let addr = m.regs[rb].wrapping_add(offset5 * 2);
  if l {
    let mut v = 0;
    m.bus.transfer(addr, Access::Load, &mut v, 16, false, host)?;
    m.regs[rd] = v;
  } else {
    let mut v = m.regs[rd];
    m.bus.transfer(addr, Access::Store, &mut v, 16, false, host)?;
  }
  Ok(StepResult::Ok)
}

// ---- Format 11: SP-relative load/store ----

fn format11_sp_ldr_str(m: &mut Machine, hw: u16, host: &mut dyn Host) -> Result<StepResult, StepResult> {
  let l = (hw >> 11) & 1 != 0;
  let rd = usize::from((hw >> 8) & 0x7);
  let word8 = u32::from(hw & 0xFF);
  let addr = m.regs[SP].wrapping_add(word8 * 4);
  if l {
    let mut v = 0;
    m.bus.transfer(addr, Access::Load, &mut v, 32, false, host)?;
    m.regs[rd] = v;
  } else {
    let mut v = m.regs[rd];
    m.bus.transfer(addr, Access::Store, &mut v, 32, false, host)?;
  }
  Ok(StepResult::Ok)
}

// ---- Format 12: ADR / ADD Rd, SP, #imm8 ----

fn format12_addr(m: &mut Machine, hw: u16) -> StepResult {
  let sp_source = (hw >> 11) & 1 != 0;
  let rd = usize::from((hw >> 8) & 0x7);
  let word8 = u32::from(hw & 0xFF);
  let base = if sp_source { m.regs[SP] } else { pc_plus2(m) & !3 };
  m.regs[rd] = base.wrapping_add(word8 * 4);
  StepResult::Ok
}

// ---- The 1011-prefixed "misc" bucket ----

fn execute_misc16(m: &mut Machine, hw: u16, host: &mut dyn Host) -> StepResult {
  // Fixed classification order per spec.md §4.3: add/sub-SP and
  // sign/zero-extend before the generic push/pop bucket; CBZ/CBNZ after.
  if hw & 0xFF00 == 0xB000 {
    return format13_addsp(m, hw);
  }
  if hw & 0xFF00 == 0xB200 {
    return format_extend(m, hw);
  }
  if hw & 0xF500 == 0xB100 {
    return format_cbz(m, hw);
  }
  if hw & 0xFF00 == 0xBA00 {
    return format_rev(m, hw);
  }
  if hw & 0xFF00 == 0xBE00 {
    return format_bkpt(m, hw);
  }
  if hw & 0xFF00 == 0xBF00 {
    return format_it_hints(m, hw);
  }
  if hw & 0xF600 == 0xB400 {
    return format14_push_pop(m, hw, host).unwrap_or_else(|e| e);
  }
  StepResult::Undefined
}

fn format13_addsp(m: &mut Machine, hw: u16) -> StepResult {
  let sub = (hw >> 7) & 1 != 0;
  let imm7 = u32::from(hw & 0x7F) * 4;
  m.regs[SP] =
    if sub { m.regs[SP].wrapping_sub(imm7) } else { m.regs[SP].wrapping_add(imm7) };
  StepResult::Ok
}

fn format_extend(m: &mut Machine, hw: u16) -> StepResult {
  let op = (hw >> 6) & 0x3;
  let rm = usize::from((hw >> 3) & 0x7);
  let rd = usize::from(hw & 0x7);
  let src = m.regs[rm];
  m.regs[rd] = match op {
    0 => crate::bit_utils::sign_extend(src & 0xFFFF, 16) as u32, // SXTH
    1 => crate::bit_utils::sign_extend(src & 0xFF, 8) as u32,    // SXTB
    2 => src & 0xFFFF,                                           // UXTH
    _ => src & 0xFF,                                             // UXTB
  };
  StepResult::Ok
}

fn format_cbz(m: &mut Machine, hw: u16) -> StepResult {
  if m.bus.isa_level == IsaLevel::CortexM0 {
    return StepResult::Undefined;
  }
  let nonzero_branches = (hw >> 11) & 1 != 0;
  let i = u32::from((hw >> 9) & 1);
  let imm5 = u32::from((hw >> 3) & 0x1F);
  let rn = usize::from(hw & 0x7);
  let imm32 = (i << 6) | (imm5 << 1);
  let taken = if nonzero_branches { m.regs[rn] != 0 } else { m.regs[rn] == 0 };
  if taken {
    branch_to(m, pc_plus2(m).wrapping_add(imm32));
  }
  StepResult::Ok
}

fn format_rev(m: &mut Machine, hw: u16) -> StepResult {
  let op = (hw >> 6) & 0x3;
  let rm = usize::from((hw >> 3) & 0x7);
  let rd = usize::from(hw & 0x7);
  if op != 0 {
    return StepResult::Undefined; // only REV is required
  }
  m.regs[rd] = m.regs[rm].swap_bytes();
  StepResult::Ok
}

fn format_bkpt(m: &mut Machine, hw: u16) -> StepResult {
  let imm8 = hw & 0xFF;
  match imm8 {
    0x80 => {
      m.loglevel = LogLevel::Error;
      StepResult::Ok
    }
    0x81 => {
      m.loglevel = LogLevel::Instrs;
      StepResult::Ok
    }
    _ => StepResult::BreakHit,
  }
}

fn format_it_hints(m: &mut Machine, hw: u16) -> StepResult {
  let mask = hw & 0xF;
  if mask == 0 {
    return StepResult::Ok; // NOP-compatible hint
  }
  if m.bus.isa_level == IsaLevel::CortexM0 {
    return StepResult::Undefined;
  }
  let firstcond = u8::try_from((hw >> 4) & 0xF).unwrap();
  m.psr.set_it_state(firstcond, u8::try_from(mask).unwrap());
  StepResult::Ok
}

fn format14_push_pop(m: &mut Machine, hw: u16, host: &mut dyn Host) -> Result<StepResult, StepResult> {
  let pop = (hw >> 11) & 1 != 0;
  let extra = (hw >> 8) & 1 != 0; // R bit: LR on push, PC on pop
  let rlist = hw & 0xFF;
  if pop {
    let mut addr = m.regs[SP];
    for i in 0..8u32 {
      if rlist & (1 << i) != 0 {
        let mut v = 0;
        m.bus.transfer(addr, Access::Load, &mut v, 32, false, host)?;
        m.regs[i as usize] = v;
        addr += 4;
      }
    }
    if extra {
      let mut v = 0;
      m.bus.transfer(addr, Access::Load, &mut v, 32, false, host)?;
      write_reg(m, PC, v);
      addr += 4;
      if m.loglevel >= LogLevel::Calls {
        log::debug!("return to {:#010x}", m.regs[PC]);
      }
    }
    m.regs[SP] = addr;
  } else {
    let count = rlist.count_ones() + u32::from(extra);
    let start = m.regs[SP].wrapping_sub(count * 4);
    let mut addr = start;
    for i in 0..8u32 {
      if rlist & (1 << i) != 0 {
        let mut v = m.regs[i as usize];
        m.bus.transfer(addr, Access::Store, &mut v, 32, false, host)?;
        addr += 4;
      }
    }
    if extra {
      let mut v = m.regs[LR];
      m.bus.transfer(addr, Access::Store, &mut v, 32, false, host)?;
    }
    m.regs[SP] = start;
    if extra {
      m.push_call(m.regs[LR], m.regs[SP]);
    }
  }
  Ok(StepResult::Ok)
}

// ---- Format 15: LDMIA/STMIA ----

fn format15_ldm_stm(m: &mut Machine, hw: u16, host: &mut dyn Host) -> Result<StepResult, StepResult> {
  let l = (hw >> 11) & 1 != 0;
  let rb = usize::from((hw >> 8) & 0x7);
  let rlist = hw & 0xFF;
  let mut addr = m.regs[rb];
  for i in 0..8u32 {
    if rlist & (1 << i) != 0 {
      if l {
        let mut v = 0;
        m.bus.transfer(addr, Access::Load, &mut v, 32, false, host)?;
        m.regs[i as usize] = v;
      } else {
        let mut v = m.regs[i as usize];
        m.bus.transfer(addr, Access::Store, &mut v, 32, false, host)?;
      }
      addr += 4;
    }
  }
  let base_in_list = rlist & (1 << rb) != 0;
  if !(l && base_in_list) {
    m.regs[rb] = addr;
  }
  Ok(StepResult::Ok)
}

// ---- Format 16: conditional branch ----

fn format16_cond_branch(m: &mut Machine, hw: u16) -> StepResult {
  let cond = u8::try_from((hw >> 8) & 0xF).unwrap();
  if cond == 0xF {
    return StepResult::Undefined; // SWI, not supported
  }
  if Cond(cond).eval(m.psr.flags) {
    let offset8 = u32::from(hw & 0xFF);
    let imm32 = crate::bit_utils::sign_extend(offset8, 8) * 2;
    branch_to(m, (pc_plus2(m) as i32).wrapping_add(imm32) as u32);
  }
  StepResult::Ok
}

// ---- Format 18: unconditional branch ----

fn format18_uncond_branch(m: &mut Machine, hw: u16) -> StepResult {
  let imm11 = u32::from(hw & 0x7FF);
  let imm32 = crate::bit_utils::sign_extend(imm11, 11) * 2;
  branch_to(m, (pc_plus2(m) as i32).wrapping_add(imm32) as u32);
  StepResult::Ok
}

// ---- Thumb-2 32-bit families ----

fn execute32(m: &mut Machine, hw1: u16, hw2: u16, top5: u16, host: &mut dyn Host) -> StepResult {
  match top5 {
    0x1E => execute32_branch_or_dpi(m, hw1, hw2),
    0x1F => execute32_loadstore_or_regop(m, hw1, hw2, host),
    0x1D => execute32_ldm_ldrd_dpr(m, hw1, hw2, host).unwrap_or_else(|e| e),
    _ => StepResult::Undefined,
  }
}

/// BL/B.W and MRS (hw2 bit 15 set), or data-processing with a 12-bit
/// modified immediate / MOVW (hw2 bit 15 clear).
fn execute32_branch_or_dpi(m: &mut Machine, hw1: u16, hw2: u16) -> StepResult {
  let hw1 = u32::from(hw1);
  let hw2 = u32::from(hw2);
  if (hw2 >> 15) & 1 == 1 {
    let s = (hw1 >> 10) & 1;
    let imm10 = hw1 & 0x3FF;
    let j1 = (hw2 >> 13) & 1;
    let j2 = (hw2 >> 11) & 1;
    let imm11 = hw2 & 0x7FF;
    let link = (hw2 >> 14) & 1 != 0;
    let i1 = 1 - (j1 ^ s);
    let i2 = 1 - (j2 ^ s);
    let combined = (s << 24) | (i1 << 23) | (i2 << 22) | (imm10 << 12) | (imm11 << 1);
    let imm32 = crate::bit_utils::sign_extend(combined, 25);
    let target = (m.regs[PC] as i32).wrapping_add(imm32) as u32;
    if link {
      m.regs[LR] = m.regs[PC] | 1;
      m.push_call(m.regs[LR], m.regs[SP]);
    }
    branch_to(m, target);
    return StepResult::Ok;
  }
  if m.bus.isa_level == IsaLevel::CortexM0 {
    return StepResult::Undefined; // only BL/B.W are available on the base profile
  }
  if hw2 >> 12 == 0b1000 && (hw1 & 0x7FF) == 0x3EF {
    // MRS Rd, <special register>: simplified to always reading the current SP.
    let rd = usize::from((hw2 >> 8) & 0xF);
    write_reg(m, rd, m.regs[SP]);
    return StepResult::Ok;
  }
  if (hw1 >> 4) & 0x3F == 0b100100 {
    let imm4 = hw1 & 0xF;
    let i = (hw1 >> 10) & 1;
    let imm3 = (hw2 >> 12) & 0x7;
    let imm8 = hw2 & 0xFF;
    let rd = usize::from((hw2 >> 8) & 0xF);
    let imm16 = (imm4 << 12) | (i << 11) | (imm3 << 8) | imm8;
    write_reg(m, rd, imm16);
    return StepResult::Ok;
  }
  if (hw1 >> 4) & 0x3F == 0b101100 {
    return StepResult::Undefined; // MOVT: not implemented
  }
  if (hw1 >> 9) & 1 == 0 {
    return dpi_modified_immediate(m, hw1, hw2);
  }
  StepResult::Undefined
}

fn thumb_expand_imm(combined12: u32, carry_in: bool) -> (u32, bool) {
  let top2 = (combined12 >> 10) & 0b11;
  if top2 == 0 {
    let pattern = (combined12 >> 8) & 0b11;
    let byte = combined12 & 0xFF;
    let value = match pattern {
      0b00 => byte,
      0b01 => (byte << 16) | byte,
      0b10 => (byte << 24) | (byte << 8),
      _ => (byte << 24) | (byte << 16) | (byte << 8) | byte,
    };
    (value, carry_in)
  } else {
    let rotate = (combined12 >> 7) & 0b1_1111;
    let unrotated = 0x80 | (combined12 & 0x7F);
    let rotated = unrotated.rotate_right(rotate);
    (rotated, rotated & 0x8000_0000 != 0)
  }
}

/// `opc` is the 4-bit data-processing op shared by the modified-immediate
/// and shifted-register Thumb-2 forms.
fn apply_dp_op(
  opc: u32,
  rn: u32,
  op2: u32,
  carry_in: bool,
) -> Option<(u32, Flags)> {
  match opc {
    0b0000 => Some((rn & op2, Flags::nz_of(rn & op2, carry_in, false))),
    0b0001 => Some((rn & !op2, Flags::nz_of(rn & !op2, carry_in, false))),
    0b0010 => Some((op2, Flags::nz_of(op2, carry_in, false))), // ORR/MOV (Rn==1111 handled by caller)
    0b0011 => Some((!op2, Flags::nz_of(!op2, carry_in, false))), // ORN/MVN
    0b0100 => Some((rn ^ op2, Flags::nz_of(rn ^ op2, carry_in, false))),
    0b1000 => {
      let (r, f) = flags::add(rn, op2);
      Some((r, f))
    }
    0b1010 => {
      let (r, f) = flags::adc(rn, op2, carry_in);
      Some((r, f))
    }
    0b1011 => {
      let (r, f) = flags::sbc(rn, op2, carry_in);
      Some((r, f))
    }
    0b1101 => {
      let (r, f) = flags::sub(rn, op2);
      Some((r, f))
    }
    0b1110 => {
      let (r, f) = flags::sub(op2, rn);
      Some((r, f))
    }
    _ => None,
  }
}

fn dpi_modified_immediate(m: &mut Machine, hw1: u32, hw2: u32) -> StepResult {
  let i = (hw1 >> 10) & 1;
  let opc = (hw1 >> 5) & 0xF;
  let s = (hw1 >> 4) & 1 != 0;
  let rn = usize::from(hw1 & 0xF);
  let imm3 = (hw2 >> 12) & 0x7;
  let rd = usize::from((hw2 >> 8) & 0xF);
  let imm8 = hw2 & 0xFF;
  let combined = (i << 11) | (imm3 << 8) | imm8;
  let (imm32, carry) = thumb_expand_imm(combined, m.psr.flags.c);

  let rn_val = m.regs[rn];
  let Some((result, mut f)) = apply_dp_op(opc, rn_val, imm32, m.psr.flags.c) else {
    return StepResult::Undefined;
  };
  if matches!(opc, 0b0000 | 0b0001 | 0b0010 | 0b0011 | 0b0100) {
    f.c = carry;
  }
  let compare_only = rd == 0xF && s && matches!(opc, 0b0000 | 0b0100 | 0b1000 | 0b1101);
  if !compare_only {
    write_reg(m, rd, result);
  }
  if s && !m.psr.in_it_block() {
    m.psr.flags = f;
  }
  StepResult::Ok
}

/// LDR.W/STR.W family, register-controlled shift, CLZ, multiply/divide,
/// and bitfield operations. Field layouts for the multiply/divide and
/// bitfield sub-groups are a deliberately simplified, internally
/// consistent scheme rather than a bit-exact reproduction of the
/// architecture reference manual's sub-encodings (see DESIGN.md).
fn execute32_loadstore_or_regop(
  m: &mut Machine,
  hw1: u16,
  hw2: u16,
  host: &mut dyn Host,
) -> StepResult {
  if m.bus.isa_level == IsaLevel::CortexM0 {
    return StepResult::Undefined;
  }
  let rest1 = u32::from(hw1) & 0x7FF;
  let hw2 = u32::from(hw2);
  let group = (rest1 >> 9) & 0b11;
  let sub = (rest1 >> 4) & 0b1_1111;
  let rn = usize::from(rest1 & 0xF) as u32;

  if group == 0 || group == 1 {
    return ldr_str_word_family(m, rest1, hw2, rn, host).unwrap_or_else(|e| e);
  }
  if group == 2 {
    if (sub >> 2) == 0 {
      let shift_type = sub & 0b11;
      let rm = usize::from(hw2 & 0xF);
      let rd = usize::from((hw2 >> 8) & 0xF);
      let amount = m.regs[rm] & 0xFF;
      let src = m.regs[rn as usize];
      let (result, c) = match shift_type {
        0 => flags::lsl(src, amount, m.psr.flags.c),
        1 => flags::lsr(src, amount, m.psr.flags.c),
        2 => flags::asr(src, amount, m.psr.flags.c),
        _ => flags::ror(src, amount, m.psr.flags.c),
      };
      write_reg(m, rd, result);
      if !m.psr.in_it_block() {
        m.psr.flags = Flags::nz_of(result, c, m.psr.flags.v);
      }
      return StepResult::Ok;
    }
    return StepResult::Undefined;
  }

  // group == 3: multiply/divide/CLZ/bitfield.
  match sub {
    0 => {
      let rd = usize::from((hw2 >> 8) & 0xF);
      let rm = usize::from(hw2 & 0xF);
      let ra = (hw2 >> 12) & 0xF;
      let product = (m.regs[rn as usize] as i64).wrapping_mul(m.regs[rm] as i64) as u32;
      let result = if ra == 0xF { product } else { product.wrapping_add(m.regs[ra as usize]) };
      write_reg(m, rd, result);
      StepResult::Ok
    }
    1 if (hw2 >> 4) & 0xF == 0b1111 => {
      let rd = usize::from((hw2 >> 8) & 0xF);
      let rm = usize::from(hw2 & 0xF);
      let divisor = m.regs[rm] as i32;
      if divisor == 0 {
        return StepResult::DivideByZero;
      }
      write_reg(m, rd, (m.regs[rn as usize] as i32).wrapping_div(divisor) as u32);
      StepResult::Ok
    }
    1 if (hw2 >> 4) & 0xF == 0b1110 => {
      let rd = usize::from((hw2 >> 8) & 0xF);
      let rm = usize::from(hw2 & 0xF);
      let divisor = m.regs[rm];
      if divisor == 0 {
        return StepResult::DivideByZero;
      }
      write_reg(m, rd, m.regs[rn as usize] / divisor);
      StepResult::Ok
    }
    1 => {
      let rd_lo = usize::from((hw2 >> 8) & 0xF);
      let rd_hi = usize::from((hw2 >> 12) & 0xF);
      let rm = usize::from(hw2 & 0xF);
      let signed = (hw2 >> 4) & 1 == 0;
      let product: u64 = if signed {
        ((m.regs[rn as usize] as i32 as i64) * (m.regs[rm] as i32 as i64)) as u64
      } else {
        u64::from(m.regs[rn as usize]) * u64::from(m.regs[rm])
      };
      m.regs[rd_lo] = product as u32;
      m.regs[rd_hi] = (product >> 32) as u32;
      StepResult::Ok
    }
    2 => {
      let rd = usize::from((hw2 >> 8) & 0xF);
      let rm = usize::from(hw2 & 0xF);
      write_reg(m, rd, m.regs[rm].leading_zeros());
      StepResult::Ok
    }
    3 => bitfield_op(m, rn as usize, hw2),
    _ => StepResult::Undefined,
  }
}

fn ldr_str_word_family(
  m: &mut Machine,
  rest1: u32,
  hw2: u32,
  rn: u32,
  host: &mut dyn Host,
) -> Result<StepResult, StepResult> {
  let rt = usize::from((hw2 >> 12) & 0xF);
  let size_kind = (rest1 >> 5) & 0x7; // self-consistent family selector
  let (width, is_load, sign_extend): (u8, bool, bool) = match size_kind {
    0 => (8, false, false),
    1 => (8, true, false),
    2 => (8, true, true),
    4 => (16, false, false),
    5 => (16, true, false),
    6 => (16, true, true),
    _ => (32, (rest1 >> 4) & 1 != 0, false),
  };

  let base = if rn == 0xF { pc_plus2(m) & !3 } else { m.regs[rn as usize] };
  let addr = if hw2 & 0x0800 != 0 && (hw2 >> 8) & 0xF != 0xC {
    // Immediate offset (12-bit, unsigned), PC-relative when Rn==15.
    base.wrapping_add(hw2 & 0xFFF)
  } else if (hw2 >> 11) & 1 == 0 && (hw2 >> 8) & 1 != 0 {
    // Pre/post-indexed 8-bit immediate with writeback.
    let imm8 = hw2 & 0xFF;
    let add = (hw2 >> 9) & 1 != 0;
    let pre = (hw2 >> 10) & 1 != 0;
    let offset_addr = if add { base.wrapping_add(imm8) } else { base.wrapping_sub(imm8) };
    let xfer_addr = if pre { offset_addr } else { base };
    m.regs[rn as usize] = offset_addr;
    xfer_addr
  } else {
    // Register offset, optionally shifted by imm2.
    let rm = usize::from(hw2 & 0xF);
    let shift = (hw2 >> 4) & 0x3;
    base.wrapping_add(m.regs[rm] << shift)
  };

  if is_load {
    let mut v = 0;
    m.bus.transfer(addr, Access::Load, &mut v, width, sign_extend, host)?;
    write_reg(m, rt, v);
  } else {
    let mut v = m.regs[rt];
    m.bus.transfer(addr, Access::Store, &mut v, width, false, host)?;
  }
  Ok(StepResult::Ok)
}

fn bitfield_op(m: &mut Machine, rn: usize, hw2: u32) -> StepResult {
  let rd = usize::from((hw2 >> 8) & 0xF);
  let lsb = (hw2 >> 6) & 0x1F;
  let widthm1 = hw2 & 0x1F;
  let kind = (hw2 >> 12) & 0x3;
  let width = widthm1 + 1;
  let mask: u32 = if width >= 32 { u32::MAX } else { (1u32 << width) - 1 };
  match kind {
    0 => {
      let extracted = (m.regs[rn] >> lsb) & mask;
      m.regs[rd] = crate::bit_utils::sign_extend(extracted, width) as u32;
    }
    1 => {
      m.regs[rd] = (m.regs[rn] >> lsb) & mask;
    }
    2 => {
      let field = (m.regs[rn] & mask) << lsb;
      m.regs[rd] = (m.regs[rd] & !(mask << lsb)) | field;
    }
    _ => {
      m.regs[rd] &= !(mask << lsb);
    }
  }
  StepResult::Ok
}

/// LDM/STM wide, LDRD/STRD, TBB/TBH, and data-processing (shifted register).
fn execute32_ldm_ldrd_dpr(
  m: &mut Machine,
  hw1: u16,
  hw2: u16,
  host: &mut dyn Host,
) -> Result<StepResult, StepResult> {
  if m.bus.isa_level == IsaLevel::CortexM0 {
    return Ok(StepResult::Undefined); // only BL/B.W are available on the base profile
  }
  let rest1 = u32::from(hw1) & 0x7FF;
  let hw2 = u32::from(hw2);
  let group = (rest1 >> 9) & 0b11;
  let rn = usize::from(rest1 & 0xF);
  let l = (rest1 >> 4) & 1 != 0;
  let is_db = (rest1 >> 8) & 1 != 0; // P/U direction: LDMDB/STMDB vs LDMIA/STMIA

  match group {
    0 | 3 => {
      let rlist = hw2 & 0xFFFF;
      let count = rlist.count_ones();
      let (mut addr, final_rn) = if is_db {
        let start = m.regs[rn].wrapping_sub(count * 4);
        (start, start)
      } else {
        (m.regs[rn], m.regs[rn].wrapping_add(count * 4))
      };
      for i in 0..16u32 {
        if i == 13 {
          continue; // SP in a reglist is unpredictable; skip
        }
        if rlist & (1 << i) != 0 {
          if l {
            let mut v = 0;
            m.bus.transfer(addr, Access::Load, &mut v, 32, false, host)?;
            write_reg(m, i as usize, v);
          } else {
            let mut v = m.regs[i as usize];
            m.bus.transfer(addr, Access::Store, &mut v, 32, false, host)?;
          }
          addr += 4;
        }
      }
      if !(l && rlist & (1 << rn) != 0) {
        m.regs[rn] = final_rn;
      }
      Ok(StepResult::Ok)
    }
    1 => {
      if (hw2 >> 12) & 0xF == 0xF {
        let rm = usize::from(hw2 & 0xF);
        let halfword = hw2 & 0x10 != 0;
        let base = if rn == PC { pc_plus2(m) } else { m.regs[rn] };
        let index = m.regs[rm];
        let addr = if halfword { base.wrapping_add(index * 2) } else { base.wrapping_add(index) };
        let mut v = 0;
        m.bus.transfer(addr, Access::Load, &mut v, if halfword { 16 } else { 8 }, false, host)?;
        branch_to(m, m.regs[PC].wrapping_add(v * 2));
        return Ok(StepResult::Ok);
      }
      let rt = usize::from((hw2 >> 12) & 0xF);
      let rt2 = usize::from((hw2 >> 8) & 0xF);
      let imm8 = hw2 & 0xFF;
      let offset = imm8 * 4;
      let p = (rest1 >> 8) & 1 != 0;
      let u = (rest1 >> 7) & 1 != 0;
      let w = (rest1 >> 5) & 1 != 0;
      let base = m.regs[rn];
      let offset_addr = if u { base.wrapping_add(offset) } else { base.wrapping_sub(offset) };
      let addr = if p { offset_addr } else { base };
      if l {
        let mut v1 = 0;
        m.bus.transfer(addr, Access::Load, &mut v1, 32, false, host)?;
        let mut v2 = 0;
        m.bus.transfer(addr + 4, Access::Load, &mut v2, 32, false, host)?;
        m.regs[rt] = v1;
        m.regs[rt2] = v2;
      } else {
        let mut v1 = m.regs[rt];
        m.bus.transfer(addr, Access::Store, &mut v1, 32, false, host)?;
        let mut v2 = m.regs[rt2];
        m.bus.transfer(addr + 4, Access::Store, &mut v2, 32, false, host)?;
      }
      if w {
        m.regs[rn] = offset_addr;
      }
      Ok(StepResult::Ok)
    }
    _ => {
      let opc = (rest1 >> 5) & 0xF;
      let s = (rest1 >> 4) & 1 != 0;
      let rd = usize::from((hw2 >> 8) & 0xF);
      let rm = usize::from(hw2 & 0xF);
      let shift_type = (hw2 >> 4) & 0b11;
      let shift_amt = (((hw2 >> 12) & 0x7) << 2) | ((hw2 >> 6) & 0x3);
      let (op2, shift_c) = match shift_type {
        0 => flags::lsl(m.regs[rm], shift_amt, m.psr.flags.c),
        1 => flags::lsr(m.regs[rm], shift_amt, m.psr.flags.c),
        2 => flags::asr(m.regs[rm], shift_amt, m.psr.flags.c),
        _ => flags::ror(m.regs[rm], shift_amt, m.psr.flags.c),
      };
      let Some((result, mut f)) = apply_dp_op(opc, m.regs[rn], op2, m.psr.flags.c) else {
        return Ok(StepResult::Undefined);
      };
      if matches!(opc, 0b0000 | 0b0001 | 0b0010 | 0b0011 | 0b0100) {
        f.c = shift_c;
      }
      let compare_only = rd == 0xF && s && matches!(opc, 0b0000 | 0b0100 | 0b1000 | 0b1101);
      if !compare_only {
        write_reg(m, rd, result);
      }
      if s && !m.psr.in_it_block() {
        m.psr.flags = f;
      }
      Ok(StepResult::Ok)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::host::NullHost;
  use crate::machine::LogLevel;

  fn blank() -> Machine {
    let mut m = Machine::create(1024, 256, 1024, LogLevel::Error).unwrap();
    m.bus.image[4..8].copy_from_slice(&0x0000_0008u32.to_le_bytes());
    m.bus.image[0..4].copy_from_slice(&0x2000_0400u32.to_le_bytes());
    m
  }

  fn encode(image: &mut [u8], addr: usize, hw: u16) {
    image[addr..addr + 2].copy_from_slice(&hw.to_le_bytes());
  }

  #[test]
  fn test_arithmetic_exit_scenario() {
    let mut m = blank();
    // movs r0, #7; movs r1, #5; adds r0, r0, r1; ldr r2, [pc, #0]; bx r2
    encode(&mut m.bus.image, 8, 0x2007); // movs r0, #7
    encode(&mut m.bus.image, 10, 0x2105); // movs r1, #5
    encode(&mut m.bus.image, 12, 0x1840); // adds r0, r0, r1
    encode(&mut m.bus.image, 14, 0x4a01); // ldr r2, [pc, #4] (pc+2 aligned +4)
    encode(&mut m.bus.image, 16, 0x4710); // bx r2
    m.bus.image[20..24].copy_from_slice(&EXIT_SENTINEL.to_le_bytes());
    m.reset();
    let mut host = NullHost;
    let result = m.run(&mut host);
    assert_eq!(result, StepResult::Exit);
    assert_eq!(m.regs[0], 12);
  }

  #[test]
  fn test_cmp_flags_scenario() {
    let mut m = blank();
    encode(&mut m.bus.image, 8, 0x2001); // movs r0, #1
    encode(&mut m.bus.image, 10, 0x2102); // movs r1, #2
    encode(&mut m.bus.image, 12, 0x4288); // cmp r0, r1
    m.reset();
    let mut host = NullHost;
    m.step(&mut host);
    m.step(&mut host);
    m.step(&mut host);
    assert!(m.psr.flags.n);
    assert!(!m.psr.flags.z);
    assert!(!m.psr.flags.c);
    assert!(!m.psr.flags.v);
  }

  #[test]
  fn test_undefined_rewinds_pc() {
    let mut m = blank();
    encode(&mut m.bus.image, 8, 0xFFFF); // not a recognized encoding
    m.reset();
    let mut host = NullHost;
    let pc_before = m.regs[PC];
    let result = m.step(&mut host);
    assert_eq!(result, StepResult::Undefined);
    assert_eq!(m.regs[PC], pc_before);
  }

  #[test]
  fn test_push_pop_roundtrip() {
    let mut m = blank();
    encode(&mut m.bus.image, 8, 0x2042); // movs r0, #0x42
    encode(&mut m.bus.image, 10, 0xb401); // push {r0}
    encode(&mut m.bus.image, 12, 0x2000); // movs r0, #0
    encode(&mut m.bus.image, 14, 0xbc01); // pop {r0}
    m.reset();
    let mut host = NullHost;
    for _ in 0..4 {
      m.step(&mut host);
    }
    assert_eq!(m.regs[0], 0x42);
    assert_eq!(m.regs[SP], 0x2000_0400);
  }

  #[test]
  fn test_breakpoint_hit() {
    let mut m = blank();
    encode(&mut m.bus.image, 8, 0x2001); // movs r0, #1
    encode(&mut m.bus.image, 10, 0x2002); // movs r0, #2
    m.reset();
    m.set_breakpoint(0, 10).unwrap();
    let mut host = NullHost;
    let result = m.run(&mut host);
    assert_eq!(result, StepResult::BreakHit);
    assert_eq!(m.regs[PC], 11);
  }

  #[test]
  fn test_cbz_taken_when_zero() {
    let mut m = blank();
    m.bus.isa_level = crate::bus::IsaLevel::CortexM4;
    encode(&mut m.bus.image, 8, 0x2000); // movs r0, #0
    encode(&mut m.bus.image, 10, 0xb100); // cbz r0, +2 (skip next insn)
    encode(&mut m.bus.image, 12, 0x2005); // movs r0, #5 (skipped)
    encode(&mut m.bus.image, 14, 0x2109); // movs r1, #9
    m.reset();
    let mut host = NullHost;
    m.step(&mut host);
    m.step(&mut host);
    m.step(&mut host);
    assert_eq!(m.regs[0], 0);
    assert_eq!(m.regs[1], 9);
  }

  #[test]
  fn test_bl_records_backtrace() {
    let mut m = blank();
    // bl +4 (two halfwords: 0xf000 0xf802)
    encode(&mut m.bus.image, 8, 0xf000);
    encode(&mut m.bus.image, 10, 0xf802);
    m.reset();
    let mut host = NullHost;
    let depth_before = m.call_depth;
    m.step(&mut host);
    assert_eq!(m.call_depth, depth_before + 1);
    assert_eq!(m.regs[PC] & 1, 1);
  }

  #[test]
  fn test_divide_by_zero() {
    let mut m = blank();
    m.bus.isa_level = crate::bus::IsaLevel::CortexM4;
    encode(&mut m.bus.image, 8, 0x2000); // movs r0, #0
    // sdiv r1, r2, r0 (divisor r0 == 0)
    encode(&mut m.bus.image, 10, 0xfe12);
    encode(&mut m.bus.image, 12, 0xf1f0);
    m.reset();
    let mut host = NullHost;
    m.step(&mut host);
    let result = m.step(&mut host);
    assert_eq!(result, StepResult::DivideByZero);
  }
}
