//! GDB Remote Serial Protocol server.
//!
//! Out of the core per spec.md §1: a thin translation layer from a minimal
//! RSP subset onto the Machine Controller's own operations (spec.md §4.4).
//! Single connection, blocking, no acknowledgment-mode negotiation beyond
//! the bare `+`/`-` GDB already expects.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};

use crate::bus::Access;
use crate::error::StepResult;
use crate::host::Host;
use crate::machine::Machine;

const NUM_REGS: usize = 16;

/// Accepts one connection on `addr` and serves RSP requests against
/// `machine` until the client sends `k` or disconnects.
///
/// # Errors
///
/// Returns an error if the socket can't be bound or a read/write on the
/// accepted connection fails.
pub fn serve(addr: &str, machine: &mut Machine, host: &mut dyn Host) -> std::io::Result<()> {
  let listener = TcpListener::bind(addr)?;
  log::info!("gdb server listening on {addr}");
  let (stream, peer) = listener.accept()?;
  log::info!("gdb client connected from {peer}");
  let mut session = Session { stream };
  session.run(machine, host)
}

struct Session {
  stream: TcpStream,
}

impl Session {
  fn run(&mut self, machine: &mut Machine, host: &mut dyn Host) -> std::io::Result<()> {
    loop {
      let Some(packet) = self.read_packet()? else { return Ok(()) };
      if packet == "k" {
        log::info!("gdb client sent kill, closing session");
        return Ok(());
      }
      let reply = dispatch(&packet, machine, host);
      if let Some(reply) = reply {
        self.send_packet(&reply)?;
      }
    }
  }

  /// Reads one `$...#cc` packet, replying `-` and retrying on a checksum
  /// mismatch. Returns `Ok(None)` on a clean disconnect.
  fn read_packet(&mut self) -> std::io::Result<Option<String>> {
    loop {
      let mut byte = [0u8; 1];
      loop {
        match self.stream.read(&mut byte)? {
          0 => return Ok(None),
          _ if byte[0] == b'$' => break,
          _ => continue, // skip stray acks/interrupts before the start byte
        }
      }
      let mut body = Vec::new();
      loop {
        self.stream.read_exact(&mut byte)?;
        if byte[0] == b'#' {
          break;
        }
        body.push(byte[0]);
      }
      let mut checksum_hex = [0u8; 2];
      self.stream.read_exact(&mut checksum_hex)?;
      let expected = u8::from_str_radix(std::str::from_utf8(&checksum_hex).unwrap_or(""), 16).unwrap_or(0xFF);
      if checksum(&body) == expected {
        self.stream.write_all(b"+")?;
        return Ok(Some(String::from_utf8_lossy(&body).into_owned()));
      }
      self.stream.write_all(b"-")?;
    }
  }

  fn send_packet(&mut self, body: &str) -> std::io::Result<()> {
    let sum = checksum(body.as_bytes());
    write!(self.stream, "${body}#{sum:02x}")?;
    self.stream.flush()
  }
}

fn checksum(data: &[u8]) -> u8 {
  data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}

fn encode_hex(bytes: &[u8]) -> String {
  bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
  if s.len() % 2 != 0 {
    return None;
  }
  (0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok()).collect()
}

fn stop_reply(result: StepResult) -> String {
  match result {
    StepResult::BreakHit => "S05".to_string(),
    StepResult::Exit => "W00".to_string(),
    StepResult::Halt => "S02".to_string(),
    _ => "S04".to_string(), // FaultPC/FaultMemory/Undefined/DivideByZero: SIGILL
  }
}

fn dispatch(packet: &str, machine: &mut Machine, host: &mut dyn Host) -> Option<String> {
  let mut chars = packet.chars();
  let cmd = chars.next()?;
  let rest = chars.as_str();
  match cmd {
    '?' => Some("S05".to_string()),
    'g' => {
      let mut buf = [0u32; NUM_REGS];
      machine.read_registers(&mut buf, NUM_REGS);
      let bytes: Vec<u8> = buf.iter().flat_map(|r| r.to_le_bytes()).collect();
      Some(encode_hex(&bytes))
    }
    'G' => {
      let Some(bytes) = decode_hex(rest) else { return Some("E01".to_string()) };
      for (i, chunk) in bytes.chunks(4).take(NUM_REGS).enumerate() {
        if chunk.len() == 4 {
          machine.regs[i] = u32::from_le_bytes(chunk.try_into().unwrap());
        }
      }
      Some("OK".to_string())
    }
    'm' => read_memory(rest, machine, host),
    'M' => write_memory(rest, machine, host),
    'c' => Some(stop_reply(machine.run(host))),
    's' => Some(stop_reply(machine.step(host))),
    'Z' | 'z' => set_or_clear_breakpoint(cmd, rest, machine),
    _ => Some(String::new()), // unsupported command: empty reply per RSP convention
  }
}

fn read_memory(rest: &str, machine: &mut Machine, host: &mut dyn Host) -> Option<String> {
  let (addr_s, len_s) = rest.split_once(',')?;
  let addr = u32::from_str_radix(addr_s, 16).ok()?;
  let len = usize::from_str_radix(len_s, 16).ok()?;
  let mut buf = vec![0u8; len];
  match machine.read_memory(&mut buf, addr, len, host) {
    Ok(()) => Some(encode_hex(&buf)),
    Err(_) => Some("E01".to_string()),
  }
}

fn write_memory(rest: &str, machine: &mut Machine, host: &mut dyn Host) -> Option<String> {
  let (head, data_hex) = rest.split_once(':')?;
  let (addr_s, _len_s) = head.split_once(',')?;
  let addr = u32::from_str_radix(addr_s, 16).ok()?;
  let bytes = decode_hex(data_hex)?;
  for (i, &byte) in bytes.iter().enumerate() {
    let mut v = u32::from(byte);
    if machine.bus.transfer(addr + i as u32, Access::Store, &mut v, 8, false, host).is_err() {
      return Some("E01".to_string());
    }
  }
  Some("OK".to_string())
}

fn set_or_clear_breakpoint(cmd: char, rest: &str, machine: &mut Machine) -> Option<String> {
  let mut parts = rest.splitn(3, ',');
  let kind = parts.next()?;
  let addr_s = parts.next()?;
  if kind != "0" && kind != "1" {
    return Some(String::new()); // only software/hardware execution breakpoints are modeled
  }
  let addr = u32::from_str_radix(addr_s, 16).ok()?;
  if cmd == 'Z' {
    let slot = machine.hwbreak.iter().position(|&a| a == 0)?;
    machine.set_breakpoint(slot, addr).ok()?;
  } else {
    let slot = machine.hwbreak.iter().position(|&a| a == addr)?;
    machine.set_breakpoint(slot, 0).ok()?;
  }
  Some("OK".to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_checksum_matches_known_packet() {
    // "$#00" is the empty packet; checksum of empty body is 0.
    assert_eq!(checksum(b""), 0);
  }

  #[test]
  fn test_hex_roundtrip() {
    let bytes = [0xDE, 0xAD, 0xBE, 0xEF];
    assert_eq!(decode_hex(&encode_hex(&bytes)).unwrap(), bytes);
  }

  #[test]
  fn test_stop_reply_codes() {
    assert_eq!(stop_reply(StepResult::Exit), "W00");
    assert_eq!(stop_reply(StepResult::BreakHit), "S05");
    assert_eq!(stop_reply(StepResult::Halt), "S02");
    assert_eq!(stop_reply(StepResult::Undefined), "S04");
  }

  #[test]
  fn test_g_reports_all_registers() {
    let mut m = Machine::create(256, 64, 1024, crate::machine::LogLevel::Error).unwrap();
    m.reset();
    let mut host = crate::host::NullHost;
    let reply = dispatch("g", &mut m, &mut host).unwrap();
    assert_eq!(reply.len(), NUM_REGS * 8);
  }

  #[test]
  fn test_set_and_clear_software_breakpoint() {
    let mut m = Machine::create(256, 64, 1024, crate::machine::LogLevel::Error).unwrap();
    assert_eq!(dispatch("Z0,1000,2", &mut m, &mut crate::host::NullHost), Some("OK".to_string()));
    assert_eq!(m.hwbreak[0], 0x1000);
    assert_eq!(dispatch("z0,1000,2", &mut m, &mut crate::host::NullHost), Some("OK".to_string()));
    assert_eq!(m.hwbreak[0], 0);
  }
}
