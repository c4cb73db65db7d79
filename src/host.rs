//! Host char-source/sink interface (spec.md §6).
//!
//! The core never touches a terminal, socket, or file directly; it calls
//! back through this trait. `thumbsim` (the CLI front end) supplies a
//! raw-terminal implementation; tests and the GDB server supply simpler
//! ones.

/// A combined UART byte source and sink.
///
/// `get_char` is the only operation in the core that may block (spec.md
/// §5): it models the guest waiting on `UART.RXD`. `put_char` never blocks.
pub trait Host {
  /// Returns the next byte from the host, or a negative value at EOF.
  fn get_char(&mut self) -> i32;
  /// Writes one byte to the host. Never fails from the guest's perspective.
  fn put_char(&mut self, byte: u8);
}

/// A [`Host`] that never has input and discards output. Used by tests and by
/// the GDB server before a UART session is attached.
pub struct NullHost;

impl Host for NullHost {
  fn get_char(&mut self) -> i32 {
    -1
  }
  fn put_char(&mut self, _byte: u8) {}
}

/// Replays a fixed byte sequence as input and records everything written.
/// Grounds the "UART echo" scenario in spec.md §8.
pub struct ScriptedHost {
  input: std::collections::VecDeque<u8>,
  pub output: Vec<u8>,
}

impl ScriptedHost {
  #[must_use]
  pub fn new(input: impl IntoIterator<Item = u8>) -> Self {
    ScriptedHost { input: input.into_iter().collect(), output: Vec::new() }
  }
}

impl Host for ScriptedHost {
  fn get_char(&mut self) -> i32 {
    self.input.pop_front().map_or(-1, i32::from)
  }
  fn put_char(&mut self, byte: u8) {
    self.output.push(byte);
  }
}

#[cfg(unix)]
mod terminal {
  use super::Host;
  use std::io::{Read, Write};
  use std::os::unix::io::{AsRawFd, RawFd};
  use nix::sys::termios::{self, LocalFlags, SetArg};

  /// Wires `UART.RXD`/`UART.TXD` to the controlling terminal in raw mode, so
  /// firmware that reads a line at a time sees bytes as they're typed
  /// instead of after an Enter. Restores the prior terminal settings on drop.
  pub struct TerminalHost {
    fd: RawFd,
    saved: termios::Termios,
  }

  impl TerminalHost {
    /// # Errors
    ///
    /// Returns an error if stdin isn't a TTY or the terminal settings can't
    /// be read or changed.
    pub fn new() -> std::io::Result<Self> {
      let to_io_err = |e: nix::Error| std::io::Error::from_raw_os_error(e as i32);
      let stdin = std::io::stdin();
      let fd = stdin.as_raw_fd();
      let saved = termios::tcgetattr(fd).map_err(to_io_err)?;
      let mut raw = saved.clone();
      raw.local_flags.remove(LocalFlags::ICANON | LocalFlags::ECHO);
      termios::tcsetattr(fd, SetArg::TCSANOW, &raw).map_err(to_io_err)?;
      Ok(TerminalHost { fd, saved })
    }
  }

  impl Host for TerminalHost {
    fn get_char(&mut self) -> i32 {
      let mut byte = [0u8; 1];
      match std::io::stdin().read(&mut byte) {
        Ok(1) => i32::from(byte[0]),
        _ => -1,
      }
    }
    fn put_char(&mut self, byte: u8) {
      let mut stdout = std::io::stdout();
      let _ = stdout.write_all(&[byte]);
      let _ = stdout.flush();
    }
  }

  impl Drop for TerminalHost {
    fn drop(&mut self) {
      let _ = termios::tcsetattr(self.fd, SetArg::TCSANOW, &self.saved);
    }
  }
}

#[cfg(unix)]
pub use terminal::TerminalHost;
