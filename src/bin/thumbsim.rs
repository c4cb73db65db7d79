//! `thumbsim`: CLI front end for `thumbcore` (spec.md §6).
//!
//! Loads a firmware image into flash, resets the machine, wires `UART.RXD`/
//! `UART.TXD` to the controlling terminal, and either runs the machine to
//! completion or starts a GDB Remote Serial Protocol server and blocks on
//! it. This binary is a thin shell over [`thumbcore::machine::Machine`]; all
//! emulation logic lives in the library.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use thumbcore::error::StepResult;
use thumbcore::host::{Host, NullHost};
use thumbcore::machine::{LogLevel, Machine};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevelArg {
  Error,
  Warning,
  Calls,
  CallsSp,
  Instrs,
}

impl From<LogLevelArg> for LogLevel {
  fn from(arg: LogLevelArg) -> Self {
    match arg {
      LogLevelArg::Error => LogLevel::Error,
      LogLevelArg::Warning => LogLevel::Warn,
      LogLevelArg::Calls => LogLevel::Calls,
      LogLevelArg::CallsSp => LogLevel::CallsSp,
      LogLevelArg::Instrs => LogLevel::Instrs,
    }
  }
}

/// Instruction-level Cortex-M Thumb/Thumb-2 emulator.
#[derive(Debug, Parser)]
#[command(name = "thumbsim", version, about)]
struct Cli {
  /// Path to a raw firmware binary.
  firmware: PathBuf,

  /// SRAM size in KB.
  #[arg(long, default_value_t = 16)]
  ram: usize,

  /// Flash size in KB.
  #[arg(long, default_value_t = 256)]
  flash: usize,

  /// Flash erase page size in bytes; must be a power of two.
  #[arg(long, default_value_t = 1024)]
  pagesize: usize,

  /// Firmware-trace verbosity of the emulator core itself.
  #[arg(long, value_enum, default_value_t = LogLevelArg::Error)]
  loglevel: LogLevelArg,

  /// Start a GDB Remote Serial Protocol server at `host:port` instead of
  /// running to completion.
  #[arg(long)]
  gdb: Option<String>,

  /// Enable verbose host-side diagnostics (`log` crate output).
  #[arg(short = 'v', long)]
  verbose: bool,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let filter = if cli.verbose { "debug" } else { "warn" };
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

  let firmware = match std::fs::read(&cli.firmware) {
    Ok(bytes) => bytes,
    Err(e) => {
      eprintln!("thumbsim: could not read {}: {e}", cli.firmware.display());
      return ExitCode::FAILURE;
    }
  };

  let mut machine = match Machine::create(cli.flash * 1024, cli.pagesize, cli.ram * 1024, cli.loglevel.into()) {
    Ok(m) => m,
    Err(e) => {
      eprintln!("thumbsim: {e}");
      return ExitCode::FAILURE;
    }
  };
  if let Err(e) = machine.load(&firmware) {
    eprintln!("thumbsim: {e}");
    return ExitCode::FAILURE;
  }
  machine.reset();

  let result = if let Some(addr) = cli.gdb.as_deref() {
    run_under_gdb(addr, &mut machine)
  } else {
    run_to_completion(&mut machine)
  };

  match result {
    Ok(StepResult::Exit) => ExitCode::SUCCESS,
    Ok(StepResult::Halt | StepResult::BreakHit) => {
      eprintln!("thumbsim: stopped without a debugger attached");
      ExitCode::FAILURE
    }
    Ok(fatal) => {
      eprintln!("thumbsim: fatal: {fatal:?}");
      ExitCode::FAILURE
    }
    Err(e) => {
      eprintln!("thumbsim: I/O error: {e}");
      ExitCode::FAILURE
    }
  }
}

fn run_to_completion(machine: &mut Machine) -> std::io::Result<StepResult> {
  #[cfg(unix)]
  {
    let mut host = thumbcore::host::TerminalHost::new()?;
    Ok(machine.run(&mut host))
  }
  #[cfg(not(unix))]
  {
    let mut host = NullHost;
    Ok(machine.run(&mut host))
  }
}

fn run_under_gdb(addr: &str, machine: &mut Machine) -> std::io::Result<StepResult> {
  let mut host = UnblockingHost;
  thumbcore::gdbserver::serve(addr, machine, &mut host)?;
  Ok(StepResult::Halt)
}

/// Host used while a debugger drives the machine: `UART.RXD` never blocks
/// on the host terminal, since the debug server owns the socket instead.
struct UnblockingHost;

impl Host for UnblockingHost {
  fn get_char(&mut self) -> i32 {
    NullHost.get_char()
  }
  fn put_char(&mut self, byte: u8) {
    use std::io::Write;
    let _ = std::io::stdout().write_all(&[byte]);
    let _ = std::io::stdout().flush();
  }
}
