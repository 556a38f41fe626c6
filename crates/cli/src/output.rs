//! Terminal output: colored status lines, job events and JSON.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

use quarry_lib::job::ProcessResult;

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

/// Elapsed time rounded to milliseconds, e.g. `1s 250ms`.
pub fn format_elapsed(duration: Duration) -> String {
  let rounded = Duration::from_millis(duration.as_millis().try_into().unwrap_or(u64::MAX));
  humantime::format_duration(rounded).to_string()
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// One command line as announced by a build, clean or install job.
pub fn print_command(highlight: &str, message: &str) {
  match highlight {
    "" => println!("{} {}", symbols::ARROW, message),
    "codegen" => println!(
      "{} {}",
      symbols::ARROW,
      message.if_supports_color(Stream::Stdout, |s| s.magenta())
    ),
    "linker" => println!(
      "{} {}",
      symbols::ARROW,
      message.if_supports_color(Stream::Stdout, |s| s.bold())
    ),
    _ => println!(
      "{} {}",
      symbols::ARROW,
      message.if_supports_color(Stream::Stdout, |s| s.cyan())
    ),
  }
}

/// Output of a finished process; failures also show the command line.
pub fn print_process_result(result: &ProcessResult) {
  if !result.success {
    print_error(&format!(
      "{} (exit code {})",
      result.command_line,
      result.exit_code.map_or("unknown".to_string(), |c| c.to_string())
    ));
  }
  if !result.stdout.is_empty() {
    print!("{}", result.stdout);
  }
  if !result.stderr.is_empty() {
    eprint!("{}", result.stderr);
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn elapsed_is_rounded_to_milliseconds() {
    assert_eq!(format_elapsed(Duration::from_micros(1_250_400)), "1s 250ms");
    assert_eq!(format_elapsed(Duration::from_millis(50)), "50ms");
    assert_eq!(format_elapsed(Duration::from_secs(65)), "1m 5s");
  }
}
