// Output formatting helpers for CLI commands

use std::io::Write;

/// Print a status message: "  Status message"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

/// Print a failure message with X
pub fn failure(message: &str) {
    eprintln!("\x1b[1;31m  \u{2717}\x1b[0m {}", message);
}

/// Print a check/pass item
pub fn check(message: &str) {
    eprintln!("\x1b[32m  \u{2713}\x1b[0m {}", message);
}

/// Print a warning message
pub fn warning(message: &str) {
    eprintln!("\x1b[33m  !\x1b[0m {}", message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("\x1b[1;31merror:\x1b[0m {}", message);
}

/// Print an info message
pub fn info(message: &str) {
    eprintln!("\x1b[36m  i\x1b[0m {}", message);
}

/// Print a dim/muted message
pub fn dim(message: &str) {
    eprintln!("\x1b[2m{}\x1b[0m", message);
}

/// Print a dim success message
pub fn dim_success(message: &str) {
    eprintln!("\x1b[32m{}\x1b[0m", message);
}

/// Print a dim failure message
pub fn dim_failure(message: &str) {
    eprintln!("\x1b[31m{}\x1b[0m", message);
}

/// Print a stage header
pub fn stage_header(name: &str, total_scripts: usize) {
    eprintln!("\x1b[1;34m  Stage\x1b[0m '{}' ({} scripts)", name, total_scripts);
}

/// Print script output (indented)
pub fn script_output(line: &str) {
    println!("        | {}", line);
}

/// Print script error output (indented, red)
pub fn script_error(line: &str) {
    eprintln!("\x1b[31m        | {}\x1b[0m", line);
}

/// Print a memory report (indented, magenta)
pub fn memory(line: &str) {
    println!("\x1b[35m        | {}\x1b[0m", line);
}

/// Print a progress meter; `in_place` rewrites the current line
pub fn progress(line: &str, in_place: bool) {
    let mut stdout = std::io::stdout().lock();
    if in_place {
        let _ = write!(stdout, "\r\x1b[2K        | {}", line);
    } else {
        let _ = write!(stdout, "        | {}", line);
    }
    let _ = stdout.flush();
}

/// Terminate an open progress line
pub fn end_progress() {
    println!();
}

/// Print a header line
pub fn header(message: &str) {
    eprintln!("\x1b[1m==> {}\x1b[0m", message);
}
