//! Status-line logging, ported from `jinjaform/log.py`'s `ok`/`bad`
//! helpers: a short tag plus a colored message, colors supplied by the
//! `colored` crate instead of hand-written ANSI escapes.

use std::io::{self, Write};

use colored::Colorize;

const PREFIX: &str = "[jinjaform]";

pub fn ok(message: impl AsRef<str>) {
    println!("{} {}", PREFIX.cyan(), message.as_ref().cyan());
}

pub fn bad(message: impl AsRef<str>) {
    eprintln!("{} {}", PREFIX.red(), message.as_ref().red());
}

/// Prompts the user for a yes/no confirmation before a destructive or
/// costly external action (e.g. creating a remote-state bucket). Always
/// returns `false` when stdin is not a terminal a human can answer.
pub fn accept(message: impl AsRef<str>) -> bool {
    print!("{} {} [y/N] ", PREFIX.cyan(), message.as_ref());
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}
