//! Terminal output helpers shared by the subcommands.

use colored::Colorize;

pub fn success(msg: &str) {
    println!("  {} {}", "\u{2714}".bright_green(), msg);
}

pub fn error(msg: &str) {
    eprintln!("  {} {}", "\u{2718}".bright_red(), msg.bright_red());
}

/// Dimmed follow-up line under a result.
pub fn hint(msg: &str) {
    println!("    {}", msg.dimmed());
}

/// Aligned `label: value` line.
pub fn kv(label: &str, value: &str) {
    println!("  {:<24} {}", format!("{label}:").bold(), value);
}
