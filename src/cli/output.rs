//! Output formatting for the CLI
//!
//! Human output goes to stdout with optional colors; diagnostics go to
//! stderr. In JSON mode every message is one JSON object per line.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, Write};
use std::time::Duration;

/// Output formatter for different output modes
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    /// JSON output mode
    json_mode: bool,
    /// Verbosity level
    verbosity: u8,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, json_mode: bool, verbosity: u8) -> Self {
        // Respect NO_COLOR environment variable
        let use_color = use_color && std::env::var("NO_COLOR").is_err();

        Self {
            use_color,
            json_mode,
            verbosity,
        }
    }

    pub fn is_json(&self) -> bool {
        self.json_mode
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        if self.json_mode {
            return;
        }

        if self.use_color {
            println!("{}", title.cyan().bold());
        } else {
            println!("{}", title);
        }
    }

    /// Print an aligned `label: value` line
    pub fn field(&self, label: &str, value: impl std::fmt::Display) {
        if self.json_mode {
            return;
        }

        let label = format!("{:>14}:", label);
        if self.use_color {
            println!("{} {}", label.bold(), value);
        } else {
            println!("{} {}", label, value);
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        if self.json_mode {
            self.event("success", message);
            return;
        }

        if self.use_color {
            println!("{} {}", "OK:".green().bold(), message);
        } else {
            println!("OK: {}", message);
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.json_mode {
            self.event_stderr("error", message);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.json_mode {
            self.event_stderr("warning", message);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }

    /// Print a hint message
    pub fn hint(&self, message: &str) {
        if self.json_mode {
            self.event_stderr("hint", message);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "HINT:".cyan().bold(), message);
        } else {
            eprintln!("HINT: {}", message);
        }
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if self.verbosity < 1 {
            return;
        }

        if self.json_mode {
            self.event("info", message);
            return;
        }

        if self.use_color {
            println!("{} {}", "INFO:".blue(), message);
        } else {
            println!("INFO: {}", message);
        }
    }

    /// Print a serializable value as one line of JSON
    pub fn json<T: Serialize>(&self, value: &T) -> serde_json::Result<()> {
        println!("{}", serde_json::to_string(value)?);
        Ok(())
    }

    /// Create a spinner for indeterminate progress
    pub fn create_spinner(&self, message: &str) -> Option<ProgressBar> {
        if self.json_mode || self.verbosity >= 2 {
            return None;
        }

        let sp = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            sp.set_style(style);
        }
        sp.set_message(message.to_string());
        sp.enable_steady_tick(Duration::from_millis(100));

        Some(sp)
    }

    /// Flush stdout
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }

    fn event(&self, kind: &str, message: &str) {
        println!("{}", serde_json::json!({ "type": kind, "message": message }));
    }

    fn event_stderr(&self, kind: &str, message: &str) {
        eprintln!("{}", serde_json::json!({ "type": kind, "message": message }));
    }
}
