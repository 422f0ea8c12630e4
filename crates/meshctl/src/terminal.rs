//! Terminal prompter - stdin questions, colored notices on stdout
//!
//! End of input on stdin is reported as `UnexpectedEof`; callers treat it as
//! the operator cancelling. When stdout carries a JSON report, questions and
//! notices go to stderr instead.

use crate::cli::Command;
use mesh_common::prompt::parse_yes_no;
use mesh_common::{Notice, Prompter};
use owo_colors::OwoColorize;
use std::io::{self, BufRead, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

pub struct TerminalPrompter {
    stream: Stream,
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self {
            stream: Stream::Stdout,
        }
    }
}

impl TerminalPrompter {
    /// Keeps stdout free for the report when the command prints JSON
    pub fn for_command(command: &Command) -> Self {
        let stream = if command.json() {
            Stream::Stderr
        } else {
            Stream::Stdout
        };
        Self { stream }
    }

    pub fn stream(&self) -> Stream {
        self.stream
    }

    fn out(&self) -> Box<dyn Write> {
        match self.stream {
            Stream::Stdout => Box::new(io::stdout()),
            Stream::Stderr => Box::new(io::stderr()),
        }
    }

    fn read_line(&self, prompt: &str) -> io::Result<String> {
        let mut out = self.out();
        write!(out, "{}", prompt)?;
        out.flush()?;
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line)? == 0 {
            writeln!(out)?;
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "input closed",
            ));
        }
        Ok(line.trim().to_string())
    }
}

impl Prompter for TerminalPrompter {
    fn input(&self, prompt: &str, default: Option<&str>) -> io::Result<String> {
        let full = match default.filter(|d| !d.is_empty()) {
            Some(d) => format!("{} [{}]: ", prompt, d.dimmed()),
            None => format!("{}: ", prompt),
        };
        let answer = self.read_line(&full)?;
        if answer.is_empty() {
            return Ok(default.unwrap_or_default().to_string());
        }
        Ok(answer)
    }

    fn confirm(&self, prompt: &str, default: bool) -> io::Result<bool> {
        let hint = if default { "Y/n" } else { "y/N" };
        loop {
            let answer = self.read_line(&format!("{} ({}): ", prompt, hint))?;
            if answer.is_empty() {
                return Ok(default);
            }
            match parse_yes_no(&answer) {
                Some(value) => return Ok(value),
                None => self.notify(Notice::Error, "Please enter yes/no (y/n)"),
            }
        }
    }

    fn choose(&self, prompt: &str, options: &[&str], default: usize) -> io::Result<usize> {
        let mut out = self.out();
        writeln!(out)?;
        for (i, option) in options.iter().enumerate() {
            writeln!(out, "  {} {}", format!("{:>2}.", i + 1).cyan(), option)?;
        }
        loop {
            let answer = self.read_line(&format!(
                "{} (1-{}) [{}]: ",
                prompt,
                options.len(),
                default + 1
            ))?;
            if answer.is_empty() {
                return Ok(default);
            }
            match answer.parse::<usize>() {
                Ok(n) if n >= 1 && n <= options.len() => return Ok(n - 1),
                _ => self.notify(Notice::Error, "Invalid choice, please try again"),
            }
        }
    }

    fn notify(&self, notice: Notice, text: &str) {
        let mut out = self.out();
        let _ = match notice {
            Notice::Info => writeln!(out, "{}", text),
            Notice::Success => writeln!(out, "{} {}", "✓".green().bold(), text.green()),
            Notice::Warning => writeln!(out, "{} {}", "⚠".yellow().bold(), text.yellow()),
            Notice::Error => writeln!(out, "{} {}", "✗".red().bold(), text.red()),
        };
    }
}

pub fn print_header(text: &str) {
    let rule = "=".repeat(60);
    println!();
    println!("{}", rule.cyan());
    println!("{}", text.bright_white().bold());
    println!("{}", rule.cyan());
}

pub fn print_section(text: &str) {
    println!();
    println!("{}", format!("--- {} ---", text).bright_cyan().bold());
}

/// Two-column label/value listing
pub fn print_rows(rows: &[(String, String)]) {
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
    for (label, value) in rows {
        println!("  {:<width$}  {}", label.bold(), value, width = width);
    }
}
