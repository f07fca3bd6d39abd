use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use plexfix_core::{FatalError, Operator};

/// Numbered menus and bracketed defaults over a line-oriented terminal.
pub struct TerminalOperator<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> TerminalOperator<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    fn prompt(&mut self, text: &str) -> Result<String> {
        write!(self.output, "{text}").context("failed to write prompt")?;
        self.output.flush().context("failed to flush prompt")?;

        let mut line = String::new();
        let read = self.input.read_line(&mut line).context("failed to read answer")?;
        if read == 0 {
            return Err(FatalError::InputClosed.into());
        }
        Ok(line.trim().to_string())
    }
}

impl<R: BufRead, W: Write> Operator for TerminalOperator<R, W> {
    fn select(&mut self, title: &str, options: &[&str]) -> Result<usize> {
        writeln!(self.output, "{title}")?;
        for (index, option) in options.iter().enumerate() {
            writeln!(self.output, "  {}) {option}", index + 1)?;
        }
        loop {
            let answer = self.prompt(&format!("Choice [1-{}]: ", options.len()))?;
            match answer.parse::<usize>() {
                Ok(choice) if (1..=options.len()).contains(&choice) => return Ok(choice - 1),
                _ => writeln!(
                    self.output,
                    "Please enter a number between 1 and {}.",
                    options.len()
                )?,
            }
        }
    }

    fn ask(&mut self, question: &str, default: &str) -> Result<String> {
        let text = if default.is_empty() {
            format!("{question}: ")
        } else {
            format!("{question} [{default}]: ")
        };
        let answer = self.prompt(&text)?;
        Ok(if answer.is_empty() { default.to_string() } else { answer })
    }

    fn confirm(&mut self, question: &str) -> Result<bool> {
        let answer = self.prompt(&format!("{question} [y/N]: "))?;
        Ok(matches!(answer.to_ascii_lowercase().as_str(), "y" | "yes"))
    }

    fn show(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{text}")?;
        Ok(())
    }
}
