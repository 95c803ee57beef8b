// UI layer: terminal implementation of `Console` using `dialoguer` for
// prompts, `rfd` for the file picker and `indicatif` for batch progress.

use crate::error::{ImportError, Result};
use crate::pipeline::Console;
use crate::submit::RowOutcome;
use crossterm::style::{style, Stylize};
use dialoguer::{Input, Password};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;

/// Interactive terminal console. Falls back to a typed path when no
/// graphical file dialog can be shown.
pub struct TerminalConsole {
    graphical_picker: bool,
    progress: Option<ProgressBar>,
}

impl TerminalConsole {
    pub fn new() -> Self {
        TerminalConsole {
            graphical_picker: has_display(),
            progress: None,
        }
    }

    /// Print through the progress bar while one is active so lines do not
    /// tear the bar.
    fn print(&self, line: &str) {
        match &self.progress {
            Some(pb) => pb.println(line),
            None => println!("{}", line),
        }
    }
}

impl Default for TerminalConsole {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(target_os = "windows", target_os = "macos"))]
fn has_display() -> bool {
    true
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn has_display() -> bool {
    std::env::var_os("DISPLAY").is_some() || std::env::var_os("WAYLAND_DISPLAY").is_some()
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

impl Console for TerminalConsole {
    fn ask_text(
        &mut self,
        _title: &str,
        prompt: &str,
        initial: Option<&str>,
    ) -> Result<Option<String>> {
        let mut input = Input::<String>::new();
        input.with_prompt(prompt).allow_empty(true);
        if let Some(initial) = initial {
            input.with_initial_text(initial);
        }
        let value = input.interact_text().map_err(ImportError::Prompt)?;
        Ok(non_empty(value))
    }

    fn ask_password(&mut self, _title: &str, prompt: &str) -> Result<Option<String>> {
        let value = Password::new()
            .with_prompt(prompt)
            .allow_empty_password(true)
            .interact()
            .map_err(ImportError::Prompt)?;
        Ok(if value.is_empty() { None } else { Some(value) })
    }

    fn ask_integer(&mut self, title: &str, prompt: &str) -> Result<Option<i64>> {
        println!("{}\n{}", style(title).bold(), prompt);
        // Re-asks until the answer is empty or a whole number.
        let value: String = Input::new()
            .with_prompt("Group ID")
            .allow_empty(true)
            .validate_with(|v: &String| -> std::result::Result<(), &'static str> {
                if v.trim().is_empty() || v.trim().parse::<i64>().is_ok() {
                    Ok(())
                } else {
                    Err("please enter a whole number")
                }
            })
            .interact_text()
            .map_err(ImportError::Prompt)?;
        Ok(value.trim().parse().ok())
    }

    fn ask_open_file(
        &mut self,
        title: &str,
        filter_name: &str,
        extensions: &[&str],
    ) -> Result<Option<PathBuf>> {
        if self.graphical_picker {
            return Ok(rfd::FileDialog::new()
                .set_title(title)
                .add_filter(filter_name, extensions)
                .pick_file());
        }
        let value: String = Input::new()
            .with_prompt(format!("{} ({})", title, filter_name))
            .allow_empty(true)
            .interact_text()
            .map_err(ImportError::Prompt)?;
        Ok(non_empty(value).map(|v| PathBuf::from(v.trim())))
    }

    fn info(&mut self, title: &str, message: &str) {
        self.print(&format!("{}\n{}", style(title).cyan().bold(), message));
    }

    fn warning(&mut self, title: &str, message: &str) {
        self.print(&format!("{}\n{}", style(title).yellow().bold(), message));
    }

    fn error(&mut self, title: &str, message: &str) {
        self.print(&format!("{}\n{}", style(title).red().bold(), message));
    }

    fn begin_batch(&mut self, total: usize) {
        let pb = ProgressBar::new(total as u64);
        if let Ok(st) = ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} rows") {
            pb.set_style(st);
        }
        self.progress = Some(pb);
    }

    fn row_finished(&mut self, outcome: &RowOutcome) {
        if let Some(line) = outcome.message() {
            self.print(&line);
        }
        if let Some(pb) = &self.progress {
            pb.inc(1);
        }
    }

    fn end_batch(&mut self) {
        if let Some(pb) = self.progress.take() {
            pb.finish_and_clear();
        }
    }
}
