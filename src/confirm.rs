//! Confirmation gate used before large or destructive batches.

use std::io::{self, BufRead, Write};

pub trait ConfirmationPrompt: Send + Sync {
    /// Returns true to proceed.
    fn confirm(&self, message: &str) -> bool;
}

/// Answers every prompt with a fixed value. `AutoConfirm(true)` is what
/// unattended runs use.
#[derive(Clone, Copy, Debug)]
pub struct AutoConfirm(pub bool);

impl ConfirmationPrompt for AutoConfirm {
    fn confirm(&self, _message: &str) -> bool {
        self.0
    }
}

/// Asks on stdout and reads a y/N answer from stdin.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdinPrompt;

impl ConfirmationPrompt for StdinPrompt {
    fn confirm(&self, message: &str) -> bool {
        print!("{} [y/N] ", message);
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(_) => false,
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
