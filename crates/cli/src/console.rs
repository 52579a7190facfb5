//! Terminal user interface: confirmations from a line reader, feedback to stdout.

use std::io::{BufRead, Write};
use std::sync::Mutex;

use deskpilot_core::UserInterface;
use deskpilot_core::error::InterfaceError;

pub struct ConsoleUi {
    assume_yes: bool,
    input: Mutex<Box<dyn BufRead + Send>>,
}

impl ConsoleUi {
    /// Read answers from stdin.
    pub fn stdin(assume_yes: bool) -> Self {
        Self::with_input(Box::new(std::io::BufReader::new(std::io::stdin())), assume_yes)
    }

    pub fn with_input(input: Box<dyn BufRead + Send>, assume_yes: bool) -> Self {
        Self {
            assume_yes,
            input: Mutex::new(input),
        }
    }
}

impl UserInterface for ConsoleUi {
    fn request_confirmation(&self, prompt: &str) -> Result<bool, InterfaceError> {
        if self.assume_yes {
            eprintln!("{prompt} [y/N] y (--yes)");
            return Ok(true);
        }

        eprint!("{prompt} [y/N] ");
        std::io::stderr()
            .flush()
            .map_err(|e| InterfaceError::Unavailable(e.to_string()))?;

        let mut line = String::new();
        let read = self
            .input
            .lock()
            .unwrap()
            .read_line(&mut line)
            .map_err(|e| InterfaceError::Unavailable(e.to_string()))?;
        if read == 0 {
            return Err(InterfaceError::Unavailable("input closed".into()));
        }
        Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }

    fn display_feedback(&self, message: &str) {
        println!("{message}");
    }
}
