//! Terminal permission prompt

use common::DeviceDescriptor;
use host::PermissionPrompt;
use std::io::{self, BufRead, Write};
use std::sync::Mutex;
use tracing::warn;

/// Asks y/N on stderr, reads the answer from stdin
#[derive(Debug, Default)]
pub struct ConsolePrompt {
    /// One question on the terminal at a time
    terminal: Mutex<()>,
}

impl ConsolePrompt {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PermissionPrompt for ConsolePrompt {
    fn decide(&self, device: &DeviceDescriptor) -> bool {
        let _terminal = self
            .terminal
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        eprint!("Allow usb-link to use {} ({})? [y/N] ", device.label(), device.id);
        let _ = io::stderr().flush();

        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(e) => {
                warn!("Failed to read answer: {}", e);
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
