//! Terminal rendering of session output.

use murmur_voice::{transcript_prefix, DisplaySink};
use std::cell::Cell;
use tracing::debug;

/// Prints transcripts and status lines to stdout.
#[derive(Default)]
pub struct ConsoleDisplay {
    speaking: Cell<bool>,
}

impl DisplaySink for ConsoleDisplay {
    fn transcript(&self, text: &str, source: &str) {
        println!("{}{}", transcript_prefix(source), text);
    }

    fn speaking(&self, speaking: bool) {
        if self.speaking.replace(speaking) != speaking {
            debug!(speaking, "Speaking indicator changed");
            if speaking {
                println!("🎤 ...");
            }
        }
    }

    fn status(&self, message: &str) {
        println!("-- {}", message);
    }
}
