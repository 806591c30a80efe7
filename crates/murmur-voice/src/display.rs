//! Display collaborator: where transcripts, the speaking indicator and status
//! messages end up. The engine only ever talks to this trait.

/// Sink for user-visible session output.
pub trait DisplaySink {
    /// Append a transcript line attributed to `source` (e.g. "user").
    fn transcript(&self, text: &str, source: &str);

    /// Speaking indicator: on at speech start, off when the utterance closes or is abandoned.
    fn speaking(&self, speaking: bool);

    /// One-line session status ("Connection lost. Please try again.").
    fn status(&self, message: &str);
}

/// Prefix a transcript line the way the console shows it: `[Me]` for the
/// local speaker, `[Max]` for everything the server says.
pub fn transcript_prefix(source: &str) -> &'static str {
    if source == "user" {
        "[Me]: "
    } else {
        "[Max]: "
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_by_source() {
        assert_eq!(transcript_prefix("user"), "[Me]: ");
        assert_eq!(transcript_prefix("llm"), "[Max]: ");
        assert_eq!(transcript_prefix("server"), "[Max]: ");
    }
}
