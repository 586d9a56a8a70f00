//! Log output redaction
//!
//! Wraps the subscriber writer so chat tokens never reach the log stream.
//! Scan event lines come straight from chat rooms and malformed ones are
//! logged verbatim, so a bot token pasted into a room would otherwise end
//! up in the logs.

use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;

/// Regex patterns for redacting sensitive data
pub struct RedactionPatterns {
    bot_token: Regex,
    env_token: Regex,
    authorization: Regex,
}

impl RedactionPatterns {
    /// Initialize all regex patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            bot_token: Regex::new(r"[MNO][A-Za-z0-9_-]{23,27}\.[A-Za-z0-9_-]{6}\.[A-Za-z0-9_-]{27,38}")?,
            env_token: Regex::new(r"DISCORD_TOKEN=[^\s&]+")?,
            authorization: Regex::new(r"(?i)(authorization:\s*bot\s+)[^\s']+")?,
        })
    }

    /// Mask every secret found in `input`
    #[must_use]
    pub fn redact(&self, input: &str) -> String {
        let mut output = self
            .env_token
            .replace_all(input, "DISCORD_TOKEN=[MASKED]")
            .to_string();
        output = self
            .authorization
            .replace_all(&output, "${1}[MASKED]")
            .to_string();
        output = self
            .bot_token
            .replace_all(&output, "[DISCORD_TOKEN]")
            .to_string();
        output
    }
}

/// Writer that redacts each buffer before forwarding it
pub struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> RedactingWriter<W> {
    /// Wrap `inner`
    pub const fn new(inner: W, patterns: Arc<RedactionPatterns>) -> Self {
        Self { inner, patterns }
    }
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        let redacted = self.patterns.redact(&s);
        self.inner.write_all(redacted.as_bytes())?;
        // Report the caller's length; the redacted output may differ.
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// `MakeWriter` producing [`RedactingWriter`]s for `tracing-subscriber`
pub struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<F> RedactingMakeWriter<F> {
    /// Wrap a writer factory such as `std::io::stderr`
    pub const fn new(make_inner: F, patterns: Arc<RedactionPatterns>) -> Self {
        Self {
            make_inner,
            patterns,
        }
    }
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter::new((self.make_inner)(), self.patterns.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAKE_TOKEN: &str =
        "MTA4NzY1NDMyMTA5ODc2NTQzMg.GhIjKl.abcdefghijklmnopqrstuvwxyz0123";

    #[test]
    fn test_redacts_bot_token() -> Result<(), regex::Error> {
        let patterns = RedactionPatterns::new()?;
        let line = format!("login failed for {FAKE_TOKEN} (retrying)");
        assert_eq!(
            patterns.redact(&line),
            "login failed for [DISCORD_TOKEN] (retrying)"
        );
        Ok(())
    }

    #[test]
    fn test_redacts_env_and_header() -> Result<(), regex::Error> {
        let patterns = RedactionPatterns::new()?;
        assert_eq!(
            patterns.redact("DISCORD_TOKEN=abc123 RUN_MODE=prod"),
            "DISCORD_TOKEN=[MASKED] RUN_MODE=prod"
        );
        assert_eq!(
            patterns.redact("header Authorization: Bot xyz.987 sent"),
            "header Authorization: Bot [MASKED] sent"
        );
        Ok(())
    }

    #[test]
    fn test_writer_passes_plain_text_through() -> Result<(), Box<dyn std::error::Error>> {
        let patterns = Arc::new(RedactionPatterns::new()?);
        let mut sink = Vec::new();
        {
            let mut writer = RedactingWriter::new(&mut sink, patterns);
            let msg = format!("token {FAKE_TOKEN}\n");
            let written = writer.write(msg.as_bytes())?;
            assert_eq!(written, msg.len());
            writer.write_all(b"scan T1 in R1 ok\n")?;
        }
        assert_eq!(
            String::from_utf8(sink)?,
            "token [DISCORD_TOKEN]\nscan T1 in R1 ok\n"
        );
        Ok(())
    }
}
