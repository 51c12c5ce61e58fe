//! Passphrase acquisition for the command-line front end

use crate::error::{ErrorCategory, ErrorKind, Result, VaultError};
use crate::secure::SecureBuffer;
use std::io::{self, BufRead, IsTerminal, Write};
use zeroize::Zeroizing;

/// Source of passphrases.
pub trait PassphraseReader {
    /// Read one passphrase as arbitrary bytes (not necessarily UTF-8).
    ///
    /// `prompt` is shown by interactive readers and ignored by the others.
    fn read_passphrase(&mut self, prompt: &str) -> Result<SecureBuffer>;
}

/// Returns a fixed passphrase (for testing)
pub struct ConstantPassphraseReader {
    passphrase: SecureBuffer,
}

impl ConstantPassphraseReader {
    pub fn new(passphrase: Vec<u8>) -> Self {
        Self {
            passphrase: SecureBuffer::new(passphrase),
        }
    }
}

impl PassphraseReader for ConstantPassphraseReader {
    fn read_passphrase(&mut self, _prompt: &str) -> Result<SecureBuffer> {
        Ok(self.passphrase.clone())
    }
}

/// Reads one passphrase per line from any buffered source.
///
/// The line terminator (`\n` or `\r\n`) is stripped. Used for
/// `--passphrase-stdin`, where commands that need two secrets (old and new)
/// read two consecutive lines.
pub struct ReaderPassphraseReader {
    reader: Box<dyn BufRead>,
}

impl ReaderPassphraseReader {
    pub fn new(reader: Box<dyn BufRead>) -> Self {
        Self { reader }
    }
}

impl PassphraseReader for ReaderPassphraseReader {
    fn read_passphrase(&mut self, _prompt: &str) -> Result<SecureBuffer> {
        let mut line = Zeroizing::new(Vec::new());
        let n = self.reader.read_until(b'\n', &mut line).map_err(|e| {
            VaultError::with_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("error reading passphrase: {}", e),
                e,
            )
        })?;
        if n == 0 {
            return Err(VaultError::new(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "no passphrase left on input",
            ));
        }
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }
        Ok(SecureBuffer::new(std::mem::take(&mut *line)))
    }
}

/// Reads passphrase from terminal with no echo
#[derive(Default)]
pub struct TerminalPassphraseReader;

impl TerminalPassphraseReader {
    pub fn new() -> Self {
        Self
    }
}

impl PassphraseReader for TerminalPassphraseReader {
    /// Read passphrase from terminal.
    ///
    /// Note: Terminal input is limited to UTF-8 due to rpassword library constraints.
    /// For non-UTF-8 passphrases, use --passphrase-stdin instead.
    fn read_passphrase(&mut self, prompt: &str) -> Result<SecureBuffer> {
        if !io::stdin().is_terminal() {
            return Err(VaultError::new(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "cannot read passphrase from terminal - stdin is not a terminal",
            ));
        }

        let mut stderr = io::stderr();
        stderr
            .write_all(prompt.as_bytes())
            .and_then(|()| stderr.flush())
            .map_err(|e| {
                VaultError::with_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    format!("failed to write prompt: {}", e),
                    e,
                )
            })?;

        // rpassword hands back a plain String; move it into a wiping buffer
        let passphrase = rpassword::read_password().map_err(|e| {
            VaultError::with_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("failure reading passphrase: {}", e),
                e,
            )
        })?;

        Ok(SecureBuffer::from(passphrase))
    }
}
