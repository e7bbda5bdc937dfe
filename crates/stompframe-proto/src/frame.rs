//! Frame value type.
//!
//! A `Frame` is one protocol message: a command line, a header map and a
//! text body. It is a pure data holder. Required headers are not checked
//! here; the server dispatcher validates them per command.

use std::{collections::BTreeMap, fmt};

use bytes::BufMut;

use crate::{
    Command,
    errors::{ProtocolError, Result},
};

/// One protocol message.
///
/// Headers are unique by name and the last assignment wins. They are kept in
/// name order so that a frame always renders to the same text; the order is
/// not meaningful to the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: String,
    headers: BTreeMap<String, String>,
    body: String,
}

impl Frame {
    /// Create a frame with no headers.
    #[must_use]
    pub fn new(command: impl Into<String>, body: impl Into<String>) -> Self {
        Self { command: command.into(), headers: BTreeMap::new(), body: body.into() }
    }

    /// Set a header, replacing any previous value under the same name.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name.into(), value.into());
    }

    /// Builder form of [`Frame::add_header`].
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_header(name, value);
        self
    }

    /// Raw command string as received or constructed.
    #[must_use]
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Command as enum. `None` if unrecognized.
    #[must_use]
    pub fn command_enum(&self) -> Option<Command> {
        Command::from_name(&self.command)
    }

    /// Value of a header, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// All headers in name order.
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.headers.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Frame body. Empty when the frame carries none.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Parse the text of a single frame, without its NUL terminator.
    ///
    /// The first line is the command. Header lines follow until the first
    /// empty line; everything after it is the body. Lines may end in `\r\n`.
    /// A frame without a blank line has an empty body.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::EmptyCommand` if the first line is empty
    /// - `ProtocolError::MalformedHeader` if a header line has no `:`
    pub fn parse(text: &str) -> Result<Self> {
        let (command, mut rest) = next_line(text);
        if command.is_empty() {
            return Err(ProtocolError::EmptyCommand);
        }

        let mut frame = Self::new(command, "");

        while !rest.is_empty() {
            let (line, tail) = next_line(rest);
            rest = tail;

            if line.is_empty() {
                break;
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;
            frame.add_header(name, value);
        }

        frame.body = rest.to_string();
        Ok(frame)
    }

    /// Write the frame in wire format, NUL terminator included.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(self.command.as_bytes());
        dst.put_u8(b'\n');
        for (name, value) in &self.headers {
            dst.put_slice(name.as_bytes());
            dst.put_u8(b':');
            dst.put_slice(value.as_bytes());
            dst.put_u8(b'\n');
        }
        dst.put_u8(b'\n');
        dst.put_slice(self.body.as_bytes());
        dst.put_u8(0);
    }
}

/// Renders the wire text without the NUL terminator.
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.command)?;
        for (name, value) in &self.headers {
            writeln!(f, "{name}:{value}")?;
        }
        writeln!(f)?;
        f.write_str(&self.body)
    }
}

/// Split off the first line, dropping its `\n` and an optional `\r`.
fn next_line(text: &str) -> (&str, &str) {
    let (line, rest) = text.split_once('\n').unwrap_or((text, ""));
    (line.strip_suffix('\r').unwrap_or(line), rest)
}
