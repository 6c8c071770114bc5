// Envelope codec — canonical wire text for the exchange channel
//
// Wire format: a pretty-printed JSON object (4-space indent) with keys
// `from`, `to`, `action`, `type`, `data` in that order, wrapped in a
// code block so the channel renders it monospace. Anything outside
// printable ASCII is written as a `\uXXXX` escape.

use serde::Serialize;
use serde_json::ser::{Formatter, PrettyFormatter};
use std::io;
use thiserror::Error;

use super::types::{Envelope, Payload, ReceiverSet};

/// Opening and closing fence of the code block
const FENCE: &str = "```";

/// Maximum accepted wire text on decode (channel captions are far smaller)
pub const MAX_ENVELOPE_TEXT: usize = 64 * 1024;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnvelopeError {
    #[error("Empty sender identity")]
    EmptySender,
    #[error("Unsupported payload shape: {0}")]
    UnsupportedPayload(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Malformed envelope: {0}")]
    Malformed(String),
}

/// Serialize an envelope to its canonical wire text.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, EnvelopeError> {
    if envelope.from.is_empty() {
        return Err(EnvelopeError::EmptySender);
    }

    let mut buf = Vec::new();
    let formatter = AsciiFormatter {
        inner: PrettyFormatter::with_indent(b"    "),
    };
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    envelope
        .serialize(&mut ser)
        .map_err(|e| EnvelopeError::Serialization(e.to_string()))?;

    let json =
        String::from_utf8(buf).map_err(|e| EnvelopeError::Serialization(e.to_string()))?;

    Ok(code_block(&json))
}

/// Build and serialize in one step.
pub fn format_envelope(
    sender: &str,
    receivers: &ReceiverSet,
    action: &str,
    action_type: &str,
    data: Option<&Payload>,
) -> Result<String, EnvelopeError> {
    let envelope = Envelope::new(
        sender,
        receivers.clone(),
        action,
        action_type,
        data.cloned(),
    );
    encode_envelope(&envelope)
}

/// Parse wire text (fenced or bare JSON) back into an envelope.
pub fn parse_envelope(text: &str) -> Result<Envelope, EnvelopeError> {
    if text.len() > MAX_ENVELOPE_TEXT {
        return Err(EnvelopeError::Malformed(format!(
            "text too large: {} bytes (max {})",
            text.len(),
            MAX_ENVELOPE_TEXT
        )));
    }

    let body = strip_code_block(text);
    let envelope: Envelope =
        serde_json::from_str(body).map_err(|e| EnvelopeError::Malformed(e.to_string()))?;

    if envelope.from.is_empty() {
        return Err(EnvelopeError::EmptySender);
    }

    Ok(envelope)
}

/// Pretty printer that keeps strings in printable ASCII.
///
/// Other characters become lowercase `\uXXXX` escapes, with a UTF-16
/// surrogate pair above U+FFFF.
struct AsciiFormatter<'a> {
    inner: PrettyFormatter<'a>,
}

impl Formatter for AsciiFormatter<'_> {
    fn begin_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_array(writer)
    }

    fn end_array<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.inner.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object(writer)
    }

    fn end_object<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.inner.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object_value(writer)
    }

    fn write_string_fragment<W: ?Sized + io::Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            if (' '..='~').contains(&c) {
                continue;
            }
            writer.write_all(fragment[start..i].as_bytes())?;
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units).iter() {
                write!(writer, "\\u{:04x}", unit)?;
            }
            start = i + c.len_utf8();
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

fn code_block(text: &str) -> String {
    format!("{FENCE}\n{text}\n{FENCE}")
}

fn strip_code_block(text: &str) -> &str {
    let trimmed = text.trim();
    match trimmed
        .strip_prefix(FENCE)
        .and_then(|rest| rest.strip_suffix(FENCE))
    {
        Some(inner) => inner.trim(),
        None => trimmed,
    }
}
