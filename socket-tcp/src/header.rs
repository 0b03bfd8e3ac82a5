//! Wire-format definitions for protocol segments.
//!
//! Every datagram exchanged between peers is a [`Segment`]: a textual control
//! [`Header`] followed by an optional payload.  This module is responsible for:
//! - Rendering a [`Header`] as delimited text and parsing it back.
//! - Splitting a combined header+payload datagram into its two parts.
//! - Partitioning an outbound message into byte-capped chunks.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All fields are UTF-8 text separated by [`DELIMITER`]:
//!
//! ```text
//!  <syn:0|1>|||<ack:0|1>|||<fin:0|1>|||<seq:decimal>|||<payload>
//! ```
//!
//! The payload is empty for pure control segments (handshake, ACK, FIN).

use std::fmt;

use thiserror::Error;

/// Field separator on the wire.
pub const DELIMITER: &str = "|||";

/// Default cap, in encoded bytes, of one data chunk.
pub const CHUNK_SIZE: usize = 64;

/// Number of header fields preceding the payload.
const HEADER_FIELDS: usize = 4;

/// Control header of one segment.
///
/// Only {SYN}, {SYN,ACK}, {ACK}, {FIN}, {FIN,ACK} and plain data (no flags)
/// are ever produced.  Any other combination decodes fine and simply never
/// compares equal to an expected header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    /// Synchronise sequence numbers (handshake).
    pub syn: bool,
    /// Acknowledges the previous segment.
    pub ack: bool,
    /// Sender has no more data to send.
    pub fin: bool,
    /// Cumulative byte-sequence marker.
    pub seq: u64,
}

impl Header {
    pub fn syn(seq: u64) -> Self {
        Self { syn: true, seq, ..Self::default() }
    }

    pub fn syn_ack(seq: u64) -> Self {
        Self { syn: true, ack: true, seq, ..Self::default() }
    }

    pub fn ack(seq: u64) -> Self {
        Self { ack: true, seq, ..Self::default() }
    }

    pub fn fin(seq: u64) -> Self {
        Self { fin: true, seq, ..Self::default() }
    }

    pub fn fin_ack(seq: u64) -> Self {
        Self { ack: true, fin: true, seq, ..Self::default() }
    }

    /// Header of a plain data segment.
    pub fn data(seq: u64) -> Self {
        Self { seq, ..Self::default() }
    }

    /// `true` when no flag is set.
    pub fn is_data(&self) -> bool {
        !(self.syn || self.ack || self.fin)
    }

    /// Render the header as `"{syn}|||{ack}|||{fin}|||{seq}|||"`.
    pub fn encode(&self) -> String {
        format!(
            "{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}{}{DELIMITER}",
            u8::from(self.syn),
            u8::from(self.ack),
            u8::from(self.fin),
            self.seq
        )
    }

    /// Parse the header at the start of `text`.
    ///
    /// The literal `"0"` is false; every other flag string is true.  Anything
    /// after the fourth delimiter is payload and is ignored here.
    pub fn decode(text: &str) -> Result<Self, HeaderError> {
        let fields = split_fields(text)?;
        let flag = |s: &str| s != "0";

        let seq = fields[3]
            .parse::<u64>()
            .map_err(|_| HeaderError::BadSeq(fields[3].to_owned()))?;

        Ok(Self {
            syn: flag(fields[0]),
            ack: flag(fields[1]),
            fin: flag(fields[2]),
            seq,
        })
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::with_capacity(3);
        if self.syn {
            names.push("SYN");
        }
        if self.ack {
            names.push("ACK");
        }
        if self.fin {
            names.push("FIN");
        }
        if names.is_empty() {
            names.push("DATA");
        }
        write!(f, "{} seq={}", names.join("+"), self.seq)
    }
}

/// Return everything after the header's fourth delimiter.
///
/// Text that does not contain a complete header yields an empty payload.
pub fn extract_payload(text: &str) -> &str {
    text.splitn(HEADER_FIELDS + 1, DELIMITER)
        .nth(HEADER_FIELDS)
        .unwrap_or("")
}

/// Split `text` into the four header fields, requiring the trailing delimiter.
fn split_fields(text: &str) -> Result<[&str; HEADER_FIELDS], HeaderError> {
    let mut parts = text.splitn(HEADER_FIELDS + 1, DELIMITER);
    let mut fields = [""; HEADER_FIELDS];
    for (i, slot) in fields.iter_mut().enumerate() {
        *slot = parts.next().ok_or(HeaderError::MissingFields(i))?;
    }
    // The payload part only exists if the fourth field was delimited.
    if parts.next().is_none() {
        return Err(HeaderError::MissingFields(HEADER_FIELDS - 1));
    }
    Ok(fields)
}

/// A complete protocol datagram: header + payload text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: Header,
    pub payload: String,
}

impl Segment {
    /// A payload-less control segment.
    pub fn control(header: Header) -> Self {
        Self { header, payload: String::new() }
    }

    pub fn new(header: Header, payload: impl Into<String>) -> Self {
        Self { header, payload: payload.into() }
    }

    /// Serialise into the UTF-8 bytes of one datagram.
    pub fn encode(&self) -> Vec<u8> {
        let mut text = self.header.encode();
        text.push_str(&self.payload);
        text.into_bytes()
    }

    /// Parse one received datagram.
    pub fn decode(buf: &[u8]) -> Result<Self, HeaderError> {
        let text = std::str::from_utf8(buf).map_err(|_| HeaderError::NotUtf8)?;
        let header = Header::decode(text)?;
        Ok(Self { header, payload: extract_payload(text).to_owned() })
    }

    /// Encoded byte length of the payload; this is what `seq` advances by.
    pub fn payload_len(&self) -> u64 {
        self.payload.len() as u64
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HeaderError {
    /// Fewer than four delimited fields; carries the index of the first
    /// missing field.
    #[error("header truncated: field {0} is missing or undelimited")]
    MissingFields(usize),
    /// The sequence field is not a non-negative integer.
    #[error("invalid sequence number {0:?}")]
    BadSeq(String),
    /// The datagram is not valid UTF-8.
    #[error("segment is not valid UTF-8")]
    NotUtf8,
}

/// Split `message` into chunks of at most `cap` encoded bytes.
///
/// Chunks end on `char` boundaries, so multi-byte characters are never split.
/// `cap` must be at least 4 (the widest UTF-8 character); [`crate::config::Config::validate`]
/// enforces that for the engine.
pub fn partition(message: &str, cap: usize) -> Vec<&str> {
    let mut chunks = Vec::with_capacity(message.len() / cap.max(1) + 1);
    let mut start = 0;
    let mut end = 0;

    for (i, c) in message.char_indices() {
        let next = i + c.len_utf8();
        if next - start > cap && end > start {
            chunks.push(&message[start..end]);
            start = end;
        }
        end = next;
    }
    if end > start {
        chunks.push(&message[start..end]);
    }
    chunks
}
