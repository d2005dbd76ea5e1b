//! Minimal IRC wire handling: a line codec for framed reads/writes and a
//! thin tokenizing view over one received line.
//!
//! The session layer only ever inspects lines by whitespace-split token
//! position, so there is no full message AST here. Lines arrive as raw
//! bytes; anything non-UTF-8 is replaced lossily rather than dropped, since
//! gline reasons occasionally carry latin-1 from older services.

use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Upper bound on one wire line. Servers cap at 512 octets but some bursts
/// exceed that with long reasons, so the guard is generous.
const MAX_LINE_LEN: usize = 4096;

/// One received server line with positional token access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerLine {
    raw: String,
}

impl ServerLine {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// The nth space-separated token, if present.
    pub fn token(&self, idx: usize) -> Option<&str> {
        self.raw.split(' ').nth(idx)
    }

    /// The command or numeric: the second token when the line carries a
    /// source prefix, the first otherwise.
    pub fn command(&self) -> Option<&str> {
        if self.raw.starts_with(':') {
            self.token(1)
        } else {
            self.token(0)
        }
    }

    /// The source prefix without its leading `:`, if the line has one.
    pub fn source(&self) -> Option<&str> {
        self.raw.strip_prefix(':').and_then(|rest| rest.split(' ').next())
    }

    /// The nick portion of the source prefix (`nick!user@host`).
    pub fn source_nick(&self) -> Option<&str> {
        self.source().map(|src| src.split('!').next().unwrap_or(src))
    }
}

/// Frames `\r\n`-terminated lines, tolerant of bare `\n`.
#[derive(Debug, Default)]
pub struct LineCodec;

impl Decoder for LineCodec {
    type Item = ServerLine;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ServerLine>, io::Error> {
        let Some(pos) = src.iter().position(|&b| b == b'\n') else {
            if src.len() > MAX_LINE_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "line exceeds maximum length",
                ));
            }
            return Ok(None);
        };
        let line = src.split_to(pos + 1);
        let text = String::from_utf8_lossy(&line);
        let trimmed = text.trim_end_matches(['\r', '\n']);
        Ok(Some(ServerLine::new(trimmed)))
    }
}

impl Encoder<String> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.reserve(item.len() + 2);
        dst.put_slice(item.as_bytes());
        dst.put_slice(b"\r\n");
        Ok(())
    }
}
