// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! OSC 1.0 wire codec.
//!
//! Messages are an address string, a type tag string starting with `,`, and
//! big-endian arguments. Strings and blobs are padded to 4 bytes.
//!
//! ## Supported Types
//!
//! - `i` int32, `h` int64, `f` float32, `d` float64
//! - `s` string, `S` symbol, `b` blob, `c` char
//! - `t` timetag, `r` RGBA color, `m` MIDI message
//! - `T` true, `F` false, `N` nil, `I` impulse
//!
//! Bundles (`#bundle`) are decoded recursively so their messages can be
//! routed one by one.

use thiserror::Error;

/// Bundle marker, NUL terminated.
pub const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Maximum bundle nesting accepted when decoding.
pub const MAX_BUNDLE_DEPTH: usize = 8;

/// Timetag meaning "immediately".
pub const IMMEDIATE: u64 = 1;

/// OSC codec errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OscError {
    #[error("packet length {0} is not a multiple of 4")]
    Misaligned(usize),

    #[error("packet truncated at offset {0}")]
    Truncated(usize),

    #[error("unterminated string at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid UTF-8 in string at offset {0}")]
    InvalidUtf8(usize),

    #[error("address '{0}' does not start with '/'")]
    InvalidAddress(String),

    #[error("type tag string does not start with ','")]
    InvalidTypeTags,

    #[error("unsupported type tag '{0}'")]
    UnsupportedTag(char),

    #[error("invalid char code {0:#x}")]
    InvalidChar(u32),

    #[error("invalid bundle element size {0}")]
    InvalidElementSize(i32),

    #[error("bundle nesting exceeds {} levels", MAX_BUNDLE_DEPTH)]
    NestingTooDeep,
}

/// A typed OSC argument.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    Int(i32),
    Float(f32),
    String(String),
    Blob(Vec<u8>),
    Long(i64),
    Double(f64),
    TimeTag(u64),
    Symbol(String),
    Char(char),
    Rgba(u32),
    Midi([u8; 4]),
    True,
    False,
    Nil,
    Impulse,
}

impl OscArg {
    /// Type tag character.
    pub fn tag(&self) -> char {
        match self {
            Self::Int(_) => 'i',
            Self::Float(_) => 'f',
            Self::String(_) => 's',
            Self::Blob(_) => 'b',
            Self::Long(_) => 'h',
            Self::Double(_) => 'd',
            Self::TimeTag(_) => 't',
            Self::Symbol(_) => 'S',
            Self::Char(_) => 'c',
            Self::Rgba(_) => 'r',
            Self::Midi(_) => 'm',
            Self::True => 'T',
            Self::False => 'F',
            Self::Nil => 'N',
            Self::Impulse => 'I',
        }
    }
}

/// An OSC message.
#[derive(Debug, Clone, PartialEq)]
pub struct OscMessage {
    pub path: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(path: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            path: path.into(),
            args,
        }
    }

    /// Type tag string including the leading comma.
    pub fn type_tags(&self) -> String {
        std::iter::once(',')
            .chain(self.args.iter().map(OscArg::tag))
            .collect()
    }

    /// Encode this message.
    pub fn encode(&self) -> Vec<u8> {
        encode_message(&self.path, &self.args)
    }
}

/// An OSC bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct OscBundle {
    pub timetag: u64,
    pub content: Vec<OscPacket>,
}

impl OscBundle {
    /// Encode this bundle and its elements.
    pub fn encode(&self) -> Vec<u8> {
        let mut encoder = OscEncoder::new();
        encoder.write_bytes(BUNDLE_TAG);
        encoder.write_u64(self.timetag);
        for element in &self.content {
            let bytes = element.encode();
            encoder.write_i32(bytes.len() as i32);
            encoder.write_bytes(&bytes);
        }
        encoder.finish()
    }
}

/// A decoded datagram.
#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle(OscBundle),
}

impl OscPacket {
    /// Decode one datagram.
    pub fn decode(buf: &[u8]) -> Result<Self, OscError> {
        decode_packet(buf, 0)
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Message(msg) => msg.encode(),
            Self::Bundle(bundle) => bundle.encode(),
        }
    }

    /// All messages in this packet, bundles flattened in order.
    pub fn into_messages(self) -> Vec<OscMessage> {
        let mut out = Vec::new();
        self.collect_messages(&mut out);
        out
    }

    fn collect_messages(self, out: &mut Vec<OscMessage>) {
        match self {
            Self::Message(msg) => out.push(msg),
            Self::Bundle(bundle) => {
                for element in bundle.content {
                    element.collect_messages(out);
                }
            }
        }
    }
}

/// Encode a message from borrowed parts, so forwarding a rewritten path does
/// not need an owned copy of the arguments.
pub fn encode_message(path: &str, args: &[OscArg]) -> Vec<u8> {
    let mut encoder = OscEncoder::new();
    encoder.write_string(path);

    let tags: String = std::iter::once(',').chain(args.iter().map(OscArg::tag)).collect();
    encoder.write_string(&tags);

    for arg in args {
        match arg {
            OscArg::Int(v) => encoder.write_i32(*v),
            OscArg::Float(v) => encoder.write_bytes(&v.to_be_bytes()),
            OscArg::String(s) | OscArg::Symbol(s) => encoder.write_string(s),
            OscArg::Blob(b) => encoder.write_blob(b),
            OscArg::Long(v) => encoder.write_bytes(&v.to_be_bytes()),
            OscArg::Double(v) => encoder.write_bytes(&v.to_be_bytes()),
            OscArg::TimeTag(v) => encoder.write_u64(*v),
            OscArg::Char(c) => encoder.write_bytes(&(*c as u32).to_be_bytes()),
            OscArg::Rgba(v) => encoder.write_bytes(&v.to_be_bytes()),
            OscArg::Midi(m) => encoder.write_bytes(m),
            OscArg::True | OscArg::False | OscArg::Nil | OscArg::Impulse => {}
        }
    }

    encoder.finish()
}

fn decode_packet(buf: &[u8], depth: usize) -> Result<OscPacket, OscError> {
    if buf.len() % 4 != 0 {
        return Err(OscError::Misaligned(buf.len()));
    }

    if buf.starts_with(BUNDLE_TAG) {
        if depth >= MAX_BUNDLE_DEPTH {
            return Err(OscError::NestingTooDeep);
        }
        return decode_bundle(buf, depth).map(OscPacket::Bundle);
    }

    decode_message(buf).map(OscPacket::Message)
}

fn decode_bundle(buf: &[u8], depth: usize) -> Result<OscBundle, OscError> {
    let mut decoder = OscDecoder::new(buf);
    decoder.read_bytes(BUNDLE_TAG.len())?;
    let timetag = decoder.read_u64()?;

    let mut content = Vec::new();
    while !decoder.is_empty() {
        let size = decoder.read_i32()?;
        if size < 0 || size % 4 != 0 {
            return Err(OscError::InvalidElementSize(size));
        }
        let element = decoder.read_bytes(size as usize)?;
        content.push(decode_packet(element, depth + 1)?);
    }

    Ok(OscBundle { timetag, content })
}

fn decode_message(buf: &[u8]) -> Result<OscMessage, OscError> {
    let mut decoder = OscDecoder::new(buf);

    let path = decoder.read_string()?;
    if !path.starts_with('/') {
        return Err(OscError::InvalidAddress(path));
    }

    // Type tags may be omitted by old senders: no arguments then.
    if decoder.is_empty() {
        return Ok(OscMessage::new(path, Vec::new()));
    }

    let tags = decoder.read_string()?;
    let Some(tags) = tags.strip_prefix(',') else {
        return Err(OscError::InvalidTypeTags);
    };

    let mut args = Vec::with_capacity(tags.len());
    for tag in tags.chars() {
        let arg = match tag {
            'i' => OscArg::Int(decoder.read_i32()?),
            'f' => OscArg::Float(f32::from_be_bytes(decoder.read_array()?)),
            's' => OscArg::String(decoder.read_string()?),
            'S' => OscArg::Symbol(decoder.read_string()?),
            'b' => OscArg::Blob(decoder.read_blob()?),
            'h' => OscArg::Long(i64::from_be_bytes(decoder.read_array()?)),
            'd' => OscArg::Double(f64::from_be_bytes(decoder.read_array()?)),
            't' => OscArg::TimeTag(decoder.read_u64()?),
            'c' => {
                let code = decoder.read_u32()?;
                OscArg::Char(char::from_u32(code).ok_or(OscError::InvalidChar(code))?)
            }
            'r' => OscArg::Rgba(decoder.read_u32()?),
            'm' => OscArg::Midi(decoder.read_array()?),
            'T' => OscArg::True,
            'F' => OscArg::False,
            'N' => OscArg::Nil,
            'I' => OscArg::Impulse,
            other => return Err(OscError::UnsupportedTag(other)),
        };
        args.push(arg);
    }

    Ok(OscMessage::new(path, args))
}

/// Growable big-endian encoder with 4-byte padding.
struct OscEncoder {
    buf: Vec<u8>,
}

impl OscEncoder {
    fn new() -> Self {
        Self {
            buf: Vec::with_capacity(64),
        }
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn pad(&mut self) {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
    }

    fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_be_bytes());
    }

    fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_be_bytes());
    }

    /// NUL terminated, then padded. A string whose length is a multiple of 4
    /// still gets a full word of NULs.
    fn write_string(&mut self, value: &str) {
        self.write_bytes(value.as_bytes());
        self.buf.push(0);
        self.pad();
    }

    fn write_blob(&mut self, value: &[u8]) {
        self.write_i32(value.len() as i32);
        self.write_bytes(value);
        self.pad();
    }
}

/// Big-endian decoder over a borrowed datagram.
struct OscDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> OscDecoder<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], OscError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(OscError::Truncated(self.pos))?;
        let buf = self.buf;
        let bytes = &buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], OscError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    fn read_i32(&mut self) -> Result<i32, OscError> {
        self.read_array().map(i32::from_be_bytes)
    }

    fn read_u32(&mut self) -> Result<u32, OscError> {
        self.read_array().map(u32::from_be_bytes)
    }

    fn read_u64(&mut self) -> Result<u64, OscError> {
        self.read_array().map(u64::from_be_bytes)
    }

    fn skip_padding(&mut self) -> Result<(), OscError> {
        let padding = (4 - self.pos % 4) % 4;
        self.read_bytes(padding).map(|_| ())
    }

    fn read_string(&mut self) -> Result<String, OscError> {
        let start = self.pos;
        let rest = &self.buf[start..];
        let len = rest
            .iter()
            .position(|b| *b == 0)
            .ok_or(OscError::UnterminatedString(start))?;

        let text = std::str::from_utf8(&rest[..len])
            .map_err(|_| OscError::InvalidUtf8(start))?
            .to_string();

        self.pos = start + len + 1;
        self.skip_padding()?;
        Ok(text)
    }

    fn read_blob(&mut self) -> Result<Vec<u8>, OscError> {
        let len = self.read_i32()?;
        let len = usize::try_from(len).map_err(|_| OscError::Truncated(self.pos))?;
        let bytes = self.read_bytes(len)?.to_vec();
        self.skip_padding()?;
        Ok(bytes)
    }
}
