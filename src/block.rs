//! Definite-length binary blocks as sent in reply to `CURVE?`.
//!
//! A block looks like `#<N><length as N ASCII digits><payload>`, optionally followed by the
//! line terminator. The payload holds big-endian signed 16-bit samples.

use byteorder::{BigEndian, ByteOrder};

use crate::error::ParseError;

pub const BLOCK_MARKER: u8 = b'#';
pub const BYTES_PER_SAMPLE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Bytes taken by the marker, the digit count and the length field.
    pub header_len: usize,
    /// Payload bytes announced by the length field.
    pub payload_len: usize,
}

/// Number of ASCII length digits announced by the second byte of a block.
///
/// Accepts the ASCII digits `'1'..='9'` the scopes send as well as the raw values `1..=9`.
pub fn length_digit_count(byte: u8) -> Result<usize, ParseError> {
    match byte {
        b'1'..=b'9' => Ok(usize::from(byte - b'0')),
        1..=9 => Ok(usize::from(byte)),
        b'0' | 0 => Err(ParseError::BlockHeader(
            "indefinite-length blocks are not supported".to_string(),
        )),
        other => Err(ParseError::BlockHeader(format!(
            "invalid digit count byte 0x{other:02x}"
        ))),
    }
}

pub fn parse_block_header(buf: &[u8]) -> Result<BlockHeader, ParseError> {
    if buf.len() < 2 {
        return Err(ParseError::BlockHeader(format!(
            "expected at least 2 bytes, got {}",
            buf.len()
        )));
    }
    if buf[0] != BLOCK_MARKER {
        log::debug!("Block starts with 0x{:02x} instead of '#'", buf[0]);
    }

    let digits = length_digit_count(buf[1])?;
    let header_len = 2 + digits;
    let field = buf.get(2..header_len).ok_or_else(|| {
        ParseError::BlockHeader(format!(
            "length field needs {digits} digits but only {} bytes follow",
            buf.len() - 2
        ))
    })?;

    if !field.iter().all(u8::is_ascii_digit) {
        return Err(ParseError::BlockHeader(format!(
            "length field {:?} is not decimal",
            String::from_utf8_lossy(field)
        )));
    }
    // Only ASCII digits remain, so the conversion cannot fail.
    let payload_len = std::str::from_utf8(field)
        .ok()
        .and_then(|text| text.parse::<usize>().ok())
        .ok_or_else(|| ParseError::BlockHeader("length field overflows".to_string()))?;

    Ok(BlockHeader {
        header_len,
        payload_len,
    })
}

/// Decode the raw sample codes of a block.
///
/// Bytes after the announced payload are ignored, so a trailing terminator does no harm.
pub fn decode_block(buf: &[u8]) -> Result<Vec<i16>, ParseError> {
    let header = parse_block_header(buf)?;
    if header.payload_len % BYTES_PER_SAMPLE != 0 {
        return Err(ParseError::OddLength(header.payload_len));
    }

    let received = buf.len() - header.header_len;
    if received < header.payload_len {
        return Err(ParseError::Truncated {
            declared: header.payload_len,
            received,
        });
    }
    if received > header.payload_len {
        log::trace!(
            "Ignoring {} bytes after the block payload",
            received - header.payload_len
        );
    }

    let payload = &buf[header.header_len..header.header_len + header.payload_len];
    let mut samples = vec![0i16; payload.len() / BYTES_PER_SAMPLE];
    BigEndian::read_i16_into(payload, &mut samples);
    Ok(samples)
}
