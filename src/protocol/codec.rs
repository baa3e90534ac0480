//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Value Wire Format
//!
//! One tag byte followed by a tag-specific payload:
//!
//! ```text
//! 0x00 NULL    (no payload)
//! 0x01 BOOL    1 byte (nonzero = true)
//! 0x02 INT     i64, big-endian
//! 0x03 FLOAT   f64 bit pattern, big-endian
//! 0x04 STR     u32 len + UTF-8 bytes
//! 0x05 LIST    u32 count + count values
//! 0x06 MAP     u32 count + count (string, value) pairs
//! ```
//!
//! Strings everywhere are `u32` big-endian length + UTF-8 bytes. Lengths
//! and element counts are capped so a malformed or hostile frame cannot
//! force huge allocations, and value nesting is depth-limited so it
//! cannot blow the decoder's stack.

use std::io::{ErrorKind, Read, Write};

use crate::error::{BusError, Result};
use super::{PersistenceLevel, Value};

/// Maximum encoded string length (16 MB)
pub const MAX_STRING_LEN: u32 = 16 * 1024 * 1024;

/// Maximum list/map element count per collection
pub const MAX_COLLECTION_LEN: u32 = 1024 * 1024;

/// Maximum value nesting depth
pub const MAX_VALUE_DEPTH: usize = 64;

// Value tag bytes
const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_STR: u8 = 0x04;
const TAG_LIST: u8 = 0x05;
const TAG_MAP: u8 = 0x06;

// =============================================================================
// Low-level reads
// =============================================================================

/// Read exactly one byte, mapping clean EOF to `Disconnected`.
///
/// Used only for the first byte of a frame, where end-of-stream means the
/// peer hung up between frames rather than mid-frame.
fn read_u8_or_disconnect<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(buf[0]),
        Err(ref e) if e.kind() == ErrorKind::UnexpectedEof => Err(BusError::Disconnected),
        Err(e) => Err(e.into()),
    }
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader
        .read_exact(&mut buf)
        .map_err(|e| truncated(e, "byte"))?;
    Ok(buf[0])
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| truncated(e, "u32"))?;
    Ok(u32::from_be_bytes(buf))
}

/// Map mid-frame EOF to a decode error; pass other I/O errors through
fn truncated(e: std::io::Error, what: &str) -> BusError {
    if e.kind() == ErrorKind::UnexpectedEof {
        BusError::Decode(format!("Truncated frame: expected {}", what))
    } else {
        e.into()
    }
}

// =============================================================================
// String Encoding/Decoding
// =============================================================================

/// Write a length-prefixed UTF-8 string
pub fn write_string<W: Write>(writer: &mut W, s: &str) -> Result<()> {
    if s.len() > MAX_STRING_LEN as usize {
        return Err(BusError::Protocol(format!(
            "String too long: {} bytes (max {})",
            s.len(),
            MAX_STRING_LEN
        )));
    }
    writer.write_all(&(s.len() as u32).to_be_bytes())?;
    writer.write_all(s.as_bytes())?;
    Ok(())
}

/// Read a length-prefixed UTF-8 string
pub fn read_string<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_u32(reader)?;
    if len > MAX_STRING_LEN {
        return Err(BusError::Decode(format!(
            "String too long: {} bytes (max {})",
            len, MAX_STRING_LEN
        )));
    }

    let mut bytes = vec![0u8; len as usize];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| truncated(e, "string bytes"))?;

    String::from_utf8(bytes).map_err(|e| BusError::Decode(format!("Invalid UTF-8 string: {}", e)))
}

/// Read a length-prefixed string whose first byte marks a frame boundary.
///
/// Clean EOF before the length prefix surfaces as `Disconnected`;
/// truncation after the first byte is a decode error.
fn read_string_or_disconnect<R: Read>(reader: &mut R) -> Result<String> {
    let first = read_u8_or_disconnect(reader)?;
    let mut rest = [0u8; 3];
    reader
        .read_exact(&mut rest)
        .map_err(|e| truncated(e, "string length"))?;
    let len = u32::from_be_bytes([first, rest[0], rest[1], rest[2]]);
    if len > MAX_STRING_LEN {
        return Err(BusError::Decode(format!(
            "String too long: {} bytes (max {})",
            len, MAX_STRING_LEN
        )));
    }

    let mut bytes = vec![0u8; len as usize];
    reader
        .read_exact(&mut bytes)
        .map_err(|e| truncated(e, "string bytes"))?;

    String::from_utf8(bytes).map_err(|e| BusError::Decode(format!("Invalid UTF-8 string: {}", e)))
}

// =============================================================================
// Value Encoding/Decoding
// =============================================================================

/// Write one self-delimiting value
pub fn write_value<W: Write>(writer: &mut W, value: &Value) -> Result<()> {
    match value {
        Value::Null => writer.write_all(&[TAG_NULL])?,
        Value::Bool(b) => writer.write_all(&[TAG_BOOL, *b as u8])?,
        Value::Int(i) => {
            writer.write_all(&[TAG_INT])?;
            writer.write_all(&i.to_be_bytes())?;
        }
        Value::Float(f) => {
            writer.write_all(&[TAG_FLOAT])?;
            writer.write_all(&f.to_bits().to_be_bytes())?;
        }
        Value::Str(s) => {
            writer.write_all(&[TAG_STR])?;
            write_string(writer, s)?;
        }
        Value::List(items) => {
            if items.len() > MAX_COLLECTION_LEN as usize {
                return Err(BusError::Protocol(format!(
                    "List too long: {} elements (max {})",
                    items.len(),
                    MAX_COLLECTION_LEN
                )));
            }
            writer.write_all(&[TAG_LIST])?;
            writer.write_all(&(items.len() as u32).to_be_bytes())?;
            for item in items {
                write_value(writer, item)?;
            }
        }
        Value::Map(entries) => {
            if entries.len() > MAX_COLLECTION_LEN as usize {
                return Err(BusError::Protocol(format!(
                    "Map too long: {} entries (max {})",
                    entries.len(),
                    MAX_COLLECTION_LEN
                )));
            }
            writer.write_all(&[TAG_MAP])?;
            writer.write_all(&(entries.len() as u32).to_be_bytes())?;
            for (key, item) in entries {
                write_string(writer, key)?;
                write_value(writer, item)?;
            }
        }
    }
    Ok(())
}

/// Read one self-delimiting value
pub fn read_value<R: Read>(reader: &mut R) -> Result<Value> {
    read_value_at(reader, 0)
}

fn read_value_at<R: Read>(reader: &mut R, depth: usize) -> Result<Value> {
    if depth > MAX_VALUE_DEPTH {
        return Err(BusError::Decode(format!(
            "Value nesting too deep (max {})",
            MAX_VALUE_DEPTH
        )));
    }

    let tag = read_u8(reader)?;
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_BOOL => Ok(Value::Bool(read_u8(reader)? != 0)),
        TAG_INT => {
            let mut buf = [0u8; 8];
            reader
                .read_exact(&mut buf)
                .map_err(|e| truncated(e, "i64"))?;
            Ok(Value::Int(i64::from_be_bytes(buf)))
        }
        TAG_FLOAT => {
            let mut buf = [0u8; 8];
            reader
                .read_exact(&mut buf)
                .map_err(|e| truncated(e, "f64"))?;
            Ok(Value::Float(f64::from_bits(u64::from_be_bytes(buf))))
        }
        TAG_STR => Ok(Value::Str(read_string(reader)?)),
        TAG_LIST => {
            let count = read_u32(reader)?;
            if count > MAX_COLLECTION_LEN {
                return Err(BusError::Decode(format!(
                    "List too long: {} elements (max {})",
                    count, MAX_COLLECTION_LEN
                )));
            }
            let mut items = Vec::with_capacity(count.min(4096) as usize);
            for _ in 0..count {
                items.push(read_value_at(reader, depth + 1)?);
            }
            Ok(Value::List(items))
        }
        TAG_MAP => {
            let count = read_u32(reader)?;
            if count > MAX_COLLECTION_LEN {
                return Err(BusError::Decode(format!(
                    "Map too long: {} entries (max {})",
                    count, MAX_COLLECTION_LEN
                )));
            }
            let mut entries = std::collections::BTreeMap::new();
            for _ in 0..count {
                let key = read_string(reader)?;
                let item = read_value_at(reader, depth + 1)?;
                entries.insert(key, item);
            }
            Ok(Value::Map(entries))
        }
        _ => Err(BusError::Decode(format!("Unknown value tag: 0x{:02x}", tag))),
    }
}

// =============================================================================
// Frame I/O
// =============================================================================

/// Write the connect handshake: source identity + no-echo flag
pub fn write_handshake<W: Write>(writer: &mut W, source: &str, no_echo: bool) -> Result<()> {
    write_string(writer, source)?;
    writer.write_all(&[no_echo as u8])?;
    Ok(())
}

/// Read the connect handshake
pub fn read_handshake<R: Read>(reader: &mut R) -> Result<(String, bool)> {
    let source = read_string_or_disconnect(reader)?;
    let no_echo = read_u8(reader)? != 0;
    Ok((source, no_echo))
}

/// Write one client message frame: level + record + value
pub fn write_message<W: Write>(
    writer: &mut W,
    level: PersistenceLevel,
    record: &str,
    value: &Value,
) -> Result<()> {
    writer.write_all(&[level.as_byte()])?;
    write_string(writer, record)?;
    write_value(writer, value)?;
    Ok(())
}

/// Read one client message frame
///
/// Returns `Disconnected` when the stream ends cleanly before the level
/// byte; any failure after that terminates the connection as a decode or
/// I/O error.
pub fn read_message<R: Read>(reader: &mut R) -> Result<(PersistenceLevel, String, Value)> {
    let level = PersistenceLevel::from_byte(read_u8_or_disconnect(reader)?)?;
    let record = read_string(reader)?;
    let value = read_value(reader)?;
    Ok((level, record, value))
}

/// Encode one broadcast frame: source + record + value
///
/// Encoded once per dispatch and fanned out to every connection's queue.
pub fn encode_broadcast(source: &str, record: &str, value: &Value) -> Result<Vec<u8>> {
    let mut frame = Vec::with_capacity(16 + source.len() + record.len());
    write_string(&mut frame, source)?;
    write_string(&mut frame, record)?;
    write_value(&mut frame, value)?;
    Ok(frame)
}

/// Read one broadcast frame: source + record + value
pub fn read_broadcast<R: Read>(reader: &mut R) -> Result<(String, String, Value)> {
    let source = read_string_or_disconnect(reader)?;
    let record = read_string(reader)?;
    let value = read_value(reader)?;
    Ok((source, record, value))
}
