//! Row and key codec.
//!
//! Rows are stored as self-describing byte strings so a table definition can
//! gain columns without rewriting existing rows.

use crate::error::Error;
use ormgraph_proto::{Row, Value};

/// Type tag for encoded values.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueTag {
    Null = 0,
    Bool = 1,
    Int32 = 2,
    Int64 = 3,
    Float64 = 4,
    String = 5,
    Bytes = 6,
    Uuid = 7,
    Timestamp = 8,
}

impl TryFrom<u8> for ValueTag {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ValueTag::Null),
            1 => Ok(ValueTag::Bool),
            2 => Ok(ValueTag::Int32),
            3 => Ok(ValueTag::Int64),
            4 => Ok(ValueTag::Float64),
            5 => Ok(ValueTag::String),
            6 => Ok(ValueTag::Bytes),
            7 => Ok(ValueTag::Uuid),
            8 => Ok(ValueTag::Timestamp),
            _ => Err(Error::InvalidData(format!("Unknown value tag: {}", value))),
        }
    }
}

/// Encode a row to bytes.
///
/// Format:
/// - Column count (4 bytes, little-endian)
/// - For each column:
///   - Column name length (2 bytes, little-endian)
///   - Column name (UTF-8 bytes)
///   - Value tag (1 byte)
///   - Value data (variable length, depends on type)
pub fn encode_row(row: &Row) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(row.len() as u32).to_le_bytes());

    for (name, value) in row.iter() {
        let name_bytes = name.as_bytes();
        if name_bytes.len() > u16::MAX as usize {
            return Err(Error::InvalidData("Column name too long".into()));
        }
        buf.extend_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        buf.extend_from_slice(name_bytes);
        encode_value(&mut buf, value)?;
    }

    Ok(buf)
}

/// Decode bytes back into a row.
pub fn decode_row(data: &[u8]) -> Result<Row, Error> {
    let mut cursor = 0;
    let count = read_u32(data, &mut cursor, "column count")? as usize;
    let mut pairs = Vec::with_capacity(count);

    for _ in 0..count {
        let name_len = read_u16(data, &mut cursor)? as usize;
        if cursor + name_len > data.len() {
            return Err(Error::InvalidData("Data too short for column name".into()));
        }
        let name = String::from_utf8(data[cursor..cursor + name_len].to_vec())
            .map_err(|_| Error::InvalidData("Invalid UTF-8 in column name".into()))?;
        cursor += name_len;

        let (value, bytes_read) = decode_value(&data[cursor..])?;
        cursor += bytes_read;
        pairs.push((name, value));
    }

    Ok(Row::from_pairs(pairs))
}

/// Encode key column values into a tree key.
pub fn encode_key(values: &[&Value]) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    for value in values {
        encode_value(&mut buf, value)?;
    }
    Ok(buf)
}

/// Encode a single value to the buffer.
fn encode_value(buf: &mut Vec<u8>, value: &Value) -> Result<(), Error> {
    match value {
        Value::Null => buf.push(ValueTag::Null as u8),
        Value::Bool(b) => {
            buf.push(ValueTag::Bool as u8);
            buf.push(u8::from(*b));
        }
        Value::Int32(n) => {
            buf.push(ValueTag::Int32 as u8);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Value::Int64(n) => {
            buf.push(ValueTag::Int64 as u8);
            buf.extend_from_slice(&n.to_le_bytes());
        }
        Value::Float64(f) => {
            buf.push(ValueTag::Float64 as u8);
            buf.extend_from_slice(&f.to_le_bytes());
        }
        Value::String(s) => {
            buf.push(ValueTag::String as u8);
            write_len_prefixed(buf, s.as_bytes())?;
        }
        Value::Bytes(b) => {
            buf.push(ValueTag::Bytes as u8);
            write_len_prefixed(buf, b)?;
        }
        Value::Uuid(uuid) => {
            buf.push(ValueTag::Uuid as u8);
            buf.extend_from_slice(uuid);
        }
        Value::Timestamp(ts) => {
            buf.push(ValueTag::Timestamp as u8);
            buf.extend_from_slice(&ts.to_le_bytes());
        }
    }
    Ok(())
}

fn write_len_prefixed(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), Error> {
    if bytes.len() > u32::MAX as usize {
        return Err(Error::InvalidData("Value too long".into()));
    }
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// Decode a single value, returning it with the number of bytes consumed.
fn decode_value(data: &[u8]) -> Result<(Value, usize), Error> {
    if data.is_empty() {
        return Err(Error::InvalidData("Empty data for value".into()));
    }
    let tag = ValueTag::try_from(data[0])?;
    let body = &data[1..];

    let (value, size) = match tag {
        ValueTag::Null => (Value::Null, 0),
        ValueTag::Bool => {
            let b = *body
                .first()
                .ok_or_else(|| Error::InvalidData("Data too short for bool".into()))?;
            (Value::Bool(b != 0), 1)
        }
        ValueTag::Int32 => (Value::Int32(i32::from_le_bytes(fixed(body)?)), 4),
        ValueTag::Int64 => (Value::Int64(i64::from_le_bytes(fixed(body)?)), 8),
        ValueTag::Float64 => (Value::Float64(f64::from_le_bytes(fixed(body)?)), 8),
        ValueTag::Timestamp => (Value::Timestamp(i64::from_le_bytes(fixed(body)?)), 8),
        ValueTag::Uuid => (Value::Uuid(fixed(body)?), 16),
        ValueTag::String => {
            let (bytes, size) = read_len_prefixed(body)?;
            let s = String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::InvalidData("Invalid UTF-8 in string".into()))?;
            (Value::String(s), size)
        }
        ValueTag::Bytes => {
            let (bytes, size) = read_len_prefixed(body)?;
            (Value::Bytes(bytes.to_vec()), size)
        }
    };

    Ok((value, 1 + size))
}

fn fixed<const N: usize>(data: &[u8]) -> Result<[u8; N], Error> {
    data.get(..N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| Error::InvalidData(format!("Data too short for {}-byte value", N)))
}

fn read_len_prefixed(data: &[u8]) -> Result<(&[u8], usize), Error> {
    let len = u32::from_le_bytes(fixed(data)?) as usize;
    if data.len() < 4 + len {
        return Err(Error::InvalidData("Data too short for string/bytes".into()));
    }
    Ok((&data[4..4 + len], 4 + len))
}

fn read_u32(data: &[u8], cursor: &mut usize, what: &str) -> Result<u32, Error> {
    let bytes: [u8; 4] = data
        .get(*cursor..*cursor + 4)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| Error::InvalidData(format!("Data too short for {}", what)))?;
    *cursor += 4;
    Ok(u32::from_le_bytes(bytes))
}

fn read_u16(data: &[u8], cursor: &mut usize) -> Result<u16, Error> {
    let bytes: [u8; 2] = data
        .get(*cursor..*cursor + 2)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| Error::InvalidData("Data too short for column name length".into()))?;
    *cursor += 2;
    Ok(u16::from_le_bytes(bytes))
}
