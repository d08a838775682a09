//! Register decoding.
//!
//! Turns the bytes returned by a holding-register read into a typed
//! [`RegisterValue`]. Decoding never fails: an unknown type tag, or too few
//! bytes for a fixed-width type, yields the raw bytes unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

use fieldlink_common::telemetry::RegisterValue;

/// Declared interpretation of a sensor's register bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DataType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Uint64,
    Int64,
    Float32,
    Float64,
    Bool,
    String,
    Hex,
    Bcd,
    /// Unrecognized tag, decoded as raw bytes.
    Other(std::string::String),
}

impl DataType {
    /// The configuration tag for this type.
    pub fn as_str(&self) -> &str {
        match self {
            DataType::Uint8 => "uint8",
            DataType::Int8 => "int8",
            DataType::Uint16 => "uint16",
            DataType::Int16 => "int16",
            DataType::Uint32 => "uint32",
            DataType::Int32 => "int32",
            DataType::Uint64 => "uint64",
            DataType::Int64 => "int64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Bool => "bool",
            DataType::String => "string",
            DataType::Hex => "hex",
            DataType::Bcd => "bcd",
            DataType::Other(tag) => tag,
        }
    }
}

impl From<std::string::String> for DataType {
    fn from(tag: std::string::String) -> Self {
        match tag.as_str() {
            "uint8" => DataType::Uint8,
            "int8" => DataType::Int8,
            "uint16" => DataType::Uint16,
            "int16" => DataType::Int16,
            "uint32" => DataType::Uint32,
            "int32" => DataType::Int32,
            "uint64" => DataType::Uint64,
            "int64" => DataType::Int64,
            "float32" => DataType::Float32,
            "float64" => DataType::Float64,
            "bool" => DataType::Bool,
            "string" => DataType::String,
            "hex" => DataType::Hex,
            "bcd" => DataType::Bcd,
            _ => DataType::Other(tag),
        }
    }
}

impl From<&str> for DataType {
    fn from(tag: &str) -> Self {
        DataType::from(tag.to_string())
    }
}

impl From<DataType> for std::string::String {
    fn from(data_type: DataType) -> Self {
        match data_type {
            DataType::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Flatten 16-bit registers into the big-endian byte stream the device sent.
pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
    registers.iter().flat_map(|r| r.to_be_bytes()).collect()
}

/// Decode register bytes according to `data_type`.
pub fn decode(data: &[u8], data_type: &DataType) -> RegisterValue {
    let value = match data_type {
        DataType::Hex => Some(RegisterValue::Hex(to_hex(data))),
        DataType::Bcd => Some(RegisterValue::Bcd(bcd_to_u64(data))),
        DataType::Uint8 => be_bytes::<1>(data).map(|b| RegisterValue::U8(u8::from_be_bytes(b))),
        DataType::Int8 => be_bytes::<1>(data).map(|b| RegisterValue::I8(i8::from_be_bytes(b))),
        DataType::Uint16 => be_bytes::<2>(data).map(|b| RegisterValue::U16(u16::from_be_bytes(b))),
        DataType::Int16 => be_bytes::<2>(data).map(|b| RegisterValue::I16(i16::from_be_bytes(b))),
        DataType::Uint32 => be_bytes::<4>(data).map(|b| RegisterValue::U32(u32::from_be_bytes(b))),
        DataType::Int32 => be_bytes::<4>(data).map(|b| RegisterValue::I32(i32::from_be_bytes(b))),
        DataType::Uint64 => be_bytes::<8>(data).map(|b| RegisterValue::U64(u64::from_be_bytes(b))),
        DataType::Int64 => be_bytes::<8>(data).map(|b| RegisterValue::I64(i64::from_be_bytes(b))),
        DataType::Float32 => {
            be_bytes::<4>(data).map(|b| RegisterValue::F32(f32::from_be_bytes(b)))
        }
        DataType::Float64 => {
            be_bytes::<8>(data).map(|b| RegisterValue::F64(f64::from_be_bytes(b)))
        }
        DataType::Bool => data.first().map(|b| RegisterValue::Bool(*b != 0)),
        DataType::String => Some(RegisterValue::Text(
            std::string::String::from_utf8_lossy(data).into_owned(),
        )),
        DataType::Other(_) => None,
    };

    value.unwrap_or_else(|| RegisterValue::Raw(data.to_vec()))
}

/// Leading `N` bytes, if present. Extra bytes are ignored.
fn be_bytes<const N: usize>(data: &[u8]) -> Option<[u8; N]> {
    data.get(..N)?.try_into().ok()
}

fn to_hex(data: &[u8]) -> std::string::String {
    use std::fmt::Write;

    let mut out = std::string::String::with_capacity(data.len() * 2);
    for byte in data {
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

/// Each nibble is one decimal digit, most significant byte first.
fn bcd_to_u64(data: &[u8]) -> u64 {
    data.iter().fold(0u64, |acc, byte| {
        let hi = u64::from(byte >> 4);
        let lo = u64::from(byte & 0x0F);
        acc.wrapping_mul(100).wrapping_add(hi * 10 + lo)
    })
}
