use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use chrono::{DateTime, Utc};
use serde::ser::Error as _;
use serde::{Serialize, Serializer};

/// Value published in place of a reading when the device could not be reached.
pub const DEFAULT_FAILURE_SENTINEL: &str = "abc";

/// A decoded register value.
///
/// Each variant renders to its natural JSON form: integers and floats as
/// numbers, `Bool` as a boolean, `Text` and `Hex` as strings, `Bcd` as a
/// number and `Raw` as a base64 string.
#[derive(Debug, Clone, PartialEq)]
pub enum RegisterValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Bool(bool),
    /// UTF-8 text, invalid sequences replaced.
    Text(String),
    /// Uppercase hexadecimal rendering of the raw bytes.
    Hex(String),
    /// Binary-coded decimal, accumulated most significant byte first.
    Bcd(u64),
    /// Undecoded bytes.
    Raw(Vec<u8>),
}

impl Serialize for RegisterValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RegisterValue::U8(v) => serializer.serialize_u8(*v),
            RegisterValue::I8(v) => serializer.serialize_i8(*v),
            RegisterValue::U16(v) => serializer.serialize_u16(*v),
            RegisterValue::I16(v) => serializer.serialize_i16(*v),
            RegisterValue::U32(v) => serializer.serialize_u32(*v),
            RegisterValue::I32(v) => serializer.serialize_i32(*v),
            RegisterValue::U64(v) | RegisterValue::Bcd(v) => serializer.serialize_u64(*v),
            RegisterValue::I64(v) => serializer.serialize_i64(*v),
            RegisterValue::F32(v) if v.is_finite() => serializer.serialize_f32(*v),
            RegisterValue::F64(v) if v.is_finite() => serializer.serialize_f64(*v),
            RegisterValue::F32(v) => Err(S::Error::custom(format!("unsupported value: {}", v))),
            RegisterValue::F64(v) => Err(S::Error::custom(format!("unsupported value: {}", v))),
            RegisterValue::Bool(v) => serializer.serialize_bool(*v),
            RegisterValue::Text(s) | RegisterValue::Hex(s) => serializer.serialize_str(s),
            RegisterValue::Raw(bytes) => serializer.serialize_str(&BASE64_STANDARD.encode(bytes)),
        }
    }
}

/// One observation of a register, as published to the broker.
///
/// The two variants have different wire shapes on purpose: a successful read
/// carries `starttimestamp`, a failed connection carries `ts`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReadingEnvelope {
    /// A decoded register value.
    Reading {
        register: String,
        value: RegisterValue,
        starttimestamp: DateTime<Utc>,
    },

    /// The device could not be reached; `value` is the failure sentinel.
    ConnectFailure {
        register: String,
        value: String,
        ts: DateTime<Utc>,
    },
}

impl ReadingEnvelope {
    /// Wrap a decoded value captured now.
    pub fn reading(register: impl Into<String>, value: RegisterValue) -> Self {
        ReadingEnvelope::Reading {
            register: register.into(),
            value,
            starttimestamp: Utc::now(),
        }
    }

    /// Build the sentinel envelope for a device that refused or timed out.
    pub fn connect_failure(register: impl Into<String>, sentinel: impl Into<String>) -> Self {
        ReadingEnvelope::ConnectFailure {
            register: register.into(),
            value: sentinel.into(),
            ts: Utc::now(),
        }
    }

    /// Register name this envelope belongs to.
    pub fn register(&self) -> &str {
        match self {
            ReadingEnvelope::Reading { register, .. }
            | ReadingEnvelope::ConnectFailure { register, .. } => register,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ReadingEnvelope::ConnectFailure { .. })
    }
}
