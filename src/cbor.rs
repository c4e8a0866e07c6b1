//! Generic CBOR value model used for envelopes, claims and trust lists.
//!
//! Decoding is strict: trailing bytes, duplicate map keys and nesting
//! deeper than [`MAX_DEPTH`] are rejected.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use minicbor::data::{Tag, Type};
use minicbor::{Decoder, Encoder};

use crate::error::Error;

/// Maximum container nesting accepted by [`decode`].
pub const MAX_DEPTH: usize = 32;

/// Map key. Only integer and text keys occur in the formats handled here.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CborKey {
    Int(i64),
    Text(String),
}

impl From<i64> for CborKey {
    fn from(v: i64) -> Self {
        CborKey::Int(v)
    }
}

impl From<&str> for CborKey {
    fn from(v: &str) -> Self {
        CborKey::Text(v.to_string())
    }
}

impl std::fmt::Display for CborKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CborKey::Int(i) => write!(f, "{}", i),
            CborKey::Text(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CborValue {
    Int(i128),
    Float(f64),
    Bytes(Vec<u8>),
    Text(String),
    Array(Vec<CborValue>),
    Map(BTreeMap<CborKey, CborValue>),
    Bool(bool),
    Null,
    Tagged(u64, Box<CborValue>),
}

impl CborValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CborValue::Int(i) => i64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CborValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CborValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[CborValue]> {
        match self {
            CborValue::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<CborKey, CborValue>> {
        match self {
            CborValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up an integer key in a map value.
    pub fn get_int(&self, key: i64) -> Option<&CborValue> {
        self.as_map()?.get(&CborKey::Int(key))
    }

    /// Look up a text key in a map value.
    pub fn get_text(&self, key: &str) -> Option<&CborValue> {
        self.as_map()?.get(&CborKey::Text(key.to_string()))
    }

    /// Strip any number of enclosing tags.
    pub fn untagged(&self) -> &CborValue {
        let mut value = self;
        while let CborValue::Tagged(_, inner) = value {
            value = inner;
        }
        value
    }

    /// Convert to a JSON value.
    ///
    /// Map keys become strings, byte strings become standard base64 and
    /// tags are dropped. Non-finite floats become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;

        match self {
            CborValue::Int(i) => {
                if let Ok(v) = i64::try_from(*i) {
                    Value::from(v)
                } else if let Ok(v) = u64::try_from(*i) {
                    Value::from(v)
                } else {
                    Value::String(i.to_string())
                }
            }
            CborValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            CborValue::Bytes(b) => Value::String(STANDARD.encode(b)),
            CborValue::Text(s) => Value::String(s.clone()),
            CborValue::Array(items) => Value::Array(items.iter().map(|v| v.to_json()).collect()),
            CborValue::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_json()))
                    .collect(),
            ),
            CborValue::Bool(b) => Value::Bool(*b),
            CborValue::Null => Value::Null,
            CborValue::Tagged(_, inner) => inner.to_json(),
        }
    }
}

fn invalid(msg: impl std::fmt::Display) -> Error {
    Error::Envelope(format!("invalid CBOR: {}", msg))
}

/// Decode a single CBOR item that must span the whole input.
pub fn decode(bytes: &[u8]) -> Result<CborValue, Error> {
    let mut d = Decoder::new(bytes);
    let value = decode_value(&mut d, 0)?;
    if d.position() != bytes.len() {
        return Err(invalid(format!(
            "{} trailing bytes",
            bytes.len() - d.position()
        )));
    }
    Ok(value)
}

fn decode_value(d: &mut Decoder<'_>, depth: usize) -> Result<CborValue, Error> {
    if depth > MAX_DEPTH {
        return Err(invalid("nesting too deep"));
    }

    let ty = d.datatype().map_err(invalid)?;
    let value = match ty {
        Type::U8
        | Type::U16
        | Type::U32
        | Type::U64
        | Type::I8
        | Type::I16
        | Type::I32
        | Type::I64
        | Type::Int => CborValue::Int(i128::from(d.int().map_err(invalid)?)),
        Type::F16 => CborValue::Float(f64::from(d.f16().map_err(invalid)?)),
        Type::F32 => CborValue::Float(f64::from(d.f32().map_err(invalid)?)),
        Type::F64 => CborValue::Float(d.f64().map_err(invalid)?),
        Type::Bool => CborValue::Bool(d.bool().map_err(invalid)?),
        Type::Null => {
            d.null().map_err(invalid)?;
            CborValue::Null
        }
        Type::Undefined => {
            d.undefined().map_err(invalid)?;
            CborValue::Null
        }
        Type::Bytes | Type::BytesIndef => {
            let mut out = Vec::new();
            for chunk in d.bytes_iter().map_err(invalid)? {
                out.extend_from_slice(chunk.map_err(invalid)?);
            }
            CborValue::Bytes(out)
        }
        Type::String | Type::StringIndef => {
            let mut out = String::new();
            for chunk in d.str_iter().map_err(invalid)? {
                out.push_str(chunk.map_err(invalid)?);
            }
            CborValue::Text(out)
        }
        Type::Array | Type::ArrayIndef => {
            let len = d.array().map_err(invalid)?;
            let mut items = Vec::new();
            match len {
                Some(n) => {
                    for _ in 0..n {
                        items.push(decode_value(d, depth + 1)?);
                    }
                }
                None => {
                    while !at_break(d)? {
                        items.push(decode_value(d, depth + 1)?);
                    }
                }
            }
            CborValue::Array(items)
        }
        Type::Map | Type::MapIndef => {
            let len = d.map().map_err(invalid)?;
            let mut entries = BTreeMap::new();
            let mut read_entry = |d: &mut Decoder<'_>| -> Result<(), Error> {
                let key = decode_key(d)?;
                let value = decode_value(d, depth + 1)?;
                if entries.insert(key.clone(), value).is_some() {
                    return Err(invalid(format!("duplicate map key {}", key)));
                }
                Ok(())
            };
            match len {
                Some(n) => {
                    for _ in 0..n {
                        read_entry(d)?;
                    }
                }
                None => {
                    while !at_break(d)? {
                        read_entry(d)?;
                    }
                }
            }
            CborValue::Map(entries)
        }
        Type::Tag => {
            let tag = tag_number(d.tag().map_err(invalid)?);
            CborValue::Tagged(tag, Box::new(decode_value(d, depth + 1)?))
        }
        other => return Err(invalid(format!("unsupported item {}", other))),
    };
    Ok(value)
}

fn decode_key(d: &mut Decoder<'_>) -> Result<CborKey, Error> {
    match d.datatype().map_err(invalid)? {
        Type::String | Type::StringIndef => {
            let mut out = String::new();
            for chunk in d.str_iter().map_err(invalid)? {
                out.push_str(chunk.map_err(invalid)?);
            }
            Ok(CborKey::Text(out))
        }
        Type::Bytes | Type::BytesIndef | Type::Array | Type::ArrayIndef | Type::Map
        | Type::MapIndef | Type::Tag | Type::Bool | Type::Null | Type::Undefined
        | Type::F16 | Type::F32 | Type::F64 => Err(invalid("unsupported map key type")),
        _ => {
            let n = i128::from(d.int().map_err(invalid)?);
            i64::try_from(n)
                .map(CborKey::Int)
                .map_err(|_| invalid("map key out of range"))
        }
    }
}

/// Consume a break marker if one is next.
fn at_break(d: &mut Decoder<'_>) -> Result<bool, Error> {
    if d.datatype().map_err(invalid)? == Type::Break {
        d.set_position(d.position() + 1);
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Numeric value of a tag, including the ones minicbor names.
pub fn tag_number(tag: Tag) -> u64 {
    match tag {
        Tag::DateTime => 0x00,
        Tag::Timestamp => 0x01,
        Tag::PosBignum => 0x02,
        Tag::NegBignum => 0x03,
        Tag::Decimal => 0x04,
        Tag::Bigfloat => 0x05,
        Tag::ToBase64Url => 0x15,
        Tag::ToBase64 => 0x16,
        Tag::ToBase16 => 0x17,
        Tag::Cbor => 0x18,
        Tag::Uri => 0x20,
        Tag::Base64Url => 0x21,
        Tag::Base64 => 0x22,
        Tag::Regex => 0x23,
        Tag::Mime => 0x24,
        Tag::Unassigned(n) => n,
    }
}

fn tag_from_number(n: u64) -> Tag {
    match n {
        0x00 => Tag::DateTime,
        0x01 => Tag::Timestamp,
        0x02 => Tag::PosBignum,
        0x03 => Tag::NegBignum,
        0x04 => Tag::Decimal,
        0x05 => Tag::Bigfloat,
        0x15 => Tag::ToBase64Url,
        0x16 => Tag::ToBase64,
        0x17 => Tag::ToBase16,
        0x18 => Tag::Cbor,
        0x20 => Tag::Uri,
        0x21 => Tag::Base64Url,
        0x22 => Tag::Base64,
        0x23 => Tag::Regex,
        0x24 => Tag::Mime,
        n => Tag::Unassigned(n),
    }
}

/// Encode a value using definite lengths. Map entries follow key order.
pub fn encode(value: &CborValue) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    let mut e = Encoder::new(&mut buf);
    encode_value(&mut e, value)?;
    Ok(buf)
}

fn encode_failed(msg: impl std::fmt::Display) -> Error {
    Error::Envelope(format!("CBOR encoding failed: {}", msg))
}

fn encode_value(e: &mut Encoder<&mut Vec<u8>>, value: &CborValue) -> Result<(), Error> {
    match value {
        CborValue::Int(i) => {
            let int = minicbor::data::Int::try_from(*i).map_err(encode_failed)?;
            e.int(int).map_err(encode_failed)?;
        }
        CborValue::Float(f) => {
            e.f64(*f).map_err(encode_failed)?;
        }
        CborValue::Bytes(b) => {
            e.bytes(b).map_err(encode_failed)?;
        }
        CborValue::Text(s) => {
            e.str(s).map_err(encode_failed)?;
        }
        CborValue::Array(items) => {
            e.array(items.len() as u64).map_err(encode_failed)?;
            for item in items {
                encode_value(e, item)?;
            }
        }
        CborValue::Map(entries) => {
            e.map(entries.len() as u64).map_err(encode_failed)?;
            for (k, v) in entries {
                match k {
                    CborKey::Int(i) => e.i64(*i).map_err(encode_failed)?,
                    CborKey::Text(s) => e.str(s).map_err(encode_failed)?,
                };
                encode_value(e, v)?;
            }
        }
        CborValue::Bool(b) => {
            e.bool(*b).map_err(encode_failed)?;
        }
        CborValue::Null => {
            e.null().map_err(encode_failed)?;
        }
        CborValue::Tagged(tag, inner) => {
            e.tag(tag_from_number(*tag)).map_err(encode_failed)?;
            encode_value(e, inner)?;
        }
    }
    Ok(())
}

/// Build a map value from key/value pairs.
pub fn map<K: Into<CborKey>>(entries: impl IntoIterator<Item = (K, CborValue)>) -> CborValue {
    CborValue::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
}
