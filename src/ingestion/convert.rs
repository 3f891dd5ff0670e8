//! Conversion of decoded JSON / binary documents into the [`Value`] record tree.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use bson::{Bson, Document};
use serde_json::Map;

use crate::error::{ConversionError, ConversionResult};
use crate::types::Value;

use super::fixup::normalize_shell_literals;

/// Decode one text record (an NDJSON line, a JSON array item or a shell document).
///
/// `position` is the byte offset of the record in the input, used in error messages.
pub(crate) fn parse_text_record(
    raw: &[u8],
    position: u64,
    extended_json: bool,
) -> ConversionResult<Value> {
    let text = String::from_utf8_lossy(raw);
    let fixed = normalize_shell_literals(text.trim());
    let parsed: serde_json::Value = serde_json::from_str(&fixed)
        .map_err(|e| ConversionError::malformed(position, e.to_string()))?;
    match parsed {
        serde_json::Value::Object(_) => Ok(from_json(parsed, extended_json)),
        other => Err(ConversionError::malformed(
            position,
            format!("record is not an object (found {})", json_kind(&other)),
        )),
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Convert a parsed JSON value. With `extended` set, single-purpose wrapper objects such as
/// `{"$oid": "..."}` or `{"$date": "..."}` become their special scalar kind.
pub fn from_json(value: serde_json::Value, extended: bool) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| from_json(item, extended))
                .collect(),
        ),
        serde_json::Value::Object(map) => {
            if extended {
                if let Some(special) = extended_scalar(&map) {
                    return special;
                }
            }
            Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, from_json(v, extended)))
                    .collect(),
            )
        }
    }
}

fn extended_scalar(map: &Map<String, serde_json::Value>) -> Option<Value> {
    let mut keys = map.keys();
    let first = keys.next()?;
    if !first.starts_with('$') {
        return None;
    }

    match map.len() {
        1 => {
            let v = &map[first.as_str()];
            match first.as_str() {
                "$oid" => parse_object_id(v.as_str()?),
                "$date" => parse_date(v),
                "$numberLong" => v.as_str()?.parse().ok().map(Value::Int64),
                "$numberInt" => v.as_str()?.parse::<i32>().ok().map(|n| Value::Int(n.into())),
                "$numberDouble" => parse_double(v.as_str()?).map(Value::Float),
                "$numberDecimal" => Some(Value::Decimal(v.as_str()?.to_string())),
                "$binary" => {
                    let inner = v.as_object()?;
                    decode_binary(inner.get("base64")?.as_str()?, inner.get("subType")?.as_str()?)
                }
                "$regularExpression" => {
                    let inner = v.as_object()?;
                    Some(Value::Regex {
                        pattern: inner.get("pattern")?.as_str()?.to_string(),
                        flags: inner.get("options")?.as_str()?.to_string(),
                    })
                }
                "$timestamp" => {
                    let inner = v.as_object()?;
                    Some(Value::Timestamp {
                        seconds: u32::try_from(inner.get("t")?.as_u64()?).ok()?,
                        increment: u32::try_from(inner.get("i")?.as_u64()?).ok()?,
                    })
                }
                "$symbol" => Some(Value::String(v.as_str()?.to_string())),
                "$undefined" => Some(Value::Undefined),
                _ => None,
            }
        }
        2 => {
            if map.contains_key("$binary") && map.contains_key("$type") {
                decode_binary(map["$binary"].as_str()?, map["$type"].as_str()?)
            } else if map.contains_key("$regex") && map.contains_key("$options") {
                Some(Value::Regex {
                    pattern: map["$regex"].as_str()?.to_string(),
                    flags: map["$options"].as_str()?.to_string(),
                })
            } else {
                None
            }
        }
        _ => None,
    }
}

fn parse_object_id(hex: &str) -> Option<Value> {
    bson::oid::ObjectId::parse_str(hex)
        .ok()
        .map(|oid| Value::ObjectId(oid.bytes()))
}

fn parse_date(v: &serde_json::Value) -> Option<Value> {
    match v {
        serde_json::Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| Value::DateTime(dt.timestamp_millis())),
        serde_json::Value::Number(n) => n.as_i64().map(Value::DateTime),
        serde_json::Value::Object(inner) if inner.len() == 1 => inner
            .get("$numberLong")?
            .as_str()?
            .parse()
            .ok()
            .map(Value::DateTime),
        _ => None,
    }
}

fn parse_double(s: &str) -> Option<f64> {
    match s {
        "Infinity" => Some(f64::INFINITY),
        "-Infinity" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        other => other.parse().ok(),
    }
}

fn decode_binary(b64: &str, subtype_hex: &str) -> Option<Value> {
    let bytes = BASE64.decode(b64).ok()?;
    let subtype = u8::from_str_radix(subtype_hex, 16).ok()?;
    Some(Value::Binary { subtype, bytes })
}

/// Convert a decoded binary document.
pub fn from_bson_document(doc: Document) -> Value {
    Value::Object(doc.into_iter().map(|(k, v)| (k, from_bson(v))).collect())
}

/// Convert one binary value, mapping every special kind to its [`Value`] counterpart.
pub fn from_bson(value: Bson) -> Value {
    match value {
        Bson::Double(f) => Value::Float(f),
        Bson::String(s) => Value::String(s),
        Bson::Array(items) => Value::Array(items.into_iter().map(from_bson).collect()),
        Bson::Document(doc) => from_bson_document(doc),
        Bson::Boolean(b) => Value::Bool(b),
        Bson::Null => Value::Null,
        Bson::Undefined => Value::Undefined,
        Bson::RegularExpression(re) => Value::Regex {
            pattern: re.pattern,
            flags: re.options,
        },
        Bson::JavaScriptCode(code) => Value::String(code),
        Bson::JavaScriptCodeWithScope(code) => Value::String(code.code),
        Bson::Symbol(s) => Value::String(s),
        Bson::Int32(n) => Value::Int(n.into()),
        Bson::Int64(n) => Value::Int64(n),
        Bson::Timestamp(ts) => Value::Timestamp {
            seconds: ts.time,
            increment: ts.increment,
        },
        Bson::Binary(bin) => Value::Binary {
            subtype: u8::from(bin.subtype),
            bytes: bin.bytes,
        },
        Bson::ObjectId(oid) => Value::ObjectId(oid.bytes()),
        Bson::DateTime(dt) => Value::DateTime(dt.timestamp_millis()),
        Bson::Decimal128(d) => Value::Decimal(d.to_string()),
        other => Value::String(other.into_relaxed_extjson().to_string()),
    }
}
