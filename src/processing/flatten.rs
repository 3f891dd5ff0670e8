//! Flattening engine: nested [`Value`] → [`FlatRecord`].
//!
//! Paths are built from object keys joined with `.` and array indices written as `[i]`:
//!
//! ```
//! use doc_tabulate::options::ConversionOptions;
//! use doc_tabulate::processing::{FlattenConfig, flatten};
//! use doc_tabulate::types::Value;
//!
//! let record = Value::object([
//!     ("user", Value::object([("name", Value::from("ada"))])),
//!     ("tags", Value::Array(vec![Value::from("x"), Value::from("y")])),
//! ]);
//! let config = FlattenConfig::from(&ConversionOptions::default());
//! let flat = flatten(&record, &config).unwrap();
//!
//! assert_eq!(flat["user.name"], "ada");
//! assert_eq!(flat["tags[1]"], "y");
//! ```
//!
//! Object keys are normalized so paths stay unambiguous: tab and newline become a space and a
//! literal `.` is escaped as `\.`. Arrays longer than the configured limit keep their first
//! `max_array_length` elements and add `<path>.__truncated` holding the original length.

use std::borrow::Cow;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{ConversionError, ConversionResult};
use crate::options::{ConversionOptions, FlattenStrategy, NullPolicy, NumericOptions};
use crate::types::{FlatRecord, Value};

/// Suffix of the synthetic key recording an array's original length.
pub const TRUNCATED_SUFFIX: &str = "__truncated";

/// Everything flattening depends on, detached from the full option set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenConfig {
    pub strategy: FlattenStrategy,
    pub join_delimiter: String,
    /// `0` means unlimited.
    pub max_array_length: usize,
    pub null_policy: NullPolicy,
    pub numerics: NumericOptions,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self::from(&ConversionOptions::default())
    }
}

impl From<&ConversionOptions> for FlattenConfig {
    fn from(options: &ConversionOptions) -> Self {
        Self {
            strategy: options.flatten.strategy,
            join_delimiter: options.flatten.join_delimiter.clone(),
            max_array_length: options.flatten.max_array_length,
            null_policy: options.null_policy,
            numerics: options.numerics,
        }
    }
}

/// Flatten one record. Later duplicate paths overwrite earlier ones in place.
///
/// # Errors
///
/// [`ConversionError::InvalidValue`] when a leaf cannot be rendered (a date outside the
/// representable range).
pub fn flatten(record: &Value, config: &FlattenConfig) -> ConversionResult<FlatRecord> {
    let mut out = FlatRecord::new();
    let mut path = String::new();
    flatten_value(record, &mut path, &mut out, config)?;
    Ok(out)
}

fn flatten_value(
    value: &Value,
    path: &mut String,
    out: &mut FlatRecord,
    config: &FlattenConfig,
) -> ConversionResult<()> {
    match value {
        Value::Object(entries) => {
            if entries.is_empty() {
                out.insert(path.clone(), String::new());
                return Ok(());
            }
            for (key, child) in entries {
                let mark = path.len();
                if !path.is_empty() {
                    path.push('.');
                }
                path.push_str(&normalize_key(key));
                let result = flatten_value(child, path, out, config);
                path.truncate(mark);
                result?;
            }
            Ok(())
        }
        Value::Array(items) => {
            if config.strategy == FlattenStrategy::Join && items.iter().all(Value::is_scalarish) {
                let parts = items
                    .iter()
                    .map(|item| render_scalar(item, path, config))
                    .collect::<ConversionResult<Vec<_>>>()?;
                out.insert(path.clone(), parts.join(&config.join_delimiter));
                return Ok(());
            }

            let limit = match config.max_array_length {
                0 => items.len(),
                n => n.min(items.len()),
            };
            for (i, item) in items.iter().take(limit).enumerate() {
                let mark = path.len();
                path.push('[');
                path.push_str(&i.to_string());
                path.push(']');
                let result = flatten_value(item, path, out, config);
                path.truncate(mark);
                result?;
            }
            if items.len() > limit {
                out.insert(format!("{path}.{TRUNCATED_SUFFIX}"), items.len().to_string());
            }
            Ok(())
        }
        scalar => {
            let rendered = render_scalar(scalar, path, config)?;
            out.insert(path.clone(), rendered);
            Ok(())
        }
    }
}

/// Replace tab/newline with a space and escape literal dots.
pub fn normalize_key(key: &str) -> Cow<'_, str> {
    if !key.contains(['\n', '\t', '.']) {
        return Cow::Borrowed(key);
    }
    let mut out = String::with_capacity(key.len() + 2);
    for c in key.chars() {
        match c {
            '\n' | '\t' => out.push(' '),
            '.' => out.push_str("\\."),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Canonical text of a scalar-ish value. Containers (only reachable through a join of
/// non-scalars, which never happens) render as empty.
fn render_scalar(value: &Value, path: &str, config: &FlattenConfig) -> ConversionResult<String> {
    let literal = config.null_policy == NullPolicy::LiteralNull;
    Ok(match value {
        Value::Null if literal => "null".to_string(),
        Value::Undefined if literal => "undefined".to_string(),
        Value::Null | Value::Undefined => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => format_float(*f, config.numerics.stringify_floats),
        Value::String(s) => s.clone(),
        Value::ObjectId(bytes) => bytes.iter().map(|b| format!("{b:02x}")).collect(),
        Value::DateTime(ms) => iso_millis(DateTime::<Utc>::from_timestamp_millis(*ms), path)?,
        Value::Decimal(text) => text.clone(),
        Value::Int64(n) if config.numerics.stringify_integers => n.to_string(),
        Value::Int64(n) => format_number(*n as f64),
        Value::Binary { bytes, .. } => format!("base64:{}", STANDARD.encode(bytes)),
        Value::Regex { pattern, flags } => format!("/{pattern}/{flags}"),
        Value::Timestamp { seconds, .. } => {
            iso_millis(DateTime::<Utc>::from_timestamp(i64::from(*seconds), 0), path)?
        }
        Value::Array(_) | Value::Object(_) => String::new(),
    })
}

fn iso_millis(dt: Option<DateTime<Utc>>, path: &str) -> ConversionResult<String> {
    dt.map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| ConversionError::InvalidValue {
            path: path.to_string(),
            message: "date outside the representable range".to_string(),
        })
}

fn format_float(f: f64, stringify_non_finite: bool) -> String {
    if f.is_finite() {
        format_number(f)
    } else if !stringify_non_finite {
        String::new()
    } else if f.is_nan() {
        "NaN".to_string()
    } else if f > 0.0 {
        "Infinity".to_string()
    } else {
        "-Infinity".to_string()
    }
}

/// Shortest round-trip text with integral values printed without a fraction and exponent
/// notation outside `[1e-6, 1e21)`.
fn format_number(f: f64) -> String {
    if f == 0.0 {
        return "0".to_string();
    }
    let abs = f.abs();
    if (1e-6..1e21).contains(&abs) {
        return f.to_string();
    }
    let text = format!("{f:e}");
    match text.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::{FlattenConfig, flatten, format_number, normalize_key};
    use crate::options::{FlattenStrategy, NullPolicy};
    use crate::types::Value;

    fn config() -> FlattenConfig {
        FlattenConfig::default()
    }

    fn arr(items: Vec<Value>) -> Value {
        Value::Array(items)
    }

    #[test]
    fn nested_objects_and_arrays_use_dotted_and_indexed_paths() {
        let record = Value::object([
            ("a", Value::object([("b", Value::Int(1))])),
            ("c", arr(vec![Value::object([("d", Value::Bool(true))]), Value::Null])),
        ]);
        let flat = flatten(&record, &config()).unwrap();
        let entries: Vec<(&str, &str)> = flat.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
        assert_eq!(entries, vec![("a.b", "1"), ("c[0].d", "true"), ("c[1]", "")]);
    }

    #[test]
    fn truncation_keeps_exactly_the_limit_and_records_the_length() {
        let mut cfg = config();
        cfg.max_array_length = 2;
        let record = Value::object([("c", arr((1..=5).map(Value::Int).collect()))]);
        let flat = flatten(&record, &cfg).unwrap();
        assert_eq!(flat.len(), 3);
        assert_eq!(flat["c[0]"], "1");
        assert_eq!(flat["c[1]"], "2");
        assert_eq!(flat["c.__truncated"], "5");

        cfg.max_array_length = 0;
        assert_eq!(flatten(&record, &cfg).unwrap().len(), 5);
    }

    #[test]
    fn join_only_applies_to_scalar_arrays() {
        let mut cfg = config();
        cfg.strategy = FlattenStrategy::Join;
        cfg.join_delimiter = "|".to_string();
        let record = Value::object([
            ("tags", arr(vec![Value::from("x"), Value::Int(2), Value::Null])),
            ("nested", arr(vec![Value::object([("k", Value::Int(1))])])),
        ]);
        let flat = flatten(&record, &cfg).unwrap();
        assert_eq!(flat["tags"], "x|2|");
        assert_eq!(flat["nested[0].k"], "1");
    }

    #[test]
    fn explode_falls_back_to_index() {
        let mut cfg = config();
        cfg.strategy = FlattenStrategy::Explode;
        let record = Value::object([("v", arr(vec![Value::Int(1), Value::Int(2)]))]);
        let flat = flatten(&record, &cfg).unwrap();
        assert_eq!(flat["v[1]"], "2");
    }

    #[test]
    fn null_policy_controls_null_and_undefined() {
        let record = Value::object([("n", Value::Null), ("u", Value::Undefined)]);
        let empty = flatten(&record, &config()).unwrap();
        assert_eq!((empty["n"].as_str(), empty["u"].as_str()), ("", ""));

        let mut cfg = config();
        cfg.null_policy = NullPolicy::LiteralNull;
        let literal = flatten(&record, &cfg).unwrap();
        assert_eq!((literal["n"].as_str(), literal["u"].as_str()), ("null", "undefined"));
    }

    #[test]
    fn keys_are_normalized_and_empty_containers_handled() {
        let record = Value::object([
            ("a.b", Value::Int(1)),
            ("line\nbreak\ttab", Value::Int(2)),
            ("empty", Value::object(Vec::<(String, Value)>::new())),
            ("none", arr(vec![])),
        ]);
        let flat = flatten(&record, &config()).unwrap();
        assert_eq!(flat["a\\.b"], "1");
        assert_eq!(flat["line break tab"], "2");
        assert_eq!(flat["empty"], "");
        assert!(!flat.contains_key("none"));
        assert_eq!(normalize_key("plain"), "plain");
    }

    #[test]
    fn special_scalars_render_canonically() {
        let record = Value::object([
            ("id", Value::ObjectId([0x65, 0xa1, 0xf0, 0xc2, 0xe4, 0xb0, 0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6])),
            ("at", Value::DateTime(1_704_067_200_123)),
            ("dec", Value::Decimal("1.10".to_string())),
            ("big", Value::Int64(9_007_199_254_740_993)),
            ("bin", Value::Binary { subtype: 0, bytes: b"hi".to_vec() }),
            ("re", Value::Regex { pattern: "^a".to_string(), flags: "i".to_string() }),
            ("ts", Value::Timestamp { seconds: 1_704_067_200, increment: 3 }),
        ]);
        let flat = flatten(&record, &config()).unwrap();
        assert_eq!(flat["id"], "65a1f0c2e4b0a1b2c3d4e5f6");
        assert_eq!(flat["at"], "2024-01-01T00:00:00.123Z");
        assert_eq!(flat["dec"], "1.10");
        assert_eq!(flat["big"], "9007199254740993");
        assert_eq!(flat["bin"], "base64:aGk=");
        assert_eq!(flat["re"], "/^a/i");
        assert_eq!(flat["ts"], "2024-01-01T00:00:00.000Z");

        let mut cfg = config();
        cfg.numerics.stringify_integers = false;
        assert_eq!(flatten(&record, &cfg).unwrap()["big"], "9007199254740992");
    }

    #[test]
    fn numbers_and_non_finite_floats() {
        let record = Value::object([
            ("i", Value::Float(3.0)),
            ("f", Value::Float(0.5)),
            ("nan", Value::Float(f64::NAN)),
            ("inf", Value::Float(f64::NEG_INFINITY)),
        ]);
        let flat = flatten(&record, &config()).unwrap();
        assert_eq!(flat["i"], "3");
        assert_eq!(flat["f"], "0.5");
        assert_eq!(flat["nan"], "NaN");
        assert_eq!(flat["inf"], "-Infinity");

        let mut cfg = config();
        cfg.numerics.stringify_floats = false;
        let flat = flatten(&record, &cfg).unwrap();
        assert_eq!(flat["nan"], "");
        assert_eq!(flat["f"], "0.5");

        assert_eq!(format_number(1e21), "1e+21");
        assert_eq!(format_number(1.5e-7), "1.5e-7");
        assert_eq!(format_number(-0.0), "0");
    }

    #[test]
    fn out_of_range_date_is_an_invalid_value() {
        let record = Value::object([("when", Value::DateTime(i64::MAX))]);
        let err = flatten(&record, &config()).unwrap_err();
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("when"));
    }
}
