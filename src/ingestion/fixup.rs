//! Textual normalization of shell-style literals before JSON parsing.
//!
//! Dumps produced by interactive database shells wrap values in constructor calls such as
//! `ISODate("2024-01-01T00:00:00Z")` or `NumberLong(42)`, which are not JSON. Date wrappers are
//! unwrapped to plain strings; the others are rewritten to their extended-JSON form so the value
//! conversion can recover the special scalar kind.
//!
//! The rewrite is purely textual and also applies inside string literals.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

static SHELL_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/\*\s*\d+\s*\*/|\b(?:ISODate|ObjectId|NumberLong|NumberInt|NumberDecimal|UUID|BinData)\(")
        .expect("valid regex")
});

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"ISODate\(\s*"([^"]*)"\s*\)"#).expect("valid regex"));

static OBJECT_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"ObjectId\(\s*"([0-9a-fA-F]{24})"\s*\)"#).expect("valid regex")
});

static NUMBER_LONG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"NumberLong\(\s*"?(-?\d+)"?\s*\)"#).expect("valid regex"));

static NUMBER_INT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"NumberInt\(\s*"?(-?\d+)"?\s*\)"#).expect("valid regex"));

static NUMBER_DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"NumberDecimal\(\s*"([^"]*)"\s*\)"#).expect("valid regex"));

static UUID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"UUID\(\s*"([^"]*)"\s*\)"#).expect("valid regex"));

static BIN_DATA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"BinData\(\s*(\d+)\s*,\s*"([^"]*)"\s*\)"#).expect("valid regex")
});

/// Returns `true` when the sampled text looks like a shell dump (block-comment counters or
/// constructor-style literals).
pub fn has_shell_markers(text: &str) -> bool {
    SHELL_MARKERS.is_match(text)
}

/// Unwrap `ISODate("...")` to the bare string literal.
pub fn fix_date_literals(text: &str) -> Cow<'_, str> {
    ISO_DATE.replace_all(text, r#""$1""#)
}

/// Rewrite every supported shell literal. Returns the input unchanged (borrowed) when it holds
/// no constructor call at all.
pub fn normalize_shell_literals(text: &str) -> Cow<'_, str> {
    if !text.contains('(') {
        return Cow::Borrowed(text);
    }

    let mut out = fix_date_literals(text);
    out = replace_owned(out, &OBJECT_ID, r#"{"$$oid":"$1"}"#);
    out = replace_owned(out, &NUMBER_LONG, r#"{"$$numberLong":"$1"}"#);
    out = replace_owned(out, &NUMBER_INT, "$1");
    out = replace_owned(out, &NUMBER_DECIMAL, r#"{"$$numberDecimal":"$1"}"#);
    out = replace_owned(out, &UUID, r#""$1""#);

    if BIN_DATA.is_match(&out) {
        let replaced = BIN_DATA
            .replace_all(&out, |caps: &Captures<'_>| {
                let subtype: u8 = caps[1].parse().unwrap_or(0);
                format!(r#"{{"$binary":"{}","$type":"{:02x}"}}"#, &caps[2], subtype)
            })
            .into_owned();
        out = Cow::Owned(replaced);
    }
    out
}

fn replace_owned<'a>(text: Cow<'a, str>, re: &Regex, rep: &str) -> Cow<'a, str> {
    let replaced = match re.replace_all(&text, rep) {
        Cow::Borrowed(_) => None,
        Cow::Owned(s) => Some(s),
    };
    match replaced {
        Some(s) => Cow::Owned(s),
        None => text,
    }
}
