//! Format sniffing from a short prefix of the input.

use crate::error::ConversionResult;
use crate::options::InputFormat;

use super::RecordFormat;
use super::fixup::has_shell_markers;
use super::source::InputSource;

/// Number of leading bytes inspected when the format is not forced.
pub const SNIFF_BYTES: usize = 8192;

/// Upper bound for a plausible leading document length when the total size is unknown.
const UNKNOWN_LEN_CAP: u64 = 16 * 1024 * 1024;

/// Guess the record format from the first bytes of the input.
///
/// A leading little-endian length in `[5, total_len]` means binary documents, provided a NUL
/// byte also shows up within the first 8 bytes. On a large text input the first four characters
/// can form an in-range length by themselves; the NUL check keeps such input as text.
/// Otherwise the prefix is decoded as (lossy) UTF-8: a leading `[` is a JSON array, shell
/// literals or `/* n */` counters anywhere in the sample mean a shell dump, and everything else
/// is NDJSON.
///
/// ```
/// use doc_tabulate::ingestion::{RecordFormat, sniff_format};
///
/// assert_eq!(sniff_format(b"  [{\"a\":1}]", Some(11)), RecordFormat::JsonArray);
/// assert_eq!(sniff_format(b"{\"a\":1}\n", Some(8)), RecordFormat::Ndjson);
/// ```
pub fn sniff_format(prefix: &[u8], total_len: Option<u64>) -> RecordFormat {
    if let Some(head) = prefix.first_chunk::<4>() {
        let declared = i32::from_le_bytes(*head);
        let limit = total_len.unwrap_or(UNKNOWN_LEN_CAP);
        if declared >= 5 && (declared as u64) <= limit && looks_binary(prefix) {
            return RecordFormat::Bson;
        }
    }

    let text = String::from_utf8_lossy(prefix);
    let trimmed = text.trim_start_matches(|c: char| c.is_whitespace() || c == '\u{feff}');
    if trimmed.starts_with('[') {
        RecordFormat::JsonArray
    } else if has_shell_markers(trimmed) {
        RecordFormat::ShellText
    } else {
        RecordFormat::Ndjson
    }
}

/// A text document would need four printable bytes to form a length in range; binary documents
/// almost always carry a NUL in the length prefix or right after the element type.
fn looks_binary(prefix: &[u8]) -> bool {
    prefix.iter().take(8).any(|&b| b == 0)
}

/// Resolve the effective format: a forced format skips probing entirely.
pub fn detect_format(source: &dyn InputSource, format: InputFormat) -> ConversionResult<RecordFormat> {
    let forced = match format {
        InputFormat::Auto => None,
        InputFormat::Bson => Some(RecordFormat::Bson),
        InputFormat::Ndjson => Some(RecordFormat::Ndjson),
        InputFormat::JsonArray => Some(RecordFormat::JsonArray),
        InputFormat::ShellText => Some(RecordFormat::ShellText),
    };
    if let Some(format) = forced {
        return Ok(format);
    }

    let prefix = source.prefix(SNIFF_BYTES)?;
    let format = sniff_format(&prefix, source.len());
    tracing::debug!(source = source.name(), %format, "sniffed input format");
    Ok(format)
}
