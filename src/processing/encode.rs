//! Row encoder: a flat record rendered against a fixed column list.
//!
//! Quoting is delegated to the `csv` crate with [`csv::QuoteStyle::Necessary`]: a field is
//! quoted only when it contains the delimiter, the quote character or a line terminator, and
//! embedded quotes are doubled.

use csv::{QuoteStyle, Terminator, WriterBuilder};

use crate::error::{ConversionError, ConversionResult};
use crate::options::{CsvDialect, Newline};
use crate::types::{ColumnList, FlatRecord};

/// UTF-8 byte-order mark.
pub const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Internal buffer of the per-row writer; longer rows are flushed through it in pieces.
const ROW_BUFFER_BYTES: usize = 512;

/// Encodes rows and headers for one run's dialect.
#[derive(Debug)]
pub struct RowEncoder {
    builder: WriterBuilder,
    newline: Newline,
    include_bom: bool,
}

fn ascii_byte(c: char, what: &str) -> ConversionResult<u8> {
    u8::try_from(c)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| ConversionError::invalid_options(format!("{what} must be ASCII")))
}

impl RowEncoder {
    pub fn new(dialect: &CsvDialect) -> ConversionResult<Self> {
        let terminator = match dialect.newline {
            Newline::Lf => Terminator::Any(b'\n'),
            Newline::Crlf => Terminator::CRLF,
        };
        let mut builder = WriterBuilder::new();
        builder
            .delimiter(ascii_byte(dialect.delimiter, "delimiter")?)
            .quote(ascii_byte(dialect.quote, "quote")?)
            .quote_style(QuoteStyle::Necessary)
            .double_quote(true)
            .terminator(terminator)
            .flexible(true)
            .buffer_capacity(ROW_BUFFER_BYTES);
        Ok(Self {
            builder,
            newline: dialect.newline,
            include_bom: dialect.include_bom,
        })
    }

    /// Append one row to `out`. Columns missing from `record` render as empty fields.
    pub fn encode_row(
        &mut self,
        columns: &ColumnList,
        record: &FlatRecord,
        out: &mut Vec<u8>,
    ) -> ConversionResult<()> {
        let fields = columns
            .iter()
            .map(|c| record.get(c).map(String::as_str).unwrap_or(""));
        self.encode_fields(fields, out)
    }

    /// Append the header line (optionally BOM-prefixed) to `out`.
    pub fn encode_header(&mut self, columns: &ColumnList, out: &mut Vec<u8>) -> ConversionResult<()> {
        if self.include_bom {
            out.extend_from_slice(BOM);
        }
        self.encode_fields(columns.iter().map(String::as_str), out)
    }

    fn encode_fields<'a, I>(&mut self, fields: I, out: &mut Vec<u8>) -> ConversionResult<()>
    where
        I: ExactSizeIterator<Item = &'a str>,
    {
        // The csv crate writes `""` for a record with no fields.
        if fields.len() == 0 {
            out.extend_from_slice(self.newline.as_bytes());
            return Ok(());
        }
        let mut writer = self.builder.from_writer(out);
        writer.write_record(fields)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BOM, RowEncoder};
    use crate::options::{CsvDialect, Newline};
    use crate::types::{ColumnList, FlatRecord};

    fn columns(names: &[&str]) -> ColumnList {
        ColumnList::new(names.iter().map(|s| s.to_string()).collect())
    }

    fn record(pairs: &[(&str, &str)]) -> FlatRecord {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn encode(dialect: &CsvDialect, cols: &ColumnList, rec: &FlatRecord) -> String {
        let mut out = Vec::new();
        RowEncoder::new(dialect).unwrap().encode_row(cols, rec, &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn missing_keys_are_empty_and_quoting_is_minimal() {
        let cols = columns(&["a", "b", "c", "d"]);
        let rec = record(&[("a", "plain"), ("c", "x,y"), ("d", "say \"hi\"\nbye")]);
        assert_eq!(
            encode(&CsvDialect::default(), &cols, &rec),
            "plain,,\"x,y\",\"say \"\"hi\"\"\nbye\"\n"
        );
    }

    #[test]
    fn lone_empty_field_is_quoted_so_the_row_is_not_blank() {
        let rec = record(&[]);
        assert_eq!(encode(&CsvDialect::default(), &columns(&["a"]), &rec), "\"\"\n");
        assert_eq!(encode(&CsvDialect::default(), &columns(&["a", "b"]), &rec), ",\n");
    }

    #[test]
    fn custom_dialect_quotes_its_own_delimiter_and_quote() {
        let dialect = CsvDialect {
            delimiter: ';',
            quote: '\'',
            newline: Newline::Crlf,
            ..CsvDialect::default()
        };
        let cols = columns(&["a", "b"]);
        let rec = record(&[("a", "1;2"), ("b", "it's, fine")]);
        assert_eq!(encode(&dialect, &cols, &rec), "'1;2';'it''s, fine'\r\n");
    }

    #[test]
    fn header_reuses_the_encoder_and_optionally_adds_a_bom() {
        let dialect = CsvDialect {
            include_bom: true,
            ..CsvDialect::default()
        };
        let mut enc = RowEncoder::new(&dialect).unwrap();
        let mut out = Vec::new();
        enc.encode_header(&columns(&["a", "c[0]", "x,y"]), &mut out).unwrap();
        assert!(out.starts_with(BOM));
        assert_eq!(&out[BOM.len()..], b"a,c[0],\"x,y\"\n");

        out.clear();
        enc.encode_header(&columns(&[]), &mut out).unwrap();
        assert_eq!(&out[BOM.len()..], b"\n");
    }

    #[test]
    fn non_ascii_dialect_is_rejected() {
        let dialect = CsvDialect {
            delimiter: 'é',
            ..CsvDialect::default()
        };
        assert!(RowEncoder::new(&dialect).is_err());
    }
}
