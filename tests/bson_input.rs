use std::path::Path;
use std::sync::Arc;

use bson::spec::BinarySubtype;
use bson::{Binary, DateTime, Document, Regex, Timestamp, doc, oid::ObjectId};
use doc_tabulate::execution::ConversionEngine;
use doc_tabulate::ingestion::{FileSource, RecordFormat, detect_format};
use doc_tabulate::options::{ConversionOptions, InputFormat};
use doc_tabulate::output::CollectingSink;

fn write_dump(path: &Path, docs: &[Document]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for doc in docs {
        doc.to_writer(&mut bytes).unwrap();
    }
    std::fs::write(path, &bytes).unwrap();
    bytes
}

fn typed_docs() -> Vec<Document> {
    let blob = Binary {
        subtype: BinarySubtype::Generic,
        bytes: vec![1, 2, 3],
    };
    let re = Regex {
        pattern: "^a".to_string(),
        options: "i".to_string(),
    };
    let ts = Timestamp {
        time: 1_700_000_000,
        increment: 4,
    };
    vec![
        doc! {
            "_id": ObjectId::parse_str("65a1f0c2e4b0a1b2c3d4e5f6").unwrap(),
            "at": DateTime::from_millis(1_700_000_000_123),
            "big": 9_007_199_254_740_993_i64,
            "small": 7_i32,
            "ratio": 2.5,
            "blob": blob,
            "re": re,
            "ts": ts,
        },
        doc! { "_id": ObjectId::parse_str("65a1f0c2e4b0a1b2c3d4e5f7").unwrap(), "nested": { "k": [true, bson::Bson::Null] } },
    ]
}

fn convert(path: &Path, options: ConversionOptions) -> (doc_tabulate::execution::RunSummary, String) {
    let sink = CollectingSink::new();
    let summary = ConversionEngine::new()
        .run_to_completion(Arc::new(FileSource::new(path)), options, &sink)
        .unwrap();
    let text = String::from_utf8(sink.part_bytes()[&0].clone()).unwrap();
    (summary, text)
}

#[test]
fn binary_dump_is_sniffed_and_every_kind_rendered() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("dump.bson");
    write_dump(&path, &typed_docs());

    let source = FileSource::new(&path);
    assert_eq!(detect_format(&source, InputFormat::Auto).unwrap(), RecordFormat::Bson);

    let (summary, text) = convert(&path, ConversionOptions::default());
    assert_eq!(summary.stats.rows_written, 2);
    assert_eq!(
        text,
        "\
_id,at,big,blob,nested.k[0],nested.k[1],ratio,re,small,ts
65a1f0c2e4b0a1b2c3d4e5f6,2023-11-14T22:13:20.123Z,9007199254740993,base64:AQID,,,2.5,/^a/i,7,2023-11-14T22:13:20.000Z
65a1f0c2e4b0a1b2c3d4e5f7,,,,true,,,,,
"
    );
}

#[test]
fn lossy_integer_mode_goes_through_double_precision() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("ints.bson");
    write_dump(&path, &[doc! { "big": 9_007_199_254_740_993_i64 }]);

    let mut opts = ConversionOptions::default();
    opts.numerics.stringify_integers = false;
    let (_, text) = convert(&path, opts);
    assert_eq!(text, "big\n9007199254740992\n");
}

#[test]
fn truncated_trailing_document_is_reported_and_earlier_rows_kept() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("cut.bson");
    let bytes = write_dump(&path, &[doc! { "a": 1 }, doc! { "a": 2 }]);
    std::fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();

    let (summary, text) = convert(&path, ConversionOptions::default());
    assert_eq!(text, "a\n1\n");
    assert_eq!(summary.stats.errors, 1);
    assert!(summary.log.iter().any(|e| e.message.contains("truncated trailing document")));
}

#[test]
fn oversized_documents_are_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("big.bson");
    write_dump(
        &path,
        &[doc! { "a": 1 }, doc! { "a": "x".repeat(256) }, doc! { "a": 3 }],
    );

    let mut opts = ConversionOptions::default();
    opts.format = InputFormat::Bson;
    opts.performance.max_record_bytes = 64;
    let (summary, text) = convert(&path, opts);
    assert_eq!(text, "a\n1\n3\n");
    assert_eq!(summary.stats.errors, 1);
}
