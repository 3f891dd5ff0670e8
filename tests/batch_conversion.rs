use std::fs;
use std::path::PathBuf;

use doc_tabulate::batch::{convert_files, expand_inputs};
use doc_tabulate::options::ConversionOptions;

fn fixture(name: &str) -> PathBuf {
    PathBuf::from("tests/fixtures").join(name)
}

#[test]
fn fixtures_convert_into_one_directory_per_input() {
    let out = tempfile::tempdir().unwrap();
    let inputs = vec![
        fixture("orders.ndjson"),
        fixture("orders.json"),
        fixture("orders_shell.txt"),
    ];

    let reports = convert_files(&inputs, &ConversionOptions::default(), out.path(), Some(2)).unwrap();
    assert_eq!(reports.len(), 3);

    let expected = fs::read(out.path().join("orders_ndjson/output.csv")).unwrap();
    for report in &reports {
        let done = report.outcome.as_ref().unwrap();
        assert_eq!(done.summary.stats.rows_written, 3);
        assert_eq!(done.written, vec![report.output_dir.join("output.csv")]);
        assert_eq!(fs::read(&done.written[0]).unwrap(), expected);
    }
    assert_eq!(reports[1].output_dir, out.path().join("orders_json"));
    assert_eq!(reports[2].output_dir, out.path().join("orders_shell"));
}

#[test]
fn failures_are_reported_per_file() {
    let out = tempfile::tempdir().unwrap();
    let inputs = vec![fixture("mixed_errors.ndjson"), fixture("orders.ndjson")];
    let mut opts = ConversionOptions::default();
    opts.general.stop_on_error = true;

    let reports = convert_files(&inputs, &opts, out.path(), None).unwrap();
    assert!(reports[0].outcome.is_err());
    let done = reports[1].outcome.as_ref().unwrap();
    assert_eq!(done.summary.stats.errors, 0);

    // No temporary part files are left behind for the failed input.
    let leftovers: Vec<_> = fs::read_dir(&reports[0].output_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn split_output_and_schema_are_written_to_disk() {
    let out = tempfile::tempdir().unwrap();
    let mut opts = ConversionOptions::default();
    opts.output.split_every = Some(2);
    opts.general.persist_schema = true;

    let inputs = expand_inputs(&["tests/fixtures/orders.ndjson"]).unwrap();
    let reports = convert_files(&inputs, &opts, out.path(), Some(1)).unwrap();
    let done = reports[0].outcome.as_ref().unwrap();

    let names: Vec<String> = done
        .written
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["output_part_001.csv", "output_part_002.csv", "schema.json"]);

    let second = fs::read_to_string(&done.written[1]).unwrap();
    assert_eq!(second.lines().count(), 2);
    let schema: serde_json::Value = serde_json::from_slice(&fs::read(&done.written[2]).unwrap()).unwrap();
    assert_eq!(schema["columns"].as_array().unwrap().len(), 11);
}
