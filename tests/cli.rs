mod common;

use std::fs;

use assert_cmd::Command;
use colcopy::memory::{CellValue, TableDocument};
use common::{SCHEMA_YAML, SOURCE_YAML, TestWorkspace};
use predicates::prelude::*;
use predicates::str::contains;

fn colcopy() -> Command {
    let mut cmd = Command::cargo_bin("colcopy").expect("binary exists");
    cmd.env_remove("RUST_LOG");
    cmd
}

struct Paths {
    workspace: TestWorkspace,
    source: String,
    schema: String,
}

impl Paths {
    fn new() -> Self {
        let workspace = TestWorkspace::new();
        let source = workspace.write("source.yml", SOURCE_YAML);
        let schema = workspace.write("schema.yml", SCHEMA_YAML);
        Paths {
            source: source.to_str().unwrap().to_string(),
            schema: schema.to_str().unwrap().to_string(),
            workspace,
        }
    }

    fn output(&self, name: &str) -> std::path::PathBuf {
        self.workspace.path().join(name)
    }
}

#[test]
fn copy_writes_filtered_destination() {
    let paths = Paths::new();
    let output = paths.output("dest.yml");
    colcopy()
        .args(["copy", "-i", &paths.source, "-s", &paths.schema, "-o"])
        .arg(&output)
        .assert()
        .success()
        .stderr(contains("Wrote 3 row(s)"));

    let table = TableDocument::load(&output).expect("destination loads");
    assert_eq!(table.row_count(), 3);
    assert_eq!(
        table.column("READ").unwrap().cells[0],
        CellValue::Text("ACGT".into())
    );
    assert!(table.checksums.is_empty());
    assert!(table.index.is_none());
}

#[test]
fn show_matching_prints_report_to_stdout() {
    let paths = Paths::new();
    colcopy()
        .args(["copy", "-i", &paths.source, "-s", &paths.schema, "--show-matching", "-o"])
        .arg(paths.output("dest.yml"))
        .assert()
        .success()
        .stdout(contains("column SPOT_LEN: I32 -> I32"))
        .stdout(contains("3 of 3 column(s) matched"));
}

#[test]
fn existing_destination_requires_force() {
    let paths = Paths::new();
    let output = paths.workspace.write("dest.yml", "keep me\n");
    colcopy()
        .args(["copy", "-i", &paths.source, "-s", &paths.schema, "-o"])
        .arg(&output)
        .assert()
        .failure()
        .stderr(contains("already exists"));
    assert_eq!(fs::read_to_string(&output).unwrap(), "keep me\n");

    colcopy()
        .args(["copy", "-i", &paths.source, "-s", &paths.schema, "--force", "-o"])
        .arg(&output)
        .assert()
        .success();
    assert_eq!(TableDocument::load(&output).unwrap().row_count(), 3);
}

#[test]
fn rows_columns_checksum_and_reindex_options() {
    let paths = Paths::new();
    let output = paths.output("dest.json");
    colcopy()
        .args([
            "copy",
            "-i",
            &paths.source,
            "-s",
            &paths.schema,
            "-R",
            "4-2",
            "-C",
            "READ,SPOT_LEN",
            "--ignore-reject",
            "--checksum",
            "on",
            "--reindex",
            "-o",
        ])
        .arg(&output)
        .assert()
        .success();

    let raw = fs::read_to_string(&output).unwrap();
    let table: TableDocument = serde_json::from_str(&raw).expect("json destination");
    assert_eq!(table.row_count(), 3);
    assert_eq!(table.columns.len(), 2);
    assert_eq!(
        table.checksums.keys().collect::<Vec<_>>(),
        vec!["READ", "SPOT_LEN"]
    );
    let index = table.index.expect("reindexed");
    assert_eq!(index.row_count, 3);
    assert_eq!(index.columns["SPOT_LEN"], 1);
}

#[test]
fn config_file_drives_redaction() {
    let paths = Paths::new();
    let config = paths.workspace.write(
        "config.yml",
        "redactable_columns: [QUALITY]\nredact_values:\n  - { type: \"INSDC:quality:phred\", value: \"0x21\" }\n",
    );
    let output = paths.output("dest.yml");
    colcopy()
        .args(["copy", "-i", &paths.source, "-s", &paths.schema, "-c"])
        .arg(&config)
        .arg("-o")
        .arg(&output)
        .assert()
        .success()
        .stderr(contains("1 redacted"));

    let table = TableDocument::load(&output).unwrap();
    assert_eq!(
        table.column("QUALITY").unwrap().cells[1],
        CellValue::Values(vec![0x21; 4])
    );
}

#[test]
fn show_redact_traces_each_redacted_cell() {
    let paths = Paths::new();
    let config = paths
        .workspace
        .write("config.yml", "redactable_columns: [QUALITY]\n");
    colcopy()
        .args(["copy", "-i", &paths.source, "-s", &paths.schema, "--show-redact", "-c"])
        .arg(&config)
        .arg("-o")
        .arg(paths.output("dest.yml"))
        .assert()
        .success()
        .stderr(contains("Redacting row #3 (INSDC:quality:phred)QUALITY"));

    colcopy()
        .args(["copy", "-i", &paths.source, "-s", &paths.schema, "-c"])
        .arg(&config)
        .arg("-o")
        .arg(paths.output("quiet.yml"))
        .assert()
        .success()
        .stderr(contains("Redacting").not());
}

#[test]
fn strict_failure_leaves_no_destination() {
    let paths = Paths::new();
    let schema = paths.workspace.write(
        "strict_schema.yml",
        &format!("{SCHEMA_YAML}  - {{ name: NAME, types: [F32] }}\n")
            .replace("types:\n", "types:\n  - { name: F32, bits: 32 }\n"),
    );
    let output = paths.output("dest.yml");
    colcopy()
        .args(["copy", "-i", &paths.source, "--strict", "-s"])
        .arg(&schema)
        .arg("-o")
        .arg(&output)
        .assert()
        .failure()
        .stderr(contains("No compatible cast for column(s): NAME"));
    assert!(!output.exists());
}

#[test]
fn malformed_row_set_is_rejected() {
    let paths = Paths::new();
    let output = paths.output("dest.yml");
    colcopy()
        .args(["copy", "-i", &paths.source, "-s", &paths.schema, "-R", "1-x", "-o"])
        .arg(&output)
        .assert()
        .failure()
        .stderr(contains("Invalid row set"));
    assert!(!output.exists());
}

#[test]
fn match_subcommand_only_reports() {
    let paths = Paths::new();
    colcopy()
        .args(["match", "-i", &paths.source, "-s", &paths.schema, "-x", "QUALITY"])
        .assert()
        .success()
        .stdout(contains("column READ: INSDC:dna:text -> INSDC:dna:text"))
        .stdout(contains("2 of 2 column(s) matched"));
}
