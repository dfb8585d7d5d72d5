use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::rowset::RowSet;

#[derive(Debug, Parser)]
#[command(author, version, about = "Copy typed columnar tables between schemas", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Copy rows from a source table into a new destination table
    Copy(CopyArgs),
    /// Resolve column casts and print the matching report without copying
    Match(MatchArgs),
}

/// Inputs shared by `copy` and `match`.
#[derive(Debug, Args)]
pub struct TableArgs {
    /// Source table document (YAML, or JSON with a .json extension)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Schema document with the type hierarchy and writable destination columns
    #[arg(short = 's', long = "schema")]
    pub schema: PathBuf,
    /// Copy configuration (scores, redaction, filter column)
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,
    /// Copy only these columns (comma-separated, repeatable)
    #[arg(short = 'C', long = "columns", value_delimiter = ',', action = clap::ArgAction::Append)]
    pub columns: Vec<String>,
    /// Exclude these columns; entries may be written as `<table-name>:<column>`
    #[arg(short = 'x', long = "exclude-columns", value_delimiter = ',', action = clap::ArgAction::Append)]
    pub exclude_columns: Vec<String>,
    /// Table name used as the prefix of `<table-name>:<column>` exclusions
    #[arg(long = "table-name")]
    pub table_name: Option<String>,
    /// Fail when a requested column has no compatible cast instead of dropping it
    #[arg(long)]
    pub strict: bool,
}

#[derive(Debug, Args)]
pub struct CopyArgs {
    #[command(flatten)]
    pub table: TableArgs,
    /// Destination table document to create
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
    /// Rows to copy such as `1-100,250,300-280` (defaults to all rows)
    #[arg(short = 'R', long = "rows", value_parser = parse_row_set)]
    pub rows: Option<RowSet>,
    /// Copy rows the filter column marks as rejected
    #[arg(long = "ignore-reject")]
    pub ignore_reject: bool,
    /// Copy rows the filter column marks as redacted without redacting them
    #[arg(long = "ignore-redact")]
    pub ignore_redact: bool,
    /// Print the type matching report before copying
    #[arg(long = "show-matching")]
    pub show_matching: bool,
    /// Log progress while copying
    #[arg(long = "show-progress")]
    pub show_progress: bool,
    /// Log every redacted cell at debug level
    #[arg(long = "show-redact")]
    pub show_redact: bool,
    /// Rebuild the destination index after a complete copy
    #[arg(long)]
    pub reindex: bool,
    /// Record per-column checksums in the destination
    #[arg(long, value_enum, default_value = "auto")]
    pub checksum: ChecksumMode,
    /// Keep a partially written destination after a failure or cancellation
    #[arg(long = "keep-partial")]
    pub keep_partial: bool,
    /// Overwrite an existing destination
    #[arg(short = 'f', long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct MatchArgs {
    #[command(flatten)]
    pub table: TableArgs,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
#[value(rename_all = "kebab-case")]
pub enum ChecksumMode {
    /// Record checksums when the source carries them
    #[default]
    Auto,
    On,
    Off,
}

fn parse_row_set(value: &str) -> Result<RowSet, String> {
    RowSet::parse(value).map_err(|err| err.to_string())
}

impl TableArgs {
    /// `None` when no explicit column list was given.
    pub fn requested_columns(&self) -> Option<Vec<String>> {
        let columns = clean_names(&self.columns);
        (!columns.is_empty()).then_some(columns)
    }

    pub fn excluded_columns(&self) -> Vec<String> {
        clean_names(&self.exclude_columns)
    }
}

fn clean_names(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_copy_flags_and_row_set() {
        let cli = Cli::try_parse_from([
            "colcopy", "copy", "-i", "src.yml", "-s", "schema.yml", "-o", "dst.yml", "-R",
            "5-1,9", "-C", "READ,QUALITY", "-C", "NAME", "--checksum", "on", "--ignore-reject",
        ])
        .expect("parse");
        let Commands::Copy(args) = cli.command else {
            panic!("expected copy");
        };
        assert_eq!(args.rows.expect("rows").to_string(), "1-5,9");
        assert_eq!(
            args.table.requested_columns(),
            Some(vec!["READ".into(), "QUALITY".into(), "NAME".into()])
        );
        assert_eq!(args.checksum, ChecksumMode::On);
        assert!(args.ignore_reject && !args.ignore_redact);
        assert!(args.table.excluded_columns().is_empty());
    }

    #[test]
    fn malformed_row_set_is_a_usage_error() {
        let result = Cli::try_parse_from([
            "colcopy", "copy", "-i", "a", "-s", "b", "-o", "c", "-R", "1-x",
        ]);
        assert!(result.is_err());
    }
}
