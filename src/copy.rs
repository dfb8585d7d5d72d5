use std::{fs, path::Path, sync::Arc};

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};

use crate::{
    checksum,
    cli::{CopyArgs, MatchArgs, TableArgs},
    config::CopyConfig,
    engine::{CancellationToken, CopyEngine, CopyOutcome, ProgressSink, RunOptions, prepare},
    filter::FilterPolicy,
    memory::{
        MemoryDestination, MemorySource, MemoryTypeSystem, MemoryWriteCursor, SchemaDocument,
        TableDocument,
    },
    rowset::percent,
    store::DestinationTable,
};

/// Documents and configuration a run works from.
struct Inputs {
    source: MemorySource,
    dest: MemoryDestination,
    types: Arc<MemoryTypeSystem>,
    config: CopyConfig,
}

fn load_inputs(args: &TableArgs) -> Result<Inputs> {
    let config = CopyConfig::load_or_default(args.config.as_deref())?;
    let schema = SchemaDocument::load(&args.schema)?;
    let types = Arc::new(
        MemoryTypeSystem::from_schema(&schema)
            .with_context(|| format!("Building type system from {:?}", args.schema))?,
    );
    let table = TableDocument::load(&args.input)?;
    let source = MemorySource::new(table)
        .with_context(|| format!("Opening source table {:?}", args.input))?;
    let dest = MemoryDestination::new(&schema, Arc::clone(&types));
    debug!(
        "Loaded {} source column(s) and {} schema type(s)",
        source.table().columns.len(),
        schema.types.len()
    );
    Ok(Inputs {
        source,
        dest,
        types,
        config,
    })
}

fn run_options(table: &TableArgs) -> RunOptions {
    RunOptions {
        columns: table.requested_columns(),
        excluded: table.excluded_columns(),
        table_prefix: table.table_name.clone(),
        strict: table.strict,
        ..RunOptions::default()
    }
}

pub fn execute_match(args: &MatchArgs) -> Result<()> {
    let inputs = load_inputs(&args.table)?;
    let ctx = prepare(
        &inputs.source,
        &inputs.dest,
        inputs.types.as_ref(),
        &inputs.config,
        run_options(&args.table),
    )
    .with_context(|| format!("Matching columns of {:?}", args.table.input))?;
    println!("{}", ctx.report);
    Ok(())
}

pub fn execute(args: &CopyArgs) -> Result<()> {
    let output = args.output.as_path();
    info!(
        "Copying '{}' -> '{}'",
        args.table.input.display(),
        output.display()
    );
    if same_file(&args.table.input, output) {
        bail!("Source and destination are the same file {output:?}");
    }
    let existed = output.exists();
    if existed && !args.force {
        bail!("Destination {output:?} already exists; use --force to overwrite it");
    }

    let result = copy_into(args);
    if let Err(err) = &result {
        discard_failed_output(args, existed, err);
    }
    result
}

/// Removes a destination this run created, unless `--keep-partial` is set.
/// A destination that existed before the run is never touched.
fn discard_failed_output(args: &CopyArgs, existed: bool, err: &anyhow::Error) {
    let output = args.output.as_path();
    if existed || args.keep_partial || !output.exists() {
        return;
    }
    match fs::remove_file(output) {
        Ok(()) => warn!("Removed incomplete destination {output:?}"),
        Err(remove_err) => warn!("Could not remove {output:?} after '{err}': {remove_err}"),
    }
}

fn copy_into(args: &CopyArgs) -> Result<()> {
    let mut inputs = load_inputs(&args.table)?;
    let options = RunOptions {
        rows: args.rows.clone(),
        filter: FilterPolicy {
            ignore_reject: args.ignore_reject,
            ignore_redact: args.ignore_redact,
        },
        show_redact: args.show_redact,
        ..run_options(&args.table)
    };
    let ctx = prepare(
        &inputs.source,
        &inputs.dest,
        inputs.types.as_ref(),
        &inputs.config,
        options,
    )
    .with_context(|| format!("Preparing copy of {:?}", args.table.input))?;
    if args.show_matching {
        println!("{}", ctx.report);
    }

    let mut engine =
        CopyEngine::bind(ctx, &inputs.source, &inputs.dest).context("Binding cursors")?;
    let cancel = CancellationToken::new();
    let mut progress = LogProgress::default();
    let sink: Option<&mut dyn ProgressSink> = if args.show_progress {
        Some(&mut progress as &mut dyn ProgressSink)
    } else {
        None
    };
    let result = engine.run(&cancel, sink);
    let outcome = match result {
        Ok(outcome) if outcome.is_complete() => outcome,
        Ok(outcome) => {
            let (_, cursor) = engine.into_cursors();
            keep_partial(args, &cursor);
            return Err(anyhow!(
                "Copy cancelled after {} of {} row(s)",
                outcome.copied + outcome.rejected,
                outcome.selected
            ));
        }
        Err(err) => {
            let (_, cursor) = engine.into_cursors();
            keep_partial(args, &cursor);
            return Err(err).with_context(|| format!("Copying {:?}", args.table.input));
        }
    };

    if args.reindex {
        inputs.dest.reindex().context("Reindexing destination")?;
    }
    let mut table = inputs.dest.finish()?;
    if checksum::enabled(args.checksum, inputs.source.table()) {
        checksum::record(&mut table).context("Recording checksums")?;
    }
    table.save(&args.output)?;
    report_outcome(&outcome, &args.output);
    Ok(())
}

/// Saves the rows committed before a failure when `--keep-partial` is set.
fn keep_partial(args: &CopyArgs, cursor: &MemoryWriteCursor) {
    if !args.keep_partial {
        return;
    }
    let partial = cursor.snapshot();
    match partial.save(&args.output) {
        Ok(()) => warn!(
            "Kept partial destination with {} row(s) in {:?}",
            partial.row_count(),
            args.output
        ),
        Err(err) => warn!("Could not keep partial destination {:?}: {err:#}", args.output),
    }
}

fn report_outcome(outcome: &CopyOutcome, output: &Path) {
    info!(
        "Wrote {} row(s) to {:?} ({} rejected, {} redacted)",
        outcome.copied, output, outcome.rejected, outcome.redacted
    );
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Logs every tenth percent of the selection.
#[derive(Debug, Default)]
struct LogProgress {
    last: Option<u32>,
}

impl ProgressSink for LogProgress {
    fn row_done(&mut self, done: u64, total: u64) {
        let pct = percent(done, total) / 10 * 10;
        if self.last.is_none_or(|last| pct > last) {
            self.last = Some(pct);
            info!("Progress: {pct}% ({done} of {total} row(s))");
        }
    }

    fn finished(&mut self, outcome: &CopyOutcome) {
        debug!(
            "Processed {} row(s) of {}",
            outcome.copied + outcome.rejected,
            outcome.selected
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use tempfile::tempdir;

    use super::*;
    use crate::cli::{Cli, Commands};

    const SCHEMA: &str = r#"
types:
  - { name: any }
  - { name: text, parent: any, text: true }
columns:
  - { name: READ, types: [text] }
"#;

    const SOURCE: &str = r#"
columns:
  - { name: READ, types: [text], cells: [ACGT, GGCC, TTAA] }
"#;

    fn copy_args(output: &Path, extra: &[&str]) -> CopyArgs {
        let mut argv = vec!["colcopy", "copy", "-i", "src.yml", "-s", "schema.yml", "-o"];
        argv.push(output.to_str().expect("utf-8 path"));
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).expect("parse").command {
            Commands::Copy(args) => args,
            Commands::Match(_) => panic!("expected copy"),
        }
    }

    struct CancelAfterFirst(CancellationToken);

    impl ProgressSink for CancelAfterFirst {
        fn row_done(&mut self, _done: u64, _total: u64) {
            self.0.cancel();
        }
    }

    /// Runs a copy that is cancelled after its first row.
    fn cancelled_cursor() -> MemoryWriteCursor {
        let schema: SchemaDocument = serde_yaml::from_str(SCHEMA).expect("schema");
        let table: TableDocument = serde_yaml::from_str(SOURCE).expect("source");
        let types = Arc::new(MemoryTypeSystem::from_schema(&schema).expect("types"));
        let source = MemorySource::new(table).expect("source table");
        let dest = MemoryDestination::new(&schema, Arc::clone(&types));
        let ctx = prepare(
            &source,
            &dest,
            types.as_ref(),
            &CopyConfig::default(),
            RunOptions::default(),
        )
        .expect("prepare");
        let mut engine = CopyEngine::bind(ctx, &source, &dest).expect("bind");
        let token = CancellationToken::new();
        let mut sink = CancelAfterFirst(token.clone());
        let outcome = engine.run(&token, Some(&mut sink)).expect("run");
        assert!(!outcome.is_complete());
        let (_, cursor) = engine.into_cursors();
        cursor
    }

    #[test]
    fn keep_partial_saves_only_committed_rows() {
        let dir = tempdir().expect("temp dir");
        let output = dir.path().join("partial.yml");
        let cursor = cancelled_cursor();

        keep_partial(&copy_args(&output, &[]), &cursor);
        assert!(!output.exists());

        keep_partial(&copy_args(&output, &["--keep-partial"]), &cursor);
        let saved = TableDocument::load(&output).expect("partial destination");
        assert_eq!(saved.row_count(), 1);
        assert_eq!(
            saved.column("READ").expect("READ").cells,
            vec![crate::memory::CellValue::Text("ACGT".into())]
        );
    }

    #[test]
    fn failed_run_removes_only_a_destination_it_created() {
        let dir = tempdir().expect("temp dir");
        let output = dir.path().join("dest.yml");
        let err = anyhow!("Copy cancelled");

        fs::write(&output, "partial").expect("write");
        discard_failed_output(&copy_args(&output, &[]), false, &err);
        assert!(!output.exists());

        fs::write(&output, "partial").expect("write");
        discard_failed_output(&copy_args(&output, &["--keep-partial"]), false, &err);
        assert!(output.exists());

        discard_failed_output(&copy_args(&output, &["--force"]), true, &err);
        assert_eq!(fs::read_to_string(&output).expect("read"), "partial");
    }
}
