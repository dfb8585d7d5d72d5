//! The copy run: discovery, matching, cursor binding and the row loop.
//!
//! A run goes through three stages. [`prepare`] scans the source and
//! destination and fixes a cast for every column, producing a [`RunContext`].
//! [`CopyEngine::bind`] turns that context into a pair of open cursors. Then
//! [`CopyEngine::run`] walks the selected rows, consulting the filter column
//! for each one, and commits the destination once every row is written.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{debug, info, warn};

use crate::{
    catalog::ColumnCatalog,
    config::CopyConfig,
    error::{CopyError, Result, StoreError},
    filter::{FilterPolicy, RowFilter, RowFilterDecision},
    matcher::{MatchReport, match_columns},
    redact::{RedactionPolicy, RedactionRule},
    rowset::RowSet,
    scratch::{DEFAULT_SCRATCH_LIMIT, ScratchBuffer},
    store::{CellData, ColumnHandle, DestinationTable, ReadCursor, SourceTable, WriteCursor},
    types::TypeSystem,
};

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Requested rows; `None` copies the full source range.
    pub rows: Option<RowSet>,
    /// Requested columns; `None` requests every readable column.
    pub columns: Option<Vec<String>>,
    /// Columns removed from the request, bare or `"<prefix>:<name>"`.
    pub excluded: Vec<String>,
    pub table_prefix: Option<String>,
    pub filter: FilterPolicy,
    /// Abort instead of dropping columns that have no compatible cast.
    pub strict: bool,
    pub show_redact: bool,
    pub scratch_limit: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            rows: None,
            columns: None,
            excluded: Vec::new(),
            table_prefix: None,
            filter: FilterPolicy::default(),
            strict: false,
            show_redact: false,
            scratch_limit: DEFAULT_SCRATCH_LIMIT,
        }
    }
}

/// Cooperative cancellation flag, checked once per row.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait ProgressSink {
    fn row_done(&mut self, done: u64, total: u64);

    fn finished(&mut self, _outcome: &CopyOutcome) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Complete,
    /// Stopped by the cancellation token; the destination was not committed.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyOutcome {
    pub status: RunStatus,
    /// Rows in the resolved selection.
    pub selected: u64,
    pub copied: u64,
    pub rejected: u64,
    pub redacted: u64,
}

impl CopyOutcome {
    pub fn is_complete(&self) -> bool {
        self.status == RunStatus::Complete
    }
}

/// Everything decided before the first row is touched.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub catalog: ColumnCatalog,
    pub report: MatchReport,
    pub redaction: RedactionPolicy,
    pub config: CopyConfig,
    pub options: RunOptions,
}

/// Discovers columns and types and chooses a cast for every column.
pub fn prepare<S, D, T>(
    source: &S,
    dest: &D,
    types: &T,
    config: &CopyConfig,
    options: RunOptions,
) -> Result<RunContext>
where
    S: SourceTable + ?Sized,
    D: DestinationTable + ?Sized,
    T: TypeSystem + ?Sized,
{
    config.validate()?;
    let redaction = RedactionPolicy::from_config(config)?;

    let names = source
        .readable_columns()
        .map_err(|err| CopyError::discovery("source columns", err))?;
    let mut catalog = ColumnCatalog::new();
    let discovered = catalog.discover(&names);
    debug!("Discovered {discovered} readable column(s)");

    catalog.mark_requested(options.columns.as_deref());
    catalog.exclude(options.table_prefix.as_deref(), &options.excluded);
    catalog.mark_excluded(&config.excluded_columns);
    catalog.load_source_types(source, types)?;
    catalog.load_destination_types(dest, types)?;
    debug!(
        "Requested columns: {} ({} writable)",
        catalog.projection_string(true),
        catalog.count_to_copy()
    );

    catalog.detect_filter_column(&config.filter_column);
    catalog.mark_redactable_by_name(&config.redactable_columns);
    catalog.mark_redactable_by_type(types, &config.redactable_types);
    catalog.unmark_do_not_redact(&config.do_not_redact);

    let report = match_columns(&mut catalog, types, config);
    let unresolved = report.unresolved();
    if options.strict && !unresolved.is_empty() {
        return Err(CopyError::Unresolved {
            columns: unresolved,
        });
    }

    Ok(RunContext {
        catalog,
        report,
        redaction,
        config: config.clone(),
        options,
    })
}

#[derive(Debug, Clone)]
struct ColumnPlan {
    name: String,
    src: ColumnHandle,
    dst: ColumnHandle,
    /// Set for redactable columns.
    redaction: Option<RedactionRule>,
    dst_cast: String,
}

#[derive(Debug, Clone)]
struct FilterBinding {
    name: String,
    handle: ColumnHandle,
    read_count: Option<(String, ColumnHandle)>,
}

pub struct CopyEngine<R: ReadCursor, W: WriteCursor> {
    read: R,
    write: W,
    plan: Vec<ColumnPlan>,
    filter: Option<FilterBinding>,
    row_filter: RowFilter,
    rows: Option<RowSet>,
    scratch: ScratchBuffer,
    show_redact: bool,
    catalog: ColumnCatalog,
}

impl<R: ReadCursor, W: WriteCursor> CopyEngine<R, W> {
    /// Creates and opens both cursors for the matched columns.
    ///
    /// A column the destination refuses is dropped with a warning. Fails with
    /// [`CopyError::NothingToCopy`] when no column survives.
    pub fn bind<S, D>(ctx: RunContext, source: &S, dest: &D) -> Result<Self>
    where
        S: SourceTable<Cursor = R> + ?Sized,
        D: DestinationTable<Cursor = W> + ?Sized,
    {
        let RunContext {
            mut catalog,
            redaction,
            config,
            options,
            ..
        } = ctx;

        let mut write = dest
            .create_cursor()
            .map_err(|err| CopyError::discovery("destination cursor", err))?;
        for col in catalog.columns_mut().iter_mut() {
            let Some(cast) = col.dst_cast() else {
                continue;
            };
            match write.add_column(&cast) {
                Ok(handle) => {
                    debug!("Write cursor column {cast}");
                    col.dst_handle = Some(handle);
                }
                Err(err) => {
                    warn!("Destination refused column '{cast}', it will not be copied: {err}");
                    col.to_copy = false;
                }
            }
        }

        let mut read = source
            .create_cursor()
            .map_err(|err| CopyError::discovery("source cursor", err))?;
        let mut plan = Vec::new();
        for col in catalog.columns_mut().iter_mut() {
            let (Some(dst), Some(dst_cast)) = (col.dst_handle, col.dst_cast()) else {
                continue;
            };
            let src_cast = col.src_cast();
            let src = read
                .add_column(&src_cast)
                .map_err(|err| CopyError::discovery(src_cast.as_str(), err))?;
            debug!("Read cursor column {src_cast}");
            col.src_handle = Some(src);
            plan.push(ColumnPlan {
                name: col.name.clone(),
                src,
                dst,
                redaction: col.redactable.then(|| redaction.resolve(col)),
                dst_cast,
            });
        }
        if plan.is_empty() {
            return Err(CopyError::NothingToCopy);
        }

        let filter = match catalog.filter_index().and_then(|idx| catalog.get(idx)) {
            Some(col) => {
                let handle = bind_aux_column(&mut read, &plan, &col.name)?;
                let read_count = match config
                    .read_count_column
                    .as_deref()
                    .and_then(|name| catalog.find(name))
                {
                    Some(reads) => Some((
                        reads.name.clone(),
                        bind_aux_column(&mut read, &plan, &reads.name)?,
                    )),
                    None => None,
                };
                Some(FilterBinding {
                    name: col.name.clone(),
                    handle,
                    read_count,
                })
            }
            None => None,
        };

        read.open()
            .map_err(|err| CopyError::discovery("source cursor", err))?;
        write
            .open()
            .map_err(|err| CopyError::discovery("destination cursor", err))?;
        info!(
            "Copying {} column(s){}",
            plan.len(),
            match &filter {
                Some(binding) => format!(", filtered by '{}'", binding.name),
                None => String::new(),
            }
        );

        Ok(CopyEngine {
            read,
            write,
            plan,
            filter,
            row_filter: RowFilter::new(options.filter),
            rows: options.rows,
            scratch: ScratchBuffer::new(options.scratch_limit),
            show_redact: options.show_redact,
            catalog,
        })
    }

    pub fn catalog(&self) -> &ColumnCatalog {
        &self.catalog
    }

    /// Names of the columns that will be written, in catalog order.
    pub fn copied_columns(&self) -> Vec<&str> {
        self.plan.iter().map(|col| col.name.as_str()).collect()
    }

    /// Intersection of the requested rows with the source's id range.
    pub fn resolve_rows(&self) -> Result<RowSet> {
        let range = self
            .read
            .id_range()
            .map_err(|err| CopyError::discovery("source id range", err))?;
        Ok(match &self.rows {
            Some(requested) => requested.intersect(range),
            None => RowSet::from_range(range),
        })
    }

    pub fn run(
        &mut self,
        cancel: &CancellationToken,
        mut progress: Option<&mut dyn ProgressSink>,
    ) -> Result<CopyOutcome> {
        let rows = self.resolve_rows()?;
        let total = rows.count();
        let mut outcome = CopyOutcome {
            status: RunStatus::Complete,
            selected: total,
            copied: 0,
            rejected: 0,
            redacted: 0,
        };
        if rows.is_empty() {
            info!("No rows selected in the source range");
        }

        let mut done = 0u64;
        for row_id in rows.iter() {
            if cancel.is_cancelled() {
                warn!("Copy cancelled after {done} of {total} row(s)");
                outcome.status = RunStatus::Cancelled;
                break;
            }
            self.read
                .open_row(row_id)
                .map_err(|source| CopyError::Row { row_id, source })?;

            let decision = self.decide(row_id)?;
            if decision == RowFilterDecision::Reject {
                outcome.rejected += 1;
            } else {
                let redact = decision == RowFilterDecision::Redact;
                copy_row(
                    &self.read,
                    &mut self.write,
                    &self.plan,
                    &mut self.scratch,
                    row_id,
                    redact,
                    self.show_redact,
                )?;
                outcome.copied += 1;
                if redact {
                    outcome.redacted += 1;
                }
            }

            self.read
                .close_row()
                .map_err(|source| CopyError::Row { row_id, source })?;
            done += 1;
            if let Some(sink) = progress.as_deref_mut() {
                sink.row_done(done, total);
            }
        }

        if outcome.is_complete() {
            self.write.commit().map_err(CopyError::Commit)?;
            info!(
                "Copied {} row(s) ({} rejected, {} redacted)",
                outcome.copied, outcome.rejected, outcome.redacted
            );
        }
        if let Some(sink) = progress.as_deref_mut() {
            sink.finished(&outcome);
        }
        Ok(outcome)
    }

    fn decide(&mut self, row_id: i64) -> Result<RowFilterDecision> {
        let Some(binding) = &self.filter else {
            return Ok(RowFilterDecision::Pass);
        };
        if self.row_filter.is_disabled() {
            return Ok(RowFilterDecision::Pass);
        }
        let read_count = match &binding.read_count {
            Some((name, handle)) => {
                let cell = self
                    .read
                    .read_cell(*handle)
                    .map_err(|err| CopyError::cell(name, row_id, err))?;
                cell.element(0)
            }
            None => None,
        };
        let cell = self
            .read
            .read_cell(binding.handle)
            .map_err(|err| CopyError::cell(&binding.name, row_id, err))?;
        Ok(self.row_filter.decide(row_id, &cell, read_count))
    }

    /// Releases the cursors, e.g. to inspect what a cancelled run wrote.
    pub fn into_cursors(self) -> (R, W) {
        (self.read, self.write)
    }
}

/// Reuses the handle of a copied column, otherwise adds `name` uncast.
fn bind_aux_column<R: ReadCursor>(
    read: &mut R,
    plan: &[ColumnPlan],
    name: &str,
) -> Result<ColumnHandle> {
    if let Some(col) = plan.iter().find(|col| col.name == name) {
        return Ok(col.src);
    }
    read.add_column(name)
        .map_err(|err| CopyError::discovery(name, err))
}

fn copy_row<R: ReadCursor, W: WriteCursor>(
    read: &R,
    write: &mut W,
    plan: &[ColumnPlan],
    scratch: &mut ScratchBuffer,
    row_id: i64,
    redact: bool,
    show_redact: bool,
) -> Result<()> {
    let row_err = |source: StoreError| CopyError::Row { row_id, source };
    write.open_row().map_err(row_err)?;
    for col in plan {
        let cell = read
            .read_cell(col.src)
            .map_err(|err| CopyError::cell(&col.name, row_id, err))?;
        let written = match col.redaction.as_ref().filter(|_| redact) {
            Some(rule) => {
                let len = cell.byte_len();
                let buf = scratch.ensure(len)?;
                rule.fill(buf);
                if show_redact {
                    info!(
                        "Redacting row #{row_id} {} ({len} byte(s) of 0x{:02X})",
                        col.dst_cast,
                        rule.first_byte()
                    );
                }
                write.write_cell(
                    col.dst,
                    CellData {
                        elem_bits: cell.elem_bits,
                        bit_offset: 0,
                        elem_count: cell.elem_count,
                        bytes: buf,
                    },
                )
            }
            None => write.write_cell(col.dst, cell),
        };
        written.map_err(|err| CopyError::cell(&col.name, row_id, err))?;
    }
    write.commit_row().map_err(row_err)?;
    write.close_row().map_err(row_err)?;
    Ok(())
}
