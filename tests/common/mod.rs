#![allow(dead_code)]

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use colcopy::catalog::ColumnCatalog;
use colcopy::config::CopyConfig;
use colcopy::engine::{CancellationToken, CopyEngine, CopyOutcome, RunOptions, prepare};
use colcopy::error::{CopyError, StoreError};
use colcopy::memory::{
    MemoryDestination, MemoryReadCursor, MemorySource, MemoryTypeSystem, SchemaDocument,
    TableDocument,
};
use colcopy::store::{CellData, ColumnHandle, ReadCursor, RowRange, SourceTable, TypeList};
use colcopy::types::{TypeCandidate, TypeHandle, TypeSystem, split_cast};
use tempfile::{TempDir, tempdir};

pub const SCHEMA_YAML: &str = r#"
types:
  - { name: any }
  - { name: text, parent: any, text: true }
  - { name: "INSDC:dna:text", parent: text }
  - { name: "INSDC:quality:phred", parent: any }
  - { name: U8, parent: any }
  - { name: I32, parent: any, bits: 32 }
  - { name: I16, parent: I32, bits: 16 }
columns:
  - { name: READ, types: ["INSDC:dna:text"] }
  - { name: QUALITY, types: ["INSDC:quality:phred"] }
  - { name: SPOT_LEN, types: [I32] }
"#;

/// Four rows. READ_FILTER passes row 1 and 4, rejects row 2 and redacts
/// row 3. NAME has no writable counterpart in the schema.
pub const SOURCE_YAML: &str = r#"
first_row: 1
columns:
  - name: READ
    types: ["INSDC:dna:text"]
    cells: [ACGT, GGCC, TTAA, CAGT]
  - name: QUALITY
    types: ["INSDC:quality:phred"]
    cells: [[30, 31, 32, 33], [20, 20, 20, 20], [10, 11, 12, 13], [40, 40, 40, 40]]
  - name: SPOT_LEN
    types: [I32, I16]
    default_type: I32
    elem_bits: 32
    cells: [[4], [4], [4], [4]]
  - name: READ_FILTER
    types: [U8]
    cells: [[0], [1], [3], [0]]
  - name: NAME
    types: [text]
    cells: [r1, r2, r3, r4]
"#;

pub fn schema() -> SchemaDocument {
    serde_yaml::from_str(SCHEMA_YAML).expect("schema yaml")
}

pub fn source_table() -> TableDocument {
    serde_yaml::from_str(SOURCE_YAML).expect("source yaml")
}

pub struct Fixture {
    pub source: MemorySource,
    pub dest: MemoryDestination,
    pub types: Arc<MemoryTypeSystem>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_tables(schema(), source_table())
    }

    pub fn with_tables(schema: SchemaDocument, table: TableDocument) -> Self {
        let types = Arc::new(MemoryTypeSystem::from_schema(&schema).expect("type system"));
        Fixture {
            source: MemorySource::new(table).expect("source table"),
            dest: MemoryDestination::new(&schema, Arc::clone(&types)),
            types,
        }
    }

    /// Runs a complete copy and returns the outcome with the committed table.
    pub fn copy(
        &self,
        config: &CopyConfig,
        options: RunOptions,
    ) -> Result<(CopyOutcome, TableDocument), CopyError> {
        let ctx = prepare(&self.source, &self.dest, self.types.as_ref(), config, options)?;
        let mut engine = CopyEngine::bind(ctx, &self.source, &self.dest)?;
        let outcome = engine.run(&CancellationToken::new(), None)?;
        let table = self.dest.finish()?;
        Ok((outcome, table))
    }
}

/// Type system with an explicit compatibility table.
#[derive(Default)]
pub struct PairTable {
    names: Vec<String>,
    pairs: HashMap<(u32, u32), u32>,
}

impl PairTable {
    pub fn handle(&mut self, name: &str) -> TypeHandle {
        if let Some(idx) = self.names.iter().position(|n| n == name) {
            return TypeHandle(idx as u32);
        }
        self.names.push(name.to_string());
        TypeHandle((self.names.len() - 1) as u32)
    }

    pub fn compatible(mut self, src: &str, dst: &str, distance: u32) -> Self {
        let (s, d) = (self.handle(src), self.handle(dst));
        self.pairs.insert((s.0, d.0), distance);
        self
    }
}

impl TypeSystem for PairTable {
    fn resolve(&self, type_name: &str) -> Result<TypeHandle, StoreError> {
        self.names
            .iter()
            .position(|n| n == type_name)
            .map(|idx| TypeHandle(idx as u32))
            .ok_or_else(|| StoreError::new("resolve", format!("unknown type {type_name}")))
    }

    fn common_ancestor(&self, src: TypeHandle, dst: TypeHandle) -> Option<u32> {
        self.pairs.get(&(src.0, dst.0)).copied()
    }

    fn is_a(&self, ty: TypeHandle, target: TypeHandle) -> bool {
        ty == target
    }
}

/// One-column catalog with the given source types `(name, is_default)` and
/// destination types, resolved through `types`.
pub fn single_column(
    types: &mut PairTable,
    name: &str,
    src: &[(&str, bool)],
    dst: &[&str],
) -> ColumnCatalog {
    let mut catalog = ColumnCatalog::new();
    catalog.discover([name]);
    catalog.mark_requested(None);
    let src_types: Vec<_> = src
        .iter()
        .enumerate()
        .map(|(order, (ty, default))| TypeCandidate::new(*ty, types.handle(ty), *default, order))
        .collect();
    let dst_types: Vec<_> = dst
        .iter()
        .enumerate()
        .map(|(order, ty)| TypeCandidate::new(*ty, types.handle(ty), false, order))
        .collect();
    let col = &mut catalog.columns_mut()[0];
    col.src_types = src_types;
    col.to_copy = !dst_types.is_empty();
    col.dst_types = dst_types;
    catalog
}

/// Source whose cursor fails to read `column` at `row_id`.
pub struct FailingSource {
    pub inner: MemorySource,
    pub column: String,
    pub row_id: i64,
}

impl SourceTable for FailingSource {
    type Cursor = FailingCursor;

    fn readable_columns(&self) -> Result<Vec<String>, StoreError> {
        self.inner.readable_columns()
    }

    fn readable_types(&self, column: &str) -> Result<TypeList, StoreError> {
        self.inner.readable_types(column)
    }

    fn create_cursor(&self) -> Result<FailingCursor, StoreError> {
        Ok(FailingCursor {
            inner: self.inner.create_cursor()?,
            column: self.column.clone(),
            row_id: self.row_id,
            failing: None,
            current: None,
        })
    }
}

pub struct FailingCursor {
    inner: MemoryReadCursor,
    column: String,
    row_id: i64,
    failing: Option<ColumnHandle>,
    current: Option<i64>,
}

impl ReadCursor for FailingCursor {
    fn add_column(&mut self, name: &str) -> Result<ColumnHandle, StoreError> {
        let handle = self.inner.add_column(name)?;
        let bare = split_cast(name).map_or(name, |(_, col)| col);
        if bare == self.column {
            self.failing = Some(handle);
        }
        Ok(handle)
    }

    fn open(&mut self) -> Result<(), StoreError> {
        self.inner.open()
    }

    fn id_range(&self) -> Result<RowRange, StoreError> {
        self.inner.id_range()
    }

    fn open_row(&mut self, row_id: i64) -> Result<(), StoreError> {
        self.current = Some(row_id);
        self.inner.open_row(row_id)
    }

    fn read_cell(&self, column: ColumnHandle) -> Result<CellData<'_>, StoreError> {
        if Some(column) == self.failing && self.current == Some(self.row_id) {
            return Err(StoreError::new("read_cell", "injected blob failure"));
        }
        self.inner.read_cell(column)
    }

    fn close_row(&mut self) -> Result<(), StoreError> {
        self.current = None;
        self.inner.close_row()
    }
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}
