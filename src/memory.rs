//! In-memory tables and type system backed by YAML/JSON documents.
//!
//! A [`SchemaDocument`] declares the type hierarchy and the destination's
//! writable columns; a [`TableDocument`] holds a table's columns and cells.
//! Cells are stored verbatim: a cast only selects which declared type a
//! column is addressed as, the bytes are never converted.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    path::Path,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::{
    error::{CopyError, StoreError},
    store::{
        CellData, ColumnHandle, DestinationTable, ReadCursor, RowRange, SourceTable, StoreResult,
        TypeList, WriteCursor,
    },
    types::{TypeHandle, TypeKey, TypeSystem, split_cast},
    yaml_provider,
};

const SUPPORTED_ELEM_BITS: [u32; 4] = [8, 16, 32, 64];

fn default_bits() -> u32 {
    8
}

fn default_first_row() -> i64 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypeDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default = "default_bits")]
    pub bits: u32,
    /// Cells of this type (or a descendant) are rendered as text.
    #[serde(default)]
    pub text: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WritableColumn {
    pub name: String,
    pub types: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaDocument {
    pub types: Vec<TypeDef>,
    #[serde(default)]
    pub columns: Vec<WritableColumn>,
}

impl SchemaDocument {
    pub fn load(path: &Path) -> Result<Self> {
        yaml_provider::load_from_path(path).with_context(|| format!("Loading schema {path:?}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CellValue {
    Text(String),
    Values(Vec<u64>),
}

impl CellValue {
    /// Encodes the cell as `elem_bits`-wide little-endian elements.
    pub fn encode(&self, elem_bits: u32) -> Result<(Vec<u8>, u32), String> {
        match self {
            CellValue::Text(text) => {
                if elem_bits != 8 {
                    return Err(format!("text cell needs 8-bit elements, not {elem_bits}"));
                }
                Ok((text.as_bytes().to_vec(), text.len() as u32))
            }
            CellValue::Values(values) => {
                let width = (elem_bits / 8) as usize;
                let mut bytes = Vec::with_capacity(values.len() * width);
                for value in values {
                    if elem_bits < 64 && value >> elem_bits != 0 {
                        return Err(format!("value {value} does not fit in {elem_bits} bits"));
                    }
                    bytes.extend_from_slice(&value.to_le_bytes()[..width]);
                }
                Ok((bytes, values.len() as u32))
            }
        }
    }

    pub fn decode(cell: &CellData<'_>, as_text: bool) -> CellValue {
        if as_text && cell.elem_bits == 8 && cell.bit_offset == 0 {
            let bytes = cell.bytes.get(..cell.elem_count as usize).unwrap_or(cell.bytes);
            if let Ok(text) = std::str::from_utf8(bytes) {
                return CellValue::Text(text.to_string());
            }
        }
        CellValue::Values((0..cell.elem_count).filter_map(|i| cell.element(i)).collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ColumnDocument {
    pub name: String,
    pub types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_type: Option<String>,
    #[serde(default = "default_bits")]
    pub elem_bits: u32,
    #[serde(default)]
    pub cells: Vec<CellValue>,
}

/// Written by `reindex`: column positions and the row count.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableIndex {
    pub row_count: u64,
    pub columns: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableDocument {
    #[serde(default = "default_first_row")]
    pub first_row: i64,
    pub columns: Vec<ColumnDocument>,
    /// Per-column SHA-256 digests, hex encoded.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checksums: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<TableIndex>,
}

impl TableDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let doc: TableDocument = yaml_provider::load_from_path(path)
            .with_context(|| format!("Loading table {path:?}"))?;
        doc.validate()
            .with_context(|| format!("Validating table {path:?}"))?;
        Ok(doc)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        yaml_provider::save_to_path(path, self).with_context(|| format!("Writing table {path:?}"))
    }

    pub fn row_count(&self) -> u64 {
        self.columns
            .first()
            .map_or(0, |col| col.cells.len() as u64)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDocument> {
        self.columns.iter().find(|col| col.name == name)
    }

    pub fn validate(&self) -> Result<(), CopyError> {
        let mut seen = HashSet::new();
        let rows = self.row_count() as usize;
        for col in &self.columns {
            if col.name.trim().is_empty() {
                return Err(CopyError::config("table column without a name"));
            }
            if !seen.insert(col.name.as_str()) {
                return Err(CopyError::config(format!("duplicate column '{}'", col.name)));
            }
            if col.types.is_empty() {
                return Err(CopyError::config(format!(
                    "column '{}' declares no types",
                    col.name
                )));
            }
            if let Some(default) = &col.default_type {
                let key = TypeKey::new(default);
                if !col.types.iter().any(|ty| TypeKey::new(ty) == key) {
                    return Err(CopyError::config(format!(
                        "default type '{default}' of column '{}' is not one of its types",
                        col.name
                    )));
                }
            }
            if !SUPPORTED_ELEM_BITS.contains(&col.elem_bits) {
                return Err(CopyError::config(format!(
                    "column '{}' has unsupported element size {}",
                    col.name, col.elem_bits
                )));
            }
            if col.cells.len() != rows {
                return Err(CopyError::config(format!(
                    "column '{}' has {} cell(s), expected {rows}",
                    col.name,
                    col.cells.len()
                )));
            }
            for (idx, cell) in col.cells.iter().enumerate() {
                cell.encode(col.elem_bits).map_err(|reason| {
                    CopyError::config(format!("column '{}' cell {idx}: {reason}", col.name))
                })?;
            }
        }
        Ok(())
    }
}

/// Type hierarchy from a schema document. Handles index `names`.
#[derive(Debug, Clone)]
pub struct MemoryTypeSystem {
    names: Vec<String>,
    parents: Vec<Option<usize>>,
    bits: Vec<u32>,
    text: Vec<bool>,
    lookup: HashMap<TypeKey, usize>,
}

impl MemoryTypeSystem {
    pub fn from_schema(schema: &SchemaDocument) -> Result<Self, CopyError> {
        let mut lookup = HashMap::new();
        for (idx, def) in schema.types.iter().enumerate() {
            let key = TypeKey::new(&def.name);
            if key.as_str().is_empty() {
                return Err(CopyError::config("schema type without a name"));
            }
            if lookup.insert(key, idx).is_some() {
                return Err(CopyError::config(format!("duplicate type '{}'", def.name)));
            }
        }
        let parents = schema
            .types
            .iter()
            .map(|def| match &def.parent {
                Some(parent) => lookup
                    .get(&TypeKey::new(parent))
                    .copied()
                    .map(Some)
                    .ok_or_else(|| {
                        CopyError::config(format!(
                            "type '{}' has unknown parent '{parent}'",
                            def.name
                        ))
                    }),
                None => Ok(None),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let types = MemoryTypeSystem {
            names: schema.types.iter().map(|def| def.name.clone()).collect(),
            parents,
            bits: schema.types.iter().map(|def| def.bits).collect(),
            text: schema.types.iter().map(|def| def.text).collect(),
            lookup,
        };
        for idx in 0..types.names.len() {
            if types.ancestors(idx).count() > types.names.len() {
                return Err(CopyError::config(format!(
                    "type '{}' is part of a parent cycle",
                    types.names[idx]
                )));
            }
        }
        Ok(types)
    }

    /// `idx` followed by its parents up to the root. Stops after
    /// `names.len() + 1` steps so cycles terminate.
    fn ancestors(&self, idx: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(Some(idx), move |&current| self.parents[current])
            .take(self.names.len() + 1)
    }

    pub fn name(&self, handle: TypeHandle) -> Option<&str> {
        self.names.get(handle.0 as usize).map(String::as_str)
    }

    pub fn bits(&self, handle: TypeHandle) -> Option<u32> {
        self.bits.get(handle.0 as usize).copied()
    }

    /// Whether the named type, or one of its ancestors, is a text type.
    pub fn is_text(&self, type_name: &str) -> bool {
        self.lookup
            .get(&TypeKey::new(type_name))
            .is_some_and(|&idx| self.ancestors(idx).any(|a| self.text[a]))
    }
}

impl TypeSystem for MemoryTypeSystem {
    fn resolve(&self, type_name: &str) -> Result<TypeHandle, StoreError> {
        self.lookup
            .get(&TypeKey::new(type_name))
            .map(|&idx| TypeHandle(idx as u32))
            .ok_or_else(|| StoreError::new("resolve", format!("unknown type '{type_name}'")))
    }

    fn common_ancestor(&self, src: TypeHandle, dst: TypeHandle) -> Option<u32> {
        let (src, dst) = (src.0 as usize, dst.0 as usize);
        if src >= self.names.len() || dst >= self.names.len() {
            return None;
        }
        let src_chain: Vec<usize> = self.ancestors(src).collect();
        self.ancestors(dst)
            .enumerate()
            .find_map(|(dst_steps, ancestor)| {
                src_chain
                    .iter()
                    .position(|&a| a == ancestor)
                    .map(|src_steps| (src_steps + dst_steps) as u32)
            })
    }

    fn is_a(&self, ty: TypeHandle, target: TypeHandle) -> bool {
        let ty = ty.0 as usize;
        ty < self.names.len() && self.ancestors(ty).any(|a| a as u32 == target.0)
    }
}

fn store_err(operation: &'static str, message: impl Into<String>) -> StoreError {
    StoreError::new(operation, message)
}

/// Locates `column` and checks an optional cast against its declared types.
fn resolve_cast<'a>(
    name: &'a str,
    types_of: impl Fn(&str) -> Option<&'a [String]>,
) -> StoreResult<(&'a str, Option<&'a str>)> {
    let (ty, column) = match split_cast(name) {
        Some((ty, column)) => (Some(ty), column),
        None => (None, name.trim()),
    };
    let types = types_of(column)
        .ok_or_else(|| store_err("add_column", format!("unknown column '{column}'")))?;
    if let Some(ty) = ty {
        if !types.iter().any(|t| TypeKey::new(t) == TypeKey::new(ty)) {
            return Err(store_err(
                "add_column",
                format!("column '{column}' cannot be addressed as '{ty}'"),
            ));
        }
    }
    Ok((column, ty))
}

#[derive(Debug, Clone)]
pub struct MemorySource {
    table: Arc<TableDocument>,
}

impl MemorySource {
    pub fn new(table: TableDocument) -> Result<Self, CopyError> {
        table.validate()?;
        Ok(MemorySource {
            table: Arc::new(table),
        })
    }

    pub fn table(&self) -> &TableDocument {
        &self.table
    }
}

impl SourceTable for MemorySource {
    type Cursor = MemoryReadCursor;

    fn readable_columns(&self) -> StoreResult<Vec<String>> {
        Ok(self.table.columns.iter().map(|col| col.name.clone()).collect())
    }

    fn readable_types(&self, column: &str) -> StoreResult<TypeList> {
        let col = self
            .table
            .column(column)
            .ok_or_else(|| store_err("readable_types", format!("unknown column '{column}'")))?;
        let default = col.default_type.as_ref().and_then(|default| {
            let key = TypeKey::new(default);
            col.types.iter().position(|ty| TypeKey::new(ty) == key)
        });
        Ok(TypeList {
            names: col.types.clone(),
            default,
        })
    }

    fn create_cursor(&self) -> StoreResult<MemoryReadCursor> {
        Ok(MemoryReadCursor {
            table: Arc::clone(&self.table),
            columns: Vec::new(),
            opened: false,
            row: None,
            cells: Vec::new(),
        })
    }
}

#[derive(Debug)]
pub struct MemoryReadCursor {
    table: Arc<TableDocument>,
    columns: Vec<usize>,
    opened: bool,
    row: Option<i64>,
    // encoded cells of the open row, one per added column
    cells: Vec<(Vec<u8>, u32)>,
}

impl ReadCursor for MemoryReadCursor {
    fn add_column(&mut self, name: &str) -> StoreResult<ColumnHandle> {
        if self.opened {
            return Err(store_err("add_column", "cursor is already open"));
        }
        let table = Arc::clone(&self.table);
        let (column, _) = resolve_cast(name, |col| {
            table.column(col).map(|c| c.types.as_slice())
        })?;
        let position = self
            .table
            .columns
            .iter()
            .position(|col| col.name == column)
            .ok_or_else(|| store_err("add_column", format!("unknown column '{column}'")))?;
        self.columns.push(position);
        Ok(ColumnHandle((self.columns.len() - 1) as u32))
    }

    fn open(&mut self) -> StoreResult<()> {
        self.opened = true;
        Ok(())
    }

    fn id_range(&self) -> StoreResult<RowRange> {
        Ok(RowRange::new(self.table.first_row, self.table.row_count()))
    }

    fn open_row(&mut self, row_id: i64) -> StoreResult<()> {
        if !self.opened {
            return Err(store_err("open_row", "cursor is not open"));
        }
        if self.row.is_some() {
            return Err(store_err("open_row", "previous row is still open"));
        }
        let range = self.id_range()?;
        if !range.contains(row_id) {
            return Err(store_err("open_row", format!("row #{row_id} is out of range")));
        }
        let idx = (row_id - range.first) as usize;
        self.cells.clear();
        for &position in &self.columns {
            let col = &self.table.columns[position];
            let cell = col.cells[idx]
                .encode(col.elem_bits)
                .map_err(|reason| store_err("open_row", reason))?;
            self.cells.push(cell);
        }
        self.row = Some(row_id);
        Ok(())
    }

    fn read_cell(&self, column: ColumnHandle) -> StoreResult<CellData<'_>> {
        if self.row.is_none() {
            return Err(store_err("read_cell", "no row is open"));
        }
        let position = *self
            .columns
            .get(column.0 as usize)
            .ok_or_else(|| store_err("read_cell", format!("bad column handle {}", column.0)))?;
        let (bytes, elem_count) = &self.cells[column.0 as usize];
        Ok(CellData {
            elem_bits: self.table.columns[position].elem_bits,
            bit_offset: 0,
            elem_count: *elem_count,
            bytes,
        })
    }

    fn close_row(&mut self) -> StoreResult<()> {
        self.row = None;
        Ok(())
    }
}

/// Destination table; the write cursor publishes its table on the final
/// commit.
#[derive(Debug, Clone)]
pub struct MemoryDestination {
    writable: Arc<BTreeMap<String, Vec<String>>>,
    types: Arc<MemoryTypeSystem>,
    committed: Arc<Mutex<Option<TableDocument>>>,
}

impl MemoryDestination {
    pub fn new(schema: &SchemaDocument, types: Arc<MemoryTypeSystem>) -> Self {
        let writable = schema
            .columns
            .iter()
            .map(|col| (col.name.clone(), col.types.clone()))
            .collect();
        MemoryDestination {
            writable: Arc::new(writable),
            types,
            committed: Arc::new(Mutex::new(None)),
        }
    }

    /// The committed table; an error when no cursor completed its commit.
    pub fn finish(&self) -> Result<TableDocument, CopyError> {
        self.lock("finish")
            .map_err(CopyError::Commit)?
            .clone()
            .ok_or_else(|| CopyError::Commit(store_err("finish", "destination was not committed")))
    }

    fn lock(
        &self,
        operation: &'static str,
    ) -> StoreResult<std::sync::MutexGuard<'_, Option<TableDocument>>> {
        self.committed
            .lock()
            .map_err(|_| store_err(operation, "destination state is poisoned"))
    }
}

impl DestinationTable for MemoryDestination {
    type Cursor = MemoryWriteCursor;

    fn writable_types(&self, column: &str) -> StoreResult<Vec<String>> {
        Ok(self.writable.get(column).cloned().unwrap_or_default())
    }

    fn create_cursor(&self) -> StoreResult<MemoryWriteCursor> {
        Ok(MemoryWriteCursor {
            dest: self.clone(),
            columns: Vec::new(),
            opened: false,
            row_open: false,
            pending: Vec::new(),
            rows: Vec::new(),
        })
    }

    fn reindex(&mut self) -> StoreResult<()> {
        let mut guard = self.lock("reindex")?;
        let table = guard
            .as_mut()
            .ok_or_else(|| store_err("reindex", "destination was not committed"))?;
        let index = TableIndex {
            row_count: table.row_count(),
            columns: table
                .columns
                .iter()
                .enumerate()
                .map(|(idx, col)| (col.name.clone(), idx))
                .collect(),
        };
        debug!("Reindexed {} column(s)", index.columns.len());
        table.index = Some(index);
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct WriteColumn {
    name: String,
    type_name: String,
}

type WrittenCell = (u32, Vec<u8>, u32);

#[derive(Debug)]
pub struct MemoryWriteCursor {
    dest: MemoryDestination,
    columns: Vec<WriteColumn>,
    opened: bool,
    row_open: bool,
    pending: Vec<Option<WrittenCell>>,
    rows: Vec<Vec<WrittenCell>>,
}

impl MemoryWriteCursor {
    pub fn rows_committed(&self) -> usize {
        self.rows.len()
    }

    /// Table built from the rows committed so far.
    pub fn snapshot(&self) -> TableDocument {
        let columns = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let as_text = self.dest.types.is_text(&col.type_name);
                let elem_bits = self
                    .rows
                    .first()
                    .map(|row| row[idx].0)
                    .or_else(|| {
                        self.dest
                            .types
                            .resolve(&col.type_name)
                            .ok()
                            .and_then(|handle| self.dest.types.bits(handle))
                    })
                    .unwrap_or_else(default_bits);
                let cells = self
                    .rows
                    .iter()
                    .map(|row| {
                        let (bits, bytes, count) = &row[idx];
                        CellValue::decode(
                            &CellData {
                                elem_bits: *bits,
                                bit_offset: 0,
                                elem_count: *count,
                                bytes,
                            },
                            as_text,
                        )
                    })
                    .collect();
                ColumnDocument {
                    name: col.name.clone(),
                    types: vec![col.type_name.clone()],
                    default_type: None,
                    elem_bits,
                    cells,
                }
            })
            .collect();
        TableDocument {
            first_row: default_first_row(),
            columns,
            checksums: BTreeMap::new(),
            index: None,
        }
    }
}

impl WriteCursor for MemoryWriteCursor {
    fn add_column(&mut self, cast: &str) -> StoreResult<ColumnHandle> {
        if self.opened {
            return Err(store_err("add_column", "cursor is already open"));
        }
        let writable = Arc::clone(&self.dest.writable);
        let (column, ty) = resolve_cast(cast, |col| writable.get(col).map(Vec::as_slice))?;
        let type_name = match ty {
            Some(ty) => ty.to_string(),
            None => writable
                .get(column)
                .and_then(|types| types.first())
                .cloned()
                .ok_or_else(|| store_err("add_column", format!("'{column}' has no types")))?,
        };
        if self.columns.iter().any(|col| col.name == column) {
            return Err(store_err("add_column", format!("'{column}' added twice")));
        }
        self.columns.push(WriteColumn {
            name: column.to_string(),
            type_name,
        });
        Ok(ColumnHandle((self.columns.len() - 1) as u32))
    }

    fn open(&mut self) -> StoreResult<()> {
        self.opened = true;
        Ok(())
    }

    fn open_row(&mut self) -> StoreResult<()> {
        if !self.opened {
            return Err(store_err("open_row", "cursor is not open"));
        }
        if self.row_open {
            return Err(store_err("open_row", "previous row is still open"));
        }
        self.pending = vec![None; self.columns.len()];
        self.row_open = true;
        Ok(())
    }

    fn write_cell(&mut self, column: ColumnHandle, cell: CellData<'_>) -> StoreResult<()> {
        if !self.row_open {
            return Err(store_err("write_cell", "no row is open"));
        }
        let slot = self
            .pending
            .get_mut(column.0 as usize)
            .ok_or_else(|| store_err("write_cell", format!("bad column handle {}", column.0)))?;
        *slot = Some((cell.elem_bits, cell.to_aligned(), cell.elem_count));
        Ok(())
    }

    fn commit_row(&mut self) -> StoreResult<()> {
        if !self.row_open {
            return Err(store_err("commit_row", "no row is open"));
        }
        if let Some(idx) = self.pending.iter().position(Option::is_none) {
            return Err(store_err(
                "commit_row",
                format!("column '{}' was not written", self.columns[idx].name),
            ));
        }
        let row = std::mem::take(&mut self.pending).into_iter().flatten().collect();
        self.rows.push(row);
        Ok(())
    }

    fn close_row(&mut self) -> StoreResult<()> {
        self.pending.clear();
        self.row_open = false;
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        if self.row_open {
            return Err(store_err("commit", "a row is still open"));
        }
        let table = self.snapshot();
        *self.dest.lock("commit")? = Some(table);
        Ok(())
    }
}
