//! Column store interfaces consumed by the engine.
//!
//! The storage engine itself lives elsewhere; these traits describe the
//! cursor protocol the copy needs. Column handles are opaque and only valid
//! for the cursor that produced them.

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnHandle(pub u32);

/// Inclusive-exclusive row-id range `[first, first + count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    pub first: i64,
    pub count: u64,
}

impl RowRange {
    pub fn new(first: i64, count: u64) -> Self {
        RowRange { first, count }
    }

    /// Range covering `[first, end)`; empty when `end <= first`.
    pub fn from_bounds(first: i64, end: i64) -> Self {
        let count = if end > first { (end - first) as u64 } else { 0 };
        RowRange { first, count }
    }

    pub fn end(&self) -> i64 {
        i64::try_from(self.count).map_or(i64::MAX, |count| self.first.saturating_add(count))
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn contains(&self, row_id: i64) -> bool {
        row_id >= self.first && row_id < self.end()
    }
}

/// Readable and writable datatypes of one column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeList {
    pub names: Vec<String>,
    pub default: Option<usize>,
}

/// A cell as the store hands it out: `elem_count` elements of `elem_bits`
/// bits each, starting `bit_offset` bits into `bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellData<'a> {
    pub elem_bits: u32,
    pub bit_offset: u32,
    pub elem_count: u32,
    pub bytes: &'a [u8],
}

impl<'a> CellData<'a> {
    pub fn bit_len(&self) -> u64 {
        u64::from(self.elem_bits) * u64::from(self.elem_count)
    }

    /// Bytes needed to hold the cell's bits.
    pub fn byte_len(&self) -> usize {
        self.bit_len().div_ceil(8) as usize
    }

    /// Reads element `index` as an unsigned little-endian integer.
    /// Elements wider than 64 bits are truncated to their low 64 bits.
    pub fn element(&self, index: u32) -> Option<u64> {
        if index >= self.elem_count {
            return None;
        }
        let width = self.elem_bits.min(64);
        let start = u64::from(self.bit_offset) + u64::from(index) * u64::from(self.elem_bits);
        let mut value = 0u64;
        if start % 8 == 0 && width % 8 == 0 {
            let first = (start / 8) as usize;
            let slice = self.bytes.get(first..first + (width / 8) as usize)?;
            for (shift, byte) in slice.iter().enumerate() {
                value |= u64::from(*byte) << (8 * shift);
            }
            return Some(value);
        }
        for bit in 0..u64::from(width) {
            let position = start + bit;
            let byte = *self.bytes.get((position / 8) as usize)?;
            if byte & (0x80 >> (position % 8)) != 0 {
                value |= 1 << (u64::from(width) - 1 - bit);
            }
        }
        Some(value)
    }

    /// Copies the cell's bits into a fresh buffer starting at bit 0.
    pub fn to_aligned(&self) -> Vec<u8> {
        extract_bits(self.bytes, u64::from(self.bit_offset), self.bit_len())
    }
}

/// Copies `bit_len` bits starting at `bit_offset` (MSB-first within each
/// byte) into a buffer aligned at bit 0. Trailing bits of the last byte are
/// zero.
pub fn extract_bits(bytes: &[u8], bit_offset: u64, bit_len: u64) -> Vec<u8> {
    let byte_len = bit_len.div_ceil(8) as usize;
    if bit_offset % 8 == 0 {
        let first = (bit_offset / 8) as usize;
        let mut out: Vec<u8> = bytes
            .iter()
            .skip(first)
            .take(byte_len)
            .copied()
            .collect();
        out.resize(byte_len, 0);
        let tail = (bit_len % 8) as u32;
        if tail != 0 {
            if let Some(last) = out.last_mut() {
                *last &= 0xFFu8 << (8 - tail);
            }
        }
        return out;
    }
    let mut out = vec![0u8; byte_len];
    for bit in 0..bit_len {
        let src = bit_offset + bit;
        let Some(byte) = bytes.get((src / 8) as usize) else {
            break;
        };
        if byte & (0x80 >> (src % 8)) != 0 {
            out[(bit / 8) as usize] |= 0x80 >> (bit % 8);
        }
    }
    out
}

pub trait ReadCursor {
    /// Adds a column by plain or cast-decorated name.
    fn add_column(&mut self, name: &str) -> StoreResult<ColumnHandle>;
    fn open(&mut self) -> StoreResult<()>;
    fn id_range(&self) -> StoreResult<RowRange>;
    fn open_row(&mut self, row_id: i64) -> StoreResult<()>;
    fn read_cell(&self, column: ColumnHandle) -> StoreResult<CellData<'_>>;
    fn close_row(&mut self) -> StoreResult<()>;
}

pub trait WriteCursor {
    fn add_column(&mut self, cast: &str) -> StoreResult<ColumnHandle>;
    fn open(&mut self) -> StoreResult<()>;
    fn open_row(&mut self) -> StoreResult<()>;
    fn write_cell(&mut self, column: ColumnHandle, cell: CellData<'_>) -> StoreResult<()>;
    fn commit_row(&mut self) -> StoreResult<()>;
    fn close_row(&mut self) -> StoreResult<()>;
    /// Final commit; the destination is only complete after this succeeds.
    fn commit(&mut self) -> StoreResult<()>;
}

pub trait SourceTable {
    type Cursor: ReadCursor;

    fn readable_columns(&self) -> StoreResult<Vec<String>>;
    fn readable_types(&self, column: &str) -> StoreResult<TypeList>;
    fn create_cursor(&self) -> StoreResult<Self::Cursor>;
}

pub trait DestinationTable {
    type Cursor: WriteCursor;

    /// Writable datatypes for `column`; empty when the column is not writable.
    fn writable_types(&self, column: &str) -> StoreResult<Vec<String>>;
    fn create_cursor(&self) -> StoreResult<Self::Cursor>;

    fn reindex(&mut self) -> StoreResult<()> {
        Ok(())
    }
}
