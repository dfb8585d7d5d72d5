use log::{debug, warn};
use sha2::{Digest, Sha256};

use crate::{
    cli::ChecksumMode,
    error::CopyError,
    memory::{ColumnDocument, TableDocument},
};

/// Whether the destination gets checksums: `auto` follows the source.
pub fn enabled(mode: ChecksumMode, source: &TableDocument) -> bool {
    match mode {
        ChecksumMode::On => true,
        ChecksumMode::Off => false,
        ChecksumMode::Auto => !source.checksums.is_empty(),
    }
}

/// SHA-256 over the column's element size and every encoded cell, each
/// prefixed with its element count.
pub fn column_digest(column: &ColumnDocument) -> Result<String, CopyError> {
    let mut hasher = Sha256::new();
    hasher.update(column.elem_bits.to_le_bytes());
    for (idx, cell) in column.cells.iter().enumerate() {
        let (bytes, count) = cell.encode(column.elem_bits).map_err(|reason| {
            CopyError::config(format!("column '{}' cell {idx}: {reason}", column.name))
        })?;
        hasher.update(count.to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Replaces the table's checksums with fresh digests of every column.
pub fn record(table: &mut TableDocument) -> Result<(), CopyError> {
    table.checksums.clear();
    for column in &table.columns {
        let digest = column_digest(column)?;
        debug!("Checksum for '{}': {digest}", column.name);
        table.checksums.insert(column.name.clone(), digest);
    }
    Ok(())
}

/// Names of columns whose recorded checksum no longer matches their cells.
pub fn verify(table: &TableDocument) -> Result<Vec<String>, CopyError> {
    let mut mismatched = Vec::new();
    for (name, recorded) in &table.checksums {
        let Some(column) = table.column(name) else {
            warn!("Checksum recorded for missing column '{name}'");
            mismatched.push(name.clone());
            continue;
        };
        if column_digest(column)? != *recorded {
            mismatched.push(name.clone());
        }
    }
    Ok(mismatched)
}
