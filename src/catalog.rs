//! Column discovery and per-column copy state.
//!
//! The catalog holds one [`Column`] per readable source column, in discovery
//! order. Discovery and the two type scans fill it before any cursor is
//! bound; after matching it is treated as read-only.

use std::collections::HashSet;

use itertools::Itertools;
use log::debug;

use crate::{
    error::{CopyError, Result},
    store::{ColumnHandle, DestinationTable, SourceTable},
    types::{TypeCandidate, TypeHandle, TypePair, TypeSystem, decorate},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub requested: bool,
    pub excluded: bool,
    pub redactable: bool,
    pub to_copy: bool,
    pub src_handle: Option<ColumnHandle>,
    pub dst_handle: Option<ColumnHandle>,
    pub src_types: Vec<TypeCandidate>,
    pub dst_types: Vec<TypeCandidate>,
    /// Candidate pairs in match order; rebuilt by every matcher run.
    pub pairs: Vec<TypePair>,
    pub chosen_cast: Option<TypePair>,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Column {
            name: name.into(),
            requested: false,
            excluded: false,
            redactable: false,
            to_copy: false,
            src_handle: None,
            dst_handle: None,
            src_types: Vec::new(),
            dst_types: Vec::new(),
            pairs: Vec::new(),
            chosen_cast: None,
        }
    }

    pub fn chosen_src_type(&self) -> Option<&TypeCandidate> {
        self.chosen_cast.and_then(|pair| self.src_types.get(pair.src))
    }

    pub fn chosen_dst_type(&self) -> Option<&TypeCandidate> {
        self.chosen_cast.and_then(|pair| self.dst_types.get(pair.dst))
    }

    /// Name used on the read cursor: `(type)name` when a cast was chosen.
    pub fn src_cast(&self) -> String {
        match self.chosen_src_type() {
            Some(ty) => decorate(&ty.name, &self.name),
            None => self.name.clone(),
        }
    }

    /// A column is copied when it is writable, not excluded and matched.
    pub fn is_copied(&self) -> bool {
        self.to_copy && !self.excluded && self.chosen_cast.is_some()
    }

    /// Name used on the write cursor; `None` when the column is not copied.
    pub fn dst_cast(&self) -> Option<String> {
        if !self.is_copied() {
            return None;
        }
        self.chosen_dst_type().map(|ty| decorate(&ty.name, &self.name))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ColumnCatalog {
    columns: Vec<Column>,
    filter_index: Option<usize>,
}

impl ColumnCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one column per readable name; duplicates and empty names are
    /// skipped. Returns the number of columns added.
    pub fn discover<I, S>(&mut self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let before = self.columns.len();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() || self.position(name).is_some() {
                continue;
            }
            self.columns.push(Column::new(name));
        }
        self.columns.len() - before
    }

    /// `None` requests every discovered column; otherwise only the named ones.
    pub fn mark_requested(&mut self, names: Option<&[String]>) {
        match names {
            None => self.columns.iter_mut().for_each(|col| col.requested = true),
            Some(names) => {
                let wanted = name_set(names);
                for col in &mut self.columns {
                    col.requested = wanted.contains(col.name.as_str());
                }
            }
        }
    }

    /// Clears `requested` for columns listed by bare name or as
    /// `"<prefix>:<name>"`.
    pub fn exclude(&mut self, prefix: Option<&str>, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let excluded = name_set(names);
        for col in self.columns.iter_mut().filter(|col| col.requested) {
            let prefixed = prefix.map(|prefix| format!("{prefix}:{}", col.name));
            if excluded.contains(col.name.as_str())
                || prefixed.is_some_and(|name| excluded.contains(name.as_str()))
            {
                debug!("Column '{}' excluded from copy", col.name);
                col.requested = false;
            }
        }
    }

    /// Flags columns the matcher must never produce a cast for.
    pub fn mark_excluded(&mut self, names: &[String]) {
        let excluded = name_set(names);
        for col in &mut self.columns {
            col.excluded = excluded.contains(col.name.as_str());
        }
    }

    pub fn detect_filter_column(&mut self, name: &str) -> Option<usize> {
        self.filter_index = self.position(name.trim());
        match self.filter_index {
            Some(idx) => debug!("Filter column '{}' found at position {idx}", name),
            None => debug!("No filter column '{}'; row filtering disabled", name),
        }
        self.filter_index
    }

    pub fn filter_index(&self) -> Option<usize> {
        self.filter_index
    }

    pub fn mark_redactable_by_name(&mut self, names: &[String]) {
        let wanted = name_set(names);
        for col in &mut self.columns {
            if wanted.contains(col.name.as_str()) {
                col.redactable = true;
            }
        }
    }

    /// Marks a column redactable when any of its source types is (or derives
    /// from) one of `type_names`. Names the type system cannot resolve are
    /// ignored.
    pub fn mark_redactable_by_type<T: TypeSystem + ?Sized>(
        &mut self,
        types: &T,
        type_names: &[String],
    ) {
        let targets: Vec<TypeHandle> = type_names
            .iter()
            .map(|name| name.trim())
            .filter(|name| !name.is_empty())
            .filter_map(|name| match types.resolve(name) {
                Ok(handle) => Some(handle),
                Err(err) => {
                    debug!("Ignoring redactable type '{name}': {err}");
                    None
                }
            })
            .collect();
        if targets.is_empty() {
            return;
        }
        for col in self.columns.iter_mut().filter(|col| !col.redactable) {
            col.redactable = col.src_types.iter().any(|candidate| {
                targets
                    .iter()
                    .any(|target| types.is_a(candidate.handle, *target))
            });
        }
    }

    /// Protected columns are never redacted; run after the marking passes.
    pub fn unmark_do_not_redact(&mut self, names: &[String]) {
        let protected = name_set(names);
        for col in &mut self.columns {
            if col.redactable && protected.contains(col.name.as_str()) {
                col.redactable = false;
            }
        }
    }

    /// Reads the readable types of every requested column.
    pub fn load_source_types<S, T>(&mut self, source: &S, types: &T) -> Result<()>
    where
        S: SourceTable + ?Sized,
        T: TypeSystem + ?Sized,
    {
        for col in self.columns.iter_mut().filter(|col| col.requested) {
            let list = source
                .readable_types(&col.name)
                .map_err(|err| CopyError::discovery(&col.name, err))?;
            col.src_types = list
                .names
                .iter()
                .enumerate()
                .map(|(order, name)| {
                    let handle = types
                        .resolve(name)
                        .map_err(|err| CopyError::discovery(name.as_str(), err))?;
                    Ok(TypeCandidate::new(
                        name.as_str(),
                        handle,
                        list.default == Some(order),
                        order,
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
        }
        Ok(())
    }

    /// Reads the writable types of every requested column; a column with at
    /// least one writable type becomes a copy candidate.
    pub fn load_destination_types<D, T>(&mut self, dest: &D, types: &T) -> Result<()>
    where
        D: DestinationTable + ?Sized,
        T: TypeSystem + ?Sized,
    {
        for col in self.columns.iter_mut().filter(|col| col.requested) {
            let names = dest
                .writable_types(&col.name)
                .map_err(|err| CopyError::discovery(&col.name, err))?;
            col.dst_types = names
                .iter()
                .enumerate()
                .map(|(order, name)| {
                    let handle = types
                        .resolve(name)
                        .map_err(|err| CopyError::discovery(name.as_str(), err))?;
                    Ok(TypeCandidate::new(name.as_str(), handle, false, order))
                })
                .collect::<Result<Vec<_>>>()?;
            col.to_copy = !col.dst_types.is_empty();
            if !col.to_copy {
                debug!("Column '{}' is not writable in the destination", col.name);
            }
        }
        Ok(())
    }

    pub fn count_to_copy(&self) -> usize {
        self.columns.iter().filter(|col| col.to_copy).count()
    }

    pub fn projection_string(&self, only_requested: bool) -> String {
        self.columns
            .iter()
            .filter(|col| !only_requested || col.requested)
            .map(|col| col.name.as_str())
            .join(",")
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut [Column] {
        &mut self.columns
    }

    pub fn get(&self, idx: usize) -> Option<&Column> {
        self.columns.get(idx)
    }

    pub fn find(&self, name: &str) -> Option<&Column> {
        self.position(name).map(|idx| &self.columns[idx])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

fn name_set(names: &[String]) -> HashSet<&str> {
    names
        .iter()
        .map(|name| name.trim())
        .filter(|name| !name.is_empty())
        .collect()
}
