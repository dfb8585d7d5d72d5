//! Type-system adapter: type handles, candidates, pairs and cast strings.
//!
//! The engine never interprets encodings itself. It asks a [`TypeSystem`] to
//! resolve names to handles and to measure how two encodings relate, and it
//! addresses cursor columns with cast-decorated names of the form
//! `(type)column`.

use std::fmt;

use crate::error::StoreError;

/// Opaque handle handed out by a [`TypeSystem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeHandle(pub u32);

pub trait TypeSystem {
    fn resolve(&self, type_name: &str) -> Result<TypeHandle, StoreError>;

    /// Conversion distance through the nearest shared ancestor, or `None`
    /// when the two encodings are unrelated.
    fn common_ancestor(&self, src: TypeHandle, dst: TypeHandle) -> Option<u32>;

    /// Whether `ty` is `target` or one of its descendants.
    fn is_a(&self, ty: TypeHandle, target: TypeHandle) -> bool;
}

impl<T: TypeSystem + ?Sized> TypeSystem for &T {
    fn resolve(&self, type_name: &str) -> Result<TypeHandle, StoreError> {
        (**self).resolve(type_name)
    }

    fn common_ancestor(&self, src: TypeHandle, dst: TypeHandle) -> Option<u32> {
        (**self).common_ancestor(src, dst)
    }

    fn is_a(&self, ty: TypeHandle, target: TypeHandle) -> bool {
        (**self).is_a(ty, target)
    }
}

/// Normalized type identifier: surrounding whitespace and any cast
/// decoration removed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKey(String);

impl TypeKey {
    pub fn new(raw: &str) -> Self {
        let trimmed = raw.trim();
        let bare = match split_cast(trimmed) {
            Some((ty, _)) => ty,
            None => trimmed.trim_start_matches('(').trim_end_matches(')'),
        };
        TypeKey(bare.trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Builds the cast-decorated cursor name `(type)column`.
pub fn decorate(type_name: &str, column: &str) -> String {
    format!("({type_name}){column}")
}

/// Splits `(type)column` into its parts; `None` for an undecorated name.
pub fn split_cast(cast: &str) -> Option<(&str, &str)> {
    let rest = cast.trim().strip_prefix('(')?;
    let (ty, column) = rest.split_once(')')?;
    let ty = ty.trim();
    if ty.is_empty() {
        return None;
    }
    Some((ty, column.trim()))
}

/// One readable or writable encoding of a column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeCandidate {
    pub name: String,
    pub handle: TypeHandle,
    pub is_default: bool,
    pub order: usize,
    pub lossy_score: u32,
}

impl TypeCandidate {
    pub fn new(name: impl Into<String>, handle: TypeHandle, is_default: bool, order: usize) -> Self {
        TypeCandidate {
            name: name.into(),
            handle,
            is_default,
            order,
            lossy_score: 0,
        }
    }
}

/// A source/destination pairing; `src` and `dst` index the owning column's
/// type lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypePair {
    pub src: usize,
    pub dst: usize,
    pub compatible: bool,
    pub distance: u32,
}

impl TypePair {
    pub fn new(src: usize, dst: usize) -> Self {
        TypePair {
            src,
            dst,
            compatible: false,
            distance: 0,
        }
    }
}
