//! Type compatibility matching.
//!
//! For every copy candidate the matcher builds the source x destination type
//! product, orders the pairs and keeps the first one when it is compatible.
//! Pairs are ordered by compatibility, then the source type's lossiness score,
//! then conversion distance, then whether the source type is the declared
//! default, then source discovery order.

use std::{cmp::Ordering, fmt};

use itertools::Itertools;
use log::{debug, info, warn};

use crate::{
    catalog::{Column, ColumnCatalog},
    config::CopyConfig,
    types::{TypePair, TypeSystem},
};

/// Result of one matcher run over a catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchReport {
    pub entries: Vec<MatchEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEntry {
    pub column: String,
    pub src_types: Vec<String>,
    pub dst_types: Vec<String>,
    pub pairs: Vec<PairLine>,
    /// `(source type, destination type)` of the chosen cast.
    pub winner: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairLine {
    pub src: String,
    pub dst: String,
    pub compatible: bool,
    pub distance: u32,
    pub lossy_score: u32,
    pub order: usize,
    pub is_default: bool,
}

impl MatchReport {
    pub fn matched(&self) -> usize {
        self.entries.iter().filter(|e| e.winner.is_some()).count()
    }

    /// Copy candidates left without a compatible cast.
    pub fn unresolved(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.winner.is_none())
            .map(|e| e.column.clone())
            .collect()
    }
}

/// Chooses a cast for every column that is writable and not excluded. All
/// other columns end up without a cast.
pub fn match_columns<T: TypeSystem + ?Sized>(
    catalog: &mut ColumnCatalog,
    types: &T,
    config: &CopyConfig,
) -> MatchReport {
    let mut report = MatchReport::default();
    for col in catalog.columns_mut() {
        col.pairs.clear();
        col.chosen_cast = None;
        if !col.to_copy || col.excluded {
            continue;
        }
        match_column(col, types, config);
        report.entries.push(entry_for(col));
        match col.chosen_cast {
            Some(_) => debug!("Column '{}' matched: {}", col.name, describe(col)),
            None => warn!(
                "Column '{}' has no compatible cast and will not be copied",
                col.name
            ),
        }
    }
    info!(
        "Matched {} of {} candidate column(s)",
        report.matched(),
        report.entries.len()
    );
    report
}

fn match_column<T: TypeSystem + ?Sized>(col: &mut Column, types: &T, config: &CopyConfig) {
    let mut pairs: Vec<TypePair> = (0..col.src_types.len())
        .cartesian_product(0..col.dst_types.len())
        .map(|(src, dst)| {
            let mut pair = TypePair::new(src, dst);
            if let Some(distance) =
                types.common_ancestor(col.src_types[src].handle, col.dst_types[dst].handle)
            {
                pair.compatible = true;
                pair.distance = distance;
            }
            pair
        })
        .collect();

    // scores only matter when there is something to choose between
    if pairs.len() > 1 {
        for candidate in &mut col.src_types {
            candidate.lossy_score = config.lossy_score(&candidate.name);
        }
    }

    pairs.sort_by(|a, b| compare_pairs(col, a, b));
    col.chosen_cast = pairs.first().copied().filter(|pair| pair.compatible);
    col.pairs = pairs;
}

fn compare_pairs(col: &Column, a: &TypePair, b: &TypePair) -> Ordering {
    let sa = &col.src_types[a.src];
    let sb = &col.src_types[b.src];
    b.compatible
        .cmp(&a.compatible)
        .then(sa.lossy_score.cmp(&sb.lossy_score))
        .then(a.distance.cmp(&b.distance))
        .then(sb.is_default.cmp(&sa.is_default))
        .then(sa.order.cmp(&sb.order))
}

fn entry_for(col: &Column) -> MatchEntry {
    MatchEntry {
        column: col.name.clone(),
        src_types: col.src_types.iter().map(|t| t.name.clone()).collect(),
        dst_types: col.dst_types.iter().map(|t| t.name.clone()).collect(),
        pairs: col
            .pairs
            .iter()
            .map(|pair| {
                let src = &col.src_types[pair.src];
                PairLine {
                    src: src.name.clone(),
                    dst: col.dst_types[pair.dst].name.clone(),
                    compatible: pair.compatible,
                    distance: pair.distance,
                    lossy_score: src.lossy_score,
                    order: src.order,
                    is_default: src.is_default,
                }
            })
            .collect(),
        winner: col
            .chosen_src_type()
            .zip(col.chosen_dst_type())
            .map(|(src, dst)| (src.name.clone(), dst.name.clone())),
    }
}

fn describe(col: &Column) -> String {
    match (col.chosen_src_type(), col.chosen_dst_type()) {
        (Some(src), Some(dst)) => format!("{} -> {}", src.name, dst.name),
        _ => "no match".to_string(),
    }
}

impl fmt::Display for MatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.winner {
            Some((src, dst)) => writeln!(f, "column {}: {src} -> {dst}", self.column)?,
            None => writeln!(f, "column {}: no match", self.column)?,
        }
        writeln!(f, "  src: {}", self.src_types.join(", "))?;
        writeln!(f, "  dst: {}", self.dst_types.join(", "))?;
        for pair in &self.pairs {
            writeln!(
                f,
                "  {} {} -> {} (score={} order={}{}) distance={}",
                if pair.compatible { "[c]" } else { "[ ]" },
                pair.src,
                pair.dst,
                pair.lossy_score,
                pair.order,
                if pair.is_default { " default" } else { "" },
                pair.distance
            )?;
        }
        Ok(())
    }
}

impl fmt::Display for MatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            write!(f, "{entry}")?;
        }
        write!(
            f,
            "{} of {} column(s) matched",
            self.matched(),
            self.entries.len()
        )
    }
}
