//! Row-set expressions such as `1-10,20,35-30`.
//!
//! Ranges are inclusive, reversed ranges are normalized, and overlapping or
//! adjacent ranges are merged so iteration visits every row id once in
//! ascending order.

use std::fmt;

use crate::{error::CopyError, store::RowRange};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    // sorted, non-overlapping, non-adjacent, inclusive
    spans: Vec<(i64, i64)>,
}

impl RowSet {
    pub fn parse(expression: &str) -> Result<Self, CopyError> {
        let fail = |reason: String| CopyError::RowSet {
            expression: expression.to_string(),
            reason,
        };
        let trimmed = expression.trim();
        if trimmed.is_empty() {
            return Err(fail("expression is empty".into()));
        }
        let mut spans = Vec::new();
        for token in trimmed.split(',') {
            let token = token.trim();
            if token.is_empty() {
                return Err(fail("empty element between commas".into()));
            }
            let (from, to) = match token.split_once('-') {
                Some((from, to)) => (
                    parse_row_id(from).map_err(&fail)?,
                    parse_row_id(to).map_err(&fail)?,
                ),
                None => {
                    let id = parse_row_id(token).map_err(&fail)?;
                    (id, id)
                }
            };
            spans.push((from.min(to), from.max(to)));
        }
        Ok(RowSet::from_spans(spans))
    }

    pub fn from_range(range: RowRange) -> Self {
        if range.is_empty() {
            return RowSet::default();
        }
        RowSet {
            spans: vec![(range.first, range.end() - 1)],
        }
    }

    fn from_spans(mut spans: Vec<(i64, i64)>) -> Self {
        spans.sort_unstable();
        let mut merged: Vec<(i64, i64)> = Vec::with_capacity(spans.len());
        for (start, end) in spans {
            match merged.last_mut() {
                Some(last) if start <= last.1.saturating_add(1) => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        RowSet { spans: merged }
    }

    /// Restricts the set to rows inside `range`.
    pub fn intersect(&self, range: RowRange) -> RowSet {
        if range.is_empty() {
            return RowSet::default();
        }
        let last = range.end() - 1;
        let spans = self
            .spans
            .iter()
            .filter_map(|&(start, end)| {
                let start = start.max(range.first);
                let end = end.min(last);
                (start <= end).then_some((start, end))
            })
            .collect();
        RowSet { spans }
    }

    pub fn count(&self) -> u64 {
        self.spans
            .iter()
            .map(|&(start, end)| (end - start) as u64 + 1)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn first(&self) -> Option<i64> {
        self.spans.first().map(|span| span.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = i64> + '_ {
        self.spans.iter().flat_map(|&(start, end)| start..=end)
    }
}

impl fmt::Display for RowSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (start, end)) in self.spans.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            if start == end {
                write!(f, "{start}")?;
            } else {
                write!(f, "{start}-{end}")?;
            }
        }
        Ok(())
    }
}

fn parse_row_id(raw: &str) -> Result<i64, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("range is missing a bound".into());
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("'{raw}' is not a row id"));
    }
    raw.parse::<i64>()
        .map_err(|_| format!("row id '{raw}' is out of range"))
}

/// Percentage of `total` reached after `done` rows.
pub fn percent(done: u64, total: u64) -> u32 {
    if total == 0 {
        return 100;
    }
    ((u128::from(done) * 100) / u128::from(total)) as u32
}
