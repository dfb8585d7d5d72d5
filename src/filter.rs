//! Per-row filter decisions derived from the filter column.

use log::warn;

use crate::store::CellData;

pub const FILTER_PASS: u64 = 0;
pub const FILTER_REJECT: u64 = 1;
/// Failed a quality criterion; copied like a passing row.
pub const FILTER_CRITERIA: u64 = 2;
pub const FILTER_REDACTED: u64 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFilterDecision {
    Pass,
    Reject,
    Redact,
}

impl RowFilterDecision {
    pub fn from_code(code: u64) -> Self {
        match code {
            FILTER_REJECT => RowFilterDecision::Reject,
            FILTER_REDACTED => RowFilterDecision::Redact,
            _ => RowFilterDecision::Pass,
        }
    }

    /// Combines one code per read: any redacted read redacts the row, and
    /// the row is rejected only when every read is.
    pub fn from_reads<I: IntoIterator<Item = u64>>(codes: I) -> Self {
        let mut seen = false;
        let mut all_rejected = true;
        for code in codes {
            seen = true;
            match RowFilterDecision::from_code(code) {
                RowFilterDecision::Redact => return RowFilterDecision::Redact,
                RowFilterDecision::Reject => {}
                RowFilterDecision::Pass => all_rejected = false,
            }
        }
        if seen && all_rejected {
            RowFilterDecision::Reject
        } else {
            RowFilterDecision::Pass
        }
    }
}

/// The two override switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterPolicy {
    pub ignore_reject: bool,
    pub ignore_redact: bool,
}

impl FilterPolicy {
    pub fn apply(&self, decision: RowFilterDecision) -> RowFilterDecision {
        match decision {
            RowFilterDecision::Reject if self.ignore_reject => RowFilterDecision::Pass,
            RowFilterDecision::Redact if self.ignore_redact => RowFilterDecision::Pass,
            other => other,
        }
    }
}

/// Stateful filter for one run.
///
/// A filter cell holds either a single value or one value per read. When its
/// element count is neither 1 nor the row's read count, a warning is logged
/// once and every later row passes unfiltered.
#[derive(Debug, Clone)]
pub struct RowFilter {
    policy: FilterPolicy,
    disabled: bool,
}

impl RowFilter {
    pub fn new(policy: FilterPolicy) -> Self {
        RowFilter {
            policy,
            disabled: false,
        }
    }

    pub fn policy(&self) -> FilterPolicy {
        self.policy
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn decide(
        &mut self,
        row_id: i64,
        cell: &CellData<'_>,
        read_count: Option<u64>,
    ) -> RowFilterDecision {
        if self.disabled {
            return RowFilterDecision::Pass;
        }
        let count = cell.elem_count;
        let decision = if count == 1 {
            RowFilterDecision::from_code(cell.element(0).unwrap_or(FILTER_PASS))
        } else if read_count == Some(u64::from(count)) {
            RowFilterDecision::from_reads((0..count).filter_map(|idx| cell.element(idx)))
        } else {
            warn!(
                "Filter cell at row #{row_id} has {count} value(s) but the row has {} read(s); row filtering disabled for the rest of the run",
                read_count.map_or_else(|| "an unknown number of".to_string(), |n| n.to_string())
            );
            self.disabled = true;
            RowFilterDecision::Pass
        };
        self.policy.apply(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(values: &[u8]) -> CellData<'_> {
        CellData {
            elem_bits: 8,
            bit_offset: 0,
            elem_count: values.len() as u32,
            bytes: values,
        }
    }

    #[test]
    fn codes_map_to_decisions() {
        assert_eq!(RowFilterDecision::from_code(0), RowFilterDecision::Pass);
        assert_eq!(RowFilterDecision::from_code(1), RowFilterDecision::Reject);
        assert_eq!(RowFilterDecision::from_code(2), RowFilterDecision::Pass);
        assert_eq!(RowFilterDecision::from_code(3), RowFilterDecision::Redact);
        assert_eq!(RowFilterDecision::from_code(99), RowFilterDecision::Pass);
    }

    #[test]
    fn per_read_values_combine() {
        assert_eq!(RowFilterDecision::from_reads([1, 1]), RowFilterDecision::Reject);
        assert_eq!(RowFilterDecision::from_reads([1, 0]), RowFilterDecision::Pass);
        assert_eq!(RowFilterDecision::from_reads([0, 3]), RowFilterDecision::Redact);
        assert_eq!(RowFilterDecision::from_reads([]), RowFilterDecision::Pass);
    }

    #[test]
    fn overrides_turn_decisions_into_pass() {
        let policy = FilterPolicy {
            ignore_reject: true,
            ignore_redact: false,
        };
        assert_eq!(policy.apply(RowFilterDecision::Reject), RowFilterDecision::Pass);
        assert_eq!(policy.apply(RowFilterDecision::Redact), RowFilterDecision::Redact);
    }

    #[test]
    fn matching_read_count_uses_every_value() {
        let mut filter = RowFilter::new(FilterPolicy::default());
        assert_eq!(filter.decide(1, &cell(&[1, 1]), Some(2)), RowFilterDecision::Reject);
        assert_eq!(filter.decide(2, &cell(&[3]), Some(2)), RowFilterDecision::Redact);
        assert_eq!(filter.decide(3, &cell(&[]), Some(0)), RowFilterDecision::Pass);
        assert!(!filter.is_disabled());
    }

    #[test]
    fn mismatched_count_disables_filtering_for_the_rest_of_the_run() {
        let mut filter = RowFilter::new(FilterPolicy::default());
        assert_eq!(filter.decide(1, &cell(&[1, 1, 1]), Some(2)), RowFilterDecision::Pass);
        assert!(filter.is_disabled());
        assert_eq!(filter.decide(2, &cell(&[1]), Some(1)), RowFilterDecision::Pass);

        let mut without_reads = RowFilter::new(FilterPolicy::default());
        assert_eq!(without_reads.decide(1, &cell(&[1, 1]), None), RowFilterDecision::Pass);
        assert!(without_reads.is_disabled());
    }
}
