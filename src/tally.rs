//! Running count and monetary total for one category.

use std::fmt;
use std::sync::Mutex;

/// Snapshot of an [`Aggregator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TallyReport {
    pub count: u64,
    /// Sum of archived amounts in minor currency units.
    pub total_amount: i64,
}

impl TallyReport {
    /// Total in whole currency units with two decimals, e.g. `500` → `"5.00"`.
    pub fn formatted_total(&self) -> String {
        format_minor_units(self.total_amount)
    }
}

impl fmt::Display for TallyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "count={}, total=${}", self.count, self.formatted_total())
    }
}

pub fn format_minor_units(amount: i64) -> String {
    let sign = if amount < 0 { "-" } else { "" };
    let abs = amount.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Accumulator shared by concurrently completing downloads.
#[derive(Debug, Default)]
pub struct Aggregator {
    inner: Mutex<TallyReport>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts one archived document worth `amount` minor units.
    pub fn record(&self, amount: i64) {
        let mut tally = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        tally.count += 1;
        tally.total_amount += amount;
    }

    pub fn report(&self) -> TallyReport {
        *self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn formats_minor_units_with_two_decimals() {
        assert_eq!(format_minor_units(0), "0.00");
        assert_eq!(format_minor_units(5), "0.05");
        assert_eq!(format_minor_units(500), "5.00");
        assert_eq!(format_minor_units(123_456), "1234.56");
        assert_eq!(format_minor_units(-250), "-2.50");
    }

    #[test]
    fn report_display_matches_summary_line() {
        let report = TallyReport {
            count: 1,
            total_amount: 500,
        };
        assert_eq!(report.to_string(), "count=1, total=$5.00");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_records_are_not_lost() {
        let aggregator = Arc::new(Aggregator::new());
        let handles: Vec<_> = (0..200)
            .map(|i| {
                let aggregator = aggregator.clone();
                tokio::spawn(async move { aggregator.record(i) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        let report = aggregator.report();
        assert_eq!(report.count, 200);
        assert_eq!(report.total_amount, (0..200).sum::<i64>());
    }
}
