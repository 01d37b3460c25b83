//! Step, cumulative and drop-off rates derived from funnel counts.

use funnel_core::types::{ConversionRow, FunnelCount};

/// Rates for every count row, computed independently per group.
///
/// Expects `counts` in aggregator order (contiguous per group, steps
/// ascending). A rate whose denominator is zero is `None`. Rates are not
/// clamped or rounded.
pub fn calculate(counts: &[FunnelCount]) -> Vec<ConversionRow> {
    let mut rows = Vec::with_capacity(counts.len());
    for group in counts.chunk_by(|a, b| a.group == b.group) {
        let baseline = group[0].user_count;
        let mut previous: Option<u64> = None;

        for count in group {
            let row = match previous {
                None => ConversionRow {
                    group: count.group.clone(),
                    step_index: count.step_index,
                    step_conversion_rate: None,
                    cumulative_conversion_rate: Some(1.0),
                    drop_off_rate: None,
                },
                Some(prev) => {
                    let step = ratio(count.user_count, prev);
                    ConversionRow {
                        group: count.group.clone(),
                        step_index: count.step_index,
                        step_conversion_rate: step,
                        cumulative_conversion_rate: ratio(count.user_count, baseline),
                        drop_off_rate: step.map(|r| 1.0 - r),
                    }
                }
            };
            rows.push(row);
            previous = Some(count.user_count);
        }
    }
    rows
}

fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(group: &str, step_index: usize, user_count: u64) -> FunnelCount {
        FunnelCount {
            group: group.into(),
            step_index,
            event_type: format!("step_{step_index}"),
            user_count,
        }
    }

    #[test]
    fn test_first_step_is_baseline() {
        let rows = calculate(&[count("US", 1, 10), count("US", 2, 4)]);
        assert_eq!(rows[0].step_conversion_rate, None);
        assert_eq!(rows[0].drop_off_rate, None);
        assert_eq!(rows[0].cumulative_conversion_rate, Some(1.0));
    }

    #[test]
    fn test_step_and_cumulative_rates() {
        let rows = calculate(&[
            count("US", 1, 10),
            count("US", 2, 5),
            count("US", 3, 1),
        ]);
        assert_eq!(rows[1].step_conversion_rate, Some(0.5));
        assert_eq!(rows[1].drop_off_rate, Some(0.5));
        assert_eq!(rows[1].cumulative_conversion_rate, Some(0.5));
        assert_eq!(rows[2].step_conversion_rate, Some(0.2));
        assert_eq!(rows[2].cumulative_conversion_rate, Some(0.1));
        assert_eq!(rows[2].drop_off_rate, Some(0.8));
    }

    #[test]
    fn test_zero_denominators_are_undefined() {
        let rows = calculate(&[count("CA", 1, 0), count("CA", 2, 0), count("CA", 3, 0)]);
        assert_eq!(rows[0].cumulative_conversion_rate, Some(1.0));
        for row in &rows[1..] {
            assert_eq!(row.step_conversion_rate, None);
            assert_eq!(row.cumulative_conversion_rate, None);
            assert_eq!(row.drop_off_rate, None);
        }
    }

    #[test]
    fn test_zero_middle_step() {
        let rows = calculate(&[count("US", 1, 4), count("US", 2, 0), count("US", 3, 0)]);
        assert_eq!(rows[1].step_conversion_rate, Some(0.0));
        assert_eq!(rows[1].drop_off_rate, Some(1.0));
        assert_eq!(rows[2].step_conversion_rate, None);
        assert_eq!(rows[2].cumulative_conversion_rate, Some(0.0));
    }

    #[test]
    fn test_groups_are_independent() {
        let rows = calculate(&[
            count("US", 1, 2),
            count("US", 2, 1),
            count("CA", 1, 8),
            count("CA", 2, 2),
        ]);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[2].group, "CA");
        assert_eq!(rows[2].step_conversion_rate, None);
        assert_eq!(rows[3].step_conversion_rate, Some(0.25));
    }

    #[test]
    fn test_non_monotonic_rates_are_not_clamped() {
        let rows = calculate(&[count("US", 1, 2), count("US", 2, 3)]);
        assert_eq!(rows[1].step_conversion_rate, Some(1.5));
        assert_eq!(rows[1].drop_off_rate, Some(-0.5));
    }

    #[test]
    fn test_empty() {
        assert!(calculate(&[]).is_empty());
    }
}
