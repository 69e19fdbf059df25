//! Normalized Average True Range (NATR).
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|)
//! ATR uses Wilder smoothing, seeded with the mean of the first `period` true
//! ranges. The first row has no previous close, so its TR is not used.
//! NATR = 100 * ATR / close, rounded to 2 decimals.
//! Lookback: `period` rows, i.e. the first value appears at index `period`.

use crate::data::quotes::QuoteRow;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;

pub const DEFAULT_PERIOD: usize = 3;

/// A quote row with its NATR value. `None` inside the warmup window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorRow {
    #[serde(flatten)]
    pub quote: QuoteRow,
    pub natr: Option<f64>,
}

/// True Range series. TR[0] is NaN (no previous close).
pub fn true_range(rows: &[QuoteRow]) -> Vec<f64> {
    let mut tr = vec![f64::NAN; rows.len()];
    for i in 1..rows.len() {
        let h = rows[i].high;
        let l = rows[i].low;
        let pc = rows[i - 1].close;
        tr[i] = (h - l).max((h - pc).abs()).max((l - pc).abs());
    }
    tr
}

/// Wilder-smoothed average of `tr[1..]`.
///
/// `result[period]` is the mean of `tr[1..=period]`; afterwards
/// `atr[t] = (atr[t-1] * (period - 1) + tr[t]) / period`.
pub fn wilder_atr(tr: &[f64], period: usize) -> Vec<f64> {
    let n = tr.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n <= period {
        return result;
    }

    let seed = tr[1..=period].iter().sum::<f64>() / period as f64;
    result[period] = seed;

    let p = period as f64;
    let mut prev = seed;
    for i in (period + 1)..n {
        let smoothed = (prev * (p - 1.0) + tr[i]) / p;
        result[i] = smoothed;
        prev = smoothed;
    }
    result
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// NATR for one security's rows, which must already be sorted by date.
pub fn natr_series(rows: &[QuoteRow], period: usize) -> Vec<Option<f64>> {
    let atr = wilder_atr(&true_range(rows), period);
    rows.iter()
        .zip(atr)
        .map(|(row, atr)| {
            let natr = atr / row.close * 100.0;
            natr.is_finite().then(|| round2(natr))
        })
        .collect()
}

/// Drop rows with any non-finite numeric field.
///
/// [`compute_natr`] assumes clean input; run this first.
pub fn clean_rows(rows: Vec<QuoteRow>) -> Vec<QuoteRow> {
    rows.into_iter().filter(QuoteRow::is_clean).collect()
}

/// Compute NATR per security.
///
/// Rows are partitioned by code and each partition is sorted by date and
/// processed on its own, so no window state crosses securities. Output is
/// ordered by code, then date.
pub fn compute_natr(rows: Vec<QuoteRow>, period: usize) -> Vec<IndicatorRow> {
    let mut partitions: BTreeMap<String, Vec<QuoteRow>> = BTreeMap::new();
    for row in rows {
        partitions.entry(row.code.clone()).or_default().push(row);
    }

    let computed: Vec<Vec<IndicatorRow>> = partitions
        .into_values()
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|mut partition| {
            partition.sort_by_key(|r| r.date);
            let natr = natr_series(&partition, period);
            partition
                .into_iter()
                .zip(natr)
                .map(|(quote, natr)| IndicatorRow { quote, natr })
                .collect()
        })
        .collect();

    computed.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_rows, DEFAULT_EPSILON};

    #[test]
    fn true_range_basic() {
        let rows = make_rows(
            "TEST",
            &[
                (100.0, 105.0, 95.0, 102.0),
                (102.0, 108.0, 100.0, 106.0), // max(8, |108-102|, |100-102|) = 8
                (106.0, 107.0, 98.0, 99.0),   // max(9, |107-106|, |98-106|) = 9
            ],
        );
        let tr = true_range(&rows);
        assert!(tr[0].is_nan());
        assert_approx(tr[1], 8.0, DEFAULT_EPSILON);
        assert_approx(tr[2], 9.0, DEFAULT_EPSILON);
    }

    #[test]
    fn true_range_gap_up() {
        let rows = make_rows(
            "TEST",
            &[(98.0, 102.0, 97.0, 100.0), (110.0, 115.0, 108.0, 112.0)],
        );
        assert_approx(true_range(&rows)[1], 15.0, DEFAULT_EPSILON);
    }

    #[test]
    fn natr_period_3() {
        let rows = make_rows(
            "TEST",
            &[
                (100.0, 105.0, 95.0, 102.0),  // TR unused
                (102.0, 108.0, 100.0, 106.0), // TR = 8
                (106.0, 107.0, 98.0, 99.0),   // TR = 9
                (99.0, 103.0, 97.0, 101.0),   // TR = 6
                (101.0, 106.0, 100.0, 105.0), // TR = 6
            ],
        );
        let atr = wilder_atr(&true_range(&rows), 3);
        // Seed: mean(8, 9, 6) = 23/3; next: (23/3 * 2 + 6) / 3 = 64/9
        assert_approx(atr[3], 23.0 / 3.0, DEFAULT_EPSILON);
        assert_approx(atr[4], 64.0 / 9.0, DEFAULT_EPSILON);

        let natr = natr_series(&rows, 3);
        assert_eq!(natr[..3], [None, None, None]);
        assert_eq!(natr[3], Some(7.59)); // 100 * 7.6667 / 101
        assert_eq!(natr[4], Some(6.77)); // 100 * 7.1111 / 105
    }

    #[test]
    fn short_partition_is_all_none() {
        let rows = make_rows(
            "TEST",
            &[(100.0, 105.0, 95.0, 102.0), (102.0, 108.0, 100.0, 106.0)],
        );
        assert_eq!(natr_series(&rows, 3), vec![None, None]);
    }

    #[test]
    fn zero_close_yields_none() {
        let mut rows = make_rows(
            "TEST",
            &[
                (1.0, 2.0, 0.5, 1.0),
                (1.0, 2.0, 0.5, 1.0),
                (1.0, 2.0, 0.5, 0.0),
            ],
        );
        rows[2].low = 0.0;
        assert_eq!(natr_series(&rows, 1)[2], None);
    }

    #[test]
    fn partitions_are_sorted_by_date() {
        let mut rows = make_rows(
            "TEST",
            &[
                (100.0, 105.0, 95.0, 102.0),
                (102.0, 108.0, 100.0, 106.0),
                (106.0, 107.0, 98.0, 99.0),
                (99.0, 103.0, 97.0, 101.0),
            ],
        );
        let expected = natr_series(&rows, 3);
        rows.reverse();

        let out = compute_natr(rows, 3);
        let got: Vec<Option<f64>> = out.iter().map(|r| r.natr).collect();
        assert_eq!(got, expected);
        assert!(out.windows(2).all(|w| w[0].quote.date < w[1].quote.date));
    }

    #[test]
    fn clean_rows_drops_non_finite() {
        let mut rows = make_rows(
            "TEST",
            &[(100.0, 105.0, 95.0, 102.0), (102.0, 108.0, 100.0, 106.0)],
        );
        rows[1].amount = f64::NAN;
        let clean = clean_rows(rows);
        assert_eq!(clean.len(), 1);
    }

    #[test]
    fn round2_behaviour() {
        assert_eq!(round2(7.5907), 7.59);
        assert_eq!(round2(6.7763), 6.78);
        assert_eq!(round2(0.0), 0.0);
    }
}
