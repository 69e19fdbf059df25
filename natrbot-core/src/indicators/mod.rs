//! Volatility indicators computed over the stored quote history.
//!
//! Every indicator works per security: rows are partitioned by code and each
//! partition is processed independently, in parallel.

pub mod natr;

pub use natr::{clean_rows, compute_natr, IndicatorRow, DEFAULT_PERIOD};

/// Build date-ascending rows for one code from `(open, high, low, close)` tuples.
#[cfg(test)]
pub fn make_rows(code: &str, data: &[(f64, f64, f64, f64)]) -> Vec<crate::data::QuoteRow> {
    let base_date = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    data.iter()
        .enumerate()
        .map(|(i, &(open, high, low, close))| crate::data::QuoteRow {
            code: code.to_string(),
            date: base_date + chrono::Duration::days(i as i64),
            open,
            high,
            low,
            close,
            volume: 1000.0,
            amount: close * 1000.0,
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
