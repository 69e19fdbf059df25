//! Property tests for store and indicator invariants.
//!
//! Uses proptest to verify:
//! 1. No duplicate (code, date) after any merge
//! 2. Overwrite policy: true keeps the incoming row, false keeps the stored one
//! 3. Merge keeps every key from both sides
//! 4. Partition isolation: a code's NATR ignores every other code

use chrono::{Duration, NaiveDate};
use natrbot_core::data::{QuoteRow, QuoteStore};
use natrbot_core::indicators::compute_natr;
use proptest::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

const CODES: [&str; 4] = ["2330", "2317", "0050", "1101"];

fn base_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 3).unwrap()
}

fn make_row(code_idx: usize, day: i64, close: f64) -> QuoteRow {
    QuoteRow {
        code: CODES[code_idx].to_string(),
        date: base_date() + Duration::days(day),
        open: close,
        high: close + 1.0,
        low: close - 1.0,
        close,
        volume: 500.0,
        amount: close * 500.0,
    }
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_close() -> impl Strategy<Value = f64> {
    (10.0..1000.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

fn arb_rows(max: usize) -> impl Strategy<Value = Vec<QuoteRow>> {
    prop::collection::vec((0..CODES.len(), 0..8i64, arb_close()), 0..max)
        .prop_map(|v| v.into_iter().map(|(c, d, p)| make_row(c, d, p)).collect())
}

fn arb_series(len: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(arb_close(), len)
}

fn key(row: &QuoteRow) -> (NaiveDate, String) {
    (row.date, row.code.clone())
}

/// Last occurrence wins, matching how a batch collapses its own duplicates.
fn last_by_key(rows: &[QuoteRow]) -> BTreeMap<(NaiveDate, String), f64> {
    rows.iter().map(|r| (key(r), r.close)).collect()
}

// ── 1-3. Merge ───────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn merge_never_duplicates_and_honours_policy(
        existing in arb_rows(20),
        incoming in arb_rows(20),
        overwrite in any::<bool>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = QuoteStore::new(dir.path().join("q.parquet"));

        let stored = last_by_key(&existing);
        let existing_unique: Vec<QuoteRow> = existing
            .iter()
            .map(|r| (key(r), r.clone()))
            .collect::<BTreeMap<_, _>>()
            .into_values()
            .collect();
        if !existing_unique.is_empty() {
            store.write(&existing_unique).unwrap();
        }
        let arriving = last_by_key(&incoming);

        store.merge(incoming.clone(), overwrite).unwrap();
        if existing_unique.is_empty() && incoming.is_empty() {
            prop_assert!(!store.exists());
            return Ok(());
        }

        let merged = store.read_all().unwrap();
        let keys: Vec<_> = merged.iter().map(key).collect();
        let unique: BTreeSet<_> = keys.iter().cloned().collect();
        prop_assert_eq!(keys.len(), unique.len());

        let expected_keys: BTreeSet<_> = stored.keys().chain(arriving.keys()).cloned().collect();
        prop_assert_eq!(&unique, &expected_keys);

        for row in &merged {
            let k = key(row);
            let expected = match (stored.get(&k), arriving.get(&k)) {
                (Some(old), Some(new)) => if overwrite { *new } else { *old },
                (Some(old), None) => *old,
                (None, Some(new)) => *new,
                (None, None) => unreachable!(),
            };
            prop_assert_eq!(row.close, expected);
        }
    }
}

// ── 4. Partition isolation ───────────────────────────────────────────

proptest! {
    #[test]
    fn natr_of_one_code_ignores_other_codes(
        a in arb_series(12),
        b in arb_series(12),
    ) {
        let rows_a: Vec<QuoteRow> = a.iter().enumerate().map(|(i, &p)| make_row(0, i as i64, p)).collect();
        let rows_b: Vec<QuoteRow> = b.iter().enumerate().map(|(i, &p)| make_row(1, i as i64, p)).collect();

        let alone: Vec<Option<f64>> = compute_natr(rows_a.clone(), 3).iter().map(|r| r.natr).collect();

        // Interleave the two codes and reverse, so input order is hostile.
        let mut mixed: Vec<QuoteRow> = rows_a.into_iter().zip(rows_b).flat_map(|(x, y)| [x, y]).collect();
        mixed.reverse();
        let together: Vec<Option<f64>> = compute_natr(mixed, 3)
            .into_iter()
            .filter(|r| r.quote.code == CODES[0])
            .map(|r| r.natr)
            .collect();

        prop_assert_eq!(alone, together);
    }
}
