#![forbid(unsafe_code)]

//! Property suite over randomly generated indexes, series, and frames.
//!
//! Generators stay inside small label alphabets so duplicates and overlaps
//! between the two sides of a binary operation are common.

use std::collections::BTreeMap;

use proptest::prelude::*;

use ff_columnar::BitMask;
use ff_expr::{col, filter};
use ff_frame::{DataFrame, Series, SharedFrame};
use ff_index::{Index, IndexLabel, align_union_sorted, validate_alignment_plan};
use ff_join::{JoinType, join};
use ff_types::{NullKind, Scalar};

// ── Strategy generators ────────────────────────────────────────────────

fn arb_numeric_scalar() -> impl Strategy<Value = Scalar> {
    prop_oneof![
        3 => (-1_000_000i64..1_000_000i64).prop_map(Scalar::Int64),
        3 => (-1e6_f64..1e6_f64).prop_map(Scalar::Float64),
        1 => Just(Scalar::Null(NullKind::Null)),
        1 => Just(Scalar::Null(NullKind::NaN)),
    ]
}

fn arb_index_label() -> impl Strategy<Value = IndexLabel> {
    prop_oneof![
        3 => (0i64..20).prop_map(IndexLabel::Int64),
        1 => "[a-e]{1,2}".prop_map(IndexLabel::Utf8),
    ]
}

fn arb_index(max_len: usize) -> impl Strategy<Value = Index> {
    proptest::collection::vec(arb_index_label(), 0..=max_len).prop_map(Index::new)
}

fn arb_index_pair(max_len: usize) -> impl Strategy<Value = (Index, Index)> {
    (arb_index(max_len), arb_index(max_len))
}

fn arb_numeric_series(name: &'static str, max_len: usize) -> impl Strategy<Value = Series> {
    (1..=max_len).prop_flat_map(move |len| {
        (
            proptest::collection::vec(arb_index_label(), len),
            proptest::collection::vec(arb_numeric_scalar(), len),
        )
            .prop_filter_map("series construction must succeed", move |(labels, values)| {
                Series::from_values(name, labels, values).ok()
            })
    })
}

/// Frame with a low-cardinality text key column `k` and an integer column `v`.
fn arb_keyed_frame(max_len: usize) -> impl Strategy<Value = DataFrame> {
    (0..=max_len).prop_flat_map(|len| {
        (
            proptest::collection::vec("[a-d]", len),
            proptest::collection::vec(-50i64..50, len),
        )
            .prop_filter_map("frame construction must succeed", |(keys, values)| {
                DataFrame::from_columns(
                    vec![
                        ("k".to_owned(), keys.into_iter().map(Scalar::Utf8).collect()),
                        ("v".to_owned(), values.into_iter().map(Scalar::Int64).collect()),
                    ],
                    None,
                    None,
                )
                .ok()
            })
    })
}

fn key_counts(frame: &DataFrame) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for value in frame.column_values("k").expect("k") {
        if let Scalar::Utf8(key) = value {
            *counts.entry(key).or_insert(0) += 1;
        }
    }
    counts
}

// ── Index properties ───────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_every_position_is_found_by_its_label(index in arb_index(20)) {
        for (pos, label) in index.labels().iter().enumerate() {
            let positions = index.position_of(label).expect("label present");
            prop_assert!(positions.contains(&pos));
            prop_assert_eq!(index.position(label), positions.first().copied());
        }
    }

    #[test]
    fn prop_positions_partition_the_index(index in arb_index(20)) {
        let mut seen: Vec<usize> = index
            .unique()
            .labels()
            .iter()
            .flat_map(|label| index.position_of(label).expect("present").to_vec())
            .collect();
        seen.sort_unstable();
        prop_assert_eq!(seen, (0..index.len()).collect::<Vec<_>>());
    }

    #[test]
    fn prop_has_duplicates_matches_naive(index in arb_index(20)) {
        let labels = index.labels();
        let naive = (0..labels.len())
            .any(|i| labels[i + 1..].contains(&labels[i]));
        prop_assert_eq!(index.has_duplicates(), naive);
    }

    #[test]
    fn prop_union_alignment_plan_is_valid((left, right) in arb_index_pair(15)) {
        let plan = align_union_sorted(&left, &right);
        prop_assert!(validate_alignment_plan(&plan).is_ok());
        prop_assert!(plan.index.is_sorted());
        prop_assert!(!plan.index.has_duplicates());

        for label in left.labels().iter().chain(right.labels()) {
            prop_assert!(plan.index.contains(label));
        }
        for (label, (l, r)) in plan
            .index
            .labels()
            .iter()
            .zip(plan.left_positions.iter().zip(&plan.right_positions))
        {
            prop_assert_eq!(*l, left.position(label));
            prop_assert_eq!(*r, right.position(label));
            prop_assert!(l.is_some() || r.is_some());
        }
    }
}

// ── Aligned arithmetic ─────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_add_index_is_sorted_union(
        left in arb_numeric_series("left", 12),
        right in arb_numeric_series("right", 12),
    ) {
        let out = left.add(&right).expect("add");
        prop_assert_eq!(out.index(), &left.index().union_sorted(right.index()));
        prop_assert_eq!(out.len(), out.index().len());
    }

    #[test]
    fn prop_add_missing_where_either_side_is_absent_or_missing(
        left in arb_numeric_series("left", 12),
        right in arb_numeric_series("right", 12),
    ) {
        let out = left.add(&right).expect("add");
        for (label, value) in out.index().labels().iter().zip(out.values()) {
            let lhs = left.index().position(label).map(|p| &left.values()[p]);
            let rhs = right.index().position(label).map(|p| &right.values()[p]);
            let expect_missing = match (lhs, rhs) {
                (Some(l), Some(r)) => l.is_missing() || r.is_missing(),
                _ => true,
            };
            prop_assert_eq!(value.is_missing(), expect_missing);
        }
    }
}

// ── Joins ──────────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_join_row_counts_follow_key_multiplicities(
        left in arb_keyed_frame(10),
        right in arb_keyed_frame(10),
    ) {
        let lc = key_counts(&left);
        let rc = key_counts(&right);
        let matched: usize = lc
            .iter()
            .map(|(k, n)| n * rc.get(k).copied().unwrap_or(0))
            .sum();
        let left_only: usize = lc.iter().filter(|(k, _)| !rc.contains_key(*k)).map(|(_, n)| n).sum();
        let right_only: usize = rc.iter().filter(|(k, _)| !lc.contains_key(*k)).map(|(_, n)| n).sum();

        let rows = |how| join(&left, &right, &["k"], how).expect("join").len();
        prop_assert_eq!(rows(JoinType::Inner), matched);
        prop_assert_eq!(rows(JoinType::Left), matched + left_only);
        prop_assert_eq!(rows(JoinType::Right), matched + right_only);
        prop_assert_eq!(rows(JoinType::Outer), matched + left_only + right_only);
    }

    #[test]
    fn prop_inner_join_keys_exist_on_both_sides(
        left in arb_keyed_frame(10),
        right in arb_keyed_frame(10),
    ) {
        let out = join(&left, &right, &["k"], JoinType::Inner).expect("join");
        let lc = key_counts(&left);
        let rc = key_counts(&right);
        for key in key_counts(&out).keys() {
            prop_assert!(lc.contains_key(key) && rc.contains_key(key));
        }
    }
}

// ── Filtering ──────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_filter_is_idempotent(frame in arb_keyed_frame(15), threshold in -50i64..50) {
        let predicate = col("v").lt(threshold);
        let once = filter(&frame, &predicate).expect("once");
        let twice = filter(&once, &predicate).expect("twice");
        prop_assert_eq!(&once, &twice);

        for value in once.column_values("v").expect("v") {
            match value {
                Scalar::Int64(v) => prop_assert!(v < threshold),
                other => prop_assert!(false, "unexpected value {other:?}"),
            }
        }
    }

    #[test]
    fn prop_where_mask_keeps_exactly_the_set_bits(
        (frame, bits) in arb_keyed_frame(15).prop_flat_map(|frame| {
            let len = frame.len();
            (Just(frame), proptest::collection::vec(any::<bool>(), len))
        })
    ) {
        let mask = BitMask::from_bools(&bits);
        let out = frame.where_mask(&mask).expect("where");
        prop_assert_eq!(out.len(), mask.count_true());
        let kept: Vec<IndexLabel> = mask
            .true_positions()
            .into_iter()
            .map(|pos| frame.index().labels()[pos].clone())
            .collect();
        prop_assert_eq!(out.index().labels(), kept.as_slice());
    }
}

// ── Row views ──────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_row_writes_reach_the_shared_frame(
        (frame, pos) in arb_keyed_frame(10)
            .prop_filter("non-empty", |frame| !frame.is_empty())
            .prop_flat_map(|frame| {
                let len = frame.len();
                (Just(frame), 0..len)
            }),
        value in -1000i64..1000,
    ) {
        let shared = SharedFrame::new(frame);
        let rows = shared.rows();
        let row = rows.at(pos).expect("row");
        row.set("v", value).expect("set");

        prop_assert_eq!(row.get("v").expect("get"), Scalar::Int64(value));
        let snapshot = shared.snapshot().expect("snapshot");
        prop_assert_eq!(snapshot.value(pos, "v").expect("value"), &Scalar::Int64(value));
        prop_assert_eq!(rows.at(pos).expect("again"), row);
    }
}
