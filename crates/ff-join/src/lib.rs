#![forbid(unsafe_code)]

use std::{
    collections::{HashMap, HashSet},
    mem::size_of,
};

use bumpalo::{Bump, collections::Vec as BumpVec};
use ff_columnar::{Column, ColumnError};
use ff_frame::{DataFrame, FrameError};
use ff_index::Index;
use ff_runtime::{DecisionAction, EvidenceLedger, RuntimePolicy};
use ff_types::{ErrorKind, Scalar, ScalarKey};
use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Outer,
}

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("join key column '{0}' not found")]
    UnknownColumn(String),
    #[error("join requires at least one key column")]
    EmptyKeys,
    #[error("runtime policy rejected a join producing {output_rows} rows")]
    AdmissionRejected { output_rows: usize },
    #[error("joined column name '{0}' is produced more than once")]
    NameCollision(String),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

impl JoinError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownColumn(_) => ErrorKind::UnknownColumn,
            Self::EmptyKeys | Self::AdmissionRejected { .. } | Self::NameCollision(_) => {
                ErrorKind::InvalidArgument
            }
            Self::Frame(err) => err.kind(),
            Self::Column(err) => err.kind(),
        }
    }
}

pub const DEFAULT_ARENA_BUDGET_BYTES: usize = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinExecutionOptions {
    pub use_arena: bool,
    pub arena_budget_bytes: usize,
}

impl Default for JoinExecutionOptions {
    fn default() -> Self {
        Self {
            use_arena: true,
            arena_budget_bytes: DEFAULT_ARENA_BUDGET_BYTES,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JoinExecutionTrace {
    used_arena: bool,
    output_rows: usize,
    estimated_bytes: usize,
}

// ── Row map ────────────────────────────────────────────────────────────

/// One distinct key tuple and the rows on each side that carry it.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyGroup {
    values: Vec<Scalar>,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl KeyGroup {
    /// Key values as first seen.
    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn left(&self) -> &[usize] {
        &self.left
    }

    #[must_use]
    pub fn right(&self) -> &[usize] {
        &self.right
    }

    #[must_use]
    pub fn survives(&self, join_type: JoinType) -> bool {
        match join_type {
            JoinType::Inner => !self.left.is_empty() && !self.right.is_empty(),
            JoinType::Left => !self.left.is_empty(),
            JoinType::Right => !self.right.is_empty(),
            JoinType::Outer => true,
        }
    }

    /// `|L| * |R|` when both sides match, otherwise the populated side's size.
    #[must_use]
    pub fn output_rows(&self, join_type: JoinType) -> usize {
        if !self.survives(join_type) {
            return 0;
        }
        match (self.left.len(), self.right.len()) {
            (0, r) => r,
            (l, 0) => l,
            (l, r) => l * r,
        }
    }
}

/// Multimap from key tuple to contributing row positions, in first-occurrence
/// order with the left side scanned first.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRowMap {
    groups: Vec<KeyGroup>,
}

fn key_columns<'a>(frame: &'a DataFrame, keys: &[&str]) -> Result<Vec<&'a Column>, JoinError> {
    keys.iter()
        .map(|key| {
            frame
                .column(key)
                .map_err(|_| JoinError::UnknownColumn((*key).to_owned()))
        })
        .collect()
}

impl JoinRowMap {
    pub fn build(left: &DataFrame, right: &DataFrame, keys: &[&str]) -> Result<Self, JoinError> {
        if keys.is_empty() {
            return Err(JoinError::EmptyKeys);
        }
        let left_keys = key_columns(left, keys)?;
        let right_keys = key_columns(right, keys)?;

        let mut lookup = HashMap::<Vec<ScalarKey>, usize>::new();
        let mut groups = Vec::<KeyGroup>::new();

        let mut scan = |columns: &[&Column], rows: usize, is_left: bool| {
            for pos in 0..rows {
                let values: Vec<Scalar> = columns
                    .iter()
                    .map(|col| col.values()[pos].clone())
                    .collect();
                let key: Vec<ScalarKey> = values.iter().map(Scalar::to_key).collect();
                let slot = *lookup.entry(key).or_insert_with(|| {
                    groups.push(KeyGroup {
                        values,
                        left: Vec::new(),
                        right: Vec::new(),
                    });
                    groups.len() - 1
                });
                if is_left {
                    groups[slot].left.push(pos);
                } else {
                    groups[slot].right.push(pos);
                }
            }
        };
        scan(left_keys.as_slice(), left.len(), true);
        scan(right_keys.as_slice(), right.len(), false);

        Ok(Self { groups })
    }

    #[must_use]
    pub fn keys(&self) -> &[KeyGroup] {
        &self.groups
    }

    pub fn surviving(&self, join_type: JoinType) -> impl Iterator<Item = &KeyGroup> + '_ {
        self.groups.iter().filter(move |g| g.survives(join_type))
    }

    #[must_use]
    pub fn output_rows(&self, join_type: JoinType) -> usize {
        self.groups.iter().map(|g| g.output_rows(join_type)).sum()
    }

    /// Visit output rows in order: left-major Cartesian product for matched
    /// keys, one row per position for one-sided keys.
    fn for_each_row(&self, join_type: JoinType, mut emit: impl FnMut(Option<usize>, Option<usize>)) {
        for group in self.surviving(join_type) {
            match (group.left.is_empty(), group.right.is_empty()) {
                (false, false) => {
                    for &l in &group.left {
                        for &r in &group.right {
                            emit(Some(l), Some(r));
                        }
                    }
                }
                (false, true) => group.left.iter().for_each(|&l| emit(Some(l), None)),
                (true, false) => group.right.iter().for_each(|&r| emit(None, Some(r))),
                (true, true) => {}
            }
        }
    }
}

// ── Execution ──────────────────────────────────────────────────────────

pub fn join(
    left: &DataFrame,
    right: &DataFrame,
    keys: &[&str],
    join_type: JoinType,
) -> Result<DataFrame, JoinError> {
    join_with_options(left, right, keys, join_type, JoinExecutionOptions::default())
}

pub fn join_with_options(
    left: &DataFrame,
    right: &DataFrame,
    keys: &[&str],
    join_type: JoinType,
    options: JoinExecutionOptions,
) -> Result<DataFrame, JoinError> {
    let map = JoinRowMap::build(left, right, keys)?;
    let (joined, _) = execute(left, right, keys, join_type, &map, options)?;
    Ok(joined)
}

/// Join after submitting the exact output row count to the runtime policy.
pub fn join_with_policy(
    left: &DataFrame,
    right: &DataFrame,
    keys: &[&str],
    join_type: JoinType,
    policy: &RuntimePolicy,
    ledger: &mut EvidenceLedger,
) -> Result<DataFrame, JoinError> {
    let map = JoinRowMap::build(left, right, keys)?;
    let output_rows = map.output_rows(join_type);
    if policy.decide_join_admission(output_rows, ledger) == DecisionAction::Reject {
        return Err(JoinError::AdmissionRejected { output_rows });
    }
    let (joined, _) = execute(
        left,
        right,
        keys,
        join_type,
        &map,
        JoinExecutionOptions::default(),
    )?;
    Ok(joined)
}

fn estimate_intermediate_bytes(output_rows: usize) -> usize {
    output_rows.saturating_mul(size_of::<Option<usize>>().saturating_mul(2))
}

fn execute(
    left: &DataFrame,
    right: &DataFrame,
    keys: &[&str],
    join_type: JoinType,
    map: &JoinRowMap,
    options: JoinExecutionOptions,
) -> Result<(DataFrame, JoinExecutionTrace), JoinError> {
    let output_rows = map.output_rows(join_type);
    let estimated_bytes = estimate_intermediate_bytes(output_rows);
    let use_arena = options.use_arena && estimated_bytes <= options.arena_budget_bytes;

    debug!(
        "join {join_type:?} on {keys:?}: distinct_keys={} surviving={} output_rows={output_rows} arena={use_arena}",
        map.keys().len(),
        map.surviving(join_type).count()
    );

    let joined = if use_arena {
        let arena = Bump::new();
        let mut left_positions = BumpVec::<Option<usize>>::with_capacity_in(output_rows, &arena);
        let mut right_positions = BumpVec::<Option<usize>>::with_capacity_in(output_rows, &arena);
        map.for_each_row(join_type, |l, r| {
            left_positions.push(l);
            right_positions.push(r);
        });
        materialize(
            left,
            right,
            keys,
            left_positions.as_slice(),
            right_positions.as_slice(),
        )?
    } else {
        let mut left_positions = Vec::<Option<usize>>::with_capacity(output_rows);
        let mut right_positions = Vec::<Option<usize>>::with_capacity(output_rows);
        map.for_each_row(join_type, |l, r| {
            left_positions.push(l);
            right_positions.push(r);
        });
        materialize(left, right, keys, &left_positions, &right_positions)?
    };

    Ok((
        joined,
        JoinExecutionTrace {
            used_arena: use_arena,
            output_rows,
            estimated_bytes,
        },
    ))
}

/// Prefixes for non-key columns present on both sides: the frame names, or
/// `left` / `right` when a name is absent or both names are equal.
fn collision_prefixes<'a>(left: &'a DataFrame, right: &'a DataFrame) -> (&'a str, &'a str) {
    match (left.name(), right.name()) {
        (Some(l), Some(r)) if l != r => (l, r),
        _ => ("left", "right"),
    }
}

fn materialize(
    left: &DataFrame,
    right: &DataFrame,
    keys: &[&str],
    left_positions: &[Option<usize>],
    right_positions: &[Option<usize>],
) -> Result<DataFrame, JoinError> {
    let is_key = |name: &str| keys.contains(&name);
    let left_names: Vec<&str> = left
        .column_names()
        .into_iter()
        .filter(|n| !is_key(*n))
        .collect();
    let right_names: Vec<&str> = right
        .column_names()
        .into_iter()
        .filter(|n| !is_key(*n))
        .collect();
    let (left_prefix, right_prefix) = collision_prefixes(left, right);
    let output_name = |name: &str, prefix: &str, other: &[&str]| {
        if other.contains(&name) {
            format!("{prefix}.{name}")
        } else {
            name.to_owned()
        }
    };

    let left_out: Vec<String> = left_names
        .iter()
        .map(|&name| output_name(name, left_prefix, right_names.as_slice()))
        .collect();
    let right_out: Vec<String> = right_names
        .iter()
        .map(|&name| output_name(name, right_prefix, left_names.as_slice()))
        .collect();
    let mut seen = HashSet::new();
    for name in left_out
        .iter()
        .map(String::as_str)
        .chain(keys.iter().copied())
        .chain(right_out.iter().map(String::as_str))
    {
        if !seen.insert(name) {
            return Err(JoinError::NameCollision(name.to_owned()));
        }
    }

    let mut columns = Vec::with_capacity(left_names.len() + keys.len() + right_names.len());

    for (&name, out) in left_names.iter().zip(left_out) {
        let column = left.column(name)?.reindex_by_positions(left_positions)?;
        columns.push((out, column));
    }

    for key in keys {
        let left_key = left.column(key)?;
        let right_key = right.column(key)?;
        let values = left_positions
            .iter()
            .zip(right_positions)
            .map(|(l, r)| match (l, r) {
                (Some(l), _) => left_key.values()[*l].clone(),
                (None, Some(r)) => right_key.values()[*r].clone(),
                (None, None) => Scalar::null(),
            })
            .collect();
        columns.push(((*key).to_owned(), Column::from_mixed(values)?));
    }

    for (&name, out) in right_names.iter().zip(right_out) {
        let column = right.column(name)?.reindex_by_positions(right_positions)?;
        columns.push((out, column));
    }

    Ok(DataFrame::new(Index::range(left_positions.len()), columns)?)
}

#[cfg(test)]
mod tests {
    use ff_frame::DataFrame;
    use ff_index::IndexLabel;
    use ff_runtime::{EvidenceLedger, RuntimePolicy};
    use ff_types::{DType, ErrorKind, Scalar};

    use super::{
        JoinError, JoinExecutionOptions, JoinRowMap, JoinType, execute, join, join_with_options,
        join_with_policy,
    };

    fn ints(values: &[i64]) -> Vec<Scalar> {
        values.iter().copied().map(Scalar::Int64).collect()
    }

    fn strs(values: &[&str]) -> Vec<Scalar> {
        values.iter().copied().map(Scalar::from).collect()
    }

    fn pirates() -> DataFrame {
        DataFrame::from_columns(
            vec![
                ("id".to_owned(), ints(&[1, 2, 3, 4])),
                (
                    "name".to_owned(),
                    strs(&["Pirate", "Monkey", "Ninja", "Spaghetti"]),
                ),
            ],
            None,
            Some("left".to_owned()),
        )
        .expect("left")
    }

    fn ninjas() -> DataFrame {
        DataFrame::from_columns(
            vec![
                ("id".to_owned(), ints(&[1, 2, 3, 4])),
                (
                    "name".to_owned(),
                    strs(&["Rutabaga", "Pirate", "DarthVader", "Ninja"]),
                ),
            ],
            None,
            Some("right".to_owned()),
        )
        .expect("right")
    }

    #[test]
    fn inner_join_on_name() {
        let out = join(&pirates(), &ninjas(), &["name"], JoinType::Inner).expect("join");
        assert_eq!(out.column_names(), vec!["left.id", "name", "right.id"]);
        assert_eq!(out.column_values("left.id").expect("l"), ints(&[1, 3]));
        assert_eq!(out.column_values("name").expect("n"), strs(&["Pirate", "Ninja"]));
        assert_eq!(out.column_values("right.id").expect("r"), ints(&[2, 4]));
        assert_eq!(
            out.index().labels(),
            &[IndexLabel::Int64(0), IndexLabel::Int64(1)]
        );
    }

    #[test]
    fn left_join_fills_missing_right_values() {
        let out = join(&pirates(), &ninjas(), &["name"], JoinType::Left).expect("join");
        assert_eq!(out.len(), 4);
        assert_eq!(
            out.column_values("right.id").expect("r"),
            vec![Scalar::Int64(2), Scalar::null(), Scalar::Int64(4), Scalar::null()]
        );
    }

    #[test]
    fn right_join_keeps_every_right_row() {
        let out = join(&pirates(), &ninjas(), &["name"], JoinType::Right).expect("join");
        assert_eq!(
            out.column_values("name").expect("n"),
            strs(&["Pirate", "Ninja", "Rutabaga", "DarthVader"])
        );
        assert_eq!(
            out.column_values("left.id").expect("l"),
            vec![Scalar::Int64(1), Scalar::Int64(3), Scalar::null(), Scalar::null()]
        );
    }

    #[test]
    fn outer_join_covers_all_keys() {
        let out = join(&pirates(), &ninjas(), &["name"], JoinType::Outer).expect("join");
        assert_eq!(out.len(), 6);
        assert_eq!(
            out.column_values("name").expect("n"),
            strs(&["Pirate", "Monkey", "Ninja", "Spaghetti", "Rutabaga", "DarthVader"])
        );
        let left_ids = out.column_values("left.id").expect("l");
        let right_ids = out.column_values("right.id").expect("r");
        for (l, r) in left_ids.iter().zip(&right_ids) {
            assert!(!(l.is_missing() && r.is_missing()));
        }
    }

    #[test]
    fn duplicate_keys_expand_left_major() {
        let left = DataFrame::from_columns(
            vec![
                ("k".to_owned(), strs(&["a", "a", "b"])),
                ("lv".to_owned(), ints(&[1, 2, 3])),
            ],
            None,
            None,
        )
        .expect("left");
        let right = DataFrame::from_columns(
            vec![
                ("k".to_owned(), strs(&["a", "a"])),
                ("rv".to_owned(), ints(&[10, 20])),
            ],
            None,
            None,
        )
        .expect("right");

        let out = join(&left, &right, &["k"], JoinType::Inner).expect("join");
        assert_eq!(out.column_names(), vec!["lv", "k", "rv"]);
        assert_eq!(out.column_values("lv").expect("lv"), ints(&[1, 1, 2, 2]));
        assert_eq!(out.column_values("rv").expect("rv"), ints(&[10, 20, 10, 20]));
    }

    #[test]
    fn prefixed_name_clashing_with_existing_column_is_rejected() {
        let left = DataFrame::from_columns(
            vec![
                ("k".to_owned(), ints(&[1])),
                ("v".to_owned(), ints(&[5])),
                ("left.v".to_owned(), ints(&[6])),
            ],
            None,
            None,
        )
        .expect("left");
        let right = DataFrame::from_columns(
            vec![("k".to_owned(), ints(&[1])), ("v".to_owned(), ints(&[7]))],
            None,
            None,
        )
        .expect("right");

        let err = join(&left, &right, &["k"], JoinType::Inner).expect_err("collision");
        assert!(matches!(&err, JoinError::NameCollision(name) if name == "left.v"));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn unnamed_frames_fall_back_to_side_prefixes() {
        let left = DataFrame::from_columns(
            vec![("k".to_owned(), ints(&[1])), ("v".to_owned(), ints(&[5]))],
            None,
            None,
        )
        .expect("left");
        let right = left.clone().with_name("other");
        let out = join(&left, &right, &["k"], JoinType::Inner).expect("join");
        assert_eq!(out.column_names(), vec!["left.v", "k", "right.v"]);

        let same = join(&right, &right, &["k"], JoinType::Inner).expect("join");
        assert_eq!(same.column_names(), vec!["left.v", "k", "right.v"]);
    }

    #[test]
    fn missing_keys_match_each_other() {
        let left = DataFrame::from_columns(
            vec![
                ("k".to_owned(), vec![Scalar::null(), Scalar::Int64(1)]),
                ("a".to_owned(), ints(&[1, 2])),
            ],
            None,
            None,
        )
        .expect("left");
        let right = DataFrame::from_columns(
            vec![
                ("k".to_owned(), vec![Scalar::Float64(f64::NAN)]),
                ("b".to_owned(), ints(&[9])),
            ],
            None,
            None,
        )
        .expect("right");
        let out = join(&left, &right, &["k"], JoinType::Inner).expect("join");
        assert_eq!(out.len(), 1);
        assert_eq!(out.column_values("a").expect("a"), ints(&[1]));
        assert!(out.value(0, "k").expect("k").is_missing());
    }

    #[test]
    fn multi_key_join_and_numeric_key_unification() {
        let left = DataFrame::from_columns(
            vec![
                ("a".to_owned(), ints(&[1, 1, 2])),
                ("b".to_owned(), strs(&["x", "y", "x"])),
                ("v".to_owned(), ints(&[10, 20, 30])),
            ],
            None,
            None,
        )
        .expect("left");
        let right = DataFrame::from_columns(
            vec![
                (
                    "a".to_owned(),
                    vec![Scalar::Float64(1.0), Scalar::Float64(2.0)],
                ),
                ("b".to_owned(), strs(&["y", "x"])),
                ("w".to_owned(), ints(&[7, 8])),
            ],
            None,
            None,
        )
        .expect("right");
        let out = join(&left, &right, &["a", "b"], JoinType::Inner).expect("join");
        assert_eq!(out.column_names(), vec!["v", "a", "b", "w"]);
        assert_eq!(out.column_values("v").expect("v"), ints(&[20, 30]));
        assert_eq!(out.column_values("w").expect("w"), ints(&[7, 8]));
    }

    #[test]
    fn mixed_dtype_key_columns_still_materialize() {
        let left = DataFrame::from_columns(vec![("k".to_owned(), ints(&[1]))], None, None)
            .expect("left");
        let right = DataFrame::from_columns(vec![("k".to_owned(), strs(&["1"]))], None, None)
            .expect("right");
        let out = join(&left, &right, &["k"], JoinType::Outer).expect("join");
        assert_eq!(out.len(), 2);
        assert_eq!(out.column("k").expect("k").dtype(), DType::Object);
    }

    #[test]
    fn invalid_keys_are_rejected() {
        let err = join(&pirates(), &ninjas(), &["nope"], JoinType::Inner).expect_err("unknown");
        assert!(matches!(err, JoinError::UnknownColumn(ref c) if c == "nope"));
        assert_eq!(err.kind(), ErrorKind::UnknownColumn);

        let err = join(&pirates(), &ninjas(), &[], JoinType::Inner).expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn row_map_reports_cardinality() {
        let map = JoinRowMap::build(&pirates(), &ninjas(), &["name"]).expect("map");
        assert_eq!(map.keys().len(), 6);
        assert_eq!(map.keys()[0].values(), strs(&["Pirate"]).as_slice());
        assert_eq!(map.keys()[0].left(), &[0]);
        assert_eq!(map.keys()[0].right(), &[1]);
        assert_eq!(map.surviving(JoinType::Inner).count(), 2);
        assert_eq!(map.output_rows(JoinType::Inner), 2);
        assert_eq!(map.output_rows(JoinType::Left), 4);
        assert_eq!(map.output_rows(JoinType::Right), 4);
        assert_eq!(map.output_rows(JoinType::Outer), 6);
    }

    #[test]
    fn hardened_policy_rejects_oversized_join() {
        let mut ledger = EvidenceLedger::new();
        let err = join_with_policy(
            &pirates(),
            &ninjas(),
            &["name"],
            JoinType::Outer,
            &RuntimePolicy::hardened(Some(5)),
            &mut ledger,
        )
        .expect_err("rejected");
        assert!(matches!(err, JoinError::AdmissionRejected { output_rows: 6 }));
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let ok = join_with_policy(
            &pirates(),
            &ninjas(),
            &["name"],
            JoinType::Inner,
            &RuntimePolicy::hardened(Some(5)),
            &mut ledger,
        )
        .expect("admitted");
        assert_eq!(ok.len(), 2);
        assert_eq!(ledger.records().len(), 2);
    }

    #[test]
    fn arena_join_matches_global_allocator_behavior() {
        let global = join_with_options(
            &pirates(),
            &ninjas(),
            &["name"],
            JoinType::Outer,
            JoinExecutionOptions {
                use_arena: false,
                arena_budget_bytes: 0,
            },
        )
        .expect("global join");
        let arena = join_with_options(
            &pirates(),
            &ninjas(),
            &["name"],
            JoinType::Outer,
            JoinExecutionOptions::default(),
        )
        .expect("arena join");
        assert_eq!(arena, global);
    }

    #[test]
    fn arena_join_falls_back_when_budget_is_too_small() {
        let (left, right) = (pirates(), ninjas());
        let map = JoinRowMap::build(&left, &right, &["name"]).expect("map");
        let options = JoinExecutionOptions {
            use_arena: true,
            arena_budget_bytes: 1,
        };
        let (out, trace) =
            execute(&left, &right, &["name"], JoinType::Inner, &map, options).expect("fallback");
        assert!(!trace.used_arena);
        assert_eq!(trace.output_rows, 2);
        assert!(trace.estimated_bytes > options.arena_budget_bytes);
        assert_eq!(out.len(), 2);
    }
}
