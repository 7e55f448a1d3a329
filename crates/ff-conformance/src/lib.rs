#![forbid(unsafe_code)]

//! JSON fixture harness.
//!
//! Each file under `fixtures/` holds a list of cases. Values are written as
//! plain JSON (`null`, booleans, numbers, strings); labels are integers,
//! strings, or arrays of labels for hierarchical tuples.

use std::fs;
use std::path::{Path, PathBuf};

use ff_expr::{ExprError, Predicate, filter};
use ff_frame::{DataFrame, FrameError, Series};
use ff_index::{Index, IndexError, IndexLabel, MultiIndex};
use ff_join::{JoinError, JoinType, join_with_policy};
use ff_runtime::{ArithmeticAlignment, EvidenceLedger, RuntimeMode, RuntimePolicy};
use ff_types::{ErrorKind, NullKind, Scalar};
use log::info;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const HARDENED_JOIN_MAX_ROWS: usize = 100_000;

#[must_use]
pub fn fixture_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

// ── Fixture model ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixtureValue {
    Missing(()),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<FixtureValue> for Scalar {
    fn from(value: FixtureValue) -> Self {
        match value {
            FixtureValue::Missing(()) => Scalar::Null(NullKind::Null),
            FixtureValue::Bool(v) => Scalar::Bool(v),
            FixtureValue::Int(v) => Scalar::Int64(v),
            FixtureValue::Float(v) => Scalar::Float64(v),
            FixtureValue::Text(v) => Scalar::Utf8(v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FixtureLabel {
    Int(i64),
    Text(String),
    Tuple(Vec<FixtureLabel>),
}

impl From<FixtureLabel> for IndexLabel {
    fn from(label: FixtureLabel) -> Self {
        match label {
            FixtureLabel::Int(v) => IndexLabel::Int64(v),
            FixtureLabel::Text(v) => IndexLabel::Utf8(v),
            FixtureLabel::Tuple(parts) => IndexLabel::Tuple(parts.into_iter().map(Into::into).collect()),
        }
    }
}

fn labels(raw: &[FixtureLabel]) -> Vec<IndexLabel> {
    raw.iter().cloned().map(Into::into).collect()
}

fn scalars(raw: &[FixtureValue]) -> Vec<Scalar> {
    raw.iter().cloned().map(Into::into).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureSeries {
    #[serde(default)]
    pub name: String,
    pub index: Vec<FixtureLabel>,
    pub values: Vec<FixtureValue>,
}

impl FixtureSeries {
    pub fn to_series(&self) -> Result<Series, FixtureError> {
        Ok(Series::from_values(
            self.name.clone(),
            labels(&self.index),
            scalars(&self.values),
        )?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixtureFrame {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub index: Option<Vec<FixtureLabel>>,
    pub columns: Vec<(String, Vec<FixtureValue>)>,
}

impl FixtureFrame {
    pub fn to_frame(&self) -> Result<DataFrame, FixtureError> {
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| (name.clone(), scalars(values)))
            .collect();
        Ok(DataFrame::from_columns(
            columns,
            self.index.as_deref().map(labels),
            self.name.clone(),
        )?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum FixtureCase {
    SeriesAdd {
        left: FixtureSeries,
        right: FixtureSeries,
        #[serde(default)]
        alignment: ArithmeticAlignment,
        expected: FixtureSeries,
    },
    FrameJoin {
        left: FixtureFrame,
        right: FixtureFrame,
        on: Vec<String>,
        how: JoinType,
        expected: FixtureFrame,
    },
    FrameWhere {
        frame: FixtureFrame,
        predicate: Predicate,
        expected: FixtureFrame,
    },
    /// `expected: null` asserts a `KeyNotFound` failure.
    IndexPositions {
        index: Vec<FixtureLabel>,
        label: FixtureLabel,
        expected: Option<Vec<usize>>,
    },
    MultiIndexPrefix {
        index: Vec<FixtureLabel>,
        prefix: Vec<FixtureLabel>,
        expected_positions: Vec<usize>,
        expected_labels: Vec<FixtureLabel>,
    },
}

impl FixtureCase {
    #[must_use]
    pub fn operation_name(&self) -> &'static str {
        match self {
            Self::SeriesAdd { .. } => "series_add",
            Self::FrameJoin { .. } => "frame_join",
            Self::FrameWhere { .. } => "frame_where",
            Self::IndexPositions { .. } => "index_positions",
            Self::MultiIndexPrefix { .. } => "multi_index_prefix",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fixture {
    pub case_id: String,
    #[serde(default)]
    pub mode: RuntimeMode,
    #[serde(flatten)]
    pub case: FixtureCase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub operation: String,
    pub mode: RuntimeMode,
    pub status: CaseStatus,
    pub mismatch: Option<String>,
    pub evidence_records: usize,
}

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Join(#[from] JoinError),
    #[error(transparent)]
    Expr(#[from] ExprError),
    #[error("{0}")]
    Mismatch(String),
}

impl FixtureError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io(_) | Self::Json(_) | Self::Mismatch(_) => ErrorKind::InvalidArgument,
            Self::Frame(err) => err.kind(),
            Self::Index(err) => err.kind(),
            Self::Join(err) => err.kind(),
            Self::Expr(err) => err.kind(),
        }
    }
}

// ── Comparison ─────────────────────────────────────────────────────────

fn mismatch(what: &str, expected: impl std::fmt::Debug, actual: impl std::fmt::Debug) -> FixtureError {
    FixtureError::Mismatch(format!("{what}: expected {expected:?}, got {actual:?}"))
}

fn values_match(expected: &[Scalar], actual: &[Scalar]) -> bool {
    expected.len() == actual.len()
        && expected
            .iter()
            .zip(actual)
            .all(|(e, a)| e.semantic_eq(a))
}

fn compare_series(expected: &FixtureSeries, actual: &Series) -> Result<(), FixtureError> {
    let expected_index = labels(&expected.index);
    if actual.index().labels() != expected_index.as_slice() {
        return Err(mismatch("series index", expected_index, actual.index().labels()));
    }
    let expected_values = scalars(&expected.values);
    if !values_match(&expected_values, actual.values()) {
        return Err(mismatch("series values", expected_values, actual.values()));
    }
    Ok(())
}

fn compare_frames(expected: &FixtureFrame, actual: &DataFrame) -> Result<(), FixtureError> {
    let expected_names: Vec<&str> = expected.columns.iter().map(|(n, _)| n.as_str()).collect();
    if actual.column_names() != expected_names {
        return Err(mismatch("column order", expected_names, actual.column_names()));
    }
    let expected_index = match &expected.index {
        Some(raw) => Index::new(labels(raw)),
        None => Index::range(actual.len()),
    };
    if actual.index() != &expected_index {
        return Err(mismatch(
            "row index",
            expected_index.labels(),
            actual.index().labels(),
        ));
    }
    for (name, values) in &expected.columns {
        let expected_values = scalars(values);
        let actual_values = actual.column_values(name)?;
        if !values_match(&expected_values, &actual_values) {
            return Err(mismatch(
                &format!("column '{name}'"),
                expected_values,
                actual_values,
            ));
        }
    }
    Ok(())
}

// ── Execution ──────────────────────────────────────────────────────────

fn policy_for(mode: RuntimeMode) -> RuntimePolicy {
    match mode {
        RuntimeMode::Strict => RuntimePolicy::strict(),
        RuntimeMode::Hardened => RuntimePolicy::hardened(Some(HARDENED_JOIN_MAX_ROWS)),
    }
}

fn run_case(
    case: &FixtureCase,
    policy: &RuntimePolicy,
    ledger: &mut EvidenceLedger,
) -> Result<(), FixtureError> {
    match case {
        FixtureCase::SeriesAdd {
            left,
            right,
            alignment,
            expected,
        } => {
            let policy = policy.clone().with_arithmetic_alignment(*alignment);
            let out = left.to_series()?.add_with_policy(&right.to_series()?, &policy)?;
            compare_series(expected, &out)
        }
        FixtureCase::FrameJoin {
            left,
            right,
            on,
            how,
            expected,
        } => {
            let keys: Vec<&str> = on.iter().map(String::as_str).collect();
            let out = join_with_policy(
                &left.to_frame()?,
                &right.to_frame()?,
                &keys,
                *how,
                policy,
                ledger,
            )?;
            compare_frames(expected, &out)
        }
        FixtureCase::FrameWhere {
            frame,
            predicate,
            expected,
        } => {
            let out = filter(&frame.to_frame()?, predicate)?;
            compare_frames(expected, &out)
        }
        FixtureCase::IndexPositions {
            index,
            label,
            expected,
        } => {
            let index = Index::new(labels(index));
            let label = IndexLabel::from(label.clone());
            match (index.position_of(&label), expected) {
                (Ok(actual), Some(expected)) if actual == expected.as_slice() => Ok(()),
                (Ok(actual), Some(expected)) => Err(mismatch("positions", expected, actual)),
                (Ok(actual), None) => Err(mismatch("positions", "KeyNotFound", actual)),
                (Err(err), None) if err.kind() == ErrorKind::KeyNotFound => Ok(()),
                (Err(err), _) => Err(err.into()),
            }
        }
        FixtureCase::MultiIndexPrefix {
            index,
            prefix,
            expected_positions,
            expected_labels,
        } => {
            let multi = MultiIndex::try_from_index(&Index::new(labels(index)))?;
            let prefix = labels(prefix);
            let positions = multi.prefix_positions(&prefix)?;
            if &positions != expected_positions {
                return Err(mismatch("prefix positions", expected_positions, positions));
            }
            let remaining = multi.prefix_slice(&prefix)?;
            let expected_labels = labels(expected_labels);
            if remaining.labels() != expected_labels.as_slice() {
                return Err(mismatch("prefix labels", expected_labels, remaining.labels()));
            }
            Ok(())
        }
    }
}

/// Run one fixture and report the outcome. Mismatches and operation failures
/// become a failed case, not an error.
#[must_use]
pub fn run_fixture(fixture: &Fixture) -> CaseResult {
    let policy = policy_for(fixture.mode);
    let mut ledger = EvidenceLedger::new();
    let outcome = run_case(&fixture.case, &policy, &mut ledger);
    let operation = fixture.case.operation_name();
    let status = if outcome.is_ok() {
        CaseStatus::Pass
    } else {
        CaseStatus::Fail
    };
    info!(
        "fixture {} [{operation}, {:?}]: {status:?}",
        fixture.case_id, fixture.mode
    );

    CaseResult {
        case_id: fixture.case_id.clone(),
        operation: operation.to_owned(),
        mode: fixture.mode,
        status,
        mismatch: outcome.err().map(|err| err.to_string()),
        evidence_records: ledger.records().len(),
    }
}

pub fn load_fixture_file(path: &Path) -> Result<Vec<Fixture>, FixtureError> {
    let body = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&body)?)
}

fn list_fixture_files(root: &Path) -> Result<Vec<PathBuf>, FixtureError> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Run every fixture file in `root`, sorted by file name then case order.
pub fn run_fixture_dir(root: &Path) -> Result<Vec<CaseResult>, FixtureError> {
    let mut results = Vec::new();
    for path in list_fixture_files(root)? {
        for fixture in load_fixture_file(&path)? {
            results.push(run_fixture(&fixture));
        }
    }
    Ok(results)
}
