#![forbid(unsafe_code)]

use std::collections::{BTreeMap, HashSet};

use ff_columnar::{ArithmeticOp, BitMask, Column, ColumnError, ComparisonOp};
use ff_index::{
    AlignmentPlan, Index, IndexError, IndexLabel, MultiIndex, align_intersection_sorted,
    align_union_sorted, validate_alignment_plan,
};
use ff_runtime::{ArithmeticAlignment, RuntimePolicy};
use ff_types::{ErrorKind, Scalar, ScalarKey, TypeError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod rows;

pub use rows::{RowIter, RowProxy, Rows, SharedFrame};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("index length ({index_len}) does not match column length ({column_len})")]
    LengthMismatch { index_len: usize, column_len: usize },
    #[error("column '{0}' not found")]
    ColumnNotFound(String),
    #[error("duplicate column name '{0}'")]
    DuplicateColumn(String),
    #[error("series index does not match the frame's row index")]
    IndexMismatch,
    #[error("mask length ({mask_len}) does not match length ({len})")]
    MaskLength { mask_len: usize, len: usize },
    #[error("row has {found} values but the frame has {expected} columns")]
    RowWidth { expected: usize, found: usize },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("stale row reference: {0}")]
    StaleReference(String),
    #[error(transparent)]
    Column(#[from] ColumnError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl FrameError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ColumnNotFound(_) => ErrorKind::KeyNotFound,
            Self::LengthMismatch { .. }
            | Self::DuplicateColumn(_)
            | Self::IndexMismatch
            | Self::MaskLength { .. }
            | Self::RowWidth { .. }
            | Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::StaleReference(_) => ErrorKind::StaleReference,
            Self::Column(err) => err.kind(),
            Self::Index(err) => err.kind(),
            Self::Type(err) => err.kind(),
        }
    }
}

fn check_position(position: usize, len: usize) -> Result<(), FrameError> {
    if position >= len {
        return Err(IndexError::OutOfRange { position, len }.into());
    }
    Ok(())
}

fn check_mask(mask: &BitMask, len: usize) -> Result<(), FrameError> {
    if mask.len() != len {
        return Err(FrameError::MaskLength {
            mask_len: mask.len(),
            len,
        });
    }
    Ok(())
}

// ── Series ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    name: String,
    index: Index,
    column: Column,
}

impl<'de> Deserialize<'de> for Series {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            name: String,
            index: Index,
            column: Column,
        }
        let raw = Raw::deserialize(deserializer)?;
        Self::new(raw.name, raw.index, raw.column).map_err(serde::de::Error::custom)
    }
}

impl Series {
    pub fn new(name: impl Into<String>, index: Index, column: Column) -> Result<Self, FrameError> {
        if index.len() != column.len() {
            return Err(FrameError::LengthMismatch {
                index_len: index.len(),
                column_len: column.len(),
            });
        }

        Ok(Self {
            name: name.into(),
            index,
            column,
        })
    }

    pub fn from_values(
        name: impl Into<String>,
        index_labels: Vec<IndexLabel>,
        values: Vec<Scalar>,
    ) -> Result<Self, FrameError> {
        let index = Index::new(index_labels);
        let column = Column::from_values(values)?;
        Self::new(name, index, column)
    }

    /// Series over the range index `0..values.len()`.
    pub fn from_vec(name: impl Into<String>, values: Vec<Scalar>) -> Result<Self, FrameError> {
        let index = Index::range(values.len());
        let column = Column::from_values(values)?;
        Self::new(name, index, column)
    }

    /// Series from label/value pairs; labels become the index in pair order.
    pub fn from_pairs(
        name: impl Into<String>,
        pairs: Vec<(IndexLabel, Scalar)>,
    ) -> Result<Self, FrameError> {
        let (labels, values): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        Self::from_values(name, labels, values)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn rename(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn column(&self) -> &Column {
        &self.column
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        self.column.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn at(&self, position: usize) -> Result<&Scalar, FrameError> {
        check_position(position, self.len())?;
        Ok(&self.values()[position])
    }

    /// Value at the first position carrying `label`.
    pub fn get(&self, label: &IndexLabel) -> Result<&Scalar, FrameError> {
        let positions = self.index.position_of(label)?;
        Ok(&self.values()[positions[0]])
    }

    /// Every value carrying `label`, in index order.
    pub fn get_all(&self, label: &IndexLabel) -> Result<Vec<&Scalar>, FrameError> {
        let values = self.values();
        Ok(self
            .index
            .position_of(label)?
            .iter()
            .map(|&pos| &values[pos])
            .collect())
    }

    pub fn loc(&self, labels: &[IndexLabel]) -> Result<Self, FrameError> {
        let positions = self.index.slice_positions(labels)?;
        self.take(&positions)
    }

    pub fn iloc(&self, positions: &[usize]) -> Result<Self, FrameError> {
        let positions = self.index.positions_at(positions)?;
        self.take(&positions)
    }

    fn take(&self, positions: &[usize]) -> Result<Self, FrameError> {
        Self::new(
            self.name.clone(),
            self.index.take(positions),
            self.column.take(positions)?,
        )
    }

    pub fn set_at(&mut self, position: usize, value: impl Into<Scalar>) -> Result<(), FrameError> {
        check_position(position, self.len())?;
        self.column = self.column.with_value(position, value.into())?;
        Ok(())
    }

    /// Write `value` at every position carrying `label`.
    pub fn set(&mut self, label: &IndexLabel, value: impl Into<Scalar>) -> Result<(), FrameError> {
        let value = value.into();
        let positions = self.index.position_of(label)?.to_vec();
        let mut column = self.column.clone();
        for position in positions {
            column = column.with_value(position, value.clone())?;
        }
        self.column = column;
        Ok(())
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<Scalar> {
        self.values().to_vec()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&IndexLabel, &Scalar)> + '_ {
        self.index.labels().iter().zip(self.values())
    }

    #[must_use]
    pub fn count_missing(&self) -> usize {
        self.column.validity().len() - self.column.validity().count_true()
    }

    // ── Aligned arithmetic ─────────────────────────────────────────────

    fn binary_op_with_policy(
        &self,
        other: &Self,
        op: ArithmeticOp,
        policy: &RuntimePolicy,
    ) -> Result<Self, FrameError> {
        let plan: AlignmentPlan = match policy.arithmetic_alignment {
            ArithmeticAlignment::Union => align_union_sorted(&self.index, &other.index),
            ArithmeticAlignment::Intersection => {
                warn!(
                    "intersection alignment drops labels not shared by '{}' and '{}'",
                    self.name, other.name
                );
                align_intersection_sorted(&self.index, &other.index)
            }
        };
        validate_alignment_plan(&plan)?;

        let left = self.column.reindex_by_positions(&plan.left_positions)?;
        let right = other.column.reindex_by_positions(&plan.right_positions)?;
        let column = left.binary_numeric(&right, op)?;

        let out_name = if self.name == other.name {
            self.name.clone()
        } else {
            format!("{}{}{}", self.name, op.symbol(), other.name)
        };

        Self::new(out_name, plan.index, column)
    }

    pub fn add_with_policy(&self, other: &Self, policy: &RuntimePolicy) -> Result<Self, FrameError> {
        self.binary_op_with_policy(other, ArithmeticOp::Add, policy)
    }

    /// Label-aligned addition over the sorted union of both indexes.
    pub fn add(&self, other: &Self) -> Result<Self, FrameError> {
        self.add_with_policy(other, &RuntimePolicy::strict())
    }

    pub fn sub_with_policy(&self, other: &Self, policy: &RuntimePolicy) -> Result<Self, FrameError> {
        self.binary_op_with_policy(other, ArithmeticOp::Sub, policy)
    }

    pub fn sub(&self, other: &Self) -> Result<Self, FrameError> {
        self.sub_with_policy(other, &RuntimePolicy::strict())
    }

    pub fn mul_with_policy(&self, other: &Self, policy: &RuntimePolicy) -> Result<Self, FrameError> {
        self.binary_op_with_policy(other, ArithmeticOp::Mul, policy)
    }

    pub fn mul(&self, other: &Self) -> Result<Self, FrameError> {
        self.mul_with_policy(other, &RuntimePolicy::strict())
    }

    pub fn div_with_policy(&self, other: &Self, policy: &RuntimePolicy) -> Result<Self, FrameError> {
        self.binary_op_with_policy(other, ArithmeticOp::Div, policy)
    }

    pub fn div(&self, other: &Self) -> Result<Self, FrameError> {
        self.div_with_policy(other, &RuntimePolicy::strict())
    }

    fn scalar_op(&self, scalar: Scalar, op: ArithmeticOp) -> Result<Self, FrameError> {
        let column = self.column.scalar_numeric(&scalar, op)?;
        Self::new(self.name.clone(), self.index.clone(), column)
    }

    pub fn add_scalar(&self, scalar: impl Into<Scalar>) -> Result<Self, FrameError> {
        self.scalar_op(scalar.into(), ArithmeticOp::Add)
    }

    pub fn sub_scalar(&self, scalar: impl Into<Scalar>) -> Result<Self, FrameError> {
        self.scalar_op(scalar.into(), ArithmeticOp::Sub)
    }

    pub fn mul_scalar(&self, scalar: impl Into<Scalar>) -> Result<Self, FrameError> {
        self.scalar_op(scalar.into(), ArithmeticOp::Mul)
    }

    pub fn div_scalar(&self, scalar: impl Into<Scalar>) -> Result<Self, FrameError> {
        self.scalar_op(scalar.into(), ArithmeticOp::Div)
    }

    // ── Masks ──────────────────────────────────────────────────────────

    pub fn compare_scalar(&self, scalar: &Scalar, op: ComparisonOp) -> Result<BitMask, FrameError> {
        Ok(self.column.compare_scalar(scalar, op)?)
    }

    pub fn eq_scalar(&self, value: impl Into<Scalar>) -> Result<BitMask, FrameError> {
        self.compare_scalar(&value.into(), ComparisonOp::Eq)
    }

    pub fn ne_scalar(&self, value: impl Into<Scalar>) -> Result<BitMask, FrameError> {
        self.compare_scalar(&value.into(), ComparisonOp::Ne)
    }

    pub fn lt(&self, value: impl Into<Scalar>) -> Result<BitMask, FrameError> {
        self.compare_scalar(&value.into(), ComparisonOp::Lt)
    }

    pub fn le(&self, value: impl Into<Scalar>) -> Result<BitMask, FrameError> {
        self.compare_scalar(&value.into(), ComparisonOp::Le)
    }

    pub fn gt(&self, value: impl Into<Scalar>) -> Result<BitMask, FrameError> {
        self.compare_scalar(&value.into(), ComparisonOp::Gt)
    }

    pub fn ge(&self, value: impl Into<Scalar>) -> Result<BitMask, FrameError> {
        self.compare_scalar(&value.into(), ComparisonOp::Ge)
    }

    /// Positional comparison. Labels are not consulted; lengths must match.
    pub fn compare_series(&self, other: &Self, op: ComparisonOp) -> Result<BitMask, FrameError> {
        Ok(self.column.compare_column(&other.column, op)?)
    }

    #[must_use]
    pub fn isin(&self, candidates: &[Scalar]) -> BitMask {
        let keys: HashSet<ScalarKey> = candidates.iter().map(Scalar::to_key).collect();
        self.column.isin(&keys)
    }

    #[must_use]
    pub fn is_missing(&self) -> BitMask {
        self.column.missing_mask()
    }

    /// Keep the positions whose mask bit is set, in their original order.
    pub fn where_mask(&self, mask: &BitMask) -> Result<Self, FrameError> {
        check_mask(mask, self.len())?;
        self.take(&mask.true_positions())
    }
}

// ── DataFrame ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DataFrame {
    name: Option<String>,
    index: Index,
    column_index: Index,
    columns: BTreeMap<String, Column>,
    #[serde(skip)]
    shape_version: u64,
}

impl PartialEq for DataFrame {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.index == other.index
            && self.column_index == other.column_index
            && self.columns == other.columns
    }
}

/// Rebuilt through [`DataFrame::new`]; `column_index` fixes the column order and
/// must name exactly the stored columns.
impl<'de> Deserialize<'de> for DataFrame {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            name: Option<String>,
            index: Index,
            column_index: Index,
            columns: BTreeMap<String, Column>,
        }
        let mut raw = Raw::deserialize(deserializer)?;
        if raw.column_index.len() != raw.columns.len() {
            return Err(serde::de::Error::custom(format!(
                "column index has {} labels but {} columns are stored",
                raw.column_index.len(),
                raw.columns.len()
            )));
        }
        let mut ordered = Vec::with_capacity(raw.columns.len());
        for label in raw.column_index.labels() {
            let column = label_name(label)
                .and_then(|name| raw.columns.remove_entry(name))
                .ok_or_else(|| {
                    <D::Error as serde::de::Error>::custom(format!(
                        "column index label {label} has no column"
                    ))
                })?;
            ordered.push(column);
        }
        let mut frame =
            Self::new(raw.index, ordered).map_err(<D::Error as serde::de::Error>::custom)?;
        frame.name = raw.name;
        Ok(frame)
    }
}

fn label_name(label: &IndexLabel) -> Option<&str> {
    match label {
        IndexLabel::Utf8(name) => Some(name),
        IndexLabel::Int64(_) | IndexLabel::Tuple(_) => None,
    }
}

impl DataFrame {
    /// Build a frame from ordered `(name, column)` pairs over `index`.
    pub fn new(index: Index, columns: Vec<(String, Column)>) -> Result<Self, FrameError> {
        let mut names = Vec::with_capacity(columns.len());
        let mut map = BTreeMap::new();
        for (name, column) in columns {
            if column.len() != index.len() {
                return Err(FrameError::LengthMismatch {
                    index_len: index.len(),
                    column_len: column.len(),
                });
            }
            if map.contains_key(&name) {
                return Err(FrameError::DuplicateColumn(name));
            }
            names.push(name.clone());
            map.insert(name, column);
        }

        Ok(Self {
            name: None,
            index,
            column_index: Index::from_utf8(names),
            columns: map,
            shape_version: 0,
        })
    }

    /// Ingest ordered named value vectors. Without explicit labels the rows get
    /// the range index `0..n`.
    pub fn from_columns(
        columns: Vec<(String, Vec<Scalar>)>,
        index: Option<Vec<IndexLabel>>,
        name: Option<String>,
    ) -> Result<Self, FrameError> {
        let index = match index {
            Some(labels) => Index::new(labels),
            None => Index::range(columns.first().map_or(0, |(_, values)| values.len())),
        };
        let columns = columns
            .into_iter()
            .map(|(name, values)| Ok((name, Column::from_values(values)?)))
            .collect::<Result<Vec<_>, FrameError>>()?;

        let mut frame = Self::new(index, columns)?;
        frame.name = name;
        Ok(frame)
    }

    /// Assemble a frame from series that all share one index.
    pub fn from_series(series: Vec<Series>) -> Result<Self, FrameError> {
        let Some(first) = series.first() else {
            return Self::new(Index::new(Vec::new()), Vec::new());
        };
        let index = first.index.clone();
        if series.iter().any(|s| s.index != index) {
            return Err(FrameError::IndexMismatch);
        }
        let columns = series.into_iter().map(|s| (s.name, s.column)).collect();
        Self::new(index, columns)
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.column_index.len()
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn column_index(&self) -> &Index {
        &self.column_index
    }

    /// Column names in insertion order.
    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.column_index
            .labels()
            .iter()
            .filter_map(label_name)
            .collect()
    }

    /// Incremented by every row insert or delete; row proxies compare against it.
    #[must_use]
    pub fn shape_version(&self) -> u64 {
        self.shape_version
    }

    pub fn column(&self, name: &str) -> Result<&Column, FrameError> {
        self.columns
            .get(name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_owned()))
    }

    pub fn series(&self, name: &str) -> Result<Series, FrameError> {
        let column = self.column(name)?.clone();
        Series::new(name, self.index.clone(), column)
    }

    pub fn column_values(&self, name: &str) -> Result<Vec<Scalar>, FrameError> {
        Ok(self.column(name)?.values().to_vec())
    }

    pub fn value(&self, position: usize, column: &str) -> Result<&Scalar, FrameError> {
        let col = self.column(column)?;
        check_position(position, self.len())?;
        Ok(&col.values()[position])
    }

    /// Materialize one row as an independent series indexed by column name.
    pub fn row(&self, position: usize) -> Result<Series, FrameError> {
        check_position(position, self.len())?;
        let label = self.index.label_at(position)?;
        let values = self
            .column_names()
            .into_iter()
            .map(|name| self.value(position, name).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        Series::new(
            label.to_string(),
            self.column_index.clone(),
            Column::from_mixed(values)?,
        )
    }

    fn take_rows(&self, positions: &[usize]) -> Result<Self, FrameError> {
        self.take_rows_with_index(positions, self.index.take(positions))
    }

    fn take_rows_with_index(&self, positions: &[usize], index: Index) -> Result<Self, FrameError> {
        let columns = self
            .columns
            .iter()
            .map(|(name, column)| Ok((name.clone(), column.take(positions)?)))
            .collect::<Result<BTreeMap<_, _>, FrameError>>()?;
        Ok(Self {
            name: self.name.clone(),
            index,
            column_index: self.column_index.clone(),
            columns,
            shape_version: 0,
        })
    }

    /// Rows for each requested label, in request order; duplicates expand.
    pub fn loc(&self, labels: &[IndexLabel]) -> Result<Self, FrameError> {
        let positions = self.index.slice_positions(labels)?;
        self.take_rows(&positions)
    }

    pub fn iloc(&self, positions: &[usize]) -> Result<Self, FrameError> {
        let positions = self.index.positions_at(positions)?;
        self.take_rows(&positions)
    }

    /// Rows whose hierarchical label starts with `prefix`, re-indexed by the
    /// remaining levels.
    pub fn loc_prefix(&self, prefix: &[IndexLabel]) -> Result<Self, FrameError> {
        let multi = MultiIndex::try_from_index(&self.index)?;
        let positions = multi.prefix_positions(prefix)?;
        let index = multi.prefix_slice(prefix)?;
        self.take_rows_with_index(&positions, index)
    }

    pub fn select_columns(&self, names: &[&str]) -> Result<Self, FrameError> {
        let columns = names
            .iter()
            .map(|name| Ok(((*name).to_owned(), self.column(name)?.clone())))
            .collect::<Result<Vec<_>, FrameError>>()?;
        let mut frame = Self::new(self.index.clone(), columns)?;
        frame.name = self.name.clone();
        Ok(frame)
    }

    /// Keep the rows whose mask bit is set, in their original order.
    pub fn where_mask(&self, mask: &BitMask) -> Result<Self, FrameError> {
        check_mask(mask, self.len())?;
        self.take_rows(&mask.true_positions())
    }

    // ── Mutation ───────────────────────────────────────────────────────

    /// Insert or replace a column. A replaced column keeps its position.
    pub fn insert_column(&mut self, name: impl Into<String>, column: Column) -> Result<(), FrameError> {
        let name = name.into();
        if column.len() != self.len() {
            return Err(FrameError::LengthMismatch {
                index_len: self.len(),
                column_len: column.len(),
            });
        }
        if !self.columns.contains_key(&name) {
            self.column_index = self.column_index.appended(IndexLabel::Utf8(name.clone()));
        }
        debug!("insert column '{name}' ({} rows)", column.len());
        self.columns.insert(name, column);
        Ok(())
    }

    /// Insert a series as a column. Its index must equal the frame's row index,
    /// except that a frame with no rows and no columns adopts it.
    pub fn insert_series(&mut self, series: Series) -> Result<(), FrameError> {
        if self.columns.is_empty() && self.index.is_empty() {
            self.index = series.index.clone();
        } else if series.index != self.index {
            return Err(FrameError::IndexMismatch);
        }
        self.insert_column(series.name, series.column)
    }

    pub fn delete_column(&mut self, name: &str) -> Result<Column, FrameError> {
        let label = IndexLabel::Utf8(name.to_owned());
        let position = self
            .column_index
            .position(&label)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_owned()))?;
        let removed = self
            .columns
            .remove(name)
            .ok_or_else(|| FrameError::ColumnNotFound(name.to_owned()))?;
        self.column_index = self.column_index.without_positions(&[position]);
        debug!("delete column '{name}'");
        Ok(removed)
    }

    /// Overwrite one cell. The column widens when the value requires it.
    pub fn set_value(
        &mut self,
        position: usize,
        column: &str,
        value: impl Into<Scalar>,
    ) -> Result<(), FrameError> {
        check_position(position, self.len())?;
        let updated = self.column(column)?.with_value(position, value.into())?;
        self.columns.insert(column.to_owned(), updated);
        Ok(())
    }

    /// Append a row. `values` follow column order.
    pub fn insert_row(
        &mut self,
        label: impl Into<IndexLabel>,
        values: Vec<Scalar>,
    ) -> Result<(), FrameError> {
        let names: Vec<String> = self.column_names().into_iter().map(str::to_owned).collect();
        if values.len() != names.len() {
            return Err(FrameError::RowWidth {
                expected: names.len(),
                found: values.len(),
            });
        }

        let mut updated = Vec::with_capacity(names.len());
        for (name, value) in names.into_iter().zip(values) {
            let column = self.column(&name)?.with_pushed(value)?;
            updated.push((name, column));
        }

        let label = label.into();
        debug!("insert row {label} at position {}", self.len());
        self.index = self.index.appended(label);
        self.columns.extend(updated);
        self.shape_version += 1;
        Ok(())
    }

    pub fn delete_row(&mut self, position: usize) -> Result<(), FrameError> {
        check_position(position, self.len())?;
        self.remove_rows(&[position]);
        Ok(())
    }

    /// Delete every row carrying `label`; returns how many were removed.
    pub fn delete_rows_by_label(&mut self, label: &IndexLabel) -> Result<usize, FrameError> {
        let positions = self.index.position_of(label)?.to_vec();
        self.remove_rows(&positions);
        Ok(positions.len())
    }

    fn remove_rows(&mut self, positions: &[usize]) {
        debug!("delete rows at {positions:?}");
        self.index = self.index.without_positions(positions);
        for column in self.columns.values_mut() {
            *column = column.without_positions(positions);
        }
        self.shape_version += 1;
    }

    // ── Presentation boundary ──────────────────────────────────────────

    /// Row-major `(row label, column name, value)` triples.
    pub fn cells(&self) -> impl Iterator<Item = (&IndexLabel, &str, &Scalar)> + '_ {
        let names = self.column_names();
        self.index
            .labels()
            .iter()
            .enumerate()
            .flat_map(move |(pos, label)| {
                names
                    .clone()
                    .into_iter()
                    .filter_map(move |name| {
                        self.columns
                            .get(name)
                            .and_then(|col| col.value(pos))
                            .map(|value| (label, name, value))
                    })
            })
    }

    /// `(column name, series)` pairs in column order.
    pub fn items(&self) -> impl Iterator<Item = (&str, Series)> + '_ {
        self.column_names().into_iter().filter_map(move |name| {
            self.columns.get(name).map(|column| {
                let series = Series {
                    name: name.to_owned(),
                    index: self.index.clone(),
                    column: column.clone(),
                };
                (name, series)
            })
        })
    }
}
