#![forbid(unsafe_code)]

use std::cell::OnceCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use ff_types::ErrorKind;
use log::trace;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum IndexLabel {
    Int64(i64),
    Utf8(String),
    /// Composite label addressing one row of a hierarchical index.
    Tuple(Vec<IndexLabel>),
}

impl IndexLabel {
    pub fn tuple<I, L>(components: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<IndexLabel>,
    {
        Self::Tuple(components.into_iter().map(Into::into).collect())
    }

    /// Components of a composite label; a scalar label is its own single component.
    #[must_use]
    pub fn components(&self) -> &[IndexLabel] {
        match self {
            Self::Tuple(parts) => parts,
            other => std::slice::from_ref(other),
        }
    }
}

impl From<i64> for IndexLabel {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<&str> for IndexLabel {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for IndexLabel {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl From<Vec<IndexLabel>> for IndexLabel {
    fn from(value: Vec<IndexLabel>) -> Self {
        Self::Tuple(value)
    }
}

impl fmt::Display for IndexLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
            Self::Tuple(parts) => {
                f.write_str("(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{part}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("label not found: {label}")]
    KeyNotFound { label: IndexLabel },
    #[error("position {position} out of range for length {len}")]
    OutOfRange { position: usize, len: usize },
    #[error("hierarchical label arity mismatch: expected {expected}, found {found}")]
    ArityMismatch { expected: usize, found: usize },
    #[error("index is not hierarchical: {0}")]
    NotHierarchical(String),
    #[error("alignment vectors must have equal lengths")]
    InvalidAlignmentVectors,
}

impl IndexError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::KeyNotFound { .. } => ErrorKind::KeyNotFound,
            Self::OutOfRange { .. } => ErrorKind::OutOfRange,
            Self::ArityMismatch { .. }
            | Self::NotHierarchical(_)
            | Self::InvalidAlignmentVectors => ErrorKind::InvalidArgument,
        }
    }
}

/// Ordered label sequence with a lazily built label → positions multimap.
///
/// An `Index` is a value: every structural change returns a new `Index`, so
/// clones handed to several series can never observe each other's edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Index {
    labels: Vec<IndexLabel>,
    #[serde(skip)]
    position_cache: OnceCell<HashMap<IndexLabel, Vec<usize>>>,
    #[serde(skip)]
    sorted_cache: OnceCell<bool>,
}

impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels
    }
}

impl Eq for Index {}

impl FromIterator<IndexLabel> for Index {
    fn from_iter<T: IntoIterator<Item = IndexLabel>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Index {
    #[must_use]
    pub fn new(labels: Vec<IndexLabel>) -> Self {
        Self {
            labels,
            position_cache: OnceCell::new(),
            sorted_cache: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn from_i64(values: Vec<i64>) -> Self {
        values.into_iter().map(IndexLabel::from).collect()
    }

    #[must_use]
    pub fn from_utf8<S: Into<String>>(values: Vec<S>) -> Self {
        values
            .into_iter()
            .map(|v| IndexLabel::Utf8(v.into()))
            .collect()
    }

    /// `0..len` as `Int64` labels.
    #[must_use]
    pub fn range(len: usize) -> Self {
        (0..len).map(|i| IndexLabel::Int64(i as i64)).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[IndexLabel] {
        &self.labels
    }

    fn position_map(&self) -> &HashMap<IndexLabel, Vec<usize>> {
        self.position_cache.get_or_init(|| {
            let mut map = HashMap::<IndexLabel, Vec<usize>>::with_capacity(self.labels.len());
            for (pos, label) in self.labels.iter().enumerate() {
                map.entry(label.clone()).or_default().push(pos);
            }
            map
        })
    }

    #[must_use]
    pub fn has_duplicates(&self) -> bool {
        self.position_map().len() != self.labels.len()
    }

    /// Strictly ascending, which also implies no duplicates.
    #[must_use]
    pub fn is_sorted(&self) -> bool {
        *self
            .sorted_cache
            .get_or_init(|| self.labels.windows(2).all(|w| w[0] < w[1]))
    }

    /// Every position holding `label`, ascending; `None` when the label is absent.
    #[must_use]
    pub fn get_positions(&self, label: &IndexLabel) -> Option<&[usize]> {
        self.position_map().get(label).map(Vec::as_slice)
    }

    pub fn position_of(&self, label: &IndexLabel) -> Result<&[usize], IndexError> {
        self.get_positions(label)
            .ok_or_else(|| IndexError::KeyNotFound {
                label: label.clone(),
            })
    }

    #[must_use]
    pub fn position(&self, label: &IndexLabel) -> Option<usize> {
        self.get_positions(label)
            .and_then(|positions| positions.first().copied())
    }

    #[must_use]
    pub fn contains(&self, label: &IndexLabel) -> bool {
        self.position_map().contains_key(label)
    }

    pub fn label_at(&self, position: usize) -> Result<&IndexLabel, IndexError> {
        self.labels.get(position).ok_or(IndexError::OutOfRange {
            position,
            len: self.labels.len(),
        })
    }

    /// Positions for a label selector: request order, and for each requested
    /// label all of its positions ascending. Repeated requests repeat positions.
    pub fn slice_positions(&self, labels: &[IndexLabel]) -> Result<Vec<usize>, IndexError> {
        let mut out = Vec::with_capacity(labels.len());
        for label in labels {
            out.extend_from_slice(self.position_of(label)?);
        }
        Ok(out)
    }

    pub fn slice(&self, labels: &[IndexLabel]) -> Result<Self, IndexError> {
        let positions = self.slice_positions(labels)?;
        Ok(self.take(&positions))
    }

    /// Bounds-checked pass-through for positional selectors.
    pub fn positions_at(&self, positions: &[usize]) -> Result<Vec<usize>, IndexError> {
        for &position in positions {
            if position >= self.labels.len() {
                return Err(IndexError::OutOfRange {
                    position,
                    len: self.labels.len(),
                });
            }
        }
        Ok(positions.to_vec())
    }

    /// Build a new index from `positions`, which the caller has bounds-checked.
    #[must_use]
    pub fn take(&self, positions: &[usize]) -> Self {
        positions
            .iter()
            .map(|&i| self.labels[i].clone())
            .collect()
    }

    #[must_use]
    pub fn unique(&self) -> Self {
        let mut seen = HashSet::<&IndexLabel>::new();
        self.labels
            .iter()
            .filter(|l| seen.insert(l))
            .cloned()
            .collect()
    }

    /// Sorted, de-duplicated union of both label sets.
    #[must_use]
    pub fn union_sorted(&self, other: &Self) -> Self {
        let set: BTreeSet<&IndexLabel> = self.labels.iter().chain(other.labels.iter()).collect();
        set.into_iter().cloned().collect()
    }

    /// Sorted, de-duplicated labels present in both indexes.
    #[must_use]
    pub fn intersection_sorted(&self, other: &Self) -> Self {
        let set: BTreeSet<&IndexLabel> = self
            .labels
            .iter()
            .filter(|label| other.contains(label))
            .collect();
        set.into_iter().cloned().collect()
    }

    #[must_use]
    pub fn isin(&self, values: &[IndexLabel]) -> Vec<bool> {
        let set: HashSet<&IndexLabel> = values.iter().collect();
        self.labels.iter().map(|l| set.contains(l)).collect()
    }

    #[must_use]
    pub fn appended(&self, label: IndexLabel) -> Self {
        let mut labels = self.labels.clone();
        labels.push(label);
        Self::new(labels)
    }

    #[must_use]
    pub fn without_positions(&self, positions: &[usize]) -> Self {
        let drop: HashSet<usize> = positions.iter().copied().collect();
        self.labels
            .iter()
            .enumerate()
            .filter(|(pos, _)| !drop.contains(pos))
            .map(|(_, label)| label.clone())
            .collect()
    }
}

// ── Alignment ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentPlan {
    pub index: Index,
    pub left_positions: Vec<Option<usize>>,
    pub right_positions: Vec<Option<usize>>,
}

fn plan_for(index: Index, left: &Index, right: &Index) -> AlignmentPlan {
    let left_positions = index.labels.iter().map(|l| left.position(l)).collect();
    let right_positions = index.labels.iter().map(|l| right.position(l)).collect();
    AlignmentPlan {
        index,
        left_positions,
        right_positions,
    }
}

/// Sorted union of both indexes with first-match positions per side.
pub fn align_union_sorted(left: &Index, right: &Index) -> AlignmentPlan {
    let plan = plan_for(left.union_sorted(right), left, right);
    trace!(
        "union alignment: left={} right={} out={}",
        left.len(),
        right.len(),
        plan.index.len()
    );
    plan
}

/// Sorted intersection with first-match positions per side.
///
/// Labels present on only one side are dropped.
pub fn align_intersection_sorted(left: &Index, right: &Index) -> AlignmentPlan {
    let plan = plan_for(left.intersection_sorted(right), left, right);
    trace!(
        "intersection alignment: left={} right={} out={}",
        left.len(),
        right.len(),
        plan.index.len()
    );
    plan
}

pub fn validate_alignment_plan(plan: &AlignmentPlan) -> Result<(), IndexError> {
    if plan.left_positions.len() != plan.right_positions.len()
        || plan.left_positions.len() != plan.index.len()
    {
        return Err(IndexError::InvalidAlignmentVectors);
    }

    Ok(())
}

// ── Hierarchical index ─────────────────────────────────────────────────

/// Index whose labels are all tuples of one fixed arity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiIndex {
    arity: usize,
    index: Index,
}

impl MultiIndex {
    pub fn new(arity: usize, tuples: Vec<Vec<IndexLabel>>) -> Result<Self, IndexError> {
        if arity == 0 {
            return Err(IndexError::ArityMismatch {
                expected: 1,
                found: 0,
            });
        }
        for tuple in &tuples {
            if tuple.len() != arity {
                return Err(IndexError::ArityMismatch {
                    expected: arity,
                    found: tuple.len(),
                });
            }
        }
        Ok(Self {
            arity,
            index: tuples.into_iter().map(IndexLabel::Tuple).collect(),
        })
    }

    pub fn try_from_index(index: &Index) -> Result<Self, IndexError> {
        let Some(IndexLabel::Tuple(first)) = index.labels().first() else {
            return Err(IndexError::NotHierarchical(
                "first label is not a tuple".to_owned(),
            ));
        };
        let arity = first.len();
        for label in index.labels() {
            match label {
                IndexLabel::Tuple(parts) if parts.len() == arity => {}
                IndexLabel::Tuple(parts) => {
                    return Err(IndexError::ArityMismatch {
                        expected: arity,
                        found: parts.len(),
                    });
                }
                other => {
                    return Err(IndexError::NotHierarchical(format!(
                        "scalar label {other} in tuple index"
                    )));
                }
            }
        }
        Ok(Self {
            arity,
            index: index.clone(),
        })
    }

    #[must_use]
    pub fn arity(&self) -> usize {
        self.arity
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
    pub fn as_index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn into_index(self) -> Index {
        self.index
    }

    pub fn position_of(&self, tuple: &[IndexLabel]) -> Result<&[usize], IndexError> {
        if tuple.len() != self.arity {
            return Err(IndexError::ArityMismatch {
                expected: self.arity,
                found: tuple.len(),
            });
        }
        self.index.position_of(&IndexLabel::Tuple(tuple.to_vec()))
    }

    /// Positions of every label whose leading components equal `prefix`, in index order.
    pub fn prefix_positions(&self, prefix: &[IndexLabel]) -> Result<Vec<usize>, IndexError> {
        if prefix.is_empty() || prefix.len() > self.arity {
            return Err(IndexError::ArityMismatch {
                expected: self.arity,
                found: prefix.len(),
            });
        }
        let positions: Vec<usize> = self
            .index
            .labels()
            .iter()
            .enumerate()
            .filter(|(_, label)| label.components().starts_with(prefix))
            .map(|(pos, _)| pos)
            .collect();
        if positions.is_empty() {
            return Err(IndexError::KeyNotFound {
                label: IndexLabel::Tuple(prefix.to_vec()),
            });
        }
        Ok(positions)
    }

    /// Labels of the matched rows with the prefix levels stripped.
    ///
    /// One remaining level yields scalar labels; a full-arity prefix keeps the
    /// complete tuples.
    pub fn prefix_slice(&self, prefix: &[IndexLabel]) -> Result<Index, IndexError> {
        let positions = self.prefix_positions(prefix)?;
        let remaining = self.arity - prefix.len();
        let labels = positions.iter().map(|&pos| {
            let parts = self.index.labels()[pos].components();
            match remaining {
                0 => self.index.labels()[pos].clone(),
                1 => parts[self.arity - 1].clone(),
                _ => IndexLabel::Tuple(parts[prefix.len()..].to_vec()),
            }
        });
        Ok(labels.collect())
    }

    #[must_use]
    pub fn sparse_labels(&self) -> Vec<Vec<Option<IndexLabel>>> {
        sparse_display(self.index.labels())
    }
}

/// Display projection of hierarchical labels.
///
/// A component is kept when it, or any component on an earlier level, differs
/// from the previous row; otherwise it becomes `None`. Lookups never read this.
#[must_use]
pub fn sparse_display(labels: &[IndexLabel]) -> Vec<Vec<Option<IndexLabel>>> {
    let mut out = Vec::with_capacity(labels.len());
    let mut previous: Option<&[IndexLabel]> = None;
    for label in labels {
        let parts = label.components();
        let shared = previous.map_or(0, |prev| {
            prev.iter()
                .zip(parts)
                .take_while(|(a, b)| a == b)
                .count()
        });
        let row = parts
            .iter()
            .enumerate()
            .map(|(level, part)| (level >= shared).then(|| part.clone()))
            .collect();
        out.push(row);
        previous = Some(parts);
    }
    out
}
