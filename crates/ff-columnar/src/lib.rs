#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::HashSet;

use ff_types::{
    DType, ErrorKind, NullKind, Scalar, ScalarKey, TypeError, cast_scalar, cast_scalar_owned,
    common_dtype, infer_dtype, infer_dtype_lenient,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Packed bit vector. Serves both as a column's validity bitmap and as the
/// boolean mask produced by comparisons and consumed by `where`.
#[derive(Debug, Clone, Eq)]
pub struct BitMask {
    words: Vec<u64>,
    len: usize,
}

impl BitMask {
    /// Validity bitmap: set where the value is present.
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        Self::from_fn(values.len(), |idx| !values[idx].is_missing())
    }

    #[must_use]
    pub fn from_bools(bits: &[bool]) -> Self {
        Self::from_fn(bits.len(), |idx| bits[idx])
    }

    #[must_use]
    pub fn from_fn(len: usize, mut f: impl FnMut(usize) -> bool) -> Self {
        let mut words = vec![0_u64; len.div_ceil(64)];
        for idx in 0..len {
            if f(idx) {
                words[idx / 64] |= 1_u64 << (idx % 64);
            }
        }
        Self { words, len }
    }

    #[must_use]
    pub fn all_set(len: usize) -> Self {
        let mut words = vec![u64::MAX; len.div_ceil(64)];
        let remainder = len % 64;
        if remainder > 0 {
            if let Some(last) = words.last_mut() {
                *last = (1_u64 << remainder) - 1;
            }
        }
        Self { words, len }
    }

    #[must_use]
    pub fn none_set(len: usize) -> Self {
        Self {
            words: vec![0_u64; len.div_ceil(64)],
            len,
        }
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> bool {
        if idx >= self.len {
            return false;
        }
        (self.words[idx / 64] >> (idx % 64)) & 1 == 1
    }

    pub fn set(&mut self, idx: usize, value: bool) {
        if idx >= self.len {
            return;
        }
        if value {
            self.words[idx / 64] |= 1_u64 << (idx % 64);
        } else {
            self.words[idx / 64] &= !(1_u64 << (idx % 64));
        }
    }

    #[must_use]
    pub fn count_true(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check_len(&self, other: &Self) -> Result<(), ColumnError> {
        if self.len != other.len {
            return Err(ColumnError::LengthMismatch {
                left: self.len,
                right: other.len,
            });
        }
        Ok(())
    }

    pub fn and(&self, other: &Self) -> Result<Self, ColumnError> {
        self.check_len(other)?;
        let words = self
            .words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| a & b)
            .collect();
        Ok(Self {
            words,
            len: self.len,
        })
    }

    pub fn or(&self, other: &Self) -> Result<Self, ColumnError> {
        self.check_len(other)?;
        let words = self
            .words
            .iter()
            .zip(&other.words)
            .map(|(a, b)| a | b)
            .collect();
        Ok(Self {
            words,
            len: self.len,
        })
    }

    #[must_use]
    pub fn not(&self) -> Self {
        let mut words: Vec<u64> = self.words.iter().map(|w| !w).collect();
        let remainder = self.len % 64;
        if remainder > 0 {
            if let Some(last) = words.last_mut() {
                *last &= (1_u64 << remainder) - 1;
            }
        }
        Self {
            words,
            len: self.len,
        }
    }

    pub fn bits(&self) -> impl Iterator<Item = bool> + '_ {
        (0..self.len).map(|idx| self.get(idx))
    }

    /// Positions whose bit is set, ascending.
    #[must_use]
    pub fn true_positions(&self) -> Vec<usize> {
        (0..self.len).filter(|&idx| self.get(idx)).collect()
    }
}

impl PartialEq for BitMask {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.bits().eq(other.bits())
    }
}

impl Serialize for BitMask {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let bits: Vec<bool> = self.bits().collect();
        let mut state = serializer.serialize_struct("BitMask", 1)?;
        state.serialize_field("bits", &bits)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for BitMask {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            bits: Vec<bool>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(Self::from_bools(&raw.bits))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithmeticOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
        }
    }
}

/// Element-wise comparison. Any comparison touching a missing value is `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl ComparisonOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("position {position} out of range for column length {len}")]
    OutOfRange { position: usize, len: usize },
    #[error("arithmetic is not defined for dtype {0:?}")]
    NonNumericDtype(DType),
    #[error("cannot order {left:?} against {right:?}")]
    Unorderable { left: DType, right: DType },
    #[error(transparent)]
    Type(#[from] TypeError),
}

impl ColumnError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LengthMismatch { .. } => ErrorKind::InvalidArgument,
            Self::OutOfRange { .. } => ErrorKind::OutOfRange,
            Self::NonNumericDtype(_) | Self::Unorderable { .. } | Self::Type(_) => ErrorKind::Type,
        }
    }
}

/// Compare two non-missing scalars. `None` means the values are of
/// different kinds and only (in)equality is meaningful.
fn scalar_ordering(left: &Scalar, right: &Scalar) -> Option<Ordering> {
    match (left, right) {
        (Scalar::Utf8(a), Scalar::Utf8(b)) => Some(a.cmp(b)),
        (Scalar::Bool(a), Scalar::Bool(b)) => Some(a.cmp(b)),
        (Scalar::Int64(a), Scalar::Int64(b)) => Some(a.cmp(b)),
        (Scalar::Utf8(_), _) | (_, Scalar::Utf8(_)) => None,
        _ => {
            let lhs = left.to_f64().ok()?;
            let rhs = right.to_f64().ok()?;
            lhs.partial_cmp(&rhs)
        }
    }
}

fn compare_scalars(left: &Scalar, right: &Scalar, op: ComparisonOp) -> Result<bool, ColumnError> {
    if left.is_missing() || right.is_missing() {
        return Ok(false);
    }
    match scalar_ordering(left, right) {
        Some(ordering) => Ok(op.holds(ordering)),
        None => match op {
            ComparisonOp::Eq => Ok(false),
            ComparisonOp::Ne => Ok(true),
            _ => Err(ColumnError::Unorderable {
                left: left.dtype(),
                right: right.dtype(),
            }),
        },
    }
}

fn arithmetic_dtype(left: DType, right: DType, op: ArithmeticOp) -> Result<DType, ColumnError> {
    let out = match common_dtype(left, right)? {
        out @ (DType::Utf8 | DType::Object) => return Err(ColumnError::NonNumericDtype(out)),
        DType::Bool => DType::Int64,
        other => other,
    };
    if matches!(op, ArithmeticOp::Div) {
        return Ok(DType::Float64);
    }
    Ok(out)
}

fn apply_arithmetic(
    left: &Scalar,
    right: &Scalar,
    op: ArithmeticOp,
    out_dtype: DType,
) -> Result<Scalar, ColumnError> {
    if left.is_missing() || right.is_missing() {
        return Ok(if left.is_nan() || right.is_nan() {
            Scalar::Null(NullKind::NaN)
        } else {
            Scalar::missing_for_dtype(out_dtype)
        });
    }

    match out_dtype {
        DType::Int64 => {
            let (Scalar::Int64(a), Scalar::Int64(b)) = (
                cast_scalar(left, DType::Int64)?,
                cast_scalar(right, DType::Int64)?,
            ) else {
                return Ok(Scalar::missing_for_dtype(out_dtype));
            };
            Ok(Scalar::Int64(match op {
                ArithmeticOp::Add => a.wrapping_add(b),
                ArithmeticOp::Sub => a.wrapping_sub(b),
                ArithmeticOp::Mul => a.wrapping_mul(b),
                ArithmeticOp::Div => return Ok(Scalar::Float64(a as f64 / b as f64)),
            }))
        }
        DType::Float64 => {
            let a = left.to_f64()?;
            let b = right.to_f64()?;
            Ok(Scalar::Float64(match op {
                ArithmeticOp::Add => a + b,
                ArithmeticOp::Sub => a - b,
                ArithmeticOp::Mul => a * b,
                ArithmeticOp::Div => a / b,
            }))
        }
        DType::Null | DType::Bool | DType::Utf8 | DType::Object => {
            Ok(Scalar::missing_for_dtype(out_dtype))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
    validity: BitMask,
}

/// The validity mask is rebuilt from the values rather than trusted.
impl<'de> Deserialize<'de> for Column {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw {
            dtype: DType,
            values: Vec<Scalar>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Self::new(raw.dtype, raw.values).map_err(serde::de::Error::custom)
    }
}

impl Column {
    /// Construct a column, coercing values to `dtype`.
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let coerced = values
            .into_iter()
            .map(|value| cast_scalar_owned(value, dtype))
            .collect::<Result<Vec<_>, _>>()?;
        let validity = BitMask::from_values(&coerced);

        Ok(Self {
            dtype,
            values: coerced,
            validity,
        })
    }

    pub fn from_values(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        let dtype = infer_dtype(&values)?;
        Self::new(dtype, values)
    }

    /// Build a column from values of any kinds; mixed kinds become `Object`.
    pub fn from_mixed(values: Vec<Scalar>) -> Result<Self, ColumnError> {
        Self::new(infer_dtype_lenient(&values), values)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    #[must_use]
    pub fn validity(&self) -> &BitMask {
        &self.validity
    }

    #[must_use]
    pub fn missing_mask(&self) -> BitMask {
        self.validity.not()
    }

    fn check_position(&self, position: usize) -> Result<(), ColumnError> {
        if position >= self.values.len() {
            return Err(ColumnError::OutOfRange {
                position,
                len: self.values.len(),
            });
        }
        Ok(())
    }

    /// Gather values by optional position; `None` slots become the missing marker.
    pub fn reindex_by_positions(&self, positions: &[Option<usize>]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|slot| match slot {
                Some(idx) => self
                    .values
                    .get(*idx)
                    .cloned()
                    .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype)),
                None => Scalar::missing_for_dtype(self.dtype),
            })
            .collect::<Vec<_>>();

        Self::new(self.dtype, values)
    }

    pub fn take(&self, positions: &[usize]) -> Result<Self, ColumnError> {
        let mut values = Vec::with_capacity(positions.len());
        for &position in positions {
            self.check_position(position)?;
            values.push(self.values[position].clone());
        }
        Self::new(self.dtype, values)
    }

    /// Copy with `value` written at `position`. The dtype widens when the value
    /// requires it; an incompatible value fails and leaves `self` untouched.
    pub fn with_value(&self, position: usize, value: Scalar) -> Result<Self, ColumnError> {
        self.check_position(position)?;
        let dtype = common_dtype(self.dtype, value.dtype())?;
        let mut values = self.values.clone();
        values[position] = value;
        Self::new(dtype, values)
    }

    pub fn with_pushed(&self, value: Scalar) -> Result<Self, ColumnError> {
        let dtype = common_dtype(self.dtype, value.dtype())?;
        let mut values = self.values.clone();
        values.push(value);
        Self::new(dtype, values)
    }

    #[must_use]
    pub fn without_positions(&self, positions: &[usize]) -> Self {
        let drop: HashSet<usize> = positions.iter().copied().collect();
        let values: Vec<Scalar> = self
            .values
            .iter()
            .enumerate()
            .filter(|(pos, _)| !drop.contains(pos))
            .map(|(_, v)| v.clone())
            .collect();
        let validity = BitMask::from_values(&values);
        Self {
            dtype: self.dtype,
            values,
            validity,
        }
    }

    /// Position-wise arithmetic between equal-length columns.
    pub fn binary_numeric(&self, right: &Self, op: ArithmeticOp) -> Result<Self, ColumnError> {
        if self.len() != right.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: right.len(),
            });
        }

        let out_dtype = arithmetic_dtype(self.dtype, right.dtype, op)?;
        let values = self
            .values
            .iter()
            .zip(&right.values)
            .map(|(l, r)| apply_arithmetic(l, r, op, out_dtype))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(out_dtype, values)
    }

    /// Broadcast `scalar` against every element. Missing elements stay missing.
    pub fn scalar_numeric(&self, scalar: &Scalar, op: ArithmeticOp) -> Result<Self, ColumnError> {
        let out_dtype = arithmetic_dtype(self.dtype, scalar.dtype(), op)?;
        let values = self
            .values
            .iter()
            .map(|v| apply_arithmetic(v, scalar, op, out_dtype))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(out_dtype, values)
    }

    pub fn compare_scalar(&self, scalar: &Scalar, op: ComparisonOp) -> Result<BitMask, ColumnError> {
        let bits = self
            .values
            .iter()
            .map(|v| compare_scalars(v, scalar, op))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BitMask::from_bools(&bits))
    }

    /// Position-wise comparison; the columns must have equal length.
    pub fn compare_column(&self, right: &Self, op: ComparisonOp) -> Result<BitMask, ColumnError> {
        if self.len() != right.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: right.len(),
            });
        }
        let bits = self
            .values
            .iter()
            .zip(&right.values)
            .map(|(l, r)| compare_scalars(l, r, op))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BitMask::from_bools(&bits))
    }

    #[must_use]
    pub fn isin(&self, candidates: &HashSet<ScalarKey>) -> BitMask {
        BitMask::from_fn(self.values.len(), |idx| {
            candidates.contains(&self.values[idx].to_key())
        })
    }
}
