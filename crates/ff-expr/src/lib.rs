#![forbid(unsafe_code)]

use ff_columnar::{BitMask, ColumnError, ComparisonOp};
use ff_frame::{DataFrame, FrameError};
use ff_types::{ErrorKind, Scalar};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Boolean predicate over the columns of a frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    Compare {
        column: String,
        op: ComparisonOp,
        value: Scalar,
    },
    /// Row-by-row comparison of two columns of the same frame.
    CompareColumns {
        left: String,
        op: ComparisonOp,
        right: String,
    },
    IsIn {
        column: String,
        values: Vec<Scalar>,
    },
    IsMissing {
        column: String,
    },
    And {
        left: Box<Predicate>,
        right: Box<Predicate>,
    },
    Or {
        left: Box<Predicate>,
        right: Box<Predicate>,
    },
    Not {
        predicate: Box<Predicate>,
    },
}

impl Predicate {
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::And {
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::Or {
            left: Box::new(self),
            right: Box::new(other),
        }
    }

    #[must_use]
    pub fn not(self) -> Self {
        Self::Not {
            predicate: Box::new(self),
        }
    }
}

/// Entry point of the builder: `col("age").lt(10_i64).and(col("name").eq("a"))`.
#[must_use]
pub fn col(name: impl Into<String>) -> ColumnRef {
    ColumnRef(name.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef(String);

impl ColumnRef {
    fn compare(self, op: ComparisonOp, value: impl Into<Scalar>) -> Predicate {
        Predicate::Compare {
            column: self.0,
            op,
            value: value.into(),
        }
    }

    #[must_use]
    pub fn eq(self, value: impl Into<Scalar>) -> Predicate {
        self.compare(ComparisonOp::Eq, value)
    }

    #[must_use]
    pub fn ne(self, value: impl Into<Scalar>) -> Predicate {
        self.compare(ComparisonOp::Ne, value)
    }

    #[must_use]
    pub fn lt(self, value: impl Into<Scalar>) -> Predicate {
        self.compare(ComparisonOp::Lt, value)
    }

    #[must_use]
    pub fn le(self, value: impl Into<Scalar>) -> Predicate {
        self.compare(ComparisonOp::Le, value)
    }

    #[must_use]
    pub fn gt(self, value: impl Into<Scalar>) -> Predicate {
        self.compare(ComparisonOp::Gt, value)
    }

    #[must_use]
    pub fn ge(self, value: impl Into<Scalar>) -> Predicate {
        self.compare(ComparisonOp::Ge, value)
    }

    #[must_use]
    pub fn compare_to(self, op: ComparisonOp, other: Self) -> Predicate {
        Predicate::CompareColumns {
            left: self.0,
            op,
            right: other.0,
        }
    }

    #[must_use]
    pub fn is_in<I, V>(self, values: I) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Scalar>,
    {
        Predicate::IsIn {
            column: self.0,
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn is_missing(self) -> Predicate {
        Predicate::IsMissing { column: self.0 }
    }
}

#[derive(Debug, Error)]
pub enum ExprError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

impl ExprError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Frame(err) => err.kind(),
            Self::Column(err) => err.kind(),
        }
    }
}

/// Evaluate `predicate` to a mask with one bit per row of `frame`.
pub fn evaluate(predicate: &Predicate, frame: &DataFrame) -> Result<BitMask, ExprError> {
    match predicate {
        Predicate::Compare { column, op, value } => {
            Ok(frame.column(column)?.compare_scalar(value, *op)?)
        }
        Predicate::CompareColumns { left, op, right } => {
            let lhs = frame.column(left)?;
            let rhs = frame.column(right)?;
            Ok(lhs.compare_column(rhs, *op)?)
        }
        Predicate::IsIn { column, values } => Ok(frame.series(column)?.isin(values)),
        Predicate::IsMissing { column } => Ok(frame.column(column)?.missing_mask()),
        Predicate::And { left, right } => {
            let lhs = evaluate(left, frame)?;
            let rhs = evaluate(right, frame)?;
            Ok(lhs.and(&rhs)?)
        }
        Predicate::Or { left, right } => {
            let lhs = evaluate(left, frame)?;
            let rhs = evaluate(right, frame)?;
            Ok(lhs.or(&rhs)?)
        }
        Predicate::Not { predicate } => Ok(evaluate(predicate, frame)?.not()),
    }
}

/// Rows of `frame` satisfying `predicate`, in their original order.
pub fn filter(frame: &DataFrame, predicate: &Predicate) -> Result<DataFrame, ExprError> {
    let mask = evaluate(predicate, frame)?;
    Ok(frame.where_mask(&mask)?)
}

#[cfg(test)]
mod tests {
    use ff_columnar::ComparisonOp;
    use ff_frame::DataFrame;
    use ff_index::IndexLabel;
    use ff_types::{ErrorKind, Scalar};

    use super::{Predicate, col, evaluate, filter};

    fn frame() -> DataFrame {
        DataFrame::from_columns(
            vec![
                (
                    "v".to_owned(),
                    [2, 5, 1, 22, 51, 4].into_iter().map(Scalar::Int64).collect(),
                ),
                (
                    "w".to_owned(),
                    vec![
                        Scalar::Int64(1),
                        Scalar::Int64(9),
                        Scalar::null(),
                        Scalar::Int64(30),
                        Scalar::Int64(0),
                        Scalar::Int64(4),
                    ],
                ),
                (
                    "tag".to_owned(),
                    ["a", "b", "a", "c", "b", "a"].into_iter().map(Scalar::from).collect(),
                ),
            ],
            None,
            None,
        )
        .expect("frame")
    }

    #[test]
    fn less_than_filter_keeps_original_positions() {
        let out = filter(&frame(), &col("v").lt(10_i64)).expect("filter");
        assert_eq!(
            out.column_values("v").expect("v"),
            [2, 5, 1, 4].into_iter().map(Scalar::Int64).collect::<Vec<_>>()
        );
        assert_eq!(
            out.index().labels(),
            &[
                IndexLabel::Int64(0),
                IndexLabel::Int64(1),
                IndexLabel::Int64(2),
                IndexLabel::Int64(5)
            ]
        );
    }

    #[test]
    fn boolean_combinators() {
        let f = frame();
        let both = col("v").lt(10_i64).and(col("tag").eq("a"));
        assert_eq!(evaluate(&both, &f).expect("and").true_positions(), vec![0, 2, 5]);

        let either = col("v").gt(50_i64).or(col("tag").eq("c"));
        assert_eq!(evaluate(&either, &f).expect("or").true_positions(), vec![3, 4]);

        let negated = col("tag").eq("a").not();
        assert_eq!(evaluate(&negated, &f).expect("not").true_positions(), vec![1, 3, 4]);
    }

    #[test]
    fn missing_values_never_satisfy_comparisons() {
        let f = frame();
        assert_eq!(
            evaluate(&col("w").ge(0_i64), &f).expect("ge").true_positions(),
            vec![0, 1, 3, 4, 5]
        );
        assert_eq!(
            evaluate(&col("w").is_missing(), &f).expect("missing").true_positions(),
            vec![2]
        );
    }

    #[test]
    fn column_comparison_and_membership() {
        let f = frame();
        let cmp = col("v").compare_to(ComparisonOp::Eq, col("w"));
        assert_eq!(evaluate(&cmp, &f).expect("cmp").true_positions(), vec![5]);

        let member = col("tag").is_in(["b", "c"]);
        assert_eq!(evaluate(&member, &f).expect("isin").true_positions(), vec![1, 3, 4]);
    }

    #[test]
    fn filtering_twice_is_a_no_op() {
        let predicate = col("v").lt(10_i64).and(col("tag").ne("b"));
        let once = filter(&frame(), &predicate).expect("once");
        let twice = filter(&once, &predicate).expect("twice");
        assert_eq!(once, twice);
    }

    #[test]
    fn unknown_column_is_key_not_found() {
        let err = evaluate(&col("nope").eq(1_i64), &frame()).expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::KeyNotFound);
    }

    #[test]
    fn predicates_round_trip_through_json() {
        let predicate = col("v").lt(10_i64).and(col("tag").is_in(["a"]).not());
        let json = serde_json::to_string(&predicate).expect("serialize");
        let back: Predicate = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, predicate);
    }
}
