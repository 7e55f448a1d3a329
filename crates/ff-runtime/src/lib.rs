#![forbid(unsafe_code)]

use std::time::{SystemTime, UNIX_EPOCH};

use ff_types::ErrorKind;
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeMode {
    #[default]
    Strict,
    Hardened,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Allow,
    Reject,
}

/// How label-aligned arithmetic combines two indexes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticAlignment {
    /// Sorted union; labels missing on one side produce a missing result.
    #[default]
    Union,
    /// Legacy behaviour: only labels present on both sides survive.
    Intersection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub ts_unix_ms: u64,
    pub mode: RuntimeMode,
    pub action: DecisionAction,
    pub subject: String,
    pub detail: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceLedger {
    records: Vec<DecisionRecord>,
}

impl EvidenceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: DecisionRecord) {
        self.records.push(record);
    }

    #[must_use]
    pub fn records(&self) -> &[DecisionRecord] {
        &self.records
    }

    #[must_use]
    pub fn rejections(&self) -> usize {
        self.records
            .iter()
            .filter(|record| record.action == DecisionAction::Reject)
            .count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimePolicy {
    pub mode: RuntimeMode,
    pub arithmetic_alignment: ArithmeticAlignment,
    pub hardened_join_max_rows: Option<usize>,
}

impl RuntimePolicy {
    #[must_use]
    pub fn strict() -> Self {
        Self {
            mode: RuntimeMode::Strict,
            arithmetic_alignment: ArithmeticAlignment::Union,
            hardened_join_max_rows: None,
        }
    }

    #[must_use]
    pub fn hardened(join_max_rows: Option<usize>) -> Self {
        Self {
            mode: RuntimeMode::Hardened,
            arithmetic_alignment: ArithmeticAlignment::Union,
            hardened_join_max_rows: join_max_rows,
        }
    }

    #[must_use]
    pub fn with_arithmetic_alignment(mut self, alignment: ArithmeticAlignment) -> Self {
        self.arithmetic_alignment = alignment;
        self
    }

    /// Parse a policy from JSON. Absent fields fall back to the strict defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, RuntimeError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Admit or reject a join that will materialize `output_rows` rows.
    /// Strict mode always admits; hardened mode enforces the row cap.
    pub fn decide_join_admission(
        &self,
        output_rows: usize,
        ledger: &mut EvidenceLedger,
    ) -> DecisionAction {
        let action = match (self.mode, self.hardened_join_max_rows) {
            (RuntimeMode::Hardened, Some(cap)) if output_rows > cap => DecisionAction::Reject,
            _ => DecisionAction::Allow,
        };

        if action == DecisionAction::Reject {
            warn!(
                "join admission rejected: output_rows={output_rows} cap={:?}",
                self.hardened_join_max_rows
            );
        }

        ledger.push(DecisionRecord {
            ts_unix_ms: now_unix_ms().unwrap_or_default(),
            mode: self.mode,
            action,
            subject: "join_admission".to_owned(),
            detail: format!("output_rows={output_rows}"),
        });
        action
    }
}

impl Default for RuntimePolicy {
    fn default() -> Self {
        Self::strict()
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("system clock is before UNIX_EPOCH")]
    ClockSkew,
    #[error("invalid runtime policy: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidArgument
    }
}

fn now_unix_ms() -> Result<u64, RuntimeError> {
    let ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| RuntimeError::ClockSkew)?
        .as_millis();
    Ok(ms as u64)
}

#[cfg(test)]
mod tests {
    use super::{
        ArithmeticAlignment, DecisionAction, EvidenceLedger, RuntimeMode, RuntimePolicy,
    };

    #[test]
    fn strict_mode_admits_any_join() {
        let mut ledger = EvidenceLedger::new();
        let action = RuntimePolicy::strict().decide_join_admission(usize::MAX, &mut ledger);
        assert_eq!(action, DecisionAction::Allow);
        assert_eq!(ledger.records().len(), 1);
        assert_eq!(ledger.records()[0].subject, "join_admission");
    }

    #[test]
    fn hardened_mode_rejects_over_cap() {
        let policy = RuntimePolicy::hardened(Some(10));
        let mut ledger = EvidenceLedger::new();
        assert_eq!(
            policy.decide_join_admission(10, &mut ledger),
            DecisionAction::Allow
        );
        assert_eq!(
            policy.decide_join_admission(11, &mut ledger),
            DecisionAction::Reject
        );
        assert_eq!(ledger.rejections(), 1);
        assert_eq!(ledger.records()[1].mode, RuntimeMode::Hardened);
    }

    #[test]
    fn hardened_without_cap_allows() {
        let mut ledger = EvidenceLedger::new();
        assert_eq!(
            RuntimePolicy::hardened(None).decide_join_admission(1_000_000, &mut ledger),
            DecisionAction::Allow
        );
    }

    #[test]
    fn policy_parses_from_partial_json() {
        let policy = RuntimePolicy::from_json_str(r#"{"arithmetic_alignment":"intersection"}"#)
            .expect("policy json");
        assert_eq!(policy.mode, RuntimeMode::Strict);
        assert_eq!(policy.arithmetic_alignment, ArithmeticAlignment::Intersection);
        assert_eq!(policy.hardened_join_max_rows, None);

        let hardened =
            RuntimePolicy::from_json_str(r#"{"mode":"hardened","hardened_join_max_rows":5}"#)
                .expect("hardened json");
        assert_eq!(hardened, RuntimePolicy::hardened(Some(5)));
    }

    #[test]
    fn malformed_policy_is_an_invalid_argument() {
        let err = RuntimePolicy::from_json_str(r#"{"mode":"lenient"}"#).expect_err("bad mode");
        assert_eq!(err.kind(), ff_types::ErrorKind::InvalidArgument);
    }

    #[test]
    fn default_is_strict_union() {
        let policy = RuntimePolicy::default();
        assert_eq!(policy, RuntimePolicy::strict());
        assert_eq!(policy.arithmetic_alignment, ArithmeticAlignment::Union);
        assert_eq!(
            RuntimePolicy::strict()
                .with_arithmetic_alignment(ArithmeticAlignment::Intersection)
                .arithmetic_alignment,
            ArithmeticAlignment::Intersection
        );
    }
}
