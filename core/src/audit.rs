//! Audit & lineage recorder.
//!
//! RULE: `record_score_calculation` and `record_lineage` are the only write
//! paths into the audit trail. History rows are never updated or deleted;
//! the schema enforces this with triggers.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::str::FromStr;

use crate::{
    config::{ScoreWeights, TrustFormula},
    error::{ImpactError, ImpactResult},
    signals::{SignalSource, SourceRef, SourceTable},
    store::ImpactStore,
    types::{text_enum_sql, EntityId, EntityType, HistoryId, Period},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMethod {
    /// Unbounded weighted sum used for rankings.
    AdditiveV1,
    /// 0–100 trust score.
    NormalizedV1,
}

impl CalculationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdditiveV1 => "additive_v1",
            Self::NormalizedV1 => "normalized_v1",
        }
    }
}

impl FromStr for CalculationMethod {
    type Err = ImpactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "additive_v1" => Ok(Self::AdditiveV1),
            "normalized_v1" => Ok(Self::NormalizedV1),
            other => Err(ImpactError::Other(anyhow::anyhow!(
                "unknown calculation method '{other}'"
            ))),
        }
    }
}

text_enum_sql!(CalculationMethod);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageStatus {
    Unchecked,
    Valid,
    Modified,
    Deleted,
    Suspicious,
}

impl LineageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unchecked => "unchecked",
            Self::Valid => "valid",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
            Self::Suspicious => "suspicious",
        }
    }
}

impl FromStr for LineageStatus {
    type Err = ImpactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unchecked" => Ok(Self::Unchecked),
            "valid" => Ok(Self::Valid),
            "modified" => Ok(Self::Modified),
            "deleted" => Ok(Self::Deleted),
            "suspicious" => Ok(Self::Suspicious),
            other => Err(ImpactError::Other(anyhow::anyhow!(
                "unknown lineage status '{other}'"
            ))),
        }
    }
}

text_enum_sql!(LineageStatus);

/// Adjustments applied on top of the weighted factors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreModifiers {
    /// Like share of all engagement in the period.
    pub fraud_rate:            f64,
    pub reputation_multiplier: f64,
    /// 1.0 unless the investor boost was applied.
    pub investor_multiplier:   f64,
}

impl Default for ScoreModifiers {
    fn default() -> Self {
        Self { fraud_rate: 0.0, reputation_multiplier: 1.0, investor_multiplier: 1.0 }
    }
}

/// The weight set a score was produced with. Its variant fixes the method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "values", rename_all = "snake_case")]
pub enum FormulaWeights {
    Additive(ScoreWeights),
    Normalized(TrustFormula),
}

impl FormulaWeights {
    pub fn method(&self) -> CalculationMethod {
        match self {
            Self::Additive(_) => CalculationMethod::AdditiveV1,
            Self::Normalized(_) => CalculationMethod::NormalizedV1,
        }
    }
}

/// Everything needed to replay a calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormulaSnapshot {
    pub method:    CalculationMethod,
    pub weights:   FormulaWeights,
    pub factors:   Value,
    pub modifiers: ScoreModifiers,
}

/// A score about to be written to the audit trail.
#[derive(Debug, Clone)]
pub struct ScoreCalculation {
    pub entity_type:      EntityType,
    pub entity_id:        EntityId,
    pub score_value:      f64,
    /// `daily`, `weekly`, `monthly` or `custom`.
    pub period_type:      String,
    pub period:           Period,
    pub input_counts:     Value,
    pub factor_breakdown: Value,
    pub modifiers:        ScoreModifiers,
    pub weights:          FormulaWeights,
    pub calculated_at:    NaiveDateTime,
}

impl ScoreCalculation {
    pub fn method(&self) -> CalculationMethod {
        self.weights.method()
    }

    pub fn formula_snapshot(&self) -> FormulaSnapshot {
        FormulaSnapshot {
            method: self.method(),
            weights: self.weights.clone(),
            factors: self.factor_breakdown.clone(),
            modifiers: self.modifiers,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreHistoryRecord {
    pub id:                 HistoryId,
    pub entity_type:        EntityType,
    pub entity_id:          EntityId,
    pub score_value:        f64,
    pub period_type:        String,
    pub period:             Period,
    pub input_counts:       Value,
    pub factor_breakdown:   Value,
    pub modifiers:          ScoreModifiers,
    pub calculation_method: CalculationMethod,
    pub formula_snapshot:   FormulaSnapshot,
    pub calculated_at:      NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineageRecord {
    pub id:                i64,
    pub history_id:        HistoryId,
    pub source_table:      SourceTable,
    pub source_id:         i64,
    pub data_hash:         String,
    pub validation_status: LineageStatus,
    pub last_checked_at:   Option<NaiveDateTime>,
}

impl LineageRecord {
    pub fn source(&self) -> SourceRef {
        SourceRef::new(self.source_table, self.source_id)
    }
}

/// Serialize `value` with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 of the canonical serialization, hex encoded.
pub fn data_hash(value: &Value) -> String {
    hex::encode(Sha256::digest(canonical_json(value).as_bytes()))
}

pub struct AuditRecorder<'a> {
    store: &'a ImpactStore,
}

impl<'a> AuditRecorder<'a> {
    pub fn new(store: &'a ImpactStore) -> Self {
        Self { store }
    }

    pub fn record_score_calculation(&self, calc: &ScoreCalculation) -> ImpactResult<HistoryId> {
        let snapshot = calc.formula_snapshot();
        let id = self.store.insert_score_history(calc, &snapshot)?;
        log::debug!(
            "history {id}: {} {} {} = {:.4} ({})",
            calc.entity_type,
            calc.entity_id,
            calc.period_type,
            calc.score_value,
            snapshot.method
        );
        Ok(id)
    }

    /// Fingerprint one source row as seen now. Returns the stored hash.
    pub fn record_lineage(
        &self,
        history_id: HistoryId,
        source: SourceRef,
        snapshot: &Value,
    ) -> ImpactResult<String> {
        let hash = data_hash(snapshot);
        self.store.insert_lineage(history_id, source, &hash)?;
        Ok(hash)
    }

    /// Fetch and fingerprint every consulted row. Rows that cannot be read
    /// are skipped with a warning; returns how many were recorded.
    pub fn record_sources(&self, history_id: HistoryId, sources: &[SourceRef]) -> ImpactResult<usize> {
        let mut recorded = 0;
        for source in sources {
            match self.store.source_row(*source) {
                Ok(Some(row)) => {
                    self.record_lineage(history_id, *source, &row)?;
                    recorded += 1;
                }
                Ok(None) => log::warn!(
                    "history {history_id}: {} {} vanished before lineage capture",
                    source.table,
                    source.id
                ),
                Err(e) => log::warn!("history {history_id}: lineage skipped: {e}"),
            }
        }
        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_ignores_key_order() {
        let a = json!({"id": 7, "name": "Nova", "meta": {"x": 1, "y": [1, 2]}});
        let b: Value =
            serde_json::from_str(r#"{"meta":{"y":[1,2],"x":1},"name":"Nova","id":7}"#).unwrap();
        assert_eq!(data_hash(&a), data_hash(&b));
        assert_eq!(data_hash(&a).len(), 64);
    }

    #[test]
    fn hash_changes_with_content_and_array_order() {
        let base = json!({"id": 7, "views": [1, 2]});
        assert_ne!(data_hash(&base), data_hash(&json!({"id": 7, "views": [2, 1]})));
        assert_ne!(data_hash(&base), data_hash(&json!({"id": 7, "views": [1, 3]})));
    }

    #[test]
    fn canonical_form_sorts_nested_keys() {
        let v = json!({"b": {"d": 1, "c": 2}, "a": null});
        assert_eq!(canonical_json(&v), r#"{"a":null,"b":{"c":2,"d":1}}"#);
    }
}
