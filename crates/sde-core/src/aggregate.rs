//! Built-in running aggregation over the message stream.

use crate::error::FunctionError;
use crate::function::AggregateFunction;
use crate::message::{Message, Payload};
use crate::response::FunctionResponse;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Aggregations the built-in [`RunningAggregate`] can maintain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    /// Number of messages consumed.
    Count,
    /// Minimum quality score among scored messages.
    QualityMin,
    /// Maximum quality score among scored messages.
    QualityMax,
    /// Mean quality score among scored messages.
    QualityMean,
    /// Element-wise mean of embedding payloads.
    EmbeddingCentroid,
}

/// Continuous aggregation: consumes each input, updates its accumulators,
/// and emits one fresh `Metadata` summary message per invocation. The
/// summary payload is a JSON object with one entry per configured op.
///
/// All embedding inputs must share one dimensionality; a mismatch is a
/// record-level error and leaves the accumulators untouched for that
/// record.
pub struct RunningAggregate {
    name: String,
    ops: Vec<AggregateOp>,
    count: u64,
    quality_min: Option<f64>,
    quality_max: Option<f64>,
    quality_sum: f64,
    quality_count: u64,
    centroid_sum: Vec<f64>,
    centroid_count: u64,
}

impl RunningAggregate {
    pub fn new(ops: Vec<AggregateOp>) -> Self {
        Self {
            name: "running-aggregate".to_string(),
            ops,
            count: 0,
            quality_min: None,
            quality_max: None,
            quality_sum: 0.0,
            quality_count: 0,
            centroid_sum: Vec::new(),
            centroid_count: 0,
        }
    }

    fn consume(&mut self, message: &Message) -> Result<(), FunctionError> {
        if let Payload::Vector(v) = message.payload() {
            if self.centroid_count == 0 {
                self.centroid_sum = v.iter().map(|x| f64::from(*x)).collect();
            } else if self.centroid_sum.len() == v.len() {
                for (acc, x) in self.centroid_sum.iter_mut().zip(v) {
                    *acc += f64::from(*x);
                }
            } else {
                return Err(FunctionError::new(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.centroid_sum.len(),
                    v.len()
                )));
            }
            self.centroid_count += 1;
        }
        if let Some(q) = message.quality() {
            self.quality_min = Some(self.quality_min.map_or(q, |m| m.min(q)));
            self.quality_max = Some(self.quality_max.map_or(q, |m| m.max(q)));
            self.quality_sum += q;
            self.quality_count += 1;
        }
        self.count += 1;
        Ok(())
    }

    fn summary(&self) -> Message {
        let mut fields = serde_json::Map::new();
        for op in &self.ops {
            match op {
                AggregateOp::Count => {
                    fields.insert("count".into(), json!(self.count));
                }
                AggregateOp::QualityMin => {
                    fields.insert("quality_min".into(), json!(self.quality_min));
                }
                AggregateOp::QualityMax => {
                    fields.insert("quality_max".into(), json!(self.quality_max));
                }
                AggregateOp::QualityMean => {
                    let mean = (self.quality_count > 0)
                        .then(|| self.quality_sum / self.quality_count as f64);
                    fields.insert("quality_mean".into(), json!(mean));
                }
                AggregateOp::EmbeddingCentroid => {
                    let centroid: Vec<f64> = self
                        .centroid_sum
                        .iter()
                        .map(|s| s / self.centroid_count.max(1) as f64)
                        .collect();
                    fields.insert("embedding_centroid".into(), json!(centroid));
                }
            }
        }
        Message::metadata_record(serde_json::Value::Object(fields).to_string())
    }
}

impl AggregateFunction for RunningAggregate {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&mut self, input: FunctionResponse) -> Result<FunctionResponse, FunctionError> {
        let mut failure = None;
        for message in input {
            if let Err(e) = self.consume(&message) {
                failure = Some(e);
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }
        let mut out = FunctionResponse::new();
        out.add(self.summary());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContentKind;

    fn summary_json(out: FunctionResponse) -> serde_json::Value {
        let msg = out.into_iter().next().unwrap();
        assert_eq!(msg.kind(), ContentKind::Metadata);
        serde_json::from_str(msg.text_content().unwrap()).unwrap()
    }

    #[test]
    fn counts_and_tracks_quality() {
        let mut agg = RunningAggregate::new(vec![
            AggregateOp::Count,
            AggregateOp::QualityMin,
            AggregateOp::QualityMax,
            AggregateOp::QualityMean,
        ]);
        let out = agg
            .execute(FunctionResponse::from(vec![
                Message::text("a").with_quality(0.2),
                Message::text("b").with_quality(0.8),
            ]))
            .unwrap();
        let summary = summary_json(out);
        assert_eq!(summary["count"], 2);
        assert_eq!(summary["quality_min"], 0.2);
        assert_eq!(summary["quality_max"], 0.8);
        assert_eq!(summary["quality_mean"], 0.5);
    }

    #[test]
    fn centroid_is_element_wise_mean() {
        let mut agg = RunningAggregate::new(vec![AggregateOp::EmbeddingCentroid]);
        agg.execute(FunctionResponse::from(vec![Message::embedding(vec![
            1.0, 3.0,
        ])]))
        .unwrap();
        let out = agg
            .execute(FunctionResponse::from(vec![Message::embedding(vec![
                3.0, 5.0,
            ])]))
            .unwrap();
        let summary = summary_json(out);
        assert_eq!(summary["embedding_centroid"], json!([2.0, 4.0]));
    }

    #[test]
    fn dimension_mismatch_is_a_record_error() {
        let mut agg = RunningAggregate::new(vec![AggregateOp::Count]);
        agg.execute(FunctionResponse::from(vec![Message::embedding(vec![1.0])]))
            .unwrap();
        let err = agg
            .execute(FunctionResponse::from(vec![Message::embedding(vec![
                1.0, 2.0,
            ])]))
            .unwrap_err();
        assert!(err.message().contains("dimension mismatch"));
    }
}
