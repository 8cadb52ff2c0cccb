//! Input/output signatures of model methods.
//!
//! The packaging core treats signatures as opaque; handlers infer them from
//! a sample input and the method's output, and the uniform adapter uses the
//! declared output names to label results.

use serde::{Deserialize, Serialize};

use super::frame::DataFrame;

/// Element type of one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataType {
    Bool,
    Int64,
    Double,
    String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub dtype: DataType,
}

impl FeatureSpec {
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }
}

/// Signature of one callable method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSignature {
    pub inputs: Vec<FeatureSpec>,
    pub outputs: Vec<FeatureSpec>,
}

impl ModelSignature {
    pub fn new(inputs: Vec<FeatureSpec>, outputs: Vec<FeatureSpec>) -> Self {
        Self { inputs, outputs }
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|f| f.name.clone()).collect()
    }
}

fn features_of(frame: &DataFrame) -> Vec<FeatureSpec> {
    frame
        .columns()
        .iter()
        .map(|c| FeatureSpec::new(c.name.clone(), c.data.data_type()))
        .collect()
}

/// Infer a signature from a sample input and the matching output.
pub fn infer_signature(input: &DataFrame, output: &DataFrame) -> ModelSignature {
    ModelSignature::new(features_of(input), features_of(output))
}

/// Names given to unlabeled output columns during inference.
pub fn default_output_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("output_feature_{}", i)).collect()
}

/// Keep at most `max_rows` rows of an oversized sample input.
pub fn truncate(sample: &DataFrame, max_rows: usize) -> DataFrame {
    if sample.num_rows() <= max_rows {
        return sample.clone();
    }
    tracing::debug!(
        rows = sample.num_rows(),
        max_rows,
        "truncating sample input for signature inference"
    );
    sample.head(max_rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Column, ColumnData};

    #[test]
    fn test_infer_signature() {
        let input = DataFrame::new(vec![
            Column::new("age", ColumnData::Int(vec![31])),
            Column::new("city", ColumnData::Text(vec!["Oslo".into()])),
        ])
        .unwrap();
        let output =
            DataFrame::new(vec![Column::new("output", ColumnData::Float(vec![0.5]))]).unwrap();
        let sig = infer_signature(&input, &output);
        assert_eq!(sig.inputs[1], FeatureSpec::new("city", DataType::String));
        assert_eq!(sig.output_names(), vec!["output"]);
    }

    #[test]
    fn test_signature_json_shape() {
        let sig = ModelSignature::new(
            vec![FeatureSpec::new("input", DataType::Double)],
            vec![FeatureSpec::new("output", DataType::Double)],
        );
        let json = serde_json::to_value(&sig).unwrap();
        assert_eq!(json["inputs"][0]["dtype"], "DOUBLE");
    }
}
