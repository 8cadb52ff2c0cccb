//! Shared fixture models for the integration tests.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::path::Path;

use modelpack::config::PackagerConfig;
use modelpack::{
    Column, ColumnData, CustomHandler, CustomModel, DataFrame, EstimatorHandler,
    HandlerRegistry, Invocable, InvokeError, ModelContext, ModelDependency, Packager, Prediction,
};

fn floats(input: &DataFrame) -> Result<Vec<f64>, InvokeError> {
    match input.columns().first().map(|c| &c.data) {
        Some(ColumnData::Float(values)) => Ok(values.clone()),
        Some(ColumnData::Int(values)) => Ok(values.iter().map(|v| *v as f64).collect()),
        _ => Err(InvokeError::new("expected a numeric first column")),
    }
}

/// `y = weight * x + bias`, with a two-head probability output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub weight: f64,
    pub bias: f64,
}

impl Invocable for LinearModel {
    fn has_method(&self, method: &str) -> bool {
        matches!(method, "predict" | "predict_proba")
    }

    fn invoke(&self, method: &str, input: &DataFrame) -> Result<Prediction, InvokeError> {
        let xs = floats(input)?;
        let ys: Vec<f64> = xs.iter().map(|x| self.weight * x + self.bias).collect();
        match method {
            "predict" => Ok(Prediction::Columns(vec![ColumnData::Float(ys)])),
            "predict_proba" => {
                let p: Vec<f64> = ys.iter().map(|y| 1.0 / (1.0 + (-y).exp())).collect();
                let q: Vec<f64> = p.iter().map(|v| 1.0 - v).collect();
                Ok(Prediction::MultiOutput(vec![
                    vec![ColumnData::Float(q.clone()), ColumnData::Float(p.clone())],
                    vec![ColumnData::Float(p), ColumnData::Float(q)],
                ]))
            }
            other => Err(InvokeError::new(format!("no method {}", other))),
        }
    }
}

/// Multiplies its input by a factor read from the `factor` artifact, after
/// running an optional `base` sub-model.
pub struct ScaledModel {
    context: ModelContext,
    factor: f64,
}

impl ScaledModel {
    pub fn new(context: ModelContext) -> Result<Self, InvokeError> {
        let path = context
            .artifact("factor")
            .ok_or_else(|| InvokeError::new("missing factor artifact"))?;
        let raw = std::fs::read_to_string(path).map_err(|e| InvokeError::new(e.to_string()))?;
        let factor = raw
            .trim()
            .parse::<f64>()
            .map_err(|e| InvokeError::new(e.to_string()))?;
        Ok(Self { context, factor })
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn base(&self) -> Option<&LinearModel> {
        self.context.sub_model_as::<LinearModel>("base")
    }
}

impl Invocable for ScaledModel {
    fn has_method(&self, method: &str) -> bool {
        method == "predict"
    }

    fn invoke(&self, method: &str, input: &DataFrame) -> Result<Prediction, InvokeError> {
        if method != "predict" {
            return Err(InvokeError::new(format!("no method {}", method)));
        }
        let mut xs = floats(input)?;
        if let Some(base) = self.base() {
            xs = xs.iter().map(|x| base.weight * x + base.bias).collect();
        }
        let out = DataFrame::new(vec![Column::new(
            "output",
            ColumnData::Float(xs.iter().map(|x| x * self.factor).collect()),
        )])
        .map_err(|e| InvokeError::new(e.to_string()))?;
        Ok(Prediction::Table(out))
    }
}

impl CustomModel for ScaledModel {
    fn inference_methods(&self) -> Vec<String> {
        vec!["predict".to_string()]
    }

    fn context(&self) -> &ModelContext {
        &self.context
    }

    fn from_context(context: ModelContext) -> Result<Self, InvokeError> {
        Self::new(context)
    }
}

pub fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry
        .register(CustomHandler::<ScaledModel>::new())
        .expect("register custom handler");
    registry
        .register(
            EstimatorHandler::<LinearModel>::new()
                .with_dependencies(vec![ModelDependency::same("scikit-learn")]),
        )
        .expect("register estimator handler");
    registry
}

/// Packager without the core dependency seed, so tests see only what they add.
pub fn bare_packager() -> Packager {
    Packager::new(registry()).with_config(PackagerConfig {
        embed_core_dependencies: false,
        ..PackagerConfig::default()
    })
}

pub fn sample_input(rows: usize) -> DataFrame {
    DataFrame::new(vec![Column::new(
        "input",
        ColumnData::Float((0..rows).map(|i| i as f64).collect()),
    )])
    .expect("sample input")
}

/// Write a `factor` artifact and return a model context pointing at it.
pub fn factor_context(dir: &Path, factor: f64) -> ModelContext {
    let path = dir.join("factor.txt");
    std::fs::write(&path, factor.to_string()).expect("write factor artifact");
    ModelContext::new().with_artifact("factor", path)
}
