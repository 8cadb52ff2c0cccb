//! Signature-driven uniform callable wrapper.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::{HandlerError, Invocable};
use crate::data::{DataFrame, ModelSignature, Prediction};

type MethodFn = Box<dyn Fn(&DataFrame) -> Result<DataFrame, HandlerError> + Send + Sync>;

/// A loaded model exposed as a table of named methods, each taking and
/// returning a [`DataFrame`].
pub struct UniformModel {
    kind: String,
    methods: BTreeMap<String, MethodFn>,
}

impl UniformModel {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            methods: BTreeMap::new(),
        }
    }

    pub fn with_method<F>(mut self, name: impl Into<String>, method: F) -> Self
    where
        F: Fn(&DataFrame) -> Result<DataFrame, HandlerError> + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Box::new(method));
        self
    }

    /// One method per signature entry. Outputs are labeled with the
    /// signature's declared output names.
    pub fn from_invocable<M>(
        kind: impl Into<String>,
        model: Arc<M>,
        signatures: &BTreeMap<String, ModelSignature>,
    ) -> Self
    where
        M: Invocable + Send + Sync + 'static,
    {
        let mut uniform = Self::new(kind);
        for (method, signature) in signatures {
            let model = Arc::clone(&model);
            let name = method.clone();
            let output_names = signature.output_names();
            uniform = uniform.with_method(method.clone(), move |input| {
                let prediction =
                    model
                        .invoke(&name, input)
                        .map_err(|source| HandlerError::Invoke {
                            method: name.clone(),
                            source,
                        })?;
                normalize_output(&name, prediction, &output_names)
            });
        }
        uniform
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn methods(&self) -> Vec<&str> {
        self.methods.keys().map(String::as_str).collect()
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn invoke(&self, method: &str, input: &DataFrame) -> Result<DataFrame, HandlerError> {
        let call = self
            .methods
            .get(method)
            .ok_or_else(|| HandlerError::UnknownMethod(method.to_string()))?;
        call(input)
    }
}

impl fmt::Debug for UniformModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniformModel")
            .field("kind", &self.kind)
            .field("methods", &self.methods())
            .finish()
    }
}

/// Flatten `prediction` and label its columns with `output_names`.
pub fn normalize_output(
    method: &str,
    prediction: Prediction,
    output_names: &[String],
) -> Result<DataFrame, HandlerError> {
    let columns = prediction.into_columns();
    if columns.len() != output_names.len() {
        return Err(HandlerError::OutputShape {
            method: method.to_string(),
            expected: output_names.len(),
            found: columns.len(),
        });
    }
    Ok(DataFrame::from_unlabeled(output_names, columns)?)
}
