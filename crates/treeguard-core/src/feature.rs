//! Continuous feature domains.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A query as presented to the served model: feature name to value.
pub type Query = HashMap<String, f64>;

/// Global domain of one continuous input dimension. Immutable after the
/// tree snapshot is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub id: usize,
    pub min: f64,
    pub max: f64,
}

impl Feature {
    pub fn new(name: impl Into<String>, id: usize, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            id,
            min,
            max,
        }
    }

    /// Like [`Feature::new`], but widened to cover at least the given
    /// envelope. Used when the observed data range is narrower than the
    /// domain the model is expected to serve.
    pub fn with_envelope(
        name: impl Into<String>,
        id: usize,
        min: f64,
        max: f64,
        envelope: (f64, f64),
    ) -> Self {
        Self::new(name, id, min.min(envelope.0), max.max(envelope.1))
    }

    pub fn range(&self) -> f64 {
        self.max - self.min
    }
}
