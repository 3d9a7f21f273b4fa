//! The seam between the engine and the neural network implementations.
//!
//! Models are opaque: the engine hands them a batch of fixed-length windows and
//! expects one prediction per stem back. Loading happens inside the worker
//! process, so a loader receives only plain data.

pub mod builtin;
pub mod registry;

use std::collections::BTreeMap;

use ndarray::{Array4, ArrayView3};
use serde::{Deserialize, Serialize};

use crate::{
    config::InferenceSettings,
    error::{Result, StemError},
};

pub trait SeparationModel {
    /// `batch` is `(batch, channels, window)`; the result must be
    /// `(batch, stems, channels, window)`.
    fn forward(&mut self, batch: ArrayView3<'_, f32>) -> anyhow::Result<Array4<f32>>;
}

impl<M: SeparationModel + ?Sized> SeparationModel for Box<M> {
    fn forward(&mut self, batch: ArrayView3<'_, f32>) -> anyhow::Result<Array4<f32>> {
        (**self).forward(batch)
    }
}

pub trait ModelLoader {
    fn load(
        &self,
        selection: &ModelSelection,
        settings: &InferenceSettings,
    ) -> Result<Box<dyn SeparationModel>>;
}

/// Which model to run, plus loader-specific options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub name: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl ModelSelection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.options.insert(key.into(), value.to_string());
        self
    }

    pub fn option_u64(&self, key: &str) -> Result<Option<u64>> {
        self.options
            .get(key)
            .map(|v| {
                v.parse::<u64>().map_err(|_| {
                    StemError::Config(format!("model option `{key}` is not an integer: {v}"))
                })
            })
            .transpose()
    }
}
