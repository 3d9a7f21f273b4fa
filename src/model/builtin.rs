//! Diagnostic models shipped with the worker binary.
//!
//! They have no weights and exist to exercise the engine and the worker
//! harness end to end. Every model accepts a `latency_ms` option that stalls
//! each forward call, which stands in for a slow network.

use std::{thread, time::Duration};

use anyhow::anyhow;
use ndarray::{Array4, ArrayView3, Axis};
use tracing::debug;

use crate::{
    config::InferenceSettings,
    error::{Result, StemError},
    model::{registry::resolve_model_name, ModelLoader, ModelSelection, SeparationModel},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinModels;

impl ModelLoader for BuiltinModels {
    fn load(
        &self,
        selection: &ModelSelection,
        settings: &InferenceSettings,
    ) -> Result<Box<dyn SeparationModel>> {
        let name = resolve_model_name(&selection.name)?;
        let latency = Duration::from_millis(selection.option_u64("latency_ms")?.unwrap_or(0));
        let stems = settings.stems().len();

        debug!(
            model = %name,
            stems,
            device = ?settings.device,
            use_amp = settings.use_amp,
            "loading builtin model"
        );

        let model: Box<dyn SeparationModel> = match name.as_str() {
            "identity" => Box::new(Identity { stems, latency }),
            "silence" => Box::new(Silence { stems, latency }),
            "failing" => Box::new(Failing {
                remaining: selection.option_u64("fail_after")?.unwrap_or(0),
                inner: Identity { stems, latency },
            }),
            other => return Err(StemError::UnknownModel(other.to_string())),
        };
        Ok(model)
    }
}

/// Every stem is a copy of the input window.
pub struct Identity {
    pub stems: usize,
    pub latency: Duration,
}

impl SeparationModel for Identity {
    fn forward(&mut self, batch: ArrayView3<'_, f32>) -> anyhow::Result<Array4<f32>> {
        stall(self.latency);
        let (b, c, t) = batch.dim();
        let out = batch
            .insert_axis(Axis(1))
            .broadcast((b, self.stems, c, t))
            .ok_or_else(|| anyhow!("cannot broadcast batch {:?}", (b, c, t)))?
            .to_owned();
        Ok(out)
    }
}

pub struct Silence {
    pub stems: usize,
    pub latency: Duration,
}

impl SeparationModel for Silence {
    fn forward(&mut self, batch: ArrayView3<'_, f32>) -> anyhow::Result<Array4<f32>> {
        stall(self.latency);
        let (b, c, t) = batch.dim();
        Ok(Array4::zeros((b, self.stems, c, t)))
    }
}

pub struct Failing {
    pub remaining: u64,
    pub inner: Identity,
}

impl SeparationModel for Failing {
    fn forward(&mut self, batch: ArrayView3<'_, f32>) -> anyhow::Result<Array4<f32>> {
        if self.remaining == 0 {
            return Err(anyhow!("model raised during forward pass"));
        }
        self.remaining -= 1;
        self.inner.forward(batch)
    }
}

fn stall(latency: Duration) {
    if !latency.is_zero() {
        thread::sleep(latency);
    }
}
