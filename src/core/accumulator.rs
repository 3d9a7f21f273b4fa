use ndarray::{s, Array3, ArrayView3, Zip};

use crate::{
    core::window::{ChunkSpec, WindowEnvelope},
    error::{Result, StemError},
};

/// Weighted overlap-add reconstruction buffers, shape `(stems, channels, samples)`.
pub struct OverlapAddAccumulator {
    result: Array3<f32>,
    weight: Array3<f32>,
    border: Option<usize>,
}

impl OverlapAddAccumulator {
    /// `samples` is the padded length; `border` is trimmed from each end on
    /// finalize when present.
    pub fn new(stems: usize, channels: usize, samples: usize, border: Option<usize>) -> Self {
        Self {
            result: Array3::zeros((stems, channels, samples)),
            weight: Array3::zeros((stems, channels, samples)),
            border,
        }
    }

    pub fn stems(&self) -> usize {
        self.result.shape()[0]
    }

    pub fn channels(&self) -> usize {
        self.result.shape()[1]
    }

    pub fn samples(&self) -> usize {
        self.result.shape()[2]
    }

    /// Running sum of envelope weights.
    pub fn weight(&self) -> ArrayView3<'_, f32> {
        self.weight.view()
    }

    /// Adds one chunk's predictions `(stems, channels, >= length)`; anything
    /// past `chunk.length` is padding and is dropped.
    pub fn accumulate(
        &mut self,
        chunk: &ChunkSpec,
        prediction: ArrayView3<'_, f32>,
        envelope: &WindowEnvelope,
    ) -> Result<()> {
        let (stems, channels, pred_len) = prediction.dim();
        let len = chunk.length;
        let end = chunk.start + len;

        if stems != self.stems() || channels != self.channels() {
            return Err(StemError::ModelInvocation(format!(
                "prediction has {stems} stems x {channels} channels, expected {} x {}",
                self.stems(),
                self.channels()
            )));
        }
        if pred_len < len || envelope.len() < len {
            return Err(StemError::ModelInvocation(format!(
                "prediction window {pred_len} shorter than chunk length {len}"
            )));
        }
        if end > self.samples() {
            return Err(StemError::Config(format!(
                "chunk {}..{end} exceeds buffer of {} samples",
                chunk.start,
                self.samples()
            )));
        }

        let env = envelope.weights().slice_move(s![..len]);
        let pred = prediction.slice(s![.., .., ..len]);

        Zip::from(self.result.slice_mut(s![.., .., chunk.start..end]))
            .and(&pred)
            .and_broadcast(&env)
            .for_each(|acc, &p, &w| *acc += p * w);
        Zip::from(self.weight.slice_mut(s![.., .., chunk.start..end]))
            .and_broadcast(&env)
            .for_each(|acc, &w| *acc += w);
        Ok(())
    }

    /// `result / weight` with uncovered samples set to 0, border trimmed.
    pub fn finalize(self) -> Array3<f32> {
        let Self {
            mut result,
            weight,
            border,
        } = self;

        Zip::from(&mut result).and(&weight).for_each(|r, &w| {
            let v = *r / w;
            *r = if v.is_nan() { 0.0 } else { v };
        });

        match border {
            Some(b) if result.shape()[2] >= 2 * b => {
                let n = result.shape()[2];
                result.slice(s![.., .., b..n - b]).to_owned()
            }
            _ => result,
        }
    }
}
