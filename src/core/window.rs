//! Chunk scheduling and crossfade envelopes for overlap-add inference.

use std::borrow::Cow;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2, CowArray, Ix2};

use crate::{
    config::{InferenceSettings, TailPadding},
    error::{Result, StemError},
};

/// One window of the (possibly border-padded) input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkSpec {
    /// Position in the overall chunk sequence.
    pub index: usize,
    pub start: usize,
    /// Unpadded length; `<= chunk_size`.
    pub length: usize,
}

/// Per-sample weights applied to one chunk's predictions.
#[derive(Clone, Debug, PartialEq)]
pub struct WindowEnvelope {
    weights: Array1<f32>,
    fade_size: usize,
}

impl WindowEnvelope {
    /// Linear fade-in over the first `fade_size` samples, linear fade-out over
    /// the last `fade_size`, 1.0 elsewhere.
    ///
    /// The ramps exclude their zero end-point, so every weight is strictly
    /// positive and an aligned fade-in/fade-out pair sums to exactly 1.0.
    pub fn new(len: usize, fade_size: usize) -> Self {
        let fade_size = fade_size.min(len);
        let mut weights = Array1::<f32>::ones(len);
        let denom = (fade_size + 1) as f32;
        for i in 0..fade_size {
            weights[i] *= (i + 1) as f32 / denom;
            weights[len - fade_size + i] *= (fade_size - i) as f32 / denom;
        }
        Self { weights, fade_size }
    }

    pub fn uniform(len: usize) -> Self {
        Self::new(len, 0)
    }

    /// First chunk of a run: nothing precedes it to fade in from.
    pub fn without_fade_in(mut self) -> Self {
        let n = self.fade_size;
        self.weights.slice_mut(s![..n]).fill(1.0);
        self
    }

    /// Last chunk of a run: nothing follows it to fade out into.
    pub fn without_fade_out(mut self) -> Self {
        let len = self.weights.len();
        let n = self.fade_size;
        self.weights.slice_mut(s![len - n..]).fill(1.0);
        self
    }

    pub fn weights(&self) -> ArrayView1<'_, f32> {
        self.weights.view()
    }

    pub fn fade_size(&self) -> usize {
        self.fade_size
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

/// Splits a signal of known length into overlapping fixed-size windows.
#[derive(Clone, Debug)]
pub struct WindowScheduler {
    chunk_size: usize,
    step: usize,
    border: Option<usize>,
    input_len: usize,
    padded_len: usize,
    envelope: WindowEnvelope,
}

impl WindowScheduler {
    /// `fade_size == 0` disables the crossfade; it may not exceed
    /// `chunk_size / 2`.
    pub fn new(
        chunk_size: usize,
        num_overlap: usize,
        input_len: usize,
        fade_size: usize,
        pad_borders: bool,
    ) -> Result<Self> {
        if chunk_size == 0 {
            return Err(StemError::Config("chunk_size must be positive".into()));
        }
        if num_overlap == 0 {
            return Err(StemError::Config("num_overlap must be at least 1".into()));
        }
        let step = chunk_size / num_overlap;
        if step == 0 {
            return Err(StemError::Config(format!(
                "step is zero (chunk_size {chunk_size} < num_overlap {num_overlap})"
            )));
        }
        if fade_size > chunk_size / 2 {
            return Err(StemError::Config(format!(
                "fade_size {fade_size} out of range for chunk_size {chunk_size}"
            )));
        }

        let overlap = chunk_size - step;
        let border = (pad_borders && overlap > 0 && input_len > 2 * overlap).then_some(overlap);
        let padded_len = input_len + 2 * border.unwrap_or(0);

        Ok(Self {
            chunk_size,
            step,
            border,
            input_len,
            padded_len,
            envelope: WindowEnvelope::new(chunk_size, fade_size),
        })
    }

    pub fn from_settings(settings: &InferenceSettings, input_len: usize) -> Result<Self> {
        Self::new(
            settings.window_len(),
            settings.num_overlap,
            input_len,
            settings.fade_len(),
            settings.pads_borders(),
        )
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// Border applied to each end, or `None` when the input was not padded.
    pub fn border(&self) -> Option<usize> {
        self.border
    }

    pub fn input_len(&self) -> usize {
        self.input_len
    }

    /// Length of the signal the chunks cover.
    pub fn padded_len(&self) -> usize {
        self.padded_len
    }

    pub fn total_chunks(&self) -> usize {
        self.padded_len.div_ceil(self.step)
    }

    /// A fresh pass over the chunk sequence.
    pub fn chunks(&self) -> Chunks {
        Chunks {
            next_start: 0,
            next_index: 0,
            step: self.step,
            chunk_size: self.chunk_size,
            len: self.padded_len,
        }
    }

    /// Envelope for `chunk`, with the first/last overrides decided by its
    /// position in the whole run.
    pub fn envelope(&self, chunk: &ChunkSpec) -> Cow<'_, WindowEnvelope> {
        let first = chunk.index == 0;
        let last = chunk.index + 1 == self.total_chunks();
        if !first && !last {
            return Cow::Borrowed(&self.envelope);
        }
        let mut env = self.envelope.clone();
        if first {
            env = env.without_fade_in();
        }
        if last {
            env = env.without_fade_out();
        }
        Cow::Owned(env)
    }

    /// The signal the chunks index into: reflect-padded when a border applies.
    pub fn pad_input<'a>(&self, input: ArrayView2<'a, f32>) -> CowArray<'a, f32, Ix2> {
        match self.border {
            Some(border) => CowArray::from(reflect_pad(input, border)),
            None => CowArray::from(input),
        }
    }
}

/// Lazy chunk sequence. Cloning restarts from the clone's position.
#[derive(Clone, Debug)]
pub struct Chunks {
    next_start: usize,
    next_index: usize,
    step: usize,
    chunk_size: usize,
    len: usize,
}

impl Iterator for Chunks {
    type Item = ChunkSpec;

    fn next(&mut self) -> Option<ChunkSpec> {
        if self.next_start >= self.len {
            return None;
        }
        let spec = ChunkSpec {
            index: self.next_index,
            start: self.next_start,
            length: self.chunk_size.min(self.len - self.next_start),
        };
        self.next_start += self.step;
        self.next_index += 1;
        Some(spec)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.len.saturating_sub(self.next_start).div_ceil(self.step);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks {}

/// Mirror `border` samples onto both ends, excluding the edge sample itself.
/// Requires `border < frames`.
pub fn reflect_pad(input: ArrayView2<'_, f32>, border: usize) -> Array2<f32> {
    let (channels, frames) = input.dim();
    debug_assert!(border < frames.max(1));
    let mut out = Array2::<f32>::zeros((channels, frames + 2 * border));
    out.slice_mut(s![.., border..border + frames]).assign(&input);
    for k in 0..border {
        out.column_mut(border - 1 - k).assign(&input.column(k + 1));
        out.column_mut(border + frames + k)
            .assign(&input.column(frames - 2 - k));
    }
    out
}

/// Copy `part` into a full-length model window, padding the tail.
pub fn fill_window(mut dest: ArrayViewMut2<'_, f32>, part: ArrayView2<'_, f32>, tail: TailPadding) {
    let window = dest.ncols();
    let length = part.ncols();
    dest.slice_mut(s![.., ..length]).assign(&part);
    if length == window {
        return;
    }

    let reflect = tail == TailPadding::ReflectOrZero && length > window / 2 + 1;
    if reflect {
        for k in 0..window - length {
            dest.column_mut(length + k).assign(&part.column(length - 2 - k));
        }
    } else {
        dest.slice_mut(s![.., length..]).fill(0.0);
    }
}
