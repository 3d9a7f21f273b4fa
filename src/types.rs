use ndarray::{Array2, ArrayView2};

use crate::error::{Result, StemError};

/// Planar audio, shape `(channels, frames)`.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    pub samples: Array2<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Array2<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn silent(channels: usize, frames: usize, sample_rate: u32) -> Self {
        Self::new(Array2::zeros((channels, frames)), sample_rate)
    }

    pub fn from_interleaved(interleaved: &[f32], channels: u16, sample_rate: u32) -> Result<Self> {
        if channels == 0 {
            return Err(StemError::Audio("zero channels".into()));
        }
        let ch = channels as usize;
        let frames = interleaved.len() / ch;
        let samples = Array2::from_shape_fn((ch, frames), |(c, i)| interleaved[i * ch + c]);
        Ok(Self::new(samples, sample_rate))
    }

    pub fn to_interleaved(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.samples.len());
        for frame in self.samples.columns() {
            out.extend(frame.iter().copied());
        }
        out
    }

    pub fn channels(&self) -> usize {
        self.samples.nrows()
    }

    pub fn frames(&self) -> usize {
        self.samples.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    pub fn view(&self) -> ArrayView2<'_, f32> {
        self.samples.view()
    }
}

/// Separated output of one job, in the model's stem order.
#[derive(Clone, Debug, PartialEq)]
pub enum Stems {
    Named(Vec<(String, AudioBuffer)>),
    /// Single-stem models produce one buffer without a name.
    Unnamed(AudioBuffer),
}

impl Stems {
    pub fn len(&self) -> usize {
        match self {
            Stems::Named(v) => v.len(),
            Stems::Unnamed(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, name: &str) -> Option<&AudioBuffer> {
        match self {
            Stems::Named(v) => v
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, a)| a),
            Stems::Unnamed(_) => None,
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = (Option<&str>, &AudioBuffer)> + '_> {
        match self {
            Stems::Named(v) => Box::new(v.iter().map(|(n, a)| (Some(n.as_str()), a))),
            Stems::Unnamed(a) => Box::new(std::iter::once((None, a))),
        }
    }
}

/// Messages delivered to the caller of a job, in production order.
#[derive(Clone, Debug, PartialEq)]
pub enum JobMessage {
    Progress { percent: u8 },
    Status { text: String },
    Success { stems: Stems },
    Error { message: String },
    Cancelled,
}

impl JobMessage {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobMessage::Success { .. } | JobMessage::Error { .. } | JobMessage::Cancelled
        )
    }
}
