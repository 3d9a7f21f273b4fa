//! Inference settings handed to every job.
//!
//! The settings object is plain data: the worker receives it inside the job
//! request and the supervisor never interprets it beyond forwarding.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, StemError};

/// How a model family wants its input windowed and its output recombined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// Generic chunked models (band-split / mel-band roformers): linear
    /// crossfade envelope, reflect-padded borders, reflect or zero padded tail.
    #[default]
    Chunked,
    /// Demucs-style models trained on a fixed segment: uniform weights,
    /// zero padded tail, no border padding.
    FixedSegment,
}

/// Compute device requested for the model. Interpreted by the model loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    #[default]
    Cpu,
    Cuda(usize),
    Metal,
}

/// How a short final chunk is padded up to the window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailPadding {
    /// Reflect when more than half a window remains, zero-pad otherwise.
    ReflectOrZero,
    Zero,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceSettings {
    #[serde(default)]
    pub family: ModelFamily,

    /// Window length in samples (chunked family).
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Window length in seconds (fixed-segment family).
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: f32,

    #[serde(default = "default_num_overlap")]
    pub num_overlap: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Crossfade length; `chunk_size / 10` when absent.
    #[serde(default)]
    pub fade_size: Option<usize>,

    /// Reflect-pad both ends of the input by the window overlap.
    #[serde(default = "default_pad_borders")]
    pub pad_borders: bool,

    #[serde(default = "default_stem_names")]
    pub stem_names: Vec<String>,

    /// Single-target models name their only stem here; overrides `stem_names`.
    #[serde(default)]
    pub target_instrument: Option<String>,

    /// Mixed-precision hint for the model.
    #[serde(default)]
    pub use_amp: bool,

    #[serde(default)]
    pub device: Device,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            family: ModelFamily::default(),
            chunk_size: default_chunk_size(),
            segment_seconds: default_segment_seconds(),
            num_overlap: default_num_overlap(),
            batch_size: default_batch_size(),
            sample_rate: default_sample_rate(),
            fade_size: None,
            pad_borders: default_pad_borders(),
            stem_names: default_stem_names(),
            target_instrument: None,
            use_amp: false,
            device: Device::default(),
        }
    }
}

fn default_chunk_size() -> usize {
    485_100
}

fn default_segment_seconds() -> f32 {
    11.0
}

fn default_num_overlap() -> usize {
    4
}

fn default_batch_size() -> usize {
    1
}

fn default_sample_rate() -> u32 {
    44_100
}

fn default_pad_borders() -> bool {
    true
}

fn default_stem_names() -> Vec<String> {
    ["vocals", "bass", "drums", "other"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl InferenceSettings {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Number of samples fed to the model per window.
    pub fn window_len(&self) -> usize {
        match self.family {
            ModelFamily::Chunked => self.chunk_size,
            ModelFamily::FixedSegment => {
                (self.sample_rate as f64 * self.segment_seconds as f64).round() as usize
            }
        }
    }

    /// Crossfade length used by the window envelope; 0 disables fading.
    pub fn fade_len(&self) -> usize {
        match self.family {
            ModelFamily::Chunked => self.fade_size.unwrap_or(self.chunk_size / 10),
            ModelFamily::FixedSegment => 0,
        }
    }

    pub fn pads_borders(&self) -> bool {
        self.family == ModelFamily::Chunked && self.pad_borders
    }

    pub fn tail_padding(&self) -> TailPadding {
        match self.family {
            ModelFamily::Chunked => TailPadding::ReflectOrZero,
            ModelFamily::FixedSegment => TailPadding::Zero,
        }
    }

    /// Ordered names for the model's stem axis.
    pub fn stems(&self) -> Vec<String> {
        match &self.target_instrument {
            Some(target) => vec![target.clone()],
            None => self.stem_names.clone(),
        }
    }

    /// Checks the fields that do not depend on the input length.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(StemError::Config("batch_size must be at least 1".into()));
        }
        if self.sample_rate == 0 {
            return Err(StemError::Config("sample_rate must be positive".into()));
        }
        if self.stems().is_empty() {
            return Err(StemError::Config("no stem names configured".into()));
        }
        if self.family == ModelFamily::FixedSegment && !(self.segment_seconds > 0.0) {
            return Err(StemError::Config("segment_seconds must be positive".into()));
        }
        Ok(())
    }
}
