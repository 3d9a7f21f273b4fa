//! Recombining separated stems into a single preview/export buffer.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use ndarray::{Array2, Axis};

use crate::{
    error::{Result, StemError},
    types::AudioBuffer,
};

pub const DEFAULT_GAIN: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StemControl {
    pub gain: f32,
    pub muted: bool,
    pub solo: bool,
}

impl Default for StemControl {
    fn default() -> Self {
        Self {
            gain: DEFAULT_GAIN,
            muted: false,
            solo: false,
        }
    }
}

/// Per-stem mixer state, keyed by lower-case stem name.
#[derive(Debug, Clone, Default)]
pub struct MixSettings {
    controls: HashMap<String, StemControl>,
}

impl MixSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn control(&self, stem: &str) -> StemControl {
        self.controls
            .get(&stem.to_lowercase())
            .copied()
            .unwrap_or_default()
    }

    fn control_mut(&mut self, stem: &str) -> &mut StemControl {
        self.controls.entry(stem.to_lowercase()).or_default()
    }

    pub fn set_gain(&mut self, stem: &str, gain: f32) -> &mut Self {
        self.control_mut(stem).gain = gain;
        self
    }

    pub fn set_muted(&mut self, stem: &str, muted: bool) -> &mut Self {
        self.control_mut(stem).muted = muted;
        self
    }

    pub fn set_solo(&mut self, stem: &str, solo: bool) -> &mut Self {
        self.control_mut(stem).solo = solo;
        self
    }

    /// Solo'd stems win; otherwise everything that is not muted plays.
    pub fn active<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<&'a str> {
        let names: Vec<&str> = names.into_iter().collect();
        let solo: Vec<&str> = names
            .iter()
            .copied()
            .filter(|n| self.control(n).solo)
            .collect();
        if !solo.is_empty() {
            return solo;
        }
        names
            .into_iter()
            .filter(|n| !self.control(n).muted)
            .collect()
    }
}

/// Sums the active stems with their gains and peak-normalizes the result.
/// Mono stems are spread across all channels of a multi-channel mix.
pub fn remix(stems: &[(String, AudioBuffer)], settings: &MixSettings) -> Result<AudioBuffer> {
    let active = settings.active(stems.iter().map(|(n, _)| n.as_str()));
    if active.is_empty() {
        return Err(StemError::Audio("nothing to mix: every stem is muted".into()));
    }

    let picked: Vec<&(String, AudioBuffer)> = stems
        .iter()
        .filter(|(n, _)| active.contains(&n.as_str()))
        .collect();

    let sample_rate = picked[0].1.sample_rate;
    let frames = picked[0].1.frames();
    let channels = picked.iter().map(|(_, a)| a.channels()).max().unwrap_or(1);

    let mut mix = Array2::<f32>::zeros((channels, frames));
    for (name, audio) in &picked {
        if audio.sample_rate != sample_rate || audio.frames() != frames {
            return Err(StemError::Audio(format!(
                "stem `{name}` is {} frames at {} Hz, expected {frames} at {sample_rate} Hz",
                audio.frames(),
                audio.sample_rate
            )));
        }
        let gain = settings.control(name).gain;
        match audio.channels() {
            c if c == channels => mix.scaled_add(gain, &audio.samples),
            1 => {
                let mono = audio.samples.index_axis(Axis(0), 0);
                for mut ch in mix.outer_iter_mut() {
                    ch.scaled_add(gain, &mono);
                }
            }
            c => {
                return Err(StemError::Audio(format!(
                    "stem `{name}` has {c} channels, cannot mix into {channels}"
                )))
            }
        }
    }

    let peak = mix.iter().fold(0f32, |m, s| m.max(s.abs()));
    if peak > 0.0 {
        mix.mapv_inplace(|s| s / peak);
    }

    Ok(AudioBuffer::new(mix, sample_rate))
}

/// `path` if free, else the first `stem_N.ext` that does not exist yet.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("mix")
        .to_string();
    let ext = path.extension().and_then(|e| e.to_str());
    (1u32..)
        .map(|n| {
            let name = match ext {
                Some(ext) => format!("{stem}_{n}.{ext}"),
                None => format!("{stem}_{n}"),
            };
            path.with_file_name(name)
        })
        .find(|p| !p.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Stem name of a `<song>_<stem>.wav` file, ignoring the `_N` suffix that
/// [`unique_path`] appends on collisions.
pub fn stem_name(path: &Path) -> String {
    let base = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    let base = match base.rsplit_once('_') {
        Some((head, n)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => head,
        _ => base,
    };
    base.rsplit('_').next().unwrap_or(base).to_string()
}
