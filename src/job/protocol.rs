//! What the supervisor and the worker process exchange.
//!
//! The job request is a JSON file next to the input WAV. The worker answers
//! with one JSON [`WorkerEvent`] per stdout line and listens for
//! [`CANCEL_COMMAND`] on stdin. Separated stems travel back as float WAV files.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    config::InferenceSettings,
    core::{
        audio::{read_wav, write_wav_f32},
        inference::LoopEvent,
    },
    error::Result,
    model::ModelSelection,
    types::{AudioBuffer, Stems},
};

pub const CANCEL_COMMAND: &str = "cancel";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub model: ModelSelection,
    pub settings: InferenceSettings,
}

impl WorkerRequest {
    pub fn write_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemFile {
    pub name: Option<String>,
    pub path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Progress { percent: u8 },
    Status { text: String },
    Success { stems: Vec<StemFile> },
    Error { message: String },
    Cancelled,
}

impl WorkerEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkerEvent::Success { .. } | WorkerEvent::Error { .. } | WorkerEvent::Cancelled
        )
    }

    pub fn to_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_line(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

impl From<LoopEvent> for WorkerEvent {
    fn from(event: LoopEvent) -> Self {
        match event {
            LoopEvent::Progress(percent) => WorkerEvent::Progress { percent },
            LoopEvent::Status(text) => WorkerEvent::Status { text },
        }
    }
}

/// Line-delimited event sink, flushed after every event.
pub struct EventWriter<W: Write> {
    out: W,
}

impl<W: Write> EventWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn emit(&mut self, event: &WorkerEvent) -> Result<()> {
        writeln!(self.out, "{}", event.to_line()?)?;
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub fn write_stems(stems: &Stems, dir: &Path) -> Result<Vec<StemFile>> {
    fs::create_dir_all(dir)?;
    stems
        .iter()
        .enumerate()
        .map(|(i, (name, audio))| {
            let path = dir.join(format!("stem_{i}.wav"));
            write_wav_f32(&path, audio)?;
            Ok(StemFile {
                name: name.map(str::to_string),
                path,
            })
        })
        .collect()
}

pub fn read_stems(files: &[StemFile]) -> Result<Stems> {
    if let [StemFile { name: None, path }] = files {
        return Ok(Stems::Unnamed(read_wav(path)?));
    }
    let named = files
        .iter()
        .enumerate()
        .map(|(i, f)| {
            let name = f.name.clone().unwrap_or_else(|| format!("stem_{i}"));
            Ok((name, read_wav(&f.path)?))
        })
        .collect::<Result<Vec<(String, AudioBuffer)>>>()?;
    Ok(Stems::Named(named))
}
