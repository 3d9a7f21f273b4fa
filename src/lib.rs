//! # stem-splitter-core
//!
//! Chunked overlap-add stem separation: windows an input signal, runs each
//! window through a separation model and stitches the predictions back
//! together with crossfade weighting. Jobs run in a supervised worker process
//! so they can be cancelled or killed without taking the caller down.

pub mod config;
pub mod core;
pub mod error;
pub mod job;
pub mod model;
pub mod types;

pub use crate::{
    config::{Device, InferenceSettings, ModelFamily},
    core::{
        audio::{read_audio, resample, write_audio},
        cancel::CancellationToken,
        inference::{InferenceLoop, LoopEvent, LoopOutcome, LoopState},
        mix::{remix, MixSettings},
    },
    error::{Result, StemError},
    job::{JobHandle, JobSupervisor, SupervisorConfig, WorkerCommand},
    model::{builtin::BuiltinModels, ModelLoader, ModelSelection, SeparationModel},
    types::{AudioBuffer, JobMessage, Stems},
};
