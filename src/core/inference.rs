//! The chunked overlap-add inference loop.

use ndarray::{s, Array3, Axis};
use tracing::{debug, info};

use crate::{
    config::InferenceSettings,
    core::{
        accumulator::OverlapAddAccumulator,
        cancel::CancellationToken,
        window::{fill_window, ChunkSpec, WindowScheduler},
    },
    error::{Result, StemError},
    model::SeparationModel,
    types::{AudioBuffer, Stems},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Non-terminal events emitted while the loop runs.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    Progress(u8),
    Status(String),
}

#[derive(Debug)]
pub enum LoopOutcome {
    Completed(Stems),
    Failed(String),
    Cancelled,
}

/// Single-use driver for one separation run.
pub struct InferenceLoop<'a> {
    settings: &'a InferenceSettings,
    token: CancellationToken,
    state: LoopState,
}

impl<'a> InferenceLoop<'a> {
    pub fn new(settings: &'a InferenceSettings, token: CancellationToken) -> Self {
        Self {
            settings,
            token,
            state: LoopState::Idle,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Runs the whole input through `model`.
    ///
    /// Configuration problems are returned as `Err` before any chunk is
    /// scheduled; everything after that ends in a [`LoopOutcome`].
    pub fn run<M, F>(
        &mut self,
        model: &mut M,
        audio: &AudioBuffer,
        mut on_event: F,
    ) -> Result<LoopOutcome>
    where
        M: SeparationModel + ?Sized,
        F: FnMut(LoopEvent),
    {
        if self.state != LoopState::Idle {
            return Err(StemError::Config("inference loop already ran".into()));
        }
        self.settings.validate()?;
        let scheduler = WindowScheduler::from_settings(self.settings, audio.frames())?;

        self.state = LoopState::Running;
        info!(
            frames = audio.frames(),
            channels = audio.channels(),
            chunk_size = scheduler.chunk_size(),
            step = scheduler.step(),
            chunks = scheduler.total_chunks(),
            family = ?self.settings.family,
            "separating"
        );
        on_event(LoopEvent::Status("Separating".into()));

        let outcome = match self.separate(model, audio, &scheduler, &mut on_event) {
            Ok(Some(stems)) => LoopOutcome::Completed(stems),
            Ok(None) => LoopOutcome::Cancelled,
            // A model call that raced with cancellation is not a failure.
            Err(_) if self.token.is_set() => LoopOutcome::Cancelled,
            Err(e) => LoopOutcome::Failed(e.to_string()),
        };

        self.state = match &outcome {
            LoopOutcome::Completed(_) => LoopState::Completed,
            LoopOutcome::Failed(_) => LoopState::Failed,
            LoopOutcome::Cancelled => LoopState::Cancelled,
        };
        debug!(state = ?self.state, "inference loop finished");
        Ok(outcome)
    }

    /// `Ok(None)` means the token was observed at a chunk boundary.
    fn separate<M, F>(
        &self,
        model: &mut M,
        audio: &AudioBuffer,
        scheduler: &WindowScheduler,
        on_event: &mut F,
    ) -> Result<Option<Stems>>
    where
        M: SeparationModel + ?Sized,
        F: FnMut(LoopEvent),
    {
        let names = self.settings.stems();
        let channels = audio.channels();
        let window = scheduler.chunk_size();
        let batch_size = self.settings.batch_size;
        let tail = self.settings.tail_padding();
        let total = scheduler.total_chunks();

        let mix = scheduler.pad_input(audio.view());
        let mut acc = OverlapAddAccumulator::new(
            names.len(),
            channels,
            scheduler.padded_len(),
            scheduler.border(),
        );

        let mut batch = Array3::<f32>::zeros((batch_size, channels, window));
        let mut pending: Vec<ChunkSpec> = Vec::with_capacity(batch_size);

        for chunk in scheduler.chunks() {
            if self.token.is_set() {
                debug!(chunk = chunk.index, "cancellation observed");
                return Ok(None);
            }

            let part = mix.slice(s![.., chunk.start..chunk.start + chunk.length]);
            fill_window(batch.index_axis_mut(Axis(0), pending.len()), part, tail);
            pending.push(chunk);
            on_event(LoopEvent::Progress(percent(chunk.index + 1, total)));

            if pending.len() == batch_size || chunk.index + 1 == total {
                self.flush(model, &batch, &pending, scheduler, &mut acc)?;
                pending.clear();
            }
        }

        if self.token.is_set() {
            return Ok(None);
        }

        let separated = acc.finalize();
        let sample_rate = audio.sample_rate;
        let stems = if names.len() == 1 {
            Stems::Unnamed(AudioBuffer::new(
                separated.index_axis_move(Axis(0), 0),
                sample_rate,
            ))
        } else {
            Stems::Named(
                names
                    .into_iter()
                    .zip(separated.outer_iter())
                    .map(|(name, stem)| (name, AudioBuffer::new(stem.to_owned(), sample_rate)))
                    .collect(),
            )
        };
        Ok(Some(stems))
    }

    fn flush<M>(
        &self,
        model: &mut M,
        batch: &Array3<f32>,
        pending: &[ChunkSpec],
        scheduler: &WindowScheduler,
        acc: &mut OverlapAddAccumulator,
    ) -> Result<()>
    where
        M: SeparationModel + ?Sized,
    {
        let n = pending.len();
        let input = batch.slice(s![..n, .., ..]);
        let output = model
            .forward(input)
            .map_err(|e| StemError::ModelInvocation(format!("{e:#}")))?;

        let expected = [n, acc.stems(), acc.channels(), scheduler.chunk_size()];
        if output.shape() != &expected[..] {
            return Err(StemError::ModelInvocation(format!(
                "model returned shape {:?}, expected {:?}",
                output.shape(),
                expected
            )));
        }

        for (chunk, prediction) in pending.iter().zip(output.outer_iter()) {
            acc.accumulate(chunk, prediction, &scheduler.envelope(chunk))?;
        }
        Ok(())
    }
}

/// Fraction of chunks scheduled so far, as a whole percentage.
fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u8
}
