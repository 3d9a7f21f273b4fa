//! Worker-process side of a job.

use std::{
    io::{self, BufRead, BufReader, Read, Write},
    path::Path,
    thread::{self, JoinHandle},
};

use tracing::{error, info, warn};

use crate::{
    core::{
        audio::read_wav,
        cancel::CancellationToken,
        inference::{InferenceLoop, LoopOutcome},
    },
    error::Result,
    job::protocol::{write_stems, EventWriter, WorkerEvent, WorkerRequest, CANCEL_COMMAND},
    model::ModelLoader,
};

/// Entry point of the `worker` subcommand: stdin is the control pipe, stdout
/// carries events.
pub fn run_worker<L: ModelLoader + ?Sized>(job_path: &Path, loader: &L) -> Result<()> {
    let request = WorkerRequest::read_from(job_path)?;
    info!(job = %job_path.display(), model = %request.model.name, "worker started");

    let token = CancellationToken::new();
    spawn_control_listener(io::stdin(), token.clone());

    let stdout = io::stdout();
    let mut events = EventWriter::new(stdout.lock());
    execute(&request, loader, &token, &mut events)
}

/// Sets `token` on a cancel line or when the control pipe closes.
pub fn spawn_control_listener<R>(input: R, token: CancellationToken) -> JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        for line in BufReader::new(input).lines() {
            match line {
                Ok(cmd) if cmd.trim() == CANCEL_COMMAND => {
                    info!("cancel requested");
                    token.set();
                    return;
                }
                Ok(cmd) => warn!(command = %cmd, "ignoring unknown control command"),
                Err(e) => {
                    warn!("control pipe error: {e}");
                    break;
                }
            }
        }
        // Nobody is listening for our results any more.
        if token.set() {
            info!("control pipe closed, cancelling");
        }
    })
}

/// Runs one request to its terminal event, which is always emitted.
pub fn execute<L, W>(
    request: &WorkerRequest,
    loader: &L,
    token: &CancellationToken,
    events: &mut EventWriter<W>,
) -> Result<()>
where
    L: ModelLoader + ?Sized,
    W: Write,
{
    let terminal = match separate(request, loader, token, events) {
        Ok(event) => event,
        Err(_) if token.is_set() => WorkerEvent::Cancelled,
        Err(e) => {
            error!("job failed: {e}");
            WorkerEvent::Error {
                message: e.to_string(),
            }
        }
    };
    info!(?terminal, "worker finished");
    events.emit(&terminal)
}

fn separate<L, W>(
    request: &WorkerRequest,
    loader: &L,
    token: &CancellationToken,
    events: &mut EventWriter<W>,
) -> Result<WorkerEvent>
where
    L: ModelLoader + ?Sized,
    W: Write,
{
    events.emit(&WorkerEvent::Status {
        text: "Loading model".into(),
    })?;
    let mut model = loader.load(&request.model, &request.settings)?;
    if token.is_set() {
        return Ok(WorkerEvent::Cancelled);
    }

    let audio = read_wav(&request.input)?;

    let mut emit_error = None;
    let outcome = InferenceLoop::new(&request.settings, token.clone()).run(
        model.as_mut(),
        &audio,
        |event| {
            if emit_error.is_none() {
                emit_error = events.emit(&WorkerEvent::from(event)).err();
            }
        },
    )?;
    if let Some(e) = emit_error {
        return Err(e);
    }

    match outcome {
        LoopOutcome::Completed(stems) => {
            events.emit(&WorkerEvent::Status {
                text: "Writing stems".into(),
            })?;
            let files = write_stems(&stems, &request.output_dir)?;
            Ok(WorkerEvent::Success { stems: files })
        }
        LoopOutcome::Failed(message) => Ok(WorkerEvent::Error { message }),
        LoopOutcome::Cancelled => Ok(WorkerEvent::Cancelled),
    }
}
