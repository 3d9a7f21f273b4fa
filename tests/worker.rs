use std::io::Cursor;

use ndarray::Array2;
use stem_splitter_core::{
    core::audio::write_wav_f32,
    job::{
        protocol::{read_stems, EventWriter, WorkerEvent, WorkerRequest},
        worker::{execute, spawn_control_listener},
    },
    AudioBuffer, BuiltinModels, CancellationToken, InferenceSettings, ModelSelection,
};
use tempfile::tempdir;

fn request(dir: &std::path::Path, model: ModelSelection) -> WorkerRequest {
    let input = dir.join("input.wav");
    let audio = AudioBuffer::new(
        Array2::from_shape_fn((2, 12_000), |(c, t)| ((t + c) as f32 * 0.01).sin() * 0.3),
        44_100,
    );
    write_wav_f32(&input, &audio).unwrap();
    WorkerRequest {
        input,
        output_dir: dir.join("stems"),
        model,
        settings: InferenceSettings {
            chunk_size: 4_410,
            fade_size: Some(441),
            stem_names: vec!["vocals".into(), "accompaniment".into()],
            ..Default::default()
        },
    }
}

fn run(request: &WorkerRequest, token: &CancellationToken) -> Vec<WorkerEvent> {
    let mut events = EventWriter::new(Vec::new());
    execute(request, &BuiltinModels, token, &mut events).unwrap();
    String::from_utf8(events.into_inner())
        .unwrap()
        .lines()
        .map(|l| WorkerEvent::from_line(l).unwrap())
        .collect()
}

#[test]
fn successful_job_writes_stems_and_ends_with_success() {
    let dir = tempdir().unwrap();
    let req = request(dir.path(), ModelSelection::new("identity"));
    let events = run(&req, &CancellationToken::new());

    assert_eq!(
        events.first(),
        Some(&WorkerEvent::Status {
            text: "Loading model".into()
        })
    );
    assert!(events.contains(&WorkerEvent::Progress { percent: 100 }));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    let Some(WorkerEvent::Success { stems }) = events.last() else {
        panic!("expected success, got {events:?}");
    };
    assert_eq!(stems.len(), 2);
    assert_eq!(stems[0].name.as_deref(), Some("vocals"));

    let loaded = read_stems(stems).unwrap();
    let vocals = loaded.get("vocals").unwrap();
    assert_eq!(vocals.frames(), 12_000);
    assert_eq!(vocals.channels(), 2);
}

#[test]
fn model_failure_is_reported_as_error_event() {
    let dir = tempdir().unwrap();
    let req = request(dir.path(), ModelSelection::new("failing").with_option("fail_after", 1));
    let events = run(&req, &CancellationToken::new());

    match events.last() {
        Some(WorkerEvent::Error { message }) => assert!(message.contains("model raised")),
        other => panic!("unexpected terminal {other:?}"),
    }
}

#[test]
fn unknown_model_is_reported_as_error_event() {
    let dir = tempdir().unwrap();
    let req = request(dir.path(), ModelSelection::new("no-such-model"));
    let events = run(&req, &CancellationToken::new());
    assert!(matches!(events.last(), Some(WorkerEvent::Error { message }) if message.contains("no-such-model")));
}

#[test]
fn preset_token_reports_cancelled() {
    let dir = tempdir().unwrap();
    let req = request(dir.path(), ModelSelection::new("identity"));
    let token = CancellationToken::new();
    token.set();
    let events = run(&req, &token);
    assert_eq!(events.last(), Some(&WorkerEvent::Cancelled));
    assert!(!events.iter().any(|e| matches!(e, WorkerEvent::Progress { .. })));
}

#[test]
fn control_listener_sets_token_on_cancel_line() {
    let token = CancellationToken::new();
    spawn_control_listener(Cursor::new(b"noise\ncancel\n".to_vec()), token.clone())
        .join()
        .unwrap();
    assert!(token.is_set());
}

#[test]
fn control_listener_treats_eof_as_cancel() {
    let token = CancellationToken::new();
    spawn_control_listener(Cursor::new(Vec::new()), token.clone())
        .join()
        .unwrap();
    assert!(token.is_set());
}

#[test]
fn events_are_single_json_lines() {
    let line = WorkerEvent::Progress { percent: 42 }.to_line().unwrap();
    assert_eq!(line, r#"{"event":"progress","percent":42}"#);
    assert_eq!(
        WorkerEvent::from_line(r#"{"event":"cancelled"}"#).unwrap(),
        WorkerEvent::Cancelled
    );
}
