use stem_splitter_core::{
    config::TailPadding,
    model::registry::{registry, resolve_model_name},
    Device, InferenceSettings, ModelFamily, StemError,
};
use tempfile::tempdir;

#[test]
fn partial_json_fills_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings.json");
    std::fs::write(
        &path,
        r#"{ "chunk_size": 8820, "target_instrument": "vocals", "device": { "cuda": 1 } }"#,
    )
    .unwrap();

    let settings = InferenceSettings::from_json_file(&path).unwrap();
    assert_eq!(settings.chunk_size, 8_820);
    assert_eq!(settings.num_overlap, 4);
    assert_eq!(settings.batch_size, 1);
    assert_eq!(settings.device, Device::Cuda(1));
    assert_eq!(settings.stems(), vec!["vocals".to_string()]);
    assert_eq!(settings.fade_len(), 882);
    assert!(settings.pads_borders());
    settings.validate().unwrap();
}

#[test]
fn fixed_segment_family_derives_its_window() {
    let settings = InferenceSettings {
        family: ModelFamily::FixedSegment,
        segment_seconds: 0.5,
        sample_rate: 44_100,
        ..Default::default()
    };
    assert_eq!(settings.window_len(), 22_050);
    assert_eq!(settings.fade_len(), 0);
    assert!(!settings.pads_borders());
    assert_eq!(settings.tail_padding(), TailPadding::Zero);
}

#[test]
fn defaults_match_reference_models() {
    let settings = InferenceSettings::default();
    assert_eq!(settings.family, ModelFamily::Chunked);
    assert_eq!(settings.chunk_size, 485_100);
    assert_eq!(settings.sample_rate, 44_100);
    assert_eq!(settings.stems(), ["vocals", "bass", "drums", "other"]);
    assert_eq!(settings.tail_padding(), TailPadding::ReflectOrZero);
}

#[test]
fn validation_rejects_empty_stems() {
    let settings = InferenceSettings {
        stem_names: Vec::new(),
        ..Default::default()
    };
    assert!(matches!(settings.validate(), Err(StemError::Config(_))));
}

#[test]
fn registry_resolves_default_and_rejects_unknown() {
    let reg = registry().unwrap();
    assert!(reg.models.iter().any(|m| m.name == "identity"));
    assert_eq!(resolve_model_name("").unwrap(), reg.default);
    assert!(matches!(
        resolve_model_name("htdemucs"),
        Err(StemError::UnknownModel(name)) if name == "htdemucs"
    ));
}
