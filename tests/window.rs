use approx::assert_abs_diff_eq;
use ndarray::{array, Array2};
use stem_splitter_core::{
    config::TailPadding,
    core::window::{fill_window, reflect_pad, WindowEnvelope, WindowScheduler},
    StemError,
};

#[test]
fn chunk_count_without_border() {
    let sched = WindowScheduler::new(44_100, 4, 220_500, 4_410, false).unwrap();
    assert_eq!(sched.step(), 11_025);
    assert_eq!(sched.border(), None);
    assert_eq!(sched.padded_len(), 220_500);
    assert_eq!(sched.total_chunks(), 20);
    assert_eq!(sched.chunks().len(), 20);
    assert_eq!(sched.chunks().count(), 20);
}

#[test]
fn border_padding_extends_the_run() {
    let sched = WindowScheduler::new(44_100, 4, 220_500, 4_410, true).unwrap();
    assert_eq!(sched.border(), Some(33_075));
    assert_eq!(sched.padded_len(), 220_500 + 2 * 33_075);
    assert_eq!(sched.total_chunks(), 26);
}

#[test]
fn short_input_skips_border() {
    // 2 * border = 66150 >= input
    let sched = WindowScheduler::new(44_100, 4, 60_000, 4_410, true).unwrap();
    assert_eq!(sched.border(), None);
    assert_eq!(sched.padded_len(), 60_000);
}

#[test]
fn chunks_cover_every_sample() {
    for (chunk, overlap, len) in [(1000, 4, 10_000), (1000, 1, 2_500), (333, 3, 1_001), (64, 2, 7)] {
        let sched = WindowScheduler::new(chunk, overlap, len, 0, false).unwrap();
        let mut covered = vec![0usize; sched.padded_len()];
        let mut last_index = None;
        for spec in sched.chunks() {
            assert_eq!(spec.index, last_index.map_or(0, |i| i + 1));
            assert!(spec.length <= chunk);
            assert!(spec.length > 0);
            for c in &mut covered[spec.start..spec.start + spec.length] {
                *c += 1;
            }
            last_index = Some(spec.index);
        }
        assert!(covered.iter().all(|&c| c > 0), "gap for {chunk}/{overlap}/{len}");
        assert_eq!(last_index.map_or(0, |i| i + 1), sched.total_chunks());
    }
}

#[test]
fn empty_input_has_no_chunks() {
    let sched = WindowScheduler::new(100, 2, 0, 0, true).unwrap();
    assert_eq!(sched.total_chunks(), 0);
    assert!(sched.chunks().next().is_none());
}

#[test]
fn rejects_bad_geometry() {
    let cases = [
        WindowScheduler::new(0, 4, 100, 0, false),
        WindowScheduler::new(100, 0, 100, 0, false),
        WindowScheduler::new(3, 4, 100, 0, false),
        WindowScheduler::new(100, 4, 100, 51, false),
    ];
    for case in cases {
        assert!(matches!(case, Err(StemError::Config(_))));
    }
}

#[test]
fn one_sample_fade_is_accepted() {
    let sched = WindowScheduler::new(16, 4, 100, 1, false).unwrap();
    let chunk = sched.chunks().nth(2).unwrap();
    let env = sched.envelope(&chunk);
    assert_abs_diff_eq!(env.weights()[0], 0.5);
    assert_abs_diff_eq!(env.weights()[15], 0.5);
    assert_abs_diff_eq!(env.weights()[0] + env.weights()[15], 1.0);
}

#[test]
fn envelope_weights_positive_and_complementary() {
    let fade = 10;
    let env = WindowEnvelope::new(100, fade);
    let w = env.weights();
    assert!(w.iter().all(|&x| x > 0.0 && x <= 1.0));
    for i in 0..fade {
        assert_abs_diff_eq!(w[i] + w[100 - fade + i], 1.0, epsilon = 1e-6);
    }
    assert_abs_diff_eq!(w[50], 1.0);
}

#[test]
fn uniform_envelope_is_all_ones() {
    let env = WindowEnvelope::uniform(16);
    assert!(env.weights().iter().all(|&x| x == 1.0));
}

#[test]
fn first_and_last_chunks_drop_their_outer_fade() {
    let sched = WindowScheduler::new(100, 4, 1_000, 10, false).unwrap();
    let chunks: Vec<_> = sched.chunks().collect();

    let first = sched.envelope(&chunks[0]);
    assert_eq!(first.weights()[0], 1.0);
    assert!(first.weights()[99] < 1.0);

    let middle = sched.envelope(&chunks[3]);
    assert!(middle.weights()[0] < 1.0);
    assert!(middle.weights()[99] < 1.0);

    let last = sched.envelope(chunks.last().unwrap());
    assert!(last.weights()[0] < 1.0);
    assert_eq!(last.weights()[99], 1.0);
}

#[test]
fn single_chunk_has_flat_envelope() {
    let sched = WindowScheduler::new(100, 1, 80, 10, false).unwrap();
    assert_eq!(sched.total_chunks(), 1);
    let chunk = sched.chunks().next().unwrap();
    assert!(sched.envelope(&chunk).weights().iter().all(|&w| w == 1.0));
}

#[test]
fn reflect_pad_mirrors_without_edge() {
    let input = array![[0.0f32, 1.0, 2.0, 3.0, 4.0]];
    let padded = reflect_pad(input.view(), 2);
    assert_eq!(padded, array![[2.0f32, 1.0, 0.0, 1.0, 2.0, 3.0, 4.0, 3.0, 2.0]]);
}

#[test]
fn fill_window_reflects_long_tails() {
    let part = array![[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]];
    let mut dest = Array2::<f32>::from_elem((1, 8), 9.0);
    fill_window(dest.view_mut(), part.view(), TailPadding::ReflectOrZero);
    assert_eq!(dest, array![[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 5.0, 4.0]]);
}

#[test]
fn fill_window_zero_pads_short_tails() {
    let part = array![[1.0f32, 2.0, 3.0]];
    let mut dest = Array2::<f32>::from_elem((1, 8), 9.0);
    fill_window(dest.view_mut(), part.view(), TailPadding::ReflectOrZero);
    assert_eq!(dest, array![[1.0f32, 2.0, 3.0, 0.0, 0.0, 0.0, 0.0, 0.0]]);

    let part = array![[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0]];
    fill_window(dest.view_mut(), part.view(), TailPadding::Zero);
    assert_eq!(dest, array![[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0, 0.0, 0.0]]);
}
