use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array3};
use stem_splitter_core::{
    core::{accumulator::OverlapAddAccumulator, window::WindowScheduler},
    StemError,
};

fn ramp(stems: usize, channels: usize, start: usize, len: usize) -> Array3<f32> {
    Array3::from_shape_fn((stems, channels, len), |(s, c, t)| {
        (start + t) as f32 * 0.001 + s as f32 + c as f32 * 0.5
    })
}

#[test]
fn reconstructs_consistent_predictions() {
    let sched = WindowScheduler::new(64, 4, 500, 8, false).unwrap();
    let mut acc = OverlapAddAccumulator::new(2, 2, sched.padded_len(), sched.border());
    for chunk in sched.chunks() {
        let pred = ramp(2, 2, chunk.start, sched.chunk_size());
        acc.accumulate(&chunk, pred.view(), &sched.envelope(&chunk)).unwrap();
    }
    let out = acc.finalize();
    let expected = ramp(2, 2, 0, 500);
    assert_eq!(out.dim(), (2, 2, 500));
    for (a, b) in out.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-4);
    }
}

#[test]
fn order_of_accumulation_does_not_matter() {
    let sched = WindowScheduler::new(50, 2, 333, 10, false).unwrap();
    let chunks: Vec<_> = sched.chunks().collect();
    let pred = |start: usize| {
        Array3::from_shape_fn((1, 1, 50), |(_, _, t)| ((start + t) as f32 * 0.37).sin())
    };

    let mut forward = OverlapAddAccumulator::new(1, 1, sched.padded_len(), None);
    for c in &chunks {
        forward.accumulate(c, pred(c.start).view(), &sched.envelope(c)).unwrap();
    }
    let mut backward = OverlapAddAccumulator::new(1, 1, sched.padded_len(), None);
    for c in chunks.iter().rev() {
        backward.accumulate(c, pred(c.start).view(), &sched.envelope(c)).unwrap();
    }

    for (a, b) in forward.finalize().iter().zip(backward.finalize().iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-5);
    }
}

#[test]
fn weight_is_positive_wherever_covered() {
    let sched = WindowScheduler::new(40, 1, 130, 10, false).unwrap();
    let mut acc = OverlapAddAccumulator::new(1, 1, sched.padded_len(), None);
    for c in sched.chunks() {
        acc.accumulate(&c, Array3::<f32>::zeros((1, 1, 40)).view(), &sched.envelope(&c))
            .unwrap();
    }
    assert!(acc.weight().iter().all(|&w| w > 0.0));
}

#[test]
fn uncovered_samples_finalize_to_zero() {
    let acc = OverlapAddAccumulator::new(1, 2, 16, None);
    let out = acc.finalize();
    assert!(out.iter().all(|&x| x == 0.0));
}

#[test]
fn finalize_trims_border() {
    let mut acc = OverlapAddAccumulator::new(1, 1, 10, Some(3));
    let env = stem_splitter_core::core::window::WindowEnvelope::uniform(10);
    let pred = Array1::<f32>::range(0.0, 10.0, 1.0)
        .into_shape((1, 1, 10))
        .unwrap();
    let chunk = stem_splitter_core::core::window::ChunkSpec {
        index: 0,
        start: 0,
        length: 10,
    };
    acc.accumulate(&chunk, pred.view(), &env).unwrap();
    let out = acc.finalize();
    assert_eq!(out.dim(), (1, 1, 4));
    assert_eq!(out.as_slice().unwrap(), &[3.0, 4.0, 5.0, 6.0]);
}

#[test]
fn rejects_mismatched_prediction() {
    let sched = WindowScheduler::new(32, 2, 100, 0, false).unwrap();
    let chunk = sched.chunks().next().unwrap();
    let mut acc = OverlapAddAccumulator::new(2, 2, sched.padded_len(), None);

    let wrong_stems = Array3::<f32>::zeros((3, 2, 32));
    assert!(matches!(
        acc.accumulate(&chunk, wrong_stems.view(), &sched.envelope(&chunk)),
        Err(StemError::ModelInvocation(_))
    ));

    let too_short = Array3::<f32>::zeros((2, 2, 16));
    assert!(matches!(
        acc.accumulate(&chunk, too_short.view(), &sched.envelope(&chunk)),
        Err(StemError::ModelInvocation(_))
    ));
}
