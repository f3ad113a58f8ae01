//! End-to-end dream pipeline tests: synthetic clip in, GIF out.

use ensonar::autograd;
use ensonar::prelude::*;

use proptest::prelude::*;
use tempfile::tempdir;

fn nano_model(seed: u64) -> VideoModel {
    VideoModel::new(VideoArchSpec::nano().with_seed(seed))
}

/// A 2-frame-repeated synthetic 128x128 clip dreamed for one epoch must
/// not raise, and the working clip keeps its (1, 3, T, H, W) shape.
#[test]
fn two_frame_repeated_clip_one_epoch() {
    let pattern = SyntheticClip::noise(128, 128, 2, 5).frames();
    let frames = SyntheticClip::repeating(pattern, 32).frames();

    let mut config = DreamConfig::default();
    config.epochs = 1;
    config.frame_size = 32;
    config.clip_len = 32;

    let mut dreamer = Dreamer::new(nano_model(1), config, &frames).unwrap();
    let shape_before = dreamer.clip().shape().to_vec();
    assert_eq!(shape_before, vec![1, 3, 32, 32, 32]);

    let stats = dreamer.run();
    assert_eq!(stats.len(), 1);
    assert!(stats[0].loss.is_finite());
    assert_eq!(dreamer.clip().shape(), &shape_before[..]);
}

/// Finalize must emit clip_len frames of (H, W, 3) bytes.
#[test]
fn finalize_shapes_and_dtype() {
    let frames = SyntheticClip::noise(64, 48, 8, 9).frames();

    let mut config = DreamConfig::default();
    config.epochs = 2;
    config.frame_size = 16;
    config.clip_len = 8;

    let mut dreamer = Dreamer::new(nano_model(2), config, &frames).unwrap();
    dreamer.run();
    let dreamed = dreamer.finalize().unwrap();

    assert_eq!(dreamed.len(), 8);
    for frame in &dreamed {
        // Short side 48 -> 16, long side 64 -> 21 (aspect preserved).
        assert_eq!(frame.height(), 16);
        assert_eq!(frame.width(), 21);
        assert_eq!(frame.data().len(), 21 * 16 * 3);
    }
}

/// After every iteration the clip gradient buffer is cleared, and every
/// element denormalizes into [0, 1].
#[test]
fn iteration_invariants_hold_across_epochs() {
    let frames = SyntheticClip::noise(16, 16, 8, 3).frames();

    let mut config = DreamConfig::default();
    config.epochs = 3;
    config.frame_size = 16;
    config.clip_len = 8;
    config.learning_rate = 5.0;

    let mut dreamer = Dreamer::new(nano_model(3), config, &frames).unwrap();
    let clip_id = dreamer.clip().id();

    for epoch in 0..3 {
        dreamer.step(epoch);
        assert!(
            autograd::get_grad(clip_id).is_none(),
            "gradient buffer must be clear after epoch {epoch}"
        );

        let shape = dreamer.clip().shape().to_vec();
        let plane: usize = shape[2..].iter().product();
        for (i, &v) in dreamer.clip().data().iter().enumerate() {
            let c = (i / plane) % 3;
            let raw = v * KINETICS_STD[c] + KINETICS_MEAN[c];
            assert!(
                (-1e-4..=1.0 + 1e-4).contains(&raw),
                "epoch {epoch}: denormalized value {raw} escaped [0, 1]"
            );
        }
    }
}

/// The whole pipeline: dataset -> dreamer -> GIF file on disk.
#[test]
fn dream_to_gif_on_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("dream.gif");

    let source = SyntheticClip::noise(24, 24, 10, 11).into_source();
    let dataset = VideoDataset::new(source, 8);
    let frames = dataset.first_clip().unwrap();

    let mut config = DreamConfig::default();
    config.epochs = 1;
    config.frame_size = 16;
    config.clip_len = 8;

    let mut dreamer = Dreamer::new(nano_model(4), config, &frames).unwrap();
    dreamer.run();
    let dreamed = dreamer.finalize().unwrap();
    GifSink::new().write(&path, &dreamed).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert!(bytes.starts_with(b"GIF89a"));
}

/// Dreaming from a checkpointed model matches dreaming from the source
/// model: the weights file carries everything the forward pass uses.
#[test]
fn checkpoint_reload_reproduces_dream() {
    let dir = tempdir().unwrap();
    let weights = dir.path().join("nano.safetensors");

    let model = nano_model(6);
    model.save_safetensors(&weights).unwrap();
    let reloaded =
        VideoModel::from_safetensors(VideoArchSpec::nano().with_seed(99), &weights).unwrap();

    let frames = SyntheticClip::noise(16, 16, 8, 21).frames();
    let mut config = DreamConfig::default();
    config.epochs = 2;
    config.frame_size = 16;
    config.clip_len = 8;

    let mut a = Dreamer::new(model, config.clone(), &frames).unwrap();
    a.run();
    let dreamed_a = a.finalize().unwrap();

    let mut b = Dreamer::new(reloaded, config, &frames).unwrap();
    b.run();
    let dreamed_b = b.finalize().unwrap();

    assert_eq!(dreamed_a, dreamed_b);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Total variation is non-negative for any clip.
    #[test]
    fn total_variation_is_non_negative(values in prop::collection::vec(-10.0f32..10.0, 54)) {
        let clip = Tensor::new(&values, &[1, 2, 3, 3, 3]);
        prop_assert!(clip.total_variation().item() >= 0.0);
    }

    /// Total variation of any constant clip is exactly zero.
    #[test]
    fn total_variation_of_constant_clip_is_zero(value in -5.0f32..5.0) {
        let clip = Tensor::new(&vec![value; 48], &[1, 3, 2, 2, 4]);
        prop_assert_eq!(clip.total_variation().item(), 0.0);
    }
}
