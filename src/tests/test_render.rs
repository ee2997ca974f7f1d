use rand::Rng;

use crate::color::lab8_to_rgb8;
use crate::config::{Normalization, NormalizationScope, Stretch};
use crate::error::RankMapError;
use crate::render::Renderer;
use crate::sampling::seeded_rng;

fn per_channel_minmax() -> Normalization {
    Normalization {
        scope: NormalizationScope::PerChannel,
        stretch: Stretch::MinMax,
    }
}

#[test]
fn test_background_is_exactly_zero_with_color_conversion() {
    let mut rng = seeded_rng(3, 0);
    let embedding: Vec<f64> = (0..4 * 4 * 3).map(|_| rng.random_range(-5.0..5.0)).collect();
    let mask: Vec<bool> = (0..16).map(|i| i % 3 != 0).collect();
    let renderer = Renderer::new(4, 4, 3, per_channel_minmax(), true);
    assert!(renderer.converts_color());

    let image = renderer.render(&embedding, &mask).unwrap();
    assert_eq!(image.shape(), (4, 4, 3));
    for (i, &fg) in mask.iter().enumerate() {
        if !fg {
            assert_eq!(image.pixel(i), &[0, 0, 0], "background pixel {i}");
        }
    }
}

#[test]
fn test_render_is_idempotent() {
    let mut rng = seeded_rng(8, 0);
    let embedding: Vec<f64> = (0..6 * 3).map(|_| rng.random_range(-5.0..5.0)).collect();
    let mask = [true, false, true, true, true, false];
    let renderer = Renderer::new(2, 3, 3, per_channel_minmax(), true);
    let first = renderer.render(&embedding, &mask).unwrap();
    let second = renderer.render(&embedding, &mask).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_per_channel_min_max_truncates() {
    let embedding = [0.0, 5.0, 10.0];
    let renderer = Renderer::new(1, 3, 1, per_channel_minmax(), false);
    let image = renderer.render(&embedding, &[true; 3]).unwrap();
    assert_eq!(image.data(), &[0, 127, 255]);
}

#[test]
fn test_joint_scope_shares_bounds() {
    // two pixels, two channels: channel 0 spans [0, 1], channel 1 spans [0, 2]
    let embedding = [0.0, 0.0, 1.0, 2.0];
    let joint = Normalization {
        scope: NormalizationScope::Joint,
        stretch: Stretch::MinMax,
    };
    let image = Renderer::new(1, 2, 2, joint, false)
        .render(&embedding, &[true, true])
        .unwrap();
    assert_eq!(image.data(), &[0, 0, 127, 255]);

    let image = Renderer::new(1, 2, 2, per_channel_minmax(), false)
        .render(&embedding, &[true, true])
        .unwrap();
    assert_eq!(image.data(), &[0, 0, 255, 255]);
}

#[test]
fn test_constant_channel_renders_black() {
    let embedding = [2.0, 1.0, 2.0, 3.0];
    let image = Renderer::new(1, 2, 2, per_channel_minmax(), false)
        .render(&embedding, &[true, true])
        .unwrap();
    assert_eq!(image.pixel(0)[0], 0);
    assert_eq!(image.pixel(1)[0], 0);
    assert_eq!(image.pixel(1)[1], 255);
}

#[test]
fn test_statistics_ignore_background() {
    let embedding = [100.0, 0.0, 1.0];
    let image = Renderer::new(1, 3, 1, per_channel_minmax(), false)
        .render(&embedding, &[false, true, true])
        .unwrap();
    assert_eq!(image.data(), &[0, 0, 255]);
}

#[test]
fn test_percentile_stretch_clamps_tails() {
    let embedding: Vec<f64> = (0..=100).map(|v| v as f64).collect();
    let mask = vec![true; 101];
    let stretch = Normalization {
        scope: NormalizationScope::PerChannel,
        stretch: Stretch::Percentile {
            low: 10.0,
            high: 90.0,
        },
    };
    let image = Renderer::new(1, 101, 1, stretch, false)
        .render(&embedding, &mask)
        .unwrap();
    assert_eq!(image.pixel(5)[0], 0);
    assert_eq!(image.pixel(10)[0], 0);
    assert_eq!(image.pixel(50)[0], 127);
    assert_eq!(image.pixel(90)[0], 255);
    assert_eq!(image.pixel(95)[0], 255);
}

#[test]
fn test_color_conversion_applies_lab_to_foreground() {
    let embedding = [0.0, 0.0, 0.0, 1.0, 0.5, 0.25, 2.0, 1.0, 1.0];
    let mask = [true, true, true];
    let plain = Renderer::new(1, 3, 3, per_channel_minmax(), false)
        .render(&embedding, &mask)
        .unwrap();
    let converted = Renderer::new(1, 3, 3, per_channel_minmax(), true)
        .render(&embedding, &mask)
        .unwrap();
    for i in 0..3 {
        let lab = plain.pixel(i);
        assert_eq!(converted.pixel(i), &lab8_to_rgb8([lab[0], lab[1], lab[2]]));
    }
}

#[test]
fn test_color_conversion_needs_three_channels() {
    let renderer = Renderer::new(1, 2, 4, per_channel_minmax(), true);
    assert!(!renderer.converts_color());
    let embedding = [0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
    let image = renderer.render(&embedding, &[true, true]).unwrap();
    assert_eq!(image.pixel(1), &[255, 255, 255, 255]);
}

#[test]
fn test_shape_errors() {
    let renderer = Renderer::new(2, 2, 3, per_channel_minmax(), false);
    let err = renderer.render(&[0.0; 11], &[true; 4]).unwrap_err();
    assert!(matches!(err, RankMapError::Shape { expected: 12, got: 11 }));
    let err = renderer.render(&[0.0; 12], &[true; 3]).unwrap_err();
    assert!(matches!(err, RankMapError::Shape { expected: 4, got: 3 }));
}
