use approx::assert_relative_eq;
use rand::Rng;

use crate::clustering::distinct_rows;
use crate::config::SamplingStrategy;
use crate::core::SpectralCube;
use crate::error::RankMapError;
use crate::sampling::{
    coreset_distribution, sample_references, seeded_rng, CoresetSampler, ReferenceSampler,
    INIT_STREAM, SAMPLING_STREAM,
};
use crate::tests::test_data::{constant_cube, quadrant_cube};
use crate::tests::test_helpers::init;

#[test]
fn test_coreset_zero_variance_is_exactly_uniform() {
    init();
    let cube = constant_cube(2, 4, 3, 0.25);
    let p = coreset_distribution(&cube);
    assert_eq!(p.len(), 8);
    for &pi in &p {
        assert_eq!(pi, 1.0 / 8.0);
    }
}

#[test]
fn test_coreset_zero_variance_draws_pass_chi_squared() {
    init();
    let cube = constant_cube(2, 4, 3, 0.25);
    let mut rng = seeded_rng(7, SAMPLING_STREAM);
    let draws = 8000;
    let picks = CoresetSampler.draw(&cube, draws, &mut rng).unwrap();
    assert_eq!(picks.len(), draws);

    let mut counts = [0usize; 8];
    for i in picks {
        counts[i] += 1;
    }
    let expected = draws as f64 / 8.0;
    let chi2: f64 = counts
        .iter()
        .map(|&c| (c as f64 - expected).powi(2) / expected)
        .sum();
    // 7 degrees of freedom, 0.1% critical value
    assert!(chi2 < 24.32, "chi² = {chi2}, counts {counts:?}");
}

#[test]
fn test_coreset_distribution_favours_outliers() {
    let cube = SpectralCube::from_pixels(
        1,
        4,
        vec![
            vec![1.0, 1.0],
            vec![1.0, 1.0],
            vec![1.0, 1.0],
            vec![9.0, 1.0],
        ],
    )
    .unwrap();
    let p = coreset_distribution(&cube);
    assert_relative_eq!(p.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    assert!(p[3] > p[0]);
    // Uniform half keeps every pixel reachable
    assert!(p[0] >= 0.5 / 4.0 - 1e-12);
}

#[test]
fn test_references_are_foreground_and_bounded() {
    init();
    let cube = quadrant_cube();
    let cases = [
        (SamplingStrategy::Random, 6),
        (SamplingStrategy::Coreset, 6),
        (SamplingStrategy::KMeansPlusPlus, 3),
        (SamplingStrategy::KMeans, 3),
    ];
    for (strategy, count) in cases {
        let sampler = strategy.sampler();
        assert_eq!(sampler.strategy(), strategy);
        let mut rng = seeded_rng(3, SAMPLING_STREAM);
        let refs = sample_references(&cube, count, sampler.as_ref(), &mut rng).unwrap();
        assert!(refs.len() <= count, "{strategy}: {} > {count}", refs.len());
        for &r in &refs {
            assert!(r < cube.npixels());
            assert!(cube.is_foreground(r), "{strategy} kept background pixel {r}");
        }
    }
}

#[test]
fn test_kmeans_plus_plus_references_are_distinct_spectra() {
    let cube = quadrant_cube();
    let sampler = SamplingStrategy::KMeansPlusPlus.sampler();
    let mut rng = seeded_rng(11, SAMPLING_STREAM);
    let refs = sample_references(&cube, 3, sampler.as_ref(), &mut rng).unwrap();
    let spectra: Vec<&[f64]> = refs.iter().map(|&r| cube.pixel(r)).collect();
    assert_eq!(distinct_rows(&spectra), refs.len());
}

#[test]
fn test_kmeans_rejects_more_clusters_than_distinct_pixels() {
    let cube = quadrant_cube();
    for strategy in [SamplingStrategy::KMeans, SamplingStrategy::KMeansPlusPlus] {
        let sampler = strategy.sampler();
        let mut rng = seeded_rng(0, SAMPLING_STREAM);
        let err = sample_references(&cube, 4, sampler.as_ref(), &mut rng).unwrap_err();
        assert!(
            matches!(err, RankMapError::Configuration(_)),
            "{strategy}: {err}"
        );
    }
}

#[test]
fn test_all_background_image() {
    let cube = constant_cube(2, 2, 3, 0.0);

    let mut rng = seeded_rng(0, SAMPLING_STREAM);
    let random = SamplingStrategy::Random.sampler();
    let refs = sample_references(&cube, 5, random.as_ref(), &mut rng).unwrap();
    assert!(refs.is_empty());

    let kmeans = SamplingStrategy::KMeans.sampler();
    let err = sample_references(&cube, 1, kmeans.as_ref(), &mut rng).unwrap_err();
    assert!(matches!(err, RankMapError::DegenerateInput(_)));
}

#[test]
fn test_zero_reference_count_rejected() {
    let cube = quadrant_cube();
    let sampler = SamplingStrategy::Coreset.sampler();
    let mut rng = seeded_rng(0, SAMPLING_STREAM);
    let err = sample_references(&cube, 0, sampler.as_ref(), &mut rng).unwrap_err();
    assert!(matches!(err, RankMapError::Configuration(_)));
}

#[test]
fn test_sampling_is_deterministic_for_a_seed() {
    let cube = quadrant_cube();
    for strategy in [
        SamplingStrategy::Random,
        SamplingStrategy::Coreset,
        SamplingStrategy::KMeansPlusPlus,
        SamplingStrategy::KMeans,
    ] {
        let sampler = strategy.sampler();
        let a = sample_references(&cube, 3, sampler.as_ref(), &mut seeded_rng(21, SAMPLING_STREAM))
            .unwrap();
        let b = sample_references(&cube, 3, sampler.as_ref(), &mut seeded_rng(21, SAMPLING_STREAM))
            .unwrap();
        assert_eq!(a, b, "{strategy} is not reproducible");
    }
}

#[test]
fn test_rng_streams_are_independent() {
    let mut sampling = seeded_rng(5, SAMPLING_STREAM);
    let mut init = seeded_rng(5, INIT_STREAM);
    let a: u64 = sampling.random();
    let b: u64 = init.random();
    assert_ne!(a, b);
}
