use approx::assert_relative_eq;

use crate::config::{EngineConfig, ObjectiveKind};
use crate::error::RankMapError;
use crate::loss::{
    spearman_correlation, LossInputs, MarginRankingLoss, Objective, RankObjective, SpearmanLoss,
};
use crate::ranking::TargetRanks;
use crate::tests::test_data::strip;

/// Three pixels, one reference: combined ranks `[0, 1, 2]`, weights `[0, 1, 4]`.
fn three_pixel_targets() -> TargetRanks {
    let cube = strip(vec![vec![1.0, 0.0], vec![2.0, 0.0], vec![0.0, 1.0]]);
    TargetRanks::build(&cube, &[0]).unwrap()
}

/// Four collinear-or-orthogonal pixels against the reference `[4, 0]`:
/// cosine ranks `[0, 1, 2, 3]`, combined ranks `[2, 1, 2, 3]`.
fn magnitude_targets() -> TargetRanks {
    let cube = strip(vec![
        vec![1.0, 0.0],
        vec![2.0, 0.0],
        vec![4.0, 0.0],
        vec![0.0, 1.0],
    ]);
    TargetRanks::build(&cube, &[2]).unwrap()
}

fn inputs<'a>(
    soft: &'a [f64],
    targets: &'a TargetRanks,
    mask: &'a [bool],
    embedding: &'a [f64],
) -> LossInputs<'a> {
    LossInputs {
        soft_ranks: soft,
        targets,
        mask,
        embedding,
        initial: embedding,
    }
}

// -------------------- margin ranking --------------------

#[test]
fn test_margin_loss_hand_computed() {
    let targets = three_pixel_targets();
    let soft = [1.0, 0.5, 1.0];
    let mask = [true; 3];
    let eval = MarginRankingLoss::default()
        .evaluate(&inputs(&soft, &targets, &mask, &[0.0; 3]))
        .unwrap();
    // (1 · 0.5 + 4 · 1) / 5
    assert_relative_eq!(eval.value, 0.9, epsilon = 1e-12);
    assert_relative_eq!(eval.rank_grad[0], 0.0);
    assert_relative_eq!(eval.rank_grad[1], -0.2, epsilon = 1e-12);
    assert_relative_eq!(eval.rank_grad[2], -0.8, epsilon = 1e-12);
    assert!(eval.embedding_grad.iter().all(|&g| g == 0.0));
}

#[test]
fn test_margin_loss_zero_when_soft_ranks_exceed_targets() {
    let targets = three_pixel_targets();
    let soft = [1.0, 2.0, 3.0];
    let mask = [true; 3];
    let eval = MarginRankingLoss::default()
        .evaluate(&inputs(&soft, &targets, &mask, &[0.0; 3]))
        .unwrap();
    assert_eq!(eval.value, 0.0);
    assert!(eval.rank_grad.iter().all(|&g| g == 0.0));
}

#[test]
fn test_margin_loss_ignores_background_rows() {
    // Background first: it takes no part in the ranking against pixel 1
    let cube = strip(vec![
        vec![0.0, 0.0],
        vec![1.0, 0.0],
        vec![2.0, 0.0],
        vec![0.0, 1.0],
    ]);
    let targets = TargetRanks::build(&cube, &[1]).unwrap();
    assert_eq!(targets.combined().column(0), vec![0, 0, 1, 2]);
    assert_eq!(targets.weights(), &[0.0, 0.0, 1.0, 4.0]);

    // a large soft rank on the background row changes nothing
    let soft = [7.0, 0.0, 0.0, 0.0];
    let mask = cube.foreground_mask();
    let eval = MarginRankingLoss::default()
        .evaluate(&inputs(&soft, &targets, &mask, &[0.0; 4]))
        .unwrap();
    assert_relative_eq!(eval.value, 9.0 / 5.0, epsilon = 1e-12);
    assert_eq!(eval.rank_grad[0], 0.0);
    assert_eq!(eval.rank_grad[1], 0.0);
    assert_relative_eq!(eval.rank_grad[2], -1.0 / 5.0, epsilon = 1e-12);
    assert_relative_eq!(eval.rank_grad[3], -4.0 / 5.0, epsilon = 1e-12);
}

#[test]
fn test_margin_loss_without_weight_mass_is_degenerate() {
    let targets = three_pixel_targets();
    let soft = [0.0; 3];
    let mask = [false; 3];
    let err = MarginRankingLoss::default()
        .evaluate(&inputs(&soft, &targets, &mask, &[0.0; 3]))
        .unwrap_err();
    assert!(matches!(err, RankMapError::DegenerateInput(_)));
}

#[test]
fn test_similarity_regularization_term() {
    let targets = three_pixel_targets();
    let soft = [1.0, 2.0, 3.0];
    let mask = [true; 3];
    let embedding = [1.0, 2.0];
    let initial = [0.0, 0.0];
    let loss = MarginRankingLoss {
        margin: 0.0,
        similarity_weight: 0.5,
    };
    let eval = loss
        .evaluate(&LossInputs {
            soft_ranks: &soft,
            targets: &targets,
            mask: &mask,
            embedding: &embedding,
            initial: &initial,
        })
        .unwrap();
    // 0.5 · mean(1, 4)
    assert_relative_eq!(eval.value, 1.25, epsilon = 1e-12);
    assert_relative_eq!(eval.embedding_grad[0], 0.5, epsilon = 1e-12);
    assert_relative_eq!(eval.embedding_grad[1], 1.0, epsilon = 1e-12);
}

#[test]
fn test_shape_mismatch_rejected() {
    let targets = three_pixel_targets();
    let mask = [true; 3];
    let err = MarginRankingLoss::default()
        .evaluate(&inputs(&[0.0; 2], &targets, &mask, &[0.0; 3]))
        .unwrap_err();
    assert!(matches!(err, RankMapError::Shape { .. }));
}

// -------------------- spearman --------------------

#[test]
fn test_spearman_perfect_agreement() {
    let targets = three_pixel_targets();
    let soft = [1.0, 2.0, 3.0];
    let mask = [true; 3];
    let eval = SpearmanLoss
        .evaluate(&inputs(&soft, &targets, &mask, &[0.0; 3]))
        .unwrap();
    assert_relative_eq!(eval.value, -1.0, epsilon = 1e-12);
    for g in eval.rank_grad {
        assert!(g.abs() < 1e-12);
    }
}

#[test]
fn test_spearman_targets_cosine_ranks_only() {
    // Intentional asymmetry: the Spearman objective ignores the Chebyshev
    // half of the combined target that the margin objective uses.
    let targets = magnitude_targets();
    let mask = [true; 4];
    let embedding = [0.0; 4];

    let cosine_order = [1.0, 2.0, 3.0, 4.0];
    let spearman = SpearmanLoss
        .evaluate(&inputs(&cosine_order, &targets, &mask, &embedding))
        .unwrap();
    assert_relative_eq!(spearman.value, -1.0, epsilon = 1e-12);

    let combined_order = [3.0, 2.0, 3.0, 4.0];
    let spearman_combined = SpearmanLoss
        .evaluate(&inputs(&combined_order, &targets, &mask, &embedding))
        .unwrap();
    assert!(spearman_combined.value > -0.99);

    // The margin objective sees a violation where Spearman sees none
    let margin = MarginRankingLoss::default()
        .evaluate(&inputs(&cosine_order, &targets, &mask, &embedding))
        .unwrap();
    assert!(margin.value > 0.0);
}

#[test]
fn test_spearman_constant_column_contributes_zero() {
    let targets = three_pixel_targets();
    let soft = [2.0, 2.0, 2.0];
    let mask = [true; 3];
    let eval = SpearmanLoss
        .evaluate(&inputs(&soft, &targets, &mask, &[0.0; 3]))
        .unwrap();
    assert_eq!(eval.value, 0.0);
    assert!(eval.rank_grad.iter().all(|&g| g == 0.0));
}

#[test]
fn test_spearman_gradient_matches_finite_differences() {
    let targets = magnitude_targets();
    let mask = [true, true, false, true];
    let embedding = [0.0; 4];
    let soft = [1.0, 3.0, 2.0, 4.5];
    let eval = SpearmanLoss
        .evaluate(&inputs(&soft, &targets, &mask, &embedding))
        .unwrap();
    assert_eq!(eval.rank_grad[2], 0.0);

    let h = 1e-6;
    for i in 0..4 {
        let mut plus = soft;
        plus[i] += h;
        let mut minus = soft;
        minus[i] -= h;
        let up = SpearmanLoss
            .evaluate(&inputs(&plus, &targets, &mask, &embedding))
            .unwrap()
            .value;
        let down = SpearmanLoss
            .evaluate(&inputs(&minus, &targets, &mask, &embedding))
            .unwrap()
            .value;
        assert_relative_eq!(eval.rank_grad[i], (up - down) / (2.0 * h), epsilon = 1e-6);
    }
}

#[test]
fn test_spearman_correlation_helper() {
    assert_relative_eq!(
        spearman_correlation(&[1.0, 5.0, 3.0], &[10.0, 50.0, 30.0]),
        1.0,
        epsilon = 1e-12
    );
    assert_relative_eq!(
        spearman_correlation(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]),
        -1.0,
        epsilon = 1e-12
    );
}

// -------------------- dispatch --------------------

#[test]
fn test_objective_from_config() {
    let config = EngineConfig {
        similarity_regularization: 0.25,
        ..Default::default()
    };
    let objective = Objective::from_config(&config);
    assert_eq!(objective.kind(), ObjectiveKind::MarginRanking);
    assert_eq!(objective.name(), "margin-ranking");
    match objective {
        Objective::MarginRanking(loss) => {
            assert_eq!(loss.similarity_weight, 0.25);
            assert_eq!(loss.margin, 0.0);
        }
        Objective::Spearman(_) => panic!("expected margin ranking"),
    }

    let spearman = Objective::from_config(&EngineConfig {
        objective: ObjectiveKind::Spearman,
        ..Default::default()
    });
    assert_eq!(spearman.name(), "spearman");
}
