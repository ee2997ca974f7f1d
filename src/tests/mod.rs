mod test_helpers;
mod test_loss;
mod test_render;
mod test_sampling;

/// Soft-rank strength used by the optimization tests; the default 0.005 is
/// too sharp for a 16-pixel image to move in 50 epochs.
pub const TEST_STRENGTH: f64 = 4.0;
