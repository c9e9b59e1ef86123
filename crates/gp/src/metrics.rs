//! Held-out quality metrics for trained surrogates.

use ndarray::{ArrayBase, Data, Ix1};

/// Root mean squared error between targets and predicted means.
/// *Panics* if the arrays differ in length or are empty.
pub fn rmse(
    y_true: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    y_pred: &ArrayBase<impl Data<Elem = f64>, Ix1>,
) -> f64 {
    assert!(!y_true.is_empty() && y_true.len() == y_pred.len());
    let sq = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(t, p)| (t - p) * (t - p))
        .sum::<f64>();
    (sq / y_true.len() as f64).sqrt()
}

/// Mean Gaussian predictive log-density of targets under predicted means and
/// variances. Higher is better; unlike [`rmse`] it rewards calibrated
/// uncertainty, not just accurate means.
/// *Panics* if the arrays differ in length or are empty.
pub fn mean_log_density(
    y_true: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    y_pred: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    var_pred: &ArrayBase<impl Data<Elem = f64>, Ix1>,
) -> f64 {
    assert!(!y_true.is_empty() && y_true.len() == y_pred.len() && y_true.len() == var_pred.len());
    let ll = y_true
        .iter()
        .zip(y_pred.iter())
        .zip(var_pred.iter())
        .map(|((t, p), v)| {
            -0.5 * (2. * std::f64::consts::PI * v).ln() - (t - p) * (t - p) / (2. * v)
        })
        .sum::<f64>();
    ll / y_true.len() as f64
}
