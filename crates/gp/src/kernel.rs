//! Correlation kernels over latent-space inputs.
//!
//! The surrogate only needs a stationary kernel; the squared exponential is
//! the default and matches the smoothness of generative latent embeddings.

use ndarray::{Array1, ArrayBase, Data, Ix1, Ix2};
use std::fmt;

/// A trait for using a correlation model in sparse GP regression
pub trait CorrelationModel: Clone + Copy + Default + fmt::Display + Sync + Send {
    /// Compute correlation values r(x, x') given componentwise distances `d`
    /// between x and x' as a (n, xdim) matrix and inverse length-scales
    /// `theta` (xdim values). Returns n correlation values.
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Array1<f64>;
}

/// Squared exponential correlation model
///
///   d
/// prod exp( - (theta_j * d_j)^2 / 2 )
///  j=1
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SquaredExponentialCorr();

impl CorrelationModel for SquaredExponentialCorr {
    fn value(
        &self,
        d: &ArrayBase<impl Data<Elem = f64>, Ix2>,
        theta: &ArrayBase<impl Data<Elem = f64>, Ix1>,
    ) -> Array1<f64> {
        let theta2 = theta.mapv(|v| v * v);
        let r = d.mapv(|v| v * v).dot(&theta2);
        r.mapv(|v| (-0.5 * v).exp())
    }
}

impl fmt::Display for SquaredExponentialCorr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SquaredExponential")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_squared_exponential_at_zero_distance() {
        let corr = SquaredExponentialCorr::default();
        let d = array![[0., 0.], [1., 0.]];
        let theta = array![2., 2.];
        let r = corr.value(&d, &theta);
        assert_abs_diff_eq!(r[0], 1., epsilon = 1e-12);
        assert_abs_diff_eq!(r[1], (-2.0_f64).exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_squared_exponential_monotone_in_distance() {
        let corr = SquaredExponentialCorr::default();
        let d = array![[0.1], [0.5], [1.0], [2.0]];
        let theta = array![1.];
        let r = corr.value(&d, &theta);
        assert!(r[0] > r[1] && r[1] > r[2] && r[2] > r[3]);
    }
}
