//! Miniature design-of-experiments layer backing acquisition restarts and
//! degenerate-acquisition fallbacks: latin hypercube and uniform random
//! sampling within a `(nx, 2)` bounds matrix.

use std::sync::{Arc, RwLock};

use ndarray::{Array, Array2, ArrayBase, Data, Ix2};
use ndarray_rand::RandomExt;
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::rand_distr::Uniform;
use rand_xoshiro::Xoshiro256Plus;

type RngRef<R> = Arc<RwLock<R>>;

/// A sampling method generating points within a design space.
///
/// The design space is given as a (nx, 2) matrix where the ith row is the
/// `[lower_bound, upper_bound]` of the ith component.
pub trait SamplingMethod {
    /// Design space definition
    fn sampling_space(&self) -> &Array2<f64>;

    /// Generate `ns` samples in `[0., 1.]^nx`
    fn normalized_sample(&self, ns: usize) -> Array2<f64>;

    /// Generate a (ns, nx) matrix of samples within the design space
    fn sample(&self, ns: usize) -> Array2<f64> {
        let xlimits = self.sampling_space();
        let lower = xlimits.column(0).to_owned();
        let width = &xlimits.column(1).to_owned() - &lower;
        self.normalized_sample(ns) * &width + &lower
    }
}

/// The Random design consists in drawing samples uniformly at random.
#[derive(Clone, Debug)]
pub struct Random<R: Rng> {
    xlimits: Array2<f64>,
    rng: RngRef<R>,
}

impl Random<Xoshiro256Plus> {
    /// Constructor given a (nx, 2) design space matrix.
    ///
    /// **Panics** if xlimits number of columns is different from 2.
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Self {
        Self::new_with_rng(xlimits, Xoshiro256Plus::from_entropy())
    }
}

impl<R: Rng> Random<R> {
    /// Constructor given a (nx, 2) design space matrix and a random generator
    /// for reproducibility.
    ///
    /// **Panics** if xlimits number of columns is different from 2.
    pub fn new_with_rng(xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>, rng: R) -> Self {
        if xlimits.ncols() != 2 {
            panic!("xlimits must have 2 columns (lower, upper)");
        }
        Random {
            xlimits: xlimits.to_owned(),
            rng: Arc::new(RwLock::new(rng)),
        }
    }

    /// Set random generator
    pub fn with_rng<R2: Rng>(self, rng: R2) -> Random<R2> {
        Random {
            xlimits: self.xlimits,
            rng: Arc::new(RwLock::new(rng)),
        }
    }
}

impl<R: Rng> SamplingMethod for Random<R> {
    fn sampling_space(&self) -> &Array2<f64> {
        &self.xlimits
    }

    fn normalized_sample(&self, ns: usize) -> Array2<f64> {
        let mut rng = self.rng.write().unwrap();
        let nx = self.xlimits.nrows();
        Array::random_using((ns, nx), Uniform::new(0., 1.), &mut *rng)
    }
}

/// Classic latin hypercube design: each dimension is cut into `ns` strata,
/// each stratum holds exactly one point, placed uniformly within it.
#[derive(Clone, Debug)]
pub struct Lhs<R: Rng> {
    xlimits: Array2<f64>,
    rng: RngRef<R>,
}

impl Lhs<Xoshiro256Plus> {
    /// Constructor given a (nx, 2) design space matrix.
    ///
    /// **Panics** if xlimits number of columns is different from 2.
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Self {
        Self::new_with_rng(xlimits, Xoshiro256Plus::from_entropy())
    }
}

impl<R: Rng> Lhs<R> {
    /// Constructor given a (nx, 2) design space matrix and a random generator
    /// for reproducibility.
    ///
    /// **Panics** if xlimits number of columns is different from 2.
    pub fn new_with_rng(xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>, rng: R) -> Self {
        if xlimits.ncols() != 2 {
            panic!("xlimits must have 2 columns (lower, upper)");
        }
        Lhs {
            xlimits: xlimits.to_owned(),
            rng: Arc::new(RwLock::new(rng)),
        }
    }

    /// Set random generator
    pub fn with_rng<R2: Rng>(self, rng: R2) -> Lhs<R2> {
        Lhs {
            xlimits: self.xlimits,
            rng: Arc::new(RwLock::new(rng)),
        }
    }
}

impl<R: Rng> SamplingMethod for Lhs<R> {
    fn sampling_space(&self) -> &Array2<f64> {
        &self.xlimits
    }

    fn normalized_sample(&self, ns: usize) -> Array2<f64> {
        let mut rng = self.rng.write().unwrap();
        let nx = self.xlimits.nrows();
        let mut samples = Array2::zeros((ns, nx));
        for j in 0..nx {
            let mut strata = (0..ns).collect::<Vec<_>>();
            strata.shuffle(&mut *rng);
            for (i, stratum) in strata.iter().enumerate() {
                let offset = rng.gen::<f64>();
                samples[[i, j]] = (*stratum as f64 + offset) / ns as f64;
            }
        }
        samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr2, Axis};

    #[test]
    fn test_random_within_bounds() {
        let xlimits = arr2(&[[5., 10.], [0., 1.]]);
        let samples = Random::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(42))
            .sample(50);
        assert_eq!(samples.shape(), &[50, 2]);
        for row in samples.rows() {
            assert!(row[0] >= 5. && row[0] <= 10.);
            assert!(row[1] >= 0. && row[1] <= 1.);
        }
    }

    #[test]
    fn test_lhs_stratification() {
        let xlimits = arr2(&[[0., 1.], [-2., 2.]]);
        let ns = 10;
        let samples = Lhs::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(0))
            .normalized_sample(ns);
        // one point per stratum in every dimension
        for j in 0..2 {
            let mut strata = samples
                .index_axis(Axis(1), j)
                .mapv(|v| (v * ns as f64).floor() as usize)
                .to_vec();
            strata.sort_unstable();
            assert_eq!(strata, (0..ns).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_lhs_deterministic_given_seed() {
        let xlimits = arr2(&[[-3., 3.], [-3., 3.]]);
        let s1 = Lhs::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(7))
            .sample(20);
        let s2 = Lhs::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(7))
            .sample(20);
        assert_eq!(s1, s2);
    }
}
