use ndarray::{Array2, ArrayBase, Data, Ix2};

/// Computes componentwise differences between each row of x and each row of y
/// resulting in a 2d array of shape (nrows(x) * nrows(y), ncols(x));
/// *Panics* if x and y have not the same column numbers
pub fn pairwise_differences(
    x: &ArrayBase<impl Data<Elem = f64>, Ix2>,
    y: &ArrayBase<impl Data<Elem = f64>, Ix2>,
) -> Array2<f64> {
    assert!(x.ncols() == y.ncols());

    let nx = x.nrows();
    let ny = y.nrows();
    let ncols = x.ncols();
    let mut result = Array2::zeros((nx * ny, ncols));

    for (i, x_row) in x.rows().into_iter().enumerate() {
        for (j, y_row) in y.rows().into_iter().enumerate() {
            let idx = i * ny + j;
            for k in 0..ncols {
                result[[idx, k]] = x_row[k] - y_row[k];
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_pairwise_differences() {
        let x = array![[-0.9486833], [-0.82219219]];
        let y = array![[-1.26491106], [-0.63245553], [0.], [0.63245553]];
        assert_abs_diff_eq!(
            &array![
                [0.31622776],
                [-0.31622777],
                [-0.9486833],
                [-1.58113883],
                [0.44271887],
                [-0.18973666],
                [-0.82219219],
                [-1.45464772],
            ],
            &pairwise_differences(&x, &y),
            epsilon = 1e-6
        )
    }

    #[test]
    fn test_pairwise_differences_shape() {
        let x = array![[1., 2., 3.], [4., 5., 6.]];
        let y = array![[0., 0., 0.], [1., 1., 1.], [2., 2., 2.]];
        let d = pairwise_differences(&x, &y);
        assert_eq!(d.shape(), &[6, 3]);
        assert_abs_diff_eq!(d.row(4).to_owned(), array![3., 4., 5.], epsilon = 1e-12);
    }
}
