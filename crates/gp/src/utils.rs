use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Data, Ix1, Ix2};

/// Repeats the row `x` `n` times resulting in a 2d array of shape (n, len(x)).
/// Together with the other point set used as is, it gives the index-aligned
/// pairs `(x, y_j)` a kernel is evaluated on.
pub fn repeat_row<F: Float>(x: &ArrayView1<F>, n: usize) -> Array2<F> {
    Array2::from_shape_fn((n, x.len()), |(_, k)| x[k])
}

/// Computes rows of x paired with every row of y
/// resulting in two 2d arrays of shape (nrows(x) * nrows(y), ncols(x))
/// where pair `i * nrows(y) + j` is `(x_i, y_j)`.
/// *Panics* if x and y have not the same column numbers
pub fn pairwise_rows<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> (Array2<F>, Array2<F>) {
    assert!(x.ncols() == y.ncols());

    let nx = x.nrows();
    let ny = y.nrows();
    let ncols = x.ncols();
    let x1 = Array2::from_shape_fn((nx * ny, ncols), |(idx, k)| x[[idx / ny, k]]);
    let x2 = Array2::from_shape_fn((nx * ny, ncols), |(idx, k)| y[[idx % ny, k]]);
    (x1, x2)
}

/// Checks that two point sets share the same dimension
pub(crate) fn check_same_dim<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<()> {
    if x.ncols() != y.ncols() {
        return Err(GpError::DimensionMismatch(format!(
            "conflicting number of dimensions for point sets ({} vs {})",
            x.ncols(),
            y.ncols()
        )));
    }
    Ok(())
}

/// Checks point set and values are consistent training data
pub(crate) fn check_training_data<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    f: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> Result<()> {
    if x.nrows() != f.len() {
        return Err(GpError::InvalidValueError(format!(
            "number of source points ({}) and source values ({}) differ",
            x.nrows(),
            f.len()
        )));
    }
    if x.nrows() == 0 {
        return Err(GpError::InvalidValueError(
            "at least one source point is required".to_string(),
        ));
    }
    Ok(())
}

/// Squared euclidean distance between two points
pub(crate) fn squared_distance<F: Float>(a: &ArrayView1<F>, b: &ArrayView1<F>) -> F {
    a.iter()
        .zip(b.iter())
        .fold(F::zero(), |acc, (ai, bi)| acc + (*ai - *bi) * (*ai - *bi))
}

/// Symmetric part `(a + a^t) / 2` of a square matrix
pub(crate) fn symmetrize<F: Float>(a: &Array2<F>) -> Array2<F> {
    (a + &a.t()).mapv(|v| v * F::cast(0.5))
}

/// Standard deviations from the diagonal of a covariance matrix,
/// round-off negative variances are taken as zero
pub(crate) fn diag_std<F: Float>(cov: &Array2<F>) -> Array1<F> {
    cov.diag().mapv(|v| if v > F::zero() { v.sqrt() } else { F::zero() })
}

#[inline(always)]
pub(crate) fn into_f64<F: Float>(v: F) -> f64 {
    v.to_f64().unwrap_or(f64::NAN)
}
