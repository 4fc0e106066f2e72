use crate::errors::{GpError, Result};
use crate::kernels::{check_kernel_dim, Kernel, KernelModel};
use crate::parameters::{McmcValidParams, OptimizeValidParams};
use crate::tuning::{self, KernelChain, TunedKernel};
use crate::utils::{check_same_dim, check_training_data, diag_std, repeat_row, symmetrize};

use linfa::Float;
use linfa_linalg::{cholesky::*, eigh::*, triangular::*};
use ndarray::{Array1, Array2, ArrayBase, ArrayView1, Axis, Data, Ix1, Ix2, Zip};
use ndarray_rand::rand::{Rng, SeedableRng};
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use ndarray_stats::QuantileExt;
use rand_xoshiro::Xoshiro256Plus;

use log::debug;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::time::Instant;

/// Eigenvalues of a sampled correlation matrix above `-RVS_EIGEN_RTOL * max eigenvalue`
/// are considered as round-off and clamped to zero
pub const RVS_EIGEN_RTOL: f64 = 1e-6;
/// Variances below `RVS_ZERO_VARIANCE_RTOL * max variance` are considered as zero when sampling
pub const RVS_ZERO_VARIANCE_RTOL: f64 = 1e-10;

/// A trait for Gaussian process interpolation engines.
///
/// An engine owns its kernel and computes, given source points `source_x` (ns, nx)
/// with observed values `source_f` (ns,), predictions and conditioned distributions
/// at target points `target_x` (nt, nx).
///
/// Hyperparameter inference ([`GpInterpolator::optimize_kernel`], [`GpInterpolator::sample_kernel`])
/// never modifies the engine: results are returned and the caller may commit
/// a tuned kernel with [`GpInterpolator::set_kernel`].
pub trait GpInterpolator<F: Float>: Clone + Sync {
    /// Kernel type of the GP prior
    type Kernel: KernelModel<F>;
    /// Precomputed representation of the source data used by [`GpInterpolator::predict`].
    /// It is no longer valid once the kernel is modified.
    type Compressed;

    /// GP prior kernel
    fn kernel(&self) -> &Self::Kernel;

    /// Mutable access to the GP prior kernel
    fn kernel_mut(&mut self) -> &mut Self::Kernel;

    /// Replace the GP prior kernel
    fn set_kernel(&mut self, kernel: Self::Kernel) {
        *self.kernel_mut() = kernel;
    }

    /// Precompute what is needed to predict at any target given the source data
    fn compress(
        &self,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<Self::Compressed>;

    /// Conditioned mean (nt,) at targets given a compressed representation of the sources
    fn predict(
        &self,
        target_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        compressed: &Self::Compressed,
    ) -> Result<Array1<F>>;

    /// Conditioned mean (nt,) and covariance (nt, nt) at targets given the source data
    fn condition(
        &self,
        target_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<(Array1<F>, Array2<F>)>;

    /// Marginal log-likelihood of the source data under the GP prior
    fn loglikelihood(
        &self,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<F>;

    /// Draw `n` independent realizations (n, nt) of the conditioned process at targets
    fn rvs_with_rng<R: Rng>(
        &self,
        target_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
        n: usize,
        rng: &mut R,
    ) -> Result<Array2<F>> {
        let (mean, cov) = self.condition(target_x, source_x, source_f)?;
        sample_conditioned(&mean, &cov, n, rng)
    }

    /// Draw `n` independent realizations (n, nt) of the conditioned process at targets
    /// using an entropy seeded random generator
    fn rvs(
        &self,
        target_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
        n: usize,
    ) -> Result<Array2<F>> {
        let mut rng = Xoshiro256Plus::from_entropy();
        self.rvs_with_rng(target_x, source_x, source_f, n, &mut rng)
    }

    /// Maximize the marginal likelihood of the source data with respect to the kernel parameters
    fn optimize_kernel(
        &self,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
        params: &OptimizeValidParams<F>,
    ) -> Result<TunedKernel<F, Self::Kernel>> {
        tuning::optimize_kernel(
            self,
            &source_x.view(),
            &source_f.view(),
            |_: &ArrayView1<F>| F::zero(),
            params,
        )
    }

    /// Maximize the marginal likelihood plus `logprior` with respect to the kernel parameters
    fn optimize_kernel_with_prior<P>(
        &self,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
        logprior: P,
        params: &OptimizeValidParams<F>,
    ) -> Result<TunedKernel<F, Self::Kernel>>
    where
        P: Fn(&ArrayView1<F>) -> F + Sync,
    {
        tuning::optimize_kernel(self, &source_x.view(), &source_f.view(), logprior, params)
    }

    /// Sample the kernel parameters posterior given the source data with an ensemble MCMC
    fn sample_kernel(
        &self,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
        params: &McmcValidParams<F>,
    ) -> Result<KernelChain<F>> {
        tuning::sample_kernel(
            self,
            &source_x.view(),
            &source_f.view(),
            |_: &ArrayView1<F>| F::zero(),
            params,
        )
    }

    /// Sample the kernel parameters posterior (likelihood times `exp(logprior)`)
    /// given the source data with an ensemble MCMC
    fn sample_kernel_with_prior<P>(
        &self,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
        logprior: P,
        params: &McmcValidParams<F>,
    ) -> Result<KernelChain<F>>
    where
        P: Fn(&ArrayView1<F>) -> F + Sync,
    {
        tuning::sample_kernel(self, &source_x.view(), &source_f.view(), logprior, params)
    }
}

/// Exact Gaussian process interpolator.
///
/// The interpolated function is modeled as a zero-mean Gaussian process whose
/// covariance is given by the kernel `k`:
///
/// `f(x) ~ GP(0, k(x, x'))`
///
/// Conditioned on observations `f_s` at sources `X_s`, the process at targets `X_t` is
/// Gaussian with (Rasmussen & Williams, eq. 2.19)
///
/// * `mean = K_ts K_ss^-1 f_s`
/// * `cov = K_tt - K_ts K_ss^-1 K_st`
///
/// # Implementation
///
/// * `K_ss` is factorized once per call with a Cholesky decomposition, a covariance which
///   is not positive definite is reported as an error. No nugget is added: noisy data
///   are handled by combining the kernel with a [`WhiteNoiseKernel`](crate::WhiteNoiseKernel).
/// * Every operation costs O(n^3) in the number of sources, see
///   [`NearestNeighborInterpolator`](crate::NearestNeighborInterpolator) for large data sets.
///
/// # Example
///
/// ```
/// use mgpi_gp::{GpInterpolator, Interpolator, Kernel};
/// use ndarray::{array, Array, Axis};
///
/// let xs = array![[0.], [1.], [2.], [3.5], [5.]];
/// let fs = xs.column(0).mapv(f64::sin);
///
/// let gp = Interpolator::new(Kernel::squared_exponential(1., &[1.5]).unwrap());
///
/// let compressed = gp.compress(&xs, &fs).unwrap();
/// let xt = Array::linspace(0., 5., 11).insert_axis(Axis(1));
/// let mean = gp.predict(&xt, &xs, &compressed).unwrap();
///
/// let (same_mean, cov) = gp.condition(&xt, &xs, &fs).unwrap();
/// assert!((mean[0] - same_mean[0]).abs() < 1e-8);
/// assert!(cov[[0, 0]].abs() < 1e-8);
/// ```
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "K: Serialize", deserialize = "K: Deserialize<'de>"))
)]
pub struct Interpolator<F: Float, K: KernelModel<F> = Kernel<F>> {
    /// GP prior kernel
    kernel: K,
    #[cfg_attr(feature = "serializable", serde(skip))]
    phantom: PhantomData<F>,
}

impl<F: Float, K: KernelModel<F>> fmt::Display for Interpolator<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Interpolator(kernel={})", self.kernel)
    }
}

impl<F: Float, K: KernelModel<F>> Interpolator<F, K> {
    /// Constructor given the GP prior kernel
    pub fn new(kernel: K) -> Self {
        Interpolator {
            kernel,
            phantom: PhantomData,
        }
    }

    /// Covariance matrix (nx, ny) between points `x` (nx, dim) and `y` (ny, dim).
    ///
    /// Rows of `x` are processed in parallel, each one being paired with every row of `y`
    /// and evaluated with one kernel call.
    pub fn pairwise_covariance(
        &self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        pairwise_covariance(&self.kernel, x, y)
    }
}

/// See [`Interpolator::pairwise_covariance`]
pub(crate) fn pairwise_covariance<F: Float, K: KernelModel<F>>(
    kernel: &K,
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<Array2<F>> {
    check_kernel_dim(kernel, x, y)?;
    let (x, y) = (x.view(), y.view());
    let mut cov = Array2::zeros((x.nrows(), y.nrows()));
    Zip::from(cov.rows_mut())
        .and(x.rows())
        .par_for_each(|mut row, xi| {
            let xs = repeat_row(&xi, y.nrows());
            row.assign(&kernel.value(&xs, &y));
        });
    Ok(cov)
}

/// Lower Cholesky factor of a covariance matrix
pub(crate) fn cholesky<F: Float>(cov: &Array2<F>) -> Result<Array2<F>> {
    let chol = cov.cholesky().map_err(|err| {
        GpError::NotPositiveDefinite(format!("Cholesky factorization failed: {err}"))
    })?;
    if chol.diag().iter().any(|v| !(*v > F::zero() && v.is_finite())) {
        return Err(GpError::NotPositiveDefinite(
            "Cholesky factor has a non positive diagonal".to_string(),
        ));
    }
    Ok(chol)
}

/// Solves `K x = b` given `chol` the lower Cholesky factor of `K`
pub(crate) fn cho_solve<F: Float>(
    chol: &Array2<F>,
    b: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<Array2<F>> {
    let y = chol.solve_triangular(b, UPLO::Lower)?;
    Ok(chol.t().solve_triangular_into(y, UPLO::Upper)?)
}

/// `log|K|` given `chol` the lower Cholesky factor of `K`
pub(crate) fn cho_logdet<F: Float>(chol: &Array2<F>) -> F {
    chol.diag().mapv(|v| v.ln()).sum() * F::cast(2.)
}

fn check_source_target<F: Float>(
    target_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> Result<()> {
    check_training_data(source_x, source_f)?;
    check_same_dim(target_x, source_x)
}

impl<F: Float, K: KernelModel<F>> GpInterpolator<F> for Interpolator<F, K> {
    type Kernel = K;
    type Compressed = Array1<F>;

    fn kernel(&self) -> &K {
        &self.kernel
    }

    fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    /// Solves `K_ss c = f_s` resulting in the weights `c` (ns,) of the sources
    fn compress(
        &self,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<Array1<F>> {
        check_training_data(source_x, source_f)?;
        let now = Instant::now();
        let k_ss = self.pairwise_covariance(source_x, source_x)?;
        let chol = cholesky(&k_ss)?;
        let weights = cho_solve(&chol, &source_f.view().insert_axis(Axis(1)))?;
        debug!(
            "Interpolator compress {} sources in {:?}",
            source_x.nrows(),
            now.elapsed()
        );
        Ok(weights.remove_axis(Axis(1)))
    }

    fn predict(
        &self,
        target_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        compressed: &Array1<F>,
    ) -> Result<Array1<F>> {
        check_source_target(target_x, source_x, compressed)?;
        let k_ts = self.pairwise_covariance(target_x, source_x)?;
        Ok(k_ts.dot(compressed))
    }

    fn condition(
        &self,
        target_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<(Array1<F>, Array2<F>)> {
        check_source_target(target_x, source_x, source_f)?;
        let now = Instant::now();
        let k_tt = self.pairwise_covariance(target_x, target_x)?;
        let k_ts = self.pairwise_covariance(target_x, source_x)?;
        let k_ss = self.pairwise_covariance(source_x, source_x)?;
        let chol = cholesky(&k_ss)?;

        // V = L^-1 K_st, y = L^-1 f
        let v = chol.solve_triangular(&k_ts.t(), UPLO::Lower)?;
        let y = chol.solve_triangular(&source_f.view().insert_axis(Axis(1)), UPLO::Lower)?;
        let mean = v.t().dot(&y).remove_axis(Axis(1));
        let cov = k_tt - v.t().dot(&v);
        debug!(
            "Interpolator condition {} targets on {} sources in {:?}",
            target_x.nrows(),
            source_x.nrows(),
            now.elapsed()
        );
        Ok((mean, cov))
    }

    ///   log p(f) = -1/2 f^t K^-1 f - 1/2 log|K| - n/2 log(2 pi)
    fn loglikelihood(
        &self,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<F> {
        check_training_data(source_x, source_f)?;
        let k_ss = self.pairwise_covariance(source_x, source_x)?;
        let chol = cholesky(&k_ss)?;
        let y = chol.solve_triangular(&source_f.view().insert_axis(Axis(1)), UPLO::Lower)?;
        let quad = y.mapv(|v| v * v).sum();
        let logdet = cho_logdet(&chol);
        let n = F::cast(source_f.len());
        let half = F::cast(0.5);
        let ll = -half * quad - half * logdet - half * n * F::cast(std::f64::consts::TAU.ln());
        if !ll.is_finite() {
            return Err(GpError::LikelihoodComputationError(format!(
                "non finite log-likelihood {ll}"
            )));
        }
        Ok(ll)
    }
}

/// Draw `n` realizations (n, m) of the gaussian distribution of given mean (m,)
/// and covariance (m, m).
///
/// The covariance is rescaled to a correlation matrix by the standard deviations which
/// is decomposed with eigenvalues, coordinates with zero variance (up to round-off,
/// see [`RVS_ZERO_VARIANCE_RTOL`]) are set to the mean.
pub fn sample_conditioned<F: Float, R: Rng>(
    mean: &Array1<F>,
    cov: &Array2<F>,
    n: usize,
    rng: &mut R,
) -> Result<Array2<F>> {
    let m = mean.len();
    if cov.dim() != (m, m) {
        return Err(GpError::DimensionMismatch(format!(
            "covariance shape {:?} does not match mean length {}",
            cov.dim(),
            m
        )));
    }
    let scales = diag_std(cov);
    let max_var = scales.iter().fold(F::zero(), |acc, s| acc.max(*s * *s));
    let min_var = F::cast(RVS_ZERO_VARIANCE_RTOL) * max_var;
    let active: Vec<usize> = (0..m)
        .filter(|&i| scales[i] > F::zero() && scales[i] * scales[i] > min_var)
        .collect();
    let mut draws = Array2::from_shape_fn((n, m), |(_, j)| mean[j]);
    if active.is_empty() || n == 0 {
        return Ok(draws);
    }

    let na = active.len();
    let corr = Array2::from_shape_fn((na, na), |(a, b)| {
        let (i, j) = (active[a], active[b]);
        cov[[i, j]] / (scales[i] * scales[j])
    });
    let (eigvals, eigvecs) = symmetrize(&corr).eigh_into()?;
    let lmax = *eigvals.max().map_err(|err| {
        GpError::NotPositiveDefinite(format!("undefined correlation eigenvalues: {err}"))
    })?;
    let tol = F::cast(RVS_EIGEN_RTOL) * lmax.max(F::zero());
    if let Some(lambda) = eigvals.iter().find(|&&l| l < -tol) {
        return Err(GpError::NotPositiveDefinite(format!(
            "correlation matrix has a negative eigenvalue {lambda} (max eigenvalue {lmax})"
        )));
    }
    let sqrt_eigvals = eigvals.mapv(|l| if l > F::zero() { l.sqrt() } else { F::zero() });
    let c = &eigvecs * &sqrt_eigvals;

    let z = Array2::<f64>::random_using((na, n), StandardNormal, rng).mapv(|v| F::cast(v));
    let corr_draws = c.dot(&z);
    for (a, &i) in active.iter().enumerate() {
        let scale = scales[i];
        draws
            .column_mut(i)
            .zip_mut_with(&corr_draws.row(a), |d, v| *d = *d + scale * *v);
    }
    Ok(draws)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::{MaternKernel, SquaredExponentialKernel, WhiteNoiseKernel};
    use crate::CombinedKernel;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, concatenate, Array};
    use paste::paste;

    fn xsinx(x: &Array2<f64>) -> Array1<f64> {
        ((x - 3.5) * ((x - 3.5) / std::f64::consts::PI).mapv(|v| v.sin())).remove_axis(Axis(1))
    }

    fn training_data() -> (Array2<f64>, Array1<f64>) {
        let xt = array![[0.0], [5.0], [10.0], [15.0], [18.0], [20.0], [25.0]];
        let yt = xsinx(&xt);
        (xt, yt)
    }

    macro_rules! test_interpolation {
        ($name:ident, $kernel:expr) => {
            paste! {
                #[test]
                fn [<test_ $name _interpolates_sources>]() {
                    let (xt, yt) = training_data();
                    let gp = Interpolator::new(Kernel::from($kernel));
                    let compressed = gp.compress(&xt, &yt).unwrap();
                    let pred = gp.predict(&xt, &xt, &compressed).unwrap();
                    assert_abs_diff_eq!(pred, yt, epsilon = 1e-6);

                    let xtest = Array::linspace(0., 25., 26).insert_axis(Axis(1));
                    let (mean, cov) = gp.condition(&xtest, &xt, &yt).unwrap();
                    let pred = gp.predict(&xtest, &xt, &compressed).unwrap();
                    assert_abs_diff_eq!(mean, pred, epsilon = 1e-6);
                    assert_abs_diff_eq!(cov.t(), cov.view(), epsilon = 1e-8);
                    // variance vanishes at sources
                    assert_abs_diff_eq!(cov[[0, 0]], 0., epsilon = 1e-6);
                    assert_abs_diff_eq!(cov[[5, 5]], 0., epsilon = 1e-6);
                    assert!(cov.diag().iter().all(|v| *v > -1e-6));
                    // bounded by the prior variance
                    assert!(cov.diag().iter().all(|v| *v <= 100. + 1e-6));
                }
            }
        };
    }

    test_interpolation!(
        squared_exponential,
        SquaredExponentialKernel::new(10., &[5.]).unwrap()
    );
    test_interpolation!(matern, MaternKernel::new(2.5, 10., &[5.]).unwrap());

    #[test]
    fn test_pairwise_covariance_matches_kernel_cov() {
        let kernel = Kernel::combined(vec![
            Kernel::matern(1.5, 1.3, &[0.5, 2.]).unwrap(),
            Kernel::white_noise(0.1),
        ])
        .unwrap();
        let gp = Interpolator::new(kernel);
        let x = array![[0., 0.], [1., 0.5], [0.3, -2.], [0., 0.]];
        let y = array![[0., 0.], [2., 1.]];
        assert_abs_diff_eq!(
            gp.pairwise_covariance(&x, &y).unwrap(),
            gp.kernel().cov(&x, &y).unwrap(),
            epsilon = 1e-14
        );
        assert!(matches!(
            gp.pairwise_covariance(&x, &array![[0.]]),
            Err(GpError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_loglikelihood_two_points() {
        let kernel = SquaredExponentialKernel::new(1., &[1.]).unwrap();
        let gp = Interpolator::new(kernel);
        let x = array![[0.], [1.]];
        let f = array![1., -0.5];
        let rho = f64::exp(-1.);
        let det = 1. - rho * rho;
        let quad = (f[0] * f[0] - 2. * rho * f[0] * f[1] + f[1] * f[1]) / det;
        let expected = -0.5 * quad - 0.5 * det.ln() - std::f64::consts::TAU.ln();
        assert_abs_diff_eq!(gp.loglikelihood(&x, &f).unwrap(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_loglikelihood_sources_permutation() {
        let (xt, yt) = training_data();
        let gp = Interpolator::new(SquaredExponentialKernel::new(10., &[5.]).unwrap());
        let perm = [3, 0, 6, 1, 5, 2, 4];
        let xp = xt.select(Axis(0), &perm);
        let yp = yt.select(Axis(0), &perm);
        assert_abs_diff_eq!(
            gp.loglikelihood(&xt, &yt).unwrap(),
            gp.loglikelihood(&xp, &yp).unwrap(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_condition_at_middle_source() {
        let gp = Interpolator::new(SquaredExponentialKernel::new(1., &[1.]).unwrap());
        let x = array![[0.], [1.], [2.]];
        let f = array![0., 1., 0.];
        let compressed = gp.compress(&x, &f).unwrap();
        let pred = gp.predict(&array![[1.]], &x, &compressed).unwrap();
        assert_abs_diff_eq!(pred, array![1.], epsilon = 1e-10);
        let (mean, cov) = gp.condition(&array![[1.]], &x, &f).unwrap();
        assert_abs_diff_eq!(mean, array![1.], epsilon = 1e-10);
        assert_abs_diff_eq!(cov[[0, 0]], 0., epsilon = 1e-10);
    }

    #[test]
    fn test_not_positive_definite() {
        // duplicated sources without noise
        let gp = Interpolator::new(SquaredExponentialKernel::new(1., &[1.]).unwrap());
        let x = array![[0.], [0.], [1.]];
        let f = array![1., 1., 0.];
        assert!(matches!(
            gp.compress(&x, &f),
            Err(GpError::NotPositiveDefinite(_))
        ));
        assert!(matches!(
            gp.loglikelihood(&x, &f),
            Err(GpError::NotPositiveDefinite(_))
        ));
        // white noise makes nearly duplicated sources positive definite
        let noisy = Interpolator::new(
            CombinedKernel::new(vec![
                Kernel::squared_exponential(1., &[1.]).unwrap(),
                Kernel::white_noise(0.1),
            ])
            .unwrap(),
        );
        let x = array![[0.], [1e-9], [1.]];
        assert!(noisy.compress(&x, &f).is_ok());
    }

    #[test]
    fn test_white_noise_conditioning() {
        let gp = Interpolator::new(WhiteNoiseKernel::new(0.5));
        let xs = array![[0.], [1.]];
        let fs = array![2., 3.];
        let xt = array![[1.], [0.5]];
        let (mean, cov) = gp.condition(&xt, &xs, &fs).unwrap();
        assert_abs_diff_eq!(mean, array![3., 0.], epsilon = 1e-12);
        assert_abs_diff_eq!(cov, array![[0., 0.], [0., 0.25]], epsilon = 1e-12);
    }

    #[test]
    fn test_bad_inputs() {
        let (xt, yt) = training_data();
        let gp = Interpolator::new(SquaredExponentialKernel::new(1., &[1.]).unwrap());
        assert!(matches!(
            gp.compress(&xt, &yt.slice(ndarray::s![1..])),
            Err(GpError::InvalidValueError(_))
        ));
        let xt2 = concatenate![Axis(1), xt, xt];
        assert!(matches!(
            gp.condition(&xt2, &xt, &yt),
            Err(GpError::DimensionMismatch(_))
        ));
        assert!(matches!(
            gp.loglikelihood(&xt2, &yt),
            Err(GpError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn test_set_kernel() {
        let mut gp = Interpolator::new(Kernel::squared_exponential(1., &[1.]).unwrap());
        gp.set_kernel(Kernel::white_noise(2.));
        assert_eq!("Interpolator(kernel=WhiteNoiseKernel(sigma=2.000e0))", gp.to_string());
        gp.kernel_mut().update(&[("sigma", 3.)]).unwrap();
        assert_eq!(array![3.], gp.kernel().params());
    }

    #[test]
    fn test_rvs_statistics() {
        let (xt, yt) = training_data();
        let gp = Interpolator::new(SquaredExponentialKernel::new(10., &[5.]).unwrap());
        let xtest = array![[2.5], [5.], [7.5], [12.]];
        let (mean, cov) = gp.condition(&xtest, &xt, &yt).unwrap();

        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let n = 20000;
        let draws = gp.rvs_with_rng(&xtest, &xt, &yt, n, &mut rng).unwrap();
        assert_eq!((n, 4), draws.dim());
        let emp_mean = draws.mean_axis(Axis(0)).unwrap();
        let stds = cov.diag().mapv(|v| v.max(0.).sqrt());
        for i in [0, 2, 3] {
            assert_abs_diff_eq!(emp_mean[i], mean[i], epsilon = 5. * stds[i] / (n as f64).sqrt());
        }
        // zero variance at a source
        assert!(cov[[1, 1]] < 1e-10);
        let centered = &draws - &emp_mean;
        let emp_cov = centered.t().dot(&centered) / (n as f64 - 1.);
        assert_abs_diff_eq!(emp_cov[[0, 0]], cov[[0, 0]], epsilon = 0.1 * cov[[0, 0]]);
        assert_abs_diff_eq!(emp_cov[[2, 3]], cov[[2, 3]], epsilon = 0.1 * cov[[3, 3]].max(cov[[2, 2]]));
    }

    #[test]
    fn test_sample_conditioned_degenerate() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let mean = array![1., 2.];
        let draws = sample_conditioned(&mean, &Array2::zeros((2, 2)), 3, &mut rng).unwrap();
        assert_eq!(array![[1., 2.], [1., 2.], [1., 2.]], draws);

        // fully correlated coordinates
        let cov = array![[4., 2.], [2., 1.]];
        let draws = sample_conditioned(&mean, &cov, 5, &mut rng).unwrap();
        for row in draws.rows() {
            assert_abs_diff_eq!(row[0] - 1., 2. * (row[1] - 2.), epsilon = 1e-6);
        }

        let not_psd = array![[1., 2.], [2., 1.]];
        assert!(matches!(
            sample_conditioned(&mean, &not_psd, 5, &mut rng),
            Err(GpError::NotPositiveDefinite(_))
        ));
        assert!(matches!(
            sample_conditioned(&mean, &Array2::eye(3), 5, &mut rng),
            Err(GpError::DimensionMismatch(_))
        ));
    }

    #[cfg(feature = "serializable")]
    #[test]
    fn test_serialize_interpolator() {
        let gp = Interpolator::new(
            Kernel::combined(vec![
                Kernel::matern(1.5, 2., &[1., 3.]).unwrap(),
                Kernel::white_noise(0.1),
            ])
            .unwrap(),
        );
        let json = serde_json::to_string(&gp).unwrap();
        assert!(json.contains("Matern"));
        let loaded: Interpolator<f64> = serde_json::from_str(&json).unwrap();
        assert_eq!(gp, loaded);
        assert_eq!(gp.kernel().param_names(), loaded.kernel().param_names());
    }
}
