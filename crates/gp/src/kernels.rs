//! A module for covariance kernels of the GP prior.
//!
//! The following kernels are implemented:
//! * white noise,
//! * Matérn of any real order,
//! * squared exponential,
//! * a combination (sum) of the above, see [`CombinedKernel`](crate::CombinedKernel).
//!
//! Every kernel owns a fixed-length vector of named parameters which can be read
//! with [`KernelModel::named_params`] and modified with [`KernelModel::update`]
//! or [`KernelModel::set_params`].

use crate::combined::CombinedKernel;
use crate::errors::{GpError, Result};
use crate::special::{ln_bessel_k, ln_gamma};
use crate::utils::{into_f64, pairwise_rows};
use linfa::Float;
use log::warn;
use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A trait for using a covariance kernel in GP interpolation
pub trait KernelModel<F: Float>: Clone + fmt::Display + Send + Sync {
    /// Kernel kind name used in diagnostics
    fn kind(&self) -> &'static str;

    /// Names of the parameters in their fixed order
    fn param_names(&self) -> Vec<String>;

    /// Current parameter values in the order given by [`KernelModel::param_names`]
    fn params(&self) -> Array1<F>;

    /// Set all parameter values at once, `params` length has to match the number of parameters
    fn set_params(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()>;

    /// Dimension of the points the kernel applies to, `None` when any dimension is accepted
    fn num_dim(&self) -> Option<usize>;

    /// Covariance between index-aligned points: given two (m, nx) matrices
    /// returns the (m,) vector of `k(x1_i, x2_i)`
    fn value(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array1<F>;

    /// Number of parameters
    fn num_params(&self) -> usize {
        self.param_names().len()
    }

    /// Parameter `(name, value)` pairs
    fn named_params(&self) -> Vec<(String, F)> {
        let values = self.params();
        self.param_names()
            .into_iter()
            .zip(values.iter().copied())
            .collect()
    }

    /// Update the named parameters in place.
    ///
    /// Names the kernel does not know are ignored (a warning is logged) and returned,
    /// so that the same set of names can be broadcast to heterogeneous kernels.
    fn update<S: AsRef<str>>(&mut self, params: &[(S, F)]) -> Result<Vec<String>> {
        let names = self.param_names();
        let mut values = self.params();
        let mut ignored = Vec::new();
        for (key, val) in params {
            let key = key.as_ref();
            match names.iter().position(|name| name == key) {
                Some(i) => values[i] = *val,
                None => {
                    warn!("cannot update {} in kernel {}", key, self.kind());
                    ignored.push(key.to_string());
                }
            }
        }
        self.set_params(&values)?;
        Ok(ignored)
    }

    /// Covariance matrix (n1, n2) between points `x1` (n1, nx) and `x2` (n2, nx).
    ///
    /// Every pair is expanded into index-aligned arrays and the kernel is evaluated
    /// once over the flattened pairs.
    fn cov(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<Array2<F>> {
        check_kernel_dim(self, x1, x2)?;
        let (p1, p2) = pairwise_rows(x1, x2);
        let values = self.value(&p1, &p2);
        Ok(Array2::from_shape_vec((x1.nrows(), x2.nrows()), values.to_vec())?)
    }
}

/// Checks that `x1` and `x2` dimensions are consistent with the kernel one
pub(crate) fn check_kernel_dim<F: Float, K: KernelModel<F>>(
    kernel: &K,
    x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
    x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Result<()> {
    if x1.ncols() != x2.ncols() {
        return Err(GpError::DimensionMismatch(format!(
            "conflicting number of dimensions for x1 ({}) and x2 ({})",
            x1.ncols(),
            x2.ncols()
        )));
    }
    match kernel.num_dim() {
        Some(dim) if dim != x1.ncols() => Err(GpError::DimensionMismatch(format!(
            "kernel {} expects points of dimension {}, got {}",
            kernel.kind(),
            dim,
            x1.ncols()
        ))),
        _ => Ok(()),
    }
}

fn check_param_len<F: Float>(
    kind: &str,
    expected: usize,
    params: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> Result<()> {
    if params.len() != expected {
        return Err(GpError::InvalidValueError(format!(
            "{} expects {} parameters, got {}",
            kind,
            expected,
            params.len()
        )));
    }
    Ok(())
}

fn check_lengths<F: Float>(kind: &str, lengths: &[F]) -> Result<()> {
    if lengths.is_empty() {
        return Err(GpError::InvalidValueError(format!(
            "{kind} requires at least one length"
        )));
    }
    Ok(())
}

fn length_names(num_dim: usize) -> impl Iterator<Item = String> {
    (0..num_dim).map(|i| format!("length{i}"))
}

fn write_params<F: Float>(
    f: &mut fmt::Formatter,
    kind: &str,
    named_params: Vec<(String, F)>,
) -> fmt::Result {
    let params = named_params
        .iter()
        .map(|(name, value)| format!("{name}={value:.3e}"))
        .collect::<Vec<_>>();
    write!(f, "{}({})", kind, params.join(", "))
}

/// White noise kernel
///
/// `cov[f(x1), f(x2)] = sigma^2 * delta(x1 - x2)`
///
/// where delta is the exact (elementwise) equality indicator of the two points,
/// hence it only contributes to the diagonal of `cov(x, x)`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct WhiteNoiseKernel<F: Float> {
    sigma: F,
}

impl<F: Float> WhiteNoiseKernel<F> {
    /// Constructor given the noise standard deviation
    pub fn new(sigma: F) -> Self {
        WhiteNoiseKernel { sigma }
    }

    /// Constructor from the positional parameter list `[sigma]`
    pub fn from_params(params: &[F]) -> Result<Self> {
        check_param_len("WhiteNoiseKernel", 1, &ndarray::aview1(params))?;
        Ok(Self::new(params[0]))
    }

    /// Noise standard deviation
    pub fn sigma(&self) -> F {
        self.sigma
    }
}

impl<F: Float> KernelModel<F> for WhiteNoiseKernel<F> {
    fn kind(&self) -> &'static str {
        "WhiteNoiseKernel"
    }

    fn param_names(&self) -> Vec<String> {
        vec!["sigma".to_string()]
    }

    fn params(&self) -> Array1<F> {
        Array1::from_elem(1, self.sigma)
    }

    fn set_params(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        check_param_len(self.kind(), 1, params)?;
        self.sigma = params[0];
        Ok(())
    }

    fn num_dim(&self) -> Option<usize> {
        None
    }

    fn value(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array1<F> {
        let sigma2 = self.sigma * self.sigma;
        Zip::from(x1.rows())
            .and(x2.rows())
            .map_collect(|a, b| if a == b { sigma2 } else { F::zero() })
    }
}

impl<F: Float> fmt::Display for WhiteNoiseKernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_params(f, self.kind(), self.named_params())
    }
}

/// Matérn covariance kernel
///
/// `cov[f(x1), f(x2)] = sigma^2 * 2^(1-nu) / Gamma(nu) * r^nu * K_nu(r)`
///
/// with `r = sqrt(2 nu sum_d ((x1_d - x2_d) / length_d)^2)` and `K_nu` the modified
/// Bessel function of the second kind. The dimension of the kernel is given by the
/// number of lengths.
/// See <https://en.wikipedia.org/wiki/Mat%C3%A9rn_covariance_function>
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct MaternKernel<F: Float> {
    order: F,
    sigma: F,
    lengths: Array1<F>,
}

impl<F: Float> MaternKernel<F> {
    /// Constructor given order `nu > 0`, standard deviation `sigma`
    /// and one length per dimension
    pub fn new(order: F, sigma: F, lengths: &[F]) -> Result<Self> {
        check_lengths("MaternKernel", lengths)?;
        check_order(order)?;
        Ok(MaternKernel {
            order,
            sigma,
            lengths: Array1::from(lengths.to_vec()),
        })
    }

    /// Constructor from the positional parameter list `[order, sigma, length0, ...]`
    pub fn from_params(params: &[F]) -> Result<Self> {
        if params.len() < 3 {
            return Err(GpError::InvalidValueError(format!(
                "MaternKernel expects at least 3 parameters (order, sigma, length0, ...), got {}",
                params.len()
            )));
        }
        Self::new(params[0], params[1], &params[2..])
    }

    /// Order `nu` of the kernel
    pub fn order(&self) -> F {
        self.order
    }

    /// Standard deviation of the process
    pub fn sigma(&self) -> F {
        self.sigma
    }

    /// Length scales, one per dimension
    pub fn lengths(&self) -> &Array1<F> {
        &self.lengths
    }
}

fn check_order<F: Float>(order: F) -> Result<()> {
    if order <= F::zero() || order.is_nan() {
        return Err(GpError::InvalidValueError(format!(
            "Matern order should be strictly positive, got {order}"
        )));
    }
    Ok(())
}

/// Matérn correlation at scaled distance `r` given `ln(2^(1-nu) / Gamma(nu))`
fn matern_correlation(nu: f64, r: f64, ln_norm: f64) -> f64 {
    // removable singularity at r = 0
    if r <= f64::MIN_POSITIVE {
        return 1.;
    }
    (ln_norm + nu * r.ln() + ln_bessel_k(nu, r)).exp()
}

impl<F: Float> KernelModel<F> for MaternKernel<F> {
    fn kind(&self) -> &'static str {
        "MaternKernel"
    }

    fn param_names(&self) -> Vec<String> {
        ["order".to_string(), "sigma".to_string()]
            .into_iter()
            .chain(length_names(self.lengths.len()))
            .collect()
    }

    fn params(&self) -> Array1<F> {
        [self.order, self.sigma]
            .into_iter()
            .chain(self.lengths.iter().copied())
            .collect()
    }

    fn set_params(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        check_param_len(self.kind(), 2 + self.lengths.len(), params)?;
        check_order(params[0])?;
        self.order = params[0];
        self.sigma = params[1];
        self.lengths.assign(&params.slice(ndarray::s![2..]));
        Ok(())
    }

    fn num_dim(&self) -> Option<usize> {
        Some(self.lengths.len())
    }

    ///   cov = sigma^2 * 2^(1-nu) / Gamma(nu) * r^nu * K_nu(r)
    fn value(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array1<F> {
        let nu = into_f64(self.order);
        let sigma2 = self.sigma * self.sigma;
        let ln_norm = (1. - nu) * std::f64::consts::LN_2 - ln_gamma(nu);
        let r2 = ((x1 - x2) / &self.lengths)
            .mapv(|v| v * v)
            .sum_axis(Axis(1));
        r2.mapv(|v| {
            let r = (2. * nu * into_f64(v)).sqrt();
            sigma2 * F::cast(matern_correlation(nu, r, ln_norm))
        })
    }
}

impl<F: Float> fmt::Display for MaternKernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_params(f, self.kind(), self.named_params())
    }
}

/// Squared exponential kernel
///
/// `cov[f(x1), f(x2)] = sigma^2 * exp(- sum_d (x1_d - x2_d)^2 / length_d^2)`
///
/// It is the limit of the Matérn kernel when its order goes to infinity but is
/// computed with its own closed form.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct SquaredExponentialKernel<F: Float> {
    sigma: F,
    lengths: Array1<F>,
}

impl<F: Float> SquaredExponentialKernel<F> {
    /// Constructor given standard deviation `sigma` and one length per dimension
    pub fn new(sigma: F, lengths: &[F]) -> Result<Self> {
        check_lengths("SquaredExponentialKernel", lengths)?;
        Ok(SquaredExponentialKernel {
            sigma,
            lengths: Array1::from(lengths.to_vec()),
        })
    }

    /// Constructor from the positional parameter list `[sigma, length0, ...]`
    pub fn from_params(params: &[F]) -> Result<Self> {
        if params.len() < 2 {
            return Err(GpError::InvalidValueError(format!(
                "SquaredExponentialKernel expects at least 2 parameters (sigma, length0, ...), got {}",
                params.len()
            )));
        }
        Self::new(params[0], &params[1..])
    }

    /// Standard deviation of the process
    pub fn sigma(&self) -> F {
        self.sigma
    }

    /// Length scales, one per dimension
    pub fn lengths(&self) -> &Array1<F> {
        &self.lengths
    }
}

impl<F: Float> KernelModel<F> for SquaredExponentialKernel<F> {
    fn kind(&self) -> &'static str {
        "SquaredExponentialKernel"
    }

    fn param_names(&self) -> Vec<String> {
        std::iter::once("sigma".to_string())
            .chain(length_names(self.lengths.len()))
            .collect()
    }

    fn params(&self) -> Array1<F> {
        std::iter::once(self.sigma)
            .chain(self.lengths.iter().copied())
            .collect()
    }

    fn set_params(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        check_param_len(self.kind(), 1 + self.lengths.len(), params)?;
        self.sigma = params[0];
        self.lengths.assign(&params.slice(ndarray::s![1..]));
        Ok(())
    }

    fn num_dim(&self) -> Option<usize> {
        Some(self.lengths.len())
    }

    fn value(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array1<F> {
        let sigma2 = self.sigma * self.sigma;
        let r2 = ((x1 - x2) / &self.lengths)
            .mapv(|v| v * v)
            .sum_axis(Axis(1));
        r2.mapv(|v| sigma2 * F::exp(-v))
    }
}

impl<F: Float> fmt::Display for SquaredExponentialKernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_params(f, self.kind(), self.named_params())
    }
}

/// The closed set of available kernels
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
pub enum Kernel<F: Float> {
    /// White noise kernel
    WhiteNoise(WhiteNoiseKernel<F>),
    /// Matérn kernel
    Matern(MaternKernel<F>),
    /// Squared exponential kernel
    SquaredExponential(SquaredExponentialKernel<F>),
    /// Sum of kernels
    Combined(CombinedKernel<F>),
}

/// Kinds of elementary kernels buildable from a positional parameter list
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum KernelKind {
    /// `[sigma]`
    WhiteNoise,
    /// `[order, sigma, length0, ...]`
    Matern,
    /// `[sigma, length0, ...]`
    SquaredExponential,
}

impl<F: Float> Kernel<F> {
    /// Elementary kernel of the given kind from its positional parameter list
    pub fn from_params(kind: KernelKind, params: &[F]) -> Result<Self> {
        match kind {
            KernelKind::WhiteNoise => Ok(WhiteNoiseKernel::from_params(params)?.into()),
            KernelKind::Matern => Ok(MaternKernel::from_params(params)?.into()),
            KernelKind::SquaredExponential => {
                Ok(SquaredExponentialKernel::from_params(params)?.into())
            }
        }
    }

    /// White noise kernel
    pub fn white_noise(sigma: F) -> Self {
        Kernel::WhiteNoise(WhiteNoiseKernel::new(sigma))
    }

    /// Matérn kernel, see [`MaternKernel::new`]
    pub fn matern(order: F, sigma: F, lengths: &[F]) -> Result<Self> {
        Ok(Kernel::Matern(MaternKernel::new(order, sigma, lengths)?))
    }

    /// Squared exponential kernel, see [`SquaredExponentialKernel::new`]
    pub fn squared_exponential(sigma: F, lengths: &[F]) -> Result<Self> {
        Ok(Kernel::SquaredExponential(SquaredExponentialKernel::new(
            sigma, lengths,
        )?))
    }

    /// Sum of at least two kernels, see [`CombinedKernel::new`]
    pub fn combined(kernels: Vec<Kernel<F>>) -> Result<Self> {
        Ok(Kernel::Combined(CombinedKernel::new(kernels)?))
    }
}

macro_rules! dispatch {
    ($self:ident, $k:ident => $body:expr) => {
        match $self {
            Kernel::WhiteNoise($k) => $body,
            Kernel::Matern($k) => $body,
            Kernel::SquaredExponential($k) => $body,
            Kernel::Combined($k) => $body,
        }
    };
}

impl<F: Float> KernelModel<F> for Kernel<F> {
    fn kind(&self) -> &'static str {
        dispatch!(self, k => k.kind())
    }

    fn param_names(&self) -> Vec<String> {
        dispatch!(self, k => k.param_names())
    }

    fn params(&self) -> Array1<F> {
        dispatch!(self, k => k.params())
    }

    fn set_params(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        dispatch!(self, k => k.set_params(params))
    }

    fn num_dim(&self) -> Option<usize> {
        dispatch!(self, k => k.num_dim())
    }

    fn value(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array1<F> {
        dispatch!(self, k => k.value(x1, x2))
    }

    fn update<S: AsRef<str>>(&mut self, params: &[(S, F)]) -> Result<Vec<String>> {
        dispatch!(self, k => k.update(params))
    }
}

impl<F: Float> fmt::Display for Kernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        dispatch!(self, k => write!(f, "{k}"))
    }
}

impl<F: Float> From<WhiteNoiseKernel<F>> for Kernel<F> {
    fn from(k: WhiteNoiseKernel<F>) -> Self {
        Kernel::WhiteNoise(k)
    }
}

impl<F: Float> From<MaternKernel<F>> for Kernel<F> {
    fn from(k: MaternKernel<F>) -> Self {
        Kernel::Matern(k)
    }
}

impl<F: Float> From<SquaredExponentialKernel<F>> for Kernel<F> {
    fn from(k: SquaredExponentialKernel<F>) -> Self {
        Kernel::SquaredExponential(k)
    }
}

impl<F: Float> From<CombinedKernel<F>> for Kernel<F> {
    fn from(k: CombinedKernel<F>) -> Self {
        Kernel::Combined(k)
    }
}
