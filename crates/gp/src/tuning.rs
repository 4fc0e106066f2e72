//! Kernel hyperparameter inference shared by every [`GpInterpolator`].
//!
//! The objective is the log-posterior `loglikelihood + logprior` of the flattened kernel
//! parameters. Candidates with a non positive or non finite parameter, or for which the
//! likelihood cannot be computed, get a log-posterior of `-inf`.

use crate::algorithm::GpInterpolator;
use crate::errors::{GpError, Result};
use crate::kernels::KernelModel;
use crate::mcmc::{init_walkers, run_ensemble};
use crate::optimization::{optimize_params, prepare_multistart, CobylaParams};
use crate::parameters::{McmcValidParams, OptimizeValidParams, GP_OPTIM_BOUNDS_RATIO};
use crate::utils::into_f64;

use linfa::Float;
use log::{debug, info};
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};
use ndarray_rand::rand::SeedableRng;
use ndarray_stats::QuantileExt;
use rand_xoshiro::Xoshiro256Plus;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Result of a kernel optimization
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct TunedKernel<F: Float, K> {
    /// Copy of the kernel set with optimized parameters
    pub kernel: K,
    /// Optimized parameters `(name, value)`
    pub params: Vec<(String, F)>,
    /// Log-posterior value at optimum
    pub log_posterior: F,
}

/// Chain of kernel parameters produced by the ensemble sampler
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct KernelChain<F: Float> {
    names: Vec<String>,
    chain: Array3<F>,
    log_prob: Array2<F>,
    acceptance_fraction: Array1<F>,
}

impl<F: Float> KernelChain<F> {
    /// Parameter names, in the order of the last chain axis
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Walker positions (num_samples, num_walkers, num_params)
    pub fn chain(&self) -> &Array3<F> {
        &self.chain
    }

    /// Log-posterior of walker positions (num_samples, num_walkers)
    pub fn log_prob(&self) -> &Array2<F> {
        &self.log_prob
    }

    /// Fraction of accepted proposals per walker after burn-in
    pub fn acceptance_fraction(&self) -> &Array1<F> {
        &self.acceptance_fraction
    }

    /// Mean acceptance fraction over walkers
    pub fn mean_acceptance_fraction(&self) -> F {
        self.acceptance_fraction.mean().unwrap_or_else(F::zero)
    }

    /// Chain flattened over walkers (num_samples * num_walkers, num_params),
    /// row `i * num_walkers + w` is walker `w` at step `i`
    pub fn flat_chain(&self) -> Array2<F> {
        let (_, nw, np) = self.chain.dim();
        Array2::from_shape_fn((self.chain.len() / np.max(1), np), |(i, k)| {
            self.chain[[i / nw, i % nw, k]]
        })
    }

    /// Recorded parameters with the highest log-posterior and its value
    pub fn max_posterior(&self) -> Option<(Vec<(String, F)>, F)> {
        let (i, w) = self.log_prob.argmax().ok()?;
        let best = self
            .names
            .iter()
            .cloned()
            .zip(self.chain.slice(ndarray::s![i, w, ..]).iter().copied())
            .collect();
        Some((best, self.log_prob[[i, w]]))
    }
}

/// Log-posterior of kernel parameters `params` given the source data
pub(crate) fn log_posterior<F, G, P>(
    gp: &G,
    source_x: &ArrayView2<F>,
    source_f: &ArrayView1<F>,
    logprior: &P,
    params: &ArrayView1<F>,
) -> F
where
    F: Float,
    G: GpInterpolator<F>,
    P: Fn(&ArrayView1<F>) -> F,
{
    if params.iter().any(|p| !(p.is_finite() && *p > F::zero())) {
        return F::neg_infinity();
    }
    let mut trial = gp.clone();
    if trial.kernel_mut().set_params(params).is_err() {
        return F::neg_infinity();
    }
    match trial.loglikelihood(source_x, source_f) {
        Ok(ll) => {
            let lp = ll + logprior(params);
            if lp.is_nan() {
                F::neg_infinity()
            } else {
                lp
            }
        }
        Err(_) => F::neg_infinity(),
    }
}

fn check_positive<F: Float>(params: &Array1<F>, what: &str) -> Result<()> {
    if params.iter().any(|p| !(p.is_finite() && *p > F::zero())) {
        return Err(GpError::InvalidValueError(format!(
            "{what} requires strictly positive kernel parameters, got {params}"
        )));
    }
    Ok(())
}

fn seeded_rng(seed: Option<u64>) -> Xoshiro256Plus {
    match seed {
        Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
        None => Xoshiro256Plus::from_entropy(),
    }
}

/// Maximize the log-posterior in log10 space of the active parameters
pub(crate) fn optimize_kernel<F, G, P>(
    gp: &G,
    source_x: &ArrayView2<F>,
    source_f: &ArrayView1<F>,
    logprior: P,
    params: &OptimizeValidParams<F>,
) -> Result<TunedKernel<F, G::Kernel>>
where
    F: Float,
    G: GpInterpolator<F>,
    P: Fn(&ArrayView1<F>) -> F + Sync,
{
    let now = Instant::now();
    let p0 = gp.kernel().params();
    let n = p0.len();
    check_positive(&p0, "kernel optimization")?;

    let active: Vec<usize> = match params.active() {
        Some(active) => active.to_vec(),
        None => (0..n).collect(),
    };
    if let Some(i) = active.iter().find(|&&i| i >= n) {
        return Err(GpError::InvalidValueError(format!(
            "active parameter index {i} out of range, kernel has {n} parameters"
        )));
    }
    let bounds: Vec<(F, F)> = match params.bounds() {
        Some(bounds) if bounds.len() != n => {
            return Err(GpError::InvalidValueError(format!(
                "{} bounds given for a kernel with {} parameters",
                bounds.len(),
                n
            )))
        }
        Some(bounds) => bounds.to_vec(),
        None => {
            let ratio = F::cast(GP_OPTIM_BOUNDS_RATIO);
            p0.iter().map(|p| (*p / ratio, *p * ratio)).collect()
        }
    };

    let active_p0 = active.iter().map(|&i| p0[i]).collect::<Array1<F>>();
    let active_bounds = active.iter().map(|&i| bounds[i]).collect::<Vec<_>>();
    let mut rng = seeded_rng(params.seed());
    let (starts, log_bounds) =
        prepare_multistart(params.n_start(), &active_p0, &active_bounds, &mut rng);

    let to_params = |x: &[f64]| -> Array1<F> {
        let mut p = p0.clone();
        for (k, &i) in active.iter().enumerate() {
            p[i] = F::cast(10f64.powf(x[k]));
        }
        p
    };
    let objfn = |x: &[f64], _gradient: Option<&mut [f64]>, _params: &mut ()| -> f64 {
        let lp = log_posterior(gp, source_x, source_f, &logprior, &to_params(x).view());
        let value = -into_f64(lp);
        if value.is_finite() {
            value
        } else {
            f64::INFINITY
        }
    };

    let mut best: Option<(f64, Array1<f64>)> = None;
    for start in starts.rows() {
        let cobyla = CobylaParams {
            maxeval: params.max_eval(active.len()),
            ..CobylaParams::default()
        };
        let (fmin, xopt) = optimize_params(&objfn, &start.to_owned(), &log_bounds, cobyla);
        debug!("kernel optimization start {} -> {}", start, -fmin);
        if fmin.is_finite() && best.as_ref().map_or(true, |(fbest, _)| fmin < *fbest) {
            best = Some((fmin, xopt));
        }
    }

    let (_, xopt) = best.ok_or_else(|| {
        GpError::LikelihoodComputationError(
            "no kernel parameters with a finite log-posterior were found".to_string(),
        )
    })?;
    let xopt = xopt
        .iter()
        .zip(log_bounds.iter())
        .map(|(x, (lo, up))| (*x).max(into_f64(*lo)).min(into_f64(*up)))
        .collect::<Vec<_>>();
    let popt = to_params(&xopt);
    let value = log_posterior(gp, source_x, source_f, &logprior, &popt.view());
    if !value.is_finite() {
        return Err(GpError::LikelihoodComputationError(format!(
            "non finite log-posterior {value} at optimum"
        )));
    }

    let mut kernel = gp.kernel().clone();
    kernel.set_params(&popt)?;
    info!(
        "kernel optimized in {:?}: {} (log-posterior={})",
        now.elapsed(),
        kernel,
        value
    );
    Ok(TunedKernel {
        params: kernel.named_params(),
        kernel,
        log_posterior: value,
    })
}

/// Sample the log-posterior with the ensemble sampler starting around the current parameters
pub(crate) fn sample_kernel<F, G, P>(
    gp: &G,
    source_x: &ArrayView2<F>,
    source_f: &ArrayView1<F>,
    logprior: P,
    params: &McmcValidParams<F>,
) -> Result<KernelChain<F>>
where
    F: Float,
    G: GpInterpolator<F>,
    P: Fn(&ArrayView1<F>) -> F + Sync,
{
    let p0 = gp.kernel().params();
    let dim = p0.len();
    check_positive(&p0, "kernel sampling")?;
    let num_walkers = params.num_walkers(dim);
    if num_walkers < 2 * dim {
        return Err(GpError::InvalidValueError(format!(
            "at least {} walkers are required for {} parameters, got {}",
            2 * dim,
            dim,
            num_walkers
        )));
    }

    let mut rng = seeded_rng(params.seed());
    let init = init_walkers(&p0.view(), num_walkers, params.init_scale(), &mut rng);
    let log_prob =
        |p: &ArrayView1<F>| -> F { log_posterior(gp, source_x, source_f, &logprior, p) };
    let samples = run_ensemble(
        &log_prob,
        init,
        params.num_burnin(),
        params.num_samples(),
        params.stretch(),
        &mut rng,
    )?;
    Ok(KernelChain {
        names: gp.kernel().param_names(),
        chain: samples.chain,
        log_prob: samples.log_prob,
        acceptance_fraction: samples.acceptance_fraction,
    })
}
