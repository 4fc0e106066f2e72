//! Affine-invariant ensemble sampler.
//!
//! Walkers are moved with the stretch move of Goodman & Weare (2010), the ensemble
//! being split in two halves (even and odd walkers) updated in turn using the other
//! half as complementary ensemble, see Foreman-Mackey et al. (2013) *emcee: the MCMC Hammer*.

use crate::errors::{GpError, Result};
use crate::utils::into_f64;
use linfa::Float;
use log::{debug, info};
use ndarray::{Array1, Array2, Array3, ArrayView1, Axis};
use ndarray_rand::rand::Rng;
use ndarray_rand::rand_distr::StandardNormal;
use ndarray_rand::RandomExt;
use rayon::prelude::*;
use std::time::Instant;

/// Samples recorded by the ensemble sampler
#[derive(Clone, Debug)]
pub(crate) struct EnsembleSamples<F: Float> {
    /// Walker positions (num_samples, num_walkers, dim)
    pub chain: Array3<F>,
    /// Log-probability of recorded positions (num_samples, num_walkers)
    pub log_prob: Array2<F>,
    /// Per walker fraction of accepted proposals during recorded steps
    pub acceptance_fraction: Array1<F>,
}

/// Initial walkers `|p0 * (1 + scale * z)|` with `z ~ N(0, 1)`, shape (num_walkers, dim)
pub(crate) fn init_walkers<F: Float, R: Rng>(
    p0: &ArrayView1<F>,
    num_walkers: usize,
    scale: F,
    rng: &mut R,
) -> Array2<F> {
    let z = Array2::<f64>::random_using((num_walkers, p0.len()), StandardNormal, rng);
    let mut walkers = z.mapv(|v| F::one() + scale * F::cast(v));
    walkers *= p0;
    walkers.mapv_inplace(|v| v.abs());
    walkers
}

fn eval_log_prob<F, L>(log_prob: &L, positions: &[Array1<F>]) -> Vec<F>
where
    F: Float,
    L: Fn(&ArrayView1<F>) -> F + Sync,
{
    positions
        .par_iter()
        .map(|p| {
            let lp = log_prob(&p.view());
            if lp.is_nan() {
                F::neg_infinity()
            } else {
                lp
            }
        })
        .collect()
}

/// Stretch move of the walkers `half` given the complementary ensemble `others`.
/// Returns whether each walker of `half` accepted its proposal.
fn stretch_half<F, L, R>(
    log_prob: &L,
    walkers: &mut Array2<F>,
    lp: &mut Array1<F>,
    half: &[usize],
    others: &[usize],
    stretch: F,
    rng: &mut R,
) -> Vec<bool>
where
    F: Float,
    L: Fn(&ArrayView1<F>) -> F + Sync,
    R: Rng,
{
    let dim = walkers.ncols();
    let a = into_f64(stretch);
    let mut zs = Vec::with_capacity(half.len());
    let mut log_u = Vec::with_capacity(half.len());
    let proposals: Vec<Array1<F>> = half
        .iter()
        .map(|&k| {
            let j = others[rng.gen_range(0..others.len())];
            // z ~ g(z) proportional to 1/sqrt(z) on [1/a, a]
            let z = ((a - 1.) * rng.gen::<f64>() + 1.).powi(2) / a;
            zs.push(z);
            log_u.push(rng.gen::<f64>().ln());
            let xj = walkers.row(j);
            let xk = walkers.row(k);
            &xj + &((&xk - &xj) * F::cast(z))
        })
        .collect();

    let lp_new = eval_log_prob(log_prob, &proposals);

    half.iter()
        .zip(proposals)
        .zip(lp_new)
        .zip(zs.iter().zip(log_u.iter()))
        .map(|(((&k, y), lpy), (&z, &lnu))| {
            let log_ratio = (dim as f64 - 1.) * z.ln() + into_f64(lpy) - into_f64(lp[k]);
            let accept = lpy > F::neg_infinity() && lnu < log_ratio;
            if accept {
                walkers.row_mut(k).assign(&y);
                lp[k] = lpy;
            }
            accept
        })
        .collect()
}

/// Run the ensemble sampler from `init` walkers (num_walkers, dim) during
/// `num_burnin` discarded steps followed by `num_samples` recorded steps.
pub(crate) fn run_ensemble<F, L, R>(
    log_prob: &L,
    init: Array2<F>,
    num_burnin: usize,
    num_samples: usize,
    stretch: F,
    rng: &mut R,
) -> Result<EnsembleSamples<F>>
where
    F: Float,
    L: Fn(&ArrayView1<F>) -> F + Sync,
    R: Rng,
{
    let (num_walkers, dim) = init.dim();
    if num_walkers < 2 {
        return Err(GpError::InvalidValueError(format!(
            "ensemble sampler requires at least 2 walkers, got {num_walkers}"
        )));
    }
    let now = Instant::now();
    let mut walkers = init;
    let start: Vec<Array1<F>> = walkers.rows().into_iter().map(|r| r.to_owned()).collect();
    let mut lp = Array1::from(eval_log_prob(log_prob, &start));
    if lp.iter().all(|v| v.is_infinite()) {
        return Err(GpError::LikelihoodComputationError(
            "no initial walker has a finite log-probability".to_string(),
        ));
    }

    let evens: Vec<usize> = (0..num_walkers).step_by(2).collect();
    let odds: Vec<usize> = (1..num_walkers).step_by(2).collect();

    let mut chain = Array3::zeros((num_samples, num_walkers, dim));
    let mut log_probs = Array2::zeros((num_samples, num_walkers));
    let mut accepted = vec![0usize; num_walkers];
    for step in 0..num_burnin + num_samples {
        for (half, others) in [(&evens, &odds), (&odds, &evens)] {
            let moved = stretch_half(log_prob, &mut walkers, &mut lp, half, others, stretch, rng);
            if step >= num_burnin {
                for (&k, accept) in half.iter().zip(moved) {
                    accepted[k] += accept as usize;
                }
            }
        }
        if step == num_burnin && num_burnin > 0 {
            debug!("MCMC burn-in done ({} steps) in {:?}", num_burnin, now.elapsed());
        }
        if step >= num_burnin {
            let i = step - num_burnin;
            chain.index_axis_mut(Axis(0), i).assign(&walkers);
            log_probs.row_mut(i).assign(&lp);
        }
    }

    let acceptance_fraction = Array1::from_iter(
        accepted
            .iter()
            .map(|&n| F::cast(n) / F::cast(num_samples.max(1))),
    );
    info!(
        "MCMC done: {} walkers x {} steps, mean acceptance fraction {:.3} in {:?}",
        num_walkers,
        num_samples,
        acceptance_fraction.mean().unwrap_or_else(F::zero),
        now.elapsed()
    );
    Ok(EnsembleSamples {
        chain,
        log_prob: log_probs,
        acceptance_fraction,
    })
}
