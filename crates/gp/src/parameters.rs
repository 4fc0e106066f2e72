use crate::errors::{GpError, Result};
use linfa::{Float, ParamGuard};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Default number of random restarts of the likelihood optimization
/// (in addition to the start at the current kernel parameters)
pub const GP_OPTIM_N_START: usize = 10;
/// Minimum number of likelihood evaluations during one optimization
pub const GP_COBYLA_MIN_EVAL: usize = 25;
/// Maximum number of likelihood evaluations during one optimization
pub const GP_COBYLA_MAX_EVAL: usize = 1000;
/// Default ratio between the default optimization bounds and the initial parameter values
pub const GP_OPTIM_BOUNDS_RATIO: f64 = 1e3;

/// Default number of discarded ensemble steps
pub const MCMC_NUM_BURNIN: usize = 100;
/// Default number of recorded ensemble steps
pub const MCMC_NUM_SAMPLES: usize = 100;
/// Default scale parameter `a` of the stretch move
pub const MCMC_STRETCH_SCALE: f64 = 2.;
/// Default relative spread of the initial walkers around the initial parameters
pub const MCMC_INIT_SCALE: f64 = 1. / 3.;

/// A set of validated kernel optimization parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct OptimizeValidParams<F: Float> {
    /// Bounds (lower, upper) of every kernel parameter, `None` means
    /// `(p0 / GP_OPTIM_BOUNDS_RATIO, p0 * GP_OPTIM_BOUNDS_RATIO)`
    pub(crate) bounds: Option<Vec<(F, F)>>,
    /// Indices of optimized parameters, `None` means all
    pub(crate) active: Option<Vec<usize>>,
    /// Number of random restarts
    pub(crate) n_start: usize,
    /// Max number of likelihood evaluations per start, `None` means derived from problem size
    pub(crate) max_eval: Option<usize>,
    /// Seed of the random restarts
    pub(crate) seed: Option<u64>,
}

impl<F: Float> Default for OptimizeValidParams<F> {
    fn default() -> OptimizeValidParams<F> {
        OptimizeValidParams {
            bounds: None,
            active: None,
            n_start: GP_OPTIM_N_START,
            max_eval: None,
            seed: None,
        }
    }
}

impl<F: Float> OptimizeValidParams<F> {
    /// Get user bounds if any
    pub fn bounds(&self) -> Option<&[(F, F)]> {
        self.bounds.as_deref()
    }

    /// Get optimized parameter indices if restricted
    pub fn active(&self) -> Option<&[usize]> {
        self.active.as_deref()
    }

    /// Get the number of random restarts
    pub fn n_start(&self) -> usize {
        self.n_start
    }

    /// Get the max number of likelihood evaluations for `n_active` optimized parameters
    pub fn max_eval(&self, n_active: usize) -> usize {
        self.max_eval
            .unwrap_or((10 * n_active).clamp(GP_COBYLA_MIN_EVAL, GP_COBYLA_MAX_EVAL))
    }

    /// Get random restarts seed
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the kernel optimization
/// triggered by [`GpInterpolator::optimize_kernel`](crate::GpInterpolator::optimize_kernel).
pub struct OptimizeParams<F: Float>(OptimizeValidParams<F>);

impl<F: Float> OptimizeParams<F> {
    /// A constructor with default parameters
    pub fn new() -> OptimizeParams<F> {
        Self(OptimizeValidParams::default())
    }

    /// Set search bounds, one (lower, upper) pair per kernel parameter.
    /// Bounds have to be strictly positive as the search happens in log10 space.
    pub fn bounds(mut self, bounds: Vec<(F, F)>) -> Self {
        self.0.bounds = Some(bounds);
        self
    }

    /// Restrict the optimization to the given parameter indices,
    /// other parameters keep their current values
    pub fn active(mut self, active: Vec<usize>) -> Self {
        self.0.active = Some(active);
        self
    }

    /// Set the number of random restarts
    pub fn n_start(mut self, n_start: usize) -> Self {
        self.0.n_start = n_start;
        self
    }

    /// Set the max number of likelihood evaluations during one optimization.
    /// Given max_eval has to be greater than [crate::GP_COBYLA_MIN_EVAL] otherwise
    /// max_eval is set to [crate::GP_COBYLA_MIN_EVAL].
    pub fn max_eval(mut self, max_eval: usize) -> Self {
        self.0.max_eval = Some(GP_COBYLA_MIN_EVAL.max(max_eval));
        self
    }

    /// Set the seed of the random restarts
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = Some(seed);
        self
    }
}

impl<F: Float> Default for OptimizeParams<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> From<OptimizeValidParams<F>> for OptimizeParams<F> {
    fn from(valid: OptimizeValidParams<F>) -> Self {
        OptimizeParams(valid)
    }
}

impl<F: Float> ParamGuard for OptimizeParams<F> {
    type Checked = OptimizeValidParams<F>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if let Some(bounds) = self.0.bounds.as_ref() {
            for (i, (lo, up)) in bounds.iter().enumerate() {
                if !(*lo > F::zero() && lo <= up && up.is_finite()) {
                    return Err(GpError::InvalidValueError(format!(
                        "bounds of parameter {i} should verify 0 < lower <= upper < inf, got ({lo}, {up})"
                    )));
                }
            }
        }
        if let Some(active) = self.0.active.as_ref() {
            if active.is_empty() {
                return Err(GpError::InvalidValueError(
                    "at least one parameter should be active".to_string(),
                ));
            }
            let mut sorted = active.clone();
            sorted.sort_unstable();
            sorted.dedup();
            if sorted.len() != active.len() {
                return Err(GpError::InvalidValueError(format!(
                    "active parameter indices should be distinct, got {active:?}"
                )));
            }
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

/// A set of validated ensemble sampler parameters.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct McmcValidParams<F: Float> {
    /// Number of steps discarded before recording
    pub(crate) num_burnin: usize,
    /// Number of recorded steps
    pub(crate) num_samples: usize,
    /// Number of walkers, `None` means twice the number of parameters
    pub(crate) num_walkers: Option<usize>,
    /// Stretch move scale `a > 1`
    pub(crate) stretch: F,
    /// Relative spread of initial walkers
    pub(crate) init_scale: F,
    /// Seed of the sampler random generator
    pub(crate) seed: Option<u64>,
}

impl<F: Float> Default for McmcValidParams<F> {
    fn default() -> McmcValidParams<F> {
        McmcValidParams {
            num_burnin: MCMC_NUM_BURNIN,
            num_samples: MCMC_NUM_SAMPLES,
            num_walkers: None,
            stretch: F::cast(MCMC_STRETCH_SCALE),
            init_scale: F::cast(MCMC_INIT_SCALE),
            seed: None,
        }
    }
}

impl<F: Float> McmcValidParams<F> {
    /// Get the number of burn-in steps
    pub fn num_burnin(&self) -> usize {
        self.num_burnin
    }

    /// Get the number of recorded steps
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Get the number of walkers for a problem with `dim` parameters
    pub fn num_walkers(&self, dim: usize) -> usize {
        self.num_walkers.unwrap_or(2 * dim)
    }

    /// Get the stretch move scale
    pub fn stretch(&self) -> F {
        self.stretch
    }

    /// Get the initial walkers relative spread
    pub fn init_scale(&self) -> F {
        self.init_scale
    }

    /// Get the sampler seed
    pub fn seed(&self) -> Option<u64> {
        self.seed
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the kernel sampling
/// triggered by [`GpInterpolator::sample_kernel`](crate::GpInterpolator::sample_kernel).
pub struct McmcParams<F: Float>(McmcValidParams<F>);

impl<F: Float> McmcParams<F> {
    /// A constructor with default parameters
    pub fn new() -> McmcParams<F> {
        Self(McmcValidParams::default())
    }

    /// Set the number of burn-in steps
    pub fn num_burnin(mut self, num_burnin: usize) -> Self {
        self.0.num_burnin = num_burnin;
        self
    }

    /// Set the number of recorded steps
    pub fn num_samples(mut self, num_samples: usize) -> Self {
        self.0.num_samples = num_samples;
        self
    }

    /// Set the number of walkers, it has to be at least twice the number of parameters
    pub fn num_walkers(mut self, num_walkers: usize) -> Self {
        self.0.num_walkers = Some(num_walkers);
        self
    }

    /// Set the stretch move scale
    pub fn stretch(mut self, stretch: F) -> Self {
        self.0.stretch = stretch;
        self
    }

    /// Set the initial walkers relative spread
    pub fn init_scale(mut self, init_scale: F) -> Self {
        self.0.init_scale = init_scale;
        self
    }

    /// Set the sampler seed
    pub fn seed(mut self, seed: u64) -> Self {
        self.0.seed = Some(seed);
        self
    }
}

impl<F: Float> Default for McmcParams<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Float> From<McmcValidParams<F>> for McmcParams<F> {
    fn from(valid: McmcValidParams<F>) -> Self {
        McmcParams(valid)
    }
}

impl<F: Float> ParamGuard for McmcParams<F> {
    type Checked = McmcValidParams<F>;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if self.0.num_samples == 0 {
            return Err(GpError::InvalidValueError(
                "`num_samples` should be at least 1".to_string(),
            ));
        }
        if !(self.0.stretch > F::one()) {
            return Err(GpError::InvalidValueError(format!(
                "stretch scale should be greater than 1, got {}",
                self.0.stretch
            )));
        }
        if !(self.0.init_scale > F::zero()) {
            return Err(GpError::InvalidValueError(format!(
                "initial walkers spread should be positive, got {}",
                self.0.init_scale
            )));
        }
        if let Some(n) = self.0.num_walkers {
            if n < 2 {
                return Err(GpError::InvalidValueError(format!(
                    "at least 2 walkers are required, got {n}"
                )));
            }
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}
