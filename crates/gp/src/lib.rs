//! This library implements [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) interpolation
//! of scattered multi-dimensional data: given irregularly placed source points with observed scalar
//! values, it predicts the underlying function value and its uncertainty at new target points.
//!
//! The GP prior is a zero-mean process whose covariance is given by a kernel:
//! [WhiteNoiseKernel], [MaternKernel], [SquaredExponentialKernel] or a sum of those
//! ([CombinedKernel]), all gathered under the [Kernel] enum and the [KernelModel] trait.
//!
//! Two engines implement the [GpInterpolator] trait:
//!
//! * [Interpolator], the exact dense GP whose complexity is in O(N^3) in processing time and
//!   O(N^2) in memory where N is the number of source points,
//! * [NearestNeighborInterpolator], the nearest-neighbor GP (NNGP) approximation parameterized
//!   by [NngpParams] which conditions every point on its k nearest neighbors only,
//!   reducing the complexity to O(N.k^3).
//!
//! Kernel hyperparameters are tuned either by maximizing the marginal likelihood
//! ([GpInterpolator::optimize_kernel] parameterized by [OptimizeParams]) or by sampling
//! their posterior distribution with an ensemble MCMC ([GpInterpolator::sample_kernel]
//! parameterized by [McmcParams]). Tuning never modifies the interpolator: the resulting
//! kernel is committed with [GpInterpolator::set_kernel].
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
mod combined;
mod errors;
mod kdtree;
mod kernels;
mod sparse_algorithm;
pub mod special;

mod parameters;
mod sparse_parameters;
mod utils;

mod mcmc;
mod optimization;
mod tuning;

pub use algorithm::*;
pub use combined::*;
pub use errors::*;
pub use kernels::*;
pub use parameters::*;
pub use sparse_algorithm::*;
pub use sparse_parameters::*;
pub use tuning::{KernelChain, TunedKernel};
pub use utils::{pairwise_rows, repeat_row};
