use crate::algorithm::{cho_solve, cholesky, pairwise_covariance, GpInterpolator};
use crate::errors::{GpError, Result};
use crate::kdtree::KdTree;
use crate::kernels::{check_kernel_dim, Kernel, KernelModel};
use crate::sparse_parameters::{NeighborMetric, NngpValidParams, PointOrdering};
use crate::utils::{check_same_dim, check_training_data, repeat_row};

use linfa::Float;
use ndarray::{concatenate, s, Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix1, Ix2};
use rayon::prelude::*;

use log::debug;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::time::Instant;

/// Conditioning structure of the source points: a total order (ranks) and,
/// for each rank, the nearest source points of lower rank.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct NeighborGraph {
    /// Source index of each rank
    order: Vec<usize>,
    /// Source indices of the neighbors of each rank, nearest first
    neighbors: Vec<Vec<usize>>,
}

impl NeighborGraph {
    /// Number of points in the graph
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the graph has no point
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Source indices sorted by rank
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Rank of every source point
    pub fn ranks(&self) -> Vec<usize> {
        let mut ranks = vec![0; self.order.len()];
        for (rank, &idx) in self.order.iter().enumerate() {
            ranks[idx] = rank;
        }
        ranks
    }

    /// Source indices of the neighbors of the point of given rank, nearest first
    pub fn neighbors(&self, rank: usize) -> &[usize] {
        &self.neighbors[rank]
    }
}

/// Vecchia factorization of the source covariance given a [`NeighborGraph`].
///
/// The point of rank i is conditioned on its neighbors `N(i)`:
///
/// `f_i | f_N(i) ~ N(b_i^t f_N(i), F_i)`
///
/// with `b_i = C_NN^-1 C_Ni` and `F_i = C_ii - C_iN b_i`. Stacking the `b_i` in the
/// strictly lower triangular `B` (in rank order) gives the sparse precision
/// `(I - B)^t F^-1 (I - B)`.
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
pub struct NngpFactor<F: Float> {
    graph: NeighborGraph,
    coefficients: Vec<Array1<F>>,
    variances: Array1<F>,
}

impl<F: Float> NngpFactor<F> {
    /// Underlying neighbor graph
    pub fn graph(&self) -> &NeighborGraph {
        &self.graph
    }

    /// Regression coefficients `b_i` of the point of given rank on its neighbors
    pub fn coefficients(&self, rank: usize) -> &Array1<F> {
        &self.coefficients[rank]
    }

    /// Conditional variances `F_i` in rank order
    pub fn variances(&self) -> &Array1<F> {
        &self.variances
    }

    /// Dense precision matrix (n, n) indexed as the source points
    pub fn precision(&self) -> Array2<F> {
        let n = self.graph.len();
        let mut a = Array2::<F>::eye(n);
        for (rank, &idx) in self.graph.order.iter().enumerate() {
            for (&j, b) in self.graph.neighbors[rank].iter().zip(&self.coefficients[rank]) {
                a[[idx, j]] = -*b;
            }
        }
        let mut scaled = a.clone();
        for (rank, &idx) in self.graph.order.iter().enumerate() {
            let inv = F::one() / self.variances[rank];
            scaled.row_mut(idx).mapv_inplace(|v| v * inv);
        }
        a.t().dot(&scaled)
    }

    ///   log p(f) = sum_i log N(f_i | b_i^t f_N(i), F_i)
    pub fn loglikelihood(&self, source_f: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<F> {
        if source_f.len() != self.graph.len() {
            return Err(GpError::InvalidValueError(format!(
                "expected {} source values, got {}",
                self.graph.len(),
                source_f.len()
            )));
        }
        let half = F::cast(0.5);
        let ln_tau = F::cast(std::f64::consts::TAU.ln());
        let ll = self
            .graph
            .order
            .iter()
            .enumerate()
            .fold(F::zero(), |acc, (rank, &idx)| {
                let mean = self.graph.neighbors[rank]
                    .iter()
                    .zip(&self.coefficients[rank])
                    .fold(F::zero(), |m, (&j, b)| m + *b * source_f[j]);
                let res = source_f[idx] - mean;
                let var = self.variances[rank];
                acc - half * (res * res / var + var.ln() + ln_tau)
            });
        if !ll.is_finite() {
            return Err(GpError::LikelihoodComputationError(format!(
                "non finite log-likelihood {ll}"
            )));
        }
        Ok(ll)
    }
}

/// Compressed representation of the sources used by
/// [`NearestNeighborInterpolator::predict`](GpInterpolator::predict).
///
/// Each source `s` owns a prediction neighborhood `M(s)`, made of `s` followed by its
/// nearest other sources, along with the weights `w_s = C_MM^-1 f_M`.
#[derive(Clone, Debug)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "F: Serialize", deserialize = "F: Deserialize<'de>"))
)]
pub struct NngpCompressed<F: Float> {
    neighborhoods: Vec<Vec<usize>>,
    weights: Vec<Array1<F>>,
}

impl<F: Float> NngpCompressed<F> {
    /// Number of compressed sources
    pub fn len(&self) -> usize {
        self.neighborhoods.len()
    }

    /// Whether there is no compressed source
    pub fn is_empty(&self) -> bool {
        self.neighborhoods.is_empty()
    }

    /// Prediction neighborhood of source `idx`
    pub fn neighborhood(&self, idx: usize) -> &[usize] {
        &self.neighborhoods[idx]
    }

    /// Weights of the prediction neighborhood of source `idx`
    pub fn weights(&self, idx: usize) -> &Array1<F> {
        &self.weights[idx]
    }
}

/// Neighbor search structure over the source points
enum SourceIndex<'a, F: Float> {
    Tree(KdTree<'a, F>),
    Scan(ArrayView2<'a, F>),
}

impl<'a, F: Float> SourceIndex<'a, F> {
    fn points(&self) -> ArrayView2<'a, F> {
        match self {
            SourceIndex::Tree(tree) => tree.points(),
            SourceIndex::Scan(points) => *points,
        }
    }
}

/// Nearest-neighbor Gaussian process interpolator (NNGP).
///
/// The joint density of the sources is approximated by conditioning each source point
/// only on its `k` nearest predecessors in a given ordering (Vecchia approximation, see
/// Datta et al. 2016 *Hierarchical Nearest-Neighbor Gaussian Process Models for Large
/// Geostatistical Datasets*). It induces a sparse precision matrix with at most `k`
/// off-diagonal entries per row of its Cholesky-like factor.
///
/// Every operation works on neighbor-sized blocks: compressing `n` sources costs
/// `O(n k^3)` and a prediction needs `O(k)` kernel evaluations once the nearest source
/// is found. When neighborhoods span every other source (`k >= n - 1`) results match
/// the exact [`Interpolator`](crate::Interpolator) up to round-off.
///
/// Euclidean neighbors are searched in a KD-tree, covariance neighbors by a full scan
/// of the candidates.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(
    feature = "serializable",
    derive(Serialize, Deserialize),
    serde(bound(serialize = "K: Serialize", deserialize = "K: Deserialize<'de>"))
)]
pub struct NearestNeighborInterpolator<F: Float, K: KernelModel<F> = Kernel<F>> {
    /// GP prior kernel
    kernel: K,
    /// NNGP configuration
    params: NngpValidParams,
    #[cfg_attr(feature = "serializable", serde(skip))]
    phantom: PhantomData<F>,
}

impl<F: Float, K: KernelModel<F>> fmt::Display for NearestNeighborInterpolator<F, K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "NearestNeighborInterpolator(kernel={}, num_neighbors={})",
            self.kernel,
            self.params.num_neighbors()
        )
    }
}

impl<F: Float, K: KernelModel<F>> NearestNeighborInterpolator<F, K> {
    /// Constructor given the GP prior kernel and validated NNGP parameters
    pub fn new(kernel: K, params: NngpValidParams) -> Result<Self> {
        if let (PointOrdering::Coordinate(d), Some(nx)) = (params.ordering(), kernel.num_dim()) {
            if d >= nx {
                return Err(GpError::InvalidValueError(format!(
                    "ordering coordinate {d} is out of kernel dimension {nx}"
                )));
            }
        }
        Ok(NearestNeighborInterpolator {
            kernel,
            params,
            phantom: PhantomData,
        })
    }

    /// NNGP configuration
    pub fn params(&self) -> &NngpValidParams {
        &self.params
    }

    /// Number of neighbors actually used given `n` source points
    fn effective_neighbors(&self, n: usize) -> Result<usize> {
        let k = self.params.num_neighbors();
        if k >= n && !self.params.allow_full_neighborhood() {
            return Err(GpError::UnsupportedConfiguration(format!(
                "num_neighbors ({k}) should be lower than the number of sources ({n}), \
                 use the dense interpolator or allow full neighborhoods"
            )));
        }
        Ok(k.min(n.saturating_sub(1)))
    }

    /// Neighbor search structure over the source points
    fn source_index<'a>(&self, source_x: ArrayView2<'a, F>) -> SourceIndex<'a, F> {
        match self.params.metric() {
            NeighborMetric::Euclidean => SourceIndex::Tree(KdTree::new(source_x)),
            NeighborMetric::Covariance => SourceIndex::Scan(source_x),
        }
    }

    /// `count` nearest sources from `point` among those `accept` keeps, nearest first,
    /// ties broken by lower index
    fn nearest(
        &self,
        index: &SourceIndex<F>,
        point: &ArrayView1<F>,
        count: usize,
        accept: impl Fn(usize) -> bool,
    ) -> Vec<usize> {
        match index {
            SourceIndex::Tree(tree) => tree.nearest(point, count, accept),
            SourceIndex::Scan(source_x) => self.scan_nearest(source_x, point, count, accept),
        }
    }

    /// Brute-force search where larger covariance is nearer
    fn scan_nearest(
        &self,
        source_x: &ArrayView2<F>,
        point: &ArrayView1<F>,
        count: usize,
        accept: impl Fn(usize) -> bool,
    ) -> Vec<usize> {
        let ids: Vec<usize> = (0..source_x.nrows()).filter(|&j| accept(j)).collect();
        if count == 0 || ids.is_empty() {
            return Vec::new();
        }
        let candidates = source_x.select(Axis(0), &ids);
        let cov = self
            .kernel
            .value(&repeat_row(point, candidates.nrows()), &candidates);
        let mut ranked: Vec<(F, usize)> = cov
            .iter()
            .map(|&v| if v.is_nan() { F::infinity() } else { -v })
            .zip(ids)
            .collect();
        let cmp = |a: &(F, usize), b: &(F, usize)| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then(a.1.cmp(&b.1))
        };
        if count < ranked.len() {
            ranked.select_nth_unstable_by(count, cmp);
            ranked.truncate(count);
        }
        ranked.sort_by(cmp);
        ranked.into_iter().map(|(_, id)| id).collect()
    }

    /// Source `idx` followed by its `count` nearest other sources
    fn prediction_neighborhood(&self, index: &SourceIndex<F>, idx: usize, count: usize) -> Vec<usize> {
        let mut neighborhood = vec![idx];
        neighborhood.extend(self.nearest(index, &index.points().row(idx), count, |j| j != idx));
        neighborhood
    }

    /// Nearest source of every target
    fn nearest_sources(&self, index: &SourceIndex<F>, target_x: &ArrayView2<F>) -> Vec<usize> {
        (0..target_x.nrows())
            .into_par_iter()
            .map(|t| {
                self.nearest(index, &target_x.row(t), 1, |_| true)
                    .first()
                    .copied()
                    .unwrap_or(0)
            })
            .collect()
    }

    /// Orders the source points and selects, for each of them, the `min(k, rank)`
    /// nearest points of lower rank.
    pub fn neighbor_graph(
        &self,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<NeighborGraph> {
        let n = source_x.nrows();
        if n == 0 {
            return Err(GpError::InvalidValueError(
                "at least one source point is required".to_string(),
            ));
        }
        let k = self.effective_neighbors(n)?;
        if self.params.metric() == NeighborMetric::Covariance {
            check_kernel_dim(&self.kernel, source_x, source_x)?;
        }
        let source_x = source_x.view();

        let mut order: Vec<usize> = (0..n).collect();
        if let PointOrdering::Coordinate(d) = self.params.ordering() {
            if d >= source_x.ncols() {
                return Err(GpError::InvalidValueError(format!(
                    "ordering coordinate {d} is out of point dimension {}",
                    source_x.ncols()
                )));
            }
            let coord = source_x.column(d);
            order.sort_by(|&a, &b| {
                coord[a]
                    .partial_cmp(&coord[b])
                    .unwrap_or(Ordering::Equal)
                    .then(a.cmp(&b))
            });
        }

        let mut ranks = vec![0; n];
        for (rank, &idx) in order.iter().enumerate() {
            ranks[idx] = rank;
        }
        let index = self.source_index(source_x);
        let neighbors: Vec<Vec<usize>> = (0..n)
            .into_par_iter()
            .map(|rank| {
                self.nearest(
                    &index,
                    &source_x.row(order[rank]),
                    k.min(rank),
                    |j| ranks[j] < rank,
                )
            })
            .collect();
        Ok(NeighborGraph { order, neighbors })
    }

    /// Vecchia factorization of the source covariance
    pub fn factor(&self, source_x: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Result<NngpFactor<F>> {
        check_kernel_dim(&self.kernel, source_x, source_x)?;
        let now = Instant::now();
        let graph = self.neighbor_graph(source_x)?;
        let source_x = source_x.view();

        let blocks = (0..graph.len())
            .into_par_iter()
            .map(|rank| -> Result<(Array1<F>, F)> {
                let idx = graph.order[rank];
                let xi = source_x.slice(s![idx..idx + 1, ..]);
                let c_ii = self.kernel.value(&xi, &xi)[0];
                let nbrs = &graph.neighbors[rank];
                if nbrs.is_empty() {
                    return Ok((Array1::zeros(0), c_ii));
                }
                let xn = source_x.select(Axis(0), nbrs);
                let c_nn = pairwise_covariance(&self.kernel, &xn, &xn)?;
                let c_ni = pairwise_covariance(&self.kernel, &xn, &xi)?;
                let b = cho_solve(&cholesky(&c_nn)?, &c_ni)?;
                let var = c_ii - c_ni.t().dot(&b)[[0, 0]];
                if var <= F::zero() || var.is_nan() {
                    return Err(GpError::NotPositiveDefinite(format!(
                        "conditional variance {var} of source point {idx} is not positive"
                    )));
                }
                Ok((b.remove_axis(Axis(1)), var))
            })
            .collect::<Result<Vec<_>>>()?;
        let (coefficients, variances): (Vec<_>, Vec<_>) = blocks.into_iter().unzip();
        debug!(
            "NNGP factor of {} sources in {:?}",
            graph.len(),
            now.elapsed()
        );
        Ok(NngpFactor {
            graph,
            coefficients,
            variances: Array1::from(variances),
        })
    }
}

impl<F: Float, K: KernelModel<F>> GpInterpolator<F> for NearestNeighborInterpolator<F, K> {
    type Kernel = K;
    type Compressed = NngpCompressed<F>;

    fn kernel(&self) -> &K {
        &self.kernel
    }

    fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    fn compress(
        &self,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<NngpCompressed<F>> {
        check_training_data(source_x, source_f)?;
        check_kernel_dim(&self.kernel, source_x, source_x)?;
        let k = self.effective_neighbors(source_x.nrows())?;
        let now = Instant::now();
        let (source_x, source_f) = (source_x.view(), source_f.view());
        let index = self.source_index(source_x);

        let compressed = (0..source_x.nrows())
            .into_par_iter()
            .map(|idx| -> Result<(Vec<usize>, Array1<F>)> {
                let neighborhood = self.prediction_neighborhood(&index, idx, k);
                let xm = source_x.select(Axis(0), &neighborhood);
                let fm = source_f.select(Axis(0), &neighborhood);
                let c_mm = pairwise_covariance(&self.kernel, &xm, &xm)?;
                let weights = cho_solve(&cholesky(&c_mm)?, &fm.insert_axis(Axis(1)))?;
                Ok((neighborhood, weights.remove_axis(Axis(1))))
            })
            .collect::<Result<Vec<_>>>()?;
        let (neighborhoods, weights) = compressed.into_iter().unzip();
        debug!(
            "NNGP compress {} sources in {:?}",
            source_x.nrows(),
            now.elapsed()
        );
        Ok(NngpCompressed {
            neighborhoods,
            weights,
        })
    }

    fn predict(
        &self,
        target_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        compressed: &NngpCompressed<F>,
    ) -> Result<Array1<F>> {
        check_same_dim(target_x, source_x)?;
        check_kernel_dim(&self.kernel, target_x, source_x)?;
        if compressed.len() != source_x.nrows() || source_x.nrows() == 0 {
            return Err(GpError::InvalidValueError(format!(
                "compressed representation of {} sources does not match {} source points",
                compressed.len(),
                source_x.nrows()
            )));
        }
        let (target_x, source_x) = (target_x.view(), source_x.view());
        let nearest = self.nearest_sources(&self.source_index(source_x), &target_x);
        let mean: Vec<F> = nearest
            .par_iter()
            .enumerate()
            .map(|(t, &idx)| {
                let neighborhood = compressed.neighborhood(idx);
                let xm = source_x.select(Axis(0), neighborhood);
                let c_tm = self
                    .kernel
                    .value(&repeat_row(&target_x.row(t), xm.nrows()), &xm);
                c_tm.dot(compressed.weights(idx))
            })
            .collect();
        Ok(Array1::from(mean))
    }

    /// Mean and prediction-error covariance of the linear predictors
    /// `f(t) ~ b_t^t f_M(t)` where `M(t)` is the prediction neighborhood of the
    /// nearest source of `t`.
    ///
    /// Every covariance entry is assembled from neighborhood-sized blocks:
    ///
    /// `Cov[t, t'] = C_tt' - b_t^t C_M(t)t' - C_tM(t') b_t' + b_t^t C_M(t)M(t') b_t'`
    fn condition(
        &self,
        target_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<(Array1<F>, Array2<F>)> {
        check_training_data(source_x, source_f)?;
        check_same_dim(target_x, source_x)?;
        check_kernel_dim(&self.kernel, target_x, source_x)?;
        let ns = source_x.nrows();
        let k = self.effective_neighbors(ns)?;
        let nt = target_x.nrows();
        if nt == 0 {
            return Ok((Array1::zeros(0), Array2::zeros((0, 0))));
        }
        let now = Instant::now();
        let (target_x, source_x, source_f) = (target_x.view(), source_x.view(), source_f.view());
        let index = self.source_index(source_x);

        let predictors = self
            .nearest_sources(&index, &target_x)
            .into_par_iter()
            .enumerate()
            .map(|(t, idx)| -> Result<(Array2<F>, Array1<F>, F)> {
                let neighborhood = self.prediction_neighborhood(&index, idx, k);
                let xm = source_x.select(Axis(0), &neighborhood);
                let c_mm = pairwise_covariance(&self.kernel, &xm, &xm)?;
                let c_mt = self
                    .kernel
                    .value(&xm, &repeat_row(&target_x.row(t), xm.nrows()));
                let b = cho_solve(&cholesky(&c_mm)?, &c_mt.insert_axis(Axis(1)))?
                    .remove_axis(Axis(1));
                let mean = b.dot(&source_f.select(Axis(0), &neighborhood));
                Ok((xm, b, mean))
            })
            .collect::<Result<Vec<_>>>()?;

        // neighborhoods all have k + 1 points
        let m = k + 1;
        let stacked_x = concatenate(
            Axis(0),
            &predictors.iter().map(|(xm, _, _)| xm.view()).collect::<Vec<_>>(),
        )?;
        let stacked_b = concatenate(
            Axis(0),
            &predictors.iter().map(|(_, b, _)| b.view()).collect::<Vec<_>>(),
        )?;

        // upper triangle, row t holds Cov[t, t..]
        let rows = predictors
            .par_iter()
            .enumerate()
            .map(|(t, (xm, b, _))| -> Result<Array1<F>> {
                let n = nt - t;
                let xt = target_x.slice(s![t.., ..]);
                let xs = stacked_x.slice(s![t * m.., ..]);
                let bs = stacked_b.slice(s![t * m..]);
                let c_tt = self.kernel.value(&repeat_row(&target_x.row(t), n), &xt);
                // b_t^t C_M(t)t'
                let c_bt = b.dot(&pairwise_covariance(&self.kernel, xm, &xt)?);
                // C_tM(t') b_t'
                let c_tb = (self.kernel.value(&repeat_row(&target_x.row(t), n * m), &xs) * &bs)
                    .into_shape((n, m))?
                    .sum_axis(Axis(1));
                // b_t^t C_M(t)M(t') b_t'
                let c_bb = (b.dot(&pairwise_covariance(&self.kernel, xm, &xs)?) * &bs)
                    .into_shape((n, m))?
                    .sum_axis(Axis(1));
                Ok(c_tt - c_bt - c_tb + c_bb)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut cov = Array2::<F>::zeros((nt, nt));
        for (t, row) in rows.iter().enumerate() {
            cov.slice_mut(s![t, t..]).assign(row);
            cov.slice_mut(s![t.., t]).assign(row);
        }
        let mean = predictors.iter().map(|(_, _, mean)| *mean).collect::<Array1<F>>();
        debug!(
            "NNGP condition {} targets on {} sources in {:?}",
            nt,
            ns,
            now.elapsed()
        );
        Ok((mean, cov))
    }

    fn loglikelihood(
        &self,
        source_x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        source_f: &ArrayBase<impl Data<Elem = F>, Ix1>,
    ) -> Result<F> {
        check_training_data(source_x, source_f)?;
        self.factor(source_x)?.loglikelihood(source_f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Interpolator;
    use crate::parameters::OptimizeParams;
    use crate::sparse_parameters::NngpParams;
    use crate::utils::squared_distance;
    use approx::assert_abs_diff_eq;
    use linfa::ParamGuard;
    use linfa_linalg::eigh::*;
    use ndarray::{array, Array};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use paste::paste;
    use rand_xoshiro::Xoshiro256Plus;

    fn training_data() -> (Array2<f64>, Array1<f64>) {
        let xt = array![[0.0], [5.0], [10.0], [15.0], [18.0], [20.0], [25.0]];
        let yt = ((&xt - 3.5) * ((&xt - 3.5) / std::f64::consts::PI).mapv(|v| v.sin()))
            .remove_axis(Axis(1));
        (xt, yt)
    }

    fn nngp(kernel: Kernel<f64>, params: NngpParams) -> NearestNeighborInterpolator<f64> {
        NearestNeighborInterpolator::new(kernel, params.check().unwrap()).unwrap()
    }

    #[test]
    fn test_neighbor_graph_coordinate_ordering() {
        let xs = array![[3.], [0.], [2.], [1.], [4.]];
        let gp = nngp(
            Kernel::squared_exponential(1., &[1.]).unwrap(),
            NngpParams::new(2),
        );
        let graph = gp.neighbor_graph(&xs).unwrap();
        assert_eq!(5, graph.len());
        assert_eq!(&[1, 3, 2, 0, 4], graph.order());
        assert_eq!(vec![3, 0, 2, 1, 4], graph.ranks());
        assert!(graph.neighbors(0).is_empty());
        assert_eq!(&[1], graph.neighbors(1));
        assert_eq!(&[3, 1], graph.neighbors(2));
        assert_eq!(&[2, 3], graph.neighbors(3));
        assert_eq!(&[0, 2], graph.neighbors(4));
    }

    #[test]
    fn test_neighbor_graph_ties() {
        let xs = array![[-1.], [1.], [0.]];
        let gp = nngp(
            Kernel::squared_exponential(1., &[1.]).unwrap(),
            NngpParams::new(1).ordering(PointOrdering::Given),
        );
        let graph = gp.neighbor_graph(&xs).unwrap();
        assert_eq!(&[0, 1, 2], graph.order());
        assert_eq!(&[0], graph.neighbors(1));
        // equidistant predecessors, lowest index wins
        assert_eq!(&[0], graph.neighbors(2));
    }

    #[test]
    fn test_neighbor_graph_covariance_metric() {
        // second dimension is almost irrelevant for the kernel
        let xs = array![[0., 0.], [0.1, 3.], [2., 0.], [0.1, 0.]];
        let kernel = Kernel::squared_exponential(1., &[1., 100.]).unwrap();
        let euclid = nngp(kernel.clone(), NngpParams::new(1).ordering(PointOrdering::Given));
        let cov = nngp(
            kernel,
            NngpParams::new(1)
                .ordering(PointOrdering::Given)
                .metric(NeighborMetric::Covariance),
        );
        let graph = euclid.neighbor_graph(&xs).unwrap();
        assert_eq!(&[0], graph.neighbors(1));
        assert_eq!(&[0], graph.neighbors(2));
        assert_eq!(&[0], graph.neighbors(3));
        let graph = cov.neighbor_graph(&xs).unwrap();
        assert_eq!(&[0], graph.neighbors(1));
        assert_eq!(&[1], graph.neighbors(2));
        // same first coordinate as point 1
        assert_eq!(&[1], graph.neighbors(3));
    }

    macro_rules! test_dense_equivalence {
        ($name:ident, $metric:expr) => {
            paste! {
                #[test]
                fn [<test_ $name _full_neighborhood_matches_dense>]() {
                    let (xt, yt) = training_data();
                    let kernel = Kernel::combined(vec![
                        Kernel::squared_exponential(10., &[5.]).unwrap(),
                        Kernel::white_noise(0.1),
                    ])
                    .unwrap();
                    let dense = Interpolator::new(kernel.clone());
                    let sparse = nngp(kernel, NngpParams::new(xt.nrows() - 1).metric($metric));

                    let ll_dense = dense.loglikelihood(&xt, &yt).unwrap();
                    let ll_sparse = sparse.loglikelihood(&xt, &yt).unwrap();
                    assert_abs_diff_eq!(ll_dense, ll_sparse, epsilon = 1e-6);

                    let xtest = Array::linspace(-2., 27., 30).insert_axis(Axis(1));
                    let (mean, cov) = dense.condition(&xtest, &xt, &yt).unwrap();
                    let (smean, scov) = sparse.condition(&xtest, &xt, &yt).unwrap();
                    assert_abs_diff_eq!(mean, smean, epsilon = 1e-6);
                    assert_abs_diff_eq!(cov, scov, epsilon = 1e-6);

                    let compressed = sparse.compress(&xt, &yt).unwrap();
                    let pred = sparse.predict(&xtest, &xt, &compressed).unwrap();
                    assert_abs_diff_eq!(mean, pred, epsilon = 1e-6);
                }
            }
        };
    }

    test_dense_equivalence!(euclidean, NeighborMetric::Euclidean);
    test_dense_equivalence!(covariance, NeighborMetric::Covariance);

    #[test]
    fn test_full_neighborhood_flag() {
        let (xt, yt) = training_data();
        let kernel = Kernel::squared_exponential(10., &[5.]).unwrap();
        let strict = nngp(kernel.clone(), NngpParams::new(xt.nrows()));
        assert!(matches!(
            strict.loglikelihood(&xt, &yt),
            Err(GpError::UnsupportedConfiguration(_))
        ));
        assert!(matches!(
            strict.compress(&xt, &yt),
            Err(GpError::UnsupportedConfiguration(_))
        ));
        assert!(matches!(
            strict.condition(&xt, &xt, &yt),
            Err(GpError::UnsupportedConfiguration(_))
        ));
        assert!(matches!(
            strict.neighbor_graph(&xt),
            Err(GpError::UnsupportedConfiguration(_))
        ));

        let full = nngp(
            kernel.clone(),
            NngpParams::new(20).allow_full_neighborhood(true),
        );
        let dense = Interpolator::new(kernel);
        assert_abs_diff_eq!(
            dense.loglikelihood(&xt, &yt).unwrap(),
            full.loglikelihood(&xt, &yt).unwrap(),
            epsilon = 1e-6
        );
        let graph = full.neighbor_graph(&xt).unwrap();
        assert_eq!(6, graph.neighbors(6).len());
    }

    #[test]
    fn test_markov_kernel_is_exact_with_one_neighbor() {
        // exponential kernel in 1d is markovian
        let (xt, yt) = training_data();
        let kernel = Kernel::matern(0.5, 3., &[4.]).unwrap();
        let dense = Interpolator::new(kernel.clone());
        let sparse = nngp(kernel, NngpParams::new(1));
        assert_abs_diff_eq!(
            dense.loglikelihood(&xt, &yt).unwrap(),
            sparse.loglikelihood(&xt, &yt).unwrap(),
            epsilon = 1e-6
        );
    }

    #[test]
    fn test_factor_precision() {
        let (xt, _) = training_data();
        let kernel = Kernel::squared_exponential(10., &[5.]).unwrap();
        let sparse = nngp(kernel.clone(), NngpParams::new(xt.nrows() - 1));
        let factor = sparse.factor(&xt).unwrap();
        assert_eq!(0, factor.coefficients(0).len());
        assert_abs_diff_eq!(factor.variances()[0], 100., epsilon = 1e-10);
        let k = kernel.cov(&xt, &xt).unwrap();
        let identity = factor.precision().dot(&k);
        assert_abs_diff_eq!(identity, Array2::eye(xt.nrows()), epsilon = 1e-6);

        let sparse = nngp(kernel, NngpParams::new(2));
        let factor = sparse.factor(&xt).unwrap();
        assert!(factor.variances().iter().all(|v| *v > 0.));
        let precision = factor.precision();
        assert_abs_diff_eq!(precision.t(), precision.view(), epsilon = 1e-10);
    }

    #[test]
    fn test_small_neighborhood_condition() {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let xs = Array2::random_using((30, 2), Uniform::new(0., 10.), &mut rng);
        let fs = xs.column(0).mapv(f64::sin) + xs.column(1).mapv(f64::cos);
        let xtest = Array2::random_using((10, 2), Uniform::new(0., 10.), &mut rng);
        let kernel = Kernel::squared_exponential(1., &[2., 3.]).unwrap();
        let sparse = nngp(kernel, NngpParams::new(3));

        let compressed = sparse.compress(&xs, &fs).unwrap();
        assert_eq!(30, compressed.len());
        assert_eq!(7, compressed.neighborhood(7)[0]);
        assert_eq!(4, compressed.neighborhood(7).len());
        let pred = sparse.predict(&xs, &xs, &compressed).unwrap();
        assert_abs_diff_eq!(pred, fs, epsilon = 1e-6);

        let (mean, cov) = sparse.condition(&xtest, &xs, &fs).unwrap();
        let pred = sparse.predict(&xtest, &xs, &compressed).unwrap();
        assert_abs_diff_eq!(mean, pred, epsilon = 1e-8);
        assert_abs_diff_eq!(cov.t(), cov.view(), epsilon = 1e-12);
        let (eigvals, _) = cov.clone().eigh_into().unwrap();
        assert!(eigvals.iter().all(|v| *v > -1e-8));
        assert!(cov.diag().iter().all(|v| *v <= 1. + 1e-8));

        // no uncertainty at sources
        let (_, cov) = sparse.condition(&xs, &xs, &fs).unwrap();
        assert_abs_diff_eq!(cov.diag(), Array1::zeros(30), epsilon = 1e-6);
    }

    fn scan(
        xs: &Array2<f64>,
        point: &ArrayView1<f64>,
        count: usize,
        accept: impl Fn(usize) -> bool,
    ) -> Vec<usize> {
        let mut ranked: Vec<(f64, usize)> = (0..xs.nrows())
            .filter(|&j| accept(j))
            .map(|j| (squared_distance(point, &xs.row(j)), j))
            .collect();
        ranked.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap().then(a.1.cmp(&b.1)));
        ranked.into_iter().take(count).map(|(_, j)| j).collect()
    }

    #[test]
    fn test_euclidean_neighbors_match_full_scan() {
        let mut rng = Xoshiro256Plus::seed_from_u64(7);
        let xs = Array2::random_using((200, 2), Uniform::new(0., 10.), &mut rng);
        let fs = xs.column(0).mapv(f64::sin);
        let k = 4;
        let sparse = nngp(
            Kernel::matern(1.5, 1., &[2., 2.]).unwrap(),
            NngpParams::new(k),
        );

        let graph = sparse.neighbor_graph(&xs).unwrap();
        let ranks = graph.ranks();
        for rank in 0..graph.len() {
            let point = xs.row(graph.order()[rank]);
            let expected = scan(&xs, &point, k.min(rank), |j| ranks[j] < rank);
            assert_eq!(expected.as_slice(), graph.neighbors(rank));
        }

        let compressed = sparse.compress(&xs, &fs).unwrap();
        for idx in 0..xs.nrows() {
            let mut expected = vec![idx];
            expected.extend(scan(&xs, &xs.row(idx), k, |j| j != idx));
            assert_eq!(expected.as_slice(), compressed.neighborhood(idx));
        }
    }

    #[test]
    fn test_condition_covariance_from_neighborhood_blocks() {
        let mut rng = Xoshiro256Plus::seed_from_u64(3);
        let xs = Array2::random_using((40, 2), Uniform::new(0., 10.), &mut rng);
        let fs = xs.column(0).mapv(f64::sin) * xs.column(1).mapv(f64::cos);
        let xtest = Array2::random_using((12, 2), Uniform::new(0., 10.), &mut rng);
        let kernel = Kernel::matern(1.5, 1.3, &[1.5, 2.5]).unwrap();
        let sparse = nngp(kernel.clone(), NngpParams::new(4));
        let compressed = sparse.compress(&xs, &fs).unwrap();
        let (mean, cov) = sparse.condition(&xtest, &xs, &fs).unwrap();

        // linear predictor of every target on the neighborhood of its nearest source
        let predictors: Vec<(Array2<f64>, Array1<f64>)> = xtest
            .rows()
            .into_iter()
            .map(|t| {
                let nearest = scan(&xs, &t, 1, |_| true)[0];
                let neighborhood = compressed.neighborhood(nearest);
                let xm = xs.select(Axis(0), neighborhood);
                let c_mm = kernel.cov(&xm, &xm).unwrap();
                let c_mt = kernel.cov(&xm, &t.insert_axis(Axis(0))).unwrap();
                let b = cho_solve(&cholesky(&c_mm).unwrap(), &c_mt).unwrap();
                (xm, b.remove_axis(Axis(1)))
            })
            .collect();

        for (i, (xm_i, b_i)) in predictors.iter().enumerate() {
            let fm = fs.select(Axis(0), compressed.neighborhood(scan(&xs, &xtest.row(i), 1, |_| true)[0]));
            assert_abs_diff_eq!(mean[i], b_i.dot(&fm), epsilon = 1e-10);
            let ti = xtest.slice(s![i..i + 1, ..]);
            for (j, (xm_j, b_j)) in predictors.iter().enumerate() {
                let tj = xtest.slice(s![j..j + 1, ..]);
                let expected = kernel.cov(&ti, &tj).unwrap()[[0, 0]]
                    - b_i.dot(&kernel.cov(xm_i, &tj).unwrap().column(0))
                    - b_j.dot(&kernel.cov(xm_j, &ti).unwrap().column(0))
                    + b_i.dot(&kernel.cov(xm_i, xm_j).unwrap()).dot(b_j);
                assert_abs_diff_eq!(cov[[i, j]], expected, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_bad_configurations() {
        let kernel = Kernel::squared_exponential(1., &[1.]).unwrap();
        assert!(matches!(
            NearestNeighborInterpolator::new(
                kernel.clone(),
                NngpParams::new(2).ordering(PointOrdering::Coordinate(1)).check().unwrap()
            ),
            Err(GpError::InvalidValueError(_))
        ));

        let noise = nngp(
            Kernel::white_noise(1.),
            NngpParams::new(1).ordering(PointOrdering::Coordinate(1)),
        );
        assert!(matches!(
            noise.neighbor_graph(&array![[0.], [1.]]),
            Err(GpError::InvalidValueError(_))
        ));

        let (xt, yt) = training_data();
        let sparse = nngp(kernel, NngpParams::new(2));
        assert!(matches!(
            sparse.condition(&array![[0., 1.]], &xt, &yt),
            Err(GpError::DimensionMismatch(_))
        ));
        let compressed = sparse.compress(&xt, &yt).unwrap();
        assert!(matches!(
            sparse.predict(&array![[0., 1.]], &xt, &compressed),
            Err(GpError::DimensionMismatch(_))
        ));
        assert!(matches!(
            sparse.predict(&array![[0.]], &xt.slice(s![..3, ..]), &compressed),
            Err(GpError::InvalidValueError(_))
        ));
    }

    #[test]
    fn test_optimize_nngp_kernel() {
        let (xt, yt) = training_data();
        let sparse = nngp(
            Kernel::squared_exponential(1., &[1.]).unwrap(),
            NngpParams::new(3),
        );
        let params = OptimizeParams::new().n_start(2).seed(0).check().unwrap();
        let tuned = sparse.optimize_kernel(&xt, &yt, &params).unwrap();
        let start = sparse.loglikelihood(&xt, &yt).unwrap();
        assert!(tuned.log_posterior >= start - 1e-8);
        let mut sparse = sparse;
        sparse.set_kernel(tuned.kernel);
        assert_abs_diff_eq!(
            sparse.loglikelihood(&xt, &yt).unwrap(),
            tuned.log_posterior,
            epsilon = 1e-8
        );
        assert!(sparse.to_string().starts_with("NearestNeighborInterpolator("));
    }
}
