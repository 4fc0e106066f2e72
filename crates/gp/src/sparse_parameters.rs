use crate::errors::{GpError, Result};
use linfa::ParamGuard;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Default number of neighbors a source point is conditioned on
pub const NNGP_DEFAULT_NUM_NEIGHBORS: usize = 15;

/// Total order of the source points defining which points a given one may condition on
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum PointOrdering {
    /// Ascending value of the given coordinate, ties broken by position in the source set
    Coordinate(usize),
    /// Order of the source set as given
    Given,
}
impl Default for PointOrdering {
    fn default() -> PointOrdering {
        Self::Coordinate(0)
    }
}

/// Metric used to select the nearest neighbors
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum NeighborMetric {
    #[default]
    /// Euclidean distance between points
    Euclidean,
    /// Kernel covariance between points, a larger covariance means nearer
    Covariance,
}

/// A set of validated NNGP parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct NngpValidParams {
    /// Maximum number of neighbors per point
    num_neighbors: usize,
    /// Ordering of the source points
    ordering: PointOrdering,
    /// Neighbor selection metric
    metric: NeighborMetric,
    /// Whether `num_neighbors` may be greater than or equal to the number of sources
    allow_full_neighborhood: bool,
}

impl Default for NngpValidParams {
    fn default() -> NngpValidParams {
        NngpValidParams {
            num_neighbors: NNGP_DEFAULT_NUM_NEIGHBORS,
            ordering: PointOrdering::default(),
            metric: NeighborMetric::default(),
            allow_full_neighborhood: false,
        }
    }
}

impl NngpValidParams {
    /// Get the maximum number of neighbors per point
    pub fn num_neighbors(&self) -> usize {
        self.num_neighbors
    }
    /// Get the source points ordering
    pub fn ordering(&self) -> PointOrdering {
        self.ordering
    }
    /// Get the neighbor selection metric
    pub fn metric(&self) -> NeighborMetric {
        self.metric
    }
    /// Whether neighborhoods may span every source point
    pub fn allow_full_neighborhood(&self) -> bool {
        self.allow_full_neighborhood
    }
}

#[derive(Clone, Debug)]
/// The set of hyperparameters that can be specified for the
/// [nearest neighbor interpolator](crate::NearestNeighborInterpolator).
pub struct NngpParams(NngpValidParams);

impl NngpParams {
    /// A constructor for NNGP parameters given the number of neighbors
    pub fn new(num_neighbors: usize) -> NngpParams {
        Self(NngpValidParams {
            num_neighbors,
            ..Default::default()
        })
    }

    /// Set the maximum number of neighbors per point.
    ///
    /// Should be 0 < k < number of sources unless
    /// [`NngpParams::allow_full_neighborhood`] is set
    pub fn num_neighbors(mut self, num_neighbors: usize) -> Self {
        self.0.num_neighbors = num_neighbors;
        self
    }

    /// Set the source points ordering
    pub fn ordering(mut self, ordering: PointOrdering) -> Self {
        self.0.ordering = ordering;
        self
    }

    /// Set the neighbor selection metric
    pub fn metric(mut self, metric: NeighborMetric) -> Self {
        self.0.metric = metric;
        self
    }

    /// Accept `num_neighbors` greater than or equal to the number of sources,
    /// neighborhoods being then truncated to every other source point.
    pub fn allow_full_neighborhood(mut self, allow: bool) -> Self {
        self.0.allow_full_neighborhood = allow;
        self
    }
}

impl Default for NngpParams {
    fn default() -> NngpParams {
        NngpParams::new(NNGP_DEFAULT_NUM_NEIGHBORS)
    }
}

impl From<NngpValidParams> for NngpParams {
    fn from(valid: NngpValidParams) -> Self {
        NngpParams(valid)
    }
}

impl ParamGuard for NngpParams {
    type Checked = NngpValidParams;
    type Error = GpError;

    fn check_ref(&self) -> Result<&Self::Checked> {
        if self.0.num_neighbors == 0 {
            return Err(GpError::InvalidValueError(
                "`num_neighbors` cannot be 0!".to_string(),
            ));
        }
        Ok(&self.0)
    }

    fn check(self) -> Result<Self::Checked> {
        self.check_ref()?;
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nngp_params_defaults() {
        let params = NngpParams::default().check().unwrap();
        assert_eq!(NNGP_DEFAULT_NUM_NEIGHBORS, params.num_neighbors());
        assert_eq!(PointOrdering::Coordinate(0), params.ordering());
        assert_eq!(NeighborMetric::Euclidean, params.metric());
        assert!(!params.allow_full_neighborhood());
    }

    #[test]
    fn test_nngp_params_builder() {
        let params = NngpParams::new(3)
            .ordering(PointOrdering::Given)
            .metric(NeighborMetric::Covariance)
            .allow_full_neighborhood(true)
            .check()
            .unwrap();
        assert_eq!(3, params.num_neighbors());
        assert_eq!(PointOrdering::Given, params.ordering());
        assert_eq!(NeighborMetric::Covariance, params.metric());
        assert!(params.allow_full_neighborhood());

        let again = NngpParams::from(params.clone()).num_neighbors(5).check().unwrap();
        assert_eq!(5, again.num_neighbors());
        assert_eq!(params.ordering(), again.ordering());
    }

    #[test]
    fn test_nngp_params_zero_neighbors() {
        assert!(matches!(
            NngpParams::new(0).check(),
            Err(GpError::InvalidValueError(_))
        ));
    }
}
