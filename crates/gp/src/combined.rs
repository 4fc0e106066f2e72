//! Sum of covariance kernels.
//!
//! The parameters of a [`CombinedKernel`] are the concatenation of its children
//! parameters. Names are suffixed by the index of the child they belong to
//! (`sigma_0`, `length0_1`, ...) while flat parameter vectors are routed with a
//! `(child, local index)` table.

use crate::errors::{GpError, Result};
use crate::kernels::{check_kernel_dim, Kernel, KernelModel};
use linfa::Float;
use ndarray::{s, Array1, ArrayBase, Data, Ix1, Ix2};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix `name` with the child index `idx`: `join_param_name("sigma", 1) == "sigma_1"`
pub fn join_param_name(name: &str, idx: usize) -> String {
    format!("{name}_{idx}")
}

/// Split a combined parameter name into its child name and child index,
/// `split_param_name("sigma_0_1") == Ok(("sigma_0", 1))`.
pub fn split_param_name(name: &str) -> Result<(&str, usize)> {
    let invalid = || {
        GpError::InvalidParamName(format!(
            "could not parse a kernel index from parameter name `{name}`"
        ))
    };
    let (base, suffix) = name.rsplit_once('_').ok_or_else(invalid)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let idx = suffix.parse::<usize>().map_err(|_| invalid())?;
    Ok((base, idx))
}

/// A kernel summing the covariances of at least two child kernels
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct CombinedKernel<F: Float> {
    kernels: Vec<Kernel<F>>,
    /// `(child index, local index)` of every flat parameter
    layout: Vec<(usize, usize)>,
    num_dim: Option<usize>,
}

impl<F: Float> CombinedKernel<F> {
    /// Constructor given the child kernels.
    ///
    /// # Errors
    /// * `InvalidValueError` when less than two kernels are given
    /// * `DimensionMismatch` when children do not share the same dimension
    pub fn new(kernels: Vec<Kernel<F>>) -> Result<Self> {
        if kernels.len() < 2 {
            return Err(GpError::InvalidValueError(format!(
                "CombinedKernel requires at least 2 kernels, got {}",
                kernels.len()
            )));
        }
        let mut num_dim = None;
        for kernel in kernels.iter() {
            match (num_dim, kernel.num_dim()) {
                (Some(dim), Some(kdim)) if dim != kdim => {
                    return Err(GpError::DimensionMismatch(format!(
                        "CombinedKernel children have different dimensions ({dim} vs {kdim})"
                    )))
                }
                (None, Some(kdim)) => num_dim = Some(kdim),
                _ => (),
            }
        }
        let layout = kernels
            .iter()
            .enumerate()
            .flat_map(|(i, k)| (0..k.num_params()).map(move |j| (i, j)))
            .collect();
        Ok(CombinedKernel {
            kernels,
            layout,
            num_dim,
        })
    }

    /// Child kernels
    pub fn kernels(&self) -> &[Kernel<F>] {
        &self.kernels
    }

    /// `(child index, local index)` of the flat parameter `idx`
    pub fn param_location(&self, idx: usize) -> Option<(usize, usize)> {
        self.layout.get(idx).copied()
    }
}

impl<F: Float> KernelModel<F> for CombinedKernel<F> {
    fn kind(&self) -> &'static str {
        "CombinedKernel"
    }

    fn param_names(&self) -> Vec<String> {
        self.kernels
            .iter()
            .enumerate()
            .flat_map(|(i, k)| {
                k.param_names()
                    .into_iter()
                    .map(move |name| join_param_name(&name, i))
            })
            .collect()
    }

    fn params(&self) -> Array1<F> {
        self.kernels
            .iter()
            .flat_map(|k| k.params().to_vec())
            .collect()
    }

    fn set_params(&mut self, params: &ArrayBase<impl Data<Elem = F>, Ix1>) -> Result<()> {
        if params.len() != self.layout.len() {
            return Err(GpError::InvalidValueError(format!(
                "CombinedKernel expects {} parameters, got {}",
                self.layout.len(),
                params.len()
            )));
        }
        let mut kernels = self.kernels.clone();
        let mut offset = 0;
        for kernel in kernels.iter_mut() {
            let n = kernel.num_params();
            kernel.set_params(&params.slice(s![offset..offset + n]))?;
            offset += n;
        }
        self.kernels = kernels;
        Ok(())
    }

    fn num_dim(&self) -> Option<usize> {
        self.num_dim
    }

    fn value(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Array1<F> {
        let mut values = Array1::zeros(x1.nrows());
        for kernel in self.kernels.iter() {
            values += &kernel.value(x1, x2);
        }
        values
    }

    /// Names are routed to children according to their `_<index>` suffix.
    ///
    /// # Errors
    /// `InvalidParamName` when a name has no parseable index or an index beyond the
    /// number of children. No child is modified in that case.
    fn update<S: AsRef<str>>(&mut self, params: &[(S, F)]) -> Result<Vec<String>> {
        let mut groups: Vec<Vec<(&str, F)>> = vec![Vec::new(); self.kernels.len()];
        for (name, value) in params {
            let (base, idx) = split_param_name(name.as_ref())?;
            match groups.get_mut(idx) {
                Some(group) => group.push((base, *value)),
                None => {
                    return Err(GpError::InvalidParamName(format!(
                        "parameter `{}` refers to kernel {} but CombinedKernel has {} kernels",
                        name.as_ref(),
                        idx,
                        self.kernels.len()
                    )))
                }
            }
        }

        let mut kernels = self.kernels.clone();
        let mut ignored = Vec::new();
        for (idx, (kernel, group)) in kernels.iter_mut().zip(groups).enumerate() {
            if !group.is_empty() {
                ignored.extend(
                    kernel
                        .update(&group)?
                        .iter()
                        .map(|name| join_param_name(name, idx)),
                );
            }
        }
        self.kernels = kernels;
        Ok(ignored)
    }

    fn cov(
        &self,
        x1: &ArrayBase<impl Data<Elem = F>, Ix2>,
        x2: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Result<ndarray::Array2<F>> {
        check_kernel_dim(self, x1, x2)?;
        let mut cov = ndarray::Array2::zeros((x1.nrows(), x2.nrows()));
        for kernel in self.kernels.iter() {
            cov += &kernel.cov(x1, x2)?;
        }
        Ok(cov)
    }
}

impl<F: Float> fmt::Display for CombinedKernel<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let children = self
            .kernels
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>();
        write!(f, "{}({})", self.kind(), children.join(", "))
    }
}
