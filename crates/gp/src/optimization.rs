use ndarray::{arr1, Array1, Array2, Zip};
use ndarray_rand::rand::Rng;

use linfa::prelude::Float;

use crate::utils::into_f64;

pub(crate) struct CobylaParams {
    pub rhobeg: f64,
    pub ftol_rel: f64,
    pub maxeval: usize,
}

impl Default for CobylaParams {
    fn default() -> Self {
        CobylaParams {
            rhobeg: 0.5,
            ftol_rel: 1e-4,
            maxeval: 200,
        }
    }
}

/// Starting points of the optimization in log10 space: the given `param0`
/// followed by `n_start` points drawn uniformly within `bounds`.
/// Returns the starting points along with the log10 bounds.
pub(crate) fn prepare_multistart<F: Float, R: Rng>(
    n_start: usize,
    param0: &Array1<F>,
    bounds: &[(F, F)],
    rng: &mut R,
) -> (Array2<F>, Vec<(F, F)>) {
    let bounds: Vec<(F, F)> = bounds
        .iter()
        .map(|(lo, up)| (lo.log10(), up.log10()))
        .collect();

    let mut param0s = Array2::zeros((n_start + 1, param0.len()));
    let start = Zip::from(param0)
        .and(&bounds)
        .map_collect(|v, (lo, up)| v.log10().max(*lo).min(*up));
    param0s.row_mut(0).assign(&start);

    for mut row in param0s.rows_mut().into_iter().skip(1) {
        Zip::from(&mut row).and(&bounds).for_each(|v, (lo, up)| {
            *v = if lo < up {
                F::cast(rng.gen_range(into_f64(*lo)..into_f64(*up)))
            } else {
                *lo
            }
        });
    }
    (param0s, bounds)
}

/// Optimize kernel parameters given an initial guess and bounds with NLOPT::Cobyla
#[cfg(feature = "nlopt")]
pub(crate) fn optimize_params<ObjF, F>(
    objfn: ObjF,
    param0: &Array1<F>,
    bounds: &[(F, F)],
    cobyla: CobylaParams,
) -> (f64, Array1<f64>)
where
    ObjF: Fn(&[f64], Option<&mut [f64]>, &mut ()) -> f64,
    F: Float,
{
    use nlopt::*;

    let mut optimizer = Nlopt::new(Algorithm::Cobyla, param0.len(), objfn, Target::Minimize, ());
    let mut param = param0.map(|v| into_f64(*v)).to_vec();

    let lower_bounds = bounds.iter().map(|b| into_f64(b.0)).collect::<Vec<_>>();
    let upper_bounds = bounds.iter().map(|b| into_f64(b.1)).collect::<Vec<_>>();
    let setup = [
        optimizer.set_lower_bounds(&lower_bounds),
        optimizer.set_upper_bounds(&upper_bounds),
        optimizer.set_initial_step1(cobyla.rhobeg),
        optimizer.set_maxeval(cobyla.maxeval as u32),
        optimizer.set_ftol_rel(cobyla.ftol_rel),
    ];
    if let Some(Err(state)) = setup.iter().find(|res| res.is_err()) {
        log::warn!("NLopt Cobyla optimizer setup failed status={state:?}");
        return (f64::INFINITY, arr1(&param));
    }

    match optimizer.optimize(&mut param) {
        Ok((_, fmin)) => {
            let fval = if f64::is_nan(fmin) {
                f64::INFINITY
            } else {
                fmin
            };
            (fval, arr1(&param))
        }
        Err((status, _)) => {
            log::warn!("NLopt Cobyla optimizer failed status={status:?}");
            (f64::INFINITY, arr1(&param))
        }
    }
}

/// Optimize kernel parameters given an initial guess and bounds with cobyla
#[cfg(not(feature = "nlopt"))]
pub(crate) fn optimize_params<ObjF, F>(
    objfn: ObjF,
    param0: &Array1<F>,
    bounds: &[(F, F)],
    cobyla: CobylaParams,
) -> (f64, Array1<f64>)
where
    ObjF: Fn(&[f64], Option<&mut [f64]>, &mut ()) -> f64,
    F: Float,
{
    use cobyla::{minimize, Func, StopTols};

    let cons: Vec<&dyn Func<()>> = vec![];
    let param0 = param0.map(|v| into_f64(*v)).to_vec();

    let bounds: Vec<_> = bounds
        .iter()
        .map(|(lo, up)| (into_f64(*lo), into_f64(*up)))
        .collect();

    match minimize(
        |x, u| objfn(x, None, u),
        &param0,
        &bounds,
        &cons,
        (),
        cobyla.maxeval,
        cobyla::RhoBeg::All(cobyla.rhobeg),
        Some(StopTols {
            ftol_rel: cobyla.ftol_rel,
            ..StopTols::default()
        }),
    ) {
        Ok((_, x_opt, fval)) => {
            let fval = if f64::is_nan(fval) {
                f64::INFINITY
            } else {
                fval
            };
            (fval, arr1(&x_opt))
        }
        Err((status, x_opt, _)) => {
            log::warn!("Cobyla optimizer failed status={status:?}");
            (f64::INFINITY, arr1(&x_opt))
        }
    }
}
