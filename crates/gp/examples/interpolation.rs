use linfa::ParamGuard;
use mgpi_gp::{
    GpInterpolator, Interpolator, Kernel, KernelModel, NearestNeighborInterpolator, NngpParams,
    OptimizeParams,
};
use ndarray::{arr2, concatenate, Array, Array1, Array2, Axis};

fn xsinx(x: &Array2<f64>) -> Array1<f64> {
    ((x - 3.5) * ((x - 3.5) / std::f64::consts::PI).mapv(|v| v.sin())).remove_axis(Axis(1))
}

fn main() {
    env_logger::init();

    let xt = arr2(&[[0.0], [5.0], [10.0], [15.0], [18.0], [20.0], [25.0]]);
    let yt = xsinx(&xt);

    println!("Interpolate 'xsinx' known at {}", xt.column(0));
    let kernel = Kernel::combined(vec![
        Kernel::squared_exponential(1., &[1.]).expect("kernel"),
        Kernel::white_noise(1e-3),
    ])
    .expect("combined kernel");
    let mut gp = Interpolator::new(kernel);

    let params = OptimizeParams::new()
        .active(vec![0, 1])
        .seed(42)
        .check()
        .expect("optimization params");
    let tuned = gp.optimize_kernel(&xt, &yt, &params).expect("kernel tuning");
    println!(
        "Tuned parameters {:?} (log-posterior {:.3})",
        tuned.params, tuned.log_posterior
    );
    gp.set_kernel(tuned.kernel);
    println!("{gp}");

    let xtest = Array::linspace(0., 25., 26).insert_axis(Axis(1));
    let ytest = xsinx(&xtest);
    let (mean, cov) = gp.condition(&xtest, &xt, &yt).expect("GP conditioning");
    let sigma = cov.diag().mapv(|v| v.max(0.).sqrt());

    println!("Compute prediction errors (x, err(x), sigma(x))");
    println!(
        "{}",
        concatenate![
            Axis(1),
            xtest,
            (&mean - &ytest).insert_axis(Axis(1)),
            sigma.insert_axis(Axis(1))
        ]
    );

    let nngp = NearestNeighborInterpolator::new(
        gp.kernel().clone(),
        NngpParams::new(3).check().expect("NNGP params"),
    )
    .expect("NNGP interpolator");
    let compressed = nngp.compress(&xt, &yt).expect("NNGP compress");
    let approx = nngp
        .predict(&xtest, &xt, &compressed)
        .expect("NNGP prediction");
    println!(
        "NNGP with {} neighbors: max deviation from exact mean {:.3e}, log-likelihood {:.3} vs {:.3}",
        nngp.params().num_neighbors(),
        (&approx - &mean).mapv(f64::abs).fold(0., |acc: f64, v| acc.max(*v)),
        nngp.loglikelihood(&xt, &yt).expect("NNGP loglikelihood"),
        gp.loglikelihood(&xt, &yt).expect("GP loglikelihood"),
    );
    println!("Kernel parameters {:?}", nngp.kernel().named_params());
}
