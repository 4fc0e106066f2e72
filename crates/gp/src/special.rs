//! Special functions needed by the Matérn kernel.
//!
//! `K_nu(x)` is computed with Temme's series for `x < 2` and Steed's continued
//! fraction otherwise, both on the reduced order `|mu| <= 1/2`, then carried up to
//! `nu` with the forward recurrence which is stable for `K`. The recurrence runs on
//! rescaled values so that `ln K_nu(x)` stays finite for large orders and arguments.
//!
//! Reference: N. M. Temme, *On the numerical evaluation of the modified Bessel function
//! of the third kind*, J. Comput. Phys. 19 (1975) 324-337.

use std::f64::consts::PI;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;
const MAX_ITER: usize = 10_000;
const EPS: f64 = 1e-16;
const SERIES_MAX_X: f64 = 2.0;
const RESCALE: f64 = 1e100;

/// Gamma function
pub fn gamma(x: f64) -> f64 {
    libm::tgamma(x)
}

/// Natural logarithm of the absolute value of the gamma function
pub fn ln_gamma(x: f64) -> f64 {
    libm::lgamma(x)
}

/// Modified Bessel function of the second kind `K_nu(x)` for real order `nu`
/// and `x > 0`. Returns `+inf` at `x = 0` and `NaN` for negative `x`.
pub fn bessel_k(nu: f64, x: f64) -> f64 {
    ln_bessel_k(nu, x).exp()
}

/// Natural logarithm of `K_nu(x)`, finite where `K_nu(x)` itself over- or underflows.
/// Returns `+inf` at `x = 0` and `NaN` for negative `x`.
pub fn ln_bessel_k(nu: f64, x: f64) -> f64 {
    if x.is_nan() || nu.is_nan() || x < 0. {
        return f64::NAN;
    }
    if x == 0. {
        return f64::INFINITY;
    }
    // K_{-nu} = K_nu
    let nu = nu.abs();
    let nl = (nu + 0.5).floor();
    let mu = nu - nl;

    // K values are carried as exp(ln_scale) * (k_mu, k_mu1)
    let (mut k_mu, mut k_mu1, mut ln_scale) = if x < SERIES_MAX_X {
        let (k0, k1) = temme_series(mu, x);
        (k0, k1, 0.)
    } else {
        let (k0, k1) = steed_fraction(mu, x);
        (k0, k1, -x)
    };

    let two_over_x = 2. / x;
    for i in 1..=(nl as usize) {
        let k_next = (mu + i as f64) * two_over_x * k_mu1 + k_mu;
        k_mu = k_mu1;
        k_mu1 = k_next;
        if k_mu1 > RESCALE {
            k_mu /= k_mu1;
            ln_scale += k_mu1.ln();
            k_mu1 = 1.;
        }
    }
    ln_scale + k_mu.ln()
}

/// `(1/Gamma(1-mu) - 1/Gamma(1+mu)) / (2 mu)` and `(1/Gamma(1-mu) + 1/Gamma(1+mu)) / 2`
/// along with `1/Gamma(1+mu)` and `1/Gamma(1-mu)`.
fn temme_gammas(mu: f64) -> (f64, f64, f64, f64) {
    let gampl = 1. / gamma(1. + mu);
    let gammi = 1. / gamma(1. - mu);
    let gam1 = if mu.abs() < 1e-3 {
        // 1/Gamma(1+z) = 1 + g z + c2 z^2 + c3 z^3 + ...
        const C3: f64 = -0.042_002_635_034_095_2;
        -(EULER_GAMMA + C3 * mu * mu)
    } else {
        (gammi - gampl) / (2. * mu)
    };
    let gam2 = 0.5 * (gammi + gampl);
    (gam1, gam2, gampl, gammi)
}

/// Returns `(K_mu(x), K_{mu+1}(x))` for `|mu| <= 1/2` and small `x`.
fn temme_series(mu: f64, x: f64) -> (f64, f64) {
    let x2 = 0.5 * x;
    let pimu = PI * mu;
    let fact = if pimu.abs() < EPS {
        1.
    } else {
        pimu / pimu.sin()
    };
    let d = -x2.ln();
    let e = mu * d;
    let fact2 = if e.abs() < EPS { 1. } else { e.sinh() / e };
    let (gam1, gam2, gampl, gammi) = temme_gammas(mu);

    let mut ff = fact * (gam1 * e.cosh() + gam2 * fact2 * d);
    let mut sum = ff;
    let e = e.exp();
    let mut p = 0.5 * e / gampl;
    let mut q = 0.5 / (e * gammi);
    let mut c = 1.;
    let d = x2 * x2;
    let mut sum1 = p;
    let mu2 = mu * mu;
    for i in 1..=MAX_ITER {
        let fi = i as f64;
        ff = (fi * ff + p + q) / (fi * fi - mu2);
        c *= d / fi;
        p /= fi - mu;
        q /= fi + mu;
        let del = c * ff;
        sum += del;
        sum1 += c * (p - fi * ff);
        if del.abs() < sum.abs() * EPS {
            break;
        }
    }
    (sum, sum1 * 2. / x)
}

/// Returns `exp(x) * (K_mu(x), K_{mu+1}(x))` for `|mu| <= 1/2` and `x >= 2`.
fn steed_fraction(mu: f64, x: f64) -> (f64, f64) {
    let mu2 = mu * mu;
    let mut b = 2. * (1. + x);
    let mut d = 1. / b;
    let mut delh = d;
    let mut h = d;
    let mut q1 = 0.;
    let mut q2 = 1.;
    let a1 = 0.25 - mu2;
    let mut q = a1;
    let mut c = a1;
    let mut a = -a1;
    let mut s = 1. + q * delh;
    for i in 2..=MAX_ITER {
        let fi = i as f64;
        a -= 2. * (fi - 1.);
        c = -a * c / fi;
        let qnew = (q1 - b * q2) / a;
        q1 = q2;
        q2 = qnew;
        q += c * qnew;
        b += 2.;
        d = 1. / (b + a * d);
        delh = (b * d - 1.) * delh;
        h += delh;
        let dels = q * delh;
        s += dels;
        if (dels / s).abs() < EPS {
            break;
        }
    }
    h *= a1;
    let k_mu = (PI / (2. * x)).sqrt() / s;
    let k_mu1 = k_mu * (mu + x + 0.5 - h) / x;
    (k_mu, k_mu1)
}
