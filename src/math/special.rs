//! Special functions used by the reactor responses.
//!
//! The CSTR stage of every LFR/CSTR topology integrates an `e^{ms}/s^3` inlet
//! profile, which produces `e^{mt}` and `Ei(mt)` terms. Both overflow long
//! before the response itself does, so we work with the exponentially scaled
//! form `e^{-x} Ei(x)` throughout.
//!
//! Numerical notes:
//! - For `x <= ASYMPTOTIC_X` the power series of `Ei` converges with only
//!   positive terms (no cancellation for `x > 0`).
//! - Above it the asymptotic series `e^{-x} Ei(x) ~ (1/x) Σ k!/x^k` is used,
//!   truncated at its smallest term.
//! - The CSTR kernel `g` cancels its two leading asymptotic terms analytically.

/// Euler–Mascheroni constant.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Switch point between the power series and the asymptotic expansion.
const ASYMPTOTIC_X: f64 = 40.0;

const MAX_TERMS: usize = 500;

/// Natural log of the gamma function.
pub fn ln_gamma(x: f64) -> f64 {
    statrs::function::gamma::ln_gamma(x)
}

/// Exponentially scaled exponential integral `e^{-x} Ei(x)` for `x > 0`.
///
/// Returns NaN for `x <= 0` (not needed by any response).
pub fn ei_scaled(x: f64) -> f64 {
    if !(x > 0.0) {
        return f64::NAN;
    }
    if x.is_infinite() {
        return 0.0;
    }
    if x <= ASYMPTOTIC_X {
        return (-x).exp() * ei_series(x);
    }

    let mut term = 1.0;
    let mut sum = 1.0;
    for k in 1..MAX_TERMS {
        let next = term * k as f64 / x;
        if next >= term || next < f64::EPSILON * sum {
            break;
        }
        term = next;
        sum += term;
    }
    sum / x
}

/// Unscaled `Ei(x)` for `0 < x <= ASYMPTOTIC_X`.
fn ei_series(x: f64) -> f64 {
    let mut power = 1.0;
    let mut sum = 0.0;
    for k in 1..MAX_TERMS {
        power *= x / k as f64;
        let term = power / k as f64;
        sum += term;
        if term < f64::EPSILON * sum {
            break;
        }
    }
    EULER_GAMMA + x.ln() + sum
}

/// CSTR kernel `g(s) = (m s + 1) / s^2 - m^2 e^{-ms} Ei(ms)`.
///
/// A CSTR with rate `m = 1/tau_cstr` fed by `K / s^3` from time `th` onward has
/// outlet concentration `0.5 m K [e^{-m(t-th)} g(th) - g(t)]`.
pub fn cstr_kernel(s: f64, m: f64) -> f64 {
    let x = m * s;
    if x > ASYMPTOTIC_X {
        // g = -(m/s) Σ_{k>=2} k!/x^k
        let mut term = 1.0;
        let mut tail = 0.0;
        for k in 1..MAX_TERMS {
            let next = term * k as f64 / x;
            if k >= 2 && (next >= term || next < f64::EPSILON * tail) {
                break;
            }
            term = next;
            if k >= 2 {
                tail += term;
            }
        }
        return -(m / s) * tail;
    }
    (x + 1.0) / (s * s) - m * m * ei_scaled(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ei_matches_reference_values() {
        // Ei(1) = 1.8951178163559368, Ei(10) = 2492.2289762418777
        let ei1 = ei_scaled(1.0) * 1.0_f64.exp();
        let ei10 = ei_scaled(10.0) * 10.0_f64.exp();
        assert!((ei1 - 1.895_117_816_355_936_8).abs() < 1e-12, "Ei(1)={ei1}");
        assert!((ei10 - 2_492.228_976_241_877_7).abs() / 2492.0 < 1e-12, "Ei(10)={ei10}");
    }

    #[test]
    fn ei_scaled_is_continuous_across_switch() {
        let below = ei_scaled(ASYMPTOTIC_X);
        let above = ei_scaled(ASYMPTOTIC_X * (1.0 + 1e-12));
        assert!((below - above).abs() / below < 1e-10, "{below} vs {above}");
    }

    #[test]
    fn ei_scaled_stays_finite_for_huge_arguments() {
        let v = ei_scaled(1e6);
        assert!(v.is_finite());
        assert!((v * 1e6 - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cstr_kernel_branches_agree() {
        let m = 1.0;
        let s = ASYMPTOTIC_X;
        let series = (s * m + 1.0) / (s * s) - m * m * ei_scaled(s * m);
        let asym = cstr_kernel(s * (1.0 + 1e-12), m);
        assert!((series - asym).abs() / series.abs() < 1e-6, "{series} vs {asym}");
    }

    #[test]
    fn cstr_kernel_tail_matches_leading_order() {
        // For large m*s the kernel behaves like -2 / (m s^3).
        let (m, s) = (2.0, 1e3);
        let g = cstr_kernel(s, m);
        let lead = -2.0 / (m * s * s * s);
        assert!((g / lead - 1.0).abs() < 1e-2, "g={g} lead={lead}");
    }

    #[test]
    fn ln_gamma_of_integers() {
        assert!(ln_gamma(1.0).abs() < 1e-12);
        assert!((ln_gamma(5.0) - 24.0_f64.ln()).abs() < 1e-12);
    }
}
