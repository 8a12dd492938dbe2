use crate::domain::{Curve, CurveKind, SystemParameters};
use crate::error::AppError;

/// `E(t) = Q rho C(t) / (Q rho dt)`.
///
/// The numerator is the outflowing tracer mass rate and the denominator the
/// injected mass (unit inlet fraction over `dt`), so the area under `E`
/// approaches 1 once the whole pulse has eluted.
pub fn to_e_curve(curve: &Curve, dt: f64, flow_rate: f64, density: f64) -> Result<Curve, AppError> {
    expect_kind(curve, CurveKind::Concentration)?;
    positive("dt", dt)?;
    positive("flow rate", flow_rate)?;
    positive("density", density)?;

    let mass_rate = flow_rate * density;
    let injected = mass_rate * dt;
    let values = curve.values().iter().map(|c| mass_rate * c / injected).collect();
    Ok(Curve::from_parts(CurveKind::E, curve.time().to_vec(), values))
}

/// `theta = t / tau`, `E(theta) = E(t) * tau` with `tau = V / Q`.
pub fn to_e_theta_curve(e_curve: &Curve, volume: f64, flow_rate: f64) -> Result<Curve, AppError> {
    expect_kind(e_curve, CurveKind::E)?;
    let tau = space_time(volume, flow_rate)?;
    let theta = e_curve.time().iter().map(|t| t / tau).collect();
    let values = e_curve.values().iter().map(|e| e * tau).collect();
    Ok(Curve::from_parts(CurveKind::ETheta, theta, values))
}

/// Inverse of `to_e_theta_curve`.
pub fn e_theta_to_e(e_theta: &Curve, volume: f64, flow_rate: f64) -> Result<Curve, AppError> {
    expect_kind(e_theta, CurveKind::ETheta)?;
    let tau = space_time(volume, flow_rate)?;
    let time = e_theta.time().iter().map(|th| th * tau).collect();
    let values = e_theta.values().iter().map(|e| e / tau).collect();
    Ok(Curve::from_parts(CurveKind::E, time, values))
}

/// Inverse of `to_e_curve`.
pub fn e_to_concentration(e_curve: &Curve, dt: f64, flow_rate: f64, density: f64) -> Result<Curve, AppError> {
    expect_kind(e_curve, CurveKind::E)?;
    positive("dt", dt)?;
    positive("flow rate", flow_rate)?;
    positive("density", density)?;

    let mass_rate = flow_rate * density;
    let injected = mass_rate * dt;
    let values = e_curve.values().iter().map(|e| e * injected / mass_rate).collect();
    Ok(Curve::from_parts(CurveKind::Concentration, e_curve.time().to_vec(), values))
}

/// A concentration curve together with its E and E(theta) forms.
///
/// Recomputed from the source curve whenever needed; never stored on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedCurves {
    pub concentration: Curve,
    pub e: Curve,
    pub e_theta: Curve,
}

impl DerivedCurves {
    pub fn from_concentration(curve: &Curve, system: &SystemParameters) -> Result<Self, AppError> {
        let e = to_e_curve(curve, system.dt, system.flow_rate, system.rho)?;
        let e_theta = to_e_theta_curve(&e, system.volume, system.flow_rate)?;
        Ok(Self {
            concentration: curve.clone(),
            e,
            e_theta,
        })
    }

    pub fn get(&self, kind: CurveKind) -> &Curve {
        match kind {
            CurveKind::Concentration => &self.concentration,
            CurveKind::E => &self.e,
            CurveKind::ETheta => &self.e_theta,
        }
    }
}

fn expect_kind(curve: &Curve, expected: CurveKind) -> Result<(), AppError> {
    if curve.kind() != expected {
        return Err(AppError::input_shape(format!(
            "Expected a '{}' curve, got '{}'.",
            expected.id(),
            curve.kind().id()
        )));
    }
    Ok(())
}

fn positive(name: &str, v: f64) -> Result<(), AppError> {
    if !(v.is_finite() && v > 0.0) {
        return Err(AppError::config(format!("{name} must be finite and > 0 (got {v}).")));
    }
    Ok(())
}

fn space_time(volume: f64, flow_rate: f64) -> Result<f64, AppError> {
    positive("volume", volume)?;
    positive("flow rate", flow_rate)?;
    Ok(volume / flow_rate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Single-CSTR washout sampled densely enough for a trapezoid area check.
    fn cstr_curve(dt: f64, tau: f64) -> Curve {
        let time: Vec<f64> = (0..=4000).map(|i| i as f64 * 0.01).collect();
        let values = time.iter().map(|t| dt / tau * (-t / tau).exp()).collect();
        Curve::concentration(time, values).unwrap()
    }

    #[test]
    fn theta_is_time_over_space_time() {
        let (q, v) = (2e-6, 5e-6);
        let c = Curve::concentration(vec![0.0, 0.5, 1.0, 2.5], vec![0.0, 0.1, 0.2, 0.05]).unwrap();
        let e = to_e_curve(&c, 0.01, q, 1045.0).unwrap();
        let et = to_e_theta_curve(&e, v, q).unwrap();
        let tau = v / q;
        for (theta, t) in et.time().iter().zip(c.time()) {
            assert_relative_eq!(*theta, t / tau, max_relative = 1e-15);
        }
        for (a, b) in et.values().iter().zip(e.values()) {
            assert_relative_eq!(*a, b * tau, max_relative = 1e-15);
        }
        assert_eq!(et.kind(), CurveKind::ETheta);
    }

    #[test]
    fn full_elution_has_unit_area_in_both_spaces() {
        let (dt, q, v) = (0.01, 2e-6, 4e-6);
        let c = cstr_curve(dt, v / q);
        let e = to_e_curve(&c, dt, q, 1045.0).unwrap();
        let et = to_e_theta_curve(&e, v, q).unwrap();
        assert!((e.area() - 1.0).abs() < 1e-3, "E area {}", e.area());
        assert!((et.area() - 1.0).abs() < 1e-3, "E(theta) area {}", et.area());
    }

    #[test]
    fn inverse_transforms_recover_concentration() {
        let (dt, q, v, rho) = (0.01, 2e-6, 4e-6, 1045.0);
        let c = cstr_curve(dt, v / q);
        let et = to_e_theta_curve(&to_e_curve(&c, dt, q, rho).unwrap(), v, q).unwrap();
        let back = e_to_concentration(&e_theta_to_e(&et, v, q).unwrap(), dt, q, rho).unwrap();
        for (a, b) in back.values().iter().zip(c.values()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12);
        }
        for (a, b) in back.time().iter().zip(c.time()) {
            assert_relative_eq!(*a, *b, max_relative = 1e-12, epsilon = 1e-15);
        }
    }

    #[test]
    fn transforms_check_curve_kind() {
        let c = Curve::concentration(vec![0.0, 1.0], vec![0.0, 1.0]).unwrap();
        let err = to_e_theta_curve(&c, 1.0, 1.0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InputShape);
    }

    #[test]
    fn derived_curves_from_system() {
        let system = SystemParameters::new(1, 0.01, 2e-6, 4e-6, 1045.0).unwrap();
        let c = cstr_curve(system.dt, system.tau);
        let d = DerivedCurves::from_concentration(&c, &system).unwrap();
        assert_eq!(d.get(CurveKind::E).kind(), CurveKind::E);
        assert_relative_eq!(d.e_theta.time()[100], c.time()[100] / 2.0, max_relative = 1e-12);
        assert_eq!(d.get(CurveKind::Concentration), &c);
    }
}
