//! Seeded differential evolution over a finite bound box.
//!
//! Strategy `best1bin`: the mutant is `best + F * (x_r0 - x_r1)`, crossed with
//! the target binomially (probability `CR`, one coordinate always taken from
//! the mutant). Updates are immediate, so an improvement is visible to the rest
//! of the same generation.
//!
//! The population lives in the unit cube and is scaled onto the bounds only for
//! evaluation. Trial coordinates that leave the cube are redrawn uniformly.
//!
//! Termination is guaranteed by the generation budget; reaching it without
//! meeting the spread tolerance is reported through `converged == false`.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};

use crate::domain::{Bounds, GlobalOptions};
use crate::error::AppError;

/// Smallest population that still allows two distinct donors besides the target.
const MIN_POPULATION: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalSolution {
    pub params: Vec<f64>,
    pub cost: f64,
    pub generations: usize,
    pub evaluations: usize,
    /// Whether the population spread met `tol`/`atol` before the budget ran out.
    pub converged: bool,
}

/// Minimise `objective` over `bounds`.
///
/// Fails only on configuration problems (infinite or empty bounds, bad options).
pub fn differential_evolution<F>(
    objective: F,
    bounds: &Bounds,
    opts: &GlobalOptions,
) -> Result<GlobalSolution, AppError>
where
    F: Fn(&[f64]) -> f64,
{
    opts.validate()?;
    if bounds.is_empty() {
        return Err(AppError::config("Global search needs at least one parameter."));
    }
    if !bounds.is_finite() {
        return Err(AppError::config(
            "Global search requires finite bounds for every parameter.",
        ));
    }
    bounds.check_order()?;

    let dim = bounds.len();
    let npop = (opts.popsize * dim).max(MIN_POPULATION);
    let mut rng = StdRng::seed_from_u64(opts.seed);

    let scale = |u: &[f64]| -> Vec<f64> {
        u.iter()
            .zip(bounds.0.iter())
            .map(|(&ui, &(lo, hi))| lo + ui * (hi - lo))
            .collect()
    };
    let energy = |u: &[f64]| -> f64 {
        let e = objective(scale(u).as_slice());
        if e.is_finite() { e } else { f64::MAX }
    };

    let mut population = latin_hypercube(&mut rng, npop, dim);
    let mut energies: Vec<f64> = population.iter().map(|u| energy(u.as_slice())).collect();
    let mut evaluations = npop;
    let mut best = argmin(&energies);

    let mut converged = spread_converged(&energies, opts);
    let mut generations = 0;

    while !converged && generations < opts.max_generations {
        generations += 1;
        let (f_lo, f_hi) = opts.mutation;
        let weight = if f_hi > f_lo { rng.gen_range(f_lo..f_hi) } else { f_lo };

        for i in 0..npop {
            let donors: Vec<usize> = sample(&mut rng, npop, 3)
                .into_iter()
                .filter(|&k| k != i)
                .take(2)
                .collect();
            let (r0, r1) = (donors[0], donors[1]);

            let forced = rng.gen_range(0..dim);
            let mut trial = population[i].clone();
            for j in 0..dim {
                if j == forced || rng.r#gen::<f64>() < opts.recombination {
                    trial[j] = population[best][j] + weight * (population[r0][j] - population[r1][j]);
                }
            }
            for v in trial.iter_mut() {
                if !(0.0..=1.0).contains(&*v) {
                    *v = rng.r#gen::<f64>();
                }
            }

            let e = energy(trial.as_slice());
            evaluations += 1;
            if e <= energies[i] {
                population[i] = trial;
                energies[i] = e;
                if e < energies[best] {
                    best = i;
                }
            }
        }

        converged = spread_converged(&energies, opts);
        if generations % 50 == 0 {
            log::debug!(
                "differential evolution: generation {generations}, best cost {:.6e}",
                energies[best]
            );
        }
    }

    Ok(GlobalSolution {
        params: scale(population[best].as_slice()),
        cost: energies[best],
        generations,
        evaluations,
        converged,
    })
}

/// One sample per stratum in every dimension, strata shuffled independently.
fn latin_hypercube(rng: &mut StdRng, npop: usize, dim: usize) -> Vec<Vec<f64>> {
    let mut population = vec![vec![0.0; dim]; npop];
    let mut strata: Vec<usize> = (0..npop).collect();
    for j in 0..dim {
        strata.shuffle(rng);
        for (i, &s) in strata.iter().enumerate() {
            population[i][j] = (s as f64 + rng.r#gen::<f64>()) / npop as f64;
        }
    }
    population
}

/// `std(E) <= atol + tol * |mean(E)|`.
fn spread_converged(energies: &[f64], opts: &GlobalOptions) -> bool {
    let n = energies.len() as f64;
    let mean = energies.iter().sum::<f64>() / n;
    let var = energies.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();
    std.is_finite() && std <= opts.atol + opts.tol * mean.abs()
}

fn argmin(values: &[f64]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v < values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    // Offset minimum so the relative spread criterion can trigger.
    fn sphere(p: &[f64]) -> f64 {
        p.iter().map(|v| (v - 0.3).powi(2)).sum::<f64>() + 1e-3
    }

    #[test]
    fn finds_minimum_of_shifted_sphere() {
        let bounds = Bounds(vec![(-2.0, 2.0), (-2.0, 2.0)]);
        let sol = differential_evolution(sphere, &bounds, &GlobalOptions::default()).unwrap();
        assert!(sol.converged);
        for v in &sol.params {
            assert!((v - 0.3).abs() < 1e-2, "{:?}", sol.params);
        }
    }

    #[test]
    fn same_seed_same_answer() {
        let bounds = Bounds(vec![(-2.0, 2.0), (-2.0, 2.0), (-2.0, 2.0)]);
        let opts = GlobalOptions::default();
        let a = differential_evolution(sphere, &bounds, &opts).unwrap();
        let b = differential_evolution(sphere, &bounds, &opts).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn generation_budget_bounds_the_search() {
        let bounds = Bounds(vec![(-2.0, 2.0), (-2.0, 2.0)]);
        let opts = GlobalOptions {
            max_generations: 3,
            tol: 0.0,
            ..GlobalOptions::default()
        };
        let sol = differential_evolution(sphere, &bounds, &opts).unwrap();
        assert_eq!(sol.generations, 3);
        assert!(!sol.converged);
        assert_eq!(sol.evaluations, 30 * 4);
        for (v, (lo, hi)) in sol.params.iter().zip(bounds.0.iter()) {
            assert!(v >= lo && v <= hi);
        }
    }

    #[test]
    fn infinite_bounds_are_a_config_error() {
        let bounds = Bounds(vec![(0.0, f64::INFINITY)]);
        let err = differential_evolution(sphere, &bounds, &GlobalOptions::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }

    #[test]
    fn inverted_bounds_are_a_config_error() {
        let bounds = Bounds(vec![(1.0, -1.0)]);
        let err = differential_evolution(sphere, &bounds, &GlobalOptions::default()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
