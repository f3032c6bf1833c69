use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

/// `n` normally distributed samples, linearly rescaled so the smallest lands
/// exactly on `lower` and the largest exactly on `upper`.
pub fn normal_samples(seed: u64, n: usize, lower: f64, upper: f64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let raw: Vec<f64> = (0..n).map(|_| standard_normal(&mut rng)).collect();
    let (min, max) = raw
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    raw.iter()
        .map(|&v| (v - min) / (max - min) * (upper - lower) + lower)
        .collect()
}

pub fn uniform_samples(seed: u64, n: usize, lower: f64, upper: f64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n).map(|_| rng.random_range(lower..upper)).collect()
}

// Box-Muller.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
