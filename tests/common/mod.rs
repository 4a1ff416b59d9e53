//! Shared helpers for building synthetic power spectra with known
//! parameters.

#![allow(dead_code)]

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use specparam::aperiodic::{aperiodic_value, AperiodicMode};
use specparam::peaks::gaussian_value;

/// Generate a frequency axis over `[lo, hi]` at the given resolution.
pub fn gen_freqs(range: (f64, f64), res: f64) -> Vec<f64> {
    let n = ((range.1 - range.0) / res).round() as usize + 1;
    (0..n).map(|i| range.0 + i as f64 * res).collect()
}

/// Generate a synthetic power spectrum in linear power units.
///
/// `ap_params` is interpreted as fixed mode for 2 values and knee mode for
/// 3. `gaussians` are `(center, height, std)` triples in log10 power.
/// Gaussian noise of standard deviation `noise_level` is added in log space,
/// deterministically from the seed.
pub fn gen_power_spectrum(
    range: (f64, f64),
    res: f64,
    ap_params: &[f64],
    gaussians: &[[f64; 3]],
    noise_level: f64,
    seed: u64,
) -> (Vec<f64>, Vec<f64>) {
    let mode = if ap_params.len() == 3 {
        AperiodicMode::Knee
    } else {
        AperiodicMode::Fixed
    };
    let freqs = gen_freqs(range, res);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = if noise_level > 0.0 {
        Some(Normal::new(0.0, noise_level).unwrap())
    } else {
        None
    };

    let powers = freqs
        .iter()
        .map(|&f| {
            let mut log_power = aperiodic_value(mode, ap_params, f);
            for g in gaussians {
                log_power += gaussian_value(g[0], g[1], g[2], f);
            }
            if let Some(dist) = &noise {
                log_power += dist.sample(&mut rng);
            }
            10f64.powf(log_power)
        })
        .collect();

    (freqs, powers)
}
