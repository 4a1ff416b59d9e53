//! Small statistical helpers used by peak detection and goodness-of-fit.

use ndarray::Array1;

/// Population standard deviation of the values.
///
/// Returns 0.0 for an empty input.
pub fn std_dev(values: &Array1<f64>) -> f64 {
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let mean = values.sum() / n as f64;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    var.sqrt()
}

/// Index and value of the maximum element.
///
/// NaN values are skipped; returns `None` for an empty or all-NaN input.
pub fn argmax(values: &Array1<f64>) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best
}

/// Linearly-interpolated percentile, with `q` in [0, 100].
///
/// Matches the numpy default interpolation scheme. Returns NaN for an
/// empty input.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (q / 100.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Pearson correlation coefficient between two equal-length series.
pub fn pearson_r(x: &Array1<f64>, y: &Array1<f64>) -> f64 {
    let n = x.len();
    if n == 0 || n != y.len() {
        return f64::NAN;
    }
    let mx = x.sum() / n as f64;
    let my = y.sum() / n as f64;
    let mut cov = 0.0;
    let mut sx = 0.0;
    let mut sy = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        let dx = a - mx;
        let dy = b - my;
        cov += dx * dy;
        sx += dx * dx;
        sy += dy * dy;
    }
    if sx == 0.0 || sy == 0.0 {
        return f64::NAN;
    }
    cov / (sx.sqrt() * sy.sqrt())
}
