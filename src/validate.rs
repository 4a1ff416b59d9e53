//! Input validation and preparation of raw spectra.
//!
//! Raw frequency and power arrays are checked, log-transformed, and trimmed
//! into the clean working representation the fitting pipeline operates on.

use ndarray::Array1;

use crate::data::SpectrumMetaData;
use crate::error::{Result, SpecParamError};

/// A validated spectrum, ready for fitting.
#[derive(Debug, Clone)]
pub struct ValidatedSpectrum {
    pub freqs: Array1<f64>,
    /// log10 of the input power values.
    pub power_spectrum: Array1<f64>,
    pub meta_data: SpectrumMetaData,
}

/// Validate raw arrays and produce the working representation.
///
/// Checks lengths, ordering, and (when `check_data` is set) finiteness of
/// the log-transformed power. A leading zero frequency is dropped, since the
/// log-frequency forms cannot evaluate it. The optional `freq_range` trims
/// both arrays to `[low, high]` inclusive.
pub fn prepare_spectrum(
    freqs: &[f64],
    powers: &[f64],
    freq_range: Option<(f64, f64)>,
    check_data: bool,
) -> Result<ValidatedSpectrum> {
    if freqs.len() != powers.len() {
        return Err(SpecParamError::InconsistentData(format!(
            "frequency and power arrays differ in length: {} vs {}",
            freqs.len(),
            powers.len()
        )));
    }
    if freqs.is_empty() {
        return Err(SpecParamError::Data("input arrays are empty".to_string()));
    }

    for pair in freqs.windows(2) {
        if pair[0].is_finite() && pair[1].is_finite() && pair[1] <= pair[0] {
            return Err(SpecParamError::Data(
                "frequencies must be strictly increasing".to_string(),
            ));
        }
    }

    // The log-frequency forms cannot evaluate f = 0; drop that bin.
    let skip = if freqs[0] == 0.0 { 1 } else { 0 };

    let mut kept_freqs = Vec::with_capacity(freqs.len());
    let mut kept_powers = Vec::with_capacity(powers.len());
    for (&f, &p) in freqs.iter().zip(powers.iter()).skip(skip) {
        if let Some((lo, hi)) = freq_range {
            if f < lo || f > hi {
                continue;
            }
        }
        kept_freqs.push(f);
        kept_powers.push(p.log10());
    }

    if kept_freqs.len() < 2 {
        return Err(SpecParamError::Data(
            "frequency range is empty or too narrow to fit".to_string(),
        ));
    }

    if check_data {
        let bad_freq = kept_freqs.iter().any(|v| !v.is_finite());
        let bad_power = kept_powers.iter().any(|v| !v.is_finite());
        if bad_freq || bad_power {
            return Err(SpecParamError::Data(
                "spectrum contains non-finite values after the log transform; \
                 power values must be positive and finite"
                    .to_string(),
            ));
        }
    }

    let meta_data = SpectrumMetaData {
        freq_range: (kept_freqs[0], kept_freqs[kept_freqs.len() - 1]),
        freq_res: kept_freqs[1] - kept_freqs[0],
    };

    Ok(ValidatedSpectrum {
        freqs: Array1::from_vec(kept_freqs),
        power_spectrum: Array1::from_vec(kept_powers),
        meta_data,
    })
}
