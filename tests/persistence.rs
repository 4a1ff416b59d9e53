//! Tests of saving and restoring model state through `ModelArchive`.

mod common;

use approx::assert_relative_eq;
use common::gen_power_spectrum;
use specparam::{
    AperiodicMode, ModelArchive, ModelSettings, SpecParamError, SpectralModel,
};

fn fitted_model() -> SpectralModel {
    let (freqs, powers) = gen_power_spectrum(
        (3.0, 50.0),
        0.5,
        &[1.0, 2.0],
        &[[10.0, 0.5, 1.0], [22.0, 0.3, 2.0]],
        0.0025,
        7,
    );
    let mut model = SpectralModel::with_settings(ModelSettings {
        max_n_peaks: 6,
        min_peak_height: 0.05,
        ..ModelSettings::default()
    });
    model.fit_with(&freqs, &powers, None).unwrap();
    model
}

#[test]
fn test_archive_roundtrip_through_json() {
    let model = fitted_model();
    let archive = model.to_archive();

    let json = serde_json::to_string(&archive).unwrap();
    let loaded_archive: ModelArchive = serde_json::from_str(&json).unwrap();
    assert_eq!(loaded_archive, archive);

    let loaded = SpectralModel::from_archive(loaded_archive).unwrap();
    assert!(loaded.has_data());
    assert!(loaded.has_model());
    assert_eq!(loaded.get_settings(), model.get_settings());
    assert_eq!(loaded.get_meta_data(), model.get_meta_data());
    assert_eq!(loaded.get_results().unwrap(), model.get_results().unwrap());
}

#[test]
fn test_load_results_only() {
    let model = fitted_model();
    let archive = ModelArchive {
        results: model.to_archive().results,
        ..ModelArchive::default()
    };

    let loaded = SpectralModel::from_archive(archive).unwrap();
    assert!(loaded.has_model());
    assert!(!loaded.has_data());
    assert!(loaded.get_meta_data().is_none());
    assert_eq!(loaded.get_results().unwrap(), model.get_results().unwrap());

    // Without a stored mode tag, the mode comes from the parameter count.
    assert_eq!(loaded.get_settings().aperiodic_mode, AperiodicMode::Fixed);

    // No data means no reconstruction to compare against.
    assert!(loaded.modeled_spectrum().is_none());
}

#[test]
fn test_load_settings_only() {
    let settings = ModelSettings {
        max_n_peaks: 4,
        aperiodic_mode: AperiodicMode::Knee,
        ..ModelSettings::default()
    };
    let archive = ModelArchive {
        settings: Some(settings.clone()),
        ..ModelArchive::default()
    };

    let loaded = SpectralModel::from_archive(archive).unwrap();
    assert!(!loaded.has_data());
    assert!(!loaded.has_model());
    assert_eq!(loaded.get_settings(), settings);
}

#[test]
fn test_load_data_only() {
    let model = fitted_model();
    let archive = ModelArchive {
        meta_data: model.to_archive().meta_data,
        data: model.to_archive().data,
        ..ModelArchive::default()
    };

    let mut loaded = SpectralModel::from_archive(archive).unwrap();
    assert!(loaded.has_data());
    assert!(!loaded.has_model());
    assert_eq!(loaded.get_meta_data(), model.get_meta_data());

    // Archived power is stored already log-transformed.
    for (a, b) in loaded
        .power_spectrum()
        .unwrap()
        .iter()
        .zip(model.power_spectrum().unwrap().iter())
    {
        assert_relative_eq!(a, b, epsilon = 1e-12);
    }

    // A fit on restored data succeeds without refitting being special-cased.
    loaded.add_settings(ModelSettings {
        max_n_peaks: 6,
        min_peak_height: 0.05,
        ..ModelSettings::default()
    });
    loaded.fit().unwrap();
    assert!(loaded.has_model());
}

#[test]
fn test_full_archive_regenerates_model_spectrum() {
    let model = fitted_model();
    let loaded = SpectralModel::from_archive(model.to_archive()).unwrap();

    let original = model.modeled_spectrum().unwrap();
    let regenerated = loaded.modeled_spectrum().unwrap();
    assert_eq!(original.len(), regenerated.len());
    for (a, b) in original.iter().zip(regenerated.iter()) {
        assert_relative_eq!(a, b, epsilon = 1e-10);
    }
}

#[test]
fn test_meta_data_derived_when_absent() {
    let model = fitted_model();
    let archive = ModelArchive {
        data: model.to_archive().data,
        ..ModelArchive::default()
    };

    let loaded = SpectralModel::from_archive(archive).unwrap();
    let meta = loaded.get_meta_data().unwrap();
    assert_eq!(meta.freq_range, (3.0, 50.0));
    assert_relative_eq!(meta.freq_res, 0.5, epsilon = 1e-12);
}

#[test]
fn test_archive_mode_tag_conflicts_with_results() {
    let model = fitted_model();
    let mut archive = model.to_archive();
    // Tag says knee while the stored parameters are fixed-mode.
    if let Some(settings) = archive.settings.as_mut() {
        settings.aperiodic_mode = AperiodicMode::Knee;
    }

    assert!(matches!(
        SpectralModel::from_archive(archive),
        Err(SpecParamError::Data(_))
    ));
}

#[test]
fn test_archive_of_unfitted_model_has_no_results() {
    let (freqs, powers) =
        gen_power_spectrum((3.0, 50.0), 0.5, &[1.0, 2.0], &[], 0.0, 1);

    let mut model = SpectralModel::new();
    model.add_data(&freqs, &powers, None, true).unwrap();

    let archive = model.to_archive();
    assert!(archive.results.is_none());
    // Default settings were never set explicitly; no tag is persisted.
    assert!(archive.settings.is_none());
    assert!(archive.data.is_some());
    assert!(archive.meta_data.is_some());
}

#[test]
fn test_archive_data_length_mismatch() {
    let model = fitted_model();
    let mut archive = model.to_archive();
    if let Some(data) = archive.data.as_mut() {
        data.power_spectrum.pop();
    }

    assert!(matches!(
        SpectralModel::from_archive(archive),
        Err(SpecParamError::InconsistentData(_))
    ));
}
