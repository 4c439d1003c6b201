//! # Note Classifier
//!
//! Reduces one captured note to a single label: constant-Q transform of the
//! whole note, mean magnitude per bin, loudest bin wins.

use std::sync::Arc;

use crate::config::TransformConfig;
use crate::cqt::ConstantQ;
use crate::error::ConfigError;
use crate::tuning::NoteTable;

/// Index of the largest value; the first one wins on ties and NaN never
/// wins. Returns 0 for an empty slice.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (i, &v) in values.iter().enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

/// Transform plus the note table built from the same bin grid.
pub struct NoteClassifier {
    transform: ConstantQ,
    notes: Arc<NoteTable>,
}

impl NoteClassifier {
    pub fn new(sample_rate: u32, config: &TransformConfig) -> Result<Self, ConfigError> {
        let transform = ConstantQ::new(sample_rate, config)?;
        let notes = NoteTable::for_transform(config)?;
        debug_assert_eq!(notes.len(), transform.n_bins());
        Ok(Self { transform, notes })
    }

    /// Mean absolute magnitude of each bin across its frames.
    pub fn bin_energies(&self, samples: &[f32]) -> Vec<f32> {
        self.transform
            .transform(samples)
            .iter()
            .map(|frames| {
                if frames.is_empty() {
                    0.0
                } else {
                    frames.iter().map(|m| m.abs()).sum::<f32>() / frames.len() as f32
                }
            })
            .collect()
    }

    /// Label of the bin with the most energy.
    pub fn classify(&self, samples: &[f32]) -> &str {
        let index = argmax(&self.bin_energies(samples));
        self.notes.label(index).unwrap_or_default()
    }

    pub fn notes(&self) -> &NoteTable {
        &self.notes
    }

    pub fn transform(&self) -> &ConstantQ {
        &self.transform
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SR: u32 = 44_100;

    fn sine(freq: f32, amplitude: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|n| amplitude * (2.0 * PI * freq * n as f32 / SR as f32).sin())
            .collect()
    }

    fn guitar() -> NoteClassifier {
        NoteClassifier::new(SR, &TransformConfig::default()).unwrap()
    }

    #[test]
    fn argmax_prefers_first_of_equal_values() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, 2.0]), 1);
        assert_eq!(argmax(&[f32::NAN, 0.5, f32::NAN]), 1);
        assert_eq!(argmax(&[0.0, 0.0]), 0);
        assert_eq!(argmax(&[]), 0);
    }

    #[test]
    fn table_and_transform_share_one_grid() {
        let classifier = guitar();
        assert_eq!(classifier.notes().len(), classifier.transform().n_bins());
        for (note, &freq) in classifier
            .notes()
            .iter()
            .zip(classifier.transform().frequencies())
        {
            assert!((note.frequency - freq).abs() < 1e-3);
        }
    }

    #[test]
    fn each_row_is_labelled_by_its_table_entry() {
        let classifier = guitar();
        for bin in 0..classifier.notes().len() {
            let freq = classifier.notes().frequency(bin).unwrap();
            let label = classifier.classify(&sine(freq, 1200.0, 3 * 4096));
            assert_eq!(Some(label), classifier.notes().label(bin));
        }
    }

    #[test]
    fn open_strings_are_recognised() {
        let classifier = guitar();
        for (freq, name) in [
            (82.41, "E2"),
            (110.0, "A2"),
            (146.83, "D3"),
            (196.0, "G3"),
            (246.94, "B3"),
            (329.63, "E4"),
        ] {
            assert_eq!(classifier.classify(&sine(freq, 1500.0, 2 * 4096)), name);
        }
    }

    #[test]
    fn classification_is_deterministic() {
        let classifier = guitar();
        let samples = sine(220.0, 900.0, 3 * 4096);
        let first = classifier.classify(&samples).to_string();
        assert_eq!(classifier.classify(&samples), first);
        assert_eq!(guitar().classify(&samples), first);
    }

    #[test]
    fn silence_falls_back_to_the_lowest_bin() {
        let classifier = guitar();
        let energies = classifier.bin_energies(&vec![0.0; 4096]);
        assert_eq!(energies.len(), 49);
        assert_eq!(classifier.classify(&vec![0.0; 4096]), "E2");
    }
}
