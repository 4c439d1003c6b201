//! # Musical Tuning Module
//!
//! Note-name and frequency conversions in equal temperament (A4 = 440 Hz),
//! plus the note table that labels each constant-Q bin.
//!
//! ## Features
//! - Scientific pitch name parsing (`E2`, `F#3`, `Bb4`, `C-1`)
//! - Frequency to nearest note name
//! - Log-spaced bin centre frequencies
//! - A shared, immutable note table aligned with the transform bins

use once_cell::sync::Lazy;
use std::sync::Arc;

use crate::config::TransformConfig;
use crate::error::ConfigError;

/// Pitch-class names, sharps only, starting at C.
const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// MIDI number of the low E string on a guitar (E2, ~82.41 Hz).
pub const GUITAR_LOW_MIDI: i32 = 40;

/// Default note table: 49 bins at 12 per octave starting at E2, labels E2..E6.
///
/// Computed once on first use and shared by every classifier built from the
/// default transform configuration.
static GUITAR_NOTES: Lazy<Arc<NoteTable>> = Lazy::new(|| {
    let defaults = TransformConfig::default();
    Arc::new(NoteTable::from_frequencies(cqt_frequencies(
        midi_to_hz(GUITAR_LOW_MIDI as f32),
        defaults.n_bins,
        defaults.bins_per_octave,
    )))
});

/// A single labelled bin of the note table.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    /// Note name (e.g., "E2", "C#3")
    pub name: String,
    /// Bin centre frequency in Hz
    pub frequency: f32,
}

/// Ordered note labels, index `i` naming transform bin `i`.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteTable {
    notes: Vec<Note>,
}

impl NoteTable {
    /// Labels each centre frequency with its nearest note name.
    pub fn from_frequencies(frequencies: Vec<f32>) -> Self {
        let notes = frequencies
            .into_iter()
            .map(|frequency| Note {
                name: hz_to_note(frequency),
                frequency,
            })
            .collect();
        Self { notes }
    }

    /// Builds the table for the same bin grid the transform uses.
    pub fn build(config: &TransformConfig) -> Result<Self, ConfigError> {
        let fmin = note_to_hz(&config.fmin_note)?;
        Ok(Self::from_frequencies(cqt_frequencies(
            fmin,
            config.n_bins,
            config.bins_per_octave,
        )))
    }

    /// Returns the table for `config`, reusing the shared guitar table when
    /// the configuration is the default one.
    pub fn for_transform(config: &TransformConfig) -> Result<Arc<Self>, ConfigError> {
        if *config == TransformConfig::default() {
            return Ok(Arc::clone(&GUITAR_NOTES));
        }
        Self::build(config).map(Arc::new)
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Label of bin `index`, if it exists.
    pub fn label(&self, index: usize) -> Option<&str> {
        self.notes.get(index).map(|n| n.name.as_str())
    }

    /// Centre frequency of bin `index`, if it exists.
    pub fn frequency(&self, index: usize) -> Option<f32> {
        self.notes.get(index).map(|n| n.frequency)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Note> {
        self.notes.iter()
    }
}

/// Centre frequencies `fmin * 2^(k / bins_per_octave)` for `k in 0..n_bins`.
pub fn cqt_frequencies(fmin: f32, n_bins: usize, bins_per_octave: usize) -> Vec<f32> {
    (0..n_bins)
        .map(|k| fmin * 2.0_f32.powf(k as f32 / bins_per_octave as f32))
        .collect()
}

/// Frequency of a (possibly fractional) MIDI note number.
pub fn midi_to_hz(midi: f32) -> f32 {
    440.0 * 2.0_f32.powf((midi - 69.0) / 12.0)
}

/// Fractional MIDI note number of a frequency.
pub fn hz_to_midi(freq: f32) -> f32 {
    12.0 * (freq / 440.0).log2() + 69.0
}

/// Name of the note nearest to `freq`, e.g. `82.41 -> "E2"`.
pub fn hz_to_note(freq: f32) -> String {
    let midi = hz_to_midi(freq).round() as i32;
    let name = NOTE_NAMES[midi.rem_euclid(12) as usize];
    let octave = midi.div_euclid(12) - 1;
    format!("{name}{octave}")
}

/// Parses a scientific pitch name into its frequency.
///
/// Accepts a letter `A`-`G` (either case), up to two `#`/`b` accidentals
/// and an octave number from -1 to 9. `E2` is 82.41 Hz, `A4` is 440 Hz.
pub fn note_to_hz(name: &str) -> Result<f32, ConfigError> {
    note_to_midi(name).map(|midi| midi_to_hz(midi as f32))
}

/// Double sharp or double flat at most.
const MAX_ACCIDENTALS: usize = 2;

/// Octaves of the MIDI range, C-1 to G9.
const OCTAVE_RANGE: std::ops::RangeInclusive<i32> = -1..=9;

/// Parses a scientific pitch name into its MIDI note number.
pub fn note_to_midi(name: &str) -> Result<i32, ConfigError> {
    let invalid = || ConfigError::InvalidNote(name.to_string());
    let mut chars = name.trim().chars().peekable();

    let pitch_class = match chars.next().map(|c| c.to_ascii_uppercase()) {
        Some('C') => 0,
        Some('D') => 2,
        Some('E') => 4,
        Some('F') => 5,
        Some('G') => 7,
        Some('A') => 9,
        Some('B') => 11,
        _ => return Err(invalid()),
    };

    let mut offset = 0;
    let mut accidentals = 0;
    while let Some(&c) = chars.peek() {
        match c {
            '#' | '♯' => offset += 1,
            'b' | '♭' => offset -= 1,
            _ => break,
        }
        accidentals += 1;
        if accidentals > MAX_ACCIDENTALS {
            return Err(invalid());
        }
        chars.next();
    }

    let octave: i32 = chars.collect::<String>().parse().map_err(|_| invalid())?;
    if !OCTAVE_RANGE.contains(&octave) {
        return Err(invalid());
    }
    Ok(12 * (octave + 1) + pitch_class + offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_note_names() {
        assert_eq!(note_to_midi("E2").unwrap(), 40);
        assert_eq!(note_to_midi("A4").unwrap(), 69);
        assert_eq!(note_to_midi("F#3").unwrap(), 54);
        assert_eq!(note_to_midi("Bb4").unwrap(), 70);
        assert_eq!(note_to_midi("c-1").unwrap(), 0);
        assert_eq!(note_to_midi("G9").unwrap(), 127);
        assert_eq!(note_to_midi("Ebb3").unwrap(), 50);
        assert!((note_to_hz("A4").unwrap() - 440.0).abs() < 1e-3);
        assert!((note_to_hz("E2").unwrap() - 82.406_89).abs() < 1e-3);
    }

    #[test]
    fn rejects_malformed_note_names() {
        let many_sharps = format!("C{}4", "#".repeat(10_000));
        for bad in [
            "",
            "H2",
            "E",
            "E#x",
            "2E",
            "E2147483647",
            "E-2147483648",
            "A10",
            "C-2",
            "F###3",
            many_sharps.as_str(),
        ] {
            assert!(
                matches!(note_to_midi(bad), Err(ConfigError::InvalidNote(_))),
                "`{bad}` should not parse"
            );
        }
    }

    #[test]
    fn names_nearest_note() {
        assert_eq!(hz_to_note(82.41), "E2");
        assert_eq!(hz_to_note(440.0), "A4");
        // 10 cents sharp still rounds to A4
        assert_eq!(hz_to_note(442.5), "A4");
        assert_eq!(hz_to_note(466.16), "A#4");
    }

    #[test]
    fn guitar_table_spans_e2_to_e6() {
        let table = NoteTable::for_transform(&TransformConfig::default()).unwrap();
        assert_eq!(table.len(), 49);
        assert_eq!(table.label(0), Some("E2"));
        assert_eq!(table.label(1), Some("F2"));
        assert_eq!(table.label(12), Some("E3"));
        assert_eq!(table.label(48), Some("E6"));
        assert_eq!(table.label(49), None);
    }

    #[test]
    fn shared_table_matches_general_construction() {
        let config = TransformConfig::default();
        let shared = NoteTable::for_transform(&config).unwrap();
        let built = NoteTable::build(&config).unwrap();
        assert_eq!(shared.len(), built.len());
        for (a, b) in shared.iter().zip(built.iter()) {
            assert_eq!(a.name, b.name);
            assert!((a.frequency - b.frequency).abs() < 1e-3);
        }
        // Same allocation on repeated lookups
        let again = NoteTable::for_transform(&config).unwrap();
        assert!(Arc::ptr_eq(&shared, &again));
    }

    #[test]
    fn custom_transform_gets_its_own_table() {
        let config = TransformConfig {
            fmin_note: "A2".into(),
            n_bins: 13,
            ..TransformConfig::default()
        };
        let table = NoteTable::for_transform(&config).unwrap();
        assert_eq!(table.len(), 13);
        assert_eq!(table.label(0), Some("A2"));
        assert_eq!(table.label(12), Some("A3"));
    }
}
