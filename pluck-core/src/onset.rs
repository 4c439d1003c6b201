//! # Onset Detection Module
//!
//! Chunk-by-chunk note segmentation on the energy envelope. A note starts
//! when the mean absolute level jumps by more than `onset_delta` over the
//! previous chunk, collects every following chunk louder than
//! `sustain_threshold`, and ends on the first chunk at or below it.

use log::debug;
use std::time::{Duration, Instant};

use crate::audio::Chunk;
use crate::config::DetectorConfig;

/// The cleaned chunks of one note, from onset to offset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteToken {
    chunks: Vec<Vec<f32>>,
}

impl NoteToken {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[Vec<f32>] {
        &self.chunks
    }

    /// Concatenates the chunks into one contiguous buffer.
    pub fn into_samples(self) -> Vec<f32> {
        self.chunks.concat()
    }

    fn push(&mut self, chunk: Vec<f32>) {
        self.chunks.push(chunk);
    }
}

/// Converts raw PCM to `f32`, zeroing anything non-finite.
pub fn sanitize(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&s| {
            let v = s as f32;
            if v.is_finite() { v } else { 0.0 }
        })
        .collect()
}

/// Mean absolute sample value; zero for an empty chunk.
pub fn chunk_magnitude(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|s| s.abs()).sum::<f32>() / samples.len() as f32
}

/// Streaming onset/offset state machine.
#[derive(Debug)]
pub struct OnsetDetector {
    config: DetectorConfig,
    warmup: Duration,
    capture_start: Option<Instant>,
    previous_magnitude: f32,
    note_started: bool,
    token: NoteToken,
}

impl OnsetDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            warmup: config.warmup(),
            config,
            capture_start: None,
            previous_magnitude: 0.0,
            note_started: false,
            token: NoteToken::default(),
        }
    }

    /// Records the capture start and clears all note state.
    ///
    /// Until this is called every chunk is treated as warm-up.
    pub fn arm(&mut self, start: Instant) {
        self.capture_start = Some(start);
        self.previous_magnitude = 0.0;
        self.note_started = false;
        self.token = NoteToken::default();
    }

    /// Processes one chunk. Returns the finished note's token when this
    /// chunk closes a note that accumulated at least one chunk.
    pub fn step(&mut self, chunk: &Chunk) -> Option<NoteToken> {
        if self.in_warmup(chunk.captured_at) {
            return None;
        }

        let clean = sanitize(&chunk.samples);
        let magnitude = chunk_magnitude(&clean);

        if !self.note_started && magnitude - self.previous_magnitude > self.config.onset_delta {
            debug!(
                "onset: magnitude {:.1} (previous {:.1})",
                magnitude, self.previous_magnitude
            );
            self.note_started = true;
        }

        let mut finished = None;
        if self.note_started {
            if magnitude > self.config.sustain_threshold {
                self.token.push(clean);
                if self
                    .config
                    .max_note_chunks
                    .is_some_and(|max| self.token.len() >= max)
                {
                    debug!("note reached {} chunks, closing it", self.token.len());
                    finished = self.finish_note();
                }
            } else {
                debug!("offset: magnitude {:.1}, {} chunks", magnitude, self.token.len());
                finished = self.finish_note();
            }
        }

        self.previous_magnitude = magnitude;
        finished
    }

    fn in_warmup(&self, at: Instant) -> bool {
        match self.capture_start {
            Some(start) => at.saturating_duration_since(start) < self.warmup,
            None => true,
        }
    }

    /// Ends the current note, handing back its token if it is non-empty.
    fn finish_note(&mut self) -> Option<NoteToken> {
        self.note_started = false;
        let token = std::mem::take(&mut self.token);
        (!token.is_empty()).then_some(token)
    }

    pub fn note_started(&self) -> bool {
        self.note_started
    }

    pub fn previous_magnitude(&self) -> f32 {
        self.previous_magnitude
    }

    /// Number of chunks in the note being captured.
    pub fn token_len(&self) -> usize {
        self.token.len()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }
}
