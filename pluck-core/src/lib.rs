// pluck-core/src/lib.rs

//! The core logic for the pluck note listener.
//! This crate is responsible for audio capture, onset/offset detection,
//! constant-Q note classification and publishing detected notes. It is
//! completely headless and contains no process wiring.

pub mod audio;
pub mod classifier;
pub mod config;
pub mod cqt;
pub mod error;
pub mod onset;
pub mod processor;
pub mod sink;
pub mod tuning;

pub use audio::{CaptureSource, Chunk, CpalSource};
pub use classifier::NoteClassifier;
pub use config::{CaptureConfig, Config, DetectorConfig, TransformConfig};
pub use error::ConfigError;
pub use onset::{NoteToken, OnsetDetector};
pub use processor::NoteProcessor;
pub use sink::{ChannelSink, JsonLinesSink, NoteEvent, NoteSink, StateFileSink};
pub use tuning::NoteTable;
