//! # Result Sinks
//!
//! Destinations for classified notes. Each completed note is published once
//! as a single key/value update, `{"current_note": "<label>"}`.

use anyhow::{Context, Result};
use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::SystemTime;

/// A classified note and when it was detected.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    pub note: String,
    pub detected_at: SystemTime,
}

impl NoteEvent {
    pub fn new(note: impl Into<String>) -> Self {
        Self {
            note: note.into(),
            detected_at: SystemTime::now(),
        }
    }

    /// The key/value update pushed to sinks.
    pub fn update(&self) -> NoteUpdate<'_> {
        NoteUpdate {
            current_note: &self.note,
        }
    }
}

/// Wire form of a note update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteUpdate<'a> {
    pub current_note: &'a str,
}

/// Receives one event per completed note.
pub trait NoteSink: Send {
    fn publish(&mut self, event: &NoteEvent) -> Result<()>;
}

/// Writes each update as one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> NoteSink for JsonLinesSink<W> {
    fn publish(&mut self, event: &NoteEvent) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &event.update())?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Keeps a JSON document on disk holding the latest update.
///
/// Other fields already in the document are preserved, so several
/// producers can share one state file.
pub struct StateFileSink {
    path: PathBuf,
}

impl StateFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl NoteSink for StateFileSink {
    fn publish(&mut self, event: &NoteEvent) -> Result<()> {
        let mut state = match fs::read_to_string(&self.path) {
            Ok(data) if !data.trim().is_empty() => {
                serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&data)
                    .with_context(|| format!("State file {} is not a JSON object", self.path.display()))?
            }
            _ => serde_json::Map::new(),
        };
        state.insert("current_note".into(), event.note.clone().into());

        let json_string = serde_json::to_string_pretty(&state)?;
        fs::write(&self.path, json_string)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

/// Forwards events to another thread.
pub struct ChannelSink {
    sender: Sender<NoteEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<NoteEvent>) -> Self {
        Self { sender }
    }
}

impl NoteSink for ChannelSink {
    fn publish(&mut self, event: &NoteEvent) -> Result<()> {
        self.sender
            .send(event.clone())
            .context("Note receiver disconnected")
    }
}
