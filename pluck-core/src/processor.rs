//! # Note Processor
//!
//! Wires a capture source to the onset detector, classifier and sink.
//!
//! ## Architecture
//! - **Capture thread**: owned by the source, pushes chunks onto a channel
//! - **Note worker**: single consumer; steps the detector per chunk and, when
//!   a note ends, classifies it and publishes the result before taking the
//!   next chunk
//! - **Caller thread**: drives `start_capture` / `stop_capture`

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::audio::{CaptureSource, Chunk};
use crate::classifier::NoteClassifier;
use crate::config::Config;
use crate::onset::OnsetDetector;
use crate::sink::{NoteEvent, NoteSink};

/// State owned by the note worker while capture runs.
struct Pipeline {
    detector: OnsetDetector,
    classifier: NoteClassifier,
    sink: Box<dyn NoteSink>,
}

impl Pipeline {
    fn handle(&mut self, chunk: &Chunk) {
        let Some(token) = self.detector.step(chunk) else {
            return;
        };

        let chunk_count = token.len();
        let samples = token.into_samples();
        let event = NoteEvent::new(self.classifier.classify(&samples));
        info!("Detected {} from {} chunks", event.note, chunk_count);

        if let Err(e) = self.sink.publish(&event) {
            warn!("Failed to publish note {}: {:#}", event.note, e);
        }
    }
}

/// Handle to the running note worker.
struct Worker {
    shutdown_tx: Sender<()>,
    thread_handle: JoinHandle<Pipeline>,
}

/// Streaming note detector bound to one capture source and one sink.
pub struct NoteProcessor<S: CaptureSource> {
    config: Config,
    source: S,
    chunk_tx: Sender<Chunk>,
    chunk_rx: Receiver<Chunk>,
    pipeline: Option<Pipeline>,
    worker: Option<Worker>,
}

impl<S: CaptureSource> NoteProcessor<S> {
    /// Validates `config` and builds the detector and classifier.
    ///
    /// # Arguments
    ///
    /// * `config` - Capture, detector and transform settings
    /// * `source` - Capture source, opened lazily by `start_capture`
    /// * `sink` - Receives one `NoteEvent` per detected note
    ///
    /// # Returns
    ///
    /// The idle processor, or the validation error for a bad `config`.
    pub fn new(config: Config, source: S, sink: Box<dyn NoteSink>) -> Result<Self> {
        config.validate()?;
        let classifier = NoteClassifier::new(config.capture.sample_rate, &config.transform)?;
        let detector = OnsetDetector::new(config.detector.clone());
        let (chunk_tx, chunk_rx) = crossbeam_channel::unbounded();

        Ok(Self {
            config,
            source,
            chunk_tx,
            chunk_rx,
            pipeline: Some(Pipeline {
                detector,
                classifier,
                sink,
            }),
            worker: None,
        })
    }

    /// Records the capture start, opens the source if needed, starts the
    /// note worker and then the stream.
    ///
    /// Calling it while capture is running logs a warning and does nothing.
    ///
    /// # Returns
    ///
    /// `Ok(())` once the source is streaming. If the source fails to open
    /// or start, the error is returned and the worker is joined again, so
    /// the processor stays idle and can be retried.
    pub fn start_capture(&mut self) -> Result<()> {
        if self.worker.is_some() {
            warn!("Capture already running");
            return Ok(());
        }

        let started_at = Instant::now();
        if !self.source.is_open() {
            self.source.open(self.chunk_tx.clone())?;
        }

        // Leftovers from a previous run would predate this capture start.
        let stale = self.chunk_rx.try_iter().count();
        if stale > 0 {
            debug!("Discarded {} stale chunks", stale);
        }

        let mut pipeline = self
            .pipeline
            .take()
            .ok_or_else(|| anyhow!("Note pipeline unavailable"))?;
        pipeline.detector.arm(started_at);

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let chunk_rx = self.chunk_rx.clone();
        let thread_handle = thread::Builder::new()
            .name("note-worker".to_string())
            .spawn(move || run_worker(pipeline, chunk_rx, shutdown_rx))
            .context("Failed to spawn note worker")?;
        self.worker = Some(Worker {
            shutdown_tx,
            thread_handle,
        });

        if let Err(e) = self.source.start() {
            self.join_worker();
            return Err(e);
        }
        info!("Capture started");
        Ok(())
    }

    /// Stops the stream, lets the worker finish the chunks already queued,
    /// then closes and terminates the source.
    ///
    /// # Returns
    ///
    /// The first lifecycle error from the source. The worker is joined
    /// even when `stop` fails, so the processor is idle afterwards.
    pub fn stop_capture(&mut self) -> Result<()> {
        if self.worker.is_none() {
            warn!("Capture is not running");
            return Ok(());
        }

        let stopped = self.source.stop();
        self.join_worker();
        stopped?;
        self.source.close()?;
        self.source.terminate()?;
        info!("Capture stopped");
        Ok(())
    }

    pub fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Signals the worker and recovers the pipeline for a later restart.
    fn join_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        let _ = worker.shutdown_tx.send(());
        match worker.thread_handle.join() {
            Ok(pipeline) => self.pipeline = Some(pipeline),
            Err(_) => error!("Note worker panicked; processor cannot be restarted"),
        }
    }
}

impl<S: CaptureSource> Drop for NoteProcessor<S> {
    fn drop(&mut self) {
        if self.is_capturing() {
            if let Err(e) = self.stop_capture() {
                error!("Error stopping capture: {:#}", e);
            }
        }
    }
}

/// Note worker loop: one chunk at a time, in arrival order.
fn run_worker(mut pipeline: Pipeline, chunks: Receiver<Chunk>, shutdown: Receiver<()>) -> Pipeline {
    debug!("Note worker running");
    loop {
        crossbeam_channel::select! {
            recv(chunks) -> msg => match msg {
                Ok(chunk) => pipeline.handle(&chunk),
                // The processor keeps a sender alive, so this only fires if
                // it is dropped without joining the worker.
                Err(_) => {
                    info!("Chunk channel closed");
                    break;
                }
            },
            recv(shutdown) -> _ => {
                // The source is already stopped; finish what it delivered.
                for chunk in chunks.try_iter() {
                    pipeline.handle(&chunk);
                }
                break;
            },
        }
    }
    debug!("Note worker finished");
    pipeline
}
