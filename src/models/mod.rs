//! Per-worker model construction.
//!
//! A worker asks its factory for models once, on its first task, and owns the
//! returned instances for the rest of its life. Nothing here is shared between
//! workers.

pub mod command;

pub use command::CommandModelFactory;

use crate::error::{NarrateError, Result};
use crate::stt::{MockTranscriber, Transcriber};
use crate::tts::{CallLog, MockGenerator, SpeechGenerator, Utterance};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// The model pair a worker owns.
pub struct WorkerModels {
    pub generator: Box<dyn SpeechGenerator>,
    pub transcriber: Box<dyn Transcriber>,
}

impl std::fmt::Debug for WorkerModels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerModels")
            .field("generator", &self.generator.model_name())
            .field("transcriber", &self.transcriber.model_name())
            .finish()
    }
}

/// Creates the models for one compute device.
pub trait ModelFactory: Send + Sync {
    fn load(&self, device: &str) -> Result<WorkerModels>;
}

type GeneratorBuilder = Arc<dyn Fn(&str) -> MockGenerator + Send + Sync>;
type TranscriberBuilder = Arc<dyn Fn(&str) -> MockTranscriber + Send + Sync>;

/// Mock factory for testing
///
/// By default every device gets a `MockGenerator` paired with a transcriber
/// that echoes what the generator spoke, so every candidate validates.
#[derive(Clone)]
pub struct MockModelFactory {
    generator: GeneratorBuilder,
    transcriber: TranscriberBuilder,
    echo: bool,
    failing: HashSet<String>,
    loads: Arc<AtomicUsize>,
    log: CallLog,
}

impl Default for MockModelFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl MockModelFactory {
    pub fn new() -> Self {
        Self {
            generator: Arc::new(|device| MockGenerator::new(&format!("mock-tts[{device}]"))),
            transcriber: Arc::new(|device| MockTranscriber::new(&format!("mock-asr[{device}]"))),
            echo: true,
            failing: HashSet::new(),
            loads: Arc::new(AtomicUsize::new(0)),
            log: CallLog::default(),
        }
    }

    /// Build each device's generator with `build`.
    pub fn with_generator(
        mut self,
        build: impl Fn(&str) -> MockGenerator + Send + Sync + 'static,
    ) -> Self {
        self.generator = Arc::new(build);
        self
    }

    /// Build each device's transcriber with `build`; disables echoing.
    pub fn with_transcriber(
        mut self,
        build: impl Fn(&str) -> MockTranscriber + Send + Sync + 'static,
    ) -> Self {
        self.transcriber = Arc::new(build);
        self.echo = false;
        self
    }

    /// Model initialisation fails on this device.
    pub fn failing_device(mut self, device: &str) -> Self {
        self.failing.insert(device.to_string());
        self
    }

    /// Generate calls across every device.
    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Number of `load` calls so far.
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelFactory for MockModelFactory {
    fn load(&self, device: &str) -> Result<WorkerModels> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(device) {
            return Err(NarrateError::ModelInit {
                device: device.to_string(),
                message: "mock device unavailable".to_string(),
            });
        }

        let utterance = Utterance::default();
        let generator = (self.generator)(device)
            .with_log(self.log.clone())
            .with_utterance(utterance.clone());
        let mut transcriber = (self.transcriber)(device);
        if self.echo {
            transcriber = transcriber.echoing(utterance);
        }
        Ok(WorkerModels {
            generator: Box::new(generator),
            transcriber: Box::new(transcriber),
        })
    }
}
