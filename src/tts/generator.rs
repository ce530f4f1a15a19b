use crate::audio::AudioBuffer;
use crate::error::{NarrateError, Result};
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Sampling parameters passed unchanged to every generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub exaggeration: f32,
    pub temperature: f32,
    pub cfg_weight: f32,
    /// Embed the model's watermark in the output.
    pub watermark: bool,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            exaggeration: crate::defaults::DEFAULT_EXAGGERATION,
            temperature: crate::defaults::DEFAULT_TEMPERATURE,
            cfg_weight: crate::defaults::DEFAULT_CFG_WEIGHT,
            watermark: false,
        }
    }
}

/// Trait for text-to-speech generation.
///
/// Implementations must be reproducible: the same `(text, params, seed)` yields
/// the same audio. Each worker owns one instance exclusively.
pub trait SpeechGenerator: Send {
    /// Condition subsequent generations on a reference voice recording.
    fn prepare_voice(&mut self, reference: &Path, exaggeration: f32) -> Result<()>;

    /// Render `text` to audio using `seed` for every random source.
    fn generate(&mut self, text: &str, params: &SamplingParams, seed: u64) -> Result<AudioBuffer>;

    /// Get the name of the loaded model
    fn model_name(&self) -> &str;
}

impl<T: SpeechGenerator + ?Sized> SpeechGenerator for Box<T> {
    fn prepare_voice(&mut self, reference: &Path, exaggeration: f32) -> Result<()> {
        (**self).prepare_voice(reference, exaggeration)
    }

    fn generate(&mut self, text: &str, params: &SamplingParams, seed: u64) -> Result<AudioBuffer> {
        (**self).generate(text, params, seed)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Last text a mock generator spoke, shared with an echoing mock transcriber.
#[derive(Debug, Clone, Default)]
pub struct Utterance(Arc<Mutex<Option<String>>>);

impl Utterance {
    pub fn record(&self, text: &str) {
        if let Ok(mut last) = self.0.lock() {
            *last = Some(text.to_string());
        }
    }

    pub fn last(&self) -> Option<String> {
        self.0.lock().ok().and_then(|last| last.clone())
    }
}

/// One observed `generate` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateCall {
    pub text: String,
    pub seed: u64,
}

/// Shared record of a mock generator's calls, readable after it moves into a worker.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<GenerateCall>>>,
    voice_preparations: Arc<AtomicUsize>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<GenerateCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn seeds(&self) -> Vec<u64> {
        self.calls().into_iter().map(|c| c.seed).collect()
    }

    pub fn voice_preparations(&self) -> usize {
        self.voice_preparations.load(Ordering::SeqCst)
    }

    fn push(&self, call: GenerateCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }
}

/// Scripted outcome of one mock generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockRender {
    /// Audio of this many milliseconds
    Audio(u32),
    /// Zero samples
    Empty,
    /// The model raises
    Crash,
}

type GenerateHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Mock generator for testing
///
/// Renders deterministic noise derived from the seed. Outcomes come from the
/// script first, then the default duration.
#[derive(Clone)]
pub struct MockGenerator {
    model_name: String,
    sample_rate: u32,
    default_ms: u32,
    script: VecDeque<MockRender>,
    fail_voice: bool,
    log: CallLog,
    utterance: Utterance,
    hook: Option<GenerateHook>,
}

impl fmt::Debug for MockGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockGenerator")
            .field("model_name", &self.model_name)
            .field("sample_rate", &self.sample_rate)
            .field("default_ms", &self.default_ms)
            .field("script", &self.script)
            .field("fail_voice", &self.fail_voice)
            .finish_non_exhaustive()
    }
}

impl MockGenerator {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            sample_rate: crate::defaults::FALLBACK_SAMPLE_RATE,
            default_ms: 1000,
            script: VecDeque::new(),
            fail_voice: false,
            log: CallLog::default(),
            utterance: Utterance::default(),
            hook: None,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Duration used once the script runs out.
    pub fn with_default_ms(mut self, duration_ms: u32) -> Self {
        self.default_ms = duration_ms;
        self
    }

    /// Queue outcomes consumed one per call.
    pub fn with_script(mut self, renders: impl IntoIterator<Item = MockRender>) -> Self {
        self.script.extend(renders);
        self
    }

    /// Queue audio durations consumed one per call.
    pub fn with_durations(self, durations_ms: impl IntoIterator<Item = u32>) -> Self {
        self.with_script(durations_ms.into_iter().map(MockRender::Audio))
    }

    pub fn with_voice_failure(mut self) -> Self {
        self.fail_voice = true;
        self
    }

    /// Share calls with a handle kept by the test.
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Record spoken text where an echoing transcriber can read it.
    pub fn with_utterance(mut self, utterance: Utterance) -> Self {
        self.utterance = utterance;
        self
    }

    /// Run `hook` with the text at the start of every generate call.
    pub fn on_generate(mut self, hook: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.hook = Some(Arc::new(hook));
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    fn noise(&self, duration_ms: u32, seed: u64) -> Vec<i16> {
        let count = crate::audio::samples_for_ms(duration_ms, self.sample_rate);
        let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        (0..count)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                ((state >> 33) as i16) / 4
            })
            .collect()
    }
}

impl SpeechGenerator for MockGenerator {
    fn prepare_voice(&mut self, reference: &Path, _exaggeration: f32) -> Result<()> {
        self.log.voice_preparations.fetch_add(1, Ordering::SeqCst);
        if self.fail_voice {
            return Err(NarrateError::VoiceConditioning {
                message: format!("mock cannot condition on {}", reference.display()),
            });
        }
        Ok(())
    }

    fn generate(&mut self, text: &str, _params: &SamplingParams, seed: u64) -> Result<AudioBuffer> {
        if let Some(hook) = &self.hook {
            hook(text);
        }
        self.log.push(GenerateCall {
            text: text.to_string(),
            seed,
        });
        self.utterance.record(text);

        match self
            .script
            .pop_front()
            .unwrap_or(MockRender::Audio(self.default_ms))
        {
            MockRender::Audio(ms) => Ok(AudioBuffer::new(self.noise(ms, seed), self.sample_rate)),
            MockRender::Empty => Ok(AudioBuffer::empty(self.sample_rate)),
            MockRender::Crash => Err(NarrateError::GenerationCrash {
                message: "mock generator crashed".to_string(),
            }),
        }
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_reproduces_same_audio() {
        let mut generator = MockGenerator::new("mock");
        let params = SamplingParams::default();

        let a = generator.generate("hello", &params, 42).unwrap();
        let b = generator.generate("hello", &params, 42).unwrap();
        let c = generator.generate("hello", &params, 43).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.duration_ms(), 1000);
    }

    #[test]
    fn script_then_default() {
        let mut generator = MockGenerator::new("mock")
            .with_script([MockRender::Empty, MockRender::Crash])
            .with_durations([50])
            .with_default_ms(300);
        let params = SamplingParams::default();

        assert!(generator.generate("t", &params, 1).unwrap().is_empty());
        assert!(matches!(
            generator.generate("t", &params, 2),
            Err(NarrateError::GenerationCrash { .. })
        ));
        assert_eq!(generator.generate("t", &params, 3).unwrap().duration_ms(), 50);
        assert_eq!(generator.generate("t", &params, 4).unwrap().duration_ms(), 300);
        assert_eq!(generator.log().seeds(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn log_and_utterance_are_shared() {
        let log = CallLog::default();
        let utterance = Utterance::default();
        let mut generator: Box<dyn SpeechGenerator> = Box::new(
            MockGenerator::new("mock")
                .with_log(log.clone())
                .with_utterance(utterance.clone()),
        );

        generator.prepare_voice(Path::new("voice.wav"), 0.5).unwrap();
        generator
            .generate("Call me Ishmael.", &SamplingParams::default(), 9)
            .unwrap();

        assert_eq!(log.voice_preparations(), 1);
        assert_eq!(
            log.calls(),
            vec![GenerateCall {
                text: "Call me Ishmael.".to_string(),
                seed: 9
            }]
        );
        assert_eq!(utterance.last().as_deref(), Some("Call me Ishmael."));
    }

    #[test]
    fn voice_failure_is_reported() {
        let mut generator = MockGenerator::new("mock").with_voice_failure();
        assert!(matches!(
            generator.prepare_voice(Path::new("v.wav"), 0.5),
            Err(NarrateError::VoiceConditioning { .. })
        ));
    }
}
