use crate::error::{NarrateError, Result};
use crate::tts::generator::Utterance;
use std::collections::VecDeque;
use std::path::Path;

/// Trait for speech-to-text transcription of a rendered candidate.
///
/// This trait allows swapping implementations (external recognizer vs mock).
/// Each worker owns its instance exclusively, so `transcribe` takes `&mut self`.
pub trait Transcriber: Send {
    /// Transcribe the WAV file at `audio` to text.
    fn transcribe(&mut self, audio: &Path) -> Result<String>;

    /// Get the name of the loaded model
    fn model_name(&self) -> &str;
}

impl<T: Transcriber + ?Sized> Transcriber for Box<T> {
    fn transcribe(&mut self, audio: &Path) -> Result<String> {
        (**self).transcribe(audio)
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Mock transcriber for testing
///
/// Replies come from the script first, one per call (`None` is a failure).
/// Once the script is exhausted it echoes the linked generator's last
/// utterance if one is attached, otherwise the fixed response.
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    model_name: String,
    response: String,
    should_fail: bool,
    script: VecDeque<Option<String>>,
    echo: Option<Utterance>,
    calls: usize,
}

impl MockTranscriber {
    /// Create a new mock transcriber with default settings
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            response: "mock transcription".to_string(),
            should_fail: false,
            script: VecDeque::new(),
            echo: None,
            calls: 0,
        }
    }

    /// Configure the mock to return a specific response
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Queue replies consumed one per call before the fallback applies.
    pub fn with_script<I, S>(mut self, replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.script
            .extend(replies.into_iter().map(|s| Some(s.into())));
        self
    }

    /// Queue one failing call.
    pub fn then_fail(mut self) -> Self {
        self.script.push_back(None);
        self
    }

    /// Transcribe perfectly: return whatever the linked generator last spoke.
    pub fn echoing(mut self, utterance: Utterance) -> Self {
        self.echo = Some(utterance);
        self
    }

    /// Number of transcribe calls so far.
    pub fn calls(&self) -> usize {
        self.calls
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&mut self, _audio: &Path) -> Result<String> {
        self.calls += 1;
        let fail = || NarrateError::Transcription {
            message: "mock transcription failure".to_string(),
        };
        if let Some(reply) = self.script.pop_front() {
            return reply.ok_or_else(fail);
        }
        if self.should_fail {
            return Err(fail());
        }
        if let Some(echo) = &self.echo
            && let Some(text) = echo.last()
        {
            return Ok(text);
        }
        Ok(self.response.clone())
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav() -> &'static Path {
        Path::new("/tmp/unused.wav")
    }

    #[test]
    fn test_mock_transcriber_returns_response() {
        let mut transcriber =
            MockTranscriber::new("test-model").with_response("Hello, this is a test");

        let result = transcriber.transcribe(wav());

        assert_eq!(result.unwrap(), "Hello, this is a test");
        assert_eq!(transcriber.calls(), 1);
    }

    #[test]
    fn test_mock_transcriber_returns_error_when_configured() {
        let mut transcriber = MockTranscriber::new("test-model").with_failure();

        match transcriber.transcribe(wav()) {
            Err(NarrateError::Transcription { message }) => {
                assert_eq!(message, "mock transcription failure");
            }
            other => panic!("Expected Transcription error, got {other:?}"),
        }
    }

    #[test]
    fn test_script_is_consumed_in_order_then_falls_back() {
        let mut transcriber = MockTranscriber::new("m")
            .with_script(["first"])
            .then_fail()
            .with_script(["third"])
            .with_response("fallback");

        assert_eq!(transcriber.transcribe(wav()).unwrap(), "first");
        assert!(transcriber.transcribe(wav()).is_err());
        assert_eq!(transcriber.transcribe(wav()).unwrap(), "third");
        assert_eq!(transcriber.transcribe(wav()).unwrap(), "fallback");
        assert_eq!(transcriber.calls(), 4);
    }

    #[test]
    fn test_echo_follows_utterance() {
        let utterance = Utterance::default();
        let mut transcriber = MockTranscriber::new("m").echoing(utterance.clone());

        assert_eq!(transcriber.transcribe(wav()).unwrap(), "mock transcription");
        utterance.record("It was the best of times.");
        assert_eq!(
            transcriber.transcribe(wav()).unwrap(),
            "It was the best of times."
        );
    }

    #[test]
    fn test_transcriber_trait_is_object_safe() {
        let mut transcriber: Box<dyn Transcriber> =
            Box::new(MockTranscriber::new("test-model").with_response("boxed test"));

        assert_eq!(transcriber.model_name(), "test-model");
        assert_eq!(transcriber.transcribe(wav()).unwrap(), "boxed test");
    }
}
