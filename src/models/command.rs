//! Model backend that drives external engines through argument templates.
//!
//! Placeholders: `{text}` `{out}` `{seed}` `{device}` `{voice}`
//! `{exaggeration}` `{temperature}` `{cfg_weight}` `{watermark}` for
//! generation, `{audio}` `{device}` for transcription.

use crate::audio::{AudioBuffer, read_wav};
use crate::config::ModelsConfig;
use crate::error::{NarrateError, Result};
use crate::models::{ModelFactory, WorkerModels};
use crate::stt::Transcriber;
use crate::tools::CommandExecutor;
use crate::tts::{SamplingParams, SpeechGenerator};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct CommandModelFactory {
    generate: Vec<String>,
    transcribe: Vec<String>,
    executor: Arc<dyn CommandExecutor>,
    scratch: PathBuf,
}

impl CommandModelFactory {
    pub fn new(config: &ModelsConfig, executor: Arc<dyn CommandExecutor>) -> Self {
        Self {
            generate: config.generate_command.clone(),
            transcribe: config.transcribe_command.clone(),
            executor,
            scratch: std::env::temp_dir(),
        }
    }

    /// Directory for the engine's raw output before it is read back.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch = dir.into();
        self
    }
}

impl ModelFactory for CommandModelFactory {
    fn load(&self, device: &str) -> Result<WorkerModels> {
        if self.generate.is_empty() {
            return Err(NarrateError::ModelInit {
                device: device.to_string(),
                message: "models.generate_command is not configured".to_string(),
            });
        }
        fs::create_dir_all(&self.scratch).map_err(|e| NarrateError::ModelInit {
            device: device.to_string(),
            message: format!("cannot create scratch dir {}: {e}", self.scratch.display()),
        })?;
        log::info!(
            "models: command backend on {device}: {}",
            self.generate.first().map(String::as_str).unwrap_or_default()
        );
        Ok(WorkerModels {
            generator: Box::new(CommandGenerator {
                device: device.to_string(),
                template: self.generate.clone(),
                executor: Arc::clone(&self.executor),
                scratch: self.scratch.clone(),
                voice: None,
            }),
            transcriber: Box::new(CommandTranscriber {
                device: device.to_string(),
                template: self.transcribe.clone(),
                executor: Arc::clone(&self.executor),
            }),
        })
    }
}

struct CommandGenerator {
    device: String,
    template: Vec<String>,
    executor: Arc<dyn CommandExecutor>,
    scratch: PathBuf,
    voice: Option<PathBuf>,
}

impl SpeechGenerator for CommandGenerator {
    fn prepare_voice(&mut self, reference: &Path, _exaggeration: f32) -> Result<()> {
        if !reference.is_file() {
            return Err(NarrateError::VoiceConditioning {
                message: format!("reference audio {} does not exist", reference.display()),
            });
        }
        self.voice = Some(reference.to_path_buf());
        Ok(())
    }

    fn generate(&mut self, text: &str, params: &SamplingParams, seed: u64) -> Result<AudioBuffer> {
        let out = self.scratch.join(format!(
            "narrate_{}_{}.wav",
            uuid::Uuid::new_v4().simple(),
            seed
        ));
        let out_str = out.display().to_string();
        let voice = self
            .voice
            .as_ref()
            .map(|v| v.display().to_string())
            .unwrap_or_default();
        let vars = [
            ("{text}", text.to_string()),
            ("{out}", out_str),
            ("{seed}", seed.to_string()),
            ("{device}", self.device.clone()),
            ("{voice}", voice),
            ("{exaggeration}", params.exaggeration.to_string()),
            ("{temperature}", params.temperature.to_string()),
            ("{cfg_weight}", params.cfg_weight.to_string()),
            ("{watermark}", params.watermark.to_string()),
        ];

        let result = run_template(self.executor.as_ref(), &self.template, &vars)
            .map_err(|e| NarrateError::GenerationCrash {
                message: e.to_string(),
            })
            .and_then(|_| match read_wav(&out) {
                Err(NarrateError::MissingArtifact { .. }) => {
                    Err(NarrateError::GenerationEmptyOutput {
                        message: format!("engine wrote no audio to {}", out.display()),
                    })
                }
                other => other,
            });
        fs::remove_file(&out).ok();
        result
    }

    fn model_name(&self) -> &str {
        self.template.first().map(String::as_str).unwrap_or("command")
    }
}

struct CommandTranscriber {
    device: String,
    template: Vec<String>,
    executor: Arc<dyn CommandExecutor>,
}

impl Transcriber for CommandTranscriber {
    fn transcribe(&mut self, audio: &Path) -> Result<String> {
        if self.template.is_empty() {
            return Err(NarrateError::Transcription {
                message: "models.transcribe_command is not configured".to_string(),
            });
        }
        let vars = [
            ("{audio}", audio.display().to_string()),
            ("{device}", self.device.clone()),
        ];
        run_template(self.executor.as_ref(), &self.template, &vars)
            .map(|stdout| stdout.trim().to_string())
            .map_err(|e| NarrateError::Transcription {
                message: e.to_string(),
            })
    }

    fn model_name(&self) -> &str {
        self.template.first().map(String::as_str).unwrap_or("command")
    }
}

/// Substitute placeholders in every template argument.
///
/// Each argument is scanned once, so substituted values are never expanded
/// again. Unknown `{...}` sequences are copied as written.
fn fill(template: &[String], vars: &[(&str, String)]) -> Vec<String> {
    template.iter().map(|arg| fill_one(arg, vars)).collect()
}

fn fill_one(arg: &str, vars: &[(&str, String)]) -> String {
    let mut filled = String::with_capacity(arg.len());
    let mut rest = arg;
    while let Some(open) = rest.find('{') {
        filled.push_str(&rest[..open]);
        let candidate = &rest[open..];
        match vars.iter().find(|(key, _)| candidate.starts_with(key)) {
            Some((key, value)) => {
                filled.push_str(value);
                rest = &candidate[key.len()..];
            }
            None => {
                filled.push('{');
                rest = &candidate[1..];
            }
        }
    }
    filled.push_str(rest);
    filled
}

fn run_template(
    executor: &dyn CommandExecutor,
    template: &[String],
    vars: &[(&str, String)],
) -> Result<String> {
    let args = fill(template, vars);
    let Some((program, rest)) = args.split_first() else {
        return Err(NarrateError::Other("empty command template".to_string()));
    };
    let rest: Vec<&str> = rest.iter().map(String::as_str).collect();
    executor.execute(program, &rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::write_wav;
    use crate::tools::MockCommandExecutor;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn fill_replaces_every_placeholder() {
        let template = strings(&["tts", "--seed={seed}", "{text}", "{text}"]);
        let filled = fill(
            &template,
            &[("{seed}", "7".to_string()), ("{text}", "hi".to_string())],
        );
        assert_eq!(filled, strings(&["tts", "--seed=7", "hi", "hi"]));
    }

    #[test]
    fn fill_keeps_braces_in_substituted_text() {
        let template = strings(&["tts", "{text}", "{out}", "{unknown}"]);
        let filled = fill(
            &template,
            &[
                ("{text}", "costs {seed} pounds at {out}".to_string()),
                ("{out}", "o.wav".to_string()),
                ("{seed}", "42".to_string()),
            ],
        );
        assert_eq!(
            filled,
            strings(&["tts", "costs {seed} pounds at {out}", "o.wav", "{unknown}"])
        );
    }

    #[test]
    fn load_creates_missing_scratch_dir() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("rendered.wav");
        write_wav(&source, &AudioBuffer::new(vec![100; 240], 24000)).unwrap();
        let scratch = dir.path().join("book").join("model_scratch");

        let config = ModelsConfig {
            generate_command: strings(&["tts", source.to_str().unwrap(), "{out}"]),
            transcribe_command: Vec::new(),
        };
        let factory = CommandModelFactory::new(&config, Arc::new(MockCommandExecutor::new()))
            .with_scratch_dir(&scratch);
        let mut models = factory.load("cpu").unwrap();

        assert!(scratch.is_dir());
        let audio = models
            .generator
            .generate("hello", &SamplingParams::default(), 3)
            .unwrap();
        assert_eq!(audio.samples.len(), 240);
    }

    #[test]
    fn missing_generate_command_fails_init() {
        let factory = CommandModelFactory::new(
            &ModelsConfig::default(),
            Arc::new(MockCommandExecutor::new()),
        );
        assert!(matches!(
            factory.load("cpu"),
            Err(NarrateError::ModelInit { .. })
        ));
    }

    #[test]
    fn generator_reads_back_engine_output() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("rendered.wav");
        write_wav(&source, &AudioBuffer::new(vec![100; 2400], 24000)).unwrap();

        // The mock executor copies its first argument to its last one,
        // standing in for an engine that writes `{out}`.
        let config = ModelsConfig {
            generate_command: strings(&["tts", source.to_str().unwrap(), "{out}"]),
            transcribe_command: strings(&["asr", "{audio}"]),
        };
        let executor = Arc::new(MockCommandExecutor::new().with_stdout("  spoken words \n"));
        let factory =
            CommandModelFactory::new(&config, executor.clone()).with_scratch_dir(dir.path());
        let mut models = factory.load("cuda:0").unwrap();

        let audio = models
            .generator
            .generate("hello", &SamplingParams::default(), 11)
            .unwrap();
        assert_eq!(audio.samples.len(), 2400);

        let heard = models.transcriber.transcribe(&source).unwrap();
        assert_eq!(heard, "spoken words");

        // scratch output was cleaned up
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with("narrate_")
            })
            .count();
        assert_eq!(leftovers, 0);
        assert_eq!(executor.call_count(), 2);
    }

    #[test]
    fn engine_without_output_is_empty_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelsConfig {
            generate_command: strings(&["tts", "{text}", "{out}"]),
            transcribe_command: Vec::new(),
        };
        let factory = CommandModelFactory::new(&config, Arc::new(MockCommandExecutor::new()))
            .with_scratch_dir(dir.path());
        let mut models = factory.load("cpu").unwrap();

        assert!(matches!(
            models
                .generator
                .generate("hello", &SamplingParams::default(), 1),
            Err(NarrateError::GenerationEmptyOutput { .. })
        ));
        assert!(matches!(
            models.transcriber.transcribe(Path::new("a.wav")),
            Err(NarrateError::Transcription { .. })
        ));
    }

    #[test]
    fn engine_failure_is_a_crash() {
        let config = ModelsConfig {
            generate_command: strings(&["tts", "{out}"]),
            transcribe_command: Vec::new(),
        };
        let factory = CommandModelFactory::new(
            &config,
            Arc::new(MockCommandExecutor::new().failing("tts")),
        );
        let mut models = factory.load("cpu").unwrap();
        assert!(matches!(
            models.generator.generate("x", &SamplingParams::default(), 1),
            Err(NarrateError::GenerationCrash { .. })
        ));
    }

    #[test]
    fn voice_reference_must_exist() {
        let config = ModelsConfig {
            generate_command: strings(&["tts"]),
            transcribe_command: Vec::new(),
        };
        let factory = CommandModelFactory::new(&config, Arc::new(MockCommandExecutor::new()));
        let mut models = factory.load("cpu").unwrap();
        assert!(matches!(
            models
                .generator
                .prepare_voice(Path::new("/no/such/voice.wav"), 0.5),
            Err(NarrateError::VoiceConditioning { .. })
        ));
    }
}
