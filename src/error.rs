//! Error types for narrate.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NarrateError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Session errors
    #[error("Session file not found at {path}")]
    SessionNotFound { path: String },

    #[error("Unknown chunk: {id}")]
    UnknownChunk { id: String },

    #[error("Session error: {message}")]
    Session { message: String },

    // Model errors
    #[error("Model initialization failed on {device}: {message}")]
    ModelInit { device: String, message: String },

    #[error("Voice conditioning failed: {message}")]
    VoiceConditioning { message: String },

    #[error("Generation produced no usable audio: {message}")]
    GenerationEmptyOutput { message: String },

    #[error("Generation crashed: {message}")]
    GenerationCrash { message: String },

    #[error("Transcription error: {message}")]
    Transcription { message: String },

    // Assembly errors
    #[error("External tool not found: {tool}")]
    ToolNotFound { tool: String },

    #[error("External tool failed: {message}")]
    ExternalTool { message: String },

    #[error("Audio artifact missing: {path}")]
    MissingArtifact { path: String },

    #[error("Nothing to assemble: {message}")]
    EmptyAssembly { message: String },

    #[error("Audio format error: {message}")]
    AudioFormat { message: String },

    // Wrapped library errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, NarrateError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = NarrateError::ConfigInvalidValue {
            key: "generation.num_candidates".to_string(),
            message: "must not exceed max_attempts".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for generation.num_candidates: must not exceed max_attempts"
        );
    }

    #[test]
    fn test_model_init_display() {
        let error = NarrateError::ModelInit {
            device: "cuda:1".to_string(),
            message: "out of memory".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Model initialization failed on cuda:1: out of memory"
        );
    }

    #[test]
    fn test_unknown_chunk_display() {
        let error = NarrateError::UnknownChunk {
            id: "abc123".to_string(),
        };
        assert_eq!(error.to_string(), "Unknown chunk: abc123");
    }

    #[test]
    fn test_empty_assembly_display() {
        let error = NarrateError::EmptyAssembly {
            message: "no generated audio files were found".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Nothing to assemble: no generated audio files were found"
        );
    }

    #[test]
    fn test_tool_not_found_display() {
        let error = NarrateError::ToolNotFound {
            tool: "auto-editor".to_string(),
        };
        assert_eq!(error.to_string(), "External tool not found: auto-editor");
    }

    #[test]
    fn test_other_display() {
        let error = NarrateError::Other("unexpected error".to_string());
        assert_eq!(error.to_string(), "unexpected error");
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: NarrateError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: NarrateError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_from_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: NarrateError = json_error.into();
        assert!(error.to_string().starts_with("JSON error"));
    }

    #[test]
    fn test_error_source_chain_io() {
        let io_error = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let error: NarrateError = io_error.into();

        let error_trait: &dyn std::error::Error = &error;
        assert!(error_trait.source().is_some());
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<NarrateError>();
        assert_sync::<NarrateError>();
    }
}
