//! Speech generation capability.

pub mod generator;

pub use generator::{
    CallLog, GenerateCall, MockGenerator, MockRender, SamplingParams, SpeechGenerator, Utterance,
};
