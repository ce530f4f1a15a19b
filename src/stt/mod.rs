//! Speech recognition used by the validation gate.

pub mod transcriber;

pub use transcriber::{MockTranscriber, Transcriber};
