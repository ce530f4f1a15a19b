//! In-memory audio and WAV file I/O.

pub mod wav;

pub use wav::{read_wav, read_wav_from, resample, write_wav};

use std::fs;
use std::path::Path;

/// Mono 16-bit PCM audio at a fixed sample rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// An empty buffer that fixes the sample rate for later appends.
    pub fn empty(sample_rate: u32) -> Self {
        Self::new(Vec::new(), sample_rate)
    }

    /// Digital silence of the given length.
    pub fn silence(duration_ms: u32, sample_rate: u32) -> Self {
        Self::new(vec![0; samples_for_ms(duration_ms, sample_rate)], sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in whole milliseconds (truncated).
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn append_silence(&mut self, duration_ms: u32) {
        let count = samples_for_ms(duration_ms, self.sample_rate);
        self.samples.resize(self.samples.len() + count, 0);
    }

    pub fn prepend_silence(&mut self, duration_ms: u32) {
        let count = samples_for_ms(duration_ms, self.sample_rate);
        self.samples.splice(0..0, std::iter::repeat_n(0, count));
    }

    /// Append another buffer, resampling it first if the rates differ.
    pub fn append(&mut self, other: &AudioBuffer) {
        if other.sample_rate == self.sample_rate {
            self.samples.extend_from_slice(&other.samples);
        } else {
            self.samples.extend(resample(
                &other.samples,
                other.sample_rate,
                self.sample_rate,
            ));
        }
    }
}

/// Move a file, falling back to copy and delete across filesystems.
pub fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)?;
    fs::remove_file(from)
}

/// Number of samples covering `duration_ms` at `sample_rate`.
pub fn samples_for_ms(duration_ms: u32, sample_rate: u32) -> usize {
    (duration_ms as u64 * sample_rate as u64 / 1000) as usize
}
