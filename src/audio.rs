use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("audio buffer has no samples or no channels")]
    MissingAudio,
    #[error("channel {0} length {1} does not match declared length {2}")]
    ChannelLengthMismatch(usize, usize, usize),
}

/// Decoded PCM handed in by the caller. Per-channel samples in [-1, 1].
///
/// Hosts that precompute the full analysis bundle (the CLI path) may pass
/// a metadata-only buffer: declared length and channel count without
/// sample data. Validation only rejects empty/zero-channel input.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub sample_rate: u32,
    pub length: usize,
    pub channels: Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: Vec<Vec<f32>>) -> AudioBuffer {
        let length = channels.first().map_or(0, Vec::len);
        AudioBuffer {
            sample_rate,
            length,
            channels,
        }
    }

    /// Metadata-only buffer for hosts that supply pre-computed analysis.
    pub fn from_metadata(sample_rate: u32, duration_sec: f64, num_channels: usize) -> AudioBuffer {
        AudioBuffer {
            sample_rate,
            length: (duration_sec * sample_rate as f64).round().max(0.0) as usize,
            channels: vec![Vec::new(); num_channels],
        }
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.length as f64 / self.sample_rate as f64
    }

    /// Fail fast on malformed buffers before any synthesis begins.
    pub fn validate(&self) -> Result<(), AudioError> {
        if self.length == 0 || self.channels.is_empty() || self.sample_rate == 0 {
            return Err(AudioError::MissingAudio);
        }
        for (i, ch) in self.channels.iter().enumerate() {
            // Metadata-only buffers carry empty channel vecs.
            if !ch.is_empty() && ch.len() != self.length {
                return Err(AudioError::ChannelLengthMismatch(i, ch.len(), self.length));
            }
        }
        Ok(())
    }
}
