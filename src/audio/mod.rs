//! Audio output capability.
//!
//! [`AudioOutput::open`] starts a stream on a named backend and pulls samples
//! from an [`AudioSource`] on the backend's own thread. [`CpalOutput`] is the
//! production implementation.

mod cpal_output;

use crate::config::{AudioBackend, AudioConfig};
use crate::engine::Renderer;

pub use cpal_output::CpalOutput;

/// Stream settings taken from the audio configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioParams {
    pub sample_rate: u32,
    /// Frames per period.
    pub buffer_size: u32,
    pub periods: u32,
    /// Device override. Empty selects the backend's usual device.
    pub device: String,
    pub realtime: bool,
}

impl AudioParams {
    pub fn from_config(audio: &AudioConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate,
            buffer_size: audio.buffer_size,
            periods: audio.periods,
            device: audio.device.clone(),
            realtime: audio.realtime_priority,
        }
    }
}

/// Error opening an output stream.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("{0} output is not supported by this build")]
    Unsupported(AudioBackend),

    #[error("no output device {device:?} for {backend}")]
    NoDevice {
        backend: AudioBackend,
        device: String,
    },

    #[error("device does not support {sample_rate} Hz stereo output")]
    UnsupportedConfig { sample_rate: u32 },

    #[error("{backend} stream failed: {reason}")]
    Stream {
        backend: AudioBackend,
        reason: String,
    },
}

/// Produces interleaved samples on the audio thread.
pub trait AudioSource: Send + 'static {
    fn render(&mut self, out: &mut [f32], channels: usize);
}

impl AudioSource for Renderer {
    fn render(&mut self, out: &mut [f32], channels: usize) {
        self.render_interleaved(out, channels);
    }
}

/// A running output stream. Not `Send`: it stays on the thread that opened it.
pub trait AudioStream {
    fn backend(&self) -> AudioBackend;

    /// Stops the stream and releases the device.
    fn close(self: Box<Self>);
}

/// Opens output streams.
pub trait AudioOutput {
    fn open(
        &self,
        backend: AudioBackend,
        params: &AudioParams,
        source: Box<dyn AudioSource>,
    ) -> Result<Box<dyn AudioStream>, AudioError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_follow_config() {
        let mut audio = AudioConfig::default();
        audio.device = "hw:0".into();
        audio.sample_rate = 44_100;
        let params = AudioParams::from_config(&audio);
        assert_eq!(params.sample_rate, 44_100);
        assert_eq!(params.buffer_size, 512);
        assert_eq!(params.periods, 2);
        assert_eq!(params.device, "hw:0");
        assert!(params.realtime);
    }

    #[test]
    fn error_messages_name_backend() {
        let err = AudioError::NoDevice {
            backend: AudioBackend::PipeWire,
            device: "pipewire".into(),
        };
        assert!(err.to_string().contains("pipewire"));
        assert!(AudioError::Unsupported(AudioBackend::Jack)
            .to_string()
            .starts_with("jack"));
    }
}
