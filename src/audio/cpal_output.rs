//! Output streams through `cpal`.
//!
//! Raw ALSA uses the default host and device. PipeWire and PulseAudio are
//! reached through their ALSA plugin devices; JACK uses cpal's JACK host when
//! the `jack` feature is enabled.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error, info, warn};

use super::{AudioError, AudioOutput, AudioParams, AudioSource, AudioStream};
use crate::config::AudioBackend;
use crate::realtime::promote_current_thread;

/// [`AudioOutput`] backed by `cpal`.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalOutput;

impl CpalOutput {
    pub fn new() -> Self {
        Self
    }
}

struct CpalStream {
    stream: cpal::Stream,
    backend: AudioBackend,
}

impl AudioStream for CpalStream {
    fn backend(&self) -> AudioBackend {
        self.backend
    }

    fn close(self: Box<Self>) {
        if let Err(e) = self.stream.pause() {
            debug!(error = %e, "Pausing stream before close failed");
        }
        info!(backend = %self.backend, "Audio output closed");
    }
}

impl AudioOutput for CpalOutput {
    fn open(
        &self,
        backend: AudioBackend,
        params: &AudioParams,
        source: Box<dyn AudioSource>,
    ) -> Result<Box<dyn AudioStream>, AudioError> {
        let host = host_for(backend)?;
        let device = device_for(&host, backend, &params.device)?;
        let device_name = device.name().unwrap_or_else(|_| "unknown".into());

        let (config, format) = stream_config(&device, backend, params)?;
        let realtime = params.realtime;

        let stream = match format {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, source, realtime),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, source, realtime),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, source, realtime),
            cpal::SampleFormat::I32 => build_stream::<i32>(&device, &config, source, realtime),
            other => {
                return Err(AudioError::Stream {
                    backend,
                    reason: format!("unsupported sample format {:?}", other),
                })
            }
        }
        .map_err(|e| AudioError::Stream {
            backend,
            reason: e.to_string(),
        })?;

        stream.play().map_err(|e| AudioError::Stream {
            backend,
            reason: e.to_string(),
        })?;

        info!(
            %backend,
            device = %device_name,
            sample_rate = config.sample_rate.0,
            buffer_size = ?config.buffer_size,
            periods = params.periods,
            realtime,
            "Audio output started"
        );
        Ok(Box::new(CpalStream { stream, backend }))
    }
}

fn host_for(backend: AudioBackend) -> Result<cpal::Host, AudioError> {
    match backend {
        AudioBackend::Jack => jack_host(),
        AudioBackend::Auto
        | AudioBackend::Alsa
        | AudioBackend::PipeWire
        | AudioBackend::PulseAudio => Ok(cpal::default_host()),
    }
}

#[cfg(all(
    feature = "jack",
    any(target_os = "linux", target_os = "dragonfly", target_os = "freebsd")
))]
fn jack_host() -> Result<cpal::Host, AudioError> {
    cpal::host_from_id(cpal::HostId::Jack).map_err(|e| AudioError::Stream {
        backend: AudioBackend::Jack,
        reason: e.to_string(),
    })
}

#[cfg(not(all(
    feature = "jack",
    any(target_os = "linux", target_os = "dragonfly", target_os = "freebsd")
)))]
fn jack_host() -> Result<cpal::Host, AudioError> {
    Err(AudioError::Unsupported(AudioBackend::Jack))
}

/// ALSA plugin device a sound server is reached through.
fn plugin_device(backend: AudioBackend) -> Option<&'static str> {
    match backend {
        AudioBackend::PipeWire => Some("pipewire"),
        AudioBackend::PulseAudio => Some("pulse"),
        _ => None,
    }
}

fn device_for(
    host: &cpal::Host,
    backend: AudioBackend,
    configured: &str,
) -> Result<cpal::Device, AudioError> {
    let wanted = if configured.is_empty() {
        plugin_device(backend)
    } else {
        Some(configured)
    };

    let device = match wanted {
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::Stream {
                backend,
                reason: e.to_string(),
            })?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false)),
        None => host.default_output_device(),
    };

    device.ok_or_else(|| AudioError::NoDevice {
        backend,
        device: wanted.unwrap_or("default").to_string(),
    })
}

/// Picks a stereo-capable configuration at the requested rate.
fn stream_config(
    device: &cpal::Device,
    backend: AudioBackend,
    params: &AudioParams,
) -> Result<(cpal::StreamConfig, cpal::SampleFormat), AudioError> {
    let rate = cpal::SampleRate(params.sample_rate);
    let ranges: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::Stream {
            backend,
            reason: e.to_string(),
        })?
        .filter(|r| {
            r.channels() >= 2 && r.min_sample_rate() <= rate && rate <= r.max_sample_rate()
        })
        .collect();

    // Prefer exactly two channels, then float samples.
    let range = ranges
        .iter()
        .find(|r| r.channels() == 2 && r.sample_format() == cpal::SampleFormat::F32)
        .or_else(|| ranges.iter().find(|r| r.channels() == 2))
        .or_else(|| ranges.first())
        .cloned()
        .ok_or(AudioError::UnsupportedConfig {
            sample_rate: params.sample_rate,
        })?;

    let supported = range.with_sample_rate(rate);
    let buffer_size = match supported.buffer_size() {
        cpal::SupportedBufferSize::Range { min, max }
            if (*min..=*max).contains(&params.buffer_size) =>
        {
            cpal::BufferSize::Fixed(params.buffer_size)
        }
        cpal::SupportedBufferSize::Range { min, max } => {
            warn!(
                requested = params.buffer_size,
                min, max, "Buffer size not supported by device, using device default"
            );
            cpal::BufferSize::Default
        }
        cpal::SupportedBufferSize::Unknown => cpal::BufferSize::Fixed(params.buffer_size),
    };

    let format = supported.sample_format();
    let mut config = supported.config();
    config.buffer_size = buffer_size;
    Ok((config, format))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut source: Box<dyn AudioSource>,
    realtime: bool,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch = Vec::<f32>::new();
    // The callback thread belongs to the host, so promote it on first entry.
    let mut promote = realtime;

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            if promote {
                promote = false;
                promote_current_thread("audio");
            }
            if scratch.len() < data.len() {
                scratch.resize(data.len(), 0.0);
            }
            let out = &mut scratch[..data.len()];
            let rendered = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                source.render(out, channels);
            }));
            if rendered.is_err() {
                out.fill(0.0);
            }
            for (dst, src) in data.iter_mut().zip(out.iter()) {
                *dst = T::from_sample(*src);
            }
        },
        |err| error!(error = %err, "Audio stream error"),
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sound_servers_map_to_plugin_devices() {
        assert_eq!(plugin_device(AudioBackend::PipeWire), Some("pipewire"));
        assert_eq!(plugin_device(AudioBackend::PulseAudio), Some("pulse"));
        assert_eq!(plugin_device(AudioBackend::Alsa), None);
    }

    #[cfg(not(feature = "jack"))]
    #[test]
    fn jack_needs_feature() {
        assert!(matches!(
            host_for(AudioBackend::Jack),
            Err(AudioError::Unsupported(AudioBackend::Jack))
        ));
    }
}
