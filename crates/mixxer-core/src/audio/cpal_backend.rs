//! CPAL audio backend implementation
//!
//! Enumerates devices from ALL available hosts (JACK, ALSA, PulseAudio, ...)
//! and builds input/output streams that forward to the engine's handlers.
//!
//! Devices that only offer integer sample formats are supported by converting
//! through a scratch buffer that is allocated when the stream is built, so the
//! driver callback itself never allocates.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize as CpalBufferSize, BuildStreamError, FromSample, Host, HostId, SampleFormat,
    SizedSample, Stream, SupportedStreamConfigRange,
};

use super::backend::{
    AudioBackend, BackendStream, ErrorCallback, InputHandler, OutputHandler, StreamCallback,
};
use super::config::{DeviceId, StreamConfig, MAX_BLOCK_SIZE};
use super::device::DeviceDescriptor;
use super::error::{AudioError, AudioResult, DeviceOpenError};
use crate::types::{Direction, Sample};

/// Get a human-readable name for a host ID
fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

/// Get a host by its display name
fn get_host_by_name(name: &str) -> Option<Host> {
    cpal::available_hosts()
        .into_iter()
        .find(|id| host_name(*id) == name)
        .and_then(|id| cpal::host_from_id(id).ok())
}

/// Maximum channel count over a set of supported configs
fn max_channels<I>(configs: Result<I, cpal::SupportedStreamConfigsError>) -> u16
where
    I: Iterator<Item = SupportedStreamConfigRange>,
{
    configs
        .map(|c| c.map(|range| range.channels()).max().unwrap_or(0))
        .unwrap_or(0)
}

/// Backend for real audio hardware
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    /// Find a cpal device for a direction by ID
    ///
    /// Uses the host named in the ID if available, otherwise searches every host.
    fn find_device(&self, direction: Direction, id: &DeviceId) -> Option<cpal::Device> {
        let hosts: Vec<Host> = match id.host.as_deref().and_then(get_host_by_name) {
            Some(host) => vec![host],
            None => cpal::available_hosts()
                .into_iter()
                .filter_map(|h| cpal::host_from_id(h).ok())
                .collect(),
        };

        hosts.into_iter().find_map(|host| {
            let devices = match direction {
                Direction::Input => host.input_devices().ok()?.collect::<Vec<_>>(),
                Direction::Output => host.output_devices().ok()?.collect::<Vec<_>>(),
            };
            devices
                .into_iter()
                .find(|d| d.name().ok().as_ref() == Some(&id.name))
        })
    }

    /// Pick a supported config matching the session (sample format preference: f32)
    fn select_config(
        &self,
        device: &cpal::Device,
        direction: Direction,
        id: &DeviceId,
        config: &StreamConfig,
    ) -> Result<(cpal::StreamConfig, SampleFormat), DeviceOpenError> {
        let unsupported = |reason: String| DeviceOpenError::Unsupported {
            direction,
            device: id.clone(),
            reason,
        };

        let ranges: Vec<SupportedStreamConfigRange> = match direction {
            Direction::Input => device.supported_input_configs().map(|c| c.collect()),
            Direction::Output => device.supported_output_configs().map(|c| c.collect()),
        }
        .map_err(|e| unsupported(e.to_string()))?;

        let rate = config.sample_rate;
        let mut candidates: Vec<&SupportedStreamConfigRange> = ranges
            .iter()
            .filter(|c| c.channels() == config.channels)
            .filter(|c| rate >= c.min_sample_rate().0 && rate <= c.max_sample_rate().0)
            .filter(|c| {
                matches!(
                    c.sample_format(),
                    SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
                )
            })
            .collect();

        // Prefer f32 so the callback can hand driver memory straight through
        candidates.sort_by_key(|c| match c.sample_format() {
            SampleFormat::F32 => 0,
            SampleFormat::I16 => 1,
            _ => 2,
        });

        let chosen = candidates.first().ok_or_else(|| {
            unsupported(format!(
                "no {}-channel f32/i16/u16 config at {}Hz",
                config.channels, rate
            ))
        })?;

        log::debug!(
            "Selected {} config on {}: {} channels, {}Hz, {:?}, {} frames",
            direction,
            id,
            config.channels,
            rate,
            chosen.sample_format(),
            config.block_size
        );

        Ok((
            cpal::StreamConfig {
                channels: config.channels,
                sample_rate: cpal::SampleRate(rate),
                buffer_size: CpalBufferSize::Fixed(config.block_size.min(MAX_BLOCK_SIZE)),
            },
            chosen.sample_format(),
        ))
    }
}

fn map_build_error(direction: Direction, id: &DeviceId, err: BuildStreamError) -> DeviceOpenError {
    match err {
        BuildStreamError::DeviceNotAvailable => DeviceOpenError::Busy {
            direction,
            device: id.clone(),
        },
        BuildStreamError::StreamConfigNotSupported => DeviceOpenError::Unsupported {
            direction,
            device: id.clone(),
            reason: err.to_string(),
        },
        other => DeviceOpenError::Backend {
            direction,
            device: id.clone(),
            message: other.to_string(),
        },
    }
}

/// Build an input stream, converting to f32 when the device format differs
fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut handler: Box<dyn InputHandler>,
    mut on_error: ErrorCallback,
    scratch_len: usize,
) -> Result<Stream, BuildStreamError>
where
    T: SizedSample,
    Sample: FromSample<T>,
{
    let mut scratch: Vec<Sample> = vec![0.0; scratch_len.max(1)];
    device.build_input_stream(
        config,
        move |data: &[T], _info: &cpal::InputCallbackInfo| {
            for chunk in data.chunks(scratch.len()) {
                let converted = &mut scratch[..chunk.len()];
                for (dst, src) in converted.iter_mut().zip(chunk) {
                    *dst = Sample::from_sample_(*src);
                }
                handler.on_input(converted);
            }
        },
        move |err| on_error(err.to_string()),
        None,
    )
}

/// Build an output stream, converting from f32 when the device format differs
fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut handler: Box<dyn OutputHandler>,
    mut on_error: ErrorCallback,
    scratch_len: usize,
) -> Result<Stream, BuildStreamError>
where
    T: SizedSample + FromSample<Sample>,
{
    let mut scratch: Vec<Sample> = vec![0.0; scratch_len.max(1)];
    device.build_output_stream(
        config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
            let chunk_len = scratch.len();
            for chunk in data.chunks_mut(chunk_len) {
                let rendered = &mut scratch[..chunk.len()];
                handler.on_output(rendered);
                for (dst, src) in chunk.iter_mut().zip(rendered.iter()) {
                    *dst = T::from_sample_(*src);
                }
            }
        },
        move |err| on_error(err.to_string()),
        None,
    )
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "CPAL"
    }

    fn devices(&self) -> AudioResult<Vec<DeviceDescriptor>> {
        let mut all_devices = Vec::new();
        let mut queried_hosts = 0usize;
        let mut last_error = None;

        for host_id in cpal::available_hosts() {
            let host = match cpal::host_from_id(host_id) {
                Ok(h) => h,
                Err(e) => {
                    log::debug!("Could not initialize host {:?}: {}", host_id, e);
                    last_error = Some(e.to_string());
                    continue;
                }
            };
            let host_name_str = host_name(host_id);

            let default_input = host.default_input_device().and_then(|d| d.name().ok());
            let default_output = host.default_output_device().and_then(|d| d.name().ok());

            let devices = match host.devices() {
                Ok(d) => d,
                Err(e) => {
                    log::debug!("Could not enumerate devices for {:?}: {}", host_id, e);
                    last_error = Some(e.to_string());
                    continue;
                }
            };
            queried_hosts += 1;

            for device in devices {
                let name = match device.name() {
                    Ok(n) => n,
                    Err(_) => continue,
                };
                let max_input_channels = max_channels(device.supported_input_configs());
                let max_output_channels = max_channels(device.supported_output_configs());
                if max_input_channels == 0 && max_output_channels == 0 {
                    continue;
                }

                all_devices.push(DeviceDescriptor {
                    id: DeviceId::with_host(&name, &host_name_str),
                    is_default_input: default_input.as_ref() == Some(&name),
                    is_default_output: default_output.as_ref() == Some(&name),
                    name,
                    host: host_name_str.clone(),
                    max_input_channels,
                    max_output_channels,
                });
            }
        }

        if queried_hosts == 0 {
            return Err(AudioError::DeviceEnumeration(
                last_error.unwrap_or_else(|| "no audio hosts available".to_string()),
            ));
        }

        log::info!(
            "Enumerated {} audio devices from {} hosts",
            all_devices.len(),
            queried_hosts
        );

        Ok(all_devices)
    }

    fn default_device(&self, direction: Direction) -> Option<DeviceId> {
        let host_id = cpal::default_host().id();
        let host = cpal::host_from_id(host_id).ok()?;
        let device = match direction {
            Direction::Input => host.default_input_device(),
            Direction::Output => host.default_output_device(),
        }?;
        let name = device.name().ok()?;
        Some(DeviceId::with_host(&name, &host_name(host_id)))
    }

    fn open_stream(
        &self,
        id: &DeviceId,
        config: &StreamConfig,
        callback: StreamCallback,
        on_error: ErrorCallback,
    ) -> Result<Box<dyn BackendStream>, DeviceOpenError> {
        let direction = callback.direction();
        let device = self
            .find_device(direction, id)
            .ok_or_else(|| DeviceOpenError::NotFound {
                direction,
                device: id.clone(),
            })?;

        let (stream_config, format) = self.select_config(&device, direction, id, config)?;
        let scratch_len = config.frame_len();

        let built = match callback {
            StreamCallback::Input(handler) => match format {
                SampleFormat::F32 => device.build_input_stream(
                    &stream_config,
                    {
                        let mut handler = handler;
                        move |data: &[f32], _info: &cpal::InputCallbackInfo| handler.on_input(data)
                    },
                    {
                        let mut on_error = on_error;
                        move |err| on_error(err.to_string())
                    },
                    None,
                ),
                SampleFormat::I16 => {
                    build_input::<i16>(&device, &stream_config, handler, on_error, scratch_len)
                }
                _ => build_input::<u16>(&device, &stream_config, handler, on_error, scratch_len),
            },
            StreamCallback::Output(handler) => match format {
                SampleFormat::F32 => device.build_output_stream(
                    &stream_config,
                    {
                        let mut handler = handler;
                        move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                            handler.on_output(data)
                        }
                    },
                    {
                        let mut on_error = on_error;
                        move |err| on_error(err.to_string())
                    },
                    None,
                ),
                SampleFormat::I16 => {
                    build_output::<i16>(&device, &stream_config, handler, on_error, scratch_len)
                }
                _ => build_output::<u16>(&device, &stream_config, handler, on_error, scratch_len),
            },
        };

        let stream = built.map_err(|e| map_build_error(direction, id, e))?;
        log::info!(
            "Opened {} stream on {} ({}Hz, {} ch, {} frames, ~{:.1}ms)",
            direction,
            id,
            config.sample_rate,
            config.channels,
            config.block_size,
            config.latency_ms()
        );

        Ok(Box::new(CpalStream { stream }))
    }
}

/// Open cpal stream
struct CpalStream {
    stream: Stream,
}

impl BackendStream for CpalStream {
    fn play(&mut self) -> AudioResult<()> {
        self.stream
            .play()
            .map_err(|e| AudioError::StreamControl(e.to_string()))
    }

    fn pause(&mut self) -> AudioResult<()> {
        self.stream
            .pause()
            .map_err(|e| AudioError::StreamControl(e.to_string()))
    }
}
