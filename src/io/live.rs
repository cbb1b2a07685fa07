//! Capture and playback through the native audio host (cpal).
//!
//! A cpal stream is not `Send` on every host, so each device gets its own
//! host thread that builds the stream, plays it and parks until dropped.
//! Samples cross between the stream callback and the pipeline worker through
//! a ring buffer; the worker waits on a condvar with short timeouts so a
//! stalled device cannot hold up shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam_channel::{bounded, Sender};
use dasp_sample::FromSample;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::{debug, error, info, trace};

use super::{AudioSink, AudioSource, DeviceError, ReadStatus};
use crate::audio::CHANNELS;

const BACKEND: &str = "live";

// About 250 ms of stereo audio at 192 kHz.
const RING_SAMPLES: usize = 96_000;

const WAIT_SLICE: Duration = Duration::from_millis(5);
const READ_TIMEOUT: Duration = Duration::from_millis(500);
const STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Wakes the worker when the callback moved samples.
#[derive(Default)]
struct DataSignal {
    lock: Mutex<()>,
    ready: Condvar,
    failed: AtomicBool,
}

impl DataSignal {
    fn notify(&self) {
        self.ready.notify_one();
    }

    fn wait(&self, timeout: Duration) {
        let guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let _ = self.ready.wait_timeout(guard, timeout);
    }

    fn fail(&self) {
        self.failed.store(true, Ordering::Release);
        self.ready.notify_all();
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

/// Owns the thread keeping a cpal stream alive.
struct HostThread {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl HostThread {
    /// Spawns a thread running `build`, which must return the started stream
    /// and its sample rate.
    fn spawn<F>(name: &str, device: &str, build: F) -> Result<(Self, u32), DeviceError>
    where
        F: FnOnce() -> Result<(cpal::Stream, u32), String> + Send + 'static,
    {
        let open_error = |message: String| DeviceError::Open {
            backend: BACKEND,
            name: device.to_string(),
            message,
        };

        let (started_tx, started_rx) = bounded::<Result<u32, String>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build() {
                    Ok((stream, rate)) => {
                        let _ = started_tx.send(Ok(rate));
                        stream
                    }
                    Err(message) => {
                        let _ = started_tx.send(Err(message));
                        return;
                    }
                };
                // Blocks until the sender is dropped.
                let _ = shutdown_rx.recv();
                drop(stream);
            })
            .map_err(|e| open_error(e.to_string()))?;

        let rate = match started_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(message)) => return Err(open_error(message)),
            Err(_) => return Err(open_error("audio host thread exited".to_string())),
        };

        Ok((
            Self {
                shutdown: Some(shutdown_tx),
                handle: Some(handle),
            },
            rate,
        ))
    }
}

impl Drop for HostThread {
    fn drop(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn find_device(host: &cpal::Host, name: &str, input: bool) -> Result<cpal::Device, String> {
    if name == "default" {
        let device = if input {
            host.default_input_device()
        } else {
            host.default_output_device()
        };
        return device.ok_or_else(|| "no default device".to_string());
    }

    let devices = if input {
        host.input_devices()
    } else {
        host.output_devices()
    }
    .map_err(|e| e.to_string())?;

    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(format!("no device named \"{}\"", name))
}

/// Interleaved stereo capture from a named input device.
pub struct CaptureSource {
    consumer: HeapCons<i16>,
    signal: Arc<DataSignal>,
    sample_rate: u32,
    _host: HostThread,
}

impl CaptureSource {
    pub fn open(device: &str, _preferred_rate: u32) -> Result<Self, DeviceError> {
        let (producer, consumer) = HeapRb::<i16>::new(RING_SAMPLES).split();
        let signal = Arc::new(DataSignal::default());

        let name = device.to_string();
        let callback_signal = Arc::clone(&signal);
        let (host, sample_rate) = HostThread::spawn("mpxgen-capture", device, move || {
            let host = cpal::default_host();
            let device = find_device(&host, &name, true)?;
            let supported = device.default_input_config().map_err(|e| e.to_string())?;
            let format = supported.sample_format();
            let config: StreamConfig = supported.config();
            let rate = config.sample_rate.0;

            let stream = match format {
                SampleFormat::I16 => build_capture::<i16>(&device, &config, producer, callback_signal),
                SampleFormat::F32 => build_capture::<f32>(&device, &config, producer, callback_signal),
                SampleFormat::U16 => build_capture::<u16>(&device, &config, producer, callback_signal),
                other => Err(format!("unsupported sample format {:?}", other)),
            }?;
            stream.play().map_err(|e| e.to_string())?;
            info!(device = %name, rate, ?format, "capture started");
            Ok((stream, rate))
        })?;

        Ok(Self {
            consumer,
            signal,
            sample_rate,
            _host: host,
        })
    }
}

fn build_capture<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: HeapProd<i16>,
    signal: Arc<DataSignal>,
) -> Result<cpal::Stream, String>
where
    T: Sample + SizedSample,
    i16: FromSample<T>,
{
    let channels = config.channels as usize;
    let error_signal = Arc::clone(&signal);
    let mut frame = [0i16; CHANNELS];

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let room = producer.vacant_len() / CHANNELS;
                let frames = data.len() / channels;
                for input in data.chunks_exact(channels).take(room) {
                    frame[0] = i16::from_sample(input[0]);
                    frame[1] = if channels > 1 {
                        i16::from_sample(input[1])
                    } else {
                        frame[0]
                    };
                    producer.push_slice(&frame);
                }
                if frames > room {
                    trace!(dropped = frames - room, "capture overrun");
                }
                signal.notify();
            },
            move |err| {
                error!("capture stream error: {}", err);
                error_signal.fail();
            },
            None,
        )
        .map_err(|e| e.to_string())
}

impl AudioSource for CaptureSource {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, samples: &mut [i16]) -> Result<ReadStatus, DeviceError> {
        let wanted = samples.len() / CHANNELS * CHANNELS;
        let deadline = Instant::now() + READ_TIMEOUT;
        let mut filled = 0;

        while filled < wanted {
            if self.signal.has_failed() {
                return Err(DeviceError::Read {
                    backend: BACKEND,
                    message: "capture stream failed".to_string(),
                });
            }
            filled += self.consumer.pop_slice(&mut samples[filled..wanted]);
            if filled == wanted || Instant::now() >= deadline {
                break;
            }
            self.signal.wait(WAIT_SLICE);
        }

        if filled < wanted {
            debug!(frames = filled / CHANNELS, "capture read timed out");
        }
        Ok(ReadStatus::Frames(filled / CHANNELS))
    }
}

/// Interleaved stereo playback to a named output device.
pub struct PlaybackSink {
    producer: HeapProd<i16>,
    signal: Arc<DataSignal>,
    sample_rate: u32,
    _host: HostThread,
}

impl PlaybackSink {
    /// Opens `device` at `rate` if it supports it, otherwise at its default
    /// rate.
    pub fn open(device: &str, rate: u32) -> Result<Self, DeviceError> {
        let (producer, consumer) = HeapRb::<i16>::new(RING_SAMPLES).split();
        let signal = Arc::new(DataSignal::default());

        let name = device.to_string();
        let callback_signal = Arc::clone(&signal);
        let (host, sample_rate) = HostThread::spawn("mpxgen-playback", device, move || {
            let host = cpal::default_host();
            let device = find_device(&host, &name, false)?;
            let (config, format) = select_output_config(&device, rate)?;
            let actual = config.sample_rate.0;

            let stream = match format {
                SampleFormat::I16 => build_playback::<i16>(&device, &config, consumer, callback_signal),
                SampleFormat::F32 => build_playback::<f32>(&device, &config, consumer, callback_signal),
                SampleFormat::U16 => build_playback::<u16>(&device, &config, consumer, callback_signal),
                other => Err(format!("unsupported sample format {:?}", other)),
            }?;
            stream.play().map_err(|e| e.to_string())?;
            info!(device = %name, rate = actual, ?format, "playback started");
            Ok((stream, actual))
        })?;

        Ok(Self {
            producer,
            signal,
            sample_rate,
            _host: host,
        })
    }
}

fn select_output_config(
    device: &cpal::Device,
    rate: u32,
) -> Result<(StreamConfig, SampleFormat), String> {
    if let Ok(configs) = device.supported_output_configs() {
        for supported in configs {
            let format = supported.sample_format();
            if !matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16) {
                continue;
            }
            if supported.min_sample_rate().0 <= rate && supported.max_sample_rate().0 >= rate {
                let config = supported.with_sample_rate(cpal::SampleRate(rate)).config();
                return Ok((config, format));
            }
        }
    }

    let supported = device.default_output_config().map_err(|e| e.to_string())?;
    debug!(
        requested = rate,
        actual = supported.sample_rate().0,
        "falling back to the device default rate"
    );
    Ok((supported.config(), supported.sample_format()))
}

fn build_playback<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut consumer: HeapCons<i16>,
    signal: Arc<DataSignal>,
) -> Result<cpal::Stream, String>
where
    T: Sample + SizedSample + FromSample<i16>,
{
    let channels = config.channels as usize;
    let error_signal = Arc::clone(&signal);
    let mut scratch: Vec<i16> = vec![0; 4096];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels;
                if scratch.len() < frames * CHANNELS {
                    scratch.resize(frames * CHANNELS, 0);
                }
                let popped = consumer.pop_slice(&mut scratch[..frames * CHANNELS]) / CHANNELS;

                for (i, output) in data.chunks_exact_mut(channels).enumerate() {
                    for (ch, sample) in output.iter_mut().enumerate() {
                        // Mono devices get the left channel.
                        *sample = if i < popped && ch < CHANNELS {
                            T::from_sample(scratch[i * CHANNELS + ch])
                        } else {
                            T::EQUILIBRIUM
                        };
                    }
                }
                signal.notify();
            },
            move |err| {
                error!("playback stream error: {}", err);
                error_signal.fail();
            },
            None,
        )
        .map_err(|e| e.to_string())
}

impl AudioSink for PlaybackSink {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn write(&mut self, samples: &[i16]) -> Result<(), DeviceError> {
        let mut written = 0;
        let mut last_progress = Instant::now();

        while written < samples.len() {
            if self.signal.has_failed() {
                return Err(DeviceError::Write {
                    backend: BACKEND,
                    message: "playback stream failed".to_string(),
                });
            }

            // Whole frames only, so the callback never sees a split frame.
            let room = self.producer.vacant_len() / CHANNELS * CHANNELS;
            let chunk = room.min(samples.len() - written);
            if chunk > 0 {
                written += self.producer.push_slice(&samples[written..written + chunk]);
                last_progress = Instant::now();
                continue;
            }

            if last_progress.elapsed() >= STALL_TIMEOUT {
                return Err(DeviceError::Write {
                    backend: BACKEND,
                    message: "device stopped consuming samples".to_string(),
                });
            }
            self.signal.wait(WAIT_SLICE);
        }
        Ok(())
    }
}
