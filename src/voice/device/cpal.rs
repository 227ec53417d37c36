//! System audio through CPAL.
//!
//! `cpal::Stream` is not `Send`, so each stream is built, played and dropped
//! on its own thread. The handle returned to the voice client only holds the
//! shared playback timeline and a stop signal for that thread.

use super::{AudioCapture, AudioEngine, AudioFormat, AudioOutput, BlockChunker, PlaybackTimeline};
use crate::error::DeviceError;
use crate::voice::pcm::resample_linear;
use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig, SupportedStreamConfig};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

pub struct CpalEngine;

impl CpalEngine {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpalEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Prefer an f32 config at the requested rate; fall back to the device default.
fn pick_config(
    supported: impl Iterator<Item = cpal::SupportedStreamConfigRange>,
    default: SupportedStreamConfig,
    format: AudioFormat,
) -> SupportedStreamConfig {
    let wanted = SampleRate(format.sample_rate);
    let mut candidates: Vec<_> = supported
        .filter(|range| range.sample_format() == SampleFormat::F32)
        .filter(|range| range.min_sample_rate() <= wanted && wanted <= range.max_sample_rate())
        .collect();
    candidates.sort_by_key(|range| (u32::from(range.channels()) as i64 - format.channels as i64).abs());
    match candidates.into_iter().next() {
        Some(range) => range.with_sample_rate(wanted),
        None => default,
    }
}

fn map_build_error(err: cpal::BuildStreamError) -> DeviceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => DeviceError::Unavailable(err.to_string()),
        cpal::BuildStreamError::BackendSpecific { ref err } if err.description.to_lowercase().contains("permission") => {
            DeviceError::PermissionDenied(err.description.clone())
        }
        other => DeviceError::Stream(other.to_string()),
    }
}

/// A thread that owns one playing stream until told to stop.
struct StreamThread {
    stop: Option<std_mpsc::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl StreamThread {
    /// Run `build` on a new thread; resolves once the stream is playing.
    async fn spawn<F>(name: &str, build: F) -> Result<Self, DeviceError>
    where
        F: FnOnce() -> Result<cpal::Stream, DeviceError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let join = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream.play().map_err(|e| DeviceError::Stream(e.to_string()))?;
                    Ok(stream)
                }) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                // Blocks until a stop is sent or the sender is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self { stop: Some(stop_tx), join: Some(join) }),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => Err(DeviceError::Stream("audio thread exited during setup".into())),
        }
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CpalOutput {
    timeline: Arc<Mutex<PlaybackTimeline>>,
    thread: Option<StreamThread>,
}

impl AudioOutput for CpalOutput {
    fn current_time(&self) -> f64 {
        self.timeline.lock().map(|t| t.current_time()).unwrap_or(0.0)
    }

    fn play_at(&mut self, start: f64, samples: &[f32], sample_rate: u32) -> Result<(), DeviceError> {
        if self.thread.is_none() {
            return Err(DeviceError::Stream("output closed".into()));
        }
        let mut timeline = self
            .timeline
            .lock()
            .map_err(|_| DeviceError::Stream("playback timeline poisoned".into()))?;
        let samples = resample_linear(samples, sample_rate, timeline.sample_rate());
        timeline.schedule(start, samples);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            thread.stop();
            info!("Audio output closed");
        }
    }
}

struct CpalCapture {
    thread: Option<StreamThread>,
}

impl AudioCapture for CpalCapture {
    fn stop(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            thread.stop();
            info!("Microphone released");
        }
    }
}

#[async_trait]
impl AudioEngine for CpalEngine {
    fn name(&self) -> &'static str {
        "cpal"
    }

    async fn open_output(&self, format: AudioFormat) -> Result<Box<dyn AudioOutput>, DeviceError> {
        // Probe here so the device rate is known before the stream thread starts.
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| DeviceError::Unavailable("no output device available".into()))?;
        let default = device
            .default_output_config()
            .map_err(|e| DeviceError::Unavailable(format!("failed to get output config: {e}")))?;
        let supported = device
            .supported_output_configs()
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
        let chosen = pick_config(supported, default, format);
        let config: StreamConfig = chosen.config();
        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".into()),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "Opening audio output"
        );

        let timeline = Arc::new(Mutex::new(PlaybackTimeline::new(config.sample_rate.0)));
        let render_timeline = Arc::clone(&timeline);
        let channels = usize::from(config.channels);

        let thread = StreamThread::spawn("audio-output", move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| DeviceError::Unavailable("no output device available".into()))?;
            device
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| match render_timeline.lock() {
                        Ok(mut timeline) => timeline.render_interleaved(data, channels),
                        Err(_) => data.fill(0.0),
                    },
                    |err| error!("Audio output stream error: {}", err),
                    None,
                )
                .map_err(map_build_error)
        })
        .await?;

        Ok(Box::new(CpalOutput { timeline, thread: Some(thread) }))
    }

    async fn open_microphone(
        &self,
        format: AudioFormat,
        block_size: usize,
        blocks: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<Box<dyn AudioCapture>, DeviceError> {
        let thread = StreamThread::spawn("audio-capture", move || {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| DeviceError::Unavailable("no input device available".into()))?;
            let default = device
                .default_input_config()
                .map_err(|e| DeviceError::Unavailable(format!("failed to get input config: {e}")))?;
            let supported = device
                .supported_input_configs()
                .map_err(|e| DeviceError::Unavailable(e.to_string()))?;
            let chosen = pick_config(supported, default, format);
            let config: StreamConfig = chosen.config();
            let device_rate = config.sample_rate.0;
            let channels = usize::from(config.channels.max(1));
            if device_rate != format.sample_rate {
                warn!(device_rate, wanted = format.sample_rate, "Resampling microphone input");
            }
            info!(
                device = %device.name().unwrap_or_else(|_| "unknown".into()),
                sample_rate = device_rate,
                channels,
                "Opening microphone"
            );

            let mut chunker = BlockChunker::new(block_size);
            let target_rate = format.sample_rate;
            device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono: Vec<f32> = data
                            .chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                            .collect();
                        let mono = resample_linear(&mono, device_rate, target_rate);
                        for block in chunker.push(&mono) {
                            if blocks.send(block).is_err() {
                                debug!("Capture receiver dropped");
                                return;
                            }
                        }
                    },
                    |err| error!("Audio input stream error: {}", err),
                    None,
                )
                .map_err(map_build_error)
        })
        .await?;

        Ok(Box::new(CpalCapture { thread: Some(thread) }))
    }
}
