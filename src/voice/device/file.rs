//! WAV-file audio backend.
//!
//! Capture replays a WAV file in real time, one block per block period.
//! Playback is mixed into a [`PlaybackTimeline`] clocked by wall time and
//! written out as 16-bit PCM when the output is closed.

use super::{AudioCapture, AudioEngine, AudioFormat, AudioOutput, BlockChunker, FileDevices, PlaybackTimeline};
use crate::error::DeviceError;
use crate::voice::pcm::{float_to_s16, resample_linear};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct FileEngine {
    files: FileDevices,
}

impl FileEngine {
    pub fn new(files: FileDevices) -> Self {
        Self { files }
    }
}

/// Read a WAV file as mono `f32` at `target_rate`.
pub fn read_wav_mono(path: &Path, target_rate: u32) -> Result<Vec<f32>, DeviceError> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| DeviceError::Unavailable(format!("cannot open {}: {e}", path.display())))?;
    let spec = reader.spec();
    let stream_error = |e: hound::Error| DeviceError::Stream(format!("{}: {e}", path.display()));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.into_samples::<f32>().collect::<Result<_, _>>().map_err(stream_error)?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << spec.bits_per_sample.saturating_sub(1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(stream_error)?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let mono: Vec<f32> = interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect();
    Ok(resample_linear(&mono, spec.sample_rate, target_rate))
}

#[async_trait]
impl AudioEngine for FileEngine {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn open_output(&self, format: AudioFormat) -> Result<Box<dyn AudioOutput>, DeviceError> {
        Ok(Box::new(FileOutput {
            path: self.files.output.clone(),
            opened: Instant::now(),
            timeline: PlaybackTimeline::new(format.sample_rate),
            closed: false,
        }))
    }

    async fn open_microphone(
        &self,
        format: AudioFormat,
        block_size: usize,
        blocks: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<Box<dyn AudioCapture>, DeviceError> {
        let path = self
            .files
            .input
            .clone()
            .ok_or_else(|| DeviceError::Unavailable("no input file configured".into()))?;

        let read_path = path.clone();
        let rate = format.sample_rate;
        let samples = tokio::task::spawn_blocking(move || read_wav_mono(&read_path, rate))
            .await
            .map_err(|e| DeviceError::Stream(e.to_string()))??;
        info!(path = %path.display(), samples = samples.len(), "Replaying capture file");

        let period = Duration::from_secs_f64(block_size.max(1) as f64 / f64::from(rate.max(1)));
        let task = tokio::spawn(async move {
            let mut chunker = BlockChunker::new(block_size);
            let mut ticker = tokio::time::interval(period);
            for block in chunker.push(&samples) {
                ticker.tick().await;
                if blocks.send(block).is_err() {
                    break;
                }
            }
            debug!("Capture file exhausted");
        });

        Ok(Box::new(FileCapture { task: Some(task) }))
    }
}

struct FileCapture {
    task: Option<JoinHandle<()>>,
}

impl AudioCapture for FileCapture {
    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for FileCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

struct FileOutput {
    path: Option<PathBuf>,
    opened: Instant,
    timeline: PlaybackTimeline,
    closed: bool,
}

impl FileOutput {
    fn write_wav(&mut self, path: &Path) -> Result<usize, hound::Error> {
        let frames = self.timeline.end_frame() as usize;
        let mut mixed = vec![0.0; frames];
        self.timeline.render(&mut mixed);

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.timeline.sample_rate(),
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for sample in float_to_s16(&mixed) {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(frames)
    }
}

impl AudioOutput for FileOutput {
    fn current_time(&self) -> f64 {
        self.opened.elapsed().as_secs_f64()
    }

    fn play_at(&mut self, start: f64, samples: &[f32], sample_rate: u32) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::Stream("output closed".into()));
        }
        let samples = resample_linear(samples, sample_rate, self.timeline.sample_rate());
        self.timeline.schedule(start, samples);
        Ok(())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(path) = self.path.clone() {
            match self.write_wav(&path) {
                Ok(frames) => info!(path = %path.display(), frames, "Playback written"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to write playback file"),
            }
        }
    }
}

impl Drop for FileOutput {
    fn drop(&mut self) {
        self.close();
    }
}
