//! # Audio Devices
//!
//! The voice client talks to audio hardware only through the traits here:
//! an [`AudioEngine`] opens an [`AudioOutput`] (a clock plus scheduled
//! playback) and a microphone [`AudioCapture`] that delivers fixed-size blocks
//! of normalized `f32` samples.
//!
//! ## Backends:
//! - **file**: capture from a WAV file, render playback into a WAV file
//! - **cpal**: system audio devices (requires the `audio-io` feature)

pub mod file;

#[cfg(feature = "audio-io")]
pub mod cpal;

use crate::error::DeviceError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

/// Sample rate and channel count of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u32,
}

/// Playback side of an audio context.
pub trait AudioOutput: Send {
    /// Output clock, in seconds since the output was opened.
    fn current_time(&self) -> f64;

    /// Queue mono samples to start at `start` on the output clock.
    fn play_at(&mut self, start: f64, samples: &[f32], sample_rate: u32) -> Result<(), DeviceError>;

    fn close(&mut self);
}

/// A running microphone capture. Blocks flow through the sender handed to
/// [`AudioEngine::open_microphone`] until `stop` is called.
pub trait AudioCapture: Send {
    fn stop(&mut self);
}

/// Factory for audio outputs and microphone captures.
#[async_trait]
pub trait AudioEngine: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open an output context at `format`.
    async fn open_output(&self, format: AudioFormat) -> Result<Box<dyn AudioOutput>, DeviceError>;

    /// Acquire the microphone. May suspend while access is being granted.
    async fn open_microphone(
        &self,
        format: AudioFormat,
        block_size: usize,
        blocks: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<Box<dyn AudioCapture>, DeviceError>;
}

/// Regroups arbitrarily sized device callbacks into fixed-size blocks.
#[derive(Debug)]
pub struct BlockChunker {
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockChunker {
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self { block_size, pending: Vec::with_capacity(block_size) }
    }

    /// Append samples and return every block that is now complete.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut blocks = Vec::new();
        for &sample in samples {
            self.pending.push(sample);
            if self.pending.len() == self.block_size {
                blocks.push(std::mem::replace(&mut self.pending, Vec::with_capacity(self.block_size)));
            }
        }
        blocks
    }
}

struct Segment {
    start: u64,
    samples: Vec<f32>,
}

impl Segment {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Mono sample timeline that scheduled buffers are mixed into.
///
/// Time is counted in rendered frames; a buffer scheduled in the past plays
/// only the part that is still ahead of the render position.
pub struct PlaybackTimeline {
    sample_rate: u32,
    rendered: u64,
    segments: VecDeque<Segment>,
}

impl PlaybackTimeline {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate: sample_rate.max(1), rendered: 0, segments: VecDeque::new() }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn current_time(&self) -> f64 {
        self.rendered as f64 / f64::from(self.sample_rate)
    }

    pub fn schedule(&mut self, start_secs: f64, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }
        let start = (start_secs.max(0.0) * f64::from(self.sample_rate)).round() as u64;
        let idx = self.segments.iter().position(|s| s.start > start).unwrap_or(self.segments.len());
        self.segments.insert(idx, Segment { start, samples });
    }

    /// Frame index one past the last scheduled sample.
    pub fn end_frame(&self) -> u64 {
        self.segments.iter().map(Segment::end).max().unwrap_or(self.rendered).max(self.rendered)
    }

    /// Render the next `out.len()` mono frames and advance the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let from = self.rendered;
        let to = from + out.len() as u64;
        for segment in self.segments.iter().take_while(|s| s.start < to) {
            let begin = segment.start.max(from);
            let end = segment.end().min(to);
            for frame in begin..end {
                out[(frame - from) as usize] += segment.samples[(frame - segment.start) as usize];
            }
        }
        self.rendered = to;
        self.segments.retain(|s| s.end() > to);
    }

    /// Render into an interleaved buffer by copying mono to every channel.
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let mut mono = vec![0.0; out.len() / channels];
        self.render(&mut mono);
        for (frame, &sample) in out.chunks_mut(channels).zip(mono.iter()) {
            frame.fill(sample.clamp(-1.0, 1.0));
        }
    }
}

/// Audio backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioBackend {
    /// System devices when built with `audio-io`, files otherwise.
    #[default]
    Auto,
    Cpal,
    File,
}

impl std::str::FromStr for AudioBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(AudioBackend::Auto),
            "cpal" | "system" => Ok(AudioBackend::Cpal),
            "file" | "wav" => Ok(AudioBackend::File),
            _ => Err(format!("Unknown audio backend: {}", s)),
        }
    }
}

/// WAV paths used by the file backend.
#[derive(Debug, Clone, Default)]
pub struct FileDevices {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
}

/// Build the engine for `backend`.
pub fn create_engine(backend: AudioBackend, files: FileDevices) -> Result<Arc<dyn AudioEngine>, DeviceError> {
    match backend {
        AudioBackend::File => {
            info!("Using file audio backend");
            Ok(Arc::new(file::FileEngine::new(files)))
        }
        #[cfg(feature = "audio-io")]
        AudioBackend::Cpal | AudioBackend::Auto => {
            info!("Using system audio backend");
            let _ = files;
            Ok(Arc::new(cpal::CpalEngine::new()))
        }
        #[cfg(not(feature = "audio-io"))]
        AudioBackend::Cpal => Err(DeviceError::Unavailable(
            "built without the `audio-io` feature".into(),
        )),
        #[cfg(not(feature = "audio-io"))]
        AudioBackend::Auto => {
            tracing::warn!("System audio unavailable in this build, falling back to the file backend");
            Ok(Arc::new(file::FileEngine::new(files)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parsing() {
        assert_eq!("auto".parse::<AudioBackend>().unwrap(), AudioBackend::Auto);
        assert_eq!("CPAL".parse::<AudioBackend>().unwrap(), AudioBackend::Cpal);
        assert_eq!("wav".parse::<AudioBackend>().unwrap(), AudioBackend::File);
        assert!("alsa".parse::<AudioBackend>().is_err());
    }

    #[test]
    fn test_chunker_emits_fixed_blocks() {
        let mut chunker = BlockChunker::new(4);
        assert!(chunker.push(&[0.1, 0.2, 0.3]).is_empty());
        let blocks = chunker.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(blocks, vec![vec![0.1, 0.2, 0.3, 0.4], vec![0.5, 0.6, 0.7, 0.8]]);
        assert_eq!(chunker.push(&[1.0, 1.0, 1.0]).len(), 1);
    }

    #[test]
    fn test_timeline_places_segments_at_start_time() {
        let mut timeline = PlaybackTimeline::new(4);
        timeline.schedule(0.5, vec![1.0, 1.0]);
        timeline.schedule(1.0, vec![0.5]);
        assert_eq!(timeline.end_frame(), 5);

        let mut out = [9.0; 6];
        timeline.render(&mut out);
        assert_eq!(out, [0.0, 0.0, 1.0, 1.0, 0.5, 0.0]);
        assert_eq!(timeline.current_time(), 1.5);
        assert_eq!(timeline.end_frame(), 6);
    }

    #[test]
    fn test_timeline_late_segment_plays_remainder() {
        let mut timeline = PlaybackTimeline::new(10);
        let mut out = [0.0; 5];
        timeline.render(&mut out);
        timeline.schedule(0.2, vec![0.1, 0.2, 0.3, 0.4, 0.5]);
        timeline.render(&mut out);
        assert_eq!(out, [0.4, 0.5, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_interleaved_render_duplicates_channels() {
        let mut timeline = PlaybackTimeline::new(8);
        timeline.schedule(0.0, vec![0.25, -0.25]);
        let mut out = [0.0; 4];
        timeline.render_interleaved(&mut out, 2);
        assert_eq!(out, [0.25, 0.25, -0.25, -0.25]);
    }

    #[cfg(not(feature = "audio-io"))]
    #[test]
    fn test_cpal_requires_feature() {
        assert!(create_engine(AudioBackend::Cpal, FileDevices::default()).is_err());
        assert_eq!(create_engine(AudioBackend::Auto, FileDevices::default()).unwrap().name(), "file");
    }
}
