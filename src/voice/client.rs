//! # Voice Streaming Client
//!
//! Owns one binary voice channel, one audio output and one microphone capture
//! on a dedicated tokio task.
//!
//! ## State machine:
//! ```text
//! Stopped --start--> Starting --(schema, channel, output, mic)--> Streaming
//!    ^                   |                                           |
//!    +---- any failure --+------------- stop / channel close -------+
//! ```
//!
//! Resources are acquired in the order channel, output, microphone, and all
//! three are released together on any exit from `Streaming`. A failed start
//! releases whatever was already acquired. The voice channel is never
//! reconnected automatically; calling [`VoiceHandle::start`] again is the
//! retry.
//!
//! ## Streaming loop:
//! - each capture block becomes one encoded frame and one network send
//! - each inbound audio frame is decoded and scheduled back to back on the
//!   output clock by the [`PlaybackScheduler`]
//! - a frame that fails to decode is logged and dropped

use crate::config::VoiceConfig;
use crate::error::{AppResult, ClientError, TransportError};
use crate::voice::channel::{VoiceChannel, VoiceTransport};
use crate::voice::device::{AudioCapture, AudioEngine, AudioFormat, AudioOutput};
use crate::voice::frame::{Frame, FrameCodec};
use crate::voice::pcm::{audio_level, decode_audio, float_to_s16, s16_to_le_bytes};
use crate::voice::scheduler::{AudioStreamState, PlaybackScheduler, ScheduledBuffer};
use crate::voice::schema::{SchemaLoader, SchemaSource};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VoiceState {
    Stopped,
    Starting,
    Streaming,
}

/// Published by the voice task.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    StateChanged(VoiceState),
    /// Meter value (0-100) of the last capture block.
    Level(f32),
    /// An inbound audio buffer was placed on the output clock.
    Playback(ScheduledBuffer),
    /// Text carried by a non-audio frame.
    Transcript { text: String, user_id: Option<String> },
    /// A failure the user should see; the client is `Stopped` afterwards.
    Error(String),
}

/// Current state plus the playback bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceStatus {
    pub state: VoiceState,
    pub stream: AudioStreamState,
}

enum Command {
    Start(oneshot::Sender<AppResult<()>>),
    Stop(oneshot::Sender<()>),
    Status(oneshot::Sender<VoiceStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a voice client task.
#[derive(Clone)]
pub struct VoiceHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl VoiceHandle {
    /// Acquire every resource and begin streaming. Fails with
    /// [`ClientError::InvalidState`] unless the client is `Stopped`.
    pub async fn start(&self) -> AppResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Start(reply))?;
        rx.await.map_err(|_| ClientError::SessionClosed)?
    }

    /// Stop streaming and release all resources. No-op when already stopped.
    pub async fn stop(&self) -> AppResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Stop(reply))?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    pub async fn status(&self) -> AppResult<VoiceStatus> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Status(reply))?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    /// Stop streaming and end the task.
    pub async fn shutdown(&self) -> AppResult<()> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::Shutdown(reply))?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    fn request(&self, command: Command) -> AppResult<()> {
        self.commands.send(command).map_err(|_| ClientError::SessionClosed)
    }
}

/// Entry point for starting voice clients.
pub struct VoiceClient;

impl VoiceClient {
    /// Start a voice client task in the `Stopped` state.
    pub fn spawn(
        config: VoiceConfig,
        transport: Arc<dyn VoiceTransport>,
        engine: Arc<dyn AudioEngine>,
    ) -> (VoiceHandle, mpsc::UnboundedReceiver<VoiceEvent>, JoinHandle<()>) {
        let loader = Arc::new(SchemaLoader::new(SchemaSource::parse(&config.schema_source)));
        Self::spawn_with_schema(config, loader, transport, engine)
    }

    /// Like [`VoiceClient::spawn`], sharing an existing schema loader.
    pub fn spawn_with_schema(
        config: VoiceConfig,
        schema: Arc<SchemaLoader>,
        transport: Arc<dyn VoiceTransport>,
        engine: Arc<dyn AudioEngine>,
    ) -> (VoiceHandle, mpsc::UnboundedReceiver<VoiceEvent>, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let scheduler = PlaybackScheduler::new(config.play_time_reset_threshold_secs);
        let driver = Driver {
            config,
            schema,
            transport,
            engine,
            events: event_tx,
            state: VoiceState::Stopped,
            stream_state: AudioStreamState::default(),
            scheduler,
            active: None,
        };
        let task = tokio::spawn(driver.run(command_rx));

        (VoiceHandle { commands: command_tx }, event_rx, task)
    }
}

/// The three resources held while streaming.
struct ActiveStream {
    codec: FrameCodec,
    channel: Box<dyn VoiceChannel>,
    output: Box<dyn AudioOutput>,
    capture: Box<dyn AudioCapture>,
    blocks: mpsc::UnboundedReceiver<Vec<f32>>,
    capture_done: bool,
}

enum StreamInput {
    Block(Option<Vec<f32>>),
    Frame(Result<Vec<u8>, TransportError>),
}

impl ActiveStream {
    async fn next_input(&mut self) -> StreamInput {
        tokio::select! {
            block = self.blocks.recv(), if !self.capture_done => StreamInput::Block(block),
            frame = self.channel.next_frame() => StreamInput::Frame(frame),
        }
    }

    async fn release(mut self) {
        self.capture.stop();
        self.output.close();
        self.channel.close().await;
    }
}

struct Driver {
    config: VoiceConfig,
    schema: Arc<SchemaLoader>,
    transport: Arc<dyn VoiceTransport>,
    engine: Arc<dyn AudioEngine>,
    events: mpsc::UnboundedSender<VoiceEvent>,
    state: VoiceState,
    stream_state: AudioStreamState,
    scheduler: PlaybackScheduler,
    active: Option<ActiveStream>,
}

impl Driver {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(engine = self.engine.name(), "Voice client task started");

        loop {
            let active = &mut self.active;

            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(Command::Start(reply)) => {
                            let result = self.start().await;
                            let _ = reply.send(result);
                        }
                        Some(Command::Stop(reply)) => {
                            self.stop().await;
                            let _ = reply.send(());
                        }
                        Some(Command::Status(reply)) => {
                            let _ = reply.send(VoiceStatus { state: self.state, stream: self.stream_state });
                        }
                        Some(Command::Shutdown(reply)) => {
                            self.stop().await;
                            let _ = reply.send(());
                            break;
                        }
                        None => {
                            debug!("All voice handles dropped");
                            self.stop().await;
                            break;
                        }
                    }
                }
                input = async {
                    match active.as_mut() {
                        Some(stream) => stream.next_input().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match input {
                        StreamInput::Block(Some(block)) => self.on_capture_block(block).await,
                        StreamInput::Block(None) => {
                            debug!("Capture ended");
                            if let Some(stream) = self.active.as_mut() {
                                stream.capture_done = true;
                            }
                            self.stream_state.is_capturing = false;
                        }
                        StreamInput::Frame(Ok(bytes)) => self.on_frame(&bytes),
                        StreamInput::Frame(Err(err)) => {
                            warn!(error = %err, "Voice channel lost");
                            self.teardown().await;
                            self.publish(VoiceEvent::Error(err.to_string()));
                        }
                    }
                }
            }
        }

        info!("Voice client task stopped");
    }

    fn publish(&self, event: VoiceEvent) {
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: VoiceState) {
        if self.state != state {
            self.state = state;
            info!(state = ?state, "Voice state changed");
            self.publish(VoiceEvent::StateChanged(state));
        }
    }

    async fn start(&mut self) -> AppResult<()> {
        if self.state != VoiceState::Stopped {
            return Err(ClientError::InvalidState(format!("cannot start while {:?}", self.state)));
        }
        self.set_state(VoiceState::Starting);

        match self.acquire().await {
            Ok(stream) => {
                self.active = Some(stream);
                self.scheduler.reset();
                self.stream_state = AudioStreamState { is_capturing: true, ..AudioStreamState::default() };
                self.set_state(VoiceState::Streaming);
                Ok(())
            }
            Err(err) => {
                error!(error = %err, "Voice start failed");
                self.set_state(VoiceState::Stopped);
                self.publish(VoiceEvent::Error(err.to_string()));
                Err(err)
            }
        }
    }

    /// Schema first, then channel, output and microphone. On failure every
    /// resource acquired so far is released before returning.
    async fn acquire(&mut self) -> AppResult<ActiveStream> {
        let schema = self.schema.get().await?;
        let codec = FrameCodec::from_schema(&schema, &self.config.schema_frame_type)?;

        let mut channel = self.transport.connect(&self.config.url).await?;

        let format = AudioFormat {
            sample_rate: self.config.sample_rate,
            channels: self.config.num_channels,
        };
        let mut output = match self.engine.open_output(format).await {
            Ok(output) => output,
            Err(err) => {
                channel.close().await;
                return Err(err.into());
            }
        };

        let (block_tx, blocks) = mpsc::unbounded_channel();
        let capture = match self.engine.open_microphone(format, self.config.block_size, block_tx).await {
            Ok(capture) => capture,
            Err(err) => {
                output.close();
                channel.close().await;
                return Err(err.into());
            }
        };

        Ok(ActiveStream { codec, channel, output, capture, blocks, capture_done: false })
    }

    async fn stop(&mut self) {
        if self.state == VoiceState::Streaming {
            self.teardown().await;
        }
    }

    /// Release all resources and return to `Stopped` with zeroed stream state.
    async fn teardown(&mut self) {
        if let Some(stream) = self.active.take() {
            stream.release().await;
        }
        self.scheduler.reset();
        self.stream_state = AudioStreamState::default();
        self.set_state(VoiceState::Stopped);
    }

    async fn on_capture_block(&mut self, block: Vec<f32>) {
        let Some(stream) = self.active.as_mut() else {
            return;
        };

        let level = audio_level(&block);
        let pcm = s16_to_le_bytes(&float_to_s16(&block));
        let frame = stream
            .codec
            .encode_audio(pcm, self.config.sample_rate, self.config.num_channels);

        if let Err(err) = stream.channel.send(frame).await {
            warn!(error = %err, "Voice send failed");
            self.teardown().await;
            self.publish(VoiceEvent::Error(err.to_string()));
            return;
        }

        self.stream_state.level = level;
        self.publish(VoiceEvent::Level(level));
    }

    fn on_frame(&mut self, bytes: &[u8]) {
        let Some(stream) = self.active.as_mut() else {
            return;
        };

        let frame = match stream.codec.decode(bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, len = bytes.len(), "Dropping undecodable voice frame");
                return;
            }
        };

        match frame {
            Frame::Audio(audio) => {
                let decoded = match decode_audio(&audio.audio, audio.sample_rate, audio.num_channels) {
                    Ok(decoded) => decoded,
                    Err(err) => {
                        warn!(error = %err, "Dropping voice frame with undecodable audio");
                        return;
                    }
                };

                let now = stream.output.current_time();
                let placed = self.scheduler.schedule(now, decoded.duration_secs());
                if let Err(err) = stream.output.play_at(placed.start, &decoded.samples, decoded.sample_rate) {
                    warn!(error = %err, "Failed to queue playback");
                    return;
                }
                debug!(
                    start = placed.start,
                    duration = placed.duration,
                    reset = placed.reset,
                    "Scheduled playback"
                );

                self.stream_state.playback_cursor = self.scheduler.cursor();
                self.stream_state.last_frame_arrival = self.scheduler.last_arrival();
                self.stream_state.is_playing = true;
                self.publish(VoiceEvent::Playback(placed));
            }
            Frame::Text(text) => self.publish(VoiceEvent::Transcript { text, user_id: None }),
            Frame::Transcription { text, user_id, .. } => {
                let user_id = Some(user_id).filter(|id| !id.is_empty());
                self.publish(VoiceEvent::Transcript { text, user_id });
            }
            Frame::Empty => debug!(len = bytes.len(), "Ignoring frame without a known payload"),
        }
    }
}
