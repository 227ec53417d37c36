//! # EduMitra Realtime - Command Line Host
//!
//! A terminal host for the chat session and the voice client.
//!
//! ## Subcommands:
//! - **chat**: interactive text conversation; every stdin line is one message.
//!   `/summary [file]` exports a PDF summary, `/clear` resets the session,
//!   `/quit` leaves.
//! - **voice**: stream microphone audio to the voice gateway and play replies
//! - **courses**: list courses, or compare two of them
//! - **config**: print the effective configuration as TOML
//!
//! ## Startup:
//! 1. `.env` is loaded (if present) so `API_URL` / `VOICE_URL` work locally
//! 2. Logging is initialised from `RUST_LOG`
//! 3. Configuration is loaded and validated before anything connects

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edumitra_realtime::api::BackendClient;
use edumitra_realtime::chat::session::{ChatEvent, ConnectionState, ToastLevel};
use edumitra_realtime::chat::{ChatClient, ChatHandle, SocketIoTransport};
use edumitra_realtime::config::AppConfig;
use edumitra_realtime::voice::device::{create_engine, AudioBackend, FileDevices};
use edumitra_realtime::voice::{VoiceClient, VoiceEvent, VoiceState, WebSocketVoiceTransport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "edumitra", version, about = "EduMitra realtime chat and voice client")]
struct Cli {
    /// Configuration file stem (`config` reads `config.toml`)
    #[arg(long, default_value = "config")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive text chat
    Chat,
    /// Stream audio to the voice gateway
    Voice {
        /// Audio backend: auto, cpal, file
        #[arg(long, default_value = "auto")]
        backend: AudioBackend,
        /// WAV file to use as microphone (file backend)
        #[arg(long)]
        input: Option<PathBuf>,
        /// WAV file that receives playback (file backend)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },
    /// List courses, or compare two with `--compare A B`
    Courses {
        #[arg(long, num_args = 2, value_names = ["COURSE1", "COURSE2"])]
        compare: Option<Vec<String>>,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    let config = AppConfig::load_from(&cli.config).context("failed to load configuration")?;
    config.validate()?;

    info!("Starting edumitra v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Chat => run_chat(config).await,
        Command::Voice { backend, input, output, duration } => {
            let files = FileDevices { input, output };
            run_voice(config, backend, files, duration.map(Duration::from_secs)).await
        }
        Command::Courses { compare } => run_courses(config, compare).await,
        Command::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

/// Initialize tracing from `RUST_LOG`, defaulting to info for this crate.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edumitra_realtime=info,edumitra=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

fn print_chat_event(event: &ChatEvent) {
    match event {
        ChatEvent::StatusChanged(status) => println!("[{status:?}]"),
        ChatEvent::MessageAppended(message) => {
            println!("{:?}: {}", message.sender, message.content);
            let options = message.visible_options();
            if !options.is_empty() {
                println!("    options: {}", options.join(" | "));
            }
            for row in message.cutoff_rows() {
                println!(
                    "    {} {} {}: {} - {}",
                    row.department, row.year, row.category, row.opening_rank, row.closing_rank
                );
            }
            if let Some(link) = message.link.as_deref().filter(|l| !l.is_empty()) {
                println!("    link: {link}");
            }
        }
        ChatEvent::CollegeInfoUpdated(info) if !info.name.is_empty() => {
            println!("    (college: {})", info.name);
        }
        ChatEvent::CollegeInfoUpdated(_) => {}
        ChatEvent::Typing(true) => println!("    ..."),
        ChatEvent::Typing(false) => {}
        ChatEvent::Toast(toast) => match toast.level {
            ToastLevel::Success => println!("* {}", toast.text),
            ToastLevel::Error => println!("! {}", toast.text),
        },
        ChatEvent::Cleared => println!("[conversation cleared]"),
    }
}

/// Run an interactive chat until `/quit`, end of input, or Ctrl+C.
async fn run_chat(config: AppConfig) -> Result<()> {
    let backend = BackendClient::new(config.chat.api_url.clone());
    let (handle, events, task) = ChatClient::spawn(config.chat, Arc::new(SocketIoTransport));

    let printer = tokio::spawn(async move {
        let mut events = UnboundedReceiverStream::new(events);
        while let Some(event) = events.next().await {
            print_chat_event(&event);
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
                    ("/quit", _) => break,
                    ("/clear", _) => handle.clear()?,
                    ("/summary", path) => {
                        let path = if path.is_empty() { "chat_summary.pdf" } else { path };
                        if let Err(e) = export_summary(&handle, &backend, path).await {
                            error!("Summary export failed: {e:#}");
                        }
                    }
                    _ => {
                        handle.send(line).await?;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    handle.shutdown().await?;
    task.await?;
    printer.await?;
    Ok(())
}

async fn export_summary(handle: &ChatHandle, backend: &BackendClient, path: &str) -> Result<()> {
    let snapshot = handle.snapshot().await?;
    if snapshot.status != ConnectionState::Connected {
        warn!("Exporting summary while not connected to the chat channel");
    }
    let conversation = handle.summary_conversation().await?;
    let summary = backend.generate_summary(&conversation).await?;
    let pdf = backend.download_summary(&summary).await?;
    tokio::fs::write(path, &pdf)
        .await
        .with_context(|| format!("failed to write {path}"))?;
    println!("* Summary saved to {path} ({} bytes)", pdf.len());
    Ok(())
}

/// Stream until the channel drops, the duration elapses, or Ctrl+C.
async fn run_voice(
    config: AppConfig,
    backend: AudioBackend,
    files: FileDevices,
    duration: Option<Duration>,
) -> Result<()> {
    let engine = create_engine(backend, files)?;
    let (handle, events, task) =
        VoiceClient::spawn(config.voice, Arc::new(WebSocketVoiceTransport), engine);

    handle.start().await.context("voice start failed")?;

    let mut events = UnboundedReceiverStream::new(events);
    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(VoiceEvent::StateChanged(VoiceState::Stopped)) | None => break,
                Some(VoiceEvent::StateChanged(state)) => println!("[{state:?}]"),
                Some(VoiceEvent::Transcript { text, user_id }) => match user_id {
                    Some(user) => println!("{user}: {text}"),
                    None => println!("bot: {text}"),
                },
                Some(VoiceEvent::Error(message)) => println!("! {message}"),
                Some(VoiceEvent::Level(_)) | Some(VoiceEvent::Playback(_)) => {}
            },
            _ = &mut deadline => {
                info!("Voice duration elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    let status = handle.status().await?;
    info!(cursor = status.stream.playback_cursor, "Stopping voice stream");
    handle.shutdown().await?;
    task.await?;
    Ok(())
}

async fn run_courses(config: AppConfig, compare: Option<Vec<String>>) -> Result<()> {
    let backend = BackendClient::new(config.chat.api_url);
    match compare.as_deref() {
        Some([course1, course2]) => {
            let data = backend.compare_courses(course1, course2).await?;
            for details in [&data.course1_details, &data.course2_details] {
                println!("{}", details.name);
                println!("  demand: {}", details.industry_demand);
                println!("  salary: {}", details.average_salary_inr);
                println!("  careers: {}", details.career_opportunities.join(", "));
                println!("  skills: {}", details.skills_required.join(", "));
                println!("  companies: {}", details.top_companies.join(", "));
            }
            println!();
            println!("{}", data.comparison);
        }
        _ => {
            for course in backend.list_courses().await? {
                println!("{course}");
            }
        }
    }
    Ok(())
}
