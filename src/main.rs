//! vosk-recog - Recognize a raw PCM recording through one engine channel
//!
//! Streams the file in 20 ms frames exactly as a media path would and
//! prints every response and event as a JSON line.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vosk_recog::audio::{CodecDescriptor, Frame};
use vosk_recog::config::Config;
use vosk_recog::decoder::VoskModel;
use vosk_recog::engine::{AudioStream, Engine};
use vosk_recog::protocol::{EventKind, Message, Method, Request, RequestId, RequestState};

const FRAME_MS: u64 = 20;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Raw little-endian PCM16 mono recording
    #[arg(short, long)]
    input: PathBuf,

    /// Sample rate of the recording
    #[arg(short, long, default_value_t = 8000)]
    rate: u32,

    /// Grammar document defined before recognizing
    #[arg(short, long)]
    grammar: Option<PathBuf>,

    /// Config file (defaults to the user config location)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Vosk model directory, overriding the config
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Pace frames at real time instead of as fast as possible
    #[arg(long)]
    realtime: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn print(message: &Message) -> Result<()> {
    println!("{}", serde_json::to_string(message)?);
    Ok(())
}

/// Print queued messages; true once `request_id` reached a final state
fn drain(rx: &mut UnboundedReceiver<Message>, request_id: RequestId) -> Result<bool> {
    let mut finished = false;
    while let Ok(message) = rx.try_recv() {
        print(&message)?;
        finished |= is_final(&message, request_id);
    }
    Ok(finished)
}

fn is_final(message: &Message, request_id: RequestId) -> bool {
    match message {
        Message::Event { event, .. } => {
            event.request_id == request_id && event.kind == EventKind::RecognitionComplete
        }
        Message::Response { response, .. } => {
            response.request_id == request_id && response.state == RequestState::Complete
        }
        _ => false,
    }
}

/// Wait for the response to `request_id`, printing everything seen
async fn await_response(
    rx: &mut UnboundedReceiver<Message>,
    request_id: RequestId,
) -> Result<Option<Message>> {
    while let Some(message) = rx.recv().await {
        print(&message)?;
        if matches!(&message, Message::Response { response, .. } if response.request_id == request_id)
        {
            return Ok(Some(message));
        }
    }
    Ok(None)
}

async fn stream_file(
    stream: &AudioStream,
    rx: &mut UnboundedReceiver<Message>,
    samples: &[i16],
    frame_len: usize,
    realtime: bool,
    request_id: RequestId,
) -> Result<bool> {
    let mut ticker = tokio::time::interval(Duration::from_millis(FRAME_MS));
    for chunk in samples.chunks(frame_len) {
        if realtime {
            ticker.tick().await;
        }
        stream.write(&Frame::audio(chunk))?;
        if drain(rx, request_id)? {
            return Ok(true);
        }
    }
    Ok(false)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Setup logging
    let level = if args.verbose {
        "debug".to_string()
    } else {
        config.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🎙️ vosk-recog v{} starting...", env!("CARGO_PKG_VERSION"));

    let model_path = args
        .model
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.model_path));
    let model = VoskModel::load(&model_path, config.decoder)?;

    let engine = Engine::new(config, Arc::new(model));
    engine.start()?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let channel = engine.open_channel(Arc::new(tx))?;
    let codec = CodecDescriptor::lpcm(args.rate, &engine.config().sample_rates)?;
    let stream = engine.stream(channel)?;
    stream.open(codec.sample_rate)?;

    let session = format!("{}-{}", std::process::id(), channel.0);
    let mut next_id: RequestId = 1;

    if let Some(path) = &args.grammar {
        let body = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read grammar: {}", path.display()))?;
        engine.dispatch(
            channel,
            Request::new(next_id, Method::DefineGrammar, &session).with_body(body),
        )?;
        await_response(&mut rx, next_id).await?;
        next_id += 1;
    }

    let recognize_id = next_id;
    engine.dispatch(channel, Request::new(recognize_id, Method::Recognize, &session))?;
    match await_response(&mut rx, recognize_id).await? {
        Some(Message::Response { response, .. }) if response.state == RequestState::InProgress => {}
        other => anyhow::bail!("RECOGNIZE was not accepted: {:?}", other),
    }

    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read input: {}", args.input.display()))?;
    let samples: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]))
        .collect();
    let frame_len = codec.samples_per(FRAME_MS);
    info!(
        "📂 Streaming {} ms of audio from {}",
        codec.duration_ms(samples.len()),
        args.input.display()
    );

    let finished = stream_file(&stream, &mut rx, &samples, frame_len, args.realtime, recognize_id)
        .await?;

    if !finished {
        // The recording ended mid-utterance: stop the request, which is
        // answered on the next frame
        warn!("Input ended before recognition completed, stopping");
        let stop_id = recognize_id + 1;
        engine.dispatch(channel, Request::new(stop_id, Method::Stop, &session))?;
        let silence = vec![0i16; frame_len];
        loop {
            stream.write(&Frame::audio(&silence))?;
            if drain(&mut rx, stop_id)? {
                break;
            }
            tokio::time::sleep(Duration::from_millis(FRAME_MS)).await;
        }
    }

    engine.close_channel(channel)?;
    while let Some(message) = rx.recv().await {
        print(&message)?;
        if matches!(message, Message::ChannelClosed { .. }) {
            break;
        }
    }

    engine.shutdown()?;
    info!("👋 vosk-recog finished");
    Ok(())
}
