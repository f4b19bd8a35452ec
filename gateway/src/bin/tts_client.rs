//! Interactive client for the TextToSpeech gateway.
//!
//! Sends a Config, then one Input per line read from stdin until an empty
//! line or EOF, and writes every received audio chunk to a file.

use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{ClientTlsConfig, Endpoint};
use tracing::{error, info, warn};

use gateway::proto::{
    streaming_synthesize_request::Request as Payload, text_to_speech_client::TextToSpeechClient,
    Config, Input, StreamingSynthesizeRequest,
};

/// Streaming TTS gateway client
#[derive(Debug, Parser)]
#[command(name = "tts-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Gateway address; use https:// for TLS
    #[arg(long, default_value = "http://127.0.0.1:50051")]
    addr: String,

    /// Voice identifier
    #[arg(long, default_value = "Rachel")]
    voice: String,

    /// Model identifier
    #[arg(long, default_value = "eleven_multilingual_v2")]
    model: String,

    /// Requested audio encoding
    #[arg(long, default_value = "pcm_24000")]
    output_format: String,

    /// File receiving the raw audio stream
    #[arg(short, long, default_value = "output.pcm")]
    output: PathBuf,

    /// Seconds to wait for the channel to become ready
    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn request(payload: Payload) -> StreamingSynthesizeRequest {
    StreamingSynthesizeRequest {
        request: Some(payload),
    }
}

/// Read stdin on a plain thread so a pending line never holds up runtime exit.
fn spawn_stdin_reader(tx: mpsc::Sender<StreamingSynthesizeRequest>) {
    std::thread::spawn(move || {
        println!("Enter text to synthesize line by line.");
        println!("Press Enter on an empty line when finished.");

        for line in std::io::stdin().lock().lines() {
            let Ok(text) = line else { break };
            if text.is_empty() {
                break;
            }
            if tx.blocking_send(request(Payload::Input(Input { text }))).is_err() {
                break;
            }
        }
        info!("Input finished, half-closing the stream");
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&args.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut endpoint = Endpoint::from_shared(args.addr.clone())
        .with_context(|| format!("Invalid gateway address: {}", args.addr))?
        .connect_timeout(Duration::from_secs(args.connect_timeout_secs));
    if args.addr.starts_with("https://") {
        endpoint = endpoint
            .tls_config(ClientTlsConfig::new().with_webpki_roots())
            .context("Failed to configure TLS")?;
    }

    let channel = endpoint
        .connect()
        .await
        .with_context(|| format!("Failed to connect to {}", args.addr))?;
    info!(addr = %args.addr, "gRPC channel is ready");

    let (tx, rx) = mpsc::channel(32);
    info!(voice = %args.voice, model = %args.model, "Sending Config");
    tx.send(request(Payload::Config(Config {
        voice_id: args.voice.clone(),
        model_id: args.model.clone(),
        output_format: args.output_format.clone(),
    })))
    .await
    .context("Request stream closed before Config was sent")?;
    spawn_stdin_reader(tx);

    let mut client = TextToSpeechClient::new(channel);
    let mut responses = match client.streaming_synthesize(ReceiverStream::new(rx)).await {
        Ok(response) => response.into_inner(),
        Err(status) => {
            error!(code = ?status.code(), details = status.message(), "RPC failed");
            return Err(status).context("StreamingSynthesize failed");
        }
    };

    let mut file = tokio::fs::File::create(&args.output)
        .await
        .with_context(|| format!("Failed to create {}", args.output.display()))?;

    let mut chunks = 0usize;
    let mut bytes = 0usize;
    loop {
        match responses.message().await {
            Ok(Some(response)) => {
                if response.audio_chunk.is_empty() {
                    continue;
                }
                chunks += 1;
                bytes += response.audio_chunk.len();
                info!(chunk = chunks, size = response.audio_chunk.len(), "Received audio chunk");
                file.write_all(&response.audio_chunk).await?;
            }
            Ok(None) => break,
            Err(status) => {
                error!(code = ?status.code(), details = status.message(), "RPC failed");
                file.flush().await?;
                return Err(status).context("Audio stream failed");
            }
        }
    }

    file.flush().await?;
    if chunks == 0 {
        warn!("Stream finished without audio");
    }
    info!(
        chunks,
        bytes,
        output = %args.output.display(),
        "Response stream finished"
    );
    Ok(())
}
